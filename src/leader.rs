// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Lease based leader election.
//!
//! Only the holder of `minio-operator-lock` runs controllers and the webhook
//! server. The holder labels its own pod `operator=leader` so the operator
//! service routes to it. Losing the lease is fatal to the process.

use crate::config::OperatorConfig;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::api::core::v1 as corev1;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use snafu::{ResultExt, Snafu};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const LEASE_NAME: &str = "minio-operator-lock";
pub const LEASE_DURATION: Duration = Duration::from_secs(60);
pub const RENEW_DEADLINE: Duration = Duration::from_secs(15);
pub const RETRY_PERIOD: Duration = Duration::from_secs(5);

pub const LEADER_LABEL: &str = "operator";
pub const LEADER_LABEL_VALUE: &str = "leader";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("lease API error: {}", source))]
    LeaseApi { source: kube::Error },

    #[snafu(display("malformed lease: {}", source))]
    Malformed { source: serde_json::Error },

    #[snafu(display("leadership lost: lease not renewed within {:?}", deadline))]
    Lost { deadline: Duration },

    #[snafu(display("shut down before acquiring leadership"))]
    Cancelled,
}

/// Holder and timing of a lease, read independently of the API time types.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaseRecord {
    pub holder: Option<String>,
    pub renewed: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub transitions: i32,
}

impl LeaseRecord {
    pub fn from_lease(lease: &Lease) -> Self {
        let spec = lease.spec.clone().unwrap_or_default();
        let renewed = serde_json::to_value(&spec.renew_time)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc));
        Self {
            holder: spec.holder_identity.filter(|h| !h.is_empty()),
            renewed,
            duration: Duration::from_secs(
                spec.lease_duration_seconds
                    .and_then(|s| u64::try_from(s).ok())
                    .unwrap_or(LEASE_DURATION.as_secs()),
            ),
            transitions: spec.lease_transitions.unwrap_or_default(),
        }
    }

    /// Whether `identity` may take or keep the lease at `now`.
    pub fn available_to(&self, identity: &str, now: DateTime<Utc>) -> bool {
        match (&self.holder, self.renewed) {
            (None, _) => true,
            (Some(holder), _) if holder == identity => true,
            (Some(_), None) => true,
            (Some(_), Some(renewed)) => {
                let duration = chrono::Duration::from_std(self.duration).unwrap_or(chrono::Duration::MAX);
                renewed + duration < now
            }
        }
    }
}

fn lease_body(identity: &str, record: &LeaseRecord, now: DateTime<Utc>, taking_over: bool) -> Result<Lease, Error> {
    let now = now.to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    let mut spec = serde_json::json!({
        "holderIdentity": identity,
        "leaseDurationSeconds": LEASE_DURATION.as_secs(),
        "renewTime": now,
        "leaseTransitions": record.transitions + i32::from(taking_over),
    });
    if taking_over {
        spec["acquireTime"] = serde_json::Value::String(now);
    }
    serde_json::from_value(serde_json::json!({
        "apiVersion": "coordination.k8s.io/v1",
        "kind": "Lease",
        "metadata": { "name": LEASE_NAME },
        "spec": spec,
    }))
    .context(MalformedSnafu)
}

pub struct LeaderElector {
    leases: Api<Lease>,
    pods: Api<corev1::Pod>,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, cfg: &OperatorConfig) -> Self {
        Self {
            leases: Api::namespaced(client.clone(), &cfg.namespace),
            pods: Api::namespaced(client, &cfg.namespace),
            identity: cfg.hostname.clone(),
        }
    }

    /// One election round. Returns whether this process holds the lease.
    async fn try_acquire_or_renew(&self) -> Result<bool, Error> {
        let now = Utc::now();
        let Some(current) = self.leases.get_opt(LEASE_NAME).await.context(LeaseApiSnafu)? else {
            let lease = lease_body(&self.identity, &LeaseRecord::default(), now, true)?;
            return match self.leases.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(true),
                Err(kube::Error::Api(status)) if status.code == 409 => Ok(false),
                Err(e) => Err(e).context(LeaseApiSnafu),
            };
        };

        let record = LeaseRecord::from_lease(&current);
        if !record.available_to(&self.identity, now) {
            debug!(holder = ?record.holder, "lease is held by another operator");
            return Ok(false);
        }
        let taking_over = record.holder.as_deref() != Some(self.identity.as_str());
        let mut lease = lease_body(&self.identity, &record, now, taking_over)?;
        if !taking_over && let Some(spec) = lease.spec.as_mut() {
            spec.acquire_time = current.spec.as_ref().and_then(|s| s.acquire_time.clone());
        }
        lease.metadata.resource_version = current.metadata.resource_version.clone();
        match self
            .leases
            .replace(LEASE_NAME, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(status)) if status.code == 409 => Ok(false),
            Err(e) => Err(e).context(LeaseApiSnafu),
        }
    }

    async fn label_self(&self, leader: bool) {
        let value = if leader {
            serde_json::Value::String(LEADER_LABEL_VALUE.to_owned())
        } else {
            serde_json::Value::Null
        };
        let patch = serde_json::json!({ "metadata": { "labels": { LEADER_LABEL: value } } });
        if let Err(e) = self
            .pods
            .patch(&self.identity, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            warn!(pod = %self.identity, error = %e, "unable to update the leader label");
        }
    }

    /// Blocks until this process holds the lease.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Error> {
        self.label_self(false).await;
        info!(identity = %self.identity, lease = LEASE_NAME, "waiting for leadership");
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "leader election round failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(RETRY_PERIOD) => {}
                _ = cancel.cancelled() => return CancelledSnafu.fail(),
            }
        }
        info!(identity = %self.identity, "became leader");
        self.label_self(true).await;
        Ok(())
    }

    /// Keeps renewing the lease. Returns `Lost` once a renewal deadline is
    /// missed, or `Ok` on shutdown.
    pub async fn hold(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let mut last_renewal = tokio::time::Instant::now();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(RETRY_PERIOD) => {}
                _ = cancel.cancelled() => return Ok(()),
            }
            let round = tokio::time::timeout(RENEW_DEADLINE, self.try_acquire_or_renew()).await;
            match round {
                Ok(Ok(true)) => last_renewal = tokio::time::Instant::now(),
                Ok(Ok(false)) => {
                    warn!(identity = %self.identity, "lease was taken by another operator");
                    return LostSnafu {
                        deadline: RENEW_DEADLINE,
                    }
                    .fail();
                }
                Ok(Err(e)) => warn!(error = %e, "lease renewal failed"),
                Err(_) => warn!("lease renewal timed out"),
            }
            if last_renewal.elapsed() > RENEW_DEADLINE {
                return LostSnafu {
                    deadline: RENEW_DEADLINE,
                }
                .fail();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn lease(holder: &str, renew: &str) -> Lease {
        serde_json::from_value(serde_json::json!({
            "metadata": {"name": LEASE_NAME},
            "spec": {
                "holderIdentity": holder,
                "leaseDurationSeconds": 60,
                "renewTime": renew,
                "leaseTransitions": 3
            }
        }))
        .unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_lease_record() {
        let record = LeaseRecord::from_lease(&lease("operator-a", "2024-01-01T00:00:00.000000Z"));
        assert_eq!(record.holder.as_deref(), Some("operator-a"));
        assert_eq!(record.renewed, Some(at("2024-01-01T00:00:00Z")));
        assert_eq!(record.duration, LEASE_DURATION);
        assert_eq!(record.transitions, 3);
    }

    #[test]
    fn test_availability() {
        let record = LeaseRecord::from_lease(&lease("operator-a", "2024-01-01T00:00:00.000000Z"));
        let fresh = at("2024-01-01T00:00:30Z");
        let expired = at("2024-01-01T00:01:01Z");

        assert!(record.available_to("operator-a", fresh));
        assert!(!record.available_to("operator-b", fresh));
        assert!(record.available_to("operator-b", expired));
        assert!(LeaseRecord::default().available_to("operator-b", fresh));
    }

    #[test]
    fn test_lease_body() {
        let record = LeaseRecord::from_lease(&lease("operator-a", "2024-01-01T00:00:00.000000Z"));
        let now = at("2024-01-01T00:02:00Z");

        let taken = LeaseRecord::from_lease(&lease_body("operator-b", &record, now, true).unwrap());
        assert_eq!(taken.holder.as_deref(), Some("operator-b"));
        assert_eq!(taken.transitions, 4);
        assert_eq!(taken.renewed, Some(now));

        let renewed = LeaseRecord::from_lease(&lease_body("operator-a", &record, now, false).unwrap());
        assert_eq!(renewed.transitions, 3);
    }
}
