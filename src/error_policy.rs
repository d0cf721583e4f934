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

use crate::context::Context;
use crate::reconcile::Error;
use crate::types::v2::tenant::Tenant;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const BASE_DELAY: Duration = Duration::from_secs(5);
/// Requeue after a progress marker. Not subject to the per-key backoff.
const SENTINEL_DELAY: Duration = Duration::from_secs(5);
const MAX_DELAY: Duration = Duration::from_secs(60);
const QPS: f64 = 10.0;
const BURST: f64 = 100.0;

/// Requeue delays for failed keys: the larger of a per-key exponential
/// backoff and a token bucket shared by all keys.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

struct LimiterState {
    failures: HashMap<String, u32>,
    tokens: f64,
    last: Instant,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            state: Mutex::new(LimiterState {
                failures: HashMap::new(),
                tokens: BURST,
                last: Instant::now(),
            }),
        }
    }
}

fn backoff(failures: u32) -> Duration {
    let factor = 2u32.saturating_pow(failures.min(16));
    BASE_DELAY.saturating_mul(factor).min(MAX_DELAY)
}

impl RateLimiter {
    /// Delay before `key` is retried. Each call counts as one more failure.
    pub fn next_delay(&self, key: &str) -> Duration {
        self.next_delay_at(key, Instant::now())
    }

    /// Delay before `key` is looked at again after it reported progress. The
    /// failure count of `key` is left alone.
    pub fn progress_delay(&self, key: &str) -> Duration {
        self.delay_at(key, Instant::now(), false)
    }

    fn next_delay_at(&self, key: &str, now: Instant) -> Duration {
        self.delay_at(key, now, true)
    }

    fn delay_at(&self, key: &str, now: Instant, failed: bool) -> Duration {
        let Ok(mut state) = self.state.lock() else {
            return MAX_DELAY;
        };

        let per_key = if failed {
            let failures = state.failures.entry(key.to_owned()).or_insert(0);
            let delay = backoff(*failures);
            *failures = failures.saturating_add(1);
            delay
        } else {
            SENTINEL_DELAY
        };

        let elapsed = now.saturating_duration_since(state.last).as_secs_f64();
        state.last = now;
        state.tokens = (state.tokens + elapsed * QPS).min(BURST) - 1.0;
        let bucket = if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / QPS)
        };

        per_key.max(bucket)
    }

    /// Resets the backoff of `key` after a successful reconcile, or once the
    /// tenant is gone.
    pub fn forget(&self, key: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.remove(key);
        }
    }
}

pub fn tenant_key(tenant: &Tenant) -> String {
    format!("{}/{}", tenant.namespace().unwrap_or_default(), tenant.name_any())
}

pub fn error_policy(tenant: Arc<Tenant>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = tenant_key(&tenant);

    if error.is_sentinel() {
        let delay = ctx.limiter.progress_delay(&key);
        debug!(tenant = %key, reason = %error, ?delay, "tenant not ready, requeueing");
        return Action::requeue(delay);
    }
    let delay = ctx.limiter.next_delay(&key);
    warn!(tenant = %key, error = %error, ?delay, "reconcile failed");
    Action::requeue(delay)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_per_key_backoff() {
        let limiter = RateLimiter::default();
        let now = Instant::now();
        let delays: Vec<u64> = (0..6)
            .map(|_| limiter.next_delay_at("t1/acme", now).as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);

        assert_eq!(limiter.next_delay_at("t2/other", now).as_secs(), 5);

        limiter.forget("t1/acme");
        assert_eq!(limiter.next_delay_at("t1/acme", now).as_secs(), 5);
    }

    #[test]
    fn test_progress_does_not_grow_backoff() {
        let limiter = RateLimiter::default();
        let now = Instant::now();
        assert_eq!(limiter.next_delay_at("t1/acme", now).as_secs(), 5);
        assert_eq!(limiter.next_delay_at("t1/acme", now).as_secs(), 10);
        for _ in 0..5 {
            assert_eq!(limiter.delay_at("t1/acme", now, false), SENTINEL_DELAY);
        }
        assert_eq!(limiter.next_delay_at("t1/acme", now).as_secs(), 20);
    }

    #[test]
    fn test_forget_prunes_the_key() {
        let limiter = RateLimiter::default();
        limiter.next_delay("t1/acme");
        limiter.next_delay("t1/other");
        limiter.forget("t1/acme");
        let state = limiter.state.lock().unwrap();
        assert!(!state.failures.contains_key("t1/acme"));
        assert!(state.failures.contains_key("t1/other"));
    }

    #[tokio::test]
    async fn test_sentinels_requeue_without_backoff() {
        let api = crate::tests::FakeApiServer::default();
        let ctx = Arc::new(crate::tests::test_context(&api, crate::tests::MockAdmin::default()));
        let tenant = Arc::new(crate::tests::create_test_tenant());

        for _ in 0..4 {
            let action = error_policy(tenant.clone(), &Error::MinIORestarting, ctx.clone());
            assert_eq!(action, Action::requeue(SENTINEL_DELAY));
        }
        let action = error_policy(tenant.clone(), &Error::InconsistentVersions, ctx.clone());
        assert_eq!(action, Action::requeue(BASE_DELAY));
        let action = error_policy(tenant, &Error::InconsistentVersions, ctx);
        assert_eq!(action, Action::requeue(BASE_DELAY * 2));
    }

    #[test]
    fn test_token_bucket_kicks_in_after_burst() {
        let limiter = RateLimiter::default();
        let now = Instant::now();
        for i in 0..100 {
            let key = format!("ns/t{i}");
            assert_eq!(limiter.next_delay_at(&key, now), BASE_DELAY);
        }
        // the bucket is empty, 10 qps means each extra key waits longer
        let delay = limiter.next_delay_at("ns/extra", now);
        assert_eq!(delay, BASE_DELAY);
        for i in 0..100 {
            limiter.next_delay_at(&format!("ns/more{i}"), now);
        }
        assert!(limiter.next_delay_at("ns/last", now) > BASE_DELAY);
    }
}
