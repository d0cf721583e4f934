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

use super::{CertsSnafu, Error, NotOwnedSnafu, WaitingSnafu, certificate};
use crate::certs;
use crate::context::Context;
use crate::types::v2::certificate::{SecretKeys, secret_bytes, secret_keys};
use crate::types::v2::status::state::State;
use crate::types::v2::tenant::Tenant;
use crate::types::v2::tenant::diff::{merge_statefulset, statefulset_matches};
use k8s_openapi::api::apps::v1;
use k8s_openapi::api::batch::v1 as batchv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::events::EventType;
use snafu::ResultExt;
use tracing::info;

/// Secret holding the certificate MinIO presents to KES.
pub fn client_cert_source(tenant: &Tenant) -> (String, SecretKeys) {
    match &tenant.spec.external_client_cert_secret {
        Some(cert) => (cert.name.clone(), secret_keys(cert.type_.as_deref())),
        None => (tenant.client_tls_secret_name(), secret_keys(None)),
    }
}

/// KES identity of the tenant's client certificate.
async fn client_identity(ctx: &Context, tenant: &Tenant) -> Result<String, Error> {
    let (name, keys) = client_cert_source(tenant);
    let secret = ctx
        .get_opt::<corev1::Secret>(&name, &tenant.namespace()?)
        .await?;
    let Some(pem) = secret.as_ref().and_then(|s| secret_bytes(s, keys.cert)) else {
        return WaitingSnafu {
            what: format!("KES client certificate in {name}"),
        }
        .fail();
    };
    certs::spki_identity(pem).context(CertsSnafu)
}

async fn check_or_create_headless_service(ctx: &Context, tenant: Tenant) -> Result<Tenant, Error> {
    let ns = tenant.namespace()?;
    match ctx
        .get::<corev1::Service>(&tenant.kes_headless_service_name(), &ns)
        .await
    {
        Ok(_) => Ok(tenant),
        Err(e) if e.is_not_found() => {
            ctx.create(&tenant.new_kes_headless_service(), &ns).await?;
            ctx.record(
                &tenant,
                EventType::Normal,
                "SvcCreated",
                "KES Headless Service Created",
            )
            .await?;
            Ok(tenant)
        }
        Err(e) => Err(e.into()),
    }
}

async fn check_or_create_statefulset(ctx: &Context, tenant: Tenant, identity: &str) -> Result<Tenant, Error> {
    let ns = tenant.namespace()?;
    let name = tenant.kes_statefulset_name();
    let desired = tenant.new_kes_statefulset(identity)?;

    let mut observed = match ctx.get::<v1::StatefulSet>(&name, &ns).await {
        Ok(ss) => ss,
        Err(e) if e.is_not_found() => {
            let tenant = ctx
                .set_current_state(&tenant, &State::ProvisioningKesStatefulSet.to_string())
                .await?;
            ctx.create(&desired, &ns).await?;
            ctx.record(&tenant, EventType::Normal, "StsCreated", "KES Statefulset Created")
                .await?;
            return Ok(tenant);
        }
        e => e?,
    };

    if !tenant.owns(&observed.metadata) {
        ctx.set_current_state(&tenant, &State::NotOwned.to_string())
            .await?;
        return NotOwnedSnafu {
            kind: "StatefulSet",
            name,
        }
        .fail();
    }

    if statefulset_matches(&desired, &observed)? {
        return Ok(tenant);
    }

    let tenant = ctx
        .set_current_state(&tenant, &State::UpdatingKes.to_string())
        .await?;
    merge_statefulset(&mut observed, &desired);
    ctx.replace(&observed, &ns).await?;
    info!(tenant = %tenant.name(), statefulset = %name, "KES statefulset updated");
    ctx.record(&tenant, EventType::Normal, "StsUpdated", "KES Statefulset Updated")
        .await?;
    Ok(tenant)
}

async fn check_or_create_key_job(ctx: &Context, tenant: &Tenant) -> Result<(), Error> {
    let ns = tenant.namespace()?;
    if ctx
        .get_opt::<batchv1::Job>(&tenant.kes_job_name(), &ns)
        .await?
        .is_some()
    {
        return Ok(());
    }
    ctx.create(&tenant.new_kes_job(&ctx.config.cluster_domain)?, &ns)
        .await?;
    ctx.record(
        tenant,
        EventType::Normal,
        "JobCreated",
        &format!("KES key {} job created", tenant.kes_key_name()),
    )
    .await?;
    Ok(())
}

/// KES certificate, headless service, statefulset and key creation job.
pub async fn reconcile(ctx: &Context, tenant: Tenant) -> Result<Tenant, Error> {
    let Some(kes) = tenant.spec.kes.as_ref() else {
        return Ok(tenant);
    };

    let mut tenant = if kes.external_cert_secret.is_none() {
        let target = certificate::kes_target(&tenant, &ctx.config)?;
        certificate::ensure_tls_secret(ctx, tenant, target).await?
    } else {
        tenant
    };

    let identity = client_identity(ctx, &tenant).await?;
    tenant = check_or_create_headless_service(ctx, tenant).await?;
    tenant = check_or_create_statefulset(ctx, tenant, &identity).await?;
    check_or_create_key_job(ctx, &tenant).await?;
    Ok(tenant)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::v2::certificate::LocalCertificateReference;

    #[test]
    fn test_client_cert_source() {
        let mut tenant = crate::tests::create_test_tenant();
        let (name, keys) = client_cert_source(&tenant);
        assert_eq!(name, "acme-client-tls");
        assert_eq!(keys.cert, "public.crt");

        tenant.spec.external_client_cert_secret = Some(LocalCertificateReference {
            name: "my-client".to_owned(),
            type_: Some("kubernetes.io/tls".to_owned()),
        });
        let (name, keys) = client_cert_source(&tenant);
        assert_eq!(name, "my-client");
        assert_eq!(keys.cert, "tls.crt");
    }
}
