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

use super::{CertsSnafu, Error, WaitingSnafu};
use crate::certs::{self, CertificateRequest, CsrApi};
use crate::config::OperatorConfig;
use crate::context::{Context, KubeSnafu};
use crate::types::v2::certificate::{LocalCertificateReference, secret_bytes, secret_keys, secret_keys_for};
use crate::types::v2::status::certificate::{CustomCertificateConfig, CustomCertificates};
use crate::types::v2::status::state::State;
use crate::types::v2::tenant::Tenant;
use crate::types::v2::tenant::secrets::{TLS_CERT_KEY, TLS_KEY_KEY};
use crate::types::v2::{OPERATOR_CA_SECRET, OPERATOR_TLS_SECRET};
use chrono::{DateTime, Utc};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::Api;
use kube::api::{DeleteParams, PostParams};
use kube::runtime::events::EventType;
use snafu::ResultExt;
use snafu::futures::TryFutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
const NODE_PREFIX: &str = "system:node:";
const NODES_ORG: &str = "system:nodes";

/// True when the secret holds no parsable leaf or the leaf expires within the
/// rotation window.
pub fn needs_renewal(secret: &corev1::Secret, now: DateTime<Utc>) -> bool {
    let keys = secret_keys_for(secret);
    match secret_bytes(secret, keys.cert) {
        Some(pem) => certs::needs_rotation(pem, now).unwrap_or(true),
        None => true,
    }
}

/// A certificate the controller issues into a tenant secret.
pub(crate) struct TlsTarget {
    pub secret_name: String,
    pub request: CertificateRequest,
    pub waiting: State,
    pub label: &'static str,
}

fn common_name(tenant: &Tenant, domain: &str) -> String {
    let cn = tenant
        .spec
        .cert_config
        .as_ref()
        .and_then(|c| c.common_name.clone())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| tenant.wildcard_name(domain));
    format!("{NODE_PREFIX}{cn}")
}

fn organization(tenant: &Tenant) -> Vec<String> {
    tenant
        .spec
        .cert_config
        .as_ref()
        .map(|c| c.organization_name.clone())
        .filter(|o| !o.is_empty())
        .unwrap_or_else(|| vec![NODES_ORG.to_owned()])
}

/// SANs of the tenant's server and client certificates.
pub fn tenant_hosts(tenant: &Tenant, cfg: &OperatorConfig) -> Result<Vec<String>, Error> {
    let mut hosts = tenant.certificate_hosts(cfg.hosts_template.as_deref(), &cfg.cluster_domain)?;
    if let Some(extra) = tenant.spec.cert_config.as_ref().map(|c| &c.dns_names) {
        for host in extra {
            if !hosts.contains(host) {
                hosts.push(host.clone());
            }
        }
    }
    Ok(hosts)
}

fn server_target(tenant: &Tenant, cfg: &OperatorConfig) -> Result<TlsTarget, Error> {
    Ok(TlsTarget {
        secret_name: tenant.tls_secret_name(),
        request: CertificateRequest {
            csr_name: tenant.csr_name()?,
            common_name: common_name(tenant, &cfg.cluster_domain),
            organization: organization(tenant),
            hosts: tenant_hosts(tenant, cfg)?,
            usages: certs::SERVER_USAGES,
        },
        waiting: State::WaitingForTls,
        label: "MinIO",
    })
}

fn client_target(tenant: &Tenant, cfg: &OperatorConfig) -> Result<TlsTarget, Error> {
    Ok(TlsTarget {
        secret_name: tenant.client_tls_secret_name(),
        request: CertificateRequest {
            csr_name: tenant.client_csr_name()?,
            common_name: common_name(tenant, &cfg.cluster_domain),
            organization: organization(tenant),
            hosts: tenant_hosts(tenant, cfg)?,
            usages: certs::CLIENT_USAGES,
        },
        waiting: State::WaitingForClientTls,
        label: "MinIO client",
    })
}

pub(crate) fn kes_target(tenant: &Tenant, cfg: &OperatorConfig) -> Result<TlsTarget, Error> {
    let hosts = tenant.kes_hosts(&cfg.cluster_domain);
    Ok(TlsTarget {
        secret_name: tenant.kes_tls_secret_name(),
        request: CertificateRequest {
            csr_name: tenant.kes_csr_name()?,
            common_name: format!("{NODE_PREFIX}*.{}", tenant.kes_service_host(&cfg.cluster_domain)),
            organization: organization(tenant),
            hosts,
            usages: certs::SERVER_USAGES,
        },
        waiting: State::WaitingForKesTls,
        label: "KES",
    })
}

/// Makes sure `target.secret_name` holds a certificate that is not about to
/// expire, issuing a new one through a CSR otherwise.
pub(crate) async fn ensure_tls_secret(ctx: &Context, tenant: Tenant, target: TlsTarget) -> Result<Tenant, Error> {
    let ns = tenant.namespace()?;
    let csr_name = &target.request.csr_name;

    if let Some(secret) = ctx.get_opt::<corev1::Secret>(&target.secret_name, &ns).await? {
        if !needs_renewal(&secret, Utc::now()) {
            return Ok(tenant);
        }
        info!(tenant = %tenant.name(), secret = %target.secret_name, "certificate expires soon, rotating");
        ctx.delete_if_exists::<corev1::Secret>(&target.secret_name, &ns)
            .await?;
        ctx.record(
            &tenant,
            EventType::Normal,
            "CertificateRotation",
            &format!("{} certificate is being rotated", target.label),
        )
        .await?;
    }

    // a CSR without a secret holding its key cannot be used
    ctx.csr.delete(csr_name).await.context(CertsSnafu)?;

    let tenant = ctx
        .set_current_state(&tenant, &target.waiting.to_string())
        .await?;
    ctx.record(
        &tenant,
        EventType::Normal,
        "CSRCreated",
        &format!("{} CSR created", target.label),
    )
    .await?;

    let issued = match certs::request_certificate(ctx.csr.as_ref(), &target.request, &ctx.cancel).await {
        Ok(issued) => issued,
        Err(source) => {
            warn!(tenant = %tenant.name(), csr = %csr_name, error = %source, "certificate request failed");
            ctx.set_current_state(&tenant, &State::FailedCsr.to_string())
                .await?;
            ctx.record(&tenant, EventType::Warning, "CSRFailed", &source.to_string())
                .await?;
            return Err(Error::Certs { source });
        }
    };

    let secret = tenant.new_tls_secret(
        target.secret_name.clone(),
        issued.private_key_pem.as_bytes(),
        &issued.certificate_pem,
    );
    ctx.create(&secret, &ns).await?;
    ctx.record(
        &tenant,
        EventType::Normal,
        "CertificateIssued",
        &format!("{} certificate stored in {}", target.label, target.secret_name),
    )
    .await?;
    Ok(tenant)
}

/// Records whether the tenant uses auto-cert. Tenants created before the
/// field existed and with no explicit toggle use auto-cert iff their CSR exists.
pub async fn infer_auto_cert(ctx: &Context, mut tenant: Tenant) -> Result<Tenant, Error> {
    if let Some(enabled) = tenant.status_or_default().certificates.auto_cert_enabled {
        if tenant.spec.request_auto_cert.is_none() {
            tenant.spec.request_auto_cert = Some(enabled);
        }
        return Ok(tenant);
    }

    let enabled = match tenant.spec.request_auto_cert {
        None if tenant.status_or_default().any_pool_initialized() => ctx
            .csr
            .state(&tenant.csr_name()?)
            .await
            .context(CertsSnafu)?
            .is_some(),
        _ => tenant.auto_cert(),
    };
    if tenant.spec.request_auto_cert.is_none() {
        tenant.spec.request_auto_cert = Some(enabled);
    }

    Ok(ctx
        .update_status(&tenant, |status| status.certificates.auto_cert_enabled = Some(enabled))
        .await?)
}

async fn operator_ca(ctx: &Context) -> Result<Option<Vec<u8>>, Error> {
    if let Some(secret) = ctx
        .get_opt::<corev1::Secret>(OPERATOR_CA_SECRET, &ctx.config.namespace)
        .await?
    {
        let keys = secret_keys_for(&secret);
        if let Some(ca) = secret_bytes(&secret, keys.ca).or_else(|| secret_bytes(&secret, keys.cert)) {
            return Ok(Some(ca.to_vec()));
        }
    }
    Ok(tokio::fs::read(SERVICE_ACCOUNT_CA).await.ok())
}

/// Copies the operator CA into the tenant namespace. Any write asks for a
/// re-entry so the pods see the new bundle before they are rolled.
async fn sync_operator_ca(ctx: &Context, tenant: &Tenant) -> Result<(), Error> {
    let ns = tenant.namespace()?;
    let Some(ca) = operator_ca(ctx).await? else {
        warn!(tenant = %tenant.name(), "operator CA is not available, skipping propagation");
        return Ok(());
    };
    let desired = tenant.new_operator_ca_secret(&ca);

    match ctx.get_opt::<corev1::Secret>(OPERATOR_CA_SECRET, &ns).await? {
        Some(existing) if secret_bytes(&existing, TLS_CERT_KEY) == Some(ca.as_slice()) => return Ok(()),
        Some(mut existing) => {
            existing.data = desired.data;
            ctx.replace(&existing, &ns).await?;
            info!(tenant = %tenant.name(), "operator CA copy updated");
        }
        None => {
            ctx.create(&desired, &ns).await?;
            info!(tenant = %tenant.name(), "operator CA copied into tenant namespace");
        }
    }
    WaitingSnafu {
        what: "operator CA propagation",
    }
    .fail()
}

/// Key pair served by the operator's HTTPS endpoints.
pub struct OperatorTls {
    pub certificate_pem: Vec<u8>,
    pub private_key_pem: Vec<u8>,
    /// Set when a new certificate was issued during this call.
    pub issued: bool,
}

/// Returns the operator's key pair from `operator-tls`, issuing or rotating it
/// through a CSR when missing or close to expiry.
pub async fn ensure_operator_tls(
    client: &kube::Client,
    csr: &dyn CsrApi,
    cfg: &OperatorConfig,
    cancel: &CancellationToken,
) -> Result<OperatorTls, Error> {
    let api: Api<corev1::Secret> = Api::namespaced(client.clone(), &cfg.namespace);
    let csr_name = format!("operator-{}-csr", cfg.namespace);

    if let Some(secret) = api.get_opt(OPERATOR_TLS_SECRET).context(KubeSnafu).await? {
        let keys = secret_keys_for(&secret);
        if let (Some(cert), Some(key)) = (secret_bytes(&secret, keys.cert), secret_bytes(&secret, keys.key))
            && !needs_renewal(&secret, Utc::now())
        {
            return Ok(OperatorTls {
                certificate_pem: cert.to_vec(),
                private_key_pem: key.to_vec(),
                issued: false,
            });
        }
        info!(secret = OPERATOR_TLS_SECRET, "operator certificate expires soon, rotating");
        match api.delete(OPERATOR_TLS_SECRET, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(status)) if status.code == 404 => {}
            Err(source) => return Err(crate::context::Error::Kube { source }.into()),
        }
    }
    csr.delete(&csr_name).await.context(CertsSnafu)?;

    let request = CertificateRequest {
        csr_name,
        common_name: format!("{NODE_PREFIX}{}", cfg.operator_fqdn()),
        organization: vec![NODES_ORG.to_owned()],
        hosts: cfg.operator_hosts(),
        usages: certs::SERVER_USAGES,
    };
    let issued = certs::request_certificate(csr, &request, cancel)
        .await
        .context(CertsSnafu)?;

    let secret = corev1::Secret {
        metadata: metav1::ObjectMeta {
            name: Some(OPERATOR_TLS_SECRET.to_owned()),
            namespace: Some(cfg.namespace.clone()),
            ..Default::default()
        },
        type_: Some("Opaque".to_owned()),
        data: Some(
            [
                (TLS_CERT_KEY.to_owned(), ByteString(issued.certificate_pem.clone())),
                (
                    TLS_KEY_KEY.to_owned(),
                    ByteString(issued.private_key_pem.clone().into_bytes()),
                ),
            ]
            .into_iter()
            .collect(),
        ),
        ..Default::default()
    };
    api.create(&PostParams::default(), &secret)
        .context(KubeSnafu)
        .await?;
    info!(secret = OPERATOR_TLS_SECRET, "operator certificate issued");

    Ok(OperatorTls {
        certificate_pem: issued.certificate_pem,
        private_key_pem: issued.private_key_pem.into_bytes(),
        issued: true,
    })
}

async fn rotate_operator_tls(ctx: &Context) -> Result<(), Error> {
    let tls = ensure_operator_tls(&ctx.client, ctx.csr.as_ref(), &ctx.config, &ctx.cancel).await?;
    if !tls.issued {
        return Ok(());
    }
    if let Some(manager) = &ctx.operator_certs
        && let Err(e) = manager.reload(&tls.certificate_pem, &tls.private_key_pem)
    {
        warn!(error = %e, "failed to load the rotated operator certificate");
    }
    Ok(())
}

async fn inventory_entry(
    ctx: &Context,
    namespace: &str,
    reference: &LocalCertificateReference,
    ca: bool,
    now: DateTime<Utc>,
) -> Result<Option<CustomCertificateConfig>, Error> {
    let Some(secret) = ctx.get_opt::<corev1::Secret>(&reference.name, namespace).await? else {
        warn!(secret = %reference.name, "certificate secret not found");
        return Ok(None);
    };
    let keys = secret_keys(reference.type_.as_deref().or(secret.type_.as_deref()));
    let key = if ca { keys.ca } else { keys.cert };
    let Some(pem) = secret_bytes(&secret, key) else {
        warn!(secret = %reference.name, key, "certificate secret has no certificate");
        return Ok(None);
    };
    match certs::custom_certificate_config(&reference.name, pem, now) {
        Ok(entry) => Ok(Some(entry)),
        Err(e) => {
            warn!(secret = %reference.name, error = %e, "unable to parse certificate");
            Ok(None)
        }
    }
}

/// Describes every externally supplied certificate in status.
async fn custom_certificates(ctx: &Context, tenant: Tenant) -> Result<Tenant, Error> {
    let ns = tenant.namespace()?;
    let now = Utc::now();
    let mut inventory = CustomCertificates::default();

    for reference in &tenant.spec.external_cert_secret {
        inventory
            .minio
            .extend(inventory_entry(ctx, &ns, reference, false, now).await?);
    }
    for reference in &tenant.spec.external_ca_cert_secret {
        inventory
            .minio_cas
            .extend(inventory_entry(ctx, &ns, reference, true, now).await?);
    }
    if let Some(reference) = &tenant.spec.external_client_cert_secret {
        inventory
            .client
            .extend(inventory_entry(ctx, &ns, reference, false, now).await?);
    }

    let empty = inventory == CustomCertificates::default();
    Ok(ctx
        .update_status(&tenant, |status| {
            status.certificates.custom_certificates = (!empty).then(|| inventory.clone());
        })
        .await?)
}

/// Operator CA copy, operator certificate rotation, tenant server and client
/// certificates, then the custom certificate inventory.
pub async fn reconcile(ctx: &Context, tenant: Tenant) -> Result<Tenant, Error> {
    if ctx.config.tls_enabled {
        sync_operator_ca(ctx, &tenant).await?;
        rotate_operator_tls(ctx).await?;
    }

    let mut tenant = tenant;
    if tenant.auto_cert() {
        let target = server_target(&tenant, &ctx.config)?;
        tenant = ensure_tls_secret(ctx, tenant, target).await?;

        if tenant.has_kes() && tenant.spec.external_client_cert_secret.is_none() {
            let target = client_target(&tenant, &ctx.config)?;
            tenant = ensure_tls_secret(ctx, tenant, target).await?;
        }
    }

    custom_certificates(ctx, tenant).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair, PKCS_ECDSA_P256_SHA256};

    fn secret_with_cert(valid_for: time::Duration) -> corev1::Secret {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = CertificateParams::new(vec!["minio.t1.svc.cluster.local".to_owned()]).unwrap();
        params.not_before = time::OffsetDateTime::now_utc() - time::Duration::hours(1);
        params.not_after = time::OffsetDateTime::now_utc() + valid_for;
        let cert = params.self_signed(&key).unwrap();
        crate::tests::create_test_tenant().new_tls_secret(
            "acme-tls".to_owned(),
            key.serialize_pem().as_bytes(),
            cert.pem().as_bytes(),
        )
    }

    #[test]
    fn test_needs_renewal() {
        let now = Utc::now();
        assert!(!needs_renewal(&secret_with_cert(time::Duration::days(90)), now));
        assert!(needs_renewal(&secret_with_cert(time::Duration::hours(24)), now));

        let mut broken = secret_with_cert(time::Duration::days(90));
        broken.data.as_mut().unwrap().remove(TLS_CERT_KEY);
        assert!(needs_renewal(&broken, now));
    }

    #[test]
    fn test_server_target() {
        let mut tenant = crate::tests::create_test_tenant();
        let cfg = OperatorConfig::default();
        tenant.ensure_defaults(&cfg);

        let target = server_target(&tenant, &cfg).unwrap();
        assert_eq!(target.secret_name, "acme-tls");
        assert_eq!(target.request.csr_name, "acme-t1-csr");
        assert_eq!(
            target.request.common_name,
            "system:node:*.acme-hl.t1.svc.cluster.local"
        );
        assert_eq!(target.request.organization, vec!["system:nodes".to_owned()]);
        assert!(
            target
                .request
                .hosts
                .contains(&"minio.t1.svc.cluster.local".to_owned())
        );
        assert_eq!(target.request.usages, certs::SERVER_USAGES);
    }

    #[test]
    fn test_client_and_kes_targets() {
        let tenant = crate::tests::create_test_tenant();
        let cfg = OperatorConfig::default();

        let client = client_target(&tenant, &cfg).unwrap();
        assert_eq!(client.request.csr_name, "acme-client-t1-csr");
        assert_eq!(client.request.usages, certs::CLIENT_USAGES);

        let kes = kes_target(&tenant, &cfg).unwrap();
        assert_eq!(kes.secret_name, "acme-kes-tls");
        assert_eq!(kes.request.csr_name, "acme-kes-t1-csr");
        assert!(
            kes.request
                .hosts
                .contains(&"acme-kes-hl-svc.t1.svc.cluster.local".to_owned())
        );
    }
}
