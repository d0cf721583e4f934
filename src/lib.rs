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

use crate::admin::{AdminConnector, HttpAdminConnector};
use crate::config::OperatorConfig;
use crate::context::Context;
use crate::leader::LeaderElector;
use crate::server::AppState;
use crate::server::cert_manager::CertManager;
use crate::server::directory::KubeDirectory;
use crate::types::policy_binding::PolicyBinding;
use crate::types::v2::TENANT_LABEL;
use crate::types::v2::tenant::Tenant;
use futures::StreamExt;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::controller::{self, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub mod admin;
pub mod artifacts;
pub mod certs;
pub mod config;
mod context;
pub mod error_policy;
pub mod health;
pub mod leader;
pub mod reconcile;
pub mod server;
pub mod types;
pub mod utils;


shadow_rs::shadow!(build);

/// `<version> (<commit> <build time>)`, printed by `--version`.
pub const VERSION: &str = const_str::concat!(
    build::PKG_VERSION,
    " (",
    build::SHORT_COMMIT,
    " ",
    build::BUILD_TIME,
    ")"
);

/// Tenants reconciled in parallel.
pub const RECONCILE_CONCURRENCY: u16 = 2;

const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// How the operator reaches the cluster.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub kubeconfig: Option<PathBuf>,
    pub master: Option<String>,
    pub hosts_template: Option<String>,
}

async fn client(opts: &RunOptions) -> Result<Client, Box<dyn std::error::Error>> {
    let mut config = match &opts.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => kube::Config::infer().await?,
    };
    if let Some(master) = &opts.master {
        config.cluster_url = master.parse()?;
    }
    Ok(Client::try_from(config)?)
}

/// Cancels `cancel` on the first SIGINT or SIGTERM and exits on the second.
fn handle_signals(cancel: CancellationToken) -> Result<(), std::io::Error> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => {}
            _ = interrupt.recv() => {}
        }
        info!("shutdown requested");
        cancel.cancel();
        tokio::select! {
            _ = terminate.recv() => {}
            _ = interrupt.recv() => {}
        }
        warn!("second signal received, exiting");
        std::process::exit(1);
    });
    Ok(())
}

pub async fn run(opts: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();
    info!(version = VERSION, "starting operator");

    let cancel = CancellationToken::new();
    handle_signals(cancel.clone())?;

    let config = Arc::new(OperatorConfig::from_env(opts.hosts_template.clone()));
    let client = client(&opts).await?;

    let elector = LeaderElector::new(client.clone(), &config);
    elector.acquire(&cancel).await?;
    let leadership = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = elector.hold(&leadership).await {
            error!(error = %e, "stopped leading");
            std::process::exit(1);
        }
    });

    let csr: Arc<dyn certs::CsrApi> = Arc::from(certs::probe_csr_api(&client, &config).await);

    let operator_certs = if config.tls_enabled {
        let tls = reconcile::certificate::ensure_operator_tls(&client, csr.as_ref(), &config, &cancel).await?;
        if config.cert_password.is_some() && utils::tls::is_encrypted_pem(&tls.private_key_pem) {
            return Err("encrypted operator private keys are not supported".into());
        }
        Some(Arc::new(CertManager::new(&tls.certificate_pem, &tls.private_key_pem)?))
    } else {
        None
    };

    let roots: Vec<Vec<u8>> = tokio::fs::read(SERVICE_ACCOUNT_CA).await.into_iter().collect();
    let http = admin::http_client(&roots)?;
    let admin: Arc<dyn AdminConnector> = Arc::new(HttpAdminConnector::new(http.clone()));

    let context = Arc::new(Context::new(
        client.clone(),
        config.clone(),
        admin.clone(),
        csr,
        http,
        cancel.clone(),
        operator_certs.clone(),
    ));

    let tenants = Api::<Tenant>::all(client.clone());
    let reconciler = Controller::new(tenants.clone(), watcher::Config::default())
        .owns(
            Api::<appsv1::StatefulSet>::all(client.clone()),
            watcher::Config::default(),
        )
        .owns(
            Api::<appsv1::Deployment>::all(client.clone()),
            watcher::Config::default(),
        )
        .owns(
            Api::<corev1::Service>::all(client.clone()),
            watcher::Config::default(),
        )
        .owns(
            Api::<corev1::Secret>::all(client.clone()),
            watcher::Config::default(),
        )
        .with_config(controller::Config::default().concurrency(RECONCILE_CONCURRENCY))
        .graceful_shutdown_on(cancel.clone().cancelled_owned())
        .run(reconcile::reconcile_tenant, error_policy::error_policy, context.clone())
        .for_each(|res| async move {
            match res {
                Ok((tenant, _)) => info!(tenant = %tenant.name, "reconciled"),
                Err(e) => warn!(error = %e, "reconcile failed"),
            }
        });

    let monitor = Controller::new(tenants, watcher::Config::default())
        .watches(
            Api::<corev1::Pod>::all(client.clone()),
            watcher::Config::default().labels(TENANT_LABEL),
            |pod: corev1::Pod| {
                let tenant = pod.labels().get(TENANT_LABEL)?.clone();
                Some(ObjectRef::<Tenant>::new(&tenant).within(&pod.namespace()?))
            },
        )
        .graceful_shutdown_on(cancel.clone().cancelled_owned())
        .run(health::check_tenant, health::error_policy, context)
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!(error = %e, "health check failed");
            }
        });

    let state = AppState {
        directory: Arc::new(KubeDirectory::new(client)),
        config,
        admin,
    };
    let webhook = server::run(state, operator_certs, cancel.clone());

    let (_, _, served) = tokio::join!(reconciler, monitor, webhook);
    served?;
    info!("operator stopped");
    Ok(())
}

pub async fn crd(file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if let Some(file) = file {
        Box::pin(
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(file)
                .await?,
        )
    } else {
        Box::pin(tokio::io::stdout())
    };

    let documents = [
        serde_yaml_ng::to_string(&Tenant::crd())?,
        serde_yaml_ng::to_string(&PolicyBinding::crd())?,
    ];
    writer.write_all(documents.join("---\n").as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}
