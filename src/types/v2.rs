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

//! `minio.min.io/v2` Tenant and everything derived from it.

pub mod certificate;
pub mod configuration;
pub mod k8s;
pub mod kes;
pub mod observability;
pub mod pool;
pub mod status;
pub mod tenant;

pub const TENANT_LABEL: &str = "v1.min.io/tenant";
pub const POOL_LABEL: &str = "v1.min.io/pool";
pub const CONSOLE_LABEL: &str = "v1.min.io/console";
pub const KES_LABEL: &str = "v1.min.io/kes";
pub const PROMETHEUS_LABEL: &str = "v1.min.io/prometheus";
pub const LOG_PG_LABEL: &str = "v1.min.io/log-pg";
pub const LOG_SEARCH_API_LABEL: &str = "v1.min.io/logsearchapi";
/// Pod template label left behind by tenants created before pools were called pools.
pub const LEGACY_ZONE_LABEL: &str = "zone";
pub const REVISION_ANNOTATION: &str = "min.io/revision";

pub const MINIO_PORT: i32 = 9000;
pub const MINIO_SERVICE_PORT_HTTP: i32 = 80;
pub const MINIO_SERVICE_PORT_HTTPS: i32 = 443;
pub const MINIO_PORT_NAME_HTTP: &str = "http-minio";
pub const MINIO_PORT_NAME_HTTPS: &str = "https-minio";
pub const CONSOLE_PORT: i32 = 9090;
pub const CONSOLE_TLS_PORT: i32 = 9443;

/// Cluster-IP service name that the data path relies on.
pub const MINIO_CI_SERVICE: &str = "minio";
pub const MINIO_CONTAINER: &str = "minio";
pub const CERTS_DIR: &str = "/tmp/certs";
pub const DEFAULT_MOUNT_PATH: &str = "/export";

pub const KES_PORT: i32 = 7373;
pub const KES_REPLICAS: i32 = 2;
pub const KES_DEFAULT_KEY: &str = "my-minio-key";
pub const KES_CONFIG_MOUNT: &str = "/tmp/kes";

pub const PROMETHEUS_IMAGE: &str = "quay.io/prometheus/prometheus:latest";
pub const PROMETHEUS_PORT: i32 = 9090;
pub const LOG_SEARCH_API_IMAGE: &str = "minio/logsearchapi:v4.1.1";
pub const LOG_SEARCH_API_PORT: i32 = 8080;
pub const LOG_PG_IMAGE: &str = "library/postgres:13";
pub const LOG_PG_PORT: i32 = 5432;

pub const WEBHOOK_SECRET: &str = "operator-webhook-secret";
pub const WEBHOOK_USERNAME_KEY: &str = "webhookUsername";
pub const WEBHOOK_PASSWORD_KEY: &str = "webhookPassword";
pub const WEBHOOK_ARGS_KEY: &str = "MINIO_ARGS";
pub const OPERATOR_CA_SECRET: &str = "operator-ca-tls";
pub const OPERATOR_TLS_SECRET: &str = "operator-tls";

pub const WEBHOOK_API_GETENV: &str = "/webhook/v1/getenv";
pub const WEBHOOK_API_BUCKET_SERVICE: &str = "/webhook/v1/bucketsrv";
pub const WEBHOOK_API_UPDATE: &str = "/webhook/v1/update";
pub const WEBHOOK_API_CRD_CONVERSION: &str = "/webhook/v1/crd-conversion";
