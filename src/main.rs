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

use clap::{Parser, Subcommand};
use operator::{RunOptions, VERSION, crd, run};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "operator")]
#[command(about = "MinIO Kubernetes Operator", long_about = None)]
#[command(version = VERSION)]
struct Cli {
    /// Path to a kubeconfig. Only required if out-of-cluster.
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Address of the Kubernetes API server, overrides the kubeconfig.
    #[arg(long, global = true)]
    master: Option<String>,

    /// Template for the per-pod certificate host names.
    #[arg(long = "hosts-template", global = true)]
    hosts_template: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Output CRDs in YAML
    Crd {
        /// Optional output path. If not set, the output will be written to stdout.
        #[arg(short, long)]
        file: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Crd { file }) => crd(file).await?,
        None => {
            run(RunOptions {
                kubeconfig: cli.kubeconfig,
                master: cli.master,
                hosts_template: cli.hosts_template,
            })
            .await?
        }
    }

    Ok(())
}
