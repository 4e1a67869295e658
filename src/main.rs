use std::time::Duration;

use clap::Parser;
use cluster_config::{ClusterConfig, Settings};
use kube::CustomResourceExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
enum Args {
    /// Run the controller against the current cluster
    Run {
        /// Seconds to wait before retrying a failed reconciliation
        #[arg(long, default_value_t = 60)]
        requeue_after_secs: u64,

        /// Controller name attached to published events
        #[arg(long, default_value = "cluster-config-controller")]
        reporter: String,
    },
    /// Print the ClusterConfig CRD as YAML
    Crds,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args {
        Args::Crds => {
            println!("{}", serde_yaml::to_string(&ClusterConfig::crd())?);
        }
        Args::Run {
            requeue_after_secs,
            reporter,
        } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .init();

            cluster_config::run(Settings {
                requeue_after: Duration::from_secs(requeue_after_secs),
                reporter,
            })
            .await?;
        }
    };

    Ok(())
}
