//! Porter Operator - runs Porter bundles for Installation resources

use std::path::PathBuf;

use clap::Parser;
use kube::CustomResourceExt;

use porter_common::crd::Installation;
use porter_common::kube_utils::ClientSettings;
use porter_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use porter_common::DEFAULT_CONFIG_MAP_NAME;
use porter_installation::DEFAULT_EXECUTOR_IMAGE;
use porter_operator::controller_runner::{build_installation_controller, ControllerSettings};
use porter_operator::startup::ensure_crds_installed;

/// Porter operator - reconciles Installation resources into execution Jobs
#[derive(Parser, Debug)]
#[command(name = "porter-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Only watch Installations in this namespace (default: all namespaces)
    #[arg(long, env = "PORTER_WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Name of the per-namespace ConfigMap holding execution defaults
    #[arg(long, env = "PORTER_CONFIG_MAP", default_value = DEFAULT_CONFIG_MAP_NAME)]
    config_map: String,

    /// Executor image repository; the tag is derived from the Porter version
    #[arg(long, env = "PORTER_EXECUTOR_IMAGE", default_value = DEFAULT_EXECUTOR_IMAGE)]
    executor_image: String,

    /// Path to a kubeconfig file (default: in-cluster or ~/.kube/config)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Do not install or update CRDs on startup
    #[arg(long)]
    skip_crd_install: bool,

    /// Emit human-readable logs instead of JSON
    #[arg(long)]
    text_logs: bool,
}

impl Cli {
    fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            namespace: self.namespace.clone().filter(|ns| !ns.is_empty()),
            config_map: self.config_map.clone(),
            executor_image: self.executor_image.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Installation::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let log_format = if cli.text_logs {
        LogFormat::Text
    } else {
        LogFormat::Json
    };
    let telemetry = init_telemetry(TelemetryConfig::default().with_log_format(log_format))?;

    let client = ClientSettings::with_kubeconfig(cli.kubeconfig.clone())
        .connect()
        .await?;

    if cli.skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        ensure_crds_installed(&client).await?;
    }

    let settings = cli.controller_settings();
    tracing::info!(
        namespace = settings.namespace.as_deref().unwrap_or("*"),
        config_map = %settings.config_map,
        executor_image = %settings.executor_image,
        otlp_export = telemetry.is_exporting(),
        "Starting Porter operator"
    );

    build_installation_controller(client, &settings).await;

    tracing::info!("Porter operator shut down");
    drop(telemetry);
    Ok(())
}
