use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use kube::Client;
use tracing_subscriber::EnvFilter;
use webhost_operator::{
    Error, Result,
    config::{FocalHost, Settings},
    controller, crd,
};

#[derive(Parser, Debug)]
#[command(name = "webhost-operator", version, about = "Reconciles webhost resources")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the controllers against the current cluster
    Run(RunArgs),
    /// Print every CRD this operator serves as YAML
    Crd,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Only reconcile this host, as `namespace/name`
    #[arg(long, env = "WEBHOST_HOST")]
    host: Option<String>,

    /// Only watch this namespace
    #[arg(long, env = "WEBHOST_NAMESPACE")]
    namespace: Option<String>,

    /// Reconciles in flight per kind
    #[arg(long, env = "WEBHOST_CONCURRENCY", default_value_t = 4)]
    concurrency: u16,

    #[arg(long, env = "WEBHOST_REGISTRY")]
    registry: Option<String>,

    #[arg(long, env = "WEBHOST_INSTALLER_IMAGE")]
    installer_image: Option<String>,

    #[arg(long, env = "WEBHOST_IMPORT_MAP_IMAGE")]
    import_map_image: Option<String>,

    #[arg(long, env = "WEBHOST_PACKAGE_BUILDER_IMAGE")]
    package_builder_image: Option<String>,

    #[arg(long, env = "WEBHOST_BUILDER_IMAGE")]
    builder_image: Option<String>,

    #[arg(long, env = "WEBHOST_DEPLOYER_IMAGE")]
    deployer_image: Option<String>,

    #[arg(long, env = "WEBHOST_STATIC_SERVER_IMAGE")]
    static_server_image: Option<String>,

    /// Service the catch-all route of every host points at
    #[arg(long, env = "WEBHOST_SERVER_SERVICE")]
    server_service: Option<String>,

    #[arg(long, env = "WEBHOST_SERVER_PORT")]
    server_port: Option<i32>,

    #[arg(long, env = "WEBHOST_FUNCTION_PORT")]
    function_port: Option<i32>,

    /// First retry delay after a failed reconcile, in seconds
    #[arg(long, env = "WEBHOST_BACKOFF_BASE", default_value_t = 5)]
    backoff_base: u64,

    /// Longest retry delay, in seconds
    #[arg(long, env = "WEBHOST_BACKOFF_MAX", default_value_t = 300)]
    backoff_max: u64,
}

fn focal_host(value: &str) -> Result<FocalHost> {
    match value.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => Ok(FocalHost {
            namespace: namespace.into(),
            name: name.into(),
        }),
        _ => Err(Error::InvalidSpec(format!("--host {value:?} is not namespace/name"))),
    }
}

impl RunArgs {
    fn settings(self) -> Result<Settings> {
        let mut settings = Settings {
            focal_host: self.host.as_deref().map(focal_host).transpose()?,
            watch_namespace: self.namespace,
            concurrency: self.concurrency,
            backoff_base: Duration::from_secs(self.backoff_base),
            backoff_max: Duration::from_secs(self.backoff_max),
            ..Settings::default()
        };
        let overrides = [
            (self.registry, &mut settings.registry),
            (self.installer_image, &mut settings.installer_image),
            (self.import_map_image, &mut settings.import_map_image),
            (self.package_builder_image, &mut settings.package_builder_image),
            (self.builder_image, &mut settings.builder_image),
            (self.deployer_image, &mut settings.deployer_image),
            (self.static_server_image, &mut settings.static_server_image),
            (self.server_service, &mut settings.server_service),
        ];
        for (value, field) in overrides {
            if let Some(value) = value {
                *field = value;
            }
        }
        if let Some(port) = self.server_port {
            settings.server_port = port;
        }
        if let Some(port) = self.function_port {
            settings.function_port = port;
        }
        Ok(settings)
    }
}

fn print_crds() -> Result<()> {
    let documents = crd::all()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    println!("{}", documents.join("---\n"));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Crd => print_crds(),
        Command::Run(args) => {
            let settings = args.settings()?;
            let client = Client::try_default().await?;
            controller::run(client, settings).await
        }
    }
}
