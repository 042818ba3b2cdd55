//! kubebroker - reconcile application pod specs against a Kubernetes cluster

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use kubebroker::broker::Broker;
use kubebroker::config::{
    BrokerConfig, DEFAULT_NODE_SAMPLE_SIZE, DEFAULT_OPERATOR_STORAGE_CLASS,
    DEFAULT_UNIT_STORAGE_CLASS,
};
use kubebroker::specs::{parse_pod_spec, PodSpec, SpecVersion};
use kubebroker::telemetry::{init_logging, LogFormat};
use kubebroker::workload::params::{ServiceConfig, ServiceParams};
use kubebroker::workload::render::render_objects;

/// kubebroker - realize application pod specs as Kubernetes objects
#[derive(Parser, Debug)]
#[command(name = "kubebroker", version, about, long_about = None)]
struct Cli {
    /// Log output format (text or json)
    #[arg(long, env = "KUBEBROKER_LOG_FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse and validate a pod spec file
    Validate(SpecArgs),

    /// Print the objects a pod spec translates to, without a cluster
    ///
    /// Emits a JSON array of pull secrets, config maps, declared secrets,
    /// custom resource definitions, the deployment and (when ports are
    /// declared) the service, in the order `ensure` submits them.
    Render(RenderArgs),

    /// List the cloud/region pairs inferred from the cluster's nodes
    Regions(ClusterArgs),

    /// Create or update an application from a pod spec
    Ensure(EnsureArgs),

    /// Show the units of an application
    Units(AppArgs),

    /// Remove an application (or its operator) and everything it owns
    Delete(DeleteArgs),

    /// Delete the model namespace and wait until it is gone
    ///
    /// Ctrl-C abandons the wait; the deletion itself continues server-side.
    Destroy(ClusterArgs),
}

/// Cluster connection and broker settings
#[derive(Args, Debug)]
struct ClusterArgs {
    /// Model namespace
    #[arg(short, long, env = "KUBEBROKER_NAMESPACE")]
    namespace: String,

    /// Path to a kubeconfig file (defaults to the inferred environment)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Storage class for unit storage when a filesystem names none
    #[arg(long, default_value = DEFAULT_UNIT_STORAGE_CLASS)]
    unit_storage_class: String,

    /// Storage class for operator storage when none is given
    #[arg(long, default_value = DEFAULT_OPERATOR_STORAGE_CLASS)]
    operator_storage_class: String,

    /// Nodes sampled for cloud/region inference
    #[arg(long, default_value_t = DEFAULT_NODE_SAMPLE_SIZE)]
    node_sample_size: u32,

    /// Client connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Client read timeout in seconds
    #[arg(long, default_value_t = 30)]
    read_timeout: u64,
}

impl ClusterArgs {
    async fn connect(&self) -> anyhow::Result<Broker> {
        let config = BrokerConfig::new(&self.namespace)
            .with_unit_storage_class(&self.unit_storage_class)
            .with_operator_storage_class(&self.operator_storage_class)
            .with_node_sample_size(self.node_sample_size)
            .with_timeouts(
                Duration::from_secs(self.connect_timeout),
                Duration::from_secs(self.read_timeout),
            );
        Ok(Broker::connect(config, self.kubeconfig.as_deref()).await?)
    }
}

/// A pod spec file and its schema version
#[derive(Args, Debug)]
struct SpecArgs {
    /// Path to the pod spec (YAML or JSON)
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Pod spec schema version (v1 or v2)
    #[arg(long, default_value = "v1")]
    spec_version: SpecVersion,
}

impl SpecArgs {
    fn load(&self) -> anyhow::Result<PodSpec> {
        let text = std::fs::read_to_string(&self.file)
            .map_err(|e| anyhow::anyhow!("Failed to read pod spec {:?}: {}", self.file, e))?;
        Ok(parse_pod_spec(&text, self.spec_version)?)
    }
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Application name
    app: String,

    /// Namespace written into the rendered objects
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Replica count of the rendered deployment
    #[arg(long, default_value_t = 1)]
    units: i32,

    #[command(flatten)]
    spec: SpecArgs,
}

#[derive(Args, Debug)]
struct EnsureArgs {
    /// Application name
    app: String,

    /// Desired number of units
    #[arg(long, default_value_t = 1)]
    units: i32,

    /// Application config attribute (repeatable), e.g. kubernetes-service-type=LoadBalancer
    #[arg(long = "config", value_parser = parse_key_value)]
    config: Vec<(String, String)>,

    /// Label added to every created object (repeatable)
    #[arg(long = "tag", value_parser = parse_key_value)]
    tags: Vec<(String, String)>,

    /// Placement directive, key=value[,key=value]
    #[arg(long)]
    placement: Option<String>,

    /// Pod spec file; without one only the unit count changes
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,

    /// Pod spec schema version (v1 or v2)
    #[arg(long, default_value = "v1")]
    spec_version: SpecVersion,

    #[command(flatten)]
    cluster: ClusterArgs,
}

#[derive(Args, Debug)]
struct AppArgs {
    /// Application name
    app: String,

    #[command(flatten)]
    cluster: ClusterArgs,
}

#[derive(Args, Debug)]
struct DeleteArgs {
    /// Application name
    app: String,

    /// Delete the application's operator instead of the application
    #[arg(long)]
    operator: bool,

    #[command(flatten)]
    cluster: ClusterArgs,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((key.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    match cli.command {
        Commands::Validate(args) => {
            let spec = args.load()?;
            println!(
                "{:?}: valid {} pod spec ({} containers)",
                args.file,
                args.spec_version,
                spec.containers.len()
            );
            Ok(())
        }
        Commands::Render(args) => run_render(args),
        Commands::Regions(cluster) => {
            let broker = cluster.connect().await?;
            for region in broker.list_host_cloud_regions().await? {
                println!("{region}");
            }
            Ok(())
        }
        Commands::Ensure(args) => run_ensure(args).await,
        Commands::Units(args) => {
            let broker = args.cluster.connect().await?;
            let units = broker.units(&args.app).await?;
            println!("{}", serde_json::to_string_pretty(&units)?);
            Ok(())
        }
        Commands::Delete(args) => {
            let broker = args.cluster.connect().await?;
            if args.operator {
                broker.delete_operator(&args.app).await?;
            } else {
                broker.delete_service(&args.app).await?;
                broker.delete_custom_resource_definitions(&args.app).await?;
            }
            tracing::info!(app = %args.app, "deleted");
            Ok(())
        }
        Commands::Destroy(cluster) => run_destroy(cluster).await,
    }
}

fn run_render(args: RenderArgs) -> anyhow::Result<()> {
    let spec = args.spec.load()?;
    let objects = render_objects(
        &args.app,
        &args.namespace,
        &spec,
        &ServiceParams::default(),
        args.units,
        &ServiceConfig::default(),
        Vec::new(),
    )?;
    println!("{}", serde_json::to_string_pretty(&objects.manifests()?)?);
    Ok(())
}

async fn run_ensure(args: EnsureArgs) -> anyhow::Result<()> {
    let pod_spec = match &args.file {
        Some(file) => Some(
            SpecArgs {
                file: file.clone(),
                spec_version: args.spec_version,
            }
            .load()?,
        ),
        None => None,
    };

    let params = ServiceParams {
        pod_spec,
        resource_tags: args.tags.into_iter().collect(),
        placement: args.placement,
        ..Default::default()
    };
    let config = ServiceConfig::new(args.config.into_iter().collect());

    let broker = args.cluster.connect().await?;
    broker
        .ensure_service(&args.app, &params, args.units, &config)
        .await?;
    Ok(())
}

async fn run_destroy(cluster: ClusterArgs) -> anyhow::Result<()> {
    let broker = cluster.connect().await?;
    let cancel = CancellationToken::new();

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, abandoning wait for namespace removal");
            on_interrupt.cancel();
        }
    });

    broker.destroy(cancel).await?;
    tracing::info!(namespace = %broker.namespace(), "namespace removed");
    Ok(())
}
