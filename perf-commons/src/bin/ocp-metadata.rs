use std::{io::Write, path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use comfy_table::{presets::NOTHING, Table};
use k8s_openapi::serde_json;
use perf_commons::k8s::KubeConnector;
use perf_commons::logging;
use perf_commons::ocp_metadata::{ClusterMetadata, ClusterMetadataCollector};
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    Json,
    Yaml,
    Table,
}

/// Retrieves OpenShift cluster metadata: cluster name, platform and type,
/// OCP and Kubernetes versions, node roles, network and IPSec configuration,
/// architectures, FIPS and publish settings.
#[derive(Debug, Parser)]
#[command(name = "ocp-metadata", version = perf_commons::version::VERSION)]
struct Options {
    /// Path to kubeconfig file (default is $KUBECONFIG or $HOME/.kube/config)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Output::Table)]
    output: Output,

    /// Log verbosity, repeat for more (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// OTLP endpoint for traces, used when built with telemetry
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT", default_value = "http://localhost:4317")]
    otlp_endpoint: String,
}

fn level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn table(md: &ClusterMetadata) -> String {
    let with_type = |count: usize, kind: &str| format!("{count} ({kind})");
    let rows: Vec<(&str, String)> = vec![
        ("Cluster Name", md.cluster_name.clone()),
        ("Platform", md.platform.clone()),
        ("Cluster Type", md.cluster_type.clone()),
        ("OCP Version", md.ocp_version.clone()),
        ("OCP Major Version", md.ocp_major_version.clone()),
        ("K8s Version", md.k8s_version.clone()),
        ("Region", md.region.clone()),
        ("SDN Type", md.sdn_type.clone()),
        ("Total Nodes", md.total_nodes.to_string()),
        ("Master Nodes", with_type(md.master_nodes_count, &md.master_nodes_type)),
        ("Worker Nodes", with_type(md.worker_nodes_count, &md.worker_nodes_type)),
        ("Infra Nodes", with_type(md.infra_nodes_count, &md.infra_nodes_type)),
        ("Other Nodes", md.other_nodes_count.to_string()),
        ("Worker Arch", md.worker_arch.clone()),
        ("Control Plane Arch", md.control_plane_arch.clone()),
        ("FIPS", md.fips.to_string()),
        ("Publish", md.publish.clone()),
        ("IPSec", md.ipsec.to_string()),
        ("IPSec Mode", md.ipsec_mode.clone()),
    ];

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(["Field", "Value"]);
    table.add_row(["-----", "-----"]);
    for (field, value) in rows {
        table.add_row([field.to_string(), value]);
    }
    table.to_string()
}

fn render(md: &ClusterMetadata, output: Output) -> anyhow::Result<String> {
    Ok(match output {
        Output::Json => serde_json::to_string_pretty(md)? + "\n",
        Output::Yaml => serde_yaml::to_string(md)?,
        Output::Table => table(md) + "\n",
    })
}

async fn run(options: &Options) -> anyhow::Result<()> {
    let connector = KubeConnector::connect(options.kubeconfig.as_deref())
        .await
        .context("failed to get Kubernetes config")?;
    let metadata = ClusterMetadataCollector::new(connector)
        .get_cluster_metadata()
        .await
        .context("failed to get cluster metadata")?;

    let rendered = render(&metadata, options.output)?;
    std::io::stdout()
        .lock()
        .write_all(rendered.as_bytes())
        .context("failed to write output")?;
    Ok(())
}

/// Usage errors exit 1 like every other failure; help and version exit 0.
fn parse_options<I, T>(args: I) -> Result<Options, ExitCode>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Options::try_parse_from(args).map_err(|e| {
        let _ = e.print();
        if e.exit_code() == 0 {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let options = match parse_options(std::env::args_os()) {
        Ok(options) => options,
        Err(code) => return code,
    };
    if let Err(e) = logging::setup_logger(None, level(options.verbose), &options.otlp_endpoint) {
        eprintln!("Error: failed to set up logging: {e}");
    }

    let result = run(&options).await;
    logging::shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
