mod agents;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use draftline_core::agent::Agent;
use draftline_core::config::{ConfigError, OrchestratorConfig};
use draftline_core::domain::{JobEventKind, ProposalRequest};
use draftline_core::graph::PipelineShape;
use draftline_core::{Orchestrator, OrchestratorBuilder};

use agents::{SimulatedAgent, Simulation, sample_knowledge_base};

#[derive(Parser)]
#[command(name = "draftline", version, about = "Proposal generation job orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "draftline.toml", env = "DRAFTLINE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one proposal job end to end with simulated agents
    Run {
        /// Request as JSON (fields of ProposalRequest)
        #[arg(long, conflicts_with_all = ["organization", "funder", "title"])]
        request: Option<PathBuf>,
        #[arg(long, default_value = "Acme Community Trust")]
        organization: String,
        #[arg(long, default_value = "City Fund")]
        funder: String,
        #[arg(long, default_value = "After-school STEM pilot")]
        title: String,
        /// Transient research failures before it succeeds
        #[arg(long, default_value = "0")]
        fail_research: u32,
        /// Comma-separated gate scores handed out in order (e.g. 0.6,0.9)
        #[arg(long, value_delimiter = ',')]
        gate_scores: Vec<f64>,
        /// Simulated latency per agent call, in milliseconds
        #[arg(long, default_value = "50")]
        latency_ms: u64,
    },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("draftline_core=info,draftline=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
        }
        Commands::Run {
            request,
            organization,
            funder,
            title,
            fail_research,
            gate_scores,
            latency_ms,
        } => {
            let request = match request {
                Some(path) => read_request(&path)?,
                None => ProposalRequest::new(new_reference(), organization, funder, title)
                    .with_summary("Two-year pilot serving 200 students")
                    .with_focus_area("STEM"),
            };
            let simulation = Simulation {
                research_failures: fail_research,
                gate_scores,
                latency: Duration::from_millis(latency_ms),
            };
            let orchestrator = build(config, simulation)?;
            run_job(&orchestrator, request).await?;
        }
    }
    Ok(())
}

/// The file when present, otherwise defaults; environment overrides apply
/// either way.
fn load_config(path: &Path) -> anyhow::Result<OrchestratorConfig> {
    match OrchestratorConfig::load(path) {
        Ok(config) => {
            info!(path = %path.display(), "loaded config");
            Ok(config)
        }
        Err(ConfigError::NotFound(_)) => {
            info!(path = %path.display(), "no config file, using defaults");
            Ok(OrchestratorConfig::from_env()?)
        }
        Err(e) => Err(e).with_context(|| format!("loading {}", path.display())),
    }
}

fn read_request(path: &Path) -> anyhow::Result<ProposalRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading request {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing request {}", path.display()))
}

fn new_reference() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("req-{secs}")
}

fn build(config: OrchestratorConfig, simulation: Simulation) -> anyhow::Result<Orchestrator> {
    let agent: Arc<dyn Agent> = Arc::new(SimulatedAgent::new(
        Arc::new(sample_knowledge_base()),
        simulation,
    ));
    let stages = PipelineShape::from(&config.pipeline).stages();
    let mut builder = OrchestratorBuilder::new(config);
    for stage in stages {
        builder = builder.register_shared(stage, Arc::clone(&agent))?;
    }
    Ok(builder.build()?)
}

async fn run_job(orchestrator: &Orchestrator, request: ProposalRequest) -> anyhow::Result<()> {
    let mut events = orchestrator.subscribe();
    let handle = orchestrator.spawn();
    let job_id = orchestrator.submit(request).await?;

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.job_id == job_id => {
                    println!("{}", serde_json::to_string(&event)?);
                    if let JobEventKind::StatusChanged { to, .. } = event.kind
                        && to.is_terminal()
                    {
                        break Ok(());
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event stream lagged"),
                Err(RecvError::Closed) => break Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                warn!(%job_id, "interrupted, cancelling job");
                orchestrator.cancel(job_id).await?;
                break Err(anyhow::anyhow!("interrupted"));
            }
        }
    };

    handle.shutdown_and_join().await;
    let status = orchestrator.get_status(job_id).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    outcome?;
    if let Some(failure) = status.failure {
        bail!("job {job_id} failed: {} ({})", failure.reason, failure.last_error);
    }
    Ok(())
}
