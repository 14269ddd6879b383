//! Scanward - security analysis pipeline CLI
//!
//! The `scanward` command scans sources, enriches findings and renders a
//! report.
//!
//! ## Commands
//!
//! - `run`: plan and execute a pipeline run in the foreground
//! - `plan`: show the plan the intent planner picks for a prompt
//! - `retrieve`: query the compliance knowledge index
//! - `submit`: run through the local job queue and poll until done

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use compliance_rag::{FlatVectorIndex, KnowledgeRetriever};
use scanward_core::domain::{DepthLevel, PipelineRequest, PlanSequence, ScanCategory};
use scanward_core::jobs::{JobQueue, JobStatus, LocalJobQueue};
use scanward_core::obs::RunSpan;
use scanward_core::{init_tracing, CancellationToken, ScanwardConfig, METRICS};
use scanward_pipeline::{new_run_id, IntentPlanner, PipelineJobRunner, PipelineRun, SecurityPipeline};
use scanward_providers::{tools_from_config, GeminiClient};
use serde::Serialize;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "scanward")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Security analysis pipeline: scan, explain, map to compliance, report", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "SCANWARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct RequestArgs {
    /// Source to scan (repository URL ending in .git, or a web URL)
    #[arg(short, long = "source", required = true)]
    sources: Vec<String>,

    /// Scan category to run (code, web)
    #[arg(short = 't', long = "category", required = true, value_delimiter = ',')]
    categories: Vec<ScanCategory>,

    /// Free-text request handed to the intent planner
    #[arg(short, long, default_value = "")]
    prompt: String,
}

impl RequestArgs {
    fn to_request(&self) -> Result<PipelineRequest> {
        PipelineRequest::new(self.sources.clone(), self.categories.iter().copied(), &self.prompt)
            .context("invalid pipeline request")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and execute a pipeline run
    Run {
        #[command(flatten)]
        request: RequestArgs,

        /// Skip the planner and use a fixed depth (minimal, cve, fixes, full)
        #[arg(long, conflicts_with = "plan")]
        depth: Option<DepthLevel>,

        /// Skip the planner and use explicit stages, e.g. scan,compliance,report
        #[arg(long, value_delimiter = ',')]
        plan: Option<Vec<String>>,
    },

    /// Show the plan chosen for a prompt
    Plan {
        /// Free-text request
        prompt: String,
    },

    /// Query the compliance knowledge index
    Retrieve {
        /// Query text
        query: String,

        /// Number of chunks to return (default from config)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Run through the local job queue, polling until the job finishes
    Submit {
        #[command(flatten)]
        request: RequestArgs,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "500")]
        poll_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = ScanwardConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let result = match cli.command {
        Commands::Run {
            request,
            depth,
            plan,
        } => cmd_run(&config, &request, explicit_plan(depth, plan)?).await,
        Commands::Plan { prompt } => cmd_plan(&config, &prompt).await,
        Commands::Retrieve { query, top_k } => cmd_retrieve(&config, &query, top_k).await,
        Commands::Submit { request, poll_ms } => {
            cmd_submit(&config, &request, Duration::from_millis(poll_ms)).await
        }
    };

    METRICS.flush();
    result
}

/// Plan override from `--depth` or `--plan`, if either was given.
fn explicit_plan(depth: Option<DepthLevel>, plan: Option<Vec<String>>) -> Result<Option<PlanSequence>> {
    match (depth, plan) {
        (Some(depth), _) => Ok(Some(PlanSequence::for_depth(depth))),
        (None, Some(tokens)) => Ok(Some(
            PlanSequence::from_tokens(tokens).context("invalid --plan")?,
        )),
        (None, None) => Ok(None),
    }
}

async fn build_pipeline(config: &ScanwardConfig) -> Result<SecurityPipeline> {
    let client = Arc::new(GeminiClient::new(&config.provider)?);
    let index = FlatVectorIndex::load(&config.index_path, client.clone())
        .await
        .with_context(|| format!("Failed to load index {}", config.index_path.display()))?;
    let tools = tools_from_config(&config.tools);
    Ok(SecurityPipeline::assemble(
        config,
        client,
        Arc::new(index),
        tools,
    ))
}

/// Cancel `token` on Ctrl-C; in-flight calls finish and are discarded.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            token.cancel();
        }
    });
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn finish(run: &PipelineRun) -> Result<()> {
    print_json(run)?;
    if run.is_completed() {
        Ok(())
    } else {
        anyhow::bail!("run {} aborted", run.run_id)
    }
}

async fn cmd_run(
    config: &ScanwardConfig,
    args: &RequestArgs,
    plan: Option<PlanSequence>,
) -> Result<()> {
    let request = args.to_request()?;
    let pipeline = build_pipeline(config).await?;

    let run_id = new_run_id();
    let _span = RunSpan::enter(&run_id);

    let plan = match plan {
        Some(plan) => plan,
        None => pipeline.plan(&request).await,
    };
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    info!(plan = %plan, sources = request.sources().len(), "starting run");
    let run = pipeline.run_as(&run_id, &request, &plan, &cancel).await;
    finish(&run)
}

async fn cmd_plan(config: &ScanwardConfig, prompt: &str) -> Result<()> {
    let client = Arc::new(GeminiClient::new(&config.provider)?);
    let planner = IntentPlanner::new(client).with_call_timeout(config.call_timeout());
    let decision = planner.decide(prompt).await;
    print_json(&decision)
}

async fn cmd_retrieve(config: &ScanwardConfig, query: &str, top_k: Option<usize>) -> Result<()> {
    let client = Arc::new(GeminiClient::new(&config.provider)?);
    let index = FlatVectorIndex::load(&config.index_path, client)
        .await
        .with_context(|| format!("Failed to load index {}", config.index_path.display()))?;

    let retriever = KnowledgeRetriever::new(Arc::new(index))
        .with_top_k(top_k.unwrap_or(config.top_k))
        .with_timeout(config.call_timeout());
    let retrieval = retriever
        .retrieve(query)
        .await
        .context("Retrieval failed")?;
    print_json(&retrieval)
}

async fn cmd_submit(config: &ScanwardConfig, args: &RequestArgs, poll: Duration) -> Result<()> {
    let request = args.to_request()?;
    let pipeline = Arc::new(build_pipeline(config).await?);
    let queue: LocalJobQueue<PipelineRequest, PipelineRun> =
        LocalJobQueue::new(Arc::new(PipelineJobRunner::new(pipeline)), 1);

    let id = queue.submit(request).await?;
    info!(job_id = %id, "job submitted");

    let mut last = None;
    loop {
        let snapshot = queue.poll(&id).await?;
        if last != Some(snapshot.status) {
            info!(job_id = %id, status = ?snapshot.status, "job status");
            last = Some(snapshot.status);
        }
        match snapshot.status {
            JobStatus::Completed => {
                let run = snapshot
                    .result
                    .context("completed job has no result")?;
                return finish(&run);
            }
            JobStatus::Failed => {
                anyhow::bail!(
                    "job {} failed: {}",
                    id,
                    snapshot.error.unwrap_or_default()
                );
            }
            JobStatus::Pending | JobStatus::Running => tokio::time::sleep(poll).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanward_core::domain::StageId;

    #[test]
    fn run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "scanward",
            "run",
            "-s",
            "https://example.com/repo.git",
            "-t",
            "code,web",
            "--prompt",
            "only the basics",
            "--depth",
            "minimal",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { request, depth, plan } => {
                assert_eq!(request.categories, vec![ScanCategory::Code, ScanCategory::Web]);
                assert_eq!(depth, Some(DepthLevel::Minimal));
                assert!(plan.is_none());
                let request = request.to_request().unwrap();
                assert_eq!(request.prompt(), "only the basics");
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn unknown_category_is_rejected() {
        assert!(Cli::try_parse_from(["scanward", "run", "-s", "x.git", "-t", "mobile"]).is_err());
    }

    #[test]
    fn depth_and_plan_conflict() {
        assert!(Cli::try_parse_from([
            "scanward", "run", "-s", "x.git", "-t", "code", "--depth", "full", "--plan", "scan",
        ])
        .is_err());
    }

    #[test]
    fn explicit_plan_accepts_legacy_tokens() {
        let plan = explicit_plan(None, Some(vec!["ScanAgent".into(), "report".into()]))
            .unwrap()
            .unwrap();
        assert_eq!(plan.stages(), &[StageId::Scan, StageId::Report]);
        assert!(explicit_plan(None, Some(vec!["FixAgent".into()])).is_err());
        assert!(explicit_plan(None, None).unwrap().is_none());
    }
}
