//! Autonomous iteration harness CLI.
//!
//! `autoloop run <goal>` drives plan → execute → evaluate → persist cycles
//! until a terminal verdict, recording artifacts and ledger state under
//! `.autoloop/` so an interrupted run can be resumed with `--run-id`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result, bail};
use autoloop::core::types::stop_reason;
use autoloop::evaluator::RuleEvaluator;
use autoloop::exit_codes;
use autoloop::io::artifacts::ArtifactStore;
use autoloop::io::config::{AutoloopConfig, load_config, write_config};
use autoloop::io::git::Git;
use autoloop::io::ledger::{RunLedger, SqliteLedger};
use autoloop::io::paths::AutoloopPaths;
use autoloop::io::run_id::{generate_run_id, validate_run_id};
use autoloop::io::task_exec::LocalTaskRunner;
use autoloop::logging;
use autoloop::looping::{Harness, LoopRequest};
use autoloop::planner::RulePlanner;
use clap::{Parser, Subcommand};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(
    name = "autoloop",
    version,
    about = "Autonomous plan/execute/evaluate iteration harness"
)]
struct Cli {
    /// Project root; state lives under `<root>/.autoloop/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run (or resume) the loop for a goal.
    Run {
        goal: String,
        /// Iterations allowed in this invocation (default: config `max_iterations`).
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Plan each iteration but execute nothing.
        #[arg(long)]
        dry_run: bool,
        /// Resume or name a run explicitly ([A-Za-z0-9._-]).
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Print a run's status and latest completed iteration.
    Status {
        #[arg(long)]
        run_id: String,
    },
    /// Write `.autoloop/config.toml` with defaults if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::FAILURE
        }
    };
    std::process::exit(code);
}

fn execute(cli: Cli) -> Result<i32> {
    let paths = AutoloopPaths::new(&cli.root);
    match cli.command {
        Command::Run {
            goal,
            max_iterations,
            dry_run,
            run_id,
        } => cmd_run(&paths, goal, max_iterations, dry_run, run_id),
        Command::Status { run_id } => cmd_status(&paths, &run_id),
        Command::Init { force } => cmd_init(&paths, force),
    }
}

fn cmd_run(
    paths: &AutoloopPaths,
    goal: String,
    max_iterations: Option<u32>,
    dry_run: bool,
    run_id: Option<String>,
) -> Result<i32> {
    let interrupted = install_interrupt_flag();

    let cfg = load_config(&paths.config_path)?;
    let run_id = match run_id {
        Some(id) => {
            validate_run_id(&id)?;
            id
        }
        None => generate_run_id(),
    };
    let max_iterations = max_iterations.unwrap_or(cfg.max_iterations);
    if max_iterations == 0 {
        bail!("--max-iterations must be > 0");
    }

    if interrupted.load(Ordering::SeqCst) {
        eprintln!("Interrupted before run {run_id} started");
        return Ok(exit_codes::INTERRUPTED);
    }

    let harness = build_harness(paths, &cfg);
    let request = LoopRequest {
        run_id: run_id.clone(),
        goal,
        max_iterations,
        dry_run,
    };
    let outcome = harness.run_loop(
        &request,
        || interrupted.load(Ordering::SeqCst),
        |step| {
            println!(
                "[{}] iteration {}: {}",
                step.run_id,
                step.iteration,
                step.verdict.status.as_str()
            );
        },
    )?;

    let verdict = &outcome.final_verdict;
    if outcome.iterations_executed == 1
        && verdict.stop_reason() == Some(stop_reason::USER_INTERRUPT)
    {
        eprintln!("Interrupted before run {run_id} did any work");
        return Ok(exit_codes::INTERRUPTED);
    }
    println!("{}", verdict.rationale);
    println!("Run complete: {run_id}");
    Ok(exit_codes::OK)
}

fn build_harness(
    paths: &AutoloopPaths,
    cfg: &AutoloopConfig,
) -> Harness<RulePlanner, LocalTaskRunner, RuleEvaluator, SqliteLedger> {
    Harness::new(
        RulePlanner,
        LocalTaskRunner::new(&paths.root, cfg),
        RuleEvaluator,
        SqliteLedger::new(&paths.ledger_path),
        ArtifactStore::new(&paths.artifacts_dir),
        Git::new(&cfg.tools.git, &paths.root),
    )
    .with_retry(cfg.retry_policy())
}

/// Flag set on Ctrl-C; the loop polls it between iterations.
fn install_interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    let spawned = thread::Builder::new()
        .name("autoloop-signal".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!(%err, "signal runtime unavailable; Ctrl-C will abort immediately");
                    return;
                }
            };
            runtime.block_on(async {
                if let Ok(()) = tokio::signal::ctrl_c().await {
                    handler_flag.store(true, Ordering::SeqCst);
                    eprintln!("Interrupt received; stopping after the current iteration");
                }
            });
        });
    if let Err(err) = spawned {
        warn!(%err, "could not spawn signal thread");
    }
    flag
}

fn cmd_status(paths: &AutoloopPaths, run_id: &str) -> Result<i32> {
    validate_run_id(run_id)?;
    if !paths.ledger_path.exists() {
        bail!("unknown run {run_id}: no ledger at {}", paths.ledger_path.display());
    }
    let ledger = SqliteLedger::new(&paths.ledger_path);
    let record = ledger
        .get_run(run_id)?
        .with_context(|| format!("unknown run {run_id}"))?;
    println!("run: {}", record.run_id);
    println!("goal: {}", record.goal);
    println!("status: {}", record.status.as_str());
    match record.latest_iteration {
        Some(iteration) => println!("latest iteration: {iteration}"),
        None => println!("latest iteration: none"),
    }
    println!("updated: {}", record.updated_at.to_rfc3339());
    Ok(exit_codes::OK)
}

fn cmd_init(paths: &AutoloopPaths, force: bool) -> Result<i32> {
    let path: &Path = &paths.config_path;
    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &AutoloopConfig::default())?;
    debug!(path = %path.display(), "config written");
    println!("Wrote {}", path.display());
    Ok(exit_codes::OK)
}
