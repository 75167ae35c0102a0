//! guidewalk CLI
//!
//! Drives guide sections against a JSON page fixture without a browser.
//!
//! Usage from workspace root:
//!   cargo run --bin guidewalk -- validate guides/intro.json
//!   cargo run --bin guidewalk -- check --page page.json guides/intro.json
//!   cargo run --bin guidewalk -- run --page page.json --fast guides/intro.json

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use guidewalk::{
    GuideEngine, JsonFileCompletionStore, PageEngine, SectionRunOutcome, StepState, StepStatus,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod fixtures;
mod section_validator;

#[derive(Parser)]
#[command(name = "guidewalk")]
#[command(about = "Check, validate and run interactive guide sections")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG wins when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Page fixture (JSON) the guide runs against
    #[arg(long, short = 'p')]
    page: PathBuf,

    /// Environment snapshot (JSON). Defaults to an empty environment.
    #[arg(long, short = 'e', env = "GUIDEWALK_ENV")]
    env: Option<PathBuf>,

    /// Engine configuration (JSON)
    #[arg(long, conflicts_with = "fast")]
    config: Option<PathBuf>,

    /// Use short delays and timeouts
    #[arg(long)]
    fast: bool,

    /// Print machine-readable JSON instead of text
    #[arg(long)]
    json: bool,

    /// Guide file with one or more sections
    guide: PathBuf,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    engine: EngineArgs,

    /// Persist completed steps to this file
    #[arg(long, env = "GUIDEWALK_STORE")]
    store: Option<PathBuf>,

    /// Only run the section with this id
    #[arg(long, short = 's')]
    section: Option<String>,

    /// Keep running later sections after one halts
    #[arg(long)]
    no_stop_on_halt: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Statically validate guide files
    Validate {
        #[arg(required = true)]
        guides: Vec<PathBuf>,
    },
    /// Evaluate every step's requirements and print its state
    Check(EngineArgs),
    /// Execute sections step by step
    Run(RunArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Validate { guides } => validate_guides(&guides),
        Commands::Check(args) => check_guide(&args).await,
        Commands::Run(args) => run_guide(&args).await,
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            std::process::exit(2);
        }
    }
}

fn init_logging(verbosity: u8) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn validate_guides(paths: &[PathBuf]) -> Result<bool> {
    let mut all_valid = true;
    for path in paths {
        let guide = fixtures::read_guide(path)?;
        let result = section_validator::validate(&guide.sections);
        result.print(&path.display().to_string());
        all_valid &= result.is_valid();
    }
    Ok(all_valid)
}

struct Loaded {
    engine: GuideEngine,
    guide: fixtures::Guide,
}

fn load(args: &EngineArgs, store: Option<&PathBuf>) -> Result<Loaded> {
    let guide = fixtures::read_guide(&args.guide)?;
    let page = fixtures::read_page(&args.page)?;
    let environment = fixtures::read_environment(args.env.as_deref())?;
    let config = fixtures::read_config(args.config.as_deref(), args.fast)?;

    let mut builder = GuideEngine::builder()
        .page(Arc::new(page))
        .environment(Arc::new(environment))
        .config(config);
    if let Some(path) = store {
        let store = JsonFileCompletionStore::open(path)
            .with_context(|| format!("Failed to open completion store {}", path.display()))?;
        builder = builder.store(Arc::new(store));
    }
    let engine = builder.build()?;

    for section in &guide.sections {
        engine
            .mount_section(&guide.content_key, section)
            .with_context(|| format!("Failed to mount section {}", section.id))?;
    }
    Ok(Loaded { engine, guide })
}

async fn check_guide(args: &EngineArgs) -> Result<bool> {
    let Loaded { engine, guide } = load(args, None)?;
    let states = engine.check_all().await?;

    if args.json {
        let report: Vec<_> = states
            .iter()
            .map(|(step_id, state)| serde_json::json!({ "step_id": step_id, "state": state }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for section in &guide.sections {
            println!("{}", format!("Section {}", section.id).bold());
            for (step_id, state) in states
                .iter()
                .filter(|(id, _)| section.step(id).is_some())
            {
                print_step(step_id, state);
            }
        }
    }
    Ok(true)
}

fn print_step(step_id: &str, state: &StepState) {
    let status = match state.status() {
        StepStatus::Completed => "completed".green(),
        StepStatus::Skipped => "skipped".cyan(),
        StepStatus::Enabled => "ready".green().bold(),
        StepStatus::Checking => "checking".yellow(),
        StepStatus::Blocked => "blocked".red(),
    };
    print!("  {status:<10} {step_id}");
    if let Some(explanation) = &state.explanation {
        print!("  {}", explanation.dimmed());
    }
    if let Some(fix) = state.fix_type.as_ref().filter(|_| state.can_fix_requirement) {
        print!("  {}", format!("(fix: {fix:?})").yellow());
    }
    println!();
}

async fn run_guide(args: &RunArgs) -> Result<bool> {
    let Loaded { engine, guide } = load(&args.engine, args.store.as_ref())?;

    let sections: Vec<_> = match &args.section {
        Some(id) => {
            let Some(section) = guide.sections.iter().find(|s| &s.id == id) else {
                bail!("No section '{id}' in {}", args.engine.guide.display());
            };
            vec![section]
        }
        None => guide.sections.iter().collect(),
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the current section");
            on_interrupt.cancel();
        }
    });

    engine.start_observation();
    let mut all_completed = true;
    let mut outcomes = Vec::new();
    for section in sections {
        info!("Running section {}", section.id);
        let outcome = engine.run_section(section, &cancel).await?;
        let completed = matches!(outcome, SectionRunOutcome::Completed { .. });
        all_completed &= completed;

        if !args.engine.json {
            print_outcome(&section.id, &outcome);
        }
        let stop = matches!(outcome, SectionRunOutcome::Cancelled { .. })
            || (!completed && !args.no_stop_on_halt);
        outcomes.push(serde_json::json!({ "section_id": section.id, "result": outcome }));
        if stop {
            break;
        }
    }
    engine.stop_observation();

    if args.engine.json {
        let report = serde_json::json!({
            "outcomes": outcomes,
            "final_path": engine.page().current_path(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Final path: {}", engine.page().current_path());
    }
    Ok(all_completed)
}

fn print_outcome(section_id: &str, outcome: &SectionRunOutcome) {
    match outcome {
        SectionRunOutcome::Completed {
            steps_completed,
            steps_skipped,
        } => println!(
            "{} {section_id}: {steps_completed} step(s) completed, {steps_skipped} skipped",
            "✔".green()
        ),
        SectionRunOutcome::Halted {
            index,
            step_id,
            reason,
        } => println!(
            "{} {section_id}: halted at step {} ({}): {reason}",
            "✘".red(),
            index + 1,
            step_id.as_deref().unwrap_or("section requirements")
        ),
        SectionRunOutcome::Paused { index, step_id } => println!(
            "{} {section_id}: waiting for the user at step {} ({step_id})",
            "…".yellow(),
            index + 1
        ),
        SectionRunOutcome::Cancelled { index } => println!(
            "{} {section_id}: cancelled at step {}",
            "■".yellow(),
            index + 1
        ),
    }
}
