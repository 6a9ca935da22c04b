use clap::{Parser, Subcommand};
use harness::{
    analyze_execution, parse_plan_response, DefaultPlanner, DependencyChecker, EngineConfig,
    ProgressStore, SafetyValidator, StatusAnalyzer, TestEngine, TestPlanner,
};
use model::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "harness")]
#[command(about = "Run host diagnostic test plans under time and safety bounds")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a test plan and report the results
    Run {
        /// Test plan JSON file
        #[arg(short, long)]
        plan: PathBuf,
        /// Treat the plan file as a raw planner reply (fenced or partial JSON)
        #[arg(long)]
        raw: bool,
        /// Engine configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Write the execution result JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Run commands without the safety screen
        #[arg(long)]
        no_safety: bool,
    },
    /// Print the built-in diagnostics plan for this host
    DefaultPlan {
        /// Write the plan JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a command against the safety deny-list
    Validate {
        /// Command text
        command: String,
    },
    /// Report whether executables resolve on the search path
    CheckDeps {
        /// Executable names
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            plan,
            raw,
            config,
            output,
            no_safety,
        } => {
            let mut config = match config {
                Some(path) => EngineConfig::load(&path)?,
                None => EngineConfig::default(),
            };
            if no_safety {
                config = config.with_enforce_safety(false);
            }
            run_plan(&plan, raw, &config, output.as_deref()).await?;
        }
        Commands::DefaultPlan { output } => {
            let plan = DefaultPlanner::new()
                .generate_plan(&SystemInfo::basic())
                .await?;
            write_json(&plan, output.as_deref())?;
        }
        Commands::Validate { command } => {
            let verdict = harness::validate(&command);
            if verdict.valid {
                println!("✓ {}", verdict.reason);
            } else {
                println!("✗ {}", verdict.reason);
                std::process::exit(1);
            }
        }
        Commands::CheckDeps { names } => {
            check_deps(&names).await;
        }
    }

    Ok(())
}

async fn run_plan(
    plan_path: &Path,
    raw: bool,
    config: &EngineConfig,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(plan_path)?;
    let plan: TestPlan = if raw {
        parse_plan_response(&text, &SystemInfo::basic(), config)?
    } else {
        serde_json::from_str(&text)?
    };

    for rejected in SafetyValidator::new().validate_plan(&plan) {
        warn!(
            "Item {} fails the safety screen: {}",
            rejected.test_item_id, rejected.reason
        );
    }

    info!(
        "Running plan {} with {} items (safety {})",
        plan.id,
        plan.test_items.len(),
        if config.enforce_safety { "enforced" } else { "off" }
    );

    let engine = TestEngine::new(config).with_progress(ProgressStore::new());
    let execution = engine.execute(&plan).await?;
    let execution = analyze_execution(&StatusAnalyzer::new(), execution).await;

    print_summary(&execution);
    write_json(&execution, output)?;

    Ok(())
}

fn print_summary(execution: &TestExecutionResult) {
    eprintln!("\n--- Execution {} ---", execution.execution_id);
    for result in &execution.test_results {
        let marker = match result.status {
            TestStatus::Completed => "✓",
            TestStatus::Failed => "✗",
            _ => "-",
        };
        eprintln!(
            "  {} {:<28} {:<9} {:>7.2}s  exit={}",
            marker,
            result.test_item_id,
            result.status.to_string(),
            result.duration,
            result
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    eprintln!(
        "Total: {}  Passed: {}  Failed: {}  Skipped: {}  ({:.2}s)",
        execution.total_tests,
        execution.passed_tests,
        execution.failed_tests,
        execution.skipped_tests,
        execution.execution_time
    );
    if let Some(summary) = &execution.overall_summary {
        eprintln!("{}", summary);
    }
}

fn write_json<T: serde::Serialize>(
    value: &T,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            info!("Wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn check_deps(names: &[String]) {
    let checker = DependencyChecker::new();
    for name in names {
        if checker.command_exists(name).await {
            println!("✓ {}", name);
        } else {
            println!("✗ {} not found", name);
        }
    }
}
