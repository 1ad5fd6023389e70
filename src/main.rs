//! Pipeflow CLI Entry Point
//!
//! Provides command-line interface for pipeline execution.
//!
//! # Usage
//!
//! ```bash
//! # Run the ingest pipeline against ./pipeflow-data
//! pipeflow pipelines/file_ingest.yaml --context '{"sourceBucket":"a","destBucket":"b","key":"f.json"}'
//!
//! # Read the initial context from a file and keep the outcome
//! pipeflow pipelines/file_ingest.yaml --input run.json --outcome out/outcome.json
//!
//! # Only validate and print the plan
//! pipeflow pipelines/file_ingest.yaml --dry-run
//!
//! # Restrict access and shorten the budget
//! pipeflow pipelines/file_ingest.yaml --input run.json --grant a --grant b --grant table:StepfnExample --timeout 30
//! ```

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use log::{error, info};
use serde_json::Value;

use pipeflow::adapter::{AccessPolicy, FsObjectStore, FsTable, ServiceAdapter, StepAdapter};
use pipeflow::execution::outcome::RunReport;
use pipeflow::execution::{Engine, RunOutcome};
use pipeflow::workflow::validator::quick_validate;
use pipeflow::workflow::{load_workflow, Pipeline, Step, Workflow};
use pipeflow::{APP_NAME, VERSION};

/// Default directory holding object containers and table files.
const DEFAULT_STORE_DIR: &str = "pipeflow-data";

/// Table declared when no `--table` option is given.
const DEFAULT_TABLE: (&str, &str) = ("StepfnExample", "id");

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    workflow_path: Option<String>,
    input_path: Option<String>,
    context_json: Option<String>,
    store_dir: PathBuf,
    tables: Vec<(String, String)>,
    timeout: Option<Duration>,
    grants: Vec<String>,
    outcome_path: Option<PathBuf>,
    dry_run: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workflow_path: None,
            input_path: None,
            context_json: None,
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            tables: Vec::new(),
            timeout: None,
            grants: Vec::new(),
            outcome_path: None,
            dry_run: false,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Declarative Pipeline Interpreter");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: pipeflow [OPTIONS] <WORKFLOW_FILE>");
    println!();
    println!("Arguments:");
    println!("  <WORKFLOW_FILE>     Path to workflow YAML or JSON file");
    println!();
    println!("Options:");
    println!("  --input FILE        Read the initial context from a JSON file");
    println!("  --context JSON      Initial context as inline JSON (default: {{}})");
    println!("  --store-dir DIR     Root for containers and tables (default: {})", DEFAULT_STORE_DIR);
    println!(
        "  --table NAME=KEY    Declare a table and its partition key (default: {}={})",
        DEFAULT_TABLE.0, DEFAULT_TABLE.1
    );
    println!("  --timeout SECS      Run budget, overriding the workflow's timeout_secs");
    println!("  --grant NAME        Grant access (repeatable); without grants access is unrestricted");
    println!("                        NAME        read/write on container NAME");
    println!("                        read:NAME   read-only on container NAME");
    println!("                        table:NAME  writes to table NAME");
    println!("  --outcome FILE      Write the run report as JSON");
    println!("  --dry-run           Validate and print the plan without executing");
    println!("  --verbose           Enable debug logging and the timeline chart");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  pipeflow pipelines/file_ingest.yaml --input run.json");
    println!("  pipeflow pipelines/file_ingest.yaml --dry-run");
    println!("  pipeflow pipelines/file_ingest.yaml --input run.json --grant a --grant b --timeout 30");
}

/// Returns the value following an option, advancing the cursor.
fn option_value<'a>(args: &'a [String], i: &mut usize, option: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires an argument", option))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => {
                config.dry_run = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--input" => {
                config.input_path = Some(option_value(args, &mut i, "--input")?.to_string());
            }
            "--context" => {
                config.context_json = Some(option_value(args, &mut i, "--context")?.to_string());
            }
            "--store-dir" => {
                config.store_dir = PathBuf::from(option_value(args, &mut i, "--store-dir")?);
            }
            "--table" => {
                let value = option_value(args, &mut i, "--table")?;
                let (name, key) = value
                    .split_once('=')
                    .filter(|(n, k)| !n.is_empty() && !k.is_empty())
                    .ok_or_else(|| format!("Invalid table declaration: {} (expected NAME=KEY)", value))?;
                config.tables.push((name.to_string(), key.to_string()));
            }
            "--timeout" => {
                let value = option_value(args, &mut i, "--timeout")?;
                let secs: u64 = value
                    .parse()
                    .map_err(|_| format!("Invalid timeout value: {}", value))?;
                if secs == 0 {
                    return Err("--timeout must be greater than zero".to_string());
                }
                config.timeout = Some(Duration::from_secs(secs));
            }
            "--grant" => {
                config.grants.push(option_value(args, &mut i, "--grant")?.to_string());
            }
            "--outcome" => {
                config.outcome_path = Some(PathBuf::from(option_value(args, &mut i, "--outcome")?));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.workflow_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.workflow_path = Some(arg.clone());
            }
        }
        i += 1;
    }

    if config.input_path.is_some() && config.context_json.is_some() {
        return Err("--input and --context cannot be used together".to_string());
    }

    Ok(config)
}

/// Builds the access policy from `--grant` values.
fn build_policy(grants: &[String]) -> AccessPolicy {
    if grants.is_empty() {
        return AccessPolicy::allow_all();
    }

    grants.iter().fold(AccessPolicy::new(), |policy, grant| {
        if let Some(table) = grant.strip_prefix("table:") {
            policy.grant_table_write(table)
        } else if let Some(container) = grant.strip_prefix("read:") {
            policy.grant_read(container)
        } else {
            policy.grant_read_write(grant.as_str())
        }
    })
}

/// Reads the initial context from `--input` or `--context`.
fn load_context(config: &Config) -> Result<Value, Box<dyn std::error::Error>> {
    let text = match (&config.input_path, &config.context_json) {
        (Some(path), _) => fs::read_to_string(path)
            .map_err(|e| format!("Could not read input file '{}': {}", path, e))?,
        (None, Some(json)) => json.clone(),
        (None, None) => return Ok(Value::Object(Default::default())),
    };

    let context = serde_json::from_str(&text).map_err(|e| format!("Initial context is not valid JSON: {}", e))?;
    Ok(context)
}

/// Prints one line per step, indenting map iterators.
fn print_plan(pipeline: &Pipeline, depth: usize) {
    for (index, step) in pipeline.steps.iter().enumerate() {
        let indent = "  ".repeat(depth + 1);
        let detail = match step {
            Step::Pass(_) => String::new(),
            Step::Task(task) => format!(" -> {}", task.adapter),
            Step::Map(map) => format!(
                " over {} (max concurrency: {})",
                map.items_path,
                map.max_concurrency
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unbounded".to_string())
            ),
        };
        println!(
            "{}{}. {} [{}]{}  => {}",
            indent,
            index,
            step.name().bold(),
            step.kind(),
            detail,
            step.result_path()
        );
        if let Step::Map(map) = step {
            print_plan(&map.iterator, depth + 1);
        }
    }
}

/// Prints the colored run summary.
fn print_summary(report: &RunReport) {
    println!();
    match &report.outcome {
        RunOutcome::Completed { .. } => {
            println!("{} Workflow '{}' completed", "✓".green().bold(), report.workflow);
        }
        RunOutcome::Failed {
            step_index,
            step_name,
            error,
            ..
        } => {
            println!(
                "{} Workflow '{}' failed at step {} ({})",
                "✗".red().bold(),
                report.workflow,
                step_index,
                step_name.bold()
            );
            println!("  {} {}", error.kind().red(), error);
        }
        RunOutcome::TimedOut {
            step_index,
            step_name,
            budget,
            ..
        } => {
            println!(
                "{} Workflow '{}' timed out after {}s during step {} ({})",
                "⏱".yellow().bold(),
                report.workflow,
                budget.as_secs(),
                step_index,
                step_name.bold()
            );
        }
    }
    println!("  Elapsed: {} ms", report.elapsed_ms);
}

/// Validates the workflow against the adapter and prints the plan.
fn dry_run(workflow: &Workflow, adapter: &ServiceAdapter, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    let operations = adapter.operations();
    let known: Vec<&str> = operations.iter().map(String::as_str).collect();

    let problems = quick_validate(workflow, &known);
    if !problems.is_empty() {
        for problem in &problems {
            error!("{}", problem);
        }
        return Err(format!("Workflow '{}' has {} problem(s)", workflow.name, problems.len()).into());
    }

    println!("Plan for '{}':", workflow.name.bold());
    print_plan(&workflow.steps, 0);
    println!();
    match engine.budget_for(workflow) {
        Some(budget) => println!("Budget: {}s", budget.as_secs()),
        None => println!("Budget: none"),
    }
    println!("{} Workflow is valid", "✓".green().bold());
    Ok(())
}

/// Main application entry point. Returns whether the run completed.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    let Some(workflow_path) = config.workflow_path.clone() else {
        print_usage();
        return Err("No workflow file given".into());
    };

    setup_logging(config.verbose);
    print_banner();

    // Load workflow
    let workflow = load_workflow(&workflow_path).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        format!("Could not load workflow from '{}': {}", workflow_path, e)
    })?;

    // Wire collaborators
    let tables = if config.tables.is_empty() {
        vec![(DEFAULT_TABLE.0.to_string(), DEFAULT_TABLE.1.to_string())]
    } else {
        config.tables.clone()
    };
    let table = tables
        .iter()
        .fold(FsTable::new(config.store_dir.join("tables")), |table, (name, key)| {
            table.with_table(name.as_str(), key.as_str())
        });
    let store = FsObjectStore::new(config.store_dir.join("objects"));
    info!("Object store: {}", store.root().display());

    let policy = build_policy(&config.grants);
    if !policy.is_unrestricted() {
        info!("Access restricted to {} grant(s)", config.grants.len());
    }
    let adapter = Arc::new(ServiceAdapter::new(Arc::new(store), Arc::new(table)).with_policy(policy));

    let mut engine = Engine::new(adapter.clone());
    if let Some(timeout) = config.timeout {
        engine.set_timeout(timeout);
    }

    if config.dry_run {
        info!("Mode: DRY RUN (steps will not execute)");
        dry_run(&workflow, &adapter, &engine)?;
        return Ok(true);
    }

    let context = load_context(&config)?;

    // Execute workflow
    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(engine.execute(&workflow, context));

    print_summary(&report);
    if config.verbose {
        println!("{}", report.timeline.gantt_chart());
    }

    if let Some(path) = &config.outcome_path {
        report
            .save(path)
            .map_err(|e| format!("Could not write outcome to '{}': {}", path.display(), e))?;
        info!("Outcome written to: {}", path.display());
    } else {
        println!();
        println!("{}", serde_json::to_string_pretty(report.outcome.context())?);
    }

    Ok(report.outcome.is_completed())
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
