//! `repro` - offline tools around the pipeline
//!
//! - `score`: run the completeness gate over a candidate blueprint
//! - `check-config`: load and validate a pipeline configuration
//! - `check`: static conformance of a directory against a blueprint
//! - `sandbox`: run a directory's entry point in the process sandbox

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use repro_core::{
    Blueprint, CompletenessScorer, ConformanceAnalyzer, PipelineConfig, Provenance,
    SandboxConfig, SectionScorer, StaticAnalyzer, TimeoutConfig,
};
use repro_core::Sandbox as _;
use repro_sandbox::{load_codebase, ProcessSandbox};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("repro")
        .version(repro_core::VERSION)
        .about("Paper-to-codebase pipeline tools")
        .subcommand_required(true)
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print results as JSON"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Pipeline configuration (TOML or YAML)"),
        )
        .subcommand(
            Command::new("score")
                .about("Score a candidate blueprint")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Candidate blueprint file"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate a configuration and print the effective values")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Configuration file"),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Check a generated codebase against its blueprint")
                .arg(
                    Arg::new("dir")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Codebase directory"),
                )
                .arg(
                    Arg::new("blueprint")
                        .long("blueprint")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Accepted blueprint file"),
                ),
        )
        .subcommand(
            Command::new("sandbox")
                .about("Run a codebase's entry point in the process sandbox")
                .arg(
                    Arg::new("dir")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Codebase directory"),
                )
                .arg(
                    Arg::new("entry")
                        .long("entry")
                        .default_value("main.py")
                        .help("Entry point, relative to the directory"),
                ),
        )
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.with_target(false).try_init()
    };
}

fn load_config(matches: &ArgMatches) -> Result<PipelineConfig> {
    let Some(path) = matches.get_one::<PathBuf>("config") else {
        return Ok(PipelineConfig::default());
    };
    let config = PipelineConfig::from_path(path)
        .with_context(|| format!("loading configuration {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn score(matches: &ArgMatches, file: &Path) -> Result<bool> {
    let config = load_config(matches)?;
    let candidate = read(file)?;
    let report = SectionScorer::new().score(&candidate);
    let accepted = report.accepts(config.planning.acceptance_threshold);

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Score: {:.2} (threshold {:.2})", report.score, config.planning.acceptance_threshold);
        println!("Structure valid: {}", report.structure_valid);
        println!("Truncated: {}", report.truncated);
        if !report.missing_sections.is_empty() {
            println!("Missing: {}", report.missing_sections.join(", "));
        }
    }

    if accepted {
        let blueprint = Blueprint::parse(&candidate, Provenance::Gate { score: report.score, attempt: 1 })
            .context("candidate passes the gate but does not parse")?;
        if !matches.get_flag("json") {
            println!("Targets ({}):", blueprint.targets().len());
            for target in blueprint.targets() {
                println!("  {:>3}  {}", target.index, target.path);
            }
            println!("Entry point: {}", blueprint.entry_point());
        }
    }
    Ok(accepted)
}

fn check_config(file: &Path) -> Result<()> {
    let config = PipelineConfig::from_path(file)
        .with_context(|| format!("loading configuration {}", file.display()))?;
    config.validate()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn check(matches: &ArgMatches, dir: &Path, blueprint_file: &Path) -> Result<bool> {
    let blueprint = Blueprint::parse(&read(blueprint_file)?, Provenance::Gate { score: 1.0, attempt: 1 })
        .context("parsing blueprint")?;
    let codebase = load_codebase(dir).with_context(|| format!("loading {}", dir.display()))?;
    let issues = ConformanceAnalyzer::new().analyze(&codebase, &blueprint);

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&issues)?);
    } else if issues.is_empty() {
        println!("No issues in {} files", codebase.len());
    } else {
        for issue in &issues {
            println!(
                "{:?}: {}: {}",
                issue.severity,
                issue.path.as_deref().unwrap_or("-"),
                issue.message
            );
        }
    }
    Ok(issues.is_empty())
}

async fn sandbox(matches: &ArgMatches, dir: &Path, entry: &str) -> Result<bool> {
    let config = load_config(matches)?;
    let codebase = load_codebase(dir).with_context(|| format!("loading {}", dir.display()))?;
    let sandbox = sandbox_for(&config.sandbox, &config.timeouts);

    tracing::info!(files = codebase.len(), entry, "Running sandbox");
    let run = sandbox.run(&codebase, entry).await?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&run.trajectory)?);
    } else {
        print!("{}", run.trajectory.stdout);
        eprint!("{}", run.trajectory.stderr);
        println!(
            "exit: {:?}, {} ms{}",
            run.trajectory.exit_code,
            run.trajectory.duration_ms,
            if run.trajectory.timed_out { " (timed out)" } else { "" }
        );
    }
    Ok(run.success)
}

fn sandbox_for(config: &SandboxConfig, timeouts: &TimeoutConfig) -> ProcessSandbox {
    ProcessSandbox::from_config(config, timeouts.sandbox())
}

async fn dispatch(matches: &ArgMatches) -> Result<bool> {
    match matches.subcommand() {
        Some(("score", args)) => {
            let file = args.get_one::<PathBuf>("file").context("missing file")?;
            score(args, file)
        }
        Some(("check-config", args)) => {
            let file = args.get_one::<PathBuf>("file").context("missing file")?;
            check_config(file).map(|()| true)
        }
        Some(("check", args)) => {
            let dir = args.get_one::<PathBuf>("dir").context("missing dir")?;
            let blueprint = args.get_one::<PathBuf>("blueprint").context("missing blueprint")?;
            check(args, dir, blueprint)
        }
        Some(("sandbox", args)) => {
            let dir = args.get_one::<PathBuf>("dir").context("missing dir")?;
            let entry = args.get_one::<String>("entry").context("missing entry")?;
            sandbox(args, dir, entry).await
        }
        Some((other, _)) => bail!("unknown command {other}"),
        None => bail!("no command given"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("log-json"));

    match dispatch(&matches).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn global_flags_reach_subcommands() {
        let matches = cli()
            .try_get_matches_from(["repro", "score", "plan.yaml", "--json"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "score");
        assert!(args.get_flag("json"));
        assert_eq!(args.get_one::<PathBuf>("file").unwrap(), &PathBuf::from("plan.yaml"));
    }

    #[test]
    fn sandbox_entry_defaults_to_main() {
        let matches = cli()
            .try_get_matches_from(["repro", "sandbox", "out"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(args.get_one::<String>("entry").unwrap(), "main.py");
    }

    #[test]
    fn missing_config_uses_defaults() {
        let matches = cli()
            .try_get_matches_from(["repro", "sandbox", "out"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(load_config(args).unwrap(), PipelineConfig::default());
    }
}
