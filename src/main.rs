use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use colored::*;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use trainaudit::logging::{init_logging, LogConfig, LogFormat};
use trainaudit::upstream::{PayloadSource, UpstreamPayload};
use trainaudit::{render, AuditConfig, AuditError, AuditPipeline, AuditRequest, DateWindow, PriorSnapshot};

/// TrainAudit - Training Data Audit CLI
///
/// Validates a window of training records and derives load, recovery and
/// performance metrics only when the data passes every integrity gate.
#[derive(Parser)]
#[command(name = "trainaudit")]
#[command(author = "TrainAudit Contributors")]
#[command(version)]
#[command(about = "Training data audit and metrics CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format (pretty, json, compact)
    #[arg(long, default_value = "pretty", global = true)]
    log_format: LogFormat,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit one date window from an upstream payload
    Run {
        /// Upstream payload (JSON)
        #[arg(short, long)]
        payload: PathBuf,

        /// Window start (YYYY-MM-DD)
        #[arg(short, long)]
        start: NaiveDate,

        /// Window end (YYYY-MM-DD)
        #[arg(short, long)]
        end: NaiveDate,

        /// Day treated as in progress (default: local date)
        #[arg(long)]
        today: Option<NaiveDate>,

        /// Athlete id (default: payload profile id)
        #[arg(short, long)]
        athlete: Option<String>,

        /// Metric snapshot of the previous window (JSON)
        #[arg(long)]
        prior: Option<PathBuf>,

        /// Write the result object here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the rendered text summary
        #[arg(long)]
        summary: bool,

        /// Write the rendered text summary to this file
        #[arg(long, value_name = "FILE")]
        summary_file: Option<PathBuf>,
    },

    /// Manage the rule table
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default rule table
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the active rule table
    Show,
    /// Validate the rule table and print its fingerprint
    Validate,
}

fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig {
        format: cli.log_format,
        file_path: cli.log_file.clone(),
        ..LogConfig::from_verbosity(cli.verbose)
    };
    if let Err(err) = init_logging(&log_config) {
        eprintln!("{} {:#}", "Logging disabled:".yellow(), err);
    }

    match execute(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let message = match err.downcast_ref::<AuditError>() {
                Some(audit) => audit.user_message(),
                None => format!("{:#}", err),
            };
            eprintln!("{} {}", "Error:".red().bold(), message);
            std::process::exit(1);
        }
    }
}

fn execute(cli: Cli) -> Result<i32> {
    let config_path = cli.config.clone().unwrap_or_else(AuditConfig::default_config_path);

    match cli.command {
        Commands::Run {
            payload,
            start,
            end,
            today,
            athlete,
            prior,
            output,
            summary,
            summary_file,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let window = DateWindow::new(start, end)
                .with_context(|| format!("window start {} is after end {}", start, end))?;
            let today = today.unwrap_or_else(|| Local::now().date_naive());

            let content = fs::read_to_string(&payload)
                .with_context(|| format!("Failed to read payload: {}", payload.display()))?;
            let payload: UpstreamPayload =
                serde_json::from_str(&content).with_context(|| "Failed to parse upstream payload")?;
            let athlete = athlete
                .or_else(|| payload.profile.id.clone())
                .unwrap_or_else(|| "unknown".to_string());
            let prior = match prior {
                Some(path) => {
                    let content = fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read prior snapshot: {}", path.display()))?;
                    serde_json::from_str(&content).with_context(|| "Failed to parse prior snapshot")?
                }
                None => PriorSnapshot::default(),
            };

            let pipeline = AuditPipeline::new(config)?;
            let request = AuditRequest::new(athlete, window, today);
            let mut source = PayloadSource::new(payload);
            let result = pipeline.run(&request, &mut source, &prior)?;

            let json = result.to_json()?;
            match &output {
                Some(path) => {
                    write_once(path, &json)?;
                    eprintln!("{} {}", "Result written to".green(), path.display());
                }
                None => println!("{}", json),
            }

            if !result.audit_final {
                let reason = result
                    .halt
                    .as_ref()
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "not final".to_string());
                eprintln!("{} {}", "✗ Audit halted:".red().bold(), reason);
                return Ok(2);
            }

            if summary || summary_file.is_some() {
                let text = render::summary(&result)?;
                if let Some(path) = &summary_file {
                    write_once(path, &text)?;
                }
                if summary {
                    println!("{}", text);
                }
            }
            eprintln!("{}", "✓ Audit final".green().bold());
            Ok(0)
        }

        Commands::Config { action } => match action {
            ConfigAction::Init { force } => {
                if config_path.exists() && !force {
                    bail!("{} already exists (use --force to overwrite)", config_path.display());
                }
                AuditConfig::default().save_to_file(&config_path)?;
                println!("{} {}", "✓ Wrote".green(), config_path.display());
                Ok(0)
            }
            ConfigAction::Show => {
                let config = load_config(cli.config.as_deref())?;
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(0)
            }
            ConfigAction::Validate => {
                let config = load_config(cli.config.as_deref())?;
                config.validate()?;
                println!("{} version {}", "✓ Valid".green(), config.version);
                println!("  fingerprint {}", config.fingerprint()?);
                Ok(0)
            }
        },
    }
}

/// Explicit path must load; the default path falls back to built-ins
fn load_config(path: Option<&Path>) -> Result<AuditConfig> {
    match path {
        Some(path) => AuditConfig::load_from_file(path),
        None => Ok(AuditConfig::load_or_default()),
    }
}

/// Run artifacts are never overwritten
fn write_once(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("Refusing to overwrite or unable to create {}", path.display()))?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
