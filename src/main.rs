use aggregated_logging::config::PRESET_NAMES;
use aggregated_logging::logging::{init_logging, LoggingConfig, RecordFormatter};
use aggregated_logging::{AggregationConfig, LogLevel, LogRecord, LogSink, RealtimeAggregatingHandler, WriterSink};
use anyhow::Context;
use clap::{Parser, Subcommand};
use lazy_static::lazy_static;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

lazy_static! {
    static ref LINE_PATTERN: Regex =
        Regex::new(r"^\s*(DEBUG|INFO|WARNING|WARN|ERROR|CRITICAL)\s+([^\s:]+):\s?(.*)$").unwrap();
}

#[derive(Parser)]
#[command(name = "logagg")]
#[command(about = "Aggregate, expand and summarize application log output")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a text log through the aggregating handler
    Replay {
        /// Log file with lines like `INFO app.io: message`
        #[arg(short, long)]
        input: PathBuf,

        /// Named configuration preset
        #[arg(short, long)]
        preset: Option<String>,

        /// TOML configuration file (takes precedence over --preset)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print pipeline statistics as JSON afterwards
        #[arg(long)]
        stats: bool,
    },

    /// Print preset configurations as TOML
    Presets {
        /// Only this preset
        #[arg(short, long)]
        name: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let logging = LoggingConfig {
        global_level: level.to_string(),
        aggregation_level: level.to_string(),
        operations_level: level.to_string(),
        ..LoggingConfig::default()
    };
    let _guard = init_logging(&logging).context("failed to initialize diagnostics")?;

    match cli.command {
        Commands::Replay { input, preset, config, stats } => handle_replay(input, preset, config, stats),
        Commands::Presets { name } => handle_presets(name),
    }
}

/// Record for one text line; unrecognized lines become INFO on `replay`
fn parse_line(line: &str) -> LogRecord {
    match LINE_PATTERN.captures(line) {
        Some(caps) => {
            let level = LogLevel::parse(&caps[1]).unwrap_or(LogLevel::Info);
            LogRecord::new(level, &caps[2], &caps[3])
        }
        None => LogRecord::new(LogLevel::Info, "replay", line),
    }
}

fn handle_replay(input: PathBuf, preset: Option<String>, config: Option<PathBuf>, stats: bool) -> anyhow::Result<()> {
    let config = match (config, preset) {
        (Some(path), _) => AggregationConfig::load(&path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        (None, Some(name)) => AggregationConfig::preset(&name)?,
        (None, None) => AggregationConfig::default(),
    };

    let file = File::open(&input).with_context(|| format!("failed to open {}", input.display()))?;
    let sink: Arc<dyn LogSink> = Arc::new(WriterSink::with_formatter(
        std::io::stdout(),
        RecordFormatter::new().with_timestamps(false),
    ));
    let handler = RealtimeAggregatingHandler::new(sink, config)?;

    let mut lines = 0usize;
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("failed to read {}", input.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        handler.emit(&parse_line(&line));
        lines += 1;
    }
    handler.close()?;
    tracing::info!(lines, input = %input.display(), "Replay finished");

    if stats {
        println!("{}", serde_json::to_string_pretty(&handler.get_statistics())?);
    }
    Ok(())
}

fn handle_presets(name: Option<String>) -> anyhow::Result<()> {
    match name {
        Some(name) => {
            print!("{}", AggregationConfig::preset(&name)?.to_toml_string()?);
        }
        None => {
            for name in PRESET_NAMES {
                println!("# {name}");
                println!("{}", AggregationConfig::preset(name)?.to_toml_string()?);
            }
        }
    }
    Ok(())
}
