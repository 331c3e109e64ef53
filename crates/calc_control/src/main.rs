use anyhow::{bail, Context};
use calc_control::{
    archive, infer_status, request_stop, solver_log, FsMarkers, MarkerSource, Stage,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "calc_control", version, about = "Status, stop and archive of calculation jobs")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the inferred job status and solver log summaries as JSON.
    Status { workdir: PathBuf },
    /// Ask the running solver to write its state and stop.
    Stop { workdir: PathBuf },
    /// Zip the job's status files.
    Archive {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Text,
}

/// Settings that come from the environment rather than the command line.
#[derive(Debug, Clone)]
struct Config {
    log_format: LogFormat,
}

impl Config {
    fn from_env() -> anyhow::Result<Self> {
        let log_format = match std::env::var("CALC_CONTROL_LOG_FORMAT")
            .unwrap_or_else(|_| "json".into())
            .as_str()
        {
            "json" => LogFormat::Json,
            "text" => LogFormat::Text,
            other => bail!("Failed to parse CALC_CONTROL_LOG_FORMAT: `{other}` is not json or text"),
        };
        Ok(Self { log_format })
    }
}

fn status(workdir: PathBuf) -> anyhow::Result<()> {
    let markers = FsMarkers::new(&workdir)?;
    let status = infer_status(&markers.markers()?);

    let mut logs = serde_json::Map::new();
    for stage in Stage::ALL {
        let summary = solver_log::inspect_stage(&workdir.join(stage.dir_name()))?;
        logs.insert(stage.to_string(), json!(summary));
    }

    let report = json!({
        "workdir": workdir,
        "status": status,
        "active_stage": status.active_stage(),
        "logs": logs,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let subscriber = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }

    let args = Args::parse();
    tracing::debug!(config = ?config, command = ?args.command, "starting");

    match args.command {
        Command::Status { workdir } => status(workdir),
        Command::Stop { workdir } => {
            let outcome = request_stop(&workdir)
                .with_context(|| format!("stopping calculation in {}", workdir.display()))?;
            tracing::info!(
                stage = %outcome.stage,
                control_file = %outcome.control_file.display(),
                "calculation will stop at its next write"
            );
            Ok(())
        }
        Command::Archive { input, output } => {
            let summary = archive::write_archive(&input, &output)
                .with_context(|| format!("packaging calculation status of {}", input.display()))?;
            tracing::info!(
                output = %summary.output.display(),
                files = summary.files,
                missing_logs = summary.missing_logs.len(),
                "status archive written"
            );
            Ok(())
        }
    }
}
