use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::{
    fs,
    path::{Path, PathBuf},
};

use terrain_prep::{
    inout::{self, InoutParams},
    orography::{self, InletMode, OrographyParams},
    pipeline::{self, PipelineConfig},
    progress::{FileProgress, LogProgress, ProgressSink},
    rewrite, StageContext, StageReport, StageTable, Workdir, REDUCED_CODE,
};

#[derive(Parser, Debug)]
#[command(name = "terrain_prep", version, about = "Terrain preprocessing stages for wind-flow meshes")]
struct Args {
    /// Directory for per-thread progress documents; progress is only logged when unset.
    #[arg(long, env = "TERRAIN_PREP_PROGRESS_DIR", global = true)]
    progress_dir: Option<PathBuf>,

    /// Exit non-zero when a stage fails instead of only logging the failure.
    #[arg(long, env = "TERRAIN_PREP_STRICT", global = true, default_value_t = false)]
    strict: bool,

    #[command(subcommand)]
    command: Command,
}

/// Positional arguments shared by every stage.
#[derive(clap::Args, Debug)]
struct Invocation {
    run_id: String,
    thread_id: String,
    /// Mesh code: fine, coarse or reduced.
    code: String,
    /// Working folder holding `FILES/`.
    folder: PathBuf,
    /// Progress message shown while the stage runs.
    message: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split the ground boundary by roughness class.
    Rough {
        #[command(flatten)]
        at: Invocation,
    },
    /// Attribute elevation and roughness to inlet/outlet boundaries.
    Inout {
        #[command(flatten)]
        at: Invocation,
        nsect: usize,
        reference_diameter: f64,
    },
    /// Smooth the ground elevation and flatten the domain edge.
    Oro {
        #[command(flatten)]
        at: Invocation,
        iterations: usize,
        blend: f64,
        /// 0 flatten and smooth, 1 disabled, 2+ smooth only.
        #[arg(allow_negative_numbers = true)]
        inlet_mode: i64,
        domain_diameter: f64,
        reference_diameter: f64,
    },
    /// Run several stages over several mesh codes from a JSON configuration.
    Pipeline {
        #[arg(long)]
        config: PathBuf,
    },
}

fn run_single<F>(at: &Invocation, sink: &dyn ProgressSink, stage: F) -> terrain_prep::Result<StageReport>
where
    F: FnOnce(&StageContext<'_>) -> terrain_prep::Result<StageReport>,
{
    let workdir = Workdir::new(&at.folder);
    let table = StageTable::new();
    let ctx = StageContext {
        run_id: &at.run_id,
        thread_id: &at.thread_id,
        code: &at.code,
        message: &at.message,
        workdir: &workdir,
        table: &table,
        progress: sink,
    };
    stage(&ctx)
}

fn run_pipeline(config_path: &Path, sink: &dyn ProgressSink, strict: bool) -> Result<()> {
    let text = fs::read_to_string(config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let config: PipelineConfig = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", config_path.display()))?;

    let outcomes = pipeline::run(&config, sink);
    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.succeeded())
        .map(|o| o.code.as_str())
        .collect();

    for outcome in &outcomes {
        info!(
            "{}: {} of {} stages done",
            outcome.code,
            outcome.reports.len(),
            config.stages.len()
        );
    }

    if !failed.is_empty() {
        error!("pipeline {}: failed codes {:?}", config.run_id, failed);
        if strict {
            bail!("{} mesh code(s) failed", failed.len());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let sink: Box<dyn ProgressSink> = match &args.progress_dir {
        Some(dir) => Box::new(FileProgress::new(dir)),
        None => Box::new(LogProgress),
    };

    let (stage, outcome) = match &args.command {
        Command::Rough { at } => ("rough", run_single(at, sink.as_ref(), rewrite::run)),
        Command::Inout {
            at,
            nsect,
            reference_diameter,
        } => {
            let params = InoutParams {
                nsect: *nsect,
                reference_diameter: *reference_diameter,
            };
            ("inout", run_single(at, sink.as_ref(), |ctx| inout::run(ctx, &params)))
        }
        Command::Oro {
            at,
            iterations,
            blend,
            inlet_mode,
            domain_diameter,
            reference_diameter,
        } => {
            let params = OrographyParams {
                iterations: *iterations,
                blend: *blend,
                inlet_mode: InletMode::from_code(*inlet_mode),
                domain_diameter: *domain_diameter,
                reference_diameter: *reference_diameter,
                reduced: at.code == REDUCED_CODE,
            };
            ("oro", run_single(at, sink.as_ref(), |ctx| orography::run(ctx, &params)))
        }
        Command::Pipeline { config } => return run_pipeline(config, sink.as_ref(), args.strict),
    };

    match outcome {
        Ok(report) => {
            info!("{stage} {}: {}", report.code, report.summary);
            Ok(())
        }
        // Supervisors watch for the completion report, so the legacy contract
        // is to log and exit cleanly.
        Err(err) if !args.strict => {
            error!("Error in {stage}: {err}");
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("{stage} stage failed")),
    }
}
