//! Several mesh codes through several stages in one invocation.
//!
//! Codes never share files, so each one runs on its own rayon worker; the
//! stages of a code run in order and the first failure stops that code.

use crate::inout::{self, InoutParams};
use crate::orography::{self, InletMode, OrographyParams};
use crate::progress::ProgressSink;
use crate::rewrite;
use crate::stages::{StageContext, StageKind, StageReport, StageTable, Workdir};
use crate::REDUCED_CODE;
use log::{error, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_codes() -> Vec<String> {
    vec!["fine".into(), "coarse".into(), REDUCED_CODE.into()]
}

fn default_stages() -> Vec<StageKind> {
    StageKind::ALL.to_vec()
}

fn default_message() -> String {
    "terrain preprocessing".into()
}

/// JSON configuration of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub run_id: String,
    pub folder: PathBuf,
    #[serde(default = "default_message")]
    pub message: String,
    #[serde(default = "default_codes")]
    pub codes: Vec<String>,
    #[serde(default = "default_stages")]
    pub stages: Vec<StageKind>,
    pub nsect: usize,
    pub reference_diameter: f64,
    pub domain_diameter: f64,
    pub iterations: usize,
    pub blend: f64,
    /// `0` flatten and smooth, `1` disabled, `2+` smooth only.
    pub inlet_mode: i64,
}

impl PipelineConfig {
    pub fn inout_params(&self) -> InoutParams {
        InoutParams {
            nsect: self.nsect,
            reference_diameter: self.reference_diameter,
        }
    }

    pub fn orography_params(&self, code: &str) -> OrographyParams {
        OrographyParams {
            iterations: self.iterations,
            blend: self.blend,
            inlet_mode: InletMode::from_code(self.inlet_mode),
            domain_diameter: self.domain_diameter,
            reference_diameter: self.reference_diameter,
            reduced: code == REDUCED_CODE,
        }
    }
}

/// What happened to one mesh code.
#[derive(Debug, Clone, Serialize)]
pub struct CodeOutcome {
    pub code: String,
    pub reports: Vec<StageReport>,
    /// The stage that failed and why, if one did.
    pub failure: Option<(StageKind, String)>,
}

impl CodeOutcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Run one stage of `ctx.code` with the parameters from `config`.
pub fn run_stage(
    ctx: &StageContext<'_>,
    kind: StageKind,
    config: &PipelineConfig,
) -> crate::Result<StageReport> {
    match kind {
        StageKind::Rough => rewrite::run(ctx),
        StageKind::Inout => inout::run(ctx, &config.inout_params()),
        StageKind::Oro => orography::run(ctx, &config.orography_params(ctx.code)),
    }
}

/// Run every configured code in parallel. Thread ids are the code positions.
pub fn run(config: &PipelineConfig, progress: &dyn ProgressSink) -> Vec<CodeOutcome> {
    let workdir = Workdir::new(&config.folder);
    let table = StageTable::new();

    info!(
        "pipeline {}: {} codes x {} stages in {}",
        config.run_id,
        config.codes.len(),
        config.stages.len(),
        workdir.files().display()
    );

    config
        .codes
        .par_iter()
        .enumerate()
        .map(|(index, code)| {
            let thread_id = index.to_string();
            let ctx = StageContext {
                run_id: &config.run_id,
                thread_id: &thread_id,
                code,
                message: &config.message,
                workdir: &workdir,
                table: &table,
                progress,
            };

            let mut outcome = CodeOutcome {
                code: code.clone(),
                reports: Vec::with_capacity(config.stages.len()),
                failure: None,
            };
            for &kind in &config.stages {
                match run_stage(&ctx, kind, config) {
                    Ok(report) => {
                        info!("{code}/{kind}: {}", report.summary);
                        outcome.reports.push(report);
                    }
                    Err(err) => {
                        error!("{code}/{kind}: {err}");
                        outcome.failure = Some((kind, err.to_string()));
                        break;
                    }
                }
            }
            outcome
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, INOUT_MESH, SMALL_MESH};
    use crate::progress::MemoryProgress;
    use std::fs;

    fn config(folder: PathBuf, codes: &[&str]) -> PipelineConfig {
        serde_json::from_value(serde_json::json!({
            "run_id": "run",
            "folder": folder,
            "codes": codes,
            "nsect": 1,
            "reference_diameter": 200.0,
            "domain_diameter": 2000.0,
            "iterations": 2,
            "blend": 0.5,
            "inlet_mode": 0,
        }))
        .unwrap()
    }

    #[test]
    fn config_defaults_to_every_stage() {
        let config = config(PathBuf::from("/tmp/x"), &["fine"]);
        assert_eq!(config.stages, StageKind::ALL.to_vec());
        assert!(config.orography_params(REDUCED_CODE).reduced);
        assert!(!config.orography_params("fine").reduced);
    }

    #[test]
    fn unknown_config_field_is_rejected() {
        let parsed: Result<PipelineConfig, _> = serde_json::from_str(
            r#"{"run_id":"r","folder":"f","nsect":1,"reference_diameter":1,
                "domain_diameter":1,"iterations":1,"blend":0.1,"inlet_mode":0,"sectors":3}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn codes_fail_independently() {
        let folder = fixtures::folder();
        let files = folder.path().join("FILES");

        fs::write(files.join("fine.msh2"), SMALL_MESH).unwrap();
        fs::write(files.join("fine_elevation.msh2"), INOUT_MESH).unwrap();
        fs::write(
            files.join("fine_roughness"),
            "1 0 0 0 0.0 0.0 0.1\n2 0 0 0 0.0 -100.0 0.5\n3 0 0 0 0.0 100.0 0.2\n",
        )
        .unwrap();
        fs::write(files.join("fine_elevation"), "0 0 10\n450 0 20\n0 600 40\n999.5 0 60\n")
            .unwrap();
        fs::write(
            files.join("fine_zsinfo"),
            "0 0 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1\n".repeat(4),
        )
        .unwrap();

        let progress = MemoryProgress::new();
        let outcomes = run(&config(folder.path().to_path_buf(), &["fine", "coarse"]), &progress);

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].succeeded(), "{:?}", outcomes[0].failure);
        assert_eq!(outcomes[0].reports.len(), 3);
        assert!(files.join("fine_rough.msh2").exists());
        assert!(files.join("propagate_param_fine").exists());

        assert_eq!(outcomes[1].code, "coarse");
        assert!(matches!(outcomes[1].failure, Some((StageKind::Rough, _))));

        let run = progress.snapshot("run");
        assert_eq!(run.threads["0"].fraction, 1.0);
        assert!(run.threads.get("1").map_or(true, |t| t.fraction < 1.0));
    }
}
