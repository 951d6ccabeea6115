use anyhow::{bail, Context, Result};
use pit_hazard::{pipeline, read_laps, ArtifactPaths, TrainConfig};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let laps_path = std::env::var("LAPS_PATH").context("LAPS_PATH not set")?;
    let out_dir = std::env::var("OUT_DIR").unwrap_or_else(|_| "artifacts".to_string());
    let cfg = match std::env::var("TRAIN_CONFIG") {
        Ok(path) => TrainConfig::load(&path)
            .with_context(|| format!("failed to load train config {}", path))?,
        Err(_) => TrainConfig::default(),
    };

    let laps = read_laps(&laps_path).with_context(|| format!("failed to read laps at {}", laps_path))?;
    tracing::info!("loaded {} lap records from {}", laps.len(), laps_path);

    let out = ArtifactPaths::new(&out_dir);
    let outcome = pipeline::run(&laps, &cfg, &out).context("training pipeline failed")?;

    match outcome.calibration {
        Some((calib, choice)) => {
            tracing::info!(
                "done: coef={:.4} intercept={:.4} threshold={:.3} P={:.3} R={:.3} F2={:.3} -> {}",
                calib.coef,
                calib.intercept,
                choice.threshold,
                choice.scores.precision,
                choice.scores.recall,
                choice.scores.f2,
                out_dir
            );
            Ok(())
        }
        None => bail!(
            "validation labels are single-class ({}); model and metrics written to {} but the artifact is not servable",
            outcome.metrics.calibration_status,
            out_dir
        ),
    }
}
