use std::path::Path;

use tracing::{info, warn};

use crate::checkpoints;
use crate::error::Result;
use crate::upload::CheckpointPublisher;
use crate::worker::PolicyTrainer;

/// Fixed-interval training plan: advance `save_interval` steps at a time
/// until at least `total_timesteps` have been trained. When the target is
/// not interval-aligned the final cycle overshoots it; there is no partial
/// interval.
#[derive(Debug, Clone, Copy)]
pub struct TrainPlan {
    pub save_interval: u64,
    pub total_timesteps: u64,
}

/// Run the train/save/publish loop, resuming from the newest checkpoint in
/// `models_dir`. Returns the final step count.
///
/// Trainer errors are fatal. Publish failures are logged and never abort
/// training; the checkpoint stays on disk either way, so a later `retry`
/// can pick it up.
pub fn run<T: PolicyTrainer>(
    plan: TrainPlan,
    models_dir: &Path,
    trainer: &mut T,
    publisher: &mut dyn CheckpointPublisher,
) -> Result<u64> {
    let mut steps_trained = match checkpoints::latest_checkpoint(models_dir)? {
        Some((step, path)) => {
            trainer.load(&path)?;
            info!(step, path = %path.display(), "resumed from checkpoint");
            step
        }
        None => {
            info!("no checkpoint found, training from scratch");
            0
        }
    };

    info!(
        start = steps_trained,
        target = plan.total_timesteps,
        interval = plan.save_interval,
        "starting training"
    );

    while steps_trained < plan.total_timesteps {
        trainer.learn(plan.save_interval)?;
        steps_trained += plan.save_interval;

        let path = checkpoints::checkpoint_path(models_dir, steps_trained);
        trainer.save(&path)?;
        info!(step = steps_trained, path = %path.display(), "checkpoint saved");

        if let Err(err) = publisher.publish(steps_trained, &path) {
            warn!(
                step = steps_trained,
                "upload failed, checkpoint kept locally: {err}"
            );
        }
    }

    info!(steps = steps_trained, "training complete");
    Ok(steps_trained)
}
