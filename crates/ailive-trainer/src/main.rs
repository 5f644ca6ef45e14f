use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ailive_trainer::Result;
use ailive_trainer::checkpoints::{self, UploadState};
use ailive_trainer::config::{self, TrainerConfig};
use ailive_trainer::driver::{self, TrainPlan};
use ailive_trainer::session::{self, SessionPaths};
use ailive_trainer::upload::{
    self, CheckpointPublisher, NullPublisher, RemotePublisher, UploadClient,
};
use ailive_trainer::worker::WorkerTrainer;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Train the skill policy, checkpointing and uploading at each interval
    Run {
        /// Path to a trainer config TOML (default: ailive.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show the latest local checkpoint and any pending uploads
    Status {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Re-attempt uploads that failed during training
    Retry {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Max number of queue entries to attempt (0 = all)
        #[arg(long, default_value_t = 0)]
        max: usize,
    },
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Run { config } => cmd_run(load_config(config)?),
        Command::Status { config } => cmd_status(load_config(config)?),
        Command::Retry { config, max } => cmd_retry(load_config(config)?, max),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<TrainerConfig> {
    match path {
        Some(p) => config::load(&p),
        None => config::load_default(),
    }
}

fn queue_path(cfg: &TrainerConfig, paths: &SessionPaths) -> PathBuf {
    match cfg
        .upload
        .queue_file
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(p) => PathBuf::from(p),
        None => paths.root.join(checkpoints::QUEUE_FILE),
    }
}

fn cmd_run(cfg: TrainerConfig) -> Result<()> {
    let key = cfg.credential.resolve()?;
    let paths = session::init_dirs(&cfg.session.root_dir, &key)?;
    info!(
        agent = key.agent(),
        skill = key.skill(),
        tensorboard = %paths.tensorboard_dir.display(),
        "session ready"
    );
    if cfg.training.render {
        warn!("rendering is enabled, training will be slower");
    }

    let mut trainer = WorkerTrainer::spawn(&cfg.worker, &cfg.training, &paths, &key)?;

    let mut publisher: Box<dyn CheckpointPublisher> = if cfg.upload.enabled {
        let client = UploadClient::new(&cfg.upload)?;
        Box::new(RemotePublisher::new(
            client,
            key.clone(),
            queue_path(&cfg, &paths),
        ))
    } else {
        Box::new(NullPublisher)
    };

    let plan = TrainPlan {
        save_interval: cfg.training.save_interval,
        total_timesteps: cfg.training.total_timesteps,
    };
    driver::run(plan, &paths.models_dir, &mut trainer, publisher.as_mut())?;
    Ok(())
}

fn cmd_status(cfg: TrainerConfig) -> Result<()> {
    let key = cfg.credential.resolve()?;
    let paths = session::resolve(&cfg.session.root_dir, &key)?;

    match checkpoints::latest_checkpoint(&paths.models_dir)? {
        Some((step, path)) => println!("latest checkpoint: {} (step {step})", path.display()),
        None => println!("no checkpoint under {}", paths.models_dir.display()),
    }

    let q = checkpoints::load_queue(&queue_path(&cfg, &paths))?;
    let pending: Vec<_> = q
        .entries
        .iter()
        .filter(|e| !matches!(e.state, UploadState::Uploaded))
        .collect();
    if pending.is_empty() {
        println!("no pending uploads");
    } else {
        println!("pending uploads:");
        for e in pending {
            println!(
                "  step {:>10}  attempts {:>2}  {}",
                e.step,
                e.attempts,
                e.last_error.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

fn cmd_retry(cfg: TrainerConfig, max: usize) -> Result<()> {
    let key = cfg.credential.resolve()?;
    let paths = session::resolve(&cfg.session.root_dir, &key)?;
    let client = UploadClient::new(&cfg.upload)?;

    let max = if max == 0 { None } else { Some(max) };
    let report = upload::retry_pending(
        &client,
        &key,
        &paths.models_dir,
        &queue_path(&cfg, &paths),
        max,
    )?;
    println!(
        "retry: attempted {} uploaded {} failed {}",
        report.attempted, report.uploaded, report.failed
    );
    Ok(())
}
