use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::{TrainingConfig, WorkerConfig};
use crate::credential::ApiKey;
use crate::error::{Error, Result};
use crate::log_redact::clean_line;
use crate::session::SessionPaths;

/// Operations delegated to the external training collaborator: advance
/// training without resetting its internal step counter, persist the
/// current parameters, load parameters from a checkpoint.
pub trait PolicyTrainer {
    fn learn(&mut self, timesteps: u64) -> Result<()>;
    fn save(&mut self, path: &Path) -> Result<()>;
    fn load(&mut self, path: &Path) -> Result<()>;
}

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

enum Reply {
    Ready,
    Done,
    Failed(String),
}

/// A long-lived trainer subprocess driven over a line protocol:
///
///   driver -> worker   `learn <timesteps>` | `save <path>` | `load <path>` | `shutdown`
///   worker -> driver   `ready` once at startup, then `ok` or `err <message>`
///                      per command
///
/// Any other stdout line, and every stderr line, is treated as a training
/// log and re-emitted at debug level under the `worker` target after
/// sanitization and credential redaction (`RUST_LOG=worker=debug` to see
/// them). The environment id, tensorboard directory, run name, and render
/// flag are passed as arguments at spawn; policy optimization and the
/// simulation itself live entirely on the worker's side of the pipe.
pub struct WorkerTrainer {
    child: Child,
    stdin: ChildStdin,
    replies: mpsc::Receiver<Reply>,
}

impl std::fmt::Debug for WorkerTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerTrainer").finish_non_exhaustive()
    }
}

impl WorkerTrainer {
    pub fn spawn(
        cfg: &WorkerConfig,
        training: &TrainingConfig,
        paths: &SessionPaths,
        key: &ApiKey,
    ) -> Result<Self> {
        if cfg.command.trim().is_empty() {
            return Err(Error::msg("worker.command is empty"));
        }

        let mut cmd = Command::new(&cfg.command);
        cmd.args(&cfg.args)
            .arg("--env")
            .arg(&training.env_id)
            .arg("--tensorboard")
            .arg(&paths.tensorboard_dir)
            .arg("--run-name")
            .arg(key.skill());
        if training.render {
            cmd.arg("--render");
        }

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::msg(format!("failed to spawn worker '{}': {e}", cfg.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::msg("worker stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::msg("worker stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::msg("worker stderr unavailable"))?;

        let (tx, replies) = mpsc::channel::<Reply>();
        let secret = key.reveal().to_string();
        {
            let secret = secret.clone();
            std::thread::spawn(move || read_replies(stdout, tx, secret));
        }
        std::thread::spawn(move || read_logs(stderr, secret));

        let mut worker = Self {
            child,
            stdin,
            replies,
        };
        match worker.recv_reply()? {
            Reply::Ready => {
                info!(command = %cfg.command, env = %training.env_id, "trainer worker ready");
            }
            Reply::Done => return Err(Error::msg("worker sent 'ok' before 'ready'")),
            Reply::Failed(msg) => {
                return Err(Error::msg(format!("worker failed to start: {msg}")));
            }
        }
        Ok(worker)
    }

    fn command(&mut self, line: &str) -> Result<()> {
        writeln!(self.stdin, "{line}")
            .map_err(|e| Error::msg(format!("failed to write to worker: {e}")))?;
        self.stdin
            .flush()
            .map_err(|e| Error::msg(format!("failed to flush worker stdin: {e}")))?;
        match self.recv_reply()? {
            Reply::Done => Ok(()),
            Reply::Ready => Err(Error::msg("unexpected 'ready' from worker")),
            Reply::Failed(msg) => Err(Error::msg(format!(
                "worker command '{line}' failed: {msg}"
            ))),
        }
    }

    // No timeout here: a learn command legitimately blocks for however long
    // the interval takes to train. Worker death surfaces as channel close.
    fn recv_reply(&mut self) -> Result<Reply> {
        self.replies
            .recv()
            .map_err(|_| Error::msg("trainer worker exited unexpectedly"))
    }
}

impl PolicyTrainer for WorkerTrainer {
    fn learn(&mut self, timesteps: u64) -> Result<()> {
        self.command(&format!("learn {timesteps}"))
    }

    fn save(&mut self, path: &Path) -> Result<()> {
        self.command(&format!("save {}", path.display()))
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        self.command(&format!("load {}", path.display()))
    }
}

impl Drop for WorkerTrainer {
    fn drop(&mut self) {
        // Ask for a clean exit, then reap. Kill if the worker ignores the
        // request; an orphaned simulation keeps a GPU busy for nothing.
        let _ = writeln!(self.stdin, "shutdown");
        let _ = self.stdin.flush();

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                _ => break,
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn read_replies<R: Read>(stream: R, tx: mpsc::Sender<Reply>, secret: String) {
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        let reply = if trimmed == "ready" {
            Some(Reply::Ready)
        } else if trimmed == "ok" {
            Some(Reply::Done)
        } else if let Some(msg) = trimmed.strip_prefix("err ") {
            Some(Reply::Failed(msg.to_string()))
        } else if trimmed == "err" {
            Some(Reply::Failed("unspecified worker error".into()))
        } else {
            None
        };
        match reply {
            Some(r) => {
                if tx.send(r).is_err() {
                    break;
                }
            }
            None => log_worker_line(&line, &secret),
        }
    }
}

fn read_logs<R: Read>(stream: R, secret: String) {
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else { break };
        log_worker_line(&line, &secret);
    }
}

fn log_worker_line(line: &str, secret: &str) {
    let line = clean_line(line, Some(secret));
    if line.is_empty() {
        return;
    }
    debug!(target: "worker", "{line}");
}
