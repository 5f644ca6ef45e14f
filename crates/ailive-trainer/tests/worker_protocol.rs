#![cfg(unix)]

use std::path::Path;

use ailive_trainer::config::{TrainingConfig, WorkerConfig};
use ailive_trainer::credential::ApiKey;
use ailive_trainer::session;
use ailive_trainer::worker::{PolicyTrainer, WorkerTrainer};

fn shell_worker(script: &str) -> WorkerConfig {
    WorkerConfig {
        command: "sh".into(),
        args: vec!["-c".into(), script.into()],
    }
}

fn spawn_worker(script: &str) -> (tempfile::TempDir, WorkerTrainer) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let key = ApiKey::parse("testkey-zero-walking").expect("test key");
    let root = tmp.path().join("sessions");
    let paths = session::init_dirs(root.to_str().expect("utf-8 tmpdir"), &key)
        .expect("session dirs");
    let worker = WorkerTrainer::spawn(&shell_worker(script), &TrainingConfig::default(), &paths, &key)
        .expect("spawn worker");
    (tmp, worker)
}

#[test]
fn drives_learn_save_load_over_the_line_protocol() {
    let script = r#"
echo ready
while read cmd rest; do
  case "$cmd" in
    learn) echo "stepping $rest timesteps" >&2; echo ok ;;
    save|load) echo ok ;;
    shutdown) exit 0 ;;
    *) echo "err unknown command" ;;
  esac
done
"#;
    let (_tmp, mut worker) = spawn_worker(script);
    worker.learn(500_000).expect("learn");
    worker.save(Path::new("/tmp/ailive-test-500000.zip")).expect("save");
    worker.load(Path::new("/tmp/ailive-test-500000.zip")).expect("load");
}

#[test]
fn err_reply_carries_the_worker_message() {
    let script = r#"
echo ready
while read cmd rest; do
  case "$cmd" in
    learn) echo "err simulator crashed" ;;
    shutdown) exit 0 ;;
    *) echo ok ;;
  esac
done
"#;
    let (_tmp, mut worker) = spawn_worker(script);
    let err = worker.learn(500_000).expect_err("learn must fail");
    assert!(err.to_string().contains("simulator crashed"));
}

#[test]
fn worker_death_mid_command_is_fatal() {
    let script = r#"
echo ready
read cmd
exit 1
"#;
    let (_tmp, mut worker) = spawn_worker(script);
    let err = worker.learn(500_000).expect_err("dead worker must surface");
    assert!(err.to_string().contains("exited unexpectedly"));
}

#[test]
fn spawn_fails_when_no_ready_is_sent() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let key = ApiKey::parse("testkey-zero-walking").expect("test key");
    let root = tmp.path().join("sessions");
    let paths = session::init_dirs(root.to_str().expect("utf-8 tmpdir"), &key)
        .expect("session dirs");

    let cfg = shell_worker("exit 3");
    let err = WorkerTrainer::spawn(&cfg, &TrainingConfig::default(), &paths, &key)
        .expect_err("spawn must fail");
    assert!(err.to_string().contains("exited unexpectedly"));
}
