use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::thread;

use ailive_trainer::checkpoints::{self, UploadState};
use ailive_trainer::config::UploadConfig;
use ailive_trainer::credential::ApiKey;
use ailive_trainer::upload::{self, UploadClient};

struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

fn read_request(stream: &mut TcpStream) -> Request {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

    let mut line = String::new();
    reader.read_line(&mut line).expect("request line");
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).expect("header line");
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':')
            && name.eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).expect("request body");
    Request { method, path, body }
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).expect("write response");
    stream.flush().expect("flush response");
}

fn client_for(port: u16) -> UploadClient {
    let cfg = UploadConfig {
        base_url: format!("http://127.0.0.1:{port}"),
        timeout_secs: 5,
        ..UploadConfig::default()
    };
    UploadClient::new(&cfg).expect("client")
}

fn checkpoint_fixture(bytes: &[u8]) -> (tempfile::TempDir, PathBuf) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let ckpt = tmp.path().join("500000.zip");
    fs::write(&ckpt, bytes).expect("write checkpoint");
    (tmp, ckpt)
}

fn test_key() -> ApiKey {
    ApiKey::parse("testkey-zero-walking").expect("test key")
}

#[test]
fn sign_url_refusal_surfaces_message_and_keeps_file() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let req = read_request(&mut stream);
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/v1/upload/sign_url");
        let body: serde_json::Value = serde_json::from_slice(&req.body).expect("json body");
        assert_eq!(body["api"], "testkey-zero-walking");
        respond(
            &mut stream,
            "200 OK",
            r#"{"success": false, "message": "quota exceeded"}"#,
        );
    });

    let (_tmp, ckpt) = checkpoint_fixture(b"params");
    let err = client_for(port)
        .upload_checkpoint(&test_key(), &ckpt)
        .expect_err("refusal must surface");
    assert!(err.to_string().contains("quota exceeded"));
    assert!(ckpt.is_file());

    server.join().expect("server thread");
}

#[test]
fn non_2xx_status_on_sign_url_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = read_request(&mut stream);
        respond(&mut stream, "503 Service Unavailable", "");
    });

    let (_tmp, ckpt) = checkpoint_fixture(b"params");
    let err = client_for(port)
        .upload_checkpoint(&test_key(), &ckpt)
        .expect_err("5xx must surface");
    assert!(err.to_string().contains("503"));

    server.join().expect("server thread");
}

#[test]
fn put_failure_reports_error_without_panicking() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept sign");
        let _ = read_request(&mut stream);
        let url = format!("http://127.0.0.1:{port}/upload/target");
        respond(
            &mut stream,
            "200 OK",
            &format!(r#"{{"success": true, "url": "{url}"}}"#),
        );

        let (mut stream, _) = listener.accept().expect("accept put");
        let req = read_request(&mut stream);
        assert_eq!(req.method, "PUT");
        assert_eq!(req.path, "/upload/target");
        respond(&mut stream, "500 Internal Server Error", "");
    });

    let (_tmp, ckpt) = checkpoint_fixture(b"params");
    let err = client_for(port)
        .upload_checkpoint(&test_key(), &ckpt)
        .expect_err("put failure must surface");
    assert!(err.to_string().contains("500"));
    assert!(ckpt.is_file());

    server.join().expect("server thread");
}

#[test]
fn uploads_checkpoint_bytes_to_the_signed_url() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept sign");
        let _ = read_request(&mut stream);
        let url = format!("http://127.0.0.1:{port}/upload/target");
        respond(
            &mut stream,
            "200 OK",
            &format!(r#"{{"success": true, "url": "{url}"}}"#),
        );

        let (mut stream, _) = listener.accept().expect("accept put");
        let req = read_request(&mut stream);
        assert_eq!(req.method, "PUT");
        assert_eq!(req.body, b"policy parameter bytes");
        respond(&mut stream, "200 OK", "");
    });

    let (_tmp, ckpt) = checkpoint_fixture(b"policy parameter bytes");
    client_for(port)
        .upload_checkpoint(&test_key(), &ckpt)
        .expect("upload");

    server.join().expect("server thread");
}

#[test]
fn retry_uploads_queued_checkpoint_and_marks_it() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept sign");
        let _ = read_request(&mut stream);
        let url = format!("http://127.0.0.1:{port}/upload/target");
        respond(
            &mut stream,
            "200 OK",
            &format!(r#"{{"success": true, "url": "{url}"}}"#),
        );

        let (mut stream, _) = listener.accept().expect("accept put");
        let _ = read_request(&mut stream);
        respond(&mut stream, "200 OK", "");
    });

    let tmp = tempfile::tempdir().expect("tempdir");
    let models = tmp.path().join("models");
    fs::create_dir_all(&models).expect("models dir");
    let ckpt = models.join("500000.zip");
    fs::write(&ckpt, b"params").expect("write checkpoint");
    let digest = checkpoints::file_digest(&ckpt).expect("digest");

    let qpath = tmp.path().join("upload-queue.json");
    checkpoints::record_failure(&qpath, 500_000, "500000.zip", &digest, "network down")
        .expect("seed queue");

    let report = upload::retry_pending(&client_for(port), &test_key(), &models, &qpath, None)
        .expect("retry");
    assert_eq!(report.attempted, 1);
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.failed, 0);

    let q = checkpoints::load_queue(&qpath).expect("load queue");
    assert_eq!(q.entries[0].state, UploadState::Uploaded);
    assert_eq!(q.entries[0].attempts, 2);
    assert_eq!(q.entries[0].last_error, None);

    server.join().expect("server thread");
}

#[test]
fn retry_refuses_a_changed_checkpoint() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let models = tmp.path().join("models");
    fs::create_dir_all(&models).expect("models dir");
    fs::write(models.join("500000.zip"), b"rewritten params").expect("write checkpoint");

    let qpath = tmp.path().join("upload-queue.json");
    checkpoints::record_failure(&qpath, 500_000, "500000.zip", "0123abcd", "network down")
        .expect("seed queue");

    // No server: the digest check must fail before any request is made.
    let report = upload::retry_pending(&client_for(1), &test_key(), &models, &qpath, None)
        .expect("retry");
    assert_eq!(report.attempted, 1);
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.failed, 1);

    let q = checkpoints::load_queue(&qpath).expect("load queue");
    assert_eq!(q.entries[0].state, UploadState::Failed);
    assert!(
        q.entries[0]
            .last_error
            .as_deref()
            .unwrap_or_default()
            .contains("digest mismatch")
    );
}
