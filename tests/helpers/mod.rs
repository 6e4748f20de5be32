//! Shared scaffolding for integration tests: on-disk fixtures, in-process
//! callback sinks, and a tiny archive server.
#![allow(dead_code)]

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secretscan_server::config::{Config, HubKind};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Write a working Settings/ directory with a password rule and small
/// exclusion sets.
pub fn write_settings(settings_dir: &Path) {
    std::fs::create_dir_all(settings_dir).unwrap();
    std::fs::write(
        settings_dir.join("rules.yml"),
        r#"
- id: PWD001
  message: Password
  pattern: 'password\s*=\s*\S+'
  severity: High
- id: TOK001
  message: Api Token
  pattern: '(?i)api[_-]?key\s*[:=]\s*\S+'
  severity: High
"#,
    )
    .unwrap();
    std::fs::write(settings_dir.join("excluded_files.yml"), "excluded_files: [\"thumbs.db\"]\n")
        .unwrap();
    std::fs::write(
        settings_dir.join("excluded_extensions.yml"),
        "excluded_extensions: [\".png\", \".jpg\"]\n",
    )
    .unwrap();
    std::fs::write(settings_dir.join("false-positive.yml"), "false_positive: [\"example_only\"]\n")
        .unwrap();
}

/// Write small but separable training corpora.
pub fn write_datasets(datasets_dir: &Path) {
    std::fs::create_dir_all(datasets_dir).unwrap();
    let secrets: Vec<String> =
        (0..40).map(|i| format!("AKIA{i:04}XQZ9 ghp_x{i}T7qLmZw8Kd{i}R2v")).collect();
    let non_secrets: Vec<String> =
        (0..40).map(|i| format!("the quick brown fox number {i} jumps over the lazy dog")).collect();
    std::fs::write(datasets_dir.join("Dataset_Secrets.txt"), secrets.join("\n")).unwrap();
    std::fs::write(datasets_dir.join("Dataset_NonSecrets.txt"), non_secrets.join("\n")).unwrap();
}

/// A complete test configuration rooted under `root`.
pub fn test_config(root: &Path, hub: HubKind, max_workers: usize) -> Config {
    Config {
        hub,
        max_workers,
        host: "127.0.0.1".to_string(),
        port: 0,
        api_key: "test-api-key".to_string(),
        temp_dir: root.join("tmp"),
        settings_dir: root.join("Settings"),
        model_dir: root.join("Model"),
        datasets_dir: root.join("Datasets"),
        login_key: None,
        password_key: None,
        pat_key: None,
    }
}

/// Build a zip archive in memory from (path, content) pairs.
pub fn build_zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

// ---------------------------------------------------------------------------
// Callback sink
// ---------------------------------------------------------------------------

/// Records every JSON body POSTed to it, in arrival order.
#[derive(Clone)]
pub struct CallbackSink {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<serde_json::Value>>>,
}

async fn capture(
    State(store): State<Arc<Mutex<Vec<serde_json::Value>>>>,
    axum::extract::Json(body): axum::extract::Json<serde_json::Value>,
) -> impl IntoResponse {
    store.lock().unwrap().push(body);
    StatusCode::OK
}

impl CallbackSink {
    pub async fn start() -> CallbackSink {
        let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new().fallback(capture).with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        CallbackSink { addr, received }
    }

    pub fn url(&self) -> String {
        format!("http://{}/callback", self.addr)
    }

    /// Envelope payloads received so far (partial-progress pings filtered out),
    /// decompressed in arrival order.
    pub fn envelopes(&self) -> Vec<serde_json::Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.get("compressed").is_some())
            .map(decode_envelope)
            .collect()
    }

    pub fn partials(&self) -> Vec<serde_json::Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.get("Status").and_then(|s| s.as_str()) == Some("partial"))
            .cloned()
            .collect()
    }

    /// Poll until `count` envelope callbacks arrived or the timeout expires.
    pub async fn wait_for_envelopes(&self, count: usize, timeout: Duration) -> Vec<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let envelopes = self.envelopes();
            if envelopes.len() >= count {
                return envelopes;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {count} callbacks, got {}",
                envelopes.len()
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// `gunzip(base64_decode(data))` back into the original JSON payload.
pub fn decode_envelope(envelope: &serde_json::Value) -> serde_json::Value {
    assert_eq!(envelope["compressed"], true, "expected a compressed envelope");
    let compressed = BASE64.decode(envelope["data"].as_str().unwrap()).unwrap();
    assert_eq!(envelope["compressed_size"].as_u64().unwrap() as usize, compressed.len());
    let mut decoder = GzDecoder::new(&compressed[..]);
    let mut bytes = Vec::new();
    decoder.read_to_end(&mut bytes).unwrap();
    assert_eq!(envelope["original_size"].as_u64().unwrap() as usize, bytes.len());
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Archive server (public-platform download shape)
// ---------------------------------------------------------------------------

/// Serve zip archives at exact request paths (e.g.
/// `/repo-a/archive/<commit>.zip`); anything else is a 404.
pub async fn start_archive_server(archives: HashMap<String, Vec<u8>>) -> SocketAddr {
    async fn serve_archive(
        State(archives): State<Arc<HashMap<String, Vec<u8>>>>,
        uri: axum::http::Uri,
    ) -> impl IntoResponse {
        match archives.get(uri.path()) {
            Some(bytes) => (StatusCode::OK, bytes.clone()).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    let app = Router::new().fallback(serve_archive).with_state(Arc::new(archives));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}
