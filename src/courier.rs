//! Result Courier: compress the report envelope and deliver it to the
//! caller-supplied callback URL with bounded retries.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::ScanServerError;
use crate::types::ScanReport;

const MAX_ATTEMPTS: u32 = 3;
const PARTIAL_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Gzip + base64 the serialized payload and wrap it in the callback envelope.
pub fn compress_envelope(json_bytes: &[u8]) -> serde_json::Value {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    // Writing to a Vec cannot fail.
    encoder.write_all(json_bytes).expect("gzip into memory");
    let compressed = encoder.finish().expect("gzip into memory");

    serde_json::json!({
        "compressed": true,
        "data": BASE64.encode(&compressed),
        "original_size": json_bytes.len(),
        "compressed_size": compressed.len(),
    })
}

/// Hint logged alongside delivery failures for the statuses operators ask
/// about most.
fn category_hint(status: u16) -> Option<&'static str> {
    match status {
        413 => Some("payload too large — consider raising the receiver's body limit"),
        500 | 502 | 503 | 504 => Some("receiver-side error — likely transient"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Courier
// ---------------------------------------------------------------------------

pub struct Courier {
    client: reqwest::Client,
}

impl Courier {
    pub fn new() -> anyhow::Result<Courier> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Courier { client })
    }

    /// Deliver a completed-scan report.
    pub async fn deliver_report(&self, callback_url: &str, report: &ScanReport) {
        // serde_json keeps non-ASCII text as UTF-8; nothing is escaped away.
        let bytes = match serde_json::to_vec(report) {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "Report serialization failed, nothing delivered");
                return;
            }
        };
        self.deliver_envelope(callback_url, &bytes).await;
    }

    /// Deliver an error stub through the same envelope and retry path.
    pub async fn deliver_error(&self, callback_url: &str, message: &str) {
        let payload = serde_json::json!({ "Status": "Error", "Message": message });
        let bytes = serde_json::to_vec(&payload).expect("static shape");
        self.deliver_envelope(callback_url, &bytes).await;
    }

    async fn deliver_envelope(&self, callback_url: &str, json_bytes: &[u8]) {
        let envelope = compress_envelope(json_bytes);

        for attempt in 1..=MAX_ATTEMPTS {
            let result = self
                .client
                .post(callback_url)
                .header("X-Compressed", "gzip-base64")
                .json(&envelope)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    info!(url = callback_url, attempt, "Callback delivered");
                    return;
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    let truncated: String = body.chars().take(200).collect();
                    warn!(
                        url = callback_url,
                        status,
                        attempt,
                        body = truncated.as_str(),
                        hint = category_hint(status),
                        "Callback rejected"
                    );
                }
                Err(e) => {
                    warn!(url = callback_url, attempt, error = %e, "Callback transport error");
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
            }
        }

        // Best-effort contract: no local queueing beyond this point.
        let exhausted = ScanServerError::Callback(format!("{MAX_ATTEMPTS} attempts exhausted"));
        error!(url = callback_url, error = %exhausted, "CRITICAL: callback delivery failed, giving up");
    }

    /// Best-effort progress ping while a scan is running; failures are logged
    /// and ignored.
    pub async fn post_partial(&self, callback_url: &str, files_scanned: usize) {
        let payload = serde_json::json!({ "Status": "partial", "FilesScanned": files_scanned });
        let result = self
            .client
            .post(callback_url)
            .timeout(PARTIAL_TIMEOUT)
            .json(&payload)
            .send()
            .await;
        if let Err(e) = result {
            warn!(url = callback_url, error = %e, "Partial progress callback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn decompress(envelope: &serde_json::Value) -> Vec<u8> {
        let data = envelope["data"].as_str().unwrap();
        let compressed = BASE64.decode(data).unwrap();
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn envelope_round_trips_original_bytes() {
        let payload = serde_json::json!({
            "Status": "completed",
            "Message": "Scanned Successfully",
            "Note": "Проверьте строку вручную",
        });
        let bytes = serde_json::to_vec(&payload).unwrap();

        let envelope = compress_envelope(&bytes);
        assert_eq!(envelope["compressed"], true);
        assert_eq!(envelope["original_size"].as_u64().unwrap() as usize, bytes.len());
        assert_eq!(
            envelope["compressed_size"].as_u64().unwrap() as usize,
            BASE64.decode(envelope["data"].as_str().unwrap()).unwrap().len()
        );
        assert_eq!(decompress(&envelope), bytes);
    }

    #[test]
    fn utf8_survives_serialization_unescaped() {
        let payload = serde_json::json!({ "Message": "Найдено секретов: 5" });
        let bytes = serde_json::to_vec(&payload).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Найдено секретов"));
        assert!(!text.contains("\\u"));
    }

    #[test]
    fn category_hints_cover_retryable_statuses() {
        assert!(category_hint(413).unwrap().contains("payload"));
        for status in [500, 502, 503, 504] {
            assert!(category_hint(status).is_some());
        }
        assert!(category_hint(404).is_none());
        assert!(category_hint(200).is_none());
    }
}
