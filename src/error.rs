//! Error taxonomy for the scan pipeline.
//!
//! Validation and capacity errors surface synchronously at ingress; everything
//! else flows to the worker frame and becomes an error callback (or, for a
//! CPU-stage panic, a synthetic Process Error finding).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanServerError {
    /// Unrecognized ref or ill-formed URL; HTTP 400.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Queue at capacity; HTTP 429.
    #[error("queue full")]
    Capacity,

    /// Every authentication method was rejected by the platform.
    #[error("access denied: {0}")]
    Auth(String),

    /// Network, HTTP, or extraction failure while acquiring the archive.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Unhandled failure inside the CPU stage.
    #[error("scan failed: {0}")]
    Scan(String),

    /// Classifier failure; callers fall back to severity High for all findings.
    #[error("classification failed: {0}")]
    Classify(String),

    /// Callback retries exhausted.
    #[error("callback delivery failed: {0}")]
    Callback(String),
}
