use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum file size (in bytes) read for manifest / code-pattern checks.
pub const MAX_FILE_READ: usize = 512 * 1024;

/// Lines longer than this are not scanned; a sentinel finding is emitted instead.
pub const MAX_LINE_LENGTH: usize = 15_000;

/// Per-file finding cap; exceeding it collapses the file into one sentinel.
pub const MAX_SECRETS_PER_FILE: usize = 50;

/// Files are scanned in concurrent batches of this size within one job.
pub const SCAN_BATCH_SIZE: usize = 5;

// ---------------------------------------------------------------------------
// Ref types
// ---------------------------------------------------------------------------

/// Symbolic reference kind in the code host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Branch,
    Tag,
    Commit,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefType::Branch => "branch",
            RefType::Tag => "tag",
            RefType::Commit => "commit",
        }
    }
}

impl std::str::FromStr for RefType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "branch" => Ok(RefType::Branch),
            "tag" => Ok(RefType::Tag),
            "commit" => Ok(RefType::Commit),
            other => Err(format!("invalid ref type: {other}")),
        }
    }
}

// Callers send "Branch" / "branch" / "BRANCH" interchangeably.
impl<'de> Deserialize<'de> for RefType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Scan jobs (wire shape is PascalCase, matching the callers' contract)
// ---------------------------------------------------------------------------

/// An immutable scan request as received at HTTP ingress.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanJob {
    #[serde(rename = "ProjectName")]
    pub project_name: String,
    #[serde(rename = "RepoUrl")]
    pub repo_url: String,
    #[serde(rename = "RefType")]
    pub ref_type: RefType,
    #[serde(rename = "Ref")]
    pub git_ref: String,
    #[serde(rename = "CallbackUrl")]
    pub callback_url: String,
}

/// Upload-based scan request; the archive travels out-of-band as multipart.
#[derive(Clone, Debug, Deserialize)]
pub struct LocalScanJob {
    #[serde(rename = "ProjectName")]
    pub project_name: String,
    #[serde(rename = "RepoUrl", default)]
    pub repo_url: String,
    #[serde(rename = "CallbackUrl")]
    pub callback_url: String,
}

#[derive(Deserialize)]
pub struct MultiScanRequest {
    pub repositories: Vec<ScanJob>,
}

#[derive(Serialize)]
pub struct MultiScanResponseItem {
    #[serde(rename = "ProjectName")]
    pub project_name: String,
    #[serde(rename = "RefType")]
    pub ref_type: RefType,
    #[serde(rename = "Ref")]
    pub git_ref: String,
    pub commit: String,
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// Classification state of a finding. `Unclassified` exists only between the
/// scanner and the classifier; delivered findings are `High` or `Potential`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "")]
    Unclassified,
    High,
    Potential,
}

impl Severity {
    pub fn is_classified(&self) -> bool {
        !matches!(self, Severity::Unclassified)
    }
}

/// One candidate secret, or one sentinel describing a skipped region.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Finding {
    /// Repo-relative path, forward slashes, no leading slash.
    pub path: String,
    /// 1-based line number; 0 for whole-file sentinels.
    pub line: usize,
    pub secret: String,
    pub context: String,
    pub severity: Severity,
    #[serde(rename = "Type")]
    pub rule_type: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_prediction: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_prediction: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub confidence_averaged: bool,
    /// Populated only on the synthetic Process Error finding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Finding {
    /// A rule match awaiting classification.
    pub fn candidate(path: String, line: usize, secret: String, context: String, rule_type: String) -> Self {
        Finding {
            path,
            line,
            secret,
            context,
            severity: Severity::Unclassified,
            rule_type,
            confidence: 1.0,
            secret_confidence: None,
            context_confidence: None,
            secret_prediction: None,
            context_prediction: None,
            confidence_averaged: false,
            error: None,
        }
    }

    /// A sentinel finding with a pre-assigned severity; the classifier leaves it alone.
    pub fn sentinel(
        path: String,
        line: usize,
        secret: String,
        context: String,
        severity: Severity,
        rule_type: String,
    ) -> Self {
        Finding { severity, ..Finding::candidate(path, line, secret, context, rule_type) }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Per-language aggregate from the discovery walk.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LanguageEntry {
    pub files: usize,
    pub extensions: Vec<String>,
}

/// The completed-scan payload delivered to the callback URL.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanReport {
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "ProjectName")]
    pub project_name: String,
    #[serde(rename = "ProjectRepoUrl")]
    pub repo_url: String,
    #[serde(rename = "RepoCommit")]
    pub commit_id: String,
    #[serde(rename = "Results")]
    pub findings: Vec<Finding>,
    #[serde(rename = "FilesScanned")]
    pub files_scanned: usize,
    #[serde(rename = "Languages")]
    pub languages: BTreeMap<String, LanguageEntry>,
    #[serde(rename = "Frameworks")]
    pub frameworks: BTreeMap<String, Vec<String>>,
}

// ---------------------------------------------------------------------------
// Queue items
// ---------------------------------------------------------------------------

/// One slot in the job queue.
pub enum QueueItem {
    /// The common case: one resolved job, fully parallel with everything else.
    Single { job: ScanJob, commit_id: String },
    /// An ordered batch processed strictly sequentially within itself.
    Multi { jobs: Vec<ScanJob>, commit_ids: Vec<String> },
    /// Uploaded archive; skips the fetch step.
    Local { job: ScanJob, archive: Arc<Vec<u8>> },
}

// ---------------------------------------------------------------------------
// CPU-pool wire types
// ---------------------------------------------------------------------------

/// Work descriptor crossing into the CPU stage. Owns everything the stage
/// needs; nothing is captured from the surrounding task.
pub struct ScanTask {
    pub project_name: String,
    pub extracted_path: std::path::PathBuf,
}

/// Result of the CPU stage: scan + classify output plus discovery maps.
pub struct ScanOutcome {
    pub findings: Vec<Finding>,
    pub files_scanned: usize,
    pub files_excluded: usize,
    pub skipped_patterns: usize,
    pub languages: BTreeMap<String, LanguageEntry>,
    pub frameworks: BTreeMap<String, Vec<String>>,
}
