//! File Scanner: walk an extracted tree and apply the rule catalog line by
//! line under two safety caps.
//!
//! Bounded regardless of input: lines over [`MAX_LINE_LENGTH`] are skipped
//! behind a sentinel finding, and a file that yields more than
//! [`MAX_SECRETS_PER_FILE`] findings is collapsed into a single sentinel
//! carrying a digest of everything discarded.

use rayon::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::rules::RuleCatalog;
use crate::types::{Finding, Severity, MAX_LINE_LENGTH, MAX_SECRETS_PER_FILE, SCAN_BATCH_SIZE};

/// Marker prefix of the long-line sentinel; the classifier pins findings
/// containing it to Potential / 0.50.
pub const LONG_LINE_MARKER: &str = "СТРОКА НЕ СКАНИРОВАЛАСЬ т.к. её длина";

/// Marker prefix of the truncated-file sentinel.
pub const TRUNCATED_FILE_MARKER: &str = "ФАЙЛ НЕ ВЫВЕДЕН ПОЛНОСТЬЮ т.к.";

/// Aggregate result of scanning one extracted tree.
pub struct ScanStats {
    pub findings: Vec<Finding>,
    pub files_scanned: usize,
    pub files_excluded: usize,
    /// Lines skipped behind a Too Long Line sentinel.
    pub skipped_patterns: usize,
}

// ---------------------------------------------------------------------------
// Walk and filter
// ---------------------------------------------------------------------------

/// Collect candidate files depth-first, applying the exclusion sets.
/// Returns (abs path, repo-relative path) pairs plus the excluded count.
fn collect_files(root: &Path, catalog: &RuleCatalog) -> (Vec<(std::path::PathBuf, String)>, usize) {
    let mut files = Vec::new();
    let mut excluded = 0usize;

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let basename = entry.file_name().to_string_lossy();
        if catalog.is_excluded_file(&basename) || catalog.is_excluded_extension(&basename) {
            excluded += 1;
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        files.push((entry.path().to_path_buf(), rel));
    }

    (files, excluded)
}

// ---------------------------------------------------------------------------
// Per-file scan
// ---------------------------------------------------------------------------

/// Scan a single file. Returns the findings (possibly a lone sentinel) and
/// the number of lines skipped for length.
fn scan_file(abs_path: &Path, rel_path: &str, catalog: &RuleCatalog) -> (Vec<Finding>, usize) {
    let bytes = match std::fs::read(abs_path) {
        Ok(b) => b,
        Err(e) => {
            warn!(path = rel_path, error = %e, "Failed to read file, skipping");
            return (Vec::new(), 0);
        }
    };
    let content = String::from_utf8_lossy(&bytes);

    let mut sentinels = Vec::new();
    let mut candidates = Vec::new();
    let mut skipped_lines = 0usize;

    for (idx, line) in content.lines().enumerate() {
        let line_num = idx + 1;
        let line_len = line.chars().count();

        if line_len > MAX_LINE_LENGTH {
            let digest = format!("{:x}", md5::compute(line.as_bytes()));
            sentinels.push(Finding::sentinel(
                rel_path.to_string(),
                line_num,
                format!(
                    "{LONG_LINE_MARKER} более {MAX_LINE_LENGTH} символов. \
                     Проверьте строку вручную. Хеш строки: {digest}"
                ),
                format!(
                    "Строка {line_num} содержит большое количество символов. Длина: {line_len}."
                ),
                Severity::Potential,
                "Too Long Line".to_string(),
            ));
            skipped_lines += 1;
            continue;
        }

        // First matching rule in catalog order wins; later rules on the same
        // line are not consulted.
        for rule in catalog.rules() {
            let Some(m) = rule.pattern.find(line) else { continue };
            let context = line.trim();
            if !catalog.is_false_positive(context) {
                candidates.push(Finding::candidate(
                    rel_path.to_string(),
                    line_num,
                    m.as_str().to_string(),
                    context.to_string(),
                    rule.message.clone(),
                ));
            }
            break;
        }
    }

    if candidates.len() > MAX_SECRETS_PER_FILE {
        let dump: String =
            candidates.iter().map(|f| f.secret.as_str()).collect::<Vec<_>>().join("\n");
        let digest = format!("{:x}", md5::compute(dump.as_bytes()));
        let count = candidates.len();
        let sentinel = Finding::sentinel(
            rel_path.to_string(),
            0,
            format!(
                "{TRUNCATED_FILE_MARKER} найдено более {MAX_SECRETS_PER_FILE} секретов. \
                 Проверьте файл вручную. Хеш всех секретов: {digest}"
            ),
            format!("Найдено секретов: {count}\nСписок найденных секретов ниже:\n{dump}"),
            Severity::High,
            "Too Many Secrets".to_string(),
        );
        return (vec![sentinel], skipped_lines);
    }

    sentinels.extend(candidates);
    (sentinels, skipped_lines)
}

// ---------------------------------------------------------------------------
// Tree scan
// ---------------------------------------------------------------------------

/// Scan every candidate file under `root`. Files run in concurrent batches of
/// [`SCAN_BATCH_SIZE`]; `progress` (when given) is invoked with the running
/// processed-file count roughly every tenth of the list.
pub fn scan_tree(
    root: &Path,
    catalog: &RuleCatalog,
    progress: Option<&(dyn Fn(usize) + Sync)>,
) -> ScanStats {
    let started = std::time::Instant::now();
    let (files, files_excluded) = collect_files(root, catalog);
    info!(files = files.len(), excluded = files_excluded, "Collected files for scanning");

    let report_every = (files.len() / 10).max(1);
    let mut findings = Vec::new();
    let mut skipped_patterns = 0usize;
    let mut processed = 0usize;

    for batch in files.chunks(SCAN_BATCH_SIZE) {
        let batch_results: Vec<(Vec<Finding>, usize)> = batch
            .par_iter()
            .map(|(abs, rel)| scan_file(abs, rel, catalog))
            .collect();

        for (batch_findings, skipped) in batch_results {
            findings.extend(batch_findings);
            skipped_patterns += skipped;
        }

        processed += batch.len();
        if let Some(report) = progress {
            if processed % report_every == 0 {
                report(processed);
            }
        }
    }

    debug!(
        files = files.len(),
        findings = findings.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Tree scan complete"
    );

    ScanStats { findings, files_scanned: files.len(), files_excluded, skipped_patterns }
}
