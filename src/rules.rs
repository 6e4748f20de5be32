//! Rule Catalog: regex rules plus exclusion and false-positive sets.
//!
//! Loaded once at startup from the four YAML files under `Settings/` and
//! immutable afterwards. A rule whose pattern fails to compile is logged and
//! dropped; one bad rule never takes the catalog down.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use tracing::warn;

// ---------------------------------------------------------------------------
// YAML shapes
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawRule {
    pub id: String,
    pub message: String,
    pub pattern: String,
    pub severity: String,
}

#[derive(Deserialize)]
struct ExcludedFilesFile {
    #[serde(default)]
    excluded_files: Vec<String>,
}

#[derive(Deserialize)]
struct ExcludedExtensionsFile {
    #[serde(default)]
    excluded_extensions: Vec<String>,
}

#[derive(Deserialize)]
struct FalsePositiveFile {
    #[serde(default)]
    false_positive: Vec<String>,
}

// ---------------------------------------------------------------------------
// Compiled catalog
// ---------------------------------------------------------------------------

/// One rule with its compiled pattern. Iteration order in the catalog defines
/// match precedence: the first matching rule wins per line.
pub struct CompiledRule {
    pub id: String,
    pub message: String,
    pub pattern: Regex,
    pub severity: String,
}

pub struct RuleCatalog {
    rules: Vec<CompiledRule>,
    excluded_files: HashSet<String>,
    excluded_extensions: HashSet<String>,
    /// Lower-cased literal substrings checked against the context line.
    false_positives: Vec<String>,
}

impl RuleCatalog {
    /// Load the catalog from the four Settings files. Missing exclusion or
    /// false-positive files degrade to empty sets; a missing rules file is an
    /// error because the scanner is useless without it.
    pub fn load(
        rules_path: &Path,
        excluded_files_path: &Path,
        excluded_extensions_path: &Path,
        false_positive_path: &Path,
    ) -> Result<RuleCatalog> {
        let raw = std::fs::read_to_string(rules_path)
            .with_context(|| format!("reading rules file {}", rules_path.display()))?;
        let raw_rules: Vec<RawRule> =
            serde_yaml::from_str(&raw).context("parsing rules file")?;

        let mut rules = Vec::with_capacity(raw_rules.len());
        for r in raw_rules {
            match Regex::new(&r.pattern) {
                Ok(pattern) => rules.push(CompiledRule {
                    id: r.id,
                    message: r.message,
                    pattern,
                    severity: r.severity,
                }),
                Err(e) => {
                    warn!(rule = r.id.as_str(), error = %e, "Rule pattern failed to compile, dropping rule");
                }
            }
        }

        let excluded_files = match std::fs::read_to_string(excluded_files_path) {
            Ok(s) => serde_yaml::from_str::<ExcludedFilesFile>(&s)
                .context("parsing excluded files")?
                .excluded_files
                .into_iter()
                .map(|f| f.to_lowercase())
                .collect(),
            Err(_) => HashSet::new(),
        };

        let excluded_extensions = match std::fs::read_to_string(excluded_extensions_path) {
            Ok(s) => serde_yaml::from_str::<ExcludedExtensionsFile>(&s)
                .context("parsing excluded extensions")?
                .excluded_extensions
                .into_iter()
                .map(|e| e.to_lowercase())
                .collect(),
            Err(_) => HashSet::new(),
        };

        let false_positives = match std::fs::read_to_string(false_positive_path) {
            Ok(s) => serde_yaml::from_str::<FalsePositiveFile>(&s)
                .context("parsing false-positive list")?
                .false_positive
                .into_iter()
                .map(|p| p.to_lowercase())
                .collect(),
            Err(_) => Vec::new(),
        };

        Ok(RuleCatalog { rules, excluded_files, excluded_extensions, false_positives })
    }

    /// Empty catalog for tests and degraded startup.
    pub fn empty() -> RuleCatalog {
        RuleCatalog {
            rules: Vec::new(),
            excluded_files: HashSet::new(),
            excluded_extensions: HashSet::new(),
            false_positives: Vec::new(),
        }
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Lower-cased basename match against the excluded-files set.
    pub fn is_excluded_file(&self, basename: &str) -> bool {
        self.excluded_files.contains(&basename.to_lowercase())
    }

    /// Match the full trailing extension, then the single last segment, so
    /// both `.tar.gz` and `.gz` entries in the set catch `foo.tar.gz`.
    pub fn is_excluded_extension(&self, basename: &str) -> bool {
        let full = full_extension(basename);
        if full.is_empty() {
            return false;
        }
        if self.excluded_extensions.contains(&full) {
            return true;
        }
        match full.rfind('.') {
            Some(idx) if idx > 0 => self.excluded_extensions.contains(&full[idx..]),
            _ => false,
        }
    }

    /// Case-insensitive literal containment of any false-positive substring.
    pub fn is_false_positive(&self, context: &str) -> bool {
        let context_lower = context.to_lowercase();
        self.false_positives.iter().any(|p| context_lower.contains(p.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Extension extraction
// ---------------------------------------------------------------------------

/// Longest trailing extension of a basename: up to two dot-segments,
/// lower-cased, dot-prefixed. `archive.tar.gz` -> `.tar.gz`, `a.txt` -> `.txt`.
pub fn full_extension(basename: &str) -> String {
    static EXT_RE: OnceLock<Regex> = OnceLock::new();
    let re = EXT_RE.get_or_init(|| Regex::new(r"(\.[^.]+){1,2}$").expect("static regex"));
    re.find(basename).map(|m| m.as_str().to_lowercase()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    fn load_catalog(dir: &Path) -> RuleCatalog {
        RuleCatalog::load(
            &dir.join("rules.yml"),
            &dir.join("excluded_files.yml"),
            &dir.join("excluded_extensions.yml"),
            &dir.join("false-positive.yml"),
        )
        .unwrap()
    }

    #[test]
    fn bad_rule_is_dropped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(
            tmp.path(),
            "rules.yml",
            r#"
- id: PW1
  message: Password
  pattern: 'password\s*='
  severity: High
- id: BAD
  message: Broken
  pattern: '(unclosed'
  severity: High
"#,
        );
        write_file(tmp.path(), "excluded_files.yml", "excluded_files: []\n");
        write_file(tmp.path(), "excluded_extensions.yml", "excluded_extensions: []\n");
        write_file(tmp.path(), "false-positive.yml", "false_positive: []\n");

        let catalog = load_catalog(tmp.path());
        assert_eq!(catalog.rules().len(), 1);
        assert_eq!(catalog.rules()[0].id, "PW1");
    }

    #[test]
    fn full_extension_takes_up_to_two_segments() {
        assert_eq!(full_extension("archive.tar.gz"), ".tar.gz");
        assert_eq!(full_extension("notes.TXT"), ".txt");
        assert_eq!(full_extension("Makefile"), "");
        assert_eq!(full_extension("a.b.c.d"), ".c.d");
    }

    #[test]
    fn extension_exclusion_matches_full_and_last_segment() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "rules.yml", "[]\n");
        write_file(tmp.path(), "excluded_files.yml", "excluded_files: [\"thumbs.db\"]\n");
        write_file(tmp.path(), "excluded_extensions.yml", "excluded_extensions: [\".png\", \".gz\"]\n");
        write_file(tmp.path(), "false-positive.yml", "false_positive: []\n");

        let catalog = load_catalog(tmp.path());
        assert!(catalog.is_excluded_extension("logo.PNG"));
        assert!(catalog.is_excluded_extension("dump.tar.gz"));
        assert!(!catalog.is_excluded_extension("main.rs"));
        assert!(catalog.is_excluded_file("Thumbs.DB"));
        assert!(!catalog.is_excluded_file("readme.md"));
    }

    #[test]
    fn false_positive_containment_is_case_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "rules.yml", "[]\n");
        write_file(tmp.path(), "excluded_files.yml", "excluded_files: []\n");
        write_file(tmp.path(), "excluded_extensions.yml", "excluded_extensions: []\n");
        write_file(tmp.path(), "false-positive.yml", "false_positive: [\"EXAMPLE_KEY\"]\n");

        let catalog = load_catalog(tmp.path());
        assert!(catalog.is_false_positive("token = example_key_123"));
        assert!(!catalog.is_false_positive("token = real_key_123"));
    }
}
