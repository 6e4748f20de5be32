//! Auxiliary discovery: language histogram and framework detection over an
//! extracted tree. File contents are only read for manifest files and
//! lightweight code-pattern checks.

use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::types::{LanguageEntry, MAX_FILE_READ};

/// File-list cap per framework per detection kind; counts beyond it are
/// reported as "100+".
const DETECTION_FILE_CAP: usize = 100;

// ---------------------------------------------------------------------------
// Language histogram
// ---------------------------------------------------------------------------

fn language_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "rs" => "Rust",
        "py" | "pyi" => "Python",
        "js" | "mjs" | "cjs" => "JavaScript",
        "ts" | "tsx" | "jsx" => "TypeScript",
        "go" => "Go",
        "java" => "Java",
        "kt" | "kts" => "Kotlin",
        "cs" => "C#",
        "c" | "h" => "C",
        "cpp" | "cc" | "cxx" | "hpp" | "hxx" => "C++",
        "rb" => "Ruby",
        "php" => "PHP",
        "swift" => "Swift",
        "scala" => "Scala",
        "sh" | "bash" | "zsh" => "Shell",
        "ps1" | "psm1" | "psd1" => "PowerShell",
        "sql" => "SQL",
        "html" | "htm" => "HTML",
        "css" | "scss" | "less" | "sass" => "CSS",
        "yml" | "yaml" => "YAML",
        "json" => "JSON",
        "xml" => "XML",
        "toml" => "TOML",
        "md" | "rst" => "Markdown",
        "dockerfile" => "Docker",
        "tf" => "Terraform",
        "lua" => "Lua",
        "pl" | "pm" => "Perl",
        "r" => "R",
        "dart" => "Dart",
        "ex" | "exs" => "Elixir",
        "vue" => "Vue",
        "svelte" => "Svelte",
        _ => return None,
    })
}

/// Aggregate `{language: {files, extensions}}` over every regular file.
/// Unknown extensions (and extension-less files) bucket into "Other".
pub fn language_histogram(root: &Path) -> BTreeMap<String, LanguageEntry> {
    let mut counts: BTreeMap<String, (usize, BTreeSet<String>)> = BTreeMap::new();

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        let ext = name.rsplit_once('.').map(|(_, e)| e.to_string()).unwrap_or_default();

        let language = language_for_extension(&ext).unwrap_or("Other").to_string();
        let slot = counts.entry(language).or_default();
        slot.0 += 1;
        if !ext.is_empty() {
            slot.1.insert(format!(".{ext}"));
        }
    }

    counts
        .into_iter()
        .map(|(lang, (files, exts))| {
            (lang, LanguageEntry { files, extensions: exts.into_iter().collect() })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Framework rules
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct FrameworksFile {
    #[serde(default)]
    frameworks: Vec<RawFramework>,
}

#[derive(Deserialize)]
struct RawFramework {
    name: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    manifest_files: Vec<String>,
    #[serde(default)]
    config_files: Vec<String>,
    #[serde(default)]
    code_patterns: Vec<String>,
    #[serde(default)]
    code_extensions: Vec<String>,
}

/// One framework with its three detection kinds compiled.
pub struct FrameworkRule {
    pub name: String,
    dependencies: Vec<String>,
    manifest_files: HashSet<String>,
    config_files: HashSet<String>,
    code_patterns: Vec<Regex>,
    code_extensions: HashSet<String>,
}

/// Load framework rules; a missing or unparsable file degrades detection to
/// nothing rather than failing the scan.
pub fn load_framework_rules(path: &Path) -> Vec<FrameworkRule> {
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let parsed: FrameworksFile = match serde_yaml::from_str(&raw) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Framework rules file failed to parse");
            return Vec::new();
        }
    };

    parsed
        .frameworks
        .into_iter()
        .map(|f| {
            let code_patterns = f
                .code_patterns
                .iter()
                .filter_map(|p| match Regex::new(p) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(framework = f.name.as_str(), error = %e, "Dropping code pattern");
                        None
                    }
                })
                .collect();
            FrameworkRule {
                name: f.name,
                dependencies: f.dependencies,
                manifest_files: f.manifest_files.into_iter().map(|m| m.to_lowercase()).collect(),
                config_files: f.config_files.into_iter().map(|c| c.to_lowercase()).collect(),
                code_patterns,
                code_extensions: f.code_extensions.into_iter().map(|e| e.to_lowercase()).collect(),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Framework detection
// ---------------------------------------------------------------------------

#[derive(Default)]
struct KindHits {
    files: usize,
    matched_deps: BTreeSet<String>,
}

impl KindHits {
    fn bump(&mut self) {
        if self.files < DETECTION_FILE_CAP {
            self.files += 1;
        } else {
            self.files = DETECTION_FILE_CAP + 1;
        }
    }

    fn label(&self) -> String {
        if self.files > DETECTION_FILE_CAP {
            "100+".to_string()
        } else {
            self.files.to_string()
        }
    }
}

/// Run all three detection kinds over the tree, producing human-readable
/// messages per framework.
pub fn detect_frameworks(root: &Path, rules: &[FrameworkRule]) -> BTreeMap<String, Vec<String>> {
    if rules.is_empty() {
        return BTreeMap::new();
    }

    let mut manifest_hits: Vec<KindHits> = rules.iter().map(|_| KindHits::default()).collect();
    let mut config_hits: Vec<KindHits> = rules.iter().map(|_| KindHits::default()).collect();
    let mut code_hits: Vec<KindHits> = rules.iter().map(|_| KindHits::default()).collect();

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let basename = entry.file_name().to_string_lossy().to_lowercase();
        let ext = basename.rsplit_once('.').map(|(_, e)| format!(".{e}")).unwrap_or_default();

        let wants_manifest = rules.iter().any(|r| r.manifest_files.contains(&basename));
        let wants_code = rules.iter().any(|r| r.code_extensions.contains(&ext));

        let content = if wants_manifest || wants_code {
            read_capped(entry.path())
        } else {
            None
        };

        for (idx, rule) in rules.iter().enumerate() {
            if rule.config_files.contains(&basename) {
                config_hits[idx].bump();
            }

            if let Some(text) = content.as_deref() {
                if rule.manifest_files.contains(&basename) {
                    let matched: Vec<&String> =
                        rule.dependencies.iter().filter(|d| text.contains(d.as_str())).collect();
                    if !matched.is_empty() {
                        manifest_hits[idx].bump();
                        for d in matched {
                            manifest_hits[idx].matched_deps.insert(d.clone());
                        }
                    }
                }

                if rule.code_extensions.contains(&ext)
                    && rule.code_patterns.iter().any(|re| re.is_match(text))
                {
                    code_hits[idx].bump();
                }
            }
        }
    }

    let mut out = BTreeMap::new();
    for (idx, rule) in rules.iter().enumerate() {
        let mut messages = Vec::new();
        if manifest_hits[idx].files > 0 {
            let deps: Vec<&str> =
                manifest_hits[idx].matched_deps.iter().map(|d| d.as_str()).collect();
            messages.push(format!(
                "In {} manifests found dependency {} ({})",
                manifest_hits[idx].label(),
                rule.name,
                deps.join(", ")
            ));
        }
        if config_hits[idx].files > 0 {
            messages.push(format!(
                "Found {} config files for {}",
                config_hits[idx].label(),
                rule.name
            ));
        }
        if code_hits[idx].files > 0 {
            messages.push(format!(
                "In {} files found mention of {}",
                code_hits[idx].label(),
                rule.name
            ));
        }
        if !messages.is_empty() {
            out.insert(rule.name.clone(), messages);
        }
    }

    out
}

fn read_capped(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let slice = if bytes.len() > MAX_FILE_READ { &bytes[..MAX_FILE_READ] } else { &bytes[..] };
    Some(String::from_utf8_lossy(slice).into_owned())
}
