//! Ref Resolver / Fetcher: validate a symbolic ref against the hosting
//! platform, resolve it to an immutable commit id, then fetch and extract the
//! archive for that commit.
//!
//! Two platform variants. The self-hosted variant speaks the platform REST
//! API behind an ordered authentication chain; the public variant shells out
//! to `git ls-remote` for resolution and downloads `/archive/<commit>.zip`.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::HubKind;
use crate::credentials::CredentialProvider;
use crate::error::ScanServerError;
use crate::rules::RuleCatalog;
use crate::types::RefType;

const API_VERSION: &str = "5.1-preview.1";
const TAG_API_VERSION: &str = "6.1-preview";
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(20);
const LS_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Extracted paths beyond this length get their basename truncated.
const MAX_PATH: usize = 250;
const TRUNCATED_BASENAME: usize = 100;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of resolving `(repo_url, ref_type, ref)`.
#[derive(Clone, Debug)]
pub struct RefResolution {
    pub exists: bool,
    pub commit_id: Option<String>,
    pub message: String,
}

impl RefResolution {
    fn found(commit_id: String, message: impl Into<String>) -> RefResolution {
        RefResolution { exists: true, commit_id: Some(commit_id), message: message.into() }
    }

    fn missing(message: impl Into<String>) -> RefResolution {
        RefResolution { exists: false, commit_id: None, message: message.into() }
    }
}

// ---------------------------------------------------------------------------
// Platform URL parsing
// ---------------------------------------------------------------------------

/// Coordinates of a repository on the self-hosted platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteRepo {
    pub scheme: String,
    pub server: String,
    pub collection: String,
    pub project: String,
    pub repository: String,
}

impl RemoteRepo {
    fn api_base(&self) -> String {
        format!(
            "{}://{}/{}/{}/_apis/git/repositories/{}",
            self.scheme, self.server, self.collection, self.project, self.repository
        )
    }
}

/// Split a repository URL by locating the `_git` segment: the element after
/// it is the repository, the one before it the project, everything earlier
/// the collection.
pub fn parse_platform_url(repo_url: &str) -> Result<RemoteRepo, String> {
    let url = reqwest::Url::parse(repo_url).map_err(|e| format!("ill-formed URL: {e}"))?;
    let server = match url.port() {
        Some(port) => format!(
            "{}:{port}",
            url.host_str().ok_or_else(|| "URL has no host".to_string())?
        ),
        None => url.host_str().ok_or_else(|| "URL has no host".to_string())?.to_string(),
    };

    let parts: Vec<&str> =
        url.path().trim_matches('/').split('/').filter(|p| !p.is_empty()).collect();
    let git_index =
        parts.iter().position(|p| *p == "_git").ok_or_else(|| "URL has no '_git' segment".to_string())?;

    if git_index + 1 >= parts.len() {
        return Err("URL has no repository name after '_git'".to_string());
    }
    if git_index < 1 {
        return Err("URL has no project segment before '_git'".to_string());
    }

    Ok(RemoteRepo {
        scheme: url.scheme().to_string(),
        server,
        collection: parts[..git_index - 1].join("/"),
        project: parts[git_index - 1].to_string(),
        repository: parts[git_index + 1].to_string(),
    })
}

// ---------------------------------------------------------------------------
// Authentication chain
// ---------------------------------------------------------------------------

/// Ordered authentication attempts against the self-hosted platform; the
/// first method that yields a 2xx wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    /// Login + password over HTTP Basic.
    Basic,
    /// Personal access token as HTTP Basic with an empty user.
    Pat,
    /// No Authorization header; integrated auth is ambient on the network.
    Negotiate,
}

/// Methods to attempt, in order, given what credentials are available.
pub fn auth_chain(creds: &CredentialProvider) -> Vec<AuthMethod> {
    let mut chain = Vec::new();
    if creds.has_basic_pair() {
        chain.push(AuthMethod::Basic);
    }
    if creds.pat.is_some() {
        chain.push(AuthMethod::Pat);
    }
    chain.push(AuthMethod::Negotiate);
    chain
}

fn apply_auth(
    req: reqwest::RequestBuilder,
    method: AuthMethod,
    creds: &CredentialProvider,
) -> reqwest::RequestBuilder {
    match method {
        AuthMethod::Basic => {
            req.basic_auth(creds.login.as_deref().unwrap_or(""), creds.password.as_deref())
        }
        AuthMethod::Pat => req.basic_auth("", creds.pat.as_deref()),
        AuthMethod::Negotiate => req,
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

pub struct Fetcher {
    client: reqwest::Client,
    hub: HubKind,
    creds: CredentialProvider,
}

impl Fetcher {
    /// TLS verification is off: the self-hosted platform typically sits
    /// behind a private CA.
    pub fn new(hub: HubKind, creds: CredentialProvider) -> anyhow::Result<Fetcher> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(Duration::from_secs(10))
            .timeout(RESOLVE_TIMEOUT)
            .build()?;
        Ok(Fetcher { client, hub, creds })
    }

    /// Resolve a symbolic ref to a commit id. Never errors: failures come
    /// back as `exists=false` with an explanation.
    pub async fn resolve_ref(&self, repo_url: &str, ref_type: RefType, git_ref: &str) -> RefResolution {
        match self.hub {
            HubKind::GitHub => self.resolve_public(repo_url, ref_type, git_ref).await,
            HubKind::SelfHosted => self.resolve_self_hosted(repo_url, ref_type, git_ref).await,
        }
    }

    // -----------------------------------------------------------------------
    // Variant A: self-hosted platform REST API
    // -----------------------------------------------------------------------

    async fn resolve_self_hosted(
        &self,
        repo_url: &str,
        ref_type: RefType,
        git_ref: &str,
    ) -> RefResolution {
        let repo = match parse_platform_url(repo_url) {
            Ok(r) => r,
            Err(e) => return RefResolution::missing(e),
        };
        let base = repo.api_base();

        let mut message = String::new();
        for method in auth_chain(&self.creds) {
            info!(repo = repo.repository.as_str(), ref_type = ref_type.as_str(), ?method, "Resolving ref");
            let attempt = match ref_type {
                RefType::Branch => {
                    self.resolve_filtered_ref(&base, method, &format!("heads/{git_ref}"), "Branch not found")
                        .await
                }
                RefType::Tag => self.resolve_tag(&base, method, git_ref).await,
                RefType::Commit => self.resolve_commit(&base, method, git_ref).await,
            };

            match attempt {
                AttemptOutcome::Done(resolution) => return resolution,
                AttemptOutcome::TryNext(msg) => message = msg,
            }
        }

        RefResolution::missing(message)
    }

    async fn get_json(
        &self,
        url: &str,
        method: AuthMethod,
    ) -> Result<AttemptStep, String> {
        let response = apply_auth(self.client.get(url), method, &self.creds)
            .send()
            .await
            .map_err(|e| format!("Platform request failed: {e}"))?;

        let status = response.status().as_u16();
        if !(200..=203).contains(&status) {
            let msg = if status == 401 || status == 403 {
                format!("Access Denied: [{status}]. Verify PAT/NTLM access.")
            } else {
                format!(
                    "Repository request returned {status}. Possibly invalid credentials or no repository access."
                )
            };
            return Ok(AttemptStep::Denied(msg));
        }

        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| format!("Platform response was not JSON: {e}"))?;
        Ok(AttemptStep::Body(body))
    }

    /// Branch and tag share the `refs?filter=...` endpoint.
    async fn resolve_filtered_ref(
        &self,
        base: &str,
        method: AuthMethod,
        filter: &str,
        not_found: &str,
    ) -> AttemptOutcome {
        let url = format!("{base}/refs?filter={filter}&api-version={API_VERSION}");
        match self.get_json(&url, method).await {
            Err(e) => AttemptOutcome::Done(RefResolution::missing(e)),
            Ok(AttemptStep::Denied(msg)) => AttemptOutcome::TryNext(msg),
            Ok(AttemptStep::Body(body)) => {
                if body.get("count").and_then(|c| c.as_u64()).unwrap_or(0) == 0 {
                    return AttemptOutcome::Done(RefResolution::missing(not_found));
                }
                match body["value"][0]["objectId"].as_str() {
                    Some(id) => AttemptOutcome::Done(RefResolution::found(id.to_string(), "")),
                    None => AttemptOutcome::Done(RefResolution::missing(
                        "Platform response carried no objectId",
                    )),
                }
            }
        }
    }

    /// Tags need a second hop: an annotated tag object points at its target,
    /// which may or may not be a commit.
    async fn resolve_tag(&self, base: &str, method: AuthMethod, git_ref: &str) -> AttemptOutcome {
        let first = self
            .resolve_filtered_ref(base, method, &format!("tags/{git_ref}"), "Tag not found")
            .await;
        let tag_object_id = match first {
            AttemptOutcome::Done(RefResolution { exists: true, commit_id: Some(id), .. }) => id,
            other => return other,
        };

        let url = format!("{base}/annotatedtags/{tag_object_id}?api-version={TAG_API_VERSION}");
        match self.get_json(&url, method).await {
            Ok(AttemptStep::Body(body)) => {
                let tagged = &body["taggedObject"];
                if tagged["objectType"].as_str() == Some("commit") {
                    match tagged["objectId"].as_str() {
                        Some(id) => AttemptOutcome::Done(RefResolution::found(id.to_string(), "")),
                        None => AttemptOutcome::Done(RefResolution::found(
                            tag_object_id,
                            "Annotated tag carried no target id, returning tag object id",
                        )),
                    }
                } else {
                    AttemptOutcome::Done(RefResolution::found(
                        tag_object_id,
                        "Tag found but its target is not a commit object",
                    ))
                }
            }
            // Lightweight tags have no annotated object; the ref id is the commit.
            Ok(AttemptStep::Denied(_)) | Err(_) => AttemptOutcome::Done(RefResolution::found(
                tag_object_id,
                "Could not resolve annotated tag, returning object id",
            )),
        }
    }

    async fn resolve_commit(&self, base: &str, method: AuthMethod, git_ref: &str) -> AttemptOutcome {
        let url = format!("{base}/commits/{git_ref}?api-version={API_VERSION}");
        match self.get_json(&url, method).await {
            Err(e) => AttemptOutcome::Done(RefResolution::missing(e)),
            Ok(AttemptStep::Denied(msg)) => AttemptOutcome::TryNext(msg),
            Ok(AttemptStep::Body(body)) => match body.get("commitId").and_then(|c| c.as_str()) {
                Some(id) => AttemptOutcome::Done(RefResolution::found(id.to_string(), "")),
                None => AttemptOutcome::Done(RefResolution::missing("Commit not found")),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Variant B: public platform via git ls-remote
    // -----------------------------------------------------------------------

    async fn resolve_public(&self, repo_url: &str, ref_type: RefType, git_ref: &str) -> RefResolution {
        let mut cmd = tokio::process::Command::new("git");
        cmd.arg("ls-remote");
        match ref_type {
            RefType::Tag => {
                cmd.arg("--tags");
            }
            RefType::Branch => {
                cmd.arg("--heads");
            }
            RefType::Commit => {}
        }
        cmd.arg(repo_url);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::null());

        let output = match tokio::time::timeout(LS_REMOTE_TIMEOUT, cmd.output()).await {
            Err(_) => return RefResolution::missing("git ls-remote timed out"),
            Ok(Err(e)) => return RefResolution::missing(format!("failed to launch git: {e}")),
            Ok(Ok(out)) => out,
        };

        if !output.status.success() {
            return RefResolution::missing("git ls-remote failed; repository unreachable");
        }

        match_ls_remote(&String::from_utf8_lossy(&output.stdout), ref_type, git_ref)
    }

    // -----------------------------------------------------------------------
    // Archive download
    // -----------------------------------------------------------------------

    /// Download the archive for `commit_id` into `scratch_dir/archive.zip`,
    /// streaming the body to disk.
    pub async fn download_archive(
        &self,
        repo_url: &str,
        commit_id: &str,
        scratch_dir: &Path,
    ) -> Result<PathBuf, ScanServerError> {
        let zip_path = scratch_dir.join("archive.zip");
        match self.hub {
            HubKind::GitHub => {
                let url = format!("{}/archive/{commit_id}.zip", repo_url.trim_end_matches('/'));
                let response = self
                    .client
                    .get(url.as_str())
                    .timeout(DOWNLOAD_TIMEOUT)
                    .send()
                    .await
                    .map_err(|e| ScanServerError::Fetch(format!("archive download failed: {e}")))?;
                if !response.status().is_success() {
                    return Err(ScanServerError::Fetch(format!(
                        "archive download returned {}",
                        response.status()
                    )));
                }
                stream_to_file(response, &zip_path).await?;
                Ok(zip_path)
            }
            HubKind::SelfHosted => {
                let repo = parse_platform_url(repo_url).map_err(ScanServerError::Fetch)?;
                let url = format!("{}/items", repo.api_base());

                let mut last_error = ScanServerError::Fetch("no auth method attempted".to_string());
                for method in auth_chain(&self.creds) {
                    info!(repo = repo.repository.as_str(), commit = &commit_id[..commit_id.len().min(7)], ?method, "Downloading archive");
                    let request = apply_auth(self.client.get(url.as_str()), method, &self.creds)
                        .query(&[
                            ("scopePath", "/"),
                            ("versionDescriptor.version", commit_id),
                            ("versionDescriptor.versionType", "commit"),
                            ("$format", "zip"),
                            ("download", "true"),
                            ("api-version", API_VERSION),
                        ])
                        .timeout(DOWNLOAD_TIMEOUT);

                    match request.send().await {
                        Err(e) => {
                            last_error =
                                ScanServerError::Fetch(format!("archive download failed: {e}"));
                        }
                        Ok(response) if response.status().is_success() => {
                            stream_to_file(response, &zip_path).await?;
                            return Ok(zip_path);
                        }
                        Ok(response) => {
                            let status = response.status().as_u16();
                            last_error = if status == 401 || status == 403 {
                                ScanServerError::Auth(format!(
                                    "Access Denied: [{status}]. Verify PAT/NTLM access."
                                ))
                            } else {
                                ScanServerError::Fetch(format!(
                                    "archive download returned {status}"
                                ))
                            };
                        }
                    }
                }
                Err(last_error)
            }
        }
    }
}

enum AttemptStep {
    Denied(String),
    Body(serde_json::Value),
}

enum AttemptOutcome {
    Done(RefResolution),
    TryNext(String),
}

/// Scan `git ls-remote` output for the requested ref. Commit refs match by
/// prefix against the listed object ids; branches and tags match the
/// `refs/...` suffix and yield the listed id.
pub fn match_ls_remote(output: &str, ref_type: RefType, git_ref: &str) -> RefResolution {
    if ref_type == RefType::Commit {
        for line in output.lines() {
            if line.starts_with(git_ref) {
                return RefResolution::found(git_ref.to_string(), "");
            }
        }
        return RefResolution::missing("Commit not found");
    }

    let suffix = format!("/{git_ref}");
    for line in output.lines() {
        if line.ends_with(&suffix) {
            if let Some(commit) = line.split_whitespace().next() {
                return RefResolution::found(commit.to_string(), "");
            }
        }
    }
    RefResolution::missing(match ref_type {
        RefType::Branch => "Branch not found",
        _ => "Tag not found",
    })
}

async fn stream_to_file(mut response: reqwest::Response, path: &Path) -> Result<(), ScanServerError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ScanServerError::Fetch(format!("creating archive file: {e}")))?;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ScanServerError::Fetch(format!("reading archive stream: {e}")))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| ScanServerError::Fetch(format!("writing archive: {e}")))?;
    }
    file.flush().await.map_err(|e| ScanServerError::Fetch(format!("flushing archive: {e}")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Archive extraction
// ---------------------------------------------------------------------------

/// Extract the archive under `extract_root`, refusing path escapes and
/// skipping entries the catalog excludes. Overlong destination paths get
/// their basename truncated.
pub fn safe_extract(zip_path: &Path, extract_root: &Path, catalog: &RuleCatalog) -> Result<(), String> {
    let file = std::fs::File::open(zip_path).map_err(|e| format!("opening archive: {e}"))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| format!("reading archive: {e}"))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| format!("reading archive entry: {e}"))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().replace('\\', "/");

        if name.starts_with('/') || name.split('/').any(|seg| seg == "..") {
            warn!(entry = name.as_str(), "Skipping unsafe archive entry");
            continue;
        }

        let basename = name.rsplit('/').next().unwrap_or(&name);
        if catalog.is_excluded_file(basename) || catalog.is_excluded_extension(basename) {
            continue;
        }

        let mut out_path = extract_root.join(&name);
        if out_path.as_os_str().len() > MAX_PATH {
            let truncated: String = basename.chars().take(TRUNCATED_BASENAME).collect();
            out_path = out_path
                .parent()
                .map(|p| p.join(&truncated))
                .unwrap_or_else(|| extract_root.join(&truncated));
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("creating directories: {e}"))?;
        }
        let mut out = std::fs::File::create(&out_path)
            .map_err(|e| format!("creating {}: {e}", out_path.display()))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| format!("extracting {name}: {e}"))?;
    }

    Ok(())
}

/// Remove a scratch directory, logging rather than propagating failures.
pub fn delete_dir(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        if path.exists() {
            warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn platform_url_splits_on_git_segment() {
        let repo =
            parse_platform_url("https://tfs.corp.local/DefaultCollection/Web/Portal/_git/Backend")
                .unwrap();
        assert_eq!(repo.server, "tfs.corp.local");
        assert_eq!(repo.collection, "DefaultCollection/Web");
        assert_eq!(repo.project, "Portal");
        assert_eq!(repo.repository, "Backend");
        assert_eq!(
            repo.api_base(),
            "https://tfs.corp.local/DefaultCollection/Web/Portal/_apis/git/repositories/Backend"
        );
    }

    #[test]
    fn platform_url_errors_are_explicit() {
        assert!(parse_platform_url("https://host/no/git/segment").is_err());
        assert!(parse_platform_url("https://host/Proj/_git").is_err());
        assert!(parse_platform_url("https://host/_git/Repo").is_err());
        assert!(parse_platform_url("not a url").is_err());
    }

    #[test]
    fn ls_remote_commit_matches_by_prefix() {
        let output = "\
d4e5f6a7b8c9d4e5f6a7b8c9d4e5f6a7b8c9d4e5\tHEAD
0a1b2c3d4e5f0a1b2c3d4e5f0a1b2c3d4e5f0a1b\trefs/heads/main
";
        let res = match_ls_remote(output, RefType::Commit, "0a1b2c3d");
        assert!(res.exists);
        assert_eq!(res.commit_id.as_deref(), Some("0a1b2c3d"));

        let res = match_ls_remote(output, RefType::Commit, "ffff");
        assert!(!res.exists);
    }

    #[test]
    fn ls_remote_branch_matches_suffix_and_yields_id() {
        let output = "\
0a1b2c3d4e5f0a1b2c3d4e5f0a1b2c3d4e5f0a1b\trefs/heads/main
9f8e7d6c5b4a9f8e7d6c5b4a9f8e7d6c5b4a9f8e\trefs/heads/feature/main-v2
";
        let res = match_ls_remote(output, RefType::Branch, "main");
        assert!(res.exists);
        assert_eq!(
            res.commit_id.as_deref(),
            Some("0a1b2c3d4e5f0a1b2c3d4e5f0a1b2c3d4e5f0a1b")
        );

        let res = match_ls_remote(output, RefType::Branch, "does-not-exist");
        assert!(!res.exists);
        assert_eq!(res.message, "Branch not found");
    }

    #[test]
    fn auth_chain_adapts_to_available_credentials() {
        let full = CredentialProvider {
            login: Some("user".into()),
            password: Some("pass".into()),
            pat: Some("token".into()),
        };
        assert_eq!(
            auth_chain(&full),
            vec![AuthMethod::Basic, AuthMethod::Pat, AuthMethod::Negotiate]
        );

        let none = CredentialProvider::default();
        assert_eq!(auth_chain(&none), vec![AuthMethod::Negotiate]);
    }

    fn build_zip(entries: &[(&str, &str)]) -> tempfile::NamedTempFile {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(tmp.reopen().unwrap());
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        tmp
    }

    fn exclusion_catalog() -> RuleCatalog {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("rules.yml"), "[]\n").unwrap();
        std::fs::write(
            tmp.path().join("excluded_files.yml"),
            "excluded_files: [\"thumbs.db\"]\n",
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("excluded_extensions.yml"),
            "excluded_extensions: [\".png\"]\n",
        )
        .unwrap();
        std::fs::write(tmp.path().join("false-positive.yml"), "false_positive: []\n").unwrap();
        RuleCatalog::load(
            &tmp.path().join("rules.yml"),
            &tmp.path().join("excluded_files.yml"),
            &tmp.path().join("excluded_extensions.yml"),
            &tmp.path().join("false-positive.yml"),
        )
        .unwrap()
    }

    #[test]
    fn extraction_rejects_escapes_and_excluded_entries() {
        let zip = build_zip(&[
            ("repo/src/main.rs", "fn main() {}\n"),
            ("../evil.txt", "escape\n"),
            ("repo/../../evil2.txt", "escape\n"),
            ("repo/logo.png", "binary\n"),
            ("repo/Thumbs.db", "junk\n"),
        ]);
        let out = tempfile::tempdir().unwrap();
        let catalog = exclusion_catalog();

        safe_extract(zip.path(), out.path(), &catalog).unwrap();

        assert!(out.path().join("repo/src/main.rs").exists());
        assert!(!out.path().join("repo/logo.png").exists());
        assert!(!out.path().join("repo/Thumbs.db").exists());
        // Nothing escaped the extraction root.
        let parent_entries: Vec<_> = std::fs::read_dir(out.path().parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("evil"))
            .collect();
        assert!(parent_entries.is_empty());
    }

    #[test]
    fn overlong_paths_get_truncated_basenames() {
        let long_name = format!("repo/{}.txt", "n".repeat(300));
        let zip = build_zip(&[(long_name.as_str(), "content\n")]);
        let out = tempfile::tempdir().unwrap();
        let catalog = exclusion_catalog();

        safe_extract(zip.path(), out.path(), &catalog).unwrap();

        let extracted: Vec<_> = std::fs::read_dir(out.path().join("repo"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].file_name().to_string_lossy().chars().count(), TRUNCATED_BASENAME);
    }
}
