//! End-to-end pipeline tests: queue → worker → scan → classify → callback,
//! with no external network (archives come from an in-process server and
//! uploads go through the local-scan path).

mod helpers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use secretscan_server::classify::Classifier;
use secretscan_server::config::HubKind;
use secretscan_server::courier::Courier;
use secretscan_server::credentials::CredentialProvider;
use secretscan_server::fetch::Fetcher;
use secretscan_server::queue::{JobQueue, WorkerContext, WorkerPool};
use secretscan_server::rules::RuleCatalog;
use secretscan_server::types::{QueueItem, RefType, ScanJob};

use helpers::{
    build_zip_bytes, start_archive_server, test_config, write_datasets, write_settings,
    CallbackSink,
};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

struct TestRig {
    _root: tempfile::TempDir,
    queue: Arc<JobQueue>,
    _pool: WorkerPool,
}

async fn start_rig(hub: HubKind, max_workers: usize) -> TestRig {
    let root = tempfile::tempdir().unwrap();
    write_settings(&root.path().join("Settings"));
    write_datasets(&root.path().join("Datasets"));
    let config = Arc::new(test_config(root.path(), hub, max_workers));

    let catalog = Arc::new(
        RuleCatalog::load(
            &config.rules_path(),
            &config.excluded_files_path(),
            &config.excluded_extensions_path(),
            &config.false_positive_path(),
        )
        .unwrap(),
    );
    let classifier = {
        let config = Arc::clone(&config);
        tokio::task::spawn_blocking(move || Classifier::initialize(&config)).await.unwrap().unwrap()
    };
    let fetcher = Arc::new(Fetcher::new(config.hub, CredentialProvider::default()).unwrap());
    let courier = Arc::new(Courier::new().unwrap());
    let queue = JobQueue::new(config.max_workers);

    let ctx = WorkerContext::new(
        Arc::clone(&config),
        Arc::clone(&queue),
        catalog,
        classifier,
        fetcher,
        courier,
        Arc::new(Vec::new()),
    );
    let pool = WorkerPool::start(ctx);

    TestRig { _root: root, queue, _pool: pool }
}

fn job(name: &str, repo_url: &str, callback_url: &str) -> ScanJob {
    ScanJob {
        project_name: name.to_string(),
        repo_url: repo_url.to_string(),
        ref_type: RefType::Branch,
        git_ref: "main".to_string(),
        callback_url: callback_url.to_string(),
    }
}

#[tokio::test]
async fn local_scan_delivers_classified_findings() {
    let rig = start_rig(HubKind::GitHub, 2).await;
    let sink = CallbackSink::start().await;

    let archive = build_zip_bytes(&[
        ("config.env", "password = \"hunter2!@#\"\n"),
        ("src/main.py", "print('hello')\n"),
        ("logo.png", "not really an image\n"),
    ]);

    let scan = job("local-project", "", &sink.url());
    rig.queue
        .try_enqueue(QueueItem::Local { job: scan, archive: Arc::new(archive) })
        .unwrap();

    let reports = sink.wait_for_envelopes(1, CALLBACK_TIMEOUT).await;
    let report = &reports[0];

    assert_eq!(report["Status"], "completed");
    assert_eq!(report["ProjectName"], "local-project");
    assert_eq!(report["Message"], "Scanned Successfully");
    // .png is excluded, so two files are scanned.
    assert_eq!(report["FilesScanned"], 2);

    let results = report["Results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    let finding = &results[0];
    assert_eq!(finding["Type"], "Password");
    assert_eq!(finding["line"], 1);
    assert_eq!(finding["path"], "config.env");

    // Delivered findings always carry a verdict and a normalized path.
    let severity = finding["severity"].as_str().unwrap();
    assert!(severity == "High" || severity == "Potential");
    let path = finding["path"].as_str().unwrap();
    assert!(!path.starts_with('/'));
    assert!(!path.contains('\\'));

    // Discovery maps rode along.
    assert!(report["Languages"].as_object().unwrap().contains_key("Python"));

    // Progress pings were posted before the final report.
    assert!(!sink.partials().is_empty());
}

#[tokio::test]
async fn downloaded_scan_completes_via_archive_endpoint() {
    let rig = start_rig(HubKind::GitHub, 2).await;
    let sink = CallbackSink::start().await;

    let commit = "c".repeat(40);
    let archive = build_zip_bytes(&[("repo-main/app.cfg", "api_key = sk_live_abcdef123456\n")]);
    let mut archives = HashMap::new();
    archives.insert(format!("/repo/archive/{commit}.zip"), archive);
    let server = start_archive_server(archives).await;

    let scan = job("remote-project", &format!("http://{server}/repo"), &sink.url());
    rig.queue.try_enqueue(QueueItem::Single { job: scan, commit_id: commit.clone() }).unwrap();

    let reports = sink.wait_for_envelopes(1, CALLBACK_TIMEOUT).await;
    let report = &reports[0];
    assert_eq!(report["Status"], "completed");
    assert_eq!(report["RepoCommit"], commit.as_str());
    assert_eq!(report["FilesScanned"], 1);

    let results = report["Results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["Type"], "Api Token");
    assert_eq!(results[0]["path"], "repo-main/app.cfg");
}

#[tokio::test]
async fn failed_download_produces_error_callback() {
    let rig = start_rig(HubKind::GitHub, 2).await;
    let sink = CallbackSink::start().await;

    // Archive server knows nothing about this repo.
    let server = start_archive_server(HashMap::new()).await;
    let scan = job("missing-project", &format!("http://{server}/gone"), &sink.url());
    rig.queue
        .try_enqueue(QueueItem::Single { job: scan, commit_id: "d".repeat(40) })
        .unwrap();

    let reports = sink.wait_for_envelopes(1, CALLBACK_TIMEOUT).await;
    assert_eq!(reports[0]["Status"], "Error");
    assert!(reports[0]["Message"].as_str().unwrap().contains("404"));
}

#[tokio::test]
async fn multi_scan_is_sequential_and_survives_one_failure() {
    let rig = start_rig(HubKind::GitHub, 2).await;
    let sink = CallbackSink::start().await;

    let commits: Vec<String> =
        ["1", "2", "3"].iter().map(|d| d.repeat(40)).collect();
    let mut archives = HashMap::new();
    archives.insert(
        format!("/repo-a/archive/{}.zip", commits[0]),
        build_zip_bytes(&[("a/creds.txt", "password = alpha_secret_1\n")]),
    );
    // repo-b's archive is intentionally absent.
    archives.insert(
        format!("/repo-c/archive/{}.zip", commits[2]),
        build_zip_bytes(&[("c/creds.txt", "password = gamma_secret_3\n")]),
    );
    let server = start_archive_server(archives).await;

    let jobs = vec![
        job("project-a", &format!("http://{server}/repo-a"), &sink.url()),
        job("project-b", &format!("http://{server}/repo-b"), &sink.url()),
        job("project-c", &format!("http://{server}/repo-c"), &sink.url()),
    ];
    rig.queue.try_enqueue(QueueItem::Multi { jobs, commit_ids: commits }).unwrap();

    // Callbacks arrive in submission order; the middle failure is isolated.
    let reports = sink.wait_for_envelopes(3, CALLBACK_TIMEOUT).await;
    assert_eq!(reports[0]["Status"], "completed");
    assert_eq!(reports[0]["ProjectName"], "project-a");
    assert_eq!(reports[1]["Status"], "Error");
    assert_eq!(reports[2]["Status"], "completed");
    assert_eq!(reports[2]["ProjectName"], "project-c");
}

#[tokio::test]
async fn oversized_file_collapses_to_sentinel_end_to_end() {
    let rig = start_rig(HubKind::GitHub, 2).await;
    let sink = CallbackSink::start().await;

    let body: String = (0..60).map(|i| format!("password = leak{i}\n")).collect();
    let archive = build_zip_bytes(&[("dump.txt", body.as_str())]);
    let scan = job("noisy-project", "", &sink.url());
    rig.queue.try_enqueue(QueueItem::Local { job: scan, archive: Arc::new(archive) }).unwrap();

    let reports = sink.wait_for_envelopes(1, CALLBACK_TIMEOUT).await;
    let results = reports[0]["Results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["Type"], "Too Many Secrets");
    assert_eq!(results[0]["severity"], "High");
    assert_eq!(results[0]["line"], 0);
}
