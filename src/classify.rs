//! Secret Classifier: character-n-gram TF-IDF + logistic regression.
//!
//! Loaded (or trained) exactly once at startup via [`Classifier::initialize`];
//! the returned handle is read-only and shared across CPU workers. Scoring
//! averages two signals — the matched token and its line context — into a
//! severity verdict.

use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ScanServerError;
use crate::scanner::{LONG_LINE_MARKER, TRUNCATED_FILE_MARKER};
use crate::types::{Finding, Severity};

const NGRAM_MIN: usize = 3;
const NGRAM_MAX: usize = 5;
const MAX_ITER: usize = 1000;
const SHUFFLE_SEED: u64 = 42;
const TRAIN_FRACTION: f64 = 0.8;
const HIGH_THRESHOLD: f64 = 0.70;

/// Sparse TF-IDF vector: (feature index, weight), sorted by index.
type SparseVec = Vec<(usize, f32)>;

// ---------------------------------------------------------------------------
// Boundary-aware character n-grams
// ---------------------------------------------------------------------------

/// Extract character n-grams (3..=5) per whitespace token, each token padded
/// with a single space on both sides. A token shorter than `n` contributes
/// the padded token itself, once.
fn char_wb_ngrams(text: &str, mut emit: impl FnMut(&str)) {
    let mut buf = String::new();
    for token in text.split_whitespace() {
        buf.clear();
        buf.push(' ');
        buf.push_str(token);
        buf.push(' ');
        let chars: Vec<char> = buf.chars().collect();
        let len = chars.len();
        let mut gram = String::new();
        for n in NGRAM_MIN..=NGRAM_MAX {
            let mut offset = 0;
            loop {
                gram.clear();
                gram.extend(chars[offset..(offset + n).min(len)].iter());
                emit(&gram);
                if offset + n >= len {
                    break;
                }
                offset += 1;
            }
            // A token shorter than n is a single feature; larger n repeats it.
            if offset == 0 {
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TF-IDF vectorizer
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
pub struct Vectorizer {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
}

impl Vectorizer {
    /// Fit vocabulary and smoothed IDF on the training documents.
    pub fn fit(docs: &[String]) -> Vectorizer {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        for (doc_idx, doc) in docs.iter().enumerate() {
            char_wb_ngrams(doc, |gram| {
                let marker = seen.entry(gram.to_string()).or_insert(usize::MAX);
                if *marker != doc_idx {
                    *marker = doc_idx;
                    *doc_freq.entry(gram.to_string()).or_insert(0) += 1;
                }
            });
        }

        let mut features: Vec<String> = doc_freq.keys().cloned().collect();
        features.sort();

        let n = docs.len() as f32;
        let mut vocabulary = HashMap::with_capacity(features.len());
        let mut idf = Vec::with_capacity(features.len());
        for (idx, feature) in features.into_iter().enumerate() {
            let df = doc_freq[&feature] as f32;
            idf.push(((1.0 + n) / (1.0 + df)).ln() + 1.0);
            vocabulary.insert(feature, idx);
        }

        Vectorizer { vocabulary, idf }
    }

    pub fn dim(&self) -> usize {
        self.idf.len()
    }

    /// Transform one document into an L2-normalized sparse TF-IDF vector.
    /// Out-of-vocabulary n-grams are dropped.
    pub fn transform(&self, text: &str) -> SparseVec {
        let mut counts: HashMap<usize, f32> = HashMap::new();
        char_wb_ngrams(text, |gram| {
            if let Some(&idx) = self.vocabulary.get(gram) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        });

        let mut vec: SparseVec =
            counts.into_iter().map(|(idx, tf)| (idx, tf * self.idf[idx])).collect();
        vec.sort_by_key(|&(idx, _)| idx);

        let norm: f32 = vec.iter().map(|&(_, w)| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for (_, w) in vec.iter_mut() {
                *w /= norm;
            }
        }
        vec
    }
}

// ---------------------------------------------------------------------------
// Logistic regression
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
pub struct LogisticModel {
    weights: Vec<f32>,
    intercept: f32,
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

impl LogisticModel {
    /// Full-batch gradient descent with L2 regularization, at most
    /// `max_iter` iterations or until the gradient norm stalls.
    pub fn fit(samples: &[SparseVec], labels: &[f32], dim: usize, max_iter: usize) -> LogisticModel {
        let n = samples.len().max(1) as f32;
        let mut weights = vec![0.0f32; dim];
        let mut intercept = 0.0f32;
        let lr = 0.5f32;
        let l2 = 1.0f32 / n;

        for _ in 0..max_iter {
            let mut grad_w = vec![0.0f32; dim];
            let mut grad_b = 0.0f32;

            for (x, &y) in samples.iter().zip(labels) {
                let mut z = intercept;
                for &(idx, w) in x {
                    z += weights[idx] * w;
                }
                let err = sigmoid(z) - y;
                for &(idx, w) in x {
                    grad_w[idx] += err * w;
                }
                grad_b += err;
            }

            let mut grad_norm = 0.0f32;
            for (w, g) in weights.iter_mut().zip(grad_w.iter()) {
                let g = g / n + l2 * *w;
                *w -= lr * g;
                grad_norm += g * g;
            }
            intercept -= lr * grad_b / n;
            grad_norm += (grad_b / n).powi(2);

            if grad_norm.sqrt() < 1e-6 {
                break;
            }
        }

        LogisticModel { weights, intercept }
    }

    /// Probability of class 1 (secret).
    pub fn predict_proba(&self, x: &SparseVec) -> f64 {
        let mut z = self.intercept;
        for &(idx, w) in x {
            if let Some(&weight) = self.weights.get(idx) {
                z += weight * w;
            }
        }
        sigmoid(z) as f64
    }
}

// ---------------------------------------------------------------------------
// Classifier lifecycle
// ---------------------------------------------------------------------------

pub struct Classifier {
    vectorizer: Vectorizer,
    model: LogisticModel,
}

impl Classifier {
    /// Load persisted artifacts, or train from the two line-per-sample
    /// corpora and persist. Called once at startup; training is idempotent.
    pub fn initialize(config: &Config) -> Result<Arc<Classifier>> {
        let model_path = config.model_path();
        let vectorizer_path = config.vectorizer_path();

        if model_path.exists() && vectorizer_path.exists() {
            let started = std::time::Instant::now();
            let vectorizer = load_artifact(&vectorizer_path)?;
            let model = load_artifact(&model_path)?;
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "Classifier artifacts loaded");
            return Ok(Arc::new(Classifier { vectorizer, model }));
        }

        info!("Classifier artifacts not found, training from datasets");
        let started = std::time::Instant::now();
        let classifier = Classifier::train(
            &config.secrets_dataset_path(),
            &config.non_secrets_dataset_path(),
        )?;
        persist_artifact(&vectorizer_path, &classifier.vectorizer)?;
        persist_artifact(&model_path, &classifier.model)?;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Classifier trained and persisted"
        );
        Ok(Arc::new(classifier))
    }

    /// Train on the positive / negative corpora: deterministic shuffle,
    /// 80/20 split, fit on the training split only.
    pub fn train(secrets_path: &Path, non_secrets_path: &Path) -> Result<Classifier> {
        let secrets = read_dataset(secrets_path)?;
        let non_secrets = read_dataset(non_secrets_path)?;
        if secrets.is_empty() || non_secrets.is_empty() {
            return Err(anyhow!("training corpora must both be non-empty"));
        }

        let mut labeled: Vec<(String, f32)> = secrets
            .into_iter()
            .map(|s| (s, 1.0))
            .chain(non_secrets.into_iter().map(|s| (s, 0.0)))
            .collect();
        let mut rng = StdRng::seed_from_u64(SHUFFLE_SEED);
        labeled.shuffle(&mut rng);

        let split = ((labeled.len() as f64) * TRAIN_FRACTION).round() as usize;
        let train = &labeled[..split.max(1)];

        let docs: Vec<String> = train.iter().map(|(s, _)| s.clone()).collect();
        let labels: Vec<f32> = train.iter().map(|&(_, y)| y).collect();

        let vectorizer = Vectorizer::fit(&docs);
        let vectors: Vec<SparseVec> = docs.iter().map(|d| vectorizer.transform(d)).collect();
        let model = LogisticModel::fit(&vectors, &labels, vectorizer.dim(), MAX_ITER);

        Ok(Classifier { vectorizer, model })
    }

    // -----------------------------------------------------------------------
    // Batch scoring
    // -----------------------------------------------------------------------

    /// Assign a severity verdict to every unclassified finding. Findings that
    /// already carry a severity (sentinels, re-classification) are untouched.
    /// Any internal failure downgrades to the safe default: High / 1.00.
    pub fn classify(&self, mut findings: Vec<Finding>) -> Vec<Finding> {
        match self.classify_inner(&mut findings) {
            Ok(()) => findings,
            Err(e) => {
                let err = ScanServerError::Classify(e.to_string());
                warn!(error = %err, "Classification failed, defaulting all findings to High");
                for f in findings.iter_mut() {
                    if !f.severity.is_classified() {
                        f.severity = Severity::High;
                        f.confidence = 1.0;
                    }
                }
                findings
            }
        }
    }

    fn classify_inner(&self, findings: &mut [Finding]) -> Result<()> {
        if self.vectorizer.dim() == 0 {
            return Err(anyhow!("vectorizer has an empty vocabulary"));
        }

        for f in findings.iter_mut() {
            if f.severity.is_classified() {
                continue;
            }

            // Truncation sentinels that arrive unclassified get the fixed verdict.
            if f.secret.contains(LONG_LINE_MARKER) || f.secret.contains(TRUNCATED_FILE_MARKER) {
                f.confidence = 0.50;
                f.severity = Severity::Potential;
                continue;
            }

            let secret_vec = self.vectorizer.transform(&f.secret);
            let p_secret = self.model.predict_proba(&secret_vec);
            f.secret_confidence = Some(p_secret);
            f.secret_prediction = Some(p_secret > 0.5);

            let context = f.context.trim();
            let confidence = if context.is_empty() {
                f.confidence_averaged = false;
                p_secret
            } else {
                let context_vec = self.vectorizer.transform(context);
                let p_context = self.model.predict_proba(&context_vec);
                f.context_confidence = Some(p_context);
                f.context_prediction = Some(p_context > 0.5);
                f.confidence_averaged = true;
                (p_secret + p_context) / 2.0
            };

            f.confidence = confidence;
            f.severity =
                if confidence > HIGH_THRESHOLD { Severity::High } else { Severity::Potential };
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Artifact I/O
// ---------------------------------------------------------------------------

fn read_dataset(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading dataset {}", path.display()))?;
    Ok(raw.lines().filter(|l| !l.trim().is_empty()).map(|l| l.to_string()).collect())
}

fn load_artifact<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening artifact {}", path.display()))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("parsing artifact {}", path.display()))
}

/// Write the artifact to a temp file in the same directory, then rename over
/// the target, so a crash never leaves a half-written artifact.
fn persist_artifact<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact")
    ));
    let file = std::fs::File::create(&tmp)
        .with_context(|| format!("creating {}", tmp.display()))?;
    serde_json::to_writer(std::io::BufWriter::new(file), value)?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("renaming artifact into {}", path.display()))
}
