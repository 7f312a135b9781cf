//! On-disk artifact bundle shared by the trainer and the predictor.
//!
//! `vectorizer.bin` and `clf.bin` hold a bincode header (magic, format
//! version, kind, bundle fingerprint) followed by the payload. `model_version.txt` holds the
//! version identifier and `config.json` the training configuration.

use crate::{
    error::{corrupt, AppError, AppResult},
    features::{TfidfVectorizer, VectorizerParams},
    model::{LogisticRegression, SolverOptions},
};
use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, info, warn};

pub const MODEL_NAME: &str = "tfidf-logreg";
pub const VECTORIZER_FILE: &str = "vectorizer.bin";
pub const CLASSIFIER_FILE: &str = "clf.bin";
pub const VERSION_FILE: &str = "model_version.txt";
pub const CONFIG_FILE: &str = "config.json";
pub const UNKNOWN_VERSION: &str = "na";

const MAGIC: u64 = 0x5345_4e54_494d_454e;
const FORMAT_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    Vectorizer,
    Classifier,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactHeader {
    magic: u64,
    format_version: u32,
    kind: ArtifactKind,
    fingerprint: String,
}

/// Training configuration persisted as `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub n_train: usize,
    pub n_test: usize,
    pub seed: u64,
    pub max_features: usize,
    pub ngram_range: [usize; 2],
    pub min_df: usize,
    pub max_iter: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            n_train: 20_000,
            n_test: 5_000,
            seed: 42,
            max_features: 50_000,
            ngram_range: [1, 2],
            min_df: 2,
            max_iter: 2_000,
        }
    }
}

impl TrainingConfig {
    pub fn vectorizer_params(&self) -> VectorizerParams {
        VectorizerParams {
            ngram_range: (self.ngram_range[0], self.ngram_range[1]),
            min_df: self.min_df,
            max_features: self.max_features,
        }
    }

    pub fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            max_iter: self.max_iter,
            ..SolverOptions::default()
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        self.vectorizer_params().validate()?;
        if self.max_iter == 0 {
            return Err(AppError::InvalidConfig("max_iter must be positive".to_string()));
        }
        if self.n_train == 0 || self.n_test == 0 {
            return Err(AppError::InvalidConfig(
                "n_train and n_test must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the predictor needs, immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactBundle {
    pub vectorizer: TfidfVectorizer,
    pub classifier: LogisticRegression,
    pub version: String,
    pub config: Option<TrainingConfig>,
}

impl ArtifactBundle {
    /// Writes every artifact into `dir` and returns the paths written.
    ///
    /// The files are staged in a sibling directory that replaces `dir` only
    /// once all of them are on disk, so a failed save leaves the previous
    /// bundle untouched.
    pub fn save(&self, dir: &Path) -> AppResult<Vec<PathBuf>> {
        self.save_with(dir, |path, bytes| fs::write(path, bytes))
    }

    fn save_with<W>(&self, dir: &Path, mut write: W) -> AppResult<Vec<PathBuf>>
    where
        W: FnMut(&Path, &[u8]) -> io::Result<()>,
    {
        let parent = match dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(parent)?;

        let fingerprint = self.fingerprint();
        let mut names = vec![VECTORIZER_FILE, CLASSIFIER_FILE, VERSION_FILE];
        write(
            &staging.path().join(VECTORIZER_FILE),
            &encode(ArtifactKind::Vectorizer, &fingerprint, &self.vectorizer)?,
        )?;
        write(
            &staging.path().join(CLASSIFIER_FILE),
            &encode(ArtifactKind::Classifier, &fingerprint, &self.classifier)?,
        )?;
        write(
            &staging.path().join(VERSION_FILE),
            format!("{}\n", self.version).as_bytes(),
        )?;
        if let Some(config) = &self.config {
            write(
                &staging.path().join(CONFIG_FILE),
                serde_json::to_string_pretty(config)?.as_bytes(),
            )?;
            names.push(CONFIG_FILE);
        }

        swap_into_place(staging.path(), dir, parent)?;
        debug!(
            "Saved artifact bundle to {}: version {}, fingerprint {}",
            dir.display(),
            self.version,
            fingerprint
        );
        Ok(names.into_iter().map(|name| dir.join(name)).collect())
    }

    /// Ties the classifier to the vectorizer and version it was trained with.
    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.version.as_bytes());
        hasher.update([0u8]);
        let (lo, hi) = self.vectorizer.ngram_range();
        hasher.update((lo as u64).to_le_bytes());
        hasher.update((hi as u64).to_le_bytes());
        for (term, idf) in self.vectorizer.terms().iter().zip(self.vectorizer.idf()) {
            hasher.update(term.as_bytes());
            hasher.update([0u8]);
            hasher.update(idf.to_bits().to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Loads and cross-checks the bundle in `dir`.
    pub fn load(dir: &Path) -> AppResult<Self> {
        let vec_path = dir.join(VECTORIZER_FILE);
        let clf_path = dir.join(CLASSIFIER_FILE);

        let (vec_fingerprint, vectorizer): (_, TfidfVectorizer) =
            decode(&vec_path, ArtifactKind::Vectorizer)?;
        let (clf_fingerprint, classifier): (_, LogisticRegression) =
            decode(&clf_path, ArtifactKind::Classifier)?;

        if vec_fingerprint != clf_fingerprint {
            return Err(corrupt(
                &clf_path,
                format!(
                    "fingerprint {} does not match vectorizer fingerprint {}",
                    clf_fingerprint, vec_fingerprint
                ),
            ));
        }

        if classifier.n_features() != vectorizer.vocabulary_size() {
            return Err(corrupt(
                &clf_path,
                format!(
                    "classifier has {} weights but the vocabulary has {} terms",
                    classifier.n_features(),
                    vectorizer.vocabulary_size()
                ),
            ));
        }
        if !classifier.bias.is_finite() || classifier.weights.iter().any(|w| !w.is_finite()) {
            return Err(corrupt(&clf_path, "non-finite classifier parameters"));
        }

        let version = read_version(&dir.join(VERSION_FILE))?;
        let config = read_config(&dir.join(CONFIG_FILE));

        info!(
            "Loaded artifact bundle from {}: version {}, {} features",
            dir.display(),
            version,
            vectorizer.vocabulary_size()
        );

        Ok(Self {
            vectorizer,
            classifier,
            version,
            config,
        })
    }
}

fn codec() -> bincode::DefaultOptions {
    bincode::DefaultOptions::new()
}

fn encode<T: Serialize>(kind: ArtifactKind, fingerprint: &str, payload: &T) -> AppResult<Vec<u8>> {
    let header = ArtifactHeader {
        magic: MAGIC,
        format_version: FORMAT_VERSION,
        kind,
        fingerprint: fingerprint.to_string(),
    };
    let mut buf = codec().serialize(&header)?;
    buf.extend(codec().serialize(payload)?);
    Ok(buf)
}

/// Returns the header fingerprint together with the payload.
fn decode<T: DeserializeOwned>(path: &Path, expected: ArtifactKind) -> AppResult<(String, T)> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(AppError::ArtifactMissing(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    // Every length prefix is bounded by the file size.
    let limit = bytes.len() as u64;
    let mut cursor = bytes.as_slice();

    let header: ArtifactHeader = codec()
        .with_limit(limit)
        .deserialize_from(&mut cursor)
        .map_err(|e| corrupt(path, format!("unreadable header: {}", e)))?;
    if header.magic != MAGIC {
        return Err(corrupt(path, "not a sentiment-engine artifact"));
    }
    if header.format_version != FORMAT_VERSION {
        return Err(corrupt(
            path,
            format!(
                "format version {} (expected {})",
                header.format_version, FORMAT_VERSION
            ),
        ));
    }
    if header.kind != expected {
        return Err(corrupt(
            path,
            format!("holds a {:?} artifact, expected {:?}", header.kind, expected),
        ));
    }

    let payload: T = codec()
        .with_limit(limit)
        .deserialize_from(&mut cursor)
        .map_err(|e| corrupt(path, format!("unreadable payload: {}", e)))?;
    if !cursor.is_empty() {
        return Err(corrupt(path, format!("{} trailing bytes", cursor.len())));
    }
    Ok((header.fingerprint, payload))
}

/// Moves `staging` to `dir`. An existing `dir` is parked in a scratch
/// directory first and put back if the final rename fails.
fn swap_into_place(staging: &Path, dir: &Path, parent: &Path) -> AppResult<()> {
    if !dir.exists() {
        fs::rename(staging, dir)?;
        return Ok(());
    }

    let retired = tempfile::Builder::new()
        .prefix(".retired-")
        .tempdir_in(parent)?;
    let previous = retired.path().join("bundle");
    fs::rename(dir, &previous)?;
    if let Err(e) = fs::rename(staging, dir) {
        fs::rename(&previous, dir)?;
        return Err(e.into());
    }
    Ok(())
}

fn read_version(path: &Path) -> AppResult<String> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let version = content.trim();
            Ok(if version.is_empty() {
                UNKNOWN_VERSION.to_string()
            } else {
                version.to_string()
            })
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("{} not found, reporting version {}", path.display(), UNKNOWN_VERSION);
            Ok(UNKNOWN_VERSION.to_string())
        }
        Err(e) => Err(e.into()),
    }
}

fn read_config(path: &Path) -> Option<TrainingConfig> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("Ignoring unparsable {}: {}", path.display(), e);
            None
        }
    }
}

/// Short source-control revision of the working tree, or `"na"`.
pub fn git_short_sha_or_na() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|sha| sha.trim().to_string())
        .filter(|sha| !sha.is_empty())
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}

/// Explicit override when given and non-blank, otherwise the git revision.
pub fn resolve_version(override_version: Option<&str>) -> String {
    match override_version.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => git_short_sha_or_na(),
    }
}
