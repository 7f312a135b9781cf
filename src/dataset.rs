use crate::error::{AppError, AppResult};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct ReviewRecord {
    label: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Documents paired with binary labels (0 = negative, 1 = positive).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabeledCorpus {
    pub texts: Vec<String>,
    pub labels: Vec<u8>,
}

impl LabeledCorpus {
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn count_positive(&self) -> usize {
        self.labels.iter().filter(|&&y| y == 1).count()
    }

    /// Reorders documents and labels together with a seeded permutation.
    pub fn shuffle(&mut self, seed: u64) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        order.shuffle(&mut rng);
        let mut texts = std::mem::take(&mut self.texts);
        self.texts = order.iter().map(|&i| std::mem::take(&mut texts[i])).collect();
        self.labels = order.iter().map(|&i| self.labels[i]).collect();
    }
}

/// Title and body joined by a single space; a missing part counts as empty.
pub fn join_review(title: Option<&str>, content: Option<&str>) -> String {
    format!("{} {}", title.unwrap_or(""), content.unwrap_or(""))
}

/// Reads the first `limit` rows of a `label,title,content` CSV split and
/// shuffles them with `seed`.
pub fn load_split(path: &Path, limit: usize, seed: u64) -> AppResult<LabeledCorpus> {
    let unavailable =
        |reason: String| AppError::DataUnavailable(format!("{}: {}", path.display(), reason));

    let mut reader = csv::Reader::from_path(path).map_err(|e| unavailable(e.to_string()))?;

    let mut corpus = LabeledCorpus::default();
    for (row, record) in reader.deserialize::<ReviewRecord>().take(limit).enumerate() {
        let record = record.map_err(|e| unavailable(format!("row {}: {}", row + 1, e)))?;
        let label = match record.label {
            0 => 0,
            1 => 1,
            other => {
                return Err(unavailable(format!(
                    "row {}: label {} is not 0 or 1",
                    row + 1,
                    other
                )))
            }
        };
        corpus
            .texts
            .push(join_review(record.title.as_deref(), record.content.as_deref()));
        corpus.labels.push(label);
    }

    if corpus.is_empty() {
        return Err(unavailable("no rows".to_string()));
    }
    if corpus.len() < limit {
        warn!(
            "{} has {} rows, fewer than the {} requested",
            path.display(),
            corpus.len(),
            limit
        );
    }

    corpus.shuffle(seed);
    info!(
        "Loaded {} documents ({} positive) from {}",
        corpus.len(),
        corpus.count_positive(),
        path.display()
    );
    Ok(corpus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_join_review() {
        assert_eq!(join_review(Some("Great"), Some("Loved it")), "Great Loved it");
        assert_eq!(join_review(None, Some("body")), " body");
        assert_eq!(join_review(None, None), " ");
    }

    #[test]
    fn test_load_split_respects_limit_and_joins() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "train.csv",
            "label,title,content\n1,Great,Works well\n0,Bad,\"Broke, fast\"\n1,,Fine\n",
        );
        let corpus = load_split(&path, 2, 7).unwrap();
        assert_eq!(corpus.len(), 2);
        let mut texts = corpus.texts.clone();
        texts.sort();
        assert_eq!(texts, vec!["Bad Broke, fast", "Great Works well"]);
        for (text, label) in corpus.texts.iter().zip(&corpus.labels) {
            assert_eq!(*label == 1, text.starts_with("Great"));
        }
    }

    #[test]
    fn test_load_split_shuffle_is_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = String::from("label,title,content\n");
        for i in 0..20 {
            body.push_str(&format!("{},title {},body {}\n", i % 2, i, i));
        }
        let path = write_csv(&dir, "train.csv", &body);
        let a = load_split(&path, 20, 42).unwrap();
        let b = load_split(&path, 20, 42).unwrap();
        assert_eq!(a, b);
        let c = load_split(&path, 20, 43).unwrap();
        assert_ne!(a.texts, c.texts);
        assert_eq!(a.count_positive(), 10);
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_split(&dir.path().join("nope.csv"), 10, 1).unwrap_err();
        assert!(matches!(err, AppError::DataUnavailable(_)));
    }

    #[test]
    fn test_bad_label_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "train.csv", "label,title,content\n2,a,b\n");
        let err = load_split(&path, 10, 1).unwrap_err();
        assert!(matches!(err, AppError::DataUnavailable(msg) if msg.contains("label 2")));
    }

    #[test]
    fn test_empty_split_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "test.csv", "label,title,content\n");
        assert!(matches!(
            load_split(&path, 10, 1),
            Err(AppError::DataUnavailable(_))
        ));
    }
}
