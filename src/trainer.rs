use crate::{
    artifacts::{ArtifactBundle, TrainingConfig},
    dataset::{load_split, LabeledCorpus},
    error::{AppError, AppResult},
    features::TfidfVectorizer,
    metrics::{Evaluation, MetricsReport},
    model::{FitReport, LogisticRegression},
};
use std::{fmt, fs, path::PathBuf, time::Instant};
use tracing::info;

/// Trainer stages, in the only order they may be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrainStage {
    LoadingData,
    FittingVectorizer,
    FittingClassifier,
    Evaluating,
    PersistingArtifacts,
    Done,
}

impl TrainStage {
    pub const ALL: [TrainStage; 6] = [
        TrainStage::LoadingData,
        TrainStage::FittingVectorizer,
        TrainStage::FittingClassifier,
        TrainStage::Evaluating,
        TrainStage::PersistingArtifacts,
        TrainStage::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrainStage::LoadingData => "loading-data",
            TrainStage::FittingVectorizer => "fitting-vectorizer",
            TrainStage::FittingClassifier => "fitting-classifier",
            TrainStage::Evaluating => "evaluating",
            TrainStage::PersistingArtifacts => "persisting-artifacts",
            TrainStage::Done => "done",
        }
    }
}

impl fmt::Display for TrainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TrainerOptions {
    pub config: TrainingConfig,
    pub train_path: PathBuf,
    pub test_path: PathBuf,
    pub artifact_dir: PathBuf,
    pub metrics_path: PathBuf,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub metrics: MetricsReport,
    pub evaluation: Evaluation,
    pub fit: FitReport,
    pub vocabulary_size: usize,
    pub artifacts: Vec<PathBuf>,
    pub stages: Vec<TrainStage>,
}

/// One training run. Any stage failure ends the run; nothing is retried.
pub struct Trainer {
    options: TrainerOptions,
    stage: TrainStage,
    visited: Vec<TrainStage>,
}

impl Trainer {
    pub fn new(options: TrainerOptions) -> Self {
        Self {
            options,
            stage: TrainStage::LoadingData,
            visited: vec![TrainStage::LoadingData],
        }
    }

    pub fn stage(&self) -> TrainStage {
        self.stage
    }

    fn advance(&mut self, next: TrainStage) {
        assert!(
            next > self.stage,
            "trainer cannot move from {} back to {}",
            self.stage,
            next
        );
        info!("[stage] {} -> {}", self.stage, next);
        self.stage = next;
        self.visited.push(next);
    }

    /// Loads both splits from disk, then fits, evaluates and persists.
    pub fn run(self) -> AppResult<TrainOutcome> {
        self.options.config.validate()?;
        let config = &self.options.config;
        info!(
            "[stage] {}: n_train={} n_test={} seed={}",
            self.stage, config.n_train, config.n_test, config.seed
        );
        let train = load_split(&self.options.train_path, config.n_train, config.seed)?;
        let test = load_split(&self.options.test_path, config.n_test, config.seed)?;
        self.run_with_corpora(train, test)
    }

    /// Runs every stage after loading-data on corpora already in memory.
    pub fn run_with_corpora(
        mut self,
        train: LabeledCorpus,
        test: LabeledCorpus,
    ) -> AppResult<TrainOutcome> {
        self.options.config.validate()?;
        if train.is_empty() || test.is_empty() {
            return Err(AppError::DataUnavailable("empty split".to_string()));
        }
        let positives = train.count_positive();
        if positives == 0 || positives == train.len() {
            return Err(AppError::DataUnavailable(
                "training split contains a single class".to_string(),
            ));
        }

        self.advance(TrainStage::FittingVectorizer);
        let started = Instant::now();
        let vectorizer =
            TfidfVectorizer::fit(&train.texts, &self.options.config.vectorizer_params())?;
        info!("Vocabulary size: {}", vectorizer.vocabulary_size());
        let x_train = vectorizer.transform_batch(&train.texts);

        self.advance(TrainStage::FittingClassifier);
        let (classifier, fit) = LogisticRegression::fit(
            &x_train,
            &train.labels,
            &self.options.config.solver_options(),
        )?;
        let train_time = started.elapsed();
        info!(
            "Fitted in {:.2}s ({} iterations, {} non-zeros)",
            train_time.as_secs_f64(),
            fit.iterations,
            x_train.nnz()
        );

        self.advance(TrainStage::Evaluating);
        let x_test = vectorizer.transform_batch(&test.texts);
        let predictions = classifier.predict_batch(&x_test);
        let evaluation = Evaluation::compute(&test.labels, &predictions);
        info!("[report]\n{}", evaluation.format());

        self.advance(TrainStage::PersistingArtifacts);
        let vocabulary_size = vectorizer.vocabulary_size();
        let bundle = ArtifactBundle {
            vectorizer,
            classifier,
            version: self.options.version.clone(),
            config: Some(self.options.config.clone()),
        };
        let artifacts = bundle.save(&self.options.artifact_dir)?;

        let metrics = MetricsReport::new(&evaluation, train_time);
        if let Some(parent) = self.options.metrics_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(
            &self.options.metrics_path,
            serde_json::to_string_pretty(&metrics)?,
        )?;

        self.advance(TrainStage::Done);
        info!(
            "[done] accuracy={:.4} precision={:.4} recall={:.4} f1={:.4} train_secs={} artifacts={:?}",
            metrics.accuracy,
            metrics.precision,
            metrics.recall,
            metrics.f1,
            metrics.train_secs,
            artifacts
        );

        Ok(TrainOutcome {
            metrics,
            evaluation,
            fit,
            vocabulary_size,
            artifacts,
            stages: self.visited,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{artifacts::VERSION_FILE, engine::SentimentEngine, types::Label};
    use std::path::Path;

    fn write_toy_csv(path: &Path, repeats: usize) {
        let mut body = String::from("label,title,content\n");
        for _ in 0..repeats {
            body.push_str("1,,great product\n");
            body.push_str("0,,terrible product\n");
        }
        fs::write(path, body).unwrap();
    }

    fn options(dir: &Path, min_df: usize) -> TrainerOptions {
        TrainerOptions {
            config: TrainingConfig {
                n_train: 100,
                n_test: 20,
                seed: 42,
                max_features: 1000,
                ngram_range: [1, 2],
                min_df,
                max_iter: 200,
            },
            train_path: dir.join("train.csv"),
            test_path: dir.join("test.csv"),
            artifact_dir: dir.join("models").join("tfidf"),
            metrics_path: dir.join("out").join("metrics.json"),
            version: "abc1234".to_string(),
        }
    }

    #[test]
    fn test_stage_order() {
        assert!(TrainStage::ALL.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(TrainStage::PersistingArtifacts.to_string(), "persisting-artifacts");
    }

    #[test]
    fn test_end_to_end_training() {
        let dir = tempfile::tempdir().unwrap();
        write_toy_csv(&dir.path().join("train.csv"), 50);
        write_toy_csv(&dir.path().join("test.csv"), 10);
        let opts = options(dir.path(), 1);

        let outcome = Trainer::new(opts.clone()).run().unwrap();
        assert_eq!(outcome.stages, TrainStage::ALL.to_vec());
        assert_eq!(outcome.vocabulary_size, 5);
        assert_eq!(outcome.metrics.accuracy, 1.0);
        assert_eq!(outcome.metrics.f1, 1.0);
        assert_eq!(outcome.artifacts.len(), 4);

        let raw = fs::read_to_string(&opts.metrics_path).unwrap();
        let metrics: MetricsReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(metrics, outcome.metrics);
        assert_eq!(
            fs::read_to_string(opts.artifact_dir.join(VERSION_FILE)).unwrap(),
            "abc1234\n"
        );

        let engine = SentimentEngine::load(&opts.artifact_dir).unwrap();
        let great = engine.predict("great");
        let terrible = engine.predict("terrible");
        assert!(great.scores.positive > 0.5);
        assert_eq!(great.label, Label::Positive);
        assert!(terrible.scores.positive < 0.5);
        assert_eq!(engine.version(), "abc1234");
    }

    #[test]
    fn test_missing_corpus_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), 1);
        let err = Trainer::new(opts.clone()).run().unwrap_err();
        assert!(matches!(err, AppError::DataUnavailable(_)));
        assert!(!opts.artifact_dir.exists());
        assert!(!opts.metrics_path.exists());
    }

    #[test]
    fn test_empty_vocabulary_aborts_before_classifier() {
        let dir = tempfile::tempdir().unwrap();
        write_toy_csv(&dir.path().join("train.csv"), 2);
        write_toy_csv(&dir.path().join("test.csv"), 1);
        let opts = options(dir.path(), 10);
        let err = Trainer::new(opts.clone()).run().unwrap_err();
        assert!(matches!(err, AppError::EmptyVocabulary { min_df: 10, n_docs: 4 }));
        assert!(!opts.artifact_dir.exists());
    }

    #[test]
    fn test_single_class_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let train = LabeledCorpus {
            texts: vec!["great".to_string(), "great product".to_string()],
            labels: vec![1, 1],
        };
        let err = Trainer::new(options(dir.path(), 1))
            .run_with_corpora(train.clone(), train)
            .unwrap_err();
        assert!(matches!(err, AppError::DataUnavailable(_)));
    }

    #[test]
    fn test_iteration_cap_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path(), 1);
        opts.config.max_iter = 1;
        let mut train = LabeledCorpus::default();
        for _ in 0..20 {
            train.texts.push("great product".to_string());
            train.labels.push(1);
            train.texts.push("terrible product".to_string());
            train.labels.push(0);
        }
        let outcome = Trainer::new(opts.clone())
            .run_with_corpora(train.clone(), train)
            .unwrap();
        assert!(!outcome.fit.converged);
        assert_eq!(outcome.stages.last(), Some(&TrainStage::Done));
        assert!(opts.artifact_dir.join(crate::artifacts::CLASSIFIER_FILE).exists());
    }
}
