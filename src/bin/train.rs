//! Trains the TF-IDF + logistic regression pipeline and writes its artifacts.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use sentiment_engine::{
    artifacts::resolve_version,
    telemetry,
    trainer::{Trainer, TrainerOptions},
    TrainingConfig,
};

/// Every option can also be set through the environment variable shown.
#[derive(Debug, Parser)]
#[command(
    name = "train",
    about = "Train TF-IDF + logistic regression on a labeled review corpus"
)]
struct Args {
    #[arg(long, env = "N_TRAIN", default_value_t = 20_000)]
    n_train: usize,

    #[arg(long, env = "N_TEST", default_value_t = 5_000)]
    n_test: usize,

    #[arg(long, env = "SEED", default_value_t = 42)]
    seed: u64,

    #[arg(long, env = "MAX_FEATURES", default_value_t = 50_000)]
    max_features: usize,

    #[arg(long, env = "NGRAM_MIN", default_value_t = 1)]
    ngram_min: usize,

    #[arg(long, env = "NGRAM_MAX", default_value_t = 2)]
    ngram_max: usize,

    #[arg(long, env = "MIN_DF", default_value_t = 2)]
    min_df: usize,

    #[arg(long, env = "MAX_ITER", default_value_t = 2_000)]
    max_iter: usize,

    #[arg(long, env = "ARTIFACT_DIR", default_value = "models/tfidf")]
    artifact_dir: PathBuf,

    #[arg(long, env = "METRICS_PATH", default_value = "metrics.json")]
    metrics_path: PathBuf,

    /// CSV with header `label,title,content`
    #[arg(long, env = "TRAIN_PATH", default_value = "data/amazon_polarity/train.csv")]
    train_path: PathBuf,

    #[arg(long, env = "TEST_PATH", default_value = "data/amazon_polarity/test.csv")]
    test_path: PathBuf,

    /// Defaults to the short git revision, or "na" outside a repository
    #[arg(long, env = "MODEL_VERSION")]
    model_version: Option<String>,
}

impl Args {
    fn into_options(self) -> TrainerOptions {
        TrainerOptions {
            config: TrainingConfig {
                n_train: self.n_train,
                n_test: self.n_test,
                seed: self.seed,
                max_features: self.max_features,
                ngram_range: [self.ngram_min, self.ngram_max],
                min_df: self.min_df,
                max_iter: self.max_iter,
            },
            train_path: self.train_path,
            test_path: self.test_path,
            artifact_dir: self.artifact_dir,
            metrics_path: self.metrics_path,
            version: resolve_version(self.model_version.as_deref()),
        }
    }
}

fn main() -> anyhow::Result<()> {
    telemetry::init("sentiment_engine=info");

    let options = Args::parse().into_options();
    info!(
        "Training version {} into {}",
        options.version,
        options.artifact_dir.display()
    );

    let outcome = Trainer::new(options).run()?;
    println!("{}", serde_json::to_string_pretty(&outcome.metrics)?);
    Ok(())
}
