use crate::{
    artifacts::{ArtifactBundle, MODEL_NAME},
    error::AppResult,
    types::{HealthResponse, Label, Prediction, Scores},
};
use std::path::Path;
use tracing::{debug, info};

/// Loaded model shared by every request. Holds no mutable state, so it can be
/// read from any number of handlers at once.
#[derive(Debug)]
pub struct SentimentEngine {
    bundle: ArtifactBundle,
}

impl SentimentEngine {
    /// Loads the artifact bundle from `dir`; any missing or unreadable artifact is fatal.
    pub fn load(dir: &Path) -> AppResult<Self> {
        info!("Initializing Sentiment Engine from {}...", dir.display());
        let bundle = ArtifactBundle::load(dir)?;
        info!(
            "Sentiment Engine initialized: model {}, version {}, {} features",
            MODEL_NAME,
            bundle.version,
            bundle.vectorizer.vocabulary_size()
        );
        Ok(Self::from_bundle(bundle))
    }

    pub fn from_bundle(bundle: ArtifactBundle) -> Self {
        Self { bundle }
    }

    pub fn bundle(&self) -> &ArtifactBundle {
        &self.bundle
    }

    pub fn version(&self) -> &str {
        &self.bundle.version
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            model: MODEL_NAME.to_string(),
            version: self.bundle.version.clone(),
        }
    }

    pub fn predict(&self, text: &str) -> Prediction {
        let features = self.bundle.vectorizer.transform(text);
        let (negative, positive) = self.bundle.classifier.predict_proba(&features);
        let label = Label::from_probability(positive);
        debug!(
            "Predicted {} (p_positive {:.4}, {} known n-grams)",
            label.as_str(),
            positive,
            features.nnz()
        );

        Prediction {
            label,
            scores: Scores { negative, positive },
            version: self.bundle.version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        features::{TfidfVectorizer, VectorizerParams},
        model::{LogisticRegression, SolverOptions},
    };
    use std::sync::Arc;

    fn engine_with_bias(bias: f64) -> SentimentEngine {
        let docs = ["great product", "terrible product"];
        let params = VectorizerParams {
            ngram_range: (1, 2),
            min_df: 1,
            max_features: 100,
        };
        let vectorizer = TfidfVectorizer::fit(&docs, &params).unwrap();
        let classifier = LogisticRegression {
            weights: vec![0.0; vectorizer.vocabulary_size()],
            bias,
        };
        SentimentEngine::from_bundle(ArtifactBundle {
            vectorizer,
            classifier,
            version: "test".to_string(),
            config: None,
        })
    }

    fn trained_engine() -> SentimentEngine {
        let mut docs = Vec::new();
        let mut labels = Vec::new();
        for _ in 0..50 {
            docs.push("great product");
            labels.push(1);
            docs.push("terrible product");
            labels.push(0);
        }
        let params = VectorizerParams {
            ngram_range: (1, 2),
            min_df: 1,
            max_features: 100,
        };
        let vectorizer = TfidfVectorizer::fit(&docs, &params).unwrap();
        let x = vectorizer.transform_batch(&docs);
        let (classifier, _) =
            LogisticRegression::fit(&x, &labels, &SolverOptions::default()).unwrap();
        SentimentEngine::from_bundle(ArtifactBundle {
            vectorizer,
            classifier,
            version: "abc1234".to_string(),
            config: None,
        })
    }

    #[test]
    fn test_health() {
        let health = trained_engine().health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.model, "tfidf-logreg");
        assert_eq!(health.version, "abc1234");
    }

    #[test]
    fn test_predict_labels() {
        let engine = trained_engine();
        let great = engine.predict("Great!");
        assert_eq!(great.label, Label::Positive);
        assert!(great.scores.positive > 0.5);
        let terrible = engine.predict("terrible");
        assert_eq!(terrible.label, Label::Negative);
        assert_eq!(terrible.version, "abc1234");
    }

    #[test]
    fn test_predict_is_deterministic() {
        let engine = trained_engine();
        let a = engine.predict("great product but terrible box");
        let b = engine.predict("great product but terrible box");
        assert_eq!(a.label, b.label);
        assert_eq!(a.scores.positive.to_bits(), b.scores.positive.to_bits());
        assert_eq!(a.scores.negative.to_bits(), b.scores.negative.to_bits());
    }

    #[test]
    fn test_empty_text_uses_bias_only() {
        let engine = engine_with_bias(0.8);
        let p = engine.predict("");
        assert_eq!(p.label, Label::Positive);
        assert!((p.scores.positive - crate::model::sigmoid(0.8)).abs() < 1e-15);
        assert!((p.scores.negative + p.scores.positive - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_tokens_follow_sign_of_bias() {
        assert_eq!(engine_with_bias(-0.3).predict("zebra quokka").label, Label::Negative);
        assert_eq!(engine_with_bias(0.3).predict("zebra quokka").label, Label::Positive);
        // exactly 0.5 is positive
        let tie = engine_with_bias(0.0).predict("zebra quokka");
        assert_eq!(tie.scores.positive, 0.5);
        assert_eq!(tie.label, Label::Positive);
    }

    #[test]
    fn test_concurrent_predictions_agree() {
        let engine = Arc::new(trained_engine());
        let expected = engine.predict("great value");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || engine.predict("great value"))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }
}
