//! TF-IDF + logistic regression sentiment classifier: training pipeline,
//! artifact contract and HTTP prediction service.

pub mod artifacts;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod features;
pub mod metrics;
pub mod model;
pub mod routes;
pub mod telemetry;
pub mod trainer;
pub mod types;

pub use artifacts::{ArtifactBundle, TrainingConfig};
pub use engine::SentimentEngine;
pub use error::{AppError, AppResult};
pub use types::{HealthResponse, Label, PredictRequest, Prediction, Scores};
