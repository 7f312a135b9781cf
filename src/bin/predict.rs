//! Scores text against a local artifact bundle without starting the server.

use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

use sentiment_engine::{telemetry, SentimentEngine};

#[derive(Debug, Parser)]
#[command(name = "predict", about = "Predict the sentiment of TEXT with a trained bundle")]
struct Args {
    #[arg(long, env = "ARTIFACT_DIR", default_value = "models/tfidf")]
    artifact_dir: PathBuf,

    /// Words joined with single spaces; defaults to "This is great."
    text: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    telemetry::init("sentiment_engine=warn");

    let args = Args::parse();
    let text = if args.text.is_empty() {
        "This is great.".to_string()
    } else {
        args.text.join(" ")
    };

    let engine = SentimentEngine::load(&args.artifact_dir)?;
    let prediction = engine.predict(&text);

    println!(
        "{}",
        json!({
            "text": text,
            "prediction": prediction.label,
            "scores": prediction.scores,
            "version": prediction.version,
        })
    );
    Ok(())
}
