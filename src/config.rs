use crate::error::{invalid_config, AppResult};
use std::{env, net::SocketAddr, path::PathBuf};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_ARTIFACT_DIR: &str = "models/tfidf";

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub bind_addr: SocketAddr,
    pub artifact_dir: PathBuf,
}

impl ServeConfig {
    pub fn load() -> AppResult<Self> {
        let bind_addr: SocketAddr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|_| invalid_config("BIND_ADDR is not a socket address"))?;

        let artifact_dir: PathBuf = env::var("ARTIFACT_DIR")
            .unwrap_or_else(|_| DEFAULT_ARTIFACT_DIR.to_string())
            .into();

        Ok(ServeConfig {
            bind_addr,
            artifact_dir,
        })
    }
}
