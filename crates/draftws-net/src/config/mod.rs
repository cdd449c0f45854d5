//! Config loader (strict parsing).

pub mod schema;

use std::fs;
use std::path::Path;

use draftws_core::error::{DraftWsError, Result};

pub use schema::{
    ClientConfig, ConnectionConfig, DecodeErrorPolicy, DraftWsConfig, FrameMode, NameValue,
    ServerSection,
};

pub fn load_from_file(path: impl AsRef<Path>) -> Result<DraftWsConfig> {
    let path = path.as_ref();
    let s = fs::read_to_string(path).map_err(|e| {
        DraftWsError::Config(format!("read config {} failed: {e}", path.display()))
    })?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<DraftWsConfig> {
    let cfg: DraftWsConfig = serde_yaml::from_str(s)
        .map_err(|e| DraftWsError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
