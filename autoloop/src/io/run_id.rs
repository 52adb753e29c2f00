//! Run identifiers.
//!
//! Run ids become directory names under `.autoloop/artifacts/`, so explicit
//! ids are restricted to a filesystem-safe alphabet.

use anyhow::{Result, anyhow};
use chrono::Utc;
use rand::Rng;

/// Generate a fresh run id: `YYYYMMDD_HHMMSS_<4 hex>` (UTC).
pub fn generate_run_id() -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix: [u8; 2] = rand::thread_rng().r#gen();
    format!("{stamp}_{}", hex::encode(suffix))
}

/// Validate that an id is safe for use as a directory name.
pub fn validate_run_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("run id must not be empty"));
    }
    if id == "." || id == ".." {
        return Err(anyhow!("run id must not be '.' or '..'"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!("run id must be [A-Za-z0-9._-] only (got '{id}')"));
    }
    Ok(())
}
