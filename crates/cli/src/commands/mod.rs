//! Command implementations.

mod info;
mod replay;
mod validate;

pub use info::run_info;
pub use replay::run_replay;
pub use validate::run_validate;

use anyhow::Result;
use std::path::Path;

use crate::error::CliError;

/// Fail early with a clear message when the config path is missing
fn ensure_config_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()).into());
    }
    Ok(())
}
