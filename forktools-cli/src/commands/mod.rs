pub mod changelog;
pub mod drcrash;
pub mod log_to_css;
pub mod prune_deps;

use anyhow::{Context, Result};
use std::path::Path;

pub fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
