use anyhow::{Context, Result};
use colored::Colorize;
use forktools_core::{logcss, Config};
use std::path::PathBuf;

pub fn run(logfile: PathBuf, svg: PathBuf, output: PathBuf, config: &Config) -> Result<()> {
    let log = super::read_file(&logfile)?;
    let svg_content = super::read_file(&svg)?;

    let html = logcss::annotate(&log, &svg_content, &config.log_to_css)?;

    std::fs::write(&output, html)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("{}", "Done.".green());
    Ok(())
}
