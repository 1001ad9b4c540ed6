use anyhow::{Context, Result};
use colored::Colorize;
use forktools_core::config::DepsConfig;
use forktools_core::diff::{DiffLineType, FileDiff};
use forktools_core::prune;
use std::path::Path;

pub fn run(root: &Path, deps: &DepsConfig, check: bool) -> Result<()> {
    let locations = super::read_file(&root.join(&deps.repository_locations))?;
    let build = super::read_file(&root.join(&deps.build_extensions))?;
    let contrib = super::read_file(&root.join(&deps.contrib_extensions))?;

    let outcome = prune::prune_manifest(&locations, &build, &contrib, deps)
        .context("Failed to prune repository locations")?;

    println!("{}: {}", "Original Size".bold(), outcome.original);
    println!("{}: {}", "End Size".bold(), outcome.retained);

    let output = deps.output_path();

    if check {
        let current = std::fs::read_to_string(&output).unwrap_or_default();
        let diff = FileDiff::from_texts(output.display().to_string(), &current, &outcome.content);

        if !diff.has_changes() {
            println!("{}", format!("✓ {} is up to date", output.display()).green());
            return Ok(());
        }

        println!();
        println!("{}", format!("--- {}", diff.path).red());
        println!("{}", format!("+++ {}", diff.path).green());
        for line in diff.hunks(3) {
            let (prefix, color): (&str, fn(&str) -> colored::ColoredString) =
                match line.line_type {
                    DiffLineType::Addition => ("+", |s| s.green()),
                    DiffLineType::Deletion => ("-", |s| s.red()),
                    DiffLineType::Context => (" ", |s| s.normal()),
                };
            print!("{}", color(&format!("{}{}", prefix, line.content)));
        }
        println!();
        println!("Run without {} to write the file", "--check".cyan());
        return Ok(());
    }

    std::fs::write(&output, &outcome.content)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("{}", format!("✓ Wrote {}", output.display()).green().bold());

    Ok(())
}
