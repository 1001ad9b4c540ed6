use anyhow::Result;
use colored::Colorize;
use forktools_core::changelog;
use forktools_core::{Config, Git};
use std::path::{Path, PathBuf};
use tracing::error;

pub fn run(
    tags: Option<(String, String)>,
    changelog_path: Option<PathBuf>,
    properties: Option<PathBuf>,
    dry_run: bool,
    repo: &Path,
    config: &Config,
) -> Result<()> {
    println!("{}", "Auto updating Changelog".bold());

    let git = Git::new(repo);
    let (head, prev) = match tags {
        Some(tags) => {
            println!("From Commandline Arguments...");
            tags
        }
        None => {
            println!("From git logs...");
            changelog::discover_tags(&git, &config.changelog.tag_prefix)?
        }
    };
    println!("  {}: {}", "Head Tag".bold(), head);
    println!("  {}: {}", "Tail Tag".bold(), prev);

    let path = changelog_path.unwrap_or_else(|| config.changelog.path.clone());
    let properties =
        properties.unwrap_or_else(|| config.changelog.builder_properties.clone());

    // Failures past this point are reported, not propagated.
    if let Err(e) = update(&git, config, &head, &prev, &path, &properties, dry_run) {
        error!("Changelog update failed: {:#}", e);
        println!("{} {:#}", "✗".red(), e);
    }

    Ok(())
}

fn update(
    git: &Git,
    config: &Config,
    head: &str,
    prev: &str,
    path: &Path,
    properties: &Path,
    dry_run: bool,
) -> Result<()> {
    let yaml = super::read_file(properties)?;
    let builder_version =
        changelog::builder_version(&yaml, &config.changelog.builder_version_key)?;

    let entry = changelog::build_entry(git, &config.changelog, builder_version, head, prev)?;
    let rendered = entry.render();

    if dry_run {
        println!();
        println!("{}", rendered);
        return Ok(());
    }

    changelog::write_changelog(path, &config.changelog.preamble, &rendered)?;

    println!("{}", "✓ Changelog updated".green().bold());
    println!("  {}: {}", "File".bold(), path.display());
    println!("  {}: {}", "Version".bold(), entry.version);
    println!(
        "  {}: {}",
        "Commits".bold(),
        entry.commits.iter().filter(|c| !c.is_merge()).count()
    );

    Ok(())
}
