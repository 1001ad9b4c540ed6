use anyhow::Result;
use colored::Colorize;
use forktools_core::coredump;
use forktools_core::debugger::{DebugSession, SessionMode};
use forktools_core::{Config, Error, Git};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn run(
    corefile: PathBuf,
    mode: SessionMode,
    tag: Option<String>,
    repo: &Path,
    config: &Config,
) -> Result<()> {
    println!("Reading coredump from '{}'", corefile.display());

    let (sha, tags) = match tag {
        Some(tag) => (String::new(), tag),
        None => {
            let sha = find_sha(&corefile)?;
            println!("{}: {}", "Commit SHA is".bold(), sha);
            println!("Searching GIT tag for commit {}", sha);

            let entries = Git::new(repo).decorated_log()?;
            let tags = coredump::resolve_tags(&entries, &sha).unwrap_or_default();
            (sha, tags)
        }
    };

    println!("{}: {}", "Git tag is/are".bold(), tags);
    if tags.is_empty() {
        println!("{}", "-> Perhaps try again on a release branch?".yellow());
        return Err(Error::NoTagForCommit(sha).into());
    }

    let session = DebugSession::prepare(&config.coredump, &tags, &corefile, mode)?;

    println!();
    println!("{}", "Going to start the debug image with this command:".bold());
    println!("{}", session.docker.command_line().cyan());
    println!();
    println!("{}", "Inside the container, run these commands:".bold());
    print!("{}", session.shell_commands);
    println!("{}", "Initialize gdb with these commands:".bold());
    print!("{}", mode.gdb_init());
    println!();
    println!("{}", "Unpacking files and starting gdb... (can take a moment)".dimmed());
    println!();

    let status = session.run()?;
    if !status.success() {
        println!("{}", format!("⚠ Debug container exited with {}", status).yellow());
    }

    Ok(())
}

fn find_sha(corefile: &Path) -> Result<String> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    spinner.set_message(format!("Scanning {}", corefile.display()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let dump = coredump::strings_dump(corefile);
    spinner.finish_and_clear();

    Ok(coredump::extract_sha(&dump?).unwrap_or_default())
}
