//! Typed views of `git log` output.
//!
//! Parsing is kept in free functions over text so it can be tested without a
//! repository; [`Git`] only runs the commands and hands stdout to them.

use crate::error::Result;
use crate::process::run_capture;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// One commit header from `git log --decorate=short`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub hash: String,
    pub refs: Vec<String>,
    pub tags: Vec<String>,
}

impl LogEntry {
    pub fn has_tags(&self) -> bool {
        !self.tags.is_empty()
    }

    /// Tags joined the way git prints several decorations.
    pub fn tag_list(&self) -> String {
        self.tags.join(", ")
    }
}

/// One line of `git log --oneline`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnelineCommit {
    pub short_hash: String,
    pub subject: String,
}

impl OnelineCommit {
    pub fn is_merge(&self) -> bool {
        self.subject.contains("Merge branch")
    }

    pub fn to_line(&self) -> String {
        format!("{} {}", self.short_hash, self.subject)
    }
}

fn commit_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^commit ([0-9a-fA-F]+)(?: \((.*)\))?\s*$").expect("valid commit regex")
    })
}

pub fn parse_decorated_log(text: &str) -> Vec<LogEntry> {
    text.lines()
        .filter_map(|line| {
            let caps = commit_header().captures(line)?;
            let refs: Vec<String> = caps
                .get(2)
                .map(|m| {
                    m.as_str()
                        .split(", ")
                        .map(str::trim)
                        .filter(|r| !r.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let tags = refs
                .iter()
                .filter_map(|r| r.strip_prefix("tag: "))
                .map(str::to_string)
                .collect();

            Some(LogEntry {
                hash: caps[1].to_string(),
                refs,
                tags,
            })
        })
        .collect()
}

pub fn parse_oneline(text: &str) -> Vec<OnelineCommit> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (hash, subject) = line.split_once(' ').unwrap_or((line, ""));
            OnelineCommit {
                short_hash: hash.to_string(),
                subject: subject.trim_start().to_string(),
            }
        })
        .collect()
}

/// One tag from each of the `count` most recent tagged commits.
///
/// Release commits carry several tags; a tag starting with `prefix` is
/// picked when there is one, otherwise the first.
pub fn recent_tags(entries: &[LogEntry], count: usize, prefix: &str) -> Vec<String> {
    entries
        .iter()
        .filter_map(|e| {
            e.tags
                .iter()
                .find(|t| t.starts_with(prefix))
                .or_else(|| e.tags.first())
                .cloned()
        })
        .take(count)
        .collect()
}

pub fn commit_for_tag<'a>(entries: &'a [LogEntry], tag: &str) -> Option<&'a LogEntry> {
    entries.iter().find(|e| e.tags.iter().any(|t| t == tag))
}

/// Runs git in a fixed working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new<P: AsRef<Path>>(workdir: P) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
        }
    }

    // Piped output drops decorations unless asked for explicitly.
    pub fn decorated_log(&self) -> Result<Vec<LogEntry>> {
        let out = run_capture(
            "git",
            ["log", "--decorate=short"],
            Some(self.workdir.as_path()),
        )?;
        Ok(parse_decorated_log(&out))
    }

    pub fn oneline_between(&self, head: &str, prev: &str) -> Result<Vec<OnelineCommit>> {
        let range = format!("{}...{}", head, prev);
        let out = run_capture(
            "git",
            ["log", range.as_str(), "--oneline"],
            Some(self.workdir.as_path()),
        )?;
        Ok(parse_oneline(&out))
    }

    pub fn current_branch(&self) -> Result<String> {
        let out = run_capture(
            "git",
            ["rev-parse", "--abbrev-ref", "HEAD"],
            Some(self.workdir.as_path()),
        )?;
        Ok(out.trim_end().to_string())
    }
}
