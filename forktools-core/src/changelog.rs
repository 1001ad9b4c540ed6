use crate::config::ChangelogConfig;
use crate::error::{Error, Result};
use crate::git::{self, Git, OnelineCommit};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Newline plus four width-4 tab stops and three spaces.
pub const CONTINUATION: &str = "\n                   ";

/// Lines of the existing changelog replaced by the preamble.
const STALE_HEADER_LINES: usize = 3;

#[derive(Debug, Clone)]
pub struct ChangelogEntry {
    pub version: String,
    pub builder_version: String,
    pub repository_label: String,
    pub branch: String,
    pub commit_hash: String,
    pub commits: Vec<OnelineCommit>,
}

impl ChangelogEntry {
    pub fn render(&self) -> String {
        let mut out = format!(
            "{} ({}) Built from \"{}\" repository ({}) (commit: {})",
            self.version, self.builder_version, self.repository_label, self.branch, self.commit_hash
        );
        for commit in self.commits.iter().filter(|c| !c.is_merge()) {
            out.push_str(CONTINUATION);
            out.push_str(commit.to_line().trim_start());
        }
        out
    }
}

pub fn version_label<'a>(tag: &'a str, prefix: &str) -> &'a str {
    tag.strip_prefix(prefix).unwrap_or(tag)
}

/// Look up `key` in the first `properties` mapping that defines it.
pub fn builder_version(yaml: &str, key: &str) -> Result<String> {
    let doc: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    let props = doc
        .get("properties")
        .and_then(|p| p.as_sequence())
        .ok_or_else(|| Error::BuilderVersionNotFound(key.to_string()))?;

    props
        .iter()
        .find_map(|p| p.get(key))
        .and_then(|v| match v {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
        .ok_or_else(|| Error::BuilderVersionNotFound(key.to_string()))
}

/// Tags of the two most recent tagged commits, head first.
pub fn discover_tags(git: &Git, tag_prefix: &str) -> Result<(String, String)> {
    let entries = git.decorated_log()?;
    let mut tags = git::recent_tags(&entries, 2, tag_prefix).into_iter();
    match (tags.next(), tags.next()) {
        (Some(top), Some(bottom)) => Ok((top, bottom)),
        (Some(_), None) => Err(Error::NotEnoughTags(1)),
        _ => Err(Error::NotEnoughTags(0)),
    }
}

pub fn build_entry(
    git: &Git,
    config: &ChangelogConfig,
    builder_version: String,
    head: &str,
    prev: &str,
) -> Result<ChangelogEntry> {
    let entries = git.decorated_log()?;
    let commit_hash = git::commit_for_tag(&entries, head)
        .map(|e| e.hash.chars().take(10).collect::<String>())
        .ok_or_else(|| Error::TagNotFound(head.to_string()))?;

    let commits = git.oneline_between(head, prev)?;
    debug!("{} commits between {} and {}", commits.len(), head, prev);

    Ok(ChangelogEntry {
        version: version_label(head, &config.tag_prefix).to_string(),
        builder_version,
        repository_label: config.repository_label.clone(),
        branch: git.current_branch()?,
        commit_hash,
        commits,
    })
}

/// Replace the first three lines of `existing` with `preamble` and put
/// `entry` after it.
///
/// The entry is closed with one more continuation prefix, which leaves a
/// blank-looking line between it and the previous entry.
pub fn splice(existing: &str, preamble: &str, entry: &str) -> String {
    let rest: String = existing
        .split_inclusive('\n')
        .skip(STALE_HEADER_LINES)
        .collect();

    let mut out =
        String::with_capacity(preamble.len() + entry.len() + CONTINUATION.len() + rest.len());
    out.push_str(preamble);
    out.push_str(entry);
    out.push_str(CONTINUATION);
    out.push_str(&rest);
    out
}

/// Prepend `entry` to the changelog at `path`.
///
/// The new content goes to a sibling temporary file that replaces the
/// changelog only once fully written. The file keeps its permissions.
pub fn write_changelog(path: &Path, preamble: &str, entry: &str) -> Result<()> {
    let existing = std::fs::read_to_string(path)?;
    let permissions = std::fs::metadata(path)?.permissions();
    let updated = splice(&existing, preamble, entry);

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(updated.as_bytes())?;
    tmp.flush()?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.persist(path).map_err(|e| e.error)?;

    info!("Updated {}", path.display());
    Ok(())
}
