//! Recover the build identity of a crashed proxy from its core file.

use crate::error::Result;
use crate::git::LogEntry;
use crate::process::run_capture;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

pub const RELEASE_MARKER: &str = "/RELEASE/";
pub const REVISION_MARKER: &str = "revision.sha";

fn sha_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9a-fA-F]{40}").expect("valid sha regex"))
}

/// Printable strings embedded in the core file.
pub fn strings_dump(core: &Path) -> Result<String> {
    run_capture("strings", [core.as_os_str()], None)
}

/// Release builds embed a source path `<sha>/RELEASE/...`.
pub fn sha_from_release_path(dump: &str) -> Option<String> {
    let line = dump.lines().find(|l| l.contains(RELEASE_MARKER))?;
    let sha = line.split('/').next()?.trim();
    (!sha.is_empty()).then(|| sha.to_string())
}

/// Most frequent 40-hex-digit candidate on or just after a `revision.sha`
/// line. Ties go to the candidate seen first.
pub fn sha_by_majority(dump: &str) -> Option<String> {
    let lines: Vec<&str> = dump.lines().collect();
    let mut selected = vec![false; lines.len()];
    for (i, line) in lines.iter().enumerate() {
        if line.contains(REVISION_MARKER) {
            selected[i] = true;
            if i + 1 < lines.len() {
                selected[i + 1] = true;
            }
        }
    }

    let mut candidates: Vec<(&str, usize)> = Vec::new();
    for (line, _) in lines.iter().zip(&selected).filter(|(_, s)| **s) {
        if let Some(m) = sha_pattern().find(line) {
            match candidates.iter_mut().find(|(c, _)| *c == m.as_str()) {
                Some((_, count)) => *count += 1,
                None => candidates.push((m.as_str(), 1)),
            }
        }
    }
    debug!("SHA candidates: {:?}", candidates);

    let mut best: Option<(&str, usize)> = None;
    for (candidate, count) in candidates {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((candidate, count));
        }
    }
    best.map(|(sha, _)| sha.to_string())
}

pub fn extract_sha(dump: &str) -> Option<String> {
    sha_from_release_path(dump).or_else(|| {
        debug!("No {} path, falling back to {} candidates", RELEASE_MARKER, REVISION_MARKER);
        sha_by_majority(dump)
    })
}

/// Tags of the commit `sha`, or of the nearest older tagged commit.
///
/// Several tags on one commit come back comma-separated.
pub fn resolve_tags(entries: &[LogEntry], sha: &str) -> Option<String> {
    if sha.is_empty() {
        return None;
    }

    let pos = entries.iter().position(|e| e.hash.starts_with(sha))?;
    if !entries[pos].has_tags() {
        info!("Commit found, but no tag, finding next older commit with a tag");
    }

    entries[pos..]
        .iter()
        .find(|e| e.has_tags())
        .map(LogEntry::tag_list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::parse_decorated_log;

    const SHA_A: &str = "0123456789abcdef0123456789abcdef01234567";
    const SHA_B: &str = "fedcba9876543210fedcba9876543210fedcba98";

    #[test]
    fn test_release_path_wins() {
        let dump = format!(
            "GLIBC_2.2.5\n{}/RELEASE/source/common/http/conn_manager_impl.cc\n{}\n{}\n",
            SHA_B, REVISION_MARKER, SHA_A
        );
        assert_eq!(extract_sha(&dump).as_deref(), Some(SHA_B));
    }

    #[test]
    fn test_majority_vote() {
        let dump = format!(
            "{m}\n{a}\nnoise\n{m}\n{b}\n{m}\n{a}\n{m}\n{a}\n",
            m = REVISION_MARKER,
            a = SHA_A,
            b = SHA_B
        );
        assert_eq!(extract_sha(&dump).as_deref(), Some(SHA_A));
    }

    #[test]
    fn test_majority_ignores_hex_far_from_marker() {
        let dump = format!(
            "{b}\n{b}\n{b}\n{m}\n{a}\nunrelated\n{b}\n",
            m = REVISION_MARKER,
            a = SHA_A,
            b = SHA_B
        );
        assert_eq!(sha_by_majority(&dump).as_deref(), Some(SHA_A));
    }

    #[test]
    fn test_majority_tie_goes_to_first_seen() {
        let dump = format!(
            "{m}\n{b}\n{m}\n{a}\n",
            m = REVISION_MARKER,
            a = SHA_A,
            b = SHA_B
        );
        assert_eq!(sha_by_majority(&dump).as_deref(), Some(SHA_B));
    }

    #[test]
    fn test_no_sha_found() {
        assert_eq!(extract_sha("GLIBC_2.2.5\n/lib64/ld-linux.so\n"), None);
    }

    const LOG: &str = "\
commit aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa (HEAD -> master)
Author: Dev <dev@example.com>

    newest

commit bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb
Author: Dev <dev@example.com>

    the crashed build

commit cccccccccccccccccccccccccccccccccccccccc
Author: Dev <dev@example.com>

    untagged parent

commit dddddddddddddddddddddddddddddddddddddddd (tag: v1.2.3)
Author: Dev <dev@example.com>

    release

commit eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee (tag: envoy-v1.2.2, tag: v1.2.2)
";

    #[test]
    fn test_tag_falls_back_to_older_commit() {
        let entries = parse_decorated_log(LOG);
        assert_eq!(
            resolve_tags(&entries, "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").as_deref(),
            Some("v1.2.3")
        );
    }

    #[test]
    fn test_tag_on_exact_commit() {
        let entries = parse_decorated_log(LOG);
        assert_eq!(
            resolve_tags(&entries, "eeeeeee").as_deref(),
            Some("envoy-v1.2.2, v1.2.2")
        );
    }

    #[test]
    fn test_unknown_or_empty_sha_has_no_tag() {
        let entries = parse_decorated_log(LOG);
        assert_eq!(resolve_tags(&entries, "0000000"), None);
        assert_eq!(resolve_tags(&entries, ""), None);
    }

    #[test]
    fn test_no_older_tag() {
        let entries = parse_decorated_log(
            "commit aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa (tag: v2)\ncommit bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\n",
        );
        assert_eq!(resolve_tags(&entries, "bbbbbbb"), None);
    }
}
