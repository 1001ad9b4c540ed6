use similar::{ChangeTag, TextDiff};

/// Line diff between the file on disk and regenerated content.
#[derive(Debug, Clone)]
pub struct FileDiff {
    pub path: String,
    pub diff_lines: Vec<DiffLine>,
}

#[derive(Debug, Clone)]
pub struct DiffLine {
    pub line_type: DiffLineType,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLineType {
    Context,
    Addition,
    Deletion,
}

impl FileDiff {
    pub fn from_texts(path: impl Into<String>, old_text: &str, new_text: &str) -> Self {
        let diff = TextDiff::from_lines(old_text, new_text);
        let diff_lines = diff
            .iter_all_changes()
            .map(|change| DiffLine {
                line_type: match change.tag() {
                    ChangeTag::Delete => DiffLineType::Deletion,
                    ChangeTag::Insert => DiffLineType::Addition,
                    ChangeTag::Equal => DiffLineType::Context,
                },
                content: change.to_string(),
            })
            .collect();

        FileDiff {
            path: path.into(),
            diff_lines,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.diff_lines
            .iter()
            .any(|l| l.line_type != DiffLineType::Context)
    }

    /// Changed lines plus up to `context_lines` unchanged lines around them.
    pub fn hunks(&self, context_lines: usize) -> Vec<&DiffLine> {
        let changed: Vec<usize> = self
            .diff_lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.line_type != DiffLineType::Context)
            .map(|(i, _)| i)
            .collect();

        self.diff_lines
            .iter()
            .enumerate()
            .filter(|(i, _)| changed.iter().any(|c| c.abs_diff(*i) <= context_lines))
            .map(|(_, l)| l)
            .collect()
    }
}
