//! Highlight the path a request took through an SVG state diagram.

use crate::config::LogToCssConfig;
use crate::error::Result;
use regex::Regex;
use tracing::info;

const HEADER: &str = "<html><head>\n<style>\n";
const HEADER_CLOSE: &str = "</style></head>\n<body>";
const FOOTER: &str = "</body>\n</html>";

/// Pulls identifiers out of log lines with the configured pattern.
pub struct IdExtractor {
    pattern: Regex,
}

impl IdExtractor {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// Every match in order, repeats included. The first capture group is
    /// the identifier, or the whole match if the pattern has no groups.
    pub fn extract(&self, log: &str) -> Vec<String> {
        log.lines()
            .flat_map(|line| {
                self.pattern.captures_iter(line).filter_map(|caps| {
                    caps.get(1)
                        .or_else(|| caps.get(0))
                        .map(|m| m.as_str().to_string())
                })
            })
            .collect()
    }
}

pub fn rule_block(selector_id: &str) -> String {
    format!(
        "#{id} rect {{\n  stroke:red !important;\n  fill: #ffeeee80 !important;\n}}\n\
         #{id} path {{\n  stroke:red !important;\n}}\n\
         #{id} text {{\n  fill:black !important;\n}}",
        id = selector_id
    )
}

/// One block per distinct identifier and one per distinct consecutive pair,
/// each in order of first appearance.
pub fn stylesheet(ids: &[String], separator: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut blocks = Vec::new();
    let mut prev: Option<&str> = None;

    let mut emit = |selector: String, blocks: &mut Vec<String>| {
        if !seen.contains(&selector) {
            blocks.push(rule_block(&selector));
            seen.push(selector);
        }
    };

    for id in ids {
        emit(id.clone(), &mut blocks);
        if let Some(prev_id) = prev {
            emit(format!("{}{}{}", prev_id, separator, id), &mut blocks);
        }
        prev = Some(id);
    }

    blocks
}

pub fn render_html(blocks: &[String], svg: &str) -> String {
    let mut out = String::from(HEADER);
    out.push_str(&blocks.join("\n"));
    out.push('\n');
    out.push_str(HEADER_CLOSE);
    out.push_str(svg);
    out.push_str(FOOTER);
    out
}

/// Log text and SVG source in, HTML document out.
pub fn annotate(log: &str, svg: &str, config: &LogToCssConfig) -> Result<String> {
    let ids = IdExtractor::new(&config.id_pattern)?.extract(log);
    info!("Found {} identifiers", ids.len());
    Ok(render_html(&stylesheet(&ids, &config.separator), svg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn has_block(blocks: &[String], id: &str) -> bool {
        blocks.iter().any(|b| b.starts_with(&format!("#{} rect {{", id)))
    }

    #[test]
    fn test_extract_ids_in_order() {
        let log = "\
[2024-06-01 10:00:00] ul_id: N1 entered
[2024-06-01 10:00:01] ul_id: N2 then ul_id: N3
[2024-06-01 10:00:02] nothing here ul_id: lowercase
";
        let extractor = IdExtractor::new(&LogToCssConfig::default().id_pattern).unwrap();
        assert_eq!(extractor.extract(log), ids(&["N1", "N2", "N3"]));
    }

    #[test]
    fn test_consecutive_pairs_only() {
        let blocks = stylesheet(&ids(&["N1", "N2", "N3"]), "---");

        for id in ["N1", "N2", "N3", "N1---N2", "N2---N3"] {
            assert!(has_block(&blocks, id), "missing block for {}", id);
        }
        assert!(!has_block(&blocks, "N1---N3"));
        assert_eq!(blocks.len(), 5);
    }

    #[test]
    fn test_blocks_follow_first_appearance() {
        let blocks = stylesheet(&ids(&["A", "B", "A", "B"]), "---");
        let heads: Vec<&str> = blocks
            .iter()
            .map(|b| b.split(' ').next().unwrap())
            .collect();

        assert_eq!(heads, vec!["#A", "#B", "#A---B", "#B---A"]);
    }

    #[test]
    fn test_rule_block_text() {
        let expected = "\
#S-1 rect {
  stroke:red !important;
  fill: #ffeeee80 !important;
}
#S-1 path {
  stroke:red !important;
}
#S-1 text {
  fill:black !important;
}";
        similar_asserts::assert_eq!(rule_block("S-1").as_str(), expected);
    }

    #[test]
    fn test_html_wraps_svg_verbatim() {
        let svg = "<svg><g id=\"N1\"><rect/></g></svg>";
        let html = annotate("ul_id: N1\n", svg, &LogToCssConfig::default()).unwrap();

        assert!(html.starts_with("<html><head>\n<style>\n#N1 rect {"));
        assert!(html.contains("}\n</style></head>\n<body><svg>"));
        assert!(html.ends_with("</svg></body>\n</html>"));
    }

    #[test]
    fn test_empty_log_still_renders() {
        let html = render_html(&[], "<svg/>");
        assert_eq!(
            html,
            "<html><head>\n<style>\n\n</style></head>\n<body><svg/></body>\n</html>"
        );
    }

    #[test]
    fn test_bad_pattern() {
        let config = LogToCssConfig {
            id_pattern: "ul_id: (".to_string(),
            ..LogToCssConfig::default()
        };
        assert!(annotate("", "", &config).is_err());
    }
}
