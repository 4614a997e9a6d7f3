use once_cell::sync::Lazy;
use regex::Regex;

use crate::content::ContentNormalizer;
use crate::error::{Result, SinanError};
use crate::model::{ElementRef, TocEntry, Turn};

static ATX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})[ \t]+(.+?)\s*$").expect("valid regex"));
static SETEXT_H1_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^={2,}\s*$").expect("valid regex"));
static SETEXT_H2_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-{2,}\s*$").expect("valid regex"));
static CLOSING_HASHES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+#+[ \t]*$").expect("valid regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static HEADING_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^h([1-6])$").expect("valid regex"));

pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 6;

/// Inclusive heading level range. Bounds are clamped to 1..=6 and may be
/// given in either order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocOptions {
    pub min_level: u8,
    pub max_level: u8,
}

impl Default for TocOptions {
    fn default() -> Self {
        Self {
            min_level: MIN_LEVEL,
            max_level: MAX_LEVEL,
        }
    }
}

impl TocOptions {
    pub fn new(min_level: u8, max_level: u8) -> Self {
        Self {
            min_level: clamp_level(min_level),
            max_level: clamp_level(max_level),
        }
    }

    pub fn bounds(&self) -> (u8, u8) {
        let min_level = clamp_level(self.min_level);
        let max_level = clamp_level(self.max_level);
        (min_level.min(max_level), min_level.max(max_level))
    }

    pub fn contains(&self, level: u8) -> bool {
        let (lower, upper) = self.bounds();
        (lower..=upper).contains(&level)
    }
}

fn clamp_level(level: u8) -> u8 {
    level.clamp(MIN_LEVEL, MAX_LEVEL)
}

/// Parses a heading level, clamping numeric values into 1..=6.
pub fn parse_level(value: &str) -> Result<u8> {
    let parsed = value
        .trim()
        .parse::<i64>()
        .map_err(|_| SinanError::InvalidLevel(value.to_string()))?;
    let clamped = parsed.clamp(i64::from(MIN_LEVEL), i64::from(MAX_LEVEL));
    u8::try_from(clamped).map_err(|_| SinanError::InvalidLevel(value.to_string()))
}

/// Outline of ATX and setext headings in `markdown`, skipping fenced code.
pub fn extract_markdown_toc(markdown: &str, options: TocOptions) -> Vec<TocEntry> {
    let normalized = markdown.replace("\r\n", "\n");
    if normalized.trim().is_empty() {
        return Vec::new();
    }

    let mut toc = Vec::new();
    let mut active_fence = None::<char>;
    let mut lines = normalized.split('\n').peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(marker) = fence_marker(trimmed) {
            match active_fence {
                None => active_fence = Some(marker),
                Some(open) if open == marker => active_fence = None,
                Some(_) => {}
            }
            continue;
        }

        if active_fence.is_some() {
            continue;
        }

        if let Some(caps) = ATX_RE.captures(trimmed) {
            let level = u8::try_from(caps[1].len()).unwrap_or(MAX_LEVEL);
            if options.contains(level) {
                let text = normalize_heading_text(&caps[2]);
                if !text.is_empty() {
                    toc.push(TocEntry::new(level, text));
                }
            }
            continue;
        }

        let next_line = lines.peek().map_or("", |next| next.trim());
        let setext_level = if SETEXT_H1_RE.is_match(next_line) {
            1
        } else if SETEXT_H2_RE.is_match(next_line) {
            2
        } else {
            continue;
        };

        if options.contains(setext_level) {
            let text = normalize_heading_text(trimmed);
            if !text.is_empty() {
                toc.push(TocEntry::new(setext_level, text));
            }
            lines.next();
        }
    }

    toc
}

fn fence_marker(line: &str) -> Option<char> {
    if line.starts_with("```") {
        Some('`')
    } else if line.starts_with("~~~") {
        Some('~')
    } else {
        None
    }
}

/// Headings rendered inside each assistant segment's element.
///
/// Segments without an element contribute nothing.
pub fn extract_turn_dom_headings(turn: &Turn) -> Vec<TocEntry> {
    let mut toc = Vec::new();

    for (segment_index, segment) in turn.assistant_segments.iter().enumerate() {
        let Some(root) = &segment.element else {
            continue;
        };

        for (heading_index, heading) in root.headings().into_iter().enumerate() {
            let Some(level) = parse_heading_level(&heading.tag_name()) else {
                continue;
            };
            let text = normalize_heading_text(&heading.text_content());
            if text.is_empty() {
                continue;
            }

            toc.push(TocEntry {
                level,
                text,
                segment_index: Some(segment_index),
                heading_index: Some(heading_index),
                target: Some(heading),
            });
        }
    }

    toc
}

/// Markdown outline of the turn's assistant content.
pub fn extract_turn_toc(
    normalizer: &ContentNormalizer,
    turn: &Turn,
    options: TocOptions,
) -> Vec<TocEntry> {
    let markdown = normalizer.build_assistant_markdown(turn);
    extract_markdown_toc(&markdown, options)
}

pub fn normalize_heading_text(text: &str) -> String {
    let stripped = CLOSING_HASHES_RE.replace(text, "");
    WHITESPACE_RE.replace_all(&stripped, " ").trim().to_string()
}

pub fn parse_heading_level(tag_name: &str) -> Option<u8> {
    let caps = HEADING_TAG_RE.captures(tag_name)?;
    caps[1].parse().ok()
}

/// Cache key describing everything that can change a turn's outline.
pub fn build_turn_dom_signature(turn: &Turn) -> String {
    let assistant_hash = hash_text(&turn.assistant_text);
    let segments = &turn.assistant_segments;

    if segments.is_empty() {
        return format!("segments:0|assistant:{assistant_hash}");
    }

    let segment_signatures = segments
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            let segment_id = if segment.id.is_empty() {
                index.to_string()
            } else {
                segment.id.clone()
            };
            format!(
                "{segment_id}|md:{}|html:{}|text:{}|heads:{}",
                hash_text(segment.markdown.as_deref().unwrap_or_default()),
                hash_text(segment.html.as_deref().unwrap_or_default()),
                hash_text(&segment.text),
                build_segment_heading_signature(segment.element.as_ref()),
            )
        })
        .collect::<Vec<_>>()
        .join("||");

    format!(
        "segments:{}|assistant:{assistant_hash}|{segment_signatures}",
        segments.len()
    )
}

fn build_segment_heading_signature(root: Option<&ElementRef>) -> String {
    let Some(root) = root else {
        return "none".to_string();
    };

    let headings = root.headings();
    if headings.is_empty() {
        return "none".to_string();
    }

    headings
        .iter()
        .filter_map(|heading| {
            let level = parse_heading_level(&heading.tag_name())?;
            let text = normalize_heading_text(&heading.text_content());
            (!text.is_empty()).then(|| format!("{level}:{}", hash_text(&text)))
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// 32-bit `h * 31 + c` string hash over UTF-16 code units, as lowercase hex.
pub fn hash_text(value: &str) -> String {
    let hash = value.encode_utf16().fold(0_u32, |hash, unit| {
        (hash << 5).wrapping_sub(hash).wrapping_add(u32::from(unit))
    });
    format!("{hash:x}")
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::content::ContentNormalizer;
    use crate::dom::parse_fragment;
    use crate::model::{MessageRecord, TocEntry};
    use crate::pairing::build_turn;
    use crate::toc::{
        TocOptions, build_turn_dom_signature, extract_markdown_toc, extract_turn_dom_headings,
        extract_turn_toc, hash_text, normalize_heading_text, parse_heading_level, parse_level,
    };

    fn levels_and_texts(toc: &[TocEntry]) -> Vec<(u8, String)> {
        toc.iter()
            .map(|entry| (entry.level, entry.text.clone()))
            .collect()
    }

    #[test]
    fn ignores_headings_inside_fences() {
        let toc = extract_markdown_toc(
            "# A\n## B\n```\n### not-a-heading\n```\n### C",
            TocOptions::default(),
        );
        assert_eq!(
            levels_and_texts(&toc),
            vec![
                (1, "A".to_string()),
                (2, "B".to_string()),
                (3, "C".to_string())
            ]
        );
    }

    #[test]
    fn fence_closes_only_on_matching_marker() {
        let markdown = "~~~\n```\n# hidden\n~~~\n# shown\n```md\n# also hidden\n~~~\n```\n## end";
        let toc = extract_markdown_toc(markdown, TocOptions::default());
        assert_eq!(
            levels_and_texts(&toc),
            vec![(1, "shown".to_string()), (2, "end".to_string())]
        );
    }

    #[test]
    fn extracts_setext_headings_and_consumes_underline() {
        let markdown = "Title\r\n=====\r\n\r\nSection\r\n---\r\n\r\ntext\r\n";
        let toc = extract_markdown_toc(markdown, TocOptions::default());
        assert_eq!(
            levels_and_texts(&toc),
            vec![(1, "Title".to_string()), (2, "Section".to_string())]
        );
    }

    #[test]
    fn respects_level_bounds_in_either_order() {
        let markdown = "# one\n## two\n### three\n#### four";
        let toc = extract_markdown_toc(markdown, TocOptions::new(3, 2));
        assert_eq!(
            levels_and_texts(&toc),
            vec![(2, "two".to_string()), (3, "three".to_string())]
        );

        let clamped = TocOptions::new(0, 9);
        assert_eq!(clamped.bounds(), (1, 6));
    }

    #[test]
    fn atx_requires_whitespace_and_strips_closing_hashes() {
        let markdown = "#nospace\n####### seven\n##   Spaced   out ##  \n# C#";
        let toc = extract_markdown_toc(markdown, TocOptions::default());
        assert_eq!(
            levels_and_texts(&toc),
            vec![(2, "Spaced out".to_string()), (1, "C#".to_string())]
        );
    }

    #[test]
    fn empty_markdown_has_no_entries() {
        assert!(extract_markdown_toc("  \n\n ", TocOptions::default()).is_empty());
    }

    #[test]
    fn turn_toc_reads_assistant_markdown() {
        let turn = build_turn(
            MessageRecord::new("u1", "question"),
            vec![MessageRecord::new("a1", "").with_markdown("# Overview\n\n## Details\n\ntext")],
        );

        let toc = extract_turn_toc(&ContentNormalizer::plain(), &turn, TocOptions::default());
        assert_eq!(
            levels_and_texts(&toc),
            vec![(1, "Overview".to_string()), (2, "Details".to_string())]
        );
    }

    #[test]
    fn dom_headings_record_segment_and_heading_index() {
        let first = parse_fragment("<h2> Overview </h2><p>x</p><h4> Deep   Dive </h4>");
        let second = parse_fragment("<p>no headings</p>");
        let turn = build_turn(
            MessageRecord::new("u1", "question"),
            vec![
                MessageRecord::new("a1", "x").with_element(Rc::new(first)),
                MessageRecord::new("a2", "y").with_element(Rc::new(second)),
                MessageRecord::new("a3", "z"),
            ],
        );

        let toc = extract_turn_dom_headings(&turn);
        assert_eq!(toc.len(), 2);
        assert_eq!((toc[0].level, toc[0].text.as_str()), (2, "Overview"));
        assert_eq!((toc[0].segment_index, toc[0].heading_index), (Some(0), Some(0)));
        assert_eq!((toc[1].level, toc[1].text.as_str()), (4, "Deep Dive"));
        assert_eq!((toc[1].segment_index, toc[1].heading_index), (Some(0), Some(1)));
        assert!(toc[1].target.is_some());
    }

    #[test]
    fn dom_headings_skip_empty_text_but_keep_index() {
        let root = parse_fragment("<h1>  </h1><h3>Kept</h3>");
        let turn = build_turn(
            MessageRecord::new("u1", "q"),
            vec![MessageRecord::new("a1", "").with_element(Rc::new(root))],
        );

        let toc = extract_turn_dom_headings(&turn);
        assert_eq!(toc.len(), 1);
        assert_eq!(toc[0].heading_index, Some(1));
    }

    #[test]
    fn dom_heading_text_decodes_entities() {
        let root = parse_fragment("<h2>Caf&eacute; &rarr; Men&uuml;</h2>");
        let turn = build_turn(
            MessageRecord::new("u1", "q"),
            vec![MessageRecord::new("a1", "").with_element(Rc::new(root))],
        );

        let toc = extract_turn_dom_headings(&turn);
        assert_eq!(toc[0].text, "Caf\u{e9} \u{2192} Men\u{fc}");
    }

    #[test]
    fn dom_extraction_is_idempotent() {
        let root = parse_fragment("<h1>One</h1><h2>Two</h2>");
        let turn = build_turn(
            MessageRecord::new("u1", "q"),
            vec![MessageRecord::new("a1", "").with_element(Rc::new(root))],
        );

        assert_eq!(extract_turn_dom_headings(&turn), extract_turn_dom_headings(&turn));
        assert_eq!(build_turn_dom_signature(&turn), build_turn_dom_signature(&turn));
    }

    #[test]
    fn signature_tracks_content_changes() {
        let turn = build_turn(
            MessageRecord::new("u1", "q"),
            vec![MessageRecord::new("a1", "answer").with_markdown("# A")],
        );
        let changed = build_turn(
            MessageRecord::new("u1", "q"),
            vec![MessageRecord::new("a1", "answer").with_markdown("# B")],
        );

        let signature = build_turn_dom_signature(&turn);
        assert!(signature.starts_with("segments:1|assistant:"));
        assert!(signature.contains("a1|md:"));
        assert!(signature.ends_with("heads:none"));
        assert_ne!(signature, build_turn_dom_signature(&changed));

        let empty = build_turn(MessageRecord::new("u1", "q"), Vec::new());
        assert_eq!(build_turn_dom_signature(&empty), "segments:0|assistant:0");
    }

    #[test]
    fn hash_text_matches_string_hash() {
        assert_eq!(hash_text(""), "0");
        assert_eq!(hash_text("a"), "61");
        assert_eq!(hash_text("ab"), "c21");
        assert_eq!(hash_text("hello world hello world"), hash_text("hello world hello world"));
    }

    #[test]
    fn heading_helpers() {
        assert_eq!(normalize_heading_text("  Deep \n Dive  ### "), "Deep Dive");
        assert_eq!(parse_heading_level("H3"), Some(3));
        assert_eq!(parse_heading_level("h7"), None);
        assert_eq!(parse_heading_level("header"), None);
        assert_eq!(parse_level("9").expect("level"), 6);
        assert_eq!(parse_level(" 2 ").expect("level"), 2);
        assert!(parse_level("two").is_err());
    }
}
