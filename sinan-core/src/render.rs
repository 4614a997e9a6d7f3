use serde::Serialize;

use crate::error::{Result, SinanError};
use crate::export::{HEADING_MAX_LEN, build_turn_heading};
use crate::model::{TocEntry, Turn};

pub fn render_turns_markdown(source: &str, turns: &[Turn]) -> String {
    let mut output = String::new();
    output.push_str("# Conversation\n\n");
    output.push_str(&format!("- Source: `{source}`\n"));
    output.push_str(&format!("- Turns: {}\n\n", turns.len()));

    if turns.is_empty() {
        output.push_str("_No conversation turns found._\n");
        return output;
    }

    for (idx, turn) in turns.iter().enumerate() {
        output.push_str(&format!(
            "## {}. {}\n\n",
            idx + 1,
            build_turn_heading(&turn.user.text, HEADING_MAX_LEN)
        ));
        output.push_str(&format!("- Id: `{}`\n", turn.id));
        output.push_str(&format!(
            "- Assistant Segments: {}\n\n",
            turn.assistant_segments.len()
        ));
    }

    output
}

pub fn render_toc_markdown(entries: &[TocEntry]) -> String {
    if entries.is_empty() {
        return "_No headings found._\n".to_string();
    }

    let mut output = String::new();
    for entry in entries {
        output.push_str(&entry.to_string());
        output.push('\n');
    }
    output
}

pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|err| SinanError::Serialization(err.to_string()))
}
