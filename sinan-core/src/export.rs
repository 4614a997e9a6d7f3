use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::content::ContentNormalizer;
use crate::error::{Result, SinanError};
use crate::model::Turn;

static UNSAFE_FILE_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F\x7F-\x9F]"#).expect("valid regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static DASH_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").expect("valid regex"));

pub const EXPORT_TITLE: &str = "# Sinan Export";
pub const FILE_PREFIX: &str = "sinan";
pub const HEADING_MAX_LEN: usize = 64;
pub const SNIPPET_MAX_CHARS: usize = 32;
pub const NO_ASSISTANT_RESPONSE: &str = "(no assistant response found)";
pub const EMPTY_USER_MESSAGE: &str = "(empty user message)";
const DEFAULT_SOURCE: &str = "chat";
const DEFAULT_SNIPPET: &str = "message";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExportError {
    #[error("invalid_turn")]
    InvalidTurn,
}

impl ExportError {
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidTurn => "invalid_turn",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub source: Option<String>,
    pub url: Option<String>,
    pub exported_at: Option<NaiveDateTime>,
}

/// Resolved header values of one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportMeta {
    pub source: String,
    pub url: String,
    pub exported_at: NaiveDateTime,
}

impl ExportOptions {
    /// Fills in defaults: source from the url host, else `chat`; exported-at
    /// from the local clock.
    pub fn resolve(&self) -> ExportMeta {
        let url = self.url.clone().unwrap_or_default();
        let source = self
            .source
            .as_deref()
            .map(str::trim)
            .filter(|source| !source.is_empty())
            .map(ToString::to_string)
            .or_else(|| url_host(&url))
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        let exported_at = self
            .exported_at
            .unwrap_or_else(|| Local::now().naive_local());

        ExportMeta {
            source,
            url,
            exported_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownExport {
    pub file_name: String,
    pub count: usize,
    pub markdown: String,
}

impl MarkdownExport {
    /// Writes the document into `dir`, creating it when missing.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(|source| SinanError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(&self.file_name);
        fs::write(&path, &self.markdown).map_err(|source| SinanError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), count = self.count, "wrote markdown export");
        Ok(path)
    }
}

/// Wire shape of an export result: `{ok, fileName, count}` or
/// `{ok: false, error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&std::result::Result<MarkdownExport, ExportError>> for ExportOutcome {
    fn from(result: &std::result::Result<MarkdownExport, ExportError>) -> Self {
        match result {
            Ok(export) => Self {
                ok: true,
                file_name: Some(export.file_name.clone()),
                count: Some(export.count),
                error: None,
            },
            Err(err) => Self {
                ok: false,
                file_name: None,
                count: None,
                error: Some(err.code().to_string()),
            },
        }
    }
}

pub fn export_turn_as_markdown(
    normalizer: &ContentNormalizer,
    turn: &Turn,
    options: &ExportOptions,
) -> std::result::Result<MarkdownExport, ExportError> {
    export_turns_as_markdown(normalizer, std::slice::from_ref(turn), options)
}

/// Renders `turns` into one Markdown document and picks its file name.
///
/// Turns with blank user text are skipped; if none remain the export fails
/// with [`ExportError::InvalidTurn`].
pub fn export_turns_as_markdown(
    normalizer: &ContentNormalizer,
    turns: &[Turn],
    options: &ExportOptions,
) -> std::result::Result<MarkdownExport, ExportError> {
    let valid_turns = valid_turns(turns);
    if valid_turns.is_empty() {
        return Err(ExportError::InvalidTurn);
    }

    let meta = options.resolve();
    let markdown = build_turns_markdown(normalizer, &valid_turns, &meta);
    let file_name = build_file_name_for_turns(&valid_turns, &meta);

    Ok(MarkdownExport {
        file_name,
        count: valid_turns.len(),
        markdown,
    })
}

fn valid_turns(turns: &[Turn]) -> Vec<&Turn> {
    turns
        .iter()
        .filter(|turn| !turn.user.text.trim().is_empty())
        .collect()
}

pub fn build_turns_markdown(
    normalizer: &ContentNormalizer,
    turns: &[&Turn],
    meta: &ExportMeta,
) -> String {
    let blocks = turns
        .iter()
        .filter_map(|turn| build_turn_block(normalizer, turn))
        .collect::<Vec<_>>();

    [
        EXPORT_TITLE.to_string(),
        String::new(),
        format!("- Source: {}", meta.source),
        format!("- URL: {}", meta.url),
        format!("- Exported At: {}", format_date_time(&meta.exported_at)),
        format!("- Selected Count: {}", blocks.len()),
        String::new(),
        blocks.join("\n\n"),
    ]
    .join("\n")
}

/// `## <heading>`, the full user text, then the assistant markdown.
/// `None` when the user text is blank.
pub fn build_turn_block(normalizer: &ContentNormalizer, turn: &Turn) -> Option<String> {
    let user_text = turn.user.text.trim();
    if user_text.is_empty() {
        return None;
    }

    let heading = build_turn_heading(user_text, HEADING_MAX_LEN);
    let assistant = normalizer.build_assistant_markdown(turn);
    let assistant = if assistant.is_empty() {
        NO_ASSISTANT_RESPONSE
    } else {
        assistant.as_str()
    };

    Some(format!("## {heading}\n\n{user_text}\n\n{assistant}"))
}

pub fn build_turn_heading(text: &str, max_len: usize) -> String {
    let normalized = WHITESPACE_RE.replace_all(text, " ");
    let normalized = normalized.trim();
    if normalized.is_empty() {
        return EMPTY_USER_MESSAGE.to_string();
    }
    if normalized.chars().count() <= max_len {
        return normalized.to_string();
    }
    if max_len <= 3 {
        return ".".repeat(max_len.max(1));
    }

    let head = normalized.chars().take(max_len - 3).collect::<String>();
    format!("{}...", head.trim_end())
}

pub fn build_file_name_for_turns(turns: &[&Turn], meta: &ExportMeta) -> String {
    let source = slugify_file_name(&meta.source);
    let source = if source.is_empty() {
        DEFAULT_SOURCE.to_string()
    } else {
        source
    };
    let stamp = format_time_stamp(&meta.exported_at);

    if turns.len() > 1 {
        return format!("{FILE_PREFIX}-{source}-{stamp}-selected-{}.md", turns.len());
    }

    let first_text = turns.first().map_or("", |turn| turn.user.text.as_str());
    let snippet = slugify_file_name(&first_text.chars().take(SNIPPET_MAX_CHARS).collect::<String>());
    let snippet = if snippet.is_empty() {
        DEFAULT_SNIPPET.to_string()
    } else {
        snippet
    };

    format!("{FILE_PREFIX}-{source}-{stamp}-{snippet}.md")
}

/// Lowercase, dash-separated form of `value` that is safe in file names on
/// every platform.
pub fn slugify_file_name(value: &str) -> String {
    let value = UNSAFE_FILE_CHARS_RE.replace_all(value.trim(), "-");
    let value = WHITESPACE_RE.replace_all(&value, "-");
    let value = DASH_RUN_RE.replace_all(&value, "-");
    value.trim_matches('-').to_lowercase()
}

pub fn format_date_time(value: &NaiveDateTime) -> String {
    value.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn format_time_stamp(value: &NaiveDateTime) -> String {
    value.format("%Y%m%d-%H%M").to_string()
}

/// Turns whose id is in `ids`, in conversation order.
pub fn select_turns<S: AsRef<str>>(turns: &[Turn], ids: &[S]) -> Result<Vec<Turn>> {
    let known = turns
        .iter()
        .map(|turn| turn.id.as_str())
        .collect::<HashSet<&str>>();
    let wanted = ids.iter().map(AsRef::as_ref).collect::<HashSet<&str>>();
    if let Some(missing) = wanted.iter().find(|id| !known.contains(*id)) {
        return Err(SinanError::UnknownTurn((*missing).to_string()));
    }

    Ok(turns
        .iter()
        .filter(|turn| wanted.contains(turn.id.as_str()))
        .cloned()
        .collect())
}

pub fn url_host(url: &str) -> Option<String> {
    url::Url::parse(url.trim())
        .ok()
        .and_then(|parsed| parsed.host_str().map(ToString::to_string))
}
