use std::fmt;

use htmd::element_handler::ElementHandler;
use htmd::{Element, HtmlToMarkdown, HtmlToMarkdownBuilder};
use htmd::options::{
    BulletListMarker, CodeBlockFence, CodeBlockStyle, HeadingStyle, LinkStyle, Options,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::dom::HtmlFragmentParser;
use crate::error::{Result, SinanError};
use crate::model::Turn;

static TRAILING_SPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+\n").expect("valid regex"));
static BLANK_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

const DEFAULT_SKIP_TAGS: &[&str] = &["script", "style", "button"];

/// Converts an HTML fragment into Markdown.
pub trait MarkdownConverter {
    fn convert(&self, html: &str) -> Result<String>;
}

/// Extracts the text content of an HTML fragment.
pub trait TextExtractor {
    fn text_content(&self, html: &str) -> String;
}

/// [`MarkdownConverter`] backed by `htmd`: ATX headings, backtick fences,
/// `-` bullets, `*` emphasis and inline links.
pub struct HtmdConverter {
    inner: HtmlToMarkdown,
}

impl HtmdConverter {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HtmdConverterBuilder {
        HtmdConverterBuilder::default()
    }
}

impl Default for HtmdConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HtmdConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HtmdConverter").finish_non_exhaustive()
    }
}

impl MarkdownConverter for HtmdConverter {
    fn convert(&self, html: &str) -> Result<String> {
        self.inner
            .convert(html)
            .map_err(|err| SinanError::Conversion(err.to_string()))
    }
}

/// Configures an [`HtmdConverter`].
///
/// `*` emphasis and `~~` strikethrough are registered up front. Handlers
/// added later take precedence for their tags, and skipped tags win over
/// every handler.
pub struct HtmdConverterBuilder {
    inner: HtmlToMarkdownBuilder,
    skip_tags: Vec<String>,
}

impl Default for HtmdConverterBuilder {
    fn default() -> Self {
        let inner = HtmlToMarkdown::builder()
            .add_handler(vec!["em", "i"], emphasis_handler)
            .add_handler(vec!["del", "s", "strike"], strikethrough_handler);

        Self {
            inner,
            skip_tags: DEFAULT_SKIP_TAGS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl fmt::Debug for HtmdConverterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HtmdConverterBuilder")
            .field("skip_tags", &self.skip_tags)
            .finish_non_exhaustive()
    }
}

impl HtmdConverterBuilder {
    /// Drops `tag` and its content from the converted output.
    #[must_use]
    pub fn skip_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into().to_ascii_lowercase();
        if !self.skip_tags.contains(&tag) {
            self.skip_tags.push(tag);
        }
        self
    }

    /// Renders `tags` with `handler` instead of the built-in rule.
    #[must_use]
    pub fn add_handler<H>(mut self, tags: &[&str], handler: H) -> Self
    where
        H: ElementHandler + 'static,
    {
        if tags.is_empty() {
            return self;
        }
        self.inner = self.inner.add_handler(tags.to_vec(), handler);
        self
    }

    pub fn build(self) -> HtmdConverter {
        let options = Options {
            heading_style: HeadingStyle::Atx,
            code_block_style: CodeBlockStyle::Fenced,
            code_block_fence: CodeBlockFence::Backticks,
            bullet_list_marker: BulletListMarker::Dash,
            link_style: LinkStyle::Inlined,
            ..Default::default()
        };

        let mut inner = self.inner.options(options);
        if !self.skip_tags.is_empty() {
            inner = inner.skip_tags(self.skip_tags.iter().map(String::as_str).collect());
        }

        HtmdConverter {
            inner: inner.build(),
        }
    }
}

fn emphasis_handler(element: Element<'_>) -> Option<String> {
    wrap_inline(element.content, "*")
}

fn strikethrough_handler(element: Element<'_>) -> Option<String> {
    wrap_inline(element.content, "~~")
}

// Whitespace stays outside the markers so `a<em> b </em>c` keeps its spacing.
fn wrap_inline(content: &str, marker: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }

    let leading = &content[..content.len() - content.trim_start().len()];
    let trailing = &content[content.trim_end().len()..];
    Some(format!("{leading}{marker}{trimmed}{marker}{trailing}"))
}

/// Turns assistant content into canonical Markdown.
///
/// Both capabilities are optional. Without a converter, HTML degrades to its
/// text content; without a text extractor, tags are stripped with a regex.
pub struct ContentNormalizer {
    converter: Option<Box<dyn MarkdownConverter>>,
    text_extractor: Option<Box<dyn TextExtractor>>,
}

impl ContentNormalizer {
    pub fn new() -> Self {
        Self {
            converter: Some(Box::new(HtmdConverter::new())),
            text_extractor: Some(Box::new(HtmlFragmentParser)),
        }
    }

    pub fn plain() -> Self {
        Self {
            converter: None,
            text_extractor: None,
        }
    }

    #[must_use]
    pub fn with_converter(mut self, converter: impl MarkdownConverter + 'static) -> Self {
        self.converter = Some(Box::new(converter));
        self
    }

    #[must_use]
    pub fn with_text_extractor(mut self, extractor: impl TextExtractor + 'static) -> Self {
        self.text_extractor = Some(Box::new(extractor));
        self
    }

    pub fn has_converter(&self) -> bool {
        self.converter.is_some()
    }

    pub fn has_text_extractor(&self) -> bool {
        self.text_extractor.is_some()
    }

    /// Markdown for every assistant segment of `turn`, joined by blank lines.
    ///
    /// Each segment prefers its pre-rendered markdown, then converted html,
    /// then plain text. Falls back to `turn.assistant_text` when no segment
    /// yields anything.
    pub fn build_assistant_markdown(&self, turn: &Turn) -> String {
        let mut parts = Vec::new();

        for segment in &turn.assistant_segments {
            let markdown = segment.markdown.as_deref().unwrap_or_default().trim();
            if !markdown.is_empty() {
                parts.push(markdown.to_string());
                continue;
            }

            let html = segment.html.as_deref().unwrap_or_default().trim();
            if !html.is_empty() {
                let converted = self.html_to_markdown(html);
                if !converted.is_empty() {
                    parts.push(converted);
                    continue;
                }
            }

            let text = segment.text.trim();
            if !text.is_empty() {
                parts.push(text.to_string());
            }
        }

        if parts.is_empty() {
            return turn.assistant_text.trim().to_string();
        }

        parts.join("\n\n").trim().to_string()
    }

    pub fn html_to_markdown(&self, html: &str) -> String {
        if html.is_empty() {
            return String::new();
        }

        let Some(converter) = &self.converter else {
            return normalize_markdown(&self.strip_html(html));
        };

        match converter.convert(html) {
            Ok(markdown) => normalize_markdown(&markdown),
            Err(err) => {
                warn!(error = %err, "html to markdown conversion failed, falling back to plain text");
                normalize_markdown(&self.strip_html(html))
            }
        }
    }

    pub fn strip_html(&self, value: &str) -> String {
        if value.is_empty() {
            return String::new();
        }

        match &self.text_extractor {
            Some(extractor) => extractor.text_content(value),
            None => strip_tags(value),
        }
    }
}

impl Default for ContentNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContentNormalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentNormalizer")
            .field("converter", &self.converter.is_some())
            .field("text_extractor", &self.text_extractor.is_some())
            .finish()
    }
}

/// Canonical form used for content comparisons: LF line endings, no
/// trailing blanks before a newline, at most one empty line in a row.
pub fn normalize_markdown(value: &str) -> String {
    let value = value.replace("\r\n", "\n");
    let value = TRAILING_SPACE_RE.replace_all(&value, "\n");
    let value = BLANK_RUN_RE.replace_all(&value, "\n\n");
    value.trim().to_string()
}

/// Lossy tag stripper used when no HTML parser is available.
pub fn strip_tags(value: &str) -> String {
    TAG_RE.replace_all(value, " ").into_owned()
}
