use std::fmt;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::dom::parse_fragments;
use crate::error::{Result, SinanError};
use crate::export::url_host;
use crate::model::{ElementRef, MessageRecord, Turn};
use crate::pairing::pair_messages_by_order;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteKind {
    ChatGpt,
    Gemini,
    Kimi,
    Doubao,
    Yuanbao,
    Perplexity,
    Qwen,
}

impl SiteKind {
    pub const ALL: [Self; 7] = [
        Self::ChatGpt,
        Self::Gemini,
        Self::Kimi,
        Self::Doubao,
        Self::Yuanbao,
        Self::Perplexity,
        Self::Qwen,
    ];

    pub fn domain(self) -> &'static str {
        match self {
            Self::ChatGpt => "chatgpt.com",
            Self::Gemini => "gemini.google.com",
            Self::Kimi => "kimi.com",
            Self::Doubao => "doubao.com",
            Self::Yuanbao => "yuanbao.tencent.com",
            Self::Perplexity => "perplexity.ai",
            Self::Qwen => "chat.qwen.ai",
        }
    }

    /// Site whose domain is contained in `hostname`.
    pub fn from_hostname(hostname: &str) -> Option<Self> {
        let hostname = hostname.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|site| hostname.contains(site.domain()))
    }

    /// Accepts a site name (`chatgpt`) or anything containing its domain.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|site| site.to_string() == value)
            .or_else(|| Self::from_hostname(&value))
    }
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChatGpt => write!(f, "chatgpt"),
            Self::Gemini => write!(f, "gemini"),
            Self::Kimi => write!(f, "kimi"),
            Self::Doubao => write!(f, "doubao"),
            Self::Yuanbao => write!(f, "yuanbao"),
            Self::Perplexity => write!(f, "perplexity"),
            Self::Qwen => write!(f, "qwen"),
        }
    }
}

/// Source of the message streams of one chat page.
pub trait SiteAdapter {
    fn site(&self) -> Option<SiteKind>;

    /// Hostname fragment this adapter serves, e.g. `chatgpt.com`.
    fn domain(&self) -> &str;

    fn is_compatible(&self, hostname: &str) -> bool {
        let domain = self.domain();
        !domain.is_empty() && hostname.contains(domain)
    }

    fn user_messages(&self) -> Vec<MessageRecord>;

    fn assistant_messages(&self) -> Vec<MessageRecord> {
        Vec::new()
    }

    fn conversation_turns(&self) -> Vec<Turn> {
        pair_messages_by_order(self.user_messages(), self.assistant_messages())
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    site: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    messages: Vec<SnapshotMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SnapshotRole {
    User,
    Assistant,
}

#[derive(Debug, Deserialize)]
struct SnapshotMessage {
    role: SnapshotRole,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    order: Option<i64>,
}

/// [`SiteAdapter`] over a saved conversation snapshot.
///
/// The snapshot is JSON: `{"site", "url", "messages": [{"role", "id",
/// "text", "html", "markdown", "order"}]}` with messages in page order.
/// Every message is parsed into one shared fragment document so element
/// positions can be compared.
#[derive(Debug, Clone)]
pub struct SnapshotAdapter {
    site: Option<SiteKind>,
    domain: String,
    url: Option<String>,
    users: Vec<MessageRecord>,
    assistants: Vec<MessageRecord>,
}

impl SnapshotAdapter {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = read_snapshot_raw(path)?;
        let snapshot =
            serde_json::from_str(&raw).map_err(|source| SinanError::InvalidSnapshot {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let snapshot =
            serde_json::from_str(raw).map_err(|err| SinanError::Serialization(err.to_string()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    fn from_snapshot(snapshot: SnapshotFile) -> Self {
        let SnapshotFile {
            site,
            url,
            messages,
        } = snapshot;

        let host = url.as_deref().and_then(url_host);
        let site = site
            .as_deref()
            .and_then(SiteKind::parse)
            .or_else(|| host.as_deref().and_then(SiteKind::from_hostname));
        let domain = site
            .map(|site| site.domain().to_string())
            .or(host)
            .unwrap_or_default();

        let sources = messages
            .iter()
            .map(fragment_source)
            .collect::<Vec<_>>();
        let containers = parse_fragments(sources.iter().map(String::as_str));

        let mut users = Vec::new();
        let mut assistants = Vec::new();

        for (message, container) in messages.into_iter().zip(containers) {
            let element: ElementRef = Rc::new(container);
            let (bucket, prefix) = match message.role {
                SnapshotRole::User => (&mut users, "sinan-user-msg"),
                SnapshotRole::Assistant => (&mut assistants, "sinan-assistant-msg"),
            };

            let id = message
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("{prefix}-{}", bucket.len()));
            let text = message.text.unwrap_or_else(|| {
                WHITESPACE_RE
                    .replace_all(&element.text_content(), " ")
                    .trim()
                    .to_string()
            });

            bucket.push(MessageRecord {
                id,
                text,
                html: message.html,
                markdown: message.markdown,
                order: message.order,
                element: Some(element),
            });
        }

        debug!(
            site = ?site,
            users = users.len(),
            assistants = assistants.len(),
            "loaded conversation snapshot"
        );

        Self {
            site,
            domain,
            url,
            users,
            assistants,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

impl SiteAdapter for SnapshotAdapter {
    fn site(&self) -> Option<SiteKind> {
        self.site
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    fn user_messages(&self) -> Vec<MessageRecord> {
        self.users.clone()
    }

    fn assistant_messages(&self) -> Vec<MessageRecord> {
        self.assistants.clone()
    }
}

fn fragment_source(message: &SnapshotMessage) -> String {
    if let Some(html) = message.html.as_deref().filter(|html| !html.trim().is_empty()) {
        return html.to_string();
    }

    let text = message
        .text
        .as_deref()
        .or(message.markdown.as_deref())
        .unwrap_or_default();
    escape_text(text)
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn read_snapshot_raw(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|source| SinanError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if bytes.is_empty() {
        return Err(SinanError::EmptySnapshotFile {
            path: path.to_path_buf(),
        });
    }

    String::from_utf8(bytes).map_err(|_| SinanError::NonUtf8SnapshotFile {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use crate::adapter::{SiteAdapter, SiteKind, SnapshotAdapter};
    use crate::error::SinanError;
    use crate::toc::extract_turn_dom_headings;

    const SNAPSHOT: &str = r##"{
        "url": "https://chatgpt.com/c/abc",
        "messages": [
            {"role": "user", "text": "First question"},
            {"role": "assistant", "html": "<h2>Plan</h2>\n<p>Step &amp; go</p>"},
            {"role": "assistant", "text": "More detail"},
            {"role": "user", "id": "custom-2", "text": "Second   question\n\n\nagain"},
            {"role": "assistant", "markdown": "# Done"}
        ]
    }"##;

    #[test]
    fn site_kind_matches_hostnames_and_names() {
        assert_eq!(SiteKind::from_hostname("www.chatgpt.com"), Some(SiteKind::ChatGpt));
        assert_eq!(SiteKind::from_hostname("chat.qwen.ai"), Some(SiteKind::Qwen));
        assert_eq!(SiteKind::from_hostname("example.com"), None);
        assert_eq!(SiteKind::parse("Gemini"), Some(SiteKind::Gemini));
        assert_eq!(SiteKind::parse("yuanbao.tencent.com"), Some(SiteKind::Yuanbao));
        assert_eq!(SiteKind::Perplexity.to_string(), "perplexity");
    }

    #[test]
    fn snapshot_pairs_turns_by_element_position() {
        let adapter = SnapshotAdapter::from_json(SNAPSHOT).expect("snapshot");
        assert_eq!(adapter.site(), Some(SiteKind::ChatGpt));
        assert_eq!(adapter.domain(), "chatgpt.com");
        assert!(adapter.is_compatible("chatgpt.com"));
        assert!(!adapter.is_compatible("kimi.com"));

        let turns = adapter.conversation_turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].id, "sinan-user-msg-0");
        assert_eq!(turns[0].assistant_segments.len(), 2);
        assert_eq!(turns[0].assistant_text, "Plan Step & go\n\nMore detail");
        assert_eq!(turns[1].id, "custom-2");
        assert_eq!(turns[1].user.text, "Second   question\nagain");
        assert_eq!(
            turns[1].assistant().map(|segment| segment.id.as_str()),
            Some("sinan-assistant-msg-2")
        );
        assert_eq!(
            turns[1]
                .assistant()
                .and_then(|segment| segment.markdown.as_deref()),
            Some("# Done")
        );
    }

    #[test]
    fn snapshot_elements_expose_headings() {
        let adapter = SnapshotAdapter::from_json(SNAPSHOT).expect("snapshot");
        let turns = adapter.conversation_turns();

        let toc = extract_turn_dom_headings(&turns[0]);
        assert_eq!(toc.len(), 1);
        assert_eq!((toc[0].level, toc[0].text.as_str()), (2, "Plan"));
    }

    #[test]
    fn unknown_site_uses_url_host_as_domain() {
        let adapter = SnapshotAdapter::from_json(
            r#"{"url": "https://chat.example.org/x", "messages": []}"#,
        )
        .expect("snapshot");
        assert_eq!(adapter.site(), None);
        assert_eq!(adapter.domain(), "chat.example.org");
        assert!(adapter.conversation_turns().is_empty());
    }

    #[test]
    fn load_reports_typed_errors() {
        let temp = tempdir().expect("tempdir");

        let missing = temp.path().join("missing.json");
        assert!(matches!(
            SnapshotAdapter::load(&missing),
            Err(SinanError::Io { .. })
        ));

        let empty = temp.path().join("empty.json");
        fs::write(&empty, "").expect("write");
        assert!(matches!(
            SnapshotAdapter::load(&empty),
            Err(SinanError::EmptySnapshotFile { .. })
        ));

        let binary = temp.path().join("binary.json");
        fs::write(&binary, [0xff, 0xfe, 0x00]).expect("write");
        assert!(matches!(
            SnapshotAdapter::load(&binary),
            Err(SinanError::NonUtf8SnapshotFile { .. })
        ));

        let invalid = temp.path().join("invalid.json");
        fs::write(&invalid, "{not json").expect("write");
        assert!(matches!(
            SnapshotAdapter::load(&invalid),
            Err(SinanError::InvalidSnapshot { .. })
        ));

        let valid = temp.path().join("valid.json");
        fs::write(&valid, SNAPSHOT).expect("write");
        let adapter = SnapshotAdapter::load(&valid).expect("load");
        assert_eq!(adapter.url(), Some("https://chatgpt.com/c/abc"));
    }
}
