pub mod adapter;
pub mod cache;
pub mod config;
pub mod content;
pub mod dom;
pub mod error;
pub mod export;
pub mod model;
pub mod pairing;
pub mod render;
pub mod toc;

pub use adapter::{SiteAdapter, SiteKind, SnapshotAdapter};
pub use cache::TocCache;
pub use config::{TocConfig, export_dir_from_env};
pub use content::{
    ContentNormalizer, HtmdConverter, MarkdownConverter, TextExtractor, normalize_markdown,
};
pub use dom::{HtmlElement, HtmlFragmentParser, parse_fragment, parse_fragments};
pub use error::{Result, SinanError};
pub use export::{
    ExportError, ExportOptions, ExportOutcome, MarkdownExport, build_turn_heading,
    export_turn_as_markdown, export_turns_as_markdown, select_turns, slugify_file_name,
};
pub use model::{Anchor, DocumentPosition, DomElement, ElementRef, MessageRecord, TocEntry, Turn};
pub use pairing::{is_message_before, pair_messages_by_order};
pub use render::{render_toc_markdown, render_turns_markdown, to_pretty_json};
pub use toc::{
    TocOptions, build_turn_dom_signature, extract_markdown_toc, extract_turn_dom_headings,
    extract_turn_toc, hash_text,
};
