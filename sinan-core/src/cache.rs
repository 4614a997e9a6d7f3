use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::debug;

use crate::content::ContentNormalizer;
use crate::model::{TocEntry, Turn};
use crate::toc::{
    TocOptions, build_turn_dom_signature, extract_turn_dom_headings, extract_turn_toc,
};

pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TocKind {
    Custom,
    Dom,
    Markdown,
}

const ALL_KINDS: [TocKind; 3] = [TocKind::Custom, TocKind::Dom, TocKind::Markdown];

struct CachedToc {
    signature: String,
    entries: Vec<TocEntry>,
}

/// Per-turn TOC results keyed by extraction kind and turn id, invalidated
/// whenever the turn's content signature changes.
pub struct TocCache {
    entries: LruCache<(TocKind, String), CachedToc>,
}

impl TocCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Returns the cached entries for `turn`, running `extract` only when the
    /// turn is unknown or its signature changed.
    pub fn get_or_extract<F>(&mut self, turn: &Turn, extract: F) -> Vec<TocEntry>
    where
        F: FnOnce(&Turn) -> Vec<TocEntry>,
    {
        let signature = build_turn_dom_signature(turn);
        self.resolve(TocKind::Custom, turn, signature, extract)
    }

    pub fn dom_headings(&mut self, turn: &Turn) -> Vec<TocEntry> {
        let signature = build_turn_dom_signature(turn);
        self.resolve(TocKind::Dom, turn, signature, extract_turn_dom_headings)
    }

    /// Markdown outline of `turn`. The level bounds and the normalizer's
    /// capabilities are part of the key.
    pub fn markdown_toc(
        &mut self,
        normalizer: &ContentNormalizer,
        turn: &Turn,
        options: TocOptions,
    ) -> Vec<TocEntry> {
        let (lower, upper) = options.bounds();
        let signature = format!(
            "{}|levels:{lower}-{upper}|converter:{}|text:{}",
            build_turn_dom_signature(turn),
            normalizer.has_converter(),
            normalizer.has_text_extractor(),
        );
        self.resolve(TocKind::Markdown, turn, signature, |turn| {
            extract_turn_toc(normalizer, turn, options)
        })
    }

    fn resolve<F>(
        &mut self,
        kind: TocKind,
        turn: &Turn,
        signature: String,
        extract: F,
    ) -> Vec<TocEntry>
    where
        F: FnOnce(&Turn) -> Vec<TocEntry>,
    {
        let key = (kind, turn.id.clone());
        if let Some(cached) = self
            .entries
            .get(&key)
            .filter(|cached| cached.signature == signature)
        {
            return cached.entries.clone();
        }

        debug!(turn_id = %turn.id, kind = ?kind, "toc cache miss");
        let entries = extract(turn);
        self.entries.put(
            key,
            CachedToc {
                signature,
                entries: entries.clone(),
            },
        );
        entries
    }

    pub fn invalidate(&mut self, turn_id: &str) {
        for kind in ALL_KINDS {
            self.entries.pop(&(kind, turn_id.to_string()));
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TocCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
