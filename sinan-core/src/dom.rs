//! HTML fragment DOM.
//!
//! Fragments are parsed by html5ever with a `body` context, the same way a
//! browser fills `innerHTML`. The resulting tree is flattened into an arena in
//! document order so elements can be shared as cheap handles and compared by
//! position. Only element and text nodes are kept.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use html5ever::tendril::TendrilSink;
use html5ever::{ParseOpts, QualName, local_name, namespace_url, ns};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::content::TextExtractor;
use crate::model::{DocumentPosition, DomElement, ElementRef};

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];
const ROOT_TAG: &str = "body";
const CONTAINER_TAG: &str = "div";

#[derive(Debug)]
enum NodeKind {
    Element(String),
    Text(String),
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    children: Vec<usize>,
    subtree_end: usize,
}

#[derive(Debug)]
struct Document {
    id: u64,
    nodes: Vec<Node>,
}

/// Handle to an element inside a parsed fragment document.
#[derive(Debug, Clone)]
pub struct HtmlElement {
    document: Rc<Document>,
    index: usize,
}

impl HtmlElement {
    fn node(&self) -> &Node {
        &self.document.nodes[self.index]
    }

    fn at(&self, index: usize) -> Self {
        Self {
            document: Rc::clone(&self.document),
            index,
        }
    }

    pub fn children(&self) -> Vec<HtmlElement> {
        self.node()
            .children
            .iter()
            .copied()
            .filter(|&child| matches!(self.document.nodes[child].kind, NodeKind::Element(_)))
            .map(|child| self.at(child))
            .collect()
    }

    /// Descendant elements with one of `tags`, in document order.
    pub fn query_all(&self, tags: &[&str]) -> Vec<HtmlElement> {
        (self.index + 1..self.node().subtree_end)
            .filter(|&idx| match &self.document.nodes[idx].kind {
                NodeKind::Element(tag) => tags.contains(&tag.as_str()),
                NodeKind::Text(_) => false,
            })
            .map(|idx| self.at(idx))
            .collect()
    }

    pub fn text(&self) -> String {
        let mut output = String::new();
        for idx in self.index..self.node().subtree_end {
            if let NodeKind::Text(text) = &self.document.nodes[idx].kind {
                output.push_str(text);
            }
        }
        output
    }
}

impl DomElement for HtmlElement {
    fn tag_name(&self) -> String {
        match &self.node().kind {
            NodeKind::Element(tag) => tag.clone(),
            NodeKind::Text(_) => String::new(),
        }
    }

    fn text_content(&self) -> String {
        self.text()
    }

    fn headings(&self) -> Vec<ElementRef> {
        self.query_all(HEADING_TAGS)
            .into_iter()
            .map(|heading| Rc::new(heading) as ElementRef)
            .collect()
    }

    fn document_position(&self) -> Option<DocumentPosition> {
        Some(DocumentPosition {
            document: self.document.id,
            index: self.index,
        })
    }
}

/// Parses one fragment; the returned element is the synthetic `body` root.
pub fn parse_fragment(html: &str) -> HtmlElement {
    let mut arena = Arena::new();
    arena.append_fragment(0, html);
    let document = Rc::new(arena.finish());
    HtmlElement { document, index: 0 }
}

/// Parses several fragments into one document, each under its own `div`
/// container, so the returned containers share comparable positions.
pub fn parse_fragments<'a>(fragments: impl IntoIterator<Item = &'a str>) -> Vec<HtmlElement> {
    let mut arena = Arena::new();
    let mut containers = Vec::new();

    for fragment in fragments {
        let container = arena.push(0, NodeKind::Element(CONTAINER_TAG.to_string()));
        arena.append_fragment(container, fragment);
        arena.close(container);
        containers.push(container);
    }

    let document = Rc::new(arena.finish());
    containers
        .into_iter()
        .map(|index| HtmlElement {
            document: Rc::clone(&document),
            index,
        })
        .collect()
}

/// Text extraction backed by [`parse_fragment`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlFragmentParser;

impl TextExtractor for HtmlFragmentParser {
    fn text_content(&self, html: &str) -> String {
        parse_fragment(html).text()
    }
}

fn parse_html(html: &str) -> RcDom {
    let context = QualName::new(None, ns!(html), local_name!("body"));
    html5ever::parse_fragment(RcDom::default(), ParseOpts::default(), context, Vec::new())
        .one(html)
}

struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Element(ROOT_TAG.to_string()),
                children: Vec::new(),
                subtree_end: 1,
            }],
        }
    }

    fn push(&mut self, parent: usize, kind: NodeKind) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Node {
            kind,
            children: Vec::new(),
            subtree_end: index + 1,
        });
        self.nodes[parent].children.push(index);
        index
    }

    fn close(&mut self, index: usize) {
        self.nodes[index].subtree_end = self.nodes.len();
    }

    fn append_fragment(&mut self, parent: usize, html: &str) {
        let dom = parse_html(html);
        // Fragment content sits under a synthetic <html> root.
        for root in dom.document.children.borrow().iter() {
            for child in root.children.borrow().iter() {
                self.append_handle(parent, child);
            }
        }
    }

    fn append_handle(&mut self, parent: usize, handle: &Handle) {
        match &handle.data {
            NodeData::Element { name, .. } => {
                let index = self.push(parent, NodeKind::Element(name.local.to_string()));
                for child in handle.children.borrow().iter() {
                    self.append_handle(index, child);
                }
                self.close(index);
            }
            NodeData::Text { contents } => {
                let text = contents.borrow();
                if !text.is_empty() {
                    self.push(parent, NodeKind::Text(text.to_string()));
                }
            }
            _ => {}
        }
    }

    fn finish(mut self) -> Document {
        self.close(0);
        Document {
            id: NEXT_DOCUMENT_ID.fetch_add(1, AtomicOrdering::Relaxed),
            nodes: self.nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::content::TextExtractor;
    use crate::dom::{HtmlFragmentParser, parse_fragment, parse_fragments};
    use crate::model::DomElement;

    #[test]
    fn collects_headings_in_document_order() {
        let root = parse_fragment(
            "<h2>Overview</h2><p>intro</p><div><h4> Deep <em>Dive</em> </h4></div><h1>Last</h1>",
        );

        let headings = root.headings();
        let tags = headings.iter().map(|h| h.tag_name()).collect::<Vec<_>>();
        assert_eq!(tags, vec!["h2", "h4", "h1"]);
        assert_eq!(headings[1].text_content(), " Deep Dive ");
    }

    #[test]
    fn text_content_decodes_entities_and_drops_comments() {
        let root = parse_fragment("<p>a &amp; b <!-- hidden --> &lt;tag&gt; &#65;&#x42;</p>");
        assert_eq!(root.text(), "a & b  <tag> AB");
    }

    #[test]
    fn decodes_named_html_entities() {
        let root = parse_fragment("<h2>Caf&eacute; &rarr; Men&uuml;</h2>");
        assert_eq!(
            root.headings()[0].text_content(),
            "Caf\u{e9} \u{2192} Men\u{fc}"
        );

        let text = HtmlFragmentParser.text_content("<p>5 &times; 3 &ne; 14</p>");
        assert_eq!(text, "5 \u{d7} 3 \u{2260} 14");
    }

    #[test]
    fn tolerates_unclosed_and_stray_tags() {
        let root = parse_fragment("<ul><li>one<li>two</ul></span><p>tail < 3");
        let items = root.query_all(&["li"]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text(), "one");
        assert_eq!(items[1].text(), "two");
        assert!(root.text().ends_with("tail < 3"));
    }

    #[test]
    fn keeps_script_bodies_as_raw_text() {
        let root = parse_fragment("<script>if (a < b) { x(); }</script><h3>After</h3>");
        assert_eq!(root.headings().len(), 1);
        assert!(root.text().contains("a < b"));
    }

    #[test]
    fn void_and_self_closing_elements_have_no_children() {
        let root = parse_fragment("<p>line<br>next<img src=\"x>y\"/>end</p>");
        let paragraph = &root.children()[0];
        assert_eq!(paragraph.text(), "linenextend");
        assert_eq!(paragraph.children().len(), 2);
    }

    #[test]
    fn fragments_share_one_document() {
        let containers = parse_fragments(["<p>Q1</p>", "<p>A1</p>", "<p>Q2"]);
        let first = containers[0].document_position().expect("position");
        let second = containers[1].document_position().expect("position");
        let third = containers[2].document_position().expect("position");

        assert_eq!(first.compare(&second), Some(std::cmp::Ordering::Less));
        assert_eq!(third.compare(&second), Some(std::cmp::Ordering::Greater));
        assert_eq!(containers[2].text(), "Q2");

        let other = parse_fragment("<p>x</p>")
            .document_position()
            .expect("position");
        assert_eq!(first.compare(&other), None);
    }

    #[test]
    fn unclosed_fragment_does_not_swallow_the_next_one() {
        let containers = parse_fragments(["<div><p>open", "<h2>Next</h2>"]);
        assert!(containers[0].headings().is_empty());
        assert_eq!(containers[1].headings().len(), 1);
        assert_eq!(containers[1].text(), "Next");
    }

    #[test]
    fn parser_extracts_text() {
        let text = HtmlFragmentParser.text_content("<p>Hello <strong>World</strong></p>");
        assert_eq!(text, "Hello World");
    }
}
