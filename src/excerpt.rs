//! Bookmark label extraction: walk the rendered content tree forward from
//! a locator until a substantial, non-heading text block is found.

use crate::document::DocumentModel;
use crate::locator::Locator;
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use log::debug;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::Regex;
use std::rc::Rc;
use std::sync::LazyLock;

/// Minimum non-whitespace text length for a label candidate.
const MIN_LABEL_CHARS: usize = 40;
/// Labels are truncated to this many characters, at a word boundary.
const MAX_LABEL_CHARS: usize = 280;
/// Traversal bound; extraction gives up past this many nodes.
const MAX_STEPS: usize = 800;
/// Length of the raw-substring fallback label.
const RAW_FALLBACK_CHARS: usize = 150;

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Failed to compile whitespace regex"));
static TRAILING_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\S*$").expect("Failed to compile trailing word regex"));

/// Extract a short label for the content at `locator`. Falls back to a raw
/// substring of the location's text, then to a literal placeholder.
/// Never fails; extraction problems produce the fallback chain instead.
pub fn extract_label<M: DocumentModel + ?Sized>(model: &M, locator: &Locator) -> String {
    if let Some(anchor) = model.range_anchor(locator) {
        if let Some(label) = lead_paragraph(&anchor.markup, anchor.text_offset) {
            return label;
        }
    }
    if let Some(raw) = model.range_text(locator) {
        let trimmed: String = raw.trim().chars().take(RAW_FALLBACK_CHARS).collect();
        if !trimmed.is_empty() {
            return trimmed;
        }
    }
    debug!("No label text found at {locator}");
    "No text".to_string()
}

/// Walk forward in document order from the text node containing
/// `text_offset` until a text-bearing candidate is found. Headings are
/// skipped deliberately; they are rarely representative of the narrative
/// around a position.
pub fn lead_paragraph(markup: &str, text_offset: usize) -> Option<String> {
    let dom = parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut markup.as_bytes())
        .ok()?;

    let anchor = text_node_at_offset(&dom.document, text_offset)?;
    let mut cur = parent_element(&anchor).unwrap_or(anchor);

    let mut steps = 0usize;
    loop {
        if steps >= MAX_STEPS {
            return None;
        }
        steps += 1;

        match &cur.data {
            NodeData::Element { name, .. } => {
                let tag = name.local.as_ref();
                if !is_heading(tag) && is_block_candidate(tag) {
                    let text = collapse_whitespace(&node_text(&cur));
                    if text.chars().count() > MIN_LABEL_CHARS {
                        return Some(truncate_at_word(&text));
                    }
                }
            }
            NodeData::Text { contents } => {
                let text = collapse_whitespace(&contents.borrow());
                if text.chars().count() > MIN_LABEL_CHARS {
                    return Some(truncate_at_word(&text));
                }
            }
            _ => {}
        }

        cur = next_in_doc_order(&cur)?;
    }
}

fn is_heading(tag: &str) -> bool {
    matches!(tag, "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "header")
}

fn is_block_candidate(tag: &str) -> bool {
    matches!(tag, "p" | "div" | "section" | "article" | "li" | "blockquote")
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").to_string()
}

fn truncate_at_word(text: &str) -> String {
    if text.chars().count() <= MAX_LABEL_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_LABEL_CHARS).collect();
    TRAILING_WORD_RE.replace(&cut, "").to_string()
}

/// Concatenated text of a node's whole subtree.
fn node_text(node: &Handle) -> String {
    let mut out = String::new();
    collect_text(node, &mut out);
    out
}

fn collect_text(node: &Handle, out: &mut String) {
    if let NodeData::Text { contents } = &node.data {
        out.push_str(&contents.borrow());
    }
    for child in node.children.borrow().iter() {
        collect_text(child, out);
    }
}

/// Find the text node containing the given character offset, counting
/// text content in document order.
fn text_node_at_offset(root: &Handle, offset: usize) -> Option<Handle> {
    let mut seen = 0usize;
    let mut last_text: Option<Handle> = None;
    let mut found: Option<Handle> = None;
    walk_text_nodes(root, &mut |node, len| {
        last_text = Some(node.clone());
        if found.is_none() && offset < seen + len {
            found = Some(node.clone());
        }
        seen += len;
    });
    // Offsets at or past the end anchor on the last text node.
    found.or(last_text)
}

fn walk_text_nodes(node: &Handle, visit: &mut impl FnMut(&Handle, usize)) {
    if let NodeData::Text { contents } = &node.data {
        let len = contents.borrow().chars().count();
        visit(node, len);
    }
    for child in node.children.borrow().iter() {
        walk_text_nodes(child, visit);
    }
}

fn parent_element(node: &Handle) -> Option<Handle> {
    let parent = node.parent.take();
    let handle = parent.as_ref().and_then(|weak| weak.upgrade());
    node.parent.set(parent);
    handle.filter(|p| matches!(p.data, NodeData::Element { .. }))
}

fn parent_of(node: &Handle) -> Option<Handle> {
    let parent = node.parent.take();
    let handle = parent.as_ref().and_then(|weak| weak.upgrade());
    node.parent.set(parent);
    handle
}

/// Document-order successor: first child, else the nearest following
/// sibling found walking up the ancestor chain.
fn next_in_doc_order(node: &Handle) -> Option<Handle> {
    if let Some(first) = node.children.borrow().first() {
        return Some(first.clone());
    }
    let mut cur = node.clone();
    loop {
        let parent = parent_of(&cur)?;
        let siblings = parent.children.borrow();
        let pos = siblings.iter().position(|c| Rc::ptr_eq(c, &cur))?;
        if let Some(next) = siblings.get(pos + 1) {
            return Some(next.clone());
        }
        drop(siblings);
        cur = parent;
    }
}
