//! Document model backed by the `epub` crate. Chapters are parsed up
//! front into markup plus visible text; rendering maps the text onto a
//! glyph-grid viewport, one page at a time.

use crate::document::{
    DisplayedPage, DocumentModel, LayoutMode, PackageInfo, Position, RangeAnchor, Renderer,
    RendererEvent, SpineItem, ViewportSpec, VisibleRange,
};
use crate::locator::Locator;
use anyhow::{anyhow, Context, Result};
use epub::doc::EpubDoc;
use log::{debug, info, warn};
use regex::Regex;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::io::Cursor;
use std::rc::Rc;
use std::sync::LazyLock;

/// Nominal glyph cell size used to map pixel viewports onto character
/// capacity.
const CHAR_PX: u32 = 8;
const LINE_PX: u32 = 16;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("Failed to compile tag regex"));
static WS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Failed to compile whitespace regex"));

fn page_chars(viewport: ViewportSpec) -> usize {
    let cols = (viewport.width / CHAR_PX).max(1) as usize;
    let rows = (viewport.height / LINE_PX).max(1) as usize;
    cols * rows
}

/// Locator scheme: `loc:<spine>:<offset>`, zero padded so the string
/// fallback ordering agrees with the parsed ordering.
fn spine_locator(spine: usize, offset: usize) -> Locator {
    Locator::new(format!("loc:{spine:04}:{offset:08}"))
}

fn parse_spine_locator(locator: &Locator) -> Option<(usize, usize)> {
    let mut parts = locator.as_str().split(':');
    if parts.next() != Some("loc") {
        return None;
    }
    let spine = parts.next()?.parse().ok()?;
    let offset = parts.next()?.parse().ok()?;
    Some((spine, offset))
}

struct Chapter {
    href: String,
    markup: String,
    text: String,
    chars: usize,
}

struct EpubInner {
    spine: Vec<SpineItem>,
    package: PackageInfo,
    chapters: Vec<Chapter>,
    locations: Vec<(usize, usize)>,
}

impl EpubInner {
    fn linear_items(&self) -> Vec<usize> {
        self.spine
            .iter()
            .enumerate()
            .filter(|(_, s)| s.linear)
            .map(|(i, _)| i)
            .collect()
    }

    fn total_linear_chars(&self) -> usize {
        self.spine
            .iter()
            .enumerate()
            .filter(|(_, s)| s.linear)
            .map(|(i, _)| self.chapters[i].chars)
            .sum()
    }

    fn global_pos(&self, abs: usize, offset: usize) -> usize {
        let mut pos = 0;
        for (i, s) in self.spine.iter().enumerate() {
            if i == abs {
                return pos + offset.min(self.chapters[i].chars);
            }
            if s.linear {
                pos += self.chapters[i].chars;
            }
        }
        pos
    }

    fn locator_at_global(&self, pos: usize) -> Locator {
        let mut remaining = pos;
        for &abs in &self.linear_items() {
            let chars = self.chapters[abs].chars;
            if remaining < chars {
                return spine_locator(abs, remaining);
            }
            remaining -= chars;
        }
        let last = self.chapters.len().saturating_sub(1);
        spine_locator(last, self.chapters.get(last).map_or(0, |c| c.chars))
    }
}

#[derive(Clone)]
pub struct EpubModel {
    inner: Rc<RefCell<EpubInner>>,
}

impl EpubModel {
    /// Parse an EPUB binary into a document model. All spine content is
    /// extracted eagerly; the model is read-only afterwards.
    pub fn open(bytes: &[u8]) -> Result<Self> {
        let mut doc = EpubDoc::from_reader(Cursor::new(bytes.to_vec()))
            .map_err(|e| anyhow!("Failed to parse EPUB: {e}"))?;

        let title = doc
            .mdata("title")
            .map(|m| m.value.clone())
            .unwrap_or_else(|| "Untitled".to_string());
        let layout_value = doc
            .mdata("rendition:layout")
            .or_else(|| doc.mdata("layout"))
            .map(|m| m.value.clone());
        let layout = match layout_value.as_deref() {
            Some("pre-paginated") => LayoutMode::PrePaginated,
            _ => LayoutMode::Reflowable,
        };

        let mut spine = Vec::new();
        for item in &doc.spine {
            let href = doc
                .resources
                .get(&item.idref)
                .map(|r| r.path.to_string_lossy().to_string())
                .unwrap_or_default();
            spine.push(SpineItem {
                idref: item.idref.clone(),
                href,
                linear: item.linear,
                properties: item.properties.clone().unwrap_or_default(),
            });
        }

        let mut chapters = Vec::with_capacity(spine.len());
        for (i, item) in spine.iter().enumerate() {
            let markup = if doc.set_current_chapter(i) {
                match doc.get_current_str() {
                    Some((content, _mime)) => content,
                    None => {
                        warn!("No content for spine item {i} ({})", item.idref);
                        String::new()
                    }
                }
            } else {
                warn!("Could not navigate to spine item {i} ({})", item.idref);
                String::new()
            };
            let text = visible_text(&markup);
            let chars = text.chars().count();
            chapters.push(Chapter {
                href: item.href.clone(),
                markup,
                text,
                chars,
            });
        }

        info!(
            "Parsed EPUB '{title}': {} spine items, {:?} layout",
            spine.len(),
            layout
        );

        Ok(Self {
            inner: Rc::new(RefCell::new(EpubInner {
                spine,
                package: PackageInfo { title, layout },
                chapters,
                locations: Vec::new(),
            })),
        })
    }
}

/// Visible text of chapter markup: tags stripped, whitespace collapsed.
fn visible_text(markup: &str) -> String {
    let stripped = TAG_RE.replace_all(markup, " ");
    WS_RE.replace_all(stripped.trim(), " ").to_string()
}

impl DocumentModel for EpubModel {
    fn spine(&self) -> Vec<SpineItem> {
        self.inner.borrow().spine.clone()
    }

    fn package(&self) -> PackageInfo {
        self.inner.borrow().package.clone()
    }

    fn render_to(&self, viewport: ViewportSpec) -> Result<Box<dyn Renderer>> {
        Ok(Box::new(EpubRenderer {
            inner: Rc::clone(&self.inner),
            viewport,
            spine_index: None,
            offset: 0,
            events: Vec::new(),
        }))
    }

    fn compare(&self, a: &Locator, b: &Locator) -> Option<Ordering> {
        let pa = parse_spine_locator(a)?;
        let pb = parse_spine_locator(b)?;
        Some(pa.cmp(&pb))
    }

    fn generate_locations(&self, chunk_chars: usize) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let total = inner.total_linear_chars();
        let mut boundaries = Vec::new();
        let mut pos = 0usize;
        while pos < total {
            boundaries.push(pos);
            pos += chunk_chars.max(1);
        }
        inner.locations = boundaries
            .into_iter()
            .filter_map(|p| parse_spine_locator(&inner.locator_at_global(p)))
            .collect();
        debug!("Generated {} approximate locations", inner.locations.len());
        Ok(())
    }

    fn locations_total(&self) -> usize {
        self.inner.borrow().locations.len()
    }

    fn location_from(&self, locator: &Locator) -> Option<usize> {
        let inner = self.inner.borrow();
        if inner.locations.is_empty() {
            return None;
        }
        let key = parse_spine_locator(locator)?;
        let mut idx = 0;
        for (i, entry) in inner.locations.iter().enumerate() {
            if *entry <= key {
                idx = i;
            } else {
                break;
            }
        }
        Some(idx)
    }

    fn percentage_from(&self, locator: &Locator) -> Option<f64> {
        let inner = self.inner.borrow();
        let (spine, offset) = parse_spine_locator(locator)?;
        let total = inner.total_linear_chars();
        if total == 0 {
            return None;
        }
        Some(inner.global_pos(spine, offset) as f64 / total as f64)
    }

    fn locator_from_percentage(&self, pct: f64) -> Option<Locator> {
        let inner = self.inner.borrow();
        let total = inner.total_linear_chars();
        if total == 0 {
            return None;
        }
        let pos = (pct.clamp(0.0, 1.0) * total as f64) as usize;
        Some(inner.locator_at_global(pos.min(total.saturating_sub(1))))
    }

    fn range_anchor(&self, locator: &Locator) -> Option<RangeAnchor> {
        let inner = self.inner.borrow();
        let (spine, offset) = parse_spine_locator(locator)?;
        let chapter = inner.chapters.get(spine)?;
        if chapter.markup.is_empty() {
            return None;
        }
        Some(RangeAnchor {
            markup: chapter.markup.clone(),
            text_offset: offset,
        })
    }

    fn range_text(&self, locator: &Locator) -> Option<String> {
        let inner = self.inner.borrow();
        let (spine, offset) = parse_spine_locator(locator)?;
        let chapter = inner.chapters.get(spine)?;
        let tail: String = chapter.text.chars().skip(offset).take(300).collect();
        if tail.is_empty() {
            None
        } else {
            Some(tail)
        }
    }
}

struct EpubRenderer {
    inner: Rc<RefCell<EpubInner>>,
    viewport: ViewportSpec,
    spine_index: Option<usize>,
    offset: usize,
    events: Vec<RendererEvent>,
}

impl EpubRenderer {
    fn capacity(&self, abs: usize) -> usize {
        let inner = self.inner.borrow();
        if inner.package.layout == LayoutMode::PrePaginated {
            inner.chapters[abs].chars.max(1)
        } else {
            page_chars(self.viewport)
        }
    }

    fn position_at(&self, abs: usize, offset: usize) -> Position {
        let capacity = self.capacity(abs);
        let inner = self.inner.borrow();
        let chars = inner.chapters[abs].chars;
        Position {
            locator: spine_locator(abs, offset),
            href: inner.chapters[abs].href.clone(),
            spine_index: abs,
            displayed: DisplayedPage {
                page: offset / capacity + 1,
                total: chars.div_ceil(capacity).max(1),
            },
        }
    }

    fn visible_range(&self) -> Option<VisibleRange> {
        let abs = self.spine_index?;
        let capacity = self.capacity(abs);
        let chars = self.inner.borrow().chapters[abs].chars;
        let start = self.position_at(abs, self.offset);
        let end_offset = (self.offset + capacity).min(chars.saturating_sub(1));
        let end = self.position_at(abs, end_offset.max(self.offset));
        Some(VisibleRange { start, end })
    }

    fn emit_relocated(&mut self) {
        if let Some(range) = self.visible_range() {
            self.events.push(RendererEvent::Relocated(range));
        }
    }

    fn move_to(&mut self, abs: usize, offset: usize) {
        let capacity = self.capacity(abs);
        self.spine_index = Some(abs);
        self.offset = offset - offset % capacity;
    }

    fn linear_items(&self) -> Vec<usize> {
        self.inner.borrow().linear_items()
    }
}

impl Renderer for EpubRenderer {
    fn display_start(&mut self) -> Result<()> {
        let first = self
            .linear_items()
            .first()
            .copied()
            .ok_or_else(|| anyhow!("document has no linear content"))?;
        self.move_to(first, 0);
        self.events.push(RendererEvent::Displayed);
        self.emit_relocated();
        Ok(())
    }

    fn display(&mut self, locator: &Locator) -> Result<()> {
        let (abs, offset) = parse_spine_locator(locator)
            .with_context(|| format!("unparseable locator: {locator}"))?;
        if abs >= self.inner.borrow().chapters.len() {
            return Err(anyhow!("locator outside spine: {locator}"));
        }
        self.move_to(abs, offset);
        self.events.push(RendererEvent::Displayed);
        self.emit_relocated();
        Ok(())
    }

    fn display_spine(&mut self, spine_index: usize) -> Result<()> {
        if spine_index >= self.inner.borrow().chapters.len() {
            return Err(anyhow!("spine index {spine_index} out of range"));
        }
        self.move_to(spine_index, 0);
        self.events.push(RendererEvent::Displayed);
        self.emit_relocated();
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        let Some(abs) = self.spine_index else {
            return self.display_start();
        };
        let capacity = self.capacity(abs);
        let chars = self.inner.borrow().chapters[abs].chars;
        if self.offset + capacity < chars {
            self.offset += capacity;
            self.emit_relocated();
            return Ok(());
        }
        let linear = self.linear_items();
        let pos = linear.iter().position(|&i| i == abs);
        if let Some(&next_abs) = pos.and_then(|p| linear.get(p + 1)) {
            self.move_to(next_abs, 0);
            self.emit_relocated();
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let Some(abs) = self.spine_index else {
            return self.display_start();
        };
        let capacity = self.capacity(abs);
        if self.offset >= capacity {
            self.offset -= capacity;
            self.emit_relocated();
            return Ok(());
        }
        let linear = self.linear_items();
        let pos = linear.iter().position(|&i| i == abs);
        if let Some(&prev_abs) = pos
            .and_then(|p| p.checked_sub(1))
            .and_then(|p| linear.get(p))
        {
            let prev_capacity = self.capacity(prev_abs);
            let chars = self.inner.borrow().chapters[prev_abs].chars;
            let last_page = chars.saturating_sub(1) / prev_capacity;
            self.move_to(prev_abs, last_page * prev_capacity);
            self.emit_relocated();
        }
        Ok(())
    }

    fn current_location(&self) -> Option<VisibleRange> {
        self.visible_range()
    }

    fn apply_theme(&mut self) {
        // Glyph-grid pages carry no styling of their own.
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.viewport.width = width.max(1);
        self.viewport.height = height.max(1);
        if let Some(abs) = self.spine_index {
            let offset = self.offset;
            self.move_to(abs, offset);
        }
        self.events.push(RendererEvent::Resized { width, height });
    }

    fn take_events(&mut self) -> Vec<RendererEvent> {
        std::mem::take(&mut self.events)
    }

    fn release(&mut self) {
        self.spine_index = None;
        self.events.clear();
    }
}
