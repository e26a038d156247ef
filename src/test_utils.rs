//! Scripted document model for tests: deterministic chapters, a glyph-grid
//! page model, and failure injection. No real markup parsing or rendering.

use crate::document::{
    DisplayedPage, DocumentModel, LayoutMode, PackageInfo, Position, RangeAnchor, Renderer,
    RendererEvent, SpineItem, ViewportSpec, VisibleRange,
};
use crate::locator::Locator;
use anyhow::{anyhow, Result};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

struct StubChapter {
    chars: usize,
    linear: bool,
    properties: String,
    markup: Option<String>,
}

struct StubInner {
    chapters: Vec<StubChapter>,
    layout: LayoutMode,
    title: String,
    locations: Vec<(usize, usize)>,
    has_compare: bool,
    index_lookup_fails: bool,
    fail_display: bool,
    fail_renderers_after: Option<usize>,
    pending_selection: Option<Locator>,
    created: usize,
    released: usize,
}

impl StubInner {
    fn chapter_text(&self, abs: usize) -> String {
        let chapter = &self.chapters[abs];
        if let Some(markup) = &chapter.markup {
            strip_tags(markup)
        } else {
            filler_text(chapter.chars)
        }
    }

    fn total_linear_chars(&self) -> usize {
        self.chapters
            .iter()
            .filter(|c| c.linear)
            .map(|c| c.chars)
            .sum()
    }

    /// Global character position of (spine item, offset) across linear
    /// items, in reading order.
    fn global_pos(&self, abs: usize, offset: usize) -> usize {
        let mut pos = 0;
        for (i, c) in self.chapters.iter().enumerate() {
            if i == abs {
                return pos + offset.min(c.chars);
            }
            if c.linear {
                pos += c.chars;
            }
        }
        pos
    }

    fn locator_at_global(&self, pos: usize) -> Locator {
        let mut remaining = pos;
        for (i, c) in self.chapters.iter().enumerate() {
            if !c.linear {
                continue;
            }
            if remaining < c.chars {
                return make_locator(i, remaining);
            }
            remaining -= c.chars;
        }
        let last = self.chapters.len().saturating_sub(1);
        make_locator(last, self.chapters.get(last).map_or(0, |c| c.chars))
    }
}

/// Locator format `loc:<spine>:<offset>`, zero padded so lexicographic
/// order matches document order.
pub fn make_locator(spine: usize, offset: usize) -> Locator {
    Locator::new(format!("loc:{spine:04}:{offset:08}"))
}

/// Parse the stub locator format back to (spine index, char offset).
pub fn parse_locator(locator: &Locator) -> Option<(usize, usize)> {
    let mut parts = locator.as_str().split(':');
    if parts.next() != Some("loc") {
        return None;
    }
    let spine = parts.next()?.parse().ok()?;
    let offset = parts.next()?.parse().ok()?;
    Some((spine, offset))
}

fn filler_text(chars: usize) -> String {
    "lorem ipsum dolor sit amet consectetur "
        .chars()
        .cycle()
        .take(chars)
        .collect()
}

fn strip_tags(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut in_tag = false;
    for ch in markup.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Characters one page holds at a viewport, modeled as a glyph grid.
pub fn page_capacity(viewport: ViewportSpec) -> usize {
    let cols = (viewport.width / 8).max(1) as usize;
    let rows = (viewport.height / 16).max(1) as usize;
    cols * rows
}

#[derive(Clone)]
pub struct StubModel {
    inner: Rc<RefCell<StubInner>>,
}

impl StubModel {
    /// Reflowable document with one chapter per entry of `chapter_chars`.
    pub fn reflowable(chapter_chars: &[usize]) -> Self {
        let chapters = chapter_chars
            .iter()
            .map(|&chars| StubChapter {
                chars,
                linear: true,
                properties: String::new(),
                markup: None,
            })
            .collect();
        Self {
            inner: Rc::new(RefCell::new(StubInner {
                chapters,
                layout: LayoutMode::Reflowable,
                title: "Stub Book".to_string(),
                locations: Vec::new(),
                has_compare: true,
                index_lookup_fails: false,
                fail_display: false,
                fail_renderers_after: None,
                pending_selection: None,
                created: 0,
                released: 0,
            })),
        }
    }

    /// Pre-paginated document with `items` single-page spine items.
    pub fn fixed(items: usize) -> Self {
        let model = Self::reflowable(&vec![400; items]);
        model.inner.borrow_mut().layout = LayoutMode::PrePaginated;
        model
    }

    pub fn with_title(self, title: &str) -> Self {
        self.inner.borrow_mut().title = title.to_string();
        self
    }

    pub fn with_non_linear(self, abs: usize) -> Self {
        self.inner.borrow_mut().chapters[abs].linear = false;
        self
    }

    pub fn with_markup(self, abs: usize, markup: &str) -> Self {
        {
            let mut inner = self.inner.borrow_mut();
            inner.chapters[abs].chars = strip_tags(markup).chars().count();
            inner.chapters[abs].markup = Some(markup.to_string());
        }
        self
    }

    /// Model without a comparison function; consumers must fall back to
    /// lexicographic locator order.
    pub fn without_compare(self) -> Self {
        self.inner.borrow_mut().has_compare = false;
        self
    }

    /// Direct approximate-index lookups fail; only percentage queries
    /// succeed.
    pub fn with_failing_index_lookup(self) -> Self {
        self.inner.borrow_mut().index_lookup_fails = true;
        self
    }

    /// Toggle display rejection on an already-open model.
    pub fn set_fail_display(&self, fail: bool) {
        self.inner.borrow_mut().fail_display = fail;
    }

    /// Script a user text selection; the renderer emits it with its next
    /// batch of events.
    pub fn select(&self, spine: usize, offset: usize) {
        self.inner.borrow_mut().pending_selection = Some(make_locator(spine, offset));
    }

    /// Every display request is rejected.
    pub fn failing_render(self) -> Self {
        self.inner.borrow_mut().fail_display = true;
        self
    }

    /// Viewport creation fails after the first `keep` renderers. With
    /// `keep = 1` the on-screen viewport works but every off-screen probe
    /// viewport is rejected, forcing the approximate strategy.
    pub fn failing_probe_viewports(self, keep: usize) -> Self {
        self.inner.borrow_mut().fail_renderers_after = Some(keep);
        self
    }

    pub fn pages_in_chapter(&self, abs: usize, width: u32, height: u32) -> usize {
        let inner = self.inner.borrow();
        let chapter = &inner.chapters[abs];
        if inner.layout == LayoutMode::PrePaginated {
            return 1;
        }
        let capacity = page_capacity(ViewportSpec::paginated(width, height));
        chapter.chars.div_ceil(capacity).max(1)
    }

    /// Page count a full probe should find at this viewport.
    pub fn expected_pages(&self, width: u32, height: u32) -> usize {
        let linear: Vec<usize> = {
            let inner = self.inner.borrow();
            inner
                .chapters
                .iter()
                .enumerate()
                .filter(|(_, c)| c.linear)
                .map(|(i, _)| i)
                .collect()
        };
        linear
            .iter()
            .map(|&abs| self.pages_in_chapter(abs, width, height))
            .sum()
    }

    pub fn created_renderers(&self) -> usize {
        self.inner.borrow().created
    }

    pub fn released_renderers(&self) -> usize {
        self.inner.borrow().released
    }
}

impl DocumentModel for StubModel {
    fn spine(&self) -> Vec<SpineItem> {
        self.inner
            .borrow()
            .chapters
            .iter()
            .enumerate()
            .map(|(i, c)| SpineItem {
                idref: format!("item{i}"),
                href: format!("chapter{i}.xhtml"),
                linear: c.linear,
                properties: c.properties.clone(),
            })
            .collect()
    }

    fn package(&self) -> PackageInfo {
        let inner = self.inner.borrow();
        PackageInfo {
            title: inner.title.clone(),
            layout: inner.layout,
        }
    }

    fn render_to(&self, viewport: ViewportSpec) -> Result<Box<dyn Renderer>> {
        {
            let inner = self.inner.borrow();
            if let Some(keep) = inner.fail_renderers_after {
                if inner.created >= keep {
                    return Err(anyhow!("no rendering surface available"));
                }
            }
        }
        self.inner.borrow_mut().created += 1;
        Ok(Box::new(StubRenderer {
            inner: Rc::clone(&self.inner),
            viewport,
            spine_index: None,
            offset: 0,
            events: Vec::new(),
            released: false,
        }))
    }

    fn compare(&self, a: &Locator, b: &Locator) -> Option<Ordering> {
        if !self.inner.borrow().has_compare {
            return None;
        }
        let (sa, oa) = parse_locator(a)?;
        let (sb, ob) = parse_locator(b)?;
        Some((sa, oa).cmp(&(sb, ob)))
    }

    fn generate_locations(&self, chunk_chars: usize) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.locations.clear();
        let total = inner.total_linear_chars();
        let mut boundaries = Vec::new();
        let mut pos = 0usize;
        while pos < total {
            boundaries.push(pos);
            pos += chunk_chars;
        }
        for p in boundaries {
            let locator = inner.locator_at_global(p);
            if let Some(parsed) = parse_locator(&locator) {
                inner.locations.push(parsed);
            }
        }
        Ok(())
    }

    fn locations_total(&self) -> usize {
        self.inner.borrow().locations.len()
    }

    fn location_from(&self, locator: &Locator) -> Option<usize> {
        let inner = self.inner.borrow();
        if inner.index_lookup_fails || inner.locations.is_empty() {
            return None;
        }
        let key = parse_locator(locator)?;
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
        let (spine, offset) = parse_locator(locator)?;
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
        let (spine, offset) = parse_locator(locator)?;
        let markup = inner.chapters.get(spine)?.markup.clone()?;
        Some(RangeAnchor {
            markup,
            text_offset: offset,
        })
    }

    fn range_text(&self, locator: &Locator) -> Option<String> {
        let inner = self.inner.borrow();
        let (spine, offset) = parse_locator(locator)?;
        if spine >= inner.chapters.len() {
            return None;
        }
        let text = inner.chapter_text(spine);
        let tail: String = text.chars().skip(offset).take(300).collect();
        if tail.is_empty() {
            None
        } else {
            Some(tail)
        }
    }
}

struct StubRenderer {
    inner: Rc<RefCell<StubInner>>,
    viewport: ViewportSpec,
    /// Absolute spine index of the displayed item; `None` before the
    /// first display call.
    spine_index: Option<usize>,
    offset: usize,
    events: Vec<RendererEvent>,
    released: bool,
}

impl StubRenderer {
    fn capacity(&self, abs: usize) -> usize {
        let inner = self.inner.borrow();
        if inner.layout == LayoutMode::PrePaginated {
            inner.chapters[abs].chars.max(1)
        } else {
            page_capacity(self.viewport)
        }
    }

    fn linear_items(&self) -> Vec<usize> {
        self.inner
            .borrow()
            .chapters
            .iter()
            .enumerate()
            .filter(|(_, c)| c.linear)
            .map(|(i, _)| i)
            .collect()
    }

    fn first_linear(&self) -> Option<usize> {
        self.linear_items().first().copied()
    }

    fn check_display_allowed(&self) -> Result<()> {
        if self.inner.borrow().fail_display {
            Err(anyhow!("render rejected: resource unavailable"))
        } else {
            Ok(())
        }
    }

    fn position_at(&self, abs: usize, offset: usize) -> Position {
        let capacity = self.capacity(abs);
        let chars = self.inner.borrow().chapters[abs].chars;
        let page = offset / capacity + 1;
        let total = chars.div_ceil(capacity).max(1);
        Position {
            locator: make_locator(abs, offset),
            href: format!("chapter{abs}.xhtml"),
            spine_index: abs,
            displayed: DisplayedPage { page, total },
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
        // Snap to the start of the page containing the offset.
        self.offset = offset - offset % capacity;
    }
}

impl Renderer for StubRenderer {
    fn display_start(&mut self) -> Result<()> {
        self.check_display_allowed()?;
        let first = self
            .first_linear()
            .ok_or_else(|| anyhow!("document has no linear content"))?;
        self.move_to(first, 0);
        self.events.push(RendererEvent::Displayed);
        self.emit_relocated();
        Ok(())
    }

    fn display(&mut self, locator: &Locator) -> Result<()> {
        self.check_display_allowed()?;
        let (abs, offset) =
            parse_locator(locator).ok_or_else(|| anyhow!("unparseable locator: {locator}"))?;
        if abs >= self.inner.borrow().chapters.len() {
            return Err(anyhow!("locator outside spine: {locator}"));
        }
        self.move_to(abs, offset);
        self.events.push(RendererEvent::Displayed);
        self.emit_relocated();
        Ok(())
    }

    fn display_spine(&mut self, spine_index: usize) -> Result<()> {
        self.check_display_allowed()?;
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
        // End of document: location unchanged, no error.
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

    fn apply_theme(&mut self) {}

    fn resize(&mut self, width: u32, height: u32) {
        self.viewport.width = width.max(1);
        self.viewport.height = height.max(1);
        // Reflow snaps the offset to the new page grid.
        if let Some(abs) = self.spine_index {
            let offset = self.offset;
            self.move_to(abs, offset);
        }
        self.events.push(RendererEvent::Resized { width, height });
    }

    fn take_events(&mut self) -> Vec<RendererEvent> {
        if let Some(locator) = self.inner.borrow_mut().pending_selection.take() {
            self.events.push(RendererEvent::Selected(locator));
        }
        std::mem::take(&mut self.events)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.inner.borrow_mut().released += 1;
        }
    }
}

impl Drop for StubRenderer {
    fn drop(&mut self) {
        self.release();
    }
}
