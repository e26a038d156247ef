use crate::locator::Locator;
use anyhow::Result;
use std::cmp::Ordering;

/// Whether the package reflows content to the viewport or pins it to
/// fixed per-page dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    Reflowable,
    PrePaginated,
}

/// One entry of the linear reading order.
#[derive(Debug, Clone)]
pub struct SpineItem {
    pub idref: String,
    pub href: String,
    pub linear: bool,
    pub properties: String,
}

impl SpineItem {
    /// Per-item pre-paginated marker, overriding package-level layout.
    pub fn is_pre_paginated(&self) -> bool {
        self.properties.contains("pre-paginated")
            || self.properties.contains("rendition:layout-pre-paginated")
    }
}

#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub title: String,
    pub layout: LayoutMode,
}

/// How a rendered page reports itself within its spine item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayedPage {
    /// 1-based page within the current spine item.
    pub page: usize,
    /// Total pages of the current spine item at the current viewport.
    pub total: usize,
}

/// One edge of the currently visible range.
#[derive(Debug, Clone)]
pub struct Position {
    pub locator: Locator,
    pub href: String,
    pub spine_index: usize,
    pub displayed: DisplayedPage,
}

/// What the renderer currently shows: the start and end of the visible
/// content range.
#[derive(Debug, Clone)]
pub struct VisibleRange {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    Paginated,
    ScrolledDoc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadMode {
    Auto,
    None,
}

/// Pixel dimensions and flow settings for a rendering viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportSpec {
    pub width: u32,
    pub height: u32,
    pub flow: FlowMode,
    pub spread: SpreadMode,
}

impl ViewportSpec {
    pub fn paginated(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            flow: FlowMode::Paginated,
            spread: SpreadMode::Auto,
        }
    }

    pub fn scrolled(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            flow: FlowMode::ScrolledDoc,
            spread: SpreadMode::None,
        }
    }
}

/// Events a renderer emits, drained and processed in emission order.
#[derive(Debug, Clone)]
pub enum RendererEvent {
    /// A spine item finished rendering into the viewport.
    Displayed,
    /// The visible range changed (navigation, display, reflow).
    Relocated(VisibleRange),
    /// The viewport changed size.
    Resized { width: u32, height: u32 },
    /// The user selected a content range.
    Selected(Locator),
}

/// Anchor for excerpt extraction: the markup of the spine item a locator
/// points into, plus the character offset of the locator within that
/// item's visible text.
#[derive(Debug, Clone)]
pub struct RangeAnchor {
    pub markup: String,
    pub text_offset: usize,
}

/// An active rendering surface for one document. On-screen and off-screen
/// viewports both implement this; each is owned exclusively by one active
/// operation at a time.
pub trait Renderer {
    /// Render the document's starting position.
    fn display_start(&mut self) -> Result<()>;

    /// Render the page containing `locator`.
    fn display(&mut self, locator: &Locator) -> Result<()>;

    /// Render the first page of the spine item at absolute index.
    fn display_spine(&mut self, spine_index: usize) -> Result<()>;

    /// Advance one page. Ends of the document are reported as `Ok` with an
    /// unchanged location.
    fn next(&mut self) -> Result<()>;

    fn prev(&mut self) -> Result<()>;

    fn current_location(&self) -> Option<VisibleRange>;

    /// Flush pending layout work so `current_location` can be trusted.
    /// Scripted surfaces report synchronously and keep the default no-op.
    fn settle(&mut self) {}

    /// Re-apply viewport theming after a reflow. No-op for surfaces
    /// without styling.
    fn apply_theme(&mut self);

    /// Resize the viewport. Queues a `Resized` event.
    fn resize(&mut self, width: u32, height: u32);

    /// Drain queued events in emission order.
    fn take_events(&mut self) -> Vec<RendererEvent>;

    /// Tear down the rendering surface. Called by drop guards on every
    /// probe exit path; must be safe to call more than once.
    fn release(&mut self);
}

/// Capability surface the pagination core requires of a document model.
/// The core never reimplements parsing or rendering; it consumes this
/// contract.
pub trait DocumentModel {
    fn spine(&self) -> Vec<SpineItem>;

    fn package(&self) -> PackageInfo;

    /// Create a rendering surface at the given viewport. Off-screen probe
    /// viewports and the on-screen reading viewport go through the same
    /// call.
    fn render_to(&self, viewport: ViewportSpec) -> Result<Box<dyn Renderer>>;

    /// Model-defined locator ordering. `None` when the model has no
    /// comparison function; callers fall back to lexicographic order.
    fn compare(&self, a: &Locator, b: &Locator) -> Option<Ordering>;

    /// Build the approximate location index from fixed-size character
    /// chunks. Cheap enough to always attempt for reflowable documents.
    fn generate_locations(&self, chunk_chars: usize) -> Result<()>;

    /// Total entries in the approximate index; 0 before generation.
    fn locations_total(&self) -> usize;

    /// Approximate index of a locator, if the index covers it.
    fn location_from(&self, locator: &Locator) -> Option<usize>;

    /// Position of a locator as a fraction of the whole document.
    fn percentage_from(&self, locator: &Locator) -> Option<f64>;

    /// Locator nearest to the given document fraction.
    fn locator_from_percentage(&self, pct: f64) -> Option<Locator>;

    /// Resolve a locator to its spine item's markup and text offset, for
    /// excerpt extraction.
    fn range_anchor(&self, locator: &Locator) -> Option<RangeAnchor>;

    /// Visible text at and after a locator, for raw-substring fallbacks.
    fn range_text(&self, locator: &Locator) -> Option<String>;
}

/// Absolute spine indices of linear items, in reading order. Items marked
/// non-linear are excluded from page numbering.
pub fn linear_order(spine: &[SpineItem]) -> Vec<usize> {
    spine
        .iter()
        .enumerate()
        .filter(|(_, item)| item.linear)
        .map(|(i, _)| i)
        .collect()
}

/// Package- or spine-level pre-paginated detection. Any match pins the
/// document to fixed spine numbering for its whole lifetime.
pub fn is_fixed_layout(package: &PackageInfo, spine: &[SpineItem]) -> bool {
    package.layout == LayoutMode::PrePaginated || spine.iter().any(SpineItem::is_pre_paginated)
}
