//! The pagination and location-tracking engine: maps a reflowable
//! document's continuous location space onto a stable page-number
//! abstraction, and keeps the mapping consistent across resizes, layout
//! modes, and sessions.

use crate::document::{
    is_fixed_layout, linear_order, DocumentModel, Renderer, RendererEvent, ViewportSpec,
    VisibleRange,
};
use crate::library::Library;
use crate::locator::Locator;
use crate::page_index::PageIndex;
use crate::probe::run_probe;
use log::{debug, info, warn};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Chunk size of the approximate location index, in characters.
pub const APPROX_CHUNK_CHARS: usize = 180;

/// A resize only triggers a rebuild after this much quiet time; a newer
/// resize within the window supersedes the pending rebuild.
pub const RESIZE_QUIESCENCE: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Navigation target cannot be resolved to a location")]
    UnresolvableLocation,
    #[error("Display request rejected: {0}")]
    RenderRejected(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Engine lifecycle. `Rebuilding` exists between a resize expiry and the
/// strategy swap; navigation during it resolves against the previous,
/// still-consistent index (the swap is a single assignment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Probing,
    ProbeReady,
    LocationsReady,
    FixedReady,
    Rebuilding,
}

/// Which numbering strategy answers page queries. Exactly one is active
/// per document; selected on open and on every rebuild, never branched
/// ad hoc at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Probed,
    Approximate,
    Fixed,
}

enum NumberingStrategy {
    /// Explicit page boundaries discovered by the off-screen probe.
    Probed(PageIndex),
    /// The document model's chunk-based location index.
    Approximate { total: usize },
    /// Page number = 1-based position in the filtered linear spine.
    FixedSpine,
}

impl NumberingStrategy {
    fn kind(&self) -> StrategyKind {
        match self {
            Self::Probed(_) => StrategyKind::Probed,
            Self::Approximate { .. } => StrategyKind::Approximate,
            Self::FixedSpine => StrategyKind::Fixed,
        }
    }
}

/// Write side of position persistence. The engine records the last viewed
/// locator through this on every relocation.
pub trait PositionSink {
    fn record_position(&mut self, book_id: &str, locator: &Locator);
}

impl PositionSink for Rc<RefCell<Library>> {
    fn record_position(&mut self, book_id: &str, locator: &Locator) {
        self.borrow_mut().record_position(book_id, locator);
    }
}

pub struct OpenOptions {
    pub book_id: String,
    pub width: u32,
    pub height: u32,
    /// Saved position to restore; the document start is shown without one.
    pub resume: Option<Locator>,
}

struct PendingResize {
    since: Instant,
    width: u32,
    height: u32,
}

pub struct ReaderEngine<M: DocumentModel> {
    model: M,
    renderer: Box<dyn Renderer>,
    book_id: String,
    title: String,
    width: u32,
    height: u32,
    fixed: bool,
    linear: Vec<usize>,
    state: EngineState,
    strategy: NumberingStrategy,
    /// Whether the approximate index exists as a silent fallback while
    /// the probed strategy is active.
    approx_ready: bool,
    current_page: usize,
    total_pages: usize,
    last_locator: Option<Locator>,
    last_error: Option<String>,
    pending_resize: Option<PendingResize>,
    /// Bumped on every index rebuild; readers can detect staleness.
    index_generation: u64,
    positions: Option<Box<dyn PositionSink>>,
    on_selected: Option<Box<dyn FnMut(String)>>,
}

impl<M: DocumentModel> std::fmt::Debug for ReaderEngine<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderEngine")
            .field("book_id", &self.book_id)
            .field("title", &self.title)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("fixed", &self.fixed)
            .field("current_page", &self.current_page)
            .field("total_pages", &self.total_pages)
            .finish_non_exhaustive()
    }
}

impl<M: DocumentModel> ReaderEngine<M> {
    /// Open a document: detect its layout mode, build the numbering
    /// strategy for the current viewport, and display the resume position
    /// or the document start.
    pub fn open(
        model: M,
        opts: OpenOptions,
        positions: Option<Box<dyn PositionSink>>,
    ) -> Result<Self, EngineError> {
        let spine = model.spine();
        let package = model.package();
        let linear = linear_order(&spine);
        let fixed = is_fixed_layout(&package, &spine);

        let viewport = if fixed {
            ViewportSpec::scrolled(opts.width, opts.height)
        } else {
            ViewportSpec::paginated(opts.width, opts.height)
        };
        let renderer = model
            .render_to(viewport)
            .map_err(|e| EngineError::RenderRejected(e.to_string()))?;

        let mut engine = Self {
            model,
            renderer,
            book_id: opts.book_id,
            title: package.title,
            width: opts.width.max(1),
            height: opts.height.max(1),
            fixed,
            linear,
            state: EngineState::Uninitialized,
            strategy: NumberingStrategy::FixedSpine,
            approx_ready: false,
            current_page: 1,
            total_pages: 1,
            last_locator: None,
            last_error: None,
            pending_resize: None,
            index_generation: 0,
            positions,
            on_selected: None,
        };

        if !engine.fixed {
            engine.build_approximate_index();
        }

        // Initial display: resume the saved position when it still
        // resolves, otherwise fall back to the document start.
        let mut shown = false;
        if let Some(locator) = &opts.resume {
            match engine.renderer.display(locator) {
                Ok(()) => shown = true,
                Err(e) => warn!("Saved position no longer displays: {e}"),
            }
        }
        if !shown {
            engine
                .renderer
                .display_start()
                .map_err(|e| EngineError::RenderRejected(e.to_string()))?;
        }

        engine.build_strategy();
        engine.pump_events();
        info!(
            "Opened '{}' ({:?}, {} pages)",
            engine.title,
            engine.strategy.kind(),
            engine.total_pages
        );
        Ok(engine)
    }

    /// Handle a text-selection event by resolving the selected range to
    /// trimmed text. Downstream consumers (out of scope here) turn it
    /// into prompts.
    pub fn set_selection_handler(&mut self, handler: impl FnMut(String) + 'static) {
        self.on_selected = Some(Box::new(handler));
    }

    // ---- strategy construction -------------------------------------

    fn build_approximate_index(&mut self) {
        self.approx_ready = false;
        match self.model.generate_locations(APPROX_CHUNK_CHARS) {
            Ok(()) => self.approx_ready = self.model.locations_total() > 0,
            Err(e) => warn!("Approximate index generation failed: {e}"),
        }
    }

    /// Select the active strategy for the current viewport. Fixed layout
    /// is permanent for the document; otherwise the probe result wins
    /// when non-empty (a partial probe index is trusted: real boundaries
    /// for the covered prefix beat a uniform guess), with the approximate
    /// index as fallback.
    fn build_strategy(&mut self) {
        if self.fixed {
            self.strategy = NumberingStrategy::FixedSpine;
            self.total_pages = self.linear.len().max(1);
            self.state = EngineState::FixedReady;
            self.index_generation += 1;
            return;
        }

        self.state = EngineState::Probing;
        let index = run_probe(&self.model, self.width, self.height, &self.linear);
        if !index.is_empty() {
            self.total_pages = index.total();
            self.strategy = NumberingStrategy::Probed(index);
            self.state = EngineState::ProbeReady;
        } else {
            let total = self.model.locations_total().max(1);
            self.total_pages = total;
            self.strategy = NumberingStrategy::Approximate { total };
            self.state = EngineState::LocationsReady;
            if !self.approx_ready {
                warn!("Neither probe nor approximate index available; page numbers degenerate");
            }
        }
        self.index_generation += 1;
    }

    // ---- location resolution ---------------------------------------

    fn cmp_locators(&self, a: &Locator, b: &Locator) -> Ordering {
        self.model.compare(a, b).unwrap_or_else(|| a.lexical_cmp(b))
    }

    /// Re-derive current page / total / progress from a visible range,
    /// per the active strategy, then persist the position.
    fn update_from_range(&mut self, range: &VisibleRange) {
        let locator = range.start.locator.clone();
        let (page, total) = match &self.strategy {
            NumberingStrategy::Probed(index) => {
                let page = index.page_of(&locator, |a, b| self.cmp_locators(a, b));
                (page, index.total())
            }
            NumberingStrategy::Approximate { total } => {
                let total = (*total).max(1);
                let page = match self.model.location_from(&locator) {
                    Some(idx) => idx + 1,
                    None => self
                        .model
                        .percentage_from(&locator)
                        .map(|pct| ((pct * total as f64).round() as usize).max(1))
                        .unwrap_or(1),
                };
                (page, total)
            }
            NumberingStrategy::FixedSpine => {
                let pos = self
                    .linear
                    .iter()
                    .position(|&abs| abs == range.start.spine_index)
                    .unwrap_or(0);
                (pos + 1, self.linear.len().max(1))
            }
        };

        self.total_pages = total.max(1);
        self.current_page = page.clamp(1, self.total_pages);
        self.last_locator = Some(locator.clone());
        if let Some(sink) = &mut self.positions {
            sink.record_position(&self.book_id, &locator);
        }
    }

    /// Process renderer events in emission order.
    fn pump_events(&mut self) {
        for event in self.renderer.take_events() {
            match event {
                RendererEvent::Displayed => {
                    self.renderer.apply_theme();
                }
                RendererEvent::Relocated(range) => {
                    self.update_from_range(&range);
                }
                RendererEvent::Resized { width, height } => {
                    debug!("Renderer reports resize to {width}x{height}");
                }
                RendererEvent::Selected(range_locator) => {
                    let text = self
                        .model
                        .range_text(&range_locator)
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty());
                    if let (Some(text), Some(handler)) = (text, self.on_selected.as_mut()) {
                        handler(text);
                    }
                }
            }
        }
    }

    // ---- navigation -------------------------------------------------

    /// Advance one page. Failures are non-fatal: the position simply does
    /// not change.
    pub fn next(&mut self) {
        if let Err(e) = self.renderer.next() {
            debug!("next() failed: {e}");
        }
        self.pump_events();
    }

    pub fn prev(&mut self) {
        if let Err(e) = self.renderer.prev() {
            debug!("prev() failed: {e}");
        }
        self.pump_events();
    }

    /// Go to a 1-based page number, clamped to `[1, total]`, resolving it
    /// to a locator per the active strategy.
    pub fn go_to_page(&mut self, page: usize) -> Result<(), EngineError> {
        let total = self.total_pages.max(1);
        let target = page.clamp(1, total);

        enum DisplayTarget {
            At(Locator),
            Spine(usize),
        }

        let display_target = match &self.strategy {
            NumberingStrategy::Probed(index) => index
                .locator_for_page(target)
                .cloned()
                .map(DisplayTarget::At)
                .ok_or(EngineError::UnresolvableLocation)?,
            NumberingStrategy::Approximate { total } => {
                let pct = (target - 1) as f64 / (*total).max(1) as f64;
                self.model
                    .locator_from_percentage(pct)
                    .map(DisplayTarget::At)
                    .ok_or(EngineError::UnresolvableLocation)?
            }
            NumberingStrategy::FixedSpine => self
                .linear
                .get(target - 1)
                .copied()
                .map(DisplayTarget::Spine)
                .ok_or(EngineError::UnresolvableLocation)?,
        };

        let outcome = match display_target {
            DisplayTarget::At(locator) => self.renderer.display(&locator),
            DisplayTarget::Spine(abs) => self.renderer.display_spine(abs),
        };

        match outcome {
            Ok(()) => {
                self.pump_events();
                Ok(())
            }
            Err(e) => {
                // Tracked page state stays untouched; the message is
                // surfaced for the shell to show.
                self.last_error = Some(e.to_string());
                Err(EngineError::RenderRejected(e.to_string()))
            }
        }
    }

    /// Seek to a document fraction, clamped to `[0, 1]`.
    pub fn seek_percent(&mut self, pct: f64) -> Result<(), EngineError> {
        let pct = pct.clamp(0.0, 1.0);
        let total = self.total_pages.max(1);
        let target = ((pct * total as f64).round() as usize).max(1);
        self.go_to_page(target)
    }

    /// Display a stored locator (bookmark jump) and re-resolve the page.
    pub fn go_to_locator(&mut self, locator: &Locator) -> Result<(), EngineError> {
        match self.renderer.display(locator) {
            Ok(()) => {
                self.pump_events();
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(EngineError::RenderRejected(e.to_string()))
            }
        }
    }

    // ---- resize / rebuild -------------------------------------------

    /// Viewport resize. The renderer reflows immediately; the index
    /// rebuild waits for quiescence. A newer resize replaces the pending
    /// one, so at most one rebuild runs per quiet window.
    pub fn resize(&mut self, width: u32, height: u32, now: Instant) {
        self.renderer.resize(width, height);
        self.pump_events();
        self.pending_resize = Some(PendingResize {
            since: now,
            width: width.max(1),
            height: height.max(1),
        });
    }

    /// Drive the debounce clock. Returns true when a rebuild ran.
    pub fn tick(&mut self, now: Instant) -> bool {
        let expired = match &self.pending_resize {
            Some(pending) => now.duration_since(pending.since) >= RESIZE_QUIESCENCE,
            None => false,
        };
        if !expired {
            return false;
        }
        if let Some(pending) = self.pending_resize.take() {
            self.rebuild(pending.width, pending.height);
        }
        true
    }

    /// Full rebuild after a resize: reapply theming, then rebuild the
    /// approximate index and re-probe (reflowable), or re-resolve the
    /// current location against the unchanged fixed strategy.
    fn rebuild(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.state = EngineState::Rebuilding;
        self.renderer.apply_theme();

        if self.fixed {
            self.state = EngineState::FixedReady;
        } else {
            self.build_approximate_index();
            self.build_strategy();
        }

        if let Some(range) = self.renderer.current_location() {
            self.update_from_range(&range);
        }
        debug!(
            "Rebuilt index at {width}x{height}: {:?}, {} pages, generation {}",
            self.strategy.kind(),
            self.total_pages,
            self.index_generation
        );
    }

    // ---- persistence -------------------------------------------------

    /// Best-effort position save for teardown paths.
    pub fn persist_position(&mut self) {
        if let (Some(locator), Some(sink)) = (self.last_locator.clone(), self.positions.as_mut()) {
            sink.record_position(&self.book_id, &locator);
        }
    }

    // ---- bookmarks ---------------------------------------------------

    /// Page label for a locator under the active strategy, for bookmark
    /// records.
    pub fn page_label_for(&self, locator: &Locator) -> String {
        let page = match &self.strategy {
            NumberingStrategy::Probed(index) => {
                index.page_of(locator, |a, b| self.cmp_locators(a, b))
            }
            NumberingStrategy::Approximate { .. } => self
                .model
                .location_from(locator)
                .map(|idx| idx + 1)
                .unwrap_or(self.current_page),
            NumberingStrategy::FixedSpine => self.current_page,
        };
        page.to_string()
    }

    // ---- accessors ---------------------------------------------------

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Reading progress in percent, capped at 100.
    pub fn progress(&self) -> f64 {
        (self.current_page as f64 / self.total_pages.max(1) as f64 * 100.0).min(100.0)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn current_locator(&self) -> Option<&Locator> {
        self.last_locator.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    pub fn index_generation(&self) -> u64 {
        self.index_generation
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: DocumentModel> Drop for ReaderEngine<M> {
    fn drop(&mut self) {
        // Closing a document always releases its rendering surface.
        self.renderer.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{make_locator, StubModel};

    fn open(model: StubModel, width: u32, height: u32) -> ReaderEngine<StubModel> {
        ReaderEngine::open(
            model,
            OpenOptions {
                book_id: "bk_test".to_string(),
                width,
                height,
                resume: None,
            },
            None,
        )
        .unwrap()
    }

    #[test]
    fn reflowable_open_activates_probed_strategy() {
        let model = StubModel::reflowable(&[4000, 7000, 1000]);
        let engine = open(model, 800, 500);
        assert_eq!(engine.strategy(), StrategyKind::Probed);
        assert_eq!(engine.state(), EngineState::ProbeReady);
        assert_eq!(engine.total_pages(), 6);
        assert_eq!(engine.current_page(), 1);
    }

    #[test]
    fn probe_failure_falls_back_to_approximate() {
        let model = StubModel::reflowable(&[1800, 1800]).failing_probe_viewports(1);
        let engine = open(model, 120, 192);
        assert_eq!(engine.strategy(), StrategyKind::Approximate);
        assert_eq!(engine.state(), EngineState::LocationsReady);
        // 3600 chars / 180 per chunk.
        assert_eq!(engine.total_pages(), 20);
    }

    #[test]
    fn fixed_layout_skips_probing_entirely() {
        let model = StubModel::fixed(3);
        let engine = open(model.clone(), 800, 500);
        assert_eq!(engine.strategy(), StrategyKind::Fixed);
        assert_eq!(engine.state(), EngineState::FixedReady);
        assert_eq!(engine.total_pages(), 3);
        // Only the on-screen renderer was ever created.
        assert_eq!(model.created_renderers(), 1);
    }

    #[test]
    fn go_to_page_round_trips_under_probed() {
        let model = StubModel::reflowable(&[4000, 7000, 1000]);
        let mut engine = open(model, 800, 500);
        for target in 1..=engine.total_pages() {
            engine.go_to_page(target).unwrap();
            assert_eq!(engine.current_page(), target);
        }
    }

    #[test]
    fn go_to_page_round_trips_under_approximate() {
        // Viewport capacity 180 == chunk size, chapters chunk-aligned, so
        // page and location granularity coincide.
        let model = StubModel::reflowable(&[1800, 1800]).failing_probe_viewports(1);
        let mut engine = open(model, 120, 192);
        assert_eq!(engine.strategy(), StrategyKind::Approximate);
        for target in 1..=engine.total_pages() {
            engine.go_to_page(target).unwrap();
            assert_eq!(engine.current_page(), target);
        }
    }

    #[test]
    fn go_to_page_round_trips_under_fixed() {
        let model = StubModel::fixed(5);
        let mut engine = open(model, 800, 500);
        for target in 1..=5 {
            engine.go_to_page(target).unwrap();
            assert_eq!(engine.current_page(), target);
        }
    }

    #[test]
    fn go_to_page_clamps_out_of_range_targets() {
        let model = StubModel::reflowable(&[4000]);
        let mut engine = open(model, 800, 500);
        engine.go_to_page(0).unwrap();
        assert_eq!(engine.current_page(), 1);
        engine.go_to_page(9999).unwrap();
        assert_eq!(engine.current_page(), engine.total_pages());
    }

    #[test]
    fn seek_percent_is_monotonic() {
        let model = StubModel::reflowable(&[4000, 7000, 6000]);
        let mut engine = open(model, 800, 500);
        let mut last = 0;
        for step in 0..=10 {
            engine.seek_percent(step as f64 / 10.0).unwrap();
            assert!(engine.current_page() >= last);
            last = engine.current_page();
        }
        assert_eq!(last, engine.total_pages());
    }

    #[test]
    fn next_clamps_at_document_end() {
        let model = StubModel::fixed(3);
        let mut engine = open(model, 800, 500);
        assert_eq!(engine.current_page(), 1);
        engine.next();
        engine.next();
        engine.next();
        assert_eq!(engine.current_page(), 3);
        assert_eq!(engine.total_pages(), 3);
    }

    #[test]
    fn prev_clamps_at_document_start() {
        let model = StubModel::reflowable(&[4000]);
        let mut engine = open(model, 800, 500);
        engine.prev();
        assert_eq!(engine.current_page(), 1);
    }

    #[test]
    fn resize_rebuild_waits_for_quiescence() {
        let model = StubModel::reflowable(&[4000, 7000, 1000]);
        let mut engine = open(model, 800, 500);
        let gen_before = engine.index_generation();
        let t0 = Instant::now();

        engine.resize(400, 500, t0);
        assert!(!engine.tick(t0 + Duration::from_millis(100)));
        assert_eq!(engine.index_generation(), gen_before);

        // A newer resize restarts the quiet window.
        engine.resize(500, 500, t0 + Duration::from_millis(200));
        assert!(!engine.tick(t0 + Duration::from_millis(300)));
        assert!(engine.tick(t0 + Duration::from_millis(460)));
        assert_eq!(engine.index_generation(), gen_before + 1);
        assert_eq!(engine.state(), EngineState::ProbeReady);
        assert!(engine.total_pages() >= 1);
    }

    #[test]
    fn resize_rebuild_tracks_content_position() {
        let model = StubModel::reflowable(&[40000]);
        let mut engine = open(model, 800, 500);
        let total_before = engine.total_pages();
        engine.go_to_page(5).unwrap();
        assert_eq!(engine.current_page(), 5);
        let locator_before = engine.current_locator().unwrap().clone();

        let t0 = Instant::now();
        engine.resize(400, 500, t0);
        assert!(engine.tick(t0 + RESIZE_QUIESCENCE));

        // Narrower viewport, more pages; the current page covers the same
        // content position even though its number changed.
        assert!(engine.total_pages() > total_before);
        let locator_after = engine.current_locator().unwrap();
        let page_at_old_position = match &engine.strategy {
            NumberingStrategy::Probed(index) => {
                index.page_of(&locator_before, |a, b| engine.cmp_locators(a, b))
            }
            _ => panic!("expected probed strategy after rebuild"),
        };
        assert_eq!(engine.current_page(), page_at_old_position);
        assert!(engine
            .cmp_locators(locator_after, &locator_before)
            .is_le());
    }

    #[test]
    fn fixed_resize_keeps_strategy_and_position() {
        let model = StubModel::fixed(3);
        let mut engine = open(model, 800, 500);
        engine.go_to_page(2).unwrap();
        let t0 = Instant::now();
        engine.resize(400, 400, t0);
        assert!(engine.tick(t0 + RESIZE_QUIESCENCE));
        assert_eq!(engine.strategy(), StrategyKind::Fixed);
        assert_eq!(engine.state(), EngineState::FixedReady);
        assert_eq!(engine.current_page(), 2);
        assert_eq!(engine.total_pages(), 3);
    }

    #[test]
    fn render_rejection_leaves_page_state_untouched() {
        let model = StubModel::reflowable(&[4000, 4000]);
        let mut engine = open(model.clone(), 800, 500);
        engine.go_to_page(3).unwrap();
        let page_before = engine.current_page();

        model.set_fail_display(true);
        let err = engine.go_to_page(1).unwrap_err();
        assert!(matches!(err, EngineError::RenderRejected(_)));
        assert_eq!(engine.current_page(), page_before);
        assert!(engine.last_error().is_some());
    }

    #[test]
    fn relocations_record_position_through_sink() {
        struct Recorder(Rc<RefCell<Vec<(String, Locator)>>>);
        impl PositionSink for Recorder {
            fn record_position(&mut self, book_id: &str, locator: &Locator) {
                self.0
                    .borrow_mut()
                    .push((book_id.to_string(), locator.clone()));
            }
        }

        let log = Rc::new(RefCell::new(Vec::new()));
        let model = StubModel::reflowable(&[4000]);
        let mut engine = ReaderEngine::open(
            model,
            OpenOptions {
                book_id: "bk_sink".to_string(),
                width: 800,
                height: 500,
                resume: None,
            },
            Some(Box::new(Recorder(Rc::clone(&log)))),
        )
        .unwrap();

        engine.next();
        let entries = log.borrow();
        assert!(entries.len() >= 2);
        assert!(entries.iter().all(|(id, _)| id == "bk_sink"));
        assert_eq!(entries.last().unwrap().1, make_locator(0, 3100));
    }

    #[test]
    fn open_resumes_saved_position() {
        let model = StubModel::reflowable(&[40000]);
        let engine = ReaderEngine::open(
            model,
            OpenOptions {
                book_id: "bk_resume".to_string(),
                width: 800,
                height: 500,
                resume: Some(make_locator(0, 6200)),
            },
            None,
        )
        .unwrap();
        assert_eq!(engine.current_page(), 3);
    }

    #[test]
    fn locator_order_falls_back_to_lexical_without_compare() {
        let model = StubModel::reflowable(&[4000, 7000, 1000])
            .without_compare()
            .with_title("Plain Order");
        let mut engine = open(model, 800, 500);
        assert_eq!(engine.title(), "Plain Order");
        assert_eq!(engine.strategy(), StrategyKind::Probed);
        assert_eq!(engine.total_pages(), 6);
        for target in 1..=engine.total_pages() {
            engine.go_to_page(target).unwrap();
            assert_eq!(engine.current_page(), target);
        }
    }

    #[test]
    fn approximate_page_comes_from_percentage_when_lookup_fails() {
        let model = StubModel::reflowable(&[1800, 1800])
            .failing_probe_viewports(1)
            .with_failing_index_lookup();
        let mut engine = open(model, 120, 192);
        assert_eq!(engine.strategy(), StrategyKind::Approximate);
        assert_eq!(engine.total_pages(), 20);

        // Halfway through the book: round(0.5 * 20) pages.
        engine.go_to_locator(&make_locator(1, 0)).unwrap();
        assert_eq!(engine.current_page(), 10);

        // The document start never rounds below page 1.
        engine.go_to_locator(&make_locator(0, 0)).unwrap();
        assert_eq!(engine.current_page(), 1);
    }

    #[test]
    fn selection_events_surface_trimmed_text() {
        let model = StubModel::reflowable(&[4000, 200])
            .with_markup(1, "<p>   A handful of selected words.  </p>");
        let mut engine = open(model.clone(), 800, 500);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        engine.set_selection_handler(move |text| sink.borrow_mut().push(text));

        model.select(1, 0);
        engine.next();
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0], "A handful of selected words.");

        // Selections resolving to no text are dropped.
        model.select(1, 9999);
        engine.next();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn open_without_a_rendering_surface_is_a_render_error() {
        let model = StubModel::reflowable(&[1000]).failing_probe_viewports(0);
        let err = ReaderEngine::open(
            model,
            OpenOptions {
                book_id: "bk_test".to_string(),
                width: 800,
                height: 500,
                resume: None,
            },
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::RenderRejected(_)));
    }

    #[test]
    fn library_acts_as_position_sink() {
        let library = Rc::new(RefCell::new(Library::ephemeral()));
        library.borrow_mut().upsert(crate::library::LibraryEntry {
            id: "bk_lib".to_string(),
            name: "Book".to_string(),
            size: 0,
            mime: "application/epub+zip".to_string(),
            added_at: chrono::Utc::now(),
            last_visited: None,
            last_locator: None,
        });

        let model = StubModel::reflowable(&[4000]);
        let mut engine = ReaderEngine::open(
            model,
            OpenOptions {
                book_id: "bk_lib".to_string(),
                width: 800,
                height: 500,
                resume: None,
            },
            Some(Box::new(Rc::clone(&library))),
        )
        .unwrap();
        engine.next();

        let saved = library.borrow().saved_position("bk_lib").unwrap();
        assert_eq!(saved, make_locator(0, 3100));
    }
}
