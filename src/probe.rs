use crate::document::{DocumentModel, Renderer, ViewportSpec};
use crate::locator::Locator;
use crate::page_index::PageIndex;
use log::{debug, warn};
use std::cmp::Ordering;

/// Safety bound on single-page advances per spine item. A reflowable item
/// that does not report its last page within this many steps is abandoned
/// with whatever boundaries were collected.
const MAX_STEPS_PER_ITEM: usize = 600;

/// Owns the off-screen probing viewport for the duration of one probe run
/// and guarantees its release on every exit path.
struct ProbeViewport {
    renderer: Box<dyn Renderer>,
}

impl Drop for ProbeViewport {
    fn drop(&mut self) {
        self.renderer.release();
    }
}

/// Discover real page boundaries by rendering the document into an
/// off-screen viewport at the live viewport's dimensions and stepping
/// through it one page at a time.
///
/// Returns an empty index on any failure; probing is never fatal and the
/// caller falls back to the approximate strategy.
pub fn run_probe<M: DocumentModel + ?Sized>(
    model: &M,
    width: u32,
    height: u32,
    linear: &[usize],
) -> PageIndex {
    let viewport = ViewportSpec::paginated(width, height);
    let mut probe = match model.render_to(viewport) {
        Ok(renderer) => ProbeViewport { renderer },
        Err(e) => {
            warn!("Probe viewport creation failed: {e}");
            return PageIndex::new();
        }
    };

    let cmp = |a: &Locator, b: &Locator| {
        model.compare(a, b).unwrap_or_else(|| a.lexical_cmp(b))
    };

    let mut index = PageIndex::new();

    for &abs in linear {
        if let Err(e) = probe.renderer.display_spine(abs) {
            debug!("Probe skipping spine item {abs}: {e}");
            continue;
        }

        let Some(first) = probe.renderer.current_location() else {
            continue;
        };
        index.push_boundary(first.start.locator.clone(), cmp);

        let mut last = first.start.locator;
        let mut steps = 0usize;
        while steps < MAX_STEPS_PER_ITEM {
            steps += 1;

            let Some(before) = probe.renderer.current_location() else {
                break;
            };
            if before.start.displayed.page >= before.start.displayed.total {
                break;
            }

            if probe.renderer.next().is_err() {
                break;
            }
            probe.renderer.settle();

            let Some(after) = probe.renderer.current_location() else {
                break;
            };
            let locator = after.start.locator;
            if cmp(&locator, &last) == Ordering::Equal {
                break;
            }
            index.push_boundary(locator.clone(), cmp);
            last = locator;
        }
        if steps >= MAX_STEPS_PER_ITEM {
            warn!("Probe hit step bound on spine item {abs}; partial boundaries kept");
        }
    }

    debug_assert!(index.is_strictly_increasing(cmp));
    debug!(
        "Probe at {width}x{height} found {} page boundaries",
        index.total()
    );
    index
}
