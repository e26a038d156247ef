//! End-to-end reading sessions against the scripted document model.

use std::time::{Duration, Instant};

use chrono::Utc;
use folio::bookmarks::{Bookmark, BookmarkStore};
use folio::engine::{OpenOptions, ReaderEngine, StrategyKind};
use folio::excerpt::extract_label;
use folio::test_utils::StubModel;

fn open(model: &StubModel, width: u32, height: u32) -> ReaderEngine<StubModel> {
    ReaderEngine::open(
        model.clone(),
        OpenOptions {
            book_id: "bk_scenario".to_string(),
            width,
            height,
            resume: None,
        },
        None,
    )
    .unwrap()
}

#[test]
fn reflowable_book_keeps_its_place_across_a_viewport_change() {
    // Ten chapters of exactly one 800x500 page each.
    let model = StubModel::reflowable(&[3100; 10]);
    let mut engine = open(&model, 800, 500);

    assert_eq!(engine.strategy(), StrategyKind::Probed);
    assert_eq!(engine.total_pages(), 10);
    assert_eq!(engine.current_page(), 1);

    engine.go_to_page(5).unwrap();
    assert_eq!(engine.current_page(), 5);
    let before = engine.current_locator().cloned().unwrap();

    // Halving the width doubles the page count once the debounce expires.
    let t0 = Instant::now();
    engine.resize(400, 500, t0);
    assert!(!engine.tick(t0 + Duration::from_millis(100)));
    assert!(engine.tick(t0 + Duration::from_millis(260)));

    assert_eq!(engine.total_pages(), 20);
    assert_eq!(engine.current_page(), 9);
    assert_eq!(engine.current_locator(), Some(&before));
}

#[test]
fn rapid_resizes_collapse_into_one_rebuild() {
    let model = StubModel::reflowable(&[3100; 4]);
    let mut engine = open(&model, 800, 500);
    let generation = engine.index_generation();

    let t0 = Instant::now();
    engine.resize(700, 500, t0);
    engine.resize(600, 500, t0 + Duration::from_millis(100));
    engine.resize(400, 500, t0 + Duration::from_millis(200));

    // The first two resizes never reach quiescence.
    assert!(!engine.tick(t0 + Duration::from_millis(300)));
    assert!(engine.tick(t0 + Duration::from_millis(460)));
    assert!(!engine.tick(t0 + Duration::from_millis(900)));

    assert_eq!(engine.index_generation(), generation + 1);
    assert_eq!(engine.total_pages(), 8);
}

#[test]
fn fixed_layout_numbers_by_spine_and_survives_resize() {
    let model = StubModel::fixed(3);
    let mut engine = open(&model, 800, 500);

    assert_eq!(engine.strategy(), StrategyKind::Fixed);
    assert_eq!(engine.total_pages(), 3);

    engine.go_to_page(99).unwrap();
    assert_eq!(engine.current_page(), 3);

    let t0 = Instant::now();
    engine.resize(1200, 900, t0);
    assert!(engine.tick(t0 + Duration::from_millis(300)));

    assert_eq!(engine.strategy(), StrategyKind::Fixed);
    assert_eq!(engine.total_pages(), 3);
    assert_eq!(engine.current_page(), 3);
}

#[test]
fn bookmark_restores_its_page_after_reopen() {
    let markup = "<html><body><h2>Chapter Four</h2>\
        <p>The long paragraph opening chapter four carries more than enough \
        text to serve as a readable bookmark label.</p></body></html>";
    let model = StubModel::reflowable(&[3100; 5]).with_markup(3, markup);
    let mut engine = open(&model, 800, 500);

    engine.go_to_page(4).unwrap();
    let locator = engine.current_locator().cloned().unwrap();

    let bookmark = Bookmark {
        locator: locator.clone(),
        page_label: engine.page_label_for(&locator),
        text: extract_label(engine.model(), &locator),
        book_title: engine.title().to_string(),
        created_at: Utc::now(),
    };
    assert_eq!(bookmark.page_label, "4");
    assert!(bookmark.text.starts_with("The long paragraph"));

    let mut store = BookmarkStore::ephemeral();
    assert!(store.add("bk_scenario", bookmark.clone()));
    assert!(!store.add("bk_scenario", bookmark));

    drop(engine);
    let mut reopened = open(&model, 800, 500);
    let saved = store.bookmarks("bk_scenario")[0].locator.clone();
    reopened.go_to_locator(&saved).unwrap();
    assert_eq!(reopened.current_page(), 4);
}

#[test]
fn probe_failure_falls_back_to_approximate_numbering() {
    // One renderer for the screen; every probe viewport is rejected.
    let model = StubModel::reflowable(&[1800, 1800]).failing_probe_viewports(1);
    let engine = open(&model, 120, 192);

    assert_eq!(engine.strategy(), StrategyKind::Approximate);
    assert_eq!(engine.total_pages(), 20);
    assert_eq!(engine.current_page(), 1);
}

#[test]
fn non_linear_items_never_count_toward_pagination() {
    let model = StubModel::reflowable(&[3100, 3100, 3100]).with_non_linear(1);
    let engine = open(&model, 800, 500);

    assert_eq!(engine.strategy(), StrategyKind::Probed);
    assert_eq!(engine.total_pages(), 2);
}
