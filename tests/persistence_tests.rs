//! Catalog, bookmark, and blob stores working together on disk.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::Utc;
use tempfile::TempDir;

use folio::bookmarks::{Bookmark, BookmarkStore};
use folio::content_store::{book_id, ContentStore};
use folio::engine::{OpenOptions, ReaderEngine};
use folio::library::{Library, LibraryEntry};
use folio::test_utils::{make_locator, StubModel};

fn entry(id: &str) -> LibraryEntry {
    LibraryEntry {
        id: id.to_string(),
        name: "A Book".to_string(),
        size: 4096,
        mime: "application/epub+zip".to_string(),
        added_at: Utc::now(),
        last_visited: None,
        last_locator: None,
    }
}

fn bookmark(title: &str) -> Bookmark {
    Bookmark {
        locator: make_locator(1, 0),
        page_label: "2".to_string(),
        text: "An opening line worth keeping".to_string(),
        book_title: title.to_string(),
        created_at: Utc::now(),
    }
}

#[test]
fn reading_position_round_trips_through_the_catalog_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("library.json");

    let library = Rc::new(RefCell::new(Library::with_file(&path)));
    library.borrow_mut().upsert(entry("bk_stub"));

    let model = StubModel::reflowable(&[3100; 6]);
    let mut engine = ReaderEngine::open(
        model.clone(),
        OpenOptions {
            book_id: "bk_stub".to_string(),
            width: 800,
            height: 500,
            resume: None,
        },
        Some(Box::new(Rc::clone(&library))),
    )
    .unwrap();
    engine.go_to_page(3).unwrap();
    drop(engine);
    drop(library);

    let reloaded = Library::load_from_file(&path).unwrap();
    let resume = reloaded.saved_position("bk_stub").unwrap();
    assert!(reloaded.get("bk_stub").unwrap().last_visited.is_some());

    let engine = ReaderEngine::open(
        model,
        OpenOptions {
            book_id: "bk_stub".to_string(),
            width: 800,
            height: 500,
            resume: Some(resume),
        },
        None,
    )
    .unwrap();
    assert_eq!(engine.current_page(), 3);
}

#[test]
fn removing_a_book_cascades_to_bookmarks_and_data() {
    let tmp = TempDir::new().unwrap();
    let store = ContentStore::new(&tmp.path().join("books"));
    let id = book_id(b"some epub bytes");
    store.put(&id, b"some epub bytes").unwrap();

    let mut library = Library::with_file(&tmp.path().join("library.json"));
    library.upsert(entry(&id));
    let mut bookmarks = BookmarkStore::with_file(&tmp.path().join("bookmarks.json"));
    bookmarks.add(&id, bookmark("A Book"));

    assert!(library.remove(&id));
    bookmarks.delete_bucket(&id);
    store.delete(&id).unwrap();

    assert!(library.get(&id).is_none());
    assert!(bookmarks.bookmarks(&id).is_empty());
    assert!(!store.contains(&id));
    assert!(store.get(&id).is_err());
}

#[test]
fn bookmark_store_round_trips_and_exports() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bookmarks.json");

    let mut store = BookmarkStore::with_file(&path);
    store.add("bk_a", bookmark("Persisted Title"));

    let reloaded = BookmarkStore::load_from_file(&path).unwrap();
    assert_eq!(reloaded.bookmarks("bk_a").len(), 1);

    let export = reloaded.export_text("bk_a");
    assert!(export.contains("Bookmark 1:"));
    assert!(export.contains("Book: Persisted Title"));
    assert!(export.contains("Page: 2"));
    assert!(export.contains("An opening line worth keeping"));
}

#[test]
fn catalog_entries_survive_reload_in_order() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("library.json");

    let mut library = Library::with_file(&path);
    library.upsert(entry("bk_first"));
    library.upsert(entry("bk_second"));

    let reloaded = Library::load_from_file(&path).unwrap();
    let ids: Vec<&str> = reloaded.entries().iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["bk_second", "bk_first"]);
}
