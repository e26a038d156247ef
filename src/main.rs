use std::cell::RefCell;
use std::fs;
use std::fs::File;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;
use simplelog::{Config, LevelFilter, WriteLogger};

use folio::bookmarks::{Bookmark, BookmarkStore};
use folio::content_store::{book_id, ContentStore};
use folio::document::DocumentModel;
use folio::engine::{OpenOptions, ReaderEngine};
use folio::epub_model::EpubModel;
use folio::excerpt::extract_label;
use folio::library::{resolve_data_paths, resolve_log_path, DataPaths, Library, LibraryEntry};

#[derive(Parser)]
#[command(name = "folio", version, about = "EPUB library with page-accurate reading positions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add an EPUB file to the library
    Import { path: PathBuf },
    /// List the library catalog
    List,
    /// Remove a book, its bookmarks and its stored data
    Remove { id: String },
    /// Open a book and report its pagination and position
    Open {
        id: String,
        #[arg(long, default_value_t = 800)]
        width: u32,
        #[arg(long, default_value_t = 500)]
        height: u32,
        /// Jump to a page before reporting
        #[arg(long)]
        page: Option<usize>,
        /// Jump to a fraction of the book (0.0 to 1.0)
        #[arg(long)]
        percent: Option<f64>,
    },
    #[command(subcommand)]
    Bookmark(BookmarkCommand),
}

#[derive(Subcommand)]
enum BookmarkCommand {
    /// Bookmark the saved reading position of a book
    Add {
        id: String,
        #[arg(long, default_value_t = 800)]
        width: u32,
        #[arg(long, default_value_t = 500)]
        height: u32,
    },
    /// List a book's bookmarks
    List { id: String },
    /// Remove a bookmark by its list number
    Remove { id: String, number: usize },
    /// Reopen a book at a bookmark and report the resolved page
    Goto {
        id: String,
        number: usize,
        #[arg(long, default_value_t = 800)]
        width: u32,
        #[arg(long, default_value_t = 500)]
        height: u32,
    },
    /// Print a book's bookmarks as plain text
    Export { id: String },
}

fn main() -> Result<()> {
    better_panic::install();

    let log_path = resolve_log_path()?;
    WriteLogger::init(
        LevelFilter::Debug,
        Config::default(),
        File::create(&log_path)
            .with_context(|| format!("Failed to create log file at {}", log_path.display()))?,
    )?;

    let cli = Cli::parse();
    let paths = resolve_data_paths()?;
    let library = Rc::new(RefCell::new(Library::load_or_ephemeral(Some(
        &paths.catalog_file,
    ))));
    let bookmarks = BookmarkStore::load_or_ephemeral(Some(&paths.bookmarks_file));
    let store = ContentStore::new(&paths.books_dir);

    match cli.command {
        Command::Import { path } => import(&library, &store, &path),
        Command::List => {
            list(&library.borrow());
            Ok(())
        }
        Command::Remove { id } => remove(&library, bookmarks, &store, &id),
        Command::Open {
            id,
            width,
            height,
            page,
            percent,
        } => open(library, &store, &id, width, height, page, percent),
        Command::Bookmark(cmd) => run_bookmark(cmd, library, bookmarks, &store, &paths),
    }
}

fn import(library: &Rc<RefCell<Library>>, store: &ContentStore, path: &PathBuf) -> Result<()> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read EPUB file {}", path.display()))?;
    let id = book_id(&bytes);

    // Parse before storing so broken files never enter the catalog.
    let model = EpubModel::open(&bytes)?;
    store.put(&id, &bytes)?;

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| model.package().title);
    library.borrow_mut().upsert(LibraryEntry {
        id: id.clone(),
        name,
        size: bytes.len() as u64,
        mime: "application/epub+zip".to_string(),
        added_at: Utc::now(),
        last_visited: None,
        last_locator: None,
    });

    info!("Imported {} as {id}", path.display());
    println!("Imported '{}' as {id}", model.package().title);
    Ok(())
}

fn list(library: &Library) {
    if library.entries().is_empty() {
        println!("Library is empty. Use 'folio import <file.epub>' to add a book.");
        return;
    }
    for entry in library.entries() {
        let visited = entry
            .last_visited
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}  {}  ({} bytes, last read {visited})",
            entry.id, entry.name, entry.size
        );
    }
}

fn remove(
    library: &Rc<RefCell<Library>>,
    mut bookmarks: BookmarkStore,
    store: &ContentStore,
    id: &str,
) -> Result<()> {
    if !library.borrow_mut().remove(id) {
        bail!("No book with id {id}");
    }
    bookmarks.delete_bucket(id);
    store.delete(id)?;
    println!("Removed {id}");
    Ok(())
}

fn open_engine(
    library: Rc<RefCell<Library>>,
    store: &ContentStore,
    id: &str,
    width: u32,
    height: u32,
    resume: Option<folio::Locator>,
) -> Result<ReaderEngine<EpubModel>> {
    let bytes = store.get(id)?;
    let model = EpubModel::open(&bytes)?;
    let engine = ReaderEngine::open(
        model,
        OpenOptions {
            book_id: id.to_string(),
            width,
            height,
            resume,
        },
        Some(Box::new(library)),
    )?;
    Ok(engine)
}

fn report(engine: &ReaderEngine<EpubModel>) {
    println!("{}", engine.title());
    println!(
        "Page {} of {} ({:.1}%), {:?} numbering",
        engine.current_page(),
        engine.total_pages(),
        engine.progress(),
        engine.strategy()
    );
    if let Some(locator) = engine.current_locator() {
        println!("Position: {locator}");
    }
}

#[allow(clippy::too_many_arguments)]
fn open(
    library: Rc<RefCell<Library>>,
    store: &ContentStore,
    id: &str,
    width: u32,
    height: u32,
    page: Option<usize>,
    percent: Option<f64>,
) -> Result<()> {
    let resume = library.borrow().saved_position(id);
    let mut engine = open_engine(Rc::clone(&library), store, id, width, height, resume)?;

    if let Some(page) = page {
        engine.go_to_page(page)?;
    }
    if let Some(pct) = percent {
        engine.seek_percent(pct)?;
    }

    engine.persist_position();
    report(&engine);
    Ok(())
}

fn run_bookmark(
    cmd: BookmarkCommand,
    library: Rc<RefCell<Library>>,
    mut bookmarks: BookmarkStore,
    store: &ContentStore,
    _paths: &DataPaths,
) -> Result<()> {
    match cmd {
        BookmarkCommand::Add { id, width, height } => {
            let resume = library.borrow().saved_position(&id);
            let engine = open_engine(Rc::clone(&library), store, &id, width, height, resume)?;
            let locator = engine
                .current_locator()
                .cloned()
                .context("Book has no current position")?;
            let bookmark = Bookmark {
                locator: locator.clone(),
                page_label: engine.page_label_for(&locator),
                text: extract_label(engine.model(), &locator),
                book_title: engine.title().to_string(),
                created_at: Utc::now(),
            };
            if bookmarks.add(&id, bookmark) {
                println!("Bookmarked page {}", engine.page_label_for(&locator));
            } else {
                println!("Already bookmarked");
            }
            Ok(())
        }
        BookmarkCommand::List { id } => {
            let entries = bookmarks.bookmarks(&id);
            if entries.is_empty() {
                println!("No bookmarks for {id}");
                return Ok(());
            }
            for (i, b) in entries.iter().enumerate() {
                println!("{}. [page {}] {}", i + 1, b.page_label, b.text);
            }
            Ok(())
        }
        BookmarkCommand::Remove { id, number } => {
            let locator = bookmarks
                .bookmarks(&id)
                .get(number.saturating_sub(1))
                .map(|b| b.locator.clone())
                .with_context(|| format!("No bookmark {number} for {id}"))?;
            bookmarks.remove(&id, &locator);
            println!("Removed bookmark {number}");
            Ok(())
        }
        BookmarkCommand::Goto {
            id,
            number,
            width,
            height,
        } => {
            let locator = bookmarks
                .bookmarks(&id)
                .get(number.saturating_sub(1))
                .map(|b| b.locator.clone())
                .with_context(|| format!("No bookmark {number} for {id}"))?;
            let mut engine = open_engine(Rc::clone(&library), store, &id, width, height, None)?;
            engine.go_to_locator(&locator)?;
            engine.persist_position();
            report(&engine);
            Ok(())
        }
        BookmarkCommand::Export { id } => {
            print!("{}", bookmarks.export_text(&id));
            Ok(())
        }
    }
}
