// Export modules for use in tests
pub mod bookmarks;
pub mod content_store;
pub mod document;
pub mod engine;
pub mod epub_model;
pub mod excerpt;
pub mod library;
pub mod locator;
pub mod page_index;
pub mod probe;

pub mod test_utils;

// Re-export the reading surface
pub use engine::{EngineError, EngineState, OpenOptions, ReaderEngine, StrategyKind};
pub use locator::Locator;
