pub mod color;
pub mod contents;
pub mod indexer;
#[cfg(test)]
mod integration_tests;
pub mod meta;
pub mod queue;
pub mod walk;

pub use contents::ContentsIndexer;
pub use indexer::{IndexStats, Indexer};
pub use meta::{ExifPool, MetaIndexer};
pub use queue::Queue;
