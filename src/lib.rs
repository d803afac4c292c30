//! Directory-synchronized thumbnail cache for the scanview annotation tool:
//! watches a directory of scan images, keeps an ordered index of its files,
//! lazily decodes each one into a fixed-width preview and persists the
//! filename → preview mapping through a debounced write-back queue.

pub mod annotations;
pub mod cli;
pub mod debug;
pub mod gate;
pub mod index;
pub mod paths;
pub mod queue;
pub mod service;
pub mod store;
pub mod tdr;
pub mod thumbs;
pub mod watcher;

pub use service::{CacheConfig, CacheError, CacheEvent, CacheService, FilePayload};
pub use store::{Mutation, ThumbMap};
