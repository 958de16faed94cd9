//! Numbered work-item files.
//!
//! Files live in the issues directory and are named with a leading index,
//! e.g. `007-add-caching.md`. The store orders them by index and tolerates
//! gaps; `content` turns one file into the title/body/labels of a remote item.

pub mod content;
pub mod index;
pub mod store;

pub use content::{ItemContent, indexed_title, parse_labels};
pub use index::parse_leading_index;
pub use store::{SequenceStore, WorkItemFile};
