//! Table-of-contents projection
//!
//! A semantic view of the graph — book trees plus orphaned pages — that
//! downstream consumers (tree views, editors) subscribe to. The manager
//! recomputes it after every relevant load and publishes a notification
//! only when the projected value actually changed, so incidental re-parses
//! never cause redundant updates. The version counter only moves when the
//! content does.

use serde::{Deserialize, Serialize};

/// One entry in a book's projected tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TocEntry {
    Subbook {
        title: String,
        children: Vec<TocEntry>,
    },
    Page {
        title: String,
        module_id: String,
    },
}

/// Projection of one book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookToc {
    pub title: String,
    pub slug: String,
    pub entries: Vec<TocEntry>,
}

/// A page not reachable from any declared book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub title: String,
    pub module_id: String,
}

/// The published projection. `version` increases monotonically, once per
/// semantic change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocNotification {
    pub version: u64,
    pub books: Vec<BookToc>,
    pub orphans: Vec<PageSummary>,
}

/// Receiver of projection updates
pub trait TocSink: Send + Sync {
    fn notify(&self, notification: TocNotification);
}
