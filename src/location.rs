//! Source positions and ranges
//!
//! Every structural fact the model extracts from a document carries the
//! range it was found at, so diagnostics can point back into the file.
//! Lines and characters are zero-based.

use std::collections::HashSet;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// A zero-based line/character position inside a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A half-open source span between two positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// The synthetic anchor used when no real source location is known
/// (parse faults, findings about the file as a whole).
pub const NOWHERE: Range = Range::new(Position::new(0, 0), Position::new(0, 0));

/// A value paired with the range it was parsed from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WithRange<T> {
    pub v: T,
    pub range: Range,
}

impl<T> WithRange<T> {
    pub fn new(v: T, range: Range) -> Self {
        Self { v, range }
    }
}

/// Does `current` fall strictly inside `range`?
pub fn in_range(range: Range, current: Position) -> bool {
    current > range.start && current < range.end
}

/// Values that occur more than once in `items`, each reported once
pub fn find_duplicates<T>(items: impl IntoIterator<Item = T>) -> HashSet<T>
where
    T: Eq + Hash + Clone,
{
    let mut seen = HashSet::new();
    let mut duplicates = HashSet::new();
    for item in items {
        if seen.contains(&item) {
            duplicates.insert(item);
        } else {
            seen.insert(item);
        }
    }
    duplicates
}
