//! Path algebra and repository layout
//!
//! The same model runs over plain filesystem paths and over URI-shaped
//! paths, so all path math happens on slash-separated strings through an
//! injected [`PathHelper`] rather than `std::path`. This module also owns
//! the recognized repository shapes: where the bundle manifest lives and
//! which paths denote pages, books, and resources.

use std::sync::LazyLock;

use regex::Regex;

/// Workspace-relative location of the bundle manifest
pub const BUNDLE_MANIFEST: &str = "META-INF/books.xml";

/// Injected path operations shared by filesystem paths and URIs.
///
/// `std::path::Path::join` mangles URIs (`file:///a` becomes `file:/a`), so
/// the model only ever goes through this trait.
pub trait PathHelper: Send + Sync {
    fn join(&self, base: &str, child: &str) -> String;
    fn dirname(&self, path: &str) -> String;
    /// Collapse `.` and `..` segments and duplicate separators
    fn canonicalize(&self, path: &str) -> String;

    /// `target` expressed relative to the directory `base_dir`
    fn relative(&self, base_dir: &str, target: &str) -> String {
        let base_canon = self.canonicalize(base_dir);
        let target_canon = self.canonicalize(target);
        let base: Vec<&str> = base_canon.split('/').collect();
        let targ: Vec<&str> = target_canon.split('/').collect();
        let common = base
            .iter()
            .zip(targ.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let mut parts: Vec<&str> = Vec::new();
        for _ in common..base.len() {
            parts.push("..");
        }
        parts.extend(&targ[common..]);
        parts.join("/")
    }
}

/// Slash-separated path math, suitable for both POSIX paths and URIs
#[derive(Debug, Clone, Copy, Default)]
pub struct SlashPathHelper;

impl PathHelper for SlashPathHelper {
    fn join(&self, base: &str, child: &str) -> String {
        self.canonicalize(&format!("{}/{}", base.trim_end_matches('/'), child))
    }

    fn dirname(&self, path: &str) -> String {
        match path.rfind('/') {
            Some(0) => "/".to_string(),
            Some(idx) => path[..idx].to_string(),
            None => String::new(),
        }
    }

    fn canonicalize(&self, path: &str) -> String {
        // Peel off the non-hierarchical prefix (URI scheme + authority, or a
        // root slash) so segment math never eats it.
        let (prefix, rest) = match path.find("://") {
            Some(idx) if path[idx + 3..].starts_with('/') => path.split_at(idx + 4),
            Some(idx) => path.split_at(idx + 3),
            None => match path.strip_prefix('/') {
                Some(stripped) => ("/", stripped),
                None => ("", path),
            },
        };
        let mut out: Vec<&str> = Vec::new();
        for segment in rest.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if matches!(out.last(), Some(&last) if last != "..") {
                        out.pop();
                    } else if prefix.is_empty() {
                        out.push("..");
                    }
                    // ".." above an absolute root is dropped
                }
                s => out.push(s),
            }
        }
        format!("{prefix}{}", out.join("/"))
    }
}

/// Strip a `file://` scheme so a model path can reach the real filesystem
pub fn fs_path(path: &str) -> &str {
    path.strip_prefix("file://").unwrap_or(path)
}

/// The node kind a raw path maps to, when it maps to one at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathShape {
    Resource,
    Page,
    Book,
}

static RESOURCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/media/[^/]+\.[^./]+$").unwrap());
static PAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/modules/[^/]+/index\.cnxml$").unwrap());
static BOOK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/collections/[^/]+\.collection\.xml$").unwrap());

/// Classify a path by the repository shapes the model understands.
pub fn recognize(path: &str) -> Option<PathShape> {
    if RESOURCE_RE.is_match(path) {
        Some(PathShape::Resource)
    } else if PAGE_RE.is_match(path) {
        Some(PathShape::Page)
    } else if BOOK_RE.is_match(path) {
        Some(PathShape::Book)
    } else {
        None
    }
}

/// The module id of a page path (`.../modules/m123/index.cnxml` -> `m123`)
pub fn module_id(helper: &dyn PathHelper, page_path: &str) -> String {
    let dir = helper.dirname(page_path);
    dir.rsplit('/').next().unwrap_or(&dir).to_string()
}

/// How a reference inside a document resolves to a sibling file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Plain relative reference from the referencing file's directory
    AbsToRel,
    /// `<col:module document="m123"/>` in a book: up out of `collections/`,
    /// then into `modules/<id>/index.cnxml`
    CollectionToModuleId,
    /// `<link document="m123"/>` in a page: up out of the module directory,
    /// then into `<id>/index.cnxml`
    ModuleToModuleId,
}

pub fn repo_join(helper: &dyn PathHelper, kind: JoinKind, parent: &str, child: &str) -> String {
    match kind {
        JoinKind::AbsToRel => helper.join(&helper.dirname(parent), child),
        JoinKind::CollectionToModuleId => helper.join(
            &helper.dirname(&helper.dirname(parent)),
            &format!("modules/{child}/index.cnxml"),
        ),
        JoinKind::ModuleToModuleId => helper.join(
            &helper.dirname(&helper.dirname(parent)),
            &format!("{child}/index.cnxml"),
        ),
    }
}
