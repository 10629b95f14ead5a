//! Bundle node
//!
//! The root manifest. It declares the set of books and it owns the three
//! factories, which makes it the only node with creation authority: every
//! other node reaches its siblings through the bundle. Back-references
//! from nodes to the bundle are `Weak`, and cross-node references are
//! stored as path keys resolved through the factories, so the graph has no
//! strong reference cycles.

use std::sync::{Arc, Mutex, Weak};

use crate::book::Book;
use crate::factory::Factory;
use crate::fileish::{
    AnyNode, Fileish, ModelError, NodeBase, NodeKind, ValidationCheck, ValidationKind,
    ensure_loaded,
};
use crate::location::{NOWHERE, Range, WithRange, find_duplicates};
use crate::page::Page;
use crate::paths::{BUNDLE_MANIFEST, JoinKind, PathHelper};
use crate::resource::Resource;
use crate::xml::{NS_CONTAINER, parse_document};

#[derive(Debug, Clone)]
pub struct BundleData {
    /// Declared books as canonical absolute paths, with the range of the
    /// declaring element
    pub books: Vec<WithRange<String>>,
}

pub struct Bundle {
    base: NodeBase,
    me: Weak<Bundle>,
    workspace_root: String,
    helper: Arc<dyn PathHelper>,
    resources: Factory<Resource>,
    pages: Factory<Page>,
    books: Factory<Book>,
    data: Mutex<Option<Arc<BundleData>>>,
}

impl Bundle {
    pub fn new(helper: Arc<dyn PathHelper>, workspace_root: &str) -> Arc<Self> {
        let workspace_root = workspace_root.trim_end_matches('/').to_string();
        let abs_path = helper.join(&workspace_root, BUNDLE_MANIFEST);
        Arc::new_cyclic(|me: &Weak<Bundle>| {
            let canonicalize = |helper: &Arc<dyn PathHelper>| {
                let helper = Arc::clone(helper);
                Box::new(move |p: &str| helper.canonicalize(p))
            };
            let resources = Factory::new(
                Box::new({
                    let me = me.clone();
                    move |path| Resource::new(me.clone(), path)
                }),
                canonicalize(&helper),
            );
            let pages = Factory::new(
                Box::new({
                    let me = me.clone();
                    move |path| Page::new(me.clone(), path)
                }),
                canonicalize(&helper),
            );
            let books = Factory::new(
                Box::new({
                    let me = me.clone();
                    move |path| Book::new(me.clone(), path)
                }),
                canonicalize(&helper),
            );
            Self {
                base: NodeBase::new(me.clone(), abs_path),
                me: me.clone(),
                workspace_root,
                helper,
                resources,
                pages,
                books,
                data: Mutex::new(None),
            }
        })
    }

    pub fn workspace_root(&self) -> &str {
        &self.workspace_root
    }

    pub fn path_helper(&self) -> Arc<dyn PathHelper> {
        Arc::clone(&self.helper)
    }

    pub fn resources(&self) -> &Factory<Resource> {
        &self.resources
    }

    pub fn pages(&self) -> &Factory<Page> {
        &self.pages
    }

    pub fn book_factory(&self) -> &Factory<Book> {
        &self.books
    }

    fn data(&self) -> Arc<BundleData> {
        ensure_loaded(self.abs_path(), &self.data)
    }

    /// The declared books, resolved to nodes
    pub fn books(&self) -> Vec<Arc<Book>> {
        self.data()
            .books
            .iter()
            .map(|b| self.books.get_or_add(&b.v))
            .collect()
    }

    fn books_with_ranges(&self) -> Vec<WithRange<Arc<Book>>> {
        self.data()
            .books
            .iter()
            .map(|b| WithRange::new(self.books.get_or_add(&b.v), b.range))
            .collect()
    }

    /// Is this uuid used by more than one existing page?
    pub fn is_duplicate_uuid(&self, uuid: &str) -> bool {
        let uuids = self
            .pages
            .all()
            .into_iter()
            .filter(|p| p.exists())
            .map(|p| p.uuid().v);
        find_duplicates(uuids).contains(uuid)
    }

    /// Every node in the graph, the bundle included
    pub fn all_nodes(&self) -> Vec<AnyNode> {
        let mut nodes: Vec<AnyNode> = vec![self.any_node()];
        nodes.extend(self.books.all().into_iter().map(AnyNode::from));
        nodes.extend(self.pages.all().into_iter().map(AnyNode::from));
        nodes.extend(self.resources.all().into_iter().map(AnyNode::from));
        nodes
    }

    fn parse_fault(&self, message: impl Into<String>, range: Range) -> ModelError {
        ModelError {
            path: self.abs_path().to_string(),
            kind: ValidationKind::ParseFault,
            message: message.into(),
            range,
        }
    }
}

impl Fileish for Bundle {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn node_kind(&self) -> NodeKind {
        NodeKind::Bundle
    }

    fn any_node(&self) -> AnyNode {
        AnyNode::Bundle(self.me.upgrade().expect("node still referenced"))
    }

    fn parse(&self, content: &str) -> Result<(), ModelError> {
        let root = parse_document(content).map_err(|e| {
            self.parse_fault(e.message, e.position.map_or(NOWHERE, |p| Range::new(p, p)))
        })?;
        let mut books = Vec::new();
        for book in root.descendants().filter(|e| e.is(NS_CONTAINER, "book")) {
            let href = book
                .attr_non_empty("href")
                .ok_or_else(|| self.parse_fault("book element is missing its href", book.range))?;
            let path =
                crate::paths::repo_join(self.helper.as_ref(), JoinKind::AbsToRel, self.abs_path(), href);
            self.books.get_or_add(&path);
            books.push(WithRange::new(path, book.range));
        }
        *self.data.lock().unwrap() = Some(Arc::new(BundleData { books }));
        Ok(())
    }

    fn validation_checks(&self) -> Vec<ValidationCheck> {
        let books = self.books_with_ranges();
        vec![
            ValidationCheck {
                kind: ValidationKind::MissingBook,
                nodes_to_load: books
                    .iter()
                    .map(|b| AnyNode::from(Arc::clone(&b.v)))
                    .collect(),
                evaluate: {
                    let books = books.clone();
                    Box::new(move || {
                        books
                            .iter()
                            .filter(|b| !b.v.exists())
                            .map(|b| b.range)
                            .collect()
                    })
                },
            },
            ValidationCheck {
                kind: ValidationKind::NoBooks,
                nodes_to_load: Default::default(),
                evaluate: {
                    let empty = books.is_empty();
                    Box::new(move || if empty { vec![NOWHERE] } else { Vec::new() })
                },
            },
        ]
    }
}
