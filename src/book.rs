//! Book node
//!
//! A container document declaring a table of contents: a tree of subbooks
//! and page references. The book depends on every page its TOC reaches.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use crate::bundle::Bundle;
use crate::fileish::{
    AnyNode, Fileish, ModelError, NodeBase, NodeKind, ValidationCheck, ValidationKind,
    ensure_loaded,
};
use crate::location::{NOWHERE, Range, WithRange, find_duplicates};
use crate::paths::JoinKind;
use crate::xml::{NS_COLLXML, NS_MDML, XmlElement, parse_document};

/// One entry of a book's table of contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookTocNode {
    Subbook {
        title: WithRange<String>,
        children: Vec<BookTocNode>,
    },
    Leaf {
        /// Absolute path of the referenced page
        page: String,
        range: Range,
    },
}

#[derive(Debug, Clone)]
pub struct BookData {
    pub title: WithRange<String>,
    pub slug: WithRange<String>,
    pub toc: Vec<BookTocNode>,
}

pub struct Book {
    base: NodeBase,
    me: Weak<Book>,
    data: Mutex<Option<Arc<BookData>>>,
}

impl Book {
    pub fn new(bundle: Weak<Bundle>, abs_path: String) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            base: NodeBase::new(bundle, abs_path),
            me: me.clone(),
            data: Mutex::new(None),
        })
    }

    fn data(&self) -> Arc<BookData> {
        ensure_loaded(self.abs_path(), &self.data)
    }

    pub fn title(&self) -> String {
        self.data().title.v.clone()
    }

    pub fn slug(&self) -> String {
        self.data().slug.v.clone()
    }

    pub fn toc(&self) -> Vec<BookTocNode> {
        self.data().toc.clone()
    }

    /// Page paths of every TOC leaf, in document order
    pub fn pages(&self) -> Vec<String> {
        self.leaves().into_iter().map(|(page, _)| page).collect()
    }

    fn leaves(&self) -> Vec<(String, Range)> {
        let mut acc = Vec::new();
        collect_leaves(&self.data().toc, &mut acc);
        acc
    }

    /// Paths of the page each subbook opens with (descending through
    /// nested subbooks)
    pub fn first_leaf_pages(&self) -> HashSet<String> {
        let mut acc = HashSet::new();
        collect_first_leaves(&self.data().toc, &mut acc);
        acc
    }

    fn parse_fault(&self, message: impl Into<String>, range: Range) -> ModelError {
        ModelError {
            path: self.abs_path().to_string(),
            kind: ValidationKind::ParseFault,
            message: message.into(),
            range,
        }
    }

    fn build_toc(&self, content: &XmlElement) -> Result<Vec<BookTocNode>, ModelError> {
        let mut out = Vec::new();
        for child in content
            .children
            .iter()
            .filter(|c| c.namespace.as_deref() == Some(NS_COLLXML))
        {
            match child.local_name.as_str() {
                "subcollection" => {
                    let title = child.child(NS_MDML, "title").ok_or_else(|| {
                        self.parse_fault("subcollection is missing its md:title", child.range)
                    })?;
                    let inner = child.child(NS_COLLXML, "content").ok_or_else(|| {
                        self.parse_fault("subcollection is missing its col:content", child.range)
                    })?;
                    out.push(BookTocNode::Subbook {
                        title: WithRange::new(title.text_trim().to_string(), title.range),
                        children: self.build_toc(inner)?,
                    });
                }
                "module" => {
                    let document = child.attr_non_empty("document").ok_or_else(|| {
                        self.parse_fault("module is missing its document attribute", child.range)
                    })?;
                    let bundle = self.base.bundle();
                    let page = crate::paths::repo_join(
                        bundle.path_helper().as_ref(),
                        JoinKind::CollectionToModuleId,
                        self.abs_path(),
                        document,
                    );
                    bundle.pages().get_or_add(&page);
                    out.push(BookTocNode::Leaf {
                        page,
                        range: child.range,
                    });
                }
                other => {
                    return Err(self.parse_fault(
                        format!("unknown element in the ToC: '{other}'"),
                        child.range,
                    ));
                }
            }
        }
        Ok(out)
    }
}

fn collect_leaves(nodes: &[BookTocNode], acc: &mut Vec<(String, Range)>) {
    for node in nodes {
        match node {
            BookTocNode::Leaf { page, range } => acc.push((page.clone(), *range)),
            BookTocNode::Subbook { children, .. } => collect_leaves(children, acc),
        }
    }
}

fn collect_subbook_titles(nodes: &[BookTocNode], acc: &mut Vec<WithRange<String>>) {
    for node in nodes {
        if let BookTocNode::Subbook { title, children } = node {
            acc.push(title.clone());
            collect_subbook_titles(children, acc);
        }
    }
}

fn collect_first_leaves(nodes: &[BookTocNode], acc: &mut HashSet<String>) {
    for node in nodes {
        if let BookTocNode::Subbook { children, .. } = node {
            if let Some(first) = first_leaf(children) {
                acc.insert(first);
            }
            collect_first_leaves(children, acc);
        }
    }
}

fn first_leaf(nodes: &[BookTocNode]) -> Option<String> {
    match nodes.first()? {
        BookTocNode::Leaf { page, .. } => Some(page.clone()),
        BookTocNode::Subbook { children, .. } => first_leaf(children),
    }
}

impl Fileish for Book {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn node_kind(&self) -> NodeKind {
        NodeKind::Book
    }

    fn any_node(&self) -> AnyNode {
        AnyNode::Book(self.me.upgrade().expect("node still referenced"))
    }

    fn parse(&self, content: &str) -> Result<(), ModelError> {
        let root = parse_document(content).map_err(|e| {
            self.parse_fault(e.message, e.position.map_or(NOWHERE, |p| Range::new(p, p)))
        })?;
        if !root.is(NS_COLLXML, "collection") {
            return Err(self.parse_fault("root element is not col:collection", root.range));
        }
        let metadata = root
            .child(NS_COLLXML, "metadata")
            .ok_or_else(|| self.parse_fault("collection is missing col:metadata", NOWHERE))?;
        let title = metadata
            .child(NS_MDML, "title")
            .ok_or_else(|| self.parse_fault("collection is missing md:title", NOWHERE))?;
        let slug = metadata
            .child(NS_MDML, "slug")
            .ok_or_else(|| self.parse_fault("collection is missing md:slug", NOWHERE))?;
        let content_root = root
            .child(NS_COLLXML, "content")
            .ok_or_else(|| self.parse_fault("collection is missing col:content", NOWHERE))?;
        let toc = self.build_toc(content_root)?;

        *self.data.lock().unwrap() = Some(Arc::new(BookData {
            title: WithRange::new(title.text_trim().to_string(), title.range),
            slug: WithRange::new(slug.text_trim().to_string(), slug.range),
            toc,
        }));
        Ok(())
    }

    fn validation_checks(&self) -> Vec<ValidationCheck> {
        let data = self.data();
        let bundle = self.base.bundle();

        let mut leaves = Vec::new();
        collect_leaves(&data.toc, &mut leaves);
        let leaf_targets: Vec<(Arc<crate::page::Page>, Range)> = leaves
            .iter()
            .map(|(page, range)| (bundle.pages().get_or_add(page), *range))
            .collect();

        let mut subbooks = Vec::new();
        collect_subbook_titles(&data.toc, &mut subbooks);

        vec![
            ValidationCheck {
                kind: ValidationKind::MissingPage,
                nodes_to_load: leaf_targets
                    .iter()
                    .map(|(p, _)| AnyNode::from(Arc::clone(p)))
                    .collect(),
                evaluate: {
                    let leaf_targets = leaf_targets.clone();
                    Box::new(move || {
                        leaf_targets
                            .iter()
                            .filter(|(page, _)| !page.exists())
                            .map(|(_, range)| *range)
                            .collect()
                    })
                },
            },
            ValidationCheck {
                kind: ValidationKind::DuplicateSubbookTitle,
                nodes_to_load: Default::default(),
                evaluate: Box::new(move || {
                    let duplicates = find_duplicates(subbooks.iter().map(|t| t.v.clone()));
                    subbooks
                        .iter()
                        .filter(|t| duplicates.contains(&t.v))
                        .map(|t| t.range)
                        .collect()
                }),
            },
            ValidationCheck {
                kind: ValidationKind::DuplicatePage,
                nodes_to_load: Default::default(),
                evaluate: Box::new(move || {
                    let duplicates =
                        find_duplicates(leaves.iter().map(|(page, _)| page.clone()));
                    leaves
                        .iter()
                        .filter(|(page, _)| duplicates.contains(page))
                        .map(|(_, range)| *range)
                        .collect()
                }),
            },
        ]
    }
}
