//! Shared node lifecycle and validation protocol
//!
//! Every entity in the graph (bundle, book, page, resource) goes through
//! the same state machine: `Unloaded` until the first `load`, then either
//! `Loaded-Exists` (structural data populated), `Loaded-Absent` (file was
//! missing on disk), or `Loaded-ParseError` (content did not parse; prior
//! structural data, if any, is kept for dependents that already hold
//! references). The [`Fileish`] trait implements that machine and the
//! dependency-aware validation protocol once; node kinds supply only their
//! parser and their check list.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error};

use crate::book::Book;
use crate::bundle::Bundle;
use crate::diagnostics::{Diagnostic, Severity};
use crate::location::Range;
use crate::page::Page;
use crate::resource::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Bundle,
    Book,
    Page,
    Resource,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Bundle => "bundle",
            NodeKind::Book => "book",
            NodeKind::Page => "page",
            NodeKind::Resource => "resource",
        };
        f.write_str(name)
    }
}

/// Every structural invariant the engine knows how to violate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationKind {
    ParseFault,
    MissingResource,
    MissingLinkTarget,
    MalformedUuid,
    DuplicateUuid,
    MissingElementId,
    MissingIntroduction,
    MissingPage,
    DuplicateSubbookTitle,
    DuplicatePage,
    MissingBook,
    NoBooks,
    DuplicateResourcePath,
}

impl ValidationKind {
    pub fn message(&self) -> &'static str {
        match self {
            ValidationKind::ParseFault => "File could not be parsed",
            ValidationKind::MissingResource => "Target resource file does not exist",
            ValidationKind::MissingLinkTarget => "Link target does not exist",
            ValidationKind::MalformedUuid => "Malformed UUID",
            ValidationKind::DuplicateUuid => "Duplicate page UUID",
            ValidationKind::MissingElementId => "Missing id attribute",
            ValidationKind::MissingIntroduction => {
                "First page of a subbook is not marked as an introduction"
            }
            ValidationKind::MissingPage => "Missing page",
            ValidationKind::DuplicateSubbookTitle => "Duplicate subbook title",
            ValidationKind::DuplicatePage => "Duplicate page",
            ValidationKind::MissingBook => "Missing book",
            ValidationKind::NoBooks => "No books defined",
            ValidationKind::DuplicateResourcePath => {
                "Another file has the same name with a different case"
            }
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ValidationKind::MissingElementId | ValidationKind::MissingIntroduction => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ValidationKind::ParseFault => "parse-fault",
            ValidationKind::MissingResource => "missing-resource",
            ValidationKind::MissingLinkTarget => "missing-link-target",
            ValidationKind::MalformedUuid => "malformed-uuid",
            ValidationKind::DuplicateUuid => "duplicate-uuid",
            ValidationKind::MissingElementId => "missing-element-id",
            ValidationKind::MissingIntroduction => "missing-introduction",
            ValidationKind::MissingPage => "missing-page",
            ValidationKind::DuplicateSubbookTitle => "duplicate-subbook-title",
            ValidationKind::DuplicatePage => "duplicate-page",
            ValidationKind::MissingBook => "missing-book",
            ValidationKind::NoBooks => "no-books",
            ValidationKind::DuplicateResourcePath => "duplicate-resource-path",
        }
    }
}

/// A finding, tied to the node it was found in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelError {
    /// Absolute path of the node the finding belongs to
    pub path: String,
    pub kind: ValidationKind,
    pub message: String,
    pub range: Range,
}

impl ModelError {
    pub fn into_diagnostic(self) -> Diagnostic {
        Diagnostic {
            range: self.range,
            message: self.message,
            severity: self.kind.severity(),
            code: self.kind.code().to_string(),
        }
    }
}

/// One declarative rule: which nodes must be loaded before it can run, and
/// the evaluation over already-captured snapshots producing the ranges
/// where the rule is violated.
pub struct ValidationCheck {
    pub kind: ValidationKind,
    pub nodes_to_load: HashSet<AnyNode>,
    pub evaluate: Box<dyn FnOnce() -> Vec<Range> + Send>,
}

/// The outcome of asking a node for its errors: findings for checks whose
/// dependencies were all loaded, and the nodes that still need loading for
/// the deferred remainder. Deferred checks contribute no findings.
#[derive(Default)]
pub struct ValidationResponse {
    pub errors: Vec<ModelError>,
    pub nodes_to_load: HashSet<AnyNode>,
}

/// Lifecycle state shared by all node kinds
#[derive(Debug, Clone, Default)]
pub struct NodeStatus {
    pub is_loaded: bool,
    pub exists: bool,
    pub parse_error: Option<ModelError>,
}

/// The per-node slice of shared state: identity, back-reference to the
/// owning bundle, lifecycle status.
pub struct NodeBase {
    abs_path: String,
    /// Non-owning: the bundle owns every node through its factories
    bundle: Weak<Bundle>,
    status: Mutex<NodeStatus>,
}

impl NodeBase {
    pub fn new(bundle: Weak<Bundle>, abs_path: String) -> Self {
        Self {
            abs_path,
            bundle,
            status: Mutex::new(NodeStatus::default()),
        }
    }

    pub fn abs_path(&self) -> &str {
        &self.abs_path
    }

    pub fn bundle(&self) -> Arc<Bundle> {
        self.bundle
            .upgrade()
            .unwrap_or_else(|| panic!("node outlived its bundle [{}]", self.abs_path))
    }

    pub fn status(&self) -> NodeStatus {
        self.status.lock().unwrap().clone()
    }

    fn set_status(&self, update: impl FnOnce(&mut NodeStatus)) {
        update(&mut self.status.lock().unwrap());
    }
}

/// Fetch a loaded structural snapshot or fail the contract.
///
/// Accessing structural data before the first successful load is a
/// programming error; the panic is contained at the job-scheduler
/// boundary.
pub(crate) fn ensure_loaded<T: Clone>(abs_path: &str, field: &Mutex<Option<T>>) -> T {
    let value = field.lock().unwrap().clone();
    value.unwrap_or_else(|| panic!("object has not been loaded yet [{abs_path}]"))
}

pub trait Fileish: Send + Sync {
    fn base(&self) -> &NodeBase;
    fn node_kind(&self) -> NodeKind;
    fn any_node(&self) -> AnyNode;

    /// Replace structural data from parsed content. Implementations build a
    /// complete snapshot and commit it atomically; a failure leaves prior
    /// data untouched.
    fn parse(&self, content: &str) -> Result<(), ModelError>;

    /// Kinds without a structural parser (binary assets) load
    /// unconditionally.
    fn has_parser(&self) -> bool {
        true
    }

    fn validation_checks(&self) -> Vec<ValidationCheck>;

    fn abs_path(&self) -> &str {
        self.base().abs_path()
    }

    fn is_loaded(&self) -> bool {
        self.base().status().is_loaded
    }

    fn exists(&self) -> bool {
        self.base().status().exists
    }

    fn parse_error(&self) -> Option<ModelError> {
        self.base().status().parse_error
    }

    /// Drive the state machine with fresh content (`None` = file absent).
    /// Fully supersedes previous state; there is no partial update.
    fn load(&self, content: Option<&[u8]>) {
        let path = self.abs_path().to_string();
        debug!(path = %path, kind = %self.node_kind(), "load started");
        match content {
            None => self.base().set_status(|s| {
                s.parse_error = None;
                s.exists = false;
                s.is_loaded = true;
            }),
            Some(_) if !self.has_parser() => self.base().set_status(|s| {
                s.parse_error = None;
                s.exists = true;
                s.is_loaded = true;
            }),
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                match self.parse(&text) {
                    Ok(()) => self.base().set_status(|s| {
                        s.parse_error = None;
                        s.exists = true;
                        s.is_loaded = true;
                    }),
                    Err(fault) => {
                        error!(path = %path, message = %fault.message, "parse fault");
                        // `exists` keeps its prior value: structural data,
                        // if any, is from the last good parse. The node
                        // still counts as loaded so dependents do not wait
                        // on it forever.
                        self.base().set_status(|s| {
                            s.parse_error = Some(fault);
                            s.is_loaded = true;
                        });
                    }
                }
            }
        }
        debug!(path = %path, "load done");
    }

    /// The validation protocol: parse fault wins outright; unloaded nodes
    /// ask to be loaded; absent nodes have nothing to say; otherwise each
    /// check either runs (all dependencies loaded) or defers by
    /// propagating its dependency set.
    fn validation_errors(&self) -> ValidationResponse {
        let status = self.base().status();
        if let Some(fault) = status.parse_error {
            return ValidationResponse {
                errors: vec![fault],
                nodes_to_load: HashSet::new(),
            };
        }
        if !status.is_loaded {
            return ValidationResponse {
                errors: Vec::new(),
                nodes_to_load: HashSet::from([self.any_node()]),
            };
        }
        if !status.exists {
            return ValidationResponse::default();
        }

        let mut errors = Vec::new();
        let mut nodes_to_load = HashSet::new();
        for check in self.validation_checks() {
            let unloaded: HashSet<AnyNode> = check
                .nodes_to_load
                .into_iter()
                .filter(|n| !n.fileish().is_loaded())
                .collect();
            if !unloaded.is_empty() {
                nodes_to_load.extend(unloaded);
                continue;
            }
            for range in (check.evaluate)() {
                errors.push(ModelError {
                    path: self.abs_path().to_string(),
                    kind: check.kind,
                    message: check.kind.message().to_string(),
                    range,
                });
            }
        }
        ValidationResponse {
            errors,
            nodes_to_load,
        }
    }
}

/// A node of any kind. Equality and hashing go by (kind, path), which the
/// factory guarantees is one-to-one with node identity.
#[derive(Clone)]
pub enum AnyNode {
    Bundle(Arc<Bundle>),
    Book(Arc<Book>),
    Page(Arc<Page>),
    Resource(Arc<Resource>),
}

impl AnyNode {
    pub fn fileish(&self) -> &dyn Fileish {
        match self {
            AnyNode::Bundle(n) => n.as_ref(),
            AnyNode::Book(n) => n.as_ref(),
            AnyNode::Page(n) => n.as_ref(),
            AnyNode::Resource(n) => n.as_ref(),
        }
    }

    pub fn abs_path(&self) -> &str {
        self.fileish().abs_path()
    }

    pub fn node_kind(&self) -> NodeKind {
        self.fileish().node_kind()
    }
}

impl PartialEq for AnyNode {
    fn eq(&self, other: &Self) -> bool {
        self.node_kind() == other.node_kind() && self.abs_path() == other.abs_path()
    }
}

impl Eq for AnyNode {}

impl Hash for AnyNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node_kind().hash(state);
        self.abs_path().hash(state);
    }
}

impl fmt::Debug for AnyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.node_kind(), self.abs_path())
    }
}

impl From<Arc<Bundle>> for AnyNode {
    fn from(n: Arc<Bundle>) -> Self {
        AnyNode::Bundle(n)
    }
}

impl From<Arc<Book>> for AnyNode {
    fn from(n: Arc<Book>) -> Self {
        AnyNode::Book(n)
    }
}

impl From<Arc<Page>> for AnyNode {
    fn from(n: Arc<Page>) -> Self {
        AnyNode::Page(n)
    }
}

impl From<Arc<Resource>> for AnyNode {
    fn from(n: Arc<Resource>) -> Self {
        AnyNode::Resource(n)
    }
}
