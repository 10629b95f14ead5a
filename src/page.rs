//! Page node
//!
//! A leaf content document: identifier, title, element ids, outbound
//! resource references and page links. Pages are where most validation
//! findings come from — broken links, malformed or colliding identifiers,
//! elements that ought to carry ids.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex, Weak};

use regex::Regex;

use crate::bundle::Bundle;
use crate::fileish::{
    AnyNode, Fileish, ModelError, NodeBase, NodeKind, ValidationCheck, ValidationKind,
    ensure_loaded,
};
use crate::location::{NOWHERE, Position, Range, WithRange};
use crate::paths::JoinKind;
use crate::xml::{NS_CNXML, NS_MDML, XmlElement, parse_document};

/// Placeholder title for pages that have none (or are not loaded yet)
pub const UNTITLED: &str = "(untitled)";

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-5][0-9a-f]{3}-[089ab][0-9a-f]{3}-[0-9a-f]{12}$",
    )
    .unwrap()
});

/// Content elements that must carry an `id` attribute
const REQUIRED_ID_ELEMENTS: &[&str] = &[
    "para", "equation", "list", "section", "problem", "solution", "exercise", "example", "figure",
    "definition", "term", "table", "quote", "note", "footnote", "cite",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceLinkKind {
    Image,
    Iframe,
}

/// Reference from a page to a binary asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLink {
    pub kind: ResourceLinkKind,
    /// Canonical absolute path of the referenced resource
    pub target: String,
    pub range: Range,
}

/// Reference from a page to elsewhere: an external URL, a whole page, or
/// an element within a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageLink {
    Url {
        url: String,
        range: Range,
    },
    Page {
        page: String,
        range: Range,
    },
    PageElement {
        page: String,
        target_element_id: String,
        range: Range,
    },
}

impl PageLink {
    pub fn range(&self) -> Range {
        match self {
            PageLink::Url { range, .. }
            | PageLink::Page { range, .. }
            | PageLink::PageElement { range, .. } => *range,
        }
    }

    /// Target page path for internal links
    pub fn target_page(&self) -> Option<&str> {
        match self {
            PageLink::Url { .. } => None,
            PageLink::Page { page, .. } | PageLink::PageElement { page, .. } => Some(page),
        }
    }
}

/// Structural snapshot extracted by one successful parse
#[derive(Debug, Clone)]
pub struct PageData {
    pub uuid: WithRange<String>,
    pub title: Option<WithRange<String>>,
    pub element_ids: Vec<WithRange<String>>,
    pub elements_missing_ids: Vec<Range>,
    pub resource_links: Vec<ResourceLink>,
    pub page_links: Vec<PageLink>,
    pub is_introduction: bool,
}

pub struct Page {
    base: NodeBase,
    me: Weak<Page>,
    data: Mutex<Option<Arc<PageData>>>,
}

impl Page {
    pub fn new(bundle: Weak<Bundle>, abs_path: String) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            base: NodeBase::new(bundle, abs_path),
            me: me.clone(),
            data: Mutex::new(None),
        })
    }

    fn data(&self) -> Arc<PageData> {
        ensure_loaded(self.abs_path(), &self.data)
    }

    pub fn uuid(&self) -> WithRange<String> {
        self.data().uuid.clone()
    }

    /// Title if the page is loaded and has one
    pub fn opt_title(&self) -> Option<String> {
        let data = self.data.lock().unwrap().clone();
        data.and_then(|d| d.title.as_ref().map(|t| t.v.clone()))
    }

    /// Title for TOC purposes: the parsed one, or a cheap plain-text scan
    /// of the raw content when the page was never parsed.
    pub fn title(&self, read: impl FnOnce() -> Option<String>) -> String {
        let data = self.data.lock().unwrap().clone();
        match data {
            Some(d) => d
                .title
                .as_ref()
                .map(|t| t.v.clone())
                .unwrap_or_else(|| UNTITLED.to_string()),
            None => read()
                .and_then(|content| guess_title(&content).map(|t| t.v))
                .unwrap_or_else(|| UNTITLED.to_string()),
        }
    }

    pub fn resource_links(&self) -> Vec<ResourceLink> {
        self.data().resource_links.clone()
    }

    pub fn page_links(&self) -> Vec<PageLink> {
        self.data().page_links.clone()
    }

    pub fn element_ids(&self) -> Vec<WithRange<String>> {
        self.data().element_ids.clone()
    }

    pub fn has_element_id(&self, id: &str) -> bool {
        self.data().element_ids.iter().any(|e| e.v == id)
    }

    pub fn is_introduction(&self) -> bool {
        self.data().is_introduction
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

/// Plain-text scan for `<title>…</title>` without parsing. Gives the TOC a
/// usable label before a page is ever loaded.
pub fn guess_title(content: &str) -> Option<WithRange<String>> {
    const OPEN: &str = "<title>";
    const CLOSE: &str = "</title>";
    let bytes = content.as_bytes();
    let open_at = memchr::memmem::find(bytes, OPEN.as_bytes())?;
    let close_at = memchr::memmem::find(&bytes[open_at..], CLOSE.as_bytes())? + open_at;
    let start = open_at + OPEN.len();
    if close_at < start || close_at - start > 280 {
        // a title longer than that means the scan latched onto the wrong
        // thing; let the real parser sort it out
        return None;
    }
    Some(WithRange::new(
        content[start..close_at].trim().to_string(),
        Range::new(
            position_at(content, start),
            position_at(content, close_at),
        ),
    ))
}

fn position_at(content: &str, offset: usize) -> Position {
    let before = &content[..offset];
    let line = before.matches('\n').count();
    let character = before
        .rsplit('\n')
        .next()
        .map(|tail| tail.chars().count())
        .unwrap_or(0);
    Position::new(line as u32, character as u32)
}

fn collect_missing_ids(element: &XmlElement, inside_definition: bool, acc: &mut Vec<Range>) {
    for child in &element.children {
        let requires_id = child.namespace.as_deref() == Some(NS_CNXML)
            && REQUIRED_ID_ELEMENTS.contains(&child.local_name.as_str())
            && child.attr_non_empty("id").is_none()
            // a term inside a definition is the one exemption
            && !(child.local_name == "term" && inside_definition);
        if requires_id {
            acc.push(child.range);
        }
        collect_missing_ids(child, inside_definition || child.local_name == "definition", acc);
    }
}

impl Fileish for Page {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn node_kind(&self) -> NodeKind {
        NodeKind::Page
    }

    fn any_node(&self) -> AnyNode {
        AnyNode::Page(self.me.upgrade().expect("node still referenced"))
    }

    fn parse(&self, content: &str) -> Result<(), ModelError> {
        let root = parse_document(content).map_err(|e| {
            self.parse_fault(e.message, e.position.map_or(NOWHERE, |p| Range::new(p, p)))
        })?;
        let bundle = self.base.bundle();
        let helper = bundle.path_helper();

        let uuids: Vec<&XmlElement> = root
            .descendants()
            .filter(|e| e.is(NS_MDML, "uuid"))
            .collect();
        let uuid = match uuids.as_slice() {
            [only] => WithRange::new(only.text_trim().to_string(), only.range),
            [] => return Err(self.parse_fault("missing md:uuid element", NOWHERE)),
            _ => return Err(self.parse_fault("more than one md:uuid element", NOWHERE)),
        };

        let title = root
            .descendants()
            .find(|e| e.is(NS_CNXML, "title"))
            .map(|e| WithRange::new(e.text_trim().to_string(), e.range));

        let element_ids: Vec<WithRange<String>> = root
            .descendants()
            .filter(|e| e.namespace.as_deref() == Some(NS_CNXML))
            .filter_map(|e| {
                e.attr_non_empty("id")
                    .map(|id| WithRange::new(id.to_string(), e.range))
            })
            .collect();

        let mut elements_missing_ids = Vec::new();
        collect_missing_ids(&root, root.local_name == "definition", &mut elements_missing_ids);

        let mut resource_links = Vec::new();
        for e in root.descendants() {
            let kind = if e.is(NS_CNXML, "image") {
                ResourceLinkKind::Image
            } else if e.is(NS_CNXML, "iframe") {
                ResourceLinkKind::Iframe
            } else {
                continue;
            };
            let Some(src) = e.attr_non_empty("src") else {
                continue;
            };
            if kind == ResourceLinkKind::Iframe
                && (src.starts_with("https://") || src.starts_with("http://"))
            {
                continue;
            }
            let target =
                crate::paths::repo_join(helper.as_ref(), JoinKind::AbsToRel, self.abs_path(), src);
            // establish identity now so dependency sets resolve to the
            // same node later
            bundle.resources().get_or_add(&target);
            resource_links.push(ResourceLink {
                kind,
                target,
                range: e.range,
            });
        }

        let mut page_links = Vec::new();
        for e in root.descendants().filter(|e| e.is(NS_CNXML, "link")) {
            let range = e.range;
            if let Some(url) = e.attr_non_empty("url") {
                page_links.push(PageLink::Url {
                    url: url.to_string(),
                    range,
                });
                continue;
            }
            let page = match e.attr_non_empty("document") {
                Some(document) => {
                    let target = crate::paths::repo_join(
                        helper.as_ref(),
                        JoinKind::ModuleToModuleId,
                        self.abs_path(),
                        document,
                    );
                    bundle.pages().get_or_add(&target);
                    target
                }
                None => self.abs_path().to_string(),
            };
            match e.attr_non_empty("target-id") {
                Some(target_id) => page_links.push(PageLink::PageElement {
                    page,
                    target_element_id: target_id.to_string(),
                    range,
                }),
                None => page_links.push(PageLink::Page { page, range }),
            }
        }

        let is_introduction = root
            .attr("class")
            .is_some_and(|c| c.split_whitespace().any(|token| token == "introduction"));

        *self.data.lock().unwrap() = Some(Arc::new(PageData {
            uuid,
            title,
            element_ids,
            elements_missing_ids,
            resource_links,
            page_links,
            is_introduction,
        }));
        Ok(())
    }

    fn validation_checks(&self) -> Vec<ValidationCheck> {
        let data = self.data();
        let bundle = self.base.bundle();
        let my_path = self.abs_path().to_string();

        let resource_targets: Vec<(Arc<crate::resource::Resource>, Range)> = data
            .resource_links
            .iter()
            .map(|l| (bundle.resources().get_or_add(&l.target), l.range))
            .collect();

        let link_targets: Vec<(Arc<Page>, Option<String>, Range)> = data
            .page_links
            .iter()
            .filter_map(|l| {
                l.target_page().map(|page| {
                    (
                        bundle.pages().get_or_add(page),
                        match l {
                            PageLink::PageElement {
                                target_element_id, ..
                            } => Some(target_element_id.clone()),
                            _ => None,
                        },
                        l.range(),
                    )
                })
            })
            .collect();

        let mut checks = Vec::new();

        checks.push(ValidationCheck {
            kind: ValidationKind::MissingResource,
            nodes_to_load: resource_targets
                .iter()
                .map(|(r, _)| AnyNode::from(Arc::clone(r)))
                .collect(),
            evaluate: {
                let resource_targets = resource_targets.clone();
                Box::new(move || {
                    resource_targets
                        .iter()
                        .filter(|(r, _)| !r.exists())
                        .map(|(_, range)| *range)
                        .collect()
                })
            },
        });

        checks.push(ValidationCheck {
            kind: ValidationKind::MissingLinkTarget,
            // the page itself is always loaded here, so self-links need no
            // dependency entry
            nodes_to_load: link_targets
                .iter()
                .filter(|(p, _, _)| p.abs_path() != my_path)
                .map(|(p, _, _)| AnyNode::from(Arc::clone(p)))
                .collect(),
            evaluate: {
                let link_targets = link_targets.clone();
                Box::new(move || {
                    link_targets
                        .iter()
                        .filter(|(page, element_id, _)| {
                            if !page.exists() {
                                return true;
                            }
                            match element_id {
                                None => false,
                                Some(id) => !page.has_element_id(id),
                            }
                        })
                        .map(|(_, _, range)| *range)
                        .collect()
                })
            },
        });

        checks.push(ValidationCheck {
            kind: ValidationKind::MalformedUuid,
            nodes_to_load: Default::default(),
            evaluate: {
                let uuid = data.uuid.clone();
                Box::new(move || {
                    if UUID_RE.is_match(&uuid.v) {
                        Vec::new()
                    } else {
                        vec![uuid.range]
                    }
                })
            },
        });

        checks.push(ValidationCheck {
            kind: ValidationKind::DuplicateUuid,
            nodes_to_load: Default::default(),
            evaluate: {
                let uuid = data.uuid.clone();
                let bundle = Arc::clone(&bundle);
                Box::new(move || {
                    if bundle.is_duplicate_uuid(&uuid.v) {
                        vec![uuid.range]
                    } else {
                        Vec::new()
                    }
                })
            },
        });

        checks.push(ValidationCheck {
            kind: ValidationKind::MissingElementId,
            nodes_to_load: Default::default(),
            evaluate: {
                let missing = data.elements_missing_ids.clone();
                Box::new(move || missing)
            },
        });

        // Whether this page opens a subbook is knowable only through the
        // bundle's books; declare them in stages and let the deferral loop
        // converge.
        let intro_deps: HashSet<AnyNode> = if !bundle.is_loaded() {
            HashSet::from([bundle.any_node()])
        } else if bundle.exists() {
            bundle
                .books()
                .into_iter()
                .map(AnyNode::from)
                .collect()
        } else {
            HashSet::new()
        };
        checks.push(ValidationCheck {
            kind: ValidationKind::MissingIntroduction,
            nodes_to_load: intro_deps,
            evaluate: {
                let bundle = Arc::clone(&bundle);
                let is_introduction = data.is_introduction;
                let anchor = data.title.as_ref().map_or(NOWHERE, |t| t.range);
                let my_path = my_path.clone();
                Box::new(move || {
                    if is_introduction || !bundle.is_loaded() || !bundle.exists() {
                        return Vec::new();
                    }
                    let leads_subbook = bundle.books().iter().any(|book| {
                        book.exists() && book.first_leaf_pages().contains(&my_path)
                    });
                    if leads_subbook {
                        vec![anchor]
                    } else {
                        Vec::new()
                    }
                })
            },
        });

        checks
    }
}
