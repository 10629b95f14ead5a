//! Orchestration
//!
//! The manager owns the bundle root and drives everything around it:
//! routing filesystem events into the graph, loading just enough of the
//! model to answer a given question, chasing validation dependencies and
//! republishing diagnostics, and projecting the live table of contents.
//! All mutation funnels through the job runner's single stream; the reads
//! here work on snapshots and tolerate state moving underneath them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::book::BookTocNode;
use crate::bundle::Bundle;
use crate::diagnostics::DiagnosticSink;
use crate::fileish::{AnyNode, Fileish};
use crate::job_runner::{Job, JobContext, JobRunner};
use crate::location::{Position, Range, in_range};
use crate::page::Page;
use crate::paths::{PathShape, fs_path, recognize};
use crate::resource::Resource;
use crate::toc::{BookToc, PageSummary, TocEntry, TocNotification, TocSink};

/// Filesystem change notification, as delivered by the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeType {
    Created,
    Changed,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub kind: FileChangeType,
    pub uri: String,
}

/// One autocomplete candidate for a resource reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCompletion {
    /// Relative path that resolves correctly from the page's location
    pub insert_text: String,
    /// The span of the `src="…"` value to replace
    pub replace_range: Range,
}

/// A page link resolved to its navigation target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLink {
    pub range: Range,
    /// URL passthrough, or absolute target path with an optional
    /// `#element-id` anchor
    pub target: String,
}

struct TocState {
    version: u64,
    last: Option<(Vec<BookToc>, Vec<PageSummary>)>,
}

pub struct ModelManager {
    bundle: Arc<Bundle>,
    job_runner: JobRunner,
    diagnostics: Arc<dyn DiagnosticSink>,
    toc_sink: Option<Arc<dyn TocSink>>,
    /// Editor-held buffers, consulted ahead of disk reads
    open_documents: Mutex<HashMap<String, String>>,
    did_load_orphans: AtomicBool,
    toc_state: Mutex<TocState>,
}

impl ModelManager {
    pub fn new(
        bundle: Arc<Bundle>,
        diagnostics: Arc<dyn DiagnosticSink>,
        toc_sink: Option<Arc<dyn TocSink>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bundle,
            job_runner: JobRunner::new(),
            diagnostics,
            toc_sink,
            open_documents: Mutex::new(HashMap::new()),
            did_load_orphans: AtomicBool::new(false),
            toc_state: Mutex::new(TocState {
                version: 0,
                last: None,
            }),
        })
    }

    pub fn bundle(&self) -> &Arc<Bundle> {
        &self.bundle
    }

    pub fn job_runner(&self) -> &JobRunner {
        &self.job_runner
    }

    /// Resolve a path to an existing node, or create it when the path has a
    /// recognized shape. The bundle manifest resolves to the bundle itself.
    pub fn find_or_create_node(&self, path: &str) -> Option<AnyNode> {
        let path = self.bundle.path_helper().canonicalize(path);
        if path == self.bundle.abs_path() {
            return Some(self.bundle.any_node());
        }
        match recognize(&path)? {
            PathShape::Resource => Some(AnyNode::from(self.bundle.resources().get_or_add(&path))),
            PathShape::Page => Some(AnyNode::from(self.bundle.pages().get_or_add(&path))),
            PathShape::Book => Some(AnyNode::from(self.bundle.book_factory().get_or_add(&path))),
        }
    }

    /// Resolve a path to an existing node without creating anything
    pub fn find_node(&self, path: &str) -> Option<AnyNode> {
        let path = self.bundle.path_helper().canonicalize(path);
        if path == self.bundle.abs_path() {
            return Some(self.bundle.any_node());
        }
        self.bundle
            .book_factory()
            .get(&path)
            .map(AnyNode::from)
            .or_else(|| self.bundle.pages().get(&path).map(AnyNode::from))
            .or_else(|| self.bundle.resources().get(&path).map(AnyNode::from))
    }

    /// Read content for a path: open-buffer overlay first, then disk.
    /// `None` means the file is absent (or is not a regular file).
    async fn read_or_null(&self, path: &str) -> Option<Vec<u8>> {
        if let Some(buffered) = self.get_open_doc_contents(path) {
            return Some(buffered.into_bytes());
        }
        let on_disk = fs_path(path);
        let metadata = tokio::fs::metadata(on_disk).await.ok()?;
        // a reference like src="modules/m1" can resolve to a directory
        if !metadata.is_file() {
            return None;
        }
        tokio::fs::read(on_disk).await.ok()
    }

    async fn read_and_load(&self, node: &AnyNode) {
        if node.fileish().is_loaded() {
            return;
        }
        let content = self.read_or_null(node.abs_path()).await;
        node.fileish().load(content.as_deref());
        self.update_toc();
    }

    async fn read_and_update(&self, node: &AnyNode) {
        let content = self.read_or_null(node.abs_path()).await;
        node.fileish().load(content.as_deref());
        self.update_toc();
    }

    /// Load the bundle and its declared books — nothing more — and publish
    /// their diagnostics. Pages are not preloaded for TOC purposes.
    pub async fn load_enough_for_toc(self: &Arc<Self>) {
        let bundle_node = self.bundle.any_node();
        self.read_and_load(&bundle_node).await;
        self.send_file_diagnostics(&bundle_node);

        if self.bundle.is_loaded() && self.bundle.exists() {
            for book in self.bundle.books() {
                let node = AnyNode::from(book);
                self.read_and_load(&node).await;
                self.send_file_diagnostics(&node);
            }
        }
    }

    /// After the TOC load, register every file on disk matching a
    /// recognized shape — without reading its content — so orphans have an
    /// identity before any data is read.
    pub async fn load_enough_for_orphans(self: &Arc<Self>) {
        if self.did_load_orphans.swap(true, Ordering::SeqCst) {
            return;
        }
        self.load_enough_for_toc().await;

        let helper = self.bundle.path_helper();
        let root = self.bundle.workspace_root().to_string();
        let fs_root = fs_path(&root).to_string();

        // modules/*/index.cnxml
        if let Ok(mut entries) = tokio::fs::read_dir(format!("{fs_root}/modules")).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().into_owned();
                let index = entry.path().join("index.cnxml");
                if tokio::fs::metadata(&index).await.is_ok_and(|m| m.is_file()) {
                    let path = helper.join(&root, &format!("modules/{name}/index.cnxml"));
                    self.find_or_create_node(&path);
                }
            }
        }
        // media/*.*
        if let Ok(mut entries) = tokio::fs::read_dir(format!("{fs_root}/media")).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry.metadata().await.is_ok_and(|m| m.is_file()) {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let path = helper.join(&root, &format!("media/{name}"));
                    self.find_or_create_node(&path);
                }
            }
        }
        // collections/*.collection.xml
        if let Ok(mut entries) = tokio::fs::read_dir(format!("{fs_root}/collections")).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.ends_with(".collection.xml") {
                    let path = helper.join(&root, &format!("collections/{name}"));
                    self.find_or_create_node(&path);
                }
            }
        }
        self.update_toc();
    }

    /// Queue a full cold start as slow work: load the bundle, then every
    /// book, page, and resource, then sweep diagnostics over the whole
    /// graph. Enqueued in reverse so the LIFO stack runs the phases in
    /// order, with per-file loads nested inside each phase.
    pub fn perform_initial_validation(self: &Arc<Self>) {
        let bundle_node = self.bundle.any_node();
        let jobs: Vec<Job> = vec![
            Job {
                kind: "initial-load-bundle",
                context: JobContext::Node(bundle_node.clone()),
                slow: true,
                run: {
                    let mgr = Arc::clone(self);
                    Box::new(move || {
                        Box::pin(async move {
                            mgr.read_and_load(&mgr.bundle.any_node()).await;
                            Ok(())
                        })
                    })
                },
            },
            Job {
                kind: "initial-load-books",
                context: JobContext::Node(bundle_node.clone()),
                slow: true,
                run: {
                    let mgr = Arc::clone(self);
                    Box::new(move || {
                        Box::pin(async move {
                            for book in mgr.bundle.book_factory().all() {
                                enqueue_load_on(&mgr, AnyNode::from(book));
                            }
                            Ok(())
                        })
                    })
                },
            },
            Job {
                kind: "initial-load-pages",
                context: JobContext::Node(bundle_node.clone()),
                slow: true,
                run: {
                    let mgr = Arc::clone(self);
                    Box::new(move || {
                        Box::pin(async move {
                            for page in mgr.bundle.pages().all() {
                                enqueue_load_on(&mgr, AnyNode::from(page));
                            }
                            Ok(())
                        })
                    })
                },
            },
            Job {
                kind: "initial-load-resources",
                context: JobContext::Node(bundle_node.clone()),
                slow: true,
                run: {
                    let mgr = Arc::clone(self);
                    Box::new(move || {
                        Box::pin(async move {
                            for resource in mgr.bundle.resources().all() {
                                enqueue_load_on(&mgr, AnyNode::from(resource));
                            }
                            Ok(())
                        })
                    })
                },
            },
            Job {
                kind: "initial-validation-sweep",
                context: JobContext::Node(bundle_node),
                slow: true,
                run: {
                    let mgr = Arc::clone(self);
                    Box::new(move || {
                        Box::pin(async move {
                            for node in mgr.bundle.all_nodes() {
                                mgr.send_file_diagnostics(&node);
                            }
                            Ok(())
                        })
                    })
                },
            },
        ];
        for job in jobs.into_iter().rev() {
            self.job_runner.enqueue(job);
        }
    }

    /// Queue fast jobs that load enough context (bundle + books) to resolve
    /// cross-references, then compute diagnostics for one document —
    /// preferring editor-buffered content when it was provided.
    pub fn load_enough_to_send_diagnostics(
        self: &Arc<Self>,
        workspace: &str,
        doc: &str,
        content: Option<String>,
    ) {
        let context = || JobContext::Doc {
            workspace: workspace.to_string(),
            doc: doc.to_string(),
        };
        let jobs: Vec<Job> = vec![
            Job {
                kind: "open-doc-load-bundle",
                context: context(),
                slow: false,
                run: {
                    let mgr = Arc::clone(self);
                    Box::new(move || {
                        Box::pin(async move {
                            mgr.read_and_load(&mgr.bundle.any_node()).await;
                            Ok(())
                        })
                    })
                },
            },
            Job {
                kind: "open-doc-load-books",
                context: context(),
                slow: false,
                run: {
                    let mgr = Arc::clone(self);
                    Box::new(move || {
                        Box::pin(async move {
                            if mgr.bundle.is_loaded() && mgr.bundle.exists() {
                                for book in mgr.bundle.books() {
                                    mgr.read_and_load(&AnyNode::from(book)).await;
                                }
                            }
                            Ok(())
                        })
                    })
                },
            },
            Job {
                kind: "open-doc-diagnostics",
                context: context(),
                slow: false,
                run: {
                    let mgr = Arc::clone(self);
                    let doc = doc.to_string();
                    Box::new(move || {
                        Box::pin(async move {
                            if let Some(node) = mgr.find_node(&doc) {
                                match content {
                                    Some(content) => mgr.update_file_contents(&doc, &content),
                                    None => mgr.send_file_diagnostics(&node),
                                }
                            }
                            Ok(())
                        })
                    })
                },
            },
        ];
        for job in jobs.into_iter().rev() {
            self.job_runner.enqueue(job);
        }
    }

    /// Route one filesystem event into the graph. Returns the set of nodes
    /// touched, for observability and tests.
    pub async fn process_filesystem_change(self: &Arc<Self>, event: FileEvent) -> HashSet<AnyNode> {
        let uri = self.bundle.path_helper().canonicalize(&event.uri);
        debug!(kind = ?event.kind, uri = %uri, "filesystem event");
        match event.kind {
            FileChangeType::Created => match self.find_or_create_node(&uri) {
                Some(node) => {
                    self.read_and_load(&node).await;
                    HashSet::from([node])
                }
                None => {
                    debug!(uri = %uri, "created file has no recognized shape, ignoring");
                    HashSet::new()
                }
            },
            FileChangeType::Changed => match self.find_node(&uri) {
                Some(node) => {
                    self.read_and_update(&node).await;
                    self.send_file_diagnostics(&node);
                    HashSet::from([node])
                }
                None => HashSet::new(),
            },
            FileChangeType::Deleted => {
                let mut removed: HashSet<AnyNode> = HashSet::new();
                // deleting a directory above the manifest unloads the bundle
                if self.bundle.abs_path().starts_with(&uri) {
                    removed.insert(self.bundle.any_node());
                }
                if let Some(node) = self.bundle.book_factory().remove(&uri).map(AnyNode::from) {
                    removed.insert(node);
                } else if let Some(node) = self.bundle.pages().remove(&uri).map(AnyNode::from) {
                    removed.insert(node);
                } else if let Some(node) = self.bundle.resources().remove(&uri).map(AnyNode::from) {
                    removed.insert(node);
                }
                // directory deletion: everything under the path goes too
                let prefix = format!("{uri}/");
                removed.extend(
                    self.bundle
                        .book_factory()
                        .remove_by_key_prefix(&prefix)
                        .into_iter()
                        .map(AnyNode::from),
                );
                removed.extend(
                    self.bundle
                        .pages()
                        .remove_by_key_prefix(&prefix)
                        .into_iter()
                        .map(AnyNode::from),
                );
                removed.extend(
                    self.bundle
                        .resources()
                        .remove_by_key_prefix(&prefix)
                        .into_iter()
                        .map(AnyNode::from),
                );
                // mark every removed node absent so dependents holding a
                // reference see "missing", not a ghost
                for node in &removed {
                    node.fileish().load(None);
                }
                self.update_toc();
                removed
            }
        }
    }

    /// Register (or update) an editor-held buffer for a path and
    /// revalidate against it. Buffered content wins over disk until
    /// [`close_document`](Self::close_document).
    pub fn update_file_contents(self: &Arc<Self>, path: &str, content: &str) {
        let Some(node) = self.find_or_create_node(path) else {
            debug!(path = %path, "no model for this file, ignoring content update");
            return;
        };
        let key = self.bundle.path_helper().canonicalize(path);
        self.open_documents
            .lock()
            .unwrap()
            .insert(key, content.to_string());
        node.fileish().load(Some(content.as_bytes()));
        self.send_file_diagnostics(&node);
        self.update_toc();
    }

    pub fn close_document(&self, path: &str) {
        let key = self.bundle.path_helper().canonicalize(path);
        self.open_documents.lock().unwrap().remove(&key);
    }

    pub fn get_open_doc_contents(&self, path: &str) -> Option<String> {
        let key = self.bundle.path_helper().canonicalize(path);
        self.open_documents.lock().unwrap().get(&key).cloned()
    }

    /// Compute and publish diagnostics for one node. When dependencies are
    /// missing, re-enqueue this same computation behind fast load jobs for
    /// each of them — the LIFO stack runs the loads first, then the retry.
    pub fn send_file_diagnostics(self: &Arc<Self>, node: &AnyNode) {
        let response = node.fileish().validation_errors();
        if response.nodes_to_load.is_empty() {
            let uri = node.abs_path().to_string();
            let diagnostics = response
                .errors
                .into_iter()
                .map(|e| e.into_diagnostic())
                .collect();
            self.diagnostics.publish(&uri, diagnostics);
            return;
        }
        let unloaded: Vec<AnyNode> = response
            .nodes_to_load
            .into_iter()
            .filter(|n| !n.fileish().is_loaded())
            .collect();
        debug!(
            path = %node.abs_path(),
            missing = unloaded.len(),
            "diagnostics deferred until dependencies load"
        );
        {
            let mgr = Arc::clone(self);
            let node = node.clone();
            self.job_runner.enqueue(Job {
                kind: "delayed-diagnostics",
                context: JobContext::Node(node.clone()),
                slow: false,
                run: Box::new(move || {
                    Box::pin(async move {
                        mgr.send_file_diagnostics(&node);
                        Ok(())
                    })
                }),
            });
        }
        for dependency in unloaded {
            let mgr = Arc::clone(self);
            self.job_runner.enqueue(Job {
                kind: "load-dependency",
                context: JobContext::Node(dependency.clone()),
                slow: false,
                run: Box::new(move || {
                    Box::pin(async move {
                        mgr.read_and_load(&dependency).await;
                        Ok(())
                    })
                }),
            });
        }
    }

    /// Pages not reachable from any declared book
    pub fn orphaned_pages(&self) -> Vec<Arc<Page>> {
        let referenced: HashSet<String> = self
            .loaded_books()
            .iter()
            .flat_map(|b| b.pages())
            .collect();
        self.bundle
            .pages()
            .all()
            .into_iter()
            .filter(|p| !referenced.contains(p.abs_path()))
            .collect()
    }

    /// Existing resources not referenced by any page of any declared book
    pub fn orphaned_resources(&self) -> Vec<Arc<Resource>> {
        let referenced: HashSet<String> = self
            .loaded_books()
            .iter()
            .flat_map(|b| b.pages())
            .filter_map(|path| self.bundle.pages().get(&path))
            .filter(|p| p.is_loaded() && p.exists())
            .flat_map(|p| p.resource_links())
            .map(|l| l.target)
            .collect();
        self.bundle
            .resources()
            .all()
            .into_iter()
            .filter(|r| r.is_loaded() && r.exists())
            .filter(|r| !referenced.contains(r.abs_path()))
            .collect()
    }

    fn loaded_books(&self) -> Vec<Arc<crate::book::Book>> {
        if !self.bundle.is_loaded() || !self.bundle.exists() {
            return Vec::new();
        }
        self.bundle
            .books()
            .into_iter()
            .filter(|b| b.is_loaded() && b.exists())
            .collect()
    }

    /// Candidate replacements when the cursor sits inside a resource
    /// link's `src="…"` value: every orphaned resource, as a relative path
    /// from this page's directory.
    pub fn autocomplete_resources(
        &self,
        page: &Arc<Page>,
        cursor: Position,
    ) -> Vec<ResourceCompletion> {
        if !page.is_loaded() || !page.exists() {
            return Vec::new();
        }
        let inside_link = page
            .resource_links()
            .iter()
            .any(|l| in_range(l.range, cursor));
        if !inside_link {
            return Vec::new();
        }
        let Some(content) = self.get_open_doc_contents(page.abs_path()) else {
            debug!(path = %page.abs_path(), "no open buffer for autocomplete");
            return Vec::new();
        };
        let Some(line) = content.lines().nth(cursor.line as usize) else {
            return Vec::new();
        };
        let chars: Vec<char> = line.chars().collect();
        let cut = (cursor.character as usize).min(chars.len());
        let before: String = chars[..cut].iter().collect();
        let after: String = chars[cut..].iter().collect();

        const QUOTE_OPEN: &str = "src=\"";
        let Some(start_offset) = before.rfind(QUOTE_OPEN) else {
            return Vec::new();
        };
        let Some(end_offset) = after.find('"') else {
            return Vec::new();
        };
        if !before
            .split(' ')
            .next_back()
            .is_some_and(|token| token.starts_with(QUOTE_OPEN))
        {
            return Vec::new();
        }
        let replace_range = Range::new(
            Position::new(
                cursor.line,
                (before[..start_offset].chars().count() + QUOTE_OPEN.len()) as u32,
            ),
            Position::new(cursor.line, cursor.character + end_offset as u32),
        );

        let helper = self.bundle.path_helper();
        let page_dir = helper.dirname(page.abs_path());
        self.orphaned_resources()
            .into_iter()
            .map(|resource| ResourceCompletion {
                insert_text: helper.relative(&page_dir, resource.abs_path()),
                replace_range,
            })
            .collect()
    }

    /// Resolve every link of a page to a navigation target
    pub fn document_links(&self, page: &Arc<Page>) -> Vec<DocumentLink> {
        if !page.is_loaded() || !page.exists() {
            return Vec::new();
        }
        page.page_links()
            .into_iter()
            .map(|link| match link {
                crate::page::PageLink::Url { url, range } => DocumentLink { range, target: url },
                crate::page::PageLink::Page { page, range } => DocumentLink {
                    range,
                    target: page,
                },
                crate::page::PageLink::PageElement {
                    page,
                    target_element_id,
                    range,
                } => DocumentLink {
                    range,
                    target: format!("{page}#{target_element_id}"),
                },
            })
            .collect()
    }

    fn read_page_sync(&self, page: &Arc<Page>) -> Option<String> {
        if let Some(buffered) = self.get_open_doc_contents(page.abs_path()) {
            return Some(buffered);
        }
        std::fs::read_to_string(fs_path(page.abs_path())).ok()
    }

    fn project_book_entries(&self, nodes: &[BookTocNode]) -> Vec<TocEntry> {
        nodes
            .iter()
            .map(|node| match node {
                BookTocNode::Subbook { title, children } => TocEntry::Subbook {
                    title: title.v.clone(),
                    children: self.project_book_entries(children),
                },
                BookTocNode::Leaf { page, .. } => {
                    let page = self.bundle.pages().get_or_add(page);
                    TocEntry::Page {
                        title: page.title(|| self.read_page_sync(&page)),
                        module_id: crate::paths::module_id(
                            self.bundle.path_helper().as_ref(),
                            page.abs_path(),
                        ),
                    }
                }
            })
            .collect()
    }

    /// Recompute the TOC projection; notify the sink only when the
    /// semantic value changed.
    fn update_toc(&self) {
        let Some(sink) = &self.toc_sink else {
            return;
        };
        let books: Vec<BookToc> = self
            .loaded_books()
            .iter()
            .map(|b| BookToc {
                title: b.title(),
                slug: b.slug(),
                entries: self.project_book_entries(&b.toc()),
            })
            .collect();
        let mut orphans: Vec<PageSummary> = self
            .orphaned_pages()
            .into_iter()
            .map(|page| PageSummary {
                title: page.title(|| self.read_page_sync(&page)),
                module_id: crate::paths::module_id(
                    self.bundle.path_helper().as_ref(),
                    page.abs_path(),
                ),
            })
            .collect();
        orphans.sort_by(|a, b| a.module_id.cmp(&b.module_id));

        let snapshot = (books, orphans);
        let notification = {
            let mut state = self.toc_state.lock().unwrap();
            if state.last.as_ref() == Some(&snapshot) {
                return;
            }
            state.version += 1;
            let notification = TocNotification {
                version: state.version,
                books: snapshot.0.clone(),
                orphans: snapshot.1.clone(),
            };
            state.last = Some(snapshot);
            notification
        };
        sink.notify(notification);
    }
}

fn enqueue_load_on(mgr: &Arc<ModelManager>, node: AnyNode) {
    let job_mgr = Arc::clone(mgr);
    mgr.job_runner.enqueue(Job {
        kind: "initial-load-file",
        context: JobContext::Node(node.clone()),
        slow: true,
        run: Box::new(move || {
            Box::pin(async move {
                job_mgr.read_and_load(&node).await;
                Ok(())
            })
        }),
    });
}
