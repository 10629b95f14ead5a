//! Shared fixtures: build a real bundle repository in a temp directory

// not every test binary uses every helper
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bindery::bundle::Bundle;
use bindery::diagnostics::{CollectingSink, DiagnosticSink};
use bindery::manager::ModelManager;
use bindery::paths::SlashPathHelper;
use bindery::toc::{TocNotification, TocSink};

pub struct BundleFixture {
    // held for its Drop
    _dir: tempfile::TempDir,
    root_path: PathBuf,
    pub root: String,
}

impl BundleFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root_path = dir.path().canonicalize().unwrap();
        let root = root_path.to_string_lossy().replace('\\', "/");
        for sub in ["META-INF", "collections", "modules", "media"] {
            std::fs::create_dir_all(root_path.join(sub)).unwrap();
        }
        Self {
            _dir: dir,
            root_path,
            root,
        }
    }

    /// Model-side absolute path for a repository-relative one
    pub fn path(&self, rel: &str) -> String {
        format!("{}/{}", self.root, rel)
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.root_path.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn delete(&self, rel: &str) {
        let path = self.root_path.join(rel);
        if path.is_dir() {
            std::fs::remove_dir_all(path).unwrap();
        } else {
            std::fs::remove_file(path).unwrap();
        }
    }

    pub fn build(&self) -> (Arc<ModelManager>, Arc<CollectingSink>, Arc<Bundle>) {
        let bundle = Bundle::new(Arc::new(SlashPathHelper), &self.root);
        let sink = Arc::new(CollectingSink::new());
        let manager = ModelManager::new(
            Arc::clone(&bundle),
            Arc::clone(&sink) as Arc<dyn DiagnosticSink>,
            None,
        );
        (manager, sink, bundle)
    }

    pub fn build_with_toc_sink(
        &self,
    ) -> (
        Arc<ModelManager>,
        Arc<CollectingSink>,
        Arc<Bundle>,
        Arc<RecordingTocSink>,
    ) {
        let bundle = Bundle::new(Arc::new(SlashPathHelper), &self.root);
        let sink = Arc::new(CollectingSink::new());
        let toc_sink = Arc::new(RecordingTocSink::default());
        let manager = ModelManager::new(
            Arc::clone(&bundle),
            Arc::clone(&sink) as Arc<dyn DiagnosticSink>,
            Some(Arc::clone(&toc_sink) as Arc<dyn TocSink>),
        );
        (manager, sink, bundle, toc_sink)
    }
}

#[derive(Default)]
pub struct RecordingTocSink {
    notifications: Mutex<Vec<TocNotification>>,
}

impl RecordingTocSink {
    pub fn all(&self) -> Vec<TocNotification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn latest(&self) -> Option<TocNotification> {
        self.notifications.lock().unwrap().last().cloned()
    }
}

impl TocSink for RecordingTocSink {
    fn notify(&self, notification: TocNotification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A page document with the given uuid and extra content elements
pub fn page_content(uuid: &str, title: &str, extra: &str) -> String {
    page_content_with_class(uuid, title, extra, None)
}

pub fn page_content_with_class(
    uuid: &str,
    title: &str,
    extra: &str,
    class: Option<&str>,
) -> String {
    let class_attr = class.map(|c| format!(" class=\"{c}\"")).unwrap_or_default();
    format!(
        r#"<document xmlns="http://cnx.rice.edu/cnxml" xmlns:md="http://cnx.rice.edu/mdml"{class_attr}>
  <title>{title}</title>
  <metadata>
    <md:uuid>{uuid}</md:uuid>
  </metadata>
  <content>
{extra}
  </content>
</document>
"#
    )
}

/// A book document whose `<col:content>` is supplied verbatim
pub fn book_content(title: &str, slug: &str, toc: &str) -> String {
    format!(
        r#"<col:collection xmlns:col="http://cnx.rice.edu/collxml" xmlns:md="http://cnx.rice.edu/mdml">
  <col:metadata>
    <md:title>{title}</md:title>
    <md:slug>{slug}</md:slug>
  </col:metadata>
  <col:content>
{toc}
  </col:content>
</col:collection>
"#
    )
}

pub fn module_entry(id: &str) -> String {
    format!("    <col:module document=\"{id}\" />")
}

pub fn subbook_entry(title: &str, inner: &str) -> String {
    format!(
        "    <col:subcollection>\n      <md:title>{title}</md:title>\n      <col:content>\n{inner}\n      </col:content>\n    </col:subcollection>"
    )
}

/// The bundle manifest declaring books by collection file name
pub fn manifest_content(book_files: &[&str]) -> String {
    let books: String = book_files
        .iter()
        .map(|f| format!("  <book href=\"../collections/{f}\" />\n"))
        .collect();
    format!(
        "<container xmlns=\"https://openstax.org/namespaces/book-container\" version=\"1\">\n{books}</container>\n"
    )
}

/// Write a ready-to-validate single-book repository: one book `physics`
/// with one chapter containing pages m1 (introduction) and m2.
pub fn write_standard_bundle(fixture: &BundleFixture) -> (String, String) {
    let uuid1 = new_uuid();
    let uuid2 = new_uuid();
    fixture.write("META-INF/books.xml", &manifest_content(&["physics.collection.xml"]));
    fixture.write(
        "collections/physics.collection.xml",
        &book_content(
            "Physics",
            "physics",
            &subbook_entry(
                "Chapter 1",
                &format!("{}\n{}", module_entry("m1"), module_entry("m2")),
            ),
        ),
    );
    fixture.write(
        "modules/m1/index.cnxml",
        &page_content_with_class(&uuid1, "Introduction", "", Some("introduction")),
    );
    fixture.write(
        "modules/m2/index.cnxml",
        &page_content(&uuid2, "Forces", "    <para id=\"para-1\">text</para>"),
    );
    (uuid1, uuid2)
}
