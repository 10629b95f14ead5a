//! End-to-end model tests over real bundle repositories on disk

mod common;

use bindery::fileish::{AnyNode, Fileish};
use bindery::location::{NOWHERE, Position};
use bindery::manager::{FileChangeType, FileEvent};

use common::*;

#[test]
fn unloaded_node_asks_to_be_loaded() {
    let fixture = BundleFixture::new();
    let (_manager, _sink, bundle) = fixture.build();
    let page = bundle
        .pages()
        .get_or_add(&fixture.path("modules/m1/index.cnxml"));
    let response = page.validation_errors();
    assert!(response.errors.is_empty());
    assert_eq!(response.nodes_to_load.len(), 1);
    assert!(response.nodes_to_load.contains(&page.any_node()));
}

#[test]
fn absent_node_has_nothing_to_validate() {
    let fixture = BundleFixture::new();
    let (_manager, _sink, bundle) = fixture.build();
    let page = bundle
        .pages()
        .get_or_add(&fixture.path("modules/m1/index.cnxml"));
    page.load(None);
    assert!(page.is_loaded());
    assert!(!page.exists());
    let response = page.validation_errors();
    assert!(response.errors.is_empty());
    assert!(response.nodes_to_load.is_empty());
}

#[test]
fn load_is_idempotent() {
    let fixture = BundleFixture::new();
    let (_manager, _sink, bundle) = fixture.build();
    let uuid = new_uuid();
    let content = page_content(&uuid, "Waves", "    <para id=\"p1\">text</para>");
    let page = bundle
        .pages()
        .get_or_add(&fixture.path("modules/m1/index.cnxml"));

    page.load(Some(content.as_bytes()));
    let first = (page.uuid(), page.opt_title(), page.element_ids());
    page.load(Some(content.as_bytes()));
    let second = (page.uuid(), page.opt_title(), page.element_ids());
    assert_eq!(first, second);
    assert_eq!(first.1.as_deref(), Some("Waves"));
}

#[tokio::test]
async fn missing_link_target_reported_then_cleared() {
    let fixture = BundleFixture::new();
    let uuid2 = new_uuid();
    write_standard_bundle(&fixture);
    fixture.write(
        "modules/m2/index.cnxml",
        &page_content(
            &uuid2,
            "Forces",
            "    <para id=\"p1\">see <link target-id=\"missing\"/></para>",
        ),
    );
    let (manager, sink, _bundle) = fixture.build();
    manager.perform_initial_validation();
    manager.job_runner().done().await.unwrap();

    let m2 = fixture.path("modules/m2/index.cnxml");
    let diags = sink.get(&m2);
    assert_eq!(diags.len(), 1, "diagnostics were: {diags:?}");
    assert_eq!(diags[0].code, "missing-link-target");
    assert_eq!(diags[0].range.start, Position::new(6, 22));

    // dropping the target-id makes it a whole-page self-link, which is fine
    fixture.write(
        "modules/m2/index.cnxml",
        &page_content(&uuid2, "Forces", "    <para id=\"p1\">see <link/></para>"),
    );
    manager
        .process_filesystem_change(FileEvent {
            kind: FileChangeType::Changed,
            uri: m2.clone(),
        })
        .await;
    manager.job_runner().done().await.unwrap();
    assert!(sink.get(&m2).is_empty());
}

#[tokio::test]
async fn duplicate_uuid_flags_both_pages_and_clears_on_fix() {
    let fixture = BundleFixture::new();
    let shared = new_uuid();
    fixture.write(
        "META-INF/books.xml",
        &manifest_content(&["physics.collection.xml"]),
    );
    fixture.write(
        "collections/physics.collection.xml",
        &book_content(
            "Physics",
            "physics",
            &format!("{}\n{}", module_entry("m1"), module_entry("m2")),
        ),
    );
    fixture.write("modules/m1/index.cnxml", &page_content(&shared, "One", ""));
    fixture.write("modules/m2/index.cnxml", &page_content(&shared, "Two", ""));

    let (manager, sink, bundle) = fixture.build();
    manager.perform_initial_validation();
    manager.job_runner().done().await.unwrap();

    let m1 = fixture.path("modules/m1/index.cnxml");
    let m2 = fixture.path("modules/m2/index.cnxml");
    for path in [&m1, &m2] {
        assert!(
            sink.get(path).iter().any(|d| d.code == "duplicate-uuid"),
            "expected duplicate-uuid on {path}"
        );
    }

    // fix one page; both clear on revalidation
    fixture.write("modules/m2/index.cnxml", &page_content(&new_uuid(), "Two", ""));
    manager
        .process_filesystem_change(FileEvent {
            kind: FileChangeType::Changed,
            uri: m2.clone(),
        })
        .await;
    manager.job_runner().done().await.unwrap();
    assert!(sink.get(&m2).iter().all(|d| d.code != "duplicate-uuid"));

    let m1_node = bundle.pages().get(&m1).map(AnyNode::Page).unwrap();
    manager.send_file_diagnostics(&m1_node);
    manager.job_runner().done().await.unwrap();
    assert!(sink.get(&m1).iter().all(|d| d.code != "duplicate-uuid"));
}

#[tokio::test]
async fn directory_deletion_respects_the_separator_boundary() {
    let fixture = BundleFixture::new();
    fixture.write(
        "META-INF/books.xml",
        &manifest_content(&["physics.collection.xml"]),
    );
    fixture.write(
        "collections/physics.collection.xml",
        &book_content(
            "Physics",
            "physics",
            &format!("{}\n{}", module_entry("m1"), module_entry("m10")),
        ),
    );
    fixture.write("modules/m1/index.cnxml", &page_content(&new_uuid(), "One", ""));
    fixture.write("modules/m10/index.cnxml", &page_content(&new_uuid(), "Ten", ""));

    let (manager, _sink, bundle) = fixture.build();
    manager.perform_initial_validation();
    manager.job_runner().done().await.unwrap();

    fixture.delete("modules/m1");
    let removed = manager
        .process_filesystem_change(FileEvent {
            kind: FileChangeType::Deleted,
            uri: fixture.path("modules/m1"),
        })
        .await;

    let m1 = fixture.path("modules/m1/index.cnxml");
    let m10 = fixture.path("modules/m10/index.cnxml");
    assert_eq!(removed.len(), 1);
    let removed_node = removed.iter().next().unwrap();
    assert_eq!(removed_node.abs_path(), m1);
    // removed nodes are marked absent, not left dangling
    assert!(removed_node.fileish().is_loaded());
    assert!(!removed_node.fileish().exists());

    assert!(bundle.pages().get(&m1).is_none());
    let m10_node = bundle.pages().get(&m10).unwrap();
    assert!(m10_node.is_loaded() && m10_node.exists());
}

#[tokio::test]
async fn orphans_are_registered_without_loading() {
    let fixture = BundleFixture::new();
    write_standard_bundle(&fixture);
    fixture.write(
        "modules/m3/index.cnxml",
        &page_content(&new_uuid(), "Stray Page", ""),
    );
    fixture.write("media/extra.png", "not-really-a-png");

    let (manager, _sink, bundle, toc_sink) = fixture.build_with_toc_sink();
    manager.load_enough_for_orphans().await;

    let m3 = fixture.path("modules/m3/index.cnxml");
    let stray = bundle.pages().get(&m3).expect("registered");
    assert!(!stray.is_loaded(), "orphan scan must not load content");

    let orphan_paths: Vec<String> = manager
        .orphaned_pages()
        .iter()
        .map(|p| p.abs_path().to_string())
        .collect();
    assert_eq!(orphan_paths, vec![m3.clone()]);

    // the projection still shows a title, recovered by the text scan
    let toc = toc_sink.latest().expect("projection published");
    assert_eq!(toc.orphans.len(), 1);
    assert_eq!(toc.orphans[0].title, "Stray Page");
    assert_eq!(toc.orphans[0].module_id, "m3");
    assert_eq!(toc.books.len(), 1);
    assert_eq!(toc.books[0].title, "Physics");

    // loading everything makes the unreferenced image an orphan too
    manager.perform_initial_validation();
    manager.job_runner().done().await.unwrap();
    let orphaned_resources: Vec<String> = manager
        .orphaned_resources()
        .iter()
        .map(|r| r.abs_path().to_string())
        .collect();
    assert_eq!(orphaned_resources, vec![fixture.path("media/extra.png")]);
}

#[tokio::test]
async fn toc_notifications_fire_only_on_semantic_change() {
    let fixture = BundleFixture::new();
    let (_uuid1, uuid2) = write_standard_bundle(&fixture);
    let (manager, _sink, _bundle, toc_sink) = fixture.build_with_toc_sink();
    manager.load_enough_for_toc().await;

    let before = toc_sink.all().len();
    let m2 = fixture.path("modules/m2/index.cnxml");

    // rewriting a page without changing anything semantic: no notification
    fixture.write(
        "modules/m2/index.cnxml",
        &page_content(&uuid2, "Forces", "    <para id=\"para-1\">text</para>"),
    );
    manager
        .process_filesystem_change(FileEvent {
            kind: FileChangeType::Changed,
            uri: m2.clone(),
        })
        .await;
    manager.job_runner().done().await.unwrap();
    assert_eq!(toc_sink.all().len(), before);

    // a title change is semantic: exactly one more notification, version up
    fixture.write(
        "modules/m2/index.cnxml",
        &page_content(&uuid2, "Momentum", "    <para id=\"para-1\">text</para>"),
    );
    manager
        .process_filesystem_change(FileEvent {
            kind: FileChangeType::Changed,
            uri: m2.clone(),
        })
        .await;
    manager.job_runner().done().await.unwrap();
    let all = toc_sink.all();
    assert_eq!(all.len(), before + 1);
    let latest = all.last().unwrap();
    assert!(latest.version > 0);
    assert!(format!("{:?}", latest.books).contains("Momentum"));
}

#[tokio::test]
async fn first_page_of_a_subbook_should_be_an_introduction() {
    let fixture = BundleFixture::new();
    write_standard_bundle(&fixture);
    // m1 leads "Chapter 1" but is not marked introduction
    fixture.write(
        "modules/m1/index.cnxml",
        &page_content(&new_uuid(), "Opening", ""),
    );
    let (manager, sink, _bundle) = fixture.build();
    manager.perform_initial_validation();
    manager.job_runner().done().await.unwrap();

    let m1 = fixture.path("modules/m1/index.cnxml");
    let diags = sink.get(&m1);
    assert!(
        diags.iter().any(|d| d.code == "missing-introduction"),
        "diagnostics were: {diags:?}"
    );
    // the standard fixture's marked page reports nothing
    let fixture2 = BundleFixture::new();
    write_standard_bundle(&fixture2);
    let (manager2, sink2, _bundle2) = fixture2.build();
    manager2.perform_initial_validation();
    manager2.job_runner().done().await.unwrap();
    assert!(
        sink2
            .get(&fixture2.path("modules/m1/index.cnxml"))
            .iter()
            .all(|d| d.code != "missing-introduction")
    );
}

#[tokio::test]
async fn parse_fault_is_the_sole_finding_and_keeps_prior_state() {
    let fixture = BundleFixture::new();
    let (_uuid1, uuid2) = write_standard_bundle(&fixture);
    let (manager, sink, bundle) = fixture.build();
    manager.perform_initial_validation();
    manager.job_runner().done().await.unwrap();

    let m2 = fixture.path("modules/m2/index.cnxml");
    fixture.write("modules/m2/index.cnxml", "<document>\n  <broken\n");
    manager
        .process_filesystem_change(FileEvent {
            kind: FileChangeType::Changed,
            uri: m2.clone(),
        })
        .await;
    manager.job_runner().done().await.unwrap();

    let diags = sink.get(&m2);
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].code, "parse-fault");

    // the last good structural state survives for dependents
    let page = bundle.pages().get(&m2).unwrap();
    assert!(page.exists());
    assert_eq!(page.opt_title().as_deref(), Some("Forces"));

    // a successful re-parse clears the fault
    fixture.write(
        "modules/m2/index.cnxml",
        &page_content(&uuid2, "Forces", "    <para id=\"para-1\">text</para>"),
    );
    manager
        .process_filesystem_change(FileEvent {
            kind: FileChangeType::Changed,
            uri: m2.clone(),
        })
        .await;
    manager.job_runner().done().await.unwrap();
    assert!(sink.get(&m2).is_empty());
}

#[tokio::test]
async fn open_buffer_takes_precedence_over_disk() {
    let fixture = BundleFixture::new();
    write_standard_bundle(&fixture);
    let (manager, sink, _bundle) = fixture.build();
    manager.perform_initial_validation();
    manager.job_runner().done().await.unwrap();

    let m2 = fixture.path("modules/m2/index.cnxml");
    assert!(sink.get(&m2).is_empty());

    // the editor holds unsaved content with a bad uuid; disk is still fine
    manager.update_file_contents(&m2, &page_content("not-a-uuid", "Forces", ""));
    manager.job_runner().done().await.unwrap();
    assert!(sink.get(&m2).iter().any(|d| d.code == "malformed-uuid"));

    // closing the buffer and reloading from disk goes back to clean
    manager.close_document(&m2);
    manager
        .process_filesystem_change(FileEvent {
            kind: FileChangeType::Changed,
            uri: m2.clone(),
        })
        .await;
    manager.job_runner().done().await.unwrap();
    assert!(sink.get(&m2).is_empty());
}

#[tokio::test]
async fn resources_differing_only_by_case_collide() {
    let fixture = BundleFixture::new();
    write_standard_bundle(&fixture);
    fixture.write("media/diagram.png", "a");
    fixture.write("media/Diagram.png", "b");

    let (manager, sink, _bundle) = fixture.build();
    manager.load_enough_for_orphans().await;
    manager.perform_initial_validation();
    manager.job_runner().done().await.unwrap();

    for rel in ["media/diagram.png", "media/Diagram.png"] {
        let diags = sink.get(&fixture.path(rel));
        assert_eq!(diags.len(), 1, "on {rel}: {diags:?}");
        assert_eq!(diags[0].code, "duplicate-resource-path");
        assert_eq!(diags[0].range, NOWHERE);
    }
}

#[tokio::test]
async fn bundle_level_findings() {
    // empty manifest: no books declared
    let fixture = BundleFixture::new();
    fixture.write("META-INF/books.xml", &manifest_content(&[]));
    let (manager, sink, _bundle) = fixture.build();
    manager.perform_initial_validation();
    manager.job_runner().done().await.unwrap();
    let manifest = fixture.path("META-INF/books.xml");
    assert!(sink.get(&manifest).iter().any(|d| d.code == "no-books"));

    // a declared book that is absent on disk
    let fixture2 = BundleFixture::new();
    fixture2.write(
        "META-INF/books.xml",
        &manifest_content(&["ghost.collection.xml"]),
    );
    let (manager2, sink2, _bundle2) = fixture2.build();
    manager2.perform_initial_validation();
    manager2.job_runner().done().await.unwrap();
    let manifest2 = fixture2.path("META-INF/books.xml");
    assert!(
        sink2
            .get(&manifest2)
            .iter()
            .any(|d| d.code == "missing-book")
    );
}

#[tokio::test]
async fn book_reports_every_duplicate_occurrence() {
    let fixture = BundleFixture::new();
    fixture.write(
        "META-INF/books.xml",
        &manifest_content(&["physics.collection.xml"]),
    );
    let toc = format!(
        "{}\n{}\n{}\n{}",
        subbook_entry("Repeated", &module_entry("m1")),
        subbook_entry("Repeated", &module_entry("m2")),
        module_entry("m3"),
        module_entry("m3"),
    );
    fixture.write(
        "collections/physics.collection.xml",
        &book_content("Physics", "physics", &toc),
    );
    for id in ["m1", "m2", "m3"] {
        fixture.write(
            &format!("modules/{id}/index.cnxml"),
            &page_content_with_class(&new_uuid(), id, "", Some("introduction")),
        );
    }
    let (manager, sink, _bundle) = fixture.build();
    manager.perform_initial_validation();
    manager.job_runner().done().await.unwrap();

    let book = fixture.path("collections/physics.collection.xml");
    let diags = sink.get(&book);
    let title_dups = diags
        .iter()
        .filter(|d| d.code == "duplicate-subbook-title")
        .count();
    let page_dups = diags.iter().filter(|d| d.code == "duplicate-page").count();
    assert_eq!(title_dups, 2, "every occurrence reports: {diags:?}");
    assert_eq!(page_dups, 2, "every occurrence reports: {diags:?}");
}

#[tokio::test]
async fn missing_ids_are_warnings_with_the_definition_term_exemption() {
    let fixture = BundleFixture::new();
    write_standard_bundle(&fixture);
    fixture.write(
        "modules/m2/index.cnxml",
        &page_content(
            &new_uuid(),
            "Forces",
            "    <para>no id</para>\n    <definition id=\"d1\"><term>fine</term></definition>\n    <term>needs an id</term>",
        ),
    );
    let (manager, sink, _bundle) = fixture.build();
    manager.perform_initial_validation();
    manager.job_runner().done().await.unwrap();

    let diags = sink.get(&fixture.path("modules/m2/index.cnxml"));
    let missing: Vec<_> = diags
        .iter()
        .filter(|d| d.code == "missing-element-id")
        .collect();
    assert_eq!(missing.len(), 2, "diagnostics were: {diags:?}");
    assert!(missing.iter().all(|d| d.severity == bindery::Severity::Warning));
}

#[tokio::test]
async fn autocomplete_and_document_links_resolve_from_the_page() {
    let fixture = BundleFixture::new();
    write_standard_bundle(&fixture);
    let uuid2 = new_uuid();
    let m2_content = page_content(
        &uuid2,
        "Forces",
        "    <image src=\"../../media/one.png\"/>\n    <link document=\"m1\"/>\n    <link url=\"https://example.com/physics\"/>",
    );
    fixture.write("modules/m2/index.cnxml", &m2_content);
    fixture.write("media/one.png", "a");
    fixture.write("media/two.png", "b");

    let (manager, _sink, bundle) = fixture.build();
    manager.load_enough_for_orphans().await;
    manager.perform_initial_validation();
    manager.job_runner().done().await.unwrap();

    let m2 = fixture.path("modules/m2/index.cnxml");
    let page = bundle.pages().get(&m2).unwrap();

    let links = manager.document_links(&page);
    let targets: Vec<&str> = links.iter().map(|l| l.target.as_str()).collect();
    assert!(targets.contains(&"https://example.com/physics"));
    assert!(targets.contains(&fixture.path("modules/m1/index.cnxml").as_str()));

    // cursor inside the src="…" value of the image element
    manager.update_file_contents(&m2, &m2_content);
    manager.job_runner().done().await.unwrap();
    let completions = manager.autocomplete_resources(&page, Position::new(6, 20));
    let inserts: Vec<&str> = completions.iter().map(|c| c.insert_text.as_str()).collect();
    assert_eq!(inserts, vec!["../../media/two.png"]);
    assert_eq!(completions[0].replace_range.start, Position::new(6, 16));
    assert_eq!(completions[0].replace_range.end, Position::new(6, 35));
}
