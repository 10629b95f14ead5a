//! # bindery
//!
//! A live, incrementally validated in-memory model of textbook bundle
//! repositories: a bundle manifest declaring books, books declaring
//! tables of contents over pages, pages referencing each other and binary
//! resources. The model lazily parses only what a question needs, detects
//! structural errors (broken links, duplicate or malformed identifiers,
//! missing files), and publishes per-file diagnostics — re-validating no
//! more than necessary as the underlying filesystem changes.

pub mod book;
pub mod bundle;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod factory;
pub mod fileish;
pub mod job_runner;
pub mod location;
pub mod manager;
pub mod output;
pub mod page;
pub mod paths;
pub mod resource;
pub mod toc;
pub mod xml;

pub use book::{Book, BookTocNode};
pub use bundle::Bundle;
pub use cli::{Cli, Config, VerbosityLevel};
pub use config::{OutputFormat, Settings};
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticSink, Severity};
pub use error::{BinderyError, Result};
pub use factory::Factory;
pub use fileish::{
    AnyNode, Fileish, ModelError, NodeKind, ValidationCheck, ValidationKind, ValidationResponse,
};
pub use job_runner::{Job, JobContext, JobRunner};
pub use location::{NOWHERE, Position, Range, WithRange};
pub use manager::{
    DocumentLink, FileChangeType, FileEvent, ModelManager, ResourceCompletion,
};
pub use output::{FileReport, Output, ValidationReport};
pub use page::{Page, PageLink, ResourceLink, ResourceLinkKind, UNTITLED};
pub use paths::{PathHelper, PathShape, SlashPathHelper};
pub use resource::Resource;
pub use toc::{BookToc, PageSummary, TocEntry, TocNotification, TocSink};
