//! Velin: a small self-hosted publisher for study-sheet corpora.
//!
//! The corpus is loaded once at startup into an in-memory [`ContentStore`],
//! rendered on demand into interactive or self-contained print documents,
//! optionally captured to PDF through one shared headless-Chrome instance,
//! and exportable as a fully static file tree.
//!
//! [`ContentStore`]: application::content::ContentStore

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
