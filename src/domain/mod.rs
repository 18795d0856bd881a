//! Core entities: the study-sheet document and export request types.

pub mod error;

pub use error::DomainError;

use deunicode::deunicode;

/// Fixed label prefixing every sheet title in the corpus. Stripped from
/// visible headings; the raw title is kept in `<title>` and metadata.
pub const TITLE_PREFIX: &str = "Fiche NSI – ";

/// One parsed study sheet. Immutable after load; the collection is only
/// rebuilt wholesale on process restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Unique key, derived from the source filename stem.
    pub slug: String,
    /// Raw title from the metadata header, or a placeholder when absent.
    pub title: String,
    /// Optional footer line from the metadata header.
    pub footer: Option<String>,
    /// Body already converted from markdown to HTML at load time.
    pub body_html: String,
}

impl Document {
    /// Title shown as the visible heading: the fixed corpus prefix is
    /// stripped exactly once, everything else is kept verbatim.
    pub fn display_title(&self) -> &str {
        self.title.strip_prefix(TITLE_PREFIX).unwrap_or(&self.title)
    }

    /// Accent-folding sort key for locale-aware title ordering, so that
    /// `É` orders with `E` instead of after `Z`.
    pub fn collation_key(&self) -> String {
        collation_key(&self.title)
    }
}

/// Fold a title into a sort key: transliterate to ASCII, then lowercase.
pub fn collation_key(title: &str) -> String {
    deunicode(title).to_lowercase()
}

/// Which documents an export request covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportScope {
    /// A single document, by slug.
    Single(String),
    /// The whole corpus, combined into one output.
    All,
}

/// Output shape of an export request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Html,
    Pdf,
}

/// A requested export. A request description only, never persisted.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub scope: ExportScope,
    pub format: ExportFormat,
}
