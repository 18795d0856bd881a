//! In-memory store of the parsed document corpus.
//!
//! The corpus is loaded exactly once, before serving begins. A missing or
//! unreadable content directory is fatal; a single malformed file is logged
//! and skipped so the rest of the corpus still loads. No partial document is
//! ever stored.

use std::{collections::HashMap, path::Path, sync::Arc};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    application::render,
    config::ContentSettings,
    domain::{Document, DomainError},
    infra::error::InfraError,
};

const SOURCE_EXTENSION: &str = "md";
const MISSING_TITLE_PLACEHOLDER: &str = "Titre manquant";

/// Keyed, immutable collection of every document in the corpus.
pub struct ContentStore {
    documents: HashMap<String, Arc<Document>>,
}

/// Metadata header recognised at the top of a source file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FrontMatter {
    title: Option<String>,
    footer: Option<String>,
}

#[derive(Debug, Error)]
pub enum DocumentParseError {
    #[error("unreadable source file: {0}")]
    Read(#[from] std::io::Error),
    #[error("invalid metadata header: {0}")]
    Header(String),
    #[error("source filename has no usable stem")]
    Slug,
}

impl ContentStore {
    /// Scan the content directory and parse every eligible file.
    ///
    /// Fails only when the directory itself cannot be read; per-file
    /// failures are recovered locally by skipping the file.
    pub async fn load(settings: &ContentSettings) -> Result<Self, InfraError> {
        let directory = &settings.directory;
        let mut entries = tokio::fs::read_dir(directory)
            .await
            .map_err(|err| InfraError::content_source(directory.clone(), err.to_string()))?;

        let mut documents = HashMap::new();
        let mut skipped = 0usize;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| InfraError::content_source(directory.clone(), err.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SOURCE_EXTENSION) {
                continue;
            }

            match load_document(&path).await {
                Ok(document) => {
                    debug!(
                        target = "velin::content",
                        slug = %document.slug,
                        title = %document.title,
                        "document loaded"
                    );
                    documents.insert(document.slug.clone(), Arc::new(document));
                }
                Err(err) => {
                    warn!(
                        target = "velin::content",
                        path = %path.display(),
                        error = %err,
                        "skipping unparseable document"
                    );
                    skipped += 1;
                }
            }
        }

        info!(
            target = "velin::content",
            loaded = documents.len(),
            skipped,
            directory = %directory.display(),
            "content corpus loaded"
        );

        Ok(Self { documents })
    }

    /// Look a document up by slug. Unknown slugs are an absence, not an error.
    pub fn get(&self, slug: &str) -> Option<Arc<Document>> {
        self.documents.get(slug).cloned()
    }

    /// Like [`ContentStore::get`], but an unknown slug surfaces as the
    /// domain's not-found error for callers that must report the outcome.
    pub fn get_required(&self, slug: &str) -> Result<Arc<Document>, DomainError> {
        self.get(slug).ok_or_else(|| DomainError::not_found(slug))
    }

    /// All documents ordered by title under accent-folding collation.
    pub fn get_all_sorted(&self) -> Vec<Arc<Document>> {
        let mut documents: Vec<_> = self.documents.values().cloned().collect();
        documents.sort_by_key(|doc| doc.collation_key());
        documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

async fn load_document(path: &Path) -> Result<Document, DocumentParseError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let slug = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or(DocumentParseError::Slug)?;

    parse_document(slug, &raw)
}

/// Parse one source file: optional `---`-delimited YAML header, then a
/// markdown body converted to HTML exactly once, at load time.
fn parse_document(slug: String, raw: &str) -> Result<Document, DocumentParseError> {
    let (header, body) = split_front_matter(raw);

    let meta: FrontMatter = match header {
        Some(header) => serde_yaml::from_str(header)
            .map_err(|err| DocumentParseError::Header(err.to_string()))?,
        None => FrontMatter::default(),
    };

    Ok(Document {
        slug,
        title: meta
            .title
            .unwrap_or_else(|| MISSING_TITLE_PLACEHOLDER.to_string()),
        footer: meta.footer.filter(|footer| !footer.trim().is_empty()),
        body_html: render::markdown_to_html(body),
    })
}

/// Split the leading front-matter block off, if present. The opening
/// delimiter must be the very first line; files without one are all body.
fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let Some(after_open) = raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))
    else {
        return (None, raw);
    };

    match after_open.find("\n---") {
        Some(close) => {
            let header = &after_open[..close];
            let rest = &after_open[close + 1..];
            let body = match rest.find('\n') {
                Some(newline) => &rest[newline + 1..],
                None => "",
            };
            (Some(header), body)
        }
        None => (None, raw),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    async fn store_from(files: &[(&str, &str)]) -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().expect("create tempdir");
        for (name, contents) in files {
            std::fs::write(dir.path().join(name), contents).expect("write fixture");
        }
        let settings = ContentSettings {
            directory: dir.path().to_path_buf(),
        };
        let store = ContentStore::load(&settings).await.expect("load corpus");
        (dir, store)
    }

    #[tokio::test]
    async fn slugs_are_filename_stems() {
        let (_dir, store) = store_from(&[
            ("listes.md", "---\ntitle: \"Fiche NSI – Listes\"\n---\nCorps."),
            ("boucles.md", "---\ntitle: \"Fiche NSI – Boucles\"\n---\nCorps."),
        ])
        .await;

        assert_eq!(store.len(), 2);
        assert!(store.get("listes").is_some());
        assert!(store.get("boucles").is_some());
        assert!(store.get("inconnue").is_none());
    }

    #[tokio::test]
    async fn get_required_reports_unknown_slugs() {
        let (_dir, store) =
            store_from(&[("listes.md", "---\ntitle: \"Fiche NSI – Listes\"\n---\nCorps.")]).await;

        assert!(store.get_required("listes").is_ok());
        assert!(matches!(
            store.get_required("inconnue"),
            Err(DomainError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn missing_title_gets_placeholder() {
        let (_dir, store) = store_from(&[("sans-titre.md", "---\nfooter: \"CC0\"\n---\nCorps.")])
            .await;

        let doc = store.get("sans-titre").expect("document loads");
        assert_eq!(doc.title, "Titre manquant");
        assert_eq!(doc.footer.as_deref(), Some("CC0"));
    }

    #[tokio::test]
    async fn file_without_front_matter_is_all_body() {
        let (_dir, store) = store_from(&[("brut.md", "# Un titre\n\nDu texte.")]).await;

        let doc = store.get("brut").expect("document loads");
        assert_eq!(doc.title, "Titre manquant");
        assert!(doc.body_html.contains("<h1>"));
        assert!(doc.body_html.contains("Du texte."));
    }

    #[tokio::test]
    async fn malformed_header_is_skipped_not_fatal() {
        let (_dir, store) = store_from(&[
            ("bonne.md", "---\ntitle: \"Fiche NSI – Graphes\"\n---\nCorps."),
            ("cassee.md", "---\ntitle: [unclosed\n---\nCorps."),
        ])
        .await;

        assert_eq!(store.len(), 1);
        assert!(store.get("bonne").is_some());
        assert!(store.get("cassee").is_none());
    }

    #[tokio::test]
    async fn non_markdown_files_are_ignored() {
        let (_dir, store) = store_from(&[
            ("fiche.md", "---\ntitle: \"Fiche NSI – Tris\"\n---\nCorps."),
            ("notes.txt", "pas une fiche"),
        ])
        .await;

        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn sorted_listing_uses_locale_collation() {
        let (_dir, store) = store_from(&[
            ("e.md", "---\ntitle: \"Fiche NSI – Échantillonnage\"\n---\n."),
            ("d.md", "---\ntitle: \"Fiche NSI – Dictionnaires\"\n---\n."),
            ("f.md", "---\ntitle: \"Fiche NSI – Fonctions\"\n---\n."),
        ])
        .await;

        let titles: Vec<_> = store
            .get_all_sorted()
            .iter()
            .map(|doc| doc.display_title().to_string())
            .collect();
        assert_eq!(titles, ["Dictionnaires", "Échantillonnage", "Fonctions"]);
    }

    #[tokio::test]
    async fn missing_directory_is_fatal() {
        let settings = ContentSettings {
            directory: PathBuf::from("/nonexistent/velin-content"),
        };

        assert!(matches!(
            ContentStore::load(&settings).await,
            Err(InfraError::ContentSource { .. })
        ));
    }

    #[test]
    fn front_matter_split_handles_crlf() {
        let raw = "---\r\ntitle: \"T\"\r\n---\r\nBody";
        let (header, body) = split_front_matter(raw);
        assert!(header.expect("header present").contains("title"));
        assert_eq!(body, "Body");
    }
}
