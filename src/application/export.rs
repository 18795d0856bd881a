//! Static site export.
//!
//! Writes a self-hosting file tree for dumb static hosting: view pages,
//! print-ready pages, the combined print document, the asset bundle, and an
//! index. PDF is deliberately absent from this surface; static hosts get the
//! print pages and the browser's own print-to-PDF.

use std::{fs, path::PathBuf, sync::Arc};

use thiserror::Error;
use time::{OffsetDateTime, format_description::FormatItem, macros::format_description};
use tracing::info;

use crate::{
    application::{
        content::ContentStore,
        render::{RenderError, Renderer},
    },
    config::ExportSettings,
    infra::assets,
    presentation::views::{IndexEntry, StaticIndexTemplate},
};

use askama::Template;

const GENERATED_AT_FORMAT: &[FormatItem<'static>] =
    format_description!("[day]/[month]/[year] [hour]:[minute] UTC");

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("could not write static site: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("index template rendering failed: {0}")]
    Template(#[from] askama::Error),
}

pub struct ExportSummary {
    pub documents: usize,
    pub output_dir: PathBuf,
}

pub struct StaticExporter {
    renderer: Arc<Renderer>,
    settings: ExportSettings,
}

impl StaticExporter {
    pub fn new(renderer: Arc<Renderer>, settings: ExportSettings) -> Self {
        Self { renderer, settings }
    }

    /// Write the whole tree. The output directory is rebuilt from scratch so
    /// documents removed from the corpus do not linger as stale files.
    pub fn export(&self, store: &ContentStore) -> Result<ExportSummary, ExportError> {
        let root = &self.settings.output_dir;
        if root.exists() {
            fs::remove_dir_all(root)?;
        }
        fs::create_dir_all(root)?;

        assets::unpack_all(root)?;
        fs::create_dir_all(root.join("fiches"))?;
        fs::create_dir_all(root.join("print"))?;

        let documents = store.get_all_sorted();
        for document in &documents {
            let view = self.renderer.render_static_view(document)?;
            fs::write(root.join("fiches").join(format!("{}.html", document.slug)), view)?;

            let print = self.renderer.render_for_export(document)?;
            fs::write(root.join("print").join(format!("{}.html", document.slug)), print)?;
        }

        let combined = self.renderer.render_all_for_export(&documents)?;
        let combined_name = format!("{}.html", self.settings.combined_basename);
        fs::write(root.join("print").join(&combined_name), combined)?;

        let index = self.render_index(&documents, &combined_name)?;
        fs::write(root.join("index.html"), index)?;

        info!(
            target = "velin::export",
            documents = documents.len(),
            output_dir = %root.display(),
            "static site written"
        );

        Ok(ExportSummary {
            documents: documents.len(),
            output_dir: root.clone(),
        })
    }

    fn render_index(
        &self,
        documents: &[Arc<crate::domain::Document>],
        combined_name: &str,
    ) -> Result<String, ExportError> {
        let entries = documents
            .iter()
            .map(|document| IndexEntry {
                title: document.display_title().to_string(),
                view_href: format!("fiches/{}.html", document.slug),
                print_href: format!("print/{}.html", document.slug),
                pdf_href: None,
            })
            .collect();

        let generated_at = OffsetDateTime::now_utc()
            .format(GENERATED_AT_FORMAT)
            .unwrap_or_else(|_| "date inconnue".to_string());

        let template = StaticIndexTemplate {
            entries,
            combined_print_href: format!("print/{combined_name}"),
            generated_at,
        };
        Ok(template.render()?)
    }
}
