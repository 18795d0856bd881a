//! HTML rendering for fiches: live view pages, self-contained print pages,
//! and the combined print document.
//!
//! View rendering keeps assets as external links so the live server can cache
//! them. Export rendering inlines the stylesheet into the page, so a print
//! page stands alone once saved to disk or handed to the capture engine.

use std::sync::Arc;

use askama::Template;
use comrak::{Options, markdown_to_html as comrak_render};
use thiserror::Error;
use tracing::debug;

use crate::{
    domain::{Document, collation_key},
    infra::assets,
    presentation::views::{
        FicheTemplate, FicheView, PrintAllTemplate, PrintFicheTemplate, PrintSection,
    },
};

/// Expression the capture engine polls; print templates set the flag once
/// fonts are loaded and highlighting has run.
pub const PRINT_READY_EXPRESSION: &str = "window.__velinPrintReady === true";

/// Title of the combined print document.
pub const COMBINED_TITLE: &str = "Toutes les fiches NSI";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template rendering failed: {0}")]
    Template(#[from] askama::Error),
}

/// Convert markdown to an HTML fragment.
///
/// Tables, strikethrough and autolinks are on; raw HTML in the source is
/// passed through, the corpus is trusted input authored alongside the
/// service.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::default();
    options.extension.table = true;
    options.extension.strikethrough = true;
    options.extension.autolink = true;
    options.render.r#unsafe = true;

    comrak_render(markdown, &options)
}

/// Stateless document renderer over the embedded stylesheet.
pub struct Renderer {
    print_stylesheet: String,
}

impl Renderer {
    pub fn new() -> Arc<Self> {
        let print_stylesheet = rewrite_asset_paths(assets::fiche_stylesheet());
        debug!(
            target = "velin::render",
            stylesheet_bytes = print_stylesheet.len(),
            "renderer ready"
        );
        Arc::new(Self { print_stylesheet })
    }

    /// Live view page: external stylesheet, absolute asset paths.
    pub fn render_view(&self, document: &Document) -> Result<String, RenderError> {
        self.render_view_with_prefix(document, "/")
    }

    /// View page for the static tree: pages live one level below the asset
    /// directories, so references are relative.
    pub fn render_static_view(&self, document: &Document) -> Result<String, RenderError> {
        self.render_view_with_prefix(document, "../")
    }

    fn render_view_with_prefix(
        &self,
        document: &Document,
        asset_prefix: &str,
    ) -> Result<String, RenderError> {
        let template = FicheTemplate {
            view: FicheView {
                raw_title: document.title.clone(),
                heading: document.display_title().to_string(),
                footer: document.footer.clone(),
                body_html: document.body_html.clone(),
                asset_prefix: asset_prefix.to_string(),
            },
        };
        Ok(template.render()?)
    }

    /// Self-contained print page for one document: inlined stylesheet,
    /// on-screen print instructions, readiness signalling for capture.
    pub fn render_for_export(&self, document: &Document) -> Result<String, RenderError> {
        let template = PrintFicheTemplate {
            raw_title: document.title.clone(),
            heading: document.display_title().to_string(),
            footer: document.footer.clone(),
            body_html: document.body_html.clone(),
            stylesheet: self.print_stylesheet.clone(),
        };
        Ok(template.render()?)
    }

    /// Combined print document: every fiche in collation order, each followed
    /// by a forced page break so none starts mid-page.
    pub fn render_all_for_export(
        &self,
        documents: &[Arc<Document>],
    ) -> Result<String, RenderError> {
        let mut ordered: Vec<&Arc<Document>> = documents.iter().collect();
        ordered.sort_by_key(|document| collation_key(&document.title));

        let sections = ordered
            .into_iter()
            .map(|document| PrintSection {
                heading: document.display_title().to_string(),
                footer: document.footer.clone(),
                body_html: document.body_html.clone(),
            })
            .collect();

        let template = PrintAllTemplate {
            title: COMBINED_TITLE.to_string(),
            stylesheet: self.print_stylesheet.clone(),
            sections,
        };
        Ok(template.render()?)
    }
}

/// The stylesheet ships written for pages served next to the asset tree;
/// inlined into a print page, its relative references must become
/// site-absolute so the live server still resolves them.
fn rewrite_asset_paths(css: &str) -> String {
    css.replace("url(../", "url(/").replace("url('../", "url('/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(slug: &str, title: &str, footer: Option<&str>, body: &str) -> Arc<Document> {
        Arc::new(Document {
            slug: slug.to_string(),
            title: title.to_string(),
            footer: footer.map(str::to_string),
            body_html: markdown_to_html(body),
        })
    }

    #[test]
    fn markdown_supports_tables_and_code_fences() {
        let html = markdown_to_html("| a | b |\n|---|---|\n| 1 | 2 |\n\n```python\nx = 1\n```\n");
        assert!(html.contains("<table>"));
        assert!(html.contains("language-python"));
    }

    #[test]
    fn view_page_strips_site_prefix_in_heading_but_not_in_title() {
        let renderer = Renderer::new();
        let doc = document("listes", "Fiche NSI – Les listes", None, "Corps.");

        let html = renderer.render_view(&doc).unwrap();
        assert!(html.contains("<title>Fiche NSI – Les listes</title>"));
        assert!(html.contains("<h1>Les listes</h1>"));
    }

    #[test]
    fn view_page_links_assets_with_prefix() {
        let renderer = Renderer::new();
        let doc = document("listes", "Les listes", None, "Corps.");

        let live = renderer.render_view(&doc).unwrap();
        assert!(live.contains("href=\"/css/fiche.css\""));

        let exported = renderer.render_static_view(&doc).unwrap();
        assert!(exported.contains("href=\"../css/fiche.css\""));
    }

    #[test]
    fn export_page_is_self_contained() {
        let renderer = Renderer::new();
        let doc = document("boucles", "Les boucles", Some("Terminale NSI"), "Corps.");

        let html = renderer.render_for_export(&doc).unwrap();
        assert!(html.contains("<style>"));
        assert!(!html.contains("href=\"/css/fiche.css\""));
        assert!(html.contains("Instructions d'impression"));
        assert!(html.contains("__velinPrintReady"));
        assert!(html.contains("Terminale NSI"));
    }

    #[test]
    fn export_page_omits_footer_block_when_absent() {
        let renderer = Renderer::new();
        let doc = document("boucles", "Les boucles", None, "Corps.");

        let html = renderer.render_for_export(&doc).unwrap();
        assert!(!html.contains("class=\"footnote\""));
    }

    #[test]
    fn combined_export_breaks_after_every_document() {
        let renderer = Renderer::new();
        let docs = vec![
            document("a", "Avant", None, "Un."),
            document("b", "Base", None, "Deux."),
            document("c", "Cas", None, "Trois."),
        ];

        let html = renderer.render_all_for_export(&docs).unwrap();
        let breaks = html.matches("page-break-after: always").count();
        assert_eq!(breaks, docs.len());
    }

    #[test]
    fn combined_export_orders_by_accent_folded_title() {
        let renderer = Renderer::new();
        let docs = vec![
            document("fonctions", "Fonctions", None, "F."),
            document("echantillonnage", "Échantillonnage", None, "E."),
            document("dictionnaires", "Dictionnaires", None, "D."),
        ];

        let html = renderer.render_all_for_export(&docs).unwrap();
        let d = html.find("Dictionnaires").unwrap();
        let e = html.find("Échantillonnage").unwrap();
        let f = html.find("Fonctions").unwrap();
        assert!(d < e && e < f);
    }

    #[test]
    fn readiness_expression_matches_template_flag() {
        let renderer = Renderer::new();
        let doc = document("a", "A", None, "Corps.");

        let html = renderer.render_for_export(&doc).unwrap();
        assert!(html.contains("window.__velinPrintReady = true"));
        assert!(PRINT_READY_EXPRESSION.contains("__velinPrintReady"));
    }

    #[test]
    fn asset_paths_are_rewritten_for_inlining() {
        let css = "body { background: url(../img/grid.svg); }";
        assert_eq!(
            rewrite_asset_paths(css),
            "body { background: url(/img/grid.svg); }"
        );
    }
}
