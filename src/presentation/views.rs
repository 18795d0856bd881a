use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

use crate::application::error::{ErrorReport, HttpError};

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn render_not_found_response(source: &'static str) -> Response {
    let mut response = render_template_response(NotFoundTemplate {}, StatusCode::NOT_FOUND);
    ErrorReport::from_message(source, StatusCode::NOT_FOUND, "Resource not found")
        .attach(&mut response);
    response
}

/// One fiche as seen by the live and static view templates.
#[derive(Clone)]
pub struct FicheView {
    pub raw_title: String,
    pub heading: String,
    pub footer: Option<String>,
    pub body_html: String,
    pub asset_prefix: String,
}

#[derive(Template)]
#[template(path = "fiche.html")]
pub struct FicheTemplate {
    pub view: FicheView,
}

/// Index entry: one line per fiche with its view, print and PDF links.
#[derive(Clone)]
pub struct IndexEntry {
    pub title: String,
    pub view_href: String,
    pub print_href: String,
    pub pdf_href: Option<String>,
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub entries: Vec<IndexEntry>,
    pub combined_print_href: String,
    pub combined_pdf_href: Option<String>,
}

#[derive(Template)]
#[template(path = "print_fiche.html")]
pub struct PrintFicheTemplate {
    pub raw_title: String,
    pub heading: String,
    pub footer: Option<String>,
    pub body_html: String,
    pub stylesheet: String,
}

#[derive(Clone)]
pub struct PrintSection {
    pub heading: String,
    pub footer: Option<String>,
    pub body_html: String,
}

#[derive(Template)]
#[template(path = "print_all.html")]
pub struct PrintAllTemplate {
    pub title: String,
    pub stylesheet: String,
    pub sections: Vec<PrintSection>,
}

#[derive(Template)]
#[template(path = "static_index.html")]
pub struct StaticIndexTemplate {
    pub entries: Vec<IndexEntry>,
    pub combined_print_href: String,
    pub generated_at: String,
}

#[derive(Template)]
#[template(path = "not_found.html")]
pub struct NotFoundTemplate {}

/// Shown when a PDF capture fails for a transient reason; links the reader
/// to the print page so they can still save a PDF from the browser.
#[derive(Template)]
#[template(path = "capture_failed.html")]
pub struct CaptureFailedTemplate {
    pub print_href: String,
}
