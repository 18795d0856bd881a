mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware as axum_middleware,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use tracing::debug;

use crate::{
    application::{
        capture::{CaptureEngine, CaptureError},
        content::ContentStore,
        error::{AppError, ErrorReport},
        render::Renderer,
    },
    domain::{DomainError, ExportFormat, ExportJob, ExportScope},
    presentation::views::{
        CaptureFailedTemplate, IndexEntry, IndexTemplate, NotFoundTemplate,
        render_not_found_response, render_template_response,
    },
};

use self::middleware::log_responses;

#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<ContentStore>,
    pub renderer: Arc<Renderer>,
    pub engine: Arc<CaptureEngine>,
    pub public_base_url: String,
    pub combined_basename: String,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/fiches/all/print", get(all_print))
        .route("/fiches/all/pdf", get(all_pdf))
        .route("/fiches/{slug}", get(fiche_view))
        .route("/fiches/{slug}/print", get(fiche_print))
        .route("/fiches/{slug}/pdf", get(fiche_pdf))
        .route("/css/{*path}", get(crate::infra::assets::serve_css))
        .route("/js/{*path}", get(crate::infra::assets::serve_js))
        .fallback(not_found)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
}

async fn index(State(state): State<HttpState>) -> Response {
    let entries = state
        .store
        .get_all_sorted()
        .iter()
        .map(|document| IndexEntry {
            title: document.display_title().to_string(),
            view_href: format!("/fiches/{}", document.slug),
            print_href: format!("/fiches/{}/print", document.slug),
            pdf_href: Some(format!("/fiches/{}/pdf", document.slug)),
        })
        .collect();

    let template = IndexTemplate {
        entries,
        combined_print_href: "/fiches/all/print".to_string(),
        combined_pdf_href: Some("/fiches/all/pdf".to_string()),
    };
    render_template_response(template, StatusCode::OK)
}

async fn fiche_view(State(state): State<HttpState>, Path(slug): Path<String>) -> Response {
    let source = "infra::http::fiche_view";
    let document = match state.store.get_required(&slug) {
        Ok(document) => document,
        Err(err) => return not_found_page(source, &err),
    };

    match state.renderer.render_view(&document) {
        Ok(html) => html_response(html),
        Err(err) => app_failure_response(source, &AppError::from(err)),
    }
}

async fn fiche_print(State(state): State<HttpState>, Path(slug): Path<String>) -> Response {
    let job = ExportJob {
        scope: ExportScope::Single(slug),
        format: ExportFormat::Html,
    };
    export_response(&state, job, "infra::http::fiche_print").await
}

async fn all_print(State(state): State<HttpState>) -> Response {
    let job = ExportJob {
        scope: ExportScope::All,
        format: ExportFormat::Html,
    };
    export_response(&state, job, "infra::http::all_print").await
}

async fn fiche_pdf(State(state): State<HttpState>, Path(slug): Path<String>) -> Response {
    let job = ExportJob {
        scope: ExportScope::Single(slug),
        format: ExportFormat::Pdf,
    };
    export_response(&state, job, "infra::http::fiche_pdf").await
}

async fn all_pdf(State(state): State<HttpState>) -> Response {
    let job = ExportJob {
        scope: ExportScope::All,
        format: ExportFormat::Pdf,
    };
    export_response(&state, job, "infra::http::all_pdf").await
}

async fn not_found() -> Response {
    render_not_found_response("infra::http::fallback")
}

enum ExportPayload {
    Html(String),
    Pdf(Vec<u8>),
}

struct ExportTarget {
    print_path: String,
    pdf_filename: String,
}

/// Resolve an export job to its print-page path and download name.
fn export_target(job: &ExportJob, combined_basename: &str) -> ExportTarget {
    match &job.scope {
        ExportScope::Single(slug) => ExportTarget {
            print_path: format!("/fiches/{slug}/print"),
            pdf_filename: format!("fiche-nsi-{slug}.pdf"),
        },
        ExportScope::All => ExportTarget {
            print_path: "/fiches/all/print".to_string(),
            pdf_filename: format!("{combined_basename}.pdf"),
        },
    }
}

/// Shared dispatch for the four export routes: one job description in,
/// rendered HTML or captured PDF bytes out.
async fn run_export_job(state: &HttpState, job: &ExportJob) -> Result<ExportPayload, AppError> {
    match job.format {
        ExportFormat::Html => {
            let html = match &job.scope {
                ExportScope::Single(slug) => {
                    let document = state.store.get_required(slug)?;
                    state.renderer.render_for_export(&document)?
                }
                ExportScope::All => state
                    .renderer
                    .render_all_for_export(&state.store.get_all_sorted())?,
            };
            Ok(ExportPayload::Html(html))
        }
        ExportFormat::Pdf => {
            if let ExportScope::Single(slug) = &job.scope {
                state.store.get_required(slug)?;
            }
            let target = export_target(job, &state.combined_basename);
            let url = format!("{}{}", state.public_base_url, target.print_path);
            let bytes = state.engine.generate_pdf(&url, &target.pdf_filename).await?;
            Ok(ExportPayload::Pdf(bytes))
        }
    }
}

async fn export_response(state: &HttpState, job: ExportJob, source: &'static str) -> Response {
    let target = export_target(&job, &state.combined_basename);
    match run_export_job(state, &job).await {
        Ok(ExportPayload::Html(html)) => html_response(html),
        Ok(ExportPayload::Pdf(bytes)) => pdf_response(bytes, &target.pdf_filename),
        Err(AppError::Domain(err)) => not_found_page(source, &err),
        Err(AppError::Capture(err)) => capture_failure_response(source, err, &target.print_path),
        Err(err) => app_failure_response(source, &err),
    }
}

fn html_response(html: String) -> Response {
    axum::response::Html(html).into_response()
}

fn not_found_page(source: &'static str, error: &DomainError) -> Response {
    let mut response = render_template_response(NotFoundTemplate {}, StatusCode::NOT_FOUND);
    ErrorReport::from_error(source, StatusCode::NOT_FOUND, error).attach(&mut response);
    response
}

fn app_failure_response(source: &'static str, error: &AppError) -> Response {
    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        "La page n'a pas pu être générée.",
    )
        .into_response();
    ErrorReport::from_error(source, StatusCode::INTERNAL_SERVER_ERROR, error).attach(&mut response);
    response
}

fn pdf_response(bytes: Vec<u8>, filename: &str) -> Response {
    let len = bytes.len();
    let mut response = Response::new(Body::from(bytes));

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(CONTENT_DISPOSITION, value);
    }

    response
}

/// A degraded engine answers with the print page instead of an error: the
/// reader still gets something printable. Everything else is a real failure
/// and is reported as one, with a link to the same fallback.
fn capture_failure_response(source: &'static str, error: CaptureError, print_path: &str) -> Response {
    if error.is_unavailable() {
        debug!(
            target = "velin::http",
            print_path,
            "capture engine unavailable; redirecting to print fallback"
        );
        return Redirect::to(print_path).into_response();
    }

    let status = match error {
        CaptureError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let template = CaptureFailedTemplate {
        print_href: print_path.to_string(),
    };
    let mut response = render_template_response(template, status);
    ErrorReport::from_error(source, status, &error).attach(&mut response);
    response
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;
    use crate::config::{CaptureSettings, ContentSettings};

    async fn test_state() -> (tempfile::TempDir, HttpState) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("listes.md"),
            "---\ntitle: \"Fiche NSI – Les listes\"\n---\n# Les listes\n\nCorps.\n",
        )
        .unwrap();

        let store = ContentStore::load(&ContentSettings {
            directory: dir.path().to_path_buf(),
        })
        .await
        .unwrap();

        let capture = CaptureSettings {
            browser_path: Some(PathBuf::from("/nonexistent/chromium")),
            max_concurrent_captures: NonZeroUsize::new(1).unwrap(),
            navigation_timeout: Duration::from_secs(1),
            readiness_timeout: Duration::from_secs(1),
            readiness_poll_interval: Duration::from_millis(10),
            settle_delay: Duration::ZERO,
            total_deadline: None,
        };

        let state = HttpState {
            store: Arc::new(store),
            renderer: Renderer::new(),
            engine: Arc::new(CaptureEngine::new(capture)),
            public_base_url: "http://127.0.0.1:3000".to_string(),
            combined_basename: "toutes-les-fiches".to_string(),
        };
        (dir, state)
    }

    async fn send(state: HttpState, uri: &str) -> axum::http::Response<Body> {
        build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn index_lists_loaded_documents() {
        let (_dir, state) = test_state().await;
        let response = send(state, "/").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn view_route_serves_known_slug() {
        let (_dir, state) = test_state().await;
        let response = send(state, "/fiches/listes").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_slug_is_not_found() {
        let (_dir, state) = test_state().await;
        let response = send(state, "/fiches/inconnue").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn print_route_serves_self_contained_page() {
        let (_dir, state) = test_state().await;
        let response = send(state, "/fiches/listes/print").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn combined_print_route_is_reachable() {
        let (_dir, state) = test_state().await;
        let response = send(state, "/fiches/all/print").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn pdf_route_reports_unavailable_engine_before_init() {
        let (_dir, state) = test_state().await;
        let response = send(state, "/fiches/listes/pdf").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn pdf_route_redirects_to_print_when_degraded() {
        let (_dir, state) = test_state().await;
        state.engine.init().await;

        let response = send(state, "/fiches/listes/pdf").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(axum::http::header::LOCATION).unwrap(),
            "/fiches/listes/print"
        );
    }

    #[tokio::test]
    async fn pdf_route_for_unknown_slug_is_not_found() {
        let (_dir, state) = test_state().await;
        let response = send(state, "/fiches/inconnue/pdf").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn print_route_for_unknown_slug_is_not_found() {
        let (_dir, state) = test_state().await;
        let response = send(state, "/fiches/inconnue/print").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn export_target_derives_paths_and_filenames() {
        let single = ExportJob {
            scope: ExportScope::Single("boucles".to_string()),
            format: ExportFormat::Pdf,
        };
        let target = export_target(&single, "toutes-les-fiches");
        assert_eq!(target.print_path, "/fiches/boucles/print");
        assert_eq!(target.pdf_filename, "fiche-nsi-boucles.pdf");

        let all = ExportJob {
            scope: ExportScope::All,
            format: ExportFormat::Html,
        };
        let target = export_target(&all, "toutes-les-fiches");
        assert_eq!(target.print_path, "/fiches/all/print");
        assert_eq!(target.pdf_filename, "toutes-les-fiches.pdf");
    }

    #[tokio::test]
    async fn export_dispatch_renders_single_and_combined_pages() {
        let (_dir, state) = test_state().await;

        let single = ExportJob {
            scope: ExportScope::Single("listes".to_string()),
            format: ExportFormat::Html,
        };
        let Ok(ExportPayload::Html(page)) = run_export_job(&state, &single).await else {
            panic!("single HTML export must succeed");
        };
        assert!(page.contains("Les listes"));

        let combined = ExportJob {
            scope: ExportScope::All,
            format: ExportFormat::Html,
        };
        let Ok(ExportPayload::Html(page)) = run_export_job(&state, &combined).await else {
            panic!("combined HTML export must succeed");
        };
        assert!(page.contains("Toutes les fiches NSI"));

        let missing = ExportJob {
            scope: ExportScope::Single("inconnue".to_string()),
            format: ExportFormat::Pdf,
        };
        assert!(matches!(
            run_export_job(&state, &missing).await,
            Err(AppError::Domain(DomainError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn embedded_assets_are_served() {
        let (_dir, state) = test_state().await;
        let response = send(state, "/css/fiche.css").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(axum::http::header::CONTENT_TYPE)
                .unwrap(),
            "text/css"
        );
    }

    #[tokio::test]
    async fn unknown_route_falls_back_to_not_found_page() {
        let (_dir, state) = test_state().await;
        let response = send(state, "/apropos").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
