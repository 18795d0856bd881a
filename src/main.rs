use std::{process, sync::Arc};

use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use velin::{
    application::{
        capture::CaptureEngine,
        content::ContentStore,
        error::AppError,
        export::StaticExporter,
        render::Renderer,
    },
    config,
    infra::{error::InfraError, http, telemetry},
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::ExportSite(_) => run_export_site(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = Arc::new(ContentStore::load(&settings.content).await?);
    if store.is_empty() {
        warn!(
            target = "velin::server",
            directory = %settings.content.directory.display(),
            "no documents in content directory; serving an empty index"
        );
    }

    let renderer = Renderer::new();
    let engine = Arc::new(CaptureEngine::new(settings.capture.clone()));
    engine.init().await;

    let state = http::HttpState {
        store,
        renderer,
        engine: engine.clone(),
        public_base_url: settings.server.public_base_url.clone(),
        combined_basename: settings.export.combined_basename.clone(),
    };
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "velin::server",
        addr = %settings.server.addr,
        base_url = %settings.server.public_base_url,
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    // Requests are drained by now; the browser is the last resource to go.
    if tokio::time::timeout(settings.server.graceful_shutdown, engine.close())
        .await
        .is_err()
    {
        warn!(
            target = "velin::server",
            "browser close exceeded the shutdown grace period"
        );
    }

    info!(target = "velin::server", "shutdown complete");
    Ok(())
}

/// The exporter deletes and recreates its output directory; refuse targets
/// that would take the source corpus with them.
fn ensure_export_output_is_safe(settings: &config::Settings) -> Result<(), AppError> {
    if settings.content.directory.starts_with(&settings.export.output_dir) {
        return Err(AppError::validation(format!(
            "export output directory `{}` would erase the content directory `{}`",
            settings.export.output_dir.display(),
            settings.content.directory.display()
        )));
    }
    Ok(())
}

async fn run_export_site(settings: config::Settings) -> Result<(), AppError> {
    ensure_export_output_is_safe(&settings)?;

    let store = ContentStore::load(&settings.content).await?;
    if store.is_empty() {
        warn!(
            target = "velin::export",
            directory = %settings.content.directory.display(),
            "no documents in content directory; exporting an empty site"
        );
    }

    let exporter = StaticExporter::new(Renderer::new(), settings.export.clone());
    let summary = exporter.export(&store)?;

    info!(
        target = "velin::export",
        documents = summary.documents,
        output_dir = %summary.output_dir.display(),
        "export completed"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "velin::server", error = %err, "could not install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target = "velin::server", error = %err, "could not install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(target = "velin::server", "shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroUsize, time::Duration};

    use tracing::level_filters::LevelFilter;

    use super::*;

    fn settings_with(content: &str, output: &str) -> config::Settings {
        config::Settings {
            server: config::ServerSettings {
                addr: "127.0.0.1:3000".parse().unwrap(),
                public_base_url: "http://127.0.0.1:3000".to_string(),
                graceful_shutdown: Duration::from_secs(5),
            },
            logging: config::LoggingSettings {
                level: LevelFilter::INFO,
                format: config::LogFormat::Compact,
            },
            content: config::ContentSettings {
                directory: content.into(),
            },
            capture: config::CaptureSettings {
                browser_path: None,
                max_concurrent_captures: NonZeroUsize::new(1).unwrap(),
                navigation_timeout: Duration::from_secs(1),
                readiness_timeout: Duration::from_secs(1),
                readiness_poll_interval: Duration::from_millis(10),
                settle_delay: Duration::ZERO,
                total_deadline: None,
            },
            export: config::ExportSettings {
                output_dir: output.into(),
                combined_basename: "toutes-les-fiches".to_string(),
            },
        }
    }

    #[test]
    fn export_into_content_directory_is_rejected() {
        let settings = settings_with("content", "content");
        assert!(matches!(
            ensure_export_output_is_safe(&settings),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn export_over_a_content_parent_is_rejected() {
        let settings = settings_with("data/content", "data");
        assert!(ensure_export_output_is_safe(&settings).is_err());
    }

    #[test]
    fn disjoint_export_target_is_accepted() {
        let settings = settings_with("content", "site");
        assert!(ensure_export_output_is_safe(&settings).is_ok());
    }
}
