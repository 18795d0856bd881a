//! PDF capture through one shared headless browser.
//!
//! The engine owns at most one browser for the whole process life. Every
//! capture request opens its own short-lived page context against that
//! shared browser; the browser itself is only torn down by [`CaptureEngine::close`]
//! during orderly shutdown. A host where the browser cannot launch (no
//! binary, sandboxed runner) degrades the engine instead of failing startup:
//! capture requests are then rejected with a distinct signal so callers can
//! fall back to print-ready HTML.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use headless_chrome::{Browser, LaunchOptions, Tab, types::PrintToPdfOptions};
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::application::render::PRINT_READY_EXPRESSION;
use crate::config::CaptureSettings;

const A4_WIDTH_INCHES: f64 = 8.27;
const A4_HEIGHT_INCHES: f64 = 11.69;

// headless_chrome tears an idle browser down after 30s by default, which
// would kill the shared instance between requests. Effectively disabled;
// kept finite because the transport adds it to `Instant::now()`.
const BROWSER_IDLE_TIMEOUT: Duration = Duration::from_secs(10_000_000);

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The browser never launched. Persistent for the rest of the process:
    /// callers should redirect to the print-HTML fallback.
    #[error("capture engine unavailable: browser failed to launch")]
    EngineUnavailable,
    /// The engine was never initialised, or has already been closed.
    #[error("capture engine is not initialized")]
    NotInitialized,
    #[error("navigation to `{url}` failed: {message}")]
    Navigation { url: String, message: String },
    #[error("page never signalled print readiness within {seconds}s")]
    Readiness { seconds: u64 },
    #[error("capture deadline of {seconds}s exceeded")]
    Deadline { seconds: u64 },
    #[error("pdf capture failed: {message}")]
    Capture { message: String },
}

impl CaptureError {
    fn navigation(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.into(),
            message: message.into(),
        }
    }

    fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
        }
    }

    /// True for the persistent launch-failure condition, the one case
    /// callers should answer with the HTML fallback instead of an error.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::EngineUnavailable)
    }
}

enum EngineState {
    Uninitialized,
    Ready(Browser),
    Degraded,
    Closed,
}

/// Shared-browser PDF capture engine.
pub struct CaptureEngine {
    state: RwLock<EngineState>,
    permits: Arc<Semaphore>,
    settings: CaptureSettings,
}

impl CaptureEngine {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            state: RwLock::new(EngineState::Uninitialized),
            permits: Arc::new(Semaphore::new(settings.max_concurrent_captures.get())),
            settings,
        }
    }

    /// Launch the shared browser. Idempotent; a launch failure leaves the
    /// engine Degraded rather than returning an error, so the rest of the
    /// service keeps running without PDF capture.
    pub async fn init(&self) {
        {
            let state = self.state.read().await;
            if !matches!(*state, EngineState::Uninitialized) {
                debug!(target = "velin::capture", "init called on initialised engine; ignoring");
                return;
            }
        }

        let browser_path = self.settings.browser_path.clone();
        let launched = tokio::task::spawn_blocking(move || launch_browser(browser_path)).await;

        let mut state = self.state.write().await;
        if !matches!(*state, EngineState::Uninitialized) {
            return;
        }

        match launched {
            Ok(Ok(browser)) => {
                info!(target = "velin::capture", "shared browser ready");
                *state = EngineState::Ready(browser);
            }
            Ok(Err(message)) => {
                warn!(
                    target = "velin::capture",
                    error = %message,
                    "browser failed to launch; PDF capture degraded to print-HTML fallback"
                );
                *state = EngineState::Degraded;
            }
            Err(join_error) => {
                warn!(
                    target = "velin::capture",
                    error = %join_error,
                    "browser launch task failed; PDF capture degraded to print-HTML fallback"
                );
                *state = EngineState::Degraded;
            }
        }
    }

    /// Capture the document served at `url` as PDF bytes.
    ///
    /// Opens exactly one page context against the shared browser, waits for
    /// navigation, font loading, and the page's own print-readiness flag,
    /// then snapshots a paginated, background-inclusive PDF. The context is
    /// closed on every exit path; the shared browser never is.
    pub async fn generate_pdf(&self, url: &str, filename: &str) -> Result<Vec<u8>, CaptureError> {
        let browser = {
            let state = self.state.read().await;
            match &*state {
                EngineState::Ready(browser) => browser.clone(),
                EngineState::Degraded => return Err(CaptureError::EngineUnavailable),
                EngineState::Uninitialized | EngineState::Closed => {
                    return Err(CaptureError::NotInitialized);
                }
            }
        };

        // Bounds simultaneous page contexts against the one browser; an
        // unbounded fan-out is a real capacity risk on small hosts.
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CaptureError::NotInitialized)?;

        info!(
            target = "velin::capture",
            url,
            filename,
            "starting pdf capture"
        );

        let options = CaptureOptions::from_settings(&self.settings);
        let target_url = url.to_string();
        let task = tokio::task::spawn_blocking(move || capture_page(&browser, &target_url, &options));

        let joined = match self.settings.total_deadline {
            Some(deadline) => match tokio::time::timeout(deadline, task).await {
                Ok(joined) => joined,
                // The blocking capture keeps running to completion; its page
                // guard still closes the context when it finishes.
                Err(_) => {
                    return Err(CaptureError::Deadline {
                        seconds: deadline.as_secs(),
                    });
                }
            },
            None => task.await,
        };

        let bytes = joined
            .map_err(|err| CaptureError::capture(format!("capture task failed: {err}")))??;

        info!(
            target = "velin::capture",
            filename,
            bytes = bytes.len(),
            "pdf capture finished"
        );
        Ok(bytes)
    }

    /// Tear the shared browser down. Called once, during orderly shutdown;
    /// after this every capture request is rejected as not initialised.
    pub async fn close(&self) {
        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, EngineState::Closed)
        };

        match previous {
            EngineState::Ready(browser) => {
                info!(target = "velin::capture", "closing shared browser");
                let _ = tokio::task::spawn_blocking(move || drop(browser)).await;
            }
            _ => {
                debug!(target = "velin::capture", "close called without a live browser");
            }
        }
    }

    #[cfg(test)]
    async fn open_page_contexts(&self) -> usize {
        match &*self.state.read().await {
            EngineState::Ready(browser) => browser
                .get_tabs()
                .lock()
                .map(|tabs| tabs.len())
                .unwrap_or(0),
            _ => 0,
        }
    }
}

struct CaptureOptions {
    navigation_timeout: Duration,
    readiness_timeout: Duration,
    readiness_poll_interval: Duration,
    settle_delay: Duration,
}

impl CaptureOptions {
    fn from_settings(settings: &CaptureSettings) -> Self {
        Self {
            navigation_timeout: settings.navigation_timeout,
            readiness_timeout: settings.readiness_timeout,
            readiness_poll_interval: settings.readiness_poll_interval,
            settle_delay: settings.settle_delay,
        }
    }
}

fn launch_browser(path: Option<PathBuf>) -> Result<Browser, String> {
    let mut builder = LaunchOptions::default_builder();
    builder
        .headless(true)
        .sandbox(false)
        .idle_browser_timeout(BROWSER_IDLE_TIMEOUT);
    if let Some(path) = path {
        builder.path(Some(path));
    }

    let options = builder.build().map_err(|err| err.to_string())?;
    Browser::new(options).map_err(|err| err.to_string())
}

fn capture_page(browser: &Browser, url: &str, options: &CaptureOptions) -> Result<Vec<u8>, CaptureError> {
    let tab = browser
        .new_tab()
        .map_err(|err| CaptureError::capture(format!("could not open page context: {err}")))?;
    let page = PageGuard::new(tab);
    let tab = page.tab();

    tab.set_default_timeout(options.navigation_timeout);

    tab.navigate_to(url)
        .and_then(|tab| tab.wait_until_navigated())
        .map_err(|err| CaptureError::navigation(url, err.to_string()))?;

    // Fonts first: the page only sets its readiness flag after highlighting,
    // which itself waits on `document.fonts.ready`.
    tab.evaluate("document.fonts.ready.then(() => true)", true)
        .map_err(|err| CaptureError::navigation(url, format!("font readiness wait failed: {err}")))?;

    wait_for_print_ready(tab, options)?;

    if !options.settle_delay.is_zero() {
        std::thread::sleep(options.settle_delay);
    }

    tab.print_to_pdf(Some(pdf_options()))
        .map_err(|err| CaptureError::capture(err.to_string()))
}

/// Poll the page's readiness flag until it flips or the ceiling expires.
/// A condition wait, never a fixed sleep; the optional settle delay layered
/// on top is a bounded grace margin, not the correctness mechanism.
fn wait_for_print_ready(tab: &Tab, options: &CaptureOptions) -> Result<(), CaptureError> {
    let deadline = Instant::now() + options.readiness_timeout;

    loop {
        let ready = tab
            .evaluate(PRINT_READY_EXPRESSION, false)
            .ok()
            .and_then(|object| object.value)
            .map(|value| value == serde_json::Value::Bool(true))
            .unwrap_or(false);

        if ready {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(CaptureError::Readiness {
                seconds: options.readiness_timeout.as_secs(),
            });
        }
        std::thread::sleep(options.readiness_poll_interval);
    }
}

fn pdf_options() -> PrintToPdfOptions {
    PrintToPdfOptions {
        print_background: Some(true),
        prefer_css_page_size: Some(true),
        paper_width: Some(A4_WIDTH_INCHES),
        paper_height: Some(A4_HEIGHT_INCHES),
        ..PrintToPdfOptions::default()
    }
}

/// Closes the page-level context on drop, whatever the capture outcome.
struct PageGuard {
    tab: Arc<Tab>,
}

impl PageGuard {
    fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }

    fn tab(&self) -> &Tab {
        &self.tab
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Err(err) = self.tab.close(true) {
            warn!(
                target = "velin::capture",
                error = %err,
                "failed to close page context"
            );
        }
    }
}
