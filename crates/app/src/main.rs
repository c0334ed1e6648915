use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use facture_core::{ExportRenderer, FactureConfig, InputFile, Session, SessionStatus};
use facture_ocr::{OcrBackend, SessionController};
use facture_pdf::PdfRenderer;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "facture", version, about = "Recognize a handwritten invoice and export it as PDF")]
struct Cli {
    /// Scan to recognize (png, jpg, tiff or bmp)
    image: PathBuf,
    /// Config file; defaults to facture.toml in the platform config directory
    #[arg(long)]
    config: Option<PathBuf>,
    /// Where to write the PDF; defaults to facture.pdf next to the image
    #[arg(long)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let controller = Arc::new(SessionController::new(backend(&config)?, config));

    // The engine is released whether or not the run succeeded.
    let result = run(&controller, &cli).await;
    controller.shutdown().await;
    result
}

async fn run(controller: &Arc<SessionController>, cli: &Cli) -> anyhow::Result<()> {
    let file = InputFile::read(&cli.image)
        .with_context(|| format!("Failed to read {}", cli.image.display()))?;

    let reporter = tokio::spawn(report_transitions(controller.subscribe()));
    let submitted = controller.submit(file).await;
    if submitted.is_err() {
        reporter.abort();
    }
    submitted.context("Upload rejected")?;
    // submit publishes the terminal transition before returning.
    if reporter.await.ok().flatten().is_none() {
        log_state(&controller.current_state());
    }

    let state = controller.current_state();
    if state.status != SessionStatus::Succeeded {
        bail!("OCR failed: {}", failure_reason(&state));
    }
    if let Some(text) = &state.extracted_text {
        println!("{text}");
    }

    let renderer = Arc::new(PdfRenderer::from_options(&controller.config().export));
    let out = output_path(&cli.image, cli.out.as_deref(), renderer.file_name());
    let pdf = controller.export(renderer).await?;
    tokio::fs::write(&out, pdf)
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;
    tracing::info!("PDF written to {}", out.display());
    Ok(())
}

/// Log every transition until the session ends; returns the last one seen.
async fn report_transitions(mut rx: broadcast::Receiver<Session>) -> Option<Session> {
    loop {
        match rx.recv().await {
            Ok(s) => {
                log_state(&s);
                if s.status.is_terminal() {
                    return Some(s);
                }
            }
            Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "Progress log fell behind"),
            Err(RecvError::Closed) => return None,
        }
    }
}

fn log_state(s: &Session) {
    let percent = s.progress.round() as u32;
    tracing::info!(status = %s.status, progress = percent, "{}", s.status_message);
}

fn failure_reason(state: &Session) -> String {
    match &state.error {
        Some(e) if e.is_retryable() => format!("{e} (submitting a clearer scan may help)"),
        Some(e) => e.to_string(),
        None => state.status.to_string(),
    }
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<FactureConfig> {
    if let Some(path) = explicit {
        return Ok(FactureConfig::load(path)?);
    }
    let default_path = directories::ProjectDirs::from("com", "facture", "Facture")
        .map(|dirs| dirs.config_dir().join("facture.toml"));
    match default_path {
        Some(path) if path.exists() => {
            tracing::info!("Loading config from {}", path.display());
            Ok(FactureConfig::load(&path)?)
        }
        _ => Ok(FactureConfig::default()),
    }
}

fn output_path(image: &Path, explicit: Option<&Path>, file_name: &str) -> PathBuf {
    explicit.map(Path::to_path_buf).unwrap_or_else(|| image.with_file_name(file_name))
}

#[cfg(feature = "tesseract")]
fn backend(config: &FactureConfig) -> anyhow::Result<Arc<dyn OcrBackend>> {
    let data_path = config.tessdata_path.as_ref().map(|p| p.display().to_string());
    Ok(Arc::new(facture_ocr::TesseractBackend::new(data_path, config.preprocess.clone())))
}

#[cfg(not(feature = "tesseract"))]
fn backend(_config: &FactureConfig) -> anyhow::Result<Arc<dyn OcrBackend>> {
    Err(facture_ocr::OcrError::NotAvailable.into())
}
