mod cli;
mod report;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use papervision::{
    BackgroundProcessor, DocumentId, JobError, JobEvent, JobManager, JobState, OllamaClient,
    PaperlessClient, PapervisionError, Settings,
};

use crate::cli::{CliArgs, Command};

/// How long `run` waits for in-flight jobs to wind down after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn init_tracing(json: bool, debug: bool) -> Result<()> {
    tracing_log::LogTracer::init().context("failed to bridge log records")?;

    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().json()),
        )
    } else {
        tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().with_target(false)),
        )
    }
    .context("failed to install tracing subscriber")
}

fn build_manager(settings: &Settings) -> Result<JobManager> {
    let token = settings
        .paperless_token
        .as_ref()
        .context("PAPERLESS_TOKEN or PAPERLESS_TOKEN_FILE is required")?;

    let source = PaperlessClient::new(
        &settings.paperless_base_url,
        token,
        &settings.summarized_field,
    )?;
    let engine = OllamaClient::new(
        &settings.ollama_base_url,
        &settings.ollama_model,
        settings.job_timeout,
    )?
    .with_render_options(settings.render);

    Ok(JobManager::new(
        Arc::new(source),
        Arc::new(engine),
        settings.manager_config(),
    ))
}

fn print_event(event: &JobEvent) {
    let time = event.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S");
    match &event.error {
        Some(error) => println!("[{}] {:<11} {} ({})", time, event.state, event.message, error),
        None => println!("[{}] {:<11} {}", time, event.state, event.message),
    }
}

async fn process(manager: &JobManager, document_id: Option<u64>) -> Result<()> {
    let mut events = manager.subscribe();

    let record = match manager
        .submit(document_id.map(DocumentId), document_id.is_none())
        .await
    {
        Ok(record) => record,
        Err(PapervisionError::Job(JobError::NoCandidate)) => {
            println!("No unprocessed documents found");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let id = record.document_id;
    println!("Processing document {}", id);

    let wait = manager.wait(id);
    tokio::pin!(wait);
    let finished = loop {
        tokio::select! {
            result = &mut wait => break result?,
            Ok(event) = events.recv() => {
                if event.document_id == id {
                    print_event(&event);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted, cancelling job for document {}", id);
                manager.cancel(id)?;
            }
        }
    };

    match finished.state {
        JobState::Completed => {
            if let (Some(ocr), Some(summary)) = (&finished.ocr_path, &finished.summary_path) {
                println!("OCR text:  {}", ocr.display());
                println!("Summary:   {}", summary.display());
            }
            if let Some(summary) = &finished.summary_text {
                println!("\n{}", summary);
            }
            Ok(())
        }
        _ => bail!(
            "Job for document {} ended {}: {}",
            id,
            finished.state,
            finished.status_description()
        ),
    }
}

async fn status(manager: &JobManager, settings: &Settings) -> Result<()> {
    let health = manager.health().await;
    let results = manager.results().clone();
    let stored = tokio::task::spawn_blocking(move || results.stored_documents())
        .await
        .context("result scan task failed")??;

    let report = serde_json::json!({
        "health": health,
        "config": settings.redacted_summary(),
        "results": {
            "count": stored.len(),
            "documents": stored,
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !health.healthy {
        bail!("one or more services are unreachable");
    }
    Ok(())
}

async fn run(manager: JobManager, settings: &Settings, no_background: bool) -> Result<()> {
    let health = manager.health().await;
    if !health.source_connected {
        warn!("Paperless is not reachable at {}", settings.paperless_base_url);
    }
    if !health.inference_connected {
        warn!("Ollama is not reachable at {}", settings.ollama_base_url);
    }

    let processor = BackgroundProcessor::new(manager.clone(), settings.background_config());
    let handle = if settings.start_background_processor && !no_background {
        processor.start()
    } else {
        info!("Background processor disabled");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    if let Some(handle) = handle {
        processor.stop();
        if let Err(e) = handle.await {
            warn!("Background processor task ended abnormally: {}", e);
        }
    }

    manager.shutdown();
    if tokio::time::timeout(SHUTDOWN_GRACE, manager.wait_idle())
        .await
        .is_err()
    {
        warn!(
            "{} job(s) still running after {}s, exiting anyway",
            manager.active_count(),
            SHUTDOWN_GRACE.as_secs()
        );
    }

    print!("{}", report::jobs_table(manager.list().collect()));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    papervision::load_dotenv();
    let settings = Settings::from_env().context("failed to read configuration")?;
    init_tracing(args.log_json, settings.debug)?;

    settings.validate()?;
    settings.log_summary();

    let manager = build_manager(&settings)?;

    match args.command {
        Command::Process { document_id } => process(&manager, document_id).await,
        Command::Status => status(&manager, &settings).await,
        Command::Jobs => {
            print!("{}", report::jobs_table(manager.list().collect()));
            Ok(())
        }
        Command::Run { no_background } => run(manager, &settings, no_background).await,
    }
}
