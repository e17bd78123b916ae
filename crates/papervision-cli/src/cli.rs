use clap::{Parser, Subcommand};

/// OCR and summarize Paperless-NGX documents with a local vision model.
///
/// Configuration comes from environment variables (and a `.env` file in
/// the working directory): PAPERLESS_BASE_URL, PAPERLESS_TOKEN,
/// OLLAMA_BASE_URL, OLLAMA_MODEL, DATA_DIR, MAX_CONCURRENT_JOBS, ...
#[derive(Parser, Debug)]
#[command(name = "papervision", version, about)]
pub struct CliArgs {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Process one document and report the outcome
    Process {
        /// Paperless document id (auto-discovers the next unprocessed one if omitted)
        #[arg(long)]
        document_id: Option<u64>,
    },

    /// Show connectivity, configuration and recent results
    Status,

    /// List the jobs tracked by this process, newest first
    Jobs,

    /// Run the discovery loop until interrupted; prints the job table on exit
    Run {
        /// Do not start the background processor even if enabled
        #[arg(long)]
        no_background: bool,
    },
}
