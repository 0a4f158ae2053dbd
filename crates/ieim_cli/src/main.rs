mod adapters;
mod bootstrap;
mod identity_config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;
use uuid::Uuid;

use ieim_common::config::{Config, ConfigError};
use ieim_pipeline::{orchestrator::review_required, run_pipeline_for_message, IngestRunner};

use adapters::{DirectoryMailAdapter, NullAvScanner};
use bootstrap::{read_attachments_index, read_normalized_message, write_attachments_index, BootstrapError, Runtime};

#[derive(Debug, Error)]
enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error("ingest error: {0}")]
    Ingest(#[from] ieim_pipeline::IngestError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] ieim_pipeline::PipelineError),
    #[error("reprocess error: {0}")]
    Reprocess(#[from] ieim_pipeline::ReprocessError),
    #[error("audit error: {0}")]
    Audit(#[from] ieim_audit::AuditLogError),
    #[error("serve error: {0}")]
    Serve(String),
}

impl CliError {
    /// Maps a failure to the documented exit code. Errors that reach
    /// here are all process-level failures, not decision outcomes:
    /// a fail-closed routing decision or a review requirement is a
    /// successful run and is coded from the command handlers instead.
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 10,
            CliError::Bootstrap(BootstrapError::UnknownMessage(_)) => 10,
            CliError::Audit(ieim_audit::AuditLogError::ChainBroken { .. })
            | CliError::Audit(ieim_audit::AuditLogError::HashMismatch { .. })
            | CliError::Audit(ieim_audit::AuditLogError::PathMismatch { .. }) => 60,
            _ => 1,
        }
    }
}

#[derive(Parser)]
#[command(name = "ieimctl", version, about = "Inbound email intake and routing engine control-plane utilities")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll a directory of `.eml` files as if it were a mailbox, normalize
    /// and process attachments for anything new, and persist the result.
    Ingest {
        #[arg(long)]
        repo_root: PathBuf,
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        pack_root: PathBuf,
        #[arg(long)]
        audit_root: PathBuf,
        #[arg(long)]
        mail_dir: PathBuf,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Run identity, classify, extract, route, case, and HITL for one
    /// already-ingested message.
    Process {
        #[arg(long)]
        repo_root: PathBuf,
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        pack_root: PathBuf,
        #[arg(long)]
        audit_root: PathBuf,
        #[arg(long)]
        message_id: Uuid,
    },

    /// Recompute identity, classify, and route for a historical message
    /// and compare the fresh decision hashes against what was recorded.
    Reprocess {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        pack_root: PathBuf,
        #[arg(long)]
        audit_root: PathBuf,
        #[arg(long)]
        message_id: Uuid,
        #[arg(long)]
        run_id: String,
    },

    /// Verify the hash chain of one message/run's audit log, or every
    /// audit log under `audit_root` when `--message-id` is omitted.
    VerifyAudit {
        #[arg(long)]
        audit_root: PathBuf,
        #[arg(long)]
        message_id: Option<Uuid>,
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Serve the review-queue HTTP API.
    Serve {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        pack_root: PathBuf,
        #[arg(long)]
        audit_root: PathBuf,
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

fn load_config(repo_root: &std::path::Path, config_path: &std::path::Path) -> Result<Config, CliError> {
    ieim_common::config::load_dotenv(repo_root);
    Ok(Config::load(config_path)?)
}

#[tokio::main]
async fn main() {
    let exit = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR: {e}");
            e.exit_code()
        }
    };
    std::process::exit(exit);
}

async fn run() -> Result<i32, CliError> {
    let args = Args::parse();
    match args.cmd {
        Command::Ingest { repo_root, config, pack_root, audit_root, mail_dir, limit } => {
            let _cfg = load_config(&repo_root, &config)?;
            let store = ieim_store::RawStore::new(&pack_root);
            let av_scanner = NullAvScanner;
            let runner = IngestRunner {
                pack_root: pack_root.clone(),
                audit_root: audit_root.clone(),
                store: &store,
                av_scanner: &av_scanner,
                ocr_processor: None,
                ingestion_source: "directory_mailbox",
            };
            let adapter = DirectoryMailAdapter::new(&mail_dir);
            let ingested_at = ieim_common::timestamp::format_utc(chrono::Utc::now());
            let report = runner.tick(&adapter, limit, &ingested_at).await?;

            for message in &report.ingested {
                write_attachments_index(&pack_root, message.normalized.message_id, &message.attachments)?;
                println!("ingested {} (run {})", message.normalized.message_id, message.normalized.run_id);
            }
            println!(
                "ingested={} skipped_duplicates={}",
                report.ingested.len(),
                report.skipped_duplicates
            );
            Ok(0)
        }

        Command::Process { repo_root, config, pack_root, audit_root, message_id } => {
            let cfg = load_config(&repo_root, &config)?;
            let runtime = Runtime::new(cfg, &pack_root);
            let deps = runtime.deps(&pack_root, &audit_root);

            let normalized = read_normalized_message(&pack_root, message_id)?;
            let attachments = read_attachments_index(&pack_root, message_id)?;
            let created_at = ieim_common::timestamp::format_utc(chrono::Utc::now());
            let call_date = created_at[..10].to_string();

            let result = run_pipeline_for_message(&deps, &normalized, &attachments, &created_at, &call_date, None, None).await?;

            println!("{}", serde_json::to_string_pretty(&result.routing)?);
            if let Some(path) = &result.review_item_path {
                println!("review item written to {}", path.display());
            }

            if result.routing.fail_closed {
                Ok(60)
            } else if review_required(&result.routing) {
                Ok(30)
            } else {
                Ok(0)
            }
        }

        Command::Reprocess { config, pack_root, audit_root, message_id, run_id } => {
            let cfg = Config::load(&config)?;
            let runtime = Runtime::new(cfg, &pack_root);
            let deps = runtime.deps(&pack_root, &audit_root);

            let historical_normalized = read_normalized_message(&pack_root, message_id)?;
            let attachments = read_attachments_index(&pack_root, message_id)?;
            let store = ieim_store::RawStore::new(&pack_root);
            let current_raw_mime = store.get(&historical_normalized.raw_mime_uri).map_err(ieim_pipeline::PipelineError::from)?;

            let mut historical_attachment_text_sha256 = std::collections::BTreeMap::new();
            for a in &attachments {
                historical_attachment_text_sha256.insert(a.attachment_id.clone(), a.extracted_text_sha256.clone());
            }

            let report = ieim_pipeline::reprocess_message(
                &deps,
                &historical_normalized,
                &current_raw_mime,
                &attachments,
                &historical_attachment_text_sha256,
                &run_id,
            )
            .await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.status == "OK" { 0 } else { 30 })
        }

        Command::VerifyAudit { audit_root, message_id, run_id } => {
            let mut paths = Vec::new();
            match (message_id, run_id) {
                (Some(mid), Some(rid)) => paths.push(ieim_audit::audit_file_path(&audit_root, mid, &rid)),
                _ => collect_audit_logs(&audit_root, &mut paths)?,
            }
            if paths.is_empty() {
                println!("no audit logs found under {}", audit_root.display());
                return Ok(0);
            }
            for path in &paths {
                let report = ieim_audit::verify_log(path)?;
                println!("{}: lines_checked={} final_hash={}", path.display(), report.lines_checked, report.final_hash);
            }
            Ok(0)
        }

        Command::Serve { config, pack_root, audit_root, bind } => {
            let cfg = Config::load(&config)?;
            let state = ieim_api::AppState::new(cfg, pack_root, audit_root);
            let router = ieim_api::build_router(state);
            let listener = tokio::net::TcpListener::bind(&bind).await?;
            println!("listening on {bind}");
            axum::serve(listener, router).await.map_err(|e| CliError::Serve(e.to_string()))?;
            Ok(0)
        }
    }
}

fn collect_audit_logs(dir: &std::path::Path, out: &mut Vec<PathBuf>) -> Result<(), CliError> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_audit_logs(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
            out.push(path);
        }
    }
    Ok(())
}
