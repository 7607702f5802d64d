use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::fs;
use tracing::info;

use matchmaker::db::{DatabaseConfig, MessageStore, PgStore, get_db_pool};
use matchmaker::models::{ChatMessage, DialogKey, UserId};
use matchmaker::utils;

/// Export one dialog's persisted message history to a JSON file
#[derive(Debug, Parser)]
#[command(name = "export-dialog")]
struct Args {
    /// One participant of the dialog
    #[arg(long)]
    user_a: UserId,

    /// The other participant
    #[arg(long)]
    user_b: UserId,

    /// Output directory for export files
    #[arg(long, short = 'o', default_value = "./dialog_exports")]
    output_dir: String,

    /// Messages fetched per query
    #[arg(long, default_value_t = 500)]
    batch: i64,
}

#[derive(Serialize)]
struct DialogExport {
    dialog: String,
    exported_at: chrono::DateTime<Utc>,
    last_sequence: u64,
    messages: Vec<ChatMessage>,
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::init_logging();
    let args = Args::parse();

    let key = DialogKey::new(args.user_a, args.user_b)
        .ok_or_else(|| anyhow::anyhow!("A dialog needs two different users"))?;

    let db_config = DatabaseConfig::from_env()?;
    let store = PgStore::new(get_db_pool(&db_config).await?);

    let last_sequence = store.last_sequence(key).await?;
    info!(dialog = %key, last_sequence, "Exporting dialog");

    let mut messages = Vec::new();
    let mut after = 0;
    loop {
        let batch = store.messages_after(key, after, args.batch.max(1)).await?;
        let Some(last) = batch.last() else {
            break;
        };
        after = last.sequence;
        messages.extend(batch);
    }

    fs::create_dir_all(&args.output_dir)?;
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let path = format!(
        "{}/dialog_{}_{}_{}.json",
        args.output_dir,
        key.lo(),
        key.hi(),
        timestamp
    );

    let export = DialogExport {
        dialog: key.to_string(),
        exported_at: Utc::now(),
        last_sequence,
        messages,
    };
    fs::write(&path, serde_json::to_string_pretty(&export)?)?;

    info!("Exported {} messages to {}", export.messages.len(), path);
    Ok(())
}
