use anyhow::Context;
use std::path::PathBuf;

use kassa_core::RawRecord;
use kassa_import::model::{DisabledModel, HttpModelClient, DEFAULT_TIMEOUT};

mod jobs;
mod pipeline;

use jobs::JobTracker;
use pipeline::ImportPipeline;

/// Model endpoint, optional. When unset the cascade stops after the mined
/// stage and unresolved rows go to review.
const MODEL_URL_VAR: &str = "KASSA_MODEL_URL";
const USER_VAR: &str = "KASSA_USER";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let records_path: PathBuf = std::env::args_os()
        .nth(1)
        .context("Usage: kassa <records.json>")?
        .into();

    let user_id: i64 = match std::env::var(USER_VAR) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{USER_VAR} must be an integer, got '{raw}'"))?,
        Err(_) => 1,
    };

    let dirs = directories::ProjectDirs::from("fi", "kassa", "kassa")
        .context("Could not determine a data directory")?;
    let data_dir = dirs.data_dir();
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Could not create {}", data_dir.display()))?;
    let db = kassa_storage::create_db(&data_dir.join("kassa.db")).await?;

    let raw = tokio::fs::read(&records_path)
        .await
        .with_context(|| format!("Could not read {}", records_path.display()))?;
    let records: Vec<RawRecord> =
        serde_json::from_slice(&raw).context("Records file is not valid JSON")?;

    let tracker = JobTracker::new();
    let outcome = match std::env::var(MODEL_URL_VAR) {
        Ok(url) => {
            let model = HttpModelClient::new(&url, DEFAULT_TIMEOUT)?;
            ImportPipeline::new(db, Some(model))
                .run(user_id, records, &tracker)
                .await?
        }
        Err(_) => ImportPipeline::<DisabledModel>::new(db, None)
            .run(user_id, records, &tracker)
            .await?,
    };

    println!("{}", serde_json::to_string_pretty(&outcome.summary)?);
    Ok(())
}
