use crate::config::load_or_default;
use crate::storage::duckdb::DuckDbSink;
use crate::storage::traits::DetectionRecord;
use std::path::PathBuf;

/// Print the latest stored detections, newest first.
pub async fn recent(
    config_path: Option<PathBuf>,
    limit: usize,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_or_default(config_path.as_deref())?;

    let sink = DuckDbSink::open(&config.storage.path)?;
    sink.init_schema().await?;
    let records = sink.recent(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        println!("No detections stored in {}", config.storage.path.display());
    } else {
        print!("{}", render_table(&records));
    }

    Ok(())
}

fn render_table(records: &[DetectionRecord]) -> String {
    let mut out = format!(
        "{:>8}  {:<19}  {:>12}  {:>12}\n",
        "id", "time", "latitude", "longitude"
    );
    for record in records {
        out.push_str(&format!(
            "{:>8}  {:<19}  {:>12.6}  {:>12.6}\n",
            record.id,
            record.time.format("%Y-%m-%d %H:%M:%S"),
            record.latitude,
            record.longitude
        ));
    }
    out
}
