//! Dataset rows → export payload.
//!
//! Extraction lives outside this service: a [`DatasetSource`] yields JSON
//! rows and [`render`] serializes them in the destination's format.

use crate::adapter::Payload;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dataport::destination::{Destination, ExportFormat};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub type Row = Map<String, Value>;

/// Supplies the rows to export for a destination.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    async fn rows(&self, destination: &Destination) -> Result<Vec<Row>>;
}

/// Reads `<dir>/<owner_id>.json`, a JSON array of objects.
pub struct JsonDirectoryDataset {
    dir: PathBuf,
}

impl JsonDirectoryDataset {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, owner_id: &str) -> Result<PathBuf> {
        let valid = !owner_id.is_empty()
            && owner_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
            && !owner_id.starts_with('.');
        if !valid {
            bail!("Owner id '{}' cannot be mapped to a dataset file", owner_id);
        }
        Ok(self.dir.join(format!("{}.json", owner_id)))
    }
}

#[async_trait]
impl DatasetSource for JsonDirectoryDataset {
    async fn rows(&self, destination: &Destination) -> Result<Vec<Row>> {
        let path = self.path_for(&destination.user_id)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("No dataset available at {}", path.display()))?;
        let rows: Vec<Value> = serde_json::from_str(&content)
            .with_context(|| format!("Dataset {} is not a JSON array", path.display()))?;

        rows.into_iter()
            .enumerate()
            .map(|(i, row)| match row {
                Value::Object(map) => Ok(map),
                _ => Err(anyhow!("Dataset row {} in {} is not an object", i, path.display())),
            })
            .collect()
    }
}

/// Serializes rows in the requested format.
pub fn render(rows: &[Row], format: ExportFormat) -> Result<Payload> {
    let bytes = match format {
        ExportFormat::Csv => render_csv(rows)?,
        ExportFormat::Json => serde_json::to_vec(rows).context("Failed to serialize JSON export")?,
        ExportFormat::Parquet => bail!("Parquet export is not supported by this server; choose CSV or JSON"),
    };
    Ok(Payload { format, bytes })
}

/// Header is the union of row keys in first-seen order; absent cells are empty.
fn render_csv(rows: &[Row]) -> Result<Vec<u8>> {
    let mut header: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !header.contains(&key.as_str()) {
                header.push(key);
            }
        }
    }

    if header.is_empty() {
        return Ok(Vec::new());
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&header).context("Failed to write CSV header")?;
    for row in rows {
        let record: Vec<String> = header.iter().map(|key| cell(row.get(*key))).collect();
        writer.write_record(&record).context("Failed to write CSV row")?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush CSV export: {}", e))
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// `<slug of destination name>-<UTC timestamp>-<export id prefix>.<ext>`
///
/// The export id keeps names unique for exports started in the same second.
pub fn file_name(destination: &Destination, export_id: &str, now: DateTime<Utc>) -> String {
    let mut slug = String::new();
    for c in destination.name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "export" } else { slug };

    let suffix: String = export_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();

    format!(
        "{}-{}-{}.{}",
        slug,
        now.format("%Y%m%dT%H%M%SZ"),
        suffix,
        destination.export_format.extension()
    )
}
