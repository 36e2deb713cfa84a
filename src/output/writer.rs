use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};

/// True for a non-empty array whose elements are objects sharing one key set.
pub fn is_uniform_records(data: &Value) -> bool {
    let Some(items) = data.as_array() else {
        return false;
    };
    let Some(first) = items.first().and_then(Value::as_object) else {
        return false;
    };
    items.iter().all(|item| match item.as_object() {
        Some(obj) => obj.len() == first.len() && obj.keys().all(|k| first.contains_key(k)),
        None => false,
    })
}

/// Render object rows as CSV. The header is the union of keys in first-seen
/// order; nested values are written as compact JSON.
pub fn records_to_csv(rows: &[Map<String, Value>]) -> Result<String> {
    let mut headers: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !headers.contains(&key.as_str()) {
                headers.push(key);
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&headers)?;
    for row in rows {
        let record: Vec<String> = headers
            .iter()
            .map(|h| row.get(*h).map(cell).unwrap_or_default())
            .collect();
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV buffer: {}", e.error()))?;
    String::from_utf8(bytes).context("CSV output was not valid UTF-8")
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested => nested.to_string(),
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    Ok(())
}

/// Write to `<path>.tmp`, then rename into place. Readers never observe a
/// partial file; the temporary is removed when either step fails.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let written: Result<()> = async {
        tokio::fs::write(&tmp_path, bytes)
            .await
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("Failed to move export into place at {:?}", path))?;
        Ok(())
    }
    .await;

    if written.is_err() {
        if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {:?}: {}", tmp_path, e);
            }
        }
    }
    written
}

/// Write `data` as pretty JSON, creating parent directories.
pub async fn write_json(data: &Value, path: &Path) -> Result<u64> {
    ensure_parent(path).await?;
    let json = serde_json::to_string_pretty(data).context("Failed to serialize export")?;
    write_atomic(path, json.as_bytes()).await?;
    Ok(json.len() as u64)
}

pub async fn write_csv(rows: &[Map<String, Value>], path: &Path) -> Result<u64> {
    ensure_parent(path).await?;
    let csv = records_to_csv(rows)?;
    write_atomic(path, csv.as_bytes()).await?;
    Ok(csv.len() as u64)
}
