//! Inline-or-spill decision for tool results.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::AppError;
use crate::output::paths::{validate_name, PathResolver};
use crate::output::tokens::TokenEstimator;
use crate::output::writer;

pub const DEFAULT_PROJECT: &str = "default";
const PREVIEW_SUFFIX: &str = "... [truncated]";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(AppError::Validation(format!(
                "Unsupported export format '{}'. Expected 'json' or 'csv'",
                other
            ))),
        }
    }
}

/// Returns results inline while they fit the safe token limit, otherwise
/// writes the complete payload to the project's exports folder and returns
/// a pointer with a bounded preview.
#[derive(Debug, Clone)]
pub struct ResultRouter {
    estimator: TokenEstimator,
    resolver: PathResolver,
    safe_limit: usize,
}

impl ResultRouter {
    pub fn new(estimator: TokenEstimator, resolver: PathResolver, safe_limit: usize) -> Self {
        Self {
            estimator,
            resolver,
            safe_limit,
        }
    }

    pub fn safe_limit(&self) -> usize {
        self.safe_limit
    }

    pub async fn route(
        &self,
        data: Value,
        project: Option<&str>,
        operation: &str,
        format: ExportFormat,
    ) -> Result<Value> {
        let token_count = self.estimator.estimate_structured(&data);
        if token_count <= self.safe_limit {
            return Ok(data);
        }

        let project = project.unwrap_or(DEFAULT_PROJECT);
        self.resolver
            .ensure_project_dir(project)
            .with_context(|| format!("Failed to prepare project '{}'", project))?;

        let format = match format {
            ExportFormat::Csv if writer::is_uniform_records(&data) => ExportFormat::Csv,
            _ => ExportFormat::Json,
        };
        let path = self.export_path(project, operation, format)?;

        match format {
            ExportFormat::Csv => {
                let rows: Vec<Map<String, Value>> = data
                    .as_array()
                    .map(|items| items.iter().filter_map(|v| v.as_object().cloned()).collect())
                    .unwrap_or_default();
                writer::write_csv(&rows, &path).await?;
            }
            ExportFormat::Json => {
                writer::write_json(&data, &path).await?;
            }
        }

        let record_count = data.as_array().map_or(1, Vec::len);
        tracing::info!(
            "Spilled {} result ({} tokens > {}) to {:?}",
            operation,
            token_count,
            self.safe_limit,
            path
        );

        let mut response = json!({
            "status": "truncated",
            "message": format!(
                "Result too large ({} tokens exceeds limit of {}). Full data saved to file.",
                token_count, self.safe_limit
            ),
            "file_path": path.to_string_lossy(),
            "format": format.extension(),
            "record_count": record_count,
            "token_count": token_count,
            "token_limit": self.safe_limit,
            "hint": format!(
                "Read {} for the complete {} record(s); the preview holds only the first part.",
                path.display(),
                record_count
            ),
        });

        let (preview, omitted) = self.preview(&data);
        if let Value::Object(fields) = &mut response {
            fields.insert("preview".to_string(), preview);
            if let Some(omitted) = omitted {
                fields.insert("preview_omitted_keys".to_string(), json!(omitted));
            }
        }
        Ok(response)
    }

    fn export_path(&self, project: &str, operation: &str, format: ExportFormat) -> Result<PathBuf> {
        let stem: String = operation
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let filename = format!(
            "{}_{}_{}.{}",
            stem,
            Utc::now().format("%Y%m%d_%H%M%S_%3f"),
            unique_suffix(),
            format.extension()
        );
        validate_name(&filename, "Filename")?;
        Ok(self.resolver.export_path(project, &filename)?)
    }

    /// Bounded excerpt of `data` costing at most half the safe limit.
    ///
    /// Arrays keep their longest prefix of whole elements that fits. Objects
    /// keep whole top-level entries in key order while they fit and report the
    /// keys left out. Scalars are text-truncated.
    pub fn preview(&self, data: &Value) -> (Value, Option<Vec<String>>) {
        let budget = self.safe_limit / 2;
        match data {
            Value::Array(items) => (Value::Array(self.array_prefix(items, budget)), None),
            Value::Object(fields) => {
                let mut kept = Map::new();
                let mut omitted = Vec::new();
                for (key, value) in fields {
                    kept.insert(key.clone(), value.clone());
                    if self.estimator.estimate_structured(&kept) > budget {
                        kept.remove(key);
                        omitted.push(key.clone());
                    }
                }
                (Value::Object(kept), Some(omitted))
            }
            Value::String(text) => (
                Value::String(self.estimator.truncate(text, budget, PREVIEW_SUFFIX)),
                None,
            ),
            other => {
                let text = other.to_string();
                (
                    Value::String(self.estimator.truncate(&text, budget, PREVIEW_SUFFIX)),
                    None,
                )
            }
        }
    }

    /// Longest prefix of whole elements whose serialized cost stays in budget.
    fn array_prefix(&self, items: &[Value], budget: usize) -> Vec<Value> {
        let fits = |n: usize| self.estimator.estimate_structured(&items[..n]) <= budget;

        // Binary search over the prefix length; cost grows with each element.
        let (mut lo, mut hi) = (0usize, items.len());
        while lo < hi {
            let mid = lo + (hi - lo).div_ceil(2);
            if fits(mid) {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        items[..lo].to_vec()
    }
}

/// Random tail of a v7 uuid; keeps same-millisecond spills from colliding.
fn unique_suffix() -> String {
    let id = uuid::Uuid::now_v7().simple().to_string();
    id[id.len() - 8..].to_string()
}
