use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::api::endpoints::{self, Endpoint, ParamError};
use crate::api::FinnhubClient;
use crate::daemon::worker::{BackgroundWorker, JobHandler};
use crate::models::JobParams;
use crate::output::{ExportFormat, ResultRouter};

/// Runs one Finnhub endpoint as a background job operation.
///
/// The endpoint's output goes through the [`ResultRouter`], so an oversized
/// job result is stored as a spill descriptor rather than the raw payload.
pub struct EndpointHandler {
    endpoint: &'static Endpoint,
    client: Arc<FinnhubClient>,
    router: ResultRouter,
}

impl EndpointHandler {
    pub fn new(endpoint: &'static Endpoint, client: Arc<FinnhubClient>, router: ResultRouter) -> Self {
        Self {
            endpoint,
            client,
            router,
        }
    }
}

#[async_trait]
impl JobHandler for EndpointHandler {
    async fn invoke(&self, params: JobParams) -> Result<Value> {
        let (project, format) = routing_options(&params)?;
        let data = self.endpoint.call(&self.client, &params).await?;
        let label = export_label(self.endpoint.name, &params);
        self.router
            .route(data, project.as_deref(), &label, format)
            .await
    }
}

/// Register every known endpoint as a worker operation.
pub async fn register_endpoints(
    worker: &BackgroundWorker,
    client: &Arc<FinnhubClient>,
    router: &ResultRouter,
) {
    for endpoint in endpoints::ENDPOINTS {
        let handler = EndpointHandler::new(endpoint, Arc::clone(client), router.clone());
        worker.register(endpoint.name, Arc::new(handler)).await;
    }
    tracing::debug!(
        "Registered {} endpoint operations",
        endpoints::ENDPOINTS.len()
    );
}

/// Read the `project` and `format` routing parameters.
pub fn routing_options(
    params: &Map<String, Value>,
) -> Result<(Option<String>, ExportFormat), ParamError> {
    let project = match params.get("project") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(_) => {
            return Err(ParamError::Invalid {
                name: "project".to_string(),
                reason: "expected a string".to_string(),
            })
        }
    };

    let format = match params.get("format") {
        None | Some(Value::Null) => ExportFormat::default(),
        Some(Value::String(s)) => s.parse().map_err(|_| ParamError::Invalid {
            name: "format".to_string(),
            reason: format!("unsupported export format '{}', expected json or csv", s),
        })?,
        Some(_) => {
            return Err(ParamError::Invalid {
                name: "format".to_string(),
                reason: "expected a string".to_string(),
            })
        }
    };

    Ok((project, format))
}

/// File-name stem for a spilled result, e.g. `candles_AAPL`.
pub fn export_label(operation: &str, params: &Map<String, Value>) -> String {
    match params.get("symbol").and_then(Value::as_str) {
        Some(symbol) if !symbol.trim().is_empty() => {
            let symbol: String = symbol
                .trim()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
                .collect();
            format!("{}_{}", operation, symbol)
        }
        _ => operation.to_string(),
    }
}
