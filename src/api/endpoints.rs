//! Finnhub endpoints exposed as named operations.
//!
//! Each [`Endpoint`] maps loosely-typed tool parameters onto the query string
//! of one idempotent GET and, where a schema exists, validates the response.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::api::client::FinnhubClient;
use crate::api::schemas::{Candles, Quote};

#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    #[error("Missing required parameter '{0}'")]
    Missing(String),

    #[error("Invalid parameter '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    Text,
    Integer,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    /// Name accepted from callers.
    pub name: &'static str,
    /// Query-string key sent to Finnhub.
    pub wire: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<&'static str>,
}

const fn required(name: &'static str, wire: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name,
        wire,
        kind,
        required: true,
        default: None,
    }
}

const fn optional(name: &'static str, wire: &'static str, default: Option<&'static str>) -> ParamSpec {
    ParamSpec {
        name,
        wire,
        kind: ParamKind::Text,
        required: false,
        default,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponseShape {
    Raw,
    Quote,
    Candles,
}

#[derive(Debug)]
pub struct Endpoint {
    pub name: &'static str,
    pub path: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
    /// Forward parameters not listed in `params` verbatim.
    pub passthrough: bool,
    pub shape: ResponseShape,
}

pub const ENDPOINTS: &[Endpoint] = &[
    Endpoint {
        name: "quote",
        path: "/quote",
        description: "Real-time quote for a symbol",
        params: &[required("symbol", "symbol", ParamKind::Text)],
        passthrough: false,
        shape: ResponseShape::Quote,
    },
    Endpoint {
        name: "candles",
        path: "/stock/candle",
        description: "Historical OHLCV candles as one record per bar",
        params: &[
            required("symbol", "symbol", ParamKind::Text),
            required("resolution", "resolution", ParamKind::Text),
            required("from_timestamp", "from", ParamKind::Integer),
            required("to_timestamp", "to", ParamKind::Integer),
        ],
        passthrough: false,
        shape: ResponseShape::Candles,
    },
    Endpoint {
        name: "company_profile",
        path: "/stock/profile2",
        description: "Company profile",
        params: &[required("symbol", "symbol", ParamKind::Text)],
        passthrough: false,
        shape: ResponseShape::Raw,
    },
    Endpoint {
        name: "company_news",
        path: "/company-news",
        description: "Company news between two dates (YYYY-MM-DD)",
        params: &[
            required("symbol", "symbol", ParamKind::Text),
            required("from_date", "from", ParamKind::Text),
            required("to_date", "to", ParamKind::Text),
        ],
        passthrough: false,
        shape: ResponseShape::Raw,
    },
    Endpoint {
        name: "market_news",
        path: "/news",
        description: "Market news by category",
        params: &[optional("category", "category", Some("general"))],
        passthrough: false,
        shape: ResponseShape::Raw,
    },
    Endpoint {
        name: "market_status",
        path: "/stock/market-status",
        description: "Open/closed status of an exchange",
        params: &[optional("exchange", "exchange", Some("US"))],
        passthrough: false,
        shape: ResponseShape::Raw,
    },
    Endpoint {
        name: "symbol_search",
        path: "/search",
        description: "Search symbols by ticker or name",
        params: &[required("query", "q", ParamKind::Text)],
        passthrough: false,
        shape: ResponseShape::Raw,
    },
    Endpoint {
        name: "basic_financials",
        path: "/stock/metric",
        description: "Basic financial metrics",
        params: &[
            required("symbol", "symbol", ParamKind::Text),
            optional("metric", "metric", Some("all")),
        ],
        passthrough: false,
        shape: ResponseShape::Raw,
    },
    Endpoint {
        name: "insider_transactions",
        path: "/stock/insider-transactions",
        description: "Insider transactions",
        params: &[
            required("symbol", "symbol", ParamKind::Text),
            optional("from_date", "from", None),
            optional("to_date", "to", None),
        ],
        passthrough: false,
        shape: ResponseShape::Raw,
    },
    Endpoint {
        name: "earnings_calendar",
        path: "/calendar/earnings",
        description: "Earnings calendar",
        params: &[
            optional("from_date", "from", None),
            optional("to_date", "to", None),
            optional("symbol", "symbol", None),
        ],
        passthrough: false,
        shape: ResponseShape::Raw,
    },
    Endpoint {
        name: "technical_indicator",
        path: "/indicator",
        description: "Technical indicator values; extra parameters such as timeperiod are forwarded",
        params: &[
            required("symbol", "symbol", ParamKind::Text),
            required("resolution", "resolution", ParamKind::Text),
            required("from_timestamp", "from", ParamKind::Integer),
            required("to_timestamp", "to", ParamKind::Integer),
            required("indicator", "indicator", ParamKind::Text),
        ],
        passthrough: true,
        shape: ResponseShape::Raw,
    },
];

pub fn find(name: &str) -> Option<&'static Endpoint> {
    ENDPOINTS.iter().find(|e| e.name == name)
}

pub fn names() -> Vec<&'static str> {
    ENDPOINTS.iter().map(|e| e.name).collect()
}

/// Parameters consumed by the tool layer rather than the endpoint.
const RESERVED_PARAMS: [&str; 2] = ["project", "format"];

impl Endpoint {
    /// Translate caller parameters into the query string.
    pub fn query(&self, params: &Map<String, Value>) -> Result<Vec<(String, String)>, ParamError> {
        let mut query = Vec::new();

        for spec in self.params {
            let raw = params.get(spec.name).filter(|v| !v.is_null());
            let value = match (raw, spec.default) {
                (Some(value), _) => render(spec.name, spec.kind, value)?,
                (None, Some(default)) => default.to_string(),
                (None, None) if spec.required => {
                    return Err(ParamError::Missing(spec.name.to_string()))
                }
                (None, None) => continue,
            };
            query.push((spec.wire.to_string(), value));
        }

        if self.passthrough {
            for (key, value) in params {
                let known = self.params.iter().any(|s| s.name == key);
                if known || value.is_null() || RESERVED_PARAMS.contains(&key.as_str()) {
                    continue;
                }
                query.push((key.clone(), render(key, ParamKind::Text, value)?));
            }
        }

        Ok(query)
    }

    /// Call the endpoint and validate its response.
    pub async fn call(
        &self,
        client: &FinnhubClient,
        params: &Map<String, Value>,
    ) -> anyhow::Result<Value> {
        let query = self.query(params)?;
        let raw = client.get(self.path, &query).await?;

        let value = match self.shape {
            ResponseShape::Raw => raw,
            ResponseShape::Quote => serde_json::to_value(Quote::from_value(raw)?)?,
            ResponseShape::Candles => Value::Array(Candles::from_value(raw)?.into_records()),
        };
        Ok(value)
    }
}

fn render(name: &str, kind: ParamKind, value: &Value) -> Result<String, ParamError> {
    let invalid = |reason: &str| ParamError::Invalid {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    match kind {
        ParamKind::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .map(|i| i.to_string())
                .ok_or_else(|| invalid("expected an integer")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|i| i.to_string())
                .map_err(|_| invalid("expected an integer")),
            _ => Err(invalid("expected an integer")),
        },
        ParamKind::Text => match value {
            Value::String(s) if s.trim().is_empty() => Err(invalid("must not be empty")),
            Value::String(s) => Ok(s.trim().to_string()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(invalid("expected a string")),
        },
    }
}
