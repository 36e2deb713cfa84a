//! Response validators for endpoints whose shape the router depends on.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Invalid {schema} response: {reason}")]
pub struct SchemaError {
    pub schema: &'static str,
    pub reason: String,
}

impl SchemaError {
    fn new(schema: &'static str, reason: impl Into<String>) -> Self {
        Self {
            schema,
            reason: reason.into(),
        }
    }
}

/// `/quote` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(rename = "c")]
    pub current: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "pc")]
    pub previous_close: f64,
    #[serde(rename = "d", default)]
    pub change: Option<f64>,
    #[serde(rename = "dp", default)]
    pub percent_change: Option<f64>,
    #[serde(rename = "t")]
    pub timestamp: i64,
}

impl Quote {
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        let quote: Quote =
            serde_json::from_value(value).map_err(|e| SchemaError::new("quote", e.to_string()))?;
        if quote.timestamp < 0 {
            return Err(SchemaError::new("quote", "timestamp must not be negative"));
        }
        if quote.high < quote.low {
            return Err(SchemaError::new(
                "quote",
                format!("high {} is below low {}", quote.high, quote.low),
            ));
        }
        Ok(quote)
    }
}

/// `/stock/candle` payload in Finnhub's column layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candles {
    pub s: String,
    #[serde(default)]
    pub c: Vec<f64>,
    #[serde(default)]
    pub h: Vec<f64>,
    #[serde(default)]
    pub l: Vec<f64>,
    #[serde(default)]
    pub o: Vec<f64>,
    #[serde(default)]
    pub v: Vec<f64>,
    #[serde(default)]
    pub t: Vec<i64>,
}

impl Candles {
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        let candles: Candles = serde_json::from_value(value)
            .map_err(|e| SchemaError::new("candles", e.to_string()))?;

        match candles.s.as_str() {
            "no_data" => Ok(candles),
            "ok" => {
                let n = candles.t.len();
                let columns = [
                    ("c", candles.c.len()),
                    ("h", candles.h.len()),
                    ("l", candles.l.len()),
                    ("o", candles.o.len()),
                    ("v", candles.v.len()),
                ];
                if let Some((name, len)) = columns.iter().find(|(_, len)| *len != n) {
                    return Err(SchemaError::new(
                        "candles",
                        format!("column '{}' has {} values, expected {}", name, len, n),
                    ));
                }
                Ok(candles)
            }
            other => Err(SchemaError::new(
                "candles",
                format!("unknown status '{}'", other),
            )),
        }
    }

    pub fn len(&self) -> usize {
        if self.s == "ok" {
            self.t.len()
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One uniform record per bar.
    pub fn into_records(self) -> Vec<Value> {
        (0..self.len())
            .map(|i| {
                json!({
                    "timestamp": self.t[i],
                    "open": self.o[i],
                    "high": self.h[i],
                    "low": self.l[i],
                    "close": self.c[i],
                    "volume": self.v[i],
                })
            })
            .collect()
    }
}
