pub mod client;
pub mod endpoints;
pub mod errors;
pub mod rate_limiter;
pub mod schemas;

pub use client::{FinnhubClient, RetryPolicy};
pub use endpoints::{Endpoint, ParamError, ENDPOINTS};
pub use errors::{ApiError, ApiErrorKind, ClientError};
pub use rate_limiter::RateWindow;
pub use schemas::{Candles, Quote, SchemaError};
