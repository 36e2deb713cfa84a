pub mod paths;
pub mod router;
pub mod tokens;
pub mod writer;

pub use paths::{PathError, PathResolver};
pub use router::{ExportFormat, ResultRouter, DEFAULT_PROJECT};
pub use tokens::TokenEstimator;
