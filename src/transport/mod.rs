//! Transport layer for the geo API.

pub mod http;

pub use http::{HttpTransport, build_app};

use crate::error::DbResult;
use std::future::Future;

/// Something that serves the API until shut down.
pub trait Transport: Send + Sync {
    /// Start the transport and begin handling requests.
    ///
    /// Resolves once the transport has shut down and the pools are drained.
    fn run(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}
