#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(unused, clippy::all, clippy::pedantic, clippy::nursery, missing_docs)]

//! Binary entrypoint for the seedbank server and its worker processes.

use std::time::Duration;

use seedbank_app::{AppError, AppResult, run};

/// Bound on runtime teardown; blocking stdin reads cannot be cancelled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> AppResult<()> {
    let runtime = tokio::runtime::Runtime::new().map_err(|source| AppError::Io {
        operation: "runtime.new",
        path: None,
        source,
    })?;
    let result = runtime.block_on(run());
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}
