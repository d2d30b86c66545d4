use std::future::Future;

pub mod aws_lambda;
pub mod aws_s3;
pub mod installer;
pub mod invoke;
pub mod object_store;

/// Runs an SDK future to completion from synchronous gateway code. Requires a
/// multi-threaded tokio runtime.
pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
