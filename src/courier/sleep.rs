//! Waiting between reachability attempts, swappable for tests

use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait Sleeper: Send {
    async fn sleep(&mut self, duration: Duration);
}

/// Sleeps on the tokio timer
///
/// The wait is an ordinary future, so dropping the pipeline (e.g. on Ctrl+C)
/// cancels it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
