//! Keystroke debouncing for the product search box.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

/// Default quiet period before a query is issued.
pub const DEFAULT_SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

const CHANNEL_CAPACITY: usize = 64;

/// Receiving half of a debounced query stream.
///
/// Queries sent through the paired sender are coalesced; [`next_query`]
/// yields the latest one once no new query has arrived for `delay`.
///
/// [`next_query`]: DebouncedSearch::next_query
#[derive(Debug)]
pub struct DebouncedSearch {
    rx: mpsc::Receiver<String>,
    delay: Duration,
    pending: Option<String>,
}

impl DebouncedSearch {
    #[must_use]
    pub fn channel(delay: Duration) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            tx,
            Self {
                rx,
                delay,
                pending: None,
            },
        )
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Wait for the next settled query.
    ///
    /// Returns `None` once every sender is dropped and nothing is pending.
    ///
    /// Cancel safe: a query received before the future is dropped stays
    /// pending, and the quiet period restarts on the next call.
    pub async fn next_query(&mut self) -> Option<String> {
        loop {
            if self.pending.is_none() {
                self.pending = Some(self.rx.recv().await?);
            }
            match timeout(self.delay, self.rx.recv()).await {
                Ok(Some(query)) => self.pending = Some(query),
                Ok(None) | Err(_) => return self.pending.take(),
            }
        }
    }
}
