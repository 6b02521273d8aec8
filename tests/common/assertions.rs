//! Event-driven waits for integration tests

use feed_aggregator::{CycleReport, Event, FeedAggregator};
use std::time::Duration;

/// Wait for the next `CycleCompleted` event
///
/// Returns `None` on timeout or if the channel closes.
pub async fn wait_for_cycle(aggregator: &FeedAggregator, timeout: Duration) -> Option<CycleReport> {
    let mut events = aggregator.subscribe();

    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::CycleCompleted { report }) => return Some(report),
                Ok(_) => continue,
                // Lagged receivers just skip ahead
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Collect events until `predicate` matches one, or until `timeout`
pub async fn collect_events_until<F>(
    aggregator: &FeedAggregator,
    timeout: Duration,
    mut predicate: F,
) -> Vec<Event>
where
    F: FnMut(&Event) -> bool,
{
    let mut events = aggregator.subscribe();
    let mut collected = Vec::new();

    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let done = predicate(&event);
            collected.push(event);
            if done {
                break;
            }
        }
    })
    .await;

    collected
}
