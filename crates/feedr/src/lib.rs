pub mod compose;
pub mod database;
pub mod dedup;
pub mod entry;
pub mod feed;
pub mod fingerprint;
pub mod image;
pub mod publisher;
pub mod reconciler;
pub mod social;
pub mod tables;

use snafu::{ResultExt as _, Snafu};
use tracing::info;

use crate::database::HistoryStore;
use crate::feed::{FeedError, FeedSource};
use crate::reconciler::{CycleEvent, ReconcileError, Reconciler};

pub const LOG_TARGET: &str = "feedr::cycle";

#[derive(Debug, Snafu)]
pub enum CycleError {
    #[snafu(display("Feed unavailable: {source}"))]
    Feed { source: FeedError },
    #[snafu(display("Reconciliation failed: {source}"))]
    Reconcile { source: ReconcileError },
}

pub type CycleResult<T> = std::result::Result<T, CycleError>;

/// Fetch the feed once and reconcile its entries against the history.
///
/// A feed that cannot be fetched or parsed ends the cycle before anything is
/// touched.
pub async fn run_one_cycle<S>(
    source: &dyn FeedSource,
    reconciler: &Reconciler<S>,
) -> CycleResult<Vec<CycleEvent>>
where
    S: HistoryStore,
{
    info!(target: LOG_TARGET, feed = %reconciler.feed_name(), "Starting cycle");

    let entries = source.fetch_entries().await.context(FeedSnafu)?;
    let events = reconciler
        .process_cycle(&entries)
        .await
        .context(ReconcileSnafu)?;

    let published = events
        .iter()
        .filter(|e| matches!(e, CycleEvent::Published { .. }))
        .count();
    info!(
        target: LOG_TARGET,
        feed = %reconciler.feed_name(),
        entries = entries.len(),
        published,
        "Cycle complete"
    );
    Ok(events)
}
