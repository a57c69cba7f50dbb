use feedr_util_error::FmtCompact as _;
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, error, info, warn};

use crate::database::{DbError, HistoryStore};
use crate::dedup;
use crate::entry::FeedEntry;
use crate::fingerprint::{self, Fingerprint};
use crate::publisher::{PublishError, Publisher};
use crate::social::{PostId, SocialError};
use crate::tables::HistoryRecord;

const LOG_TARGET: &str = "feedr::reconciler";

#[derive(Debug, Snafu)]
pub enum ReconcileError {
    /// The history store failed; the cycle stops at the current entry.
    #[snafu(display("History store unavailable: {source}"))]
    Store { source: DbError },
}

pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;

/// What happened to an entry (or one of its side effects) during a cycle.
#[derive(Debug)]
pub enum CycleEvent {
    /// The entry was handled in an earlier cycle.
    AlreadySeen { fingerprint: Fingerprint },
    /// The entry republished the previous update: its post and history row
    /// were removed before publishing the entry again. `deleted_post` is
    /// `None` when the previous update was never posted.
    DuplicateRetracted {
        deleted_fingerprint: String,
        deleted_post: Option<PostId>,
    },
    /// The previous history row was removed but its post could not be, so
    /// the old post stays visible without a history row.
    RetractionPartialFailure {
        deleted_fingerprint: String,
        error: SocialError,
    },
    Published {
        fingerprint: Fingerprint,
        title: String,
        date: String,
        post_id: PostId,
    },
    /// Publishing failed; the entry is still recorded and will not be retried.
    PublishFailed {
        fingerprint: Fingerprint,
        error: PublishError,
    },
    DirectMessageFailed { account: String, error: SocialError },
}

/// Decides which feed entries are new and keeps the history and the social
/// account in step with each other.
pub struct Reconciler<S> {
    feed_name: String,
    store: S,
    publisher: Publisher,
}

impl<S> Reconciler<S>
where
    S: HistoryStore,
{
    pub fn new(feed_name: impl Into<String>, store: S, publisher: Publisher) -> Self {
        Self {
            feed_name: feed_name.into(),
            store,
            publisher,
        }
    }

    pub fn feed_name(&self) -> &str {
        &self.feed_name
    }

    /// Process one polling cycle worth of entries, oldest first.
    ///
    /// Each entry is handled to completion before the next one. Publishing
    /// and messaging failures are reported as events; store failures abort
    /// the cycle.
    pub async fn process_cycle(&self, entries: &[FeedEntry]) -> ReconcileResult<Vec<CycleEvent>> {
        let subscribers = self
            .store
            .list_subscribed_accounts()
            .await
            .context(StoreSnafu)?;

        let mut events = vec![];
        for entry in entries {
            self.process_entry(entry, &subscribers, &mut events).await?;
        }
        Ok(events)
    }

    async fn process_entry(
        &self,
        entry: &FeedEntry,
        subscribers: &[String],
        events: &mut Vec<CycleEvent>,
    ) -> ReconcileResult<()> {
        let fingerprint = Fingerprint::of(entry);

        if self
            .store
            .exists(fingerprint.as_str())
            .await
            .context(StoreSnafu)?
        {
            debug!(
                target: LOG_TARGET,
                feed = %self.feed_name,
                fingerprint = %fingerprint.prefix(),
                "Update already seen"
            );
            events.push(CycleEvent::AlreadySeen { fingerprint });
            return Ok(());
        }

        let prev = self.store.most_recent().await.context(StoreSnafu)?;
        if let Some(prev) = prev.filter(|prev| dedup::is_duplicate_update(Some(prev), &entry.title))
        {
            self.retract(prev, events).await?;
        }

        let post_id = match self.publisher.publish(entry).await {
            Ok(post_id) => {
                info!(
                    target: LOG_TARGET,
                    feed = %self.feed_name,
                    fingerprint = %fingerprint.prefix(),
                    title = %entry.title,
                    date = %entry.published_or_updated,
                    %post_id,
                    "New update posted"
                );
                self.notify_subscribers(entry, subscribers, events).await;
                events.push(CycleEvent::Published {
                    fingerprint: fingerprint.clone(),
                    title: entry.title.clone(),
                    date: entry.published_or_updated.clone(),
                    post_id: post_id.clone(),
                });
                Some(post_id)
            }
            Err(err) => {
                error!(
                    target: LOG_TARGET,
                    feed = %self.feed_name,
                    fingerprint = %fingerprint.prefix(),
                    title = %entry.title,
                    err = %err.fmt_compact(),
                    "Error while publishing update"
                );
                events.push(CycleEvent::PublishFailed {
                    fingerprint: fingerprint.clone(),
                    error: err,
                });
                None
            }
        };

        // Recorded even when publishing failed, so the entry is never posted twice
        self.store
            .insert(HistoryRecord {
                fingerprint: fingerprint.into(),
                date: entry.published_or_updated.clone(),
                title: entry.title.clone(),
                url: entry.link.clone(),
                post_id: post_id.map(|id| id.0),
            })
            .await
            .context(StoreSnafu)?;

        Ok(())
    }

    /// Delete the post of `prev`, if it has one, and then `prev` itself from
    /// the history.
    async fn retract(
        &self,
        prev: HistoryRecord,
        events: &mut Vec<CycleEvent>,
    ) -> ReconcileResult<()> {
        // No post id means publishing failed, so there is nothing to delete
        // remotely; the account's latest post belongs to another record
        let remote = match prev.post_id.clone().map(PostId) {
            Some(id) => self
                .publisher
                .social()
                .delete_post(&id)
                .await
                .map(|()| Some(id)),
            None => Ok(None),
        };

        let deleted = match self.store.delete_most_recent().await {
            Ok(deleted) => deleted,
            Err(err) => {
                error!(
                    target: LOG_TARGET,
                    feed = %self.feed_name,
                    fingerprint = %fingerprint::prefix(&prev.fingerprint),
                    remote_deleted = matches!(remote, Ok(Some(_))),
                    err = %err.fmt_compact(),
                    "Retraction partial failure: could not delete history row"
                );
                return Err(err).context(StoreSnafu);
            }
        };
        let deleted_fingerprint = deleted.map(|r| r.fingerprint).unwrap_or(prev.fingerprint);

        match remote {
            Ok(deleted_post) => {
                info!(
                    target: LOG_TARGET,
                    feed = %self.feed_name,
                    fingerprint = %fingerprint::prefix(&deleted_fingerprint),
                    post_id = deleted_post.as_ref().map(|id| id.0.as_str()).unwrap_or("none"),
                    "Duplicate update, deleted previous entry and its post"
                );
                events.push(CycleEvent::DuplicateRetracted {
                    deleted_fingerprint,
                    deleted_post,
                });
            }
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    feed = %self.feed_name,
                    fingerprint = %fingerprint::prefix(&deleted_fingerprint),
                    err = %err.fmt_compact(),
                    "Retraction partial failure: history row deleted, post still live"
                );
                events.push(CycleEvent::RetractionPartialFailure {
                    deleted_fingerprint,
                    error: err,
                });
            }
        }
        Ok(())
    }

    /// Send `title\nlink` to every subscriber; one failed recipient does not
    /// stop the others.
    async fn notify_subscribers(
        &self,
        entry: &FeedEntry,
        subscribers: &[String],
        events: &mut Vec<CycleEvent>,
    ) {
        let text = format!("{}\n{}", entry.title, entry.link);
        let social = self.publisher.social();

        for account in subscribers {
            match social.send_direct_message(account, &text).await {
                Ok(()) => {
                    debug!(target: LOG_TARGET, feed = %self.feed_name, %account, "Sent direct message");
                }
                Err(err) => {
                    warn!(
                        target: LOG_TARGET,
                        feed = %self.feed_name,
                        %account,
                        err = %err.fmt_compact(),
                        "Failed to send direct message"
                    );
                    events.push(CycleEvent::DirectMessageFailed {
                        account: account.clone(),
                        error: err,
                    });
                }
            }
        }
    }
}
