use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use redb_bincode::{ReadTransaction, WriteTransaction};
use snafu::{Location, ResultExt as _, Snafu};
use tokio::task::JoinError;
use tracing::{debug, info, instrument};

use crate::fingerprint;
use crate::tables::{HistoryRecord, feed_history, feed_history_fingerprints, feed_subscribers};

const LOG_TARGET: &str = "feedr::db";

#[derive(Debug, Snafu)]
pub enum DbError {
    Database {
        source: redb::DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Table {
        source: redb::TableError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Storage {
        source: redb::StorageError,
        #[snafu(implicit)]
        location: Location,
    },
    Transaction {
        source: redb::TransactionError,
        #[snafu(implicit)]
        location: Location,
    },
    Commit {
        source: redb::CommitError,
        #[snafu(implicit)]
        location: Location,
    },
    Join {
        source: JoinError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("History sequence number overflow"))]
    Overflow,
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// Persistent history of one feed, as seen by the reconciler.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The last update that was recorded, if any.
    async fn most_recent(&self) -> DbResult<Option<HistoryRecord>>;

    async fn exists(&self, fingerprint: &str) -> DbResult<bool>;

    /// Append `record` as the new most recent update.
    async fn insert(&self, record: HistoryRecord) -> DbResult<()>;

    /// Remove the most recent update, returning it.
    async fn delete_most_recent(&self) -> DbResult<Option<HistoryRecord>>;

    async fn list_subscribed_accounts(&self) -> DbResult<Vec<String>>;
}

/// Redb-backed history of a single feed table.
///
/// Several feeds can share one database file; each uses its own `table`
/// name as the first component of every key.
#[derive(Debug, Clone)]
pub struct HistoryDatabase {
    inner: Arc<redb_bincode::Database>,
    table: String,
}

impl HistoryDatabase {
    #[instrument(skip_all)]
    pub async fn open(path: impl Into<PathBuf>, table: impl Into<String>) -> DbResult<Self> {
        let path = path.into();
        debug!(target: LOG_TARGET, path = %path.display(), "Opening database");
        let inner = tokio::task::spawn_blocking(move || redb_bincode::Database::create(path))
            .await
            .context(JoinSnafu)?
            .context(DatabaseSnafu)?;

        let db = Self {
            inner: Arc::new(inner),
            table: table.into(),
        };
        db.init_tables().await?;
        Ok(db)
    }

    /// Another feed table in the same database file.
    pub fn with_table(&self, table: impl Into<String>) -> Self {
        Self {
            inner: self.inner.clone(),
            table: table.into(),
        }
    }

    async fn init_tables(&self) -> DbResult<()> {
        self.write_with(|tx| {
            let _history = tx.open_table(&feed_history::TABLE)?;
            let _fingerprints = tx.open_table(&feed_history_fingerprints::TABLE)?;
            let _subscribers = tx.open_table(&feed_subscribers::TABLE)?;
            Ok(())
        })
        .await
    }

    pub async fn write_with<T>(
        &self,
        f: impl FnOnce(&'_ WriteTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = self.inner.begin_write().context(TransactionSnafu)?;
            let res = f(&dbtx)?;

            dbtx.commit().context(CommitSnafu)?;

            Ok(res)
        })
    }

    pub async fn read_with<T>(
        &self,
        f: impl FnOnce(&'_ ReadTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = self.inner.begin_read().context(TransactionSnafu)?;

            f(&dbtx)
        })
    }

    fn history_bounds(table: &str) -> (feed_history::Key, feed_history::Key) {
        ((table.to_owned(), 0), (table.to_owned(), u64::MAX))
    }

    fn read_most_recent_tx(
        table: &str,
        history_table: &impl feed_history::ReadableTable,
    ) -> DbResult<Option<(u64, HistoryRecord)>> {
        let (start, end) = Self::history_bounds(table);
        let Some(last) = history_table.range(&start..=&end)?.next_back() else {
            return Ok(None);
        };
        let (k, v) = last?;
        Ok(Some((k.value().1, v.value())))
    }

    /// Up to `limit` history rows, most recent first.
    pub async fn recent(&self, limit: usize) -> DbResult<Vec<HistoryRecord>> {
        self.read_with(|tx| {
            let history_table = tx.open_table(&feed_history::TABLE)?;
            let (start, end) = Self::history_bounds(&self.table);

            let mut ret = vec![];
            for row in history_table.range(&start..=&end)?.rev() {
                if limit <= ret.len() {
                    break;
                }
                let (_k, v) = row?;
                ret.push(v.value());
            }
            Ok(ret)
        })
        .await
    }

    /// Returns `false` if the account was already subscribed.
    pub async fn subscribe(&self, account: &str) -> DbResult<bool> {
        self.write_with(|tx| {
            let mut subscribers_table = tx.open_table(&feed_subscribers::TABLE)?;
            let existed = subscribers_table
                .insert(&(self.table.clone(), account.to_owned()), &())?
                .is_some();
            if !existed {
                info!(target: LOG_TARGET, table = %self.table, account, "Subscribed account");
            }
            Ok(!existed)
        })
        .await
    }

    /// Returns `false` if the account was not subscribed.
    pub async fn unsubscribe(&self, account: &str) -> DbResult<bool> {
        self.write_with(|tx| {
            let mut subscribers_table = tx.open_table(&feed_subscribers::TABLE)?;
            let removed = subscribers_table
                .remove(&(self.table.clone(), account.to_owned()))?
                .is_some();
            if removed {
                info!(target: LOG_TARGET, table = %self.table, account, "Unsubscribed account");
            }
            Ok(removed)
        })
        .await
    }
}

#[async_trait]
impl HistoryStore for HistoryDatabase {
    async fn most_recent(&self) -> DbResult<Option<HistoryRecord>> {
        self.read_with(|tx| {
            let history_table = tx.open_table(&feed_history::TABLE)?;
            Ok(Self::read_most_recent_tx(&self.table, &history_table)?.map(|(_, r)| r))
        })
        .await
    }

    async fn exists(&self, fingerprint: &str) -> DbResult<bool> {
        self.read_with(|tx| {
            let fingerprints_table = tx.open_table(&feed_history_fingerprints::TABLE)?;
            Ok(fingerprints_table
                .get(&(self.table.clone(), fingerprint.to_owned()))?
                .is_some())
        })
        .await
    }

    async fn insert(&self, record: HistoryRecord) -> DbResult<()> {
        self.write_with(|tx| {
            let mut history_table = tx.open_table(&feed_history::TABLE)?;
            let mut fingerprints_table = tx.open_table(&feed_history_fingerprints::TABLE)?;

            let seq = match Self::read_most_recent_tx(&self.table, &history_table)? {
                Some((last, _)) => last.checked_add(1).ok_or(DbError::Overflow)?,
                None => 0,
            };

            fingerprints_table.insert(&(self.table.clone(), record.fingerprint.clone()), &seq)?;
            history_table.insert(&(self.table.clone(), seq), &record)?;

            debug!(
                target: LOG_TARGET,
                table = %self.table,
                seq,
                fingerprint = %fingerprint::prefix(&record.fingerprint),
                "Inserted history record"
            );
            Ok(())
        })
        .await
    }

    async fn delete_most_recent(&self) -> DbResult<Option<HistoryRecord>> {
        self.write_with(|tx| {
            let mut history_table = tx.open_table(&feed_history::TABLE)?;
            let mut fingerprints_table = tx.open_table(&feed_history_fingerprints::TABLE)?;

            let Some((seq, record)) = Self::read_most_recent_tx(&self.table, &history_table)?
            else {
                return Ok(None);
            };

            history_table.remove(&(self.table.clone(), seq))?;
            fingerprints_table.remove(&(self.table.clone(), record.fingerprint.clone()))?;

            debug!(
                target: LOG_TARGET,
                table = %self.table,
                seq,
                fingerprint = %fingerprint::prefix(&record.fingerprint),
                "Deleted most recent history record"
            );
            Ok(Some(record))
        })
        .await
    }

    async fn list_subscribed_accounts(&self) -> DbResult<Vec<String>> {
        self.read_with(|tx| {
            let subscribers_table = tx.open_table(&feed_subscribers::TABLE)?;

            let mut accounts = vec![];
            // Keys of one table are contiguous and the empty account sorts first
            for row in subscribers_table.range(&(self.table.clone(), String::new())..)? {
                let (k, _) = row?;
                let (table, account) = k.value();
                if table != self.table {
                    break;
                }
                accounts.push(account);
            }
            Ok(accounts)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::{TempDir, tempdir};

    use super::*;

    async fn temp_db(table: &str) -> (TempDir, HistoryDatabase) {
        let dir = tempdir().expect("tempdir");
        let db = HistoryDatabase::open(dir.path().join("feedr.redb"), table)
            .await
            .expect("open db");
        (dir, db)
    }

    fn record(n: u32) -> HistoryRecord {
        HistoryRecord {
            fingerprint: format!("{n:064x}"),
            date: format!("2025-01-{:02}", n + 1),
            title: format!("Update {n}"),
            url: format!("https://example.com/{n}"),
            post_id: Some(n.to_string()),
        }
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn empty_history() {
        let (_dir, db) = temp_db("news").await;

        assert_eq!(db.most_recent().await.unwrap(), None);
        assert!(!db.exists(&record(0).fingerprint).await.unwrap());
        assert_eq!(db.delete_most_recent().await.unwrap(), None);
        assert!(db.recent(10).await.unwrap().is_empty());
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn insert_then_delete_most_recent() {
        let (_dir, db) = temp_db("news").await;

        db.insert(record(1)).await.unwrap();
        db.insert(record(2)).await.unwrap();

        assert_eq!(db.most_recent().await.unwrap(), Some(record(2)));
        assert!(db.exists(&record(1).fingerprint).await.unwrap());

        assert_eq!(db.delete_most_recent().await.unwrap(), Some(record(2)));
        assert!(!db.exists(&record(2).fingerprint).await.unwrap());
        assert_eq!(db.most_recent().await.unwrap(), Some(record(1)));

        // Delete-then-reinsert makes the new row the most recent one
        db.insert(record(3)).await.unwrap();
        assert_eq!(db.recent(10).await.unwrap(), vec![record(3), record(1)]);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn most_recent_survives_many_inserts() {
        let (_dir, db) = temp_db("news").await;

        for n in 0..300 {
            db.insert(record(n)).await.unwrap();
        }

        assert_eq!(db.most_recent().await.unwrap(), Some(record(299)));
        assert_eq!(db.recent(2).await.unwrap(), vec![record(299), record(298)]);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn tables_are_isolated() {
        let (_dir, news) = temp_db("news").await;
        let blog = news.with_table("blog");

        news.insert(record(1)).await.unwrap();
        news.subscribe("alice").await.unwrap();

        assert_eq!(blog.most_recent().await.unwrap(), None);
        assert!(!blog.exists(&record(1).fingerprint).await.unwrap());
        assert!(blog.list_subscribed_accounts().await.unwrap().is_empty());
        assert_eq!(blog.delete_most_recent().await.unwrap(), None);
        assert_eq!(news.most_recent().await.unwrap(), Some(record(1)));
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn subscribers() {
        let (_dir, db) = temp_db("news").await;

        assert!(db.subscribe("bob").await.unwrap());
        assert!(db.subscribe("alice").await.unwrap());
        assert!(!db.subscribe("alice").await.unwrap());

        let mut accounts = db.list_subscribed_accounts().await.unwrap();
        accounts.sort();
        assert_eq!(accounts, vec!["alice".to_string(), "bob".to_string()]);

        assert!(db.unsubscribe("bob").await.unwrap());
        assert!(!db.unsubscribe("bob").await.unwrap());
        assert_eq!(
            db.list_subscribed_accounts().await.unwrap(),
            vec!["alice".to_string()]
        );
    }
}
