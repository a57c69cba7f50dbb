use bincode::{Decode, Encode};

#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = redb_bincode::TableDefinition<'a, Key, Value>;
            pub trait ReadableTable: redb_bincode::ReadableTable<Key, Value> {}
            impl<RT> ReadableTable for RT where RT: redb_bincode::ReadableTable<Key, Value> {}
            pub type Table<'a> = redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

/// One previously published feed update.
///
/// Rows are never updated in place: a corrected update is stored by deleting
/// the most recent row and inserting a new one.
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    /// Hex SHA-256 of `date ++ title ++ url`
    pub fingerprint: String,
    pub date: String,
    pub title: String,
    pub url: String,
    /// Id of the social post created for this update, if publishing succeeded
    pub post_id: Option<String>,
}

def_table! {
    /// History rows of each feed table, keyed by an increasing sequence
    /// number, so the last key of a table is its most recent update
    feed_history: (String, u64) => HistoryRecord
}

def_table! {
    /// Fingerprint index into `feed_history`
    feed_history_fingerprints: (String, String) => u64
}

def_table! {
    /// Accounts receiving a direct message for each new update of a feed table
    feed_subscribers: (String, String) => ()
}
