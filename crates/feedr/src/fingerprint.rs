use std::fmt;

use data_encoding::HEXLOWER;
use sha2::{Digest as _, Sha256};

use crate::entry::FeedEntry;

/// Number of hex characters used when a fingerprint is shown in logs.
pub const FINGERPRINT_PREFIX_LEN: usize = 10;

/// SHA-256 of `date ++ title ++ link`, hex encoded.
///
/// This is the identity of a feed entry in the history store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(date: &str, title: &str, link: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(date.as_bytes());
        hasher.update(title.as_bytes());
        hasher.update(link.as_bytes());
        Self(HEXLOWER.encode(&hasher.finalize()))
    }

    pub fn of(entry: &FeedEntry) -> Self {
        Self::compute(&entry.published_or_updated, &entry.title, &entry.link)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> &str {
        prefix(&self.0)
    }
}

/// Short form of a stored fingerprint string, for logging.
pub fn prefix(fingerprint: &str) -> &str {
    fingerprint
        .get(..FINGERPRINT_PREFIX_LEN)
        .unwrap_or(fingerprint)
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}
