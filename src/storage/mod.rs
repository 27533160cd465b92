//! Persistence boundary of the pipeline: an append-only object store for image
//! assets and a record store for [`ContentItem`]s.

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use time::OffsetDateTime;

use crate::model::{ContentItem, FinalUpdate};

mod local;
mod records;

pub use local::LocalObjectStore;
pub use records::FsContentStore;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Bucket-scoped object storage. Uploads never overwrite an existing key.
pub trait ObjectStore: Send + Sync {
    fn upload<'a>(&'a self, key: &'a str, bytes: Vec<u8>, content_type: &'a str)
    -> StoreFuture<'a, ()>;

    fn public_url(&self, key: &str) -> String;

    /// Reads back any image URL the pipeline may encounter, including ones
    /// this store did not produce.
    fn fetch<'a>(&'a self, url: &'a str) -> StoreFuture<'a, Vec<u8>>;
}

/// Item records keyed by id. Writes create the record when it does not exist.
pub trait ContentStore: Send + Sync {
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ContentItem>>;

    fn update_raw<'a>(&'a self, id: &'a str, raw_image_url: &'a str) -> StoreFuture<'a, ()>;

    /// Terminal write of a successful run. Clears `lastError`.
    fn update_final<'a>(&'a self, id: &'a str, update: FinalUpdate) -> StoreFuture<'a, ()>;

    /// Sets `Review_Required` and `lastError`; `finalImageUrl` is untouched.
    fn mark_failed<'a>(&'a self, id: &'a str, message: &'a str) -> StoreFuture<'a, ()>;
}

static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// `{folder}/{itemId}-{millis}.{ext}`
pub fn object_key(folder: &str, item_id: &str, ext: &str) -> String {
    let millis = next_stamp();
    let folder = folder.trim_matches('/');
    let name = format!("{}-{}.{}", sanitize_segment(item_id), millis, ext);
    if folder.is_empty() {
        name
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Millisecond timestamp, strictly increasing within the process.
fn next_stamp() -> i64 {
    let now = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
    let mut last = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_STAMP.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Keeps ids usable as a single path segment.
pub(crate) fn sanitize_segment(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}
