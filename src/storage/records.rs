use anyhow::{Context, Result};
use std::path::PathBuf;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs;
use tokio::sync::Mutex;

use super::{ContentStore, StoreFuture, sanitize_segment};
use crate::model::{ContentItem, FinalUpdate, ItemStatus};
use crate::settings::Settings;

/// One JSON document per item under `dir`. Writes are read-modify-write
/// under a process-wide lock and land through a rename.
#[derive(Debug)]
pub struct FsContentStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FsContentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.records_dir)
    }

    /// Readable prefix plus a digest of the raw id, so ids that sanitize alike
    /// still get their own file.
    fn path_for(&self, id: &str) -> PathBuf {
        let digest = format!("{:x}", md5::compute(id.as_bytes()));
        self.dir
            .join(format!("{}-{}.json", sanitize_segment(id), digest))
    }

    async fn load(&self, id: &str) -> Result<Option<ContentItem>> {
        let path = self.path_for(id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read record: {}", path.display()))?;
        let item = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse record: {}", path.display()))?;
        Ok(Some(item))
    }

    async fn save(&self, item: &mut ContentItem) -> Result<()> {
        item.updated_at = OffsetDateTime::now_utc().format(&Rfc3339).ok();
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path_for(&item.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(item).with_context(|| "failed to encode record")?;
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed to write record: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace record: {}", path.display()))?;
        Ok(())
    }

    async fn modify<F>(&self, id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut ContentItem) + Send,
    {
        let _guard = self.lock.lock().await;
        let mut item = self
            .load(id)
            .await?
            .unwrap_or_else(|| ContentItem::new(id));
        apply(&mut item);
        self.save(&mut item).await
    }
}

impl ContentStore for FsContentStore {
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ContentItem>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            self.load(id).await
        })
    }

    fn update_raw<'a>(&'a self, id: &'a str, raw_image_url: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(self.modify(id, move |item| {
            item.raw_image_url = Some(raw_image_url.to_string());
        }))
    }

    fn update_final<'a>(&'a self, id: &'a str, update: FinalUpdate) -> StoreFuture<'a, ()> {
        Box::pin(self.modify(id, move |item| {
            item.overlay_text = update.overlay_text;
            item.overlay_style = update.overlay_style;
            item.final_image_url = Some(update.final_image_url);
            item.status = update.status;
            item.last_error = None;
        }))
    }

    fn mark_failed<'a>(&'a self, id: &'a str, message: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(self.modify(id, move |item| {
            item.status = ItemStatus::ReviewRequired;
            item.last_error = Some(message.to_string());
        }))
    }
}
