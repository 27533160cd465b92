use anyhow::{Context, Result, anyhow};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{ObjectStore, StoreFuture};
use crate::settings::Settings;

/// Filesystem-backed bucket published under `public_base_url`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    bucket: String,
    public_base_url: String,
    client: reqwest::Client,
}

impl LocalObjectStore {
    pub fn new(
        root: impl Into<PathBuf>,
        bucket: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.storage_root,
            &settings.storage_bucket,
            &settings.public_base_url,
        )
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn bucket_prefix(&self) -> String {
        format!("{}/{}/", self.public_base_url, self.bucket)
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(anyhow!("invalid object key '{}'", key));
        }
        Ok(self.root.join(&self.bucket).join(relative))
    }

    /// Reads an object addressed by its `{bucket}/{key}` media path.
    pub async fn read_media(&self, media_path: &str) -> Result<Vec<u8>> {
        let key = media_path
            .trim_start_matches('/')
            .strip_prefix(&format!("{}/", self.bucket))
            .ok_or_else(|| anyhow!("object not in bucket '{}'", self.bucket))?;
        self.read(key).await
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        fs::read(&path)
            .await
            .with_context(|| format!("failed to read object: {}", path.display()))
    }

    async fn write_new(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .with_context(|| format!("refusing to write object '{}'", key))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("failed to write object '{}'", key))?;
        file.flush().await?;
        debug!(key, bytes = bytes.len(), "stored object");
        Ok(())
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(key) = url.strip_prefix(&self.bucket_prefix()) {
            return self.read(key).await;
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to fetch {}", url))?
            .error_for_status()
            .with_context(|| format!("failed to fetch {}", url))?;
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("failed to read body of {}", url))?;
        Ok(bytes.to_vec())
    }
}

impl ObjectStore for LocalObjectStore {
    fn upload<'a>(
        &'a self,
        key: &'a str,
        bytes: Vec<u8>,
        _content_type: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(self.write_new(key, bytes))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}{}", self.bucket_prefix(), key.trim_start_matches('/'))
    }

    fn fetch<'a>(&'a self, url: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(self.fetch_url(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> LocalObjectStore {
        LocalObjectStore::new(dir, "content-images", "http://localhost:8787/media/")
    }

    #[tokio::test]
    async fn uploads_are_published_and_read_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        store
            .upload("generated/a-1.png", vec![1, 2, 3], "image/png")
            .await
            .expect("upload");
        let url = store.public_url("generated/a-1.png");
        assert_eq!(
            url,
            "http://localhost:8787/media/content-images/generated/a-1.png"
        );
        assert_eq!(store.fetch(&url).await.expect("fetch"), vec![1, 2, 3]);
        assert_eq!(
            store
                .read_media("content-images/generated/a-1.png")
                .await
                .expect("media"),
            vec![1, 2, 3]
        );
        assert!(store.read_media("other/generated/a-1.png").await.is_err());
    }

    #[tokio::test]
    async fn existing_keys_are_never_overwritten() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        store
            .upload("baked/a-1.jpg", vec![1], "image/jpeg")
            .await
            .expect("first");
        assert!(store.upload("baked/a-1.jpg", vec![2], "image/jpeg").await.is_err());
        assert_eq!(store.read("baked/a-1.jpg").await.expect("read"), vec![1]);
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_bucket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        assert!(store.upload("../escape.png", vec![1], "image/png").await.is_err());
        assert!(store.upload("/abs.png", vec![1], "image/png").await.is_err());
        assert!(store.read("").await.is_err());
    }
}
