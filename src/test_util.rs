//! In-memory doubles for the pipeline's external collaborators.

use anyhow::anyhow;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::data::DataAttachment;
use crate::generation::{EngineFuture, GenerationParams, ImageEngine, RawImage};
use crate::model::{ContentItem, FinalUpdate, ItemStatus};
use crate::providers::{Provider, ProviderFuture, ProviderResponse};
use crate::storage::{ContentStore, ObjectStore, StoreFuture};

pub(crate) const CDN: &str = "https://cdn.test/";

pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 7) as u8, (y * 5) as u8, 120]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

pub(crate) fn tiny_png() -> Vec<u8> {
    png(32, 32)
}

#[derive(Default)]
pub(crate) struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<Vec<String>>,
    failing_prefix: Mutex<Option<String>>,
}

impl MemoryObjectStore {
    pub(crate) fn insert(&self, url: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .expect("objects")
            .insert(url.to_string(), bytes);
    }

    pub(crate) fn get(&self, url: &str) -> Option<Vec<u8>> {
        self.objects.lock().expect("objects").get(url).cloned()
    }

    pub(crate) fn uploaded_keys(&self) -> Vec<String> {
        self.uploads.lock().expect("uploads").clone()
    }

    /// Rejects every upload whose key starts with `prefix`.
    pub(crate) fn fail_uploads_under(&self, prefix: &str) {
        *self.failing_prefix.lock().expect("prefix") = Some(prefix.to_string());
    }
}

impl ObjectStore for MemoryObjectStore {
    fn upload<'a>(
        &'a self,
        key: &'a str,
        bytes: Vec<u8>,
        _content_type: &'a str,
    ) -> StoreFuture<'a, ()> {
        let result = (|| {
            if let Some(prefix) = self.failing_prefix.lock().expect("prefix").as_deref()
                && key.starts_with(prefix)
            {
                return Err(anyhow!("bucket rejected '{}'", key));
            }
            let url = self.public_url(key);
            let mut objects = self.objects.lock().expect("objects");
            if objects.contains_key(&url) {
                return Err(anyhow!("object '{}' already exists", key));
            }
            objects.insert(url, bytes);
            self.uploads.lock().expect("uploads").push(key.to_string());
            Ok(())
        })();
        Box::pin(async move { result })
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}{}", CDN, key)
    }

    fn fetch<'a>(&'a self, url: &'a str) -> StoreFuture<'a, Vec<u8>> {
        let result = self.get(url).ok_or_else(|| anyhow!("404 for {}", url));
        Box::pin(async move { result })
    }
}

#[derive(Default)]
pub(crate) struct MemoryContentStore {
    items: Mutex<HashMap<String, ContentItem>>,
    fail_final: AtomicBool,
    final_writes: AtomicUsize,
}

impl MemoryContentStore {
    pub(crate) fn seed(&self, item: ContentItem) {
        self.items
            .lock()
            .expect("items")
            .insert(item.id.clone(), item);
    }

    pub(crate) fn item(&self, id: &str) -> Option<ContentItem> {
        self.items.lock().expect("items").get(id).cloned()
    }

    pub(crate) fn fail_final_writes(&self) {
        self.fail_final.store(true, Ordering::SeqCst);
    }

    pub(crate) fn final_writes(&self) -> usize {
        self.final_writes.load(Ordering::SeqCst)
    }

    fn modify(&self, id: &str, apply: impl FnOnce(&mut ContentItem)) {
        let mut items = self.items.lock().expect("items");
        let item = items
            .entry(id.to_string())
            .or_insert_with(|| ContentItem::new(id));
        apply(item);
    }
}

impl ContentStore for MemoryContentStore {
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ContentItem>> {
        let item = self.item(id);
        Box::pin(async move { Ok(item) })
    }

    fn update_raw<'a>(&'a self, id: &'a str, raw_image_url: &'a str) -> StoreFuture<'a, ()> {
        self.modify(id, |item| item.raw_image_url = Some(raw_image_url.to_string()));
        Box::pin(async { Ok(()) })
    }

    fn update_final<'a>(&'a self, id: &'a str, update: FinalUpdate) -> StoreFuture<'a, ()> {
        self.final_writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_final.load(Ordering::SeqCst) {
            return Box::pin(async { Err(anyhow!("data store unavailable")) });
        }
        self.modify(id, |item| {
            item.overlay_text = update.overlay_text;
            item.overlay_style = update.overlay_style;
            item.final_image_url = Some(update.final_image_url);
            item.status = update.status;
            item.last_error = None;
        });
        Box::pin(async { Ok(()) })
    }

    fn mark_failed<'a>(&'a self, id: &'a str, message: &'a str) -> StoreFuture<'a, ()> {
        self.modify(id, |item| {
            item.status = ItemStatus::ReviewRequired;
            item.last_error = Some(message.to_string());
        });
        Box::pin(async { Ok(()) })
    }
}

/// Engine answering every request with the same output, or failing.
pub(crate) struct StaticEngine {
    output: Option<RawImage>,
    calls: AtomicUsize,
}

impl StaticEngine {
    pub(crate) fn returning(output: RawImage) -> Arc<Self> {
        Arc::new(Self {
            output: Some(output),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            output: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageEngine for StaticEngine {
    fn generate<'a>(&'a self, _prompt: &'a str, _params: &'a GenerationParams) -> EngineFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let output = self
            .output
            .clone()
            .ok_or_else(|| anyhow!("backend returned no image"));
        Box::pin(async move { output })
    }
}

/// Provider that answers every completion with a fixed text and records the
/// mime types of attached data.
#[derive(Clone)]
pub(crate) struct ScriptedProvider {
    answer: String,
    attachments: Arc<Mutex<Vec<String>>>,
    pending: Vec<String>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub(crate) fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            attachments: Arc::new(Mutex::new(Vec::new())),
            pending: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn attachments(&self) -> Vec<String> {
        self.attachments.lock().expect("attachments").clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Provider for ScriptedProvider {
    fn append_system_input(self, _input: String) -> Self {
        self
    }

    fn append_user_input(self, _input: String) -> Self {
        self
    }

    fn append_user_data(mut self, data: DataAttachment) -> Self {
        self.pending.push(data.mime);
        self
    }

    fn complete(self) -> ProviderFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.attachments
            .lock()
            .expect("attachments")
            .extend(self.pending.iter().cloned());
        let text = self.answer.clone();
        Box::pin(async move {
            Ok(ProviderResponse {
                text,
                model: Some("test".to_string()),
                usage: None,
            })
        })
    }
}
