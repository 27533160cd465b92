use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use overlay_baker::data::DataAttachment;
use overlay_baker::generation::{Dispatcher, EngineFuture};
use overlay_baker::overlay::{Compositor, DEFAULT_JPEG_QUALITY};
use overlay_baker::placement::PlacementAnalyzer;
use overlay_baker::providers::{ProviderFuture, ProviderResponse};
use overlay_baker::storage::{ContentStore, FsContentStore, LocalObjectStore, ObjectStore};
use overlay_baker::{
    EngineKind, GenerationParams, ImageEngine, ItemStatus, OverlayStyle, Pipeline, Provider,
    RawImage, RunRequest,
};

const BASE_URL: &str = "http://localhost:8787/media";

fn gradient_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, _| Rgb([(x % 256) as u8, 90, 200]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

struct BytesEngine;

impl ImageEngine for BytesEngine {
    fn generate<'a>(&'a self, _prompt: &'a str, params: &'a GenerationParams) -> EngineFuture<'a> {
        let (width, height) = params
            .image_size()
            .split_once('x')
            .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
            .unwrap_or((64, 64));
        let bytes = gradient_png(width, height);
        Box::pin(async move {
            Ok(RawImage::Bytes {
                bytes,
                mime: "image/png".to_string(),
            })
        })
    }
}

#[derive(Clone)]
struct FixedAnswer(&'static str);

impl Provider for FixedAnswer {
    fn append_system_input(self, _input: String) -> Self {
        self
    }

    fn append_user_input(self, _input: String) -> Self {
        self
    }

    fn append_user_data(self, _data: DataAttachment) -> Self {
        self
    }

    fn complete(self) -> ProviderFuture {
        let text = self.0.to_string();
        Box::pin(async move {
            Ok(ProviderResponse {
                text,
                model: None,
                usage: None,
            })
        })
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    objects: Arc<LocalObjectStore>,
    records: Arc<FsContentStore>,
    pipeline: Pipeline<FixedAnswer>,
}

fn fixture(answer: &'static str) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let objects = Arc::new(LocalObjectStore::new(
        dir.path().join("objects"),
        "content-images",
        BASE_URL,
    ));
    let records = Arc::new(FsContentStore::new(dir.path().join("records")));
    let engine: Arc<dyn ImageEngine> = Arc::new(BytesEngine);
    let pipeline = Pipeline::new(
        Dispatcher::new(engine.clone(), engine),
        Some(PlacementAnalyzer::new(FixedAnswer(answer), objects.clone())),
        Compositor::new(None, "sans-serif", DEFAULT_JPEG_QUALITY),
        objects.clone(),
        records.clone(),
    );
    Fixture {
        _dir: dir,
        objects,
        records,
        pipeline,
    }
}

fn request(id: &str, text: &str) -> RunRequest {
    let mut request = RunRequest::new(id, "a lighthouse at dusk");
    request.params.engine = EngineKind::Secondary;
    request.params.image_size = Some("96x64".to_string());
    request.params.overlay_text_hint = Some(text.to_string());
    request
}

#[tokio::test]
async fn generated_item_is_baked_and_stored_on_disk() {
    let f = fixture(r#"{"x": 50, "y": 25, "luminosity": 20, "suggestedColor": "white"}"#);
    let outcome = f
        .pipeline
        .run(request("launch-1", "Grand\nOpening"))
        .await
        .expect("run");

    assert!(outcome.baked);
    assert!(outcome.degradations.is_empty());
    let raw_prefix = format!("{}/content-images/generated/launch-1-", BASE_URL);
    let baked_prefix = format!("{}/content-images/baked/launch-1-", BASE_URL);
    assert!(outcome.raw_url.starts_with(&raw_prefix));
    assert!(outcome.url.starts_with(&baked_prefix));

    let baked = f.objects.fetch(&outcome.url).await.expect("baked bytes");
    let decoded = image::load_from_memory(&baked).expect("decode");
    assert_eq!((decoded.width(), decoded.height()), (96, 64));

    let item = f
        .records
        .get("launch-1")
        .await
        .expect("read")
        .expect("item");
    assert_eq!(item.status, ItemStatus::Approved);
    assert_eq!(item.raw_image_url.as_deref(), Some(outcome.raw_url.as_str()));
    assert_eq!(item.final_image_url.as_deref(), Some(outcome.url.as_str()));
    assert_eq!(item.overlay_text.as_deref(), Some("Grand\nOpening"));
    assert_eq!(
        item.overlay_style.and_then(|style| style.color).as_deref(),
        Some("#FFFFFF")
    );
    assert!(item.updated_at.is_some());
}

#[tokio::test]
async fn rebake_reuses_raw_image_and_produces_identical_bytes() {
    let f = fixture("no layout for you");
    let first_run = f
        .pipeline
        .run(request("launch-2", "Sale"))
        .await
        .expect("run");
    assert!(!first_run.baked);
    assert_eq!(first_run.url, first_run.raw_url);

    let style = OverlayStyle {
        x: Some(50.0),
        y: Some(70.0),
        font_size: Some(20.0),
        reference_container_width: Some(48.0),
        ..OverlayStyle::default()
    };
    let first = f
        .pipeline
        .rebake("launch-2", "Sale ends Friday", &style)
        .await
        .expect("first rebake");
    let second = f
        .pipeline
        .rebake("launch-2", "Sale ends Friday", &style)
        .await
        .expect("second rebake");

    assert_eq!(first.raw_url, first_run.raw_url);
    assert_eq!(second.raw_url, first_run.raw_url);
    assert_ne!(first.url, second.url);
    let first_bytes = f.objects.fetch(&first.url).await.expect("first");
    let second_bytes = f.objects.fetch(&second.url).await.expect("second");
    assert_eq!(first_bytes, second_bytes);

    let item = f
        .records
        .get("launch-2")
        .await
        .expect("read")
        .expect("item");
    assert_eq!(item.final_image_url.as_deref(), Some(second.url.as_str()));
    assert_eq!(item.overlay_style, Some(style));
}

#[tokio::test]
async fn skip_text_publishes_raw_upload() {
    let f = fixture(r#"{"x": 50, "y": 25}"#);
    let mut request = request("launch-3", "Ignored");
    request.params.skip_text = true;
    let outcome = f.pipeline.run(request).await.expect("run");

    assert!(!outcome.baked);
    assert_eq!(outcome.url, outcome.raw_url);
    let item = f
        .records
        .get("launch-3")
        .await
        .expect("read")
        .expect("item");
    assert_eq!(item.final_image_url.as_deref(), Some(outcome.raw_url.as_str()));
    assert_eq!(item.status, ItemStatus::Approved);
}
