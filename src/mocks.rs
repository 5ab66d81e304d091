use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use parking_lot::Mutex;

use crate::errors::{LesionSegError, Result};
use crate::lesion::LesionType;
use crate::model::{InputTensor, ProbabilityMap};
use crate::traits::{ArtifactUploader, ImageSource, ModelLoader, SegmentationSession};

/// テスト用のカウンター（ロード・推論・破棄の回数）
#[derive(Debug, Default)]
pub struct MockStats {
    loads: AtomicUsize,
    predictions: AtomicUsize,
    dropped: AtomicUsize,
}

impl MockStats {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn predictions(&self) -> usize {
        self.predictions.load(Ordering::SeqCst)
    }

    /// 破棄されたセッション数（load-per-call では解放回数と一致）
    pub fn dropped_sessions(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn live_sessions(&self) -> usize {
        self.loads() - self.dropped_sessions()
    }
}

/// テスト用のモックモデルローダー
#[derive(Debug, Clone)]
pub struct MockModelLoader {
    map: ProbabilityMap,
    fail_load: bool,
    fail_predict: bool,
    stats: Arc<MockStats>,
}

impl MockModelLoader {
    /// 全画素が `probability` の確率マップを返すモデル
    pub fn new(probability: f32) -> Self {
        Self::with_map(ProbabilityMap::filled(probability))
    }

    pub fn with_map(map: ProbabilityMap) -> Self {
        Self {
            map,
            fail_load: false,
            fail_predict: false,
            stats: Arc::new(MockStats::default()),
        }
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn failing_predict(mut self) -> Self {
        self.fail_predict = true;
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }
}

impl ModelLoader for MockModelLoader {
    type Session = MockSession;

    fn load(&self, lesion: LesionType) -> Result<MockSession> {
        if self.fail_load {
            return Err(LesionSegError::model_load(
                lesion,
                "artifact lookup",
                "mock artifact is missing",
            ));
        }
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession {
            map: self.map.clone(),
            fail_predict: self.fail_predict,
            stats: Arc::clone(&self.stats),
        })
    }
}

#[derive(Debug)]
pub struct MockSession {
    map: ProbabilityMap,
    fail_predict: bool,
    stats: Arc<MockStats>,
}

impl SegmentationSession for MockSession {
    fn predict(&mut self, _input: &InputTensor) -> Result<ProbabilityMap> {
        self.stats.predictions.fetch_add(1, Ordering::SeqCst);
        if self.fail_predict {
            return Err(LesionSegError::inference("predict", "mock prediction failure"));
        }
        Ok(self.map.clone())
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.stats.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
enum FetchOutcome {
    Image(RgbImage),
    Unreachable,
    NotAnImage,
}

/// テスト用の画像ソース
#[derive(Debug)]
pub struct MockImageSource {
    outcome: FetchOutcome,
    fetches: AtomicUsize,
}

impl MockImageSource {
    pub fn new(image: RgbImage) -> Self {
        Self {
            outcome: FetchOutcome::Image(image),
            fetches: AtomicUsize::new(0),
        }
    }

    /// 単色の画像を返すソース
    pub fn solid(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self::new(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    pub fn unreachable() -> Self {
        Self {
            outcome: FetchOutcome::Unreachable,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn not_an_image() -> Self {
        Self {
            outcome: FetchOutcome::NotAnImage,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSource for MockImageSource {
    async fn fetch(&self, url: &str) -> Result<RgbImage> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            FetchOutcome::Image(image) => Ok(image.clone()),
            FetchOutcome::Unreachable => Err(LesionSegError::ImageFetch {
                url: url.to_string(),
                source: "mock connection refused".into(),
            }),
            FetchOutcome::NotAnImage => Err(LesionSegError::ImageDecode {
                reason: "mock body is not an image".to_string(),
                source: None,
            }),
        }
    }
}

/// アップロードされた成果物の記録
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub folder: String,
    pub public_id: String,
    pub jpeg: Vec<u8>,
}

/// テスト用のアップローダー（メモリ上に記録するだけ）
#[derive(Debug, Default)]
pub struct MockUploader {
    records: Mutex<Vec<UploadRecord>>,
    fail: bool,
}

impl MockUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn records(&self) -> Vec<UploadRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl ArtifactUploader for MockUploader {
    async fn upload(&self, jpeg: Vec<u8>, folder: &str, public_id: &str) -> Result<String> {
        if self.fail {
            return Err(LesionSegError::upload(public_id, "mock storage unavailable"));
        }
        self.records.lock().push(UploadRecord {
            folder: folder.to_string(),
            public_id: public_id.to_string(),
            jpeg,
        });
        Ok(format!("https://storage.test/{folder}/{public_id}.jpg"))
    }
}
