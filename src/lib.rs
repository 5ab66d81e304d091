pub mod config;
pub mod errors;
pub mod fetch;
pub mod lesion;
pub mod logging;
pub mod model;
pub mod postprocess;
pub mod server;
pub mod session;
pub mod traits;
pub mod upload;

pub mod mocks;

use std::sync::Arc;

use async_trait::async_trait;
use image::Rgb;
use serde::Serialize;
use tracing::{info, instrument};

pub use config::Config;
pub use errors::{LesionSegError, Result};
pub use lesion::LesionType;
pub use model::{ChannelOrder, ProbabilityMap};
pub use session::{SessionLease, SessionPolicy};
pub use traits::*;

use model::{to_input_tensor, Preprocessed};
use postprocess::{Heatmap, MaskOverlay};
use upload::{encode_jpeg, public_id, ArtifactKind, DEFAULT_UPLOAD_FOLDER};

/// Result of one inference request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceResult {
    pub lesion_type: LesionType,
    pub status: bool,
    pub confidence: f64,
    pub mask_url: String,
    pub labeled_url: String,
    pub heatmap_url: String,
}

/// Per-deployment knobs that shape the produced artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOptions {
    pub channel_order: ChannelOrder,
    pub overlay_fill: Option<Rgb<u8>>,
    pub upload_folder: String,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            channel_order: ChannelOrder::Rgb,
            overlay_fill: None,
            upload_folder: DEFAULT_UPLOAD_FOLDER.to_string(),
        }
    }
}

impl From<&Config> for AnalysisOptions {
    fn from(config: &Config) -> Self {
        Self {
            channel_order: config.channel_order,
            overlay_fill: config.overlay_fill.0,
            upload_folder: config.upload_folder.clone(),
        }
    }
}

/// Encoded artifacts of a finished prediction, ready for upload.
struct RenderedArtifacts {
    status: bool,
    confidence: f64,
    mask: Vec<u8>,
    labeled: Vec<u8>,
    heatmap: Vec<u8>,
}

/// Runs the load → fetch → preprocess → predict → release → postprocess → upload
/// pipeline for one request.
///
/// The model session is held in a [`SessionLease`], so it goes back to the
/// provider on every path out of [`LesionAnalyzer::infer`] once it was acquired.
pub struct LesionAnalyzer<P: ModelSessionProvider + ?Sized, S, U> {
    sessions: Arc<P>,
    source: S,
    uploader: U,
    options: AnalysisOptions,
}

impl<P, S, U> LesionAnalyzer<P, S, U>
where
    P: ModelSessionProvider + ?Sized + 'static,
    S: ImageSource,
    U: ArtifactUploader,
{
    pub const fn new(sessions: Arc<P>, source: S, uploader: U, options: AnalysisOptions) -> Self {
        Self {
            sessions,
            source,
            uploader,
            options,
        }
    }

    pub fn sessions(&self) -> &Arc<P> {
        &self.sessions
    }

    pub const fn source(&self) -> &S {
        &self.source
    }

    pub const fn uploader(&self) -> &U {
        &self.uploader
    }

    pub const fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    #[instrument(skip(self, lesion), fields(%lesion))]
    pub async fn infer(&self, lesion: LesionType, image_url: &str) -> Result<InferenceResult> {
        let provider = Arc::clone(&self.sessions);
        let mut lease =
            run_blocking("model load", move || SessionLease::acquire(provider, lesion)).await?;

        let image = self.source.fetch(image_url).await?;
        let Preprocessed { resized, tensor } = to_input_tensor(&image, self.options.channel_order)?;

        let map = run_blocking("predict", move || {
            let map = lease.predict(&tensor);
            drop(lease);
            map
        })
        .await?;

        let fill = self.options.overlay_fill;
        let rendered = run_blocking("postprocess", move || render(&map, &resized, fill)).await?;
        info!(
            status = rendered.status,
            confidence = rendered.confidence,
            "detection finished"
        );

        let timestamp = chrono::Utc::now().timestamp();
        let folder = self.options.upload_folder.as_str();
        let upload = |jpeg: Vec<u8>, kind: ArtifactKind| {
            let id = public_id(lesion, kind, timestamp);
            async move { self.uploader.upload(jpeg, folder, &id).await }
        };
        let (mask_url, labeled_url, heatmap_url) = tokio::try_join!(
            upload(rendered.mask, ArtifactKind::Mask),
            upload(rendered.labeled, ArtifactKind::Labeled),
            upload(rendered.heatmap, ArtifactKind::Heatmap)
        )?;
        info!(%mask_url, %labeled_url, %heatmap_url, "artifacts uploaded");

        Ok(InferenceResult {
            lesion_type: lesion,
            status: rendered.status,
            confidence: rendered.confidence,
            mask_url,
            labeled_url,
            heatmap_url,
        })
    }
}

#[async_trait]
impl<P, S, U> LesionInference for LesionAnalyzer<P, S, U>
where
    P: ModelSessionProvider + ?Sized + 'static,
    S: ImageSource,
    U: ArtifactUploader,
{
    async fn infer(&self, lesion: LesionType, image_url: &str) -> Result<InferenceResult> {
        LesionAnalyzer::infer(self, lesion, image_url).await
    }
}

fn render(
    map: &ProbabilityMap,
    base: &image::RgbImage,
    fill: Option<Rgb<u8>>,
) -> Result<RenderedArtifacts> {
    let (overlay, heatmap) = rayon::join(
        || MaskOverlay::build(map, base, fill),
        || Heatmap::build(map),
    );

    Ok(RenderedArtifacts {
        status: overlay.detected(),
        confidence: overlay.confidence,
        mask: encode_jpeg(&overlay.mask_image(), ArtifactKind::Mask)?,
        labeled: encode_jpeg(&overlay.labeled, ArtifactKind::Labeled)?,
        heatmap: encode_jpeg(&heatmap.image, ArtifactKind::Heatmap)?,
    })
}

/// CPU-bound work (model load, ONNX Runtime, image processing) stays off the async workers.
async fn run_blocking<T, F>(operation: &'static str, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LesionSegError::inference(operation, e))?
}
