use std::path::{Path, PathBuf};

use clap::ValueEnum;
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use tracing::debug;

use crate::{
    errors::{LesionSegError, Result},
    lesion::LesionType,
    traits::{ModelLoader, SegmentationSession},
};

/// Side length of the square model input and output.
pub const INPUT_SIZE: u32 = 256;

/// Channel order the model was trained on. Decoded images are always RGB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// NHWC `(1, 256, 256, 3)` tensor with values in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct InputTensor(Array4<f32>);

impl InputTensor {
    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.0.view()
    }
}

/// Per-pixel feature likelihood produced by a model, `256 x 256`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityMap(Array2<f32>);

impl ProbabilityMap {
    pub fn new(values: Array2<f32>) -> Self {
        Self(values)
    }

    pub fn filled(value: f32) -> Self {
        let side = INPUT_SIZE as usize;
        Self(Array2::from_elem((side, side), value))
    }

    /// Squeeze a raw model output (e.g. `(1, 256, 256, 1)`) into a map.
    pub fn from_model_output(output: ArrayViewD<'_, f32>) -> Result<Self> {
        let side = INPUT_SIZE as usize;
        if output.len() != side * side {
            return Err(LesionSegError::inference(
                "model output validation",
                format!(
                    "expected {} values, model returned shape {:?}",
                    side * side,
                    output.shape()
                ),
            ));
        }
        let values = Array2::from_shape_vec((side, side), output.iter().copied().collect())?;
        Ok(Self(values))
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.0.view()
    }

    /// `(width, height)` in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        let (rows, cols) = self.0.dim();
        (cols as u32, rows as u32)
    }
}

/// Output of preprocessing: the resized source image and the tensor derived from it.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub resized: RgbImage,
    pub tensor: InputTensor,
}

/// Resize to the model input size, reorder channels and scale to `[0, 1]`.
///
/// Aspect ratio is not preserved. Bilinear filtering keeps every output sample
/// within the range of its source neighbourhood.
pub fn to_input_tensor(image: &RgbImage, order: ChannelOrder) -> Result<Preprocessed> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(LesionSegError::ImageDecode {
            reason: format!("image has no pixels ({width}x{height})"),
            source: None,
        });
    }

    let resized = imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    let data = {
        let chw = resized.as_ndarray3();
        let chw = match order {
            ChannelOrder::Rgb => chw,
            ChannelOrder::Bgr => chw.slice_move(s![..;-1, .., ..]),
        };
        chw.permuted_axes([1, 2, 0])
            .insert_axis(Axis(0))
            .mapv(|v| f32::from(v) / 255.0)
    };

    Ok(Preprocessed {
        resized,
        tensor: InputTensor(data),
    })
}

/// Maps each lesion type onto its exported model file.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    model_dir: PathBuf,
}

impl ModelRegistry {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    pub fn artifact_path(&self, lesion: LesionType) -> PathBuf {
        self.model_dir.join(lesion.artifact_name())
    }

    /// Lesion types whose artifact is not present on disk.
    pub fn missing_artifacts(&self) -> Vec<LesionType> {
        LesionType::ALL
            .into_iter()
            .filter(|lesion| !self.artifact_path(*lesion).is_file())
            .collect()
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }
}

/// Loads ONNX exports of the lesion models with ONNX Runtime.
pub struct OnnxModelLoader {
    registry: ModelRegistry,
    device_id: i32,
}

impl OnnxModelLoader {
    pub const fn new(registry: ModelRegistry, device_id: i32) -> Self {
        Self {
            registry,
            device_id,
        }
    }
}

impl ModelLoader for OnnxModelLoader {
    type Session = OnnxSession;

    fn load(&self, lesion: LesionType) -> Result<OnnxSession> {
        let path = self.registry.artifact_path(lesion);
        if !path.is_file() {
            return Err(LesionSegError::model_load(
                lesion,
                format!("artifact lookup ({})", path.display()),
                std::io::Error::new(std::io::ErrorKind::NotFound, "model file does not exist"),
            ));
        }

        let session = SessionBuilder::new()
            .map_err(|e| LesionSegError::model_load(lesion, "session builder", e.to_string()))?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(self.device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(self.device_id)
                    .build(),
            ])
            .map_err(|e| LesionSegError::model_load(lesion, "execution providers", e.to_string()))?
            .with_memory_pattern(true)
            .map_err(|e| LesionSegError::model_load(lesion, "memory pattern", e.to_string()))?
            .commit_from_file(&path)
            .map_err(|e| {
                LesionSegError::model_load(
                    lesion,
                    format!("model file load ({})", path.display()),
                    e.to_string(),
                )
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| LesionSegError::model_load(lesion, "input lookup", "model has no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| {
                LesionSegError::model_load(lesion, "output lookup", "model has no outputs")
            })?;

        debug!(%lesion, %input_name, %output_name, "model session loaded");

        Ok(OnnxSession {
            session,
            input_name,
            output_name,
        })
    }
}

pub struct OnnxSession {
    session: Session,
    input_name: String,
    output_name: String,
}

impl SegmentationSession for OnnxSession {
    fn predict(&mut self, input: &InputTensor) -> Result<ProbabilityMap> {
        let outputs = self.session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&input.view().as_standard_layout())?
        ])?;
        let output = outputs[self.output_name.as_str()].try_extract_array::<f32>()?;
        ProbabilityMap::from_model_output(output)
    }
}
