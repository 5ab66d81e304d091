use thiserror::Error;

use crate::lesion::LesionType;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the lesion segmentation service.
///
/// # Why structured errors
///
/// Each variant maps onto one failure category of a single inference request
/// (bad input, unusable image, missing model, failed prediction, failed publish).
/// Callers branch on the variant instead of parsing messages, and the HTTP layer
/// derives the status code from it without ever exposing the source chain.
#[derive(Error, Debug)]
pub enum LesionSegError {
    #[error("Unknown lesion type: {key}")]
    InvalidLesionType { key: String },

    #[error("Image cannot be loaded from {url}")]
    ImageFetch {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("Invalid image file: {reason}")]
    ImageDecode {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Error loading {lesion} model: {operation} failed")]
    ModelLoad {
        lesion: LesionType,
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Inference error: {operation} failed")]
    Inference {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Upload error: {artifact} could not be published")]
    Upload {
        artifact: String,
        #[source]
        source: BoxError,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

pub type Result<T> = std::result::Result<T, LesionSegError>;

impl LesionSegError {
    pub(crate) fn inference(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Inference {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub(crate) fn model_load(
        lesion: LesionType,
        operation: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::ModelLoad {
            lesion,
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub(crate) fn upload(artifact: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Upload {
            artifact: artifact.into(),
            source: source.into(),
        }
    }

    /// Whether the request itself was unusable (as opposed to a server-side fault).
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidLesionType { .. } | Self::ImageFetch { .. } | Self::ImageDecode { .. }
        )
    }

    /// HTTP status code equivalent of this error.
    pub const fn status_code(&self) -> u16 {
        if self.is_client_error() {
            400
        } else {
            500
        }
    }
}

/// Convert anyhow errors to configuration errors.
///
/// anyhow only shows up at the startup boundary, so anything arriving through it
/// is treated as a configuration problem.
impl From<anyhow::Error> for LesionSegError {
    fn from(err: anyhow::Error) -> Self {
        Self::Configuration {
            message: format!("{err:#}"),
        }
    }
}

/// Convert ONNX Runtime errors raised while running a session.
///
/// Load-time ort errors are wrapped explicitly as `ModelLoad` with the lesion type,
/// so a bare conversion only happens during prediction.
impl From<ort::Error> for LesionSegError {
    fn from(err: ort::Error) -> Self {
        Self::inference("ort operation", err)
    }
}

/// Convert ndarray shape errors to inference errors.
///
/// Shape errors only occur while reshaping model output, so they belong to the
/// prediction step rather than a separate tensor category.
impl From<ndarray::ShapeError> for LesionSegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::inference("tensor shape conversion", err)
    }
}
