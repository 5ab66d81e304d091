use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use image::{codecs::jpeg::JpegEncoder, ImageBuffer, Pixel, PixelWithColorType};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::errors::{LesionSegError, Result};
use crate::lesion::LesionType;
use crate::traits::ArtifactUploader;

pub const JPEG_QUALITY: u8 = 95;
pub const DEFAULT_UPLOAD_FOLDER: &str = "lesion_results";

/// The three visual artifacts published per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Mask,
    Labeled,
    Heatmap,
}

impl ArtifactKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mask => "mask",
            Self::Labeled => "labeled",
            Self::Heatmap => "heatmap",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{lesion}_{kind}_{unix seconds}_{8 hex}`; the random suffix keeps concurrent
/// requests from overwriting each other within the same second.
pub fn public_id(lesion: LesionType, kind: ArtifactKind, timestamp: i64) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{lesion}_{kind}_{timestamp}_{}", &suffix[..8])
}

pub fn encode_jpeg<P>(image: &ImageBuffer<P, Vec<u8>>, kind: ArtifactKind) -> Result<Vec<u8>>
where
    P: Pixel<Subpixel = u8> + PixelWithColorType,
{
    let mut jpeg = Vec::new();
    image
        .write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY))
        .map_err(|e| LesionSegError::upload(format!("{kind} (jpeg encoding)"), e))?;
    Ok(jpeg)
}

#[derive(Clone)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for CloudinaryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudinaryCredentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct CloudinaryResponse {
    secure_url: Option<String>,
}

/// Signed uploads to Cloudinary's image upload API.
#[derive(Debug, Clone)]
pub struct CloudinaryUploader {
    client: reqwest::Client,
    credentials: CloudinaryCredentials,
    endpoint: String,
}

impl CloudinaryUploader {
    pub fn new(credentials: CloudinaryCredentials) -> Self {
        let endpoint = format!(
            "https://api.cloudinary.com/v1_1/{}/image/upload",
            credentials.cloud_name
        );
        Self {
            client: reqwest::Client::new(),
            credentials,
            endpoint,
        }
    }

    /// Override the API endpoint (used against a local stand-in).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Hex SHA-256 over the sorted `key=value` pairs joined by `&`, followed by the secret.
pub fn sign_params(params: &BTreeMap<&'static str, String>, api_secret: &str) -> String {
    let to_sign = params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl ArtifactUploader for CloudinaryUploader {
    async fn upload(&self, jpeg: Vec<u8>, folder: &str, public_id: &str) -> Result<String> {
        let params = BTreeMap::from([
            ("folder", folder.to_string()),
            ("invalidate", "true".to_string()),
            ("overwrite", "true".to_string()),
            ("public_id", public_id.to_string()),
            ("timestamp", chrono::Utc::now().timestamp().to_string()),
        ]);
        let signature = sign_params(&params, &self.credentials.api_secret);

        let file = Part::bytes(jpeg)
            .file_name(format!("{public_id}.jpg"))
            .mime_str("image/jpeg")
            .map_err(|e| LesionSegError::upload(public_id, e))?;
        let form = params
            .into_iter()
            .fold(Form::new().part("file", file), |form, (key, value)| {
                form.text(key, value)
            })
            .text("api_key", self.credentials.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256");

        debug!(%public_id, %folder, "uploading artifact to cloudinary");
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| LesionSegError::upload(public_id, e))?;
        let body: CloudinaryResponse = response
            .json()
            .await
            .map_err(|e| LesionSegError::upload(public_id, e))?;

        body.secure_url
            .ok_or_else(|| LesionSegError::upload(public_id, "response has no secure_url"))
    }
}

/// Writes artifacts under a local directory; for development and tests.
#[derive(Debug, Clone)]
pub struct LocalUploader {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalUploader {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url,
        }
    }
}

#[async_trait]
impl ArtifactUploader for LocalUploader {
    async fn upload(&self, jpeg: Vec<u8>, folder: &str, public_id: &str) -> Result<String> {
        let dir = self.root.join(folder);
        let file_name = format!("{public_id}.jpg");
        let path = dir.join(&file_name);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| LesionSegError::upload(public_id, e))?;
        tokio::fs::write(&path, jpeg)
            .await
            .map_err(|e| LesionSegError::upload(public_id, e))?;

        let url = match &self.public_base_url {
            Some(base) => format!("{}/{folder}/{file_name}", base.trim_end_matches('/')),
            None => {
                let absolute = tokio::fs::canonicalize(&path)
                    .await
                    .map_err(|e| LesionSegError::upload(public_id, e))?;
                format!("file://{}", absolute.display())
            }
        };
        info!(%url, "artifact written");
        Ok(url)
    }
}
