use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use image::Rgb;

use crate::errors::{LesionSegError, Result};
use crate::model::ChannelOrder;
use crate::session::SessionPolicy;
use crate::upload::{CloudinaryCredentials, DEFAULT_UPLOAD_FOLDER};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum UploaderKind {
    #[default]
    Cloudinary,
    Local,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[arg(long, env = "LESION_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    #[arg(short, long, env = "LESION_MODEL_DIR", default_value = "models")]
    pub model_dir: PathBuf,

    #[arg(short, long, env = "LESION_DEVICE_ID", default_value_t = 0)]
    pub device_id: i32,

    #[arg(long, env = "LESION_SESSION_POLICY", value_enum, default_value_t = SessionPolicy::LoadPerCall)]
    pub session_policy: SessionPolicy,

    #[arg(long, env = "LESION_FETCH_TIMEOUT_SECS", default_value_t = 10)]
    pub fetch_timeout_secs: u64,

    #[arg(long, env = "LESION_MAX_CONCURRENT", default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_concurrent_inferences: u32,

    #[arg(long, env = "LESION_CHANNEL_ORDER", value_enum, default_value_t = ChannelOrder::Rgb)]
    pub channel_order: ChannelOrder,

    /// Region fill blended under the contours: `none`, `#rrggbb` or `r,g,b`
    #[arg(long, env = "LESION_OVERLAY_FILL", default_value = "none", value_parser = parse_fill_color)]
    pub overlay_fill: FillColor,

    #[arg(long, env = "LESION_UPLOAD_FOLDER", default_value = DEFAULT_UPLOAD_FOLDER)]
    pub upload_folder: String,

    #[arg(long, env = "LESION_UPLOADER", value_enum, default_value_t = UploaderKind::Cloudinary)]
    pub uploader: UploaderKind,

    /// Root directory for the local uploader
    #[arg(short, long, env = "LESION_OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// URL prefix under which the local uploader's output directory is served
    #[arg(long, env = "LESION_PUBLIC_BASE_URL")]
    pub public_base_url: Option<String>,

    #[arg(long, env = "CLOUDINARY_CLOUD_NAME")]
    pub cloudinary_cloud_name: Option<String>,

    #[arg(long, env = "CLOUDINARY_API_KEY")]
    pub cloudinary_api_key: Option<String>,

    #[arg(long, env = "CLOUDINARY_API_SECRET", hide_env_values = true)]
    pub cloudinary_api_secret: Option<String>,

    #[arg(long, env = "LESION_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Optional overlay fill; `None` leaves only the contour outlines visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillColor(pub Option<Rgb<u8>>);

impl Config {
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn cloudinary_credentials(&self) -> Result<CloudinaryCredentials> {
        let require = |value: &Option<String>, name: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| LesionSegError::Configuration {
                    message: format!("{name} must be set when using the cloudinary uploader"),
                })
        };
        Ok(CloudinaryCredentials {
            cloud_name: require(&self.cloudinary_cloud_name, "CLOUDINARY_CLOUD_NAME")?,
            api_key: require(&self.cloudinary_api_key, "CLOUDINARY_API_KEY")?,
            api_secret: require(&self.cloudinary_api_secret, "CLOUDINARY_API_SECRET")?,
        })
    }
}

fn parse_fill_color(s: &str) -> std::result::Result<FillColor, String> {
    let invalid = || format!("{s} is not a colour. Use `none`, `#rrggbb` or `r,g,b`");
    let s = s.trim();

    if s.eq_ignore_ascii_case("none") || s.is_empty() {
        return Ok(FillColor(None));
    }

    if let Some(hex) = s.strip_prefix('#') {
        if hex.len() != 6 {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        return Ok(FillColor(Some(Rgb([channel(0)?, channel(2)?, channel(4)?]))));
    }

    let channels = s
        .split(',')
        .map(|c| c.trim().parse::<u8>().map_err(|_| invalid()))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    match channels.as_slice() {
        [r, g, b] => Ok(FillColor(Some(Rgb([*r, *g, *b])))),
        _ => Err(invalid()),
    }
}
