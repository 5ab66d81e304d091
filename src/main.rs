use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use lesion_seg_rs::{
    config::{Config, UploaderKind},
    fetch::HttpImageSource,
    logging::setup_logging,
    model::{ModelRegistry, OnnxModelLoader, OnnxSession},
    server::{router, AppState},
    session::{LoadPerCall, ResidentSessions, SessionPolicy},
    upload::{CloudinaryUploader, LocalUploader},
    AnalysisOptions, ArtifactUploader, LesionAnalyzer, LesionInference, ModelSessionProvider,
};

type OnnxProvider = dyn ModelSessionProvider<Session = OnnxSession>;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    setup_logging(config.log_format);

    let registry = ModelRegistry::new(&config.model_dir);
    let missing = registry.missing_artifacts();
    if !missing.is_empty() {
        warn!(
            model_dir = %registry.model_dir().display(),
            missing = ?missing,
            "some model artifacts are missing; requests for them will fail"
        );
    }

    let loader = OnnxModelLoader::new(registry, config.device_id);
    let sessions: Arc<OnnxProvider> = match config.session_policy {
        SessionPolicy::LoadPerCall => Arc::new(LoadPerCall::new(loader)),
        SessionPolicy::Resident => Arc::new(ResidentSessions::new(loader)),
    };

    let source = HttpImageSource::new(config.fetch_timeout())
        .context("Failed to build the image fetch client")?;
    let options = AnalysisOptions::from(&config);

    let analyzer = match config.uploader {
        UploaderKind::Cloudinary => {
            let credentials = config
                .cloudinary_credentials()
                .context("Cloudinary uploader is not configured")?;
            build_analyzer(sessions, source, CloudinaryUploader::new(credentials), options)
        }
        UploaderKind::Local => {
            let uploader = LocalUploader::new(&config.output_dir, config.public_base_url.clone());
            build_analyzer(sessions, source, uploader, options)
        }
    };

    let state = AppState::new(analyzer, config.max_concurrent_inferences as usize);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!(
        bind = %config.bind,
        policy = ?config.session_policy,
        uploader = ?config.uploader,
        "lesion segmentation service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server terminated unexpectedly")?;

    info!("shutdown complete");
    Ok(())
}

fn build_analyzer<U>(
    sessions: Arc<OnnxProvider>,
    source: HttpImageSource,
    uploader: U,
    options: AnalysisOptions,
) -> Arc<dyn LesionInference>
where
    U: ArtifactUploader + 'static,
{
    Arc::new(LesionAnalyzer::new(sessions, source, uploader, options))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
