use std::net::SocketAddr;
use std::sync::Arc;

use presence_backend_sqlite::db;
use presence_backend_sqlite::pipeline::face::FaceAnalyzer;
use presence_backend_sqlite::pipeline::render::FrameRenderer;
use presence_backend_sqlite::pipeline::source::FfmpegCamera;
use presence_backend_sqlite::utils::config::Config;
use presence_backend_sqlite::utils::{ffmpeg, logging};
use presence_backend_sqlite::{AppPaths, AppState};
use tracing::{error, info, warn};

#[cfg(feature = "facial-recognition")]
async fn face_analyzer(cfg: &Config) -> Arc<dyn FaceAnalyzer> {
    let mut processor = presence_backend_sqlite::pipeline::face::FaceProcessor::new(cfg.face_engine_options());
    if let Err(e) = processor.initialize().await {
        error!("Failed to initialize face processor: {:#}", e);
    }
    Arc::new(processor)
}

#[cfg(not(feature = "facial-recognition"))]
async fn face_analyzer(_cfg: &Config) -> Arc<dyn FaceAnalyzer> {
    warn!("Built without facial-recognition; no faces will be detected");
    Arc::new(presence_backend_sqlite::pipeline::face::NullAnalyzer)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cfg = Config::from_env();
    let paths = AppPaths::under(&cfg.data);
    paths.create_dirs()?;
    let pool = db::create_pool(&paths.db_path, 8)?;

    let analyzer = face_analyzer(&cfg).await;
    let state = Arc::new(AppState::new(paths, pool, analyzer));

    {
        let st = state.clone();
        let registry = tokio::task::spawn_blocking(move || st.rebuild_registry()).await??;
        info!("Registry ready with {} identities", registry.len());
    }

    let mut renderer = FrameRenderer::new(cfg.jpeg_quality);
    if let Some(font) = &cfg.font_path {
        renderer = match renderer.with_font_file(font) {
            Ok(r) => r,
            Err(e) => {
                warn!("{:#}; using the bundled label font", e);
                FrameRenderer::new(cfg.jpeg_quality)
            }
        };
    }

    if ffmpeg::probe_ffmpeg().is_none() {
        warn!("ffmpeg not found on PATH; camera capture will fail");
    }
    let camera_cfg = cfg.camera_config();
    let pipeline = {
        let st = state.clone();
        let pipeline_cfg = cfg.pipeline_config();
        tokio::task::spawn_blocking(move || {
            FfmpegCamera::open(&camera_cfg).map(|camera| st.pipeline(Box::new(camera), pipeline_cfg, renderer))
        })
        .await?
    };
    let handle = match pipeline {
        Ok(p) => Some(p.start(state.frames.clone())),
        Err(e) => {
            error!("Camera unavailable, serving without a live feed: {}", e);
            None
        }
    };

    let app = presence_backend_sqlite::api::routes::router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening" = %addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(handle) = handle {
        handle.stop();
        let frames = handle.join().await?;
        info!("Pipeline stopped after {} frames", frames);
    }
    Ok(())
}
