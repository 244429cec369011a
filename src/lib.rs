pub mod utils;
pub mod stats;
pub mod models;
pub mod db;
pub mod error;
pub mod store;
pub mod pipeline;
pub mod api;

use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use db::DbPool;
use pipeline::attendance::AttendanceDeduplicator;
use pipeline::face::FaceAnalyzer;
use pipeline::matcher::FaceMatcher;
use pipeline::registry::{IdentityRegistry, SharedRegistry};
use pipeline::render::FrameRenderer;
use pipeline::sampler::FrameSampler;
use pipeline::source::FrameSource;
use pipeline::{Pipeline, PipelineConfig};
use store::{FsImageStore, SqliteStore};

// Encoded frames buffered per viewer before it starts lagging
const FRAME_BUFFER: usize = 4;

#[derive(Clone, Debug)]
pub struct AppPaths {
    pub data: PathBuf,
    pub db_path: PathBuf,
    pub images: PathBuf,
    pub models: PathBuf,
}

impl AppPaths {
    pub fn under(data: impl Into<PathBuf>) -> Self {
        let data = data.into();
        Self {
            db_path: data.join("db").join("presence.db"),
            images: data.join("student_images"),
            models: data.join("models"),
            data,
        }
    }

    pub fn create_dirs(&self) -> std::io::Result<()> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&self.images)?;
        std::fs::create_dir_all(&self.models)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub started_at: std::time::Instant,
    pub paths: AppPaths,
    pub pool: DbPool,
    pub store: Arc<SqliteStore>,
    pub images: Arc<FsImageStore>,
    pub analyzer: Arc<dyn FaceAnalyzer>,
    pub registry: Arc<SharedRegistry>,
    pub dedup: Arc<AttendanceDeduplicator>,
    pub stats: Arc<stats::Stats>,
    pub frames: broadcast::Sender<Bytes>,
}

impl AppState {
    pub fn new(paths: AppPaths, pool: DbPool, analyzer: Arc<dyn FaceAnalyzer>) -> Self {
        let store = Arc::new(SqliteStore::new(pool.clone()));
        let images = Arc::new(FsImageStore::new(paths.images.clone()));
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        Self {
            started_at: std::time::Instant::now(),
            paths,
            pool,
            dedup: Arc::new(AttendanceDeduplicator::new(store.clone())),
            store,
            images,
            analyzer,
            registry: Arc::new(SharedRegistry::default()),
            stats: Arc::new(stats::Stats::new()),
            frames,
        }
    }

    /// Reload identities from the student store. Blocking.
    pub fn rebuild_registry(&self) -> anyhow::Result<Arc<IdentityRegistry>> {
        self.registry.rebuild(self.store.as_ref(), self.images.as_ref(), self.analyzer.as_ref())
    }

    /// Assemble a recognition loop over `source` sharing this state's
    /// registry, deduplicator and counters.
    pub fn pipeline(&self, source: Box<dyn FrameSource>, config: PipelineConfig, renderer: FrameRenderer) -> Pipeline {
        let sampler = FrameSampler::new(source, config.sampling_interval);
        let matcher = FaceMatcher::new(self.analyzer.clone(), self.registry.clone(), config.matcher);
        Pipeline::new(sampler, matcher, self.dedup.clone(), renderer, self.stats.clone())
    }
}
