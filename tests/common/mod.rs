#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use presence_backend_sqlite::db;
use presence_backend_sqlite::error::{PipelineError, PipelineResult};
use presence_backend_sqlite::pipeline::face::{DetectedFace, FaceAnalyzer, FaceRegion};
use presence_backend_sqlite::pipeline::source::FrameSource;
use presence_backend_sqlite::{AppPaths, AppState};
use tempfile::TempDir;

pub const ALICE: [u8; 3] = [200, 40, 40];
pub const BOB: [u8; 3] = [40, 200, 40];
pub const STRANGER: [u8; 3] = [40, 40, 200];
pub const EMPTY: [u8; 3] = [0, 0, 0];

/// Face analyzer that recognises images by the colour of their top-left
/// pixel. Unknown colours have no faces.
#[derive(Default)]
pub struct FakeAnalyzer {
    faces: HashMap<[u8; 3], Vec<DetectedFace>>,
    broken: HashSet<[u8; 3]>,
    calls: AtomicUsize,
}

impl FakeAnalyzer {
    pub fn with(mut self, color: [u8; 3], faces: Vec<DetectedFace>) -> Self {
        self.faces.insert(color, faces);
        self
    }

    /// Inference errors out on frames of this colour.
    pub fn failing_on(mut self, color: [u8; 3]) -> Self {
        self.broken.insert(color);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceAnalyzer for FakeAnalyzer {
    fn analyze(&self, image: &RgbImage) -> anyhow::Result<Vec<DetectedFace>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = image.get_pixel(0, 0).0;
        if self.broken.contains(&key) {
            anyhow::bail!("model crashed on {:?}", key);
        }
        Ok(self.faces.get(&key).cloned().unwrap_or_default())
    }
}

pub fn face(top: u32, left: u32, signature: Vec<f32>) -> DetectedFace {
    DetectedFace { region: FaceRegion { top, right: left + 8, bottom: top + 8, left }, signature }
}

/// The usual cast: Alice and Bob have orthogonal signatures, the stranger
/// is far from both.
pub fn cast_analyzer() -> FakeAnalyzer {
    FakeAnalyzer::default()
        .with(ALICE, vec![face(4, 4, vec![1.0, 0.0, 0.0])])
        .with(BOB, vec![face(4, 4, vec![0.0, 1.0, 0.0])])
        .with(STRANGER, vec![face(4, 4, vec![0.0, 0.0, 1.0])])
}

pub fn solid(color: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(32, 32, Rgb(color))
}

pub fn png_bytes(color: [u8; 3]) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb(color)))
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Serves queued frames, then reports a camera failure.
pub struct VecSource {
    frames: VecDeque<RgbImage>,
}

impl VecSource {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self { frames: frames.into() }
    }

    pub fn of(colors: &[[u8; 3]]) -> Self {
        Self::new(colors.iter().map(|c| solid(*c)).collect())
    }
}

impl FrameSource for VecSource {
    fn read_frame(&mut self) -> PipelineResult<RgbImage> {
        self.frames
            .pop_front()
            .ok_or_else(|| PipelineError::SourceFailure("camera disconnected".to_string()))
    }
}

pub struct TestEnv {
    pub tmp: TempDir,
    pub state: Arc<AppState>,
}

impl TestEnv {
    pub fn new(analyzer: Arc<dyn FaceAnalyzer>) -> Self {
        let tmp = TempDir::new().unwrap();
        let paths = AppPaths::under(tmp.path().join("presence-data"));
        paths.create_dirs().unwrap();
        let pool = db::create_pool(&paths.db_path, 4).unwrap();
        let state = Arc::new(AppState::new(paths, pool, analyzer));
        Self { tmp, state }
    }

    pub fn images_dir(&self) -> PathBuf {
        self.state.paths.images.clone()
    }

    /// Register a student whose reference image is a solid `color` PNG.
    pub fn add_student(&self, student_id: &str, name: &str, color: [u8; 3]) {
        let file = format!("{}.png", student_id.to_lowercase());
        std::fs::write(self.images_dir().join(&file), png_bytes(color)).unwrap();
        let conn = self.state.pool.get().unwrap();
        db::writer::insert_student(&conn, student_id, name, &file).unwrap().unwrap();
    }

    pub fn attendance_count(&self) -> i64 {
        let conn = self.state.pool.get().unwrap();
        conn.query_row("SELECT COUNT(*) FROM attendance", [], |r| r.get(0)).unwrap()
    }
}

/// Serve the router on an ephemeral port, returning its base URL.
pub async fn spawn_server(state: Arc<AppState>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = presence_backend_sqlite::api::routes::router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
