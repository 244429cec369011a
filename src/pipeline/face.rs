use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

#[cfg(feature = "facial-recognition")]
use anyhow::Context;
#[cfg(feature = "facial-recognition")]
use image::DynamicImage;
#[cfg(feature = "facial-recognition")]
use ort::session::Session;
#[cfg(feature = "facial-recognition")]
use ort::value::Value;
#[cfg(feature = "facial-recognition")]
use parking_lot::Mutex;
#[cfg(feature = "facial-recognition")]
use std::path::{Path, PathBuf};
#[cfg(feature = "facial-recognition")]
use tracing::{debug, info, warn};

/// Face bounds in pixel coordinates of the analysed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceRegion {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// One face found in a sampled frame. Lives only until the frame is labelled.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub region: FaceRegion,
    pub signature: Vec<f32>,
}

/// Detection plus signature extraction. A frame without faces yields an
/// empty vec, never an error. Output order is detection order.
pub trait FaceAnalyzer: Send + Sync {
    fn analyze(&self, image: &RgbImage) -> Result<Vec<DetectedFace>>;
}

/// Sees no faces. Stands in when the build has no face engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAnalyzer;

impl FaceAnalyzer for NullAnalyzer {
    fn analyze(&self, _image: &RgbImage) -> Result<Vec<DetectedFace>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            other => Err(format!("unknown distance metric {:?}", other)),
        }
    }
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => cosine_distance(a, b),
            DistanceMetric::Euclidean => euclidean_distance(a, b),
        }
    }
}

/// `1 - cos(a, b)`. Mismatched or zero vectors are treated as unrelated.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 1.0;
    }
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot_product / (norm_a * norm_b))
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

// ONNX face engine
// ----------------
//
// SCRFD finds faces, ArcFace turns each crop into a 512-d unit vector.

#[cfg(feature = "facial-recognition")]
const SCRFD_MODEL_URL_HF: &str = "https://huggingface.co/ykk648/face_lib/resolve/main/face_detect/scrfd_onnx/scrfd_500m_bnkps.onnx";
#[cfg(feature = "facial-recognition")]
const SCRFD_MODEL_URL_GH: &str = "https://github.com/deepinsight/insightface/releases/download/v0.7/scrfd_500m_bnkps.onnx";
#[cfg(feature = "facial-recognition")]
const ARCFACE_MODEL_URL: &str = "https://huggingface.co/maze/faceX/resolve/e010b5098c3685fd00b22dd2aec6f37320e3d850/w600k_r50.onnx";

#[cfg(feature = "facial-recognition")]
const SCRFD_FILE: &str = "scrfd_500m_bnkps.onnx";
#[cfg(feature = "facial-recognition")]
const ARCFACE_FILE: &str = "w600k_r50.onnx";
#[cfg(feature = "facial-recognition")]
const DET_SIZE: u32 = 640;
#[cfg(feature = "facial-recognition")]
const REC_SIZE: u32 = 112;
#[cfg(feature = "facial-recognition")]
const MIN_FACE_PX: f32 = 8.0;

#[cfg(feature = "facial-recognition")]
#[derive(Debug, Clone)]
pub struct FaceEngineOptions {
    pub models_dir: PathBuf,
    pub auto_download: bool,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
}

#[cfg(feature = "facial-recognition")]
#[derive(Debug, Clone, PartialEq)]
pub struct FaceBbox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

#[cfg(feature = "facial-recognition")]
impl FaceBbox {
    fn region(&self, img_w: u32, img_h: u32) -> FaceRegion {
        FaceRegion {
            top: (self.y1.max(0.0) as u32).min(img_h),
            right: (self.x2.max(0.0) as u32).min(img_w),
            bottom: (self.y2.max(0.0) as u32).min(img_h),
            left: (self.x1.max(0.0) as u32).min(img_w),
        }
    }
}

#[cfg(feature = "facial-recognition")]
pub struct FaceProcessor {
    opts: FaceEngineOptions,
    scrfd_session: Option<Mutex<Session>>,
    arcface_session: Option<Mutex<Session>>,
}

#[cfg(feature = "facial-recognition")]
impl FaceProcessor {
    pub fn new(opts: FaceEngineOptions) -> Self {
        Self { opts, scrfd_session: None, arcface_session: None }
    }

    /// Fetch missing models (unless disabled) and load both sessions.
    pub async fn initialize(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.opts.models_dir)
            .context("Failed to create models directory")?;

        if self.opts.auto_download {
            if let Err(e) = self.download_models().await {
                warn!("Face model auto-download failed: {}", e);
            }
        } else {
            info!("Face model auto-download disabled by user.");
        }

        self.load_models()
    }

    async fn download_models(&self) -> Result<()> {
        let scrfd_path = self.opts.models_dir.join(SCRFD_FILE);
        let arcface_path = self.opts.models_dir.join(ARCFACE_FILE);
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        if !scrfd_path.exists() {
            info!("Downloading SCRFD face detection model...");
            if let Err(e) = download_file(&client, SCRFD_MODEL_URL_HF, &scrfd_path).await {
                warn!("Failed to download from Hugging Face: {}. Trying GitHub...", e);
                download_file(&client, SCRFD_MODEL_URL_GH, &scrfd_path).await?;
            }
        }
        if !arcface_path.exists() {
            info!("Downloading ArcFace recognition model ({})...", ARCFACE_FILE);
            download_file(&client, ARCFACE_MODEL_URL, &arcface_path).await?;
        }
        Ok(())
    }

    fn load_models(&mut self) -> Result<()> {
        let scrfd_path = self.opts.models_dir.join(SCRFD_FILE);
        let arcface_path = self.opts.models_dir.join(ARCFACE_FILE);
        if !scrfd_path.exists() || !arcface_path.exists() {
            anyhow::bail!(
                "Face models missing; expected SCRFD at {:?} and ArcFace at {:?}",
                scrfd_path, arcface_path
            );
        }
        let scrfd = Session::builder()?
            .commit_from_file(&scrfd_path)
            .context("Failed to create SCRFD session")?;
        let arc = Session::builder()?
            .commit_from_file(&arcface_path)
            .context("Failed to create ArcFace session")?;

        self.scrfd_session = Some(Mutex::new(scrfd));
        self.arcface_session = Some(Mutex::new(arc));
        info!("Face models loaded: SCRFD={:?} ArcFace={:?}", scrfd_path, arcface_path);
        Ok(())
    }

    pub fn detect_faces(&self, image: &RgbImage) -> Result<Vec<FaceBbox>> {
        let mut session = self
            .scrfd_session
            .as_ref()
            .context("Detection model not loaded")?
            .lock();
        let (shape, data, scale) = preprocess_scrfd(image);
        let (img_w, img_h) = (image.width() as f32, image.height() as f32);

        let input_name = session.inputs[0].name.clone();
        let input = Value::from_array((shape.to_vec(), data))
            .context("Failed to create SCRFD input tensor")?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .context("SCRFD inference failed")?;

        // Named outputs first (score_8, bbox_8, ...); otherwise insightface
        // export order: three score tensors, then three bbox tensors.
        let mut per_stride: Vec<(u32, Vec<f32>, Vec<f32>)> = Vec::with_capacity(3);
        for stride in [8u32, 16, 32] {
            let (Some(sv), Some(bv)) = (
                outputs.get(&format!("score_{}", stride)),
                outputs.get(&format!("bbox_{}", stride)),
            ) else {
                continue;
            };
            if let (Ok((_, s)), Ok((_, b))) = (sv.try_extract_tensor::<f32>(), bv.try_extract_tensor::<f32>()) {
                per_stride.push((stride, s.to_vec(), b.to_vec()));
            }
        }
        if per_stride.is_empty() {
            let mut tensors: Vec<Vec<f32>> = Vec::new();
            for (_, val) in outputs.iter() {
                if let Ok((_, t)) = val.try_extract_tensor::<f32>() {
                    tensors.push(t.to_vec());
                }
            }
            if tensors.len() >= 6 {
                let boxes = tensors.split_off(3);
                per_stride = [8u32, 16, 32]
                    .into_iter()
                    .zip(tensors)
                    .zip(boxes)
                    .map(|((stride, s), b)| (stride, s, b))
                    .collect();
            }
        }
        if per_stride.is_empty() {
            warn!("SCRFD: no usable score/bbox outputs");
            return Ok(vec![]);
        }

        let mut raw = Vec::new();
        for (stride, scores, boxes) in &per_stride {
            decode_stride(scores, boxes, *stride, scale, img_w, img_h, self.opts.confidence_threshold, &mut raw);
        }
        let keep = nms(&raw, self.opts.nms_iou_threshold);
        debug!("SCRFD: {} candidates, {} after NMS", raw.len(), keep.len());
        // Detection order: top-to-bottom, then left-to-right
        let mut out: Vec<FaceBbox> = keep.into_iter().map(|i| raw[i].clone()).collect();
        out.sort_by(|a, b| {
            (a.y1, a.x1)
                .partial_cmp(&(b.y1, b.x1))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(out)
    }

    pub fn recognize_face(&self, face_crop: &DynamicImage) -> Result<Vec<f32>> {
        let mut session = self
            .arcface_session
            .as_ref()
            .context("Recognition model not loaded")?
            .lock();
        let (shape, data) = preprocess_arcface(face_crop);
        let input_name = session.inputs[0].name.clone();
        let input = Value::from_array((shape.to_vec(), data))
            .context("Failed to create ArcFace input tensor")?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .context("ArcFace inference failed")?;
        let (_, val) = outputs
            .iter()
            .next()
            .context("ArcFace model produced no outputs")?;
        let (_, slice) = val
            .try_extract_tensor::<f32>()
            .context("ArcFace output is not an f32 tensor")?;
        let mut v = slice.to_vec();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            anyhow::bail!("ArcFace embedding has zero norm");
        }
        for x in &mut v {
            *x /= norm;
        }
        Ok(v)
    }
}

#[cfg(feature = "facial-recognition")]
impl FaceAnalyzer for FaceProcessor {
    fn analyze(&self, image: &RgbImage) -> Result<Vec<DetectedFace>> {
        let bboxes = self.detect_faces(image)?;
        if bboxes.is_empty() {
            return Ok(vec![]);
        }
        let frame = DynamicImage::ImageRgb8(image.clone());
        let mut faces = Vec::with_capacity(bboxes.len());
        for bbox in bboxes {
            let region = bbox.region(image.width(), image.height());
            if region.width() == 0 || region.height() == 0 {
                continue;
            }
            let crop = frame.crop_imm(region.left, region.top, region.width(), region.height());
            match self.recognize_face(&crop) {
                Ok(signature) => faces.push(DetectedFace { region, signature }),
                // Region and signature stay paired: drop the face entirely
                Err(e) => warn!("Failed to compute signature for face at {:?}: {}", region, e),
            }
        }
        Ok(faces)
    }
}

#[cfg(feature = "facial-recognition")]
async fn download_file(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .context(format!("Failed to download model from {}", url))?;
    if !response.status().is_success() {
        anyhow::bail!("Failed to download model: HTTP {}", response.status());
    }
    let bytes = response.bytes().await.context("Failed to read response body")?;
    if bytes.len() < 1024 {
        anyhow::bail!("Downloaded file is suspiciously small ({} bytes), may be corrupted", bytes.len());
    }
    std::fs::write(path, &bytes).context(format!("Failed to write file: {:?}", path))?;
    info!("Downloaded model to {:?} ({} bytes)", path, bytes.len());
    Ok(())
}

/// Letterbox to 640x640 NCHW, BGR planes normalised to roughly [-1, 1].
/// Returns the scale from original to model space.
#[cfg(feature = "facial-recognition")]
fn preprocess_scrfd(image: &RgbImage) -> ([i64; 4], Vec<f32>, f32) {
    let (ow, oh) = (image.width() as f32, image.height() as f32);
    let scale = DET_SIZE as f32 / ow.max(oh);
    let nw = ((ow * scale) as u32).max(1);
    let nh = ((oh * scale) as u32).max(1);
    let resized = image::imageops::resize(image, nw, nh, image::imageops::FilterType::Triangle);
    let mut padded = RgbImage::new(DET_SIZE, DET_SIZE);
    image::imageops::overlay(&mut padded, &resized, 0, 0);
    let plane = (DET_SIZE * DET_SIZE) as usize;
    let mut data = vec![0f32; 3 * plane];
    for (x, y, p) in padded.enumerate_pixels() {
        let i = (y * DET_SIZE + x) as usize;
        data[i] = (p[2] as f32 - 127.5) / 128.0;
        data[plane + i] = (p[1] as f32 - 127.5) / 128.0;
        data[2 * plane + i] = (p[0] as f32 - 127.5) / 128.0;
    }
    ([1, 3, DET_SIZE as i64, DET_SIZE as i64], data, scale)
}

#[cfg(feature = "facial-recognition")]
fn preprocess_arcface(face_crop: &DynamicImage) -> ([i64; 4], Vec<f32>) {
    let rgb = face_crop
        .resize_exact(REC_SIZE, REC_SIZE, image::imageops::FilterType::Triangle)
        .to_rgb8();
    let plane = (REC_SIZE * REC_SIZE) as usize;
    let mut data = vec![0f32; 3 * plane];
    for (x, y, p) in rgb.enumerate_pixels() {
        let i = (y * REC_SIZE + x) as usize;
        for c in 0..3 {
            data[c * plane + i] = (p[c] as f32 - 127.5) / 127.5;
        }
    }
    ([1, 3, REC_SIZE as i64, REC_SIZE as i64], data)
}

/// Decode one SCRFD stride: anchor centres on a (640/stride)^2 grid,
/// boxes as (l, t, r, b) distances in stride units.
#[cfg(feature = "facial-recognition")]
#[allow(clippy::too_many_arguments)]
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: u32,
    scale: f32,
    img_w: f32,
    img_h: f32,
    threshold: f32,
    out: &mut Vec<FaceBbox>,
) {
    let side = (DET_SIZE / stride) as usize;
    let grid = side * side;
    if scores.is_empty() || scores.len() % grid != 0 || boxes.len() < scores.len() * 4 {
        warn!("SCRFD stride {}: unexpected tensor sizes (scores={}, boxes={})", stride, scores.len(), boxes.len());
        return;
    }
    let anchors = scores.len() / grid;
    let s = stride as f32;
    for (idx, &conf) in scores.iter().enumerate() {
        if conf < threshold {
            continue;
        }
        let cell = idx / anchors;
        let cx = (cell % side) as f32 * s;
        let cy = (cell / side) as f32 * s;
        let b = &boxes[idx * 4..idx * 4 + 4];
        let x1 = ((cx - b[0] * s) / scale).clamp(0.0, img_w);
        let y1 = ((cy - b[1] * s) / scale).clamp(0.0, img_h);
        let x2 = ((cx + b[2] * s) / scale).clamp(0.0, img_w);
        let y2 = ((cy + b[3] * s) / scale).clamp(0.0, img_h);
        if x2 - x1 < MIN_FACE_PX || y2 - y1 < MIN_FACE_PX {
            continue;
        }
        out.push(FaceBbox { x1, y1, x2, y2, confidence: conf });
    }
}

#[cfg(feature = "facial-recognition")]
fn nms(boxes: &[FaceBbox], iou_threshold: f32) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..boxes.len()).collect();
    indices.sort_by(|&a, &b| {
        boxes[b]
            .confidence
            .partial_cmp(&boxes[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];
    for i in 0..indices.len() {
        let ia = indices[i];
        if suppressed[ia] {
            continue;
        }
        keep.push(ia);
        for &ib in indices.iter().skip(i + 1) {
            if !suppressed[ib] && calculate_iou(&boxes[ia], &boxes[ib]) > iou_threshold {
                suppressed[ib] = true;
            }
        }
    }
    keep
}

#[cfg(feature = "facial-recognition")]
fn calculate_iou(a: &FaceBbox, b: &FaceBbox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let intersection = (x2 - x1) * (y2 - y1);
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}
