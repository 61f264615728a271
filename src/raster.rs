//! Bitmap rendering of sanitized documents with a scale-down retry cascade.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use resvg::tiny_skia::{Pixmap, Transform};
use usvg::fontdb;

use crate::color::Color;
use crate::error::RasterError;
use crate::sanitize::SanitizedDocument;

pub const DEFAULT_SCALES: [f32; 3] = [2.0, 1.0, 0.5];
pub const MAX_SURFACE_PX: u32 = 16384;
pub const DEFAULT_JPEG_QUALITY: f32 = 0.95;

/// Prefix of the transport form a document travels in before decoding.
pub const TRANSPORT_PREFIX: &str = "data:image/svg+xml;base64,";

static SYSTEM_FONTS: Lazy<Arc<fontdb::Database>> = Lazy::new(|| {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    debug!(faces = db.len(); "Loaded system fonts");
    Arc::new(db)
});

fn tree_options() -> usvg::Options<'static> {
    let mut options = usvg::Options::default();
    options.font_family = "sans-serif".to_string();
    options.fontdb = Arc::clone(&SYSTEM_FONTS);
    options
}

/// Parses SVG markup with the shared system font database.
pub fn parse_tree(markup: &str) -> Result<usvg::Tree, usvg::Error> {
    usvg::Tree::from_str(markup, &tree_options())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RasterKind {
    /// Lossless.
    Png,
    /// Lossy, with a quality in `0.0..=1.0`.
    Jpeg,
}

impl RasterKind {
    pub fn extension(self) -> &'static str {
        match self {
            RasterKind::Png => "png",
            RasterKind::Jpeg => "jpg",
        }
    }
}

impl fmt::Display for RasterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterKind::Png => f.write_str("PNG"),
            RasterKind::Jpeg => f.write_str("JPEG"),
        }
    }
}

/// Encoded bitmap bytes and the resolution they were produced at.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterArtifact {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    pub kind: RasterKind,
}

/// Outcome of one rasterization attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub scale: f32,
    pub error: Option<RasterError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cascade {
    Success(RasterArtifact),
    Exhausted(RasterError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CascadeReport {
    pub outcome: Cascade,
    pub attempts: Vec<Attempt>,
}

impl CascadeReport {
    pub fn into_result(self) -> Result<RasterArtifact, RasterError> {
        match self.outcome {
            Cascade::Success(artifact) => Ok(artifact),
            Cascade::Exhausted(err) => Err(err),
        }
    }
}

/// Candidate scales for an export: `desired` first, then every default
/// strictly below it. Non-positive and non-finite scales are skipped.
pub fn cascade_for(desired: f32, defaults: &[f32]) -> Vec<f32> {
    let usable = |scale: f32| scale.is_finite() && scale > 0.0;
    let mut scales = Vec::with_capacity(defaults.len() + 1);
    let ceiling = if usable(desired) {
        scales.push(desired);
        desired
    } else {
        f32::INFINITY
    };
    scales.extend(
        defaults
            .iter()
            .copied()
            .filter(|&scale| usable(scale) && scale < ceiling),
    );
    scales
}

pub fn encode_transport(svg: &str) -> String {
    format!("{TRANSPORT_PREFIX}{}", STANDARD.encode(svg.as_bytes()))
}

/// Decodes a transport URI back into a render tree. Yields to the executor
/// first, so this is where a running export gives way to other tasks.
pub async fn decode_transport(uri: &str) -> Result<usvg::Tree, RasterError> {
    tokio::task::yield_now().await;
    let payload = uri
        .strip_prefix(TRANSPORT_PREFIX)
        .ok_or_else(|| RasterError::Decode("not an SVG data URI".to_string()))?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|err| RasterError::Decode(err.to_string()))?;
    usvg::Tree::from_data(&bytes, &tree_options()).map_err(|err| RasterError::Decode(err.to_string()))
}

/// The two fallible conversions of an attempt: transport form to render tree,
/// and drawn surface to encoded bytes.
pub trait RasterBackend {
    fn decode(&self, transport: &str) -> impl Future<Output = Result<usvg::Tree, RasterError>>;
    fn encode(&self, pixmap: &Pixmap, kind: RasterKind, quality: f32)
    -> Result<Vec<u8>, RasterError>;
}

/// usvg decoding, tiny-skia PNG and `image` JPEG encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResvgBackend;

impl RasterBackend for ResvgBackend {
    async fn decode(&self, transport: &str) -> Result<usvg::Tree, RasterError> {
        decode_transport(transport).await
    }

    fn encode(
        &self,
        pixmap: &Pixmap,
        kind: RasterKind,
        quality: f32,
    ) -> Result<Vec<u8>, RasterError> {
        encode(pixmap, kind, quality)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterEngine<B = ResvgBackend> {
    pub max_surface: u32,
    backend: B,
}

impl RasterEngine {
    pub fn new(max_surface: u32) -> Self {
        Self::with_backend(max_surface, ResvgBackend)
    }
}

impl<B: RasterBackend> RasterEngine<B> {
    pub fn with_backend(max_surface: u32, backend: B) -> Self {
        Self {
            max_surface,
            backend,
        }
    }

    /// Tries each scale in order and stops at the first artifact produced.
    pub async fn rasterize(
        &self,
        document: &SanitizedDocument,
        scales: &[f32],
        kind: RasterKind,
        quality: f32,
        background: Color,
    ) -> CascadeReport {
        let transport = encode_transport(&document.to_svg_string());
        let mut attempts = Vec::with_capacity(scales.len());
        let mut last = RasterError::NoCandidates;

        for &scale in scales {
            match self
                .attempt(document, &transport, scale, kind, quality, background)
                .await
            {
                Ok(artifact) => {
                    info!(
                        scale,
                        width = artifact.width,
                        height = artifact.height,
                        kind:% = kind;
                        "Rasterized diagram"
                    );
                    attempts.push(Attempt { scale, error: None });
                    return CascadeReport {
                        outcome: Cascade::Success(artifact),
                        attempts,
                    };
                }
                Err(err) => {
                    warn!(scale, err:err; "Rasterization attempt failed");
                    attempts.push(Attempt {
                        scale,
                        error: Some(err.clone()),
                    });
                    last = err;
                }
            }
        }
        CascadeReport {
            outcome: Cascade::Exhausted(last),
            attempts,
        }
    }

    async fn attempt(
        &self,
        document: &SanitizedDocument,
        transport: &str,
        scale: f32,
        kind: RasterKind,
        quality: f32,
        background: Color,
    ) -> Result<RasterArtifact, RasterError> {
        let (width, height) = document.bounds().pixel_size(scale);
        let max = f64::from(self.max_surface);
        if width > max || height > max {
            return Err(RasterError::SurfaceTooLarge {
                width: width as u32,
                height: height as u32,
                max: self.max_surface,
            });
        }
        let (width, height) = (width as u32, height as u32);

        let tree = self.backend.decode(transport).await?;
        let mut pixmap =
            Pixmap::new(width, height).ok_or(RasterError::Allocation { width, height })?;
        pixmap.fill(background.to_skia());

        let size = tree.size();
        let transform = Transform::from_scale(
            width as f32 / size.width(),
            height as f32 / size.height(),
        );
        resvg::render(&tree, transform, &mut pixmap.as_mut());

        let bytes = self.backend.encode(&pixmap, kind, quality)?;
        Ok(RasterArtifact {
            bytes,
            width,
            height,
            scale,
            kind,
        })
    }
}

fn encode(pixmap: &Pixmap, kind: RasterKind, quality: f32) -> Result<Vec<u8>, RasterError> {
    match kind {
        RasterKind::Png => pixmap
            .encode_png()
            .map_err(|err| RasterError::Encode(err.to_string())),
        RasterKind::Jpeg => {
            // Premultiplied channels composited over white.
            let rgb: Vec<u8> = pixmap
                .pixels()
                .iter()
                .flat_map(|p| {
                    let cover = 255 - p.alpha();
                    [p.red() + cover, p.green() + cover, p.blue() + cover]
                })
                .collect();
            let quality = (quality.clamp(0.0, 1.0) * 100.0).round().max(1.0) as u8;
            let mut bytes = Vec::new();
            JpegEncoder::new_with_quality(&mut bytes, quality)
                .encode(&rgb, pixmap.width(), pixmap.height(), ExtendedColorType::Rgb8)
                .map_err(|err| RasterError::Encode(err.to_string()))?;
            Ok(bytes)
        }
    }
}
