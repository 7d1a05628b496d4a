//! Pixel surface backed by a `tiny_skia::Pixmap`.
//!
//! The pixmap stores premultiplied RGBA. Everything that leaves the canvas (readback, captures,
//! [`Canvas::pixel`]) is converted back to straight alpha, and [`Canvas::put_rgba`] converts on
//! the way in, so scripts only ever see straight RGBA.

use tiny_skia::{
    Color, ColorU8, FillRule, Mask, Paint, Path, Pixmap, PremultipliedColorU8, Rect, Stroke, Transform,
};

use crate::frame::{PixelRegion, MAX_SURFACE_DIMENSION};

pub struct Canvas {
    width: u32,
    height: u32,
    /// `None` while either side is zero.
    pixmap: Option<Pixmap>,
}

impl Canvas {
    /// Transparent surface. Sides are capped at [`MAX_SURFACE_DIMENSION`].
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.min(MAX_SURFACE_DIMENSION);
        let height = height.min(MAX_SURFACE_DIMENSION);
        Self { width, height, pixmap: Pixmap::new(width, height) }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn clear(&mut self) {
        if let Some(pixmap) = self.pixmap.as_mut() {
            pixmap.fill(Color::TRANSPARENT);
        }
    }

    pub fn fill_path(&mut self, path: &Path, paint: &Paint, transform: Transform, clip: Option<&Mask>) {
        if let Some(pixmap) = self.pixmap.as_mut() {
            pixmap.fill_path(path, paint, FillRule::Winding, transform, clip);
        }
    }

    pub fn stroke_path(&mut self, path: &Path, paint: &Paint, stroke: &Stroke, transform: Transform, clip: Option<&Mask>) {
        if let Some(pixmap) = self.pixmap.as_mut() {
            pixmap.stroke_path(path, paint, stroke, transform, clip);
        }
    }

    pub fn fill_rect(&mut self, rect: Rect, paint: &Paint, transform: Transform, clip: Option<&Mask>) {
        if let Some(pixmap) = self.pixmap.as_mut() {
            pixmap.fill_rect(rect, paint, transform, clip);
        }
    }

    /// Device-space coverage of `path`, intersected with `existing`. A missing path clips
    /// everything away.
    pub fn clip_mask(&self, path: Option<&Path>, existing: Option<&Mask>) -> Option<Mask> {
        let mut mask = Mask::new(self.width, self.height)?;
        if let Some(path) = path {
            mask.fill_path(path, FillRule::Winding, true, Transform::identity());
        }
        if let Some(existing) = existing {
            for (coverage, outer) in mask.data_mut().iter_mut().zip(existing.data()) {
                *coverage = ((u16::from(*coverage) * u16::from(*outer) + 127) / 255) as u8;
            }
        }
        Some(mask)
    }

    /// Straight-alpha RGBA; transparent black outside the surface.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixmap.as_ref().and_then(|pixmap| pixmap.pixel(x, y)).map_or([0; 4], straight)
    }

    /// Pixels with any coverage at all.
    pub fn painted_pixels(&self) -> usize {
        self.pixmap.as_ref().map_or(0, |pixmap| pixmap.pixels().iter().filter(|px| px.alpha() != 0).count())
    }

    /// Raw write of straight RGBA rows. Ignores transform and clip; pixels outside the surface
    /// and rows past the end of `data` are dropped.
    pub fn put_rgba(&mut self, dx: i64, dy: i64, width: u32, height: u32, data: &[u8]) {
        let (surface_w, surface_h) = (i64::from(self.width), i64::from(self.height));
        let Some(pixmap) = self.pixmap.as_mut() else {
            return;
        };
        let pixels = pixmap.pixels_mut();
        for row in 0..i64::from(height) {
            let y = dy + row;
            if y < 0 || y >= surface_h {
                continue;
            }
            for col in 0..i64::from(width) {
                let x = dx + col;
                if x < 0 || x >= surface_w {
                    continue;
                }
                let src = ((row * i64::from(width) + col) * 4) as usize;
                let Some(rgba) = data.get(src..src + 4) else {
                    return;
                };
                pixels[(y * surface_w + x) as usize] = ColorU8::from_rgba(rgba[0], rgba[1], rgba[2], rgba[3]).premultiply();
            }
        }
    }

    /// Copies a region out as straight RGBA. Pixels outside the surface read as transparent
    /// black; sides beyond [`MAX_SURFACE_DIMENSION`] are cut off.
    pub fn read_region(&self, region: PixelRegion) -> Vec<u8> {
        let region = region.bounded();
        let mut out = vec![0; region.byte_len()];
        let Some(pixmap) = self.pixmap.as_ref() else {
            return out;
        };
        let (surface_w, surface_h) = (i64::from(self.width), i64::from(self.height));
        let pixels = pixmap.pixels();
        for row in 0..i64::from(region.height) {
            let y = region.y + row;
            if y < 0 || y >= surface_h {
                continue;
            }
            for col in 0..i64::from(region.width) {
                let x = region.x + col;
                if x < 0 || x >= surface_w {
                    continue;
                }
                let dst = ((row * i64::from(region.width) + col) * 4) as usize;
                out[dst..dst + 4].copy_from_slice(&straight(pixels[(y * surface_w + x) as usize]));
            }
        }
        out
    }

    pub fn to_image(&self) -> Option<image::RgbaImage> {
        let bytes = self.read_region(PixelRegion::new(0, 0, self.width, self.height));
        image::RgbaImage::from_raw(self.width, self.height, bytes)
    }
}

fn straight(pixel: PremultipliedColorU8) -> [u8; 4] {
    let color = pixel.demultiply();
    [color.red(), color.green(), color.blue(), color.alpha()]
}

/// Converts decoded straight RGBA into a pixmap.
pub fn pixmap_from_rgba(width: u32, height: u32, data: &[u8]) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(width, height)?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(data.chunks_exact(4)) {
        *dst = ColorU8::from_rgba(src[0], src[1], src[2], src[3]).premultiply();
    }
    Some(pixmap)
}
