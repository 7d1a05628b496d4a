//! Replays draw command batches onto a tiny-skia surface.
//!
//! Everything the renderer draws is derivable from the commands it has seen plus the image and
//! font caches. Path commands are transformed into device space as they arrive, like an HTML
//! canvas, so changing the transform mid-path only affects later segments. Shapes are drawn in
//! user space with the current transform.

use std::collections::HashMap;
use std::f64::consts::{FRAC_PI_2, TAU};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use glam::{DAffine2, DVec2};
use tiny_skia::{FilterQuality, Mask, PathBuilder, Pattern, Pixmap, Rect, SpreadMode, Stroke, Transform};
use tracing::{debug, trace};

use crate::commands::{DrawCommand, Paint};
use crate::frame::{CanvasSize, PixelRegion};

pub mod canvas;
pub mod paint;
pub mod text;

use canvas::{pixmap_from_rgba, Canvas};
use paint::Brush;
use text::FontBook;
pub use text::{DEFAULT_FONT_FAMILY, DEFAULT_FONT_SIZE};

const MITER_LIMIT: f32 = 10.0;

#[derive(Clone)]
struct DrawState {
    fill: Paint,
    stroke: Paint,
    line_width: f64,
    font_size: f64,
    font_family: String,
    transform: DAffine2,
    clip: Option<Mask>,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            fill: Paint::default(),
            stroke: Paint::default(),
            line_width: 1.0,
            font_size: DEFAULT_FONT_SIZE,
            font_family: DEFAULT_FONT_FAMILY.to_string(),
            transform: DAffine2::IDENTITY,
            clip: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Segment {
    Move(DVec2),
    Line(DVec2),
    Quad(DVec2, DVec2),
    Cubic(DVec2, DVec2, DVec2),
    Close,
}

/// Current path in device space.
#[derive(Debug, Clone, Default)]
struct CurrentPath {
    segments: Vec<Segment>,
    start: Option<DVec2>,
    current: Option<DVec2>,
}

impl CurrentPath {
    fn clear(&mut self) {
        *self = Self::default();
    }

    fn move_to(&mut self, point: DVec2) {
        self.segments.push(Segment::Move(point));
        self.start = Some(point);
        self.current = Some(point);
    }

    /// Starts a subpath at `point` when there is none yet.
    fn ensure(&mut self, point: DVec2) {
        if self.current.is_none() {
            self.move_to(point);
        }
    }

    fn line_to(&mut self, point: DVec2) {
        if self.current.is_none() {
            self.move_to(point);
            return;
        }
        self.segments.push(Segment::Line(point));
        self.current = Some(point);
    }

    fn quad_to(&mut self, control: DVec2, end: DVec2) {
        self.ensure(control);
        self.segments.push(Segment::Quad(control, end));
        self.current = Some(end);
    }

    fn cubic_to(&mut self, c1: DVec2, c2: DVec2, end: DVec2) {
        self.ensure(c1);
        self.segments.push(Segment::Cubic(c1, c2, end));
        self.current = Some(end);
    }

    fn close(&mut self) {
        if let Some(start) = self.start {
            self.segments.push(Segment::Close);
            self.current = Some(start);
        }
    }

    fn to_path(&self) -> Option<tiny_skia::Path> {
        let f = |p: DVec2| (p.x as f32, p.y as f32);
        let mut builder = PathBuilder::new();
        for segment in &self.segments {
            match *segment {
                Segment::Move(p) => {
                    let (x, y) = f(p);
                    builder.move_to(x, y);
                }
                Segment::Line(p) => {
                    let (x, y) = f(p);
                    builder.line_to(x, y);
                }
                Segment::Quad(c, p) => {
                    let ((cx, cy), (x, y)) = (f(c), f(p));
                    builder.quad_to(cx, cy, x, y);
                }
                Segment::Cubic(c1, c2, p) => {
                    let ((x1, y1), (x2, y2), (x, y)) = (f(c1), f(c2), f(p));
                    builder.cubic_to(x1, y1, x2, y2, x, y);
                }
                Segment::Close => builder.close(),
            }
        }
        builder.finish()
    }
}

type ArcCurves = (DVec2, Vec<[DVec2; 3]>);

/// An elliptical arc in user space as its start point plus cubic pieces `[c1, c2, end]` of at
/// most a quarter turn each. Sweep normalisation follows the HTML canvas rules.
fn arc_segments(center: DVec2, radii: DVec2, rotation: f64, start: f64, end: f64, ccw: bool) -> Option<ArcCurves> {
    if !(center.is_finite() && radii.is_finite() && rotation.is_finite() && start.is_finite() && end.is_finite()) {
        return None;
    }
    let sweep = if !ccw {
        if end - start >= TAU {
            TAU
        } else {
            (end - start).rem_euclid(TAU)
        }
    } else if start - end >= TAU {
        -TAU
    } else {
        -(start - end).rem_euclid(TAU)
    };
    let rotate = DAffine2::from_angle(rotation);
    let at = |angle: f64| center + rotate.transform_vector2(DVec2::new(radii.x * angle.cos(), radii.y * angle.sin()));
    let tangent = |angle: f64| rotate.transform_vector2(DVec2::new(-radii.x * angle.sin(), radii.y * angle.cos()));

    let pieces = (sweep.abs() / FRAC_PI_2).ceil() as usize;
    let step = if pieces == 0 { 0.0 } else { sweep / pieces as f64 };
    let k = 4.0 / 3.0 * (step / 4.0).tan();
    let curves = (0..pieces)
        .map(|i| {
            let a0 = start + step * i as f64;
            let a1 = a0 + step;
            [at(a0) + tangent(a0) * k, at(a1) - tangent(a1) * k, at(a1)]
        })
        .collect();
    Some((at(start), curves))
}

fn normalized_rect(x: f64, y: f64, width: f64, height: f64) -> Option<Rect> {
    let (left, right) = if width < 0.0 { (x + width, x) } else { (x, x + width) };
    let (top, bottom) = if height < 0.0 { (y + height, y) } else { (y, y + height) };
    Rect::from_ltrb(left as f32, top as f32, right as f32, bottom as f32)
}

fn skia_transform(matrix: DAffine2) -> Transform {
    let [a, b, c, d, e, f] = matrix.to_cols_array();
    Transform::from_row(a as f32, b as f32, c as f32, d as f32, e as f32, f as f32)
}

/// Counters for debugging and the harness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub commands: u64,
    pub unknown: u64,
    pub image_misses: u64,
}

#[derive(Clone, Copy)]
enum Style {
    Fill,
    Stroke,
}

pub struct Renderer {
    canvas: Canvas,
    state: DrawState,
    stack: Vec<DrawState>,
    path: CurrentPath,
    images: HashMap<String, Pixmap>,
    fonts: FontBook,
    stats: RenderStats,
}

impl Renderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: Canvas::new(width, height),
            state: DrawState::default(),
            stack: Vec::new(),
            path: CurrentPath::default(),
            images: HashMap::new(),
            fonts: FontBook::new(),
            stats: RenderStats::default(),
        }
    }

    /// Swaps the font lookup, e.g. for [`FontBook::without_system_fonts`].
    pub fn with_fonts(mut self, fonts: FontBook) -> Self {
        self.fonts = fonts;
        self
    }

    pub fn size(&self) -> CanvasSize {
        CanvasSize { width: self.canvas.width(), height: self.canvas.height() }
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// Decodes and caches an image under `name`, replacing any previous entry.
    pub fn register_image(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let decoded = image::load_from_memory(bytes)
            .with_context(|| format!("Failed to decode image '{name}'"))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        let pixmap = pixmap_from_rgba(width, height, decoded.as_raw())
            .ok_or_else(|| anyhow!("Image '{name}' has an unusable size {width}x{height}"))?;
        debug!("[renderer] cached image '{name}' ({width}x{height})");
        self.images.insert(name.to_string(), pixmap);
        Ok(())
    }

    pub fn has_image(&self, name: &str) -> bool {
        self.images.contains_key(name)
    }

    /// Makes a font asset usable as a font family. Returns whether the bytes parsed as a font.
    pub fn register_font(&mut self, name: &str, bytes: Vec<u8>) -> bool {
        self.fonts.register(name, bytes)
    }

    pub fn fonts(&self) -> impl Iterator<Item = &str> {
        self.fonts.names()
    }

    pub fn read_pixels(&self, region: PixelRegion) -> Vec<u8> {
        self.canvas.read_region(region)
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        let image = self.canvas.to_image().ok_or_else(|| anyhow!("Canvas buffer has the wrong length"))?;
        image.save(path).with_context(|| format!("Failed to write capture {}", path.display()))?;
        Ok(())
    }

    pub fn apply_batch(&mut self, batch: &[DrawCommand]) {
        for command in batch {
            self.apply(command);
        }
    }

    pub fn apply(&mut self, command: &DrawCommand) {
        self.stats.commands += 1;
        match command {
            DrawCommand::Clear => self.canvas.clear(),
            DrawCommand::SetSize { width, height } => self.reset(*width, *height),

            DrawCommand::SetColor { color } => {
                self.state.fill = Paint::Solid { color: *color };
                self.state.stroke = Paint::Solid { color: *color };
            }
            DrawCommand::SetFillStyle { paint } => self.state.fill = paint.clone(),
            DrawCommand::SetStrokeStyle { paint } => self.state.stroke = paint.clone(),
            DrawCommand::SetLineWidth { width } => {
                if width.is_finite() && *width > 0.0 {
                    self.state.line_width = *width;
                }
            }
            DrawCommand::SetFontSize { size } => {
                if size.is_finite() && *size > 0.0 {
                    self.state.font_size = *size;
                }
            }
            DrawCommand::SetFontFamily { family } => self.state.font_family = family.clone(),

            DrawCommand::Rect { x, y, width, height } => {
                if let Some(rect) = normalized_rect(*x, *y, *width, *height) {
                    self.draw(&PathBuilder::from_rect(rect), Style::Stroke);
                }
            }
            DrawCommand::FillRect { x, y, width, height } => {
                if let Some(rect) = normalized_rect(*x, *y, *width, *height) {
                    self.fill_rect(rect);
                }
            }
            DrawCommand::Circle { x, y, radius } => {
                if let Some(circle) = PathBuilder::from_circle(*x as f32, *y as f32, *radius as f32) {
                    self.draw(&circle, Style::Stroke);
                }
            }
            DrawCommand::FillCircle { x, y, radius } => {
                if let Some(circle) = PathBuilder::from_circle(*x as f32, *y as f32, *radius as f32) {
                    self.draw(&circle, Style::Fill);
                }
            }
            DrawCommand::Line { x1, y1, x2, y2 } => {
                let mut builder = PathBuilder::new();
                builder.move_to(*x1 as f32, *y1 as f32);
                builder.line_to(*x2 as f32, *y2 as f32);
                if let Some(line) = builder.finish() {
                    self.draw(&line, Style::Stroke);
                }
            }

            DrawCommand::BeginPath => self.path.clear(),
            DrawCommand::ClosePath => self.path.close(),
            DrawCommand::MoveTo { x, y } => {
                let point = self.to_device(DVec2::new(*x, *y));
                self.path.move_to(point);
            }
            DrawCommand::LineTo { x, y } => {
                let point = self.to_device(DVec2::new(*x, *y));
                self.path.line_to(point);
            }
            DrawCommand::Arc { x, y, radius, start_angle, end_angle, counterclockwise } => {
                if *radius >= 0.0 {
                    let arc = arc_segments(
                        DVec2::new(*x, *y),
                        DVec2::splat(*radius),
                        0.0,
                        *start_angle,
                        *end_angle,
                        *counterclockwise,
                    );
                    self.extend_with_arc(arc);
                }
            }
            DrawCommand::Ellipse {
                x,
                y,
                radius_x,
                radius_y,
                rotation,
                start_angle,
                end_angle,
                counterclockwise,
            } => {
                if *radius_x >= 0.0 && *radius_y >= 0.0 {
                    let arc = arc_segments(
                        DVec2::new(*x, *y),
                        DVec2::new(*radius_x, *radius_y),
                        *rotation,
                        *start_angle,
                        *end_angle,
                        *counterclockwise,
                    );
                    self.extend_with_arc(arc);
                }
            }
            DrawCommand::BezierCurveTo { cp1x, cp1y, cp2x, cp2y, x, y } => {
                let c1 = self.to_device(DVec2::new(*cp1x, *cp1y));
                let c2 = self.to_device(DVec2::new(*cp2x, *cp2y));
                let end = self.to_device(DVec2::new(*x, *y));
                self.path.cubic_to(c1, c2, end);
            }
            DrawCommand::QuadraticCurveTo { cpx, cpy, x, y } => {
                let control = self.to_device(DVec2::new(*cpx, *cpy));
                let end = self.to_device(DVec2::new(*x, *y));
                self.path.quad_to(control, end);
            }
            DrawCommand::RoundRect { x, y, width, height, radius } => {
                self.round_rect(*x, *y, *width, *height, *radius);
            }
            DrawCommand::Fill => self.draw_current_path(Style::Fill),
            DrawCommand::Stroke => self.draw_current_path(Style::Stroke),
            DrawCommand::Clip => {
                let path = self.path.to_path();
                self.state.clip = self.canvas.clip_mask(path.as_ref(), self.state.clip.as_ref());
            }

            DrawCommand::Text { x, y, text, size, family, max_width } => {
                self.draw_text(text, (*x, *y), *size, family.as_deref(), *max_width, Style::Fill);
            }
            DrawCommand::StrokeText { x, y, text, size, family, max_width } => {
                self.draw_text(text, (*x, *y), *size, family.as_deref(), *max_width, Style::Stroke);
            }

            DrawCommand::Translate { x, y } => self.concat(DAffine2::from_translation(DVec2::new(*x, *y))),
            DrawCommand::Rotate { angle } => self.concat(DAffine2::from_angle(*angle)),
            DrawCommand::Scale { x, y } => self.concat(DAffine2::from_scale(DVec2::new(*x, *y))),
            DrawCommand::Transform { a, b, c, d, e, f } => {
                self.concat(DAffine2::from_cols_array(&[*a, *b, *c, *d, *e, *f]))
            }
            DrawCommand::SetTransform { a, b, c, d, e, f } => {
                let matrix = DAffine2::from_cols_array(&[*a, *b, *c, *d, *e, *f]);
                if matrix.is_finite() {
                    self.state.transform = matrix;
                }
            }
            DrawCommand::ResetTransform => self.state.transform = DAffine2::IDENTITY,
            DrawCommand::Save => self.stack.push(self.state.clone()),
            DrawCommand::Restore => {
                if let Some(state) = self.stack.pop() {
                    self.state = state;
                }
            }

            DrawCommand::DrawImage { asset, x, y, width, height } => {
                self.draw_image(asset, *x, *y, *width, *height);
            }
            DrawCommand::PutImageData { x, y, width, height, data } => {
                self.canvas.put_rgba(*x, *y, *width, *height, data);
            }

            DrawCommand::Unknown => {
                self.stats.unknown += 1;
                trace!("[renderer] ignoring unknown command");
            }
            // Audio rides in the same batch and is routed by the host.
            _ => {}
        }
    }

    fn reset(&mut self, width: u32, height: u32) {
        self.canvas = Canvas::new(width, height);
        self.state = DrawState::default();
        self.stack.clear();
        self.path.clear();
    }

    fn concat(&mut self, matrix: DAffine2) {
        if matrix.is_finite() {
            self.state.transform = self.state.transform * matrix;
        }
    }

    fn to_device(&self, point: DVec2) -> DVec2 {
        self.state.transform.transform_point2(point)
    }

    /// Lines from the current point to the arc start, then follows the arc.
    fn extend_with_arc(&mut self, arc: Option<ArcCurves>) {
        let Some((start, curves)) = arc else {
            return;
        };
        let start = self.to_device(start);
        self.path.line_to(start);
        for [c1, c2, end] in curves {
            let (c1, c2, end) = (self.to_device(c1), self.to_device(c2), self.to_device(end));
            self.path.cubic_to(c1, c2, end);
        }
    }

    fn round_rect(&mut self, x: f64, y: f64, width: f64, height: f64, radius: f64) {
        let (x, width) = if width < 0.0 { (x + width, -width) } else { (x, width) };
        let (y, height) = if height < 0.0 { (y + height, -height) } else { (y, height) };
        let r = radius.max(0.0).min(width / 2.0).min(height / 2.0);
        if !(x.is_finite() && y.is_finite() && width.is_finite() && height.is_finite() && r.is_finite()) {
            return;
        }
        let corners = [
            (DVec2::new(x + width - r, y + r), -FRAC_PI_2),
            (DVec2::new(x + width - r, y + height - r), 0.0),
            (DVec2::new(x + r, y + height - r), FRAC_PI_2),
            (DVec2::new(x + r, y + r), 2.0 * FRAC_PI_2),
        ];
        let first = self.to_device(DVec2::new(x + r, y));
        self.path.move_to(first);
        for (center, start) in corners {
            let arc = arc_segments(center, DVec2::splat(r), 0.0, start, start + FRAC_PI_2, false);
            self.extend_with_arc(arc);
        }
        self.path.close();
    }

    fn brush(&self, style: Style) -> Option<Brush> {
        let paint = match style {
            Style::Fill => &self.state.fill,
            Style::Stroke => &self.state.stroke,
        };
        Brush::new(paint, skia_transform(self.state.transform), self.canvas.width(), self.canvas.height())
    }

    /// Draws a user-space path with the current transform, style and clip.
    fn draw(&mut self, path: &tiny_skia::Path, style: Style) {
        let Some(brush) = self.brush(style) else {
            return;
        };
        let paint = brush.paint();
        let transform = skia_transform(self.state.transform);
        let clip = self.state.clip.as_ref();
        match style {
            Style::Fill => self.canvas.fill_path(path, &paint, transform, clip),
            Style::Stroke => {
                let stroke = Stroke { width: self.state.line_width as f32, miter_limit: MITER_LIMIT, ..Stroke::default() };
                self.canvas.stroke_path(path, &paint, &stroke, transform, clip);
            }
        }
    }

    fn fill_rect(&mut self, rect: Rect) {
        let Some(brush) = self.brush(Style::Fill) else {
            return;
        };
        let paint = brush.paint();
        let transform = skia_transform(self.state.transform);
        self.canvas.fill_rect(rect, &paint, transform, self.state.clip.as_ref());
    }

    /// The current path lives in device space. It is mapped back to user space so that
    /// strokes scale with the transform; a singular transform draws nothing.
    fn draw_current_path(&mut self, style: Style) {
        let Some(to_user) = skia_transform(self.state.transform).invert() else {
            return;
        };
        let Some(path) = self.path.to_path().and_then(|path| path.transform(to_user)) else {
            return;
        };
        self.draw(&path, style);
    }

    fn draw_text(
        &mut self,
        text: &str,
        origin: (f64, f64),
        size: Option<f64>,
        family: Option<&str>,
        max_width: Option<f64>,
        style: Style,
    ) {
        let size = size.filter(|s| s.is_finite() && *s > 0.0).unwrap_or(self.state.font_size);
        let family = family.unwrap_or(self.state.font_family.as_str()).to_string();
        if let Some(glyphs) = self.fonts.outline(text, origin, size, &family, max_width) {
            self.draw(&glyphs, style);
        }
    }

    fn draw_image(&mut self, asset: &str, x: f64, y: f64, width: Option<f64>, height: Option<f64>) {
        let Some(image) = self.images.get(asset) else {
            self.stats.image_misses += 1;
            trace!("[renderer] image '{asset}' not cached yet");
            return;
        };
        let (img_w, img_h) = (f64::from(image.width()), f64::from(image.height()));
        let dest_w = width.unwrap_or(img_w);
        let dest_h = height.unwrap_or(img_h);
        if dest_w == 0.0 || dest_h == 0.0 {
            return;
        }
        let Some(rect) = normalized_rect(x, y, dest_w, dest_h) else {
            return;
        };
        let placement = Transform::from_row((dest_w / img_w) as f32, 0.0, 0.0, (dest_h / img_h) as f32, x as f32, y as f32);
        let paint = tiny_skia::Paint {
            shader: Pattern::new(image.as_ref(), SpreadMode::Pad, FilterQuality::Nearest, 1.0, placement),
            ..tiny_skia::Paint::default()
        };
        let transform = skia_transform(self.state.transform);
        self.canvas.fill_rect(rect, &paint, transform, self.state.clip.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Color, ColorStop};

    const RED: Color = Color::rgb(255, 0, 0);

    fn pixel(renderer: &Renderer, x: u32, y: u32) -> [u8; 4] {
        renderer.canvas().pixel(x, y)
    }

    fn two_stops(from: Color, to: Color) -> Vec<ColorStop> {
        vec![ColorStop { offset: 0.0, color: from }, ColorStop { offset: 1.0, color: to }]
    }

    #[test]
    fn fill_rect_paints_exact_color() {
        let mut renderer = Renderer::new(200, 200);
        renderer.apply_batch(&[
            DrawCommand::SetColor { color: RED },
            DrawCommand::FillRect { x: 0.0, y: 0.0, width: 100.0, height: 100.0 },
        ]);
        assert_eq!(pixel(&renderer, 50, 50), [255, 0, 0, 255]);
        assert_eq!(pixel(&renderer, 150, 150), [0, 0, 0, 0]);
        assert_eq!(renderer.canvas().painted_pixels(), 100 * 100);
    }

    #[test]
    fn transforms_and_save_restore() {
        let mut renderer = Renderer::new(50, 50);
        renderer.apply_batch(&[
            DrawCommand::SetColor { color: RED },
            DrawCommand::Save,
            DrawCommand::Translate { x: 20.0, y: 20.0 },
            DrawCommand::Scale { x: 2.0, y: 2.0 },
            DrawCommand::FillRect { x: 0.0, y: 0.0, width: 5.0, height: 5.0 },
            DrawCommand::Restore,
            DrawCommand::SetColor { color: Color::rgb(0, 0, 255) },
            DrawCommand::FillRect { x: 0.0, y: 0.0, width: 5.0, height: 5.0 },
        ]);
        assert_eq!(pixel(&renderer, 25, 25), [255, 0, 0, 255]);
        assert_eq!(pixel(&renderer, 31, 31), [0, 0, 0, 0]);
        assert_eq!(pixel(&renderer, 2, 2), [0, 0, 255, 255], "restore resets the transform");
    }

    #[test]
    fn paths_fill_and_clip() {
        let mut renderer = Renderer::new(40, 40);
        renderer.apply_batch(&[
            DrawCommand::BeginPath,
            DrawCommand::MoveTo { x: 0.0, y: 0.0 },
            DrawCommand::LineTo { x: 20.0, y: 0.0 },
            DrawCommand::LineTo { x: 20.0, y: 40.0 },
            DrawCommand::LineTo { x: 0.0, y: 40.0 },
            DrawCommand::ClosePath,
            DrawCommand::Clip,
            DrawCommand::SetColor { color: RED },
            DrawCommand::FillRect { x: 0.0, y: 0.0, width: 40.0, height: 40.0 },
        ]);
        assert_eq!(pixel(&renderer, 10, 10), [255, 0, 0, 255]);
        assert_eq!(pixel(&renderer, 30, 10), [0, 0, 0, 0], "outside the clip");
    }

    #[test]
    fn clip_is_restored_with_state() {
        let mut renderer = Renderer::new(20, 20);
        renderer.apply_batch(&[
            DrawCommand::Save,
            DrawCommand::BeginPath,
            DrawCommand::RoundRect { x: 0.0, y: 0.0, width: 10.0, height: 10.0, radius: 5.0 },
            DrawCommand::Clip,
            DrawCommand::FillRect { x: 0.0, y: 0.0, width: 20.0, height: 20.0 },
            DrawCommand::Restore,
            DrawCommand::SetColor { color: RED },
            DrawCommand::FillRect { x: 12.0, y: 12.0, width: 8.0, height: 8.0 },
        ]);
        assert_eq!(pixel(&renderer, 5, 5), [0, 0, 0, 255]);
        assert_eq!(pixel(&renderer, 0, 0), [0, 0, 0, 0], "rounded corner stays outside the clip");
        assert_eq!(pixel(&renderer, 15, 15), [255, 0, 0, 255]);
    }

    #[test]
    fn arcs_build_filled_circles() {
        let mut renderer = Renderer::new(40, 40);
        renderer.apply_batch(&[
            DrawCommand::SetColor { color: RED },
            DrawCommand::BeginPath,
            DrawCommand::Arc {
                x: 20.0,
                y: 20.0,
                radius: 10.0,
                start_angle: 0.0,
                end_angle: TAU,
                counterclockwise: false,
            },
            DrawCommand::Fill,
            DrawCommand::FillCircle { x: 5.0, y: 5.0, radius: 3.0 },
        ]);
        assert_eq!(pixel(&renderer, 20, 20), [255, 0, 0, 255]);
        assert_eq!(pixel(&renderer, 20, 35), [0, 0, 0, 0]);
        assert_eq!(pixel(&renderer, 5, 5), [255, 0, 0, 255]);
    }

    #[test]
    fn arc_sweeps_follow_canvas_rules() {
        let unit = DVec2::splat(1.0);
        let (start, quarter) = arc_segments(DVec2::ZERO, unit, 0.0, 0.0, FRAC_PI_2, false).expect("arc");
        assert_eq!(start, DVec2::new(1.0, 0.0));
        assert_eq!(quarter.len(), 1);
        assert!(quarter[0][2].distance(DVec2::new(0.0, 1.0)) < 1e-9);

        let (_, full) = arc_segments(DVec2::ZERO, unit, 0.0, 0.0, 10.0, false).expect("arc");
        assert_eq!(full.len(), 4, "sweeps past a full turn clamp to one turn");
        let (_, backwards) = arc_segments(DVec2::ZERO, unit, 0.0, 0.0, FRAC_PI_2, true).expect("arc");
        assert_eq!(backwards.len(), 3, "counterclockwise goes the long way round");
        assert!(arc_segments(DVec2::ZERO, DVec2::splat(f64::NAN), 0.0, 0.0, 1.0, false).is_none());
    }

    #[test]
    fn strokes_cover_the_line() {
        let mut renderer = Renderer::new(20, 20);
        renderer.apply_batch(&[
            DrawCommand::SetColor { color: RED },
            DrawCommand::SetLineWidth { width: 4.0 },
            DrawCommand::Line { x1: 2.0, y1: 10.0, x2: 18.0, y2: 10.0 },
        ]);
        assert_eq!(pixel(&renderer, 10, 9), [255, 0, 0, 255]);
        assert_eq!(pixel(&renderer, 10, 14), [0, 0, 0, 0]);
    }

    #[test]
    fn path_strokes_scale_with_the_transform() {
        let mut renderer = Renderer::new(40, 40);
        renderer.apply_batch(&[
            DrawCommand::Scale { x: 4.0, y: 4.0 },
            DrawCommand::BeginPath,
            DrawCommand::MoveTo { x: 1.0, y: 5.0 },
            DrawCommand::LineTo { x: 9.0, y: 5.0 },
            DrawCommand::Stroke,
        ]);
        assert_eq!(pixel(&renderer, 20, 19), [0, 0, 0, 255], "a 1px line is 4px wide at 4x");
        assert_eq!(pixel(&renderer, 20, 23), [0, 0, 0, 0]);
    }

    #[test]
    fn gradient_fill_varies_across_the_shape() {
        let mut renderer = Renderer::new(10, 1);
        renderer.apply_batch(&[
            DrawCommand::SetFillStyle {
                paint: Paint::LinearGradient {
                    x0: 0.0,
                    y0: 0.0,
                    x1: 10.0,
                    y1: 0.0,
                    stops: two_stops(Color::rgb(0, 0, 0), Color::rgb(200, 0, 0)),
                },
            },
            DrawCommand::FillRect { x: 0.0, y: 0.0, width: 10.0, height: 1.0 },
        ]);
        assert!(pixel(&renderer, 1, 0)[0] < pixel(&renderer, 8, 0)[0]);
    }

    #[test]
    fn radial_gradients_start_at_the_inner_circle() {
        let mut renderer = Renderer::new(40, 40);
        renderer.apply_batch(&[
            DrawCommand::SetFillStyle {
                paint: Paint::RadialGradient {
                    x0: 20.0,
                    y0: 20.0,
                    r0: 10.0,
                    x1: 20.0,
                    y1: 20.0,
                    r1: 20.0,
                    stops: two_stops(Color::rgb(255, 0, 0), Color::rgb(0, 0, 255)),
                },
            },
            DrawCommand::FillRect { x: 0.0, y: 0.0, width: 40.0, height: 40.0 },
        ]);
        assert_eq!(pixel(&renderer, 20, 20), [255, 0, 0, 255], "inside r0 pads with the first stop");
        assert_eq!(pixel(&renderer, 24, 20), [255, 0, 0, 255]);
        let [r, _, b, _] = pixel(&renderer, 35, 20);
        assert!(r < 128 && b > 128, "past the midpoint of the ring leans to the last stop");
    }

    #[test]
    fn conic_gradients_sweep_around_the_center() {
        let mut renderer = Renderer::new(20, 20);
        renderer.apply_batch(&[
            DrawCommand::SetFillStyle {
                paint: Paint::ConicGradient {
                    start_angle: 0.0,
                    x: 10.0,
                    y: 10.0,
                    stops: two_stops(Color::rgb(0, 0, 0), Color::rgb(255, 255, 255)),
                },
            },
            DrawCommand::FillRect { x: 0.0, y: 0.0, width: 20.0, height: 20.0 },
        ]);
        assert!(pixel(&renderer, 18, 12)[0] < 64, "just past the start angle");
        assert!(pixel(&renderer, 18, 8)[0] > 192, "just before a full turn");
    }

    #[test]
    fn missing_images_and_unknown_commands_are_ignored() {
        let mut renderer = Renderer::new(4, 4);
        renderer.apply_batch(&[
            DrawCommand::DrawImage { asset: "ghost".into(), x: 0.0, y: 0.0, width: None, height: None },
            DrawCommand::Unknown,
        ]);
        assert_eq!(renderer.canvas().painted_pixels(), 0);
        assert_eq!(renderer.stats(), RenderStats { commands: 2, unknown: 1, image_misses: 1 });
    }

    #[test]
    fn cached_images_draw_scaled() {
        let mut png = Vec::new();
        let source = image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 255, 0, 255]));
        source
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .expect("encode png");
        let mut renderer = Renderer::new(10, 10);
        renderer.register_image("dot", &png).expect("decode png");
        renderer.apply(&DrawCommand::DrawImage {
            asset: "dot".into(),
            x: 2.0,
            y: 2.0,
            width: Some(4.0),
            height: Some(4.0),
        });
        assert_eq!(pixel(&renderer, 5, 5), [0, 255, 0, 255]);
        assert_eq!(pixel(&renderer, 7, 7), [0, 0, 0, 0]);
        assert!(renderer.register_image("junk", b"nope").is_err());
    }

    #[test]
    fn put_image_data_ignores_transform() {
        let mut renderer = Renderer::new(4, 4);
        renderer.apply_batch(&[
            DrawCommand::Translate { x: 2.0, y: 2.0 },
            DrawCommand::PutImageData { x: 0, y: 0, width: 1, height: 1, data: vec![10, 20, 30, 255] },
        ]);
        assert_eq!(pixel(&renderer, 0, 0), [10, 20, 30, 255]);
    }

    #[test]
    fn set_size_resets_surface_and_state() {
        let mut renderer = Renderer::new(4, 4);
        renderer.apply_batch(&[
            DrawCommand::SetColor { color: RED },
            DrawCommand::FillRect { x: 0.0, y: 0.0, width: 4.0, height: 4.0 },
            DrawCommand::SetSize { width: 8, height: 2 },
            DrawCommand::FillRect { x: 0.0, y: 0.0, width: 1.0, height: 1.0 },
        ]);
        assert_eq!(renderer.size(), CanvasSize { width: 8, height: 2 });
        assert_eq!(pixel(&renderer, 0, 0), [0, 0, 0, 255], "fill style resets to black");
        assert_eq!(pixel(&renderer, 3, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn text_without_any_font_draws_nothing() {
        let mut renderer = Renderer::new(100, 20).with_fonts(FontBook::without_system_fonts());
        renderer.apply_batch(&[
            DrawCommand::SetColor { color: RED },
            DrawCommand::Text { x: 0.0, y: 16.0, text: "WW".into(), size: Some(20.0), family: None, max_width: None },
        ]);
        assert_eq!(renderer.canvas().painted_pixels(), 0);
        assert!(!renderer.register_font("body", b"not a font".to_vec()));
        assert_eq!(renderer.fonts().count(), 0);
    }

    #[test]
    fn text_draws_glyph_outlines_when_a_font_exists() {
        let mut fonts = FontBook::new();
        let width = fonts.measure("WW", 20.0, DEFAULT_FONT_FAMILY);
        if fonts.outline("WW", (0.0, 18.0), 20.0, DEFAULT_FONT_FAMILY, None).is_none() {
            return;
        }
        let mut renderer = Renderer::new(100, 24).with_fonts(fonts);
        renderer.apply(&DrawCommand::Text {
            x: 0.0,
            y: 18.0,
            text: "WW".into(),
            size: Some(20.0),
            family: None,
            max_width: None,
        });
        assert!(renderer.canvas().painted_pixels() > 0);
        assert!(width < 99.0);
        assert_eq!(pixel(&renderer, 99, 5), [0, 0, 0, 0], "nothing past the measured width");
    }
}
