//! Fill and stroke styles as tiny-skia shaders.
//!
//! Shapes are drawn in user space with the current transform, so gradient geometry is given in
//! user space too. Conic sweeps have no tiny-skia shader; they are rendered into a device-sized
//! pattern whose transform undoes the current one.

use std::f64::consts::TAU;

use tiny_skia::{
    ColorU8, FilterQuality, GradientStop, LinearGradient, Pattern, Pixmap, Point, RadialGradient, Shader,
    SpreadMode, Transform,
};

use crate::commands::{Color, ColorStop, Paint};

pub enum Brush {
    Shader(Shader<'static>),
    Pattern { pixmap: Pixmap, transform: Transform },
}

impl Brush {
    /// `None` when the style paints nothing: no stops, a zero-length axis, or an
    /// unusable transform for conic sweeps.
    pub fn new(paint: &Paint, transform: Transform, width: u32, height: u32) -> Option<Self> {
        match paint {
            Paint::Solid { color } => Some(Brush::Shader(Shader::SolidColor(skia_color(*color)))),
            Paint::LinearGradient { x0, y0, x1, y1, stops } => {
                if x0 == x1 && y0 == y1 {
                    return None;
                }
                let shader = LinearGradient::new(
                    point(*x0, *y0),
                    point(*x1, *y1),
                    gradient_stops(&sorted_stops(stops))?,
                    SpreadMode::Pad,
                    Transform::identity(),
                )?;
                Some(Brush::Shader(shader))
            }
            Paint::RadialGradient { x0, y0, r0, x1, y1, r1, stops } => {
                radial(((*x0, *y0), *r0), ((*x1, *y1), *r1), stops).map(Brush::Shader)
            }
            Paint::ConicGradient { start_angle, x, y, stops } => {
                conic(*start_angle, (*x, *y), stops, transform, width, height)
            }
        }
    }

    pub fn paint(&self) -> tiny_skia::Paint<'_> {
        let shader = match self {
            Brush::Shader(shader) => shader.clone(),
            Brush::Pattern { pixmap, transform } => {
                Pattern::new(pixmap.as_ref(), SpreadMode::Pad, FilterQuality::Nearest, 1.0, *transform)
            }
        };
        tiny_skia::Paint { shader, anti_alias: true, ..Default::default() }
    }
}

pub fn skia_color(color: Color) -> tiny_skia::Color {
    let [r, g, b, a] = color.to_rgba();
    tiny_skia::Color::from_rgba8(r, g, b, a)
}

fn point(x: f64, y: f64) -> Point {
    Point::from_xy(x as f32, y as f32)
}

/// Two-circle gradient. tiny-skia's radial shader is focal: it starts at a point and ends on a
/// circle. The smaller circle becomes the focal point and the stops are remapped so that offset
/// 0 lands on its rim, which is exact for concentric circles.
fn radial(start: ((f64, f64), f64), end: ((f64, f64), f64), stops: &[ColorStop]) -> Option<Shader<'static>> {
    let (((x0, y0), r0), ((x1, y1), r1)) = (start, end);
    let (r0, r1) = (r0.max(0.0), r1.max(0.0));
    if !(r0.is_finite() && r1.is_finite()) || (r0 == r1 && x0 == x1 && y0 == y1) {
        return None;
    }
    let mut sorted = sorted_stops(stops);
    let (focal, center, inner, outer) = if r0 <= r1 {
        ((x0, y0), (x1, y1), r0, r1)
    } else {
        sorted = sorted.into_iter().rev().map(|(offset, rgba)| (1.0 - offset, rgba)).collect();
        ((x1, y1), (x0, y0), r1, r0)
    };
    if outer <= 0.0 {
        return None;
    }
    let rim = inner / outer;
    let remapped: Vec<(f64, [u8; 4])> =
        sorted.into_iter().map(|(offset, rgba)| (rim + offset * (1.0 - rim), rgba)).collect();
    RadialGradient::new(
        point(focal.0, focal.1),
        point(center.0, center.1),
        outer as f32,
        gradient_stops(&remapped)?,
        SpreadMode::Pad,
        Transform::identity(),
    )
}

fn conic(
    start_angle: f64,
    center: (f64, f64),
    stops: &[ColorStop],
    transform: Transform,
    width: u32,
    height: u32,
) -> Option<Brush> {
    let stops = sorted_stops(stops);
    if stops.is_empty() {
        return None;
    }
    let to_user = transform.invert()?;
    let mut pixmap = Pixmap::new(width, height)?;
    let row = width as usize;
    for (i, pixel) in pixmap.pixels_mut().iter_mut().enumerate() {
        let mut user = Point::from_xy((i % row) as f32 + 0.5, (i / row) as f32 + 0.5);
        to_user.map_point(&mut user);
        let angle = (f64::from(user.y) - center.1).atan2(f64::from(user.x) - center.0);
        let [r, g, b, a] = color_at(&stops, (angle - start_angle).rem_euclid(TAU) / TAU);
        *pixel = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Some(Brush::Pattern { pixmap, transform: to_user })
}

fn sorted_stops(stops: &[ColorStop]) -> Vec<(f64, [u8; 4])> {
    let mut out: Vec<(f64, [u8; 4])> = stops
        .iter()
        .filter(|stop| stop.offset.is_finite())
        .map(|stop| (stop.offset.clamp(0.0, 1.0), stop.color.to_rgba()))
        .collect();
    out.sort_by(|a, b| a.0.total_cmp(&b.0));
    out
}

fn gradient_stops(stops: &[(f64, [u8; 4])]) -> Option<Vec<GradientStop>> {
    if stops.is_empty() {
        return None;
    }
    Some(
        stops
            .iter()
            .map(|(offset, [r, g, b, a])| {
                GradientStop::new(*offset as f32, tiny_skia::Color::from_rgba8(*r, *g, *b, *a))
            })
            .collect(),
    )
}

fn color_at(stops: &[(f64, [u8; 4])], t: f64) -> [u8; 4] {
    let (Some(first), Some(last)) = (stops.first(), stops.last()) else {
        return [0; 4];
    };
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    if t <= first.0 {
        return first.1;
    }
    for pair in stops.windows(2) {
        let ((a_at, a), (b_at, b)) = (pair[0], pair[1]);
        if t >= a_at && t <= b_at {
            let span = b_at - a_at;
            let f = if span <= f64::EPSILON { 1.0 } else { (t - a_at) / span };
            let mut mixed = [0u8; 4];
            for (i, channel) in mixed.iter_mut().enumerate() {
                let (from, to) = (f64::from(a[i]), f64::from(b[i]));
                *channel = (from + (to - from) * f).round().clamp(0.0, 255.0) as u8;
            }
            return mixed;
        }
    }
    last.1
}
