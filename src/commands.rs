//! Draw command vocabulary exchanged between the script side and the render side.
//!
//! A frame's batch is an ordered `Vec<DrawCommand>`; order is render order. Audio commands ride
//! in the same batch so that sound and picture stay in step.

use serde::{Deserialize, Serialize};

/// RGB color with optional alpha. Channels are clamped to `[0, 255]` on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<u8>,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: None };
    pub const TRANSPARENT: Color = Color { r: 0, g: 0, b: 0, a: Some(0) };

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: None }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a: Some(a) }
    }

    /// Builds a color from unbounded script numbers, clamping every channel.
    pub fn from_channels(r: f64, g: f64, b: f64, a: Option<f64>) -> Self {
        Self { r: clamp_channel(r), g: clamp_channel(g), b: clamp_channel(b), a: a.map(clamp_channel) }
    }

    pub fn alpha(&self) -> u8 {
        self.a.unwrap_or(255)
    }

    pub fn to_rgba(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.alpha()]
    }

    /// Opaque colors format as `#rrggbb`, anything else as `rgba(r, g, b, a)` with a in `[0, 1]`.
    pub fn to_css(&self) -> String {
        match self.a {
            None | Some(255) => format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b),
            Some(a) => {
                let alpha = a as f64 / 255.0;
                let alpha = (alpha * 1000.0).round() / 1000.0;
                format!("rgba({}, {}, {}, {})", self.r, self.g, self.b, alpha)
            }
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

fn clamp_channel(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    pub offset: f64,
    pub color: Color,
}

/// Fill or stroke style. Gradient geometry is in user space at the moment the shape is painted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Paint {
    Solid { color: Color },
    LinearGradient { x0: f64, y0: f64, x1: f64, y1: f64, stops: Vec<ColorStop> },
    RadialGradient { x0: f64, y0: f64, r0: f64, x1: f64, y1: f64, r1: f64, stops: Vec<ColorStop> },
    ConicGradient { start_angle: f64, x: f64, y: f64, stops: Vec<ColorStop> },
}

impl Default for Paint {
    fn default() -> Self {
        Paint::Solid { color: Color::BLACK }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DrawCommand {
    Clear,
    SetSize { width: u32, height: u32 },

    SetColor { color: Color },
    SetFillStyle { paint: Paint },
    SetStrokeStyle { paint: Paint },
    SetLineWidth { width: f64 },
    SetFontSize { size: f64 },
    SetFontFamily { family: String },

    Rect { x: f64, y: f64, width: f64, height: f64 },
    FillRect { x: f64, y: f64, width: f64, height: f64 },
    Circle { x: f64, y: f64, radius: f64 },
    FillCircle { x: f64, y: f64, radius: f64 },
    Line { x1: f64, y1: f64, x2: f64, y2: f64 },
    BeginPath,
    ClosePath,
    MoveTo { x: f64, y: f64 },
    LineTo { x: f64, y: f64 },
    Arc { x: f64, y: f64, radius: f64, start_angle: f64, end_angle: f64, counterclockwise: bool },
    BezierCurveTo { cp1x: f64, cp1y: f64, cp2x: f64, cp2y: f64, x: f64, y: f64 },
    QuadraticCurveTo { cpx: f64, cpy: f64, x: f64, y: f64 },
    Ellipse {
        x: f64,
        y: f64,
        radius_x: f64,
        radius_y: f64,
        rotation: f64,
        start_angle: f64,
        end_angle: f64,
        counterclockwise: bool,
    },
    RoundRect { x: f64, y: f64, width: f64, height: f64, radius: f64 },
    Fill,
    Stroke,
    Clip,

    Text {
        x: f64,
        y: f64,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        family: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_width: Option<f64>,
    },
    StrokeText {
        x: f64,
        y: f64,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        family: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_width: Option<f64>,
    },

    Translate { x: f64, y: f64 },
    Rotate { angle: f64 },
    Scale { x: f64, y: f64 },
    Transform { a: f64, b: f64, c: f64, d: f64, e: f64, f: f64 },
    SetTransform { a: f64, b: f64, c: f64, d: f64, e: f64, f: f64 },
    ResetTransform,
    Save,
    Restore,

    DrawImage {
        asset: String,
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<f64>,
    },
    PutImageData {
        x: i64,
        y: i64,
        width: u32,
        height: u32,
        #[serde(with = "crate::channel::bytes")]
        data: Vec<u8>,
    },

    PlaySound {
        asset: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        volume: Option<f32>,
    },
    PlayMusic {
        asset: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        volume: Option<f32>,
        #[serde(default = "default_music_loop")]
        looped: bool,
    },
    StopMusic,
    PauseMusic,
    ResumeMusic,
    SetMusicVolume { volume: f32 },
    SetMasterVolume { volume: f32 },
    Mute,
    Unmute,

    /// Any tag this build does not know. Decoding never fails on a newer peer's commands.
    #[serde(other)]
    Unknown,
}

fn default_music_loop() -> bool {
    true
}

impl DrawCommand {
    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            DrawCommand::PlaySound { .. }
                | DrawCommand::PlayMusic { .. }
                | DrawCommand::StopMusic
                | DrawCommand::PauseMusic
                | DrawCommand::ResumeMusic
                | DrawCommand::SetMusicVolume { .. }
                | DrawCommand::SetMasterVolume { .. }
                | DrawCommand::Mute
                | DrawCommand::Unmute
        )
    }

    /// Short human readable label used by the harness and debug logging.
    pub fn summary(&self) -> String {
        match self {
            DrawCommand::Clear => "clear".to_string(),
            DrawCommand::SetSize { width, height } => format!("setSize {width}x{height}"),
            DrawCommand::SetColor { color } => format!("setColor {}", color.to_css()),
            DrawCommand::SetFillStyle { paint } => format!("setFillStyle {}", paint_label(paint)),
            DrawCommand::SetStrokeStyle { paint } => format!("setStrokeStyle {}", paint_label(paint)),
            DrawCommand::SetLineWidth { width } => format!("setLineWidth {width}"),
            DrawCommand::SetFontSize { size } => format!("setFontSize {size}"),
            DrawCommand::SetFontFamily { family } => format!("setFontFamily {family}"),
            DrawCommand::Rect { x, y, width, height } => format!("rect {x},{y} {width}x{height}"),
            DrawCommand::FillRect { x, y, width, height } => format!("fillRect {x},{y} {width}x{height}"),
            DrawCommand::Circle { x, y, radius } => format!("circle {x},{y} r{radius}"),
            DrawCommand::FillCircle { x, y, radius } => format!("fillCircle {x},{y} r{radius}"),
            DrawCommand::Line { x1, y1, x2, y2 } => format!("line {x1},{y1} -> {x2},{y2}"),
            DrawCommand::Text { text, .. } => format!("text {text:?}"),
            DrawCommand::StrokeText { text, .. } => format!("strokeText {text:?}"),
            DrawCommand::DrawImage { asset, .. } => format!("drawImage {asset}"),
            DrawCommand::PutImageData { x, y, width, height, .. } => {
                format!("putImageData {x},{y} {width}x{height}")
            }
            DrawCommand::PlaySound { asset, .. } => format!("playSound {asset}"),
            DrawCommand::PlayMusic { asset, .. } => format!("playMusic {asset}"),
            other => command_tag(other).to_string(),
        }
    }
}

fn paint_label(paint: &Paint) -> String {
    match paint {
        Paint::Solid { color } => color.to_css(),
        Paint::LinearGradient { stops, .. } => format!("linear({} stops)", stops.len()),
        Paint::RadialGradient { stops, .. } => format!("radial({} stops)", stops.len()),
        Paint::ConicGradient { stops, .. } => format!("conic({} stops)", stops.len()),
    }
}

fn command_tag(command: &DrawCommand) -> &'static str {
    match command {
        DrawCommand::BeginPath => "beginPath",
        DrawCommand::ClosePath => "closePath",
        DrawCommand::MoveTo { .. } => "moveTo",
        DrawCommand::LineTo { .. } => "lineTo",
        DrawCommand::Arc { .. } => "arc",
        DrawCommand::BezierCurveTo { .. } => "bezierCurveTo",
        DrawCommand::QuadraticCurveTo { .. } => "quadraticCurveTo",
        DrawCommand::Ellipse { .. } => "ellipse",
        DrawCommand::RoundRect { .. } => "roundRect",
        DrawCommand::Fill => "fill",
        DrawCommand::Stroke => "stroke",
        DrawCommand::Clip => "clip",
        DrawCommand::Translate { .. } => "translate",
        DrawCommand::Rotate { .. } => "rotate",
        DrawCommand::Scale { .. } => "scale",
        DrawCommand::Transform { .. } => "transform",
        DrawCommand::SetTransform { .. } => "setTransform",
        DrawCommand::ResetTransform => "resetTransform",
        DrawCommand::Save => "save",
        DrawCommand::Restore => "restore",
        DrawCommand::StopMusic => "stopMusic",
        DrawCommand::PauseMusic => "pauseMusic",
        DrawCommand::ResumeMusic => "resumeMusic",
        DrawCommand::SetMusicVolume { .. } => "setMusicVolume",
        DrawCommand::SetMasterVolume { .. } => "setMasterVolume",
        DrawCommand::Mute => "mute",
        DrawCommand::Unmute => "unmute",
        _ => "unknown",
    }
}
