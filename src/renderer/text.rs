//! Font lookup, text metrics and glyph outlines.
//!
//! Fonts registered as assets are looked up by asset name first. Any other family goes to the
//! system fonts through `fontdb`, with generic fallbacks. When no font can be found, text is
//! measured with a fixed advance per character and draws nothing.
//!
//! The script side and the renderer each own a [`FontBook`] fed with the same font assets, so
//! `get_text_width` and the drawn glyphs agree.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use fontdb::{Database, Family, Query};
use tiny_skia::{Path, PathBuilder};
use tracing::{debug, warn};
use ttf_parser::{Face, GlyphId, OutlineBuilder};

pub const DEFAULT_FONT_FAMILY: &str = "monospace";
pub const DEFAULT_FONT_SIZE: f64 = 16.0;

/// Advance of one character as a fraction of the font size when no font is available.
const FALLBACK_ADVANCE: f64 = 0.6;

static SYSTEM_FONTS: OnceLock<Database> = OnceLock::new();

fn system_fonts() -> &'static Database {
    SYSTEM_FONTS.get_or_init(|| {
        let mut db = Database::new();
        db.load_system_fonts();
        debug!("[fonts] {} system face(s) available", db.len());
        db
    })
}

/// Width of `text` without any font: a fixed advance per character.
pub fn fallback_width(text: &str, size: f64) -> f64 {
    text.chars().count() as f64 * size * FALLBACK_ADVANCE
}

#[derive(Clone)]
struct FontData {
    bytes: Arc<Vec<u8>>,
    index: u32,
}

impl FontData {
    fn face(&self) -> Option<Face<'_>> {
        Face::parse(&self.bytes, self.index).ok()
    }
}

pub struct FontBook {
    registered: BTreeMap<String, FontData>,
    system: HashMap<String, Option<FontData>>,
    use_system: bool,
}

impl Default for FontBook {
    fn default() -> Self {
        Self::new()
    }
}

impl FontBook {
    /// Registered fonts plus the system fonts.
    pub fn new() -> Self {
        Self { registered: BTreeMap::new(), system: HashMap::new(), use_system: true }
    }

    /// Only fonts registered through [`FontBook::register`]. Output does not depend on the
    /// fonts installed on the machine.
    pub fn without_system_fonts() -> Self {
        Self { use_system: false, ..Self::new() }
    }

    /// Stores a font under an asset name. Bytes that do not parse as a font are rejected.
    pub fn register(&mut self, name: &str, bytes: Vec<u8>) -> bool {
        if let Err(err) = Face::parse(&bytes, 0) {
            warn!("[fonts] '{name}' is not a usable font: {err}");
            return false;
        }
        debug!("[fonts] registered '{name}' ({} bytes)", bytes.len());
        self.registered.insert(name.to_string(), FontData { bytes: Arc::new(bytes), index: 0 });
        true
    }

    pub fn has_font(&self, name: &str) -> bool {
        self.registered.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.registered.keys().map(String::as_str)
    }

    fn lookup(&mut self, family: &str) -> Option<FontData> {
        if let Some(font) = self.registered.get(family) {
            return Some(font.clone());
        }
        if !self.use_system {
            return None;
        }
        self.system.entry(family.to_string()).or_insert_with(|| query_system(family)).clone()
    }

    /// Advance width of `text` at `size` pixels.
    pub fn measure(&mut self, text: &str, size: f64, family: &str) -> f64 {
        let Some(font) = self.lookup(family) else {
            return fallback_width(text, size);
        };
        match font.face() {
            Some(face) => advance_units(&face, text) * size / f64::from(face.units_per_em()),
            None => fallback_width(text, size),
        }
    }

    /// Glyph outlines in user space with the alphabetic baseline at `y`. Text wider than
    /// `max_width` is squeezed horizontally to fit. `None` when nothing would be drawn.
    pub fn outline(
        &mut self,
        text: &str,
        (x, y): (f64, f64),
        size: f64,
        family: &str,
        max_width: Option<f64>,
    ) -> Option<Path> {
        let font = self.lookup(family)?;
        let face = font.face()?;
        let scale = size / f64::from(face.units_per_em());
        let width = advance_units(&face, text) * scale;
        let squeeze = match max_width {
            Some(limit) if limit >= 0.0 && width > limit && width > 0.0 => limit / width,
            _ => 1.0,
        };
        let mut builder = PathBuilder::new();
        let mut pen_x = x;
        for ch in text.chars() {
            let glyph = face.glyph_index(ch).unwrap_or(GlyphId(0));
            let mut pen = GlyphPen {
                builder: &mut builder,
                x: pen_x as f32,
                y: y as f32,
                sx: (scale * squeeze) as f32,
                sy: scale as f32,
            };
            face.outline_glyph(glyph, &mut pen);
            pen_x += f64::from(face.glyph_hor_advance(glyph).unwrap_or(0)) * scale * squeeze;
        }
        builder.finish()
    }
}

fn advance_units(face: &Face<'_>, text: &str) -> f64 {
    text.chars()
        .map(|ch| face.glyph_index(ch).unwrap_or(GlyphId(0)))
        .map(|glyph| f64::from(face.glyph_hor_advance(glyph).unwrap_or(0)))
        .sum()
}

fn query_system(family: &str) -> Option<FontData> {
    let db = system_fonts();
    let requested = match family.to_ascii_lowercase().as_str() {
        "monospace" => Family::Monospace,
        "serif" => Family::Serif,
        "sans-serif" => Family::SansSerif,
        "cursive" => Family::Cursive,
        "fantasy" => Family::Fantasy,
        _ => Family::Name(family),
    };
    let families = [requested, Family::SansSerif, Family::Monospace, Family::Serif];
    let id = db
        .query(&Query { families: &families, ..Query::default() })
        .or_else(|| db.faces().next().map(|face| face.id))?;
    let font = db.with_face_data(id, |data, index| FontData { bytes: Arc::new(data.to_vec()), index });
    if font.is_none() {
        warn!("[fonts] system font for '{family}' could not be read");
    }
    font
}

/// Feeds glyph outlines (font units, y up) into a path (pixels, y down).
struct GlyphPen<'a> {
    builder: &'a mut PathBuilder,
    x: f32,
    y: f32,
    sx: f32,
    sy: f32,
}

impl GlyphPen<'_> {
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.x + x * self.sx, self.y - y * self.sy)
    }
}

impl OutlineBuilder for GlyphPen<'_> {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fonts_fall_back_to_fixed_advance() {
        let mut book = FontBook::without_system_fonts();
        assert_eq!(book.measure("abcd", 10.0, DEFAULT_FONT_FAMILY), 24.0);
        assert_eq!(fallback_width("", 10.0), 0.0);
        assert!(book.outline("abcd", (0.0, 10.0), 10.0, DEFAULT_FONT_FAMILY, None).is_none());
    }

    #[test]
    fn invalid_font_bytes_are_rejected() {
        let mut book = FontBook::without_system_fonts();
        assert!(!book.register("body", b"not really a font".to_vec()));
        assert!(!book.has_font("body"));
        assert_eq!(book.names().count(), 0);
    }

    #[test]
    fn system_fonts_measure_and_outline_consistently() {
        let mut book = FontBook::new();
        if book.lookup(DEFAULT_FONT_FAMILY).is_none() {
            return;
        }
        let narrow = book.measure("i", 20.0, DEFAULT_FONT_FAMILY);
        let wide = book.measure("iiii", 20.0, DEFAULT_FONT_FAMILY);
        assert!(wide > narrow && (wide - narrow * 4.0).abs() < 1e-6);
        assert_eq!(book.measure("iiii", 40.0, DEFAULT_FONT_FAMILY), wide * 2.0);

        let path = book.outline("H", (0.0, 20.0), 20.0, DEFAULT_FONT_FAMILY, None).expect("glyph outline");
        let bounds = path.bounds();
        assert!(bounds.bottom() <= 20.5, "glyphs sit on the baseline");
        let squeezed = book.outline("HHHH", (0.0, 20.0), 20.0, DEFAULT_FONT_FAMILY, Some(10.0)).expect("outline");
        assert!(squeezed.bounds().right() <= 10.5);
    }
}
