//! Script-relative asset resolution, loading and the per-runtime asset registry.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AssetValidation;
use crate::error::{EngineError, EngineResult};

pub mod image_info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Font,
    Sound,
    Music,
}

impl AssetKind {
    pub fn label(self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Font => "font",
            AssetKind::Sound => "sound",
            AssetKind::Music => "music",
        }
    }

    pub fn is_audio(self) -> bool {
        matches!(self, AssetKind::Sound | AssetKind::Music)
    }

    fn accepts(self, found: AssetKind) -> bool {
        self == found || (self.is_audio() && found.is_audio())
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDefinition {
    pub name: String,
    pub path: String,
    pub kind: AssetKind,
}

impl AssetDefinition {
    pub fn new(name: impl Into<String>, path: impl Into<String>, kind: AssetKind) -> Self {
        Self { name: name.into(), path: path.into(), kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(pub u32);

/// Immutable reference handed to scripts in place of a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetHandle {
    id: AssetId,
    kind: AssetKind,
    name: String,
    source_file: String,
}

impl AssetHandle {
    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetRef {
    Name(String),
    Handle(AssetId),
}

impl From<&str> for AssetRef {
    fn from(name: &str) -> Self {
        AssetRef::Name(name.to_string())
    }
}

impl From<&AssetHandle> for AssetRef {
    fn from(handle: &AssetHandle) -> Self {
        AssetRef::Handle(handle.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedAsset {
    pub name: String,
    pub kind: AssetKind,
    pub path: String,
    #[serde(with = "crate::channel::bytes")]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// A file found by [`AssetLoader::scan_directory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the scanned directory, `/` separated. Doubles as the asset name.
    pub relative_path: String,
    pub path: String,
    pub kind: AssetKind,
}

fn extension(path: &str) -> Option<String> {
    let file = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// MIME type from the file extension. Unknown extensions have none.
pub fn mime_type(path: &str) -> Option<&'static str> {
    let mime = match extension(path)?.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" => "text/plain",
        "json" => "application/json",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "xml" => "application/xml",
        "rhai" => "text/x-rhai",
        _ => return None,
    };
    Some(mime)
}

/// Asset kind implied by the extension. Audio files classify as sounds.
pub fn kind_for_path(path: &str) -> Option<AssetKind> {
    let mime = mime_type(path)?;
    if mime.starts_with("image/") {
        Some(AssetKind::Image)
    } else if mime.starts_with("font/") {
        Some(AssetKind::Font)
    } else if mime.starts_with("audio/") {
        Some(AssetKind::Sound)
    } else {
        None
    }
}

/// Resolves and reads asset files relative to the directory of the running script.
#[derive(Debug, Clone)]
pub struct AssetLoader {
    script_dir: String,
    validation: AssetValidation,
}

impl AssetLoader {
    pub fn new(script_dir: impl Into<String>, validation: AssetValidation) -> Self {
        Self { script_dir: script_dir.into(), validation }
    }

    /// Loader rooted at the directory containing `script_path`.
    pub fn for_script(script_path: &Path, validation: AssetValidation) -> Self {
        let dir = script_path.parent().map(|dir| dir.to_string_lossy().into_owned()).unwrap_or_default();
        Self::new(dir, validation)
    }

    pub fn script_dir(&self) -> &str {
        &self.script_dir
    }

    pub fn validation(&self) -> AssetValidation {
        self.validation
    }

    pub fn resolve_path(&self, path: &str) -> EngineResult<String> {
        if path.trim().is_empty() {
            return Err(EngineError::EmptyPath);
        }
        if path.starts_with('/') || Path::new(path).is_absolute() {
            return Ok(path.to_string());
        }
        let relative = path.strip_prefix("./").unwrap_or(path);
        let dir = self.script_dir.trim_end_matches('/');
        if dir.is_empty() {
            if self.script_dir.starts_with('/') {
                return Ok(format!("/{relative}"));
            }
            return Ok(relative.to_string());
        }
        Ok(format!("{dir}/{relative}"))
    }

    pub fn load_asset(&self, definition: &AssetDefinition) -> EngineResult<LoadedAsset> {
        let path = self.resolve_path(&definition.path)?;
        let is_file = fs::metadata(&path).map(|meta| meta.is_file()).unwrap_or(false);
        if !is_file {
            return Err(EngineError::AssetNotFound { path });
        }
        if self.validation == AssetValidation::Strict {
            let matches = kind_for_path(&path).is_some_and(|found| definition.kind.accepts(found));
            if !matches {
                return Err(EngineError::UnsupportedFormat { path });
            }
        }
        let data = fs::read(&path).map_err(|err| EngineError::io(&path, err))?;
        let mut asset = LoadedAsset {
            name: definition.name.clone(),
            kind: definition.kind,
            mime_type: mime_type(&path).map(str::to_string),
            path,
            data,
            width: None,
            height: None,
        };
        if definition.kind == AssetKind::Image {
            self.fill_dimensions(&mut asset)?;
        }
        debug!(
            name = %asset.name,
            kind = %asset.kind,
            bytes = asset.data.len(),
            "[assets] loaded '{}'",
            asset.path
        );
        Ok(asset)
    }

    fn fill_dimensions(&self, asset: &mut LoadedAsset) -> EngineResult<()> {
        let Some(format) = extension(&asset.path).and_then(|ext| image_info::format_for_extension(&ext)) else {
            return Ok(());
        };
        match image_info::dimensions(format, &asset.data) {
            Ok((width, height)) => {
                asset.width = Some(width);
                asset.height = Some(height);
            }
            Err(err) if self.validation == AssetValidation::Strict => {
                return Err(EngineError::InvalidImageData { path: asset.path.clone(), reason: err.to_string() });
            }
            Err(err) => {
                debug!("[assets] no dimensions for '{}': {err}", asset.path);
            }
        }
        Ok(())
    }

    /// Recursively lists the image and font files under `base`, sorted by relative path.
    pub fn scan_directory(&self, base: &str) -> EngineResult<Vec<DiscoveredFile>> {
        let root = self.resolve_path(base)?;
        match fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(EngineError::NotADirectory { path: root }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(EngineError::NotFound { path: root }),
            Err(err) => return Err(EngineError::io(&root, err)),
        }
        let mut found = Vec::new();
        walk(Path::new(&root), "", &mut found)?;
        found.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(found)
    }
}

fn walk(dir: &Path, prefix: &str, found: &mut Vec<DiscoveredFile>) -> EngineResult<()> {
    let entries = fs::read_dir(dir).map_err(|err| EngineError::io(dir, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| EngineError::io(dir, err))?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let relative = if prefix.is_empty() { file_name.clone() } else { format!("{prefix}/{file_name}") };
        let path = entry.path();
        let file_type = entry.file_type().map_err(|err| EngineError::io(&path, err))?;
        if file_type.is_dir() {
            walk(&path, &relative, found)?;
            continue;
        }
        match kind_for_path(&file_name) {
            Some(kind @ (AssetKind::Image | AssetKind::Font)) => found.push(DiscoveredFile {
                relative_path: relative,
                path: path.to_string_lossy().into_owned(),
                kind,
            }),
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct RegisteredAsset {
    handle: AssetHandle,
    width: Option<u32>,
    height: Option<u32>,
}

/// Names and handles of everything a runtime registered. Re-registering a name points it at the
/// new asset; handles to the old one keep resolving.
#[derive(Debug, Default)]
pub struct AssetRegistry {
    assets: Vec<RegisteredAsset>,
    by_name: HashMap<String, AssetId>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, asset: &LoadedAsset) -> AssetHandle {
        let id = AssetId(self.assets.len() as u32);
        let handle =
            AssetHandle { id, kind: asset.kind, name: asset.name.clone(), source_file: asset.path.clone() };
        self.assets.push(RegisteredAsset { handle: handle.clone(), width: asset.width, height: asset.height });
        self.by_name.insert(asset.name.clone(), id);
        handle
    }

    fn entry(&self, reference: &AssetRef) -> EngineResult<&RegisteredAsset> {
        let found = match reference {
            AssetRef::Name(name) => self.by_name.get(name).and_then(|id| self.assets.get(id.0 as usize)),
            AssetRef::Handle(id) => self.assets.get(id.0 as usize),
        };
        found.ok_or_else(|| EngineError::UnknownAsset {
            name: match reference {
                AssetRef::Name(name) => name.clone(),
                AssetRef::Handle(id) => format!("#{}", id.0),
            },
        })
    }

    pub fn resolve(&self, reference: &AssetRef) -> EngineResult<&AssetHandle> {
        self.entry(reference).map(|entry| &entry.handle)
    }

    pub fn dimensions(&self, reference: &AssetRef) -> EngineResult<(Option<u32>, Option<u32>)> {
        self.entry(reference).map(|entry| (entry.width, entry.height))
    }

    pub fn has_asset(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn asset_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn loader(dir: &str) -> AssetLoader {
        AssetLoader::new(dir, AssetValidation::Lenient)
    }

    #[test]
    fn resolve_path_joins_script_dir() {
        let loader = loader("/my-files/games");
        assert_eq!(loader.resolve_path("sprites/player.png").unwrap(), "/my-files/games/sprites/player.png");
        assert_eq!(loader.resolve_path("./sprites/player.png").unwrap(), "/my-files/games/sprites/player.png");
        assert_eq!(loader.resolve_path("/shared/x.png").unwrap(), "/shared/x.png");
        assert_eq!(
            AssetLoader::new("/my-files/games/", AssetValidation::Lenient).resolve_path("a.png").unwrap(),
            "/my-files/games/a.png"
        );
        assert!(matches!(loader.resolve_path(""), Err(EngineError::EmptyPath)));
        assert!(matches!(loader.resolve_path("   "), Err(EngineError::EmptyPath)));
    }

    #[test]
    fn mime_types_ignore_case() {
        assert_eq!(mime_type("hero.PNG"), Some("image/png"));
        assert_eq!(mime_type("theme.ogg"), Some("audio/ogg"));
        assert_eq!(mime_type("font.woff2"), Some("font/woff2"));
        assert_eq!(mime_type("notes.bin"), None);
        assert_eq!(mime_type("Makefile"), None);
        assert_eq!(kind_for_path("a/b/c.jpeg"), Some(AssetKind::Image));
        assert_eq!(kind_for_path("readme.md"), None);
    }

    #[test]
    fn png_dimensions_are_extracted() {
        let dir = tempdir().expect("temp dir");
        let png = image_info::tests::encoded(16, 32, image::ImageFormat::Png);
        fs::write(dir.path().join("tile.png"), png).expect("write png");
        let loader = loader(&dir.path().to_string_lossy());
        let asset =
            loader.load_asset(&AssetDefinition::new("tile", "tile.png", AssetKind::Image)).expect("load png");
        assert_eq!((asset.width, asset.height), (Some(16), Some(32)));
        assert_eq!(asset.mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn corrupt_header_is_lenient_by_default_and_strict_on_request() {
        let dir = tempdir().expect("temp dir");
        fs::write(dir.path().join("broken.png"), [0x89, b'P', b'N', b'G']).expect("write png");
        let definition = AssetDefinition::new("broken", "broken.png", AssetKind::Image);
        let root = dir.path().to_string_lossy().into_owned();

        let asset = loader(&root).load_asset(&definition).expect("lenient load");
        assert_eq!((asset.width, asset.height), (None, None));
        assert_eq!(asset.data.len(), 4);

        let strict = AssetLoader::new(root, AssetValidation::Strict);
        assert!(matches!(strict.load_asset(&definition), Err(EngineError::InvalidImageData { .. })));
    }

    #[test]
    fn strict_mode_checks_extension_against_kind() {
        let dir = tempdir().expect("temp dir");
        fs::write(dir.path().join("jump.wav"), b"RIFF").expect("write wav");
        let strict = AssetLoader::new(dir.path().to_string_lossy(), AssetValidation::Strict);
        let err = strict.load_asset(&AssetDefinition::new("jump", "jump.wav", AssetKind::Image)).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat { .. }));
        strict.load_asset(&AssetDefinition::new("jump", "jump.wav", AssetKind::Music)).expect("music accepts wav");
    }

    #[test]
    fn missing_files_and_directories_are_not_found() {
        let dir = tempdir().expect("temp dir");
        fs::create_dir(dir.path().join("sprites")).expect("mkdir");
        let loader = loader(&dir.path().to_string_lossy());
        let err = loader.load_asset(&AssetDefinition::new("x", "nope.png", AssetKind::Image)).unwrap_err();
        assert!(matches!(err, EngineError::AssetNotFound { .. }));
        let err = loader.load_asset(&AssetDefinition::new("x", "sprites", AssetKind::Image)).unwrap_err();
        assert!(matches!(err, EngineError::AssetNotFound { .. }), "directories are not assets");
    }

    #[test]
    fn scan_directory_finds_images_and_fonts() {
        let dir = tempdir().expect("temp dir");
        fs::create_dir_all(dir.path().join("art/ui")).expect("mkdir");
        fs::write(dir.path().join("art/hero.png"), b"").expect("write");
        fs::write(dir.path().join("art/ui/button.gif"), b"").expect("write");
        fs::write(dir.path().join("pixel.ttf"), b"").expect("write");
        fs::write(dir.path().join("jump.wav"), b"").expect("write");
        fs::write(dir.path().join("notes.txt"), b"").expect("write");

        let loader = loader(&dir.path().to_string_lossy());
        let found = loader.scan_directory(".").expect("scan");
        let names: Vec<&str> = found.iter().map(|file| file.relative_path.as_str()).collect();
        assert_eq!(names, vec!["art/hero.png", "art/ui/button.gif", "pixel.ttf"]);
        assert_eq!(found[2].kind, AssetKind::Font);

        assert!(matches!(loader.scan_directory("missing"), Err(EngineError::NotFound { .. })));
        assert!(matches!(loader.scan_directory("notes.txt"), Err(EngineError::NotADirectory { .. })));
    }

    #[test]
    fn registry_resolves_names_and_handles() {
        let mut registry = AssetRegistry::new();
        let asset = LoadedAsset {
            name: "hero".into(),
            kind: AssetKind::Image,
            path: "/games/hero.png".into(),
            data: Vec::new(),
            mime_type: None,
            width: Some(8),
            height: Some(4),
        };
        let handle = registry.register(&asset);
        assert_eq!(handle.source_file(), "/games/hero.png");
        assert_eq!(registry.resolve(&AssetRef::from("hero")).expect("by name").id(), handle.id());
        assert_eq!(registry.dimensions(&AssetRef::from(&handle)).expect("by handle"), (Some(8), Some(4)));
        let err = registry.resolve(&AssetRef::from("villain")).unwrap_err();
        assert!(matches!(err, EngineError::UnknownAsset { ref name } if name == "villain"));
        assert!(registry.resolve(&AssetRef::Handle(AssetId(42))).is_err());
    }
}
