#![allow(dead_code)]

use std::io::Cursor;
use std::thread;

use lark_engine::assets::AssetLoader;
use lark_engine::audio::AudioBridge;
use lark_engine::bridge::WorkerState;
use lark_engine::channel::local::local_pair;
use lark_engine::config::{AssetValidation, ScriptConfig};
use lark_engine::frame::CanvasSize;
use lark_engine::host::{HostReport, RenderHost};
use lark_engine::input::InputEvent;
use lark_engine::renderer::Renderer;
use lark_engine::time::FrameClock;
use lark_engine::ScriptRuntime;

pub struct Session {
    pub runtime: ScriptRuntime,
    pub result: anyhow::Result<()>,
    /// State when the script returned, before the runtime was disposed.
    pub state: WorkerState,
    pub report: HostReport,
}

impl Session {
    pub fn string(&self, name: &str) -> String {
        self.runtime.value::<String>(name).unwrap_or_else(|| panic!("script variable '{name}' missing"))
    }

    pub fn int(&self, name: &str) -> i64 {
        self.runtime.value::<i64>(name).unwrap_or_else(|| panic!("script variable '{name}' missing"))
    }

    pub fn flag(&self, name: &str) -> bool {
        self.runtime.value::<bool>(name).unwrap_or_else(|| panic!("script variable '{name}' missing"))
    }
}

pub struct Setup {
    pub frames: u64,
    pub size: (u32, u32),
    pub config: ScriptConfig,
    pub loader: AssetLoader,
    pub inputs: Vec<(u64, InputEvent)>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            frames: 20,
            size: (32, 32),
            config: ScriptConfig::default(),
            loader: AssetLoader::new(".", AssetValidation::Lenient),
            inputs: Vec::new(),
        }
    }
}

/// Host on a background thread, script on this one.
pub fn run_script(source: &str, setup: Setup) -> Session {
    let (width, height) = setup.size;
    let (channel, link) = local_pair(CanvasSize { width, height });
    let frames = setup.frames;
    let inputs = setup.inputs;
    let host = thread::spawn(move || {
        let mut host =
            RenderHost::new(link, Renderer::new(width, height), AudioBridge::disabled(), FrameClock::fixed(0.5))
                .with_max_frames(Some(frames))
                .with_recording();
        for (frame, event) in inputs {
            host.schedule_input(frame, event);
        }
        host.run().expect("host run")
    });

    let mut runtime = ScriptRuntime::new(Box::new(channel), setup.loader, &setup.config);
    let result = runtime.run_source(source);
    let state = runtime.state();
    runtime.dispose();
    let report = host.join().expect("host thread");
    Session { runtime, result, state, report }
}

pub fn run_default(source: &str) -> Session {
    run_script(source, Setup::default())
}

/// A real PNG filled with one color.
pub fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, image::ImageFormat::Png).expect("encode png");
    bytes.into_inner()
}
