//! The boundary between the script's execution context and the render context.

use std::collections::BTreeSet;

use crossbeam_channel::{Receiver, TryRecvError};
use serde::{Deserialize, Serialize};

use crate::assets::LoadedAsset;
use crate::commands::DrawCommand;
use crate::error::EngineResult;
use crate::time::TimingInfo;

pub const MAX_GAMEPADS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GamepadSnapshot {
    pub buttons: Vec<f32>,
    pub buttons_pressed: BTreeSet<u32>,
    pub axes: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub keys_down: BTreeSet<String>,
    pub keys_pressed: BTreeSet<String>,
    pub mouse_x: f64,
    pub mouse_y: f64,
    pub mouse_buttons_down: BTreeSet<u8>,
    pub mouse_buttons_pressed: BTreeSet<u8>,
    pub gamepads: [Option<GamepadSnapshot>; MAX_GAMEPADS],
}

impl InputSnapshot {
    pub fn is_key_down(&self, key: &str) -> bool {
        self.keys_down.contains(&normalize_key(key))
    }

    pub fn is_key_pressed(&self, key: &str) -> bool {
        self.keys_pressed.contains(&normalize_key(key))
    }

    pub fn gamepad(&self, index: usize) -> Option<&GamepadSnapshot> {
        self.gamepads.get(index).and_then(Option::as_ref)
    }

    pub fn gamepad_count(&self) -> usize {
        self.gamepads.iter().filter(|pad| pad.is_some()).count()
    }
}

/// Single characters compare case-insensitively; named keys ("ArrowUp", "Space") are exact.
pub fn normalize_key(key: &str) -> String {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.to_lowercase().collect(),
        _ => key.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioState {
    pub muted: bool,
    pub master_volume: f32,
    pub music_playing: bool,
    pub music_time: f64,
    pub music_duration: f64,
    pub current_music: Option<String>,
}

impl Default for AudioState {
    fn default() -> Self {
        Self {
            muted: false,
            master_volume: 1.0,
            music_playing: false,
            music_time: 0.0,
            music_duration: 0.0,
            current_music: None,
        }
    }
}

/// Read-only snapshot published by the render side once per frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameContext {
    pub frame: u64,
    pub timing: TimingInfo,
    pub input: InputSnapshot,
    pub canvas: CanvasSize,
    pub audio: AudioState,
}

impl FrameContext {
    pub fn initial(canvas: CanvasSize) -> Self {
        Self { canvas, ..Self::default() }
    }
}

/// Largest width or height accepted for the surface, pixel buffers and readback regions.
pub const MAX_SURFACE_DIMENSION: u32 = 4096;

/// Rectangle of the drawing surface, in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRegion {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl PixelRegion {
    pub fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn byte_len(&self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize).saturating_mul(4)
    }

    /// Same origin, with both sides capped at [`MAX_SURFACE_DIMENSION`].
    pub fn bounded(self) -> Self {
        Self {
            width: self.width.min(MAX_SURFACE_DIMENSION),
            height: self.height.min(MAX_SURFACE_DIMENSION),
            ..self
        }
    }
}

pub enum PixelPoll {
    Ready(Vec<u8>),
    Pending,
    /// The render side went away before answering.
    Cancelled,
}

/// One outstanding readback. Completed by the channel when the render side answers.
pub struct PendingPixels {
    rx: Receiver<Vec<u8>>,
}

impl PendingPixels {
    pub(crate) fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    pub fn poll(&self) -> PixelPoll {
        match self.rx.try_recv() {
            Ok(bytes) => PixelPoll::Ready(bytes),
            Err(TryRecvError::Empty) => PixelPoll::Pending,
            Err(TryRecvError::Disconnected) => PixelPoll::Cancelled,
        }
    }
}

/// What the execution loop needs from the render side.
///
/// `wait_for_frame` is the only call that blocks. Snapshot reads return whatever the most recent
/// frame published. Delivery of a batch completes before the next frame is published.
pub trait FrameChannel {
    fn wait_for_frame(&mut self) -> EngineResult<()>;

    fn frame_context(&self) -> &FrameContext;

    fn timing_info(&self) -> TimingInfo {
        self.frame_context().timing
    }

    fn input_state(&self) -> &InputSnapshot {
        &self.frame_context().input
    }

    fn canvas_size(&self) -> CanvasSize {
        self.frame_context().canvas
    }

    fn audio_state(&self) -> &AudioState {
        &self.frame_context().audio
    }

    fn request_image_data(&mut self, region: PixelRegion) -> EngineResult<PendingPixels>;

    fn send_draw_commands(&mut self, batch: Vec<DrawCommand>) -> EngineResult<()>;

    fn upload_assets(&mut self, assets: Vec<LoadedAsset>) -> EngineResult<()>;

    /// The dedicated channel for errors raised by the tick callback.
    fn report_error(&mut self, message: String) -> EngineResult<()>;

    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_character_keys_ignore_case() {
        let mut input = InputSnapshot::default();
        input.keys_down.insert(normalize_key("A"));
        input.keys_down.insert(normalize_key("ArrowUp"));
        assert!(input.is_key_down("a"));
        assert!(input.is_key_down("A"));
        assert!(input.is_key_down("ArrowUp"));
        assert!(!input.is_key_down("arrowup"), "named keys are exact");
    }

    #[test]
    fn gamepad_slots_are_counted() {
        let mut input = InputSnapshot::default();
        input.gamepads[2] = Some(GamepadSnapshot::default());
        assert_eq!(input.gamepad_count(), 1);
        assert!(input.gamepad(2).is_some());
        assert!(input.gamepad(7).is_none());
    }

    #[test]
    fn pending_pixels_report_each_state() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let pending = PendingPixels::new(rx);
        assert!(matches!(pending.poll(), PixelPoll::Pending));
        tx.send(vec![1, 2, 3, 4]).expect("send pixels");
        assert!(matches!(pending.poll(), PixelPoll::Ready(bytes) if bytes == vec![1, 2, 3, 4]));
        drop(tx);
        assert!(matches!(pending.poll(), PixelPoll::Cancelled));
    }

    #[test]
    fn huge_regions_do_not_overflow() {
        let region = PixelRegion::new(0, 0, u32::MAX, u32::MAX);
        assert_eq!(region.byte_len(), usize::MAX);
        let bounded = PixelRegion::new(-3, 4, 4_000_000_000, 12).bounded();
        assert_eq!(bounded, PixelRegion::new(-3, 4, MAX_SURFACE_DIMENSION, 12));
    }
}
