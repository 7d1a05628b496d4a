//! Render-side owner of the surface, audio, input and frame clock.
//!
//! The host is driven entirely by script messages: batches are applied as they arrive, and each
//! `Ready` answers outstanding pixel reads (which therefore see every batch sent before it) and
//! publishes the next frame.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::assets::{AssetKind, LoadedAsset};
use crate::audio::AudioBridge;
use crate::channel::{RenderLink, RenderMessage, ScriptMessage};
use crate::commands::DrawCommand;
use crate::error::EngineResult;
use crate::frame::{FrameContext, PixelRegion};
use crate::input::{InputEvent, InputState};
use crate::renderer::Renderer;
use crate::time::FrameClock;

/// Commands and errors the script produced between two published frames. Frame 0 holds what
/// was sent before the first frame (setup code and the pre-start flush).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl FrameRecord {
    fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostExit {
    /// The script side shut down or hung up.
    ScriptClosed,
    /// `max_frames` frames were published and the last batch applied.
    FrameLimit,
}

pub struct HostReport {
    pub exit: HostExit,
    pub frames: u64,
    pub errors: Vec<String>,
    pub records: Vec<FrameRecord>,
    pub renderer: Renderer,
    pub audio_triggers: Vec<String>,
}

pub struct RenderHost<L: RenderLink> {
    link: L,
    renderer: Renderer,
    audio: AudioBridge,
    input: InputState,
    clock: FrameClock,
    frame: u64,
    max_frames: Option<u64>,
    pending_reads: Vec<(u64, PixelRegion)>,
    scheduled_input: BTreeMap<u64, Vec<InputEvent>>,
    record: Option<FrameRecord>,
    records: Vec<FrameRecord>,
    errors: Vec<String>,
}

impl<L: RenderLink> RenderHost<L> {
    pub fn new(link: L, renderer: Renderer, audio: AudioBridge, clock: FrameClock) -> Self {
        Self {
            link,
            renderer,
            audio,
            input: InputState::new(),
            clock,
            frame: 0,
            max_frames: None,
            pending_reads: Vec::new(),
            scheduled_input: BTreeMap::new(),
            record: None,
            records: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Keep per-frame command summaries for the report.
    pub fn with_recording(mut self) -> Self {
        self.record = Some(FrameRecord::default());
        self
    }

    /// Queues `event` to be applied just before frame `frame` is published.
    pub fn schedule_input(&mut self, frame: u64, event: InputEvent) {
        self.scheduled_input.entry(frame).or_default().push(event);
    }

    pub fn run(mut self) -> EngineResult<HostReport> {
        let exit = self.pump()?;
        info!(frames = self.frame, errors = self.errors.len(), "[host] finished ({exit:?})");
        if let Some(record) = self.record.take() {
            if !record.is_empty() {
                self.records.push(record);
            }
        }
        Ok(HostReport {
            exit,
            frames: self.frame,
            errors: self.errors,
            records: self.records,
            renderer: self.renderer,
            audio_triggers: self.audio.recent_triggers().cloned().collect(),
        })
    }

    fn pump(&mut self) -> EngineResult<HostExit> {
        loop {
            let Some(message) = self.link.recv()? else {
                return Ok(HostExit::ScriptClosed);
            };
            match message {
                ScriptMessage::DrawCommands { batch } => self.apply_batch(&batch),
                ScriptMessage::RequestImageData { id, region } => self.pending_reads.push((id, region)),
                ScriptMessage::UploadAssets { assets } => self.accept_assets(assets),
                ScriptMessage::ReportError { message } => {
                    error!("{message}");
                    if let Some(record) = self.record.as_mut() {
                        record.errors.push(message.clone());
                    }
                    self.errors.push(message);
                }
                ScriptMessage::Shutdown => return Ok(HostExit::ScriptClosed),
                ScriptMessage::Ready => {
                    if self.max_frames.is_some_and(|limit| self.frame >= limit) {
                        return Ok(HostExit::FrameLimit);
                    }
                    match self.publish_frame() {
                        Ok(()) => {}
                        Err(err) if err.is_disconnect() => return Ok(HostExit::ScriptClosed),
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    fn apply_batch(&mut self, batch: &[DrawCommand]) {
        debug!(frame = self.frame, commands = batch.len(), "[host] applying batch");
        for command in batch {
            if command.is_audio() {
                self.audio.apply(command);
            } else {
                self.renderer.apply(command);
            }
        }
        if let Some(record) = self.record.as_mut() {
            record.commands.extend(batch.iter().map(DrawCommand::summary));
        }
    }

    fn accept_assets(&mut self, assets: Vec<LoadedAsset>) {
        for asset in assets {
            match asset.kind {
                AssetKind::Image => {
                    if let Err(err) = self.renderer.register_image(&asset.name, &asset.data) {
                        warn!("[host] {err:#}");
                    }
                }
                AssetKind::Font => {
                    if !self.renderer.register_font(&asset.name, asset.data) {
                        warn!("[host] font '{}' could not be parsed; text falls back to system fonts", asset.name);
                    }
                }
                AssetKind::Sound | AssetKind::Music => self.audio.register_clip(&asset.name, asset.data),
            }
        }
    }

    fn publish_frame(&mut self) -> EngineResult<()> {
        for (id, region) in std::mem::take(&mut self.pending_reads) {
            let data = self.renderer.read_pixels(region);
            self.link.send(RenderMessage::ImageData { id, data })?;
        }

        self.frame += 1;
        if let Some(record) = self.record.as_mut() {
            let finished = std::mem::replace(record, FrameRecord { frame: self.frame, ..FrameRecord::default() });
            if finished.frame == 0 || !finished.is_empty() {
                self.records.push(finished);
            }
        }
        if let Some(events) = self.scheduled_input.remove(&self.frame) {
            for event in &events {
                self.input.push(event);
            }
        }
        self.audio.update();
        let context = FrameContext {
            frame: self.frame,
            timing: self.clock.tick(),
            input: self.input.snapshot(),
            canvas: self.renderer.size(),
            audio: self.audio.snapshot(),
        };
        self.link.send(RenderMessage::Frame { context })?;
        self.input.clear_frame();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::local::local_pair;
    use crate::commands::Color;
    use crate::frame::{CanvasSize, FrameChannel, PixelPoll};
    use std::thread;

    fn host_for(link: crate::channel::local::LocalRenderEnd) -> RenderHost<crate::channel::local::LocalRenderEnd> {
        RenderHost::new(link, Renderer::new(64, 64), AudioBridge::disabled(), FrameClock::fixed(0.5))
    }

    #[test]
    fn readback_sees_batches_sent_before_ready() {
        let (mut channel, link) = local_pair(CanvasSize { width: 64, height: 64 });
        let host = thread::spawn(move || host_for(link).with_max_frames(Some(3)).run().expect("host run"));

        channel.wait_for_frame().expect("frame 1");
        assert_eq!(channel.timing_info().delta_time, 0.0);
        channel
            .send_draw_commands(vec![
                DrawCommand::SetColor { color: Color::rgb(255, 0, 0) },
                DrawCommand::FillRect { x: 0.0, y: 0.0, width: 10.0, height: 10.0 },
            ])
            .expect("batch");
        let pending = channel.request_image_data(PixelRegion::new(5, 5, 1, 1)).expect("request");
        channel.wait_for_frame().expect("frame 2");
        assert_eq!(channel.timing_info().total_time, 0.5);
        assert!(matches!(pending.poll(), PixelPoll::Ready(bytes) if bytes == vec![255, 0, 0, 255]));
        channel.wait_for_frame().expect("frame 3");
        let err = channel.wait_for_frame().unwrap_err();
        assert!(err.is_disconnect(), "host hangs up after the frame limit");

        let report = host.join().expect("host thread");
        assert_eq!(report.exit, HostExit::FrameLimit);
        assert_eq!(report.frames, 3);
    }

    #[test]
    fn scheduled_input_is_edge_triggered_per_frame() {
        let (mut channel, link) = local_pair(CanvasSize::default());
        let host = thread::spawn(move || {
            let mut host = host_for(link).with_max_frames(Some(3));
            host.schedule_input(2, InputEvent::KeyDown { key: "a".into() });
            host.run().expect("host run")
        });

        let mut pressed = Vec::new();
        let mut down = Vec::new();
        for _ in 0..3 {
            channel.wait_for_frame().expect("frame");
            pressed.push(channel.input_state().is_key_pressed("a"));
            down.push(channel.input_state().is_key_down("a"));
        }
        assert_eq!(pressed, vec![false, true, false]);
        assert_eq!(down, vec![false, true, true]);
        drop(channel);
        host.join().expect("host thread");
    }

    #[test]
    fn errors_and_commands_are_recorded_per_frame() {
        let (mut channel, link) = local_pair(CanvasSize::default());
        let host = thread::spawn(move || host_for(link).with_recording().run().expect("host run"));

        channel.send_draw_commands(vec![DrawCommand::SetSize { width: 32, height: 16 }]).expect("setup");
        channel.wait_for_frame().expect("frame 1");
        assert_eq!(channel.canvas_size(), CanvasSize { width: 32, height: 16 });
        channel.report_error("[tick] boom".into()).expect("report");
        channel.send_draw_commands(vec![DrawCommand::Clear]).expect("batch");
        channel.close();

        let report = host.join().expect("host thread");
        assert_eq!(report.exit, HostExit::ScriptClosed);
        assert_eq!(report.errors, vec!["[tick] boom".to_string()]);
        assert_eq!(
            report.records,
            vec![
                FrameRecord { frame: 0, commands: vec!["setSize 32x16".into()], errors: vec![] },
                FrameRecord { frame: 1, commands: vec!["clear".into()], errors: vec!["[tick] boom".into()] },
            ]
        );
    }
}
