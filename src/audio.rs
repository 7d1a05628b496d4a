//! Sound and music playback on the render side.
//!
//! The output device is opened once. When that fails (headless machines, sandboxes) the bridge
//! keeps working: every command is accepted and dropped, and state queries report silence.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tracing::{debug, warn};

use crate::commands::DrawCommand;
use crate::error::EngineError;
use crate::frame::AudioState;

const TRIGGER_HISTORY: usize = 32;

struct Backend {
    // Dropping the stream silences every sink.
    _stream: OutputStream,
    handle: OutputStreamHandle,
}

struct SoundSink {
    sink: Sink,
    /// Volume requested by the script, before master volume and mute.
    volume: f32,
}

struct MusicTrack {
    name: String,
    sink: Sink,
    volume: f32,
    duration: Option<Duration>,
    started: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl MusicTrack {
    fn elapsed(&self) -> Duration {
        let end = self.paused_at.unwrap_or_else(Instant::now);
        end.saturating_duration_since(self.started).saturating_sub(self.paused_total)
    }
}

pub struct AudioBridge {
    backend: Option<Backend>,
    clips: HashMap<String, Arc<[u8]>>,
    sounds: Vec<SoundSink>,
    music: Option<MusicTrack>,
    master_volume: f32,
    muted: bool,
    triggers: VecDeque<String>,
}

impl AudioBridge {
    /// Opens the default output device. Never fails; see [`AudioBridge::is_available`].
    pub fn new(enabled: bool, master_volume: f32) -> Self {
        let backend = if enabled { Self::open_backend() } else { None };
        Self {
            backend,
            clips: HashMap::new(),
            sounds: Vec::new(),
            music: None,
            master_volume: master_volume.clamp(0.0, 1.0),
            muted: false,
            triggers: VecDeque::new(),
        }
    }

    /// A bridge that never touches the audio device.
    pub fn disabled() -> Self {
        Self::new(false, 1.0)
    }

    fn open_backend() -> Option<Backend> {
        match OutputStream::try_default() {
            Ok((stream, handle)) => Some(Backend { _stream: stream, handle }),
            Err(err) => {
                let err = EngineError::BackendUnavailable(err.to_string());
                warn!("[audio] {err}; audio disabled");
                None
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Stores encoded clip bytes. Decoding happens per playback.
    pub fn register_clip(&mut self, name: &str, bytes: Vec<u8>) {
        self.clips.insert(name.to_string(), Arc::from(bytes));
    }

    pub fn has_clip(&self, name: &str) -> bool {
        self.clips.contains_key(name)
    }

    pub fn recent_triggers(&self) -> impl ExactSizeIterator<Item = &String> {
        self.triggers.iter()
    }

    fn push_trigger(&mut self, trigger: String) {
        if self.triggers.len() == TRIGGER_HISTORY {
            self.triggers.pop_front();
        }
        self.triggers.push_back(trigger);
    }

    fn effective(&self, volume: f32) -> f32 {
        if self.muted {
            0.0
        } else {
            volume.clamp(0.0, 1.0) * self.master_volume
        }
    }

    fn decode(&self, name: &str) -> Option<Decoder<Cursor<Arc<[u8]>>>> {
        let bytes = self.clips.get(name)?;
        match Decoder::new(Cursor::new(Arc::clone(bytes))) {
            Ok(decoder) => Some(decoder),
            Err(err) => {
                warn!("[audio] failed to decode '{name}': {err}");
                None
            }
        }
    }

    fn new_sink(&self) -> Option<Sink> {
        let backend = self.backend.as_ref()?;
        match Sink::try_new(&backend.handle) {
            Ok(sink) => Some(sink),
            Err(err) => {
                warn!("[audio] could not create sink: {err}");
                None
            }
        }
    }

    /// Applies the audio commands of a batch. Other commands are ignored.
    pub fn apply(&mut self, command: &DrawCommand) {
        match command {
            DrawCommand::PlaySound { asset, volume } => self.play_sound(asset, volume.unwrap_or(1.0)),
            DrawCommand::PlayMusic { asset, volume, looped } => {
                self.play_music(asset, volume.unwrap_or(1.0), *looped)
            }
            DrawCommand::StopMusic => self.stop_music(),
            DrawCommand::PauseMusic => self.pause_music(),
            DrawCommand::ResumeMusic => self.resume_music(),
            DrawCommand::SetMusicVolume { volume } => self.set_music_volume(*volume),
            DrawCommand::SetMasterVolume { volume } => self.set_master_volume(*volume),
            DrawCommand::Mute => self.set_muted(true),
            DrawCommand::Unmute => self.set_muted(false),
            _ => {}
        }
    }

    pub fn play_sound(&mut self, name: &str, volume: f32) {
        self.push_trigger(format!("sound:{name}"));
        self.sounds.retain(|sound| !sound.sink.empty());
        let Some(sink) = self.new_sink() else {
            return;
        };
        let Some(source) = self.decode(name) else {
            return;
        };
        sink.set_volume(self.effective(volume));
        sink.append(source);
        self.sounds.push(SoundSink { sink, volume: volume.clamp(0.0, 1.0) });
    }

    pub fn play_music(&mut self, name: &str, volume: f32, looped: bool) {
        self.push_trigger(format!("music:{name}"));
        self.stop_music();
        let Some(sink) = self.new_sink() else {
            return;
        };
        let Some(source) = self.decode(name) else {
            return;
        };
        let duration = source.total_duration();
        sink.set_volume(self.effective(volume));
        if looped {
            sink.append(source.repeat_infinite());
        } else {
            sink.append(source);
        }
        debug!("[audio] music '{name}' started (looped: {looped})");
        self.music = Some(MusicTrack {
            name: name.to_string(),
            sink,
            volume: volume.clamp(0.0, 1.0),
            duration,
            started: Instant::now(),
            paused_at: None,
            paused_total: Duration::ZERO,
        });
    }

    pub fn stop_music(&mut self) {
        if let Some(track) = self.music.take() {
            track.sink.stop();
        }
    }

    pub fn pause_music(&mut self) {
        if let Some(track) = self.music.as_mut() {
            if track.paused_at.is_none() {
                track.sink.pause();
                track.paused_at = Some(Instant::now());
            }
        }
    }

    pub fn resume_music(&mut self) {
        if let Some(track) = self.music.as_mut() {
            if let Some(paused_at) = track.paused_at.take() {
                track.paused_total += paused_at.elapsed();
                track.sink.play();
            }
        }
    }

    pub fn set_music_volume(&mut self, volume: f32) {
        let effective = self.effective(volume);
        if let Some(track) = self.music.as_mut() {
            track.volume = volume.clamp(0.0, 1.0);
            track.sink.set_volume(effective);
        }
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        self.master_volume = volume.clamp(0.0, 1.0);
        self.refresh_volumes();
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.refresh_volumes();
    }

    fn refresh_volumes(&mut self) {
        let music_volume = self.music.as_ref().map(|track| self.effective(track.volume));
        if let (Some(track), Some(volume)) = (self.music.as_ref(), music_volume) {
            track.sink.set_volume(volume);
        }
        for sound in &self.sounds {
            sound.sink.set_volume(self.effective(sound.volume));
        }
    }

    /// Drops sinks that finished and a non-looping track that ran out.
    pub fn update(&mut self) {
        self.sounds.retain(|sound| !sound.sink.empty());
        if self.music.as_ref().is_some_and(|track| track.sink.empty()) {
            self.music = None;
        }
    }

    pub fn is_muted(&self) -> bool {
        self.backend.is_some() && self.muted
    }

    pub fn master_volume(&self) -> f32 {
        if self.backend.is_some() {
            self.master_volume
        } else {
            1.0
        }
    }

    pub fn is_music_playing(&self) -> bool {
        self.music.as_ref().is_some_and(|track| track.paused_at.is_none() && !track.sink.empty())
    }

    pub fn music_time(&self) -> f64 {
        self.music.as_ref().map_or(0.0, |track| {
            let elapsed = track.elapsed();
            match track.duration {
                Some(total) if !total.is_zero() => (elapsed.as_secs_f64()) % total.as_secs_f64(),
                _ => elapsed.as_secs_f64(),
            }
        })
    }

    pub fn music_duration(&self) -> f64 {
        self.music.as_ref().and_then(|track| track.duration).map_or(0.0, |d| d.as_secs_f64())
    }

    pub fn current_music_name(&self) -> Option<&str> {
        self.music.as_ref().map(|track| track.name.as_str())
    }

    pub fn snapshot(&self) -> AudioState {
        AudioState {
            muted: self.is_muted(),
            master_volume: self.master_volume(),
            music_playing: self.is_music_playing(),
            music_time: self.music_time(),
            music_duration: self.music_duration(),
            current_music: self.current_music_name().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_bridge_accepts_everything_and_reports_idle() {
        let mut audio = AudioBridge::disabled();
        assert!(!audio.is_available());
        audio.register_clip("theme", vec![1, 2, 3]);
        audio.apply(&DrawCommand::PlayMusic { asset: "theme".into(), volume: Some(0.5), looped: true });
        audio.apply(&DrawCommand::PlaySound { asset: "jump".into(), volume: None });
        audio.apply(&DrawCommand::Mute);
        audio.apply(&DrawCommand::SetMasterVolume { volume: 0.25 });
        audio.apply(&DrawCommand::PauseMusic);
        audio.update();

        assert_eq!(audio.snapshot(), AudioState::default());
        assert!(audio.has_clip("theme"));
        let triggers: Vec<&String> = audio.recent_triggers().collect();
        assert_eq!(triggers, vec!["music:theme", "sound:jump"]);
    }

    #[test]
    fn trigger_history_is_bounded() {
        let mut audio = AudioBridge::disabled();
        for i in 0..(TRIGGER_HISTORY + 5) {
            audio.play_sound(&format!("s{i}"), 1.0);
        }
        assert_eq!(audio.recent_triggers().len(), TRIGGER_HISTORY);
        assert_eq!(audio.recent_triggers().next().map(String::as_str), Some("sound:s5"));
    }

    #[test]
    fn master_volume_is_clamped() {
        let mut audio = AudioBridge::disabled();
        audio.set_master_volume(3.0);
        assert_eq!(audio.master_volume, 1.0);
        audio.set_master_volume(f32::NAN);
        assert_eq!(audio.master_volume, 1.0);
    }

    #[test]
    fn master_volume_scales_each_sound_by_its_own_volume() {
        let mut audio = AudioBridge::disabled();
        let (quiet, _quiet_out) = Sink::new_idle();
        let (loud, _loud_out) = Sink::new_idle();
        audio.sounds.push(SoundSink { sink: quiet, volume: 0.4 });
        audio.sounds.push(SoundSink { sink: loud, volume: 1.0 });

        audio.set_master_volume(0.5);
        let volumes: Vec<f32> = audio.sounds.iter().map(|sound| sound.sink.volume()).collect();
        assert_eq!(volumes, vec![0.2, 0.5]);

        audio.set_muted(true);
        assert!(audio.sounds.iter().all(|sound| sound.sink.volume() == 0.0));
        audio.set_muted(false);
        assert_eq!(audio.sounds[0].sink.volume(), 0.2);
    }
}
