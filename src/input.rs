use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::frame::{normalize_key, GamepadSnapshot, InputSnapshot, MAX_GAMEPADS};

/// Gamepad buttons count as down above this value.
pub const BUTTON_THRESHOLD: f32 = 0.5;

/// Button and axis indices at or past these limits are dropped.
pub const MAX_GAMEPAD_BUTTONS: u32 = 32;
pub const MAX_GAMEPAD_AXES: u32 = 16;

/// Raw input delivered to the render side, by a window backend or a harness schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    KeyDown { key: String },
    KeyUp { key: String },
    MouseMove { x: f64, y: f64 },
    MouseDown { button: u8 },
    MouseUp { button: u8 },
    GamepadConnected { index: usize },
    GamepadDisconnected { index: usize },
    GamepadButton { index: usize, button: u32, value: f32 },
    GamepadAxis { index: usize, axis: u32, value: f32 },
}

/// Held and edge-triggered input. Edges survive exactly one published frame.
#[derive(Debug, Default)]
pub struct InputState {
    snapshot: InputSnapshot,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &InputEvent) {
        let input = &mut self.snapshot;
        match event {
            InputEvent::KeyDown { key } => {
                let key = normalize_key(key);
                if input.keys_down.insert(key.clone()) {
                    input.keys_pressed.insert(key);
                }
            }
            InputEvent::KeyUp { key } => {
                input.keys_down.remove(&normalize_key(key));
            }
            InputEvent::MouseMove { x, y } => {
                input.mouse_x = *x;
                input.mouse_y = *y;
            }
            InputEvent::MouseDown { button } => {
                if input.mouse_buttons_down.insert(*button) {
                    input.mouse_buttons_pressed.insert(*button);
                }
            }
            InputEvent::MouseUp { button } => {
                input.mouse_buttons_down.remove(button);
            }
            InputEvent::GamepadConnected { index } => {
                if let Some(slot) = input.gamepads.get_mut(*index) {
                    slot.get_or_insert_with(GamepadSnapshot::default);
                }
            }
            InputEvent::GamepadDisconnected { index } => {
                if let Some(slot) = input.gamepads.get_mut(*index) {
                    *slot = None;
                }
            }
            InputEvent::GamepadButton { index, button, value } => {
                let Some(Some(pad)) = input.gamepads.get_mut(*index) else {
                    return;
                };
                if *button >= MAX_GAMEPAD_BUTTONS {
                    return;
                }
                let slot = *button as usize;
                if pad.buttons.len() <= slot {
                    pad.buttons.resize(slot + 1, 0.0);
                }
                let was_down = pad.buttons[slot] > BUTTON_THRESHOLD;
                pad.buttons[slot] = value.clamp(0.0, 1.0);
                if !was_down && pad.buttons[slot] > BUTTON_THRESHOLD {
                    pad.buttons_pressed.insert(*button);
                }
            }
            InputEvent::GamepadAxis { index, axis, value } => {
                let Some(Some(pad)) = input.gamepads.get_mut(*index) else {
                    return;
                };
                if *axis >= MAX_GAMEPAD_AXES {
                    return;
                }
                let slot = *axis as usize;
                if pad.axes.len() <= slot {
                    pad.axes.resize(slot + 1, 0.0);
                }
                pad.axes[slot] = value.clamp(-1.0, 1.0);
            }
        }
    }

    pub fn snapshot(&self) -> InputSnapshot {
        self.snapshot.clone()
    }

    /// Called after every published frame, whether or not the script looked.
    pub fn clear_frame(&mut self) {
        self.snapshot.keys_pressed.clear();
        self.snapshot.mouse_buttons_pressed.clear();
        for pad in self.snapshot.gamepads.iter_mut().flatten() {
            pad.buttons_pressed = BTreeSet::new();
        }
    }

    pub fn connected_gamepads(&self) -> usize {
        self.snapshot.gamepads.iter().take(MAX_GAMEPADS).filter(|pad| pad.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_down(key: &str) -> InputEvent {
        InputEvent::KeyDown { key: key.into() }
    }

    #[test]
    fn key_pressed_only_on_transition_frame() {
        let mut input = InputState::new();
        input.push(&key_down("A"));
        let frame1 = input.snapshot();
        input.clear_frame();
        // OS key repeat while held must not re-trigger the edge.
        input.push(&key_down("a"));
        let frame2 = input.snapshot();
        input.clear_frame();

        assert!(frame1.is_key_pressed("a"));
        assert!(frame1.is_key_down("a"));
        assert!(!frame2.is_key_pressed("a"));
        assert!(frame2.is_key_down("a"));

        input.push(&InputEvent::KeyUp { key: "a".into() });
        input.push(&key_down("a"));
        assert!(input.snapshot().is_key_pressed("a"), "release then press is a new edge");
    }

    #[test]
    fn mouse_edges_and_position() {
        let mut input = InputState::new();
        input.push(&InputEvent::MouseMove { x: 12.5, y: 40.0 });
        input.push(&InputEvent::MouseDown { button: 0 });
        let snap = input.snapshot();
        assert_eq!((snap.mouse_x, snap.mouse_y), (12.5, 40.0));
        assert!(snap.mouse_buttons_pressed.contains(&0));
        input.clear_frame();
        let snap = input.snapshot();
        assert!(snap.mouse_buttons_down.contains(&0));
        assert!(snap.mouse_buttons_pressed.is_empty());
    }

    #[test]
    fn gamepad_buttons_use_threshold() {
        let mut input = InputState::new();
        input.push(&InputEvent::GamepadButton { index: 0, button: 1, value: 1.0 });
        assert_eq!(input.connected_gamepads(), 0, "events for unconnected pads are dropped");

        input.push(&InputEvent::GamepadConnected { index: 0 });
        input.push(&InputEvent::GamepadButton { index: 0, button: 3, value: 0.3 });
        assert!(input.snapshot().gamepad(0).expect("pad").buttons_pressed.is_empty());
        input.push(&InputEvent::GamepadButton { index: 0, button: 3, value: 0.9 });
        input.push(&InputEvent::GamepadAxis { index: 0, axis: 1, value: -2.0 });
        let snap = input.snapshot();
        let pad = snap.gamepad(0).expect("pad");
        assert!(pad.buttons_pressed.contains(&3));
        assert_eq!(pad.buttons.len(), 4);
        assert_eq!(pad.axes, vec![0.0, -1.0]);

        input.push(&InputEvent::GamepadConnected { index: 9 });
        input.push(&InputEvent::GamepadDisconnected { index: 0 });
        assert_eq!(input.connected_gamepads(), 0);
    }

    #[test]
    fn out_of_range_gamepad_indices_are_dropped() {
        let mut input = InputState::new();
        input.push(&InputEvent::GamepadConnected { index: 0 });
        input.push(&InputEvent::GamepadButton { index: 0, button: u32::MAX, value: 1.0 });
        input.push(&InputEvent::GamepadAxis { index: 0, axis: MAX_GAMEPAD_AXES, value: 1.0 });
        input.push(&InputEvent::GamepadButton { index: 0, button: MAX_GAMEPAD_BUTTONS - 1, value: 1.0 });
        let snap = input.snapshot();
        let pad = snap.gamepad(0).expect("pad");
        assert_eq!(pad.buttons.len(), MAX_GAMEPAD_BUTTONS as usize);
        assert!(pad.axes.is_empty());
        assert_eq!(pad.buttons_pressed.len(), 1);
    }
}
