//! In-process transport: the script runs on its own thread, messages move over crossbeam
//! channels by value.

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::{MessageChannel, RenderLink, RenderMessage, ScriptMessage, ScriptTransport};
use crate::error::{EngineError, EngineResult};
use crate::frame::CanvasSize;

pub struct LocalScriptEnd {
    tx: Sender<ScriptMessage>,
    rx: Receiver<RenderMessage>,
}

pub struct LocalRenderEnd {
    tx: Sender<RenderMessage>,
    rx: Receiver<ScriptMessage>,
}

/// Connected pair. The script end is ready to hand to a runtime; the render end goes to the host.
pub fn local_pair(canvas: CanvasSize) -> (MessageChannel<LocalScriptEnd>, LocalRenderEnd) {
    let (script_tx, script_rx) = unbounded();
    let (render_tx, render_rx) = unbounded();
    let script = LocalScriptEnd { tx: script_tx, rx: render_rx };
    let render = LocalRenderEnd { tx: render_tx, rx: script_rx };
    (MessageChannel::new(script, canvas), render)
}

impl ScriptTransport for LocalScriptEnd {
    fn send(&mut self, message: ScriptMessage) -> EngineResult<()> {
        self.tx.send(message).map_err(|_| EngineError::ChannelClosed)
    }

    fn recv(&mut self) -> EngineResult<RenderMessage> {
        self.rx.recv().map_err(|_| EngineError::ChannelClosed)
    }
}

impl RenderLink for LocalRenderEnd {
    fn recv(&mut self) -> EngineResult<Option<ScriptMessage>> {
        Ok(self.rx.recv().ok())
    }

    fn send(&mut self, message: RenderMessage) -> EngineResult<()> {
        self.tx.send(message).map_err(|_| EngineError::ChannelClosed)
    }
}
