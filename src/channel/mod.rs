//! Message-passing implementation of [`FrameChannel`].
//!
//! The two sides never share memory. The script side sends [`ScriptMessage`]s and blocks only
//! in `wait_for_frame`; the render side answers with [`RenderMessage`]s. One exchange per frame:
//!
//! 1. script: any number of `DrawCommands`, `RequestImageData`, `UploadAssets`, `ReportError`
//! 2. script: `Ready`
//! 3. render: applies everything received before `Ready`, answers pixel requests with
//!    `ImageData`, then publishes the next `Frame`.
//!
//! Because the render side applies a batch before answering the `Ready` that follows it, batch N
//! is always on the surface before frame N+1 is published.

use std::collections::HashMap;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::assets::LoadedAsset;
use crate::commands::DrawCommand;
use crate::error::{EngineError, EngineResult};
use crate::frame::{CanvasSize, FrameChannel, FrameContext, PendingPixels, PixelRegion};

pub mod bytes;
pub mod local;
pub mod wire;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptMessage {
    Ready,
    DrawCommands { batch: Vec<DrawCommand> },
    RequestImageData { id: u64, region: PixelRegion },
    UploadAssets { assets: Vec<LoadedAsset> },
    ReportError { message: String },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderMessage {
    Frame { context: FrameContext },
    ImageData {
        id: u64,
        #[serde(with = "bytes")]
        data: Vec<u8>,
    },
}

/// Script-side end of a transport. `recv` blocks.
pub trait ScriptTransport {
    fn send(&mut self, message: ScriptMessage) -> EngineResult<()>;
    fn recv(&mut self) -> EngineResult<RenderMessage>;
}

/// Render-side end of a transport.
pub trait RenderLink {
    /// Blocks for the next message. `Ok(None)` once the script side has gone away.
    fn recv(&mut self) -> EngineResult<Option<ScriptMessage>>;
    fn send(&mut self, message: RenderMessage) -> EngineResult<()>;
}

impl<L: RenderLink + ?Sized> RenderLink for Box<L> {
    fn recv(&mut self) -> EngineResult<Option<ScriptMessage>> {
        (**self).recv()
    }

    fn send(&mut self, message: RenderMessage) -> EngineResult<()> {
        (**self).send(message)
    }
}

/// [`FrameChannel`] over any [`ScriptTransport`]. Holds the latest snapshot and routes pixel
/// answers back to their [`PendingPixels`] by request id.
pub struct MessageChannel<T: ScriptTransport> {
    transport: T,
    context: FrameContext,
    pending: HashMap<u64, Sender<Vec<u8>>>,
    next_request: u64,
    closed: bool,
}

impl<T: ScriptTransport> MessageChannel<T> {
    pub fn new(transport: T, canvas: CanvasSize) -> Self {
        Self {
            transport,
            context: FrameContext::initial(canvas),
            pending: HashMap::new(),
            next_request: 0,
            closed: false,
        }
    }

    pub fn outstanding_requests(&self) -> usize {
        self.pending.len()
    }

    fn send(&mut self, message: ScriptMessage) -> EngineResult<()> {
        if self.closed {
            return Err(EngineError::ChannelClosed);
        }
        self.transport.send(message)
    }
}

impl<T: ScriptTransport> FrameChannel for MessageChannel<T> {
    fn wait_for_frame(&mut self) -> EngineResult<()> {
        self.send(ScriptMessage::Ready)?;
        loop {
            match self.transport.recv()? {
                RenderMessage::Frame { context } => {
                    trace!(frame = context.frame, "frame published");
                    self.context = context;
                    return Ok(());
                }
                RenderMessage::ImageData { id, data } => {
                    if let Some(reply) = self.pending.remove(&id) {
                        // The PendingPixels may already be gone; nothing to do then.
                        let _ = reply.send(data);
                    }
                }
            }
        }
    }

    fn frame_context(&self) -> &FrameContext {
        &self.context
    }

    fn request_image_data(&mut self, region: PixelRegion) -> EngineResult<PendingPixels> {
        let id = self.next_request;
        self.next_request += 1;
        self.send(ScriptMessage::RequestImageData { id, region })?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.pending.insert(id, tx);
        Ok(PendingPixels::new(rx))
    }

    fn send_draw_commands(&mut self, batch: Vec<DrawCommand>) -> EngineResult<()> {
        self.send(ScriptMessage::DrawCommands { batch })
    }

    fn upload_assets(&mut self, assets: Vec<LoadedAsset>) -> EngineResult<()> {
        self.send(ScriptMessage::UploadAssets { assets })
    }

    fn report_error(&mut self, message: String) -> EngineResult<()> {
        self.send(ScriptMessage::ReportError { message })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        let _ = self.transport.send(ScriptMessage::Shutdown);
        self.closed = true;
        self.pending.clear();
    }
}

impl<T: ScriptTransport> Drop for MessageChannel<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_tagged() {
        let json = serde_json::to_value(ScriptMessage::RequestImageData {
            id: 7,
            region: PixelRegion::new(1, 2, 3, 4),
        })
        .expect("serialize");
        assert_eq!(json["kind"], "request_image_data");
        assert_eq!(json["region"]["width"], 3);

        let decoded: RenderMessage =
            serde_json::from_str(r#"{"kind":"image_data","id":7,"data":"AQIDBA=="}"#).expect("decode");
        assert_eq!(decoded, RenderMessage::ImageData { id: 7, data: vec![1, 2, 3, 4] });
    }
}
