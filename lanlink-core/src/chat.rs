//! Chat layer: short-text fragmentation, in-order reassembly, stop-and-wait
//! delivery.

use std::sync::{Arc, Mutex, RwLock};

use log::{debug, warn};

use crate::app::AppHandler;
use crate::fragment::{fragment_count, FragKind};
use crate::layer::{Layer, LayerError, LayerLinks};
use crate::signal::AckSlot;

/// Fixed fragment payload size for chat messages.
pub const MTU_CHAT: usize = 1456;

/// Chat header length: length, fragment type, reserved.
pub const CHAT_HEADER_LEN: usize = 4;

/// Chat frame header.
///
/// The `length` field is overloaded by fragment kind: whole-message length
/// on unfragmented and first frames, [`MTU_CHAT`] on middles, the
/// fragment's own length on last frames. A wire-format wart kept for
/// compatibility — do not extend it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatHeader {
    pub length: u16,
    pub kind: FragKind,
}

impl ChatHeader {
    pub fn encode(&self) -> [u8; CHAT_HEADER_LEN] {
        let mut buf = [0u8; CHAT_HEADER_LEN];
        buf[0..2].copy_from_slice(&self.length.to_be_bytes());
        buf[2] = self.kind.code() as u8;
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, LayerError> {
        if buf.len() < CHAT_HEADER_LEN {
            return Err(LayerError::ShortFrame {
                got: buf.len(),
                need: CHAT_HEADER_LEN,
            });
        }
        let kind = FragKind::from_code(buf[2] as u16)
            .ok_or(LayerError::UnsupportedType(buf[2] as u16))?;
        Ok(Self {
            length: u16::from_be_bytes([buf[0], buf[1]]),
            kind,
        })
    }
}

struct Reassembly {
    buf: Vec<u8>,
    fragments_seen: usize,
}

/// The chat layer. Assumes in-order delivery from the link below; fragments
/// are written straight into the reassembly buffer by offset.
pub struct ChatLayer {
    name: String,
    links: LayerLinks,
    ack: AckSlot,
    rx: Mutex<Option<Reassembly>>,
    handler: RwLock<Option<Arc<dyn AppHandler>>>,
}

impl ChatLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            links: LayerLinks::new(),
            ack: AckSlot::new(),
            rx: Mutex::new(None),
            handler: RwLock::new(None),
        }
    }

    /// Attach the application boundary for upward delivery.
    pub fn set_handler(&self, handler: Arc<dyn AppHandler>) {
        *self.handler.write().unwrap() = Some(handler);
    }

    /// Wait for the pending-acknowledgment slot, then push one frame down.
    fn send_frame(
        &self,
        under: &Arc<dyn Layer>,
        header: ChatHeader,
        body: &[u8],
    ) -> Result<(), LayerError> {
        self.ack.acquire();
        let mut frame = Vec::with_capacity(CHAT_HEADER_LEN + body.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(body);
        under.send(Some(&frame), &self.name)
    }

    fn deliver(&self, payload: &[u8]) -> Result<(), LayerError> {
        let handler = self.handler.read().unwrap().clone();
        if let Some(handler) = handler {
            handler.on_message(payload, &self.name);
            return Ok(());
        }
        if let Some(upper) = self.upper_at(0) {
            return upper.receive(Some(payload), &self.name);
        }
        debug!(
            "{}: {} bytes arrived with no application attached",
            self.name,
            payload.len()
        );
        Ok(())
    }
}

impl Layer for ChatLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn links(&self) -> &LayerLinks {
        &self.links
    }

    fn send(&self, payload: Option<&[u8]>, _from: &str) -> Result<(), LayerError> {
        let data = payload.ok_or(LayerError::EmptyPayload)?;
        if data.len() > u16::MAX as usize {
            return Err(LayerError::PayloadTooLarge {
                got: data.len(),
                max: u16::MAX as usize,
            });
        }
        let under = self.under_layer().ok_or(LayerError::NoUnderLayer)?;

        if data.len() <= MTU_CHAT {
            debug!("{}: send {} bytes unfragmented", self.name, data.len());
            let header = ChatHeader {
                length: data.len() as u16,
                kind: FragKind::Unfragmented,
            };
            return self.send_frame(&under, header, data);
        }

        debug!(
            "{}: send {} bytes in {} fragments",
            self.name,
            data.len(),
            fragment_count(data.len(), MTU_CHAT)
        );
        // first fragment carries the whole-message length
        let header = ChatHeader {
            length: data.len() as u16,
            kind: FragKind::First,
        };
        self.send_frame(&under, header, &data[..MTU_CHAT])?;

        let full = data.len() / MTU_CHAT;
        for index in 1..full {
            let kind = if index + 1 == full && data.len() % MTU_CHAT == 0 {
                FragKind::Last
            } else {
                FragKind::Middle
            };
            let header = ChatHeader {
                length: MTU_CHAT as u16,
                kind,
            };
            self.send_frame(&under, header, &data[index * MTU_CHAT..(index + 1) * MTU_CHAT])?;
        }

        let tail = data.len() % MTU_CHAT;
        if tail != 0 {
            let header = ChatHeader {
                length: tail as u16,
                kind: FragKind::Last,
            };
            self.send_frame(&under, header, &data[data.len() - tail..])?;
        }
        Ok(())
    }

    fn receive(&self, frame: Option<&[u8]>, _from: &str) -> Result<(), LayerError> {
        let Some(frame) = frame else {
            // acknowledgment for our last send; nothing goes upward
            if !self.ack.release() {
                warn!("{}: acknowledgment with nothing outstanding", self.name);
            }
            return Ok(());
        };

        let header = ChatHeader::decode(frame)?;
        let payload = &frame[CHAT_HEADER_LEN..];

        match header.kind {
            FragKind::Unfragmented => {
                self.deliver(payload)?;
            }
            FragKind::First => {
                let total = header.length as usize;
                if payload.len() != MTU_CHAT || total <= MTU_CHAT {
                    return Err(LayerError::UnexpectedFragment);
                }
                let mut buf = vec![0u8; total];
                buf[..MTU_CHAT].copy_from_slice(payload);
                // a fresh first fragment always resets the reassembly state
                *self.rx.lock().unwrap() = Some(Reassembly {
                    buf,
                    fragments_seen: 1,
                });
            }
            FragKind::Middle => {
                let mut guard = self.rx.lock().unwrap();
                let mut re = guard.take().ok_or(LayerError::UnexpectedFragment)?;
                let offset = re.fragments_seen * MTU_CHAT;
                if payload.len() != MTU_CHAT || offset + MTU_CHAT > re.buf.len() {
                    return Err(LayerError::UnexpectedFragment);
                }
                re.buf[offset..offset + MTU_CHAT].copy_from_slice(payload);
                re.fragments_seen += 1;
                *guard = Some(re);
            }
            FragKind::Last => {
                let mut guard = self.rx.lock().unwrap();
                let mut re = guard.take().ok_or(LayerError::UnexpectedFragment)?;
                let part = header.length as usize;
                let offset = re.fragments_seen * MTU_CHAT;
                if payload.len() != part || offset + part != re.buf.len() {
                    return Err(LayerError::UnexpectedFragment);
                }
                re.buf[offset..].copy_from_slice(payload);
                drop(guard);
                self.deliver(&re.buf)?;
            }
        }

        // every accepted data frame is acknowledged back down
        let under = self.under_layer().ok_or(LayerError::NoUnderLayer)?;
        under.send(None, &self.name)
    }
}
