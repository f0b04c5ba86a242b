//! File layer: sequence-numbered fragmentation, accept/deny handshake, and
//! persistence of completed transfers.
//!
//! A transfer is two conversational messages: a filename announcement, then
//! — if the receiver accepts — the file data. Both use the same fragment
//! discipline as the chat layer, but every fragment additionally carries a
//! 1-based sequence number, and reassembly collects fragments in a map keyed
//! by that number, so delivery-order gaps are tolerated until the last
//! fragment triggers defragmentation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, error, info, warn};

use crate::app::AppHandler;
use crate::fragment::{fragment_count, FragKind};
use crate::layer::{Layer, LayerError, LayerLinks};
use crate::signal::{AckSlot, ResponseSlot};

/// Fixed fragment payload size for file transfers.
pub const MTU_FILE: usize = 1448;

/// File header length: total length, fragment type, message type, reserved,
/// sequence number.
pub const FILE_HEADER_LEN: usize = 12;

/// Conversational message kinds carried in the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Announcement of an incoming transfer; payload is the filename.
    Filename,
    /// The bulk payload.
    FileData,
    /// Handshake reply: transfer accepted.
    Accept,
    /// Handshake reply: transfer declined.
    Deny,
}

impl MessageKind {
    pub const fn code(self) -> u8 {
        match self {
            MessageKind::Filename => 0x00,
            MessageKind::FileData => 0x01,
            MessageKind::Accept => 0x02,
            MessageKind::Deny => 0x03,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(MessageKind::Filename),
            0x01 => Some(MessageKind::FileData),
            0x02 => Some(MessageKind::Accept),
            0x03 => Some(MessageKind::Deny),
            _ => None,
        }
    }
}

/// File frame header. `length` carries the whole-message length on first
/// and unfragmented frames, [`MTU_FILE`] on middles, and the fragment's own
/// length on last frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub length: u32,
    pub frag: FragKind,
    pub message: MessageKind,
    pub seq: u32,
}

impl FileHeader {
    pub fn encode(&self) -> [u8; FILE_HEADER_LEN] {
        let mut buf = [0u8; FILE_HEADER_LEN];
        buf[0..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4..6].copy_from_slice(&self.frag.code().to_be_bytes());
        buf[6] = self.message.code();
        buf[8..12].copy_from_slice(&self.seq.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, LayerError> {
        if buf.len() < FILE_HEADER_LEN {
            return Err(LayerError::ShortFrame {
                got: buf.len(),
                need: FILE_HEADER_LEN,
            });
        }
        let frag_code = u16::from_be_bytes([buf[4], buf[5]]);
        let frag = FragKind::from_code(frag_code).ok_or(LayerError::UnsupportedType(frag_code))?;
        let message =
            MessageKind::from_code(buf[6]).ok_or(LayerError::UnsupportedType(buf[6] as u16))?;
        Ok(Self {
            length: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            frag,
            message,
            seq: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

struct Reassembly {
    total: usize,
    fragments: BTreeMap<u32, Vec<u8>>,
}

/// The file layer. One transfer at a time per instance; reassembly state is
/// reset on every first-fragment receipt.
pub struct FileLayer {
    name: String,
    links: LayerLinks,
    ack: AckSlot,
    response: ResponseSlot,
    rx: Mutex<Option<Reassembly>>,
    destination: Mutex<Option<PathBuf>>,
    handler: RwLock<Option<Arc<dyn AppHandler>>>,
}

impl FileLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            links: LayerLinks::new(),
            ack: AckSlot::new(),
            response: ResponseSlot::new(),
            rx: Mutex::new(None),
            destination: Mutex::new(None),
            handler: RwLock::new(None),
        }
    }

    /// Attach the application boundary for offers, progress, and status.
    pub fn set_handler(&self, handler: Arc<dyn AppHandler>) {
        *self.handler.write().unwrap() = Some(handler);
    }

    /// Announce and transfer a file to the peer. Blocks until the receiver
    /// answers the handshake; a declined transfer returns
    /// [`LayerError::TransferAborted`] with no data frames sent.
    pub fn send_file(&self, path: &Path) -> Result<(), LayerError> {
        let bytes = fs::read(path)?;
        if bytes.len() > u32::MAX as usize {
            return Err(LayerError::PayloadTooLarge {
                got: bytes.len(),
                max: u32::MAX as usize,
            });
        }
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                LayerError::InvalidPayload(format!("no usable file name in {}", path.display()))
            })?;
        let under = self.under_layer().ok_or(LayerError::NoUnderLayer)?;

        info!(
            "{}: offering `{}` ({} bytes)",
            self.name,
            filename,
            bytes.len()
        );
        self.send_message(&under, MessageKind::Filename, filename.as_bytes())?;

        if !self.response.wait() {
            warn!("{}: transfer of `{}` declined", self.name, filename);
            self.report(b"file transfer cancelled");
            return Err(LayerError::TransferAborted);
        }

        self.report(b"starting file transfer");
        self.send_message(&under, MessageKind::FileData, &bytes)?;
        info!("{}: transfer of `{}` done", self.name, filename);
        self.report(b"file transfer done");
        Ok(())
    }

    /// Fragment one conversational message and push it down, one
    /// acknowledgment slot per frame, sequence numbers 1..N.
    fn send_message(
        &self,
        under: &Arc<dyn Layer>,
        kind: MessageKind,
        data: &[u8],
    ) -> Result<(), LayerError> {
        if data.len() <= MTU_FILE {
            let header = FileHeader {
                length: data.len() as u32,
                frag: FragKind::Unfragmented,
                message: kind,
                seq: 1,
            };
            self.send_frame(under, header, data)?;
            if kind == MessageKind::FileData {
                self.progress(100);
            }
            return Ok(());
        }

        let count = fragment_count(data.len(), MTU_FILE);
        debug!(
            "{}: fragmented send of {} bytes in {} pieces",
            self.name,
            data.len(),
            count
        );
        let mut seq: u32 = 1;
        let header = FileHeader {
            length: data.len() as u32,
            frag: FragKind::First,
            message: kind,
            seq,
        };
        self.send_frame(under, header, &data[..MTU_FILE])?;
        if kind == MessageKind::FileData {
            self.progress(percent(seq as usize, count));
        }

        let full = data.len() / MTU_FILE;
        for index in 1..full {
            seq += 1;
            let frag = if index + 1 == full && data.len() % MTU_FILE == 0 {
                FragKind::Last
            } else {
                FragKind::Middle
            };
            let header = FileHeader {
                length: MTU_FILE as u32,
                frag,
                message: kind,
                seq,
            };
            self.send_frame(under, header, &data[index * MTU_FILE..(index + 1) * MTU_FILE])?;
            if kind == MessageKind::FileData {
                self.progress(percent(seq as usize, count));
            }
        }

        let tail = data.len() % MTU_FILE;
        if tail != 0 {
            seq += 1;
            let header = FileHeader {
                length: tail as u32,
                frag: FragKind::Last,
                message: kind,
                seq,
            };
            self.send_frame(under, header, &data[data.len() - tail..])?;
            if kind == MessageKind::FileData {
                self.progress(100);
            }
        }
        Ok(())
    }

    fn send_frame(
        &self,
        under: &Arc<dyn Layer>,
        header: FileHeader,
        body: &[u8],
    ) -> Result<(), LayerError> {
        self.ack.acquire();
        let mut frame = Vec::with_capacity(FILE_HEADER_LEN + body.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(body);
        under.send(Some(&frame), &self.name)
    }

    /// Handshake replies are control frames: no acknowledgment slot is
    /// consumed and the peer does not acknowledge them, keeping the
    /// one-in-flight accounting exact on both sides.
    fn send_reply(&self, accepted: bool) -> Result<(), LayerError> {
        let header = FileHeader {
            length: 0,
            frag: FragKind::Unfragmented,
            message: if accepted {
                MessageKind::Accept
            } else {
                MessageKind::Deny
            },
            seq: 0,
        };
        let under = self.under_layer().ok_or(LayerError::NoUnderLayer)?;
        under.send(Some(&header.encode()), &self.name)
    }

    fn receive_data(&self, header: &FileHeader, payload: &[u8]) -> Result<(), LayerError> {
        match header.frag {
            FragKind::Unfragmented => self.complete(header.message, payload),
            FragKind::First => {
                let total = header.length as usize;
                if payload.len() != MTU_FILE || total <= MTU_FILE {
                    return Err(LayerError::UnexpectedFragment);
                }
                let mut fragments = BTreeMap::new();
                fragments.insert(header.seq, payload.to_vec());
                // any half-finished previous transfer is discarded here
                *self.rx.lock().unwrap() = Some(Reassembly { total, fragments });
                if header.message == MessageKind::FileData {
                    self.progress(percent(1, fragment_count(total, MTU_FILE)));
                }
                Ok(())
            }
            FragKind::Middle => {
                if payload.len() != MTU_FILE {
                    return Err(LayerError::UnexpectedFragment);
                }
                let mut guard = self.rx.lock().unwrap();
                let re = guard.as_mut().ok_or(LayerError::UnexpectedFragment)?;
                re.fragments.insert(header.seq, payload.to_vec());
                let (have, total) = (re.fragments.len(), re.total);
                drop(guard);
                if header.message == MessageKind::FileData {
                    self.progress(percent(have, fragment_count(total, MTU_FILE)));
                }
                Ok(())
            }
            FragKind::Last => {
                let mut guard = self.rx.lock().unwrap();
                let mut re = guard.take().ok_or(LayerError::UnexpectedFragment)?;
                re.fragments.insert(header.seq, payload.to_vec());
                drop(guard);
                let data = defragment(re)?;
                if header.message == MessageKind::FileData {
                    self.progress(100);
                }
                self.complete(header.message, &data)
            }
        }
    }

    /// A whole conversational message has arrived.
    fn complete(&self, kind: MessageKind, data: &[u8]) -> Result<(), LayerError> {
        match kind {
            MessageKind::Filename => {
                let filename = String::from_utf8_lossy(data).into_owned();
                info!("{}: incoming file `{}`", self.name, filename);
                let handler = self.handler.read().unwrap().clone();
                let chosen = handler.and_then(|h| h.on_file_offer(&filename));
                let accepted = chosen.is_some();
                *self.destination.lock().unwrap() = chosen;
                if !accepted {
                    info!("{}: declining `{}`", self.name, filename);
                }
                self.send_reply(accepted)
            }
            MessageKind::FileData => {
                let path = self
                    .destination
                    .lock()
                    .unwrap()
                    .take()
                    .ok_or(LayerError::NoDestination)?;
                match fs::write(&path, data) {
                    Ok(()) => {
                        info!(
                            "{}: saved {} bytes to {}",
                            self.name,
                            data.len(),
                            path.display()
                        );
                        self.report(format!("file saved to {}", path.display()).as_bytes());
                        Ok(())
                    }
                    Err(e) => {
                        error!("{}: unable to save file to {}: {}", self.name, path.display(), e);
                        self.report(b"file save failed");
                        Err(LayerError::Io(e))
                    }
                }
            }
            // replies never carry a fragment body; routed before we get here
            MessageKind::Accept | MessageKind::Deny => {
                Err(LayerError::UnsupportedType(kind.code() as u16))
            }
        }
    }

    fn report(&self, text: &[u8]) {
        let handler = self.handler.read().unwrap().clone();
        if let Some(handler) = handler {
            handler.on_message(text, &self.name);
        }
    }

    fn progress(&self, percent: u8) {
        let handler = self.handler.read().unwrap().clone();
        if let Some(handler) = handler {
            handler.on_progress(percent);
        }
    }
}

impl Layer for FileLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn links(&self) -> &LayerLinks {
        &self.links
    }

    /// The payload is a UTF-8 path to transfer, mirroring the typed
    /// [`FileLayer::send_file`].
    fn send(&self, payload: Option<&[u8]>, _from: &str) -> Result<(), LayerError> {
        let bytes = payload.ok_or(LayerError::EmptyPayload)?;
        let path = std::str::from_utf8(bytes)
            .map_err(|_| LayerError::InvalidPayload("file path must be UTF-8".to_owned()))?;
        self.send_file(Path::new(path))
    }

    fn receive(&self, frame: Option<&[u8]>, _from: &str) -> Result<(), LayerError> {
        let Some(frame) = frame else {
            if !self.ack.release() {
                warn!("{}: acknowledgment with nothing outstanding", self.name);
            }
            return Ok(());
        };

        let header = FileHeader::decode(frame)?;
        let payload = &frame[FILE_HEADER_LEN..];

        match header.message {
            MessageKind::Accept | MessageKind::Deny => {
                let accepted = header.message == MessageKind::Accept;
                debug!(
                    "{}: transfer {}",
                    self.name,
                    if accepted { "accepted" } else { "declined" }
                );
                if !self.response.post(accepted) {
                    warn!("{}: unsolicited transfer reply", self.name);
                }
                Ok(())
            }
            MessageKind::Filename | MessageKind::FileData => {
                // acknowledge before processing; the offer dialog and the
                // final save may take a while
                let under = self.under_layer().ok_or(LayerError::NoUnderLayer)?;
                under.send(None, &self.name)?;
                self.receive_data(&header, payload)
            }
        }
    }
}

fn percent(done: usize, count: usize) -> u8 {
    if count == 0 {
        return 100;
    }
    ((done * 100) / count) as u8
}

/// Linearize a fragment map: every fragment lands at `(seq - 1) * MTU_FILE`,
/// the last one at its own stored length. Fails closed on gaps or overruns.
fn defragment(re: Reassembly) -> Result<Vec<u8>, LayerError> {
    let expected = fragment_count(re.total, MTU_FILE);
    if re.fragments.len() != expected {
        return Err(LayerError::IncompleteReassembly {
            have: re.fragments.len(),
            expected,
        });
    }
    let mut buf = vec![0u8; re.total];
    for (&seq, bytes) in &re.fragments {
        if seq == 0 {
            return Err(LayerError::UnexpectedFragment);
        }
        let offset = (seq as usize - 1) * MTU_FILE;
        let end = offset
            .checked_add(bytes.len())
            .ok_or(LayerError::UnexpectedFragment)?;
        if end > buf.len() {
            return Err(LayerError::UnexpectedFragment);
        }
        buf[offset..end].copy_from_slice(bytes);
    }
    Ok(buf)
}
