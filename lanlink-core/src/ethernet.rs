//! Link-framing layer: station addressing, type multiplexing, acknowledgment
//! codes.
//!
//! Every outbound unit gets the 14-byte link header (destination, source,
//! big-endian type code); inbound frames are filtered by address, stripped,
//! and demultiplexed to the bound upper layer. An empty send from an upper
//! layer goes out under that layer's acknowledgment type code, and a frame
//! arriving under an acknowledgment code is delivered upward as `None`.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use log::{trace, warn};

use crate::layer::{hex_dump, Layer, LayerError, LayerLinks};

/// Link header length: 6 destination + 6 source + 2 type code.
pub const ETH_HEADER_LEN: usize = 14;

/// Chat data frames.
pub const ETHERTYPE_CHAT: u16 = 0x2080;
/// Acknowledgments for chat data frames.
pub const ETHERTYPE_CHAT_ACK: u16 = 0x2081;
/// File-transfer frames (filename, data, handshake replies).
pub const ETHERTYPE_FILE: u16 = 0x2090;
/// Acknowledgments for file-transfer frames.
pub const ETHERTYPE_FILE_ACK: u16 = 0x2091;

/// Six-byte station address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        write!(
            f,
            "{:02X}-{:02X}-{:02X}-{:02X}-{:02X}-{:02X}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid link address `{0}`")]
pub struct AddrParseError(String);

impl FromStr for MacAddr {
    type Err = AddrParseError;

    /// Parse `AA-BB-CC-DD-EE-FF` (also accepts `:` separators).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(['-', ':']).collect();
        if parts.len() != 6 {
            return Err(AddrParseError(s.to_owned()));
        }
        let mut out = [0u8; 6];
        for (slot, part) in out.iter_mut().zip(&parts) {
            *slot = u8::from_str_radix(part, 16).map_err(|_| AddrParseError(s.to_owned()))?;
        }
        Ok(MacAddr(out))
    }
}

/// Decoded link header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
}

impl EthernetHeader {
    pub fn encode(&self) -> [u8; ETH_HEADER_LEN] {
        let mut buf = [0u8; ETH_HEADER_LEN];
        buf[0..6].copy_from_slice(self.dst.as_bytes());
        buf[6..12].copy_from_slice(self.src.as_bytes());
        buf[12..14].copy_from_slice(&self.ethertype.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, LayerError> {
        if buf.len() < ETH_HEADER_LEN {
            return Err(LayerError::ShortFrame {
                got: buf.len(),
                need: ETH_HEADER_LEN,
            });
        }
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&buf[0..6]);
        src.copy_from_slice(&buf[6..12]);
        Ok(Self {
            dst: MacAddr(dst),
            src: MacAddr(src),
            ethertype: u16::from_be_bytes([buf[12], buf[13]]),
        })
    }
}

struct TypeBinding {
    upper: String,
    data: u16,
    ack: u16,
}

/// The link-framing layer. Address state persists; each send/receive call is
/// otherwise stateless.
pub struct EthernetLayer {
    name: String,
    links: LayerLinks,
    local: RwLock<MacAddr>,
    peer: RwLock<MacAddr>,
    bindings: RwLock<Vec<TypeBinding>>,
}

impl EthernetLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            links: LayerLinks::new(),
            local: RwLock::new(MacAddr::default()),
            peer: RwLock::new(MacAddr::BROADCAST),
            bindings: RwLock::new(Vec::new()),
        }
    }

    /// Bind an upper layer name to its data and acknowledgment type codes.
    pub fn bind_upper(&self, upper: impl Into<String>, data: u16, ack: u16) {
        self.bindings.write().unwrap().push(TypeBinding {
            upper: upper.into(),
            data,
            ack,
        });
    }

    pub fn set_local_addr(&self, addr: MacAddr) {
        *self.local.write().unwrap() = addr;
    }

    pub fn set_peer_addr(&self, addr: MacAddr) {
        *self.peer.write().unwrap() = addr;
    }

    pub fn local_addr(&self) -> MacAddr {
        *self.local.read().unwrap()
    }

    fn codes_for_upper(&self, upper: &str) -> Option<(u16, u16)> {
        self.bindings
            .read()
            .unwrap()
            .iter()
            .find(|b| b.upper == upper)
            .map(|b| (b.data, b.ack))
    }

    /// Resolve a type code to `(upper layer name, is_ack)`.
    fn upper_for_code(&self, code: u16) -> Option<(String, bool)> {
        self.bindings.read().unwrap().iter().find_map(|b| {
            if b.data == code {
                Some((b.upper.clone(), false))
            } else if b.ack == code {
                Some((b.upper.clone(), true))
            } else {
                None
            }
        })
    }
}

impl Layer for EthernetLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn links(&self) -> &LayerLinks {
        &self.links
    }

    fn send(&self, payload: Option<&[u8]>, from: &str) -> Result<(), LayerError> {
        let (data_code, ack_code) = self
            .codes_for_upper(from)
            .ok_or_else(|| LayerError::UnsupportedLayer(from.to_owned()))?;
        let body = payload.unwrap_or(&[]);
        let header = EthernetHeader {
            dst: *self.peer.read().unwrap(),
            src: *self.local.read().unwrap(),
            ethertype: if body.is_empty() { ack_code } else { data_code },
        };

        let mut frame = Vec::with_capacity(ETH_HEADER_LEN + body.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(body);
        trace!("{}: out\n{}", self.name, hex_dump(&frame));

        let under = self.under_layer().ok_or(LayerError::NoUnderLayer)?;
        under.send(Some(&frame), &self.name)
    }

    fn receive(&self, frame: Option<&[u8]>, _from: &str) -> Result<(), LayerError> {
        let frame = frame.ok_or(LayerError::EmptyPayload)?;
        let header = EthernetHeader::decode(frame)?;

        let local = *self.local.read().unwrap();
        if header.src == local {
            // reflection of a frame this station sourced
            trace!("{}: dropping own frame", self.name);
            return Ok(());
        }
        if header.dst != local && !header.dst.is_broadcast() {
            trace!("{}: frame for {} ignored", self.name, header.dst);
            return Ok(());
        }

        let (upper_name, is_ack) = self.upper_for_code(header.ethertype).ok_or_else(|| {
            warn!(
                "{}: dropping frame with unknown type code {:#06x}",
                self.name, header.ethertype
            );
            LayerError::UnsupportedType(header.ethertype)
        })?;
        let upper = self
            .upper_layer(&upper_name)
            .ok_or(LayerError::UnsupportedLayer(upper_name))?;

        if is_ack {
            upper.receive(None, &self.name)
        } else {
            upper.receive(Some(&frame[ETH_HEADER_LEN..]), &self.name)
        }
    }
}
