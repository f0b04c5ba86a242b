//! Layer abstraction: the send/receive contract and neighbor links.

use std::fmt::Write as _;
use std::sync::{Arc, RwLock, Weak};

/// One node in the protocol pipeline.
///
/// A layer has at most one "under" neighbor and an ordered list of named
/// "upper" neighbors. `send` pushes a payload toward the link; `receive` is
/// invoked by the layer below (or the transport host) as data climbs the
/// stack. Both calls run synchronously on the caller's thread.
///
/// A `None` payload or frame is the acknowledgment channel: an empty send
/// becomes an acknowledgment frame on the wire, and a `None` receive tells a
/// layer that its previous data unit was acknowledged.
pub trait Layer: Send + Sync {
    fn name(&self) -> &str;

    /// Neighbor storage; wired by the topology builder.
    fn links(&self) -> &LayerLinks;

    /// Push a payload down toward the link. `from` names the calling layer,
    /// which multiplexing layers use to pick a type code.
    fn send(&self, payload: Option<&[u8]>, from: &str) -> Result<(), LayerError>;

    /// Accept a frame climbing the stack. `from` names the layer below.
    fn receive(&self, frame: Option<&[u8]>, from: &str) -> Result<(), LayerError>;

    fn under_layer(&self) -> Option<Arc<dyn Layer>> {
        self.links().under()
    }

    fn upper_layer(&self, name: &str) -> Option<Arc<dyn Layer>> {
        self.links().upper_by_name(name)
    }

    fn upper_at(&self, index: usize) -> Option<Arc<dyn Layer>> {
        self.links().upper_at(index)
    }
}

/// Shared neighbor references for one layer.
///
/// Links are weak; the [`crate::topology::LayerStack`] registry holds the
/// strong references, so bidirectional attachment cannot leak.
#[derive(Default)]
pub struct LayerLinks {
    under: RwLock<Option<Weak<dyn Layer>>>,
    uppers: RwLock<Vec<Weak<dyn Layer>>>,
}

impl LayerLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_under(&self, under: &Arc<dyn Layer>) {
        *self.under.write().unwrap() = Some(Arc::downgrade(under));
    }

    pub fn add_upper(&self, upper: &Arc<dyn Layer>) {
        self.uppers.write().unwrap().push(Arc::downgrade(upper));
    }

    pub fn under(&self) -> Option<Arc<dyn Layer>> {
        self.under.read().unwrap().as_ref().and_then(|w| w.upgrade())
    }

    pub fn upper_at(&self, index: usize) -> Option<Arc<dyn Layer>> {
        self.uppers.read().unwrap().get(index).and_then(|w| w.upgrade())
    }

    pub fn upper_by_name(&self, name: &str) -> Option<Arc<dyn Layer>> {
        self.uppers
            .read()
            .unwrap()
            .iter()
            .filter_map(|w| w.upgrade())
            .find(|l| l.name() == name)
    }

    pub fn upper_count(&self) -> usize {
        self.uppers.read().unwrap().len()
    }
}

/// Failures local to one send/receive call. None of these take the stack
/// down: the transport host logs the error and keeps delivering.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("no under layer attached")]
    NoUnderLayer,
    #[error("no upper layer attached")]
    NoUpperLayer,
    #[error("no upper layer binding for `{0}`")]
    UnsupportedLayer(String),
    #[error("unsupported type code {0:#06x}")]
    UnsupportedType(u16),
    #[error("frame too short: {got} bytes, need at least {need}")]
    ShortFrame { got: usize, need: usize },
    #[error("payload of {got} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { got: usize, max: usize },
    #[error("empty payload")]
    EmptyPayload,
    #[error("fragment does not belong to an open reassembly")]
    UnexpectedFragment,
    #[error("reassembly incomplete: {have} of {expected} fragments")]
    IncompleteReassembly { have: usize, expected: usize },
    #[error("transfer declined by receiver")]
    TransferAborted,
    #[error("no transfer destination negotiated")]
    NoDestination,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Render a frame as spaced hex pairs, 16 per line, for trace logging.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (index, byte) in bytes.iter().enumerate() {
        if index > 0 {
            out.push(if index % 16 == 0 { '\n' } else { ' ' });
        }
        let _ = write!(out, "{byte:02X}");
    }
    out
}
