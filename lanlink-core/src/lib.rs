//! Layered LAN data-link protocol stack.
//!
//! Chat text and whole files travel as framed, fragmented, stop-and-wait
//! acknowledged payloads over a raw link transport. Layers are wired into a
//! pipeline from a textual topology expression; each layer hides its wire
//! format from its neighbors and talks to them only through the
//! [`Layer`] send/receive contract.
//!
//! The host owns all I/O: it feeds inbound frames to the bottom
//! [`TransportLayer`] on a dedicated receiver thread and implements
//! [`AppHandler`] for everything the stack delivers upward.

pub mod app;
pub mod chat;
pub mod ethernet;
pub mod file;
pub mod fragment;
pub mod layer;
pub mod signal;
pub mod topology;
pub mod transport;

pub use app::AppHandler;
pub use chat::{ChatLayer, MTU_CHAT};
pub use ethernet::{
    EthernetLayer, MacAddr, ETHERTYPE_CHAT, ETHERTYPE_CHAT_ACK, ETHERTYPE_FILE, ETHERTYPE_FILE_ACK,
};
pub use file::{FileLayer, MessageKind, MTU_FILE};
pub use fragment::FragKind;
pub use layer::{Layer, LayerError};
pub use topology::{ConfigurationError, LayerStack};
pub use transport::{RawTransport, TransportLayer};
