//! Application boundary: callbacks the stack raises toward the host surface.

use std::path::PathBuf;

/// Implemented by the host (console, GUI, tests).
///
/// Every call is synchronous on a stack thread: a slow handler blocks
/// further inbound delivery on that path, which is the stack's backpressure
/// mechanism rather than a bug.
pub trait AppHandler: Send + Sync {
    /// A payload reached the top of the stack from the named layer. The chat
    /// layer delivers message text here; the file layer delivers transfer
    /// status lines.
    fn on_message(&self, payload: &[u8], from_layer: &str);

    /// File transfer progress in percent, 0..=100, on both the sending and
    /// the receiving side.
    fn on_progress(&self, _percent: u8) {}

    /// An incoming file was announced. Return the destination path to accept
    /// the transfer, or `None` to decline it. Blocks the delivery thread
    /// until a decision is made.
    fn on_file_offer(&self, _filename: &str) -> Option<PathBuf> {
        None
    }
}
