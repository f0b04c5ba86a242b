//! UDP raw-frame driver: stands in for the link hardware below the stack.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;

use log::{error, warn};

use lanlink_core::{RawTransport, TransportLayer};

/// Maximum raw frame the receiver will accept.
const MAX_FRAME: usize = 65536;

pub struct UdpLink {
    socket: UdpSocket,
    dest: SocketAddr,
}

impl UdpLink {
    pub fn open(bind: SocketAddr, dest: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.set_broadcast(true)?;
        Ok(Self { socket, dest })
    }

    /// Spawn the dedicated receiver thread feeding inbound frames to the
    /// stack. Per-frame errors are logged and delivery continues.
    pub fn spawn_receiver(&self, nic: Arc<TransportLayer>) -> io::Result<thread::JoinHandle<()>> {
        let socket = self.socket.try_clone()?;
        thread::Builder::new()
            .name("lanlink-recv".to_owned())
            .spawn(move || {
                let mut buf = vec![0u8; MAX_FRAME];
                loop {
                    match socket.recv_from(&mut buf) {
                        Ok((n, _from)) => {
                            if let Err(e) = nic.deliver(&buf[..n]) {
                                warn!("inbound frame dropped: {e}");
                            }
                        }
                        Err(e) => {
                            error!("receive failed, stopping driver: {e}");
                            break;
                        }
                    }
                }
            })
    }
}

impl RawTransport for UdpLink {
    fn send_raw(&self, frame: &[u8]) -> io::Result<()> {
        self.socket.send_to(frame, self.dest).map(|_| ())
    }
}
