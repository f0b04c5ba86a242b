// lanlink node: wires the protocol stack over a UDP link with a console
// surface in place of a GUI.

mod config;
mod transport;

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use log::info;

use lanlink_core::{
    AppHandler, ChatLayer, EthernetLayer, FileLayer, Layer, LayerStack, MacAddr, TransportLayer,
    ETHERTYPE_CHAT, ETHERTYPE_CHAT_ACK, ETHERTYPE_FILE, ETHERTYPE_FILE_ACK,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Console application surface: prints what the stack delivers and accepts
/// every offered file into the download directory.
struct Console {
    download_dir: PathBuf,
}

impl AppHandler for Console {
    fn on_message(&self, payload: &[u8], from_layer: &str) {
        println!("[{}] {}", from_layer, String::from_utf8_lossy(payload));
    }

    fn on_progress(&self, percent: u8) {
        print!("\rtransfer {percent:3}%");
        if percent >= 100 {
            println!();
        }
        let _ = std::io::stdout().flush();
    }

    fn on_file_offer(&self, filename: &str) -> Option<PathBuf> {
        // keep only the final component; peers don't get to pick directories
        let safe = Path::new(filename).file_name()?;
        println!(
            "incoming file `{}`, saving under {}",
            filename,
            self.download_dir.display()
        );
        Some(self.download_dir.join(safe))
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("lanlink-node {VERSION}");
                return Ok(());
            }
            "--config" | "-c" => {
                config_path = Some(PathBuf::from(
                    args.next().context("--config needs a path")?,
                ));
            }
            other => anyhow::bail!("unknown argument `{other}` (try --config <path>)"),
        }
    }

    let cfg = config::load(config_path.as_deref());
    let station: MacAddr = cfg.station.parse().context("bad station address")?;
    let peer: MacAddr = cfg.peer.parse().context("bad peer address")?;
    let bind: std::net::SocketAddr = cfg.bind.parse().context("bad bind address")?;
    let dest: std::net::SocketAddr = cfg.dest.parse().context("bad destination address")?;

    let nic = Arc::new(TransportLayer::new("nic"));
    let eth = Arc::new(EthernetLayer::new("eth"));
    let chat = Arc::new(ChatLayer::new("chat"));
    let file = Arc::new(FileLayer::new("file"));

    eth.set_local_addr(station);
    eth.set_peer_addr(peer);
    eth.bind_upper("chat", ETHERTYPE_CHAT, ETHERTYPE_CHAT_ACK);
    eth.bind_upper("file", ETHERTYPE_FILE, ETHERTYPE_FILE_ACK);

    let console = Arc::new(Console {
        download_dir: cfg.download_dir.clone(),
    });
    chat.set_handler(console.clone());
    file.set_handler(console);

    let mut stack = LayerStack::new();
    stack.register(nic.clone())?;
    stack.register(eth)?;
    stack.register(chat.clone())?;
    stack.register(file.clone())?;
    stack
        .connect(&cfg.topology)
        .with_context(|| format!("wiring topology `{}`", cfg.topology))?;

    let link = Arc::new(transport::UdpLink::open(bind, dest).context("opening UDP link")?);
    nic.set_driver(link.clone());
    link.spawn_receiver(nic.clone())
        .context("starting receiver thread")?;
    info!("stack up: station {station}, peer {peer}, link {bind} -> {dest}");

    println!("lanlink-node {VERSION} — station {station}, peer {peer}");
    println!("type a message, `/send <path>` to transfer a file, `/quit` to exit");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "/quit" {
            break;
        }
        if let Some(path) = input.strip_prefix("/send ") {
            // the handshake blocks until the peer answers; keep the console free
            let file = file.clone();
            let path = PathBuf::from(path.trim());
            std::thread::spawn(move || {
                if let Err(e) = file.send_file(&path) {
                    eprintln!("file transfer failed: {e}");
                }
            });
        } else if let Err(e) = chat.send(Some(input.as_bytes()), "console") {
            eprintln!("send failed: {e}");
        }
    }
    Ok(())
}
