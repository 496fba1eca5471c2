//! Example: LAN chat
//!
//! One process hosts with `--serve`, every other process finds it through
//! discovery and joins. Lines typed on stdin are relayed to everyone.
//!
//! Run with:
//! - `cargo run --example lan_chat -- --serve`
//! - `cargo run --example lan_chat -- alice`

#![allow(clippy::uninlined_format_args)]

use std::io::BufRead;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use peerlink::core::wire::{WireRead, WireWrite};
use peerlink::utils::logging::init_logging;
use peerlink::{
    ConnectTarget, NetworkConfig, Packet, PacketContext, PacketRegistry, PeerId, Result, Socket,
};

#[derive(Debug, Default, Clone)]
struct Say {
    nick: String,
    line: String,
}

impl Packet for Say {
    fn name(&self) -> &'static str {
        "lan_chat.say"
    }

    fn write(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_str(&self.nick)?;
        buf.put_str(&self.line)
    }

    fn read(&mut self, buf: &mut Bytes) -> Result<()> {
        self.nick = buf.read_str()?;
        self.line = buf.read_str()?;
        Ok(())
    }

    fn perform(&self, sender: PeerId, ctx: &dyn PacketContext) -> Result<()> {
        println!("<{}> {}", self.nick, self.line);
        // Lines from remotes arrive on the host, which relays them
        if !sender.is_nil() {
            ctx.send_to_remotes(self)?;
        }
        Ok(())
    }
}

fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines().map_while(|l| l.ok()) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = NetworkConfig::from_env()?;
    init_logging(&config.logging)?;

    let registry = PacketRegistry::new();
    registry.register::<Say>()?;

    let arg = std::env::args().nth(1);
    let serve = arg.as_deref() == Some("--serve");
    let nick = if serve {
        String::from("host")
    } else {
        arg.unwrap_or_else(|| format!("guest-{}", &PeerId::random().to_string()[..6]))
    };

    let mut socket = Socket::new(config, Arc::new(registry))?;
    if serve {
        let port = socket.config().server.port;
        let addr = socket.start(port)?;
        println!("Hosting on {}; waiting for guests", addr);
    } else {
        let addr = socket.connect(ConnectTarget::Lan)?;
        println!("Joined {} as {}", addr, nick);
    }

    let lines = stdin_lines();
    loop {
        socket.tick();

        while let Ok(line) = lines.try_recv() {
            let say = Say {
                nick: nick.clone(),
                line,
            };
            if serve {
                println!("<{}> {}", say.nick, say.line);
                socket.send_to_remotes(&say)?;
            } else {
                socket.send_to_server(&say)?;
            }
        }

        if !serve && !socket.is_connected() {
            println!("Host went away");
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    Ok(())
}
