//! Flooded chat demo. Start a few of these on one machine, each naming its
//! own port and everyone else's, then type lines:
//!
//!   chat 1 9001 9002 9003
//!   chat 2 9002 9001 9003
//!   chat 3 9003 9001 9002
//!
//! Every line is flooded to the whole mesh; with a mesh this small each
//! node hears every other directly and suppression does most of the work.

use std::net::SocketAddr;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use floodcast::wire::NodeAddr;

const CHAT_CHANNEL: u16 = 131;

static EVENT_TIMEOUT: Duration = Duration::from_millis(250);

fn usage() -> ! {
    eprintln!("usage: chat <node-id> <own-port> <peer-port>...");
    std::process::exit(1);
}

fn main() {
    let args = std::env::args().collect::<Vec<_>>();

    if args.len() < 4 {
        usage();
    }

    let node_id: u16 = args[1].parse().unwrap_or_else(|_| usage());
    let own_port: u16 = args[2].parse().unwrap_or_else(|_| usage());

    let peers = args[3..]
        .iter()
        .map(|arg| {
            let port: u16 = arg.parse().unwrap_or_else(|_| usage());
            SocketAddr::from(([127, 0, 0, 1], port))
        })
        .collect::<Vec<_>>();

    let config = floodcast::host::Config::new(NodeAddr(node_id));

    let mut host = floodcast::Host::bind(("127.0.0.1", own_port), &peers, config)
        .expect("failed to bind chat socket");

    if !host.open(CHAT_CHANNEL) {
        panic!("failed to open chat channel");
    }

    println!("node {} on port {}, {} peer(s)", node_id, own_port, peers.len());

    let (line_tx, line_rx) = mpsc::channel::<String>();

    thread::spawn(move || {
        let mut line = String::new();
        loop {
            line.clear();
            if std::io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
                return;
            }
            if line_tx.send(line.trim_end().to_string()).is_err() {
                return;
            }
        }
    });

    loop {
        while let Some(event) = host.wait_event_timeout(EVENT_TIMEOUT) {
            match event {
                floodcast::host::Event::Delivered {
                    delivery, payload, ..
                } => {
                    println!(
                        "[{} seq {} via {} hops]: {}",
                        delivery.originator,
                        delivery.seqno,
                        delivery.hops,
                        String::from_utf8_lossy(&payload)
                    );
                }
                floodcast::host::Event::Sent { .. } => {}
                floodcast::host::Event::Dropped { .. } => {
                    println!("(a neighbor beat us to a rebroadcast)");
                }
            }
        }

        while let Ok(line) = line_rx.try_recv() {
            if line.is_empty() {
                continue;
            }

            if !host.send(CHAT_CHANNEL, line.as_bytes()) {
                eprintln!("(send failed - line too long or buffers busy)");
            }
        }
    }
}
