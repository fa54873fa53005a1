use std::{
    sync::{atomic::AtomicBool, atomic::Ordering, Arc},
    thread,
    time::Duration,
};

use bytes::Bytes;
use clap::Parser;
use ::reflector::{
    peer::{self, MemoryBlobStore, Server},
    reflector, Dht, Id,
};
use tracing::{info, Level};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bootstrap nodes, as host:port
    #[arg(short, long)]
    bootstrap: Vec<String>,
    /// DHT UDP port
    #[arg(long)]
    port: Option<u16>,
    /// Peer protocol TCP port
    #[arg(long, default_value_t = peer::DEFAULT_PORT)]
    peer_port: u16,
    /// Reflector TCP port, accepting blob uploads into the served store
    #[arg(long, default_value_t = reflector::DEFAULT_PORT)]
    reflector_port: u16,
    /// Blobs to serve and announce
    blobs: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let cli = Cli::parse();

    let store = Arc::new(MemoryBlobStore::new());
    let hashes: Vec<String> = cli
        .blobs
        .iter()
        .map(|blob| store.insert(Bytes::from(blob.clone())))
        .collect();

    let server = Server::new(store.clone());
    let peer_address = format!("0.0.0.0:{}", cli.peer_port);
    thread::spawn(move || server.listen(peer_address));

    let uploads = reflector::Server::new(store);
    let reflector_address = format!("0.0.0.0:{}", cli.reflector_port);
    thread::spawn(move || uploads.listen(reflector_address));

    let mut builder = Dht::builder()
        .bootstrap(&cli.bootstrap)
        .announce_port(cli.peer_port);
    if let Some(port) = cli.port {
        builder = builder.port(port);
    }
    let dht = builder.build().expect("failed to start node");

    info!(id = %dht.id(), local_addr = ?dht.local_addr(), "Node is running, press Ctrl+C to stop");

    for hash in &hashes {
        let content_id: Id = hash.parse().expect("blob hashes are valid ids");
        dht.announce(content_id);
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .expect("failed to set Ctrl+C handler");
    }

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    println!("\n{}", dht.info());

    dht.shutdown();
}
