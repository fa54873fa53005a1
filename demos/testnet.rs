use std::time::Instant;

use clap::Parser;
use reflector::{Dht, Id, Testnet};
use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of nodes in the testnet
    #[arg(short, long, default_value_t = 20)]
    nodes: usize,
    /// Blob to announce, its hash is the content id
    #[arg(short, long, default_value = "Hello World!")]
    blob: String,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    let start = Instant::now();
    let testnet = Testnet::new(cli.nodes).expect("failed to start testnet");
    println!(
        "Started {} nodes in {:?}\n",
        testnet.nodes.len(),
        start.elapsed()
    );

    let announcer = Dht::builder()
        .bootstrap(&testnet.bootstrap)
        .build()
        .expect("failed to start announcer");
    let seeker = Dht::builder()
        .bootstrap(&testnet.bootstrap)
        .build()
        .expect("failed to start seeker");

    let content_id = Id::from_blob(cli.blob.as_bytes());

    let start = Instant::now();
    announcer.announce(content_id);
    println!("Announced {} in {:?}", content_id, start.elapsed());

    let start = Instant::now();
    let result = seeker.find_value(content_id);
    println!(
        "Found {} announcers in {:?}: {:?}\n",
        result.nodes.len(),
        start.elapsed(),
        result.nodes
    );

    println!("{}", seeker.info());
}
