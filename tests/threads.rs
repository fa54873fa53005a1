//! Node threads exit once the nodes are shutdown.
//!
//! Kept alone in its own test binary, so no other test spawns threads meanwhile.

use std::{
    thread,
    time::{Duration, Instant},
};

use reflector::{Id, Testnet};

#[cfg(target_os = "linux")]
fn thread_count() -> usize {
    let status = std::fs::read_to_string("/proc/self/status").unwrap();

    status
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))
        .and_then(|count| count.trim().parse().ok())
        .unwrap()
}

#[cfg(target_os = "linux")]
#[test]
fn no_threads_left_after_testnet_drop() {
    let baseline = thread_count();

    {
        let testnet = Testnet::new(20).unwrap();

        thread::scope(|scope| {
            for node in testnet.nodes.iter().take(10) {
                scope.spawn(move || node.announce(Id::random()));
            }
        });

        assert!(thread_count() > baseline);
    }

    let start = Instant::now();
    while thread_count() > baseline {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "{} threads still running, {baseline} before the testnet",
            thread_count()
        );

        thread::sleep(Duration::from_millis(50));
    }
}
