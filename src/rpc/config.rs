use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use crate::common::Id;

use super::{DEFAULT_ALPHA, DEFAULT_REQUEST_TIMEOUT};

#[derive(Debug, Clone)]
/// Dht Configurations
pub struct Config {
    /// Bootstrap nodes, as `host:port` strings.
    ///
    /// Defaults to none, a node without bootstrap nodes only learns about the
    /// network from incoming requests.
    pub bootstrap: Vec<String>,
    /// Explicit port to listen on.
    ///
    /// Defaults to None, where [super::DEFAULT_PORT] is tried first, and a random port otherwise.
    pub port: Option<u16>,
    /// IP address to bind the UDP socket to.
    ///
    /// Defaults to `0.0.0.0`
    pub bind_ip: IpAddr,
    /// UDP socket request timeout duration.
    ///
    /// The longer this duration is, the longer lookups take when nodes don't respond.
    /// The shorter this duration is, the more responses from busy nodes we miss out on,
    /// which affects the accuracy of lookups trying to find closest nodes to a target.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Number of concurrent requests per lookup round.
    ///
    /// Defaults to [DEFAULT_ALPHA]
    pub alpha: usize,
    /// Port to announce in STORE requests, usually the port of the blob exchange server.
    ///
    /// Defaults to None, where remote nodes record the port the request came from.
    pub announce_port: Option<u16>,
    /// Explicit node Id.
    ///
    /// Defaults to None, where a random Id is generated.
    pub id: Option<Id>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bootstrap: Vec::new(),
            port: None,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            alpha: DEFAULT_ALPHA,
            announce_port: None,
            id: None,
        }
    }
}
