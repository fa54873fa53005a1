use std::collections::HashMap;
use std::net::SocketAddr;

use crate::common::{ErrorSpecific, ResponseSpecific};

/// What the listener hands back to a waiting requester.
pub type ResponseResult = Result<ResponseSpecific, ErrorSpecific>;

#[derive(Debug)]
pub struct InflightRequest {
    pub to: SocketAddr,
    pub sender: flume::Sender<ResponseResult>,
}

impl InflightRequest {
    /// A response must come from the address the request was sent to.
    ///
    /// Requests to an unspecified ip accept a response from any ip on that port.
    pub fn does_match(&self, from: &SocketAddr) -> bool {
        if self.to.port() != from.port() {
            return false;
        }

        if self.to.ip().is_unspecified() {
            return true;
        }

        self.to.ip() == from.ip()
    }
}

/// Requests waiting for a response, by transaction_id.
#[derive(Debug, Default)]
pub struct InflightRequests {
    requests: HashMap<u32, InflightRequest>,
}

impl InflightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, transaction_id: u32, to: SocketAddr, sender: flume::Sender<ResponseResult>) {
        self.requests
            .insert(transaction_id, InflightRequest { to, sender });
    }

    #[cfg(test)]
    pub fn contains(&self, transaction_id: u32) -> bool {
        self.requests.contains_key(&transaction_id)
    }

    /// Remove inflight request by transaction_id if it exists and matches the address
    pub fn remove(&mut self, transaction_id: u32, from: &SocketAddr) -> Option<InflightRequest> {
        if !self.requests.get(&transaction_id)?.does_match(from) {
            return None;
        }

        self.requests.remove(&transaction_id)
    }

    /// Forget a request, after it timed out or failed to send.
    pub fn cancel(&mut self, transaction_id: u32) {
        self.requests.remove(&transaction_id);
    }

    /// Drop all waiting senders, so every waiter fails immediately.
    pub fn clear(&mut self) {
        self.requests.clear();
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
