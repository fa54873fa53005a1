#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;

#[cfg(feature = "async")]
pub mod async_dht;
mod dht;
mod error;
pub mod peer;
pub mod reflector;
pub mod rpc;

pub use crate::common::{
    messages, ClosestNodes, Id, KBucket, Node, RoutingTable, ID_SIZE, MAX_BUCKET_SIZE_K,
};
pub use bytes::Bytes;
pub use dht::{Dht, DhtBuilder, Testnet, TESTNET_REQUEST_TIMEOUT};
pub use error::{Error, Result};
pub use rpc::{Config, FindMode, FindResult, Info};
