use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTMessage {
    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: Vec<u8>,

    #[serde(rename = "y")]
    pub message_type: String,

    #[serde(default, rename = "q", skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, rename = "a", skip_serializing_if = "Option::is_none")]
    pub arguments: Option<DHTRequestArguments>,

    #[serde(default, rename = "r", skip_serializing_if = "Option::is_none")]
    pub response: Option<DHTResponseArguments>,

    #[serde(default, rename = "e", skip_serializing_if = "Option::is_none")]
    pub error: Option<(i32, String)>,

    #[serde(default, rename = "v", skip_serializing_if = "Option::is_none")]
    pub version: Option<ByteBuf>,
}

impl DHTMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<DHTMessage, serde_bencode::Error> {
        let obj = serde_bencode::from_bytes(bytes)?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }
}

pub const REQUEST: &str = "q";
pub const RESPONSE: &str = "r";
pub const ERROR: &str = "e";

pub const PING: &str = "ping";
pub const FIND_NODE: &str = "find_node";
pub const FIND_VALUE: &str = "find_value";
pub const STORE: &str = "store";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTRequestArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ByteBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTResponseArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    /// Compact node infos, one string per node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<ByteBuf>>,

    /// Compact node infos of announcers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<ByteBuf>>,
}
