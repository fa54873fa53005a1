//! Typed DHT messages and their bencoded wire form.
//!
//! Requests are PING, FIND_NODE, FIND_VALUE and STORE. Responses carry the
//! responder's Id, closer nodes, and for FIND_VALUE optionally the nodes that
//! announced the target content.

mod internal;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde_bytes::ByteBuf;

use crate::common::{Id, Node, ID_SIZE};
use crate::{Error, Result};

use internal::{DHTMessage, DHTRequestArguments, DHTResponseArguments};

const COMPACT_NODE_V4: usize = ID_SIZE + 6;
const COMPACT_NODE_V6: usize = ID_SIZE + 18;

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    pub transaction_id: u32,

    /// The version of the requester or responder.
    pub version: Option<Vec<u8>>,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),

    Error(ErrorSpecific),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ErrorSpecific {
    pub code: i32,
    pub description: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct RequestSpecific {
    pub requester_id: Id,
    pub request_type: RequestTypeSpecific,
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestTypeSpecific {
    Ping,
    FindNode(FindNodeRequestArguments),
    FindValue(FindValueRequestArguments),
    Store(StoreRequestArguments),
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeRequestArguments {
    pub target: Id,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindValueRequestArguments {
    pub target: Id,
}

#[derive(Debug, PartialEq, Clone)]
pub struct StoreRequestArguments {
    pub content_id: Id,
    /// Explicit port the announcer can be reached on, otherwise the port the request came from.
    pub port: Option<u16>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseSpecific {
    /// Also the acknowledgement of a STORE request.
    Ping(PingResponseArguments),
    FindNode(FindNodeResponseArguments),
    FindValue(FindValueResponseArguments),
}

#[derive(Debug, PartialEq, Clone)]
pub struct PingResponseArguments {
    pub responder_id: Id,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeResponseArguments {
    pub responder_id: Id,
    pub nodes: Vec<Node>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindValueResponseArguments {
    pub responder_id: Id,
    pub nodes: Vec<Node>,
    /// Nodes that announced the target content.
    pub values: Vec<Node>,
}

impl RequestTypeSpecific {
    pub fn method(&self) -> &'static str {
        match self {
            RequestTypeSpecific::Ping => internal::PING,
            RequestTypeSpecific::FindNode(_) => internal::FIND_NODE,
            RequestTypeSpecific::FindValue(_) => internal::FIND_VALUE,
            RequestTypeSpecific::Store(_) => internal::STORE,
        }
    }
}

impl ResponseSpecific {
    pub fn responder_id(&self) -> Id {
        match self {
            ResponseSpecific::Ping(arguments) => arguments.responder_id,
            ResponseSpecific::FindNode(arguments) => arguments.responder_id,
            ResponseSpecific::FindValue(arguments) => arguments.responder_id,
        }
    }
}

impl Message {
    fn into_serde_message(self) -> DHTMessage {
        let mut message = DHTMessage {
            transaction_id: self.transaction_id.to_be_bytes().to_vec(),
            message_type: String::new(),
            method: None,
            arguments: None,
            response: None,
            error: None,
            version: self.version.map(ByteBuf::from),
        };

        match self.message_type {
            MessageType::Request(RequestSpecific {
                requester_id,
                request_type,
            }) => {
                message.message_type = internal::REQUEST.to_string();
                message.method = Some(request_type.method().to_string());

                let (target, port) = match request_type {
                    RequestTypeSpecific::Ping => (None, None),
                    RequestTypeSpecific::FindNode(FindNodeRequestArguments { target })
                    | RequestTypeSpecific::FindValue(FindValueRequestArguments { target }) => {
                        (Some(target), None)
                    }
                    RequestTypeSpecific::Store(StoreRequestArguments { content_id, port }) => {
                        (Some(content_id), port)
                    }
                };

                message.arguments = Some(DHTRequestArguments {
                    id: requester_id.to_vec(),
                    target: target.map(|id| ByteBuf::from(id.to_vec())),
                    port,
                });
            }
            MessageType::Response(response) => {
                message.message_type = internal::RESPONSE.to_string();

                message.response = Some(match response {
                    ResponseSpecific::Ping(PingResponseArguments { responder_id }) => {
                        DHTResponseArguments {
                            id: responder_id.to_vec(),
                            nodes: None,
                            values: None,
                        }
                    }
                    ResponseSpecific::FindNode(FindNodeResponseArguments {
                        responder_id,
                        nodes,
                    }) => DHTResponseArguments {
                        id: responder_id.to_vec(),
                        nodes: Some(nodes_to_bytes(&nodes)),
                        values: None,
                    },
                    ResponseSpecific::FindValue(FindValueResponseArguments {
                        responder_id,
                        nodes,
                        values,
                    }) => DHTResponseArguments {
                        id: responder_id.to_vec(),
                        nodes: Some(nodes_to_bytes(&nodes)),
                        values: Some(nodes_to_bytes(&values)),
                    },
                });
            }
            MessageType::Error(ErrorSpecific { code, description }) => {
                message.message_type = internal::ERROR.to_string();
                message.error = Some((code, description));
            }
        };

        message
    }

    fn from_serde_message(msg: DHTMessage) -> Result<Message> {
        let transaction_id = transaction_id(&msg.transaction_id)?;
        let version = msg.version.map(|v| v.into_vec());

        let message_type = match msg.message_type.as_str() {
            internal::REQUEST => {
                let arguments = msg
                    .arguments
                    .ok_or(Error::InvalidMessage("request without arguments"))?;
                let requester_id = Id::from_bytes(&arguments.id)?;

                let target = || -> Result<Id> {
                    let target = arguments
                        .target
                        .as_ref()
                        .ok_or(Error::InvalidMessage("request without target"))?;
                    Id::from_bytes(target)
                };

                let request_type = match msg.method.as_deref() {
                    Some(internal::PING) => RequestTypeSpecific::Ping,
                    Some(internal::FIND_NODE) => {
                        RequestTypeSpecific::FindNode(FindNodeRequestArguments { target: target()? })
                    }
                    Some(internal::FIND_VALUE) => {
                        RequestTypeSpecific::FindValue(FindValueRequestArguments {
                            target: target()?,
                        })
                    }
                    Some(internal::STORE) => RequestTypeSpecific::Store(StoreRequestArguments {
                        content_id: target()?,
                        port: arguments.port,
                    }),
                    _ => return Err(Error::InvalidMessage("unknown request method")),
                };

                MessageType::Request(RequestSpecific {
                    requester_id,
                    request_type,
                })
            }
            internal::RESPONSE => {
                let response = msg
                    .response
                    .ok_or(Error::InvalidMessage("response without arguments"))?;
                let responder_id = Id::from_bytes(&response.id)?;

                MessageType::Response(match (response.nodes, response.values) {
                    (nodes, Some(values)) => {
                        ResponseSpecific::FindValue(FindValueResponseArguments {
                            responder_id,
                            nodes: bytes_to_nodes(nodes.unwrap_or_default())?,
                            values: bytes_to_nodes(values)?,
                        })
                    }
                    (Some(nodes), None) => ResponseSpecific::FindNode(FindNodeResponseArguments {
                        responder_id,
                        nodes: bytes_to_nodes(nodes)?,
                    }),
                    (None, None) => ResponseSpecific::Ping(PingResponseArguments { responder_id }),
                })
            }
            internal::ERROR => {
                let (code, description) = msg
                    .error
                    .ok_or(Error::InvalidMessage("error without code"))?;

                MessageType::Error(ErrorSpecific { code, description })
            }
            _ => return Err(Error::InvalidMessage("unknown message type")),
        };

        Ok(Message {
            transaction_id,
            version,
            message_type,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.clone().into_serde_message().to_bytes()?)
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message> {
        Message::from_serde_message(DHTMessage::from_bytes(bytes.as_ref())?)
    }
}

/// Return the transaction Id as a u32
pub fn transaction_id(bytes: &[u8]) -> Result<u32> {
    let bytes: [u8; 4] = bytes
        .try_into()
        .map_err(|_| Error::InvalidTransactionId(bytes.to_vec()))?;

    Ok(u32::from_be_bytes(bytes))
}

/// Compact node info: `id || ip || port`, 54 bytes for IPv4 and 66 for IPv6.
pub fn node_to_bytes(node: &Node) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(COMPACT_NODE_V6);

    bytes.extend_from_slice(node.id.as_bytes());

    match node.address.ip() {
        IpAddr::V4(ip) => bytes.extend_from_slice(&ip.octets()),
        IpAddr::V6(ip) => bytes.extend_from_slice(&ip.octets()),
    }

    bytes.extend_from_slice(&node.address.port().to_be_bytes());

    bytes
}

pub fn bytes_to_node<T: AsRef<[u8]>>(bytes: T) -> Result<Node> {
    let bytes = bytes.as_ref();

    let (id, address) = bytes.split_at(ID_SIZE.min(bytes.len()));

    let ip: IpAddr = match bytes.len() {
        COMPACT_NODE_V4 => {
            let octets: [u8; 4] = address[..4]
                .try_into()
                .map_err(|_| Error::InvalidNodeEncoding(bytes.len()))?;
            Ipv4Addr::from(octets).into()
        }
        COMPACT_NODE_V6 => {
            let octets: [u8; 16] = address[..16]
                .try_into()
                .map_err(|_| Error::InvalidNodeEncoding(bytes.len()))?;
            Ipv6Addr::from(octets).into()
        }
        len => return Err(Error::InvalidNodeEncoding(len)),
    };

    let port_bytes: [u8; 2] = address[address.len() - 2..]
        .try_into()
        .map_err(|_| Error::InvalidNodeEncoding(bytes.len()))?;

    Ok(Node::new(
        Id::from_bytes(id)?,
        SocketAddr::new(ip, u16::from_be_bytes(port_bytes)),
    ))
}

fn nodes_to_bytes(nodes: &[Node]) -> Vec<ByteBuf> {
    nodes
        .iter()
        .map(|node| ByteBuf::from(node_to_bytes(node)))
        .collect()
}

fn bytes_to_nodes(bytes: Vec<ByteBuf>) -> Result<Vec<Node>> {
    bytes.iter().map(bytes_to_node).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: Message) {
        let bytes = message.to_bytes().unwrap();
        let parsed = Message::from_bytes(bytes).unwrap();

        assert_eq!(parsed, message);
    }

    #[test]
    fn test_transaction_id() {
        assert_eq!(transaction_id(&[0, 0, 1, 2]).unwrap(), 258);
        assert!(transaction_id(&[]).is_err());
        assert!(transaction_id(&[1, 2]).is_err());
    }

    #[test]
    fn test_ping_request() {
        round_trip(Message {
            transaction_id: 258,
            version: None,
            message_type: MessageType::Request(RequestSpecific {
                requester_id: Id::random(),
                request_type: RequestTypeSpecific::Ping,
            }),
        });
    }

    #[test]
    fn test_store_request() {
        round_trip(Message {
            transaction_id: 7,
            version: Some(b"RF01".to_vec()),
            message_type: MessageType::Request(RequestSpecific {
                requester_id: Id::random(),
                request_type: RequestTypeSpecific::Store(StoreRequestArguments {
                    content_id: Id::random(),
                    port: Some(3333),
                }),
            }),
        });
    }

    #[test]
    fn test_find_value_response() {
        let v6 = Node::new(Id::random(), "[::1]:4444".parse().unwrap());

        round_trip(Message {
            transaction_id: u32::MAX,
            version: None,
            message_type: MessageType::Response(ResponseSpecific::FindValue(
                FindValueResponseArguments {
                    responder_id: Id::random(),
                    nodes: vec![Node::random(), v6],
                    values: vec![Node::random()],
                },
            )),
        });
    }

    #[test]
    fn test_find_node_response_without_nodes() {
        // An empty list is still a FIND_NODE answer, not a PING.
        round_trip(Message {
            transaction_id: 1,
            version: None,
            message_type: MessageType::Response(ResponseSpecific::FindNode(
                FindNodeResponseArguments {
                    responder_id: Id::random(),
                    nodes: vec![],
                },
            )),
        });
    }

    #[test]
    fn test_error() {
        round_trip(Message {
            transaction_id: 9,
            version: None,
            message_type: MessageType::Error(ErrorSpecific {
                code: 204,
                description: "Method Unknown".to_string(),
            }),
        });
    }

    #[test]
    fn compact_node() {
        let node = Node::random();
        let bytes = node_to_bytes(&node);

        assert_eq!(bytes.len(), COMPACT_NODE_V4);
        assert_eq!(bytes_to_node(bytes).unwrap(), node);

        assert!(matches!(
            bytes_to_node([0; 10]),
            Err(Error::InvalidNodeEncoding(10))
        ));
    }

    #[test]
    fn malformed_messages() {
        assert!(Message::from_bytes(b"not bencode").is_err());
        // Valid bencode, wrong Id size.
        assert!(Message::from_bytes(b"d1:ad2:id3:abce1:q4:ping1:t4:aaaa1:y1:qe").is_err());
        // Unknown method.
        let id = "a".repeat(ID_SIZE);
        let unknown = format!("d1:ad2:id48:{id}e1:q3:foo1:t4:aaaa1:y1:qe");
        assert!(Message::from_bytes(unknown.as_bytes()).is_err());
        let ping = format!("d1:ad2:id48:{id}e1:q4:ping1:t4:aaaa1:y1:qe");
        assert!(Message::from_bytes(ping.as_bytes()).is_ok());
    }
}
