//! Answering requests from remote nodes.

mod announcements;

use std::net::SocketAddr;

use tracing::{debug, trace};

use crate::common::{
    FindNodeRequestArguments, FindNodeResponseArguments, FindValueRequestArguments,
    FindValueResponseArguments, Node, PingResponseArguments, RequestTypeSpecific,
    ResponseSpecific, StoreRequestArguments,
};

use super::{socket::IncomingRequest, Rpc};

pub use announcements::AnnouncementStore;

/// Maximum number of announcers returned in a single FIND_VALUE response.
pub const MAX_VALUES_PER_RESPONSE: usize = 20;

/// Answer a request, and learn about its sender.
pub fn handle_request(rpc: &Rpc, incoming: IncomingRequest) {
    let IncomingRequest {
        from,
        transaction_id,
        request,
    } = incoming;

    let requester_id = request.requester_id;

    if requester_id == *rpc.id() {
        trace!(?from, "Ignoring request carrying our own id");
        return;
    }

    rpc.observe(Node::new(requester_id, from));

    let responder_id = *rpc.id();

    let response = match request.request_type {
        RequestTypeSpecific::Ping => ResponseSpecific::Ping(PingResponseArguments { responder_id }),
        RequestTypeSpecific::FindNode(FindNodeRequestArguments { target }) => {
            ResponseSpecific::FindNode(FindNodeResponseArguments {
                responder_id,
                nodes: rpc.closest(&target),
            })
        }
        RequestTypeSpecific::FindValue(FindValueRequestArguments { target }) => {
            let nodes = rpc.closest(&target);
            let values = rpc
                .announcements()
                .get_random(&target, MAX_VALUES_PER_RESPONSE);

            if values.is_empty() {
                ResponseSpecific::FindNode(FindNodeResponseArguments {
                    responder_id,
                    nodes,
                })
            } else {
                ResponseSpecific::FindValue(FindValueResponseArguments {
                    responder_id,
                    nodes,
                    values,
                })
            }
        }
        RequestTypeSpecific::Store(StoreRequestArguments { content_id, port }) => {
            let address = match port {
                Some(port) => SocketAddr::new(from.ip(), port),
                None => from,
            };

            debug!(?content_id, ?address, "Storing announcement");

            rpc.announcements()
                .upsert(content_id, Node::new(requester_id, address));

            ResponseSpecific::Ping(PingResponseArguments { responder_id })
        }
    };

    rpc.transport().respond(from, transaction_id, response);
}
