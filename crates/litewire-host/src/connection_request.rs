//! Pending connect requests awaiting an accept or reject decision.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Mutex, PoisonError},
};

use byteorder::{ByteOrder, LittleEndian};

use litewire_protocol::ConnectRequest;

/// How a request entered the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// First request from this address; the application must be asked.
    New,
    /// A request is already pending; it was replaced or the duplicate ignored.
    Pending,
}

/// Connect requests keyed by the requesting address.
///
/// Taking a request out of the table is what decides it, so each request is answered
/// at most once even when several threads race to accept or reject it.
#[derive(Debug, Default)]
pub(crate) struct ConnectionRequests {
    requests: Mutex<HashMap<SocketAddr, ConnectRequest>>,
}

impl ConnectionRequests {
    /// Records a request. A pending request is only replaced by a newer attempt: a later
    /// connect time, or the same time with another connection number.
    pub(crate) fn offer(&self, address: SocketAddr, request: ConnectRequest) -> Offer {
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        match requests.get_mut(&address) {
            Some(pending) => {
                let newer = request.connection_time > pending.connection_time
                    || (request.connection_time == pending.connection_time
                        && request.connection_number != pending.connection_number);
                if newer {
                    *pending = request;
                }
                Offer::Pending
            }
            None => {
                requests.insert(address, request);
                Offer::New
            }
        }
    }

    /// Removes and returns the pending request from `address`.
    pub(crate) fn take(&self, address: &SocketAddr) -> Option<ConnectRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).remove(address)
    }

    pub(crate) fn clear(&self) {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Reads the length-prefixed key at the start of a connect request payload.
pub(crate) fn request_key(data: &[u8]) -> Option<&[u8]> {
    let length = LittleEndian::read_u16(data.get(..2)?) as usize;
    data.get(2..2 + length)
}

/// Encodes `key` as connect request data understood by `Host::accept_if_key`.
pub fn encode_key(key: &str) -> Vec<u8> {
    let mut data = vec![0u8; 2];
    LittleEndian::write_u16(&mut data, key.len() as u16);
    data.extend_from_slice(key.as_bytes());
    data
}
