//! Protobuf frame definitions
//!
//! Every frame on the socket is a `WireMessage`. Its `kind` says which of the
//! optional payloads is populated.

use prost::{Enumeration, Message};

/// Discriminator for `WireMessage`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum MessageKind {
    Unknown = 0,
    Request = 1,
    Response = 2,
    Handshake = 3,
}

/// Top-level frame
#[derive(Clone, PartialEq, Message)]
pub struct WireMessage {
    #[prost(enumeration = "MessageKind", tag = "1")]
    pub kind: i32,

    #[prost(message, optional, tag = "2")]
    pub request: Option<WireRequest>,

    #[prost(message, optional, tag = "3")]
    pub response: Option<WireResponse>,

    #[prost(message, optional, tag = "4")]
    pub handshake: Option<Handshake>,
}

/// HTTP-style request carried over the socket, in either direction
#[derive(Clone, PartialEq, Message)]
pub struct WireRequest {
    #[prost(string, tag = "1")]
    pub verb: String,

    #[prost(string, tag = "2")]
    pub path: String,

    #[prost(bytes = "vec", tag = "3")]
    pub body: Vec<u8>,

    #[prost(uint64, tag = "4")]
    pub id: u64,

    #[prost(string, repeated, tag = "5")]
    pub headers: Vec<String>,
}

/// Response matched to a request by `id`
#[derive(Clone, PartialEq, Message)]
pub struct WireResponse {
    #[prost(uint64, tag = "1")]
    pub id: u64,

    #[prost(uint32, tag = "2")]
    pub status: u32,

    #[prost(string, tag = "3")]
    pub message: String,

    #[prost(bytes = "vec", tag = "4")]
    pub body: Vec<u8>,

    #[prost(string, repeated, tag = "5")]
    pub headers: Vec<String>,
}

/// First frame a client writes after the transport connects
#[derive(Clone, PartialEq, Message)]
pub struct Handshake {
    #[prost(string, tag = "1")]
    pub path: String,

    #[prost(string, optional, tag = "2")]
    pub login: Option<String>,

    #[prost(string, optional, tag = "3")]
    pub password: Option<String>,

    #[prost(string, tag = "4")]
    pub user_agent: String,
}
