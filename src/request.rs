//! Request and response types carried over the chat sockets

use crate::connection::ConnectionType;
use bytes::Bytes;
use chat_shared::{WireRequest, WireResponse};
use std::time::Duration;

/// Outbound HTTP-style request
///
/// `is_anonymous` and `requires_authorization_headers` decide which socket
/// carries the request. They are expected to be mutually exclusive; the
/// builders below keep them that way.
#[derive(Debug, Clone)]
pub struct Request {
    pub verb: String,
    pub path: String,
    /// Raw `Name:Value` header lines
    pub headers: Vec<String>,
    pub body: Bytes,
    /// Must travel without any account authorization
    pub is_anonymous: bool,
    /// Must travel on the authorized socket
    pub requires_authorization_headers: bool,
    /// Response timeout; the connection default applies when unset
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create an authenticated request with an empty body
    pub fn new(verb: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            path: path.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            is_anonymous: false,
            requires_authorization_headers: true,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn put(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new("PUT", path).with_body(body)
    }

    /// Mark the request as anonymous (sealed sender and similar)
    pub fn anonymous(mut self) -> Self {
        self.is_anonymous = true;
        self.requires_authorization_headers = false;
        self
    }

    /// Mark the request as not needing authorization, without making it anonymous
    pub fn without_authorization(mut self) -> Self {
        self.requires_authorization_headers = false;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push(format!("{}:{}", name, value));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// An anonymous request cannot also require authorization
    pub fn has_consistent_auth_flags(&self) -> bool {
        !(self.is_anonymous && self.requires_authorization_headers)
    }

    pub(crate) fn to_wire(&self, id: u64) -> WireRequest {
        WireRequest {
            id,
            verb: self.verb.clone(),
            path: self.path.clone(),
            body: self.body.to_vec(),
            headers: self.headers.clone(),
        }
    }
}

/// Successful (2xx) service response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u32,
    pub message: String,
    pub headers: Vec<String>,
    pub body: Bytes,
}

impl Response {
    /// Look up a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

impl From<WireResponse> for Response {
    fn from(wire: WireResponse) -> Self {
        Self {
            status: wire.status,
            message: wire.message,
            headers: wire.headers,
            body: Bytes::from(wire.body),
        }
    }
}

/// Message pushed by the server over one of the sockets
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub connection_type: ConnectionType,
    pub body: Bytes,
    /// Server-side enqueue time, when the server supplied one
    pub server_timestamp: Option<u64>,
}

pub(crate) fn find_header<'a>(headers: &'a [String], name: &str) -> Option<&'a str> {
    headers.iter().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}
