//! Canned HTTP responses sent back to HTTP-like connections.
//!
//! Clients key off these exact bytes, including the `Server:` signature and
//! the fixed `Sec-WebSocket-Accept` value, so they must not change.

use super::classifier::contains;

/// Signature carried in every disguise response.
pub const SERVER_SIGNATURE: &str = "CuteBi Network Tunnel, (%>w<%)";

/// WebSocket upgrade reply. The accept value is a signature, not a hash.
pub const WEBSOCKET_UPGRADE: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: CuteBi Network Tunnel, (%>w<%)\r\n\r\n";

/// Reply to `CONNECT`.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\nServer: CuteBi Network Tunnel, (%>w<%)\r\nConnection: keep-alive\r\n\r\n";

/// Reply to any other request.
pub const CHUNKED_OK: &[u8] = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nServer: CuteBi Network Tunnel, (%>w<%)\r\nConnection: keep-alive\r\n\r\n";

/// Which canned response a request gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disguise {
    WebSocketUpgrade,
    ConnectionEstablished,
    ChunkedOk,
}

impl Disguise {
    /// Pick the response for an HTTP-like payload.
    ///
    /// `WebSocket` anywhere in the payload wins over a `CON` prefix.
    pub fn for_request(payload: &[u8]) -> Self {
        if contains(payload, b"WebSocket") {
            Disguise::WebSocketUpgrade
        } else if payload.starts_with(b"CON") {
            Disguise::ConnectionEstablished
        } else {
            Disguise::ChunkedOk
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Disguise::WebSocketUpgrade => WEBSOCKET_UPGRADE,
            Disguise::ConnectionEstablished => CONNECTION_ESTABLISHED,
            Disguise::ChunkedOk => CHUNKED_OK,
        }
    }
}

/// Response bytes for an HTTP-like payload.
pub fn response_for(payload: &[u8]) -> &'static [u8] {
    Disguise::for_request(payload).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_wins() {
        let req = b"CONNECT host:443 HTTP/1.1\r\nUpgrade: WebSocket\r\n\r\n";
        assert_eq!(response_for(req), WEBSOCKET_UPGRADE);

        let req = b"GET /chat HTTP/1.1\r\nSec-WebSocket-Key: x\r\n\r\n";
        assert_eq!(Disguise::for_request(req), Disguise::WebSocketUpgrade);
    }

    #[test]
    fn test_websocket_match_is_case_sensitive() {
        let req = b"GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        assert_eq!(Disguise::for_request(req), Disguise::ChunkedOk);
    }

    #[test]
    fn test_connect_established() {
        let req = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert_eq!(response_for(req), CONNECTION_ESTABLISHED);
    }

    #[test]
    fn test_generic_chunked_ok() {
        for req in [
            &b"GET /x HTTP/1.1\r\n\r\n"[..],
            b"POST /upload HTTP/1.1\r\n\r\n",
            b"COPY /a HTTP/1.1\r\n\r\n",
            b"WRAPPED",
        ] {
            assert_eq!(response_for(req), CHUNKED_OK);
        }
    }

    #[test]
    fn test_exact_bytes() {
        assert_eq!(
            CONNECTION_ESTABLISHED,
            b"HTTP/1.1 200 Connection established\r\nServer: CuteBi Network Tunnel, (%>w<%)\r\nConnection: keep-alive\r\n\r\n"
        );
        assert!(WEBSOCKET_UPGRADE.ends_with(b"\r\n\r\n"));
        for response in [WEBSOCKET_UPGRADE, CONNECTION_ESTABLISHED, CHUNKED_OK] {
            let text = std::str::from_utf8(response).unwrap();
            assert!(text.contains(SERVER_SIGNATURE));
        }
    }
}
