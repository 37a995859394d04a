//! First-read connection classification.
//!
//! Only the leading bytes are checked. There is no HTTP parsing here: a
//! payload that starts with a method token (or the `WRAPPED` marker) is
//! treated as a disguise handshake, everything else as raw tunnel traffic.

/// Method tokens that mark a payload as HTTP-like.
///
/// Case-sensitive. `WRAPPED` lets a tunnel client force the HTTP path
/// without sending a real request line.
pub const HTTP_PREFIXES: &[&[u8]] = &[
    b"CONNECT",
    b"GET",
    b"POST",
    b"HEAD",
    b"PUT",
    b"COPY",
    b"DELETE",
    b"MOVE",
    b"OPTIONS",
    b"LINK",
    b"UNLINK",
    b"TRACE",
    b"PATCH",
    b"WRAPPED",
];

/// Classification of a connection's first read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traffic {
    /// Looks like an HTTP or WebSocket request.
    HttpLike,
    /// Anything else; goes to the raw tunnel.
    TunnelLike,
}

/// Classify the bytes of one read.
pub fn classify(payload: &[u8]) -> Traffic {
    if is_http_like(payload) {
        Traffic::HttpLike
    } else {
        Traffic::TunnelLike
    }
}

/// True if `payload` starts with one of [`HTTP_PREFIXES`].
pub fn is_http_like(payload: &[u8]) -> bool {
    HTTP_PREFIXES
        .iter()
        .any(|prefix| payload.starts_with(prefix))
}

/// Offset of the first occurrence of `needle` in `haystack`.
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Substring search over raw bytes.
pub(crate) fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_every_method_is_http_like() {
        for prefix in HTTP_PREFIXES {
            let mut payload = prefix.to_vec();
            payload.extend_from_slice(b" / HTTP/1.1\r\n\r\n");
            assert_eq!(classify(&payload), Traffic::HttpLike, "{:?}", prefix);
        }
    }

    #[test]
    fn test_bare_marker_is_http_like() {
        assert!(is_http_like(b"WRAPPED"));
        assert!(is_http_like(b"WRAPPED\x00\x01binary"));
    }

    #[test]
    fn test_case_sensitive() {
        assert!(!is_http_like(b"get / HTTP/1.1\r\n"));
        assert!(!is_http_like(b"Connect host:443"));
    }

    #[test]
    fn test_raw_tunnel_bytes() {
        assert_eq!(classify(b"\x05\x01\x00\x01"), Traffic::TunnelLike);
        assert_eq!(classify(b""), Traffic::TunnelLike);
        assert_eq!(classify(b" GET / HTTP/1.1"), Traffic::TunnelLike);
        // TLS ClientHello
        assert_eq!(classify(&[0x16, 0x03, 0x01, 0x00, 0x5f]), Traffic::TunnelLike);
    }

    #[test]
    fn test_truncated_token_is_tunnel_like() {
        assert!(!is_http_like(b"GE"));
        assert!(!is_http_like(b"CONNEC"));
        assert!(!is_http_like(b"WRAP"));
    }

    #[test]
    fn test_contains() {
        assert!(contains(b"GET /?httpUDP HTTP/1.1", b"httpUDP"));
        assert!(!contains(b"GET / HTTP/1.1", b"httpUDP"));
        assert!(!contains(b"UDP", b"httpUDP"));
        assert!(contains(b"anything", b""));
    }

    #[test]
    fn test_find_offset() {
        assert_eq!(find(b"GET /\r\nMeng: a:1\r\n", b"\nMeng: "), Some(6));
        assert_eq!(find(b"abcabc", b"c"), Some(2));
        assert_eq!(find(b"abc", b"abcd"), None);
        assert_eq!(find(b"abc", b""), Some(0));
    }

    proptest! {
        #[test]
        fn prop_non_token_prefix_is_tunnel_like(payload in proptest::collection::vec(any::<u8>(), 0..64)) {
            let starts_with_token = HTTP_PREFIXES.iter().any(|p| payload.starts_with(p));
            prop_assert_eq!(is_http_like(&payload), starts_with_token);
        }

        #[test]
        fn prop_token_prefix_is_http_like(
            index in 0..HTTP_PREFIXES.len(),
            tail in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let mut payload = HTTP_PREFIXES[index].to_vec();
            payload.extend_from_slice(&tail);
            prop_assert_eq!(classify(&payload), Traffic::HttpLike);
        }
    }
}
