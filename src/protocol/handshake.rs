//! HTTP/1.1 upgrade handshake.
//!
//! Runs once per accepted socket, before any framing applies:
//!
//! ```text
//! Request:  GET /chat HTTP/1.1\r\n
//!           Upgrade: websocket\r\n
//!           Connection: Upgrade\r\n
//!           Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n
//!           Sec-WebSocket-Version: 13\r\n
//!           \r\n
//! Response: HTTP/1.1 101 Switching Protocols\r\n
//!           Upgrade: websocket\r\n
//!           Connection: Upgrade\r\n
//!           Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n
//!           \r\n
//! ```
//!
//! Rejected requests get a `400 Bad Request` with a short plain-text body.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tracing::{debug, trace};

use crate::error::HandshakeError;

/// Fixed GUID appended to the client key (RFC6455 section 1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A parsed upgrade request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub request_line: String,
    headers: HashMap<String, String>,
}

impl Request {
    /// Header value by exact (case-sensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Request target from the request line, e.g. `/chat`.
    pub fn path(&self) -> Option<&str> {
        self.request_line.split_whitespace().nth(1)
    }

    /// Check the upgrade preconditions, returning the client key.
    pub fn validate(&self) -> Result<&str, HandshakeError> {
        let key = self
            .header("Sec-WebSocket-Key")
            .ok_or(HandshakeError::MissingKey)?;

        let upgrade_ok = self
            .header("Upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        if !upgrade_ok {
            return Err(HandshakeError::InvalidUpgrade);
        }

        let connection_ok = self
            .header("Connection")
            .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"));
        if !connection_ok {
            return Err(HandshakeError::InvalidConnection);
        }

        match self.header("Sec-WebSocket-Version") {
            Some("13") => Ok(key),
            other => Err(HandshakeError::UnsupportedVersion(other.map(str::to_string))),
        }
    }
}

/// A stream that completed the upgrade.
#[derive(Debug)]
pub struct Upgraded<S> {
    pub stream: S,
    /// Bytes the client sent after the request head. They belong to the
    /// first WebSocket frame(s).
    pub buffered: BytesMut,
    pub request: Request,
}

/// `base64(SHA-1(key + GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// The `101 Switching Protocols` response head.
pub fn switching_protocols(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )
}

/// A `400 Bad Request` response with a plain-text body.
pub fn bad_request(body: &str) -> String {
    format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    )
}

/// Perform the server side of the handshake on a freshly accepted stream.
///
/// The request head may take at most `max_head` bytes. On failure a 400
/// response is attempted when the request was readable, and the stream is
/// dropped with the error.
pub async fn accept<S>(stream: S, max_head: usize) -> Result<Upgraded<S>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);

    let outcome = async {
        let request = read_request(&mut reader, max_head).await?;
        let accept = accept_key(request.validate()?);
        Ok::<_, HandshakeError>((request, accept))
    }
    .await;

    match outcome {
        Ok((request, accept)) => {
            let stream = reader.get_mut();
            stream
                .write_all(switching_protocols(&accept).as_bytes())
                .await?;
            stream.flush().await?;

            let buffered = BytesMut::from(reader.buffer());
            trace!(
                path = request.path().unwrap_or(""),
                buffered = buffered.len(),
                "Handshake complete"
            );
            Ok(Upgraded {
                stream: reader.into_inner(),
                buffered,
                request,
            })
        }
        Err(e) => {
            if let Some(body) = e.response_body() {
                let stream = reader.get_mut();
                if let Err(write_err) = stream.write_all(bad_request(body).as_bytes()).await {
                    debug!(error = %write_err, "Failed to send 400 response");
                } else {
                    let _ = stream.flush().await;
                }
            }
            Err(e)
        }
    }
}

/// Read the request line and headers up to the blank line.
///
/// Header lines are split once on `": "`; lines without the separator are
/// skipped. On duplicate names the first occurrence wins.
pub async fn read_request<R>(reader: &mut R, max_head: usize) -> Result<Request, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = max_head;

    let request_line = read_line(reader, &mut budget, max_head).await?;
    if !request_line.starts_with("GET") {
        return Err(HandshakeError::InvalidRequestLine(request_line));
    }

    let mut headers = HashMap::new();
    loop {
        let line = read_line(reader, &mut budget, max_head).await?;
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(": ") {
            headers
                .entry(name.trim().to_string())
                .or_insert_with(|| value.trim().to_string());
        }
    }

    Ok(Request {
        request_line,
        headers,
    })
}

/// Read one line, stripping the trailing `\n` or `\r\n`.
async fn read_line<R>(
    reader: &mut R,
    budget: &mut usize,
    max_head: usize,
) -> Result<String, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = (&mut *reader)
        .take(*budget as u64)
        .read_until(b'\n', &mut line)
        .await?;
    *budget -= n;

    if line.last() != Some(&b'\n') {
        // An exhausted budget means the head is too large, even when the last
        // line ended exactly at the limit.
        return Err(if *budget == 0 {
            HandshakeError::RequestTooLarge(max_head)
        } else {
            HandshakeError::UnexpectedEof
        });
    }

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    const REQUEST: &str = "GET /chat HTTP/1.1\r\n\
                           Host: server.example.com\r\n\
                           Upgrade: websocket\r\n\
                           Connection: keep-alive, Upgrade\r\n\
                           Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                           Sec-WebSocket-Version: 13\r\n\
                           \r\n";

    const RESPONSE: &str = "HTTP/1.1 101 Switching Protocols\r\n\
                            Upgrade: websocket\r\n\
                            Connection: Upgrade\r\n\
                            Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
                            \r\n";

    async fn parse(head: &str) -> Result<Request, HandshakeError> {
        let mut input = head.as_bytes();
        read_request(&mut input, 8192).await
    }

    #[test]
    fn test_accept_key_vector() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_bad_request_format() {
        assert_eq!(
            bad_request("Invalid Method."),
            "HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain\r\nContent-Length: 15\r\nConnection: close\r\n\r\nInvalid Method."
        );
    }

    #[tokio::test]
    async fn test_parse_request() {
        let request = parse(REQUEST).await.unwrap();
        assert_eq!(request.request_line, "GET /chat HTTP/1.1");
        assert_eq!(request.path(), Some("/chat"));
        assert_eq!(request.header("Host"), Some("server.example.com"));
        assert_eq!(request.validate().unwrap(), "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[tokio::test]
    async fn test_first_header_wins() {
        let request = parse("GET / HTTP/1.1\r\nX-Test: one\r\nX-Test: two\r\nbogus line\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(request.header("X-Test"), Some("one"));
        assert_eq!(request.header("bogus line"), None);
    }

    #[tokio::test]
    async fn test_header_names_case_sensitive() {
        let request = parse(
            "GET / HTTP/1.1\r\nupgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: k\r\nSec-WebSocket-Version: 13\r\n\r\n",
        )
        .await
        .unwrap();
        assert!(matches!(
            request.validate(),
            Err(HandshakeError::InvalidUpgrade)
        ));
    }

    #[tokio::test]
    async fn test_validate_preconditions() {
        let base = [
            ("Upgrade", "WebSocket"),
            ("Connection", "upgrade"),
            ("Sec-WebSocket-Key", "abc"),
            ("Sec-WebSocket-Version", "13"),
        ];

        let build = |skip: &str, replace: Option<(&str, &str)>| {
            let mut head = String::from("GET / HTTP/1.1\r\n");
            for (name, value) in base {
                if name == skip {
                    if let Some((n, v)) = replace {
                        head.push_str(&format!("{n}: {v}\r\n"));
                    }
                    continue;
                }
                head.push_str(&format!("{name}: {value}\r\n"));
            }
            head.push_str("\r\n");
            head
        };

        let ok = parse(&build("", None)).await.unwrap();
        assert_eq!(ok.validate().unwrap(), "abc");

        let missing_key = parse(&build("Sec-WebSocket-Key", None)).await.unwrap();
        assert!(matches!(missing_key.validate(), Err(HandshakeError::MissingKey)));

        let bad_upgrade = parse(&build("Upgrade", Some(("Upgrade", "h2c")))).await.unwrap();
        assert!(matches!(bad_upgrade.validate(), Err(HandshakeError::InvalidUpgrade)));

        let bad_connection = parse(&build("Connection", Some(("Connection", "close"))))
            .await
            .unwrap();
        assert!(matches!(
            bad_connection.validate(),
            Err(HandshakeError::InvalidConnection)
        ));

        let old_version = parse(&build("Sec-WebSocket-Version", Some(("Sec-WebSocket-Version", "8"))))
            .await
            .unwrap();
        match old_version.validate() {
            Err(HandshakeError::UnsupportedVersion(Some(v))) => assert_eq!(v, "8"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accept_writes_101() {
        let mock = Builder::new()
            .read(REQUEST.as_bytes())
            .write(RESPONSE.as_bytes())
            .build();

        let upgraded = accept(mock, 8192).await.unwrap();
        assert_eq!(upgraded.request.path(), Some("/chat"));
        assert!(upgraded.buffered.is_empty());
    }

    #[tokio::test]
    async fn test_accept_keeps_trailing_bytes() {
        let mut input = REQUEST.as_bytes().to_vec();
        input.extend_from_slice(&[0x81, 0x80, 1, 2, 3, 4]);

        let mock = Builder::new()
            .read(&input)
            .write(RESPONSE.as_bytes())
            .build();

        let upgraded = accept(mock, 8192).await.unwrap();
        assert_eq!(&upgraded.buffered[..], &[0x81, 0x80, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_accept_rejects_method() {
        let mock = Builder::new()
            .read(b"POST /chat HTTP/1.1\r\n")
            .write(bad_request("Invalid Method.").as_bytes())
            .build();

        match accept(mock, 8192).await {
            Err(HandshakeError::InvalidRequestLine(line)) => {
                assert_eq!(line, "POST /chat HTTP/1.1")
            }
            other => panic!("unexpected: {:?}", other.map(|u| u.request)),
        }
    }

    #[tokio::test]
    async fn test_accept_rejects_missing_version() {
        let mock = Builder::new()
            .read(
                b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: abc\r\n\r\n",
            )
            .write(bad_request("Invalid WebSocket Handshake.").as_bytes())
            .build();

        match accept(mock, 8192).await {
            Err(HandshakeError::UnsupportedVersion(None)) => {}
            other => panic!("unexpected: {:?}", other.map(|u| u.request)),
        }
    }

    #[tokio::test]
    async fn test_accept_request_too_large() {
        let mock = Builder::new()
            .read(b"GET /a-very-long-path-indeed HTTP/1.1\r\n")
            .write(bad_request("Request Header Too Large.").as_bytes())
            .build();

        match accept(mock, 16).await {
            Err(HandshakeError::RequestTooLarge(16)) => {}
            other => panic!("unexpected: {:?}", other.map(|u| u.request)),
        }
    }

    #[tokio::test]
    async fn test_head_ending_exactly_at_limit() {
        let head = "GET / HTTP/1.1\r\nHost: x\r\n";
        let mut input = head.as_bytes();
        match read_request(&mut input, head.len()).await {
            Err(HandshakeError::RequestTooLarge(limit)) => assert_eq!(limit, head.len()),
            other => panic!("Expected RequestTooLarge, got {:?}", other),
        }

        let mock = Builder::new()
            .read(head.as_bytes())
            .write(bad_request("Request Header Too Large.").as_bytes())
            .build();
        assert!(matches!(
            accept(mock, head.len()).await,
            Err(HandshakeError::RequestTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_eof_before_blank_line() {
        let result = parse("GET / HTTP/1.1\r\nUpgrade: websocket\r\n").await;
        assert!(matches!(result, Err(HandshakeError::UnexpectedEof)));

        let result = parse("").await;
        assert!(matches!(result, Err(HandshakeError::UnexpectedEof)));
    }
}
