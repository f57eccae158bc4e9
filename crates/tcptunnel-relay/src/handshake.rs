//! HTTP CONNECT handshake with the proxy

use crate::error::TunnelError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Largest response head accepted from the proxy
pub const MAX_RESPONSE_HEAD: usize = 16 * 1024;

const MAX_HEADERS: usize = 64;

/// Build the CONNECT request naming `destination` as target and Host.
pub fn connect_request(destination: &str) -> String {
    format!(
        "CONNECT {dst} HTTP/1.1\r\nHost: {dst}\r\nUser-Agent: tcptunnel/{ver}\r\n\r\n",
        dst = destination,
        ver = env!("CARGO_PKG_VERSION"),
    )
}

/// Parsed proxy response head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    pub status: u16,
    pub reason: String,
    /// Length of the head including the blank line
    pub head_len: usize,
}

/// Try to parse a complete response head from `buf`.
///
/// Returns `Ok(None)` while more bytes are needed.
pub fn parse_response(buf: &[u8]) -> Result<Option<ConnectResponse>, TunnelError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    match response.parse(buf) {
        Ok(httparse::Status::Complete(head_len)) => {
            let status = response.code.ok_or_else(|| {
                TunnelError::MalformedResponse("missing status code".to_string())
            })?;
            Ok(Some(ConnectResponse {
                status,
                reason: response.reason.unwrap_or("").to_string(),
                head_len,
            }))
        }
        Ok(httparse::Status::Partial) => {
            if buf.len() > MAX_RESPONSE_HEAD {
                return Err(TunnelError::MalformedResponse(format!(
                    "response head exceeds {} bytes",
                    MAX_RESPONSE_HEAD
                )));
            }
            Ok(None)
        }
        Err(e) => Err(TunnelError::MalformedResponse(e.to_string())),
    }
}

/// Send CONNECT over `remote` and wait for a 200 response.
///
/// Returns any bytes the proxy sent after the response head; they already
/// belong to the tunnel.
pub async fn handshake<S>(remote: &mut S, destination: &str) -> Result<Vec<u8>, TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let request = connect_request(destination);
    remote
        .write_all(request.as_bytes())
        .await
        .map_err(TunnelError::Handshake)?;
    remote.flush().await.map_err(TunnelError::Handshake)?;

    debug!("Sent CONNECT {}", destination);

    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    let response = loop {
        let n = remote
            .read(&mut chunk)
            .await
            .map_err(|e| TunnelError::MalformedResponse(e.to_string()))?;
        if n == 0 {
            return Err(TunnelError::MalformedResponse(
                "connection closed before response was complete".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(response) = parse_response(&buf)? {
            break response;
        }
    };

    debug!(
        status = response.status,
        reason = %response.reason,
        "Received proxy response"
    );

    if response.status != 200 {
        return Err(TunnelError::UnexpectedStatus(response.status));
    }

    Ok(buf.split_off(response.head_len))
}
