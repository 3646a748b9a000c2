/*
 * SPDX-FileCopyrightText: Copyright (c) 2021-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */

//! HTTP response framing over a TLS stream.
//!
//! The server may deliver a response in any number of TLS records, so reads are accumulated in a
//! per-socket buffer until the response state active on that socket says a full message is
//! present. Control-socket responses must be framed by `Content-Length` or chunked transfer
//! encoding. Poll responses may also be delimited by the SOAP envelope terminator, since some
//! servers stream them without either.

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProtocolError, TransportError};
use crate::session::SocketRole;

/// Each read pulls at most this many bytes off the socket.
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

pub const ENVELOPE_TERMINATOR: &[u8] = b"</env:Envelope>";

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CRLF: &[u8] = b"\r\n";

/// Which response is expected next on a socket. Decides the framing rule and which parser may
/// consume the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    NewSession,
    Subscribe,
    Poll,
}

impl ResponseState {
    pub fn role(&self) -> SocketRole {
        match self {
            ResponseState::NewSession | ResponseState::Subscribe => SocketRole::Ssrc,
            ResponseState::Poll => SocketRole::Arc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseState::NewSession => "newSession",
            ResponseState::Subscribe => "subscribe",
            ResponseState::Poll => "poll",
        }
    }

    fn allows_envelope_terminator(&self) -> bool {
        matches!(self, ResponseState::Poll)
    }
}

impl fmt::Display for ResponseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercased.
    pub headers: Vec<(String, String)>,
    /// The decoded body: chunk framing is already removed.
    pub body: Bytes,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A complete response, tagged with the state it was framed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    NewSession(HttpResponse),
    Subscribe(HttpResponse),
    Poll(HttpResponse),
}

impl Frame {
    fn new(state: ResponseState, response: HttpResponse) -> Self {
        match state {
            ResponseState::NewSession => Frame::NewSession(response),
            ResponseState::Subscribe => Frame::Subscribe(response),
            ResponseState::Poll => Frame::Poll(response),
        }
    }

    pub fn state(&self) -> ResponseState {
        match self {
            Frame::NewSession(_) => ResponseState::NewSession,
            Frame::Subscribe(_) => ResponseState::Subscribe,
            Frame::Poll(_) => ResponseState::Poll,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Per-socket accumulation buffer.
///
/// Parsing progress is kept between reads, so each byte is scanned once no matter how many reads
/// a response takes to arrive.
#[derive(Debug)]
pub struct ResponseFramer {
    buf: BytesMut,
    max_response_size: usize,
    /// Offset the search for the end of the head resumes from.
    head_scanned: usize,
    pending: Option<PendingResponse>,
}

/// A response whose head has been parsed and whose body is still arriving.
#[derive(Debug)]
struct PendingResponse {
    state: ResponseState,
    status: u16,
    headers: Vec<(String, String)>,
    body_start: usize,
    body: BodyProgress,
}

#[derive(Debug)]
enum BodyProgress {
    Length(usize),
    Chunked(ChunkedBody),
    /// Offset into the body the terminator search resumes from.
    Envelope(usize),
}

#[derive(Debug, Default)]
struct ChunkedBody {
    decoded: BytesMut,
    /// Offset into the body of the next chunk-size line.
    pos: usize,
}

/// Longest chunk-size line (size plus extensions) accepted.
const MAX_CHUNK_LINE: usize = 1024;

impl ResponseFramer {
    pub fn new(max_response_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            max_response_size,
            head_scanned: 0,
            pending: None,
        }
    }

    /// Bytes received but not yet consumed by a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drops anything buffered. Called whenever the socket underneath is replaced.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.head_scanned = 0;
        self.pending = None;
    }

    /// Reads from `stream` until a response complete under `state` is buffered, and returns it.
    /// Bytes past the end of the frame stay buffered for the next call.
    pub async fn read_frame<S>(
        &mut self,
        stream: &mut S,
        state: ResponseState,
    ) -> Result<Frame, FrameError>
    where
        S: AsyncRead + Unpin,
    {
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(frame) = self.try_frame(state)? {
                return Ok(frame);
            }
            if self.buf.len() > self.max_response_size {
                return Err(ProtocolError::ResponseTooLarge {
                    limit: self.max_response_size,
                }
                .into());
            }

            let n = stream
                .read(&mut chunk)
                .await
                .map_err(TransportError::Read)?;
            if n == 0 {
                return Err(TransportError::ConnectionClosed.into());
            }
            tracing::trace!(bytes = n, buffered = self.buf.len() + n, %state, "Read response chunk");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Frames one response out of the buffer if it is complete.
    pub fn try_frame(&mut self, state: ResponseState) -> Result<Option<Frame>, ProtocolError> {
        // Framing rules depend on the state, so progress made under another one is discarded.
        if self.pending.as_ref().is_some_and(|p| p.state != state) {
            self.pending = None;
        }
        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None => match self.start_response(state)? {
                Some(pending) => pending,
                None => return Ok(None),
            },
        };

        let limit = self.max_response_size;
        let body = &self.buf[pending.body_start..];
        let consumed = match &mut pending.body {
            BodyProgress::Length(length) => (body.len() >= *length).then_some(*length),
            BodyProgress::Chunked(chunked) => chunked.advance(body, limit)?,
            BodyProgress::Envelope(scanned) => match find(&body[*scanned..], ENVELOPE_TERMINATOR) {
                Some(idx) => Some(*scanned + idx + ENVELOPE_TERMINATOR.len()),
                None => {
                    *scanned = body.len().saturating_sub(ENVELOPE_TERMINATOR.len() - 1);
                    None
                }
            },
        };
        let Some(consumed) = consumed else {
            self.pending = Some(pending);
            return Ok(None);
        };

        let PendingResponse {
            status,
            headers,
            body_start,
            body: progress,
            ..
        } = pending;
        let body = match progress {
            BodyProgress::Chunked(chunked) => chunked.decoded.freeze(),
            BodyProgress::Length(_) | BodyProgress::Envelope(_) => {
                Bytes::copy_from_slice(&self.buf[body_start..body_start + consumed])
            }
        };
        self.buf.advance(body_start + consumed);
        self.head_scanned = 0;

        Ok(Some(Frame::new(
            state,
            HttpResponse {
                status,
                headers,
                body,
            },
        )))
    }

    fn start_response(
        &mut self,
        state: ResponseState,
    ) -> Result<Option<PendingResponse>, ProtocolError> {
        let Some(idx) = find(&self.buf[self.head_scanned..], HEADER_TERMINATOR) else {
            self.head_scanned = self.buf.len().saturating_sub(HEADER_TERMINATOR.len() - 1);
            return Ok(None);
        };
        let header_end = self.head_scanned + idx;
        let (status, headers) = parse_head(&self.buf[..header_end])?;

        let is_chunked = headers.iter().any(|(name, value)| {
            name == "transfer-encoding" && value.to_ascii_lowercase().contains("chunked")
        });
        let content_length = headers
            .iter()
            .find(|(name, _)| name == "content-length")
            .map(|(_, value)| {
                value.trim().parse::<usize>().map_err(|_| {
                    ProtocolError::MalformedHttp(format!("invalid Content-Length {value:?}"))
                })
            })
            .transpose()?;

        let body = if is_chunked {
            BodyProgress::Chunked(ChunkedBody::default())
        } else if let Some(length) = content_length {
            if length > self.max_response_size {
                return Err(ProtocolError::ResponseTooLarge {
                    limit: self.max_response_size,
                });
            }
            BodyProgress::Length(length)
        } else if state.allows_envelope_terminator() {
            BodyProgress::Envelope(0)
        } else {
            return Err(ProtocolError::Unframed);
        };

        Ok(Some(PendingResponse {
            state,
            status,
            headers,
            body_start: header_end + HEADER_TERMINATOR.len(),
            body,
        }))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_head(head: &[u8]) -> Result<(u16, Vec<(String, String)>), ProtocolError> {
    let head = std::str::from_utf8(head)
        .map_err(|_| ProtocolError::MalformedHttp("response head is not UTF-8".to_string()))?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let status = match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code.parse::<u16>().ok(),
        _ => None,
    }
    .ok_or_else(|| ProtocolError::MalformedHttp(format!("bad status line {status_line:?}")))?;

    let headers = lines
        .map(|line| {
            line.split_once(':')
                .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
                .ok_or_else(|| ProtocolError::MalformedHttp(format!("bad header line {line:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((status, headers))
}

impl ChunkedBody {
    /// Decodes every complete chunk in `data` past the last one decoded. Returns the number of
    /// bytes the whole body occupied on the wire once the final chunk and trailers are in, or None
    /// if more data is needed.
    fn advance(&mut self, data: &[u8], limit: usize) -> Result<Option<usize>, ProtocolError> {
        loop {
            let rest = &data[self.pos..];
            let Some(line_len) = find(rest, CRLF) else {
                if rest.len() > MAX_CHUNK_LINE {
                    return Err(ProtocolError::MalformedHttp(
                        "chunk size line too long".to_string(),
                    ));
                }
                return Ok(None);
            };
            let size_line = std::str::from_utf8(&rest[..line_len])
                .map_err(|_| ProtocolError::MalformedHttp("chunk size is not UTF-8".to_string()))?;
            let size_str = size_line.split(';').next().unwrap_or_default().trim();
            let size = usize::from_str_radix(size_str, 16).map_err(|_| {
                ProtocolError::MalformedHttp(format!("invalid chunk size {size_line:?}"))
            })?;
            let data_start = self.pos + line_len + CRLF.len();

            if size == 0 {
                // Optional trailers, then a blank line.
                let trailers = &data[data_start..];
                if trailers.starts_with(CRLF) {
                    return Ok(Some(data_start + CRLF.len()));
                }
                return Ok(find(trailers, HEADER_TERMINATOR)
                    .map(|idx| data_start + idx + HEADER_TERMINATOR.len()));
            }

            if size > limit.saturating_sub(self.decoded.len()) {
                return Err(ProtocolError::ResponseTooLarge { limit });
            }
            let data_end = data_start
                .checked_add(size)
                .ok_or(ProtocolError::ResponseTooLarge { limit })?;
            if data.len() < data_end + CRLF.len() {
                return Ok(None);
            }
            if &data[data_end..data_end + CRLF.len()] != CRLF {
                return Err(ProtocolError::MalformedHttp(
                    "chunk not terminated by CRLF".to_string(),
                ));
            }
            self.decoded.extend_from_slice(&data[data_start..data_end]);
            self.pos = data_end + CRLF.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    const ENVELOPE: &str = "<env:Envelope><env:Body><ifmap:response><pollResult/></ifmap:response></env:Body></env:Envelope>";

    fn content_length_response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/soap+xml\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
    }

    fn framer() -> ResponseFramer {
        ResponseFramer::new(64 * 1024)
    }

    #[test]
    fn test_partial_head_is_incomplete() {
        let mut framer = framer();
        let partial = b"HTTP/1.1 200 OK\r\nContent-Len";
        framer.buf.extend_from_slice(partial);
        assert_eq!(framer.try_frame(ResponseState::NewSession).unwrap(), None);
        assert_eq!(framer.buffered(), partial.len());
    }

    #[test]
    fn test_content_length_frame_keeps_leftover() {
        let mut framer = framer();
        let first = content_length_response("<a/>");
        framer.buf.extend_from_slice(first.as_bytes());
        framer.buf.extend_from_slice(b"HTTP/1.1 200");

        let frame = framer.try_frame(ResponseState::Subscribe).unwrap().unwrap();
        let Frame::Subscribe(response) = frame else {
            panic!("wrong frame variant: {frame:?}");
        };
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from_static(b"<a/>"));
        assert_eq!(response.header("Content-Type"), Some("application/soap+xml"));
        assert_eq!(framer.buffered(), b"HTTP/1.1 200".len());
    }

    #[test]
    fn test_chunked_body_is_decoded() {
        let mut framer = framer();
        framer.buf.extend_from_slice(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6;ext=1\r\n world\r\n",
        );
        assert_eq!(framer.try_frame(ResponseState::Poll).unwrap(), None);

        framer.buf.extend_from_slice(b"0\r\n\r\n");
        let frame = framer.try_frame(ResponseState::Poll).unwrap().unwrap();
        let Frame::Poll(response) = frame else {
            panic!("wrong frame variant: {frame:?}");
        };
        assert_eq!(response.body, Bytes::from_static(b"hello world"));
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_chunked_with_trailers() {
        let mut framer = framer();
        framer.buf.extend_from_slice(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\nX-Trailer: 1\r\n\r\n",
        );
        let frame = framer.try_frame(ResponseState::NewSession).unwrap().unwrap();
        assert_eq!(frame.state(), ResponseState::NewSession);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_bad_chunk_size() {
        let mut framer = framer();
        framer
            .buf
            .extend_from_slice(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n");
        assert!(matches!(
            framer.try_frame(ResponseState::Poll),
            Err(ProtocolError::MalformedHttp(_))
        ));
    }

    #[test]
    fn test_huge_chunk_size_rejected() {
        let mut framer = framer();
        framer.buf.extend_from_slice(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nabc",
        );
        assert!(matches!(
            framer.try_frame(ResponseState::Poll),
            Err(ProtocolError::ResponseTooLarge { .. }) | Err(ProtocolError::MalformedHttp(_))
        ));
    }

    #[test]
    fn test_chunks_over_limit_in_total() {
        let mut framer = ResponseFramer::new(8);
        framer.buf.extend_from_slice(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n5\r\nworld\r\n",
        );
        assert!(matches!(
            framer.try_frame(ResponseState::Poll),
            Err(ProtocolError::ResponseTooLarge { limit: 8 })
        ));
    }

    #[test]
    fn test_chunked_progress_kept_between_reads() {
        let mut framer = framer();
        framer.buf.extend_from_slice(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n3\r\nab",
        );
        assert_eq!(framer.try_frame(ResponseState::Poll).unwrap(), None);
        let Some(PendingResponse {
            body: BodyProgress::Chunked(chunked),
            ..
        }) = &framer.pending
        else {
            panic!("no chunked progress: {:?}", framer.pending);
        };
        assert_eq!(&chunked.decoded[..], b"hello");
        assert_eq!(chunked.pos, b"5\r\nhello\r\n".len());

        framer.buf.extend_from_slice(b"c\r\n0\r\n\r\n");
        let frame = framer.try_frame(ResponseState::Poll).unwrap().unwrap();
        let Frame::Poll(response) = frame else {
            panic!("wrong frame variant: {frame:?}");
        };
        assert_eq!(response.body, Bytes::from_static(b"helloabc"));
        assert!(framer.pending.is_none());
    }

    #[test]
    fn test_envelope_scan_resumes() {
        let mut framer = framer();
        let head = b"HTTP/1.1 200 OK\r\n\r\n";
        let filler = vec![b'x'; 4096];
        framer.buf.extend_from_slice(head);
        framer.buf.extend_from_slice(&filler);
        framer.buf.extend_from_slice(b"</env:Env");
        assert_eq!(framer.try_frame(ResponseState::Poll).unwrap(), None);
        let Some(PendingResponse {
            body: BodyProgress::Envelope(scanned),
            ..
        }) = &framer.pending
        else {
            panic!("no envelope progress: {:?}", framer.pending);
        };
        // The partial terminator at the tail is rescanned on the next call.
        let body_len = filler.len() + b"</env:Env".len();
        assert_eq!(*scanned, body_len - (ENVELOPE_TERMINATOR.len() - 1));

        framer.buf.extend_from_slice(b"elope>");
        let frame = framer.try_frame(ResponseState::Poll).unwrap().unwrap();
        let Frame::Poll(response) = frame else {
            panic!("wrong frame variant: {frame:?}");
        };
        assert_eq!(response.body.len(), body_len + b"elope>".len());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_reset_discards_progress() {
        let mut framer = framer();
        framer
            .buf
            .extend_from_slice(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc");
        assert_eq!(framer.try_frame(ResponseState::Poll).unwrap(), None);
        assert!(framer.pending.is_some());

        framer.reset();
        assert!(framer.pending.is_none());
        framer.buf.extend_from_slice(content_length_response("<a/>").as_bytes());
        let frame = framer.try_frame(ResponseState::Poll).unwrap().unwrap();
        let Frame::Poll(response) = frame else {
            panic!("wrong frame variant: {frame:?}");
        };
        assert_eq!(response.body, Bytes::from_static(b"<a/>"));
    }

    #[test]
    fn test_envelope_terminator_only_for_poll() {
        let raw = format!("HTTP/1.1 200 OK\r\nContent-Type: application/soap+xml\r\n\r\n{ENVELOPE}");

        let mut framer = ResponseFramer::new(64 * 1024);
        framer.buf.extend_from_slice(raw.as_bytes());
        assert!(matches!(
            framer.try_frame(ResponseState::Subscribe),
            Err(ProtocolError::Unframed)
        ));

        let frame = framer.try_frame(ResponseState::Poll).unwrap().unwrap();
        let Frame::Poll(response) = frame else {
            panic!("wrong frame variant: {frame:?}");
        };
        assert_eq!(response.body, Bytes::from(ENVELOPE));
    }

    #[test]
    fn test_malformed_status_line() {
        let mut framer = framer();
        framer.buf.extend_from_slice(b"SSH-2.0-OpenSSH\r\n\r\n");
        assert!(matches!(
            framer.try_frame(ResponseState::NewSession),
            Err(ProtocolError::MalformedHttp(_))
        ));
    }

    #[test]
    fn test_declared_length_over_limit() {
        let mut framer = ResponseFramer::new(16);
        framer
            .buf
            .extend_from_slice(b"HTTP/1.1 200 OK\r\nContent-Length: 17\r\n\r\n");
        assert!(matches!(
            framer.try_frame(ResponseState::Poll),
            Err(ProtocolError::ResponseTooLarge { limit: 16 })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_across_partial_writes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let response = content_length_response(ENVELOPE);

        let writer = tokio::spawn(async move {
            for piece in response.as_bytes().chunks(7) {
                server.write_all(piece).await.unwrap();
                tokio::task::yield_now().await;
            }
            server
        });

        let mut framer = framer();
        let frame = framer
            .read_frame(&mut client, ResponseState::Poll)
            .await
            .unwrap();
        assert_eq!(frame.state(), ResponseState::Poll);
        assert_eq!(framer.buffered(), 0);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_frame_eof_is_transport_failure() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();
        drop(server);

        let mut framer = framer();
        let err = framer
            .read_frame(&mut client, ResponseState::NewSession)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::Transport(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_stream() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let _ = server
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/soap+xml\r\n\r\n")
                .await;
            let _ = server.write_all(&[b'x'; 2048]).await;
            server
        });

        let mut framer = ResponseFramer::new(1024);
        let err = framer
            .read_frame(&mut client, ResponseState::Poll)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::Protocol(ProtocolError::ResponseTooLarge { limit: 1024 })
        ));
    }
}
