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

use std::io;
use std::net::SocketAddr;

use crate::session::SocketRole;

/// ChannelError is what every channel operation reports to the driver. Exactly one result is
/// returned per operation; the channel itself never retries.
#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error("Resolution failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error("Transport failure on {role} socket: {source}")]
    Transport {
        role: SocketRole,
        source: TransportError,
    },
    #[error("Protocol failure: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("{operation} called out of order: {reason}")]
    OutOfOrder {
        operation: &'static str,
        reason: &'static str,
    },
}

/// The broad category of a [`ChannelError`], used by the driver to pick its reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The server URL could not be parsed or resolved.
    Resolution,
    /// A socket-level failure. The channel has already torn both sockets down.
    Transport,
    /// The server answered, but not with what the protocol requires.
    Protocol,
    /// The driver called an operation before its prerequisites were met.
    Sequencing,
}

impl ChannelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::Resolve(_) => ErrorKind::Resolution,
            ChannelError::Transport { .. } => ErrorKind::Transport,
            ChannelError::Protocol(_) => ErrorKind::Protocol,
            ChannelError::OutOfOrder { .. } => ErrorKind::Sequencing,
        }
    }

    pub(crate) fn out_of_order(operation: &'static str, reason: &'static str) -> Self {
        ChannelError::OutOfOrder { operation, reason }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("Invalid server url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: &'static str },
    #[error("DNS lookup of {host} failed: {error}")]
    Lookup {
        host: String,
        error: hickory_resolver::error::ResolveError,
    },
    #[error("{host} did not resolve to any addresses")]
    NoAddresses { host: String },
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("TCP connect to {addr} failed: {error}")]
    Connect { addr: SocketAddr, error: io::Error },
    #[error("TLS handshake with {addr} failed: {error}")]
    Handshake { addr: SocketAddr, error: io::Error },
    #[error("{host:?} is not a valid TLS server name")]
    InvalidServerName { host: String },
    #[error("write failed: {0}")]
    Write(io::Error),
    #[error("read failed: {0}")]
    Read(io::Error),
    #[error("connection closed by peer")]
    ConnectionClosed,
}

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed HTTP response: {0}")]
    MalformedHttp(String),
    #[error("Response carries neither Content-Length nor chunked transfer encoding")]
    Unframed,
    #[error("Response exceeds the {limit} byte limit")]
    ResponseTooLarge { limit: usize },
    #[error("Server returned HTTP status {status}")]
    HttpStatus { status: u16 },
    #[error("Malformed XML in {context} response: {reason}")]
    MalformedXml {
        context: &'static str,
        reason: String,
    },
    #[error("Response is missing required field {0}")]
    MissingField(&'static str),
    #[error("Server returned errorResult {code}: {message}")]
    ErrorResult { code: String, message: String },
    #[error("Subscribe response carries no status")]
    MissingSubscribeStatus,
    #[error("Poll response body is empty")]
    EmptyPollBody,
    #[error("Poll response carries no pollResult")]
    MissingPollResult,
    #[error("Server ended the session")]
    SessionEnded,
}

/// Errors building the process-wide TLS context.
#[derive(thiserror::Error, Debug)]
pub enum TlsError {
    #[error("Could not read {what} at {path}: {error}")]
    CouldNotRead {
        what: &'static str,
        path: String,
        error: io::Error,
    },
    #[error("No certificates found in {path}")]
    NoCertificates { path: String },
    #[error("No private key found in {path}")]
    NoPrivateKey { path: String },
    #[error("Rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}
