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

use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::config::ChannelConfig;
use crate::endpoint::Endpoint;
use crate::error::{TlsError, TransportError};
use crate::tls::build_client_config;

/// Opens one authenticated byte stream to the server. The channel calls this once per socket
/// role per connection episode.
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Stream, TransportError>;
}

/// TCP connect followed by a TLS handshake using the process-wide client context.
#[derive(Clone)]
pub struct TlsConnector {
    connector: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    pub fn new(config: &ChannelConfig) -> Result<Self, TlsError> {
        Ok(Self::from_client_config(build_client_config(config)?))
    }

    pub fn from_client_config(client_config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            connector: tokio_rustls::TlsConnector::from(client_config),
        }
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector").finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for TlsConnector {
    type Stream = TlsStream<TcpStream>;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Stream, TransportError> {
        let server_name = ServerName::try_from(endpoint.host.clone()).map_err(|_| {
            TransportError::InvalidServerName {
                host: endpoint.host.clone(),
            }
        })?;

        let tcp = TcpStream::connect(endpoint.addr)
            .await
            .map_err(|error| TransportError::Connect {
                addr: endpoint.addr,
                error,
            })?;
        if let Err(error) = tcp.set_nodelay(true) {
            tracing::debug!(%error, addr = %endpoint.addr, "Could not set TCP_NODELAY");
        }

        self.connector
            .connect(server_name, tcp)
            .await
            .map_err(|error| TransportError::Handshake {
                addr: endpoint.addr,
                error,
            })
    }
}
