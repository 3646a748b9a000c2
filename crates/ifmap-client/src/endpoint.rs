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

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::error::ResolveError;
use crate::DEFAULT_SERVER_PORT;

/// Host and port extracted from the configured server URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    /// Accepts `scheme://host:port/path`, `host:port` and bare `host`. Bracketed IPv6 literals
    /// are supported; the port defaults to [`DEFAULT_SERVER_PORT`].
    pub fn parse(url: &str) -> Result<Self, ResolveError> {
        let invalid = |reason| ResolveError::InvalidUrl {
            url: url.to_string(),
            reason,
        };

        let rest = url.trim();
        let rest = match rest.find("://") {
            Some(idx) => &rest[idx + 3..],
            None => rest,
        };
        let authority = rest
            .split(&['/', '?', '#'][..])
            .next()
            .unwrap_or_default();
        let authority = match authority.rsplit_once('@') {
            Some((_userinfo, authority)) => authority,
            None => authority,
        };
        if authority.is_empty() {
            return Err(invalid("missing host"));
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, remainder) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            let port = match remainder {
                "" => None,
                r => Some(r.strip_prefix(':').ok_or_else(|| invalid("garbage after host"))?),
            };
            (host, port)
        } else if authority.parse::<Ipv6Addr>().is_ok() {
            (authority, None)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            None => DEFAULT_SERVER_PORT,
            Some(port) => match port.parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => return Err(invalid("invalid port")),
            },
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A resolved server endpoint. A fresh one is produced on every reconnect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// The host name as configured, used as the TLS server name.
    pub host: String,
    pub port: u16,
    pub addr: SocketAddr,
}

/// Resolves the configured server to a single socket address.
pub struct EndpointResolver {
    resolver: TokioAsyncResolver,
}

impl EndpointResolver {
    /// Uses the system resolver configuration, falling back to the library defaults when it
    /// cannot be read.
    pub fn from_system_conf() -> Self {
        let (config, mut opts) = match hickory_resolver::system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(error) => {
                tracing::warn!(%error, "Could not read system resolver configuration, using defaults");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        // Five seconds is the default, but setting anyway for documentation and future proofing
        opts.timeout = Duration::from_secs(5);
        Self::with_config(config, opts)
    }

    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }

    /// Only the first address is used; there is no iteration over further records.
    pub async fn resolve(&self, server: &ServerAddress) -> Result<Endpoint, ResolveError> {
        if let Ok(ip) = server.host().parse::<IpAddr>() {
            return Ok(Endpoint {
                host: server.host().to_string(),
                port: server.port(),
                addr: SocketAddr::new(ip, server.port()),
            });
        }

        let lookup = self
            .resolver
            .lookup_ip(server.host())
            .await
            .map_err(|error| ResolveError::Lookup {
                host: server.host().to_string(),
                error,
            })?;
        let ip = lookup
            .iter()
            .next()
            .ok_or_else(|| ResolveError::NoAddresses {
                host: server.host().to_string(),
            })?;

        Ok(Endpoint {
            host: server.host().to_string(),
            port: server.port(),
            addr: SocketAddr::new(ip, server.port()),
        })
    }
}

impl fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointResolver").finish_non_exhaustive()
    }
}
