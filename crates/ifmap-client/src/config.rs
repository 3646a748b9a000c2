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
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::prelude::*;
use duration_str::deserialize_duration;
use serde::{Deserialize, Serialize, Serializer};

use crate::endpoint::ServerAddress;
use crate::error::ResolveError;

/// Channel settings as they appear in the agent's config file. Turned into an immutable
/// [`ChannelConfig`] once at startup via [`ChannelConfig::new`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelSettings {
    #[serde(default = "Defaults::server_url")]
    pub server_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub certstore: Option<PathBuf>,
    #[serde(default)]
    pub root_ca_path: Option<PathBuf>,
    #[serde(default)]
    pub subscriber_name: Option<String>,
    #[serde(
        default = "Defaults::socket_close_timeout",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub socket_close_timeout: Duration,
    #[serde(default = "Defaults::max_response_size")]
    pub max_response_size: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            server_url: Defaults::server_url(),
            username: None,
            password: None,
            certstore: None,
            root_ca_path: None,
            subscriber_name: None,
            socket_close_timeout: Defaults::socket_close_timeout(),
            max_response_size: Defaults::max_response_size(),
        }
    }
}

/// Settings for the reference driver in [`crate::state_machine`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverSettings {
    /// Retry interval after the first failure. Doubles on every further failure.
    #[serde(
        default = "Defaults::retry_base",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub retry_base: Duration,
    #[serde(
        default = "Defaults::retry_max",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub retry_max: Duration,
    /// Bound on connects and on control-socket responses. Polls are not bounded.
    #[serde(
        default = "Defaults::response_timeout",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub response_timeout: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            retry_base: Defaults::retry_base(),
            retry_max: Defaults::retry_max(),
            response_timeout: Defaults::response_timeout(),
        }
    }
}

impl DriverSettings {
    /// A zero base would retry in a tight loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_base.is_zero() {
            return Err(ConfigError::InvalidRetryBase);
        }
        if self.retry_max < self.retry_base {
            return Err(ConfigError::InvalidRetryMax {
                retry_base: self.retry_base,
                retry_max: self.retry_max,
            });
        }
        Ok(())
    }
}

pub struct Defaults;

impl Defaults {
    pub fn retry_base() -> Duration {
        Duration::from_secs(10)
    }

    pub fn retry_max() -> Duration {
        Duration::from_secs(600)
    }

    pub fn response_timeout() -> Duration {
        Duration::from_secs(30)
    }

    pub fn server_url() -> String {
        "https://127.0.0.1:8443".to_string()
    }

    pub fn socket_close_timeout() -> Duration {
        Duration::from_secs(3)
    }

    pub fn max_response_size() -> usize {
        // The new-session request asks the server to keep poll results below 7.5MB; leave
        // headroom for chunk framing and headers.
        16 * 1024 * 1024
    }
}

/// How the channel authenticates to the server. The two modes are mutually exclusive.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    Certificate { certstore: PathBuf },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::Certificate { certstore } => f
                .debug_struct("Certificate")
                .field("certstore", certstore)
                .finish(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Invalid server_url: {0}")]
    InvalidServerUrl(#[source] ResolveError),
    #[error("Either certstore or both username and password must be set")]
    MissingCredentials,
    #[error("subscriber_name must be set")]
    MissingSubscriberName,
    #[error("max_response_size must be greater than zero")]
    InvalidMaxResponseSize,
    #[error("retry_base must be greater than zero")]
    InvalidRetryBase,
    #[error("retry_max ({retry_max:?}) must not be below retry_base ({retry_base:?})")]
    InvalidRetryMax {
        retry_base: Duration,
        retry_max: Duration,
    },
}

/// Immutable per-process channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    url: String,
    server: ServerAddress,
    credentials: Credentials,
    b64_auth_str: Option<String>,
    subscriber_name: String,
    root_ca_path: Option<PathBuf>,
    socket_close_timeout: Duration,
    max_response_size: usize,
}

impl ChannelConfig {
    pub fn new(settings: ChannelSettings) -> Result<Self, ConfigError> {
        let ChannelSettings {
            server_url,
            username,
            password,
            certstore,
            root_ca_path,
            subscriber_name,
            socket_close_timeout,
            max_response_size,
        } = settings;

        let server = ServerAddress::parse(&server_url).map_err(ConfigError::InvalidServerUrl)?;

        let credentials = match (certstore, username, password) {
            (Some(certstore), username, _) => {
                if username.is_some() {
                    tracing::warn!(
                        certstore = %certstore.display(),
                        "Both certstore and username are configured, using certificate authentication"
                    );
                }
                Credentials::Certificate { certstore }
            }
            (None, Some(username), Some(password)) => Credentials::Basic { username, password },
            _ => return Err(ConfigError::MissingCredentials),
        };

        let subscriber_name = subscriber_name
            .filter(|name| !name.trim().is_empty())
            .ok_or(ConfigError::MissingSubscriberName)?;

        if max_response_size == 0 {
            return Err(ConfigError::InvalidMaxResponseSize);
        }

        let b64_auth_str = match &credentials {
            Credentials::Basic { username, password } => {
                Some(BASE64_STANDARD.encode(format!("{username}:{password}")))
            }
            Credentials::Certificate { .. } => None,
        };

        Ok(Self {
            url: server_url,
            server,
            credentials,
            b64_auth_str,
            subscriber_name,
            root_ca_path,
            socket_close_timeout,
            max_response_size,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn server(&self) -> &ServerAddress {
        &self.server
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// The base64 `username:password` string sent in the Authorization header. None in
    /// certificate mode.
    pub fn b64_auth_str(&self) -> Option<&str> {
        self.b64_auth_str.as_deref()
    }

    pub fn certstore(&self) -> Option<&Path> {
        match &self.credentials {
            Credentials::Certificate { certstore } => Some(certstore),
            Credentials::Basic { .. } => None,
        }
    }

    pub fn subscriber_name(&self) -> &str {
        &self.subscriber_name
    }

    pub fn root_ca_path(&self) -> Option<&Path> {
        self.root_ca_path.as_deref()
    }

    pub fn socket_close_timeout(&self) -> Duration {
        self.socket_close_timeout
    }

    pub fn max_response_size(&self) -> usize {
        self.max_response_size
    }
}

pub(crate) fn serialize_duration<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if d.subsec_millis() == 0 {
        serializer.serialize_str(&format!("{}s", d.as_secs()))
    } else {
        serializer.serialize_str(&format!("{}ms", d.as_millis()))
    }
}
