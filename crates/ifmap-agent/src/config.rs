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

use std::path::Path;

use ifmap_client::config::{ChannelSettings, DriverSettings};
use ifmap_client::ChannelConfig;
use serde::{Deserialize, Serialize};

/// Identity prefix of the vrouter object the subscription is rooted at.
const SUBSCRIBER_PREFIX: &str = "virtual-router:default-global-system-config:";

#[derive(Debug, Serialize, Deserialize, PartialEq)]
/// Configuration for ifmap-agent. Fields are documented as comments in the output of [`Config::into_annotated_config_file`].
pub struct Config {
    #[serde(default = "Defaults::update_queue_depth")]
    pub update_queue_depth: usize,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub channel: ChannelSettings,
    #[serde(default)]
    pub driver: DriverSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_queue_depth: Defaults::update_queue_depth(),
            agent_name: None,
            channel: ChannelSettings::default(),
            driver: DriverSettings::default(),
        }
    }
}

struct Defaults;

impl Defaults {
    fn update_queue_depth() -> usize {
        16
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let cfg = std::fs::read_to_string(path).map_err(|error| ConfigError::CouldNotRead {
            path: path.to_string_lossy().to_string(),
            error,
        })?;
        let config = toml::from_str::<Self>(&cfg).map_err(|error| ConfigError::InvalidToml {
            path: path.to_string_lossy().to_string(),
            error,
        })?;
        config.driver.validate()?;
        Ok(config)
    }

    /// Validates the channel settings. Without an explicit subscriber_name the subscription is
    /// rooted at this agent's vrouter, named after agent_name or the host name.
    pub fn channel_config(&self) -> Result<ChannelConfig, ConfigError> {
        let mut settings = self.channel.clone();
        if settings.subscriber_name.is_none() {
            let agent_name = match &self.agent_name {
                Some(name) => name.clone(),
                None => system_hostname()?,
            };
            settings.subscriber_name = Some(format!("{SUBSCRIBER_PREFIX}{agent_name}"));
        }
        Ok(ChannelConfig::new(settings)?)
    }

    pub fn into_annotated_config_file(self) -> String {
        let Self {
            update_queue_depth,
            agent_name: _,
            channel,
            driver,
        } = self;
        let ChannelSettings {
            server_url,
            username: _,
            password: _,
            certstore: _,
            root_ca_path: _,
            subscriber_name: _,
            socket_close_timeout,
            max_response_size,
        } = channel;
        let DriverSettings {
            retry_base,
            retry_max,
            response_timeout,
        } = driver;
        let socket_close_timeout = format!("{}s", socket_close_timeout.as_secs());
        let retry_base = format!("{}s", retry_base.as_secs());
        let retry_max = format!("{}s", retry_max.as_secs());
        let response_timeout = format!("{}s", response_timeout.as_secs());

        format!(
            r#"
#####
## This is a default config file for ifmap-agent. Everything in this file is optional: Any
## non-comment line in this file simply represents default values. Commented lines with a single `#`
## represent examples for optional configuration which is not part of the default config.
#####

## How many configuration updates may queue up before the poll loop waits for the consumer.
update_queue_depth = {update_queue_depth}

## Name of this agent's vrouter. Defaults to the host name.
# agent_name = "compute-17"

[channel]
## Address of the IF-MAP configuration server. The port defaults to 8443.
server_url = {server_url:?}

## Basic authentication. Ignored when certstore is set.
# username = "vrouter"
# password = "<password>"

## PEM file holding the client certificate chain and private key. Takes precedence over
## username/password.
# certstore = "/etc/ifmap-agent/ssl/agent.pem"

## Root CA used to verify the server certificate. If unset, the server certificate is not verified.
# root_ca_path = "/etc/ifmap-agent/ssl/ca.pem"

## Identity the subscription is rooted at. Defaults to the vrouter named by agent_name.
# subscriber_name = "virtual-router:default-global-system-config:compute-17"

## How long a socket is given to shut down cleanly before it is dropped.
socket_close_timeout = {socket_close_timeout:?}

## Largest response, in bytes, accepted from the server.
max_response_size = {max_response_size}

[driver]
## Retry interval after the first failure. Doubles on each further failure, up to retry_max. Reset
## once a session comes up.
retry_base = {retry_base:?}
retry_max = {retry_max:?}

## How long to wait for a connect or a control-socket response. Polls wait indefinitely.
response_timeout = {response_timeout:?}
"#
        )
    }
}

fn system_hostname() -> Result<String, ConfigError> {
    let path = "/proc/sys/kernel/hostname";
    let hostname = std::fs::read_to_string(path).map_err(|error| ConfigError::CouldNotRead {
        path: path.to_string(),
        error,
    })?;
    Ok(hostname.trim().to_string())
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file at {path}: {error}")]
    CouldNotRead { path: String, error: std::io::Error },
    #[error("TOML error reading config file at {path}: {error}")]
    InvalidToml {
        path: String,
        error: toml::de::Error,
    },
    #[error("Invalid settings: {0}")]
    Channel(#[from] ifmap_client::config::ConfigError),
}
