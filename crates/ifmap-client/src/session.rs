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

use bytes::Bytes;

/// Which of the two connections to the server a socket plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketRole {
    /// Session-control socket: new session and subscribe.
    Ssrc,
    /// Poll socket: the long-poll loop.
    Arc,
}

impl fmt::Display for SocketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketRole::Ssrc => write!(f, "ssrc"),
            SocketRole::Arc => write!(f, "arc"),
        }
    }
}

/// Liveness of the channel as reported to the driver and to status collaborators.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    NoConnection = 0,
    Down = 1,
    Up = 2,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::NoConnection => "No Connection",
            ConnectionStatus::Down => "Down",
            ConnectionStatus::Up => "Up",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The server-assigned identity of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub publisher_id: String,
    pub session_id: String,
    /// Set once the server acknowledged the subscribe request. Polls are refused until then.
    pub subscribed: bool,
}

impl Session {
    pub fn new(publisher_id: String, session_id: String) -> Self {
        Self {
            publisher_id,
            session_id,
            subscribed: false,
        }
    }
}

/// Health counters. `recv_msg_cnt` and `sent_msg_cnt` may be cleared by the driver at connection
/// boundaries; `reconnect_attempts` only ever grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub recv_msg_cnt: u64,
    pub sent_msg_cnt: u64,
    pub reconnect_attempts: u64,
}

/// One batch of configuration updates, forwarded verbatim to the configuration consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollUpdate {
    /// Sequence number of the poll that delivered this batch (1 for the first poll of a session).
    pub sequence_number: u64,
    /// The decoded HTTP body of the poll response: the full SOAP envelope.
    pub payload: Bytes,
}

/// Read-only snapshot of the channel for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub url: String,
    pub connection_status: String,
    pub publisher_id: String,
    pub session_id: String,
    pub sequence_number: u64,
    pub recv_msg_cnt: u64,
    pub sent_msg_cnt: u64,
    pub reconnect_attempts: u64,
}
