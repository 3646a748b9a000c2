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

//! ifmap-client - IF-MAP configuration channel for the virtualization agent
//!
//! The agent learns its virtual networks, VRFs and interfaces from the configuration server by
//! way of an IF-MAP publish/subscribe session. This crate implements the client side of that
//! session: two TLS connections to the server (one to negotiate and subscribe, one to long-poll
//! for updates), the response framing on top of them, and the bookkeeping that has to survive
//! reconnects.
//!
//! ## Architecture
//!
//! - [`endpoint`]: Parses the configured server URL and resolves it to a single socket address
//! - [`tls`]: The process-wide rustls client context, with or without a client certificate
//! - [`transport`]: TCP + TLS connection establishment behind the [`transport::Connector`] trait
//! - [`socket`]: Per-role socket slots and the bounded close procedure
//! - [`framer`]: Accumulates bounded reads until a complete HTTP response is available
//! - [`message`]: IF-MAP SOAP requests and the parsers for their responses
//! - [`channel`]: [`channel::IfmapChannel`], the ordered operation API the driver calls
//! - [`state_machine`]: A reference driver that sequences the channel and owns retry/backoff
//! - [`config`]: Channel and driver settings, and the validated [`config::ChannelConfig`]
//! - [`session`]: Session identity, counters and the [`session::ChannelStats`] snapshot

pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod framer;
pub mod message;
pub mod session;
pub mod socket;
pub mod state_machine;
pub mod tls;
pub mod transport;

pub use channel::IfmapChannel;
pub use config::ChannelConfig;
pub use error::{ChannelError, ErrorKind};
pub use session::{ChannelStats, ConnectionStatus, PollUpdate, Session, SocketRole};

/// Port used when the configured server URL does not carry one.
pub const DEFAULT_SERVER_PORT: u16 = 8443;
