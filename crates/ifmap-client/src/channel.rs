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

//! [`IfmapChannel`] exposes the IF-MAP session as a small set of ordered operations. The driver
//! issues them one at a time; each returns exactly one result.
//!
//! Two sockets make up one logical session:
//!
//! - ssrc carries newSession and subscribe
//! - arc carries the poll loop, and is only opened once a session exists
//!
//! Any transport failure on either socket runs the failure path: status goes Down, both sockets
//! are closed, the reconnect counter is bumped and the session identity is forgotten. Protocol
//! failures leave the sockets alone; the driver decides and calls
//! [`IfmapChannel::reconnect_preparation`].

use std::fmt;

use crate::config::ChannelConfig;
use crate::endpoint::{Endpoint, EndpointResolver};
use crate::error::{ChannelError, TransportError};
use crate::framer::{Frame, FrameError, ResponseState};
use crate::message::{self, RequestContext};
use crate::session::{
    ChannelStats, ConnectionStatus, Counters, PollUpdate, Session, SocketRole,
};
use crate::socket::SocketSlot;
use crate::transport::Connector;

pub struct IfmapChannel<C: Connector> {
    config: ChannelConfig,
    connector: C,
    resolver: EndpointResolver,
    endpoint: Option<Endpoint>,
    ssrc: SocketSlot<C::Stream>,
    arc: SocketSlot<C::Stream>,
    /// The last framed response, waiting for its parser.
    pending: Option<Frame>,
    session: Option<Session>,
    sequence_number: u64,
    counters: Counters,
    status: ConnectionStatus,
    /// Set by every connect, cleared by the failure path. Keeps teardown to once per episode.
    episode_open: bool,
}

impl<C: Connector> IfmapChannel<C> {
    pub fn new(config: ChannelConfig, connector: C, resolver: EndpointResolver) -> Self {
        let max_response_size = config.max_response_size();
        Self {
            config,
            connector,
            resolver,
            endpoint: None,
            ssrc: SocketSlot::new(SocketRole::Ssrc, max_response_size),
            arc: SocketSlot::new(SocketRole::Arc, max_response_size),
            pending: None,
            session: None,
            sequence_number: 0,
            counters: Counters::default(),
            status: ConnectionStatus::NoConnection,
            episode_open: false,
        }
    }

    /// Resolves the configured server. The previous endpoint, if any, is discarded first.
    pub async fn resolve(&mut self) -> Result<Endpoint, ChannelError> {
        self.endpoint = None;
        let endpoint = self.resolver.resolve(self.config.server()).await?;
        tracing::debug!(server = %self.config.server(), addr = %endpoint.addr, "Resolved configuration server");
        self.endpoint = Some(endpoint.clone());
        Ok(endpoint)
    }

    /// Opens the socket for `role`, replacing (and closing) any stream already in that slot.
    pub async fn connect(&mut self, role: SocketRole) -> Result<(), ChannelError> {
        let Some(endpoint) = self.endpoint.clone() else {
            return Err(ChannelError::out_of_order("connect", "server not resolved"));
        };
        if role == SocketRole::Arc && self.session.is_none() {
            return Err(ChannelError::out_of_order(
                "connect",
                "poll socket requires a negotiated session",
            ));
        }

        let timeout = self.config.socket_close_timeout();
        self.slot_mut(role).close(timeout);
        self.episode_open = true;

        tracing::debug!(%role, addr = %endpoint.addr, "Connecting");
        match self.connector.connect(&endpoint).await {
            Ok(stream) => {
                self.slot_mut(role).install(stream);
                tracing::debug!(%role, addr = %endpoint.addr, "Connected");
                if role == SocketRole::Arc && self.session.is_some() && self.ssrc.is_connected() {
                    self.status = ConnectionStatus::Up;
                    tracing::info!(
                        url = self.config.url(),
                        session_id = self.session_id(),
                        "IF-MAP channel up"
                    );
                }
                Ok(())
            }
            Err(source) => Err(self.transport_failure(role, source)),
        }
    }

    pub async fn send_new_session_request(&mut self) -> Result<(), ChannelError> {
        if !self.ssrc.is_connected() {
            return Err(ChannelError::out_of_order(
                "send_new_session_request",
                "control socket not connected",
            ));
        }
        let request = message::new_session_request(self.request_context());
        self.send(SocketRole::Ssrc, &request, ResponseState::NewSession)
            .await
    }

    pub async fn new_session_response_wait(&mut self) -> Result<(), ChannelError> {
        self.wait(ResponseState::NewSession, "new_session_response_wait")
            .await
    }

    /// Parses the framed newSession response. On success a fresh session exists and the sequence
    /// number restarts at zero.
    pub fn extract_publisher_and_session_id(&mut self) -> Result<&Session, ChannelError> {
        let response = match self.pending.take() {
            Some(Frame::NewSession(response)) => response,
            _ => {
                return Err(ChannelError::out_of_order(
                    "extract_publisher_and_session_id",
                    "no newSession response received",
                ))
            }
        };

        let result = message::parse_new_session(&response)?;
        self.counters.recv_msg_cnt += 1;
        self.sequence_number = 0;
        tracing::info!(
            publisher_id = %result.publisher_id,
            session_id = %result.session_id,
            "IF-MAP session negotiated"
        );
        Ok(&*self
            .session
            .insert(Session::new(result.publisher_id, result.session_id)))
    }

    pub async fn send_subscribe(&mut self) -> Result<(), ChannelError> {
        let Some(session) = &self.session else {
            return Err(ChannelError::out_of_order(
                "send_subscribe",
                "no negotiated session",
            ));
        };
        if !self.ssrc.is_connected() {
            return Err(ChannelError::out_of_order(
                "send_subscribe",
                "control socket not connected",
            ));
        }
        let request = message::subscribe_request(
            self.request_context(),
            &session.session_id,
            self.config.subscriber_name(),
        );
        self.send(SocketRole::Ssrc, &request, ResponseState::Subscribe)
            .await
    }

    pub async fn subscribe_response_wait(&mut self) -> Result<(), ChannelError> {
        self.wait(ResponseState::Subscribe, "subscribe_response_wait")
            .await
    }

    pub fn read_subscribe_response(&mut self) -> Result<(), ChannelError> {
        let response = match self.pending.take() {
            Some(Frame::Subscribe(response)) => response,
            _ => {
                return Err(ChannelError::out_of_order(
                    "read_subscribe_response",
                    "no subscribe response received",
                ))
            }
        };

        message::parse_subscribe(&response)?;
        self.counters.recv_msg_cnt += 1;
        if let Some(session) = self.session.as_mut() {
            session.subscribed = true;
            tracing::info!(
                session_id = %session.session_id,
                subscriber = self.config.subscriber_name(),
                "Subscribed"
            );
        }
        Ok(())
    }

    pub async fn send_poll_request(&mut self) -> Result<(), ChannelError> {
        let Some(session) = self.session.as_ref().filter(|s| s.subscribed) else {
            return Err(ChannelError::out_of_order(
                "send_poll_request",
                "no subscribed session",
            ));
        };
        if !self.arc.is_connected() {
            return Err(ChannelError::out_of_order(
                "send_poll_request",
                "poll socket not connected",
            ));
        }
        let request = message::poll_request(self.request_context(), &session.session_id);
        self.send(SocketRole::Arc, &request, ResponseState::Poll)
            .await
    }

    /// Waits for the poll response. There is no timeout here: the server holds a poll open until
    /// it has updates.
    pub async fn poll_response_wait(&mut self) -> Result<(), ChannelError> {
        self.wait(ResponseState::Poll, "poll_response_wait").await
    }

    /// Validates the framed poll response and returns its body for the configuration consumer.
    pub fn read_poll_response(&mut self) -> Result<PollUpdate, ChannelError> {
        let response = match self.pending.take() {
            Some(Frame::Poll(response)) => response,
            _ => {
                return Err(ChannelError::out_of_order(
                    "read_poll_response",
                    "no poll response received",
                ))
            }
        };

        message::parse_poll(&response)?;
        self.counters.recv_msg_cnt += 1;
        self.sequence_number += 1;
        tracing::debug!(
            sequence_number = self.sequence_number,
            bytes = response.body.len(),
            "Poll response received"
        );
        Ok(PollUpdate {
            sequence_number: self.sequence_number,
            payload: response.body,
        })
    }

    /// Runs the failure path unless it already ran for the current connection episode. Returns
    /// whether anything was torn down.
    pub fn reconnect_preparation(&mut self) -> bool {
        self.fail(&"reconnect requested")
    }

    /// Closing either socket of a live session takes the channel Down. The failure path is not
    /// run: counters and the session identity are left alone.
    pub fn close(&mut self, role: SocketRole) -> bool {
        let timeout = self.config.socket_close_timeout();
        let closed = self.slot_mut(role).close(timeout);
        if closed && self.status == ConnectionStatus::Up {
            self.status = ConnectionStatus::Down;
            tracing::info!(%role, "IF-MAP channel down, socket closed");
        }
        closed
    }

    /// For failures that happen before any socket exists, such as resolution.
    pub fn increment_reconnect_attempts(&mut self) {
        self.counters.reconnect_attempts += 1;
    }

    pub fn clear_recv_msg_cnt(&mut self) {
        self.counters.recv_msg_cnt = 0;
    }

    pub fn clear_sent_msg_cnt(&mut self) {
        self.counters.sent_msg_cnt = 0;
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn recv_msg_cnt(&self) -> u64 {
        self.counters.recv_msg_cnt
    }

    pub fn sent_msg_cnt(&self) -> u64 {
        self.counters.sent_msg_cnt
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.counters.reconnect_attempts
    }

    pub fn is_connected(&self, role: SocketRole) -> bool {
        self.slot(role).is_connected()
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn stats(&self) -> ChannelStats {
        let (publisher_id, session_id) = match &self.session {
            Some(session) => (session.publisher_id.clone(), session.session_id.clone()),
            None => (String::new(), String::new()),
        };
        ChannelStats {
            url: self.config.url().to_string(),
            connection_status: self.status.to_string(),
            publisher_id,
            session_id,
            sequence_number: self.sequence_number,
            recv_msg_cnt: self.counters.recv_msg_cnt,
            sent_msg_cnt: self.counters.sent_msg_cnt,
            reconnect_attempts: self.counters.reconnect_attempts,
        }
    }

    fn session_id(&self) -> &str {
        self.session
            .as_ref()
            .map(|s| s.session_id.as_str())
            .unwrap_or_default()
    }

    fn request_context(&self) -> RequestContext<'_> {
        RequestContext {
            host: self.config.server().host(),
            b64_auth_str: self.config.b64_auth_str(),
        }
    }

    fn slot(&self, role: SocketRole) -> &SocketSlot<C::Stream> {
        match role {
            SocketRole::Ssrc => &self.ssrc,
            SocketRole::Arc => &self.arc,
        }
    }

    fn slot_mut(&mut self, role: SocketRole) -> &mut SocketSlot<C::Stream> {
        match role {
            SocketRole::Ssrc => &mut self.ssrc,
            SocketRole::Arc => &mut self.arc,
        }
    }

    async fn send(
        &mut self,
        role: SocketRole,
        request: &[u8],
        expect: ResponseState,
    ) -> Result<(), ChannelError> {
        match self.slot_mut(role).send(request, expect).await {
            Ok(()) => {
                self.counters.sent_msg_cnt += 1;
                tracing::debug!(%role, request = %expect, bytes = request.len(), "Sent request");
                Ok(())
            }
            Err(source) => Err(self.transport_failure(role, source)),
        }
    }

    async fn wait(
        &mut self,
        state: ResponseState,
        operation: &'static str,
    ) -> Result<(), ChannelError> {
        let role = state.role();
        if self.slot(role).expected() != Some(state) {
            return Err(ChannelError::out_of_order(
                operation,
                "no matching request outstanding",
            ));
        }

        match self.slot_mut(role).receive(state).await {
            Ok(frame) => {
                self.pending = Some(frame);
                Ok(())
            }
            Err(FrameError::Transport(source)) => Err(self.transport_failure(role, source)),
            Err(FrameError::Protocol(error)) => {
                tracing::warn!(%role, response = %state, %error, "Could not frame response");
                Err(error.into())
            }
        }
    }

    fn transport_failure(&mut self, role: SocketRole, source: TransportError) -> ChannelError {
        self.fail(&format_args!("{role} socket: {source}"));
        ChannelError::Transport { role, source }
    }

    fn fail(&mut self, cause: &dyn fmt::Display) -> bool {
        if !self.episode_open {
            return false;
        }
        self.episode_open = false;

        let timeout = self.config.socket_close_timeout();
        self.status = ConnectionStatus::Down;
        self.ssrc.close(timeout);
        self.arc.close(timeout);
        self.counters.reconnect_attempts += 1;
        self.session = None;
        self.pending = None;

        tracing::warn!(
            %cause,
            reconnect_attempts = self.counters.reconnect_attempts,
            sequence_number = self.sequence_number,
            "IF-MAP channel down"
        );
        true
    }
}
