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

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;
use crate::framer::{Frame, FrameError, ResponseFramer, ResponseState};
use crate::session::SocketRole;

/// The channel's hold on one of its two connections: at most one stream, the framer buffer that
/// belongs to it, and the response currently expected on it.
#[derive(Debug)]
pub struct SocketSlot<S> {
    role: SocketRole,
    stream: Option<S>,
    framer: ResponseFramer,
    expected: Option<ResponseState>,
}

impl<S> SocketSlot<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(role: SocketRole, max_response_size: usize) -> Self {
        Self {
            role,
            stream: None,
            framer: ResponseFramer::new(max_response_size),
            expected: None,
        }
    }

    pub fn role(&self) -> SocketRole {
        self.role
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn expected(&self) -> Option<ResponseState> {
        self.expected
    }

    /// Installs a freshly connected stream. Any previous stream must have been closed first.
    pub fn install(&mut self, stream: S) {
        debug_assert!(self.stream.is_none(), "{} socket replaced without close", self.role);
        self.stream = Some(stream);
        self.framer.reset();
        self.expected = None;
    }

    /// Writes one complete request and records which response it should produce.
    pub async fn send(&mut self, request: &[u8], expect: ResponseState) -> Result<(), TransportError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;
        stream
            .write_all(request)
            .await
            .map_err(TransportError::Write)?;
        stream.flush().await.map_err(TransportError::Write)?;
        self.expected = Some(expect);
        Ok(())
    }

    /// Waits for the response armed by the last [`SocketSlot::send`].
    pub async fn receive(&mut self, state: ResponseState) -> Result<Frame, FrameError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;
        let frame = self.framer.read_frame(stream, state).await?;
        self.expected = None;
        Ok(frame)
    }

    /// Empties the slot synchronously and hands the stream to [`bounded_close`]. A no-op when the
    /// slot is already empty.
    pub fn close(&mut self, timeout: Duration) -> bool {
        self.framer.reset();
        self.expected = None;
        match self.stream.take() {
            Some(stream) => {
                bounded_close(self.role, stream, timeout);
                true
            }
            None => false,
        }
    }
}

/// Shuts `stream` down in the background, giving up after `timeout`. The stream is dropped in
/// either case, which closes the underlying TCP socket.
pub fn bounded_close<S>(role: SocketRole, mut stream: S, timeout: Duration)
where
    S: AsyncWrite + Unpin + Send + 'static,
{
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::debug!(%role, "No runtime available, dropping socket without shutdown");
        return;
    };

    handle.spawn(async move {
        match tokio::time::timeout(timeout, stream.shutdown()).await {
            Ok(Ok(())) => tracing::debug!(%role, "Socket closed"),
            Ok(Err(error)) => tracing::debug!(%role, %error, "Error during socket shutdown"),
            Err(_) => tracing::warn!(%role, ?timeout, "Socket shutdown timed out, forcing close"),
        }
    });
}
