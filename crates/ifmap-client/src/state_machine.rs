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

//! Reference driver for [`IfmapChannel`]. Sequences the channel operations, forwards poll results
//! to the configuration consumer and reconnects with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::channel::IfmapChannel;
use crate::config::DriverSettings;
use crate::error::{ChannelError, ErrorKind};
use crate::session::{ChannelStats, PollUpdate, SocketRole};
use crate::transport::Connector;

#[derive(thiserror::Error, Debug)]
enum AttemptError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("update consumer went away")]
    SinkClosed,
}

pub struct IfmapStateMachine<C: Connector> {
    channel: IfmapChannel<C>,
    settings: DriverSettings,
    updates_tx: mpsc::Sender<PollUpdate>,
    stats_tx: watch::Sender<ChannelStats>,
}

impl<C: Connector + 'static> IfmapStateMachine<C> {
    pub fn new(
        channel: IfmapChannel<C>,
        settings: DriverSettings,
        updates_tx: mpsc::Sender<PollUpdate>,
    ) -> (Self, watch::Receiver<ChannelStats>) {
        let (stats_tx, stats_rx) = watch::channel(channel.stats());
        (
            Self {
                channel,
                settings,
                updates_tx,
                stats_tx,
            },
            stats_rx,
        )
    }

    /// Runs until `shutdown_rx` fires (or its sender is dropped) or the update consumer goes away.
    /// Returns the channel so callers can inspect its final state.
    pub async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) -> IfmapChannel<C> {
        let url = self.channel.config().url().to_string();

        // Connect and reconnect, in a loop, until shut down
        let mut retry_time = Duration::ZERO;
        'retry: loop {
            tokio::select! {
                _ = &mut shutdown_rx => break 'retry,
                _ = tokio::time::sleep(retry_time) => {}
            }
            // Subsequent retries sleep for retry_base and double from there until a session
            // comes up.
            retry_time = next_retry_backoff(retry_time, &self.settings);

            let mut reached_up = false;
            let result = tokio::select! {
                _ = &mut shutdown_rx => break 'retry,
                result = self.run_session(&mut reached_up) => result,
            };

            if reached_up {
                tracing::debug!(%url, "session reached Up, resetting backoff to 0s");
                retry_time = Duration::ZERO;
            }

            let error = match result {
                Ok(()) => continue,
                Err(error) => error,
            };

            match &error {
                AttemptError::Channel(e) if e.kind() == ErrorKind::Resolution => {
                    self.channel.increment_reconnect_attempts();
                }
                _ => {
                    self.channel.reconnect_preparation();
                }
            }
            self.publish_stats();

            if matches!(error, AttemptError::SinkClosed) {
                tracing::info!(%url, "Update consumer closed, stopping IF-MAP channel");
                break 'retry;
            }
            tracing::error!(
                %url,
                %error,
                reconnect_attempts = self.channel.reconnect_attempts(),
                "IF-MAP session failed, will retry in {}s",
                retry_time.as_secs_f64()
            );
        }

        tracing::info!(%url, "Shutting down IF-MAP channel");
        self.channel.close(SocketRole::Ssrc);
        self.channel.close(SocketRole::Arc);
        self.publish_stats();
        self.channel
    }

    /// One connection attempt, from resolution through the poll loop. Only ever returns with an
    /// error; the poll loop has no natural end.
    async fn run_session(&mut self, reached_up: &mut bool) -> Result<(), AttemptError> {
        let timeout = self.settings.response_timeout;

        self.channel.clear_sent_msg_cnt();
        self.channel.clear_recv_msg_cnt();

        bounded(timeout, "resolution", self.channel.resolve()).await?;
        bounded(timeout, "ssrc connect", self.channel.connect(SocketRole::Ssrc)).await?;
        self.publish_stats();

        bounded(timeout, "newSession request", self.channel.send_new_session_request()).await?;
        bounded(timeout, "newSession response", self.channel.new_session_response_wait()).await?;
        self.channel.extract_publisher_and_session_id()?;
        self.publish_stats();

        bounded(timeout, "subscribe request", self.channel.send_subscribe()).await?;
        bounded(timeout, "subscribe response", self.channel.subscribe_response_wait()).await?;
        self.channel.read_subscribe_response()?;

        bounded(timeout, "arc connect", self.channel.connect(SocketRole::Arc)).await?;
        *reached_up = true;
        self.publish_stats();

        loop {
            bounded(timeout, "poll request", self.channel.send_poll_request()).await?;
            self.channel.poll_response_wait().await?;
            let update = self.channel.read_poll_response()?;
            self.publish_stats();
            self.updates_tx
                .send(update)
                .await
                .map_err(|_| AttemptError::SinkClosed)?;
        }
    }

    fn publish_stats(&self) {
        let stats = self.channel.stats();
        self.stats_tx.send_if_modified(|current| {
            if *current == stats {
                return false;
            }
            *current = stats;
            true
        });
    }
}

async fn bounded<T>(
    timeout: Duration,
    what: &'static str,
    fut: impl Future<Output = Result<T, ChannelError>>,
) -> Result<T, AttemptError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(AttemptError::Timeout(what)),
    }
}

/// Spawns the state machine onto the runtime. The returned handle shuts it down.
pub fn spawn<C: Connector + 'static>(
    channel: IfmapChannel<C>,
    settings: DriverSettings,
    updates_tx: mpsc::Sender<PollUpdate>,
) -> StateMachineHandle<C> {
    let (state_machine, stats_rx) = IfmapStateMachine::new(channel, settings, updates_tx);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let join_handle = tokio::spawn(state_machine.run(shutdown_rx));
    StateMachineHandle {
        shutdown_tx,
        join_handle,
        stats_rx,
    }
}

pub struct StateMachineHandle<C: Connector> {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<IfmapChannel<C>>,
    stats_rx: watch::Receiver<ChannelStats>,
}

impl<C: Connector + 'static> StateMachineHandle<C> {
    pub fn stats(&self) -> watch::Receiver<ChannelStats> {
        self.stats_rx.clone()
    }

    /// Signals shutdown and waits for the state machine to finish. None if the task panicked.
    pub async fn shutdown_and_wait(self) -> Option<IfmapChannel<C>> {
        self.shutdown_tx.send(()).ok();
        match self.join_handle.await {
            Ok(channel) => Some(channel),
            Err(error) => {
                tracing::error!(%error, "IF-MAP state machine task failed");
                None
            }
        }
    }
}

/// Calculate the next exponential backoff duration for reconnecting to the server
fn next_retry_backoff(prev: Duration, settings: &DriverSettings) -> Duration {
    if prev == Duration::ZERO {
        return settings.retry_base;
    }
    prev.saturating_mul(2).min(settings.retry_max)
}
