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

use std::path::PathBuf;
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use ifmap_client::config::{ChannelSettings, DriverSettings};
use ifmap_client::endpoint::EndpointResolver;
use ifmap_client::error::TransportError;
use ifmap_client::state_machine;
use ifmap_client::transport::TlsConnector;
use ifmap_client::{
    ChannelConfig, ChannelError, ConnectionStatus, ErrorKind, IfmapChannel, SocketRole,
};
use tokio::sync::mpsc;

mod common;
use common::mock_server::{MockIfmapServer, ServerBehavior};

#[ctor::ctor]
fn setup() {
    common::test_logging::init();
}

fn settings(url: String) -> ChannelSettings {
    ChannelSettings {
        server_url: url,
        username: Some("admin".to_string()),
        password: Some("secret".to_string()),
        subscriber_name: Some("virtual-router:default-global-system-config:host1".to_string()),
        ..Default::default()
    }
}

fn channel(settings: ChannelSettings) -> eyre::Result<IfmapChannel<TlsConnector>> {
    let config = ChannelConfig::new(settings)?;
    let connector = TlsConnector::new(&config)?;
    let resolver =
        EndpointResolver::with_config(ResolverConfig::default(), ResolverOpts::default());
    Ok(IfmapChannel::new(config, connector, resolver))
}

async fn establish(channel: &mut IfmapChannel<TlsConnector>) -> Result<(), ChannelError> {
    channel.resolve().await?;
    channel.connect(SocketRole::Ssrc).await?;
    channel.send_new_session_request().await?;
    channel.new_session_response_wait().await?;
    channel.extract_publisher_and_session_id()?;
    channel.send_subscribe().await?;
    channel.subscribe_response_wait().await?;
    channel.read_subscribe_response()?;
    channel.connect(SocketRole::Arc).await
}

#[tokio::test]
async fn test_session_over_tls() -> eyre::Result<()> {
    let server = MockIfmapServer::start(ServerBehavior::default()).await;
    let mut channel = channel(settings(server.url()))?;

    establish(&mut channel).await?;
    assert_eq!(channel.status(), ConnectionStatus::Up);

    for expected in 1..=3 {
        channel.send_poll_request().await?;
        channel.poll_response_wait().await?;
        let update = channel.read_poll_response()?;
        assert_eq!(update.sequence_number, expected);
        assert!(update.payload.ends_with(b"</env:Envelope>"));
    }
    assert_eq!(channel.sequence_number(), 3);
    assert_eq!(channel.sent_msg_cnt(), 5);
    assert_eq!(channel.recv_msg_cnt(), 5);

    let requests = server.requests();
    assert_eq!(requests.len(), 5);
    assert!(requests
        .iter()
        .all(|r| r.contains("Authorization: Basic YWRtaW46c2VjcmV0\r\n")));
    assert!(requests[1].contains(r#"name="virtual-router:default-global-system-config:host1""#));
    Ok(())
}

#[tokio::test]
async fn test_server_verified_against_root_ca() -> eyre::Result<()> {
    let server = MockIfmapServer::start(ServerBehavior::default()).await;
    let dir = temp_dir::TempDir::new()?;
    let ca_path = dir.child("ca.pem");
    std::fs::write(&ca_path, &server.ca_pem)?;

    let mut channel = channel(ChannelSettings {
        root_ca_path: Some(ca_path),
        ..settings(server.url())
    })?;
    establish(&mut channel).await?;
    assert_eq!(channel.status(), ConnectionStatus::Up);
    Ok(())
}

#[tokio::test]
async fn test_untrusted_server_fails_handshake() -> eyre::Result<()> {
    let server = MockIfmapServer::start(ServerBehavior::default()).await;
    let other = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()])?;
    let dir = temp_dir::TempDir::new()?;
    let ca_path: PathBuf = dir.child("other-ca.pem");
    std::fs::write(&ca_path, other.cert.pem())?;

    let mut channel = channel(ChannelSettings {
        root_ca_path: Some(ca_path),
        ..settings(server.url())
    })?;
    channel.resolve().await?;
    let err = channel.connect(SocketRole::Ssrc).await.unwrap_err();
    assert!(matches!(
        err,
        ChannelError::Transport {
            role: SocketRole::Ssrc,
            source: TransportError::Handshake { .. }
        }
    ));
    assert_eq!(channel.status(), ConnectionStatus::Down);
    assert_eq!(channel.reconnect_attempts(), 1);
    assert!(!channel.is_connected(SocketRole::Ssrc));
    Ok(())
}

#[tokio::test]
async fn test_connection_refused() -> eyre::Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let mut channel = channel(settings(format!("https://{addr}")))?;
    channel.resolve().await?;
    let err = channel.connect(SocketRole::Ssrc).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(channel.status(), ConnectionStatus::Down);
    Ok(())
}

#[tokio::test]
async fn test_poll_connection_dropped_mid_session() -> eyre::Result<()> {
    let server = MockIfmapServer::start(ServerBehavior { drop_poll: Some(3) }).await;
    let mut channel = channel(settings(server.url()))?;
    establish(&mut channel).await?;

    for _ in 0..3 {
        channel.send_poll_request().await?;
        channel.poll_response_wait().await?;
        channel.read_poll_response()?;
    }

    channel.send_poll_request().await?;
    let err = channel.poll_response_wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(channel.status(), ConnectionStatus::Down);
    assert!(!channel.is_connected(SocketRole::Ssrc));
    assert!(!channel.is_connected(SocketRole::Arc));
    assert_eq!(channel.reconnect_attempts(), 1);
    assert!(channel.session().is_none());
    assert_eq!(channel.sequence_number(), 3);

    // Driver-side teardown after the channel already did it is a no-op.
    assert!(!channel.reconnect_preparation());
    assert_eq!(channel.reconnect_attempts(), 1);

    establish(&mut channel).await?;
    assert_eq!(channel.sequence_number(), 0);
    assert_eq!(channel.status(), ConnectionStatus::Up);
    Ok(())
}

#[tokio::test]
async fn test_state_machine_recovers_from_dropped_poll() -> eyre::Result<()> {
    let server = MockIfmapServer::start(ServerBehavior { drop_poll: Some(2) }).await;
    let channel = channel(settings(server.url()))?;
    let (updates_tx, mut updates_rx) = mpsc::channel(16);
    let handle = state_machine::spawn(
        channel,
        DriverSettings {
            retry_base: Duration::from_millis(10),
            retry_max: Duration::from_millis(100),
            response_timeout: Duration::from_secs(5),
        },
        updates_tx,
    );
    let mut stats_rx = handle.stats();

    let sequence_numbers: Vec<u64> = {
        let mut seen = Vec::new();
        while seen.len() < 4 {
            let update = updates_rx
                .recv()
                .await
                .ok_or_else(|| eyre::eyre!("state machine stopped"))?;
            seen.push(update.sequence_number);
        }
        seen
    };
    // Two polls, the drop, then a new session starting from 1.
    assert_eq!(sequence_numbers, vec![1, 2, 1, 2]);

    stats_rx
        .wait_for(|stats| stats.reconnect_attempts == 1)
        .await?;
    assert_eq!(stats_rx.borrow().session_id, "sess-42");

    let channel = handle
        .shutdown_and_wait()
        .await
        .ok_or_else(|| eyre::eyre!("state machine panicked"))?;
    assert_eq!(channel.reconnect_attempts(), 1);
    assert!(!channel.is_connected(SocketRole::Arc));
    Ok(())
}
