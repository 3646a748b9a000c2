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

//! A minimal IF-MAP server over real TLS, enough to drive a channel through a session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

pub const NEW_SESSION_OK: &str = r#"<newSessionResult session-id="sess-42" ifmap-publisher-id="pub-1" max-poll-result-size="7500000"/>"#;
pub const SUBSCRIBE_OK: &str = "<subscribeReceived/>";
pub const POLL_OK: &str = r#"<pollResult><searchResult name="root"><resultItem><identity type="other" name="virtual-network:default-domain:admin:vn1"/></resultItem></searchResult></pollResult>"#;

#[derive(Debug, Clone, Default)]
pub struct ServerBehavior {
    /// Close the poll connection instead of answering the poll with this index (0-based,
    /// counted across all sessions). Only happens once.
    pub drop_poll: Option<usize>,
}

pub struct MockIfmapServer {
    pub addr: SocketAddr,
    /// PEM of the self-signed server certificate, usable as a root CA by clients.
    pub ca_pem: String,
    pub requests: Arc<Mutex<Vec<String>>>,
    pub polls: Arc<AtomicUsize>,
    accept_loop: JoinHandle<()>,
}

impl Drop for MockIfmapServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

impl MockIfmapServer {
    pub async fn start(behavior: ServerBehavior) -> Self {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        let server_config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key)
        .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let polls = Arc::new(AtomicUsize::new(0));

        let accept_loop = tokio::spawn({
            let requests = requests.clone();
            let polls = polls.clone();
            async move {
                loop {
                    let Ok((tcp, _)) = listener.accept().await else {
                        return;
                    };
                    let acceptor = acceptor.clone();
                    let requests = requests.clone();
                    let polls = polls.clone();
                    let behavior = behavior.clone();
                    tokio::spawn(async move {
                        // Handshake failures are expected in some tests
                        let Ok(tls) = acceptor.accept(tcp).await else {
                            return;
                        };
                        serve_connection(tls, behavior, requests, polls).await;
                    });
                }
            }
        });

        Self {
            addr,
            ca_pem: cert.pem(),
            requests,
            polls,
            accept_loop,
        }
    }

    pub fn url(&self) -> String {
        format!("https://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve_connection<S>(
    mut stream: S,
    behavior: ServerBehavior,
    requests: Arc<Mutex<Vec<String>>>,
    polls: Arc<AtomicUsize>,
) where
    S: AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    while let Some(request) = read_request(&mut stream).await {
        requests.lock().unwrap().push(request.clone());

        let response = if request.contains("<ifmap:newSession") {
            content_length_response(NEW_SESSION_OK)
        } else if request.contains("<ifmap:subscribe") {
            content_length_response(SUBSCRIBE_OK)
        } else if request.contains("<ifmap:poll") {
            let index = polls.fetch_add(1, Ordering::SeqCst);
            if behavior.drop_poll == Some(index) {
                return;
            }
            chunked_response(POLL_OK)
        } else {
            "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n".to_string()
        };

        if stream.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Reads one request, or None once the client hung up.
async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        let complete = text.split_once("\r\n\r\n").is_some_and(|(head, body)| {
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("Content-Length: "))
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(0);
            body.len() >= length
        });
        if complete {
            return String::from_utf8(buf).ok();
        }
    }
}

fn envelope(inner: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" "#,
            r#"xmlns:ifmap="http://www.trustedcomputinggroup.org/2010/IFMAP/2">"#,
            "<env:Body><ifmap:response>{}</ifmap:response></env:Body></env:Envelope>",
        ),
        inner
    )
}

fn content_length_response(inner: &str) -> String {
    let body = envelope(inner);
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/soap+xml\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

/// Polls come back chunked, split in two, the way the server streams large results.
fn chunked_response(inner: &str) -> String {
    let body = envelope(inner);
    let (first, second) = body.split_at(body.len() / 2);
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/soap+xml\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{first}\r\n{:x}\r\n{second}\r\n0\r\n\r\n",
        first.len(),
        second.len()
    )
}
