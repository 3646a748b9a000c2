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

//! Process-wide TLS context for both channel sockets.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::config::ChannelConfig;
use crate::error::TlsError;

/// Builds the rustls client configuration used for every connection the channel makes.
///
/// Without a root CA the server certificate is accepted as-is, which is how the configuration
/// servers are deployed today. In certificate mode the client chain and key come from the
/// certstore PEM file.
///
/// This function blocks on file reads; call it at startup, not from the connection path.
pub fn build_client_config(config: &ChannelConfig) -> Result<Arc<ClientConfig>, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let builder = match config.root_ca_path() {
        Some(root_ca_path) => {
            let mut roots = RootCertStore::empty();
            let certs = read_certs(root_ca_path, "root CA")?;
            let (added, ignored) = roots.add_parsable_certificates(certs);
            if ignored > 0 {
                tracing::warn!(ignored, path = %root_ca_path.display(), "Ignored unparsable root CA certificates");
            }
            if added == 0 {
                return Err(TlsError::NoCertificates {
                    path: root_ca_path.display().to_string(),
                });
            }
            builder.with_root_certificates(roots)
        }
        None => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(UnverifiedServerCert::new(provider))),
    };

    let tls = match config.certstore() {
        Some(certstore) => {
            let (certs, key) = read_certstore(certstore)?;
            builder.with_client_auth_cert(certs, key)?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(tls))
}

fn read_pem(path: &Path, what: &'static str) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|error| TlsError::CouldNotRead {
        what,
        path: path.display().to_string(),
        error,
    })
}

fn read_certs(path: &Path, what: &'static str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem_file = read_pem(path, what)?;
    let mut cert_cursor = std::io::Cursor::new(&pem_file[..]);

    let mut errors = vec![];
    let certs: Vec<_> = rustls_pemfile::certs(&mut cert_cursor)
        .filter_map(|result| result.map_err(|e| errors.push(e)).ok())
        .collect();
    if !errors.is_empty() {
        tracing::warn!(certs = ?errors, path = %path.display(), "Found error parsing one or more certificates");
    }

    if certs.is_empty() {
        return Err(TlsError::NoCertificates {
            path: path.display().to_string(),
        });
    }
    Ok(certs)
}

/// The certstore is a single PEM file holding the client certificate chain followed by its key.
fn read_certstore(
    path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TlsError> {
    let certs = read_certs(path, "certstore")?;

    let pem_file = read_pem(path, "certstore")?;
    let mut key_cursor = std::io::Cursor::new(&pem_file[..]);
    let key = rustls_pemfile::private_key(&mut key_cursor)
        .map_err(|error| TlsError::CouldNotRead {
            what: "certstore private key",
            path: path.display().to_string(),
            error,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey {
            path: path.display().to_string(),
        })?;

    Ok((certs, key))
}

/// Accepts any server certificate. Signatures are still checked so the handshake itself is
/// sound; only the chain of trust is skipped.
#[derive(Debug)]
pub struct UnverifiedServerCert {
    provider: Arc<CryptoProvider>,
    warned: AtomicBool,
}

impl UnverifiedServerCert {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self {
            provider,
            warned: AtomicBool::new(false),
        }
    }
}

impl ServerCertVerifier for UnverifiedServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if !self.warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                ?server_name,
                "No root_ca_path configured, accepting the configuration server certificate without verification"
            );
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
