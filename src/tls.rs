//! Outbound TLS transport construction.
//!
//! The transport is built once at startup from the configured [`TlsMode`] and
//! shared read-only by every request handler.

use crate::config::TlsMode;
use crate::error::ProxyError;
use bytes::Bytes;
use http_body_util::Full;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::{debug, info, warn};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Shared outbound client. Handles both `http` and `https` upstreams.
pub type Transport = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Certificate verifier that accepts every upstream certificate.
///
/// Signature schemes are advertised from the crypto provider so handshakes
/// with any server key type succeed.
#[derive(Debug)]
pub struct NoVerifier {
    provider: Arc<CryptoProvider>,
}

impl NoVerifier {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

pub struct TlsTransportFactory;

impl TlsTransportFactory {
    /// Builds the rustls client configuration for the given mode.
    pub fn client_config(mode: &TlsMode) -> Result<ClientConfig, ProxyError> {
        let provider = Arc::new(ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| {
                ProxyError::Config(format!("Failed to select TLS protocol versions: {}", e))
            })?;

        match mode {
            TlsMode::SkipVerify => {
                warn!("TLS certificate verification DISABLED for upstream connections");
                Ok(builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier::new(provider)))
                    .with_no_client_auth())
            }
            TlsMode::ClientCertificate { cert_file, key_file } => {
                debug!("Loading client certificate from: {}", cert_file.display());
                debug!("Loading client private key from: {}", key_file.display());

                let certs = load_certificates(cert_file)?;
                let key = load_private_key(key_file)?;

                builder
                    .with_root_certificates(native_roots())
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| {
                        ProxyError::CertificateLoad(format!("Invalid certificate/key pair: {}", e))
                    })
            }
        }
    }

    /// Builds the shared outbound transport.
    pub fn build(mode: &TlsMode, connect_timeout: Duration) -> Result<Transport, ProxyError> {
        let tls_config = Self::client_config(mode)?;

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(Some(connect_timeout));

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        info!("Outbound transport ready ({})", match mode {
            TlsMode::SkipVerify => "skip-verify",
            TlsMode::ClientCertificate { .. } => "client certificate",
        });

        Ok(Client::builder(TokioExecutor::new()).build(https_connector))
    }
}

fn native_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        warn!("Failed to load a native root certificate: {}", e);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!("Loaded {} native root certificates ({} ignored)", added, ignored);
    if roots.is_empty() {
        warn!("No native root certificates available; upstream verification will fail");
    }
    roots
}

/// Loads a PEM certificate chain.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
    let file = File::open(path).map_err(|e| {
        ProxyError::CertificateLoad(format!(
            "Failed to open certificate file '{}': {}",
            path.display(),
            e
        ))
    })?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::CertificateLoad(format!("Failed to read certificate: {}", e)))?;

    if certs.is_empty() {
        return Err(ProxyError::CertificateLoad(format!(
            "No valid certificate found in '{}'",
            path.display()
        )));
    }

    Ok(certs)
}

/// Loads a PEM private key (PKCS#8, PKCS#1 or SEC1).
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ProxyError> {
    let file = File::open(path).map_err(|e| {
        ProxyError::CertificateLoad(format!(
            "Failed to open private key file '{}': {}",
            path.display(),
            e
        ))
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ProxyError::CertificateLoad(format!("Failed to read private key: {}", e)))?
        .ok_or_else(|| {
            ProxyError::CertificateLoad(format!(
                "No valid private key found in '{}'",
                path.display()
            ))
        })
}
