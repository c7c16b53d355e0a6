// Shared transport configuration for the websocket link and the HTTP discovery.
//
// Both paths honour the same TLS mode. The websocket side builds a rustls
// client config directly; discovery hands the mode to reqwest.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::ClientRequestBuilder;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Error;

/// Websocket path on the Miniserver.
pub const WS_PATH: &str = "/ws/rfc6455";

/// Subprotocol the Miniserver requires on the upgrade.
pub const WS_SUBPROTOCOL: &str = "remotecontrol";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// TLS verification mode (api-level mirror of core's TlsVerification).
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Bundled webpki roots.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (for self-signed Miniservers).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("loxone-rs/", env!("CARGO_PKG_VERSION")));

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// rustls connector for `wss://`, or `None` to use the bundled roots.
    fn connector(&self) -> Result<Option<Connector>, Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?;

        let config = match &self.tls {
            TlsMode::System => return Ok(None),
            TlsMode::CustomCa(path) => {
                let mut roots = RootCertStore::empty();
                let certs = CertificateDer::pem_file_iter(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                for cert in certs {
                    let cert = cert.map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                    roots
                        .add(cert)
                        .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                }
                builder.with_root_certificates(roots).with_no_client_auth()
            }
            TlsMode::DangerAcceptInvalid => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
                .with_no_client_auth(),
        };
        Ok(Some(Connector::Rustls(Arc::new(config))))
    }
}

/// `ws[s]://host:port/ws/rfc6455`.
pub fn websocket_url(host: &str, port: u16, use_tls: bool) -> Result<Url, Error> {
    let scheme = if use_tls { "wss" } else { "ws" };
    Ok(Url::parse(&format!("{scheme}://{host}:{port}{WS_PATH}"))?)
}

/// `http[s]://host:port/`.
pub fn http_base_url(host: &str, port: u16, use_tls: bool) -> Result<Url, Error> {
    let scheme = if use_tls { "https" } else { "http" };
    Ok(Url::parse(&format!("{scheme}://{host}:{port}/"))?)
}

/// Open the websocket with the `remotecontrol` subprotocol.
pub async fn connect_websocket(url: &Url, transport: &TransportConfig) -> Result<WsStream, Error> {
    tracing::debug!(url = %url, "opening websocket");

    let uri: Uri = url
        .as_str()
        .parse()
        .map_err(|e: tokio_tungstenite::tungstenite::http::uri::InvalidUri| {
            Error::WebSocketConnect(e.to_string())
        })?;
    let request = ClientRequestBuilder::new(uri).with_sub_protocol(WS_SUBPROTOCOL);
    let connector = if url.scheme() == "wss" {
        transport.connector()?
    } else {
        None
    };

    let connect =
        tokio_tungstenite::connect_async_tls_with_config(request, None, true, connector);
    let (stream, _response) = tokio::time::timeout(transport.timeout, connect)
        .await
        .map_err(|_| Error::timeout(transport.timeout))?
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::debug!("websocket open");
    Ok(stream)
}

// ── Certificate verification ─────────────────────────────────────────

/// Verifier that trusts any server certificate but still checks
/// handshake signatures.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
