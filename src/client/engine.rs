//! `rustls`-backed secure engine and client TLS configuration.
//!
//! # Responsibilities
//! - Adapt `rustls::ClientConnection` to the [`SecureEngine`] contract
//! - Build the client `rustls::ClientConfig` from PEM trust anchors
//! - Optionally accept any server certificate for closed test environments

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConnection, DigitallySignedStruct, ProtocolVersion, RootCertStore, SignatureScheme};

use crate::client::secure::{DelegatedTask, EngineResult, EngineStatus, HandshakeStatus, SecureEngine};
use crate::error::{Result, TunnelError};

/// Largest plaintext fragment in one TLS record.
const MAX_FRAGMENT_LEN: usize = 16 * 1024;

/// Record header, MAC/tag, padding and explicit IV overhead on top of the fragment.
const RECORD_OVERHEAD: usize = 325;

/// Trust settings for the tunnel hop.
#[derive(Debug, Clone, Default)]
pub struct ClientTlsOptions<'a> {
    /// PEM bundle of trusted roots.
    pub ca_file: Option<&'a Path>,
    /// Accept any server certificate.
    pub insecure_skip_verify: bool,
}

/// Build a client configuration for the tunnel hop.
pub fn client_config(options: &ClientTlsOptions<'_>) -> Result<Arc<rustls::ClientConfig>> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(TunnelError::tls)?;

    let config = if options.insecure_skip_verify {
        tracing::warn!("Server certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
            .with_no_client_auth()
    } else {
        let ca_file = options
            .ca_file
            .ok_or_else(|| TunnelError::tls("no trust anchors configured"))?;
        builder
            .with_root_certificates(load_roots(ca_file)?)
            .with_no_client_auth()
    };

    Ok(Arc::new(config))
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert?).map_err(TunnelError::tls)?;
    }
    if roots.is_empty() {
        return Err(TunnelError::tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    tracing::debug!(path = %path.display(), roots = roots.len(), "Loaded trust anchors");
    Ok(roots)
}

/// Accepts every certificate but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// [`SecureEngine`] over a `rustls` client session.
pub struct RustlsEngine {
    conn: ClientConnection,
    outbound_closed: bool,
}

impl RustlsEngine {
    pub fn new(config: Arc<rustls::ClientConfig>, server_name: &str) -> Result<Self> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| TunnelError::tls(format!("invalid server name {server_name:?}: {e}")))?;
        let conn = ClientConnection::new(config, name).map_err(TunnelError::tls)?;
        Ok(Self {
            conn,
            outbound_closed: false,
        })
    }

    /// Protocol version agreed during the handshake.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.conn.protocol_version()
    }

    fn drain_plaintext(&mut self, dst: &mut [u8]) -> Result<Option<usize>> {
        match self.conn.reader().read(dst) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Some(0)),
            Err(e) => Err(TunnelError::tls(e)),
        }
    }
}

impl SecureEngine for RustlsEngine {
    fn packet_buffer_size(&self) -> usize {
        MAX_FRAGMENT_LEN + RECORD_OVERHEAD
    }

    fn application_buffer_size(&self) -> usize {
        MAX_FRAGMENT_LEN
    }

    fn begin_handshake(&mut self) -> Result<()> {
        // The ClientHello is queued when the session is created
        Ok(())
    }

    fn handshake_status(&self) -> HandshakeStatus {
        if self.conn.wants_write() {
            HandshakeStatus::NeedOutput
        } else if self.conn.is_handshaking() {
            HandshakeStatus::NeedInput
        } else {
            HandshakeStatus::Finished
        }
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        None
    }

    fn encrypt(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult> {
        let mut consumed = 0;
        if !self.conn.wants_write() {
            if self.outbound_closed {
                return Ok(EngineResult::status(EngineStatus::Closed));
            }
            if !src.is_empty() {
                let take = src.len().min(MAX_FRAGMENT_LEN);
                consumed = self.conn.writer().write(&src[..take])?;
            }
        }
        if !self.conn.wants_write() {
            return Ok(EngineResult::ok(consumed, 0));
        }
        if dst.is_empty() {
            return Ok(EngineResult {
                status: EngineStatus::BufferOverflow,
                consumed,
                produced: 0,
            });
        }

        let mut out = &mut dst[..];
        let produced = self.conn.write_tls(&mut out)?;
        Ok(EngineResult::ok(consumed, produced))
    }

    fn decrypt(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult> {
        if !dst.is_empty() {
            match self.drain_plaintext(dst)? {
                Some(0) => {}
                Some(n) => return Ok(EngineResult::ok(0, n)),
                None => return Ok(EngineResult::status(EngineStatus::Closed)),
            }
        }
        if src.is_empty() {
            return Ok(EngineResult::status(EngineStatus::BufferUnderflow));
        }

        let mut input = src;
        let consumed = self.conn.read_tls(&mut input)?;
        let io_state = self.conn.process_new_packets().map_err(TunnelError::tls)?;

        let produced = if dst.is_empty() {
            0
        } else {
            match self.drain_plaintext(dst)? {
                Some(n) => n,
                None => {
                    return Ok(EngineResult {
                        status: EngineStatus::Closed,
                        consumed,
                        produced: 0,
                    })
                }
            }
        };
        if produced == 0 && io_state.peer_has_closed() && io_state.plaintext_bytes_to_read() == 0 {
            return Ok(EngineResult {
                status: EngineStatus::Closed,
                consumed,
                produced: 0,
            });
        }
        Ok(EngineResult::ok(consumed, produced))
    }

    fn close_outbound(&mut self) {
        if !self.outbound_closed {
            self.conn.send_close_notify();
            self.outbound_closed = true;
        }
    }

    fn has_pending_output(&self) -> bool {
        self.conn.wants_write()
    }

    fn allows_post_handshake_messages(&self) -> bool {
        self.conn.protocol_version() == Some(ProtocolVersion::TLSv1_3)
    }
}
