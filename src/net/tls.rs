//! Server TLS material for the tunnel hop.

use std::io;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

/// Load the listener certificate chain and private key (PEM).
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> io::Result<RustlsConfig> {
    for (what, path) in [("Certificate", cert_path), ("Private key", key_path)] {
        if !path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{what} file not found: {}", path.display()),
            ));
        }
    }

    // more than one provider may be compiled in; pin the one the client uses
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = RustlsConfig::from_pem_file(cert_path, key_path).await?;
    tracing::info!(cert = %cert_path.display(), "Loaded listener TLS certificate");
    Ok(config)
}
