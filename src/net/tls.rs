//! TLS configuration and certificate loading.

use std::path::Path;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;
use crate::net::transport::Security;

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }

    RustlsConfig::from_pem_file(cert_path, key_path).await
}

/// Build the acceptor for a TLS listener. Only HTTP/1.1 is offered over ALPN.
pub async fn load_tls_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, std::io::Error> {
    let rustls = load_tls_config(Path::new(&config.cert_path), Path::new(&config.key_path)).await?;
    let mut server_config = (*rustls.get_inner()).clone();
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Security mode for a listener: TLS when configured, plain otherwise.
pub async fn security_for(tls: Option<&TlsConfig>) -> Result<Security, std::io::Error> {
    match tls {
        Some(config) => Ok(Security::Tls(load_tls_acceptor(config).await?)),
        None => Ok(Security::Plain),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_certificate_is_not_found() {
        let config = TlsConfig {
            cert_path: "/nonexistent/server.crt".to_string(),
            key_path: "/nonexistent/server.key".to_string(),
        };
        match load_tls_acceptor(&config).await {
            Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            Ok(_) => panic!("expected missing certificate error"),
        }
    }

    #[tokio::test]
    async fn plain_listener_without_tls() {
        let security = security_for(None).await.unwrap();
        assert!(!security.is_secure());
    }
}
