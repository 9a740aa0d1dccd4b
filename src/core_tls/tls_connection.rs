//! TLS context for both channel roles: the server-side acceptor used for
//! `AUTH TLS` and protected data connections, and a client-side connector
//! for data sockets where SSCN/CPSV put us in the client role. The
//! connector skips certificate verification; FXP partners routinely run
//! self-signed certificates.

use crate::core_tls::error::TlsError;
use crate::core_tls::tls_config::TlsConfig;
use std::sync::Arc;
use std::time::SystemTime;
use tokio_rustls::rustls::client::{ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::{self, Certificate, ServerName};
use tokio_rustls::{TlsAcceptor, TlsConnector};

struct InsecureVerifier;

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

#[derive(Clone)]
pub struct TlsContext {
    acceptor: TlsAcceptor,
    connector: TlsConnector,
}

impl TlsContext {
    pub fn new(config: &TlsConfig) -> Result<Self, TlsError> {
        config.validate()?;
        if !config.enabled {
            return Err(TlsError::TlsNotConfigured);
        }

        let certs = std::fs::read(&config.cert_file)
            .map_err(|e| TlsError::CertificateLoadError(e.to_string()))?;
        let key = std::fs::read(&config.key_file)
            .map_err(|e| TlsError::PrivateKeyLoadError(e.to_string()))?;

        let cert_chain = rustls_pemfile::certs(&mut &certs[..])
            .map_err(|e| TlsError::CertificateLoadError(e.to_string()))?;
        let mut keys = rustls_pemfile::pkcs8_private_keys(&mut &key[..])
            .map_err(|e| TlsError::PrivateKeyLoadError(e.to_string()))?;
        let private_key = keys
            .pop()
            .ok_or_else(|| TlsError::PrivateKeyLoadError("No private key found".to_string()))?;

        let cert_chain: Vec<rustls::Certificate> =
            cert_chain.into_iter().map(rustls::Certificate).collect();
        let private_key = rustls::PrivateKey(private_key);

        let server_config = rustls::ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(|e| TlsError::TlsConfigError(e.to_string()))?;

        let client_config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
            .with_no_client_auth();

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(server_config)),
            connector: TlsConnector::from(Arc::new(client_config)),
        })
    }

    pub fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }

    pub fn connector(&self) -> &TlsConnector {
        &self.connector
    }
}
