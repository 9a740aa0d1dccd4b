use crate::core_tls::error::TlsError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Whether TLS support is offered at all (`AUTH TLS`, `PROT P`).
    pub enabled: bool,

    /// Path to the PEM certificate chain.
    pub cert_file: PathBuf,

    /// Path to the PEM PKCS#8 private key.
    pub key_file: PathBuf,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_file: PathBuf::from("etc/ssl/cert.pem"),
            key_file: PathBuf::from("etc/ssl/key.pem"),
        }
    }
}

impl TlsConfig {
    pub fn validate(&self) -> Result<(), TlsError> {
        if self.enabled {
            if !self.cert_file.exists() {
                return Err(TlsError::CertificateLoadError(format!(
                    "Certificate file not found: {:?}",
                    self.cert_file
                )));
            }

            if !self.key_file.exists() {
                return Err(TlsError::PrivateKeyLoadError(format!(
                    "Private key file not found: {:?}",
                    self.key_file
                )));
            }
        }

        Ok(())
    }
}
