//! Export of stored certificates as PEM, DER, or PKCS#12 keystores.
//!
//! Thin consumers of the core's outputs: the raw DER bytes come straight
//! from the store, PEM is the standard base64 wrapping, and keystore export
//! rebuilds a fresh PKCS#12 under a caller-supplied password, never the
//! vault's internal secrets.

use std::sync::Arc;

use openssl::pkcs12::Pkcs12;
use openssl::stack::Stack;
use openssl::x509::X509;
use serde::{Deserialize, Serialize};

use crate::error::{PkiError, Result};
use crate::service::CertificateService;

/// Wire format for certificate export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Pem,
    Der,
}

/// Read-side export over the service's store and vault.
pub struct CertificateExporter {
    service: Arc<CertificateService>,
}

impl CertificateExporter {
    pub fn new(service: Arc<CertificateService>) -> Self {
        Self { service }
    }

    /// The certificate bytes in the requested format. DER is the stored
    /// encoding verbatim; PEM wraps it in the standard
    /// `-----BEGIN CERTIFICATE-----` armor with 64-column lines.
    pub fn export_certificate(&self, serial: &str, format: ExportFormat) -> Result<Vec<u8>> {
        let record = self
            .service
            .certificates()
            .find_by_serial(serial)?
            .ok_or_else(|| PkiError::not_found("certificate", serial))?;

        match format {
            ExportFormat::Der => Ok(record.der),
            ExportFormat::Pem => Ok(X509::from_der(&record.der)?.to_pem()?),
        }
    }

    /// Build a password-protected PKCS#12 keystore for `serial`.
    ///
    /// CA certificates are bundled with their private key from the vault;
    /// certificates without vaulted keys export as certificate-only
    /// bundles. `password` comes from the caller and is unrelated to the
    /// vault's container secrets.
    pub fn export_keystore(&self, serial: &str, password: &str) -> Result<Vec<u8>> {
        let record = self
            .service
            .certificates()
            .find_by_serial(serial)?
            .ok_or_else(|| PkiError::not_found("certificate", serial))?;
        let certificate = X509::from_der(&record.der)?;

        let vault = self.service.vault();
        let mut builder = Pkcs12::builder();
        builder.name(&record.serial_number);
        if vault.contains(&record.serial_number)? {
            let private_key = vault.private_key(&record.serial_number)?;
            builder.pkey(&private_key);
            builder.cert(&certificate);
            let pkcs12 = builder.build2(password)?;
            Ok(pkcs12.to_der()?)
        } else {
            let mut chain = Stack::new()?;
            chain.push(certificate)?;
            builder.ca(chain);
            let pkcs12 = builder.build2(password)?;
            Ok(pkcs12.to_der()?)
        }
    }
}
