//! X.509v3 certificate construction.
//!
//! Pure cryptographic building: given subject data and issuer key material
//! this module produces signed certificate bytes. It never touches the
//! store or the vault; authorization and persistence are the caller's job.
//!
//! # Certificate profiles
//! - **Root CA**: self-signed, critical BasicConstraints CA, critical
//!   KeyUsage keyCertSign|cRLSign, non-critical SubjectKeyIdentifier and
//!   self-referential AuthorityKeyIdentifier, fixed ten-year validity.
//! - **Intermediate CA**: as root, but signed by the parent and clamped to
//!   the parent's validity window.
//! - **End entity**: BasicConstraints without CA, KeyUsage per request
//!   flags (digitalSignature, keyEncipherment, dataEncipherment), optional
//!   SubjectAlternativeName entries.
//!
//! Serial numbers are random 128-bit ASN.1 unsigned integers; a decimal
//! rendering of the same value keys the store and the vault.

use chrono::{DateTime, Duration, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, PKey, PKeyRef, Private};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509, X509Name, X509NameRef, X509Req};

use crate::config::RootDnDefaults;
use crate::error::{PkiError, Result};
use crate::model::{CertificateRequest, CertificateType, EndEntityKeyUsage};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const RSA_KEY_SIZE: u32 = 2048;
const SERIAL_BITS: i32 = 128;

/// Validity of self-issued root CAs, in days (ten years).
pub const ROOT_CA_VALIDITY_DAYS: i64 = 3650;

/// Output of an issuance: the signed certificate plus the key pair that was
/// generated for it. `key_pair` is `None` on the CSR path, where the
/// requester already holds the private key.
#[derive(Debug)]
pub struct IssuedCertificate {
    pub serial_number: String,
    pub der: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub key_pair: Option<PKey<Private>>,
}

/// Generate a fresh RSA key pair for a new certificate subject.
pub fn generate_key_pair() -> Result<PKey<Private>> {
    let rsa = openssl::rsa::Rsa::generate(RSA_KEY_SIZE)?;
    Ok(PKey::from_rsa(rsa)?)
}

/// Random 128-bit serial number, returned as (ASN.1 source, decimal key).
fn generate_serial() -> Result<(BigNum, String)> {
    let mut serial = BigNum::new()?;
    serial.rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;
    let decimal = serial.to_dec_str()?.to_string();
    Ok((serial, decimal))
}

/// Pure X.509 builder. Holds only the DN defaults applied to root CAs.
#[derive(Debug, Clone)]
pub struct CertificateIssuer {
    root_dn: RootDnDefaults,
}

impl CertificateIssuer {
    pub fn new(root_dn: RootDnDefaults) -> Self {
        Self { root_dn }
    }

    /// Build a self-signed root CA certificate with a fresh key pair.
    pub fn issue_root(&self, common_name: &str) -> Result<IssuedCertificate> {
        if common_name.trim().is_empty() {
            return Err(PkiError::Validation("common name must not be blank".into()));
        }

        let key_pair = generate_key_pair()?;
        let (serial, serial_number) = generate_serial()?;
        let not_before = Utc::now();
        let not_after = not_before + Duration::days(ROOT_CA_VALIDITY_DAYS);

        let mut name = X509Name::builder()?;
        name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, &self.root_dn.organization)?;
        name.append_entry_by_nid(Nid::COUNTRYNAME, &self.root_dn.country)?;
        let name = name.build();

        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;
        builder.set_serial_number(&*serial.to_asn1_integer()?)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_not_before(&*Asn1Time::from_unix(not_before.timestamp())?)?;
        builder.set_not_after(&*Asn1Time::from_unix(not_after.timestamp())?)?;
        builder.set_pubkey(&key_pair)?;

        let mut bc = BasicConstraints::new();
        bc.critical().ca();
        builder.append_extension(bc.build()?)?;

        let mut ku = KeyUsage::new();
        ku.critical().key_cert_sign().crl_sign();
        builder.append_extension(ku.build()?)?;

        // SKI first: the self-referential AKI below is derived from it.
        let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
        builder.append_extension(ski)?;
        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(None, None))?;
        builder.append_extension(aki)?;

        builder.sign(&key_pair, MessageDigest::sha256())?;
        let der = builder.build().to_der()?;

        Ok(IssuedCertificate {
            serial_number,
            der,
            not_before,
            not_after,
            key_pair: Some(key_pair),
        })
    }

    /// Sign a certificate under a parent CA, generating a fresh key pair
    /// for the subject.
    ///
    /// The caller has already verified that the parent is an unexpired CA
    /// and that the actor is authorized; this method only builds. The
    /// validity window is clamped to the parent's `not_after`.
    pub fn sign(
        &self,
        request: &CertificateRequest,
        parent_cert: &X509,
        parent_key: &PKey<Private>,
        parent_not_after: DateTime<Utc>,
    ) -> Result<IssuedCertificate> {
        let key_pair = generate_key_pair()?;
        let subject = subject_name_from_request(request)?;
        let is_ca = request.certificate_type == CertificateType::IntermediateCa;

        let issued = self.build_signed(
            &subject,
            &key_pair,
            request.validity_days,
            is_ca,
            request.key_usage,
            &request.subject_alternative_names,
            parent_cert,
            parent_key,
            parent_not_after,
        )?;

        Ok(IssuedCertificate {
            key_pair: Some(key_pair),
            ..issued
        })
    }

    /// Sign an end-entity certificate from a PKCS#10 request.
    ///
    /// The CSR's embedded self-signature is verified against its own
    /// declared public key before anything else; subject and public key are
    /// then lifted from the request. The requester's private key never
    /// passes through here, and the CSR path never grants CA status.
    pub fn sign_from_csr(
        &self,
        csr_der: &[u8],
        requested_validity_days: u32,
        parent_cert: &X509,
        parent_key: &PKey<Private>,
        parent_not_after: DateTime<Utc>,
    ) -> Result<IssuedCertificate> {
        let req = X509Req::from_der(csr_der)
            .map_err(|e| PkiError::Crypto(format!("malformed PKCS#10 request: {e}")))?;
        let requester_key = req.public_key()?;
        if !req.verify(&requester_key)? {
            return Err(PkiError::Crypto("CSR signature is invalid".into()));
        }

        let mut subject = X509Name::builder()?;
        copy_name_entries(req.subject_name(), &mut subject)?;
        let subject = subject.build();

        self.build_signed(
            &subject,
            &requester_key,
            requested_validity_days,
            false,
            EndEntityKeyUsage::default(),
            &[],
            parent_cert,
            parent_key,
            parent_not_after,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build_signed<T: HasPublic>(
        &self,
        subject: &X509Name,
        subject_key: &PKeyRef<T>,
        requested_validity_days: u32,
        is_ca: bool,
        key_usage: EndEntityKeyUsage,
        subject_alternative_names: &[String],
        parent_cert: &X509,
        parent_key: &PKey<Private>,
        parent_not_after: DateTime<Utc>,
    ) -> Result<IssuedCertificate> {
        let (serial, serial_number) = generate_serial()?;
        let (not_before, not_after) =
            validity_window(requested_validity_days, parent_not_after);

        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;
        builder.set_serial_number(&*serial.to_asn1_integer()?)?;
        builder.set_subject_name(subject)?;
        builder.set_issuer_name(parent_cert.subject_name())?;
        builder.set_not_before(&*Asn1Time::from_unix(not_before.timestamp())?)?;
        builder.set_not_after(&*Asn1Time::from_unix(not_after.timestamp())?)?;
        builder.set_pubkey(subject_key)?;

        let mut bc = BasicConstraints::new();
        bc.critical();
        if is_ca {
            bc.ca();
        }
        builder.append_extension(bc.build()?)?;

        let mut ku = KeyUsage::new();
        ku.critical();
        if is_ca {
            ku.key_cert_sign().crl_sign();
        } else {
            if key_usage.digital_signature {
                ku.digital_signature();
            }
            if key_usage.key_encipherment {
                ku.key_encipherment();
            }
            if key_usage.data_encipherment {
                ku.data_encipherment();
            }
        }
        builder.append_extension(ku.build()?)?;

        let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(Some(parent_cert), None))?;
        builder.append_extension(ski)?;
        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(Some(parent_cert), None))?;
        builder.append_extension(aki)?;

        if !subject_alternative_names.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for entry in subject_alternative_names {
                if let Some(dns) = entry.strip_prefix("DNS:") {
                    san.dns(dns);
                } else if let Some(ip) = entry.strip_prefix("IP:") {
                    san.ip(ip);
                } else {
                    // Unprefixed entries are treated as DNS names.
                    san.dns(entry);
                }
            }
            let san = san.build(&builder.x509v3_context(Some(parent_cert), None))?;
            builder.append_extension(san)?;
        }

        builder.sign(parent_key, MessageDigest::sha256())?;
        let der = builder.build().to_der()?;

        Ok(IssuedCertificate {
            serial_number,
            der,
            not_before,
            not_after,
            key_pair: None,
        })
    }
}

/// Clamp the requested validity to the parent CA's expiration.
fn validity_window(
    requested_days: u32,
    parent_not_after: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let not_before = Utc::now();
    let requested = not_before + Duration::days(i64::from(requested_days));
    if requested > parent_not_after {
        tracing::warn!(
            clamped_to = %parent_not_after,
            "certificate validity adjusted to parent CA expiration date"
        );
        (not_before, parent_not_after)
    } else {
        (not_before, requested)
    }
}

fn subject_name_from_request(request: &CertificateRequest) -> Result<X509Name> {
    let mut name = X509Name::builder()?;
    name.append_entry_by_nid(Nid::COMMONNAME, &request.common_name)?;
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, &request.organization)?;
    if let Some(ou) = &request.organizational_unit {
        name.append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, ou)?;
    }
    if let Some(locality) = &request.locality {
        name.append_entry_by_nid(Nid::LOCALITYNAME, locality)?;
    }
    if let Some(state) = &request.state {
        name.append_entry_by_nid(Nid::STATEORPROVINCENAME, state)?;
    }
    name.append_entry_by_nid(Nid::COUNTRYNAME, &request.country)?;
    Ok(name.build())
}

fn copy_name_entries(from: &X509NameRef, to: &mut openssl::x509::X509NameBuilder) -> Result<()> {
    for entry in from.entries() {
        let text = entry
            .data()
            .as_utf8()
            .map_err(|e| PkiError::Crypto(format!("undecodable CSR subject entry: {e}")))?;
        to.append_entry_by_nid(entry.object().nid(), &text)?;
    }
    Ok(())
}

/// Build and self-sign a PKCS#10 request for `key_pair`. Used by the CSR
/// workflow on submission.
pub fn build_csr(
    common_name: &str,
    organization: &str,
    country: &str,
    key_pair: &PKey<Private>,
) -> Result<Vec<u8>> {
    let mut name = X509Name::builder()?;
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, organization)?;
    name.append_entry_by_nid(Nid::COUNTRYNAME, country)?;
    let name = name.build();

    let mut builder = X509Req::builder()?;
    builder.set_subject_name(&name)?;
    builder.set_pubkey(key_pair)?;
    builder.sign(key_pair, MessageDigest::sha256())?;
    Ok(builder.build().to_der()?)
}
