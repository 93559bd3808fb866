//! Domain model: certificates, assignments, signing requests, vault entries
//! and the users acting on them.
//!
//! All records are plain data owned by the store. Relations between
//! certificates are kept as serial-number references rather than nested
//! object graphs, so traversals stay iterative and bounded even over
//! corrupted data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::PkiError;

/// Role of an operator as reported by the external user directory.
///
/// Parsed once at the system boundary via [`FromStr`]; business logic only
/// ever matches on the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    /// Regular user: may submit CSRs and view their own records.
    User,
    /// CA operator: signs within their assigned chain, reviews CSRs of
    /// their organization.
    Ca,
    /// Administrator: full authority, no chain checks.
    Admin,
}

impl FromStr for UserRole {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Ok(UserRole::User),
            "CA" => Ok(UserRole::Ca),
            "ADMIN" => Ok(UserRole::Admin),
            other => Err(PkiError::Validation(format!(
                "invalid role: {other}. Valid roles are: USER, CA, ADMIN"
            ))),
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::User => write!(f, "USER"),
            UserRole::Ca => write!(f, "CA"),
            UserRole::Admin => write!(f, "ADMIN"),
        }
    }
}

/// An acting identity, as resolved by the external user directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub role: UserRole,
    pub organization: String,
}

/// Position of a certificate in the trust hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateType {
    RootCa,
    IntermediateCa,
    EndEntity,
}

impl CertificateType {
    /// Whether certificates of this type carry CA authority.
    pub fn is_ca(self) -> bool {
        matches!(self, CertificateType::RootCa | CertificateType::IntermediateCa)
    }
}

/// A stored certificate record.
///
/// Created once by issuance and never mutated. `issuer` holds the serial
/// number of the issuing certificate, `None` only for root CAs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    /// Decimal rendering of the random 128-bit ASN.1 serial. Globally
    /// unique; doubles as the vault alias for CA certificates.
    pub serial_number: String,
    pub common_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub cert_type: CertificateType,
    pub is_ca: bool,
    pub organization: String,
    /// Owning user in the external directory.
    pub owner: Uuid,
    /// Serial number of the issuing certificate; `None` for root CAs.
    pub issuer: Option<String>,
    /// DER-encoded certificate bytes.
    pub der: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Certificate {
    /// SHA-256 fingerprint of the DER encoding, lowercase hex.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.der);
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Whether the certificate's validity window has ended.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_after < now
    }
}

/// Grant of signing authority over one CA certificate (and transitively its
/// descendants) to a CA operator.
///
/// Deactivated on revocation, never deleted. The store guarantees at most
/// one active assignment per (user, certificate) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaAssignment {
    pub id: Uuid,
    pub ca_user: Uuid,
    /// Serial number of the assigned CA certificate.
    pub ca_certificate: String,
    pub organization: String,
    pub assigned_by: Uuid,
    pub active: bool,
    pub assigned_at: DateTime<Utc>,
}

/// Review state of a certificate signing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CsrStatus {
    Pending,
    Approved,
    Rejected,
}

/// A submitted PKCS#10 signing request and its review outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateSigningRequest {
    pub id: Uuid,
    /// DER-encoded PKCS#10 request.
    pub csr_der: Vec<u8>,
    pub common_name: String,
    pub organization: String,
    pub country: String,
    pub requested_validity_days: u32,
    pub status: CsrStatus,
    pub requester: Uuid,
    pub reviewer: Option<Uuid>,
    /// Serial of the CA chosen at approval time.
    pub selected_ca: Option<String>,
    /// Serial of the certificate issued on approval.
    pub issued_certificate: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// Encrypted container secrets for one CA's key container.
///
/// `container_secret` and `key_secret` are independently encrypted
/// (IV-prepended AES-256-CBC ciphertexts): a structured two-field record,
/// not a joined string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultEntry {
    /// Owning certificate's serial number. Unique.
    pub alias: String,
    pub container_secret: Vec<u8>,
    pub key_secret: Vec<u8>,
    /// Salt for the PBKDF2 derivation protecting both secrets.
    pub salt: Vec<u8>,
    pub owner: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Key-usage bits applied to end-entity certificates. CA certificates
/// always get keyCertSign and cRLSign regardless of these flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EndEntityKeyUsage {
    pub digital_signature: bool,
    pub key_encipherment: bool,
    pub data_encipherment: bool,
}

impl Default for EndEntityKeyUsage {
    fn default() -> Self {
        Self {
            digital_signature: true,
            key_encipherment: true,
            data_encipherment: true,
        }
    }
}

impl EndEntityKeyUsage {
    pub fn is_empty(self) -> bool {
        !(self.digital_signature || self.key_encipherment || self.data_encipherment)
    }
}

/// Parameters for signing a new certificate under a parent CA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub common_name: String,
    pub organization: String,
    pub country: String,
    pub organizational_unit: Option<String>,
    pub locality: Option<String>,
    pub state: Option<String>,
    /// `IntermediateCa` or `EndEntity`; roots are issued separately.
    pub certificate_type: CertificateType,
    pub validity_days: u32,
    /// Serial number of the CA to sign under.
    pub parent_ca_serial: String,
    /// Entries typed by prefix: `DNS:` or `IP:`; unprefixed entries are
    /// treated as DNS names.
    pub subject_alternative_names: Vec<String>,
    #[serde(default)]
    pub key_usage: EndEntityKeyUsage,
}

impl CertificateRequest {
    /// Field-level checks performed before any lookup or mutation.
    pub fn validate(&self) -> Result<(), PkiError> {
        if self.common_name.trim().is_empty() {
            return Err(PkiError::Validation("common name must not be blank".into()));
        }
        if self.organization.trim().is_empty() {
            return Err(PkiError::Validation(
                "organization must not be blank".into(),
            ));
        }
        if self.country.trim().is_empty() {
            return Err(PkiError::Validation("country must not be blank".into()));
        }
        if self.validity_days == 0 {
            return Err(PkiError::Validation(
                "validity period must be a positive number of days".into(),
            ));
        }
        if self.certificate_type == CertificateType::RootCa {
            return Err(PkiError::Validation(
                "root CA certificates are issued directly, not signed under a parent".into(),
            ));
        }
        if self.certificate_type == CertificateType::EndEntity && self.key_usage.is_empty() {
            return Err(PkiError::Validation(
                "end-entity certificates need at least one key usage".into(),
            ));
        }
        for san in &self.subject_alternative_names {
            if let Some(ip) = san.strip_prefix("IP:") {
                if ip.parse::<std::net::IpAddr>().is_err() {
                    return Err(PkiError::Validation(format!(
                        "invalid IP subject alternative name: {san}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Parameters for submitting a certificate signing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrSubmission {
    pub common_name: String,
    pub organization: String,
    pub country: String,
    pub validity_days: u32,
}

impl CsrSubmission {
    pub fn validate(&self) -> Result<(), PkiError> {
        if self.common_name.trim().is_empty() {
            return Err(PkiError::Validation("common name must not be blank".into()));
        }
        if self.organization.trim().is_empty() {
            return Err(PkiError::Validation(
                "organization must not be blank".into(),
            ));
        }
        if self.validity_days == 0 {
            return Err(PkiError::Validation(
                "validity period must be a positive number of days".into(),
            ));
        }
        Ok(())
    }
}

/// A reviewer's verdict on a pending CSR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub approve: bool,
    /// Required when approving.
    pub selected_ca_serial: Option<String>,
    /// Required (non-blank) when rejecting.
    pub rejection_reason: Option<String>,
}
