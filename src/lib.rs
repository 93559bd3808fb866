//! Certforge - Certificate Authority Hierarchy Core
//!
//! The engineering core of a CA management system: X.509 certificate
//! issuance, delegated signing authority among CA operators, a CSR review
//! workflow, and an encrypted private-key vault.
//!
//! # Overview
//!
//! Certforge implements a traditional PKI hierarchy over an abstract store:
//!
//! ```text
//! Root CA (self-signed, issued by an admin)
//!   └── Intermediate CA (signed under the root, assignable to CA operators)
//!       └── End-entity certificate (direct signing or CSR approval)
//! ```
//!
//! Authorization is graph-based, not ownership-based: a CA operator may
//! sign with exactly the certificates an administrator assigned to them
//! plus everything those certificates transitively issued. Owning a CA
//! certificate that sits outside the assigned chain grants nothing.
//!
//! # Module Overview
//!
//! ## [`model`] / [`store`] / [`memory`]
//!
//! Domain records (certificates, assignments, CSRs, vault entries), the
//! sync persistence contracts the host implements, and an in-memory
//! reference store for tests and small embedders.
//!
//! ## [`issuer`]
//!
//! Pure X.509v3 construction: self-signed roots, CA-signed certificates,
//! and CSR-based end-entity issuance, with random 128-bit serials and
//! validity clamped to the parent's window.
//!
//! ## [`trust`]
//!
//! The CA assignment engine: grants, idempotent revocation, breadth-first
//! chain expansion over the issuance graph, and the single `authorize`
//! policy function all call sites share.
//!
//! ## [`workflow`]
//!
//! The CSR state machine (`Pending -> Approved | Rejected`, reviewed
//! exactly once) with role-scoped visibility.
//!
//! ## [`vault`]
//!
//! Two-password key containers: PBKDF2-derived AES-256-CBC protection for
//! per-CA container secrets, per-user key material derived from a
//! process-wide master secret.
//!
//! ## [`export`]
//!
//! PEM/DER export and PKCS#12 keystore bundling under caller-supplied
//! passwords.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use certforge::config::{MasterSecret, RootDnDefaults};
//! use certforge::issuer::CertificateIssuer;
//! use certforge::memory::MemoryStore;
//! use certforge::model::{User, UserRole};
//! use certforge::service::CertificateService;
//! use certforge::trust::TrustGraph;
//! use certforge::vault::KeyVault;
//! use uuid::Uuid;
//!
//! # fn main() -> certforge::error::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let trust = TrustGraph::new(store.clone(), store.clone(), store.clone());
//! let vault = KeyVault::new(
//!     store.clone(),
//!     store.clone(),
//!     MasterSecret::from_value("operator-supplied secret".into()),
//! );
//! let service = CertificateService::new(
//!     store.clone(),
//!     store.clone(),
//!     trust.clone(),
//!     CertificateIssuer::new(RootDnDefaults::default()),
//!     vault,
//! );
//!
//! let admin = User {
//!     id: Uuid::new_v4(),
//!     role: UserRole::Admin,
//!     organization: "Acme".into(),
//! };
//! store.put_user(admin.clone());
//!
//! let root = service.issue_root_certificate(admin.id, "Acme Root CA")?;
//! println!("issued root CA with serial {}", root.serial_number);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Every operation returns [`error::Result`] with the closed
//! [`error::PkiError`] taxonomy. Validation and authorization failures are
//! detected before any mutation; multi-step issuance surfaces failures
//! after the point of no return instead of leaving a CA without a
//! retrievable key. Error messages never contain key material.

pub mod config;
pub mod error;
pub mod export;
pub mod issuer;
pub mod memory;
pub mod model;
pub mod service;
pub mod store;
pub mod trust;
pub mod vault;
pub mod workflow;

pub use config::{AppConfig, MasterSecret};
pub use error::{PkiError, Result};
pub use export::{CertificateExporter, ExportFormat};
pub use issuer::CertificateIssuer;
pub use model::{
    CaAssignment, Certificate, CertificateRequest, CertificateSigningRequest, CertificateType,
    CsrStatus, CsrSubmission, ReviewDecision, User, UserRole, VaultEntry,
};
pub use service::CertificateService;
pub use trust::{CaAction, TrustGraph};
pub use vault::KeyVault;
pub use workflow::{CsrWorkflow, SubmittedCsr};
