//! Persistence contracts consumed by the core.
//!
//! The core never touches a database directly: certificates, assignments,
//! CSRs and vault entries live behind these traits, and key-container blobs
//! behind [`BlobStore`]. Hosts bring their own implementations; the crate
//! ships [`crate::memory::MemoryStore`] as an in-memory reference and
//! [`FsBlobStore`] for on-disk key containers.
//!
//! All operations are synchronous. Implementations must be safe to share
//! across threads.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use uuid::Uuid;

use crate::error::{PkiError, Result};
use crate::model::{CaAssignment, Certificate, CertificateSigningRequest, CsrStatus, User, VaultEntry};

/// Certificate persistence, keyed by serial number.
pub trait CertificateStore: Send + Sync {
    /// Insert a new certificate. Fails with [`PkiError::State`] if the
    /// serial number already exists.
    fn save(&self, certificate: Certificate) -> Result<Certificate>;

    fn find_by_serial(&self, serial: &str) -> Result<Option<Certificate>>;

    /// All certificates whose issuer serial is in `serials`. This is the
    /// one query chain expansion needs; it must not follow references
    /// recursively itself.
    fn find_by_issuer_in(&self, serials: &HashSet<String>) -> Result<Vec<Certificate>>;

    fn find_by_owner(&self, owner: Uuid) -> Result<Vec<Certificate>>;

    /// All certificates with CA authority.
    fn find_ca_certificates(&self) -> Result<Vec<Certificate>>;

    fn find_all(&self) -> Result<Vec<Certificate>>;
}

/// CA-assignment persistence.
pub trait AssignmentStore: Send + Sync {
    /// Insert a new active assignment, atomically enforcing the "at most
    /// one active assignment per (user, certificate) pair" constraint.
    /// Fails with [`PkiError::State`] when an active duplicate exists.
    fn insert_active(&self, assignment: CaAssignment) -> Result<CaAssignment>;

    fn find_by_id(&self, id: Uuid) -> Result<Option<CaAssignment>>;

    /// Mark an assignment inactive. Returns `false` when the assignment is
    /// missing or already inactive; callers treat both as a no-op.
    fn deactivate(&self, id: Uuid) -> Result<bool>;

    fn find_active_by_user(&self, user: Uuid) -> Result<Vec<CaAssignment>>;

    fn find_active_by_organization(&self, organization: &str) -> Result<Vec<CaAssignment>>;
}

/// CSR persistence. `save` inserts or replaces by id; the review workflow
/// relies on replace to publish the reviewed record.
pub trait CsrStore: Send + Sync {
    fn save(&self, csr: CertificateSigningRequest) -> Result<CertificateSigningRequest>;

    fn find_by_id(&self, id: Uuid) -> Result<Option<CertificateSigningRequest>>;

    /// Requests submitted by one user, newest first.
    fn find_by_requester(&self, requester: Uuid) -> Result<Vec<CertificateSigningRequest>>;

    /// Requests whose subject organization matches, newest first.
    fn find_by_organization(&self, organization: &str) -> Result<Vec<CertificateSigningRequest>>;

    fn find_by_status(&self, status: CsrStatus) -> Result<Vec<CertificateSigningRequest>>;

    fn find_all(&self) -> Result<Vec<CertificateSigningRequest>>;
}

/// Vault-entry persistence, keyed by alias (certificate serial).
pub trait VaultStore: Send + Sync {
    /// Insert a new entry. Fails with [`PkiError::State`] if the alias
    /// already exists.
    fn insert(&self, entry: VaultEntry) -> Result<()>;

    fn find_by_alias(&self, alias: &str) -> Result<Option<VaultEntry>>;

    /// Remove the entry for `alias`. Missing entries are a no-op.
    fn delete_by_alias(&self, alias: &str) -> Result<()>;
}

/// Byte-addressable storage for key-container files, keyed by alias.
pub trait BlobStore: Send + Sync {
    fn put(&self, alias: &str, bytes: &[u8]) -> Result<()>;

    fn get(&self, alias: &str) -> Result<Option<Vec<u8>>>;

    /// Remove the blob for `alias`. Missing blobs are a no-op.
    fn delete(&self, alias: &str) -> Result<()>;
}

/// Read-only lookup into the host's user identities.
pub trait UserDirectory: Send + Sync {
    fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
}

/// Filesystem-backed [`BlobStore`] writing one `<alias>.key.enc` file per
/// container under a dedicated directory.
pub struct FsBlobStore {
    directory: PathBuf,
}

impl FsBlobStore {
    /// Create the store, bootstrapping the directory if needed.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)
            .map_err(|e| PkiError::Storage(format!("failed to create key container directory: {e}")))?;
        Ok(Self { directory })
    }

    fn path_for(&self, alias: &str) -> Result<PathBuf> {
        // Aliases are certificate serial numbers (decimal digits); anything
        // else must not reach the filesystem layer.
        if alias.is_empty() || !alias.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PkiError::Validation(format!(
                "invalid key container alias: {alias}"
            )));
        }
        Ok(self.directory.join(format!("{alias}.key.enc")))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, alias: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(alias)?;
        fs::write(&path, bytes)
            .map_err(|e| PkiError::Storage(format!("failed to write key container {}: {e}", path.display())))
    }

    fn get(&self, alias: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(alias)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PkiError::Storage(format!(
                "failed to read key container {}: {e}",
                path.display()
            ))),
        }
    }

    fn delete(&self, alias: &str) -> Result<()> {
        let path = self.path_for(alias)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PkiError::Storage(format!(
                "failed to delete key container {}: {e}",
                path.display()
            ))),
        }
    }
}
