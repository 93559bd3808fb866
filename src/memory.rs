//! In-memory reference implementation of the store contracts.
//!
//! Backs the test suite and small embedders. Every trait is implemented
//! over one mutex-guarded state block, which makes the active-assignment
//! uniqueness check atomic with its insert, which is the storage-level constraint
//! the trust graph relies on.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use uuid::Uuid;

use crate::error::{PkiError, Result};
use crate::model::{CaAssignment, Certificate, CertificateSigningRequest, CsrStatus, User, VaultEntry};
use crate::store::{
    AssignmentStore, BlobStore, CertificateStore, CsrStore, UserDirectory, VaultStore,
};

#[derive(Default)]
struct State {
    certificates: HashMap<String, Certificate>,
    assignments: HashMap<Uuid, CaAssignment>,
    csrs: HashMap<Uuid, CertificateSigningRequest>,
    vault_entries: HashMap<String, VaultEntry>,
    blobs: HashMap<String, Vec<u8>>,
    users: HashMap<Uuid, User>,
}

/// Shared in-memory store implementing every persistence contract.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user in the directory. Test and bootstrap helper.
    pub fn put_user(&self, user: User) {
        self.lock().users.insert(user.id, user);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // Lock poisoning only happens after a panic mid-update; recovering
        // the inner state is still the least-wrong option for a test store.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CertificateStore for MemoryStore {
    fn save(&self, certificate: Certificate) -> Result<Certificate> {
        let mut state = self.lock();
        if state.certificates.contains_key(&certificate.serial_number) {
            return Err(PkiError::State(format!(
                "certificate serial already exists: {}",
                certificate.serial_number
            )));
        }
        state
            .certificates
            .insert(certificate.serial_number.clone(), certificate.clone());
        Ok(certificate)
    }

    fn find_by_serial(&self, serial: &str) -> Result<Option<Certificate>> {
        Ok(self.lock().certificates.get(serial).cloned())
    }

    fn find_by_issuer_in(&self, serials: &HashSet<String>) -> Result<Vec<Certificate>> {
        Ok(self
            .lock()
            .certificates
            .values()
            .filter(|c| c.issuer.as_deref().is_some_and(|i| serials.contains(i)))
            .cloned()
            .collect())
    }

    fn find_by_owner(&self, owner: Uuid) -> Result<Vec<Certificate>> {
        Ok(self
            .lock()
            .certificates
            .values()
            .filter(|c| c.owner == owner)
            .cloned()
            .collect())
    }

    fn find_ca_certificates(&self) -> Result<Vec<Certificate>> {
        Ok(self
            .lock()
            .certificates
            .values()
            .filter(|c| c.is_ca)
            .cloned()
            .collect())
    }

    fn find_all(&self) -> Result<Vec<Certificate>> {
        Ok(self.lock().certificates.values().cloned().collect())
    }
}

impl AssignmentStore for MemoryStore {
    fn insert_active(&self, assignment: CaAssignment) -> Result<CaAssignment> {
        let mut state = self.lock();
        let duplicate = state.assignments.values().any(|a| {
            a.active
                && a.ca_user == assignment.ca_user
                && a.ca_certificate == assignment.ca_certificate
        });
        if duplicate {
            return Err(PkiError::State(
                "CA certificate is already assigned to this user".into(),
            ));
        }
        state.assignments.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<CaAssignment>> {
        Ok(self.lock().assignments.get(&id).cloned())
    }

    fn deactivate(&self, id: Uuid) -> Result<bool> {
        let mut state = self.lock();
        match state.assignments.get_mut(&id) {
            Some(assignment) if assignment.active => {
                assignment.active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn find_active_by_user(&self, user: Uuid) -> Result<Vec<CaAssignment>> {
        Ok(self
            .lock()
            .assignments
            .values()
            .filter(|a| a.active && a.ca_user == user)
            .cloned()
            .collect())
    }

    fn find_active_by_organization(&self, organization: &str) -> Result<Vec<CaAssignment>> {
        Ok(self
            .lock()
            .assignments
            .values()
            .filter(|a| a.active && a.organization == organization)
            .cloned()
            .collect())
    }
}

fn newest_first(mut csrs: Vec<CertificateSigningRequest>) -> Vec<CertificateSigningRequest> {
    csrs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    csrs
}

impl CsrStore for MemoryStore {
    fn save(&self, csr: CertificateSigningRequest) -> Result<CertificateSigningRequest> {
        self.lock().csrs.insert(csr.id, csr.clone());
        Ok(csr)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<CertificateSigningRequest>> {
        Ok(self.lock().csrs.get(&id).cloned())
    }

    fn find_by_requester(&self, requester: Uuid) -> Result<Vec<CertificateSigningRequest>> {
        Ok(newest_first(
            self.lock()
                .csrs
                .values()
                .filter(|c| c.requester == requester)
                .cloned()
                .collect(),
        ))
    }

    fn find_by_organization(&self, organization: &str) -> Result<Vec<CertificateSigningRequest>> {
        Ok(newest_first(
            self.lock()
                .csrs
                .values()
                .filter(|c| c.organization == organization)
                .cloned()
                .collect(),
        ))
    }

    fn find_by_status(&self, status: CsrStatus) -> Result<Vec<CertificateSigningRequest>> {
        Ok(newest_first(
            self.lock()
                .csrs
                .values()
                .filter(|c| c.status == status)
                .cloned()
                .collect(),
        ))
    }

    fn find_all(&self) -> Result<Vec<CertificateSigningRequest>> {
        Ok(newest_first(self.lock().csrs.values().cloned().collect()))
    }
}

impl VaultStore for MemoryStore {
    fn insert(&self, entry: VaultEntry) -> Result<()> {
        let mut state = self.lock();
        if state.vault_entries.contains_key(&entry.alias) {
            return Err(PkiError::State(format!(
                "vault entry already exists for alias: {}",
                entry.alias
            )));
        }
        state.vault_entries.insert(entry.alias.clone(), entry);
        Ok(())
    }

    fn find_by_alias(&self, alias: &str) -> Result<Option<VaultEntry>> {
        Ok(self.lock().vault_entries.get(alias).cloned())
    }

    fn delete_by_alias(&self, alias: &str) -> Result<()> {
        self.lock().vault_entries.remove(alias);
        Ok(())
    }
}

impl BlobStore for MemoryStore {
    fn put(&self, alias: &str, bytes: &[u8]) -> Result<()> {
        self.lock().blobs.insert(alias.to_owned(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, alias: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().blobs.get(alias).cloned())
    }

    fn delete(&self, alias: &str) -> Result<()> {
        self.lock().blobs.remove(alias);
        Ok(())
    }
}

impl UserDirectory for MemoryStore {
    fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.lock().users.get(&id).cloned())
    }
}
