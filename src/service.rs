//! Certificate issuance orchestration.
//!
//! [`CertificateService`] is the entry point the host wires against: it
//! looks records up, runs the authorization policy, drives the issuer, and
//! keeps the store and the vault consistent. Every operation validates and
//! authorizes before the first mutation; a vault failure after a CA
//! certificate was persisted is surfaced as a fatal error rather than
//! swallowed, so a CA never ends up without a retrievable key.

use std::sync::Arc;

use chrono::Utc;
use openssl::x509::X509;
use uuid::Uuid;

use crate::error::{PkiError, Result};
use crate::issuer::CertificateIssuer;
use crate::model::{
    Certificate, CertificateRequest, CertificateSigningRequest, CertificateType, User, UserRole,
};
use crate::store::{CertificateStore, UserDirectory};
use crate::trust::{CaAction, TrustGraph};
use crate::vault::KeyVault;

/// Facade over issuer, trust graph, vault and store.
pub struct CertificateService {
    certificates: Arc<dyn CertificateStore>,
    users: Arc<dyn UserDirectory>,
    trust: TrustGraph,
    issuer: CertificateIssuer,
    vault: KeyVault,
}

impl CertificateService {
    pub fn new(
        certificates: Arc<dyn CertificateStore>,
        users: Arc<dyn UserDirectory>,
        trust: TrustGraph,
        issuer: CertificateIssuer,
        vault: KeyVault,
    ) -> Self {
        Self {
            certificates,
            users,
            trust,
            issuer,
            vault,
        }
    }

    pub fn trust(&self) -> &TrustGraph {
        &self.trust
    }

    pub(crate) fn vault(&self) -> &KeyVault {
        &self.vault
    }

    pub(crate) fn certificates(&self) -> &Arc<dyn CertificateStore> {
        &self.certificates
    }

    /// Issue a self-signed root CA owned by `owner_id` and seal its key in
    /// the vault.
    pub fn issue_root_certificate(&self, owner_id: Uuid, common_name: &str) -> Result<Certificate> {
        let owner = self
            .users
            .find_by_id(owner_id)?
            .ok_or_else(|| PkiError::not_found("user", owner_id.to_string()))?;
        self.trust.authorize(&owner, &CaAction::IssueRoot)?;

        let issued = self.issuer.issue_root(common_name)?;
        let key_pair = issued
            .key_pair
            .as_ref()
            .ok_or_else(|| PkiError::Crypto("issuer returned no key pair for root CA".into()))?;

        let record = Certificate {
            serial_number: issued.serial_number.clone(),
            common_name: common_name.to_owned(),
            not_before: issued.not_before,
            not_after: issued.not_after,
            cert_type: CertificateType::RootCa,
            is_ca: true,
            organization: owner.organization.clone(),
            owner: owner.id,
            issuer: None,
            der: issued.der.clone(),
            created_at: Utc::now(),
        };
        let record = self.certificates.save(record)?;

        let x509 = X509::from_der(&issued.der)?;
        self.vault
            .store_ca_key(&record.serial_number, key_pair, &x509, owner.id)?;

        tracing::info!(
            serial = %record.serial_number,
            owner = %owner.id,
            "root CA certificate issued"
        );
        Ok(record)
    }

    /// Sign a certificate under the parent CA named in the request.
    ///
    /// Admins may use any CA; CA operators are held to their assigned chain
    /// and organization; regular users are rejected. New CA keys go to the
    /// vault; end-entity key pairs from this direct path are not retained
    /// (the CSR workflow is the path where requesters keep their keys).
    pub fn sign_certificate(
        &self,
        request: &CertificateRequest,
        acting_user: &User,
    ) -> Result<Certificate> {
        request.validate()?;

        let parent = self.lookup_signing_parent(&request.parent_ca_serial)?;
        self.trust.authorize(
            acting_user,
            &CaAction::SignWith {
                parent: &parent,
                organization: &request.organization,
            },
        )?;

        let parent_key = self.vault.private_key(&parent.serial_number)?;
        let parent_x509 = X509::from_der(&parent.der)?;
        let issued = self
            .issuer
            .sign(request, &parent_x509, &parent_key, parent.not_after)?;
        let is_ca = request.certificate_type == CertificateType::IntermediateCa;

        let record = Certificate {
            serial_number: issued.serial_number.clone(),
            common_name: request.common_name.clone(),
            not_before: issued.not_before,
            not_after: issued.not_after,
            cert_type: request.certificate_type,
            is_ca,
            organization: request.organization.clone(),
            owner: acting_user.id,
            issuer: Some(parent.serial_number.clone()),
            der: issued.der.clone(),
            created_at: Utc::now(),
        };
        let record = self.certificates.save(record)?;

        if is_ca {
            let key_pair = issued
                .key_pair
                .as_ref()
                .ok_or_else(|| PkiError::Crypto("issuer returned no key pair for CA".into()))?;
            let x509 = X509::from_der(&issued.der)?;
            self.vault
                .store_ca_key(&record.serial_number, key_pair, &x509, acting_user.id)?;
        }

        tracing::info!(
            serial = %record.serial_number,
            cert_type = ?record.cert_type,
            parent = %parent.serial_number,
            "certificate signed"
        );
        Ok(record)
    }

    /// Issue an end-entity certificate from an approved CSR.
    ///
    /// Called by the review workflow after the state check. The reviewer is
    /// authorized against the selected CA and the CSR's organization; the
    /// CSR's embedded signature is verified by the issuer. The resulting
    /// certificate belongs to the original requester.
    pub(crate) fn sign_certificate_from_csr(
        &self,
        csr: &CertificateSigningRequest,
        selected_ca_serial: &str,
        reviewer: &User,
    ) -> Result<Certificate> {
        let parent = self.lookup_signing_parent(selected_ca_serial)?;
        self.trust.authorize(
            reviewer,
            &CaAction::SignWith {
                parent: &parent,
                organization: &csr.organization,
            },
        )?;

        let parent_key = self.vault.private_key(&parent.serial_number)?;
        let parent_x509 = X509::from_der(&parent.der)?;
        let issued = self.issuer.sign_from_csr(
            &csr.csr_der,
            csr.requested_validity_days,
            &parent_x509,
            &parent_key,
            parent.not_after,
        )?;

        let record = Certificate {
            serial_number: issued.serial_number.clone(),
            common_name: csr.common_name.clone(),
            not_before: issued.not_before,
            not_after: issued.not_after,
            cert_type: CertificateType::EndEntity,
            is_ca: false,
            organization: csr.organization.clone(),
            owner: csr.requester,
            issuer: Some(parent.serial_number.clone()),
            der: issued.der,
            created_at: Utc::now(),
        };
        let record = self.certificates.save(record)?;

        tracing::info!(
            serial = %record.serial_number,
            csr = %csr.id,
            "end-entity certificate issued from CSR"
        );
        Ok(record)
    }

    /// Certificates visible to a user: admins see everything, CA operators
    /// their assigned chain, regular users the certificates they own.
    pub fn certificates_for_user(&self, user: &User) -> Result<Vec<Certificate>> {
        match user.role {
            UserRole::Admin => self.certificates.find_all(),
            UserRole::Ca => self.trust.chain_for_user(user),
            UserRole::User => self.certificates.find_by_owner(user.id),
        }
    }

    /// CAs a user may select as signing parent: admins any CA, CA operators
    /// their directly assigned certificates, regular users none.
    pub fn available_parent_cas(&self, user: &User) -> Result<Vec<Certificate>> {
        match user.role {
            UserRole::Admin => self.certificates.find_ca_certificates(),
            UserRole::Ca => self.trust.assigned_certificates(user),
            UserRole::User => Ok(Vec::new()),
        }
    }

    /// Retire a CA certificate's key material from the vault.
    pub fn retire_ca_key(&self, serial: &str, admin: &User) -> Result<()> {
        self.trust.authorize(admin, &CaAction::ManageAssignments)?;
        self.vault.delete(serial)
    }

    fn lookup_signing_parent(&self, serial: &str) -> Result<Certificate> {
        let parent = self
            .certificates
            .find_by_serial(serial)?
            .ok_or_else(|| PkiError::not_found("parent CA certificate", serial))?;
        if !parent.is_ca {
            return Err(PkiError::NotCa);
        }
        if parent.is_expired(Utc::now()) {
            return Err(PkiError::ExpiredParent);
        }
        Ok(parent)
    }
}
