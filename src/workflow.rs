//! CSR submission and review.
//!
//! A signing request moves through exactly one transition:
//! `Pending -> Approved` or `Pending -> Rejected`. Both outcomes are
//! terminal; a second review attempt is a state error and leaves the stored
//! request untouched. Approval issues the certificate *before* the CSR
//! record is updated, so an issuance failure leaves the request pending and
//! retryable rather than half-approved.

use std::sync::Arc;

use chrono::Utc;
use secrecy::Secret;
use uuid::Uuid;

use crate::error::{PkiError, Result};
use crate::issuer;
use crate::model::{
    CertificateSigningRequest, CsrStatus, CsrSubmission, ReviewDecision, User, UserRole,
};
use crate::service::CertificateService;
use crate::store::CsrStore;
use crate::trust::CaAction;

/// A freshly submitted request plus the requester's private key.
///
/// The key exists only in this return value: the store keeps the CSR, the
/// requester keeps the key.
pub struct SubmittedCsr {
    pub csr: CertificateSigningRequest,
    /// PEM-encoded PKCS#8 private key for the requester.
    pub private_key_pem: Secret<String>,
}

/// Orchestrates the CSR state machine over the store and the certificate
/// service.
pub struct CsrWorkflow {
    csrs: Arc<dyn CsrStore>,
    service: Arc<CertificateService>,
}

impl CsrWorkflow {
    pub fn new(csrs: Arc<dyn CsrStore>, service: Arc<CertificateService>) -> Self {
        Self { csrs, service }
    }

    /// Create a pending CSR for `requester`.
    ///
    /// Generates the requester's key pair, builds a self-signed PKCS#10
    /// structure and persists the request. Only the CSR is stored; the
    /// private key is handed back to the requester.
    pub fn submit(&self, request: &CsrSubmission, requester: &User) -> Result<SubmittedCsr> {
        request.validate()?;

        let key_pair = issuer::generate_key_pair()?;
        let csr_der = issuer::build_csr(
            &request.common_name,
            &request.organization,
            &request.country,
            &key_pair,
        )?;
        let private_key_pem = String::from_utf8(key_pair.private_key_to_pem_pkcs8()?)
            .map_err(|_| PkiError::Crypto("generated key PEM is not valid UTF-8".into()))?;

        let csr = self.csrs.save(CertificateSigningRequest {
            id: Uuid::new_v4(),
            csr_der,
            common_name: request.common_name.clone(),
            organization: request.organization.clone(),
            country: request.country.clone(),
            requested_validity_days: request.validity_days,
            status: CsrStatus::Pending,
            requester: requester.id,
            reviewer: None,
            selected_ca: None,
            issued_certificate: None,
            rejection_reason: None,
            created_at: Utc::now(),
            reviewed_at: None,
        })?;

        tracing::info!(csr = %csr.id, requester = %requester.id, "CSR submitted");
        Ok(SubmittedCsr {
            csr,
            private_key_pem: Secret::new(private_key_pem),
        })
    }

    /// Review a pending CSR, approving or rejecting it exactly once.
    pub fn review(
        &self,
        csr_id: Uuid,
        decision: &ReviewDecision,
        reviewer: &User,
    ) -> Result<CertificateSigningRequest> {
        let mut csr = self
            .csrs
            .find_by_id(csr_id)?
            .ok_or_else(|| PkiError::not_found("CSR", csr_id.to_string()))?;

        if csr.status != CsrStatus::Pending {
            return Err(PkiError::State("CSR has already been reviewed".into()));
        }
        self.service
            .trust()
            .authorize(reviewer, &CaAction::ReviewCsr { csr: &csr })?;

        if decision.approve {
            let selected_ca = decision.selected_ca_serial.as_deref().ok_or_else(|| {
                PkiError::Validation("selected CA is required when approving a CSR".into())
            })?;

            // Issue first; the CSR record is only touched once the
            // certificate exists. Failures propagate and the request stays
            // pending.
            let issued = self
                .service
                .sign_certificate_from_csr(&csr, selected_ca, reviewer)?;

            csr.status = CsrStatus::Approved;
            csr.reviewer = Some(reviewer.id);
            csr.reviewed_at = Some(Utc::now());
            csr.selected_ca = Some(selected_ca.to_owned());
            csr.issued_certificate = Some(issued.serial_number.clone());
            let csr = self.csrs.save(csr)?;

            tracing::info!(
                csr = %csr.id,
                certificate = %issued.serial_number,
                reviewer = %reviewer.id,
                "CSR approved and certificate issued"
            );
            Ok(csr)
        } else {
            let reason = decision
                .rejection_reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| {
                    PkiError::Validation(
                        "a rejection reason is required when rejecting a CSR".into(),
                    )
                })?;

            csr.status = CsrStatus::Rejected;
            csr.reviewer = Some(reviewer.id);
            csr.reviewed_at = Some(Utc::now());
            csr.rejection_reason = Some(reason.to_owned());
            let csr = self.csrs.save(csr)?;

            tracing::info!(csr = %csr.id, reviewer = %reviewer.id, "CSR rejected");
            Ok(csr)
        }
    }

    /// One CSR, subject to the visibility policy.
    pub fn csr_for_user(&self, csr_id: Uuid, user: &User) -> Result<CertificateSigningRequest> {
        let csr = self
            .csrs
            .find_by_id(csr_id)?
            .ok_or_else(|| PkiError::not_found("CSR", csr_id.to_string()))?;
        self.service
            .trust()
            .authorize(user, &CaAction::ViewCsr { csr: &csr })?;
        Ok(csr)
    }

    /// CSRs visible to a user: admins all, CA operators their organization,
    /// regular users their own submissions. Newest first.
    pub fn csrs_for_user(&self, user: &User) -> Result<Vec<CertificateSigningRequest>> {
        match user.role {
            UserRole::Admin => self.csrs.find_all(),
            UserRole::Ca => self.csrs.find_by_organization(&user.organization),
            UserRole::User => self.csrs.find_by_requester(user.id),
        }
    }

    /// As [`csrs_for_user`](Self::csrs_for_user), restricted to one status.
    pub fn csrs_with_status_for_user(
        &self,
        status: CsrStatus,
        user: &User,
    ) -> Result<Vec<CertificateSigningRequest>> {
        Ok(self
            .csrs_for_user(user)?
            .into_iter()
            .filter(|c| c.status == status)
            .collect())
    }
}
