//! Delegated signing authority: CA assignments and chain reachability.
//!
//! A CA operator may sign with the certificates an administrator assigned
//! to them, plus everything those certificates transitively issued. The
//! chain is recomputed from the store on every query; the graph holds no
//! state of its own, so a slightly stale snapshot under concurrent
//! assignment changes is acceptable by design.
//!
//! Authorization for every signing, review and assignment decision funnels
//! through [`TrustGraph::authorize`], so the role/organization/chain rules
//! live in exactly one place.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{PkiError, Result};
use crate::model::{CaAssignment, Certificate, CertificateSigningRequest, User, UserRole};
use crate::store::{AssignmentStore, CertificateStore, UserDirectory};

/// An action subject to the authorization policy.
#[derive(Debug)]
pub enum CaAction<'a> {
    /// Issue a new root CA certificate.
    IssueRoot,
    /// Sign a certificate under `parent` for a subject in `organization`.
    SignWith {
        parent: &'a Certificate,
        organization: &'a str,
    },
    /// Review (approve or reject) a pending CSR.
    ReviewCsr { csr: &'a CertificateSigningRequest },
    /// Read a CSR.
    ViewCsr { csr: &'a CertificateSigningRequest },
    /// Create or revoke a CA assignment.
    ManageAssignments,
}

/// Stateless view over assignments and the issuance graph.
#[derive(Clone)]
pub struct TrustGraph {
    certificates: Arc<dyn CertificateStore>,
    assignments: Arc<dyn AssignmentStore>,
    users: Arc<dyn UserDirectory>,
}

impl TrustGraph {
    pub fn new(
        certificates: Arc<dyn CertificateStore>,
        assignments: Arc<dyn AssignmentStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            certificates,
            assignments,
            users,
        }
    }

    /// Grant a CA operator the right to sign with `cert_serial`.
    ///
    /// The target user must hold the CA role, the certificate must carry CA
    /// authority, and both must belong to the same organization. The store
    /// enforces uniqueness of the active pair atomically with the insert,
    /// so concurrent duplicates surface as a state error here.
    pub fn assign_certificate(
        &self,
        admin: &User,
        ca_user_id: Uuid,
        cert_serial: &str,
    ) -> Result<CaAssignment> {
        self.authorize(admin, &CaAction::ManageAssignments)?;

        let ca_user = self
            .users
            .find_by_id(ca_user_id)?
            .ok_or_else(|| PkiError::not_found("CA user", ca_user_id.to_string()))?;
        if ca_user.role != UserRole::Ca {
            return Err(PkiError::Validation(
                "user must have CA role to be assigned a CA certificate".into(),
            ));
        }

        let certificate = self
            .certificates
            .find_by_serial(cert_serial)?
            .ok_or_else(|| PkiError::not_found("CA certificate", cert_serial))?;
        if !certificate.is_ca {
            return Err(PkiError::NotCa);
        }

        if ca_user.organization != certificate.organization {
            return Err(PkiError::OrgMismatch(
                "CA user and certificate must belong to the same organization".into(),
            ));
        }

        let assignment = self.assignments.insert_active(CaAssignment {
            id: Uuid::new_v4(),
            ca_user: ca_user.id,
            ca_certificate: certificate.serial_number.clone(),
            organization: ca_user.organization.clone(),
            assigned_by: admin.id,
            active: true,
            assigned_at: Utc::now(),
        })?;

        tracing::info!(
            certificate = %certificate.common_name,
            ca_user = %ca_user.id,
            admin = %admin.id,
            "CA certificate assigned"
        );
        Ok(assignment)
    }

    /// Deactivate an assignment. Idempotent: revoking a missing or already
    /// inactive assignment is a no-op, so administrative retries are safe.
    pub fn revoke_assignment(&self, assignment_id: Uuid, admin: &User) -> Result<()> {
        self.authorize(admin, &CaAction::ManageAssignments)?;

        if self.assignments.deactivate(assignment_id)? {
            tracing::info!(assignment = %assignment_id, admin = %admin.id, "CA assignment revoked");
        }
        Ok(())
    }

    /// Certificates directly assigned to a CA operator.
    pub fn assigned_certificates(&self, ca_user: &User) -> Result<Vec<Certificate>> {
        let mut result = Vec::new();
        for assignment in self.assignments.find_active_by_user(ca_user.id)? {
            if let Some(cert) = self.certificates.find_by_serial(&assignment.ca_certificate)? {
                result.push(cert);
            }
        }
        Ok(result)
    }

    /// Active assignments for a CA operator.
    pub fn assignments_for_user(&self, ca_user: &User) -> Result<Vec<CaAssignment>> {
        self.assignments.find_active_by_user(ca_user.id)
    }

    /// Active assignments within an organization.
    pub fn assignments_for_organization(&self, organization: &str) -> Result<Vec<CaAssignment>> {
        self.assignments.find_active_by_organization(organization)
    }

    /// Every certificate reachable from the operator's directly assigned
    /// certificates by following the issuer relation forward.
    ///
    /// Breadth-first expansion over serial numbers with an explicit visited
    /// set: the frontier is looked up by `find_by_issuer_in`, already-seen
    /// serials are skipped, and the loop ends when no new certificates
    /// appear. Termination therefore does not depend on the stored graph
    /// actually being acyclic.
    pub fn chain_for_user(&self, ca_user: &User) -> Result<Vec<Certificate>> {
        let mut chain: Vec<Certificate> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: HashSet<String> = HashSet::new();

        for cert in self.assigned_certificates(ca_user)? {
            if visited.insert(cert.serial_number.clone()) {
                frontier.insert(cert.serial_number.clone());
                chain.push(cert);
            }
        }

        while !frontier.is_empty() {
            let mut next = HashSet::new();
            for cert in self.certificates.find_by_issuer_in(&frontier)? {
                if visited.insert(cert.serial_number.clone()) {
                    next.insert(cert.serial_number.clone());
                    chain.push(cert);
                }
            }
            frontier = next;
        }

        Ok(chain)
    }

    /// Whether a CA operator may sign with the certificate `serial`.
    ///
    /// True only for CA-role users, CA certificates, and serials inside the
    /// operator's assigned chain. Personally owning a certificate grants
    /// nothing.
    pub fn can_sign(&self, ca_user: &User, serial: &str) -> Result<bool> {
        if ca_user.role != UserRole::Ca {
            return Ok(false);
        }
        let Some(certificate) = self.certificates.find_by_serial(serial)? else {
            return Ok(false);
        };
        if !certificate.is_ca {
            return Ok(false);
        }
        Ok(self
            .chain_for_user(ca_user)?
            .iter()
            .any(|c| c.is_ca && c.serial_number == serial))
    }

    /// The single policy-evaluation point for role, organization and
    /// chain-membership rules. Administrators bypass chain checks entirely;
    /// CA operators are bounded by organization and assigned chain; regular
    /// users may only look at their own submissions.
    pub fn authorize(&self, actor: &User, action: &CaAction<'_>) -> Result<()> {
        match (actor.role, action) {
            (UserRole::Admin, _) => Ok(()),

            (UserRole::Ca, CaAction::SignWith { parent, organization }) => {
                if !self.can_sign(actor, &parent.serial_number)? {
                    return Err(PkiError::Unauthorized(
                        "CA users can only sign with certificates from their assigned chain"
                            .into(),
                    ));
                }
                if *organization != actor.organization {
                    return Err(PkiError::OrgMismatch(
                        "CA users can only issue certificates for their organization".into(),
                    ));
                }
                Ok(())
            }
            (UserRole::Ca, CaAction::ReviewCsr { csr }) => {
                if csr.organization != actor.organization {
                    return Err(PkiError::Unauthorized(
                        "CA users can only review CSRs from their organization".into(),
                    ));
                }
                Ok(())
            }
            (UserRole::Ca, CaAction::ViewCsr { csr }) => {
                if csr.organization != actor.organization {
                    return Err(PkiError::Unauthorized(
                        "CA users can only view CSRs from their organization".into(),
                    ));
                }
                Ok(())
            }

            (UserRole::User, CaAction::ViewCsr { csr }) => {
                if csr.requester != actor.id {
                    return Err(PkiError::Unauthorized(
                        "users can only view their own CSRs".into(),
                    ));
                }
                Ok(())
            }

            (UserRole::Ca, CaAction::IssueRoot | CaAction::ManageAssignments)
            | (
                UserRole::User,
                CaAction::IssueRoot
                | CaAction::SignWith { .. }
                | CaAction::ReviewCsr { .. }
                | CaAction::ManageAssignments,
            ) => Err(PkiError::Unauthorized(format!(
                "role {} is not permitted to perform this action",
                actor.role
            ))),
        }
    }
}
