//! Full-hierarchy scenarios over the in-memory store: root issuance,
//! delegation to a CA operator, chain growth, cross-organization denial,
//! and the CSR review round trip.

use std::sync::Arc;

use chrono::{Duration, Utc};
use secrecy::ExposeSecret;
use uuid::Uuid;

use certforge::config::{MasterSecret, RootDnDefaults};
use certforge::issuer::CertificateIssuer;
use certforge::memory::MemoryStore;
use certforge::model::{
    CertificateRequest, CertificateType, CsrStatus, CsrSubmission, EndEntityKeyUsage,
    ReviewDecision, User, UserRole,
};
use certforge::service::CertificateService;
use certforge::store::{BlobStore, CertificateStore, FsBlobStore, VaultStore};
use certforge::trust::TrustGraph;
use certforge::vault::KeyVault;
use certforge::workflow::CsrWorkflow;
use certforge::{CertificateExporter, ExportFormat, PkiError};

struct Harness {
    store: Arc<MemoryStore>,
    service: Arc<CertificateService>,
    workflow: CsrWorkflow,
    exporter: CertificateExporter,
}

fn harness() -> Harness {
    harness_with_blobs(None)
}

fn harness_with_blobs(blobs: Option<Arc<dyn BlobStore>>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let blobs: Arc<dyn BlobStore> = blobs.unwrap_or_else(|| store.clone());
    let trust = TrustGraph::new(store.clone(), store.clone(), store.clone());
    let vault = KeyVault::new(
        store.clone() as Arc<dyn VaultStore>,
        blobs,
        MasterSecret::from_value("end-to-end master secret".into()),
    );
    let service = Arc::new(CertificateService::new(
        store.clone(),
        store.clone(),
        trust,
        CertificateIssuer::new(RootDnDefaults::default()),
        vault,
    ));
    let workflow = CsrWorkflow::new(store.clone(), service.clone());
    let exporter = CertificateExporter::new(service.clone());
    Harness {
        store,
        service,
        workflow,
        exporter,
    }
}

fn user(store: &MemoryStore, role: UserRole, organization: &str) -> User {
    let user = User {
        id: Uuid::new_v4(),
        role,
        organization: organization.into(),
    };
    store.put_user(user.clone());
    user
}

fn intermediate_request(parent: &str, organization: &str) -> CertificateRequest {
    CertificateRequest {
        common_name: format!("{organization}-CA"),
        organization: organization.into(),
        country: "US".into(),
        organizational_unit: None,
        locality: None,
        state: None,
        certificate_type: CertificateType::IntermediateCa,
        validity_days: 1825,
        parent_ca_serial: parent.into(),
        subject_alternative_names: vec![],
        key_usage: EndEntityKeyUsage::default(),
    }
}

fn end_entity_request(parent: &str, cn: &str, organization: &str) -> CertificateRequest {
    CertificateRequest {
        common_name: cn.into(),
        organization: organization.into(),
        country: "US".into(),
        organizational_unit: Some("Platform".into()),
        locality: None,
        state: None,
        certificate_type: CertificateType::EndEntity,
        validity_days: 365,
        parent_ca_serial: parent.into(),
        subject_alternative_names: vec![
            format!("DNS:{cn}"),
            "IP:10.0.0.1".into(),
            "fallback.acme.com".into(),
        ],
        key_usage: EndEntityKeyUsage::default(),
    }
}

#[test]
fn delegated_hierarchy_end_to_end() {
    let h = harness();
    let admin = user(&h.store, UserRole::Admin, "Acme");
    let operator = user(&h.store, UserRole::Ca, "Acme");

    // Admin issues the root (S1) and an "Acme" intermediate (S2) under it.
    let root = h
        .service
        .issue_root_certificate(admin.id, "Root")
        .unwrap();
    assert!(root.is_ca);
    assert!(root.issuer.is_none());
    assert_eq!(root.not_after - root.not_before, Duration::days(3650));

    let intermediate = h
        .service
        .sign_certificate(&intermediate_request(&root.serial_number, "Acme"), &admin)
        .unwrap();
    assert!(intermediate.is_ca);
    assert_eq!(intermediate.issuer.as_deref(), Some(root.serial_number.as_str()));

    // Admin assigns S2 to the operator; the chain is exactly {S2}.
    h.service
        .trust()
        .assign_certificate(&admin, operator.id, &intermediate.serial_number)
        .unwrap();
    let chain: Vec<_> = h
        .service
        .trust()
        .chain_for_user(&operator)
        .unwrap()
        .into_iter()
        .map(|c| c.serial_number)
        .collect();
    assert_eq!(chain, vec![intermediate.serial_number.clone()]);

    // The operator signs svc.acme.com (S3) under S2; the chain grows.
    let leaf = h
        .service
        .sign_certificate(
            &end_entity_request(&intermediate.serial_number, "svc.acme.com", "Acme"),
            &operator,
        )
        .unwrap();
    assert!(!leaf.is_ca);
    assert_eq!(leaf.owner, operator.id);

    let chain: std::collections::HashSet<_> = h
        .service
        .trust()
        .chain_for_user(&operator)
        .unwrap()
        .into_iter()
        .map(|c| c.serial_number)
        .collect();
    assert_eq!(
        chain,
        std::collections::HashSet::from([
            intermediate.serial_number.clone(),
            leaf.serial_number.clone()
        ])
    );

    // A CA operator of another organization has no authority over S2.
    let outsider = user(&h.store, UserRole::Ca, "Globex");
    assert!(!h
        .service
        .trust()
        .can_sign(&outsider, &intermediate.serial_number)
        .unwrap());
    let err = h
        .service
        .sign_certificate(
            &end_entity_request(&intermediate.serial_number, "x.globex.com", "Globex"),
            &outsider,
        )
        .unwrap_err();
    assert!(matches!(err, PkiError::Unauthorized(_)));

    // The operator cannot sign directly under the root (not assigned).
    let err = h
        .service
        .sign_certificate(
            &end_entity_request(&root.serial_number, "direct.acme.com", "Acme"),
            &operator,
        )
        .unwrap_err();
    assert!(matches!(err, PkiError::Unauthorized(_)));

    // Regular users have no signing authority at all.
    let regular = user(&h.store, UserRole::User, "Acme");
    let err = h
        .service
        .sign_certificate(
            &end_entity_request(&intermediate.serial_number, "user.acme.com", "Acme"),
            &regular,
        )
        .unwrap_err();
    assert!(matches!(err, PkiError::Unauthorized(_)));
}

#[test]
fn signing_under_missing_or_non_ca_parent_fails() {
    let h = harness();
    let admin = user(&h.store, UserRole::Admin, "Acme");
    let root = h.service.issue_root_certificate(admin.id, "Root").unwrap();

    let err = h
        .service
        .sign_certificate(&end_entity_request("0", "a.acme.com", "Acme"), &admin)
        .unwrap_err();
    assert!(matches!(err, PkiError::NotFound { .. }));

    let leaf = h
        .service
        .sign_certificate(
            &end_entity_request(&root.serial_number, "a.acme.com", "Acme"),
            &admin,
        )
        .unwrap();
    let err = h
        .service
        .sign_certificate(
            &end_entity_request(&leaf.serial_number, "b.acme.com", "Acme"),
            &admin,
        )
        .unwrap_err();
    assert!(matches!(err, PkiError::NotCa));
}

#[test]
fn signing_under_an_expired_parent_fails() {
    let h = harness();
    let admin = user(&h.store, UserRole::Admin, "Acme");

    // A CA record whose validity window already ended. The expiry check
    // runs before any vault access, so no key material is needed.
    let now = Utc::now();
    CertificateStore::save(
        h.store.as_ref(),
        certforge::Certificate {
            serial_number: "31337".into(),
            common_name: "Expired CA".into(),
            not_before: now - Duration::days(730),
            not_after: now - Duration::days(1),
            cert_type: CertificateType::IntermediateCa,
            is_ca: true,
            organization: "Acme".into(),
            owner: admin.id,
            issuer: None,
            der: vec![],
            created_at: now,
        },
    )
    .unwrap();

    let err = h
        .service
        .sign_certificate(&end_entity_request("31337", "late.acme.com", "Acme"), &admin)
        .unwrap_err();
    assert!(matches!(err, PkiError::ExpiredParent));
}

#[test]
fn csr_review_happy_path_and_exactly_once() {
    let h = harness();
    let admin = user(&h.store, UserRole::Admin, "Acme");
    let requester = user(&h.store, UserRole::User, "Acme");
    let root = h.service.issue_root_certificate(admin.id, "Root").unwrap();

    let submitted = h
        .workflow
        .submit(
            &CsrSubmission {
                common_name: "svc.acme.com".into(),
                organization: "Acme".into(),
                country: "US".into(),
                validity_days: 365,
            },
            &requester,
        )
        .unwrap();
    assert_eq!(submitted.csr.status, CsrStatus::Pending);
    assert!(submitted
        .private_key_pem
        .expose_secret()
        .contains("PRIVATE KEY"));

    let reviewed = h
        .workflow
        .review(
            submitted.csr.id,
            &ReviewDecision {
                approve: true,
                selected_ca_serial: Some(root.serial_number.clone()),
                rejection_reason: None,
            },
            &admin,
        )
        .unwrap();
    assert_eq!(reviewed.status, CsrStatus::Approved);
    assert_eq!(reviewed.reviewer, Some(admin.id));
    assert_eq!(reviewed.selected_ca.as_deref(), Some(root.serial_number.as_str()));

    // The issued certificate belongs to the requester and chains to the CA.
    let issued_serial = reviewed.issued_certificate.clone().unwrap();
    let issued = h
        .store
        .find_by_serial(&issued_serial)
        .unwrap()
        .unwrap();
    assert_eq!(issued.owner, requester.id);
    assert_eq!(issued.cert_type, CertificateType::EndEntity);
    assert_eq!(issued.issuer.as_deref(), Some(root.serial_number.as_str()));

    // Second review attempt fails and leaves the stored record unchanged.
    let err = h
        .workflow
        .review(
            submitted.csr.id,
            &ReviewDecision {
                approve: false,
                selected_ca_serial: None,
                rejection_reason: Some("too late".into()),
            },
            &admin,
        )
        .unwrap_err();
    assert!(matches!(err, PkiError::State(_)));

    let after = h
        .workflow
        .csr_for_user(submitted.csr.id, &admin)
        .unwrap();
    assert_eq!(after.status, CsrStatus::Approved);
    assert_eq!(after.reviewer, reviewed.reviewer);
    assert_eq!(after.reviewed_at, reviewed.reviewed_at);
    assert_eq!(after.issued_certificate, reviewed.issued_certificate);
    assert!(after.rejection_reason.is_none());
}

#[test]
fn csr_rejection_requires_a_reason_and_is_terminal() {
    let h = harness();
    let admin = user(&h.store, UserRole::Admin, "Acme");
    let requester = user(&h.store, UserRole::User, "Acme");
    h.service.issue_root_certificate(admin.id, "Root").unwrap();

    let submitted = h
        .workflow
        .submit(
            &CsrSubmission {
                common_name: "svc.acme.com".into(),
                organization: "Acme".into(),
                country: "US".into(),
                validity_days: 90,
            },
            &requester,
        )
        .unwrap();

    let err = h
        .workflow
        .review(
            submitted.csr.id,
            &ReviewDecision {
                approve: false,
                selected_ca_serial: None,
                rejection_reason: Some("   ".into()),
            },
            &admin,
        )
        .unwrap_err();
    assert!(matches!(err, PkiError::Validation(_)));

    let rejected = h
        .workflow
        .review(
            submitted.csr.id,
            &ReviewDecision {
                approve: false,
                selected_ca_serial: None,
                rejection_reason: Some("key policy violation".into()),
            },
            &admin,
        )
        .unwrap();
    assert_eq!(rejected.status, CsrStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("key policy violation"));

    let err = h
        .workflow
        .review(
            submitted.csr.id,
            &ReviewDecision {
                approve: false,
                selected_ca_serial: None,
                rejection_reason: Some("again".into()),
            },
            &admin,
        )
        .unwrap_err();
    assert!(matches!(err, PkiError::State(_)));
}

#[test]
fn approval_without_selected_ca_leaves_the_csr_pending() {
    let h = harness();
    let admin = user(&h.store, UserRole::Admin, "Acme");
    let requester = user(&h.store, UserRole::User, "Acme");
    h.service.issue_root_certificate(admin.id, "Root").unwrap();

    let submitted = h
        .workflow
        .submit(
            &CsrSubmission {
                common_name: "svc.acme.com".into(),
                organization: "Acme".into(),
                country: "US".into(),
                validity_days: 90,
            },
            &requester,
        )
        .unwrap();

    let err = h
        .workflow
        .review(
            submitted.csr.id,
            &ReviewDecision {
                approve: true,
                selected_ca_serial: None,
                rejection_reason: None,
            },
            &admin,
        )
        .unwrap_err();
    assert!(matches!(err, PkiError::Validation(_)));

    // Still pending, still reviewable.
    let csr = h.workflow.csr_for_user(submitted.csr.id, &admin).unwrap();
    assert_eq!(csr.status, CsrStatus::Pending);
}

#[test]
fn csr_visibility_follows_roles() {
    let h = harness();
    let admin = user(&h.store, UserRole::Admin, "Acme");
    let acme_ca = user(&h.store, UserRole::Ca, "Acme");
    let globex_ca = user(&h.store, UserRole::Ca, "Globex");
    let alice = user(&h.store, UserRole::User, "Acme");
    let bob = user(&h.store, UserRole::User, "Globex");

    for (who, org) in [(&alice, "Acme"), (&bob, "Globex")] {
        h.workflow
            .submit(
                &CsrSubmission {
                    common_name: format!("svc.{}.com", org.to_lowercase()),
                    organization: org.into(),
                    country: "US".into(),
                    validity_days: 90,
                },
                who,
            )
            .unwrap();
    }

    assert_eq!(h.workflow.csrs_for_user(&admin).unwrap().len(), 2);
    let acme_visible = h.workflow.csrs_for_user(&acme_ca).unwrap();
    assert_eq!(acme_visible.len(), 1);
    assert_eq!(acme_visible[0].organization, "Acme");
    assert_eq!(h.workflow.csrs_for_user(&alice).unwrap().len(), 1);
    assert_eq!(
        h.workflow
            .csrs_with_status_for_user(CsrStatus::Pending, &globex_ca)
            .unwrap()
            .len(),
        1
    );

    // A Globex CA may not review an Acme CSR.
    let acme_csr = acme_visible[0].clone();
    let err = h
        .workflow
        .review(
            acme_csr.id,
            &ReviewDecision {
                approve: false,
                selected_ca_serial: None,
                rejection_reason: Some("wrong org".into()),
            },
            &globex_ca,
        )
        .unwrap_err();
    assert!(matches!(err, PkiError::Unauthorized(_)));

    // Nor may a regular user view someone else's CSR.
    let err = h.workflow.csr_for_user(acme_csr.id, &bob).unwrap_err();
    assert!(matches!(err, PkiError::Unauthorized(_)));
}

#[test]
fn export_formats_and_keystores() {
    let dir = tempfile::tempdir().unwrap();
    let blobs: Arc<dyn BlobStore> =
        Arc::new(FsBlobStore::new(dir.path().join("keystores")).unwrap());
    let h = harness_with_blobs(Some(blobs));
    let admin = user(&h.store, UserRole::Admin, "Acme");

    let root = h.service.issue_root_certificate(admin.id, "Root").unwrap();
    let leaf = h
        .service
        .sign_certificate(
            &end_entity_request(&root.serial_number, "svc.acme.com", "Acme"),
            &admin,
        )
        .unwrap();

    // DER is the stored bytes verbatim; PEM carries the standard armor.
    let der = h
        .exporter
        .export_certificate(&root.serial_number, ExportFormat::Der)
        .unwrap();
    assert_eq!(der, root.der);

    let pem = h
        .exporter
        .export_certificate(&root.serial_number, ExportFormat::Pem)
        .unwrap();
    let pem_text = String::from_utf8(pem).unwrap();
    assert!(pem_text.starts_with("-----BEGIN CERTIFICATE-----"));
    assert!(pem_text.trim_end().ends_with("-----END CERTIFICATE-----"));
    assert!(pem_text.lines().all(|l| l.len() <= 64));

    // CA keystore carries the private key and opens only with the caller's
    // password.
    let p12 = h
        .exporter
        .export_keystore(&root.serial_number, "export-password")
        .unwrap();
    let parsed = openssl::pkcs12::Pkcs12::from_der(&p12)
        .unwrap()
        .parse2("export-password")
        .unwrap();
    assert!(parsed.pkey.is_some());
    assert_eq!(parsed.cert.unwrap().to_der().unwrap(), root.der);
    assert!(openssl::pkcs12::Pkcs12::from_der(&p12)
        .unwrap()
        .parse2("wrong-password")
        .is_err());

    // End-entity certificates have no vaulted key: certificate-only bundle.
    let p12 = h
        .exporter
        .export_keystore(&leaf.serial_number, "export-password")
        .unwrap();
    let parsed = openssl::pkcs12::Pkcs12::from_der(&p12)
        .unwrap()
        .parse2("export-password")
        .unwrap();
    assert!(parsed.pkey.is_none());

    let err = h
        .exporter
        .export_certificate("0", ExportFormat::Pem)
        .unwrap_err();
    assert!(matches!(err, PkiError::NotFound { .. }));
}
