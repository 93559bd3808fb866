//! Encrypted custody of CA private keys.
//!
//! Every CA certificate's private key lives in a key container blob
//! addressed by the certificate's serial number. Opening a container takes
//! two secrets, generated fresh per CA:
//!
//! - the **container password**, which keys the outer AES-256-CBC layer of
//!   the blob (`[salt(16)][iv(16)][ciphertext]`), and
//! - the **key-entry password**, the passphrase on the PKCS#8 private key
//!   inside.
//!
//! Both secrets are stored encrypted in a [`VaultEntry`], each under a key
//! derived with PBKDF2-HMAC-SHA256 (100,000 iterations, 256-bit output)
//! from per-user key material and the entry's random salt. The per-user
//! material is itself derived from the process-wide master secret and the
//! owning user's id, so entries of different users never share keys.
//!
//! Failure at any decryption step surfaces as a [`PkiError::Crypto`],
//! never a silent default, and no error message carries secret material.

use chrono::Utc;
use openssl::hash::MessageDigest;
use openssl::pkcs5::pbkdf2_hmac;
use openssl::pkey::{PKey, Private};
use openssl::symm::Cipher;
use openssl::x509::X509;
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::MasterSecret;
use crate::error::{PkiError, Result};
use crate::model::VaultEntry;
use crate::store::{BlobStore, VaultStore};

/// PBKDF2 iteration count for every key derivation in the vault.
pub const PBKDF2_ITERATIONS: usize = 100_000;
const DERIVED_KEY_LEN: usize = 32; // 256 bits
const SALT_LEN: usize = 16;
const IV_LEN: usize = 16;
const SECRET_LEN: usize = 16;
const SECRET_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";

/// Encrypted store for CA private keys and their container secrets.
pub struct KeyVault {
    entries: Arc<dyn VaultStore>,
    blobs: Arc<dyn BlobStore>,
    master: MasterSecret,
}

impl KeyVault {
    pub fn new(entries: Arc<dyn VaultStore>, blobs: Arc<dyn BlobStore>, master: MasterSecret) -> Self {
        Self {
            entries,
            blobs,
            master,
        }
    }

    /// Seal a CA's private key and certificate into a new container under
    /// `alias`, and persist the entry holding its encrypted secrets.
    ///
    /// The blob is written before the entry: if the entry insert fails the
    /// container is unreadable garbage with no record pointing at it, never
    /// a certificate without a retrievable key.
    pub fn store_ca_key(
        &self,
        alias: &str,
        private_key: &PKey<Private>,
        certificate: &X509,
        owner: Uuid,
    ) -> Result<()> {
        let container_password = generate_secret()?;
        let key_password = generate_secret()?;

        // Inner layer: passphrase-protected PKCS#8 plus the certificate.
        let mut payload = private_key.private_key_to_pem_pkcs8_passphrase(
            Cipher::aes_256_cbc(),
            key_password.expose_secret().as_bytes(),
        )?;
        payload.extend_from_slice(&certificate.to_pem()?);

        // Outer layer: AES-256-CBC under the container password.
        let container_salt = random_bytes(SALT_LEN)?;
        let container_key = derive_key(
            container_password.expose_secret().as_bytes(),
            &container_salt,
        )?;
        let sealed = encrypt_with_key(&container_key, &payload)?;
        let mut blob = container_salt;
        blob.extend_from_slice(&sealed);
        self.blobs.put(alias, &blob)?;

        // Entry: both passwords encrypted independently under the
        // user-derived key, one salt per entry, fresh IV per encryption.
        let entry_salt = random_bytes(SALT_LEN)?;
        let user_key = derive_key(
            self.user_key_material(owner).expose_secret().as_bytes(),
            &entry_salt,
        )?;
        let entry = VaultEntry {
            alias: alias.to_owned(),
            container_secret: encrypt_with_key(
                &user_key,
                container_password.expose_secret().as_bytes(),
            )?,
            key_secret: encrypt_with_key(&user_key, key_password.expose_secret().as_bytes())?,
            salt: entry_salt,
            owner,
            created_at: Utc::now(),
        };
        self.entries.insert(entry)?;

        tracing::info!(alias, "CA private key stored in encrypted container");
        Ok(())
    }

    /// Whether a vault entry exists for `alias`.
    pub fn contains(&self, alias: &str) -> Result<bool> {
        Ok(self.entries.find_by_alias(alias)?.is_some())
    }

    /// Decrypt both container secrets, open the container and extract the
    /// private key.
    pub fn private_key(&self, alias: &str) -> Result<PKey<Private>> {
        let (key_pem, _) = self.open_container(alias)?;
        Ok(key_pem)
    }

    /// The certificate stored alongside the key in the container.
    pub fn certificate(&self, alias: &str) -> Result<X509> {
        let (_, certificate) = self.open_container(alias)?;
        Ok(certificate)
    }

    /// Remove the container and its entry. Only called when the CA
    /// certificate itself is retired.
    pub fn delete(&self, alias: &str) -> Result<()> {
        self.blobs.delete(alias)?;
        self.entries.delete_by_alias(alias)?;
        tracing::info!(alias, "key container and secrets deleted");
        Ok(())
    }

    fn open_container(&self, alias: &str) -> Result<(PKey<Private>, X509)> {
        let entry = self
            .entries
            .find_by_alias(alias)?
            .ok_or_else(|| PkiError::not_found("vault entry", alias))?;

        let user_key = derive_key(
            self.user_key_material(entry.owner).expose_secret().as_bytes(),
            &entry.salt,
        )?;
        let container_password = decrypt_secret_string(&user_key, &entry.container_secret)?;
        let key_password = decrypt_secret_string(&user_key, &entry.key_secret)?;

        let blob = self
            .blobs
            .get(alias)?
            .ok_or_else(|| PkiError::Crypto(format!("key container missing for alias {alias}")))?;
        if blob.len() <= SALT_LEN + IV_LEN {
            return Err(PkiError::Crypto(format!(
                "key container for alias {alias} is truncated"
            )));
        }
        let (container_salt, sealed) = blob.split_at(SALT_LEN);
        let container_key = derive_key(
            container_password.expose_secret().as_bytes(),
            container_salt,
        )?;
        let payload = decrypt_with_key(&container_key, sealed)?;

        let private_key = PKey::private_key_from_pem_passphrase(
            &payload,
            key_password.expose_secret().as_bytes(),
        )
        .map_err(|_| {
            PkiError::Crypto(format!("failed to decrypt key entry for alias {alias}"))
        })?;
        let certificate = X509::from_pem(&payload)
            .map_err(|_| PkiError::Crypto(format!("no certificate in container for alias {alias}")))?;

        Ok((private_key, certificate))
    }

    /// Deterministic per-user key material: SHA-256 over the master secret
    /// and the owner's id.
    fn user_key_material(&self, owner: Uuid) -> Secret<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.master.expose().as_bytes());
        hasher.update(owner.as_bytes());
        let hex: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();
        Secret::new(hex)
    }
}

fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    openssl::rand::rand_bytes(&mut buf)?;
    Ok(buf)
}

/// Random 16-character password over the vault alphabet.
fn generate_secret() -> Result<Secret<String>> {
    let raw = random_bytes(SECRET_LEN)?;
    let password: String = raw
        .into_iter()
        .map(|b| SECRET_ALPHABET[b as usize % SECRET_ALPHABET.len()] as char)
        .collect();
    Ok(Secret::new(password))
}

/// PBKDF2-HMAC-SHA256 with the vault's fixed iteration count.
pub(crate) fn derive_key(material: &[u8], salt: &[u8]) -> Result<[u8; DERIVED_KEY_LEN]> {
    let mut key = [0u8; DERIVED_KEY_LEN];
    pbkdf2_hmac(material, salt, PBKDF2_ITERATIONS, MessageDigest::sha256(), &mut key)?;
    Ok(key)
}

/// AES-256-CBC with a fresh random IV prepended to the ciphertext.
pub(crate) fn encrypt_with_key(key: &[u8; DERIVED_KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let iv = random_bytes(IV_LEN)?;
    let ciphertext = openssl::symm::encrypt(Cipher::aes_256_cbc(), key, Some(&iv), plaintext)?;
    let mut out = iv;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`encrypt_with_key`]; expects the IV in the first 16 bytes.
pub(crate) fn decrypt_with_key(key: &[u8; DERIVED_KEY_LEN], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() <= IV_LEN {
        return Err(PkiError::Crypto("ciphertext is truncated".into()));
    }
    let (iv, ciphertext) = data.split_at(IV_LEN);
    openssl::symm::decrypt(Cipher::aes_256_cbc(), key, Some(iv), ciphertext)
        .map_err(|_| PkiError::Crypto("secret decryption failed".into()))
}

fn decrypt_secret_string(key: &[u8; DERIVED_KEY_LEN], data: &[u8]) -> Result<Secret<String>> {
    let bytes = decrypt_with_key(key, data)?;
    let text = String::from_utf8(bytes)
        .map_err(|_| PkiError::Crypto("decrypted secret is not valid UTF-8".into()))?;
    Ok(Secret::new(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RootDnDefaults;
    use crate::issuer::CertificateIssuer;
    use crate::memory::MemoryStore;

    fn vault(store: &Arc<MemoryStore>) -> KeyVault {
        KeyVault::new(
            store.clone(),
            store.clone(),
            MasterSecret::from_value("test-master-secret".into()),
        )
    }

    #[test]
    fn secret_encryption_round_trips_for_many_secrets() {
        // One derivation covers the loop; the property under test is the
        // cipher layer, not PBKDF2 throughput.
        let salt = random_bytes(SALT_LEN).unwrap();
        let key = derive_key(b"user key material", &salt).unwrap();

        for i in 0..1000 {
            let len = (i % 64) + 1;
            let secret = random_bytes(len).unwrap();
            let sealed = encrypt_with_key(&key, &secret).unwrap();
            assert_eq!(decrypt_with_key(&key, &sealed).unwrap(), secret);
        }
    }

    #[test]
    fn each_encryption_uses_a_fresh_iv() {
        let salt = random_bytes(SALT_LEN).unwrap();
        let key = derive_key(b"user key material", &salt).unwrap();
        let a = encrypt_with_key(&key, b"same secret").unwrap();
        let b = encrypt_with_key(&key, b"same secret").unwrap();
        assert_ne!(a[..IV_LEN], b[..IV_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_instead_of_defaulting() {
        let salt = random_bytes(SALT_LEN).unwrap();
        let key = derive_key(b"right material", &salt).unwrap();
        let wrong = derive_key(b"wrong material", &salt).unwrap();
        let sealed = encrypt_with_key(&key, b"secret").unwrap();
        // CBC padding almost always rejects the wrong key; on the rare
        // padding coincidence the plaintext is still garbage.
        match decrypt_with_key(&wrong, &sealed) {
            Err(PkiError::Crypto(_)) => {}
            Ok(plaintext) => assert_ne!(plaintext, b"secret"),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ca_key_round_trips_through_the_container() {
        let store = Arc::new(MemoryStore::new());
        let vault = vault(&store);

        let issued = CertificateIssuer::new(RootDnDefaults::default())
            .issue_root("Vault Test Root")
            .unwrap();
        let key = issued.key_pair.unwrap();
        let cert = X509::from_der(&issued.der).unwrap();
        let owner = Uuid::new_v4();

        vault
            .store_ca_key(&issued.serial_number, &key, &cert, owner)
            .unwrap();
        assert!(vault.contains(&issued.serial_number).unwrap());

        let recovered = vault.private_key(&issued.serial_number).unwrap();
        assert!(recovered.public_eq(&key));

        let stored_cert = vault.certificate(&issued.serial_number).unwrap();
        assert_eq!(stored_cert.to_der().unwrap(), issued.der);
    }

    #[test]
    fn missing_entry_is_not_found_and_delete_is_final() {
        let store = Arc::new(MemoryStore::new());
        let vault = vault(&store);
        assert!(matches!(
            vault.private_key("404"),
            Err(PkiError::NotFound { .. })
        ));

        let issued = CertificateIssuer::new(RootDnDefaults::default())
            .issue_root("Vault Test Root")
            .unwrap();
        let key = issued.key_pair.unwrap();
        let cert = X509::from_der(&issued.der).unwrap();
        vault
            .store_ca_key(&issued.serial_number, &key, &cert, Uuid::new_v4())
            .unwrap();

        vault.delete(&issued.serial_number).unwrap();
        assert!(!vault.contains(&issued.serial_number).unwrap());
        assert!(vault.private_key(&issued.serial_number).is_err());
    }

    #[test]
    fn wrong_master_secret_cannot_open_the_container() {
        let store = Arc::new(MemoryStore::new());
        let vault = vault(&store);

        let issued = CertificateIssuer::new(RootDnDefaults::default())
            .issue_root("Vault Test Root")
            .unwrap();
        let key = issued.key_pair.unwrap();
        let cert = X509::from_der(&issued.der).unwrap();
        vault
            .store_ca_key(&issued.serial_number, &key, &cert, Uuid::new_v4())
            .unwrap();

        let other = KeyVault::new(
            store.clone(),
            store.clone(),
            MasterSecret::from_value("a different master secret".into()),
        );
        assert!(matches!(
            other.private_key(&issued.serial_number),
            Err(PkiError::Crypto(_))
        ));
    }

    #[test]
    fn generated_secrets_stay_on_the_alphabet() {
        let secret = generate_secret().unwrap();
        let value = secret.expose_secret();
        assert_eq!(value.len(), SECRET_LEN);
        assert!(value.bytes().all(|b| SECRET_ALPHABET.contains(&b)));
    }
}
