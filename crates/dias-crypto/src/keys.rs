//! Collaboration keys
//!
//! Every participant of a collaboration holds the same keys. Writers hold
//! the Ed25519 signing key, readers only the verifying key. Delta bodies are
//! sealed as `encrypt(signature:64 || body)`.

use std::sync::Arc;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SIGNATURE_LENGTH};
use rand::rngs::OsRng;

use dias_core::{DiasError, DiasResult};

use crate::{ChaChaCipher, Cipher, KEY_SIZE};

/// Keys shared by the participants of one collaboration
#[derive(Clone)]
pub struct CollaborationKeys {
    signing: Option<SigningKey>,
    verifying: VerifyingKey,
    cipher: Arc<dyn Cipher>,
}

impl CollaborationKeys {
    /// Fresh write keys
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        Self::from_secret(&signing.to_bytes(), &ChaChaCipher::generate_key())
    }

    /// Write keys from a signing secret and a symmetric key
    pub fn from_secret(secret: &[u8; 32], cipher_key: &[u8; KEY_SIZE]) -> Self {
        let signing = SigningKey::from_bytes(secret);
        CollaborationKeys {
            verifying: signing.verifying_key(),
            signing: Some(signing),
            cipher: Arc::new(ChaChaCipher::new(cipher_key)),
        }
    }

    /// Read-only keys: can open sealed bodies but not produce them
    pub fn read_only(public: &[u8; 32], cipher_key: &[u8; KEY_SIZE]) -> DiasResult<Self> {
        let verifying = VerifyingKey::from_bytes(public).map_err(|_| DiasError::InvalidSignature)?;
        Ok(CollaborationKeys {
            signing: None,
            verifying,
            cipher: Arc::new(ChaChaCipher::new(cipher_key)),
        })
    }

    /// Same keys without the signing half
    pub fn to_read_only(&self) -> Self {
        CollaborationKeys {
            signing: None,
            verifying: self.verifying,
            cipher: Arc::clone(&self.cipher),
        }
    }

    pub fn can_write(&self) -> bool {
        self.signing.is_some()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying.to_bytes()
    }

    /// Cipher shared by the collaboration, also used for the store values
    pub fn cipher(&self) -> Arc<dyn Cipher> {
        Arc::clone(&self.cipher)
    }

    /// Sign then encrypt a body
    pub fn sign_and_encrypt(&self, body: &[u8]) -> DiasResult<Vec<u8>> {
        let signing = self
            .signing
            .as_ref()
            .ok_or_else(|| DiasError::Config("collaboration keys are read-only".into()))?;
        let signature = signing.sign(body);

        let mut signed = Vec::with_capacity(SIGNATURE_LENGTH + body.len());
        signed.extend_from_slice(&signature.to_bytes());
        signed.extend_from_slice(body);
        self.cipher.encrypt(&signed)
    }

    /// Decrypt then verify a sealed body
    pub fn decrypt_and_verify(&self, sealed: &[u8]) -> DiasResult<Vec<u8>> {
        let signed = self.cipher.decrypt(sealed)?;
        if signed.len() < SIGNATURE_LENGTH {
            return Err(DiasError::InvalidSignature);
        }
        let (sig, body) = signed.split_at(SIGNATURE_LENGTH);
        let sig: [u8; SIGNATURE_LENGTH] = sig.try_into().map_err(|_| DiasError::InvalidSignature)?;
        self.verifying
            .verify(body, &Signature::from_bytes(&sig))
            .map_err(|_| DiasError::InvalidSignature)?;
        Ok(body.to_vec())
    }
}

impl std::fmt::Debug for CollaborationKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaborationKeys")
            .field("can_write", &self.can_write())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let keys = CollaborationKeys::generate();
        let sealed = keys.sign_and_encrypt(b"delta").unwrap();
        assert_eq!(keys.decrypt_and_verify(&sealed).unwrap(), b"delta");
    }

    #[test]
    fn test_read_only_can_open_but_not_seal() {
        let keys = CollaborationKeys::generate();
        let reader = keys.to_read_only();
        let sealed = keys.sign_and_encrypt(b"delta").unwrap();
        assert_eq!(reader.decrypt_and_verify(&sealed).unwrap(), b"delta");
        assert!(reader.sign_and_encrypt(b"delta").is_err());
        assert!(!reader.can_write());
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let cipher_key = [7u8; KEY_SIZE];
        let ours = CollaborationKeys::from_secret(&[1u8; 32], &cipher_key);
        let theirs = CollaborationKeys::from_secret(&[2u8; 32], &cipher_key);
        let sealed = theirs.sign_and_encrypt(b"forged").unwrap();
        assert!(matches!(
            ours.decrypt_and_verify(&sealed),
            Err(DiasError::InvalidSignature)
        ));
    }
}
