//! AES-256-GCM with detached tags.
//!
//! Two IV sizes are in use:
//! - 12 bytes for DEK wrapping (stored as separate iv/tag/ciphertext fields)
//! - 16 bytes for credential ciphertexts, wire format
//!   `[IV:16][tag:16][ciphertext]`

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::typenum::Unsigned;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{Aes256Gcm, AesGcm};

use crate::error::CryptoError;
use crate::types::{AES_GCM_TAG_LENGTH, AES_KEY_LENGTH, CREDENTIAL_IV_LENGTH};

/// AES-256-GCM with a 128-bit nonce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Output of a detached seal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub iv: Vec<u8>,
    pub tag: [u8; AES_GCM_TAG_LENGTH],
    pub ciphertext: Vec<u8>,
}

/// Fill a buffer from the OS CSPRNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(buf)
}

fn check_key(key: &[u8]) -> Result<(), CryptoError> {
    if key.len() != AES_KEY_LENGTH {
        return Err(CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: key.len(),
        });
    }
    Ok(())
}

fn seal_with<C>(key: &[u8], iv: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Sealed, CryptoError>
where
    C: AeadInPlace + KeyInit,
{
    check_key(key)?;
    let nonce_len = <<C as AeadCore>::NonceSize as Unsigned>::USIZE;
    if iv.len() != nonce_len {
        return Err(CryptoError::InvalidIvLength {
            expected: nonce_len,
            got: iv.len(),
        });
    }
    let cipher = C::new_from_slice(key).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(iv), aad, &mut buffer)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut tag_bytes = [0u8; AES_GCM_TAG_LENGTH];
    tag_bytes.copy_from_slice(tag.as_slice());
    Ok(Sealed {
        iv: iv.to_vec(),
        tag: tag_bytes,
        ciphertext: buffer,
    })
}

fn open_with<C>(
    key: &[u8],
    iv: &[u8],
    tag: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError>
where
    C: AeadInPlace + KeyInit,
{
    check_key(key)?;
    let nonce_len = <<C as AeadCore>::NonceSize as Unsigned>::USIZE;
    if iv.len() != nonce_len {
        return Err(CryptoError::InvalidIvLength {
            expected: nonce_len,
            got: iv.len(),
        });
    }
    if tag.len() != AES_GCM_TAG_LENGTH {
        return Err(CryptoError::InvalidTagLength {
            expected: AES_GCM_TAG_LENGTH,
            got: tag.len(),
        });
    }
    let cipher = C::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(iv),
            aad,
            &mut buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(buffer)
}

/// Encrypt with a 12-byte IV, returning IV, tag and ciphertext separately.
pub fn seal_detached(
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Sealed, CryptoError> {
    seal_with::<Aes256Gcm>(key, iv, plaintext, aad)
}

/// Decrypt a 12-byte-IV detached ciphertext. Fails on any tag mismatch.
pub fn open_detached(
    key: &[u8],
    iv: &[u8],
    tag: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    open_with::<Aes256Gcm>(key, iv, tag, ciphertext, aad)
}

/// Encrypt a credential with a fresh random 16-byte IV.
///
/// Returns: [IV:16][tag:16][ciphertext]
pub fn seal_credential(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let iv = random_bytes::<CREDENTIAL_IV_LENGTH>()?;
    let sealed = seal_with::<Aes256Gcm16>(key, &iv, plaintext, &[])?;

    let mut result =
        Vec::with_capacity(CREDENTIAL_IV_LENGTH + AES_GCM_TAG_LENGTH + sealed.ciphertext.len());
    result.extend_from_slice(&sealed.iv);
    result.extend_from_slice(&sealed.tag);
    result.extend_from_slice(&sealed.ciphertext);
    Ok(result)
}

/// Decrypt a credential blob in the [IV:16][tag:16][ciphertext] format.
pub fn open_credential(key: &[u8], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < CREDENTIAL_IV_LENGTH + AES_GCM_TAG_LENGTH {
        return Err(CryptoError::DataTooShort);
    }
    let (iv, rest) = blob.split_at(CREDENTIAL_IV_LENGTH);
    let (tag, ciphertext) = rest.split_at(AES_GCM_TAG_LENGTH);
    open_with::<Aes256Gcm16>(key, iv, tag, ciphertext, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WRAP_IV_LENGTH;

    fn random_key() -> [u8; 32] {
        random_bytes::<32>().unwrap()
    }

    #[test]
    fn detached_round_trip() {
        let key = random_key();
        let iv = random_bytes::<WRAP_IV_LENGTH>().unwrap();
        let sealed = seal_detached(&key, &iv, b"Hello, World!", b"").unwrap();
        let opened = open_detached(&key, &sealed.iv, &sealed.tag, &sealed.ciphertext, b"").unwrap();
        assert_eq!(opened, b"Hello, World!");
    }

    #[test]
    fn detached_rejects_wrong_iv_length() {
        let key = random_key();
        let err = seal_detached(&key, &[0u8; 16], b"data", b"").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidIvLength { expected: 12, got: 16 }));
    }

    #[test]
    fn detached_aad_mismatch_fails() {
        let key = random_key();
        let iv = random_bytes::<WRAP_IV_LENGTH>().unwrap();
        let sealed = seal_detached(&key, &iv, b"data", b"context-a").unwrap();
        let err =
            open_detached(&key, &sealed.iv, &sealed.tag, &sealed.ciphertext, b"context-b")
                .unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
    }

    #[test]
    fn detached_tampered_tag_fails() {
        let key = random_key();
        let iv = random_bytes::<WRAP_IV_LENGTH>().unwrap();
        let mut sealed = seal_detached(&key, &iv, b"data", b"").unwrap();
        sealed.tag[0] ^= 0x01;
        assert!(open_detached(&key, &sealed.iv, &sealed.tag, &sealed.ciphertext, b"").is_err());
    }

    #[test]
    fn credential_round_trip() {
        let key = random_key();
        let blob = seal_credential(&key, b"api-secret").unwrap();
        assert_eq!(open_credential(&key, &blob).unwrap(), b"api-secret");
    }

    #[test]
    fn credential_layout() {
        let key = random_key();
        let blob = seal_credential(&key, b"12345").unwrap();
        assert_eq!(blob.len(), CREDENTIAL_IV_LENGTH + AES_GCM_TAG_LENGTH + 5);
    }

    #[test]
    fn credential_different_ciphertext_each_time() {
        let key = random_key();
        let a = seal_credential(&key, b"same").unwrap();
        let b = seal_credential(&key, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn credential_every_bit_flip_is_rejected() {
        let key = random_key();
        let blob = seal_credential(&key, b"secret").unwrap();
        for byte in 0..blob.len() {
            for bit in 0..8 {
                let mut tampered = blob.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    open_credential(&key, &tampered).is_err(),
                    "flip at byte {byte} bit {bit} was accepted"
                );
            }
        }
    }

    #[test]
    fn credential_wrong_key_fails() {
        let blob = seal_credential(&random_key(), b"secret").unwrap();
        let err = open_credential(&random_key(), &blob).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
    }

    #[test]
    fn credential_truncated_fails() {
        let key = random_key();
        let err = open_credential(&key, &[0u8; 31]).unwrap_err();
        assert!(matches!(err, CryptoError::DataTooShort));
    }

    #[test]
    fn credential_empty_plaintext() {
        let key = random_key();
        let blob = seal_credential(&key, b"").unwrap();
        assert_eq!(blob.len(), 32);
        assert!(open_credential(&key, &blob).unwrap().is_empty());
    }

    #[test]
    fn rejects_short_key() {
        assert!(matches!(
            seal_credential(&[0u8; 16], b"x"),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 16 })
        ));
    }
}
