use aead::inout::InOutBuf;
use aead::{Key, Nonce};
use getrandom::fill;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::MasterKey;
use crate::types::{Aes, CipherSuite, HEADER_LEN, NONCE_LEN, PAYLOAD_VERSION_V1, TAG_LEN};

/// An AEAD sealer bound to one 256-bit key.
///
/// `Sealer` is cheap to construct and stateless afterwards; seal/open may be called
/// concurrently. The associated data binds a payload to its logical location
/// (identity id and version), so a blob copied between rows fails authentication.
///
/// ### Example
/// ```rust
/// use shellcn_crypto::prelude::*;
///
/// # fn main() -> Result<(), CryptoError> {
/// let key = MasterKey::from_bytes([7u8; 32]);
/// let sealer = Sealer::<ChaCha>::new(&key)?;
///
/// let blob = sealer.seal(b"secret", b"identity:1")?;
/// let plain = sealer.open(&blob, b"identity:1")?;
/// assert_eq!(plain.as_slice(), b"secret");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Sealer<C = Aes>
where
    C: CipherSuite,
{
    cipher: C,
}

impl<C> Sealer<C>
where
    C: CipherSuite,
{
    /// Initializes a sealer from a derived master key.
    ///
    /// # Errors
    /// Returns [`CryptoError::InvalidConfiguration`] if the cipher rejects the key
    /// material (wrong length for the selected suite).
    pub fn new(key: &MasterKey) -> Result<Self, CryptoError> {
        let key = Key::<C>::try_from(key.as_bytes()).map_err(|_| {
            CryptoError::InvalidConfiguration {
                message: "Invalid key length, must be 32 bytes".into(),
                context: None,
            }
        })?;
        Ok(Self { cipher: C::new(&key) })
    }

    /// Generates a unique random nonce.
    #[inline]
    fn next_nonce() -> Nonce<C> {
        let mut nonce = Nonce::<C>::default();
        fill(&mut nonce).expect("System RNG unavailable for nonce generation");
        nonce
    }

    /// Encrypts `data` into a framed blob bound to `aad`.
    ///
    /// # Errors
    /// * [`CryptoError::Encryption`] if the AEAD encryption fails.
    pub fn seal(&self, data: impl AsRef<[u8]>, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let data = data.as_ref();
        let nonce = Self::next_nonce();

        let mut buf = Vec::with_capacity(HEADER_LEN + NONCE_LEN + data.len() + TAG_LEN);
        buf.push(PAYLOAD_VERSION_V1);
        buf.push(0); // flags, reserved
        buf.extend_from_slice(&nonce);
        buf.extend_from_slice(data);

        let (_hdr, rest) = buf.split_at_mut(HEADER_LEN);
        let (_nonce_part, data_part) = rest.split_at_mut(nonce.len());
        let in_out = InOutBuf::from(data_part);

        let tag = self.cipher.encrypt_inout_detached(&nonce, aad, in_out).map_err(|_| {
            CryptoError::Encryption {
                message: "AEAD encryption failed".into(),
                context: None,
            }
        })?;

        buf.extend_from_slice(tag.as_slice());
        Ok(buf)
    }

    /// Decrypts a framed blob back into plaintext.
    ///
    /// # Errors
    /// * [`CryptoError::InvalidPayload`] if the blob is malformed or its version is unknown.
    /// * [`CryptoError::Tampered`] if authentication fails (wrong key, wrong `aad`,
    ///   or a modified blob).
    pub fn open(&self, blob: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if blob.len() < (HEADER_LEN + NONCE_LEN + TAG_LEN) {
            return Err(CryptoError::InvalidPayload {
                message: format!(
                    "Payload too short ({} bytes). Expected at least {} bytes",
                    blob.len(),
                    HEADER_LEN + NONCE_LEN + TAG_LEN
                )
                .into(),
                context: None,
            });
        }

        let version = blob[0];
        if version != PAYLOAD_VERSION_V1 {
            return Err(CryptoError::InvalidPayload {
                message: "Unsupported payload version".into(),
                context: Some(format!("version={version}").into()),
            });
        }

        let rest = &blob[HEADER_LEN..];
        let (nonce_slice, rest) = rest.split_at(NONCE_LEN);
        let (ciphertext, tag_slice) = rest.split_at(rest.len() - TAG_LEN);

        let nonce = nonce_slice.try_into().map_err(|_| CryptoError::InvalidPayload {
            message: "Invalid nonce length".into(),
            context: None,
        })?;

        let tag = tag_slice.try_into().map_err(|_| CryptoError::InvalidPayload {
            message: "Invalid tag length".into(),
            context: None,
        })?;

        let mut buf = Zeroizing::new(ciphertext.to_vec());
        let in_out = InOutBuf::from(&mut buf[..]);

        self.cipher
            .decrypt_inout_detached(&nonce, aad, in_out, &tag)
            .map_err(|_| CryptoError::Tampered { context: None })?;

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChaCha;

    fn setup_sealer() -> Sealer<ChaCha> {
        let key = MasterKey::from_bytes([42u8; 32]);
        Sealer::new(&key).expect("Sealer should build from a 32-byte key")
    }

    #[test]
    fn test_nonce_sequence() {
        let n1 = Sealer::<ChaCha>::next_nonce();
        let n2 = Sealer::<ChaCha>::next_nonce();

        assert_ne!(n1, n2);
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let sealer = setup_sealer();
        let data = b"sensitive credential data";
        let aad = b"identity:7:version:1";

        let sealed = sealer.seal(data, aad).unwrap();
        let opened = sealer.open(&sealed, aad).unwrap();

        assert_eq!(data.as_slice(), opened.as_slice());
    }

    #[test]
    fn test_open_fails_with_wrong_aad() {
        let sealer = setup_sealer();
        let sealed = sealer.seal(b"data", b"correct-context").unwrap();

        let result = sealer.open(&sealed, b"wrong-context");
        assert!(
            matches!(result, Err(CryptoError::Tampered { .. })),
            "Open must fail when the associated data does not match"
        );
    }

    #[test]
    fn test_open_fails_with_wrong_key() {
        let sealer = setup_sealer();
        let sealed = sealer.seal(b"data", b"ctx").unwrap();

        let other = Sealer::<ChaCha>::new(&MasterKey::from_bytes([9u8; 32])).unwrap();
        assert!(matches!(other.open(&sealed, b"ctx"), Err(CryptoError::Tampered { .. })));
    }

    #[test]
    fn test_bitflip_anywhere_is_tampered() {
        let sealer = setup_sealer();
        let sealed = sealer.seal(b"payload bytes", b"ctx").unwrap();

        // Flip one bit in every position past the header: nonce, ciphertext, tag.
        for idx in HEADER_LEN..sealed.len() {
            let mut corrupted = sealed.clone();
            corrupted[idx] ^= 0x01;
            let result = sealer.open(&corrupted, b"ctx");
            assert!(result.is_err(), "bit flip at {idx} must not decrypt");
        }
    }

    #[test]
    fn test_truncated_payload_is_invalid() {
        let sealer = setup_sealer();
        let result = sealer.open(&[1, 0, 2, 3], b"ctx");
        assert!(matches!(result, Err(CryptoError::InvalidPayload { .. })));
    }
}
