//! Cryptographic primitives for the credential vault.
//!
//! Three concerns live here, each stateless and safe for concurrent use:
//!
//! * **AEAD sealing** ([`Sealer`]): authenticated encryption of credential payloads
//!   with a framed, versioned blob format.
//! * **Password hashing** ([`password`]): Argon2id verifiers for local accounts,
//!   with constant-time verification.
//! * **Master-key derivation** ([`kdf`]): a memory-hard KDF whose parameters are
//!   recorded alongside the derived key's metadata so old payloads stay readable.
//!
//! ## Payload Format & Versioning
//!
//! Sealed payloads are stored as a versioned binary blob with an explicit header:
//!
//! ```text
//! [V(1)][FLAGS(1)][NONCE(12)][CIPHERTEXT(N)][TAG(16)]
//! ```
//!
//! The header enables forward-compatible upgrades; the `FLAGS` byte is reserved.
//!
//! ## Nonce Policy
//!
//! Every seal uses a **random 96-bit nonce**. This is the standard approach for
//! `AES-GCM` and `ChaCha20Poly1305`, but it is probabilistic: rotate keys before
//! per-key encryption volume makes collisions plausible.

mod error;
pub mod kdf;
pub mod password;
mod seal;
mod types;

pub use error::{CryptoError, CryptoErrorExt};
pub use kdf::{KdfParams, MasterKey, derive_master_key, key_verifier, make_salt};
pub use password::{hash_password, verify_password};
pub use seal::Sealer;
pub use types::{Aes, ChaCha, CipherSuite};

pub mod prelude {
    pub use crate::error::{CryptoError, CryptoErrorExt};
    pub use crate::kdf::{KdfParams, MasterKey, derive_master_key};
    pub use crate::seal::Sealer;
    pub use crate::types::{Aes, ChaCha, CipherSuite};
}
