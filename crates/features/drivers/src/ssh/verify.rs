use russh_keys::key::PublicKey;

/// Host-key verification policy.
///
/// The default deployment accepts any host key; this is a known limitation kept
/// deliberately, with the seam left open for stricter policies.
pub trait HostKeyVerifier: Send + Sync {
    fn verify(&self, key: &PublicKey) -> bool;
}

/// Accepts every host key.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllVerifier;

impl HostKeyVerifier for AcceptAllVerifier {
    fn verify(&self, _key: &PublicKey) -> bool {
        true
    }
}

/// Accepts only a host key whose SHA-256 fingerprint matches the pinned value.
#[derive(Debug, Clone)]
pub struct PinnedFingerprintVerifier {
    fingerprint: String,
}

impl PinnedFingerprintVerifier {
    #[must_use]
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self { fingerprint: fingerprint.into() }
    }
}

impl HostKeyVerifier for PinnedFingerprintVerifier {
    fn verify(&self, key: &PublicKey) -> bool {
        key.fingerprint() == self.fingerprint
    }
}
