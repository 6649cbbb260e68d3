use shellcn_kernel::safe_nanoid;

/// An opaque transaction token.
///
/// Backends map it to a real database transaction; the in-memory store uses it
/// for tracing only and applies each transactional method under a single write
/// lock, which gives the same atomicity guarantee to readers.
#[derive(Debug, Clone)]
pub struct TxContext {
    id: String,
}

impl TxContext {
    #[must_use]
    pub fn new() -> Self {
        Self { id: safe_nanoid!() }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Default for TxContext {
    fn default() -> Self {
        Self::new()
    }
}
