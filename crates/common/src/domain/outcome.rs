/// Upper bound on identifiers persisted in dedup tuples
pub const MAX_IDENTIFIER_LEN: usize = 255;

/// Upper bound on binary point values
pub const MAX_BINARY_VALUE_LEN: usize = 4096;

/// Result of an idempotent create.
///
/// `AlreadyExists` is the tombstone hit: the exact record was written before,
/// either by an earlier delivery of the same message or by a concurrent worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

impl CreateOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created)
    }
}
