//! DurableStore trait definition

use crate::StoreResult;

/// A persistence backend holding the latest snapshot of some state `S`
///
/// Implementations are synchronous; each call is expected to be short (a
/// single file replace or a single row upsert). `save` must leave either the
/// previous or the new snapshot readable, never a mix of both.
pub trait DurableStore<S>: Send + Sync {
    /// Read the last saved snapshot, `None` if nothing was ever saved
    fn load(&self) -> StoreResult<Option<S>>;

    /// Replace the stored snapshot
    fn save(&self, state: &S) -> StoreResult<()>;

    /// Forget the stored snapshot
    fn clear(&self) -> StoreResult<()>;

    /// Short human-readable description (backend and location)
    fn describe(&self) -> String;
}
