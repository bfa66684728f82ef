use thiserror::Error;

use crate::osm::ObjectId;

/// Failure source reported by an [`Assembler`](crate::Assembler) hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the engine. Violated invariants (stale handles,
/// `track` after `prepare`, offsets that are not commit points) are
/// programming errors and panic instead.
#[derive(Debug, Error)]
pub enum Error {
    /// A `complete_relation` hook failed. The second pass stops; the engine
    /// performs no recovery.
    #[error("assembly of relation {id} failed: {source}")]
    Assembler {
        /// Id of the relation the hook rejected.
        id: ObjectId,
        source: HookError,
    },
}
