//! Error types for the Atelier engine.

use crate::{EntityId, MutationKind};
use thiserror::Error;

/// All possible errors from the Atelier engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("a {kind:?} mutation is already in flight for entity {entity_id}")]
    MutationInFlight {
        entity_id: EntityId,
        kind: MutationKind,
    },

    #[error("patch does not apply to entity {0}")]
    KindMismatch(EntityId),

    #[error("unknown patch token")]
    UnknownToken,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
