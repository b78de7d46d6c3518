//! Payload parse failures.

use thiserror::Error;

/// Why a raw agent payload could not be interpreted.
///
/// These never escape the formatter; they are rendered into the degraded
/// report instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("payload has no all_results=[...] marker")]
    MissingMarker,

    #[error("all_results list is not terminated")]
    UnterminatedList,
}
