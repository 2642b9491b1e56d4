use std::{io, result};

use thiserror::Error;

pub type Result<T, E = Error> = result::Result<T, E>;

/// Error types for winmap operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("failed to map region: {0}")]
    MapFailed(#[source] io::Error),

    #[error("could not free enough mapped memory to satisfy the request")]
    RegionCollectionError,

    #[error("cursor is not associated with a file or points past end of file")]
    InvalidCursor,

    #[error("operation requires a {expected}-keyed file, cursor is keyed by {actual}")]
    WrongKeyKind {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("sliding buffer accessed outside its entered scope")]
    NotEntered,
}
