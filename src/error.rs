use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Fatal failure modes of the reader. Lookup misses and unresolvable
/// locations are ordinary return values, not errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The blob framing is malformed; nothing after the bad spot can be
    /// trusted.
    #[error("malformed PBF framing: {0}")]
    BadFraming(&'static str),

    #[error("cannot decode PBF block: {0}")]
    Decode(#[from] quick_protobuf::Error),

    #[error("unsupported required feature in OSMHeader: {0}")]
    UnsupportedFeature(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
