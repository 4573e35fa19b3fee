//! Error kinds callers can match on.
//!
//! Most fallible operations return `anyhow::Result`; the variants here
//! are the concrete causes worth distinguishing programmatically and can
//! be recovered with `Error::downcast_ref`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    /// A node definition names a component type the registry does not know.
    #[error("unknown component type '{0}'")]
    UnknownComponent(String),

    /// Building a node context failed; aborts the whole chain build.
    #[error("failed to build node '{id}'")]
    NodeBuild {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Definition bytes were rejected by the parser.
    #[error("invalid chain definition: {0}")]
    InvalidDefinition(String),

    /// A flow referenced a chain id absent from the pool.
    #[error("chain '{0}' not found in pool")]
    UnknownChain(String),

    /// The operation has no meaning for the receiver.
    #[error("{0} is not supported on a rule chain")]
    Unsupported(&'static str),
}
