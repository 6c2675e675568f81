use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input. Raised before any collaborator is contacted.
    #[error("validation error: {0}")]
    Validation(String),

    /// The supplied key does not control the referenced output.
    #[error("ownership error: {0}")]
    Ownership(String),

    #[error("range error: {0}")]
    Range(String),

    #[error("liquidity error: {0}")]
    Liquidity(#[from] LiquidityError),

    /// A freshly produced signature failed re-verification. Always fatal.
    #[error("signature error: {0}")]
    Signature(String),

    /// Opaque failure reported by the node collaborator.
    #[error("network error: {0}")]
    Network(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LiquidityError {
    #[error("no spendable outputs available")]
    NoSpendableOutputs,

    #[error("not enough UTXOs to provide two dummy inputs{}", reason.as_ref().map(|r| format!(" (last split failure: {r})")).unwrap_or_default())]
    InsufficientDummies { reason: Option<String> },

    #[error("insufficient funds to cover price + fee: need {needed}, have {available}")]
    PriceAndFee { needed: u64, available: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub(crate) fn range(msg: impl Into<String>) -> Self {
        Error::Range(msg.into())
    }

    pub(crate) fn signature(msg: impl Into<String>) -> Self {
        Error::Signature(msg.into())
    }

    pub(crate) fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }
}
