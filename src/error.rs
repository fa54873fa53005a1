//! Main Crate Error

#[derive(thiserror::Error, Debug)]
/// Reflector crate error enum.
pub enum Error {
    /// Ids are exactly [ID_SIZE](crate::common::ID_SIZE) bytes, an empty target included.
    #[error("Invalid Id size, expected 48, got {0}")]
    InvalidIdSize(usize),

    #[error("Invalid Id encoding: {0}")]
    /// Id string is not valid hex.
    InvalidIdEncoding(#[from] hex::FromHexError),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Failed to parse packet bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    /// Indicates that the message transaction_id is not four bytes.
    #[error("Invalid transaction_id: {0:?}")]
    InvalidTransactionId(Vec<u8>),

    /// Compact node info is neither 54 (IPv4) nor 66 (IPv6) bytes.
    #[error("Invalid compact node info length: {0}")]
    InvalidNodeEncoding(usize),

    /// The message is a valid bencode dictionary but not a known request, response or error.
    #[error("Invalid message: {0}")]
    InvalidMessage(&'static str),
}

/// Alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
