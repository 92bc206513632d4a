use crate::address::{AddressRange, AddressV4};

/// Errors surfaced by the reservation engine and its collaborators.
///
/// None of these are fatal to the process; they are reported back to the
/// caller of the operation that produced them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    /// The configuration document failed to parse or lacks required structure.
    #[error("Malformed configuration: {0}")]
    MalformedConfig(String),

    #[error("Reservation with MAC address {0} already exists")]
    DuplicateMac(String),

    #[error("Reservation with IP address {0} already exists")]
    DuplicateAddress(AddressV4),

    /// Carries the range the address was expected to fall into.
    #[error("IP address {address} must be within the reserved range {range}")]
    OutOfRange {
        address: AddressV4,
        range: AddressRange,
    },

    #[error("No free address left in the reserved range {0}")]
    RangeExhausted(AddressRange),

    #[error("Reservation not found: {0}")]
    NotFound(String),

    /// The server's own tooling rejected the written configuration.
    #[error("Configuration validation failed after write: {0}")]
    ValidationFailed(String),

    #[error("Command `{command}` failed: {output}")]
    Command { command: String, output: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The HTTP listener could not be started.
    #[error("Failed to serve: {0}")]
    Serve(#[from] warp::Error),
}

impl Error {
    /// HTTP status code used when the error is reported over the web API.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidFormat(_)
            | Error::InvalidMac(_)
            | Error::InvalidAddress(_)
            | Error::OutOfRange { .. } => 400,
            Error::NotFound(_) => 404,
            Error::DuplicateMac(_) | Error::DuplicateAddress(_) | Error::RangeExhausted(_) => 409,
            Error::MalformedConfig(_)
            | Error::ValidationFailed(_)
            | Error::Command { .. }
            | Error::Io(_)
            | Error::Json(_)
            | Error::Serve(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
