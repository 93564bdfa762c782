//! Error types for the shop RPC services.
//!
//! This module defines the central `Error` enum returned by the service
//! handlers. It implements `From<Error>` for `tonic::Status` so handlers can
//! propagate failures with `?` and clients receive a meaningful status code.
//!
//! ## Error Cases
//! - `InvalidRequest`: The request was malformed or out of bounds.
//! - `NotFound`: The referenced goods, order or favourite does not exist.
//! - `InsufficientStock`: A sell would drive stock below zero.
//! - `AlreadyExists`: The record being created is already present.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the shop RPC services.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The client request was invalid or exceeded constraints.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The referenced entity does not exist.
    #[error("{entity} not found")]
    NotFound { entity: String },

    /// Not enough stock to satisfy a sell.
    #[error("Insufficient stock for goods {goods_id}: requested {requested}, available {available}")]
    InsufficientStock {
        goods_id: i32,
        requested: i32,
        available: i32,
    },

    /// The record being created is already present.
    #[error("{entity} already exists")]
    AlreadyExists { entity: String },
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::NotFound { entity } => Status::not_found(format!("{entity} not found")),
            e @ Error::InsufficientStock { .. } => Status::resource_exhausted(e.to_string()),
            Error::AlreadyExists { entity } => {
                Status::already_exists(format!("{entity} already exists"))
            }
        }
    }
}
