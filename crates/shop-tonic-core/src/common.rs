//! Shared RPC contracts and error definitions for the shop services.
//!
//! ## Submodules
//!
//! - [`error`] - Service error type converted into `tonic::Status`.
//! - [`proto`] - Generated message and service definitions.

pub mod error;
pub use error::{Error, Result};

/// gRPC service and message definitions generated from `proto/`.
pub mod proto {
    /// `inventory.Inventory` service and messages.
    pub mod inventory {
        tonic::include_proto!("inventory");
    }

    /// `userop.UserFav` service and messages.
    pub mod userop {
        tonic::include_proto!("userop");
    }

    /// Encoded descriptor set covering every shop proto, for gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("shop_descriptor");
}
