//! Inventory service.
//!
//! ## Structure
//!
//! - [`store`] - in-memory stock levels and per-order sell records.
//! - [`service`] - `inventory.Inventory` gRPC handlers.
//! - [`reback`] - background listener returning stock for cancelled orders.

pub mod reback;
pub mod service;
pub mod store;

pub use reback::RebackHandler;
pub use service::InventoryService;
pub use store::InventoryStore;
