//! User operations service. Only the favourites API is served here.

pub mod service;
pub mod store;

pub use service::UserFavService;
pub use store::UserFavStore;
