pub mod cache;
pub mod engine_client;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::*;
pub use engine_client::*;
pub use error::*;
pub use handlers::{router as points_router, PointsState, TnxMessage};
pub use models::*;
pub use repository::*;
pub use service::*;
