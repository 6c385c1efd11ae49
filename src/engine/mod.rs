pub mod comparator;
pub mod error;
pub mod evaluator;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod repository;
pub mod service;

pub use comparator::*;
pub use error::*;
pub use evaluator::{check_criteria, check_reward_criteria, DataMap};
pub use handlers::*;
pub use metrics::*;
pub use models::*;
pub use repository::*;
pub use service::*;
