pub mod app;
pub mod cache;
pub mod cashback;
pub mod cashback_handlers;
pub mod error;
pub mod gateway;
pub mod inventory;
pub mod notify;
pub mod order;
pub mod refund;
pub mod refund_handlers;
pub mod repo;
pub mod webhook;

pub use app::{build_router, AppState};
pub use error::EngineError;
