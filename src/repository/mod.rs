pub mod database;
pub mod models;
pub mod transfer_repository;

pub use database::Database;
pub use models::{EventFilter, FacilitatorStats, SenderWatermark, TransferEvent};
pub use transfer_repository::TransferEventRepository;
