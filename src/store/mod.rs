pub mod checkpoint_repository;
pub mod database;
pub mod models;
pub mod registry_repository;
pub mod sell_state_repository;

pub use checkpoint_repository::CheckpointRepository;
pub use database::Database;
pub use models::{SellRecord, StoreStats, TokenCandidate};
pub use registry_repository::RegistryRepository;
pub use sell_state_repository::SellStateRepository;
