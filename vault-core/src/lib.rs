pub mod config;
pub mod constants;
pub mod store;
pub mod keys;
pub mod engine;
pub mod events;
pub mod backup;
pub mod recovery;
pub mod scheduler;
pub mod retention;
pub mod verify;
pub mod worker;
pub mod error;

pub use error::{Result, VaultError};
