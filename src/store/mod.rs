//! Persistence layer (SQLite)

pub mod db;

pub use db::{LevyDb, PaymentInsert};
