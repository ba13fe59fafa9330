//! Wacast Storage - persistence for campaigns, settings and media
//!
//! Repositories are async traits with a PostgreSQL implementation and an
//! in-memory one; media files live on the local filesystem.

pub mod db;
pub mod file;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use file::{sanitize_filename, FileStorage, LocalStorage, MediaStorage};
pub use models::*;
pub use repository::*;
