//! API request handlers

pub mod campaigns;
pub mod form;
pub mod health;
pub mod messages;
pub mod retailcrm;
pub mod settings;

pub use health::*;
