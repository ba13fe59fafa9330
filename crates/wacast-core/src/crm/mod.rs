//! RetailCRM integration
//!
//! Used to narrow a campaign audience to customers who bought something
//! from a selected product group.

pub mod client;
pub mod filter;
pub mod rate_limiter;
pub mod service;

pub use client::{CrmClient, CrmCredentials, CrmError, Product};
pub use filter::{filter_by_category, FilterResult, GroupMatcher};
pub use rate_limiter::RateLimiter;
pub use service::CrmService;
