//! Data models for the countries backend.
//!
//! Wire format is camelCase JSON.

mod country;
mod user;

pub use country::*;
pub use user::*;
