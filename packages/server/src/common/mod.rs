//! Cross-cutting types shared by every domain: time, cursors, pagination,
//! errors, and authorization.

pub mod auth;
pub mod cursor;
pub mod error;
pub mod id;
pub mod pagination;

pub use error::ApiError;
