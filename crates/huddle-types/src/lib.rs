pub mod dto;
pub mod error;
pub mod models;
pub mod validate;

pub use error::ChatError;
