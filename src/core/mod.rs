pub mod error;
pub mod package;
