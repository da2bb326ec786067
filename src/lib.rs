pub mod anonymize;
pub mod cmd;
pub mod config;
pub mod db;
pub mod emit;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod schema;
pub mod seed;
pub mod traverse;
pub mod validate;

pub use error::{Result, SubsetError};
