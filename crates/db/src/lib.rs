pub mod indexes;
pub mod models;

pub use mongodb::{Client, Database};
