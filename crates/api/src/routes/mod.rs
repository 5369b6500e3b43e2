pub mod transcript;
pub mod translate;
