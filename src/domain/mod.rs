pub mod alarm;
pub mod error;
pub mod models;
pub mod settings;
