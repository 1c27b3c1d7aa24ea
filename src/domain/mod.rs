pub mod models;
pub mod modes;
pub mod settings;
