// Shared library for marketplace services
pub mod models;
pub mod utils;
