pub mod aggregate;
pub mod config;
pub mod document;
pub mod export;
pub mod lineup;
pub mod model;
pub mod odds;
pub mod sqlite_store;
pub mod store;
