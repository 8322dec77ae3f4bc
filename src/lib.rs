pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod explorer;
pub mod mapping;
pub mod normalize;
pub mod output;
pub mod pool;
pub mod resolver;
pub mod store;
pub mod table;
