pub mod batch;
pub mod config;
pub mod db;
pub mod mapper;
pub mod model;
pub mod registry;
pub mod sync;
