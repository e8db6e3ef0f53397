pub mod backend;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod data_types;
pub mod database;
pub mod registry;
pub mod repository;
pub mod utils;
