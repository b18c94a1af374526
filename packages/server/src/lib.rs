pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod lifecycle;
pub mod packer;
pub mod poller;
pub mod registry;
pub mod runner;
pub mod store;
pub mod translator;
