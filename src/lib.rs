pub mod app;
pub mod cache;
pub mod catalog;
pub mod client;
pub mod config;
pub mod confirm;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod hierarchy;
pub mod index;
pub mod output;
pub mod resolver;
pub mod store;
pub mod table;
