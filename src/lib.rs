pub mod app;
pub mod cache;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod domain;
pub mod download_api;
pub mod error;
pub mod events;
pub mod ids;
pub mod output;
pub mod query;
pub mod store;
pub mod tracker;
pub mod url;
