pub mod cache;
pub mod cart;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod counts;
pub mod debounce;
pub mod domain;
pub mod download;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod output;
pub mod query;
pub mod session;
pub mod store;
pub mod window;
