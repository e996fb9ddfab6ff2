pub mod catalog;
pub mod client;
pub mod compactor;
pub mod config;
pub mod identity;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod store;
pub mod view;
pub mod wal;
