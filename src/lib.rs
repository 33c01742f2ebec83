pub mod config;
pub mod departures;
pub mod error;
pub mod fetch;
pub mod gtfs;
pub mod ledger;
pub mod loader;
pub mod scheduler;
pub mod store;
