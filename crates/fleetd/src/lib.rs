//! Library surface for the `fleetd` binary: composition root, config,
//! ambient stack (store, token, events), CLI, and UDS server/client.

pub mod app;
pub mod cli;
pub mod client;
pub mod config;
pub mod events;
pub mod server;
pub mod store;
pub mod token;

pub use app::FleetApp;
pub use config::FleetConfig;
