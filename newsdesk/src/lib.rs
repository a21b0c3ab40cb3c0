// Library interface for newsdesk modules
// This allows tests and other binaries to import modules

pub mod cache;
pub mod client;
pub mod error;
pub mod gateway;
pub mod persist;
pub mod router;
pub mod server;
