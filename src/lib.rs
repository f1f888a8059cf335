// Configuration loading
pub mod config;

// Entity contract and identifiers
pub mod entity;

// Structural patches over entity state
pub mod patch;

// Authoritative entity store and change tracking
pub mod state;

// Per-client projection and acknowledgement tracking
pub mod client;

// Wire message shapes
pub mod protocol;

// Replication coordinator and runtime loop
pub mod server;

// Connection providers (local channel, WebSocket)
pub mod transport;
