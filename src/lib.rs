//! Isle Sync - movement synchronization for a multiplayer island platformer
//!
//! The `sync` module holds the prediction/reconciliation core shared by
//! clients and the server. The remaining modules host the authoritative
//! server: session loop, WebSocket protocol and HTTP surface.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod sync;
pub mod util;
pub mod ws;
