//! sharefs server library
//!
//! Publishes local directories ("shares") to remote peers. Requests are
//! dispatched per caller to a tree of the shares that caller may see, each
//! share backed by a file server running as the share's owning identity.
//!
//! - [`RequestDispatcher`] - Permission gate and per-request tree assembly
//! - [`UserServer`] - Supervised per-identity file server
//! - [`LockTable`] - Locks shared by every request
//! - [`Config`] - TOML configuration

pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod launcher;
pub mod locks;
pub mod share;
pub mod telemetry;
pub mod user_server;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigError, ServerSettings};
pub use dispatcher::{
    Connector, DispatcherOptions, ProtocolServer, RequestDispatcher, ServerAddr, is_write_method,
    status_for_error,
};
pub use launcher::{
    LaunchedServer, Launcher, ServeArgs, ServeArgsError, ServerProcess, SudoLauncher,
    announce_address,
};
pub use locks::{LockDepth, LockError, LockInfo, LockTable};
pub use share::{Permission, Permissions, Share, SharePermissions};
pub use user_server::{ServerState, ServerStatus, UserServer};
