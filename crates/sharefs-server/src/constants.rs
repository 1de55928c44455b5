//! Server configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Pause between a user server exiting and its relaunch.
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Bound on each non-streaming call to a user server.
pub const DEFAULT_OP_TIMEOUT: Duration = sharefs_vfs::remote::DEFAULT_OP_TIMEOUT;

/// Lifetime of cached metadata in each share adapter.
pub const DEFAULT_STAT_CACHE_TTL: Duration = Duration::from_secs(1);

/// Subcommand a user server is launched with.
pub const SERVE_REMOTE_FS_COMMAND: &str = "serve-remote-fs";

/// Program used to switch to a share's owning identity.
pub const DEFAULT_SUDO_PROGRAM: &str = "sudo";

/// Lock timeout applied when a client asks for none.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60 * 60);
