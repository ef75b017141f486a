//! This module provides a built-in logger implementation.
//!
//! The built-in logger implementation uses the `env_logger` crate. It is enabled by the Cargo
//! feature "builtin_env_logger" which is enabled by default. When enabled, it is initialized the
//! first time a [`crate::checkpoint::Checkpoint`] engine is constructed, and shows logs of level
//! INFO or lower (the lower, the more important).
//!
//! This gives a convenient out-of-the-box experience: the surrounding model checker can see the
//! core's logs without wiring any configuration, while still being able to configure levels from
//! environment variables. A consumer that wants a different backend can disable the
//! "builtin_env_logger" feature and register its own implementation with the `log` crate.

/// Attempt to init an env_logger for the checkpoint core.
/// Does nothing if the "builtin_env_logger" feature is disabled.
pub(crate) fn try_init() {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            let result = env_logger::try_init_from_env(
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            );

            match result {
                Ok(()) => {
                    debug!("initialized the built-in logger.");
                }
                Err(e) => {
                    // `log::SetLoggerError` can only be raised for one reason: the logger has
                    // already been initialized (e.g. by the host application).
                    debug!("failed to initialize the built-in env_logger: {e}");
                }
            }
        } else {
            debug!("built-in env_logger not enabled; assuming the host has installed a logger.");
        }
    }
}
