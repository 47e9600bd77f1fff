//! Error types for the simulated host binary.
//!
//! [`HostError`] wraps every failure mode of startup so `main` can
//! propagate with `?`. Nothing fails once the tick loop is running.

/// Top-level error for the `tickhook-host` binary.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: tickhook_core::config::ConfigError,
    },

    /// A configured signature pattern was malformed.
    #[error("signature error: {source}")]
    Signature {
        /// The underlying signature error.
        #[from]
        source: tickhook_core::signature::SignatureError,
    },

    /// The tick hook could not be activated.
    #[error("hook error: {source}")]
    Hook {
        /// The underlying hook error.
        #[from]
        source: tickhook_core::hook::HookError,
    },

    /// The synthetic code image could not be laid out.
    #[error("image error: {message}")]
    Image {
        /// Description of the layout failure.
        message: String,
    },
}
