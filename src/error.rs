//! The crate-wide error taxonomy.

use thiserror::Error;

/// Result alias used throughout the crate's fallible public API.
pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Everything that can go wrong calling into a [`crate::path::Path`],
/// [`crate::getter::Getter`], or [`crate::link::Link`].
///
/// `UserCallbackPanic` is never returned from a fallible API: per its
/// policy (see the crate's error handling design notes) it is caught at
/// the single call site that invokes a user-supplied observer or mapping
/// closure, logged at `error` level, and swallowed so the dispatch loop
/// can continue with the next observer. It exists in this enum purely to
/// document the taxonomy and to let embedders match on it if they
/// capture it themselves via their own panic hook.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReactiveError {
    /// A cache or `Getter` read was attempted before any value had ever
    /// been written to the node.
    #[error("`{label}` has not been initialized (no value has ever been written)")]
    Uninitialized {
        /// The node's debug label.
        label: String,
    },

    /// `Getter::get` was called while the getter is not active, or
    /// `Getter::passive_next` was called on a node that has never been
    /// activated.
    #[error("`{label}` is not active")]
    Inactive {
        /// The node's debug label.
        label: String,
    },

    /// A `Link::bind` was attempted while a concurrent bind on the same
    /// link was already in progress.
    #[error("`{label}` is already being bound by another caller")]
    DoubleBind {
        /// The link's debug label.
        label: String,
    },

    /// An observer or mapping callback panicked. See the type-level
    /// documentation: this variant is constructed for logging purposes
    /// only and is not expected to cross a `Result` boundary in normal
    /// operation.
    #[error("a user callback on `{label}` panicked")]
    UserCallbackPanic {
        /// The node's debug label.
        label: String,
    },

    /// An executor pool rejected work because `shutdown_now` had already
    /// been called on the owning [`crate::context::Context`].
    #[error("shutdown is already in progress, no further work can be scheduled")]
    ShutdownInProgress,
}
