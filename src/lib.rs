#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

//! A lock-free, single-state reactive dataflow framework: directed graphs
//! of computation over versioned scalar cells, where observers attach
//! dynamically at the leaves and intermediate nodes activate only while
//! at least one transitive observer is present.
//!
//! Start from an [`input::In`] source, derive with [`path::Path::map`] or
//! [`switch_map`](path::Path::switch_map), fold several parents with
//! [`join::join`], or rebind a parent at runtime with [`link::Link`].
//! [`getter::Getter`] gives an imperative pull handle over any node.
//! [`context::Context`] is the process-wide executor/model-registry root
//! that `BACK`-dispatched inputs and lazily-constructed models share.

mod activator;
mod cell;
mod context;
mod error;
mod executor;
mod getter;
mod input;
mod join;
mod link;
mod map;
mod observer;
mod path;
mod switch_map;

pub use crate::context::{Context, ContextBuilder, ExecutorKind, LifecycleKind};
pub use crate::error::{ReactiveError, Result};
pub use crate::executor::Pool;
pub use crate::getter::Getter;
pub use crate::input::{DispatchMode, EqualPolicy, In};
pub use crate::join::{entry, join, JoinEntry, JoinHandle};
pub use crate::link::Link;
pub use crate::observer::ObserverId;
pub use crate::path::{Path, PathOptions, Publisher};
pub use crate::switch_map::get_dummy;
