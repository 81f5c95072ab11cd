//! The versioned cell: a lock-free holder of the latest `(value, version)`
//! pair for a single node.
//!
//! A single atomic register cannot hold an arbitrary `T` plus a `u64`
//! version as one word, so the cell keeps a pointer-sized atomic swap of
//! `Arc<Versioned<T>>` and pays for a CAS retry loop with an extra clone of
//! `T` only on the (rare) contended path.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// The version counter. `0` is reserved to mean "never written".
pub type Version = u64;

/// A value paired with the version it was written at.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    value: T,
    version: Version,
}

impl<T> Versioned<T> {
    /// The value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// The version this value was written at. `0` means uninitialized.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Whether this cell has ever been written.
    pub fn is_initialized(&self) -> bool {
        self.version != 0
    }
}

/// Outcome of a `cas_advance` attempt.
#[derive(Debug)]
pub enum CasOutcome<T> {
    /// The write was applied; carries the new versioned value.
    Accepted(Arc<Versioned<T>>),
    /// The expected version did not match the cell's current version, or
    /// the equality predicate judged the new value unchanged from the old
    /// one. The caller should reload and retry if it cares about success.
    Rejected,
}

/// A lock-free `(value, version)` cell.
///
/// `T` must be `Clone` because a lost compare-and-swap race requires
/// rebuilding the candidate `Arc<Versioned<T>>` from a freshly observed
/// base value before retrying.
pub struct VersionedCell<T> {
    slot: ArcSwapOption<Versioned<T>>,
}

impl<T> VersionedCell<T> {
    /// An empty cell (version 0, no value).
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::from(None),
        }
    }

    /// A cell pre-seeded with an initial value at version 1.
    pub fn with_initial(value: T) -> Self {
        let cell = Self::new();
        cell.slot.store(Some(Arc::new(Versioned { value, version: 1 })));
        cell
    }

    /// Atomic snapshot of the current value, if any.
    pub fn load(&self) -> Option<Arc<Versioned<T>>> {
        self.slot.load_full()
    }

    /// The current version, `0` if never written.
    pub fn version(&self) -> Version {
        self.load().map(|v| v.version).unwrap_or(0)
    }
}

impl<T: Clone> VersionedCell<T> {
    /// Unconditionally install `value`, bumping the version past whatever
    /// is currently stored. Used by `CONT`-configured sources, which must
    /// advance even on an equal value.
    pub fn force_advance(&self, value: T) -> Arc<Versioned<T>> {
        let mut installed = None;
        self.slot.rcu(|current| {
            let next_version = current.as_ref().map(|v| v.version).unwrap_or(0) + 1;
            let candidate = Arc::new(Versioned {
                value: value.clone(),
                version: next_version,
            });
            installed = Some(candidate.clone());
            Some(candidate)
        });
        installed.expect("rcu always invokes its closure at least once")
    }

    /// Attempt to advance the cell from `expected_version` to
    /// `expected_version + 1` carrying `new_value`, but only if `equality`
    /// reports the new value as different from the current one (or the
    /// cell is uninitialized). On a version mismatch against a concurrent
    /// writer, returns `Rejected` without retrying -- the caller decides
    /// whether to reload and retry (`In::update`) or to drop the write as
    /// stale (an operator racing a faster sibling parent).
    pub fn cas_advance(
        &self,
        expected_version: Version,
        new_value: T,
        equality: &dyn Fn(&T, &T) -> bool,
    ) -> CasOutcome<T> {
        let current = self.slot.load_full();
        let current_version = current.as_ref().map(|v| v.version).unwrap_or(0);
        if current_version != expected_version {
            return CasOutcome::Rejected;
        }
        if let Some(existing) = current.as_ref() {
            if equality(&existing.value, &new_value) {
                return CasOutcome::Rejected;
            }
        }
        let candidate = Arc::new(Versioned {
            value: new_value,
            version: expected_version + 1,
        });
        let previous = self.slot.compare_and_swap(&current, Some(candidate.clone()));
        let won = match (&*previous, &current) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        if won {
            CasOutcome::Accepted(candidate)
        } else {
            CasOutcome::Rejected
        }
    }
}

impl<T> Default for VersionedCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
