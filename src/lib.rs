//! Workspace root for Conduit.
//!
//! The public API lives in the [`conduit`] crate; this package carries the
//! end-to-end tests under `tests/`.

pub use conduit::*;
