//! null-fs shared library.

/// Filesystem state machine and its FUSE adapter.
pub mod fs;
