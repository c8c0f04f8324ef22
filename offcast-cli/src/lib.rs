//! Library target for the `offcast` package.
//!
//! The primary deliverable of this package is the `offcast` CLI binary
//! (`src/main.rs`). This library exists so CI can run `cargo test -p offcast --doc`
//! for feature/doctype validation.

#[doc(hidden)]
pub use providers_resolver;
#[doc(hidden)]
pub use vodio_engine;
