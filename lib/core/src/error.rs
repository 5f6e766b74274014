//! Error handling foundation.
//!
//! Crates define their own error enums and surface them wrapped in a
//! rootcause [`Report`] at their public boundary, so callers can read the
//! typed context back with `current_context()` while still getting the full
//! chain when they log it.

use rootcause::Report;

/// Result alias over rootcause's `Report`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
