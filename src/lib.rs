//! Core library for the mirrorview proxy front-end.
//!
//! The interesting machinery lives in [`fetch`]: a failover client that walks
//! an ordered list of mirror instances for each resource category and returns
//! the first usable JSON payload within a global time budget. [`normalize`]
//! flattens the field-name variants the mirrors disagree on into stable
//! records, and [`accessors`] glues both together per resource kind. The HTTP
//! surface consuming all of this lives in `src/bin/frontend.rs` and stays
//! deliberately thin.

pub mod accessors;
pub mod config;
pub mod fetch;
pub mod normalize;
pub mod registry;
