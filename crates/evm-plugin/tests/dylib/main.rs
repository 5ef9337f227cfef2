//! Tests loading real shared libraries through the C ABI.

mod fixtures;
mod invoke;
mod open;
