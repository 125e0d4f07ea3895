//! Tests for the sluice crate.
//!
//! Tests are organized by module to keep source files focused on
//! implementation.

mod ring;
mod sequence;
