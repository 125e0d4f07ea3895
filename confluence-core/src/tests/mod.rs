//! Integration-style tests driving whole sessions over in-memory channels.

mod round_robin;
mod streaming;
