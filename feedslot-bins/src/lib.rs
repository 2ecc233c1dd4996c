//! Shared setup for the feedslot binaries

pub mod common;
