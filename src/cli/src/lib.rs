//! skiff command line interface.
//!
//! The CLI is thin: argument parsing and flag defaults live here, all
//! semantics live in `skiff-engine`.

pub mod commands;
