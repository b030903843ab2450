//! The randfiles storage load generation tool.
//!
//! This library supports the randfiles binary found elsewhere in this
//! project. A pool of writers fills a directory with randomly named files of
//! random size and content while a [`randfiles_store::Store`] tracks how many
//! files and bytes land per second. The bits and pieces here are not intended
//! to be used outside of supporting randfiles.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod aggregator;
pub mod config;
pub mod entropy;
pub mod generator;
pub mod labels;
pub mod signals;
pub mod status;
pub mod ticker;
