//! Vintage New Year postcard studio.
//!
//! Photos go in, a generative image model restyles them as a Soviet-era greeting card, and the
//! greeting is drawn on top. [`pipeline::Pipeline`] ties the pieces together; [`web`] serves it.

#![allow(clippy::multiple_crate_versions)]
#![deny(clippy::all)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::complexity)]
#![deny(clippy::correctness)]
#![deny(clippy::disallowed_methods)]
#![deny(clippy::expect_used)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::panic)]
#![deny(clippy::perf)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::unreachable)]
#![deny(clippy::unwrap_used)]
#![deny(warnings)]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cli;
pub mod compositor;
pub mod config;
pub mod constants;
pub mod encoding;
pub mod error;
pub mod fonts;
pub mod generation;
pub mod pipeline;
pub mod prompt;
pub mod studio;
pub mod style;
pub mod web;
