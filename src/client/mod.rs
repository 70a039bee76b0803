//! Typed client for the registry service.

mod client;

pub use client::{ClientTlsOptions, IrisClient};
