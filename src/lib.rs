//! Secure-element enclave
//!
//! A trusted execution environment in miniature. Two trusted applications
//! are hosted behind GlobalPlatform-style sessions:
//! - a crypto application that generates keys inside the enclave and runs
//!   AES, RSA and SHA operations with them
//! - a secure storage application for named opaque objects
//!
//! Keys and objects share one persistence substrate (file-backed or in
//! memory). Key and operation state is drawn from a bounded pool of
//! transient handles that are released on every exit path.

pub mod client;
pub mod config;
pub mod enclave;
pub mod engine;
pub mod error;
pub mod flags;
pub mod handle;
pub mod keys;
pub mod objects;
pub mod params;
pub mod storage;
pub mod ta;

pub use error::{Result, TeeError};
