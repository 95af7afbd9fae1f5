//! Shared type infrastructure.
//!
//! - [`encoding`]: little-endian `Encode`/`Decode` traits backing the
//!   bytecode image format.

pub mod encoding;
