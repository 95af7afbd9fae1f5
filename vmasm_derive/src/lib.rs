//! Derive macros for the vmasm crate.
//!
//! Provides:
//! - `#[derive(Error)]` - error type boilerplate (thiserror replacement)
//! - `#[derive(BinaryCodec)]` - automatic binary serialization

mod binary_codec;
mod error;

use proc_macro::TokenStream;

/// Automatically implements `Display` and `Error` for an error enum.
#[proc_macro_derive(Error, attributes(error))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}

/// Automatically implements `Encode` and `Decode` for binary serialization.
#[proc_macro_derive(BinaryCodec)]
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    binary_codec::derive_binary_codec(input)
}
