//! Derive macro for automatic binary serialization.
//!
//! Generates `Encode` and `Decode` implementations that serialize the fields
//! of a named struct in declaration order, little-endian, using the trait
//! impls in `crate::types::encoding`.
//!
//! The image format in `program.rs` is mostly positional (sized records,
//! NUL-terminated keys) and is encoded by hand; the derive covers the
//! fixed-layout structs such as the image header.
//!
//! # Example
//!
//! ```ignore
//! use vmasm_derive::BinaryCodec;
//!
//! #[derive(BinaryCodec)]
//! struct ImageHeader {
//!     magic: [u8; 3],
//!     version: u8,
//! }
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => fields,
            _ => {
                return syn::Error::new_spanned(
                    &input,
                    "BinaryCodec derive only supports structs with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(&input, "BinaryCodec derive only supports structs")
                .to_compile_error()
                .into();
        }
    };

    let field_names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();

    let encode_fields = field_names.iter().map(|name| {
        quote! {
            crate::types::encoding::Encode::encode(&self.#name, out);
        }
    });

    let decode_fields = field_names.iter().map(|name| {
        quote! {
            #name: crate::types::encoding::Decode::decode(input)?,
        }
    });

    let expanded = quote! {
        impl crate::types::encoding::Encode for #name {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #(#encode_fields)*
            }
        }

        impl crate::types::encoding::Decode for #name {
            fn decode(
                input: &mut &[u8],
            ) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                Ok(Self {
                    #(#decode_fields)*
                })
            }
        }
    };

    TokenStream::from(expanded)
}
