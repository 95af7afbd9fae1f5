//! Derive macro for error enums.
//!
//! Generates `std::fmt::Display` and `std::error::Error` implementations
//! from `#[error("...")]` attributes, so the main crate does not need to
//! depend on `thiserror`.
//!
//! # Usage
//!
//! ```ignore
//! use vmasm_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum VmError {
//!     #[error("unknown opcode: {0}")]
//!     UnknownOpcode(String),
//!
//!     #[error("register index {index} out of range")]
//!     RegisterOutOfRange { index: i64 },
//!
//!     #[error("halted")]
//!     Halted,
//! }
//! ```
//!
//! Supports unit variants, tuple variants (`{0}`, `{1}` interpolation) and
//! struct variants (`{field}` interpolation). Structs and unions are not
//! supported; every error type in this crate is an enum.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Lit, Meta, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            input,
            "Error derive only supports enums",
        ));
    };

    let arms = data
        .variants
        .iter()
        .map(|variant| {
            let variant_name = &variant.ident;
            let message = error_message(variant)?;

            let arm = match &variant.fields {
                Fields::Unit => quote! {
                    Self::#variant_name => write!(f, #message),
                },
                Fields::Unnamed(fields) => {
                    let bindings: Vec<_> = (0..fields.unnamed.len())
                        .map(|i| quote::format_ident!("f{}", i))
                        .collect();
                    let message = positional_to_named(&message, fields.unnamed.len());
                    quote! {
                        Self::#variant_name(#(#bindings),*) =>
                            write!(f, #message, #(#bindings = #bindings),*),
                    }
                }
                Fields::Named(fields) => {
                    let bindings: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                    quote! {
                        Self::#variant_name { #(#bindings),* } =>
                            write!(f, #message, #(#bindings = #bindings),*),
                    }
                }
            };

            Ok(arm)
        })
        .collect::<syn::Result<Vec<_>>>()?;

    Ok(quote! {
        impl ::std::fmt::Display for #name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#arms)*
                }
            }
        }

        impl ::std::error::Error for #name {}
    })
}

/// Extracts the message from a variant's `#[error("...")]` attribute.
fn error_message(variant: &syn::Variant) -> syn::Result<String> {
    for attr in &variant.attrs {
        if !attr.path().is_ident("error") {
            continue;
        }

        let Meta::List(list) = &attr.meta else {
            return Err(syn::Error::new_spanned(
                &attr.meta,
                "invalid #[error] attribute; use #[error(\"message\")]",
            ));
        };

        let lit = syn::parse2::<Lit>(list.tokens.clone()).map_err(|_| {
            syn::Error::new_spanned(
                &attr.meta,
                "expected a string literal like #[error(\"bad magic: {0}\")]",
            )
        })?;

        if let Lit::Str(s) = lit {
            return Ok(s.value());
        }

        return Err(syn::Error::new_spanned(
            &attr.meta,
            "#[error] message must be a string literal",
        ));
    }

    Err(syn::Error::new_spanned(
        variant,
        format!(
            "missing #[error(\"...\")] attribute on variant `{}`",
            variant.ident
        ),
    ))
}

/// Rewrites positional format args `{0}`, `{1}` to the `{f0}`, `{f1}` names
/// the generated match bindings use.
fn positional_to_named(message: &str, field_count: usize) -> String {
    let mut result = message.to_string();
    for i in (0..field_count).rev() {
        result = result.replace(&format!("{{{i}}}"), &format!("{{f{i}}}"));
    }
    result
}
