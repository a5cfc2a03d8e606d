//! Procedural derives for the chainvm crate.
//!
//! Two derives cover the crate's ambient concerns:
//!
//! - [`BinaryCodec`](macro@BinaryCodec) implements the deterministic
//!   `Encode`/`Decode` traits from `chainvm::types::encoding`.
//! - [`Error`](macro@Error) implements `Display` and `std::error::Error`
//!   from `#[error("...")]` attributes.
//!
//! Both expanders report problems as compile errors at the offending span
//! instead of panicking inside the macro.

mod codec;
mod display;

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

/// Implements `Encode` and `Decode`.
///
/// Struct fields serialize in declaration order. Enums are prefixed with a
/// one-byte wire tag taken from the variant's discriminant, so `#[repr(u8)]`
/// instruction enums keep their opcode byte on the wire. Duplicate tags and
/// non-literal discriminants are compile errors.
#[proc_macro_derive(BinaryCodec, attributes(binary_codec))]
pub fn binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    codec::expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Implements `Display` and `std::error::Error`.
///
/// Every variant (or the struct itself) carries `#[error("...")]`; `{0}`
/// interpolates tuple fields, `{name}` interpolates named fields.
#[proc_macro_derive(Error, attributes(error))]
pub fn error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    display::expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
