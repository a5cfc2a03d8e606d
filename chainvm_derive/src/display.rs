//! Expansion of `#[derive(Error)]`.
//!
//! Structs and enums share one path: each carrier of an `#[error("...")]`
//! attribute becomes a match arm that destructures its fields and hands them
//! to `write!`. Tuple fields are passed positionally (so `{0}` works as-is),
//! named fields as named arguments (for `{name}`); the format machinery then
//! rejects messages that reference nothing.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::spanned::Spanned;
use syn::{Attribute, Data, DeriveInput, Fields, LitStr};

pub fn expand(input: &DeriveInput) -> syn::Result<TokenStream> {
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let arms = match &input.data {
        Data::Struct(data) => {
            let message = error_message(&input.attrs, input.span())?;
            vec![display_arm(quote!(Self), &data.fields, &message)]
        }
        Data::Enum(data) => data
            .variants
            .iter()
            .map(|variant| {
                let message = error_message(&variant.attrs, variant.span())?;
                let name = &variant.ident;
                Ok(display_arm(quote!(Self::#name), &variant.fields, &message))
            })
            .collect::<syn::Result<Vec<_>>>()?,
        Data::Union(_) => {
            return Err(syn::Error::new(
                input.span(),
                "Error cannot be derived for unions",
            ))
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #ident #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#arms)*
                }
            }
        }

        impl #impl_generics ::std::error::Error for #ident #ty_generics #where_clause {}
    })
}

/// One `pattern => write!(...)` arm for the value at `path`.
fn display_arm(path: TokenStream, fields: &Fields, message: &LitStr) -> TokenStream {
    match fields {
        Fields::Named(fields) => {
            let names: Vec<_> = fields
                .named
                .iter()
                .map(|f| f.ident.clone().expect("named field"))
                .collect();
            quote! {
                #path { #(#names),* } => write!(f, #message #(, #names = #names)*),
            }
        }
        Fields::Unnamed(fields) => {
            let names: Vec<_> = (0..fields.unnamed.len())
                .map(|i| format_ident!("f{}", i))
                .collect();
            quote! {
                #path ( #(#names),* ) => write!(f, #message #(, #names)*),
            }
        }
        Fields::Unit => quote! {
            #path => write!(f, #message),
        },
    }
}

/// Finds and parses the `#[error("...")]` attribute.
///
/// `parse_args` insists the attribute body is a single string literal, which
/// rules out `#[error]`, `#[error = "..."]` and non-string payloads in one
/// step.
fn error_message(attrs: &[Attribute], span: proc_macro2::Span) -> syn::Result<LitStr> {
    for attr in attrs {
        if attr.path().is_ident("error") {
            return attr.parse_args::<LitStr>().map_err(|_| {
                syn::Error::new(
                    attr.span(),
                    "expected a display message, as in #[error(\"out of gas\")]",
                )
            });
        }
    }
    Err(syn::Error::new(
        span,
        "missing #[error(\"...\")] attribute; every error declares its display message",
    ))
}
