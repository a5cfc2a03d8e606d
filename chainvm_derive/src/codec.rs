//! Expansion of `#[derive(BinaryCodec)]`.
//!
//! One field plan serves every shape: a variant's (or struct's) fields are
//! destructured into bindings, encoded in order, and rebuilt from the same
//! per-field decode calls. Enums differ only in the wire tag written before
//! the fields and matched on decode.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::spanned::Spanned;
use syn::{Data, DataEnum, DeriveInput, Expr, Fields, Lit};

pub fn expand(input: &DeriveInput) -> syn::Result<TokenStream> {
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let (encode_body, decode_body) = match &input.data {
        Data::Struct(data) => {
            let plan = FieldPlan::of(&data.fields);
            let destructure = plan.destructure(quote!(Self));
            let encode = &plan.encode;
            let build = plan.build(quote!(Self));
            (
                quote! {
                    let #destructure = self;
                    #encode
                },
                quote! { ::std::result::Result::Ok(#build) },
            )
        }
        Data::Enum(data) => enum_bodies(data)?,
        Data::Union(_) => {
            return Err(syn::Error::new(
                input.span(),
                "BinaryCodec cannot be derived for unions",
            ))
        }
    };

    Ok(quote! {
        impl #impl_generics crate::types::encoding::Encode for #ident #ty_generics #where_clause {
            fn encode<__S: crate::types::encoding::EncodeSink>(&self, __out: &mut __S) {
                #encode_body
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #ident #ty_generics #where_clause {
            fn decode(
                __input: &mut &[u8],
            ) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                #decode_body
            }
        }
    })
}

/// Generates the encode/decode match bodies for an enum.
fn enum_bodies(data: &DataEnum) -> syn::Result<(TokenStream, TokenStream)> {
    let tags = wire_tags(data)?;

    let mut encode_arms = TokenStream::new();
    let mut decode_arms = TokenStream::new();
    for (variant, tag) in data.variants.iter().zip(tags) {
        let name = &variant.ident;
        let plan = FieldPlan::of(&variant.fields);
        let destructure = plan.destructure(quote!(Self::#name));
        let encode = &plan.encode;
        let build = plan.build(quote!(Self::#name));

        encode_arms.extend(quote! {
            #destructure => {
                crate::types::encoding::Encode::encode(&#tag, __out);
                #encode
            }
        });
        decode_arms.extend(quote! {
            #tag => ::std::result::Result::Ok(#build),
        });
    }

    let encode_body = quote! {
        match self {
            #encode_arms
        }
    };
    let decode_body = quote! {
        let __tag: u8 = crate::types::encoding::Decode::decode(__input)?;
        match __tag {
            #decode_arms
            _ => ::std::result::Result::Err(crate::types::encoding::DecodeError::InvalidValue),
        }
    };
    Ok((encode_body, decode_body))
}

/// Resolves the wire tag of every variant.
///
/// Rust's discriminant rules apply: an explicit integer literal wins,
/// otherwise the previous tag plus one. A tag used twice would make decoding
/// ambiguous, so duplicates are rejected here rather than left to a
/// `match`-arm warning.
fn wire_tags(data: &DataEnum) -> syn::Result<Vec<u8>> {
    let mut tags: Vec<u8> = Vec::with_capacity(data.variants.len());
    let mut upcoming = 0u8;
    for variant in &data.variants {
        let tag = match &variant.discriminant {
            Some((_, expr)) => literal_tag(expr)?,
            None => upcoming,
        };
        if tags.contains(&tag) {
            return Err(syn::Error::new(
                variant.span(),
                format!("wire tag {:#04x} is already used by an earlier variant", tag),
            ));
        }
        upcoming = tag.wrapping_add(1);
        tags.push(tag);
    }
    Ok(tags)
}

/// Extracts a `u8` from an explicit discriminant expression.
fn literal_tag(expr: &Expr) -> syn::Result<u8> {
    // Metavariables re-emitted by macro_rules! (as `$opcode` is here, having
    // passed through `for_each_instr!` before reaching this derive) are
    // wrapped in a transparent `Expr::Group` to preserve hygiene; unwrap it
    // to reach the actual literal.
    let mut expr = expr;
    while let Expr::Group(group) = expr {
        expr = &group.expr;
    }
    if let Expr::Lit(expr_lit) = expr {
        if let Lit::Int(int) = &expr_lit.lit {
            return int.base10_parse();
        }
    }
    Err(syn::Error::new(
        expr.span(),
        "discriminants must be plain integer literals to serve as wire tags",
    ))
}

/// How one set of fields destructures, encodes and rebuilds.
struct FieldPlan {
    /// Binding pattern after the path, e.g. `{ a, b }` or `(f0, f1)`.
    bindings: Option<TokenStream>,
    /// Statements encoding each binding in order.
    encode: TokenStream,
    /// Field initializers rebuilding the value from decodes.
    decode: Option<TokenStream>,
}

impl FieldPlan {
    fn of(fields: &Fields) -> FieldPlan {
        let decode_one = quote! { crate::types::encoding::Decode::decode(__input)? };
        match fields {
            Fields::Named(fields) => {
                let names: Vec<_> = fields
                    .named
                    .iter()
                    .map(|f| f.ident.clone().expect("named field"))
                    .collect();
                FieldPlan {
                    bindings: Some(quote! { { #(#names),* } }),
                    encode: quote! {
                        #( crate::types::encoding::Encode::encode(#names, __out); )*
                    },
                    decode: Some(quote! { { #(#names: #decode_one,)* } }),
                }
            }
            Fields::Unnamed(fields) => {
                let names: Vec<_> = (0..fields.unnamed.len())
                    .map(|i| format_ident!("f{}", i))
                    .collect();
                let decodes: Vec<_> = names.iter().map(|_| decode_one.clone()).collect();
                FieldPlan {
                    bindings: Some(quote! { ( #(#names),* ) }),
                    encode: quote! {
                        #( crate::types::encoding::Encode::encode(#names, __out); )*
                    },
                    decode: Some(quote! { ( #(#decodes,)* ) }),
                }
            }
            Fields::Unit => FieldPlan {
                bindings: None,
                encode: TokenStream::new(),
                decode: None,
            },
        }
    }

    /// Pattern for binding the fields of `path`.
    fn destructure(&self, path: TokenStream) -> TokenStream {
        match &self.bindings {
            Some(bindings) => quote! { #path #bindings },
            None => path,
        }
    }

    /// Expression rebuilding `path` from decoded fields.
    fn build(&self, path: TokenStream) -> TokenStream {
        match &self.decode {
            Some(decode) => quote! { #path #decode },
            None => path,
        }
    }
}
