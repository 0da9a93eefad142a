//! Derive macro for automatic binary serialization.
//!
//! Generates `Encode` and `Decode` implementations for structs and enums.
//! Fields are serialized in declaration order; enum variants are prefixed
//! with a `u8` discriminant assigned in declaration order. The resulting
//! format is deterministic, making it suitable for cryptographic hashing.
//!
//! Unions are not supported.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DataEnum, DeriveInput, Fields, parse_macro_input};

/// Derives `Encode` and `Decode` for a type.
///
/// The generated impls reference `crate::types::encoding`, so the macro is
/// only usable from within the goldnet crate itself.
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let expanded = match &input.data {
        Data::Struct(data_struct) => match &data_struct.fields {
            Fields::Named(fields) => {
                named_struct_impl(name, &impl_generics, &ty_generics, where_clause, fields)
            }
            Fields::Unnamed(fields) => {
                tuple_struct_impl(name, &impl_generics, &ty_generics, where_clause, fields)
            }
            Fields::Unit => unit_struct_impl(name, &impl_generics, &ty_generics, where_clause),
        },
        Data::Enum(data_enum) => {
            enum_impl(name, &impl_generics, &ty_generics, where_clause, data_enum)
        }
        Data::Union(_) => {
            syn::Error::new_spanned(&input, "BinaryCodec derive does not support unions")
                .to_compile_error()
        }
    };

    TokenStream::from(expanded)
}

/// Generates `Encode` and `Decode` for named-field structs.
///
/// Encoding writes each field in declaration order; decoding reads them back
/// in the same order and constructs the struct.
fn named_struct_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
    fields: &syn::FieldsNamed,
) -> proc_macro2::TokenStream {
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

    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #(#encode_fields)*
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                Ok(Self {
                    #(#decode_fields)*
                })
            }
        }
    }
}

/// Generates `Encode` and `Decode` for tuple structs such as newtype
/// wrappers like `struct Hash(pub [u8; 32])`.
fn tuple_struct_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
    fields: &syn::FieldsUnnamed,
) -> proc_macro2::TokenStream {
    let field_indices: Vec<_> = (0..fields.unnamed.len()).map(syn::Index::from).collect();

    let encode_fields = field_indices.iter().map(|idx| {
        quote! {
            crate::types::encoding::Encode::encode(&self.#idx, out);
        }
    });

    let decode_fields = field_indices.iter().map(|_| {
        quote! {
            crate::types::encoding::Decode::decode(input)?,
        }
    });

    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #(#encode_fields)*
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                Ok(Self(
                    #(#decode_fields)*
                ))
            }
        }
    }
}

/// Generates `Encode` and `Decode` for unit structs: encoding writes
/// nothing, decoding just returns `Self`.
fn unit_struct_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
) -> proc_macro2::TokenStream {
    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, _out: &mut S) {}
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(_input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                Ok(Self)
            }
        }
    }
}

/// Generates `Encode` and `Decode` for enums.
///
/// Variants are encoded as a `u8` discriminant (declaration order, starting
/// at 0) followed by the variant's fields, if any. Decoding an unknown
/// discriminant fails with `DecodeError::InvalidValue`.
fn enum_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
    data_enum: &DataEnum,
) -> proc_macro2::TokenStream {
    let encode_arms = data_enum.variants.iter().enumerate().map(|(i, variant)| {
        let idx = i as u8;
        let variant_name = &variant.ident;

        match &variant.fields {
            Fields::Unit => {
                quote! {
                    Self::#variant_name => {
                        crate::types::encoding::Encode::encode(&#idx, out);
                    }
                }
            }
            Fields::Unnamed(fields) => {
                let field_names: Vec<_> = (0..fields.unnamed.len())
                    .map(|i| quote::format_ident!("f{}", i))
                    .collect();
                let encode_fields = field_names.iter().map(|f| {
                    quote! { crate::types::encoding::Encode::encode(#f, out); }
                });
                quote! {
                    Self::#variant_name(#(#field_names),*) => {
                        crate::types::encoding::Encode::encode(&#idx, out);
                        #(#encode_fields)*
                    }
                }
            }
            Fields::Named(fields) => {
                let field_names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                let encode_fields = field_names.iter().map(|f| {
                    quote! { crate::types::encoding::Encode::encode(#f, out); }
                });
                quote! {
                    Self::#variant_name { #(#field_names),* } => {
                        crate::types::encoding::Encode::encode(&#idx, out);
                        #(#encode_fields)*
                    }
                }
            }
        }
    });

    let decode_arms = data_enum.variants.iter().enumerate().map(|(i, variant)| {
        let idx = i as u8;
        let variant_name = &variant.ident;

        match &variant.fields {
            Fields::Unit => {
                quote! {
                    #idx => Ok(Self::#variant_name),
                }
            }
            Fields::Unnamed(fields) => {
                let decode_fields = (0..fields.unnamed.len()).map(|_| {
                    quote! { crate::types::encoding::Decode::decode(input)?, }
                });
                quote! {
                    #idx => Ok(Self::#variant_name(#(#decode_fields)*)),
                }
            }
            Fields::Named(fields) => {
                let decode_fields = fields.named.iter().map(|f| {
                    let field_name = &f.ident;
                    quote! { #field_name: crate::types::encoding::Decode::decode(input)?, }
                });
                quote! {
                    #idx => Ok(Self::#variant_name { #(#decode_fields)* }),
                }
            }
        }
    });

    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                match self {
                    #(#encode_arms)*
                }
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                let variant_idx: u8 = crate::types::encoding::Decode::decode(input)?;
                match variant_idx {
                    #(#decode_arms)*
                    _ => Err(crate::types::encoding::DecodeError::InvalidValue),
                }
            }
        }
    }
}
