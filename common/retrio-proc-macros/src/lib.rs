//! Derive macros shared by the emulation crates.
//!
//! Save states are serialized with bincode, and ROM images must not be part of
//! them: they can be tens of megabytes, and the frontend re-attaches the ROM
//! after loading a state anyway. The `FakeEncode`/`FakeDecode` derives give a
//! type bincode implementations that write nothing and decode to
//! `Self::default()`, which is exactly what ROM newtype wrappers need.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{DeriveInput, GenericParam, Lifetime, LifetimeParam, parse_macro_input};

/// Implements `bincode::Encode` as a no-op that always returns `Ok(())`.
///
/// # Panics
///
/// Panics if the input cannot be parsed as a struct or enum definition.
#[proc_macro_derive(FakeEncode)]
pub fn fake_encode(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let (impl_generics, type_generics, where_clause) = input.generics.split_for_impl();
    let ident = &input.ident;

    quote! {
        impl #impl_generics ::bincode::Encode for #ident #type_generics #where_clause {
            fn encode<E: ::bincode::enc::Encoder>(
                &self,
                _encoder: &mut E,
            ) -> ::core::result::Result<(), ::bincode::error::EncodeError> {
                ::core::result::Result::Ok(())
            }
        }
    }
    .into()
}

/// Implements `bincode::Decode` and `bincode::BorrowDecode` to read nothing
/// and return `Self::default()`.
///
/// The type must implement `Default` (or at least provide an inherent
/// `default()` associated function).
///
/// # Panics
///
/// Panics if the input cannot be parsed as a struct or enum definition.
#[proc_macro_derive(FakeDecode)]
pub fn fake_decode(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let (_, type_generics, where_clause) = input.generics.split_for_impl();
    let ident = &input.ident;

    let context_param: GenericParam = syn::parse_quote!(Context);

    let mut decode_generics = input.generics.clone();
    decode_generics.params.insert(0, context_param.clone());
    let (decode_impl_generics, _, _) = decode_generics.split_for_impl();

    let mut borrow_generics = input.generics.clone();
    borrow_generics.params.insert(0, context_param);
    let de_lifetime = LifetimeParam::new(Lifetime::new("'de", Span::call_site()));
    borrow_generics.params.insert(0, GenericParam::Lifetime(de_lifetime));
    let (borrow_impl_generics, _, _) = borrow_generics.split_for_impl();

    quote! {
        impl #decode_impl_generics ::bincode::Decode<Context> for #ident #type_generics #where_clause {
            fn decode<D: ::bincode::de::Decoder<Context = Context>>(
                _decoder: &mut D,
            ) -> ::core::result::Result<Self, ::bincode::error::DecodeError> {
                ::core::result::Result::Ok(Self::default())
            }
        }

        impl #borrow_impl_generics ::bincode::BorrowDecode<'de, Context> for #ident #type_generics #where_clause {
            fn borrow_decode<D: ::bincode::de::BorrowDecoder<'de, Context = Context>>(
                _decoder: &mut D,
            ) -> ::core::result::Result<Self, ::bincode::error::DecodeError> {
                ::core::result::Result::Ok(Self::default())
            }
        }
    }
    .into()
}
