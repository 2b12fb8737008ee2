//! `#[derive(Type)]`: generates [`simppl_codec::Type::signature`] for a user struct or enum.
//!
//! A struct's signature is its fields' signatures concatenated into a D-Bus struct type, e.g.
//! `struct Point { x: i32, y: i32 }` becomes `"(ii)"`. An enum derives the signature of its
//! `#[repr(...)]` integer (matching how it's actually encoded on the wire, as a plain integer
//! discriminant) unless overridden with `#[simppl(signature = "...")]`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use simppl_codec_utils::def_attrs;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

fn simppl_codec_crate() -> syn::Path {
    match proc_macro_crate::crate_name("simppl-codec") {
        Ok(proc_macro_crate::FoundCrate::Itself) => syn::parse_quote!(crate),
        Ok(proc_macro_crate::FoundCrate::Name(name)) => {
            let ident = syn::Ident::new(&name, proc_macro2::Span::call_site());
            syn::parse_quote!(#ident)
        }
        Err(_) => syn::parse_quote!(simppl_codec),
    }
}

def_attrs! {
    crate simppl;

    pub TypeAttributes("type") { signature str };
}

#[proc_macro_derive(Type, attributes(simppl))]
pub fn derive_type(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_derive_type(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// `#[derive(Codec)]`: encodes/decodes a struct's fields in declared order, matching the
/// signature `#[derive(Type)]` generates for it — a user struct's wire layout is that of a
/// heterogeneous struct.
///
/// Only plain (non-unit, non-enum) structs are supported; enums already round-trip through their
/// `#[repr]` integer via a plain `as` cast at the call site, so they need no generated `Codec`.
#[proc_macro_derive(Codec)]
pub fn derive_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_derive_codec(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_derive_codec(input: DeriveInput) -> syn::Result<TokenStream2> {
    let codec_crate = simppl_codec_crate();
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let data = match input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "#[derive(Codec)] only supports structs",
            ))
        }
    };

    let named = matches!(data.fields, Fields::Named(_));
    let (field_idents, field_access): (Vec<TokenStream2>, Vec<TokenStream2>) = match data.fields {
        Fields::Named(f) => f
            .named
            .into_iter()
            .map(|f| {
                let ident = f.ident.unwrap();
                (quote!(#ident), quote!(self.#ident))
            })
            .unzip(),
        Fields::Unnamed(f) => (0..f.unnamed.len())
            .map(|i| {
                let idx = syn::Index::from(i);
                (quote!(#idx), quote!(self.#idx))
            })
            .unzip(),
        Fields::Unit => (Vec::new(), Vec::new()),
    };

    let constructor = if field_idents.is_empty() {
        quote!(#name)
    } else if named {
        quote!(#name { #(#field_idents: #codec_crate::Codec::decode(r)?),* })
    } else {
        quote!(#name( #(#codec_crate::Codec::decode(r)?),* ))
    };

    Ok(quote! {
        impl #impl_generics #codec_crate::Codec for #name #ty_generics #where_clause {
            fn encode<B: #codec_crate::ByteOrder>(
                &self,
                w: &mut #codec_crate::Writer<B>,
            ) -> #codec_crate::Result<()> {
                w.align(8);
                #(#codec_crate::Codec::encode(&#field_access, w)?;)*
                Ok(())
            }

            fn decode<B: #codec_crate::ByteOrder>(
                r: &mut #codec_crate::Reader<'_, B>,
            ) -> #codec_crate::Result<Self> {
                r.align(8)?;
                Ok(#constructor)
            }
        }
    })
}

fn expand_derive_type(input: DeriveInput) -> syn::Result<TokenStream2> {
    let codec_crate = simppl_codec_crate();
    let name = &input.ident;
    let attrs = TypeAttributes::parse(&input.attrs)?;

    if let Some(sig) = attrs.signature {
        let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
        return Ok(quote! {
            impl #impl_generics #codec_crate::Type for #name #ty_generics #where_clause {
                fn signature() -> #codec_crate::Signature<'static> {
                    #codec_crate::Signature::from_str_unchecked(#sig)
                }
            }
        });
    }

    match input.data {
        Data::Struct(data) => expand_struct(&codec_crate, name, &input.generics, data.fields),
        Data::Enum(data) => expand_enum(&codec_crate, name, &input.attrs, &input.generics, data),
        Data::Union(_) => Err(syn::Error::new_spanned(
            name,
            "#[derive(Type)] does not support unions",
        )),
    }
}

fn expand_struct(
    codec_crate: &syn::Path,
    name: &syn::Ident,
    generics: &syn::Generics,
    fields: Fields,
) -> syn::Result<TokenStream2> {
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let field_tys: Vec<_> = match fields {
        Fields::Named(f) => f.named.into_iter().map(|f| f.ty).collect(),
        Fields::Unnamed(f) => f.unnamed.into_iter().map(|f| f.ty).collect(),
        Fields::Unit => Vec::new(),
    };

    Ok(quote! {
        impl #impl_generics #codec_crate::Type for #name #ty_generics #where_clause {
            fn signature() -> #codec_crate::Signature<'static> {
                let mut s = ::std::string::String::from("(");
                #(s.push_str(<#field_tys as #codec_crate::Type>::signature().as_str());)*
                s.push(')');
                #codec_crate::Signature::from_string_unchecked(s)
            }
        }
    })
}

/// The integer wire code for an enum's `#[repr(...)]`, mirroring how the type is actually
/// discriminant-encoded. Defaults to `u32` (D-Bus type `u`) when no `#[repr]` is present, matching
/// Rust's own default enum representation width on common platforms.
fn expand_enum(
    codec_crate: &syn::Path,
    name: &syn::Ident,
    attrs: &[syn::Attribute],
    generics: &syn::Generics,
    data: syn::DataEnum,
) -> syn::Result<TokenStream2> {
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "#[derive(Type)] on an enum requires all variants to be unit variants; \
                 annotate the enum with #[simppl(signature = \"...\")] for anything else",
            ));
        }
    }

    let repr_code = repr_signature_char(name, attrs)?;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics #codec_crate::Type for #name #ty_generics #where_clause {
            fn signature() -> #codec_crate::Signature<'static> {
                #codec_crate::Signature::from_str_unchecked(#repr_code)
            }
        }
    })
}

fn repr_signature_char(name: &syn::Ident, attrs: &[syn::Attribute]) -> syn::Result<&'static str> {
    for attr in attrs {
        if !attr.path().is_ident("repr") {
            continue;
        }
        let mut found = None;
        attr.parse_nested_meta(|meta| {
            found = meta.path.get_ident().map(|i| i.to_string());
            Ok(())
        })?;
        return match found.as_deref() {
            Some("u8") => Ok("y"),
            Some("i16") => Ok("n"),
            Some("u16") => Ok("q"),
            Some("i32") => Ok("i"),
            Some("u32") => Ok("u"),
            Some("i64") => Ok("x"),
            Some("u64") => Ok("t"),
            Some(other) => Err(syn::Error::new_spanned(
                name,
                format!("#[repr({other})] has no corresponding D-Bus integer signature"),
            )),
            None => Ok("u"),
        };
    }
    Ok("u")
}
