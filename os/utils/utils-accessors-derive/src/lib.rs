//! # Accessor Derive
//!
//! `#[derive(Setters)]` for plain flag structs, such as the page-table flag
//! views in `kernel-vmem`, so presets can be built in `const` context:
//!
//! ```
//! use utils_accessors_derive::Setters;
//!
//! #[derive(Setters, Default)]
//! struct Flags {
//!     writable: bool,
//!     user: bool,
//!     #[setters(skip)]
//!     raw: u64,
//! }
//!
//! const USER_RW: Flags = Flags { writable: false, user: false, raw: 0 }
//!     .with_writable(true)
//!     .with_user(true);
//!
//! let mut f = Flags::default();
//! f.set_writable(true).set_user(false);
//! assert!(f.writable && USER_RW.user);
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Field, Fields, LitBool, parse_macro_input, spanned::Spanned};

/// Generates `set_<field>(&mut self, Ty) -> &mut Self` and
/// `const with_<field>(self, Ty) -> Self` for every named field not marked
/// `#[setters(skip)]` (or `#[setters(skip = true)]`).
#[proc_macro_derive(Setters, attributes(setters))]
pub fn derive_setters(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(ident.span(), "Setters can only be derived for structs"));
    };

    let fields = match &data.fields {
        Fields::Named(named) => &named.named,
        Fields::Unnamed(u) => {
            return Err(syn::Error::new(u.span(), "Setters needs named fields"));
        }
        Fields::Unit => {
            return Err(syn::Error::new(ident.span(), "Setters has nothing to do on a unit struct"));
        }
    };

    let mut methods = Vec::with_capacity(fields.len());
    for field in fields {
        if is_skipped(field)? {
            continue;
        }
        methods.push(setter_pair(field));
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics #ident #ty_generics #where_clause {
            #(#methods)*
        }
    })
}

fn setter_pair(field: &Field) -> TokenStream2 {
    let Some(name) = &field.ident else {
        return TokenStream2::new();
    };
    let ty = &field.ty;
    let set = format_ident!("set_{}", name);
    let with = format_ident!("with_{}", name);
    let set_doc = format!("Sets `{name}` in place.");
    let with_doc = format!("Returns `self` with `{name}` replaced.");

    quote! {
        #[doc = #set_doc]
        #[inline]
        pub fn #set(&mut self, value: #ty) -> &mut Self {
            self.#name = value;
            self
        }

        #[doc = #with_doc]
        #[inline]
        #[must_use]
        pub const fn #with(mut self, value: #ty) -> Self {
            self.#name = value;
            self
        }
    }
}

fn is_skipped(field: &Field) -> syn::Result<bool> {
    let mut skip = false;
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("setters")) {
        attr.parse_nested_meta(|meta| {
            if !meta.path.is_ident("skip") {
                return Err(meta.error("expected `skip`"));
            }
            skip = if meta.input.is_empty() {
                true
            } else {
                meta.value()?.parse::<LitBool>()?.value
            };
            Ok(())
        })?;
    }
    Ok(skip)
}
