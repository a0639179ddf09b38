//! Procedural macros for the doclane project.
//!
//! `#[derive(Document)]` implements `doclane::document::Document` for a struct that embeds
//! a `BaseDocument`. The base field is the one marked `#[document(base)]`, or else the
//! single field whose type is named `BaseDocument`.
//!
//! ```ignore
//! #[derive(Debug, Default, Serialize, Deserialize, Document)]
//! pub struct Note {
//!     #[serde(flatten)]
//!     pub base: BaseDocument,
//!     pub title: String,
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as doclane_macros;

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{Data, DeriveInput, Field, Fields, Index, Member, Type, parse_macro_input, spanned::Spanned};

#[proc_macro_derive(Document, attributes(document))]
pub fn derive_document(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        _ => {
            return Err(syn::Error::new(
                input.ident.span(),
                "Document can only be derived for structs",
            ));
        }
    };

    let member = base_member(fields)?;
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::doclane::document::Document for #name #ty_generics #where_clause {
            fn base(&self) -> &::doclane::document::BaseDocument {
                &self.#member
            }

            fn base_mut(&mut self) -> &mut ::doclane::document::BaseDocument {
                &mut self.#member
            }
        }
    })
}

fn base_member(fields: &Fields) -> syn::Result<Member> {
    let members = fields
        .iter()
        .enumerate()
        .map(|(index, field)| (member(index, field), field))
        .collect::<Vec<_>>();

    let mut marked = Vec::new();
    for entry in &members {
        if is_marked(entry.1)? {
            marked.push(entry);
        }
    }
    if marked.len() > 1 {
        return Err(syn::Error::new(
            marked[1].1.span(),
            "only one field can be marked #[document(base)]",
        ));
    }
    if let Some((member, _)) = marked.first() {
        return Ok(member.clone());
    }

    let typed = members
        .iter()
        .filter(|(_, field)| is_base_type(&field.ty))
        .collect::<Vec<_>>();
    match typed.as_slice() {
        [(member, _)] => Ok(member.clone()),
        [] => Err(syn::Error::new(
            Span::call_site(),
            "Document requires a BaseDocument field; mark it with #[document(base)]",
        )),
        _ => Err(syn::Error::new(
            typed[1].1.span(),
            "several BaseDocument fields found; mark the base one with #[document(base)]",
        )),
    }
}

fn member(index: usize, field: &Field) -> Member {
    match &field.ident {
        Some(ident) => Member::Named(ident.clone()),
        None => Member::Unnamed(Index::from(index)),
    }
}

/// Returns whether `field` carries `#[document(base)]`, rejecting any other argument.
fn is_marked(field: &Field) -> syn::Result<bool> {
    let mut marked = false;

    for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("document")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("base") {
                marked = true;
                Ok(())
            } else {
                Err(meta.error("unsupported document attribute, expected `base`"))
            }
        })?;
    }

    Ok(marked)
}

fn is_base_type(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "BaseDocument"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use syn::parse_quote;

    use super::*;

    #[test]
    fn marked_field_wins_over_type_detection() {
        let input: DeriveInput = parse_quote! {
            struct Note {
                #[document(base)]
                meta: Meta,
                other: BaseDocument,
            }
        };

        let tokens = expand(&input).unwrap().to_string();
        assert!(tokens.contains("self . meta"));
    }

    #[test]
    fn tuple_structs_use_the_field_index() {
        let input: DeriveInput = parse_quote! {
            struct Wrapped(String, BaseDocument);
        };

        assert!(expand(&input).unwrap().to_string().contains("self . 1"));
    }

    #[test]
    fn misspelled_attributes_are_rejected() {
        let input: DeriveInput = parse_quote! {
            struct Note {
                #[document(bse)]
                base: BaseDocument,
            }
        };

        let err = expand(&input).unwrap_err();
        assert!(err.to_string().contains("unsupported document attribute"));
    }

    #[test]
    fn missing_base_field_is_rejected() {
        let input: DeriveInput = parse_quote! {
            struct Note {
                title: String,
            }
        };

        assert!(expand(&input).is_err());
    }
}
