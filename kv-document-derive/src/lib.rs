use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Data, DeriveInput, Fields, GenericArgument, Ident, LitStr, PathArguments, Type,
    parse_macro_input, spanned::Spanned,
};

/// Implements `kv_document::Model` for a struct with named fields and submits
/// its schema to the link-time model inventory.
///
/// Container attributes, all optional:
/// `#[kv(name = "User", table = "users", lock_version, timestamps = false,
/// ttl = "expires_at", schema_with = "path::to::fn")]` and any number of
/// `#[kv(index(global, hash = "email", range = "created_at", projection = "all"))]`
/// or `#[kv(index(local, range = "age", name = "by_age", include = "a,b"))]`.
///
/// Field attributes: `#[kv(hash_key)]`, `#[kv(range_key)]`, `#[kv(skip)]`,
/// `#[kv(rename = "...")]`, `#[kv(type = "serialized")]`, `#[kv(store_as_string)]`.
#[proc_macro_derive(KvDocument, attributes(kv))]
pub fn derive_kv_document(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(error) => TokenStream::from(error.to_compile_error()),
    }
}

#[derive(Default)]
struct ModelOptions {
    name: Option<String>,
    table: Option<String>,
    lock_version: bool,
    timestamps: Option<bool>,
    ttl: Option<String>,
    schema_with: Option<syn::Path>,
    indexes: Vec<TokenStream2>,
}

#[derive(Default)]
struct FieldOptions {
    hash_key: bool,
    range_key: bool,
    skip: bool,
    rename: Option<String>,
    field_type: Option<String>,
    store_as_string: bool,
}

fn model_options(input: &DeriveInput) -> syn::Result<ModelOptions> {
    let mut options = ModelOptions::default();
    for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("kv")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                options.name = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("table") {
                options.table = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("lock_version") {
                options.lock_version = true;
            } else if meta.path.is_ident("timestamps") {
                options.timestamps = Some(meta.value()?.parse::<syn::LitBool>()?.value);
            } else if meta.path.is_ident("ttl") {
                options.ttl = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("schema_with") {
                options.schema_with = Some(meta.value()?.parse::<LitStr>()?.parse()?);
            } else if meta.path.is_ident("index") {
                options.indexes.push(index(&meta)?);
            } else {
                return Err(meta.error("unknown kv attribute"));
            }
            Ok(())
        })?;
    }
    Ok(options)
}

fn index(meta: &syn::meta::ParseNestedMeta) -> syn::Result<TokenStream2> {
    let mut local = None;
    let mut hash = None;
    let mut range = None;
    let mut name = None;
    let mut projection = quote! { ::kv_document::Projection::KeysOnly };
    meta.parse_nested_meta(|inner| {
        if inner.path.is_ident("global") {
            local = Some(false);
        } else if inner.path.is_ident("local") {
            local = Some(true);
        } else if inner.path.is_ident("hash") {
            hash = Some(inner.value()?.parse::<LitStr>()?.value());
        } else if inner.path.is_ident("range") {
            range = Some(inner.value()?.parse::<LitStr>()?.value());
        } else if inner.path.is_ident("name") {
            name = Some(inner.value()?.parse::<LitStr>()?.value());
        } else if inner.path.is_ident("projection") {
            let value = inner.value()?.parse::<LitStr>()?;
            projection = match value.value().as_str() {
                "all" => quote! { ::kv_document::Projection::All },
                "keys_only" => quote! { ::kv_document::Projection::KeysOnly },
                _ => return Err(syn::Error::new(value.span(), "expected \"all\" or \"keys_only\"")),
            };
        } else if inner.path.is_ident("include") {
            let names = inner.value()?.parse::<LitStr>()?.value();
            let names = names.split(',').map(str::trim).filter(|n| !n.is_empty());
            projection = quote! {
                ::kv_document::Projection::Include(::std::vec![#(#names.to_string()),*])
            };
        } else {
            return Err(inner.error("unknown index attribute"));
        }
        Ok(())
    })?;

    let mut index = match (local, hash, &range) {
        (Some(true), None, Some(range)) => quote! { ::kv_document::SecondaryIndex::local(#range) },
        (Some(false), Some(hash), _) => quote! { ::kv_document::SecondaryIndex::global(#hash) },
        (Some(true), _, _) => return Err(meta.error("a local index needs `range` and no `hash`")),
        (Some(false), None, _) => return Err(meta.error("a global index needs `hash`")),
        (None, _, _) => return Err(meta.error("expected `global` or `local`")),
    };
    if local == Some(false)
        && let Some(range) = &range
    {
        index = quote! { #index.range_key(#range) };
    }
    if let Some(name) = name {
        index = quote! { #index.name(#name) };
    }
    Ok(quote! { #index.projection(#projection) })
}

fn field_options(field: &syn::Field) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions::default();
    for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("kv")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("hash_key") {
                options.hash_key = true;
            } else if meta.path.is_ident("range_key") {
                options.range_key = true;
            } else if meta.path.is_ident("skip") {
                options.skip = true;
            } else if meta.path.is_ident("store_as_string") {
                options.store_as_string = true;
            } else if meta.path.is_ident("rename") {
                options.rename = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("type") {
                options.field_type = Some(meta.value()?.parse::<LitStr>()?.value());
            } else {
                return Err(meta.error("unknown kv field attribute"));
            }
            Ok(())
        })?;
    }
    Ok(options)
}

/// Last path segment of a type and its first generic argument.
fn last_segment(ty: &Type) -> Option<(String, Option<&Type>)> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    let argument = match &segment.arguments {
        PathArguments::AngleBracketed(arguments) => {
            arguments.args.iter().find_map(|argument| match argument {
                GenericArgument::Type(ty) => Some(ty),
                _ => None,
            })
        }
        _ => None,
    };
    Some((segment.ident.to_string(), argument))
}

fn is_bytes(ty: &Type) -> bool {
    matches!(last_segment(ty), Some((name, Some(inner))) if name == "Vec"
        && matches!(last_segment(inner), Some((inner, _)) if inner == "u8"))
}

/// `FieldType` expression for a Rust field type.
fn field_type(ty: &Type) -> Option<TokenStream2> {
    if is_bytes(ty) {
        return Some(quote! { ::kv_document::FieldType::Binary });
    }
    let (name, argument) = last_segment(ty)?;
    Some(match name.as_str() {
        "String" => quote! { ::kv_document::FieldType::String },
        "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" | "u64" | "usize" | "isize" => {
            quote! { ::kv_document::FieldType::Integer }
        }
        "f32" | "f64" => quote! { ::kv_document::FieldType::Number },
        "bool" => quote! { ::kv_document::FieldType::Boolean },
        "DateTime" => quote! { ::kv_document::FieldType::DateTime },
        "NaiveDate" => quote! { ::kv_document::FieldType::Date },
        "Value" => quote! { ::kv_document::FieldType::Raw },
        "BTreeMap" => quote! { ::kv_document::FieldType::Map },
        "Option" => return field_type(argument?),
        "Vec" => {
            let element = field_type(argument?)?;
            quote! { ::kv_document::FieldType::array_of(#element) }
        }
        "BTreeSet" | "HashSet" => {
            let element = field_type(argument?)?;
            quote! { ::kv_document::FieldType::set_of(#element) }
        }
        _ => return None,
    })
}

fn named_type(name: &str) -> TokenStream2 {
    match name {
        "string" => quote! { ::kv_document::FieldType::String },
        "integer" => quote! { ::kv_document::FieldType::Integer },
        "number" => quote! { ::kv_document::FieldType::Number },
        "boolean" => quote! { ::kv_document::FieldType::Boolean },
        "datetime" => quote! { ::kv_document::FieldType::DateTime },
        "date" => quote! { ::kv_document::FieldType::Date },
        "binary" => quote! { ::kv_document::FieldType::Binary },
        "set" => quote! { ::kv_document::FieldType::Set(None) },
        "array" => quote! { ::kv_document::FieldType::Array(None) },
        "map" => quote! { ::kv_document::FieldType::Map },
        "raw" => quote! { ::kv_document::FieldType::Raw },
        "serialized" => quote! { ::kv_document::FieldType::Serialized },
        custom => quote! { ::kv_document::FieldType::Named(#custom.to_string()) },
    }
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let options = model_options(&input)?;
    let model_name = options.name.clone().unwrap_or_else(|| struct_name.to_string());

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new(
                    input.span(),
                    "KvDocument needs a struct with named fields",
                ));
            }
        },
        _ => return Err(syn::Error::new(input.span(), "KvDocument can only be derived for structs")),
    };

    let mut declarations = Vec::new();
    let mut to_attributes = Vec::new();
    let mut from_attributes = Vec::new();
    let mut has_hash_key = false;

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let field_options = field_options(field)?;
        if field_options.skip {
            from_attributes.push(quote! { #ident: ::core::default::Default::default() });
            continue;
        }
        let attribute = field_options
            .rename
            .clone()
            .unwrap_or_else(|| ident.to_string());
        let ty = &field.ty;
        let field_type = match &field_options.field_type {
            Some(name) => named_type(name),
            None => field_type(ty).ok_or_else(|| {
                syn::Error::new(
                    ty.span(),
                    format!(
                        "field '{}' has type '{}' which has no default mapping; add #[kv(type = \"...\")]",
                        ident,
                        quote!(#ty)
                    ),
                )
            })?,
        };

        declarations.push(if field_options.hash_key {
            has_hash_key = true;
            quote! { .hash_key(#attribute, #field_type) }
        } else if field_options.range_key {
            quote! { .range_key(#attribute, #field_type) }
        } else {
            quote! { .field(#attribute, #field_type) }
        });
        if field_options.store_as_string {
            declarations.push(quote! {
                .attribute(
                    ::kv_document::AttributeDef::new(#attribute, #field_type).store_as_string(true)
                )
            });
        }

        let (dump, load) = binding(ident, ty, &attribute);
        to_attributes.push(quote! {
            attributes.insert(#attribute.to_string(), #dump);
        });
        from_attributes.push(quote! { #ident: #load });
    }

    if !has_hash_key {
        return Err(syn::Error::new(
            input.span(),
            "KvDocument needs one field marked #[kv(hash_key)]",
        ));
    }

    if let Some(table) = &options.table {
        declarations.push(quote! { .table(#table) });
    }
    if options.lock_version {
        declarations.push(quote! { .lock_version() });
    }
    if let Some(timestamps) = options.timestamps {
        declarations.push(quote! { .timestamps(#timestamps) });
    }
    if let Some(ttl) = &options.ttl {
        declarations.push(quote! { .ttl(#ttl) });
    }
    for index in &options.indexes {
        declarations.push(quote! { .index(#index) });
    }
    let schema = match &options.schema_with {
        Some(path) => quote! { #path(builder) },
        None => quote! { builder },
    };

    Ok(quote! {
        impl ::kv_document::Model for #struct_name {
            const NAME: &'static str = #model_name;

            fn schema() -> ::kv_document::SchemaBuilder {
                let builder = ::kv_document::ModelSchema::builder(#model_name)
                    #(#declarations)*;
                #schema
            }

            fn to_attributes(&self) -> ::kv_document::Attributes {
                let mut attributes = ::kv_document::Attributes::new();
                #(#to_attributes)*
                attributes
            }

            fn from_attributes(
                attributes: &::kv_document::Attributes,
            ) -> ::core::result::Result<Self, ::kv_document::Error> {
                const NULL: &::kv_document::Value = &::kv_document::Value::Null;
                ::core::result::Result::Ok(Self {
                    #(#from_attributes),*
                })
            }
        }

        ::kv_document::inventory::submit! {
            ::kv_document::ModelDeclaration {
                name: #model_name,
                schema: <#struct_name as ::kv_document::Model>::schema,
            }
        }
    })
}

/// Conversion of one field into a `Value` and back.
fn binding(ident: &Ident, ty: &Type, attribute: &str) -> (TokenStream2, TokenStream2) {
    if is_bytes(ty) {
        let dump = quote! { ::kv_document::Value::binary(self.#ident.clone()) };
        let load = quote! {
            match attributes.get(#attribute).unwrap_or(NULL) {
                ::kv_document::Value::Binary(bytes) => bytes.clone(),
                ::kv_document::Value::Null => ::std::vec::Vec::new(),
                other => {
                    return ::core::result::Result::Err(::kv_document::Error::TypeMismatch {
                        attribute: #attribute.to_string(),
                        expected: "binary".to_string(),
                        value: ::std::format!("{:?}", other),
                    });
                }
            }
        };
        return (dump, load);
    }
    let dump = quote! { ::kv_document::Value::from(self.#ident.clone()) };
    let load = quote! {
        <#ty as ::kv_document::FromValue>::from_value(
            #attribute,
            attributes.get(#attribute).unwrap_or(NULL),
        )?
    };
    (dump, load)
}
