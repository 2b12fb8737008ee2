//! The `#[interface]` attribute macro: expands one declared Rust trait into a
//! client proxy and a server skeleton trait that share the same wire signatures, so neither side
//! hand-writes marshalling code.
//!
//! Grounded on the meta-model already built in `simppl::interface`: this macro does not invent a
//! new descriptor shape, it only emits code that *constructs* an `InterfaceDescriptor` at
//! registration time and wires `Skeleton`/`Stub` calls around it. Attribute parsing reuses
//! `simppl_codec_utils::macros`'s meta-list helpers rather than hand-rolling `syn::Meta` matching,
//! since that is the same machinery `simppl-codec-derive` uses for its own attributes.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{
    parse_macro_input, FnArg, Ident, ItemTrait, Meta, Pat, ReturnType, Token, TraitItem,
    TraitItemFn, Type,
};

use simppl_codec_utils::macros::{
    iter_meta_lists, match_attribute_with_str_value, match_attribute_without_value,
};

/// One parsed `simppl`/`dbus_interface`-style attribute on a trait method.
enum MemberKind {
    Method { oneway: bool, throws: Option<String> },
    Signal,
    Property { writable: bool, notifying: bool, invalidates: bool },
}

fn parse_member_kind(attrs: &[syn::Attribute]) -> syn::Result<MemberKind> {
    let mut oneway = false;
    let mut throws = None;
    let mut is_signal = false;
    let mut is_property = false;
    let mut writable = false;
    let mut notifying = false;
    let mut invalidates = false;

    for meta in iter_meta_lists(attrs, "simppl")? {
        if match_attribute_without_value(&meta, "oneway")? {
            oneway = true;
            continue;
        }
        if match_attribute_without_value(&meta, "signal")? {
            is_signal = true;
            continue;
        }
        if let Some(value) = match_attribute_with_str_value(&meta, "throws")? {
            throws = Some(value.value());
            continue;
        }
        if match_attribute_without_value(&meta, "property")? {
            is_property = true;
            continue;
        }
        if meta.path().is_ident("property") {
            is_property = true;
            if let Meta::List(list) = &meta {
                let nested = list.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)?;
                for flag in nested {
                    if match_attribute_without_value(&flag, "writable")? {
                        writable = true;
                        continue;
                    }
                    if match_attribute_without_value(&flag, "emits_changed")? {
                        notifying = true;
                        continue;
                    }
                    if match_attribute_without_value(&flag, "invalidates")? {
                        invalidates = true;
                        continue;
                    }
                    return Err(syn::Error::new(flag.span(), "unknown `property` flag (expected `writable`, `emits_changed`, or `invalidates`)"));
                }
            }
            continue;
        }
        return Err(syn::Error::new(
            meta.span(),
            "unknown `simppl` method attribute (expected `oneway`, `throws = \"...\"`, `signal`, or `property(...)`)",
        ));
    }

    if is_signal && is_property {
        return Err(syn::Error::new(
            proc_macro2::Span::call_site(),
            "a trait method cannot be both `signal` and `property`",
        ));
    }

    Ok(if is_signal {
        MemberKind::Signal
    } else if is_property {
        MemberKind::Property { writable, notifying, invalidates }
    } else {
        MemberKind::Method { oneway, throws }
    })
}

/// A method parameter stripped of `&self`.
struct Param {
    ident: Ident,
    ty: Type,
}

fn params_of(sig: &syn::Signature) -> syn::Result<Vec<Param>> {
    let mut params = Vec::new();
    for arg in &sig.inputs {
        match arg {
            FnArg::Receiver(_) => {}
            FnArg::Typed(pat_type) => {
                let ident = match pat_type.pat.as_ref() {
                    Pat::Ident(pat_ident) => pat_ident.ident.clone(),
                    other => return Err(syn::Error::new(other.span(), "expected a simple parameter name")),
                };
                params.push(Param { ident, ty: (*pat_type.ty).clone() });
            }
        }
    }
    Ok(params)
}

/// Returns the Rust type used for this method's wire body: `()` for no params, the bare type for
/// one, a tuple for more than one (the crate's established 0/1/N argument-arity convention).
fn body_type(params: &[Param]) -> TokenStream2 {
    match params {
        [] => quote! { () },
        [p] => {
            let ty = &p.ty;
            quote! { #ty }
        }
        _ => {
            let tys = params.iter().map(|p| &p.ty);
            quote! { ( #(#tys),* ) }
        }
    }
}

/// Returns the expression building this method's wire body from its named parameters.
fn body_expr(params: &[Param]) -> TokenStream2 {
    match params {
        [] => quote! { () },
        [p] => {
            let ident = &p.ident;
            quote! { #ident }
        }
        _ => {
            let idents = params.iter().map(|p| &p.ident);
            quote! { ( #(#idents),* ) }
        }
    }
}

/// The method's `out_signature` type, i.e. `T` in a declared `-> simppl::Result<T>`.
fn output_type(ret: &ReturnType) -> syn::Result<Type> {
    match ret {
        ReturnType::Type(_, ty) => {
            if let Type::Path(path) = ty.as_ref() {
                if let Some(segment) = path.path.segments.last() {
                    if segment.ident == "Result" {
                        if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                            if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                                return Ok(inner.clone());
                            }
                        }
                    }
                }
            }
            Err(syn::Error::new(ty.span(), "method must return `simppl::Result<T>`"))
        }
        ReturnType::Default => Err(syn::Error::new(
            proc_macro2::Span::call_site(),
            "method must return `simppl::Result<T>` (use `simppl::Result<()>` for no output)",
        )),
    }
}

struct InterfaceArgs {
    name: String,
}

fn parse_interface_args(attr: TokenStream) -> syn::Result<InterfaceArgs> {
    let metas = Punctuated::<Meta, Token![,]>::parse_terminated.parse(attr)?;
    let mut name = None;
    for meta in metas {
        if let Some(value) = match_attribute_with_str_value(&meta, "name")? {
            name = Some(value.value());
        } else {
            return Err(syn::Error::new(meta.span(), "expected `name = \"reverse.domain.Name\"`"));
        }
    }
    let name = name.ok_or_else(|| syn::Error::new(proc_macro2::Span::call_site(), "`#[interface(name = \"...\")]` requires a `name`"))?;
    Ok(InterfaceArgs { name })
}

#[proc_macro_attribute]
pub fn interface(attr: TokenStream, item: TokenStream) -> TokenStream {
    let item_trait = parse_macro_input!(item as ItemTrait);
    let args = match parse_interface_args(attr) {
        Ok(args) => args,
        Err(e) => return e.to_compile_error().into(),
    };

    match expand(args, item_trait) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

struct Method {
    ident: Ident,
    params: Vec<Param>,
    output: Type,
    oneway: bool,
    throws: Option<String>,
}

struct Signal {
    ident: Ident,
    params: Vec<Param>,
}

struct Property {
    ident: Ident,
    ty: Type,
    writable: bool,
    notifying: bool,
    invalidates: bool,
}

fn expand(args: InterfaceArgs, item_trait: ItemTrait) -> syn::Result<TokenStream2> {
    let trait_ident = &item_trait.ident;
    let vis = &item_trait.vis;
    let interface_name = &args.name;

    let proxy_ident = format_ident!("{}Proxy", trait_ident);
    let skeleton_trait_ident = format_ident!("{}Skeleton", trait_ident);
    let descriptor_fn_ident = format_ident!("{}_descriptor", to_snake_case(&trait_ident.to_string()));
    let register_fn_ident = format_ident!("register_{}", to_snake_case(&trait_ident.to_string()));

    let mut methods = Vec::new();
    let mut signals = Vec::new();
    let mut properties = Vec::new();

    for item in &item_trait.items {
        let TraitItem::Fn(method) = item else {
            return Err(syn::Error::new(item.span(), "only methods are allowed inside an `#[interface]` trait"));
        };
        let TraitItemFn { attrs, sig, .. } = method;
        let kind = parse_member_kind(attrs)?;
        let params = params_of(sig)?;

        match kind {
            MemberKind::Method { oneway, throws } => {
                let output = if oneway {
                    syn::parse_quote! { () }
                } else {
                    output_type(&sig.output)?
                };
                methods.push(Method { ident: sig.ident.clone(), params, output, oneway, throws });
            }
            MemberKind::Signal => {
                signals.push(Signal { ident: sig.ident.clone(), params });
            }
            MemberKind::Property { writable, notifying, invalidates } => {
                if !params.is_empty() {
                    return Err(syn::Error::new(sig.ident.span(), "a property getter takes no parameters besides `&self`"));
                }
                let ty = output_type(&sig.output).unwrap_or_else(|_| match &sig.output {
                    ReturnType::Type(_, ty) => (**ty).clone(),
                    ReturnType::Default => syn::parse_quote! { () },
                });
                properties.push(Property { ident: sig.ident.clone(), ty, writable, notifying, invalidates });
            }
        }
    }

    let descriptor_fn = build_descriptor_fn(&descriptor_fn_ident, interface_name, &methods, &signals, &properties);
    let skeleton_trait = build_skeleton_trait(&skeleton_trait_ident, &methods);
    let proxy = build_proxy(&proxy_ident, interface_name, &methods, &signals, &properties);
    let register_fn = build_register_fn(&register_fn_ident, &descriptor_fn_ident, &skeleton_trait_ident, interface_name, &methods);

    Ok(quote! {
        #descriptor_fn
        #skeleton_trait
        #proxy
        #register_fn

        #[allow(dead_code)]
        #vis struct #trait_ident;
    })
}

fn to_snake_case(s: &str) -> String {
    let mut out = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn build_descriptor_fn(
    descriptor_fn_ident: &Ident,
    interface_name: &str,
    methods: &[Method],
    signals: &[Signal],
    properties: &[Property],
) -> TokenStream2 {
    let method_entries = methods.iter().map(|m| {
        let name = m.ident.to_string();
        let pascal = to_pascal_case(&name);
        let in_ty = body_type(&m.params);
        let out_ty = &m.output;
        let oneway = m.oneway;
        let throws = match &m.throws {
            Some(name) => quote! { ::std::option::Option::Some(#name.to_owned()) },
            None => quote! { ::std::option::Option::None },
        };
        quote! {
            ::simppl::MethodDescriptor {
                name: ::simppl::names::MemberName::try_from(#pascal).expect("valid member name"),
                in_signature: <#in_ty as ::simppl::codec::Type>::signature().as_body(),
                out_signature: <#out_ty as ::simppl::codec::Type>::signature().as_body(),
                oneway: #oneway,
                throws: #throws,
            }
        }
    });

    let signal_entries = signals.iter().map(|s| {
        let name = s.ident.to_string();
        let pascal = to_pascal_case(&name);
        let body_ty = body_type(&s.params);
        quote! {
            ::simppl::SignalDescriptor {
                name: ::simppl::names::MemberName::try_from(#pascal).expect("valid member name"),
                signature: <#body_ty as ::simppl::codec::Type>::signature().as_body(),
            }
        }
    });

    let property_entries = properties.iter().map(|p| {
        let name = p.ident.to_string();
        let pascal = to_pascal_case(&name);
        let ty = &p.ty;
        let writable = p.writable;
        let notifying = p.notifying;
        let invalidates = p.invalidates;
        quote! {
            ::simppl::PropertyDescriptor {
                name: ::simppl::names::MemberName::try_from(#pascal).expect("valid member name"),
                signature: <#ty as ::simppl::codec::Type>::signature(),
                access: {
                    let mut access = ::enumflags2::BitFlags::from(::simppl::PropertyAccess::Readable);
                    if #writable {
                        access |= ::simppl::PropertyAccess::Writable;
                    }
                    if #notifying {
                        access |= ::simppl::PropertyAccess::Notifying;
                    }
                    if #invalidates {
                        access |= ::simppl::PropertyAccess::Invalidates;
                    }
                    access
                },
            }
        }
    });

    quote! {
        /// Builds the `InterfaceDescriptor` shared by this interface's proxy and skeleton.
        pub fn #descriptor_fn_ident() -> ::simppl::InterfaceDescriptor {
            ::simppl::InterfaceDescriptor {
                name: ::simppl::names::InterfaceName::try_from(#interface_name).expect("valid interface name"),
                methods: ::std::vec![ #(#method_entries),* ],
                signals: ::std::vec![ #(#signal_entries),* ],
                properties: ::std::vec![ #(#property_entries),* ],
            }
        }
    }
}

fn to_pascal_case(s: &str) -> String {
    let mut out = String::new();
    let mut cap_next = true;
    for c in s.chars() {
        if c == '_' {
            cap_next = true;
        } else if cap_next {
            out.extend(c.to_uppercase());
            cap_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn build_skeleton_trait(skeleton_trait_ident: &Ident, methods: &[Method]) -> TokenStream2 {
    let method_sigs = methods.iter().map(|m| {
        let ident = &m.ident;
        let args = m.params.iter().map(|p| {
            let ident = &p.ident;
            let ty = &p.ty;
            quote! { #ident: #ty }
        });
        let out = &m.output;
        quote! {
            async fn #ident(&self, #(#args),*) -> ::simppl::Result<#out>;
        }
    });

    quote! {
        /// Implemented by the application type that backs this interface's `Skeleton` object;
        /// the `#[interface]` macro generates one async method per declared RPC method (signals
        /// and properties never appear here — signals are emitted directly, properties are
        /// backed by the skeleton's own property store).
        #[::simppl::export::async_trait]
        pub trait #skeleton_trait_ident: ::std::marker::Send + ::std::marker::Sync + 'static {
            #(#method_sigs)*
        }
    }
}

fn build_proxy(
    proxy_ident: &Ident,
    interface_name: &str,
    methods: &[Method],
    signals: &[Signal],
    properties: &[Property],
) -> TokenStream2 {
    let method_impls = methods.iter().map(|m| {
        let ident = &m.ident;
        let blocking_ident = format_ident!("{}_blocking", ident);
        let pascal = to_pascal_case(&ident.to_string());
        let args = m.params.iter().map(|p| {
            let ident = &p.ident;
            let ty = &p.ty;
            quote! { #ident: #ty }
        });
        let blocking_args = args.clone();
        let body = body_expr(&m.params);
        let out = &m.output;

        if m.oneway {
            quote! {
                pub async fn #ident(&self, #(#args),*) -> ::simppl::Result<()> {
                    self.stub.call_oneway(&self.interface, ::simppl::names::MemberName::try_from(#pascal).expect("valid member name"), #body).await
                }
            }
        } else {
            quote! {
                pub async fn #ident(&self, #(#args),*) -> ::simppl::Result<#out> {
                    self.stub.call(&self.interface, ::simppl::names::MemberName::try_from(#pascal).expect("valid member name"), #body, ::simppl::CallOptions::new()).await
                }

                pub fn #blocking_ident(&self, #(#blocking_args),*) -> ::simppl::Result<#out> {
                    self.stub.call_blocking(&self.interface, ::simppl::names::MemberName::try_from(#pascal).expect("valid member name"), #body, ::simppl::CallOptions::new())
                }
            }
        }
    });

    let signal_impls = signals.iter().map(|s| {
        let pascal = to_pascal_case(&s.ident.to_string());
        let attach_ident = format_ident!("attach_{}", s.ident);
        let body_ty = body_type(&s.params);
        let handler_args: Vec<_> = s.params.iter().map(|p| &p.ty).collect();
        let handler_bound = if handler_args.len() == 1 {
            let ty = handler_args[0];
            quote! { impl ::std::ops::Fn(#ty) + ::std::marker::Send + ::std::marker::Sync + 'static }
        } else if handler_args.is_empty() {
            quote! { impl ::std::ops::Fn() + ::std::marker::Send + ::std::marker::Sync + 'static }
        } else {
            quote! { impl ::std::ops::Fn(#body_ty) + ::std::marker::Send + ::std::marker::Sync + 'static }
        };
        quote! {
            pub fn #attach_ident(&self, handler: #handler_bound) -> ::simppl::dbus_signal_subscription::SignalSubscription {
                self.stub.attach_signal(self.interface.clone(), ::simppl::names::MemberName::try_from(#pascal).expect("valid member name"), handler)
            }
        }
    });

    let property_impls = properties.iter().map(|p| {
        let pascal = to_pascal_case(&p.ident.to_string());
        let get_async_ident = format_ident!("{}_async", p.ident);
        let get_blocking_ident = format_ident!("{}_blocking", p.ident);
        let set_async_ident = format_ident!("set_{}_async", p.ident);
        let set_blocking_ident = format_ident!("set_{}_blocking", p.ident);
        let attach_ident = format_ident!("attach_{}", p.ident);
        let ty = &p.ty;

        let setters = if p.writable {
            quote! {
                pub async fn #set_async_ident(&self, value: #ty) -> ::simppl::Result<()> {
                    self.stub.set_property_async(&self.interface, #pascal, value).await
                }

                pub fn #set_blocking_ident(&self, value: #ty) -> ::simppl::Result<()> {
                    self.stub.set_property_blocking(&self.interface, #pascal, value)
                }
            }
        } else {
            quote! {}
        };

        quote! {
            pub async fn #get_async_ident(&self) -> ::simppl::Result<#ty> {
                self.stub.get_property_async(&self.interface, #pascal).await
            }

            pub fn #get_blocking_ident(&self) -> ::simppl::Result<#ty> {
                self.stub.get_property_blocking(&self.interface, #pascal)
            }

            #setters

            pub async fn #attach_ident(self: &::std::sync::Arc<Self>, handler: impl ::std::ops::Fn(#ty) + ::std::marker::Send + ::std::marker::Sync + 'static) -> ::simppl::Result<::simppl::PropertySubscription> {
                self.stub.clone().attach_property(self.interface.clone(), #pascal.to_owned(), handler).await
            }
        }
    });

    quote! {
        /// Client-side typed proxy for this interface.
        pub struct #proxy_ident {
            stub: ::std::sync::Arc<::simppl::Stub>,
            interface: ::simppl::names::InterfaceName<'static>,
        }

        impl #proxy_ident {
            pub fn new(stub: ::std::sync::Arc<::simppl::Stub>) -> Self {
                Self {
                    stub,
                    interface: ::simppl::names::InterfaceName::try_from(#interface_name).expect("valid interface name"),
                }
            }

            pub fn stub(&self) -> &::std::sync::Arc<::simppl::Stub> {
                &self.stub
            }

            #(#method_impls)*
            #(#signal_impls)*
            #(#property_impls)*
        }
    }
}

fn build_register_fn(
    register_fn_ident: &Ident,
    descriptor_fn_ident: &Ident,
    skeleton_trait_ident: &Ident,
    interface_name: &str,
    methods: &[Method],
) -> TokenStream2 {
    let handler_entries = methods.iter().map(|m| {
        let ident = &m.ident;
        let pascal = to_pascal_case(&ident.to_string());
        let body_ty = body_type(&m.params);
        let call_args = match m.params.len() {
            0 => quote! {},
            1 => quote! { args },
            _ => {
                let indices = (0..m.params.len()).map(syn::Index::from);
                quote! { #(args.#indices),* }
            }
        };

        quote! {
            (
                ::simppl::names::MemberName::try_from(#pascal).expect("valid member name"),
                ::std::sync::Arc::new({
                    let imp = imp.clone();
                    move |skeleton: ::std::sync::Arc<::simppl::Skeleton>, request: ::simppl::Request| {
                        let imp = imp.clone();
                        ::std::boxed::Box::pin(async move {
                            let descriptor = request.descriptor().clone();
                            let msg = request.message().clone();
                            let args: #body_ty = match request.body() {
                                ::std::result::Result::Ok(args) => args,
                                ::std::result::Result::Err(_) => return,
                            };
                            match imp.#ident(#call_args).await {
                                ::std::result::Result::Ok(out) => {
                                    let _ = skeleton.respond_with(&msg, &descriptor, out).await;
                                }
                                ::std::result::Result::Err(e) => {
                                    let name = e.dbus_name().unwrap_or(::simppl::ERROR_UNHANDLED_EXCEPTION);
                                    let name = ::simppl::names::ErrorName::try_from(name.to_owned())
                                        .unwrap_or_else(|_| ::simppl::names::ErrorName::try_from(::simppl::ERROR_UNHANDLED_EXCEPTION).expect("valid"));
                                    let message = e.message().map(|m| m.to_owned()).unwrap_or_else(|| e.to_string());
                                    let _ = skeleton.respond_with_error(&msg, &descriptor, name, ::std::option::Option::Some(&message)).await;
                                }
                            }
                        }) as ::std::pin::Pin<::std::boxed::Box<dyn ::std::future::Future<Output = ()> + ::std::marker::Send>>
                    }
                }) as ::simppl::MethodHandler,
            )
        }
    });

    let _ = interface_name;
    quote! {
        /// Composes this interface onto `skeleton`, dispatching each non-signal, non-property
        /// method to `imp`. A skeleton may implement more than one declared interface on a
        /// single object path.
        pub async fn #register_fn_ident<S>(skeleton: &::std::sync::Arc<::simppl::Skeleton>, imp: ::std::sync::Arc<S>) -> ::simppl::Result<()>
        where
            S: #skeleton_trait_ident,
        {
            skeleton.add_interface(#descriptor_fn_ident(), ::std::vec![ #(#handler_entries),* ]);
            ::std::result::Result::Ok(())
        }
    }
}
