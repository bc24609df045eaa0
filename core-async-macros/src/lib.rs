use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Expr, ExprLit, ItemFn, Lit, MetaNameValue, Token};

/// Runs an `async fn` test on a fresh runtime.
///
/// Defaults to a current-thread runtime, which is the cooperative loop model
/// the portal is built around. Pass `flavor = "multi_thread"` to run on a
/// multi-threaded runtime instead.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, MacroKind::Test)
}

#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, MacroKind::Main)
}

enum MacroKind {
    Test,
    Main,
}

#[derive(Clone, Copy)]
enum Flavor {
    CurrentThread,
    MultiThread,
}

fn parse_flavor(attr: TokenStream) -> syn::Result<Flavor> {
    let args = Punctuated::<MetaNameValue, Token![,]>::parse_terminated
        .parse2(TokenStream2::from(attr))?;

    let mut flavor = Flavor::CurrentThread;
    for arg in args {
        if !arg.path.is_ident("flavor") {
            return Err(syn::Error::new_spanned(
                arg.path,
                "core_async attribute macros only accept `flavor = \"...\"`",
            ));
        }

        let value = match &arg.value {
            Expr::Lit(ExprLit {
                lit: Lit::Str(s), ..
            }) => s.value(),
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "`flavor` must be a string literal",
                ))
            }
        };

        flavor = match value.as_str() {
            "current_thread" => Flavor::CurrentThread,
            "multi_thread" => Flavor::MultiThread,
            _ => {
                return Err(syn::Error::new_spanned(
                    &arg.value,
                    "`flavor` must be \"current_thread\" or \"multi_thread\"",
                ))
            }
        };
    }

    Ok(flavor)
}

fn expand(attr: TokenStream, item: TokenStream, kind: MacroKind) -> TokenStream {
    let flavor = match parse_flavor(attr) {
        Ok(flavor) => flavor,
        Err(err) => return err.to_compile_error().into(),
    };

    let input = parse_macro_input!(item as ItemFn);

    if input.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            input.sig.fn_token,
            "core_async attribute macros require `async fn`",
        )
        .to_compile_error()
        .into();
    }

    let mut sync_sig = input.sig.clone();
    sync_sig.asyncness = None;

    let attrs = input.attrs;
    let vis = input.vis;
    let block = input.block;

    let runner = match flavor {
        Flavor::CurrentThread => quote!(core_async::runtime::block_on),
        Flavor::MultiThread => quote!(core_async::runtime::block_on_multi_thread),
    };

    let test_attr = match kind {
        MacroKind::Test => quote!(#[test]),
        MacroKind::Main => quote!(),
    };

    quote! {
        #(#attrs)*
        #test_attr
        #vis #sync_sig {
            #runner(async move #block)
        }
    }
    .into()
}
