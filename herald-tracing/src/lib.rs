//! Attribute macros for tracing function entry and exit.
//!
//! `#[traced]` emits a `trace!` event when the attributed function is entered
//! and another when it returns. The exit event is fired from a drop guard, so
//! it is also emitted on early return, unwinding and future cancellation.
//!
//! ```rust,ignore
//! #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "ms"))]
//! async fn serve(&self, shutdown: Receiver<Signal>) { /* ... */ }
//! ```

extern crate proc_macro;

use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::{ItemFn, Stmt, parse::Parse, parse_macro_input, parse_quote};

mod keywords {
    syn::custom_keyword!(timing);
    syn::custom_keyword!(precision);
    syn::custom_keyword!(instrument);
}

/// Unit the elapsed time is reported in
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
enum Precision {
    #[default]
    Nanos,
    Micros,
    Millis,
    Seconds,
}

impl Precision {
    fn parse_unit(unit: &syn::LitStr) -> syn::Result<Self> {
        match unit.value().as_str() {
            "ns" | "nanos" | "nanoseconds" => Ok(Self::Nanos),
            "us" | "micros" | "microseconds" => Ok(Self::Micros),
            "ms" | "millis" | "milliseconds" => Ok(Self::Millis),
            "s" | "secs" | "seconds" => Ok(Self::Seconds),
            other => Err(syn::Error::new(
                unit.span(),
                format!("unknown precision `{other}`, expected one of ns, us, ms, s"),
            )),
        }
    }

    /// `Duration` accessor and unit suffix for this precision
    fn accessor(self) -> (syn::Ident, &'static str) {
        let (method, suffix) = match self {
            Self::Nanos => ("as_nanos", "ns"),
            Self::Micros => ("as_micros", "us"),
            Self::Millis => ("as_millis", "ms"),
            Self::Seconds => ("as_secs", "s"),
        };
        (syn::Ident::new(method, Span::call_site()), suffix)
    }
}

impl Parse for Precision {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        if !input.peek(syn::token::Paren) {
            return Ok(Self::default());
        }

        let content;
        syn::parenthesized!(content in input);
        content.parse::<keywords::precision>()?;
        content.parse::<syn::Token![=]>()?;
        Self::parse_unit(&content.parse()?)
    }
}

#[derive(Default)]
struct Attributes {
    timing: Option<Precision>,
    instrument: Option<TokenStream>,
}

impl Parse for Attributes {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut attributes = Self::default();

        while !input.is_empty() {
            let lookahead = input.lookahead1();

            if lookahead.peek(keywords::timing) {
                let keyword = input.parse::<keywords::timing>()?;
                if attributes.timing.is_some() {
                    return Err(syn::Error::new(keyword.span, "duplicate `timing` argument"));
                }
                attributes.timing = Some(input.parse()?);
            } else if lookahead.peek(keywords::instrument) {
                let keyword = input.parse::<keywords::instrument>()?;
                if attributes.instrument.is_some() {
                    return Err(syn::Error::new(
                        keyword.span,
                        "duplicate `instrument` argument",
                    ));
                }
                attributes.instrument = Some(if input.peek(syn::token::Paren) {
                    let content;
                    syn::parenthesized!(content in input);
                    content.parse()?
                } else {
                    TokenStream::new()
                });
            } else if lookahead.peek(syn::Token![,]) {
                input.parse::<syn::Token![,]>()?;
            } else {
                return Err(lookahead.error());
            }
        }

        Ok(attributes)
    }
}

fn exit_event(id: &str, timing: Option<Precision>) -> Stmt {
    match timing {
        None => parse_quote! {
            {
                let _ = self.started;
                tracing::trace!("OnExit: {}", #id);
            }
        },
        Some(precision) => {
            let (method, suffix) = precision.accessor();
            parse_quote! {
                tracing::trace!(
                    "OnExit: {} ({} {} elapsed)",
                    #id,
                    self.started.elapsed().#method(),
                    #suffix
                );
            }
        }
    }
}

/// Adds `tracing::trace!` events at the start and end of an attributed function.
///
/// Accepts `instrument(...)`, forwarded verbatim to `#[tracing::instrument]`,
/// and `timing(precision = "ms")`, which appends the elapsed time to the exit event.
#[proc_macro_attribute]
pub fn traced(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let args = parse_macro_input!(args as Attributes);
    let mut item_fn = parse_macro_input!(item as ItemFn);

    item_fn
        .attrs
        .push(parse_quote! { #[allow(clippy::items_after_statements)] });

    if let Some(fields) = args.instrument {
        item_fn
            .attrs
            .push(parse_quote! { #[tracing::instrument(#fields)] });
    }

    let id = item_fn.sig.ident.to_string();
    let on_exit = exit_event(&id, args.timing);

    let guard: Vec<Stmt> = parse_quote! {
        struct __TraceGuard {
            started: std::time::Instant,
        }

        impl std::ops::Drop for __TraceGuard {
            fn drop(&mut self) {
                #on_exit
            }
        }

        tracing::trace!("OnEnter: {}", #id);
        let __trace_guard = __TraceGuard {
            started: std::time::Instant::now(),
        };
    };

    item_fn.block.stmts.splice(0..0, guard);

    quote! { #item_fn }.into()
}
