use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

struct TimeoutOptions {
    secs: u64,
    paused: bool,
}

impl Default for TimeoutOptions {
    fn default() -> Self {
        Self {
            secs: 60,
            paused: false,
        }
    }
}

/// Runs an async test on a current-thread Tokio runtime inside a watchdog
/// thread.
///
/// Accepted forms:
/// - `#[tokio_timeout_test]` (60 second limit)
/// - `#[tokio_timeout_test(30)]`
/// - `#[tokio_timeout_test(secs = 30, paused)]`
///
/// `paused` starts the runtime with a paused clock so timers advance
/// instantly once the test is idle. Only the wall-clock watchdog applies in
/// that mode; a virtual-time timeout would fire as soon as the clock jumps.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut options = TimeoutOptions::default();

    if !attr.is_empty() {
        if let Ok(lit) = syn::parse::<LitInt>(attr.clone()) {
            options.secs = match lit.base10_parse() {
                Ok(secs) => secs,
                Err(err) => return err.to_compile_error().into(),
            };
        } else {
            let parser = syn::meta::parser(|meta| {
                if meta.path.is_ident("paused") {
                    options.paused = true;
                    Ok(())
                } else if meta.path.is_ident("secs") {
                    let lit: LitInt = meta.value()?.parse()?;
                    options.secs = lit.base10_parse()?;
                    Ok(())
                } else {
                    Err(meta.error("expected `secs = N` or `paused`"))
                }
            });
            parse_macro_input!(attr with parser);
        }
    }

    if options.secs == 0 {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "timeout must be greater than zero",
        )
        .to_compile_error()
        .into();
    }

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }

    sig.asyncness = None;

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_tokio_test_attribute(attr))
        .collect();

    let timeout = options.secs;
    let body = if options.paused {
        quote! {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async move #block);
        }
    } else {
        quote! {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async {
                tokio::time::timeout(timeout_duration, async move #block)
                    .await
                    .expect("test timed out");
            });
        }
    };

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            let timeout_duration = std::time::Duration::from_secs(#timeout);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    #body
                }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

fn is_tokio_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(first), Some(second), None)
            if first.ident == "tokio" && second.ident == "test"
    )
}
