use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one, inject dependencies,
/// and ensure that any test database is dropped regardless of how the test
/// terminates.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`],
/// `crate::store::Polls` (the store behind that client) and
/// [`mongodb::Database`].
///
/// Tests are backed by the in-memory store unless they take a `Database`, in
/// which case they run against MongoDB at `POLLS_TEST_DB_URI` (default
/// `mongodb://localhost:27017`) in a freshly named database, and are ignored
/// unless requested with `cargo test -- --ignored`.
#[proc_macro_attribute]
pub fn backend_test(_args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract type information and reject invalid function signatures.
    let (test_args, needs_db) = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    let (maybe_ignore, connect) = if needs_db {
        (
            quote! { #[ignore = "requires a MongoDB instance at POLLS_TEST_DB_URI"] },
            quote! {
                let db_uri = std::env::var("POLLS_TEST_DB_URI")
                    .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
                let db_name = format!("test{}", rand::random::<u32>());
                let (db_client, db) = crate::config::connect(&db_uri, &db_name).await.unwrap();
                let polls = crate::store::Polls::new(crate::store::MongoStore::new(db_client, db.clone()));
                (polls, Some(db))
            },
        )
    } else {
        (
            quote! {},
            quote! {
                let store = crate::store::MemoryStore::new(std::time::Duration::from_millis(500));
                (crate::store::Polls::new(store), None)
            },
        )
    };

    // Rewrite the test function.
    quote! {
        #[test]
        #maybe_ignore
        fn #name() {
            /// Test setup.
            async fn setup() -> (
                rocket::local::asynchronous::Client,
                crate::store::Polls,
                Option<mongodb::Database>,
            ) {
                let (polls, db): (crate::store::Polls, Option<mongodb::Database>) = { #connect };
                let rocket_client = rocket::local::asynchronous::Client::tracked(crate::rocket_for_store(polls.clone()))
                    .await
                    .unwrap();
                (rocket_client, polls, db)
            }

            /// The test itself.
            #item_fn

            /// Test cleanup.
            async fn cleanup(db: Option<mongodb::Database>) {
                if let Some(db) = db {
                    db.drop(None).await.unwrap();
                }
            }

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let (rocket_client, polls, db) = outer_runtime.block_on(setup());

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let client_mutex = std::sync::Mutex::new(rocket_client);
            let polls_mutex = std::sync::Mutex::new(polls);
            let db_mutex = std::sync::Mutex::new(db.clone());
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                let rocket_client = client_mutex.into_inner().unwrap();
                let polls = polls_mutex.into_inner().unwrap();
                let db = db_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                // Not every test takes every dependency.
                let _ = (&rocket_client, &polls, &db);

                runtime.block_on(#new_name(#(#test_args),*));
            });

            // Run the cleanup.
            outer_runtime.block_on(cleanup(db));

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::panic_any(cause);
            }
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject
/// unknown parameters. Also reports whether a MongoDB database is needed.
fn check_sig(sig: Signature) -> Result<(Vec<TokenStream2>, bool), syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut has_client = false;
    let mut has_polls = false;
    let mut has_db = false;
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                if let Some(type_ident) = type_path.path.get_ident() {
                    let (seen, arg) = if type_ident == "Client" {
                        (&mut has_client, quote! { rocket_client })
                    } else if type_ident == "Polls" {
                        (&mut has_polls, quote! { polls })
                    } else if type_ident == "Database" {
                        (&mut has_db, quote! { db.unwrap() })
                    } else {
                        return Err(unexpected(input));
                    };
                    if *seen {
                        return Err(syn::Error::new(
                            input.span(),
                            format!("Test cannot accept more than one `{type_ident}`"),
                        ));
                    }
                    *seen = true;
                    args.push(arg);
                    continue;
                }
            }
        }

        return Err(unexpected(input));
    }

    Ok((args, has_db))
}

fn unexpected(input: &FnArg) -> syn::Error {
    syn::Error::new(
        input.span(),
        "Expected one of `client_ident: Client`, `polls_ident: Polls` or `db_ident: Database`",
    )
}
