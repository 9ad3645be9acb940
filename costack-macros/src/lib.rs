//! Attribute macros for costack.
//!
//! - `#[costack::main]` turns `fn main` into a scheduler entry point,
//! - `#[costack::test]` does the same for a `#[test]` function.
//!
//! In both cases the function body runs inside a coroutine driven by
//! `Scheduler::block_on`, so it may yield, suspend and wait on sockets.

mod utils;

use proc_macro::{Delimiter, Group, TokenStream, TokenTree};

/// Options recognised by `#[costack::main(...)]`.
const SCHEDULER_OPTIONS: [&str; 2] = ["stack_size", "dead_cache"];

/// Builds the scheduler expression for the given attribute options.
fn scheduler_expr(attr: TokenStream) -> Result<String, String> {
    let mut builder = String::from("::costack::SchedulerBuilder::new()");

    for (key, value) in utils::parse_options(attr)? {
        if !SCHEDULER_OPTIONS.contains(&key.as_str()) {
            return Err(format!(
                "unknown option `{key}`, expected one of: {}",
                SCHEDULER_OPTIONS.join(", ")
            ));
        }

        builder.push_str(&format!(".{key}({value})"));
    }

    builder.push_str(".build()");
    Ok(builder)
}

/// Replaces the body of the function in `item` by a `block_on` call.
fn wrap_body(item: TokenStream, scheduler: &str, name: &str) -> TokenStream {
    let mut tokens: Vec<TokenTree> = item.into_iter().collect();

    if tokens
        .iter()
        .any(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "async"))
    {
        return utils::compile_error(&format!(
            "#[costack::{name}] expects a plain `fn`, coroutines are not async"
        ));
    }

    let Some(pos) = tokens
        .iter()
        .rposition(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Brace))
    else {
        return utils::compile_error(&format!("#[costack::{name}] expects a function"));
    };

    let block = match &tokens[pos] {
        TokenTree::Group(g) => g.stream().to_string(),
        _ => unreachable!(),
    };

    let output = return_type(&tokens[..pos])
        .map(|ty| format!("-> {ty} "))
        .unwrap_or_default();

    let new_block = format!(
        "{{
            let scheduler = {scheduler};
            match scheduler.block_on(move || {output}{{ {block} }}) {{
                ::core::result::Result::Ok(value) => value,
                ::core::result::Result::Err(err) => {{
                    ::core::panic!(\"costack::{name}: {{}}\", err)
                }}
            }}
        }}"
    );

    let body = match new_block.parse::<TokenStream>() {
        Ok(body) => body,
        Err(err) => return utils::compile_error(&format!("costack::{name}: {err}")),
    };

    tokens[pos] = TokenTree::Group(Group::new(Delimiter::Brace, body));
    tokens.into_iter().collect()
}

/// Returns the declared return type of a function signature, if any.
///
/// The closure handed to `block_on` repeats it so that `?` in the body
/// converts errors into the same type as the function would.
fn return_type(signature: &[TokenTree]) -> Option<String> {
    let arrow = signature.windows(2).position(|pair| {
        matches!(
            pair,
            [TokenTree::Punct(a), TokenTree::Punct(b)]
                if a.as_char() == '-' && b.as_char() == '>'
        )
    })?;

    let ty: Vec<TokenTree> = signature[arrow + 2..]
        .iter()
        .take_while(|t| !matches!(t, TokenTree::Ident(id) if id.to_string() == "where"))
        .cloned()
        .collect();

    Some(utils::tokens_to_string(&ty))
}

/// Runs `main` inside a coroutine.
///
/// Accepts `stack_size = N` and `dead_cache = N` to configure the
/// scheduler.
///
/// ```rust,ignore
/// #[costack::main(stack_size = 128 * 1024)]
/// fn main() {
///     let listener = costack::net::TcpListener::bind("127.0.0.1:0").unwrap();
///     // ...
/// }
/// ```
#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    match scheduler_expr(attr) {
        Ok(scheduler) => wrap_body(item, &scheduler, "main"),
        Err(message) => utils::compile_error(&message),
    }
}

/// Runs a test function inside a coroutine on a fresh scheduler.
///
/// ```rust,ignore
/// #[costack::test]
/// fn yields() {
///     assert!(!costack::yield_now());
/// }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let scheduler = match scheduler_expr(attr) {
        Ok(scheduler) => scheduler,
        Err(message) => return utils::compile_error(&message),
    };

    let test_attr: TokenStream = "#[::core::prelude::v1::test]".parse().unwrap_or_default();

    let mut result: Vec<TokenTree> = test_attr.into_iter().collect();
    result.extend(wrap_body(item, &scheduler, "test"));
    result.into_iter().collect()
}
