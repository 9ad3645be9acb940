use proc_macro::{TokenStream, TokenTree};

/// Splits a `TokenStream` into comma-separated arguments.
///
/// Each argument is returned as a `Vec<TokenTree>`. Only top-level
/// commas separate arguments; groups are kept whole.
pub(crate) fn split_args(input: TokenStream) -> Vec<Vec<TokenTree>> {
    let mut args = Vec::new();
    let mut current = Vec::new();

    for token in input {
        match &token {
            TokenTree::Punct(p) if p.as_char() == ',' => {
                if !current.is_empty() {
                    args.push(current);
                    current = Vec::new();
                }
            }
            _ => current.push(token),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }

    args
}

/// Converts a slice of tokens back into source text.
///
/// A space is inserted between consecutive identifiers so that `n as
/// usize` does not collapse into a single identifier.
pub(crate) fn tokens_to_string(tokens: &[TokenTree]) -> String {
    let mut out = String::new();
    let mut prev_was_ident = false;

    for token in tokens {
        let is_ident = matches!(token, TokenTree::Ident(_));

        if prev_was_ident && is_ident {
            out.push(' ');
        }

        out.push_str(&token.to_string());
        prev_was_ident = is_ident;
    }

    out
}

/// Parses `key = value` attribute arguments.
///
/// Returns the pairs as strings, or a message naming the first argument
/// that does not have that shape.
pub(crate) fn parse_options(attr: TokenStream) -> Result<Vec<(String, String)>, String> {
    let mut options = Vec::new();

    for arg in split_args(attr) {
        match arg.as_slice() {
            [TokenTree::Ident(key), TokenTree::Punct(eq), value @ ..]
                if eq.as_char() == '=' && !value.is_empty() =>
            {
                options.push((key.to_string(), tokens_to_string(value)));
            }
            other => {
                return Err(format!(
                    "expected `key = value`, found `{}`",
                    tokens_to_string(other)
                ));
            }
        }
    }

    Ok(options)
}

/// Emits a `compile_error!` carrying `message`.
pub(crate) fn compile_error(message: &str) -> TokenStream {
    format!("compile_error!({message:?});")
        .parse()
        .unwrap_or_default()
}
