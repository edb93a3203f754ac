use proc_macro::{Delimiter, TokenStream, TokenTree};

/// Splits a `TokenStream` into comma-separated arguments.
///
/// Each argument is returned as a `Vec<TokenTree>`.
/// Commas at the top level are used as separators.
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

/// Builds the `RuntimeBuilder` expression for the macro attribute.
///
/// Recognized arguments:
///
/// ```text
/// clock = "virtual" | "real"
/// uncaught = "panic" | "log"
/// ```
pub(crate) fn builder_expr(attr: TokenStream) -> Result<String, String> {
    let mut builder = String::from("::eventide::RuntimeBuilder::new()");

    for arg in split_args(attr) {
        let text = arg.iter().map(|t| t.to_string()).collect::<String>();
        let Some((key, value)) = text.split_once('=') else {
            return Err(format!("expected `key = \"value\"`, found `{text}`"));
        };
        let value = value.trim().trim_matches('"');

        match (key.trim(), value) {
            ("clock", "virtual") => builder.push_str(".clock(::eventide::Clock::Virtual)"),
            ("clock", "real") => builder.push_str(".clock(::eventide::Clock::Real)"),
            ("uncaught", "panic") => {
                builder.push_str(".uncaught_errors(::eventide::UncaughtErrorPolicy::Panic)")
            }
            ("uncaught", "log") => {
                builder.push_str(".uncaught_errors(::eventide::UncaughtErrorPolicy::Log)")
            }
            (key, value) => return Err(format!("unsupported argument `{key} = {value}`")),
        }
    }

    builder.push_str(".build()");
    Ok(builder)
}

/// Returns the index of the function body (the last brace-delimited group).
pub(crate) fn body_position(tokens: &[TokenTree]) -> Option<usize> {
    tokens
        .iter()
        .rposition(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Brace))
}

/// Removes the `async` keyword from the function signature.
pub(crate) fn strip_async(tokens: &mut Vec<TokenTree>) {
    if let Some(pos) = tokens
        .iter()
        .position(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "async"))
    {
        tokens.remove(pos);
    }
}

pub(crate) fn compile_error(msg: &str) -> TokenStream {
    format!("compile_error!({msg:?});").parse().unwrap()
}
