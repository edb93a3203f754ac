//! Procedural macros for the Eventide runtime.
//!
//! - `#[eventide::main]` turns an `async fn main` into a synchronous entry point
//!   driving the body on a fresh runtime.
//! - `#[eventide::test]` does the same for `async` test functions and adds `#[test]`.
//!
//! Both accept `clock = "virtual" | "real"` to select the runtime clock and
//! `uncaught = "panic" | "log"` to select the uncaught error policy.

mod utils;

use proc_macro::{Delimiter, Group, TokenStream, TokenTree};

#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    let builder = match utils::builder_expr(attr) {
        Ok(builder) => builder,
        Err(msg) => return utils::compile_error(&msg),
    };

    let mut tokens: Vec<TokenTree> = item.into_iter().collect();
    utils::strip_async(&mut tokens);

    let Some(pos) = utils::body_position(&tokens) else {
        return utils::compile_error("#[eventide::main] expects a function with a body");
    };

    let block = match &tokens[pos] {
        TokenTree::Group(g) => g.stream().to_string(),
        _ => unreachable!(),
    };

    let new_block = format!(
        "{{
            let runtime = {};
            runtime
                .block_on(async move {{
                    {}
                }})
        }}",
        builder, block
    );

    match new_block.parse() {
        Ok(stream) => {
            tokens[pos] = TokenTree::Group(Group::new(Delimiter::Brace, stream));
            tokens.into_iter().collect()
        }
        Err(err) => utils::compile_error(&format!("main macro error: {err}")),
    }
}

#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let builder = match utils::builder_expr(attr) {
        Ok(builder) => builder,
        Err(msg) => return utils::compile_error(&msg),
    };

    let mut tokens = item.into_iter().collect::<Vec<_>>();
    utils::strip_async(&mut tokens);

    let Some(pos) = utils::body_position(&tokens) else {
        return utils::compile_error("#[eventide::test] expects a function with a body");
    };

    let block = match &tokens[pos] {
        TokenTree::Group(g) => g.stream().to_string(),
        _ => unreachable!(),
    };

    let new_block = format!(
        "{{
        let runtime = {};
        runtime
            .block_on(async move {{ {} }});
    }}",
        builder, block
    );

    let stream = match new_block.parse() {
        Ok(stream) => stream,
        Err(err) => return utils::compile_error(&format!("test macro error: {err}")),
    };

    tokens[pos] = TokenTree::Group(Group::new(Delimiter::Brace, stream));

    let test_attr: TokenStream = "#[test]".parse().unwrap();
    let mut result: Vec<TokenTree> = test_attr.into_iter().collect();
    result.extend(tokens);

    result.into_iter().collect()
}
