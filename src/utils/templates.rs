//! `{{...}}` expression expansion for subflow input mappings.
//!
//! Supported expressions: `{{input}}`, `{{outputs.<node-id>}}`, and
//! `{{context.sessionId}}`. Unknown expressions render as empty text;
//! everything outside braces passes through literally.

use crate::runtime::ExecutionContext;

/// Expand every `{{...}}` expression in `template`.
#[must_use]
pub fn expand(template: &str, input: &str, ctx: &ExecutionContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                let expr = after_open[..close].trim();
                out.push_str(&resolve(expr, input, ctx));
                rest = &after_open[close + 2..];
            }
            None => {
                // Unterminated braces pass through literally.
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve(expr: &str, input: &str, ctx: &ExecutionContext) -> String {
    if expr == "input" {
        return input.to_string();
    }
    if let Some(node_id) = expr.strip_prefix("outputs.") {
        return ctx.output_of(node_id).unwrap_or_default();
    }
    if expr == "context.sessionId" {
        return ctx.session_id();
    }
    tracing::debug!(expr, "unknown template expression");
    String::new()
}
