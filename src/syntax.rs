//! Binding-expression syntax.
//!
//! Discovery only needs two questions answered about attribute and text values:
//! is this a binding expression, and which member path does it bind to.

use lazy_static::lazy_static;
use regex::Regex;

pub trait ExpressionSyntax: Send + Sync {
    fn is_binding_expression(&self, text: &str) -> bool;
    /// Dotted member path the expression reads, empty for the source itself.
    fn member_path(&self, text: &str) -> String;
}

lazy_static! {
    /// `{{Binding}}`, `{{Binding Foo.Bar}}`, `{{Binding Path=Foo}}`
    static ref BINDING_RE: Regex =
        Regex::new(r"^\s*\{\{\s*Binding(?:\s+(?:Path\s*=\s*)?([^{}]*?))?\s*\}\}\s*$").unwrap();

    static ref MEMBER_PATH_RE: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap();
}

/// The `{{Binding Path}}` syntax understood by the default runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindingSyntax;

impl ExpressionSyntax for BindingSyntax {
    fn is_binding_expression(&self, text: &str) -> bool {
        BINDING_RE.is_match(text)
    }

    fn member_path(&self, text: &str) -> String {
        BINDING_RE
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    }
}

/// Member paths must be plain dotted identifiers to be rendered as accessors.
pub fn is_valid_member_path(path: &str) -> bool {
    path.is_empty() || MEMBER_PATH_RE.is_match(path)
}
