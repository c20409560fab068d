#[cfg(feature = "napi")]
use napi_derive::napi;
use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_MALFORMED_MARKUP: &str = "VC0100";
pub const ERR_UNKNOWN_DIRECTIVE: &str = "VC0101";
pub const ERR_DIRECTIVE_VALUE: &str = "VC0102";
pub const ERR_NOT_BINDABLE: &str = "VC0103";
pub const ERR_NO_DEFAULT_PROPERTY: &str = "VC0104";
pub const ERR_UNKNOWN_ELEMENT: &str = "VC0105";
pub const ERR_BINDING_PATH: &str = "VC0106";
pub const ERR_NOT_QUALIFIED: &str = "VC0200";
pub const ERR_UNRESOLVED_TYPE: &str = "VC0201";
pub const ERR_NO_REFERENCES: &str = "VC0300";
pub const ERR_WORKING_DIR: &str = "VC0301";
pub const ERR_NOT_A_VIEW: &str = "VC0302";

pub const ERR_PARSE: &str = "VC0001";
pub const ERR_SEMANTIC: &str = "VC0002";
pub const ERR_NO_CONVERSION: &str = "VC1001";
pub const ERR_UNRESOLVED_MEMBER: &str = "VC1002";
pub const ERR_UNKNOWN_TYPE: &str = "VC1003";
pub const ERR_INVALID_SETTER: &str = "VC1005";
pub const WARN_UNREFERENCED_ASSEMBLY: &str = "VC2001";

pub const ERR_EMIT: &str = "VC3000";

fn describe(code: &str) -> &'static str {
    match code {
        ERR_MALFORMED_MARKUP => "MARKUP_ERROR",
        ERR_UNKNOWN_DIRECTIVE | ERR_DIRECTIVE_VALUE => "DIRECTIVE_ERROR",
        ERR_NOT_BINDABLE | ERR_NO_DEFAULT_PROPERTY | ERR_UNKNOWN_ELEMENT | ERR_BINDING_PATH => {
            "BINDING_ERROR"
        }
        ERR_NOT_QUALIFIED | ERR_UNRESOLVED_TYPE => "RESOLUTION_ERROR",
        ERR_NO_REFERENCES | ERR_WORKING_DIR => "ENVIRONMENT_ERROR",
        ERR_NOT_A_VIEW => "MARKUP_ERROR",
        ERR_EMIT => "EMISSION_ERROR",
        _ => "COMPILATION_ERROR",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE LOCATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Maps byte offsets in a source text to one-based line/column pairs.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    pub fn location(&self, offset: usize) -> SourceLocation {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(next) => next - 1,
        };
        let column = offset - self.line_starts[line];
        SourceLocation::new(line as u32 + 1, column as u32 + 1)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompilerError {
    pub code: String,
    pub error_type: String,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub context: Option<String>,
    pub hints: Vec<String>,
    pub severity: Severity,
}

impl CompilerError {
    pub fn new(code: &str, message: &str, file: &str, location: SourceLocation) -> Self {
        Self::with_details(code, message, file, location, None, vec![])
    }

    pub fn with_details(
        code: &str,
        message: &str,
        file: &str,
        location: SourceLocation,
        context: Option<String>,
        hints: Vec<String>,
    ) -> Self {
        CompilerError {
            code: code.to_string(),
            error_type: describe(code).to_string(),
            message: message.to_string(),
            file: file.to_string(),
            line: location.line,
            column: location.column,
            context,
            hints,
            severity: Severity::Error,
        }
    }

    pub fn warning(code: &str, message: &str, file: &str, location: SourceLocation) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::new(code, message, file, location)
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column)
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(
            f,
            "{}({},{}): {} {}: {}",
            self.file, self.line, self.column, level, self.code, self.message
        )
    }
}
