//! Compile errors.

use std::fmt;

/// Category of a compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected by the front end, or structurally invalid input.
    Syntax,
    GlobalAfterUse,
    GlobalAfterAssignment,
    LocalAndGlobal,
    IllegalTarget,
    BareExceptNotLast,
    /// `exec` or `import *` where names cannot be resolved statically.
    DynamicScope,
    OutsideLoop,
    OutsideFunction,
    DeleteCell,
    StringTooLarge,
    TooManyConstants,
    CodeTooLarge,
    FinalSuperclass,
    /// A construct the compiler has no lowering for.
    Unhandled,
}

/// An error that aborts compilation; no output is produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}{}", line_suffix(.line))]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    /// 1-based source line, 0 when unknown.
    pub line: u32,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
        }
    }

    pub(crate) fn syntax(message: impl Into<String>, line: u32) -> Self {
        Self::new(ErrorKind::Syntax, message, line)
    }

    pub(crate) fn unhandled(what: impl fmt::Display, line: u32) -> Self {
        Self::new(ErrorKind::Unhandled, format!("unhandled node: {what}"), line)
    }
}

fn line_suffix(line: &u32) -> String {
    if *line == 0 {
        String::new()
    } else {
        format!(" (line {line})")
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_line() {
        let err = CompileError::new(ErrorKind::LocalAndGlobal, "name 'x' is local and global", 3);
        assert_eq!(err.to_string(), "name 'x' is local and global (line 3)");
        assert_eq!(err.kind.to_string(), "local_and_global");
        let err = CompileError::new(ErrorKind::TooManyConstants, "too many constants", 0);
        assert_eq!(err.to_string(), "too many constants");
    }
}
