//! Compiler configuration.
//!
//! Both option structs are plain serde data so the CLI can load them from a
//! JSON file, and expose `#[must_use]` builder methods for programmatic use.

use serde::{Deserialize, Serialize};

pub use crate::classfile::ClassVersion;

/// How the module body is interpreted.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// A sequence of statements; the module returns `None`.
    #[default]
    Exec,
    /// Interactive input; top-level expression statements print their value.
    Single,
    /// A single expression whose value the module returns.
    Eval,
}

/// Protocol used to step through the iterable of a `for` loop or comprehension.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Iteration {
    /// `__finditem__(int)` with a counter, stopping at null.
    #[default]
    Indexed,
    /// `__iter__()` once, then `__iternext__()` until null.
    Iterator,
}

/// Lowering of `try`/`finally`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FinallyLowering {
    /// `Subroutine` when the class version still allows `jsr`, else `Inline`.
    #[default]
    Auto,
    /// One copy of the finally block entered through `jsr`/`ret`.
    Subroutine,
    /// A copy of the finally block at every exit.
    Inline,
}

impl FinallyLowering {
    /// Resolves `Auto` against the target class version.
    #[must_use]
    pub fn resolve(self, version: ClassVersion) -> Self {
        match self {
            Self::Auto if version.supports_subroutines() => Self::Subroutine,
            Self::Auto => Self::Inline,
            other => other,
        }
    }
}

/// Options for compiling a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Emit `LineNumberTable` attributes.
    pub line_numbers: bool,
    /// Set `__file__` in the module prologue.
    pub set_file: bool,
    pub mode: Mode,
    pub iteration: Iteration,
    pub finally: FinallyLowering,
    /// Compile `/` to `_truediv`.
    pub true_division: bool,
    pub class_version: ClassVersion,
    /// Value of the `org.python.APIVersion` class attribute.
    pub api_version: u32,
    /// Add a `main(String[])` entry point.
    pub emit_main: bool,
}

/// API version expected by the runtime the generated classes link against.
pub const DEFAULT_API_VERSION: u32 = 12;

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            line_numbers: true,
            set_file: true,
            mode: Mode::Exec,
            iteration: Iteration::Indexed,
            finally: FinallyLowering::Auto,
            true_division: false,
            class_version: ClassVersion::default(),
            api_version: DEFAULT_API_VERSION,
            emit_main: false,
        }
    }
}

impl CompileOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn line_numbers(mut self, enabled: bool) -> Self {
        self.line_numbers = enabled;
        self
    }

    #[must_use]
    pub fn set_file(mut self, enabled: bool) -> Self {
        self.set_file = enabled;
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn iteration(mut self, iteration: Iteration) -> Self {
        self.iteration = iteration;
        self
    }

    #[must_use]
    pub fn finally(mut self, finally: FinallyLowering) -> Self {
        self.finally = finally;
        self
    }

    #[must_use]
    pub fn true_division(mut self, enabled: bool) -> Self {
        self.true_division = enabled;
        self
    }

    #[must_use]
    pub fn class_version(mut self, version: ClassVersion) -> Self {
        self.class_version = version;
        self
    }

    #[must_use]
    pub fn api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    #[must_use]
    pub fn emit_main(mut self, enabled: bool) -> Self {
        self.emit_main = enabled;
        self
    }

    /// The finally lowering in effect for the configured class version.
    #[must_use]
    pub fn effective_finally(&self) -> FinallyLowering {
        self.finally.resolve(self.class_version)
    }

    /// Parses options from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Package proxies are generated into unless overridden.
pub const DEFAULT_PROXY_PACKAGE: &str = "org.python.proxies";

/// Options for generating a proxy or adapter class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyOptions {
    /// Adapter mode: missing overrides of abstract methods return a zero
    /// value instead of raising.
    pub adapter: bool,
    /// Dotted package of the generated class.
    pub package: String,
    pub class_version: ClassVersion,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            adapter: false,
            package: DEFAULT_PROXY_PACKAGE.to_owned(),
            class_version: ClassVersion::default(),
        }
    }
}

impl ProxyOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn adapter(mut self, enabled: bool) -> Self {
        self.adapter = enabled;
        self
    }

    #[must_use]
    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults() {
        let options = CompileOptions::default();
        assert!(options.line_numbers);
        assert_eq!(options.iteration, Iteration::Indexed);
        assert_eq!(options.class_version, ClassVersion::new(49, 0));
        assert_eq!(options.api_version, 12);
        assert_eq!(options.effective_finally(), FinallyLowering::Subroutine);
    }

    #[test]
    fn auto_finally_follows_version() {
        let options = CompileOptions::new().class_version(ClassVersion::new(52, 0));
        assert_eq!(options.effective_finally(), FinallyLowering::Inline);
        let forced = options.finally(FinallyLowering::Subroutine);
        assert_eq!(forced.effective_finally(), FinallyLowering::Subroutine);
    }

    #[test]
    fn json_fills_missing_fields() {
        let options = CompileOptions::from_json(r#"{"mode": "eval", "iteration": "iterator"}"#).unwrap();
        assert_eq!(options.mode, Mode::Eval);
        assert_eq!(options.iteration, Iteration::Iterator);
        assert!(options.set_file);
    }

    #[test]
    fn enum_names_parse() {
        assert_eq!("single".parse::<Mode>().unwrap(), Mode::Single);
        assert_eq!("inline".parse::<FinallyLowering>().unwrap(), FinallyLowering::Inline);
        assert_eq!(Iteration::Iterator.to_string(), "iterator");
    }
}
