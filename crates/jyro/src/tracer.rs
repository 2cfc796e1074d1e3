//! Compiler progress hooks.
//!
//! The compiler is generic over a [`CompileTracer`], so the default
//! [`NoopTracer`] compiles away entirely. Other implementations:
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op default |
//! | [`LogTracer`] | Forwards events to `tracing` |
//! | [`RecordingTracer`] | Keeps every event, for tests and tooling |

/// Event recorded by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileEvent {
    /// A scope finished cooking.
    ScopeCooked {
        name: String,
        locals: Vec<String>,
        cells: Vec<String>,
        free: Vec<String>,
    },
    /// A code unit's method body was emitted.
    UnitEmitted {
        name: String,
        method: String,
        max_stack: u16,
        max_locals: u16,
        code_len: usize,
    },
    /// A module constant field was allocated.
    Constant { field: String, value: String },
    /// A proxy method was generated.
    ProxyMethod { name: String, descriptor: String, abstract_: bool },
    Warning(String),
}

/// Hooks invoked while compiling.
///
/// All methods default to no-ops.
pub trait CompileTracer: std::fmt::Debug {
    /// Called when scope analysis has finalized a nested scope.
    #[inline(always)]
    fn on_scope_cooked(&mut self, _name: &str, _locals: &[String], _cells: &[String], _free: &[String]) {}

    /// Called after a code unit's method body is finished.
    #[inline(always)]
    fn on_unit_emitted(&mut self, _name: &str, _method: &str, _max_stack: u16, _max_locals: u16, _code_len: usize) {}

    /// Called when a literal gets its own constant field.
    #[inline(always)]
    fn on_constant(&mut self, _field: &str, _value: &str) {}

    /// Called for every method the proxy maker generates.
    #[inline(always)]
    fn on_proxy_method(&mut self, _name: &str, _descriptor: &str, _is_abstract: bool) {}

    /// Called for conditions that do not stop compilation.
    #[inline(always)]
    fn on_warning(&mut self, _message: &str) {}
}

impl<T: CompileTracer + ?Sized> CompileTracer for &mut T {
    fn on_scope_cooked(&mut self, name: &str, locals: &[String], cells: &[String], free: &[String]) {
        (**self).on_scope_cooked(name, locals, cells, free);
    }

    fn on_unit_emitted(&mut self, name: &str, method: &str, max_stack: u16, max_locals: u16, code_len: usize) {
        (**self).on_unit_emitted(name, method, max_stack, max_locals, code_len);
    }

    fn on_constant(&mut self, field: &str, value: &str) {
        (**self).on_constant(field, value);
    }

    fn on_proxy_method(&mut self, name: &str, descriptor: &str, is_abstract: bool) {
        (**self).on_proxy_method(name, descriptor, is_abstract);
    }

    fn on_warning(&mut self, message: &str) {
        (**self).on_warning(message);
    }
}

// ============================================================================
// NoopTracer
// ============================================================================

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl CompileTracer for NoopTracer {}

// ============================================================================
// LogTracer
// ============================================================================

/// Forwards events to the `tracing` crate.
///
/// Scope and unit events go out at debug level, constants and proxy methods
/// at trace level, warnings at warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl CompileTracer for LogTracer {
    fn on_scope_cooked(&mut self, name: &str, locals: &[String], cells: &[String], free: &[String]) {
        tracing::debug!(scope = name, ?locals, ?cells, ?free, "scope cooked");
    }

    fn on_unit_emitted(&mut self, name: &str, method: &str, max_stack: u16, max_locals: u16, code_len: usize) {
        tracing::debug!(unit = name, method, max_stack, max_locals, code_len, "code unit emitted");
    }

    fn on_constant(&mut self, field: &str, value: &str) {
        tracing::trace!(field, value, "constant");
    }

    fn on_proxy_method(&mut self, name: &str, descriptor: &str, is_abstract: bool) {
        tracing::trace!(name, descriptor, is_abstract, "proxy method");
    }

    fn on_warning(&mut self, message: &str) {
        tracing::warn!("{message}");
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Records every event in order.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<CompileEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[CompileEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<CompileEvent> {
        self.events
    }

    /// Warnings recorded so far.
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|event| match event {
            CompileEvent::Warning(message) => Some(message.as_str()),
            _ => None,
        })
    }

    fn push(&mut self, event: CompileEvent) {
        if self.limit.is_none_or(|limit| self.events.len() < limit) {
            self.events.push(event);
        }
    }
}

impl CompileTracer for RecordingTracer {
    fn on_scope_cooked(&mut self, name: &str, locals: &[String], cells: &[String], free: &[String]) {
        self.push(CompileEvent::ScopeCooked {
            name: name.to_owned(),
            locals: locals.to_vec(),
            cells: cells.to_vec(),
            free: free.to_vec(),
        });
    }

    fn on_unit_emitted(&mut self, name: &str, method: &str, max_stack: u16, max_locals: u16, code_len: usize) {
        self.push(CompileEvent::UnitEmitted {
            name: name.to_owned(),
            method: method.to_owned(),
            max_stack,
            max_locals,
            code_len,
        });
    }

    fn on_constant(&mut self, field: &str, value: &str) {
        self.push(CompileEvent::Constant {
            field: field.to_owned(),
            value: value.to_owned(),
        });
    }

    fn on_proxy_method(&mut self, name: &str, descriptor: &str, is_abstract: bool) {
        self.push(CompileEvent::ProxyMethod {
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            abstract_: is_abstract,
        });
    }

    fn on_warning(&mut self, message: &str) {
        self.push(CompileEvent::Warning(message.to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_respects_limit() {
        let mut tracer = RecordingTracer::with_limit(1);
        tracer.on_warning("first");
        tracer.on_warning("second");
        assert_eq!(tracer.warnings().collect::<Vec<_>>(), vec!["first"]);
    }
}
