//! Scope analysis.
//!
//! Before any bytecode is emitted, [`analyze`] walks the whole tree once and
//! builds a [`ScopeInfo`] for the module and for every `def`, `lambda` and
//! `class`. Each scope records how its names are bound, which locals live in
//! closure cells, which names come from enclosing functions, and the order of
//! the local slots. The result is a [`ScopeTable`] side table keyed by the
//! address of the scope-introducing node.
//!
//! Resolution happens in two steps once a scope's body has been walked:
//!
//! 1. *Cooking* (bottom-up, when a scope ends) classifies every name as a
//!    plain local, a cell, a global or a free variable, and pushes the free
//!    names into the enclosing scope so that scope can turn them into cells.
//! 2. *Closure linking* (top-down, after the walk) gives every free name its
//!    slot in the closure array the enclosing function passes in, or demotes
//!    it to a global lookup when no enclosing function binds it.

mod analyzer;

use std::{fmt, marker::PhantomData, ops};

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};

pub use self::analyzer::analyze;
use crate::ast::{ClassDef, FunctionDef, Lambda, Module, Stmt};

/// What introduced a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ScopeKind {
    /// The module body.
    Top,
    /// A `def` or a `lambda`.
    Function,
    /// A class body.
    Class,
}

/// Binding facts about one name in one scope.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SymbolFlags(u16);

impl SymbolFlags {
    /// Stored to somewhere in the scope.
    pub const BOUND: Self = Self(1 << 0);
    /// Declared `global` in a function.
    pub const NGLOBAL: Self = Self(1 << 1);
    /// Declared `global` in a class body.
    pub const CLASS_GLOBAL: Self = Self(1 << 2);
    pub const GLOBAL: Self = Self(Self::NGLOBAL.0 | Self::CLASS_GLOBAL.0);
    /// A parameter of the function.
    pub const PARAM: Self = Self(1 << 3);
    /// Already known when the parameter list was processed.
    pub const FROM_PARAM: Self = Self(1 << 4);
    /// Target of a plain or augmented assignment.
    pub const FROM_ASSIGN: Self = Self(1 << 5);
    /// A local that inner scopes capture.
    pub const CELL: Self = Self(1 << 6);
    /// Captured from an enclosing scope.
    pub const FREE: Self = Self(1 << 7);

    pub const EMPTY: Self = Self(0);

    const NAMES: [(Self, &'static str); 8] = [
        (Self::BOUND, "BOUND"),
        (Self::NGLOBAL, "NGLOBAL"),
        (Self::CLASS_GLOBAL, "CLASS_GLOBAL"),
        (Self::PARAM, "PARAM"),
        (Self::FROM_PARAM, "FROM_PARAM"),
        (Self::FROM_ASSIGN, "FROM_ASSIGN"),
        (Self::CELL, "CELL"),
        (Self::FREE, "FREE"),
    ];

    /// All bits of `other` are set.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any bit of `other` is set.
    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl ops::BitOr for SymbolFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for SymbolFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("EMPTY");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// One name's entry in a scope's symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SymbolEntry {
    pub flags: SymbolFlags,
    /// Slot in the frame's fast-locals array.
    pub locals_index: Option<u16>,
    /// Slot in the frame's cell/free array: cells first, then free names.
    pub env_index: Option<u16>,
}

/// Everything the code generator needs to know about one scope.
#[derive(Debug, Clone)]
pub struct ScopeInfo {
    pub name: String,
    pub kind: ScopeKind,
    /// Nesting depth; the module is 0.
    pub level: u32,
    /// Number of enclosing functions including this one.
    pub func_level: u32,
    /// Line of the node that opened the scope.
    pub line: u32,
    /// Symbol table in first-seen order.
    pub symbols: IndexMap<String, SymbolEntry>,
    /// Local slot order: parameters, then other locals, then cells that are
    /// not parameters.
    pub names: Vec<String>,
    /// Cell names in cell-slot order.
    pub cellvars: Vec<String>,
    /// Parameters that also live in cells; copied into their cell on entry.
    pub paramcells: Vec<String>,
    /// Number of cells that are not parameters.
    pub npurecell: u16,
    /// Free names in closure-slot order.
    pub freevars: Vec<String>,
    /// Names free in some nested scope that this scope must provide.
    pub inner_free: IndexSet<String>,
    pub some_free: bool,
    /// Contains `exec` without an explicit namespace.
    pub unqual_exec: bool,
    /// Contains any form of `exec`.
    pub exec: bool,
    /// Contains `from ... import *`.
    pub from_import_star: bool,
    /// Synthetic statements that unpack tuple parameters on entry.
    pub prologue: Vec<Stmt>,
    /// Parameter count, including `*args` and `**kwargs`.
    pub argcount: u16,
    pub varargs: bool,
    pub varkwargs: bool,
    /// Next free local slot while cooking.
    next_local: u16,
}

impl ScopeInfo {
    pub(crate) fn new(name: impl Into<String>, kind: ScopeKind, level: u32, func_level: u32, line: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            level,
            func_level,
            line,
            symbols: IndexMap::new(),
            names: Vec::new(),
            cellvars: Vec::new(),
            paramcells: Vec::new(),
            npurecell: 0,
            freevars: Vec::new(),
            inner_free: IndexSet::new(),
            some_free: false,
            unqual_exec: false,
            exec: false,
            from_import_star: false,
            prologue: Vec::new(),
            argcount: 0,
            varargs: false,
            varkwargs: false,
            next_local: 0,
        }
    }

    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<&SymbolEntry> {
        self.symbols.get(name)
    }

    #[must_use]
    pub fn flags(&self, name: &str) -> SymbolFlags {
        self.symbols.get(name).map_or(SymbolFlags::EMPTY, |entry| entry.flags)
    }

    /// Whether locals live in the frame's fast-locals array.
    #[must_use]
    pub fn fast_locals(&self) -> bool {
        self.kind == ScopeKind::Function
    }

    /// Whether unbound names can be looked up directly in the globals.
    #[must_use]
    pub fn optimize_globals(&self) -> bool {
        self.fast_locals() && !self.exec && !self.from_import_star
    }

    /// Whether the scope captures anything from an enclosing function.
    #[must_use]
    pub fn has_closure(&self) -> bool {
        !self.freevars.is_empty()
    }

    // === Recording, used while walking ===

    /// Marks `name` as stored to, unless it is declared global.
    pub(crate) fn add_bound(&mut self, name: &str, extra: SymbolFlags) {
        let entry = self.symbols.entry(name.to_owned()).or_default();
        if !entry.flags.intersects(SymbolFlags::GLOBAL) {
            entry.flags.insert(SymbolFlags::BOUND | extra);
        }
    }

    pub(crate) fn add_used(&mut self, name: &str) {
        self.symbols.entry(name.to_owned()).or_default();
    }

    /// Registers a parameter in the next local slot.
    pub(crate) fn add_param(&mut self, name: &str) {
        let slot = self.next_local;
        self.next_local += 1;
        self.symbols.insert(
            name.to_owned(),
            SymbolEntry {
                flags: SymbolFlags::PARAM | SymbolFlags::BOUND,
                locals_index: Some(slot),
                env_index: None,
            },
        );
        self.names.push(name.to_owned());
        self.argcount += 1;
    }

    /// Tags everything seen so far as coming from the parameter list.
    pub(crate) fn mark_from_param(&mut self) {
        for entry in self.symbols.values_mut() {
            entry.flags.insert(SymbolFlags::FROM_PARAM);
        }
    }

    /// Declares `name` global and returns its previous flags, if any.
    pub(crate) fn add_global(&mut self, name: &str) -> Option<SymbolFlags> {
        let flag = if self.kind == ScopeKind::Class {
            SymbolFlags::CLASS_GLOBAL
        } else {
            SymbolFlags::NGLOBAL
        };
        match self.symbols.get_mut(name) {
            Some(entry) => {
                let previous = entry.flags;
                entry.flags.insert(flag | SymbolFlags::BOUND);
                Some(previous)
            }
            None => {
                self.symbols.insert(
                    name.to_owned(),
                    SymbolEntry {
                        flags: flag | SymbolFlags::BOUND,
                        ..SymbolEntry::default()
                    },
                );
                None
            }
        }
    }

    // === Resolution ===

    /// Classifies every name once the body has been walked.
    ///
    /// `enclosing` is the scope this one is nested in; the module itself is
    /// never cooked. Free names that the enclosing scope must supply are
    /// added to its `inner_free`.
    pub(crate) fn cook(&mut self, enclosing: &mut Self) {
        let is_function = self.kind == ScopeKind::Function;
        let mut purecells = Vec::new();
        for name in &self.inner_free {
            let Some(entry) = self.symbols.get_mut(name) else {
                self.symbols.insert(
                    name.clone(),
                    SymbolEntry {
                        flags: SymbolFlags::FREE,
                        ..SymbolEntry::default()
                    },
                );
                continue;
            };
            if !is_function {
                entry.flags.insert(SymbolFlags::FREE);
            } else if !entry.flags.contains(SymbolFlags::NGLOBAL) && entry.flags.contains(SymbolFlags::BOUND) {
                entry.flags.insert(SymbolFlags::CELL);
                entry.env_index = Some(self.cellvars.len() as u16);
                self.cellvars.push(name.clone());
                if entry.flags.contains(SymbolFlags::PARAM) {
                    self.paramcells.push(name.clone());
                } else {
                    purecells.push(name.clone());
                }
            }
        }

        let nested = enclosing.kind != ScopeKind::Top;
        for (name, entry) in &mut self.symbols {
            if nested && entry.flags.contains(SymbolFlags::FREE) {
                enclosing.inner_free.insert(name.clone());
            }
            if entry
                .flags
                .intersects(SymbolFlags::GLOBAL | SymbolFlags::PARAM | SymbolFlags::CELL)
            {
                continue;
            }
            if entry.flags.contains(SymbolFlags::BOUND) {
                entry.locals_index = Some(self.next_local);
                self.next_local += 1;
                self.names.push(name.clone());
            } else {
                entry.flags.insert(SymbolFlags::FREE);
                self.some_free = true;
                if nested {
                    enclosing.inner_free.insert(name.clone());
                }
            }
        }

        self.npurecell = purecells.len() as u16;
        self.names.extend(purecells);
    }

    /// Assigns closure slots to free names, given the already-linked enclosing scope.
    ///
    /// A free name the enclosing scope neither holds in a cell nor receives
    /// itself falls back to a global lookup.
    pub(crate) fn link_closure(&mut self, enclosing: &Self) {
        let mut next_env = self.cellvars.len() as u16;
        for (name, entry) in &mut self.symbols {
            if !entry.flags.contains(SymbolFlags::FREE) {
                continue;
            }
            let outer = enclosing.flags(name);
            if outer.intersects(SymbolFlags::CELL | SymbolFlags::FREE) {
                entry.env_index = Some(next_env);
                next_env += 1;
                self.freevars.push(name.clone());
            } else {
                entry.flags.remove(SymbolFlags::FREE);
                if enclosing.kind != ScopeKind::Top && outer.contains(SymbolFlags::NGLOBAL) {
                    entry.flags = SymbolFlags::NGLOBAL | SymbolFlags::BOUND;
                }
            }
        }
    }

    /// Names still free after cooking, for tracing.
    pub(crate) fn free_names(&self) -> Vec<String> {
        self.symbols
            .iter()
            .filter(|(_, entry)| entry.flags.contains(SymbolFlags::FREE))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Identity of a scope-introducing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ScopeKey(usize);

impl ScopeKey {
    pub(crate) fn of<T>(node: &T) -> Self {
        Self(std::ptr::from_ref(node) as usize)
    }
}

/// Module name of future statements.
pub const FUTURE_MODULE: &str = "__future__";

/// Features `from __future__ import` accepts.
pub const FUTURE_FEATURES: &[&str] = &[
    "nested_scopes",
    "generators",
    "division",
    "absolute_import",
    "with_statement",
    "print_function",
    "unicode_literals",
];

/// Compiler behaviour switched on by the module's future statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Futures {
    /// `from __future__ import division`: `/` is true division.
    pub division: bool,
}

/// Scopes of one module, keyed by the nodes that introduced them.
///
/// Borrows the tree for `'t` so the node addresses stay valid.
#[derive(Debug)]
pub struct ScopeTable<'t> {
    scopes: Vec<ScopeInfo>,
    parents: Vec<Option<usize>>,
    by_node: AHashMap<ScopeKey, usize>,
    futures: Futures,
    _tree: PhantomData<&'t Module>,
}

impl ScopeTable<'_> {
    /// Features turned on by leading `from __future__` imports.
    #[must_use]
    pub fn futures(&self) -> Futures {
        self.futures
    }

    /// The module scope.
    #[must_use]
    pub fn module(&self) -> &ScopeInfo {
        &self.scopes[0]
    }

    #[must_use]
    pub fn function(&self, def: &FunctionDef) -> Option<&ScopeInfo> {
        self.get(ScopeKey::of(def))
    }

    #[must_use]
    pub fn lambda(&self, lambda: &Lambda) -> Option<&ScopeInfo> {
        self.get(ScopeKey::of(lambda))
    }

    #[must_use]
    pub fn class(&self, class: &ClassDef) -> Option<&ScopeInfo> {
        self.get(ScopeKey::of(class))
    }

    fn get(&self, key: ScopeKey) -> Option<&ScopeInfo> {
        self.by_node.get(&key).map(|&index| &self.scopes[index])
    }

    /// All scopes in the order they were opened.
    pub fn iter(&self) -> impl Iterator<Item = &ScopeInfo> {
        self.scopes.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// The scope enclosing `scope`, or `None` for the module.
    #[must_use]
    pub fn parent_of(&self, scope: &ScopeInfo) -> Option<&ScopeInfo> {
        let index = self.scopes.iter().position(|candidate| std::ptr::eq(candidate, scope))?;
        self.parents[index].map(|parent| &self.scopes[parent])
    }
}
