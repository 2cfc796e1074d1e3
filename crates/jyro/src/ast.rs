//! Typed syntax tree consumed by the compiler.
//!
//! Every node carries its 1-based source line. The compiler only reads the
//! tree; scope analysis keys its side table on the addresses of the
//! scope-introducing nodes ([`Module`], [`FunctionDef`], [`ClassDef`],
//! [`Lambda`]), so the tree must stay put while a
//! [`ScopeTable`](crate::scope::ScopeTable) borrows it.

use crate::options::Mode;

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
    pub mode: Mode,
}

impl Module {
    #[must_use]
    pub fn new(body: Vec<Stmt>) -> Self {
        Self { body, mode: Mode::Exec }
    }

    /// A leading string-literal statement.
    #[must_use]
    pub fn docstring(&self) -> Option<&str> {
        docstring(&self.body)
    }
}

/// The docstring of a statement list: a leading expression statement that is a
/// string literal.
#[must_use]
pub fn docstring(body: &[Stmt]) -> Option<&str> {
    match body.first()?.kind {
        StmtKind::Expr(Expr {
            kind: ExprKind::Str(ref text),
            ..
        }) => Some(text),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub line: u32,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
    Return(Option<Expr>),
    Delete(Vec<Expr>),
    /// `a = b = value`: every target receives the same value.
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: Operator,
        value: Expr,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    /// `raise [type[, inst[, tback]]]`.
    Raise {
        type_: Option<Expr>,
        inst: Option<Expr>,
        tback: Option<Expr>,
    },
    TryExcept {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
    },
    TryFinally {
        body: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Import(Vec<Alias>),
    ImportFrom {
        module: String,
        names: ImportNames,
    },
    /// `exec code [in globals[, locals]]`.
    Exec {
        body: Expr,
        globals: Option<Expr>,
        locals: Option<Expr>,
    },
    Global(Vec<String>),
    Expr(Expr),
    Pass,
    Break,
    Continue,
}

impl StmtKind {
    /// Node name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::FunctionDef(_) => "FunctionDef",
            Self::ClassDef(_) => "ClassDef",
            Self::Return(_) => "Return",
            Self::Delete(_) => "Delete",
            Self::Assign { .. } => "Assign",
            Self::AugAssign { .. } => "AugAssign",
            Self::For { .. } => "For",
            Self::While { .. } => "While",
            Self::If { .. } => "If",
            Self::Raise { .. } => "Raise",
            Self::TryExcept { .. } => "TryExcept",
            Self::TryFinally { .. } => "TryFinally",
            Self::Assert { .. } => "Assert",
            Self::Import(_) => "Import",
            Self::ImportFrom { .. } => "ImportFrom",
            Self::Exec { .. } => "Exec",
            Self::Global(_) => "Global",
            Self::Expr(_) => "Expr",
            Self::Pass => "Pass",
            Self::Break => "Break",
            Self::Continue => "Continue",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub args: Arguments,
    pub body: Vec<Stmt>,
    /// Outermost first; applied innermost-last.
    pub decorators: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub args: Arguments,
    pub body: Box<Expr>,
}

/// A parameter list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    pub args: Vec<Param>,
    /// Defaults for the trailing `args`.
    pub defaults: Vec<Expr>,
    pub vararg: Option<String>,
    pub kwarg: Option<String>,
}

impl Arguments {
    #[must_use]
    pub fn simple(names: &[&str]) -> Self {
        Self {
            args: names.iter().map(|name| Param::Name((*name).to_owned())).collect(),
            ..Self::default()
        }
    }
}

/// A positional parameter: a plain name or a nested tuple to unpack.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Name(String),
    Tuple(Vec<Param>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub line: u32,
    pub type_: Option<Expr>,
    /// Binding target for the exception value.
    pub name: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    /// Dotted name.
    pub name: String,
    pub asname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportNames {
    Star,
    Names(Vec<Alias>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub line: u32,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    BinOp {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Lambda(Lambda),
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Dict {
        keys: Vec<Expr>,
        values: Vec<Expr>,
    },
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
        starargs: Option<Box<Expr>>,
        kwargs: Option<Box<Expr>>,
    },
    Num(Number),
    Str(String),
    Constant(Constant),
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        slice: Box<Expr>,
    },
    /// `lower:upper:step`; only valid as a subscript index or an element of one.
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
}

impl ExprKind {
    /// Node name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::BoolOp { .. } => "BoolOp",
            Self::BinOp { .. } => "BinOp",
            Self::UnaryOp { .. } => "UnaryOp",
            Self::Lambda(_) => "Lambda",
            Self::IfExp { .. } => "IfExp",
            Self::Dict { .. } => "Dict",
            Self::ListComp { .. } => "ListComp",
            Self::Compare { .. } => "Compare",
            Self::Call { .. } => "Call",
            Self::Num(_) => "Num",
            Self::Str(_) => "Str",
            Self::Constant(_) => "Constant",
            Self::Attribute { .. } => "Attribute",
            Self::Subscript { .. } => "Subscript",
            Self::Slice { .. } => "Slice",
            Self::Name(_) => "Name",
            Self::List(_) => "List",
            Self::Tuple(_) => "Tuple",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub arg: String,
    pub value: Expr,
}

/// A numeric literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Number {
    Int(i32),
    /// Decimal digits of an integer outside the `int` range.
    Long(String),
    Float(f64),
    /// Imaginary part of a complex literal such as `2j`.
    Imaginary(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Constant {
    None,
    True,
    False,
    Ellipsis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Operator {
    Add,
    Sub,
    Mult,
    Div,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    FloorDiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Invert,
    Not,
    UAdd,
    USub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

// === Construction helpers ===

impl Stmt {
    #[must_use]
    pub fn new(line: u32, kind: StmtKind) -> Self {
        Self { line, kind }
    }

    #[must_use]
    pub fn expr(value: Expr) -> Self {
        Self::new(value.line, StmtKind::Expr(value))
    }

    #[must_use]
    pub fn assign(target: Expr, value: Expr) -> Self {
        Self::new(
            target.line,
            StmtKind::Assign {
                targets: vec![target],
                value,
            },
        )
    }

    #[must_use]
    pub fn ret(line: u32, value: Option<Expr>) -> Self {
        Self::new(line, StmtKind::Return(value))
    }

    #[must_use]
    pub fn def(line: u32, name: &str, args: Arguments, body: Vec<Self>) -> Self {
        Self::new(
            line,
            StmtKind::FunctionDef(FunctionDef {
                name: name.to_owned(),
                args,
                body,
                decorators: Vec::new(),
            }),
        )
    }

    #[must_use]
    pub fn global(line: u32, names: &[&str]) -> Self {
        Self::new(line, StmtKind::Global(names.iter().map(|n| (*n).to_owned()).collect()))
    }
}

impl Expr {
    #[must_use]
    pub fn new(line: u32, kind: ExprKind) -> Self {
        Self { line, kind }
    }

    #[must_use]
    pub fn name(line: u32, id: &str) -> Self {
        Self::new(line, ExprKind::Name(id.to_owned()))
    }

    #[must_use]
    pub fn int(line: u32, value: i32) -> Self {
        Self::new(line, ExprKind::Num(Number::Int(value)))
    }

    #[must_use]
    pub fn str(line: u32, value: &str) -> Self {
        Self::new(line, ExprKind::Str(value.to_owned()))
    }

    #[must_use]
    pub fn constant(line: u32, value: Constant) -> Self {
        Self::new(line, ExprKind::Constant(value))
    }

    #[must_use]
    pub fn binop(left: Self, op: Operator, right: Self) -> Self {
        Self::new(
            left.line,
            ExprKind::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
        )
    }

    #[must_use]
    pub fn call(func: Self, args: Vec<Self>) -> Self {
        Self::new(
            func.line,
            ExprKind::Call {
                func: Box::new(func),
                args,
                keywords: Vec::new(),
                starargs: None,
                kwargs: None,
            },
        )
    }

    #[must_use]
    pub fn attr(value: Self, attr: &str) -> Self {
        Self::new(
            value.line,
            ExprKind::Attribute {
                value: Box::new(value),
                attr: attr.to_owned(),
            },
        )
    }

    #[must_use]
    pub fn tuple(line: u32, elts: Vec<Self>) -> Self {
        Self::new(line, ExprKind::Tuple(elts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docstring_is_leading_string_statement() {
        let module = Module::new(vec![
            Stmt::expr(Expr::str(1, "doc")),
            Stmt::assign(Expr::name(2, "x"), Expr::int(2, 1)),
        ]);
        assert_eq!(module.docstring(), Some("doc"));
        let module = Module::new(vec![Stmt::assign(Expr::name(1, "x"), Expr::str(1, "s"))]);
        assert_eq!(module.docstring(), None);
    }
}
