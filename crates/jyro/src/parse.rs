//! Front end: builds the typed [`ast`](crate::ast) tree from source text.
//!
//! Source is parsed with ruff's Python parser and the resulting nodes are
//! mapped onto the subset the compiler lowers. Anything outside that subset is
//! reported as an `unhandled node` error carrying the line of the construct.

use num_bigint::BigInt;
use ruff_python_ast::{
    self as ast, BoolOp as AstBoolOp, CmpOp as AstCmpOp, ElifElseClause, Expr as AstExpr, Number as AstNumber,
    Operator as AstOperator, Parameters, Stmt as AstStmt, UnaryOp as AstUnaryOp,
};
use ruff_python_parser::{parse_expression, parse_module};
use ruff_text_size::{Ranged, TextRange};

use crate::{
    ast::{
        Alias, Arguments, BoolOp, ClassDef, CmpOp, Comprehension, Constant, ExceptHandler, Expr, ExprKind, FunctionDef,
        ImportNames, Keyword, Lambda, Module, Number, Operator, Param, Stmt, StmtKind, UnaryOp,
    },
    error::{CompileError, CompileResult},
    options::Mode,
};

/// Maximum nesting depth for statements and expressions.
/// Matches CPython's limit of ~200 for nested parentheses.
#[cfg(not(debug_assertions))]
pub const MAX_NESTING_DEPTH: u16 = 200;
/// Debug builds have much larger stack frames, so the limit is lower.
#[cfg(debug_assertions)]
pub const MAX_NESTING_DEPTH: u16 = 35;

/// Parses `source` into a module for the given mode.
///
/// `Eval` mode expects a single expression and produces a module whose body is
/// that expression statement.
pub fn parse(source: &str, filename: &str, mode: Mode) -> CompileResult<Module> {
    let mut parser = Parser::new(source);
    let body = match mode {
        Mode::Exec | Mode::Single => {
            let parsed = parse_module(source).map_err(|e| parser.syntax_error(filename, &e.to_string(), e.range()))?;
            parser.statements(parsed.into_syntax().body)?
        }
        Mode::Eval => {
            let parsed =
                parse_expression(source).map_err(|e| parser.syntax_error(filename, &e.to_string(), e.range()))?;
            let expr = parser.expression(*parsed.into_syntax().body)?;
            vec![Stmt::expr(expr)]
        }
    };
    tracing::trace!(filename, statements = body.len(), "parsed");
    Ok(Module { body, mode })
}

struct Parser {
    /// Byte offset of every newline in the source.
    line_ends: Vec<usize>,
    /// Remaining nesting depth budget. When it reaches zero, parsing fails with
    /// "too many nested parentheses".
    depth_remaining: u16,
}

impl Parser {
    fn new(source: &str) -> Self {
        let line_ends = source
            .bytes()
            .enumerate()
            .filter_map(|(i, b)| (b == b'\n').then_some(i))
            .collect();
        Self {
            line_ends,
            depth_remaining: MAX_NESTING_DEPTH,
        }
    }

    /// 1-based line of the start of `range`.
    fn line(&self, range: TextRange) -> u32 {
        let offset: usize = range.start().into();
        let line = self.line_ends.partition_point(|&end| end < offset) + 1;
        u32::try_from(line).unwrap_or(u32::MAX)
    }

    fn syntax_error(&self, filename: &str, message: &str, range: TextRange) -> CompileError {
        CompileError::syntax(format!("{filename}: {message}"), self.line(range))
    }

    fn decr_depth_remaining(&mut self, range: TextRange) -> CompileResult<()> {
        if let Some(depth_remaining) = self.depth_remaining.checked_sub(1) {
            self.depth_remaining = depth_remaining;
            Ok(())
        } else {
            Err(CompileError::syntax("too many nested parentheses", self.line(range)))
        }
    }

    fn statements(&mut self, statements: Vec<AstStmt>) -> CompileResult<Vec<Stmt>> {
        statements.into_iter().map(|s| self.statement(s)).collect()
    }

    fn statement(&mut self, statement: AstStmt) -> CompileResult<Stmt> {
        self.decr_depth_remaining(statement.range())?;
        let result = self.statement_impl(statement);
        self.depth_remaining += 1;
        result
    }

    fn statement_impl(&mut self, statement: AstStmt) -> CompileResult<Stmt> {
        let line = self.line(statement.range());
        let kind = match statement {
            AstStmt::FunctionDef(function) => {
                if function.is_async {
                    return Err(CompileError::unhandled("AsyncFunctionDef", line));
                }
                let args = self.parameters(&function.parameters, line)?;
                let decorators = function
                    .decorator_list
                    .into_iter()
                    .map(|d| self.expression(d.expression))
                    .collect::<CompileResult<Vec<_>>>()?;
                let body = self.statements(function.body)?;
                StmtKind::FunctionDef(FunctionDef {
                    name: function.name.id.to_string(),
                    args,
                    body,
                    decorators,
                })
            }
            AstStmt::ClassDef(class) => {
                if !class.decorator_list.is_empty() {
                    return Err(CompileError::unhandled("class decorator", line));
                }
                let bases = match class.arguments {
                    Some(arguments) => {
                        if !arguments.keywords.is_empty() {
                            return Err(CompileError::unhandled("class keyword argument", line));
                        }
                        arguments
                            .args
                            .into_vec()
                            .into_iter()
                            .map(|base| self.expression(base))
                            .collect::<CompileResult<Vec<_>>>()?
                    }
                    None => Vec::new(),
                };
                let body = self.statements(class.body)?;
                StmtKind::ClassDef(ClassDef {
                    name: class.name.id.to_string(),
                    bases,
                    body,
                })
            }
            AstStmt::Return(ast::StmtReturn { value, .. }) => {
                StmtKind::Return(value.map(|v| self.expression(*v)).transpose()?)
            }
            AstStmt::Delete(ast::StmtDelete { targets, .. }) => StmtKind::Delete(self.expressions(targets)?),
            AstStmt::Assign(ast::StmtAssign { targets, value, .. }) => StmtKind::Assign {
                targets: self.expressions(targets)?,
                value: self.expression(*value)?,
            },
            AstStmt::AugAssign(ast::StmtAugAssign { target, op, value, .. }) => StmtKind::AugAssign {
                target: self.expression(*target)?,
                op: convert_op(op).ok_or_else(|| CompileError::unhandled("MatMult", line))?,
                value: self.expression(*value)?,
            },
            AstStmt::For(ast::StmtFor {
                is_async,
                target,
                iter,
                body,
                orelse,
                ..
            }) => {
                if is_async {
                    return Err(CompileError::unhandled("AsyncFor", line));
                }
                StmtKind::For {
                    target: self.expression(*target)?,
                    iter: self.expression(*iter)?,
                    body: self.statements(body)?,
                    orelse: self.statements(orelse)?,
                }
            }
            AstStmt::While(ast::StmtWhile { test, body, orelse, .. }) => StmtKind::While {
                test: self.expression(*test)?,
                body: self.statements(body)?,
                orelse: self.statements(orelse)?,
            },
            AstStmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                ..
            }) => StmtKind::If {
                test: self.expression(*test)?,
                body: self.statements(body)?,
                orelse: self.elif_else_clauses(elif_else_clauses)?,
            },
            AstStmt::Raise(ast::StmtRaise { exc, cause, .. }) => {
                if cause.is_some() {
                    return Err(CompileError::unhandled("raise ... from", line));
                }
                StmtKind::Raise {
                    type_: exc.map(|e| self.expression(*e)).transpose()?,
                    inst: None,
                    tback: None,
                }
            }
            AstStmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                is_star,
                ..
            }) => {
                if is_star {
                    return Err(CompileError::unhandled("TryStar", line));
                }
                return self.try_statement(line, body, handlers, orelse, finalbody);
            }
            AstStmt::Assert(ast::StmtAssert { test, msg, .. }) => StmtKind::Assert {
                test: self.expression(*test)?,
                msg: msg.map(|m| self.expression(*m)).transpose()?,
            },
            AstStmt::Import(ast::StmtImport { names, .. }) => StmtKind::Import(names.iter().map(convert_alias).collect()),
            AstStmt::ImportFrom(ast::StmtImportFrom {
                module, names, level, ..
            }) => {
                if level != 0 {
                    return Err(CompileError::unhandled("relative import", line));
                }
                let Some(module) = module else {
                    return Err(CompileError::syntax("import from without module", line));
                };
                let names = if names.len() == 1 && names[0].name.as_str() == "*" {
                    ImportNames::Star
                } else {
                    ImportNames::Names(names.iter().map(convert_alias).collect())
                };
                StmtKind::ImportFrom {
                    module: module.id.to_string(),
                    names,
                }
            }
            AstStmt::Global(ast::StmtGlobal { names, .. }) => {
                StmtKind::Global(names.iter().map(|name| name.id.to_string()).collect())
            }
            AstStmt::Expr(ast::StmtExpr { value, .. }) => match *value {
                AstExpr::Call(call) if is_exec_call(&call) => self.exec_statement(call)?,
                value => StmtKind::Expr(self.expression(value)?),
            },
            AstStmt::Pass(_) => StmtKind::Pass,
            AstStmt::Break(_) => StmtKind::Break,
            AstStmt::Continue(_) => StmtKind::Continue,
            other => return Err(CompileError::unhandled(stmt_name(&other), line)),
        };
        Ok(Stmt::new(line, kind))
    }

    /// Folds `elif`/`else` clauses into nested `If` statements.
    fn elif_else_clauses(&mut self, clauses: Vec<ElifElseClause>) -> CompileResult<Vec<Stmt>> {
        let mut tail: Vec<Stmt> = Vec::new();
        for clause in clauses.into_iter().rev() {
            match clause.test {
                Some(test) => {
                    let line = self.line(clause.range);
                    let test = self.expression(test)?;
                    let body = self.statements(clause.body)?;
                    tail = vec![Stmt::new(line, StmtKind::If { test, body, orelse: tail })];
                }
                None => tail = self.statements(clause.body)?,
            }
        }
        Ok(tail)
    }

    /// `try` with both handlers and `finally` becomes a `TryFinally` whose body
    /// is the `TryExcept`.
    fn try_statement(
        &mut self,
        line: u32,
        body: Vec<AstStmt>,
        handlers: Vec<ast::ExceptHandler>,
        orelse: Vec<AstStmt>,
        finalbody: Vec<AstStmt>,
    ) -> CompileResult<Stmt> {
        let mut body = self.statements(body)?;
        if !handlers.is_empty() {
            let handlers = handlers
                .into_iter()
                .map(|h| self.except_handler(h))
                .collect::<CompileResult<Vec<_>>>()?;
            let orelse = self.statements(orelse)?;
            body = vec![Stmt::new(line, StmtKind::TryExcept { body, handlers, orelse })];
        }
        if finalbody.is_empty() {
            // a bare `try` always has handlers or a finally clause
            return Ok(body.pop().unwrap_or_else(|| Stmt::new(line, StmtKind::Pass)));
        }
        let finalbody = self.statements(finalbody)?;
        Ok(Stmt::new(line, StmtKind::TryFinally { body, finalbody }))
    }

    fn except_handler(&mut self, handler: ast::ExceptHandler) -> CompileResult<ExceptHandler> {
        let ast::ExceptHandler::ExceptHandler(h) = handler;
        let line = self.line(h.range);
        let type_ = h.type_.map(|t| self.expression(*t)).transpose()?;
        let name = h.name.map(|n| Expr::name(line, n.id.as_str()));
        let body = self.statements(h.body)?;
        Ok(ExceptHandler {
            line,
            type_,
            name,
            body,
        })
    }

    /// `exec(code[, globals[, locals]])` in statement position.
    fn exec_statement(&mut self, call: ast::ExprCall) -> CompileResult<StmtKind> {
        let mut args = call.arguments.args.into_vec().into_iter();
        let body = match args.next() {
            Some(body) => self.expression(body)?,
            None => return Err(CompileError::syntax("exec requires code", self.line(call.range))),
        };
        let globals = args.next().map(|g| self.expression(g)).transpose()?;
        let locals = args.next().map(|l| self.expression(l)).transpose()?;
        Ok(StmtKind::Exec { body, globals, locals })
    }

    fn parameters(&mut self, parameters: &Parameters, line: u32) -> CompileResult<Arguments> {
        if !parameters.kwonlyargs.is_empty() {
            return Err(CompileError::unhandled("keyword-only parameter", line));
        }
        let mut arguments = Arguments::default();
        for param in parameters.posonlyargs.iter().chain(&parameters.args) {
            arguments.args.push(Param::Name(param.parameter.name.id.to_string()));
            if let Some(default) = &param.default {
                arguments.defaults.push(self.expression((**default).clone())?);
            } else if !arguments.defaults.is_empty() {
                return Err(CompileError::syntax(
                    "non-default argument follows default argument",
                    line,
                ));
            }
        }
        arguments.vararg = parameters.vararg.as_ref().map(|p| p.name.id.to_string());
        arguments.kwarg = parameters.kwarg.as_ref().map(|p| p.name.id.to_string());
        Ok(arguments)
    }

    fn expressions(&mut self, expressions: Vec<AstExpr>) -> CompileResult<Vec<Expr>> {
        expressions.into_iter().map(|e| self.expression(e)).collect()
    }

    fn boxed(&mut self, expression: AstExpr) -> CompileResult<Box<Expr>> {
        self.expression(expression).map(Box::new)
    }

    fn expression(&mut self, expression: AstExpr) -> CompileResult<Expr> {
        self.decr_depth_remaining(expression.range())?;
        let result = self.expression_impl(expression);
        self.depth_remaining += 1;
        result
    }

    fn expression_impl(&mut self, expression: AstExpr) -> CompileResult<Expr> {
        let line = self.line(expression.range());
        let kind = match expression {
            AstExpr::BoolOp(ast::ExprBoolOp { op, values, .. }) => ExprKind::BoolOp {
                op: match op {
                    AstBoolOp::And => BoolOp::And,
                    AstBoolOp::Or => BoolOp::Or,
                },
                values: self.expressions(values)?,
            },
            AstExpr::BinOp(ast::ExprBinOp { left, op, right, .. }) => ExprKind::BinOp {
                left: self.boxed(*left)?,
                op: convert_op(op).ok_or_else(|| CompileError::unhandled("MatMult", line))?,
                right: self.boxed(*right)?,
            },
            AstExpr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => ExprKind::UnaryOp {
                op: match op {
                    AstUnaryOp::Invert => UnaryOp::Invert,
                    AstUnaryOp::Not => UnaryOp::Not,
                    AstUnaryOp::UAdd => UnaryOp::UAdd,
                    AstUnaryOp::USub => UnaryOp::USub,
                },
                operand: self.boxed(*operand)?,
            },
            AstExpr::Lambda(ast::ExprLambda { parameters, body, .. }) => {
                let args = match parameters {
                    Some(parameters) => self.parameters(&parameters, line)?,
                    None => Arguments::default(),
                };
                ExprKind::Lambda(Lambda {
                    args,
                    body: self.boxed(*body)?,
                })
            }
            AstExpr::If(ast::ExprIf { test, body, orelse, .. }) => ExprKind::IfExp {
                test: self.boxed(*test)?,
                body: self.boxed(*body)?,
                orelse: self.boxed(*orelse)?,
            },
            AstExpr::Dict(ast::ExprDict { items, .. }) => {
                let mut keys = Vec::with_capacity(items.len());
                let mut values = Vec::with_capacity(items.len());
                for ast::DictItem { key, value } in items {
                    let Some(key) = key else {
                        return Err(CompileError::unhandled("dict unpacking", line));
                    };
                    keys.push(self.expression(key)?);
                    values.push(self.expression(value)?);
                }
                ExprKind::Dict { keys, values }
            }
            AstExpr::ListComp(ast::ExprListComp { elt, generators, .. }) => {
                let elt = self.boxed(*elt)?;
                let generators = generators
                    .into_iter()
                    .map(|comp| {
                        if comp.is_async {
                            return Err(CompileError::unhandled("async comprehension", line));
                        }
                        Ok(Comprehension {
                            target: self.expression(comp.target)?,
                            iter: self.expression(comp.iter)?,
                            ifs: self.expressions(comp.ifs)?,
                        })
                    })
                    .collect::<CompileResult<Vec<_>>>()?;
                ExprKind::ListComp { elt, generators }
            }
            AstExpr::Compare(ast::ExprCompare {
                left, ops, comparators, ..
            }) => ExprKind::Compare {
                left: self.boxed(*left)?,
                ops: ops.iter().map(|op| convert_cmp_op(*op)).collect(),
                comparators: self.expressions(comparators.into_vec())?,
            },
            AstExpr::Call(ast::ExprCall { func, arguments, .. }) => {
                let func = self.boxed(*func)?;
                let ast::Arguments { args, keywords, .. } = arguments;
                let mut positional = Vec::new();
                let mut starargs = None;
                for arg in args.into_vec() {
                    match arg {
                        AstExpr::Starred(ast::ExprStarred { value, .. }) => {
                            if starargs.is_some() {
                                return Err(CompileError::unhandled("multiple *args unpacking", line));
                            }
                            starargs = Some(self.boxed(*value)?);
                        }
                        _ if starargs.is_some() => {
                            return Err(CompileError::unhandled("positional argument after *args", line));
                        }
                        other => positional.push(self.expression(other)?),
                    }
                }
                let mut named = Vec::new();
                let mut kwargs = None;
                for keyword in keywords.into_vec() {
                    match keyword.arg {
                        Some(arg) => named.push(Keyword {
                            arg: arg.id.to_string(),
                            value: self.expression(keyword.value)?,
                        }),
                        None if kwargs.is_some() => {
                            return Err(CompileError::unhandled("multiple **kwargs unpacking", line));
                        }
                        None => kwargs = Some(self.boxed(keyword.value)?),
                    }
                }
                ExprKind::Call {
                    func,
                    args: positional,
                    keywords: named,
                    starargs,
                    kwargs,
                }
            }
            AstExpr::StringLiteral(ast::ExprStringLiteral { value, .. }) => ExprKind::Str(value.to_string()),
            AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, .. }) => ExprKind::Num(match value {
                AstNumber::Int(i) => match i.as_i64() {
                    Some(value) => i32::try_from(value).map_or_else(|_| Number::Long(value.to_string()), Number::Int),
                    None => {
                        let big = parse_int_literal(&i.to_string())
                            .ok_or_else(|| CompileError::syntax(format!("invalid integer literal: {i}"), line))?;
                        Number::Long(big.to_string())
                    }
                },
                AstNumber::Float(f) => Number::Float(f),
                AstNumber::Complex { imag, .. } => Number::Imaginary(imag),
            }),
            AstExpr::BooleanLiteral(ast::ExprBooleanLiteral { value, .. }) => {
                ExprKind::Constant(if value { Constant::True } else { Constant::False })
            }
            AstExpr::NoneLiteral(_) => ExprKind::Constant(Constant::None),
            AstExpr::EllipsisLiteral(_) => ExprKind::Constant(Constant::Ellipsis),
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => ExprKind::Attribute {
                value: self.boxed(*value)?,
                attr: attr.id.to_string(),
            },
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => ExprKind::Subscript {
                value: self.boxed(*value)?,
                slice: self.boxed(*slice)?,
            },
            AstExpr::Name(ast::ExprName { id, .. }) => ExprKind::Name(id.to_string()),
            AstExpr::List(ast::ExprList { elts, .. }) => ExprKind::List(self.expressions(elts)?),
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) => ExprKind::Tuple(self.expressions(elts)?),
            AstExpr::Slice(ast::ExprSlice { lower, upper, step, .. }) => ExprKind::Slice {
                lower: lower.map(|e| self.boxed(*e)).transpose()?,
                upper: upper.map(|e| self.boxed(*e)).transpose()?,
                step: step.map(|e| self.boxed(*e)).transpose()?,
            },
            other => return Err(CompileError::unhandled(expr_name(&other), line)),
        };
        Ok(Expr::new(line, kind))
    }
}

fn is_exec_call(call: &ast::ExprCall) -> bool {
    matches!(&*call.func, AstExpr::Name(name) if name.id.as_str() == "exec")
        && call.arguments.keywords.is_empty()
        && (1..=3).contains(&call.arguments.args.len())
        && !call.arguments.args.iter().any(|a| matches!(a, AstExpr::Starred(_)))
}

fn convert_alias(alias: &ast::Alias) -> Alias {
    Alias {
        name: alias.name.id.to_string(),
        asname: alias.asname.as_ref().map(|a| a.id.to_string()),
    }
}

fn convert_op(op: AstOperator) -> Option<Operator> {
    Some(match op {
        AstOperator::Add => Operator::Add,
        AstOperator::Sub => Operator::Sub,
        AstOperator::Mult => Operator::Mult,
        AstOperator::MatMult => return None,
        AstOperator::Div => Operator::Div,
        AstOperator::Mod => Operator::Mod,
        AstOperator::Pow => Operator::Pow,
        AstOperator::LShift => Operator::LShift,
        AstOperator::RShift => Operator::RShift,
        AstOperator::BitOr => Operator::BitOr,
        AstOperator::BitXor => Operator::BitXor,
        AstOperator::BitAnd => Operator::BitAnd,
        AstOperator::FloorDiv => Operator::FloorDiv,
    })
}

fn convert_cmp_op(op: AstCmpOp) -> CmpOp {
    match op {
        AstCmpOp::Eq => CmpOp::Eq,
        AstCmpOp::NotEq => CmpOp::NotEq,
        AstCmpOp::Lt => CmpOp::Lt,
        AstCmpOp::LtE => CmpOp::LtE,
        AstCmpOp::Gt => CmpOp::Gt,
        AstCmpOp::GtE => CmpOp::GtE,
        AstCmpOp::Is => CmpOp::Is,
        AstCmpOp::IsNot => CmpOp::IsNot,
        AstCmpOp::In => CmpOp::In,
        AstCmpOp::NotIn => CmpOp::NotIn,
    }
}

fn stmt_name(statement: &AstStmt) -> &'static str {
    match statement {
        AstStmt::AnnAssign(_) => "AnnAssign",
        AstStmt::TypeAlias(_) => "TypeAlias",
        AstStmt::With(_) => "With",
        AstStmt::Match(_) => "Match",
        AstStmt::Nonlocal(_) => "Nonlocal",
        AstStmt::IpyEscapeCommand(_) => "IpyEscapeCommand",
        _ => "statement",
    }
}

fn expr_name(expression: &AstExpr) -> &'static str {
    match expression {
        AstExpr::Named(_) => "NamedExpr",
        AstExpr::Set(_) => "Set",
        AstExpr::SetComp(_) => "SetComp",
        AstExpr::DictComp(_) => "DictComp",
        AstExpr::Generator(_) => "GeneratorExp",
        AstExpr::Await(_) => "Await",
        AstExpr::Yield(_) => "Yield",
        AstExpr::YieldFrom(_) => "YieldFrom",
        AstExpr::FString(_) => "JoinedStr",
        AstExpr::TString(_) => "TemplateStr",
        AstExpr::BytesLiteral(_) => "Bytes",
        AstExpr::Starred(_) => "Starred",
        AstExpr::IpyEscapeCommand(_) => "IpyEscapeCommand",
        _ => "expression",
    }
}

/// Parses an integer literal string into a `BigInt`, handling radix prefixes and underscores.
fn parse_int_literal(s: &str) -> Option<BigInt> {
    let cleaned: String = s.chars().filter(|c| *c != '_').collect();
    let cleaned = cleaned.as_str();
    if cleaned.len() >= 2 {
        let (prefix, digits) = cleaned.split_at(2);
        match prefix.to_ascii_lowercase().as_str() {
            "0x" => return BigInt::parse_bytes(digits.as_bytes(), 16),
            "0o" => return BigInt::parse_bytes(digits.as_bytes(), 8),
            "0b" => return BigInt::parse_bytes(digits.as_bytes(), 2),
            _ => {}
        }
    }
    cleaned.parse::<BigInt>().ok()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::ErrorKind;

    fn parse_exec(source: &str) -> CompileResult<Module> {
        parse(source, "<test>", Mode::Exec)
    }

    #[test]
    fn lines_are_one_based() {
        let module = parse_exec("x = 1\n\ny = 2\n").unwrap();
        let lines: Vec<u32> = module.body.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 3]);
    }

    #[test]
    fn def_with_defaults() {
        let module = parse_exec("def f(a, b=1):\n    return a + b\n").unwrap();
        let StmtKind::FunctionDef(def) = &module.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(def.args.args.len(), 2);
        assert_eq!(def.args.defaults, vec![Expr::int(1, 1)]);
        assert_eq!(def.body[0].line, 2);
    }

    #[test]
    fn big_ints_become_longs() {
        let module = parse_exec("x = 3000000000\ny = 0x1_0000_0000_0000_0000\n").unwrap();
        let values: Vec<_> = module
            .body
            .iter()
            .map(|s| match &s.kind {
                StmtKind::Assign { value, .. } => value.kind.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            values,
            vec![
                ExprKind::Num(Number::Long("3000000000".to_owned())),
                ExprKind::Num(Number::Long("18446744073709551616".to_owned())),
            ]
        );
    }

    #[test]
    fn try_except_finally_nests() {
        let module = parse_exec("try:\n    a()\nexcept E:\n    b()\nfinally:\n    c()\n").unwrap();
        let StmtKind::TryFinally { body, finalbody } = &module.body[0].kind else {
            panic!("expected try/finally");
        };
        assert!(matches!(body[0].kind, StmtKind::TryExcept { .. }));
        assert_eq!(finalbody.len(), 1);
    }

    #[test]
    fn exec_statement() {
        let module = parse_exec("exec('x = 1', g)\n").unwrap();
        assert!(matches!(
            module.body[0].kind,
            StmtKind::Exec {
                globals: Some(_),
                locals: None,
                ..
            }
        ));
    }

    #[test]
    fn unsupported_constructs() {
        let err = parse_exec("x = 1\nwith f() as g:\n    pass\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unhandled);
        assert_eq!(err.line, 2);
        assert_eq!(err.message, "unhandled node: With");
        let err = parse_exec("raise E from F\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unhandled);
        assert_eq!(parse_exec("s = {1, 2}\n").unwrap_err().message, "unhandled node: Set");
    }

    #[test]
    fn eval_mode_wraps_expression() {
        let module = parse("a + 1", "<eval>", Mode::Eval).unwrap();
        assert_eq!(module.mode, Mode::Eval);
        assert!(matches!(module.body[0].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn nesting_limit() {
        let source = format!("x = {}1{}\n", "[".repeat(300), "]".repeat(300));
        let err = parse_exec(&source).unwrap_err();
        assert_eq!(err.message, "too many nested parentheses");
    }

    #[test]
    fn syntax_errors_carry_line() {
        let err = parse_exec("x = 1\ny = (\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.line >= 2);
    }
}
