//! The runtime entry points generated code calls.
//!
//! Every field read and method call the code generator emits into the
//! Python runtime goes through a [`Helper`]. Each helper resolves to a fixed
//! owner, name, descriptor and invocation kind, so the compiler never builds
//! runtime descriptors by hand.

use crate::{
    ast::{CmpOp, Operator, UnaryOp},
    classfile::{Code, ConstantPool},
};

macro_rules! py_object {
    () => {
        "Lorg/python/core/PyObject;"
    };
}
macro_rules! py_objects {
    () => {
        "[Lorg/python/core/PyObject;"
    };
}
macro_rules! string {
    () => {
        "Ljava/lang/String;"
    };
}
macro_rules! strings {
    () => {
        "[Ljava/lang/String;"
    };
}
macro_rules! py_frame {
    () => {
        "Lorg/python/core/PyFrame;"
    };
}
macro_rules! py_code {
    () => {
        "Lorg/python/core/PyCode;"
    };
}
macro_rules! py_exception {
    () => {
        "Lorg/python/core/PyException;"
    };
}
macro_rules! throwable {
    () => {
        "Ljava/lang/Throwable;"
    };
}

pub const PY: &str = "org/python/core/Py";
pub const PY_OBJECT: &str = "org/python/core/PyObject";
pub const PY_FRAME: &str = "org/python/core/PyFrame";
pub const PY_CODE: &str = "org/python/core/PyCode";
pub const PY_FUNCTION: &str = "org/python/core/PyFunction";
pub const PY_FUNCTION_TABLE: &str = "org/python/core/PyFunctionTable";
pub const PY_RUNNABLE: &str = "org/python/core/PyRunnable";
pub const PY_EXCEPTION: &str = "org/python/core/PyException";
pub const PY_TUPLE: &str = "org/python/core/PyTuple";
pub const PY_LIST: &str = "org/python/core/PyList";
pub const PY_DICTIONARY: &str = "org/python/core/PyDictionary";
pub const PY_SLICE: &str = "org/python/core/PySlice";
pub const IMP: &str = "org/python/core/imp";
pub const JAVA_STRING: &str = "java/lang/String";
pub const JAVA_OBJECT: &str = "java/lang/Object";
pub const THROWABLE: &str = "java/lang/Throwable";

/// Descriptor of every compiled code unit: `PyObject f$N(PyFrame)`.
pub const UNIT_DESCRIPTOR: &str = concat!("(", py_frame!(), ")", py_object!());
/// Descriptor of `PyRunnable.getMain()`.
pub const GET_MAIN_DESCRIPTOR: &str = concat!("()", py_code!());
/// Descriptor of `PyFunctionTable.call_function(int, PyFrame)`.
pub const CALL_FUNCTION_DESCRIPTOR: &str = concat!("(I", py_frame!(), ")", py_object!());
pub const MAIN_DESCRIPTOR: &str = concat!("(", strings!(), ")V");
pub const PY_CODE_DESCRIPTOR: &str = py_code!();

/// How a helper is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperKind {
    Static,
    Virtual,
    /// A constructor, after `new` and `dup`.
    Special,
    StaticField,
    Field,
}

/// Resolved form of a [`Helper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperSpec {
    pub owner: &'static str,
    pub name: &'static str,
    pub descriptor: &'static str,
    pub kind: HelperKind,
}

impl HelperSpec {
    const fn new(owner: &'static str, name: &'static str, descriptor: &'static str, kind: HelperKind) -> Self {
        Self {
            owner,
            name,
            descriptor,
            kind,
        }
    }
}

/// Arity of a plain call `f(a, b, ...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    /// Up to four positional arguments passed directly.
    Positional(u8),
    /// Arguments in a `PyObject[]`.
    Array,
    /// Values in a `PyObject[]` with the keyword names in a trailing `String[]`.
    Keywords,
    /// Also passes the `*args` and `**kwargs` objects, either possibly null.
    Extra,
}

/// Arity of a method call `obj.name(...)` made through `PyObject.invoke`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeShape {
    /// Up to two positional arguments passed directly.
    Positional(u8),
    Array,
}

/// A runtime field or method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Helper {
    // === Frame ===
    FrameSetLine,
    FrameGlobals,
    GetGlobal,
    GetName,
    GetLocal,
    GetDeref,
    SetGlobal,
    SetName,
    SetLocal,
    SetDeref,
    DelGlobal,
    DelName,
    DelLocal,
    GetClosure,
    ToCell,
    GetLocals,

    // === Py statics ===
    None,
    True,
    False,
    Ellipsis,
    EmptyObjects,
    AssertionError,
    /// `Py.makeException` with up to 3 arguments.
    MakeException(u8),
    SetException,
    MatchException,
    AddTraceback,
    UnpackSequence,
    Exec,
    PrintResult,
    MakeClass,
    MakeClassClosure,
    NewCode,
    NewInteger,
    NewFloat,
    NewImaginary,
    NewString,
    NewLong,
    RunMain,

    // === Imports ===
    ImportOne,
    ImportOneAs,
    ImportFrom,
    ImportAll,

    // === PyObject protocol ===
    Nonzero,
    Call(CallShape),
    Invoke(InvokeShape),
    GetAttr,
    SetAttr,
    DelAttr,
    GetItem,
    SetItem,
    DelItem,
    GetSlice,
    SetSlice,
    DelSlice,
    FindItem,
    Iter,
    IterNext,
    Binary(Operator),
    /// `_truediv`, used for `/` under true division.
    TrueDivide,
    InPlace(Operator),
    InPlaceTrueDivide,
    Unary(UnaryOp),
    Compare(CmpOp),
    ExceptionValue,

    // === Constructors ===
    NewTuple,
    NewList,
    NewEmptyList,
    NewDictionary,
    NewSlice,
    NewFunction,
    NewFunctionClosure,
    NewLambda,
    NewLambdaClosure,
    FunctionTableInit,
}

const BINARY: &str = concat!("(", py_object!(), ")", py_object!());
const UNARY: &str = concat!("()", py_object!());
const BY_NAME: &str = concat!("(", string!(), ")", py_object!());
const BY_INDEX: &str = concat!("(I)", py_object!());
const SET_BY_NAME: &str = concat!("(", string!(), py_object!(), ")V");
const SET_BY_INDEX: &str = concat!("(I", py_object!(), ")V");
const FROM_ARRAY: &str = concat!("(", py_objects!(), ")V");

impl Helper {
    /// Owner, name, descriptor and kind of this helper.
    ///
    /// Panics for call shapes with more direct arguments than the runtime
    /// provides overloads for.
    #[must_use]
    pub fn spec(self) -> HelperSpec {
        use HelperKind::{Field, Special, Static, StaticField, Virtual};

        match self {
            Self::FrameSetLine => HelperSpec::new(PY_FRAME, "setline", "(I)V", Virtual),
            Self::FrameGlobals => HelperSpec::new(PY_FRAME, "f_globals", py_object!(), Field),
            Self::GetGlobal => HelperSpec::new(PY_FRAME, "getglobal", BY_NAME, Virtual),
            Self::GetName => HelperSpec::new(PY_FRAME, "getname", BY_NAME, Virtual),
            Self::GetLocal => HelperSpec::new(PY_FRAME, "getlocal", BY_INDEX, Virtual),
            Self::GetDeref => HelperSpec::new(PY_FRAME, "getderef", BY_INDEX, Virtual),
            Self::SetGlobal => HelperSpec::new(PY_FRAME, "setglobal", SET_BY_NAME, Virtual),
            Self::SetName => HelperSpec::new(PY_FRAME, "setlocal", SET_BY_NAME, Virtual),
            Self::SetLocal => HelperSpec::new(PY_FRAME, "setlocal", SET_BY_INDEX, Virtual),
            Self::SetDeref => HelperSpec::new(PY_FRAME, "setderef", SET_BY_INDEX, Virtual),
            Self::DelGlobal => HelperSpec::new(PY_FRAME, "delglobal", concat!("(", string!(), ")V"), Virtual),
            Self::DelName => HelperSpec::new(PY_FRAME, "dellocal", concat!("(", string!(), ")V"), Virtual),
            Self::DelLocal => HelperSpec::new(PY_FRAME, "dellocal", "(I)V", Virtual),
            Self::GetClosure => HelperSpec::new(PY_FRAME, "getclosure", BY_INDEX, Virtual),
            Self::ToCell => HelperSpec::new(PY_FRAME, "to_cell", "(II)V", Virtual),
            Self::GetLocals => HelperSpec::new(PY_FRAME, "getf_locals", UNARY, Virtual),

            Self::None => HelperSpec::new(PY, "None", py_object!(), StaticField),
            Self::True => HelperSpec::new(PY, "True", "Lorg/python/core/PyBoolean;", StaticField),
            Self::False => HelperSpec::new(PY, "False", "Lorg/python/core/PyBoolean;", StaticField),
            Self::Ellipsis => HelperSpec::new(PY, "Ellipsis", py_object!(), StaticField),
            Self::EmptyObjects => HelperSpec::new(PY, "EmptyObjects", py_objects!(), StaticField),
            Self::AssertionError => HelperSpec::new(PY, "AssertionError", py_object!(), StaticField),
            Self::MakeException(0) => {
                HelperSpec::new(PY, "makeException", concat!("()", py_exception!()), Static)
            }
            Self::MakeException(1) => HelperSpec::new(
                PY,
                "makeException",
                concat!("(", py_object!(), ")", py_exception!()),
                Static,
            ),
            Self::MakeException(2) => HelperSpec::new(
                PY,
                "makeException",
                concat!("(", py_object!(), py_object!(), ")", py_exception!()),
                Static,
            ),
            Self::MakeException(3) => HelperSpec::new(
                PY,
                "makeException",
                concat!("(", py_object!(), py_object!(), py_object!(), ")", py_exception!()),
                Static,
            ),
            Self::MakeException(n) => panic!("no makeException overload for {n} arguments"),
            Self::SetException => HelperSpec::new(
                PY,
                "setException",
                concat!("(", throwable!(), py_frame!(), ")", py_exception!()),
                Static,
            ),
            Self::MatchException => HelperSpec::new(
                PY,
                "matchException",
                concat!("(", py_exception!(), py_object!(), ")Z"),
                Static,
            ),
            Self::AddTraceback => {
                HelperSpec::new(PY, "addTraceback", concat!("(", throwable!(), py_frame!(), ")V"), Static)
            }
            Self::UnpackSequence => {
                HelperSpec::new(PY, "unpackSequence", concat!("(", py_object!(), "I)", py_objects!()), Static)
            }
            Self::Exec => HelperSpec::new(
                PY,
                "exec",
                concat!("(", py_object!(), py_object!(), py_object!(), ")V"),
                Static,
            ),
            Self::PrintResult => HelperSpec::new(PY, "printResult", concat!("(", py_object!(), ")V"), Static),
            Self::MakeClass => HelperSpec::new(
                PY,
                "makeClass",
                concat!("(", string!(), py_objects!(), py_code!(), py_object!(), ")", py_object!()),
                Static,
            ),
            Self::MakeClassClosure => HelperSpec::new(
                PY,
                "makeClass",
                concat!(
                    "(",
                    string!(),
                    py_objects!(),
                    py_code!(),
                    py_object!(),
                    py_objects!(),
                    ")",
                    py_object!()
                ),
                Static,
            ),
            Self::NewCode => HelperSpec::new(
                PY,
                "newCode",
                concat!(
                    "(I",
                    strings!(),
                    string!(),
                    string!(),
                    "IZZLorg/python/core/PyFunctionTable;I",
                    strings!(),
                    strings!(),
                    "II)",
                    py_code!()
                ),
                Static,
            ),
            Self::NewInteger => HelperSpec::new(PY, "newInteger", "(I)Lorg/python/core/PyInteger;", Static),
            Self::NewFloat => HelperSpec::new(PY, "newFloat", "(D)Lorg/python/core/PyFloat;", Static),
            Self::NewImaginary => HelperSpec::new(PY, "newImaginary", "(D)Lorg/python/core/PyComplex;", Static),
            Self::NewString => HelperSpec::new(
                PY,
                "newString",
                concat!("(", string!(), ")Lorg/python/core/PyString;"),
                Static,
            ),
            Self::NewLong => HelperSpec::new(
                PY,
                "newLong",
                concat!("(", string!(), ")Lorg/python/core/PyLong;"),
                Static,
            ),
            Self::RunMain => HelperSpec::new(
                PY,
                "runMain",
                concat!("(Lorg/python/core/PyRunnable;", strings!(), ")V"),
                Static,
            ),

            Self::ImportOne => HelperSpec::new(
                IMP,
                "importOne",
                concat!("(", string!(), py_frame!(), ")", py_object!()),
                Static,
            ),
            Self::ImportOneAs => HelperSpec::new(
                IMP,
                "importOneAs",
                concat!("(", string!(), py_frame!(), ")", py_object!()),
                Static,
            ),
            Self::ImportFrom => HelperSpec::new(
                IMP,
                "importFrom",
                concat!("(", string!(), strings!(), py_frame!(), ")", py_objects!()),
                Static,
            ),
            Self::ImportAll => HelperSpec::new(IMP, "importAll", concat!("(", string!(), py_frame!(), ")V"), Static),

            Self::Nonzero => HelperSpec::new(PY_OBJECT, "__nonzero__", "()Z", Virtual),
            Self::Call(shape) => call_spec(shape),
            Self::Invoke(shape) => invoke_spec(shape),
            Self::GetAttr => HelperSpec::new(PY_OBJECT, "__getattr__", BY_NAME, Virtual),
            Self::SetAttr => HelperSpec::new(PY_OBJECT, "__setattr__", SET_BY_NAME, Virtual),
            Self::DelAttr => HelperSpec::new(PY_OBJECT, "__delattr__", concat!("(", string!(), ")V"), Virtual),
            Self::GetItem => HelperSpec::new(PY_OBJECT, "__getitem__", BINARY, Virtual),
            Self::SetItem => {
                HelperSpec::new(PY_OBJECT, "__setitem__", concat!("(", py_object!(), py_object!(), ")V"), Virtual)
            }
            Self::DelItem => HelperSpec::new(PY_OBJECT, "__delitem__", concat!("(", py_object!(), ")V"), Virtual),
            Self::GetSlice => HelperSpec::new(
                PY_OBJECT,
                "__getslice__",
                concat!("(", py_object!(), py_object!(), py_object!(), ")", py_object!()),
                Virtual,
            ),
            Self::SetSlice => HelperSpec::new(
                PY_OBJECT,
                "__setslice__",
                concat!("(", py_object!(), py_object!(), py_object!(), py_object!(), ")V"),
                Virtual,
            ),
            Self::DelSlice => HelperSpec::new(
                PY_OBJECT,
                "__delslice__",
                concat!("(", py_object!(), py_object!(), py_object!(), ")V"),
                Virtual,
            ),
            Self::FindItem => HelperSpec::new(PY_OBJECT, "__finditem__", BY_INDEX, Virtual),
            Self::Iter => HelperSpec::new(PY_OBJECT, "__iter__", UNARY, Virtual),
            Self::IterNext => HelperSpec::new(PY_OBJECT, "__iternext__", UNARY, Virtual),
            Self::Binary(op) => HelperSpec::new(PY_OBJECT, binary_name(op), BINARY, Virtual),
            Self::TrueDivide => HelperSpec::new(PY_OBJECT, "_truediv", BINARY, Virtual),
            Self::InPlace(op) => HelperSpec::new(PY_OBJECT, in_place_name(op), BINARY, Virtual),
            Self::InPlaceTrueDivide => HelperSpec::new(PY_OBJECT, "__itruediv__", BINARY, Virtual),
            Self::Unary(op) => HelperSpec::new(PY_OBJECT, unary_name(op), UNARY, Virtual),
            Self::Compare(op) => HelperSpec::new(PY_OBJECT, compare_name(op), BINARY, Virtual),
            Self::ExceptionValue => HelperSpec::new(PY_EXCEPTION, "value", py_object!(), Field),

            Self::NewTuple => HelperSpec::new(PY_TUPLE, "<init>", FROM_ARRAY, Special),
            Self::NewList => HelperSpec::new(PY_LIST, "<init>", FROM_ARRAY, Special),
            Self::NewEmptyList => HelperSpec::new(PY_LIST, "<init>", "()V", Special),
            Self::NewDictionary => HelperSpec::new(PY_DICTIONARY, "<init>", FROM_ARRAY, Special),
            Self::NewSlice => HelperSpec::new(
                PY_SLICE,
                "<init>",
                concat!("(", py_object!(), py_object!(), py_object!(), ")V"),
                Special,
            ),
            Self::NewFunction => HelperSpec::new(
                PY_FUNCTION,
                "<init>",
                concat!("(", py_object!(), py_objects!(), py_code!(), py_object!(), ")V"),
                Special,
            ),
            Self::NewFunctionClosure => HelperSpec::new(
                PY_FUNCTION,
                "<init>",
                concat!(
                    "(",
                    py_object!(),
                    py_objects!(),
                    py_code!(),
                    py_object!(),
                    py_objects!(),
                    ")V"
                ),
                Special,
            ),
            Self::NewLambda => HelperSpec::new(
                PY_FUNCTION,
                "<init>",
                concat!("(", py_object!(), py_objects!(), py_code!(), ")V"),
                Special,
            ),
            Self::NewLambdaClosure => HelperSpec::new(
                PY_FUNCTION,
                "<init>",
                concat!("(", py_object!(), py_objects!(), py_code!(), py_objects!(), ")V"),
                Special,
            ),
            Self::FunctionTableInit => HelperSpec::new(PY_FUNCTION_TABLE, "<init>", "()V", Special),
        }
    }

    /// The class a constructor helper instantiates.
    #[must_use]
    pub fn constructed_class(self) -> Option<&'static str> {
        let spec = self.spec();
        (spec.kind == HelperKind::Special && spec.name == "<init>").then_some(spec.owner)
    }
}

fn call_spec(shape: CallShape) -> HelperSpec {
    let descriptor = match shape {
        CallShape::Positional(0) => UNARY,
        CallShape::Positional(1) => BINARY,
        CallShape::Positional(2) => concat!("(", py_object!(), py_object!(), ")", py_object!()),
        CallShape::Positional(3) => concat!("(", py_object!(), py_object!(), py_object!(), ")", py_object!()),
        CallShape::Positional(4) => concat!(
            "(",
            py_object!(),
            py_object!(),
            py_object!(),
            py_object!(),
            ")",
            py_object!()
        ),
        CallShape::Positional(n) => panic!("no __call__ overload for {n} arguments"),
        CallShape::Array => concat!("(", py_objects!(), ")", py_object!()),
        CallShape::Keywords => concat!("(", py_objects!(), strings!(), ")", py_object!()),
        CallShape::Extra => {
            return HelperSpec::new(
                PY_OBJECT,
                "_callextra",
                concat!("(", py_objects!(), strings!(), py_object!(), py_object!(), ")", py_object!()),
                HelperKind::Virtual,
            );
        }
    };
    HelperSpec::new(PY_OBJECT, "__call__", descriptor, HelperKind::Virtual)
}

fn invoke_spec(shape: InvokeShape) -> HelperSpec {
    let descriptor = match shape {
        InvokeShape::Positional(0) => BY_NAME,
        InvokeShape::Positional(1) => concat!("(", string!(), py_object!(), ")", py_object!()),
        InvokeShape::Positional(2) => concat!("(", string!(), py_object!(), py_object!(), ")", py_object!()),
        InvokeShape::Positional(n) => panic!("no invoke overload for {n} arguments"),
        InvokeShape::Array => concat!("(", string!(), py_objects!(), ")", py_object!()),
    };
    HelperSpec::new(PY_OBJECT, "invoke", descriptor, HelperKind::Virtual)
}

fn binary_name(op: Operator) -> &'static str {
    match op {
        Operator::Add => "_add",
        Operator::Sub => "_sub",
        Operator::Mult => "_mul",
        Operator::Div => "_div",
        Operator::Mod => "_mod",
        Operator::Pow => "_pow",
        Operator::LShift => "_lshift",
        Operator::RShift => "_rshift",
        Operator::BitOr => "_or",
        Operator::BitXor => "_xor",
        Operator::BitAnd => "_and",
        Operator::FloorDiv => "_floordiv",
    }
}

fn in_place_name(op: Operator) -> &'static str {
    match op {
        Operator::Add => "__iadd__",
        Operator::Sub => "__isub__",
        Operator::Mult => "__imul__",
        Operator::Div => "__idiv__",
        Operator::Mod => "__imod__",
        Operator::Pow => "__ipow__",
        Operator::LShift => "__ilshift__",
        Operator::RShift => "__irshift__",
        Operator::BitOr => "__ior__",
        Operator::BitXor => "__ixor__",
        Operator::BitAnd => "__iand__",
        Operator::FloorDiv => "__ifloordiv__",
    }
}

fn unary_name(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Invert => "__invert__",
        UnaryOp::Not => "__not__",
        UnaryOp::UAdd => "__pos__",
        UnaryOp::USub => "__neg__",
    }
}

fn compare_name(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "_eq",
        CmpOp::NotEq => "_ne",
        CmpOp::Lt => "_lt",
        CmpOp::LtE => "_le",
        CmpOp::Gt => "_gt",
        CmpOp::GtE => "_ge",
        CmpOp::Is => "_is",
        CmpOp::IsNot => "_isnot",
        CmpOp::In => "_in",
        CmpOp::NotIn => "_notin",
    }
}

/// Emits helpers for one module, applying the division mode.
///
/// Built once per compilation and never mutated.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeTable {
    true_division: bool,
}

impl RuntimeTable {
    #[must_use]
    pub fn new(true_division: bool) -> Self {
        Self { true_division }
    }

    /// The helper actually used for `helper` under this table's settings.
    #[must_use]
    pub fn resolve(self, helper: Helper) -> Helper {
        match helper {
            Helper::Binary(Operator::Div) if self.true_division => Helper::TrueDivide,
            Helper::InPlace(Operator::Div) if self.true_division => Helper::InPlaceTrueDivide,
            other => other,
        }
    }

    /// Emits the field access or call for `helper`.
    ///
    /// Constructors only emit the `invokespecial`; the caller is responsible
    /// for `new` and `dup`.
    pub fn emit(self, helper: Helper, code: &mut Code, pool: &mut ConstantPool) {
        let spec = self.resolve(helper).spec();
        match spec.kind {
            HelperKind::StaticField => code.getstatic(pool.fieldref(spec.owner, spec.name, spec.descriptor)),
            HelperKind::Field => code.getfield(pool.fieldref(spec.owner, spec.name, spec.descriptor)),
            HelperKind::Static => code.invokestatic(pool.methodref(spec.owner, spec.name, spec.descriptor)),
            HelperKind::Virtual => code.invokevirtual(pool.methodref(spec.owner, spec.name, spec.descriptor)),
            HelperKind::Special => code.invokespecial(pool.methodref(spec.owner, spec.name, spec.descriptor)),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::classfile::MethodDescriptor;

    #[test]
    fn descriptors_parse() {
        let mut helpers = vec![
            Helper::FrameSetLine,
            Helper::GetGlobal,
            Helper::SetLocal,
            Helper::ToCell,
            Helper::MakeException(3),
            Helper::SetException,
            Helper::MakeClassClosure,
            Helper::NewCode,
            Helper::RunMain,
            Helper::ImportFrom,
            Helper::Call(CallShape::Extra),
            Helper::Invoke(InvokeShape::Array),
            Helper::SetSlice,
            Helper::NewFunctionClosure,
            Helper::NewLambda,
        ];
        helpers.extend((0..=4).map(|n| Helper::Call(CallShape::Positional(n))));
        for helper in helpers {
            let spec = helper.spec();
            assert!(MethodDescriptor::parse(spec.descriptor).is_ok(), "{helper:?}: {}", spec.descriptor);
        }
    }

    #[test]
    fn stack_effects() {
        let mut pool = ConstantPool::new();
        let mut code = Code::new(2, false);
        let table = RuntimeTable::new(false);
        code.aload(1);
        table.emit(Helper::FrameGlobals, &mut code, &mut pool);
        assert_eq!(code.stack(), 1);
        table.emit(Helper::None, &mut code, &mut pool);
        table.emit(Helper::Binary(Operator::Add), &mut code, &mut pool);
        assert_eq!(code.stack(), 1);
        code.aload(1);
        code.iconst(0, &mut pool);
        code.iconst(1, &mut pool);
        table.emit(Helper::ToCell, &mut code, &mut pool);
        assert_eq!(code.stack(), 1);
        table.emit(Helper::Nonzero, &mut code, &mut pool);
        assert_eq!(code.stack(), 1);
    }

    #[test]
    fn true_division_swaps_divide() {
        assert_eq!(RuntimeTable::new(true).resolve(Helper::Binary(Operator::Div)), Helper::TrueDivide);
        assert_eq!(
            RuntimeTable::new(false).resolve(Helper::Binary(Operator::Div)).spec().name,
            "_div"
        );
        assert_eq!(
            RuntimeTable::new(true).resolve(Helper::InPlace(Operator::Div)).spec().name,
            "__itruediv__"
        );
    }

    #[test]
    #[should_panic(expected = "no __call__ overload")]
    fn oversized_call_shape_panics() {
        let _ = Helper::Call(CallShape::Positional(5)).spec();
    }
}
