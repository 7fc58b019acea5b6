//! Tagged-sum AST. Every expression carries a common envelope (`type`,
//! `is_lvalue`); statements are plain variants with no envelope. The parser
//! builds this bottom-up while simultaneously populating the scope stack;
//! lowering consumes it top-down.
//!
//! Nodes derive `serde::Serialize` only (not `Deserialize`): the `--dump-ast`
//! flag needs one-way rendering, not round-tripping, and `Type` handles
//! can't be reconstructed from JSON anyway.

use crate::scope::{C3Function, C3Variable};
use crate::span::Span;
use crate::types::Type;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExprInfo {
    pub ty: Type,
    pub is_lvalue: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum UnaryOp {
    Plus,
    Minus,
    Deref,
    AddrOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Assign,
}

#[derive(Debug, Clone, serde::Serialize)]
pub enum Expr {
    VariableRef {
        var: C3Variable,
        info: ExprInfo,
        span: Span,
    },
    FunctionRef {
        func: C3Function,
        info: ExprInfo,
        span: Span,
    },
    FloatingPoint {
        value: f64,
        info: ExprInfo,
        span: Span,
    },
    Integer {
        value: i64,
        info: ExprInfo,
        span: Span,
    },
    /// Only `int8` (char) element arrays are currently produced, by string
    /// literals.
    ConstantArray {
        bytes: Vec<u8>,
        element_type: Type,
        info: ExprInfo,
        span: Span,
    },
    StructMemberRef {
        target: Box<Expr>,
        field_index: usize,
        info: ExprInfo,
        span: Span,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
        info: ExprInfo,
        span: Span,
    },
    BinaryOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        info: ExprInfo,
        span: Span,
    },
    FunctionCall {
        callee: Box<Expr>,
        args: Vec<Expr>,
        info: ExprInfo,
        span: Span,
    },
}

impl Expr {
    pub fn info(&self) -> &ExprInfo {
        match self {
            Expr::VariableRef { info, .. }
            | Expr::FunctionRef { info, .. }
            | Expr::FloatingPoint { info, .. }
            | Expr::Integer { info, .. }
            | Expr::ConstantArray { info, .. }
            | Expr::StructMemberRef { info, .. }
            | Expr::UnaryOp { info, .. }
            | Expr::BinaryOp { info, .. }
            | Expr::FunctionCall { info, .. } => info,
        }
    }

    pub fn ty(&self) -> Type {
        self.info().ty.clone()
    }

    pub fn is_lvalue(&self) -> bool {
        self.info().is_lvalue
    }

    pub fn span(&self) -> &Span {
        match self {
            Expr::VariableRef { span, .. }
            | Expr::FunctionRef { span, .. }
            | Expr::FloatingPoint { span, .. }
            | Expr::Integer { span, .. }
            | Expr::ConstantArray { span, .. }
            | Expr::StructMemberRef { span, .. }
            | Expr::UnaryOp { span, .. }
            | Expr::BinaryOp { span, .. }
            | Expr::FunctionCall { span, .. } => span,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AsmOperand {
    pub constraint: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, serde::Serialize)]
pub enum Stmt {
    Nop,
    Sequence(Vec<Stmt>),
    VariableDec {
        var: C3Variable,
        init: Option<Expr>,
        span: Span,
    },
    FunctionProto {
        func: C3Function,
        arg_names: Vec<String>,
        span: Span,
    },
    FunctionDef {
        func: C3Function,
        arg_names: Vec<String>,
        body: Box<Stmt>,
        arg_prefix: String,
        span: Span,
    },
    Condition {
        cond: Expr,
        true_branch: Box<Stmt>,
        false_branch: Box<Stmt>,
        span: Span,
    },
    WhileLoop {
        cond: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    InlineAsm {
        assembly: String,
        outputs: Vec<AsmOperand>,
        inputs: Vec<AsmOperand>,
        clobbers: Vec<String>,
        span: Span,
    },
    Expression(Expr),
}

/// The parsed program: owned by the driver, not by any single scope.
pub type Program = Vec<Stmt>;
