//! Recursive-descent parser. Builds the AST and resolves names/types/structs
//! in a single pass: every declaration is registered into the scope stack as
//! it is parsed, and every reference is resolved against the scope state at
//! the point of the reference.

pub mod state;

use std::collections::HashSet;

use crate::ast::{AsmOperand, BinOp, Expr, ExprInfo, Program, Stmt, UnaryOp};
use crate::lexer::{Token, TokenKind};
use crate::scope::{C3Function, C3Variable, ScopeStack};
use crate::span::Span;
use crate::types::{FunctionSignature, StructDefinition, Type, TypeRegistry};

use state::ParseState;

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub position: Option<Span>,
}

impl ParseError {
    pub fn eof(message: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
            position: None,
        }
    }

    pub fn at(message: impl Into<String>, span: Span) -> Self {
        ParseError {
            message: message.into(),
            position: Some(span),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.position {
            Some(span) => write!(f, "{}\n{}", self.message, span),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ParseError {}

/// Rank + associativity for a binary operator.
#[derive(Clone, Copy)]
struct Precedence {
    rank: u8,
    right_to_left: bool,
}

fn binop_precedence(value: &str) -> Option<(BinOp, Precedence)> {
    Some(match value {
        "." | "->" => return None, // handled specially, not via generic climbing
        "*" => (BinOp::Mul, Precedence { rank: 80, right_to_left: false }),
        "/" => (BinOp::Div, Precedence { rank: 80, right_to_left: false }),
        "+" => (BinOp::Add, Precedence { rank: 60, right_to_left: false }),
        "-" => (BinOp::Sub, Precedence { rank: 60, right_to_left: false }),
        "<" => (BinOp::Lt, Precedence { rank: 50, right_to_left: false }),
        "<=" => (BinOp::Le, Precedence { rank: 50, right_to_left: false }),
        ">" => (BinOp::Gt, Precedence { rank: 50, right_to_left: false }),
        ">=" => (BinOp::Ge, Precedence { rank: 50, right_to_left: false }),
        "==" => (BinOp::Eq, Precedence { rank: 40, right_to_left: false }),
        "!=" => (BinOp::Ne, Precedence { rank: 40, right_to_left: false }),
        "=" => (BinOp::Assign, Precedence { rank: 20, right_to_left: true }),
        _ => return None,
    })
}

const SELECTOR_PRECEDENCE: u8 = 110;
const UNARY_PRECEDENCE: u8 = 100;

type ImportFn<'a> = dyn FnMut(&str) -> Result<Vec<Token>, ParseError> + 'a;

pub struct Parser<'a> {
    tokens: ParseState,
    pub scope: ScopeStack,
    pub registry: TypeRegistry,
    pub errors: Vec<ParseError>,
    import_fn: Box<ImportFn<'a>>,
    visited_imports: HashSet<String>,
}

impl<'a> Parser<'a> {
    pub fn new(
        tokens: Vec<Token>,
        registry: TypeRegistry,
        import_fn: Box<ImportFn<'a>>,
    ) -> Self {
        Parser {
            tokens: ParseState::from(tokens),
            scope: ScopeStack::new(),
            registry,
            errors: Vec::new(),
            import_fn,
            visited_imports: HashSet::new(),
        }
    }

    fn push_error(&mut self, message: impl Into<String>, span: Option<Span>) {
        self.errors.push(ParseError {
            message: message.into(),
            position: span,
        });
    }

    fn current_span(&self) -> Option<Span> {
        self.tokens.peek().map(|t| t.span.clone())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.peek()
    }

    fn at_punct(&self, p: &str) -> bool {
        self.peek().is_some_and(|t| t.is_punct(p))
    }

    fn at_keyword(&self, k: &str) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(k))
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.at_punct(p) {
            self.tokens.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ParseError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(ParseError::at(
                format!("expected '{p}'"),
                self.current_span().unwrap_or_default(),
            ))
        }
    }

    fn eat_keyword(&mut self, k: &str) -> bool {
        if self.at_keyword(k) {
            self.tokens.advance();
            true
        } else {
            false
        }
    }

    fn expect_identifier(&mut self) -> Result<Token, ParseError> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier => {
                let t = t.clone();
                self.tokens.advance();
                Ok(t)
            }
            _ => Err(ParseError::at(
                "expected an identifier",
                self.current_span().unwrap_or_default(),
            )),
        }
    }

    /// Parses `IDENT ("::" IDENT)*` starting at the current token (which the
    /// caller must already have checked is an identifier) into a single
    /// `::`-joined lookup key.
    fn parse_qualified_name(&mut self) -> (String, Span) {
        let first = self.tokens.advance().expect("caller checked identifier");
        let span = first.span.clone();
        let mut name = first.value.clone();
        while self.at_punct("::") {
            self.tokens.advance();
            match self.expect_identifier() {
                Ok(tok) => {
                    name.push_str("::");
                    name.push_str(&tok.value);
                }
                Err(e) => {
                    self.errors.push(e);
                    break;
                }
            }
        }
        (name, span)
    }

    /// Recover to a known boundary (closing brace or semicolon) after a
    /// statement-level failure, so a single mistake doesn't abort the block.
    fn recover_to_boundary(&mut self) {
        loop {
            match self.peek() {
                None => return,
                Some(t) if t.is_punct(";") => {
                    self.tokens.advance();
                    return;
                }
                Some(t) if t.is_punct("}") => return,
                _ => {
                    self.tokens.advance();
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // entry point
    // ---------------------------------------------------------------

    /// Fails overall (returns `None`) if any error was reported, across this
    /// call and any nested `import`.
    pub fn generate_ast(&mut self) -> Option<Program> {
        let mut stmts = Vec::new();
        while !self.tokens.is_eof() {
            if self.eat_punct(";") {
                continue;
            }
            match self.parse_statement() {
                Some(stmt) => stmts.push(stmt),
                None => self.recover_to_boundary(),
            }
        }
        if self.errors.is_empty() {
            Some(stmts)
        } else {
            None
        }
    }

    // ---------------------------------------------------------------
    // statements
    // ---------------------------------------------------------------

    fn parse_block(&mut self) -> Stmt {
        let mut stmts = Vec::new();
        loop {
            if self.tokens.is_eof() || self.at_punct("}") {
                break;
            }
            if self.eat_punct(";") {
                continue;
            }
            match self.parse_statement() {
                Some(stmt) => stmts.push(stmt),
                None => {
                    self.recover_to_boundary();
                    if self.at_punct("}") || self.tokens.is_eof() {
                        break;
                    }
                }
            }
        }
        Stmt::Sequence(stmts)
    }

    fn parse_statement(&mut self) -> Option<Stmt> {
        if self.at_keyword("import") {
            return self.parse_import();
        }
        if self.at_keyword("namespace") {
            return self.parse_namespace();
        }
        if self.at_punct("{") {
            return self.parse_compound_block();
        }
        if self.at_keyword("if") {
            return self.parse_if();
        }
        if self.at_keyword("while") {
            return self.parse_while();
        }
        if self.at_keyword("asm") {
            return self.parse_asm();
        }
        if self.at_keyword("return") {
            return self.parse_return();
        }
        if self.at_keyword("struct") {
            return self.parse_struct_dec_or_def();
        }

        let checkpoint = self.tokens.get_index();
        if let Some(ty) = self.try_parse_type() {
            return self.parse_type_led(ty);
        }
        self.tokens.set_index(checkpoint);

        let expr = self.parse_expression(0)?;
        self.expect_punct(";").ok()?;
        Some(Stmt::Expression(expr))
    }

    fn parse_import(&mut self) -> Option<Stmt> {
        let span = self.current_span().unwrap_or_default();
        self.tokens.advance(); // import
        if !self.scope.is_global() {
            self.push_error(
                "imports can only be made in the top level namespace",
                Some(span.clone()),
            );
            return None;
        }
        let name_tok = self.expect_identifier().map_err(|e| self.errors.push(e)).ok()?;
        self.expect_punct(";").map_err(|e| self.errors.push(e)).ok()?;

        let module_path = format!("modules/{0}/{0}.c3", name_tok.value);
        if self.visited_imports.contains(&module_path) {
            return Some(Stmt::Nop);
        }
        self.visited_imports.insert(module_path.clone());

        match (self.import_fn)(&module_path) {
            Ok(tokens) => {
                let saved = std::mem::replace(&mut self.tokens, ParseState::from(tokens));
                // parse the imported tokens into the current (global) scope
                while !self.tokens.is_eof() {
                    if self.eat_punct(";") {
                        continue;
                    }
                    match self.parse_statement() {
                        Some(_) => {}
                        None => self.recover_to_boundary(),
                    }
                }
                self.tokens = saved;
                Some(Stmt::Nop)
            }
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }

    fn parse_namespace(&mut self) -> Option<Stmt> {
        self.tokens.advance(); // namespace
        let name_tok = self.expect_identifier().map_err(|e| self.errors.push(e)).ok()?;
        if !self.scope.is_new_name(&name_tok.value) && !self.scope.is_namespace_name(&name_tok.value) {
            self.push_error(
                format!("'{}' is already declared in this scope", name_tok.value),
                Some(name_tok.span.clone()),
            );
            return None;
        }
        self.expect_punct("{").map_err(|e| self.errors.push(e)).ok()?;
        self.scope.enter_namespace(&name_tok.value);
        let body = self.parse_block();
        self.scope.exit_namespace();
        self.expect_punct("}").map_err(|e| self.errors.push(e)).ok()?;
        Some(body)
    }

    fn parse_compound_block(&mut self) -> Option<Stmt> {
        self.tokens.advance(); // {
        self.scope.push();
        let body = self.parse_block();
        self.scope.pop();
        self.expect_punct("}").map_err(|e| self.errors.push(e)).ok()?;
        Some(body)
    }

    fn parse_if(&mut self) -> Option<Stmt> {
        let span = self.current_span().unwrap_or_default();
        self.tokens.advance(); // if
        self.expect_punct("(").map_err(|e| self.errors.push(e)).ok()?;
        let cond = self.parse_expression(0)?;
        self.expect_punct(")").map_err(|e| self.errors.push(e)).ok()?;

        // `push`/`pop` must bracket the branch parse even when it fails, or a
        // reported error would leave a dangling scope frame for everything
        // parsed afterwards.
        self.scope.push();
        let true_branch = self.parse_statement_or_block();
        self.scope.pop();
        let true_branch = true_branch?;

        let false_branch = if self.eat_keyword("else") {
            self.scope.push();
            let b = self.parse_statement_or_block();
            self.scope.pop();
            b?
        } else {
            Stmt::Sequence(Vec::new())
        };

        Some(Stmt::Condition {
            cond,
            true_branch: Box::new(true_branch),
            false_branch: Box::new(false_branch),
            span,
        })
    }

    fn parse_while(&mut self) -> Option<Stmt> {
        let span = self.current_span().unwrap_or_default();
        self.tokens.advance(); // while
        self.expect_punct("(").map_err(|e| self.errors.push(e)).ok()?;
        let cond = self.parse_expression(0)?;
        self.expect_punct(")").map_err(|e| self.errors.push(e)).ok()?;
        self.scope.push();
        let body = self.parse_statement_or_block();
        self.scope.pop();
        let body = body?;
        Some(Stmt::WhileLoop {
            cond,
            body: Box::new(body),
            span,
        })
    }

    /// A single statement used as a block body (`if`/`while` arms), which may
    /// itself be a `{ ... }` block (already scope-pushing on its own, so we
    /// don't double-push here: `parse_statement` handles `{`).
    fn parse_statement_or_block(&mut self) -> Option<Stmt> {
        self.parse_statement()
    }

    fn parse_return(&mut self) -> Option<Stmt> {
        let span = self.current_span().unwrap_or_default();
        self.tokens.advance(); // return
        let Some(expected) = self.scope.return_type() else {
            self.push_error("unexpected return statement", Some(span));
            return None;
        };
        // `return;` with no expression is not supported (matches the
        // original's outstanding gap); an expression is always required.
        let expr = self.parse_expression(0)?;
        if expr.ty() != expected && !(expr.ty().is_integer() && expected.is_integer()) {
            self.push_error(
                format!(
                    "wrong return type: expected '{}', found '{}'",
                    expected.name(),
                    expr.ty().name()
                ),
                Some(expr.span().clone()),
            );
        }
        self.expect_punct(";").map_err(|e| self.errors.push(e)).ok()?;
        Some(Stmt::Return {
            value: Some(expr),
            span,
        })
    }

    fn parse_asm(&mut self) -> Option<Stmt> {
        let span = self.current_span().unwrap_or_default();
        self.tokens.advance(); // asm
        self.expect_punct("(").map_err(|e| self.errors.push(e)).ok()?;
        let assembly = match self.peek() {
            Some(t) if t.kind == TokenKind::StringLiteral => {
                let v = t.value.clone();
                self.tokens.advance();
                v
            }
            _ => {
                self.push_error("expected assembly template string", self.current_span());
                return None;
            }
        };

        let mut outputs = Vec::new();
        let mut inputs = Vec::new();
        let mut clobbers = Vec::new();

        if self.eat_punct(":") {
            outputs = self.parse_asm_operand_list()?;
            if self.eat_punct(":") {
                inputs = self.parse_asm_operand_list()?;
                if self.eat_punct(":") {
                    clobbers = self.parse_clobber_list()?;
                }
            }
        }
        self.expect_punct(")").map_err(|e| self.errors.push(e)).ok()?;
        self.expect_punct(";").map_err(|e| self.errors.push(e)).ok()?;

        // rewrite constraints and migrate indirect outputs into `inputs`,
        // matching the original compiler's parse-time behavior.
        let mut rewritten_outputs = Vec::new();
        for op in outputs {
            let constraint = rewrite_output_constraint(&op.constraint);
            let indirect = constraint.starts_with('*') || constraint.contains("*m");
            if indirect && !op.expr.is_lvalue() {
                self.push_error(
                    "indirect asm output operand must be an lvalue",
                    Some(op.expr.span().clone()),
                );
            }
            if indirect {
                inputs.push(AsmOperand {
                    constraint,
                    expr: op.expr,
                });
            } else {
                rewritten_outputs.push(AsmOperand {
                    constraint,
                    expr: op.expr,
                });
            }
        }

        Some(Stmt::InlineAsm {
            assembly,
            outputs: rewritten_outputs,
            inputs,
            clobbers,
            span,
        })
    }

    fn parse_asm_operand_list(&mut self) -> Option<Vec<AsmOperand>> {
        let mut ops = Vec::new();
        if self.at_punct(":") || self.at_punct(")") {
            return Some(ops);
        }
        loop {
            let constraint = match self.peek() {
                Some(t) if t.kind == TokenKind::StringLiteral => {
                    let v = t.value.clone();
                    self.tokens.advance();
                    v
                }
                _ => {
                    self.push_error("expected asm operand constraint string", self.current_span());
                    return None;
                }
            };
            self.expect_punct("(").map_err(|e| self.errors.push(e)).ok()?;
            let expr = self.parse_expression(0)?;
            self.expect_punct(")").map_err(|e| self.errors.push(e)).ok()?;
            ops.push(AsmOperand { constraint, expr });
            if !self.eat_punct(",") {
                break;
            }
        }
        Some(ops)
    }

    fn parse_clobber_list(&mut self) -> Option<Vec<String>> {
        let mut names = Vec::new();
        if self.at_punct(")") {
            return Some(names);
        }
        loop {
            match self.peek() {
                Some(t) if t.kind == TokenKind::StringLiteral => {
                    names.push(format!("~{{{}}}", t.value));
                    self.tokens.advance();
                }
                _ => {
                    self.push_error("expected clobber name string", self.current_span());
                    return None;
                }
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        Some(names)
    }

    /// `struct NAME { FIELDS }`. Registers the opaque struct *before*
    /// parsing the field list, so a field may reference the struct through a
    /// pointer to itself (see DESIGN.md's open-question resolution).
    fn parse_struct_dec_or_def(&mut self) -> Option<Stmt> {
        let span = self.current_span().unwrap_or_default();
        self.tokens.advance(); // struct
        let name_tok = self.expect_identifier().map_err(|e| self.errors.push(e)).ok()?;
        let name = name_tok.value.clone();

        if !self.scope.is_new_name(&name) {
            self.push_error(
                format!("'{name}' is already declared in this scope"),
                Some(name_tok.span.clone()),
            );
            return None;
        }

        let global_name = format!("{}{}", self.scope.global_prefix(), name);
        let opaque = self.registry.struct_decl(name.clone(), global_name);
        self.scope.add_type(&name, opaque.clone()).ok()?;

        self.expect_punct("{").map_err(|e| self.errors.push(e)).ok()?;

        // `push`/`pop` must bracket the whole field list even on a failed
        // field, or the dangling frame would still be on the stack for
        // everything parsed after this struct.
        self.scope.push();
        let mut fields = Vec::new();
        let mut failed = false;
        while !self.at_punct("}") && !self.tokens.is_eof() {
            let field_ty = match self.try_parse_type() {
                Some(t) => t,
                None => {
                    self.push_error("expected field type", self.current_span());
                    failed = true;
                    break;
                }
            };
            let field_name = match self.expect_identifier() {
                Ok(t) => t,
                Err(e) => {
                    self.errors.push(e);
                    failed = true;
                    break;
                }
            };
            if let Err(e) = self.expect_punct(";") {
                self.errors.push(e);
                failed = true;
                break;
            }
            fields.push((field_name.value, field_ty));
        }
        self.scope.pop();
        if failed {
            return None;
        }
        self.expect_punct("}").map_err(|e| self.errors.push(e)).ok()?;

        self.registry
            .define(&opaque, StructDefinition::new(fields))
            .ok()?;

        Some(Stmt::Nop)
    }

    /// Dispatch for `TYPE IDENT ...`: either a function proto/def or a
    /// variable declaration.
    fn parse_type_led(&mut self, ty: Type) -> Option<Stmt> {
        let name_tok = self.expect_identifier().map_err(|e| self.errors.push(e)).ok()?;
        if self.at_punct("(") {
            self.parse_function_proto_or_def(ty, name_tok)
        } else {
            self.parse_variable_dec(ty, name_tok)
        }
    }

    fn parse_variable_dec(&mut self, ty: Type, name_tok: Token) -> Option<Stmt> {
        let global_name = format!("{}{}", self.scope.global_prefix(), name_tok.value);
        let var = C3Variable {
            ty: ty.clone(),
            name: name_tok.value.clone(),
            global_name,
            declared_at: name_tok.span.clone(),
        };

        let init = if self.eat_punct("=") {
            let expr = self.parse_expression(0)?;
            Some(expr)
        } else {
            None
        };

        if let Err(e) = self.scope.add_variable(var.clone()) {
            self.push_error(e.to_string(), Some(name_tok.span.clone()));
            return None;
        }

        self.expect_punct(";").map_err(|e| self.errors.push(e)).ok()?;
        Some(Stmt::VariableDec {
            var,
            init,
            span: name_tok.span,
        })
    }

    fn parse_function_proto_or_def(&mut self, return_type: Type, name_tok: Token) -> Option<Stmt> {
        self.tokens.advance(); // (
        let mut arg_types = Vec::new();
        let mut arg_names = Vec::new();
        if !self.at_punct(")") {
            loop {
                let Some(arg_ty) = self.try_parse_type() else {
                    self.push_error("expected parameter type", self.current_span());
                    return None;
                };
                let arg_name = self.expect_identifier().map_err(|e| self.errors.push(e)).ok()?;
                if arg_names.contains(&arg_name.value) {
                    self.push_error(
                        format!("duplicate argument name '{}'", arg_name.value),
                        Some(arg_name.span.clone()),
                    );
                }
                arg_types.push(arg_ty);
                arg_names.push(arg_name.value);
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(")").map_err(|e| self.errors.push(e)).ok()?;

        let sig = FunctionSignature::new(return_type.clone(), arg_types.clone());
        let global_name = format!("{}{}", self.scope.global_prefix(), name_tok.value);

        let func = match self.scope.lookup_function(&name_tok.value) {
            Some(existing) => {
                if existing.signature != sig {
                    self.push_error(
                        format!(
                            "function '{}' redeclared with a different signature",
                            name_tok.value
                        ),
                        Some(name_tok.span.clone()),
                    );
                    return None;
                }
                existing
            }
            None => {
                let func = C3Function {
                    global_name,
                    signature: sig,
                    declared_at: name_tok.span.clone(),
                    defined_at: Default::default(),
                };
                if let Err(e) = self.scope.add_function(func.clone()) {
                    self.push_error(e.to_string(), Some(name_tok.span.clone()));
                    return None;
                }
                func
            }
        };

        if self.eat_punct(";") {
            return Some(Stmt::FunctionProto {
                func,
                arg_names,
                span: name_tok.span,
            });
        }

        if func.is_defined() {
            self.push_error(
                format!("function '{}' is already defined", name_tok.value),
                Some(name_tok.span.clone()),
            );
            return None;
        }

        self.expect_punct("{").map_err(|e| self.errors.push(e)).ok()?;

        // `push_for_function`/`pop` must bracket the body parse even on
        // failure, or a reported error here would leave the function's
        // locals visible to whatever gets parsed next.
        let arg_prefix = format!("{}{}.", self.scope.global_prefix(), name_tok.value);
        self.scope.push_for_function(return_type);
        for (arg_ty, arg_name) in arg_types.iter().zip(arg_names.iter()) {
            let var = C3Variable {
                ty: arg_ty.clone(),
                name: arg_name.clone(),
                global_name: format!("{arg_prefix}{arg_name}"),
                declared_at: name_tok.span.clone(),
            };
            let _ = self.scope.add_variable(var);
        }
        let body = self.parse_block();
        let closed = self.expect_punct("}");
        self.scope.pop();
        closed.map_err(|e| self.errors.push(e)).ok()?;

        func.set_defined(name_tok.span.clone());

        Some(Stmt::FunctionDef {
            func,
            arg_names,
            body: Box::new(body),
            arg_prefix,
            span: name_tok.span,
        })
    }

    // ---------------------------------------------------------------
    // types
    // ---------------------------------------------------------------

    fn try_parse_type(&mut self) -> Option<Type> {
        let checkpoint = self.tokens.get_index();
        let base = match self.peek() {
            Some(t) if t.is_keyword("void") => {
                self.tokens.advance();
                self.registry.void()
            }
            Some(t) if t.is_keyword("bool") => {
                self.tokens.advance();
                self.registry.bool()
            }
            Some(t) if t.is_keyword("char") => {
                self.tokens.advance();
                self.registry.int8()
            }
            Some(t) if t.is_keyword("int64") => {
                self.tokens.advance();
                self.registry.int64()
            }
            Some(t) if t.is_keyword("double") => {
                self.tokens.advance();
                self.registry.double()
            }
            Some(t) if t.kind == TokenKind::Identifier => {
                let (name, _span) = self.parse_qualified_name();
                match self.scope.lookup_type(&name) {
                    Some(ty) => ty,
                    None => {
                        self.tokens.set_index(checkpoint);
                        return None;
                    }
                }
            }
            _ => return None,
        };

        let mut ty = base;
        while self.at_punct("*") {
            self.tokens.advance();
            ty = self.registry.pointer_to(&ty);
        }
        Some(ty)
    }

    // ---------------------------------------------------------------
    // expressions
    // ---------------------------------------------------------------

    fn parse_expression(&mut self, min_prec: u8) -> Option<Expr> {
        let mut lhs = self.parse_unary_or_primary()?;

        loop {
            let Some(tok) = self.peek() else { break };
            if tok.is_punct(".") || tok.is_punct("->") {
                if SELECTOR_PRECEDENCE < min_prec {
                    break;
                }
                lhs = self.parse_selector(lhs)?;
                continue;
            }
            let Some((op, prec)) = (if tok.kind == TokenKind::Punctuator {
                binop_precedence(&tok.value)
            } else {
                None
            }) else {
                break;
            };
            if prec.rank < min_prec {
                break;
            }
            self.tokens.advance();
            let next_min = if prec.right_to_left {
                prec.rank
            } else {
                prec.rank + 1
            };
            let rhs = self.parse_expression(next_min)?;
            lhs = self.build_binop(op, lhs, rhs)?;
        }

        Some(lhs)
    }

    fn parse_unary_or_primary(&mut self) -> Option<Expr> {
        if self.at_punct("&") {
            let span = self.current_span().unwrap_or_default();
            self.tokens.advance();
            let operand = self.parse_expression(UNARY_PRECEDENCE)?;
            if !operand.is_lvalue() {
                self.push_error("'&' requires an lvalue operand", Some(span.clone()));
            }
            let ty = self.registry.pointer_to(&operand.ty());
            return Some(Expr::UnaryOp {
                op: UnaryOp::AddrOf,
                operand: Box::new(operand),
                info: ExprInfo { ty, is_lvalue: false },
                span,
            });
        }
        if self.at_punct("*") {
            let span = self.current_span().unwrap_or_default();
            self.tokens.advance();
            let operand = self.parse_expression(UNARY_PRECEDENCE)?;
            let Some(pointee) = operand.ty().pointee() else {
                self.push_error("'*' requires a pointer operand", Some(span.clone()));
                return None;
            };
            return Some(Expr::UnaryOp {
                op: UnaryOp::Deref,
                operand: Box::new(operand),
                info: ExprInfo {
                    ty: pointee,
                    is_lvalue: true,
                },
                span,
            });
        }
        if self.at_punct("+") || self.at_punct("-") {
            let minus = self.at_punct("-");
            let span = self.current_span().unwrap_or_default();
            self.tokens.advance();
            let operand = self.parse_expression(UNARY_PRECEDENCE)?;
            let ty = operand.ty();
            return Some(Expr::UnaryOp {
                op: if minus { UnaryOp::Minus } else { UnaryOp::Plus },
                operand: Box::new(operand),
                info: ExprInfo { ty, is_lvalue: false },
                span,
            });
        }

        let primary = self.parse_primary()?;
        self.maybe_parse_call(primary)
    }

    fn maybe_parse_call(&mut self, callee: Expr) -> Option<Expr> {
        if !self.at_punct("(") {
            return Some(callee);
        }
        let span = callee.span().clone();
        self.tokens.advance(); // (
        let mut args = Vec::new();
        if !self.at_punct(")") {
            loop {
                args.push(self.parse_expression(0)?);
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(")").map_err(|e| self.errors.push(e)).ok()?;

        let Some(sig) = callee.ty().signature().cloned() else {
            self.push_error("called expression is not a function", Some(span));
            return None;
        };
        if sig.params.len() != args.len() {
            self.push_error(
                format!(
                    "wrong number of arguments: expected {}, found {}",
                    sig.params.len(),
                    args.len()
                ),
                Some(span.clone()),
            );
        } else {
            for (param, arg) in sig.params.iter().zip(args.iter()) {
                if param != &arg.ty() {
                    self.push_error(
                        format!(
                            "argument type mismatch: expected '{}', found '{}'",
                            param.name(),
                            arg.ty().name()
                        ),
                        Some(arg.span().clone()),
                    );
                }
            }
        }

        Some(Expr::FunctionCall {
            callee: Box::new(callee),
            args,
            info: ExprInfo {
                ty: sig.return_type,
                is_lvalue: false,
            },
            span,
        })
    }

    fn parse_selector(&mut self, lhs: Expr) -> Option<Expr> {
        let arrow = self.at_punct("->");
        let span = self.current_span().unwrap_or_default();
        self.tokens.advance(); // . or ->

        let target = if arrow {
            let Some(pointee) = lhs.ty().pointee() else {
                self.push_error("'->' requires a pointer operand", Some(span.clone()));
                return None;
            };
            Expr::UnaryOp {
                op: UnaryOp::Deref,
                operand: Box::new(lhs),
                info: ExprInfo {
                    ty: pointee,
                    is_lvalue: true,
                },
                span: span.clone(),
            }
        } else {
            lhs
        };

        if !target.ty().is_struct() || !target.ty().is_defined() {
            self.push_error("selection requires a defined struct operand", Some(span));
            return None;
        }
        let field_tok = self.expect_identifier().map_err(|e| self.errors.push(e)).ok()?;
        let def = target.ty().struct_definition().unwrap();
        let Some(index) = def.field_index(&field_tok.value) else {
            self.push_error(
                format!("struct has no member named '{}'", field_tok.value),
                Some(field_tok.span.clone()),
            );
            return None;
        };
        let field_ty = def.fields[index].1.clone();
        Some(Expr::StructMemberRef {
            target: Box::new(target),
            field_index: index,
            info: ExprInfo {
                ty: field_ty,
                is_lvalue: true,
            },
            span: field_tok.span,
        })
    }

    fn build_binop(&mut self, op: BinOp, lhs: Expr, rhs: Expr) -> Option<Expr> {
        let span = lhs.span().clone();

        if op == BinOp::Assign {
            if !lhs.is_lvalue() {
                self.push_error("assignment target must be an lvalue", Some(span.clone()));
            }
            let ty = lhs.ty();
            return Some(Expr::BinaryOp {
                op,
                left: Box::new(lhs),
                right: Box::new(rhs),
                info: ExprInfo { ty, is_lvalue: true },
                span,
            });
        }

        let lt = lhs.ty();
        let rt = rhs.ty();
        let is_comparison = matches!(
            op,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        );

        let result_ty = if is_comparison {
            let both_int = lt.is_integer() && rt.is_integer();
            let both_float = lt.is_floating_point() && rt.is_floating_point();
            if !both_int && !both_float {
                self.push_error(
                    format!(
                        "incompatible operand types '{}' and '{}'",
                        lt.name(),
                        rt.name()
                    ),
                    Some(span.clone()),
                );
            }
            self.registry.bool()
        } else if lt == rt {
            lt.clone()
        } else if lt.is_integer() && rt.is_integer() {
            self.registry.int64()
        } else {
            self.push_error(
                format!(
                    "incompatible operand types '{}' and '{}'",
                    lt.name(),
                    rt.name()
                ),
                Some(span.clone()),
            );
            lt.clone()
        };

        Some(Expr::BinaryOp {
            op,
            left: Box::new(lhs),
            right: Box::new(rhs),
            info: ExprInfo {
                ty: result_ty,
                is_lvalue: false,
            },
            span,
        })
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let Some(tok) = self.peek().cloned() else {
            self.push_error("unexpected end of input", None);
            return None;
        };

        if self.eat_punct("(") {
            let expr = self.parse_expression(0)?;
            self.expect_punct(")").map_err(|e| self.errors.push(e)).ok()?;
            return Some(expr);
        }

        if tok.kind == TokenKind::Number {
            self.tokens.advance();
            if tok.value.contains('.') {
                let value: f64 = tok.value.parse().unwrap_or(0.0);
                return Some(Expr::FloatingPoint {
                    value,
                    info: ExprInfo {
                        ty: self.registry.double(),
                        is_lvalue: false,
                    },
                    span: tok.span,
                });
            }
            let value: i64 = tok.value.parse().unwrap_or(0);
            return Some(Expr::Integer {
                value,
                info: ExprInfo {
                    ty: self.registry.int64(),
                    is_lvalue: false,
                },
                span: tok.span,
            });
        }

        if tok.kind == TokenKind::CharacterConstant {
            self.tokens.advance();
            let value = tok
                .value
                .bytes()
                .fold(0i64, |acc, b| (acc << 8) | b as i64);
            return Some(Expr::Integer {
                value,
                info: ExprInfo {
                    ty: self.registry.int64(),
                    is_lvalue: false,
                },
                span: tok.span,
            });
        }

        if tok.kind == TokenKind::StringLiteral {
            self.tokens.advance();
            let mut bytes: Vec<u8> = tok.value.bytes().collect();
            bytes.push(0);
            return Some(Expr::ConstantArray {
                bytes,
                element_type: self.registry.int8(),
                info: ExprInfo {
                    ty: self.registry.pointer_to(&self.registry.int8()),
                    is_lvalue: false,
                },
                span: tok.span,
            });
        }

        if tok.kind == TokenKind::Identifier {
            let (name, span) = self.parse_qualified_name();
            if let Some(var) = self.scope.lookup_variable(&name) {
                let ty = var.ty.clone();
                return Some(Expr::VariableRef {
                    var,
                    info: ExprInfo { ty, is_lvalue: true },
                    span,
                });
            }
            if let Some(func) = self.scope.lookup_function(&name) {
                let sig = func.signature.clone();
                let ty = self.registry.function(sig);
                return Some(Expr::FunctionRef {
                    info: ExprInfo { ty, is_lvalue: false },
                    span,
                    func,
                });
            }
            self.push_error(
                format!("use of undeclared identifier '{name}'"),
                Some(span),
            );
            return None;
        }

        self.push_error(format!("unexpected token '{}'", tok.value), Some(tok.span));
        None
    }
}

/// `"m"` -> `"*m"`, `"=m"` -> `"=*m"`, otherwise unchanged.
fn rewrite_output_constraint(constraint: &str) -> String {
    match constraint {
        "m" => "*m".to_string(),
        "=m" => "=*m".to_string(),
        other => other.to_string(),
    }
}

pub fn parse_program<'a>(
    tokens: Vec<Token>,
    registry: TypeRegistry,
    import_fn: Box<ImportFn<'a>>,
) -> Result<(Program, ScopeStack, TypeRegistry), Vec<ParseError>> {
    let mut parser = Parser::new(tokens, registry, import_fn);
    match parser.generate_ast() {
        Some(program) => Ok((program, parser.scope, parser.registry)),
        None => Err(parser.errors),
    }
}
