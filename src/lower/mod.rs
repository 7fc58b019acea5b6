//! IR Lowering: walks the resolved AST and emits LLVM IR via `inkwell`.
//!
//! The central invariant is "every basic block ends with exactly one
//! terminator," maintained by the `terminated` flag together with
//! `build_basic_block`, and the return-merge-block pattern that gives every
//! function a single epilogue regardless of how many `return` statements it
//! contains.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType, StructType};
use inkwell::values::{BasicMetadataValueEnum, BasicValueEnum, FunctionValue, PointerValue};
use inkwell::{AddressSpace, IntPredicate, FloatPredicate};

use crate::ast::{AsmOperand, BinOp, Expr, Program, Stmt, UnaryOp};
use crate::scope::C3Function;
use crate::types::Type;

#[derive(Debug)]
pub struct LowerError {
    pub message: String,
}

impl LowerError {
    fn new(message: impl Into<String>) -> Self {
        LowerError {
            message: message.into(),
        }
    }
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LowerError {}

#[derive(Default)]
struct Scope<'ctx> {
    variables: HashMap<String, PointerValue<'ctx>>,
    functions: HashMap<String, FunctionValue<'ctx>>,
}

struct FunctionContext<'ctx> {
    return_type: Type,
    return_slot: Option<PointerValue<'ctx>>,
    return_block: BasicBlock<'ctx>,
}

pub struct CodegenContext<'ctx> {
    pub context: &'ctx Context,
    pub module: Module<'ctx>,
    pub builder: Builder<'ctx>,
    struct_cache: RefCell<HashMap<String, StructType<'ctx>>>,
    scopes: RefCell<Vec<Scope<'ctx>>>,
    func_stack: RefCell<Vec<FunctionContext<'ctx>>>,
    terminated: Cell<bool>,
}

impl<'ctx> CodegenContext<'ctx> {
    pub fn new(context: &'ctx Context, module_name: &str) -> Self {
        CodegenContext {
            context,
            module: context.create_module(module_name),
            builder: context.create_builder(),
            struct_cache: RefCell::new(HashMap::new()),
            scopes: RefCell::new(vec![Scope::default()]),
            func_stack: RefCell::new(Vec::new()),
            terminated: Cell::new(false),
        }
    }

    fn enter_scope(&self) {
        self.scopes.borrow_mut().push(Scope::default());
    }

    fn exit_scope(&self) {
        self.scopes.borrow_mut().pop();
    }

    fn store_variable(&self, name: &str, ptr: PointerValue<'ctx>) {
        self.scopes
            .borrow_mut()
            .last_mut()
            .expect("no active scope")
            .variables
            .insert(name.to_string(), ptr);
    }

    fn find_variable(&self, name: &str) -> Option<PointerValue<'ctx>> {
        self.scopes
            .borrow()
            .iter()
            .rev()
            .find_map(|s| s.variables.get(name).copied())
    }

    fn store_function(&self, name: &str, f: FunctionValue<'ctx>) {
        self.scopes
            .borrow_mut()
            .first_mut()
            .expect("global scope missing")
            .functions
            .insert(name.to_string(), f);
    }

    fn find_function(&self, name: &str) -> Option<FunctionValue<'ctx>> {
        self.scopes
            .borrow()
            .iter()
            .rev()
            .find_map(|s| s.functions.get(name).copied())
    }

    /// LLVM function names must be unique across the whole module, so a
    /// function's full `::`-qualified name is used rather than its last
    /// segment -- two namespaces each declaring `f` must not collide.
    fn llvm_function_name(global_name: &str) -> String {
        global_name.replace("::", ".")
    }

    /// Opaque-by-default struct IR type cache, keyed by global name, so
    /// self-referential structs terminate.
    fn struct_ir_type(&self, ty: &Type) -> Result<StructType<'ctx>, LowerError> {
        let global_name = ty.global_name();
        if let Some(existing) = self.struct_cache.borrow().get(&global_name) {
            if ty.is_defined() && existing.is_opaque() {
                let def = ty
                    .struct_definition()
                    .ok_or_else(|| LowerError::new("struct has no definition"))?;
                let field_types: Vec<BasicTypeEnum<'ctx>> = def
                    .fields
                    .iter()
                    .map(|(_, t)| self.llvm_basic_type(t))
                    .collect::<Result<_, _>>()?;
                existing.set_body(&field_types, /* packed = */ true);
            }
            return Ok(*existing);
        }
        let opaque = self.context.opaque_struct_type(&global_name);
        self.struct_cache
            .borrow_mut()
            .insert(global_name.clone(), opaque);
        if ty.is_defined() {
            let def = ty
                .struct_definition()
                .ok_or_else(|| LowerError::new("struct has no definition"))?;
            let field_types: Vec<BasicTypeEnum<'ctx>> = def
                .fields
                .iter()
                .map(|(_, t)| self.llvm_basic_type(t))
                .collect::<Result<_, _>>()?;
            opaque.set_body(&field_types, true);
        }
        Ok(opaque)
    }

    /// `int32`'s reported *size* of 8 (see `Type::size`) is a separate,
    /// independently-confirmed quirk from its LLVM representation: it is
    /// genuinely lowered to `i32` here.
    fn llvm_basic_type(&self, ty: &Type) -> Result<BasicTypeEnum<'ctx>, LowerError> {
        if ty.is_void() {
            return Err(LowerError::new("void has no value representation"));
        }
        Ok(if ty.is_bool() || ty.is_int8() {
            self.context.i8_type().into()
        } else if ty.is_int32() {
            self.context.i32_type().into()
        } else if ty.is_int64() {
            self.context.i64_type().into()
        } else if ty.is_pointer() {
            self.context.ptr_type(AddressSpace::default()).into()
        } else if ty.is_struct() {
            self.struct_ir_type(ty)?.into()
        } else if ty.is_floating_point() {
            self.context.f64_type().into()
        } else {
            return Err(LowerError::new(format!("no LLVM representation for '{}'", ty.name())));
        })
    }

    fn llvm_function_type(
        &self,
        return_type: &Type,
        params: &[Type],
    ) -> Result<FunctionType<'ctx>, LowerError> {
        let param_types: Vec<BasicMetadataTypeEnum<'ctx>> = params
            .iter()
            .map(|p| self.llvm_basic_type(p).map(Into::into))
            .collect::<Result<_, _>>()?;
        Ok(if return_type.is_void() {
            self.context.void_type().fn_type(&param_types, false)
        } else {
            self.llvm_basic_type(return_type)?.fn_type(&param_types, false)
        })
    }

    /// Save the insertion point, move to `target`, clear the terminated
    /// flag, lower `node`, branch to `fallthrough` iff the block is still
    /// unterminated, then restore the insertion point and the *prior* value
    /// of the terminated flag (not unconditionally `false`).
    fn build_basic_block(
        &self,
        target: BasicBlock<'ctx>,
        fallthrough: BasicBlock<'ctx>,
        lower: impl FnOnce(&Self) -> Result<(), LowerError>,
    ) -> Result<(), LowerError> {
        let saved_block = self.builder.get_insert_block();
        let saved_terminated = self.terminated.get();

        self.builder.position_at_end(target);
        self.terminated.set(false);

        lower(self)?;

        if !self.terminated.get() {
            self.builder
                .build_unconditional_branch(fallthrough)
                .map_err(|e| LowerError::new(e.to_string()))?;
        }

        if let Some(block) = saved_block {
            self.builder.position_at_end(block);
        }
        self.terminated.set(saved_terminated);
        Ok(())
    }

    // -----------------------------------------------------------------
    // top level
    // -----------------------------------------------------------------

    pub fn lower_program(&self, program: &Program) -> Result<(), LowerError> {
        for stmt in program {
            self.lower_top_level(stmt)?;
        }
        Ok(())
    }

    fn lower_top_level(&self, stmt: &Stmt) -> Result<(), LowerError> {
        match stmt {
            Stmt::Nop => Ok(()),
            Stmt::Sequence(stmts) => {
                for s in stmts {
                    self.lower_top_level(s)?;
                }
                Ok(())
            }
            Stmt::FunctionProto { func, .. } => {
                self.declare_function(func)?;
                Ok(())
            }
            Stmt::FunctionDef {
                func,
                arg_names,
                body,
                arg_prefix,
                ..
            } => self.lower_function_def(func, arg_names, body, arg_prefix),
            Stmt::VariableDec { .. } => {
                Err(LowerError::new("global variable declarations are not supported"))
            }
            other => self.lower_stmt(other),
        }
    }

    fn declare_function(&self, func: &C3Function) -> Result<FunctionValue<'ctx>, LowerError> {
        let name = Self::llvm_function_name(&func.global_name);
        if let Some(existing) = self.find_function(&name) {
            return Ok(existing);
        }
        let fn_type =
            self.llvm_function_type(&func.signature.return_type, &func.signature.params)?;
        let function = self.module.add_function(&name, fn_type, None);
        self.store_function(&name, function);
        Ok(function)
    }

    fn lower_function_def(
        &self,
        func: &C3Function,
        arg_names: &[String],
        body: &Stmt,
        arg_prefix: &str,
    ) -> Result<(), LowerError> {
        let function = self.declare_function(func)?;
        let entry = self.context.append_basic_block(function, "entry");
        let return_block = self.context.append_basic_block(function, "return");

        self.builder.position_at_end(entry);
        self.enter_scope();

        for (i, name) in arg_names.iter().enumerate() {
            let param = function
                .get_nth_param(i as u32)
                .ok_or_else(|| LowerError::new("missing parameter"))?;
            let param_ty = &func.signature.params[i];
            let alloca = self
                .builder
                .build_alloca(self.llvm_basic_type(param_ty)?, &format!("{arg_prefix}{name}"))
                .map_err(|e| LowerError::new(e.to_string()))?;
            self.builder
                .build_store(alloca, param)
                .map_err(|e| LowerError::new(e.to_string()))?;
            self.store_variable(name, alloca);
        }

        let return_slot = if func.signature.return_type.is_void() {
            None
        } else {
            Some(
                self.builder
                    .build_alloca(self.llvm_basic_type(&func.signature.return_type)?, "ret")
                    .map_err(|e| LowerError::new(e.to_string()))?,
            )
        };

        self.func_stack.borrow_mut().push(FunctionContext {
            return_type: func.signature.return_type.clone(),
            return_slot,
            return_block,
        });
        self.terminated.set(false);

        self.lower_stmt(body)?;

        if !self.terminated.get() {
            self.builder
                .build_unconditional_branch(return_block)
                .map_err(|e| LowerError::new(e.to_string()))?;
        }

        self.func_stack.borrow_mut().pop();
        self.exit_scope();

        self.builder.position_at_end(return_block);
        match return_slot {
            Some(slot) => {
                let ret_ty = self.llvm_basic_type(&func.signature.return_type)?;
                let value = self
                    .builder
                    .build_load(ret_ty, slot, "ret.val")
                    .map_err(|e| LowerError::new(e.to_string()))?;
                self.builder
                    .build_return(Some(&value))
                    .map_err(|e| LowerError::new(e.to_string()))?;
            }
            None => {
                self.builder
                    .build_return(None)
                    .map_err(|e| LowerError::new(e.to_string()))?;
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------
    // statements
    // -----------------------------------------------------------------

    fn lower_stmt(&self, stmt: &Stmt) -> Result<(), LowerError> {
        match stmt {
            Stmt::Nop => Ok(()),
            Stmt::Sequence(stmts) => {
                for s in stmts {
                    if self.terminated.get() {
                        break;
                    }
                    self.lower_stmt(s)?;
                }
                Ok(())
            }
            Stmt::VariableDec { var, init, .. } => {
                let alloca = self
                    .builder
                    .build_alloca(self.llvm_basic_type(&var.ty)?, &var.name)
                    .map_err(|e| LowerError::new(e.to_string()))?;
                self.store_variable(&var.name, alloca);
                if let Some(init_expr) = init {
                    let value = self.rvalue(init_expr, Some(&var.ty))?;
                    self.builder
                        .build_store(alloca, value)
                        .map_err(|e| LowerError::new(e.to_string()))?;
                }
                Ok(())
            }
            Stmt::FunctionProto { func, .. } => {
                self.declare_function(func)?;
                Ok(())
            }
            Stmt::FunctionDef { .. } => {
                Err(LowerError::new("nested function definitions are not supported"))
            }
            Stmt::Condition {
                cond,
                true_branch,
                false_branch,
                ..
            } => self.lower_condition(cond, true_branch, false_branch),
            Stmt::WhileLoop { cond, body, .. } => self.lower_while(cond, body),
            Stmt::Return { value, .. } => self.lower_return(value.as_ref()),
            Stmt::InlineAsm {
                assembly,
                outputs,
                inputs,
                clobbers,
                ..
            } => self.lower_inline_asm(assembly, outputs, inputs, clobbers),
            Stmt::Expression(expr) => {
                self.lower_expr(expr)?;
                Ok(())
            }
        }
    }

    fn lower_condition(
        &self,
        cond: &Expr,
        true_branch: &Stmt,
        false_branch: &Stmt,
    ) -> Result<(), LowerError> {
        let function = self.current_function()?;
        let true_block = self.context.append_basic_block(function, "if.true");
        let false_block = self.context.append_basic_block(function, "if.false");
        let post_block = self.context.append_basic_block(function, "if.post");

        let cond_value = self.rvalue(cond, None)?.into_int_value();
        self.builder
            .build_conditional_branch(cond_value, true_block, false_block)
            .map_err(|e| LowerError::new(e.to_string()))?;

        self.enter_scope();
        self.build_basic_block(true_block, post_block, |ctx| ctx.lower_stmt(true_branch))?;
        self.exit_scope();

        self.enter_scope();
        self.build_basic_block(false_block, post_block, |ctx| ctx.lower_stmt(false_branch))?;
        self.exit_scope();

        self.builder.position_at_end(post_block);
        self.terminated.set(false);
        Ok(())
    }

    fn lower_while(&self, cond: &Expr, body: &Stmt) -> Result<(), LowerError> {
        if self.terminated.get() {
            return Ok(());
        }
        let function = self.current_function()?;
        let while_block = self.context.append_basic_block(function, "while.cond");
        let body_block = self.context.append_basic_block(function, "while.body");
        let break_block = self.context.append_basic_block(function, "while.break");

        self.builder
            .build_unconditional_branch(while_block)
            .map_err(|e| LowerError::new(e.to_string()))?;

        self.enter_scope();
        self.build_basic_block(body_block, while_block, |ctx| ctx.lower_stmt(body))?;
        self.exit_scope();

        self.builder.position_at_end(while_block);
        let cond_value = self.rvalue(cond, None)?.into_int_value();
        self.builder
            .build_conditional_branch(cond_value, body_block, break_block)
            .map_err(|e| LowerError::new(e.to_string()))?;

        self.builder.position_at_end(break_block);
        self.terminated.set(false);
        Ok(())
    }

    fn lower_return(&self, value: &Option<Expr>) -> Result<(), LowerError> {
        let stack = self.func_stack.borrow();
        let ctx = stack
            .last()
            .ok_or_else(|| LowerError::new("return outside of a function"))?;
        let return_block = ctx.return_block;
        let return_slot = ctx.return_slot;
        let return_type = ctx.return_type.clone();
        drop(stack);

        if let Some(expr) = value {
            let value = self.rvalue(expr, Some(&return_type))?;
            let slot = return_slot.ok_or_else(|| LowerError::new("void function returned a value"))?;
            self.builder
                .build_store(slot, value)
                .map_err(|e| LowerError::new(e.to_string()))?;
        }

        self.builder
            .build_unconditional_branch(return_block)
            .map_err(|e| LowerError::new(e.to_string()))?;
        self.terminated.set(true);
        Ok(())
    }

    fn lower_inline_asm(
        &self,
        assembly: &str,
        outputs: &[AsmOperand],
        inputs: &[AsmOperand],
        clobbers: &[String],
    ) -> Result<(), LowerError> {
        let mut constraints = Vec::new();
        let mut arg_types = Vec::new();
        let mut args: Vec<BasicMetadataValueEnum<'ctx>> = Vec::new();

        for out in outputs {
            constraints.push(out.constraint.clone());
        }
        for input in inputs {
            constraints.push(input.constraint.clone());
            if input.constraint.contains('*') {
                let ptr = self.lvalue(&input.expr)?;
                arg_types.push(self.context.ptr_type(AddressSpace::default()).into());
                args.push(ptr.into());
            } else {
                let value = self.rvalue(&input.expr, None)?;
                arg_types.push(value.get_type().into());
                args.push(value.into());
            }
        }
        for clobber in clobbers {
            constraints.push(clobber.clone());
        }

        let output_types: Vec<BasicTypeEnum<'ctx>> = outputs
            .iter()
            .map(|o| self.llvm_basic_type(&o.expr.ty()))
            .collect::<Result<_, _>>()?;

        let result_type = match output_types.len() {
            0 => self.context.void_type().fn_type(&arg_types, false),
            1 => output_types[0].fn_type(&arg_types, false),
            _ => self
                .context
                .struct_type(&output_types, false)
                .fn_type(&arg_types, false),
        };

        let asm_fn = self.context.create_inline_asm(
            result_type,
            assembly.to_string(),
            constraints.join(","),
            true,
            false,
            None,
            false,
        );

        // The call result is intentionally discarded: inline-asm outputs
        // are not stored back into their lvalues (see DESIGN.md).
        let _ = self
            .builder
            .build_indirect_call(result_type, asm_fn, &args, "asm")
            .map_err(|e| LowerError::new(e.to_string()))?;

        Ok(())
    }

    // -----------------------------------------------------------------
    // expressions
    // -----------------------------------------------------------------

    fn current_function(&self) -> Result<FunctionValue<'ctx>, LowerError> {
        self.builder
            .get_insert_block()
            .and_then(|b| b.get_parent())
            .ok_or_else(|| LowerError::new("not positioned within a function"))
    }

    fn lvalue(&self, expr: &Expr) -> Result<PointerValue<'ctx>, LowerError> {
        if !expr.is_lvalue() {
            return Err(LowerError::new("expression is not an lvalue"));
        }
        match expr {
            Expr::VariableRef { var, .. } => self
                .find_variable(&var.name)
                .ok_or_else(|| LowerError::new(format!("undeclared variable '{}'", var.name))),
            Expr::UnaryOp {
                op: UnaryOp::Deref,
                operand,
                ..
            } => Ok(self.rvalue(operand, None)?.into_pointer_value()),
            Expr::StructMemberRef {
                target,
                field_index,
                ..
            } => {
                let base = self.lvalue(target)?;
                let struct_ty = self.struct_ir_type(&target.ty())?;
                self.builder
                    .build_struct_gep(struct_ty, base, *field_index as u32, "field")
                    .map_err(|e| LowerError::new(e.to_string()))
            }
            Expr::BinaryOp {
                op: BinOp::Assign,
                left,
                ..
            } => self.lvalue(left),
            _ => Err(LowerError::new("expression is not addressable")),
        }
    }

    fn rvalue(&self, expr: &Expr, target: Option<&Type>) -> Result<BasicValueEnum<'ctx>, LowerError> {
        let value = if expr.is_lvalue() {
            let ptr = self.lvalue(expr)?;
            let llvm_ty = self.llvm_basic_type(&expr.ty())?;
            self.builder
                .build_load(llvm_ty, ptr, "load")
                .map_err(|e| LowerError::new(e.to_string()))?
        } else {
            self.lower_expr(expr)?
        };

        match target {
            Some(target_ty) if target_ty != &expr.ty() && expr.ty().is_integer() => {
                let dest = self.llvm_basic_type(target_ty)?.into_int_type();
                let casted = self
                    .builder
                    .build_int_cast_sign_flag(
                        value.into_int_value(),
                        dest,
                        expr.ty().is_signed(),
                        "cast",
                    )
                    .map_err(|e| LowerError::new(e.to_string()))?;
                Ok(casted.into())
            }
            _ => Ok(value),
        }
    }

    fn lower_expr(&self, expr: &Expr) -> Result<BasicValueEnum<'ctx>, LowerError> {
        match expr {
            Expr::VariableRef { .. } | Expr::StructMemberRef { .. } => {
                let ptr = self.lvalue(expr)?;
                let llvm_ty = self.llvm_basic_type(&expr.ty())?;
                self.builder
                    .build_load(llvm_ty, ptr, "load")
                    .map_err(|e| LowerError::new(e.to_string()))
            }
            Expr::FunctionRef { func, .. } => {
                let name = Self::llvm_function_name(&func.global_name);
                let f = self
                    .find_function(&name)
                    .ok_or_else(|| LowerError::new(format!("undeclared function '{name}'")))?;
                Ok(f.as_global_value().as_pointer_value().into())
            }
            Expr::Integer { value, info, .. } => {
                let ty = self.llvm_basic_type(&info.ty)?.into_int_type();
                Ok(ty.const_int(*value as u64, info.ty.is_signed()).into())
            }
            Expr::FloatingPoint { value, .. } => {
                Ok(self.context.f64_type().const_float(*value).into())
            }
            Expr::ConstantArray { bytes, .. } => {
                let i8_type = self.context.i8_type();
                let values: Vec<_> = bytes.iter().map(|b| i8_type.const_int(*b as u64, false)).collect();
                let array_ty = i8_type.array_type(values.len() as u32);
                let global = self.module.add_global(array_ty, None, "str");
                global.set_initializer(&i8_type.const_array(&values));
                global.set_constant(true);
                global.set_unnamed_addr(true);
                let zero = self.context.i64_type().const_int(0, false);
                unsafe {
                    self.builder
                        .build_in_bounds_gep(array_ty, global.as_pointer_value(), &[zero, zero], "strptr")
                        .map_err(|e| LowerError::new(e.to_string()))
                        .map(Into::into)
                }
            }
            Expr::UnaryOp { op, operand, .. } => self.lower_unary(*op, operand),
            Expr::BinaryOp {
                op, left, right, ..
            } => self.lower_binary(*op, left, right, &expr.ty()),
            Expr::FunctionCall { callee, args, .. } => self.lower_call(callee, args),
        }
    }

    fn lower_unary(&self, op: UnaryOp, operand: &Expr) -> Result<BasicValueEnum<'ctx>, LowerError> {
        match op {
            UnaryOp::AddrOf => Ok(self.lvalue(operand)?.into()),
            UnaryOp::Deref => {
                let ptr = self.rvalue(operand, None)?.into_pointer_value();
                Ok(ptr.into())
            }
            UnaryOp::Plus => self.rvalue(operand, None),
            UnaryOp::Minus => {
                let value = self.rvalue(operand, None)?;
                if operand.ty().is_floating_point() {
                    Ok(self
                        .builder
                        .build_float_neg(value.into_float_value(), "neg")
                        .map_err(|e| LowerError::new(e.to_string()))?
                        .into())
                } else {
                    Ok(self
                        .builder
                        .build_int_neg(value.into_int_value(), "neg")
                        .map_err(|e| LowerError::new(e.to_string()))?
                        .into())
                }
            }
        }
    }

    fn lower_binary(
        &self,
        op: BinOp,
        left: &Expr,
        right: &Expr,
        result_ty: &Type,
    ) -> Result<BasicValueEnum<'ctx>, LowerError> {
        if op == BinOp::Assign {
            let rhs = self.rvalue(right, Some(&left.ty()))?;
            let ptr = self.lvalue(left)?;
            self.builder
                .build_store(ptr, rhs)
                .map_err(|e| LowerError::new(e.to_string()))?;
            return Ok(ptr.into());
        }

        let lhs = self.rvalue(left, Some(result_ty))?;
        let rhs = self.rvalue(right, Some(result_ty))?;
        let signed = left.ty().is_signed() || right.ty().is_signed();
        let floating = left.ty().is_floating_point() || right.ty().is_floating_point();

        if floating {
            let lf = lhs.into_float_value();
            let rf = rhs.into_float_value();
            let b = &self.builder;
            return Ok(match op {
                BinOp::Add => b.build_float_add(lf, rf, "fadd").map(Into::into),
                BinOp::Sub => b.build_float_sub(lf, rf, "fsub").map(Into::into),
                BinOp::Mul => b.build_float_mul(lf, rf, "fmul").map(Into::into),
                BinOp::Div => b.build_float_div(lf, rf, "fdiv").map(Into::into),
                BinOp::Lt => b.build_float_compare(FloatPredicate::OLT, lf, rf, "flt").map(Into::into),
                BinOp::Le => b.build_float_compare(FloatPredicate::OLE, lf, rf, "fle").map(Into::into),
                BinOp::Gt => b.build_float_compare(FloatPredicate::OGT, lf, rf, "fgt").map(Into::into),
                BinOp::Ge => b.build_float_compare(FloatPredicate::OGE, lf, rf, "fge").map(Into::into),
                BinOp::Eq => b.build_float_compare(FloatPredicate::OEQ, lf, rf, "feq").map(Into::into),
                BinOp::Ne => b.build_float_compare(FloatPredicate::ONE, lf, rf, "fne").map(Into::into),
                BinOp::Assign => unreachable!(),
            }
            .map_err(|e| LowerError::new(e.to_string()))?);
        }

        let li = lhs.into_int_value();
        let ri = rhs.into_int_value();
        let b = &self.builder;
        let (lt_pred, le_pred, gt_pred, ge_pred) = if signed {
            (IntPredicate::SLT, IntPredicate::SLE, IntPredicate::SGT, IntPredicate::SGE)
        } else {
            (IntPredicate::ULT, IntPredicate::ULE, IntPredicate::UGT, IntPredicate::UGE)
        };
        Ok(match op {
            BinOp::Add => b.build_int_add(li, ri, "add").map(Into::into),
            BinOp::Sub => b.build_int_sub(li, ri, "sub").map(Into::into),
            BinOp::Mul => b.build_int_mul(li, ri, "mul").map(Into::into),
            BinOp::Div => {
                if signed {
                    b.build_int_signed_div(li, ri, "sdiv").map(Into::into)
                } else {
                    b.build_int_unsigned_div(li, ri, "udiv").map(Into::into)
                }
            }
            BinOp::Lt => b.build_int_compare(lt_pred, li, ri, "lt").map(Into::into),
            BinOp::Le => b.build_int_compare(le_pred, li, ri, "le").map(Into::into),
            BinOp::Gt => b.build_int_compare(gt_pred, li, ri, "gt").map(Into::into),
            BinOp::Ge => b.build_int_compare(ge_pred, li, ri, "ge").map(Into::into),
            BinOp::Eq => b.build_int_compare(IntPredicate::EQ, li, ri, "eq").map(Into::into),
            BinOp::Ne => b.build_int_compare(IntPredicate::NE, li, ri, "ne").map(Into::into),
            BinOp::Assign => unreachable!(),
        }
        .map_err(|e| LowerError::new(e.to_string()))?)
    }

    fn lower_call(&self, callee: &Expr, args: &[Expr]) -> Result<BasicValueEnum<'ctx>, LowerError> {
        let Expr::FunctionRef { func, .. } = callee else {
            return Err(LowerError::new("indirect calls are not supported"));
        };
        let name = Self::llvm_function_name(&func.global_name);
        let function = self
            .find_function(&name)
            .ok_or_else(|| LowerError::new(format!("undeclared function '{name}'")))?;

        let mut arg_values: Vec<BasicMetadataValueEnum<'ctx>> = Vec::new();
        for (arg, param_ty) in args.iter().zip(func.signature.params.iter()) {
            arg_values.push(self.rvalue(arg, Some(param_ty))?.into());
        }

        let call = self
            .builder
            .build_call(function, &arg_values, "call")
            .map_err(|e| LowerError::new(e.to_string()))?;
        call.try_as_basic_value()
            .left()
            .ok_or_else(|| LowerError::new("void function used as a value"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRegistry;

    #[test]
    fn test_llvm_function_type_void_return() {
        let context = Context::create();
        let ctx = CodegenContext::new(&context, "test");
        let reg = TypeRegistry::new();
        let fn_ty = ctx.llvm_function_type(&reg.void(), &[]).unwrap();
        assert!(fn_ty.get_return_type().is_none());
    }

    #[test]
    fn test_struct_cache_returns_same_handle() {
        let context = Context::create();
        let ctx = CodegenContext::new(&context, "test");
        let reg = TypeRegistry::new();
        let s = reg.struct_decl("Node", "Node");
        let a = ctx.struct_ir_type(&s).unwrap();
        let b = ctx.struct_ir_type(&s).unwrap();
        assert_eq!(a, b);
    }
}
