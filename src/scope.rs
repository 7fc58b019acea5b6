//! Symbol Table / Scope Stack: layered lexical scopes carrying variables,
//! functions, types, and nested namespaces.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crate::span::Span;
use crate::types::{FunctionSignature, Type};

#[derive(Clone, Debug, serde::Serialize)]
pub struct C3Variable {
    pub ty: Type,
    pub name: String,
    pub global_name: String,
    pub declared_at: Span,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct C3Function {
    pub global_name: String,
    pub signature: FunctionSignature,
    pub declared_at: Span,
    /// Set the first time a body is seen.
    pub defined_at: Rc<RefCell<Option<Span>>>,
}

impl C3Function {
    pub fn is_defined(&self) -> bool {
        self.defined_at.borrow().is_some()
    }

    pub fn set_defined(&self, at: Span) {
        *self.defined_at.borrow_mut() = Some(at);
    }
}

#[derive(Default)]
struct Frame {
    types: HashMap<String, Type>,
    variables: HashMap<String, C3Variable>,
    functions: HashMap<String, C3Function>,
    /// names registered as nested namespaces, for the namespace-name predicate.
    namespaces: HashSet<String>,
}

/// A single lexical scope frame as exposed to callers: local prefix, the
/// namespace path active within it, and the function return type in force
/// (if any).
pub struct ScopeStack {
    frames: Vec<Frame>,
    prefix: String,
    /// one namespace-stack per frame, mirroring the frame's own nesting.
    namespace_stacks: Vec<Vec<String>>,
    return_types: Vec<Option<Type>>,
}

#[derive(Debug, Clone)]
pub struct DuplicateNameError {
    pub name: String,
}

impl fmt::Display for DuplicateNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is already declared in this scope", self.name)
    }
}

impl std::error::Error for DuplicateNameError {}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack {
            frames: vec![Frame::default()],
            prefix: String::new(),
            namespace_stacks: vec![Vec::new()],
            return_types: vec![None],
        }
    }

    /// Push a new anonymous scope.
    pub fn push(&mut self) {
        let ns = self.namespace_stacks.last().cloned().unwrap_or_default();
        let rt = self.return_types.last().cloned().unwrap_or(None);
        self.frames.push(Frame::default());
        self.namespace_stacks.push(ns);
        self.return_types.push(rt);
    }

    /// Push a function scope, adopting its return type.
    pub fn push_for_function(&mut self, return_type: Type) {
        let ns = self.namespace_stacks.last().cloned().unwrap_or_default();
        self.frames.push(Frame::default());
        self.namespace_stacks.push(ns);
        self.return_types.push(Some(return_type));
    }

    /// Pop the innermost scope. No-ops if only the global scope remains.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
            self.namespace_stacks.pop();
            self.return_types.pop();
        }
    }

    pub fn return_type(&self) -> Option<Type> {
        self.return_types.last().cloned().flatten()
    }

    /// True only at the single outermost frame with no active namespace —
    /// the position `import` is restricted to.
    pub fn is_global(&self) -> bool {
        self.frames.len() == 1 && self.local_prefix().is_empty()
    }

    /// This scope's local prefix: `::`-joined namespace path, trailing `::`.
    pub fn local_prefix(&self) -> String {
        let ns = self.namespace_stacks.last().cloned().unwrap_or_default();
        if ns.is_empty() {
            String::new()
        } else {
            format!("{}::", ns.join("::"))
        }
    }

    /// Global prefix: the compilation-wide prefix plus this scope's local
    /// prefix, used to mint global (fully-qualified) names.
    pub fn global_prefix(&self) -> String {
        format!("{}{}", self.prefix, self.local_prefix())
    }

    /// Register `name` as a nested namespace in the *current* frame and push
    /// it onto that frame's namespace-stack. Mutates the current frame in
    /// place rather than pushing a new scope frame.
    pub fn enter_namespace(&mut self, name: &str) {
        self.frames
            .last_mut()
            .expect("global scope missing")
            .namespaces
            .insert(name.to_string());
        self.namespace_stacks
            .last_mut()
            .expect("global scope missing")
            .push(name.to_string());
    }

    pub fn exit_namespace(&mut self) {
        self.namespace_stacks
            .last_mut()
            .expect("global scope missing")
            .pop();
    }

    fn innermost(&self) -> &Frame {
        self.frames.last().expect("global scope missing")
    }

    fn innermost_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("global scope missing")
    }

    /// True iff `name` is free (not a keyword — checked by the caller — and
    /// not already bound as a type/variable/function/namespace) in the
    /// *innermost* scope only.
    pub fn is_new_name(&self, name: &str) -> bool {
        let f = self.innermost();
        !f.types.contains_key(name)
            && !f.variables.contains_key(name)
            && !f.functions.contains_key(name)
            && !f.namespaces.contains(name)
    }

    pub fn is_namespace_name(&self, name: &str) -> bool {
        self.innermost().namespaces.contains(name)
    }

    pub fn is_undefined_function_name(&self, name: &str) -> bool {
        if self.is_new_name(name) {
            return true;
        }
        match self.innermost().functions.get(name) {
            Some(f) => !f.is_defined(),
            None => false,
        }
    }

    pub fn add_type(&mut self, name: &str, ty: Type) -> Result<(), DuplicateNameError> {
        if !self.is_new_name(name) {
            return Err(DuplicateNameError {
                name: name.to_string(),
            });
        }
        let qualified = self.local_prefix();
        let frame = self.innermost_mut();
        if !qualified.is_empty() {
            frame.types.insert(format!("{qualified}{name}"), ty.clone());
        }
        frame.types.insert(name.to_string(), ty);
        Ok(())
    }

    /// Re-bind an existing type entry in place (used when a struct's opaque
    /// handle needs no re-registration since it mutates by interior
    /// mutability; exposed for symmetry / tests).
    pub fn rebind_type(&mut self, name: &str, ty: Type) {
        self.innermost_mut().types.insert(name.to_string(), ty);
    }

    pub fn add_variable(&mut self, var: C3Variable) -> Result<(), DuplicateNameError> {
        if !self.is_new_name(&var.name) {
            return Err(DuplicateNameError {
                name: var.name.clone(),
            });
        }
        let qualified = self.local_prefix();
        let frame = self.innermost_mut();
        if !qualified.is_empty() {
            frame
                .variables
                .insert(format!("{qualified}{}", var.name), var.clone());
        }
        frame.variables.insert(var.name.clone(), var);
        Ok(())
    }

    pub fn add_function(&mut self, func: C3Function) -> Result<(), DuplicateNameError> {
        let name = func
            .global_name
            .rsplit("::")
            .next()
            .unwrap_or(&func.global_name)
            .to_string();
        let qualified = self.local_prefix();
        let frame = self.innermost_mut();
        if !qualified.is_empty() {
            frame
                .functions
                .insert(format!("{qualified}{name}"), func.clone());
        }
        frame.functions.insert(name, func);
        Ok(())
    }

    /// Look up `qualified_name` across {types, variables, functions} scanning
    /// innermost -> outermost, trying both the scope's local-prefixed form
    /// and the bare form per scope.
    pub fn lookup_type(&self, name: &str) -> Option<Type> {
        for (idx, frame) in self.frames.iter().enumerate().rev() {
            let prefix = self.local_prefix_for(idx);
            if let Some(t) = frame.types.get(&format!("{prefix}{name}")) {
                return Some(t.clone());
            }
            if let Some(t) = frame.types.get(name) {
                return Some(t.clone());
            }
        }
        None
    }

    pub fn lookup_variable(&self, name: &str) -> Option<C3Variable> {
        for (idx, frame) in self.frames.iter().enumerate().rev() {
            let prefix = self.local_prefix_for(idx);
            if let Some(v) = frame.variables.get(&format!("{prefix}{name}")) {
                return Some(v.clone());
            }
            if let Some(v) = frame.variables.get(name) {
                return Some(v.clone());
            }
        }
        None
    }

    pub fn lookup_function(&self, name: &str) -> Option<C3Function> {
        for (idx, frame) in self.frames.iter().enumerate().rev() {
            let prefix = self.local_prefix_for(idx);
            if let Some(f) = frame.functions.get(&format!("{prefix}{name}")) {
                return Some(f.clone());
            }
            if let Some(f) = frame.functions.get(name) {
                return Some(f.clone());
            }
        }
        None
    }

    fn local_prefix_for(&self, idx: usize) -> String {
        let ns = &self.namespace_stacks[idx];
        if ns.is_empty() {
            String::new()
        } else {
            format!("{}::", ns.join("::"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRegistry;

    #[test]
    fn test_new_scope_has_global_frame() {
        let scope = ScopeStack::new();
        assert_eq!(scope.frames.len(), 1);
    }

    #[test]
    fn test_add_and_lookup_variable() {
        let reg = TypeRegistry::new();
        let mut scope = ScopeStack::new();
        scope
            .add_variable(C3Variable {
                ty: reg.int64(),
                name: "x".into(),
                global_name: "x".into(),
                declared_at: Span::default(),
            })
            .unwrap();
        assert!(scope.lookup_variable("x").is_some());
    }

    #[test]
    fn test_push_pop_hides_inner_variable() {
        let reg = TypeRegistry::new();
        let mut scope = ScopeStack::new();
        scope.push();
        scope
            .add_variable(C3Variable {
                ty: reg.int64(),
                name: "x".into(),
                global_name: "x".into(),
                declared_at: Span::default(),
            })
            .unwrap();
        assert!(scope.lookup_variable("x").is_some());
        scope.pop();
        assert!(scope.lookup_variable("x").is_none());
    }

    #[test]
    fn test_global_scope_never_popped() {
        let mut scope = ScopeStack::new();
        scope.pop();
        assert_eq!(scope.frames.len(), 1);
    }

    #[test]
    fn test_shadow_within_same_scope_rejected() {
        let reg = TypeRegistry::new();
        let mut scope = ScopeStack::new();
        scope
            .add_variable(C3Variable {
                ty: reg.int64(),
                name: "x".into(),
                global_name: "x".into(),
                declared_at: Span::default(),
            })
            .unwrap();
        let err = scope
            .add_variable(C3Variable {
                ty: reg.int64(),
                name: "x".into(),
                global_name: "x".into(),
                declared_at: Span::default(),
            })
            .unwrap_err();
        assert_eq!(err.name, "x");
    }

    #[test]
    fn test_namespace_mutates_current_frame() {
        let mut scope = ScopeStack::new();
        scope.enter_namespace("math");
        assert!(scope.is_namespace_name("math"));
        assert_eq!(scope.local_prefix(), "math::");
        assert_eq!(scope.frames.len(), 1);
        scope.exit_namespace();
        assert_eq!(scope.local_prefix(), "");
    }

    #[test]
    fn test_qualified_name_resolves_after_namespace_closes() {
        let reg = TypeRegistry::new();
        let mut scope = ScopeStack::new();
        scope.enter_namespace("math");
        scope
            .add_variable(C3Variable {
                ty: reg.int64(),
                name: "pi_ish".into(),
                global_name: "math::pi_ish".into(),
                declared_at: Span::default(),
            })
            .unwrap();
        scope.exit_namespace();
        assert!(scope.lookup_variable("math::pi_ish").is_some());
        assert!(scope.lookup_variable("pi_ish").is_some());
    }
}
