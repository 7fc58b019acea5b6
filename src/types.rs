//! Type Registry: interns primitive, pointer, function, and struct types and
//! manages forward-declared (opaque) struct completion.
//!
//! A `Type` is a cheaply-clonable handle (`Rc`) around a `TypeData` cell so
//! that an opaque struct's body can be materialized in place and every
//! existing reference to it observes the completed definition.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, serde::Serialize)]
pub struct FunctionSignature {
    pub return_type: Type,
    pub params: Vec<Type>,
}

impl FunctionSignature {
    pub fn new(return_type: Type, params: Vec<Type>) -> Self {
        FunctionSignature {
            return_type,
            params,
        }
    }

    /// Canonical string form used as the function type's display name.
    pub fn canonical_name(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.name().to_string()).collect();
        format!("fn({}) -> {}", params.join(", "), self.return_type.name())
    }
}

impl PartialEq for FunctionSignature {
    fn eq(&self, other: &Self) -> bool {
        self.return_type == other.return_type
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(other.params.iter())
                .all(|(a, b)| a == b)
    }
}

impl fmt::Debug for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructDefinition {
    pub fields: Vec<(String, Type)>,
}

impl StructDefinition {
    pub fn new(fields: Vec<(String, Type)>) -> Self {
        StructDefinition { fields }
    }

    /// Packed layout: size is simply the sum of field sizes (see design notes
    /// on the struct layout model).
    pub fn size(&self) -> u64 {
        self.fields.iter().map(|(_, t)| t.size()).sum()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }
}

enum TypeKind {
    Void,
    Bool,
    Int8,
    Int32,
    Int64,
    Double,
    Pointer(Type),
    Function(FunctionSignature),
    Struct {
        name: String,
        global_name: String,
        definition: RefCell<Option<StructDefinition>>,
    },
}

struct TypeData {
    kind: TypeKind,
    /// memoized `T*` for this type, populated lazily by `pointer_to`.
    pointer: RefCell<Option<Type>>,
}

/// Cheaply-clonable handle to an interned type.
#[derive(Clone)]
pub struct Type(Rc<TypeData>);

impl Type {
    fn new(kind: TypeKind) -> Self {
        Type(Rc::new(TypeData {
            kind,
            pointer: RefCell::new(None),
        }))
    }

    pub fn name(&self) -> String {
        match &self.0.kind {
            TypeKind::Void => "void".to_string(),
            TypeKind::Bool => "bool".to_string(),
            TypeKind::Int8 => "char".to_string(),
            TypeKind::Int32 => "int32".to_string(),
            TypeKind::Int64 => "int64".to_string(),
            TypeKind::Double => "double".to_string(),
            TypeKind::Pointer(inner) => format!("{}*", inner.name()),
            TypeKind::Function(sig) => sig.canonical_name(),
            TypeKind::Struct { name, .. } => name.clone(),
        }
    }

    pub fn global_name(&self) -> String {
        match &self.0.kind {
            TypeKind::Struct { global_name, .. } => global_name.clone(),
            _ => self.name(),
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.0.kind, TypeKind::Pointer(_))
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.0.kind, TypeKind::Struct { .. })
    }

    pub fn is_void(&self) -> bool {
        matches!(self.0.kind, TypeKind::Void)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.0.kind, TypeKind::Bool)
    }

    pub fn is_int8(&self) -> bool {
        matches!(self.0.kind, TypeKind::Int8)
    }

    pub fn is_int32(&self) -> bool {
        matches!(self.0.kind, TypeKind::Int32)
    }

    pub fn is_int64(&self) -> bool {
        matches!(self.0.kind, TypeKind::Int64)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.0.kind,
            TypeKind::Int8 | TypeKind::Int32 | TypeKind::Int64 | TypeKind::Bool
        )
    }

    pub fn is_floating_point(&self) -> bool {
        matches!(self.0.kind, TypeKind::Double)
    }

    /// Hardcoded true for every integer type. An unsigned modifier is
    /// declared in the source grammar but never wired to anything.
    pub fn is_signed(&self) -> bool {
        true
    }

    pub fn pointee(&self) -> Option<Type> {
        match &self.0.kind {
            TypeKind::Pointer(inner) => Some(inner.clone()),
            _ => None,
        }
    }

    pub fn signature(&self) -> Option<&FunctionSignature> {
        match &self.0.kind {
            TypeKind::Function(sig) => Some(sig),
            _ => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        match &self.0.kind {
            TypeKind::Struct { definition, .. } => definition.borrow().is_some(),
            _ => true,
        }
    }

    pub fn struct_definition(&self) -> Option<StructDefinition> {
        match &self.0.kind {
            TypeKind::Struct { definition, .. } => definition.borrow().clone(),
            _ => None,
        }
    }

    /// int32 is reported as size 8, not 4; int64 is likewise 8. Kept as-is.
    pub fn size(&self) -> u64 {
        match &self.0.kind {
            TypeKind::Pointer(_) | TypeKind::Function(_) => 8,
            TypeKind::Struct { definition, .. } => definition
                .borrow()
                .as_ref()
                .map(StructDefinition::size)
                .unwrap_or(0),
            TypeKind::Void => 0,
            TypeKind::Bool | TypeKind::Int8 => 1,
            TypeKind::Int32 => 8,
            TypeKind::Int64 => 8,
            TypeKind::Double => 8,
        }
    }

    fn identity(&self) -> *const TypeData {
        Rc::as_ptr(&self.0)
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0.kind, &other.0.kind) {
            (TypeKind::Void, TypeKind::Void) => true,
            (TypeKind::Bool, TypeKind::Bool) => true,
            (TypeKind::Int8, TypeKind::Int8) => true,
            (TypeKind::Int32, TypeKind::Int32) => true,
            (TypeKind::Int64, TypeKind::Int64) => true,
            (TypeKind::Double, TypeKind::Double) => true,
            (TypeKind::Pointer(a), TypeKind::Pointer(b)) => a == b,
            (TypeKind::Function(a), TypeKind::Function(b)) => a == b,
            (
                TypeKind::Struct { global_name: a, .. },
                TypeKind::Struct { global_name: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}

impl Eq for Type {}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Debug-dump support only: serializes as the type's display name, not its
/// full structure (the graph is cyclic for self-referential structs).
impl serde::Serialize for Type {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.name())
    }
}

#[derive(Debug, Clone)]
pub struct DefineError {
    pub global_name: String,
}

impl fmt::Display for DefineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "struct '{}' is already defined", self.global_name)
    }
}

impl std::error::Error for DefineError {}

/// Interns the primitive singletons and mints pointer/function/struct types.
pub struct TypeRegistry {
    void: Type,
    bool_: Type,
    int8: Type,
    int32: Type,
    int64: Type,
    double: Type,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry {
            void: Type::new(TypeKind::Void),
            bool_: Type::new(TypeKind::Bool),
            int8: Type::new(TypeKind::Int8),
            int32: Type::new(TypeKind::Int32),
            int64: Type::new(TypeKind::Int64),
            double: Type::new(TypeKind::Double),
        }
    }

    pub fn void(&self) -> Type {
        self.void.clone()
    }

    pub fn bool(&self) -> Type {
        self.bool_.clone()
    }

    pub fn int8(&self) -> Type {
        self.int8.clone()
    }

    pub fn int32(&self) -> Type {
        self.int32.clone()
    }

    pub fn int64(&self) -> Type {
        self.int64.clone()
    }

    pub fn double(&self) -> Type {
        self.double.clone()
    }

    /// Memoized on the pointee: the same inner type handle always yields the
    /// same pointer handle by reference identity.
    pub fn pointer_to(&self, inner: &Type) -> Type {
        if let Some(existing) = inner.0.pointer.borrow().as_ref() {
            return existing.clone();
        }
        let ptr = Type::new(TypeKind::Pointer(inner.clone()));
        *inner.0.pointer.borrow_mut() = Some(ptr.clone());
        ptr
    }

    /// Not deduplicated: the caller compares by signature.
    pub fn function(&self, sig: FunctionSignature) -> Type {
        Type::new(TypeKind::Function(sig))
    }

    pub fn struct_decl(&self, name: impl Into<String>, global_name: impl Into<String>) -> Type {
        Type::new(TypeKind::Struct {
            name: name.into(),
            global_name: global_name.into(),
            definition: RefCell::new(None),
        })
    }

    pub fn struct_def(
        &self,
        name: impl Into<String>,
        global_name: impl Into<String>,
        definition: StructDefinition,
    ) -> Type {
        Type::new(TypeKind::Struct {
            name: name.into(),
            global_name: global_name.into(),
            definition: RefCell::new(Some(definition)),
        })
    }

    /// Transitions opaque -> defined in place. Defining an already-defined
    /// struct is a hard error.
    pub fn define(&self, struct_type: &Type, definition: StructDefinition) -> Result<(), DefineError> {
        match &struct_type.0.kind {
            TypeKind::Struct {
                definition: slot,
                global_name,
                ..
            } => {
                if slot.borrow().is_some() {
                    return Err(DefineError {
                        global_name: global_name.clone(),
                    });
                }
                *slot.borrow_mut() = Some(definition);
                Ok(())
            }
            _ => unreachable!("define() called on a non-struct type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_identity() {
        let reg = TypeRegistry::new();
        assert_eq!(reg.int64(), reg.int64());
        assert_eq!(reg.void(), reg.void());
    }

    #[test]
    fn test_pointer_memoization() {
        let reg = TypeRegistry::new();
        let int64 = reg.int64();
        let p1 = reg.pointer_to(&int64);
        let p2 = reg.pointer_to(&int64);
        assert_eq!(p1.identity(), p2.identity());
    }

    #[test]
    fn test_int32_size_is_eight() {
        let reg = TypeRegistry::new();
        assert_eq!(reg.int32().size(), 8);
    }

    #[test]
    fn test_is_signed_always_true() {
        let reg = TypeRegistry::new();
        assert!(reg.int8().is_signed());
        assert!(reg.int64().is_signed());
    }

    #[test]
    fn test_struct_equality_by_global_name() {
        let reg = TypeRegistry::new();
        let a = reg.struct_decl("Node", "Node");
        let b = reg.struct_decl("Node", "Node");
        assert_eq!(a, b);
    }

    #[test]
    fn test_opaque_struct_define_once() {
        let reg = TypeRegistry::new();
        let s = reg.struct_decl("Node", "Node");
        assert!(!s.is_defined());
        reg.define(&s, StructDefinition::new(vec![("v".into(), reg.int64())]))
            .unwrap();
        assert!(s.is_defined());
        let err = reg
            .define(&s, StructDefinition::new(vec![]))
            .unwrap_err();
        assert_eq!(err.global_name, "Node");
    }

    #[test]
    fn test_self_referential_struct_via_pointer() {
        let reg = TypeRegistry::new();
        let node = reg.struct_decl("Node", "Node");
        let node_ptr = reg.pointer_to(&node);
        reg.define(
            &node,
            StructDefinition::new(vec![
                ("next".into(), node_ptr.clone()),
                ("v".into(), reg.int64()),
            ]),
        )
        .unwrap();
        assert!(node.is_defined());
        assert_eq!(node_ptr.pointee().unwrap(), node);
    }
}
