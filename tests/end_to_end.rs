use inkwell::context::Context;

use c3c::lexer::tokenize;
use c3c::lower::CodegenContext;
use c3c::parser::{parse_program, ParseError};
use c3c::types::TypeRegistry;

fn lower_source(source: &str) -> Result<String, Vec<ParseError>> {
    let tokens = tokenize("test.c3", source).expect("lexing should not fail");
    let registry = TypeRegistry::new();
    let import_fn: Box<dyn FnMut(&str) -> Result<Vec<_>, ParseError>> =
        Box::new(|path| Err(ParseError::eof(format!("unexpected import of '{path}'"))));
    let (program, _scope, _registry) = parse_program(tokens, registry, import_fn)?;

    let context = Context::create();
    let codegen = CodegenContext::new(&context, "test");
    codegen.lower_program(&program).expect("lowering should succeed");
    codegen.module.verify().expect("module should verify");
    Ok(codegen.module.print_to_string().to_string())
}

#[test]
fn test_scenario_return_constant() {
    let ir = lower_source("int64 main() { return 42; }").unwrap();
    assert!(ir.contains("define i64 @main"));
}

#[test]
fn test_scenario_self_referential_struct() {
    let ir = lower_source("struct Node { Node* next; int64 v; }").unwrap();
    assert!(ir.contains("%Node"));
}

#[test]
fn test_scenario_function_call_no_widening() {
    let ir = lower_source(
        "int64 add(int64 a, int64 b) { return a + b; } int64 main() { int64 x = add(1, 2); return x; }",
    )
    .unwrap();
    assert!(ir.contains("call i64 @add"));
}

#[test]
fn test_scenario_char_widened_to_int64() {
    let ir = lower_source("int64 main() { char c = 'A'; int64 n = c + 1; return n; }").unwrap();
    assert!(ir.contains("sext") || ir.contains("zext"));
}

#[test]
fn test_scenario_if_else_three_blocks() {
    let ir = lower_source(
        "int64 main() { int64 y = 0; int64 x = 0; if (x == 0) { y = 1; } else { y = 2; } return y; }",
    )
    .unwrap();
    assert!(ir.contains("if.true"));
    assert!(ir.contains("if.false"));
    assert!(ir.contains("if.post"));
}

#[test]
fn test_scenario_while_loop_blocks() {
    let ir = lower_source(
        "int64 main() { int64 i = 0; int64 n = 10; while (i < n) { i = i + 1; } return i; }",
    )
    .unwrap();
    assert!(ir.contains("while.cond"));
    assert!(ir.contains("while.body"));
    assert!(ir.contains("while.break"));
}

#[test]
fn test_addr_of_requires_lvalue_and_yields_pointer_type() {
    let ir = lower_source("int64 main() { int64 x = 0; int64* p = &x; return *p; }").unwrap();
    assert!(ir.contains("define i64 @main"));
}

#[test]
fn test_repeated_prototype_is_single_symbol_table_entry() {
    let ir = lower_source(
        "int64 f(); int64 f(); int64 f() { return 1; } int64 main() { return f(); }",
    )
    .unwrap();
    assert_eq!(ir.matches("define i64 @f(").count(), 1);
}

#[test]
fn test_inner_block_shadowing_does_not_clobber_outer_variable() {
    let ir = lower_source(
        "int64 foo() { int64 y = 0; if (y == 0) { int64 y = 1; } return y; }",
    )
    .unwrap();
    assert_eq!(ir.matches("alloca i64").count(), 3);
}

#[test]
fn test_namespaced_functions_with_same_local_name_stay_distinct() {
    let ir = lower_source(
        "namespace a { int64 f() { return 1; } } namespace b { int64 f() { return 2; } } int64 main() { return a::f() + b::f(); }",
    )
    .unwrap();
    assert!(ir.contains("define i64 @a.f"));
    assert!(ir.contains("define i64 @b.f"));
}

#[test]
fn test_qualified_name_resolves_namespaced_type() {
    let ir = lower_source(
        "namespace shapes { struct Point { int64 x; int64 y; } } int64 main() { shapes::Point p; return 0; }",
    )
    .unwrap();
    assert!(ir.contains("define i64 @main"));
}

#[test]
fn test_namespace_cannot_shadow_existing_name() {
    let tokens = tokenize("test.c3", "int64 foo() { return 1; } namespace foo { int64 f() { return 1; } }").unwrap();
    let registry = TypeRegistry::new();
    let import_fn: Box<dyn FnMut(&str) -> Result<Vec<_>, ParseError>> =
        Box::new(|path| Err(ParseError::eof(format!("unexpected import of '{path}'"))));
    let result = parse_program(tokens, registry, import_fn);
    assert!(result.is_err());
}

#[test]
fn test_duplicate_function_definition_reports_single_error() {
    let tokens = tokenize(
        "test.c3",
        "int64 f() { return 1; } double f() { return 1.0; }",
    )
    .unwrap();
    let registry = TypeRegistry::new();
    let import_fn: Box<dyn FnMut(&str) -> Result<Vec<_>, ParseError>> =
        Box::new(|path| Err(ParseError::eof(format!("unexpected import of '{path}'"))));
    let result = parse_program(tokens, registry, import_fn);
    let errors = result.expect_err("mismatched redeclaration should fail to parse");
    assert_eq!(errors.len(), 1);
}
