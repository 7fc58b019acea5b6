//! Orchestrates preprocess -> parse -> lower -> (optional) emit, owning
//! error reporting and the process exit-code policy.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context as _};
use inkwell::context::Context;
use log::{error, info};

use crate::lexer::{self, Token};
use crate::lower::CodegenContext;
use crate::parser::{self, ParseError};
use crate::types::TypeRegistry;

pub struct BuildOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub dump_tokens: bool,
    pub dump_ast: bool,
    pub dump_ir: bool,
}

fn preprocess(path: &Path) -> anyhow::Result<Vec<Token>> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let tokens = lexer::tokenize(&path.display().to_string(), &source)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(tokens)
}

/// Builds the `import` collaborator closure: resolves `modules/NAME/NAME.c3`
/// relative to the working directory and re-runs the lexer on it.
fn make_import_fn() -> Box<dyn FnMut(&str) -> Result<Vec<Token>, ParseError> + 'static> {
    Box::new(|module_path: &str| {
        let path = PathBuf::from(module_path);
        let source = fs::read_to_string(&path).map_err(|e| {
            ParseError::eof(format!("failed to import '{module_path}': {e}"))
        })?;
        lexer::tokenize(module_path, &source)
            .map_err(|e| ParseError::eof(format!("failed to import '{module_path}': {e}")))
    })
}

pub fn run(opts: BuildOptions) -> anyhow::Result<()> {
    info!("preprocessing {}", opts.input.display());
    let tokens = preprocess(&opts.input)?;
    if opts.dump_tokens {
        for tok in &tokens {
            println!("{:?} {:?}", tok.kind, tok.value);
        }
    }

    info!("parsing");
    let registry = TypeRegistry::new();
    let (program, _scope, _registry) =
        match parser::parse_program(tokens, registry, make_import_fn()) {
            Ok(result) => result,
            Err(errors) => {
                for e in &errors {
                    error!("{e}");
                }
                bail!("{} parse error(s)", errors.len());
            }
        };

    if opts.dump_ast {
        match serde_json::to_string_pretty(&program) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("failed to serialize AST: {e}"),
        }
    }

    info!("lowering");
    let context = Context::create();
    let module_name = opts
        .input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("module");
    let codegen = CodegenContext::new(&context, module_name);
    codegen
        .lower_program(&program)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if let Err(message) = codegen.module.verify() {
        error!("IR verification failed: {message}");
        bail!("IR verification failed");
    }

    if opts.dump_ir {
        println!("{}", codegen.module.print_to_string().to_string());
    }

    let Some(output) = opts.output else {
        println!("{}", codegen.module.print_to_string().to_string());
        return Ok(());
    };

    info!("emitting {}", output.display());
    let ir_path = output.with_extension("ll");
    codegen
        .module
        .print_to_file(&ir_path)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let llc = Command::new("llc")
        .arg(&ir_path)
        .arg("-o")
        .arg("-")
        .output()
        .context("failed to invoke llc")?;
    if !llc.status.success() {
        bail!("llc failed: {}", String::from_utf8_lossy(&llc.stderr));
    }

    let clang_status = Command::new("clang")
        .args(["-x", "assembler", "-nostdlib", "-lSystem", "-", "-o"])
        .arg(&output)
        .stdin(std::process::Stdio::piped())
        .spawn()
        .and_then(|mut child| {
            use std::io::Write;
            child
                .stdin
                .take()
                .expect("clang stdin")
                .write_all(&llc.stdout)?;
            child.wait()
        })
        .context("failed to invoke clang")?;

    if !clang_status.success() {
        bail!("clang failed to assemble/link '{}'", output.display());
    }

    Ok(())
}
