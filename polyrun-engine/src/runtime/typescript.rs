//! TypeScript runtime: strip types with deno_ast, then run on V8

use super::{Job, JavaScriptRuntime, RunOutcome, Runtime};
use crate::limits::ResourceLimits;
use crate::Result;
use async_trait::async_trait;
use deno_ast::{
    EmitOptions, MediaType, ModuleSpecifier, ParseParams, SourceMapOption, TranspileModuleOptions,
    TranspileOptions,
};
use polyrun_common::Language;
use std::sync::OnceLock;

const SPECIFIER: &str = "file:///main.ts";

struct CompilerOptions {
    transpile: TranspileOptions,
    module: TranspileModuleOptions,
    emit: EmitOptions,
}

fn compiler_options() -> &'static CompilerOptions {
    static OPTIONS: OnceLock<CompilerOptions> = OnceLock::new();
    OPTIONS.get_or_init(|| {
        tracing::info!("Loading TypeScript compiler options");
        CompilerOptions {
            transpile: TranspileOptions::default(),
            module: TranspileModuleOptions::default(),
            emit: EmitOptions {
                source_map: SourceMapOption::None,
                ..Default::default()
            },
        }
    })
}

/// Transpile TypeScript source to JavaScript without type checking
pub fn transpile(source: &str) -> std::result::Result<String, String> {
    let specifier = ModuleSpecifier::parse(SPECIFIER).map_err(|e| e.to_string())?;
    let parsed = deno_ast::parse_module(ParseParams {
        specifier,
        text: source.into(),
        media_type: MediaType::TypeScript,
        capture_tokens: false,
        scope_analysis: false,
        maybe_syntax: None,
    })
    .map_err(|e| e.to_string())?;
    // Recoverable syntax errors still make the program invalid
    if let Some(diagnostic) = parsed.diagnostics().first() {
        return Err(diagnostic.to_string());
    }

    let options = compiler_options();
    let emitted = parsed
        .transpile(&options.transpile, &options.module, &options.emit)
        .map_err(|e| e.to_string())?;
    Ok(emitted.into_source().text)
}

/// Runs TypeScript by transpiling and delegating to [`JavaScriptRuntime`]
#[derive(Debug, Clone, Default)]
pub struct TypeScriptRuntime {
    javascript: JavaScriptRuntime,
}

impl TypeScriptRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self {
            javascript: JavaScriptRuntime::with_limits(limits),
        }
    }
}

#[async_trait]
impl Runtime for TypeScriptRuntime {
    async fn run(&self, mut job: Job) -> Result<RunOutcome> {
        match transpile(&job.code) {
            Ok(code) => {
                job.code = code;
                self.javascript.run(job).await
            }
            Err(diagnostic) => {
                tracing::debug!(request_id = %job.request_id, "TypeScript transpile failed");
                Ok(RunOutcome::CompileError(format!("Compile error: {}", diagnostic)))
            }
        }
    }

    fn name(&self) -> &str {
        "deno_ast+v8"
    }

    fn language(&self) -> Language {
        Language::TypeScript
    }

    async fn warm_up(&self) -> Result<()> {
        compiler_options();
        Ok(())
    }
}
