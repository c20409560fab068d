//! # View Binding Compiler
//!
//! Compiles declarative markup views into strongly-typed wrapper classes.
//!
//! ## Pipeline
//!
//! 1. **Discovery**: view files and host templates are parsed, and every
//!    `{{Binding Path}}` expression is resolved to a bindable target property.
//! 2. **Cache gate**: a manifest of markup and type-signature digests next to
//!    the output decides whether anything changed since the last build.
//! 3. **Generation**: one TypeScript unit per view, one wrapper class per view
//!    or template region, plus a build metadata unit.
//! 4. **Fixup**: the generated units are compiled against the host type graph;
//!    getters that need a nullable unwrap or an explicit conversion are
//!    rewritten and setters that cannot round-trip are removed.
//! 5. **Emit**: the final compilation is written as a module image, or loaded
//!    directly into memory.
//!
//! ## Invariants
//!
//! - Rendering is a pure function of `WrapperInfo`, so the fixed-up text of a
//!   unit equals a fresh render with the updated binding flags.
//! - `SharedCompilation::replace_tree` is the only way a published
//!   compilation changes.
//! - A failed run never writes an output module.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod cache;
mod codegen;
mod compilation;
mod config;
mod diagnostics;
mod discovery;
mod emit;
mod fixup;
mod host;
mod markup;
mod pipeline;
mod references;
mod semantic;
mod syntax;
mod types;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod discovery_tests;
#[cfg(test)]
mod pipeline_tests;

pub use cache::{digest, manifest_path, type_closure, type_signature, CacheError, CacheManifest};
pub use codegen::{render, render_metadata, BuildMetadata};
pub use compilation::{Compilation, CompileOutcome, SharedCompilation, StaleTree, SyntaxTree};
pub use config::{BuildConfiguration, CompilerConfig, ConfigError, EmitConfig, ReferenceConfig};
pub use diagnostics::*;
pub use discovery::{
    BindingExpressionInfo, ContentKind, Discovery, DiscoveryError, DiscoveryErrorKind, ViewDefinition,
    WrapperInfo,
};
pub use emit::{BindingEntry, BindingTable, EmitError, LoadedModule, ModuleUnit};
pub use fixup::BindingOutcome;
pub use host::{HostContext, HostError, HostManifest, InMemoryTemplates, TemplateEntry, TemplateRegistry};
pub use markup::{parse_markup, MarkupElement};
pub use pipeline::{CompileOptions, CompileResult, PipelineState, ViewCompiler};
pub use references::{
    default_locators, AcquireLocator, EnvironmentError, LocateContext, PackageCacheLocator,
    ReferenceLocator, ReferenceSet, SdkLocator, WorkingDirLocator,
};
pub use syntax::{BindingSyntax, ExpressionSyntax};
pub use types::{Conversion, TypeCatalog, TypeDecl, TypeId};

/// Compiles a directory of views for a Node host. Returns the `CompileResult`
/// as JSON.
#[cfg(feature = "napi")]
#[napi]
pub fn compile_views_native(
    input_root: String,
    output_path: String,
    host_manifest_json: String,
    config_toml: Option<String>,
    ignore_cache: Option<bool>,
) -> napi::Result<String> {
    let host = HostContext::from_json(&host_manifest_json)
        .map_err(|e| napi::Error::from_reason(format!("Invalid host manifest: {}", e)))?;
    let config = match config_toml {
        Some(text) => CompilerConfig::from_toml(&text)
            .map_err(|e| napi::Error::from_reason(format!("Invalid config: {}", e)))?,
        None => CompilerConfig::default(),
    };
    let options = CompileOptions {
        ignore_cache: ignore_cache.unwrap_or(false),
        use_temp_working_dir: true,
        write_errors_to_file: false,
        ..CompileOptions::default()
    };

    let result = ViewCompiler::new(&host, config).compile(
        std::path::Path::new(&input_root),
        std::path::Path::new(&output_path),
        &options,
    );
    serde_json::to_string(&result)
        .map_err(|e| napi::Error::from_reason(format!("Failed to serialize result: {}", e)))
}
