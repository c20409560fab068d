//! Compilation pipeline.
//!
//! Drives one run through `Idle → GatherReferences → InitialCompile → Fixup →
//! Emit → Succeeded`, failing out of any non-terminal state. Before the
//! pipeline starts, discovery runs and the cache gate decides whether the
//! existing output is still current.

use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::cache::{manifest_path, CacheManifest};
use crate::codegen::{self, render_metadata, BuildMetadata, METADATA_UNIT};
use crate::compilation::{Compilation, SharedCompilation, StaleTree, SyntaxTree};
use crate::config::{BuildConfiguration, CompilerConfig};
use crate::diagnostics::{CompilerError, SourceLocation, ERR_NOT_A_VIEW, ERR_SEMANTIC, ERR_WORKING_DIR};
use crate::discovery::{Discovery, WrapperInfo};
use crate::emit::{emit, write_image, EmitOptions, LoadedModule};
use crate::fixup::{fixup_tree, BindingOutcome};
use crate::host::HostContext;
use crate::references::{default_locators, gather, ReferenceLocator};

pub const ERROR_LOG: &str = "errors.log";
pub const SINGLE_VIEW_PATH: &str = "InputView.view";
const DEFAULT_WORKING_DIR: &str = "view-compiler";
const RUN_DIR_PREFIX: &str = "run-";

// ═══════════════════════════════════════════════════════════════════════════════
// STATE MACHINE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineState {
    Idle,
    GatherReferences,
    InitialCompile,
    Fixup,
    Emit,
    Succeeded,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Succeeded | PipelineState::Failed)
    }

    pub fn can_advance_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Idle, GatherReferences)
                | (GatherReferences, InitialCompile)
                | (InitialCompile, Fixup)
                | (Fixup, Emit)
                | (Emit, Succeeded)
        )
    }
}

/// One run through the state machine. `stages` lists every state entered
/// after `Idle`.
struct Run {
    state: PipelineState,
    stages: Vec<PipelineState>,
}

impl Run {
    fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            stages: Vec::new(),
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!("[ViewCompiler] {:?} -> {:?}", self.state, next);
        self.state = next;
        self.stages.push(next);
    }

    fn fail(mut self, errors: Vec<CompilerError>, wrappers: Vec<WrapperInfo>) -> CompileResult {
        self.advance(PipelineState::Failed);
        let count = errors.iter().filter(|e| e.is_error()).count();
        tracing::warn!("[ViewCompiler] Compilation failed with {} errors", count);
        CompileResult {
            success: false,
            message: format!("Compilation failed with {} errors", count),
            errors,
            module: None,
            generated_source: None,
            cache_hit: false,
            stages: self.stages,
            wrappers,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS & RESULT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileOptions {
    /// Load the module into memory instead of writing it.
    pub generate_in_memory: bool,
    pub use_temp_working_dir: bool,
    pub write_errors_to_file: bool,
    pub ignore_cache: bool,
    pub generate_debug_info: bool,
    pub keep_generated_files: bool,
    pub working_dir: Option<PathBuf>,
    /// Output for `compile_single_view`; in-memory when absent.
    pub output_path: Option<PathBuf>,
    pub configuration: BuildConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResult {
    pub success: bool,
    pub message: String,
    pub errors: Vec<CompilerError>,
    #[serde(skip)]
    pub module: Option<LoadedModule>,
    pub generated_source: Option<String>,
    pub cache_hit: bool,
    pub stages: Vec<PipelineState>,
    #[serde(skip)]
    pub wrappers: Vec<WrapperInfo>,
}

impl CompileResult {
    fn up_to_date(wrappers: Vec<WrapperInfo>) -> Self {
        Self {
            success: true,
            message: "Output is up to date".to_string(),
            errors: Vec::new(),
            module: None,
            generated_source: None,
            cache_hit: true,
            stages: Vec::new(),
            wrappers,
        }
    }

    fn discovery_failed(errors: Vec<CompilerError>) -> Self {
        Run::new().fail(errors, Vec::new())
    }
}

/// Working directory for one run. A temporary directory is removed on drop.
///
/// `refs_root` is where the working-directory reference fallback looks. It is
/// the run directory itself, except in the default layout where every run gets
/// its own subdirectory of the shared `<temp>/view-compiler` root.
struct WorkingDir {
    path: PathBuf,
    refs_root: PathBuf,
    _temp: Option<TempDir>,
}

impl WorkingDir {
    fn resolve(options: &CompileOptions) -> Result<Self, CompilerError> {
        let io_error = |path: &Path, e: std::io::Error| {
            CompilerError::new(
                ERR_WORKING_DIR,
                &format!("cannot prepare working directory {}: {}", path.display(), e),
                "",
                SourceLocation::default(),
            )
        };

        if let Some(dir) = &options.working_dir {
            fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
            return Ok(Self {
                path: dir.clone(),
                refs_root: dir.clone(),
                _temp: None,
            });
        }

        let (temp, refs_root) = if options.use_temp_working_dir {
            let temp = TempDir::new().map_err(|e| io_error(&std::env::temp_dir(), e))?;
            let root = temp.path().to_path_buf();
            (temp, root)
        } else {
            let root = std::env::temp_dir().join(DEFAULT_WORKING_DIR);
            fs::create_dir_all(&root).map_err(|e| io_error(&root, e))?;
            let temp = tempfile::Builder::new()
                .prefix(RUN_DIR_PREFIX)
                .tempdir_in(&root)
                .map_err(|e| io_error(&root, e))?;
            (temp, root)
        };

        if options.keep_generated_files {
            return Ok(Self {
                path: temp.into_path(),
                refs_root,
                _temp: None,
            });
        }
        Ok(Self {
            path: temp.path().to_path_buf(),
            refs_root,
            _temp: Some(temp),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ViewCompiler<'h> {
    host: &'h HostContext,
    config: CompilerConfig,
    locators: Vec<Box<dyn ReferenceLocator>>,
}

impl<'h> ViewCompiler<'h> {
    pub fn new(host: &'h HostContext, config: CompilerConfig) -> Self {
        Self {
            host,
            config,
            locators: default_locators(),
        }
    }

    pub fn with_locators(mut self, locators: Vec<Box<dyn ReferenceLocator>>) -> Self {
        self.locators = locators;
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compiles every view under `input_root` plus the host's templates into
    /// one module at `output_path` (or in memory).
    pub fn compile(&self, input_root: &Path, output_path: &Path, options: &CompileOptions) -> CompileResult {
        tracing::info!("[ViewCompiler] Compiling views under {:?}", input_root);
        let discovery = Discovery::new(self.host, &self.config);
        let mut views = discovery.find_views(input_root);
        views.extend(discovery.find_templates());

        let results: Vec<_> = views
            .into_par_iter()
            .map(|view| discovery.build_wrapper(view))
            .collect();

        let mut wrappers = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(wrapper) => wrappers.push(wrapper),
                Err(e) => {
                    tracing::warn!("[Discovery] {}", e);
                    errors.push(e.to_compiler_error());
                }
            }
        }
        if !errors.is_empty() {
            return CompileResult::discovery_failed(errors);
        }

        let output = (!options.generate_in_memory).then_some(output_path);
        self.run(wrappers, output, options)
    }

    /// Compiles one view given as markup text.
    ///
    /// # Panics
    ///
    /// Panics if `input_text` is empty.
    pub fn compile_single_view(&self, input_text: &str, options: &CompileOptions) -> CompileResult {
        assert!(!input_text.is_empty(), "compile_single_view requires view markup");

        let discovery = Discovery::new(self.host, &self.config);
        let view = match discovery.view_from_source(input_text, SINGLE_VIEW_PATH) {
            Ok(Some(view)) => view,
            Ok(None) => {
                return CompileResult::discovery_failed(vec![CompilerError::new(
                    ERR_NOT_A_VIEW,
                    "input is not a binding view",
                    SINGLE_VIEW_PATH,
                    SourceLocation::new(1, 1),
                )])
            }
            Err(e) => return CompileResult::discovery_failed(vec![e]),
        };
        let wrapper = match discovery.build_wrapper(Arc::new(view)) {
            Ok(wrapper) => wrapper,
            Err(e) => return CompileResult::discovery_failed(vec![e.to_compiler_error()]),
        };

        let output = options
            .output_path
            .as_deref()
            .filter(|_| !options.generate_in_memory);
        let mut result = self.run(vec![wrapper], output, options);
        result.generated_source = result
            .wrappers
            .first()
            .map(|w| w.source_text.clone())
            .filter(|s| !s.is_empty());
        result
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RUN
    // ═══════════════════════════════════════════════════════════════════════════

    fn run(&self, mut wrappers: Vec<WrapperInfo>, output: Option<&Path>, options: &CompileOptions) -> CompileResult {
        let fresh = output.map(|_| CacheManifest::build(&self.config, self.host, &wrappers));
        if let (Some(output), Some(fresh)) = (output, &fresh) {
            if !options.ignore_cache && self.is_up_to_date(output, fresh) {
                tracing::info!("[Cache] {:?} is up to date", output);
                return CompileResult::up_to_date(wrappers);
            }
        }

        let mut run = Run::new();
        let working_dir = match WorkingDir::resolve(options) {
            Ok(dir) => dir,
            Err(e) => return run.fail(vec![e], wrappers),
        };

        // ── references ──
        run.advance(PipelineState::GatherReferences);
        let references = match gather(&wrappers, self.host, &self.config, &working_dir.refs_root, &self.locators) {
            Ok(references) => Arc::new(references),
            Err(e) => return run.fail(vec![e.to_compiler_error()], wrappers),
        };

        // ── initial compile ──
        run.advance(PipelineState::InitialCompile);
        let units = self.initial_units(&mut wrappers, options);
        if let Err(e) = write_units(&working_dir.path, &units) {
            return run.fail(vec![e], wrappers);
        }
        let trees: Vec<SyntaxTree> = units
            .par_iter()
            .map(|(name, text)| SyntaxTree::parse(name, text))
            .collect();
        let shared = SharedCompilation::new(Compilation::new(trees, references, self.host.shared_catalog()));

        // ── fixup ──
        run.advance(PipelineState::Fixup);
        let outcomes = match fixup_all(&shared) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                let error = CompilerError::new(ERR_SEMANTIC, &e.to_string(), "", SourceLocation::default());
                return run.fail(vec![error], wrappers);
            }
        };
        let outcome = shared.outcome();
        for wrapper in &mut wrappers {
            if let Some(tree) = outcome.artifact.tree(&wrapper.unit_name()) {
                wrapper.source_text = tree.text().to_string();
            }
            apply_outcomes(wrapper, &outcomes);
        }

        let errors: Vec<CompilerError> = outcome
            .diagnostics
            .iter()
            .map(|d| friendly(d, &wrappers))
            .collect();
        if options.write_errors_to_file {
            write_error_log(&working_dir.path, &errors);
        }
        if outcome.has_errors() {
            return run.fail(errors, wrappers);
        }

        // ── emit ──
        run.advance(PipelineState::Emit);
        let metadata = self.metadata(options);
        let emit_options = EmitOptions {
            base_address: self.config.emit.base_address,
            file_alignment: self.config.emit.file_alignment,
            debug_info: options.generate_debug_info,
        };
        let bytes = match emit(&outcome.artifact, &wrappers, &metadata, &emit_options) {
            Ok(bytes) => bytes,
            Err(e) => return run.fail(vec![e.to_compiler_error("")], wrappers),
        };

        let module = match output {
            Some(path) => {
                if let Err(e) = write_image(&bytes, path) {
                    return run.fail(vec![e.to_compiler_error(&path.display().to_string())], wrappers);
                }
                if let Some(fresh) = &fresh {
                    let manifest = manifest_path(path);
                    if let Err(e) = fresh.save(&manifest) {
                        tracing::warn!("[Cache] Failed to persist manifest: {}", e);
                    }
                }
                None
            }
            None => match LoadedModule::load(&bytes) {
                Ok(module) => Some(module),
                Err(e) => return run.fail(vec![e.to_compiler_error("")], wrappers),
            },
        };

        run.advance(PipelineState::Succeeded);
        if !options.keep_generated_files {
            remove_units(&working_dir.path, &units);
        }
        tracing::info!("[ViewCompiler] Compiled {} wrappers", wrappers.len());
        CompileResult {
            success: true,
            message: format!("Compiled {} views", wrappers.len()),
            errors,
            module,
            generated_source: None,
            cache_hit: false,
            stages: run.stages,
            wrappers,
        }
    }

    fn is_up_to_date(&self, output: &Path, fresh: &CacheManifest) -> bool {
        if !output.is_file() {
            return false;
        }
        match CacheManifest::load(&manifest_path(output)) {
            Ok(stored) => !stored.is_different(fresh),
            Err(e) => {
                tracing::debug!("[Cache] No usable manifest: {}", e);
                false
            }
        }
    }

    fn metadata(&self, options: &CompileOptions) -> BuildMetadata {
        BuildMetadata {
            tool_version: self.config.tool_version.clone(),
            configuration: options.configuration,
        }
    }

    /// Renders every wrapper with getters and setters forced on, plus the
    /// metadata unit. Returns `(unit name, text)` pairs.
    fn initial_units(&self, wrappers: &mut [WrapperInfo], options: &CompileOptions) -> Vec<(String, String)> {
        wrappers.par_iter_mut().for_each(|wrapper| {
            wrapper.for_each_mut(&mut |w| {
                for expr in &mut w.expressions {
                    expr.generate_getter = true;
                    expr.generate_setter = true;
                    expr.nullable_fixup = false;
                    expr.conversion_source = None;
                    expr.conversion_target = None;
                }
            });
            wrapper.source_text = codegen::render(wrapper, self.host, &self.config);
        });

        let mut units: Vec<(String, String)> = wrappers
            .iter()
            .map(|w| (w.unit_name(), w.source_text.clone()))
            .collect();
        units.push((METADATA_UNIT.to_string(), render_metadata(&self.metadata(options))));
        units
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs both fixup rewrites over every wrapper unit in parallel and publishes
/// the rewritten trees.
fn fixup_all(shared: &SharedCompilation) -> Result<Vec<BindingOutcome>, StaleTree> {
    let snapshot = shared.snapshot();
    let per_tree: Vec<Vec<BindingOutcome>> = snapshot
        .trees()
        .par_iter()
        .filter(|tree| tree.name() != METADATA_UNIT)
        .map(|tree| -> Result<Vec<BindingOutcome>, StaleTree> {
            let result = fixup_tree(&snapshot, tree);
            if let Some(rewritten) = result.tree {
                shared.replace_tree(tree, rewritten)?;
            }
            Ok(result.outcomes)
        })
        .collect::<Result<_, StaleTree>>()?;
    Ok(per_tree.into_iter().flatten().collect())
}

fn apply_outcomes(wrapper: &mut WrapperInfo, outcomes: &[BindingOutcome]) {
    wrapper.for_each_mut(&mut |w| {
        let class_name = w.class_name.clone();
        for expr in &mut w.expressions {
            let Some(outcome) = outcomes
                .iter()
                .find(|o| o.class_name == class_name && o.property_name == expr.property_name)
            else {
                continue;
            };
            expr.generate_getter = outcome.generate_getter;
            expr.generate_setter = outcome.generate_setter;
            expr.nullable_fixup = outcome.nullable_fixup;
            expr.conversion_source = outcome.conversion_source.clone();
            expr.conversion_target = outcome.conversion_target.clone();
        }
    });
}

/// Replaces temporary unit names with the wrapper's qualified name.
fn friendly(error: &CompilerError, wrappers: &[WrapperInfo]) -> CompilerError {
    let mut error = error.clone();
    if let Some(wrapper) = wrappers.iter().find(|w| w.unit_name() == error.file) {
        error.file = wrapper.qualified_name();
    }
    error
}

fn write_units(dir: &Path, units: &[(String, String)]) -> Result<(), CompilerError> {
    for (name, text) in units {
        let path = dir.join(name);
        fs::write(&path, text).map_err(|e| {
            CompilerError::new(
                ERR_WORKING_DIR,
                &format!("cannot write {}: {}", path.display(), e),
                name,
                SourceLocation::default(),
            )
        })?;
    }
    Ok(())
}

fn remove_units(dir: &Path, units: &[(String, String)]) {
    for (name, _) in units {
        if let Err(e) = fs::remove_file(dir.join(name)) {
            tracing::debug!("[ViewCompiler] Could not remove {}: {}", name, e);
        }
    }
}

fn write_error_log(dir: &Path, errors: &[CompilerError]) {
    let mut text = String::new();
    for error in errors.iter().filter(|e| e.is_error()) {
        text.push_str(&error.to_string());
        text.push('\n');
    }
    let path = dir.join(ERROR_LOG);
    if let Err(e) = fs::write(&path, text) {
        tracing::warn!("[ViewCompiler] Failed to write {:?}: {}", path, e);
    }
}
