//! Reference Gathering
//!
//! Locates the runtime's standard-library reference directory through an
//! ordered list of strategies, then adds the assemblies each wrapper needs.

use rayon::prelude::*;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::{CompilerConfig, ReferenceConfig};
use crate::diagnostics::{CompilerError, SourceLocation, ERR_NO_REFERENCES};
use crate::discovery::WrapperInfo;
use crate::host::HostContext;

/// Every reference directory carries this manifest listing its assemblies.
pub const STDLIB_MANIFEST: &str = "stdlib.json";
pub const WORKING_DIR_REFS: &str = "refs";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("{0}")]
    NoReferences(String),
    #[error("failed to start reference acquisition '{command}': {source}")]
    AcquireSpawn {
        command: String,
        source: std::io::Error,
    },
    #[error("reference acquisition did not finish within {0:?}")]
    AcquireTimeout(Duration),
    #[error("reference acquisition failed with {0}")]
    AcquireFailed(ExitStatus),
    #[error("invalid reference manifest {path}: {reason}")]
    Manifest { path: String, reason: String },
}

impl EnvironmentError {
    pub fn to_compiler_error(&self) -> CompilerError {
        CompilerError::new(ERR_NO_REFERENCES, &self.to_string(), "", SourceLocation::default())
    }
}

#[derive(Debug, Deserialize)]
struct StdlibManifest {
    #[serde(default)]
    assemblies: Vec<String>,
}

/// Resolved reference set for one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReferenceSet {
    pub stdlib_dir: PathBuf,
    pub assemblies: BTreeSet<String>,
}

impl ReferenceSet {
    pub fn load(stdlib_dir: &Path) -> Result<Self, EnvironmentError> {
        let path = stdlib_dir.join(STDLIB_MANIFEST);
        let manifest_error = |reason: String| EnvironmentError::Manifest {
            path: path.display().to_string(),
            reason,
        };
        let text = fs::read_to_string(&path).map_err(|e| manifest_error(e.to_string()))?;
        let manifest: StdlibManifest =
            serde_json::from_str(&text).map_err(|e| manifest_error(e.to_string()))?;
        Ok(Self {
            stdlib_dir: stdlib_dir.to_path_buf(),
            assemblies: manifest.assemblies.into_iter().collect(),
        })
    }

    pub fn contains(&self, assembly: &str) -> bool {
        self.assemblies.contains(assembly)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOCATORS
// ═══════════════════════════════════════════════════════════════════════════════

pub struct LocateContext<'a> {
    pub config: &'a ReferenceConfig,
    pub runtime_version: &'a str,
    pub working_dir: &'a Path,
}

impl LocateContext<'_> {
    fn package_dir(&self) -> Option<PathBuf> {
        self.config.package_cache.as_ref().map(|cache| {
            cache
                .join(&self.config.runtime_name)
                .join(self.runtime_version)
        })
    }
}

pub trait ReferenceLocator: Send + Sync {
    fn name(&self) -> &'static str;
    fn locate(&self, ctx: &LocateContext) -> Result<Option<PathBuf>, EnvironmentError>;
}

fn has_stdlib(dir: &Path) -> bool {
    dir.join(STDLIB_MANIFEST).is_file()
}

pub struct PackageCacheLocator;

impl ReferenceLocator for PackageCacheLocator {
    fn name(&self) -> &'static str {
        "package-cache"
    }

    fn locate(&self, ctx: &LocateContext) -> Result<Option<PathBuf>, EnvironmentError> {
        Ok(ctx.package_dir().filter(|dir| has_stdlib(dir)))
    }
}

pub struct SdkLocator;

impl ReferenceLocator for SdkLocator {
    fn name(&self) -> &'static str {
        "sdk"
    }

    fn locate(&self, ctx: &LocateContext) -> Result<Option<PathBuf>, EnvironmentError> {
        Ok(ctx.config.sdk_root.clone().filter(|dir| has_stdlib(dir)))
    }
}

pub struct WorkingDirLocator;

impl ReferenceLocator for WorkingDirLocator {
    fn name(&self) -> &'static str {
        "working-dir"
    }

    fn locate(&self, ctx: &LocateContext) -> Result<Option<PathBuf>, EnvironmentError> {
        let dir = ctx.working_dir.join(WORKING_DIR_REFS);
        Ok(has_stdlib(&dir).then_some(dir))
    }
}

/// Runs the configured installer and waits a bounded time for it. A timeout is
/// a hard failure and the process is killed.
pub struct AcquireLocator;

impl ReferenceLocator for AcquireLocator {
    fn name(&self) -> &'static str {
        "acquire"
    }

    fn locate(&self, ctx: &LocateContext) -> Result<Option<PathBuf>, EnvironmentError> {
        let Some((program, args)) = ctx.config.acquire_command.split_first() else {
            return Ok(None);
        };
        let destination = ctx
            .package_dir()
            .unwrap_or_else(|| ctx.working_dir.join(WORKING_DIR_REFS));

        tracing::info!(
            "[References] Acquiring {} {} into {:?}",
            ctx.config.runtime_name,
            ctx.runtime_version,
            destination
        );
        let mut child = Command::new(program)
            .args(args)
            .env("VIEW_REFS_RUNTIME", &ctx.config.runtime_name)
            .env("VIEW_REFS_VERSION", ctx.runtime_version)
            .env("VIEW_REFS_DESTINATION", &destination)
            .spawn()
            .map_err(|source| EnvironmentError::AcquireSpawn {
                command: ctx.config.acquire_command.join(" "),
                source,
            })?;

        let timeout = Duration::from_secs(ctx.config.acquire_timeout_secs);
        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(EnvironmentError::AcquireTimeout(timeout));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    return Err(EnvironmentError::AcquireSpawn {
                        command: ctx.config.acquire_command.join(" "),
                        source,
                    })
                }
            }
        };

        if !status.success() {
            return Err(EnvironmentError::AcquireFailed(status));
        }
        Ok(has_stdlib(&destination).then_some(destination))
    }
}

pub fn default_locators() -> Vec<Box<dyn ReferenceLocator>> {
    vec![
        Box::new(PackageCacheLocator),
        Box::new(SdkLocator),
        Box::new(WorkingDirLocator),
        Box::new(AcquireLocator),
    ]
}

fn missing_references_message(runtime_name: &str, version: &str) -> String {
    let hint = if cfg!(target_os = "windows") {
        "install the reference pack from the SDK installer or set references.sdk_root"
    } else if cfg!(target_os = "macos") {
        "install the reference pack into ~/Library/Caches or set references.sdk_root"
    } else {
        "install the reference pack into the package cache or set references.sdk_root"
    };
    format!(
        "Could not find reference assemblies for {} {}: {}",
        runtime_name, version, hint
    )
}

/// Tries each locator in order and returns the first directory found.
pub fn locate_stdlib(
    locators: &[Box<dyn ReferenceLocator>],
    ctx: &LocateContext,
) -> Result<PathBuf, EnvironmentError> {
    for locator in locators {
        if let Some(dir) = locator.locate(ctx)? {
            tracing::debug!("[References] {} located {:?}", locator.name(), dir);
            return Ok(dir);
        }
    }
    Err(EnvironmentError::NoReferences(missing_references_message(
        &ctx.config.runtime_name,
        ctx.runtime_version,
    )))
}

// ═══════════════════════════════════════════════════════════════════════════════
// GATHERING
// ═══════════════════════════════════════════════════════════════════════════════

/// Assemblies one wrapper needs beyond the standard library.
fn wrapper_assemblies(wrapper: &WrapperInfo, host: &HostContext, config: &CompilerConfig) -> BTreeSet<String> {
    let catalog = host.catalog();
    let framework = config.framework_set();
    let mut out = BTreeSet::new();
    for w in wrapper.flatten() {
        for ty in catalog.base_chain(w.wrapped_type) {
            if catalog.is_framework(ty, &framework) {
                break;
            }
            out.insert(catalog.get(ty).assembly.clone());
        }
        out.extend(w.references.iter().cloned());
    }
    out
}

pub fn gather(
    wrappers: &[WrapperInfo],
    host: &HostContext,
    config: &CompilerConfig,
    working_dir: &Path,
    locators: &[Box<dyn ReferenceLocator>],
) -> Result<ReferenceSet, EnvironmentError> {
    let ctx = LocateContext {
        config: &config.references,
        runtime_version: host.runtime_version(),
        working_dir,
    };
    let stdlib_dir = locate_stdlib(locators, &ctx)?;
    let mut set = ReferenceSet::load(&stdlib_dir)?;

    let extra = wrappers
        .par_iter()
        .map(|w| wrapper_assemblies(w, host, config))
        .reduce(BTreeSet::new, |mut a, b| {
            a.extend(b);
            a
        });
    set.assemblies.extend(extra);

    tracing::info!(
        "[References] {} assemblies referenced from {:?}",
        set.assemblies.len(),
        set.stdlib_dir
    );
    Ok(set)
}
