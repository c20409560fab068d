//! Incremental build cache.
//!
//! A manifest records one SHA-1 digest per view (over its canonical markup)
//! and per non-framework type reachable from the wrapped types (over its public
//! signature). A build is skipped when the stored manifest matches a freshly
//! built one.

use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::CompilerConfig;
use crate::discovery::WrapperInfo;
use crate::host::HostContext;
use crate::types::{MemberKind, TypeCatalog, TypeId, TypeShape};

pub const COMPILER_LINE_PREFIX: &str = "#compiler ";
pub const MANIFEST_EXTENSION: &str = "vcache";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache manifest {0} not found")]
    NotFound(String),
    #[error("malformed cache manifest at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("failed to access cache manifest {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// `<output>.vcache`, next to the emitted module.
pub fn manifest_path(output: &Path) -> PathBuf {
    let mut path = output.as_os_str().to_owned();
    path.push(".");
    path.push(MANIFEST_EXTENSION);
    PathBuf::from(path)
}

pub fn digest(text: &str) -> String {
    format!("{:x}", Sha1::digest(text.as_bytes()))
}

fn is_digest(text: &str) -> bool {
    text.len() == 40 && text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

// ═══════════════════════════════════════════════════════════════════════════════
// MANIFEST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheManifest {
    pub compiler_id: Option<String>,
    pub tool_version: String,
    pub runtime_version: String,
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl CacheManifest {
    pub fn new(compiler_id: Option<&str>, tool_version: &str, runtime_version: &str) -> Self {
        Self {
            compiler_id: compiler_id.map(str::to_string),
            tool_version: tool_version.to_string(),
            runtime_version: runtime_version.to_string(),
            ..Self::default()
        }
    }

    /// Appends a pair. Returns `false` and keeps the existing digest when the
    /// key is already present.
    pub fn insert(&mut self, key: &str, digest: &str) -> bool {
        if self.index.contains_key(key) {
            return false;
        }
        self.index.insert(key.to_string(), self.entries.len());
        self.entries.push((key.to_string(), digest.to_string()));
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|&i| self.entries[i].1.as_str())
    }

    /// Pairs in insertion order.
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn parse(text: &str) -> Result<Self, CacheError> {
        let mut lines = text.lines().enumerate().peekable();
        let malformed = |line: usize, reason: &str| CacheError::Malformed {
            line: line + 1,
            reason: reason.to_string(),
        };

        let compiler_id = match lines.peek() {
            Some((_, line)) if line.starts_with(COMPILER_LINE_PREFIX) => {
                let id = line[COMPILER_LINE_PREFIX.len()..].trim().to_string();
                lines.next();
                Some(id)
            }
            _ => None,
        };
        let (_, tool_version) = lines
            .next()
            .ok_or_else(|| malformed(0, "missing tool version"))?;
        let (_, runtime_version) = lines
            .next()
            .ok_or_else(|| malformed(1, "missing runtime version"))?;

        let mut manifest = Self::new(compiler_id.as_deref(), tool_version.trim(), runtime_version.trim());
        for (n, line) in lines {
            let line = line.trim_end();
            let (split, space) = line
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())
                .ok_or_else(|| malformed(n, "expected '<key> <digest>'"))?;
            let key = line[..split].trim_end();
            let value = &line[split + space.len_utf8()..];
            if key.is_empty() {
                return Err(malformed(n, "empty key"));
            }
            if !is_digest(value) {
                return Err(malformed(n, "digest must be 40 lowercase hex characters"));
            }
            if !manifest.insert(key, value) {
                return Err(malformed(n, &format!("duplicate key '{}'", key)));
            }
        }
        tracing::trace!("[Cache] Parsed {} entries", manifest.len());
        Ok(manifest)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.compiler_id {
            out.push_str(COMPILER_LINE_PREFIX);
            out.push_str(id);
            out.push('\n');
        }
        out.push_str(&self.tool_version);
        out.push('\n');
        out.push_str(&self.runtime_version);
        out.push('\n');
        for (key, digest) in &self.entries {
            out.push_str(key);
            out.push(' ');
            out.push_str(digest);
            out.push('\n');
        }
        out
    }

    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let text = fs::read_to_string(path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => CacheError::NotFound(path.display().to_string()),
            _ => CacheError::Io {
                path: path.display().to_string(),
                source,
            },
        })?;
        Self::parse(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        fs::write(path, self.to_text()).map_err(|source| CacheError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Symmetric comparison: versions, the union of keys, and digests.
    pub fn is_different(&self, other: &CacheManifest) -> bool {
        if self.tool_version != other.tool_version || self.runtime_version != other.runtime_version {
            return true;
        }
        let mine = self.entries.iter().any(|(k, d)| other.get(k) != Some(d.as_str()));
        let theirs = other.entries.iter().any(|(k, _)| self.get(k).is_none());
        mine || theirs
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BUILD
    // ═══════════════════════════════════════════════════════════════════════════

    /// Digests every view behind `wrappers`, then every type in the closure of
    /// their wrapped types.
    pub fn build(config: &CompilerConfig, host: &HostContext, wrappers: &[WrapperInfo]) -> Self {
        let catalog = host.catalog();
        let mut manifest = Self::new(
            config.compiler_id.as_deref(),
            &config.tool_version,
            host.runtime_version(),
        );

        let all: Vec<&WrapperInfo> = wrappers.iter().flat_map(|w| w.flatten()).collect();
        for wrapper in &all {
            let view = &wrapper.view;
            if manifest.get(&view.path).is_none() {
                manifest.insert(&view.path, &digest(&view.root.canonical_text()));
            }
        }

        let roots = all.iter().map(|w| w.wrapped_type);
        for ty in type_closure(catalog, roots, &config.framework_set()) {
            if let Some(name) = catalog.full_name(ty) {
                manifest.insert(name, &digest(&type_signature(catalog, ty)));
            }
        }
        tracing::debug!("[Cache] Built manifest with {} entries", manifest.len());
        manifest
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPE CLOSURE
// ═══════════════════════════════════════════════════════════════════════════════

/// Canonical string hashed for a type: its full name and base, then one line
/// per public member ordered by kind, name and signature. Inherited members are
/// covered by the base type's own entry.
pub fn type_signature(catalog: &TypeCatalog, id: TypeId) -> String {
    let ty = catalog.get(id);
    let mut lines: Vec<(MemberKind, &str, String)> = ty
        .members
        .iter()
        .filter(|m| m.is_public)
        .map(|m| (m.kind, m.name.as_str(), catalog.member_signature(m)))
        .collect();
    lines.sort();

    let mut out = ty.full_name.clone().unwrap_or_default();
    if let Some(base) = ty.base {
        out.push_str(" : ");
        out.push_str(&catalog.display_name(base));
    }
    for (kind, _, signature) in lines {
        out.push('\n');
        out.push_str(kind.label());
        out.push(' ');
        out.push_str(&signature);
    }
    out
}

/// Non-framework types reachable from `roots` through base types and public
/// member signatures, in visit order. Each type is visited once, so cycles
/// terminate.
pub fn type_closure(
    catalog: &TypeCatalog,
    roots: impl IntoIterator<Item = TypeId>,
    framework: &HashSet<String>,
) -> Vec<TypeId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    let mut work: VecDeque<TypeId> = roots.into_iter().collect();

    while let Some(mut ty) = work.pop_front() {
        let def = catalog.get(ty);
        if let (TypeShape::Array | TypeShape::ByRef | TypeShape::Pointer, Some(element)) =
            (def.shape, def.element)
        {
            if visited.insert(ty) {
                work.push_front(element);
            }
            continue;
        }
        if def.full_name.is_none() {
            continue;
        }

        if let Some(open) = def.generic_definition {
            work.extend(def.type_arguments.iter().copied());
            ty = open;
        }

        if catalog.is_framework(ty, framework) || !visited.insert(ty) {
            continue;
        }
        order.push(ty);

        let def = catalog.get(ty);
        work.extend(def.base);
        for member in def.members.iter().filter(|m| m.is_public) {
            work.extend(TypeCatalog::referenced_types(member));
        }
    }
    order
}
