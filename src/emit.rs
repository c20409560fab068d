//! Module image emission.
//!
//! The final compilation is serialized into a deterministic image: a fixed
//! little-endian header followed by a JSON payload, padded to the file
//! alignment. The same bytes can be loaded back as a `LoadedModule`.

use oxc_allocator::Allocator;
use oxc_codegen::Codegen;
use oxc_parser::Parser;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::codegen::{BuildMetadata, METADATA_UNIT};
use crate::compilation::{source_type, Compilation};
use crate::diagnostics::{CompilerError, SourceLocation, ERR_EMIT};
use crate::discovery::WrapperInfo;
use crate::types::TypeCatalog;

pub const MODULE_MAGIC: &[u8; 6] = b"VCMOD\0";
pub const FORMAT_VERSION: u16 = 1;
pub const DEBUG_FORMAT: &str = "portable";

/// magic + version + base address + alignment + payload length + module id
const HEADER_LEN: usize = 6 + 2 + 8 + 4 + 8 + 32;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("unit '{0}' could not be parsed for emission")]
    Parse(String),
    #[error("failed to serialize module: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write module {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid module image: {0}")]
    InvalidImage(String),
}

impl EmitError {
    pub fn to_compiler_error(&self, file: &str) -> CompilerError {
        CompilerError::new(ERR_EMIT, &self.to_string(), file, SourceLocation::default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAYLOAD
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleUnit {
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BindingEntry {
    pub property: String,
    pub member_path: String,
    pub value_type: String,
    pub getter: bool,
    pub setter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BindingTable {
    pub wrapper: String,
    pub wrapped_type: String,
    pub source: String,
    pub bindings: Vec<BindingEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DebugDocument {
    pub name: String,
    pub checksum: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub format: String,
    pub documents: Vec<DebugDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct ModulePayload {
    metadata: BuildMetadata,
    units: Vec<ModuleUnit>,
    bindings: Vec<BindingTable>,
    debug: Option<DebugInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitOptions {
    pub base_address: u64,
    pub file_alignment: u32,
    pub debug_info: bool,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn normalize(name: &str, code: &str) -> Result<String, EmitError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, code, source_type()).parse();
    if !ret.errors.is_empty() {
        return Err(EmitError::Parse(name.to_string()));
    }
    Ok(Codegen::new().build(&ret.program).code)
}

fn binding_tables(wrappers: &[WrapperInfo], catalog: &TypeCatalog) -> Vec<BindingTable> {
    let mut tables: Vec<BindingTable> = wrappers
        .iter()
        .flat_map(|w| w.flatten())
        .map(|w| BindingTable {
            wrapper: w.qualified_name(),
            wrapped_type: catalog.display_name(w.wrapped_type),
            source: w.view.path.clone(),
            bindings: w
                .expressions
                .iter()
                .map(|e| BindingEntry {
                    property: e.property_name.clone(),
                    member_path: e.member_path.clone(),
                    value_type: catalog.display_name(e.target_type),
                    getter: e.generate_getter,
                    setter: e.generate_setter,
                })
                .collect(),
        })
        .collect();
    tables.sort_by(|a, b| a.wrapper.cmp(&b.wrapper));
    tables
}

// ═══════════════════════════════════════════════════════════════════════════════
// EMISSION
// ═══════════════════════════════════════════════════════════════════════════════

/// Serializes the compilation. Units are named after their wrapper so that
/// identical inputs give identical bytes regardless of temporary unit names.
pub fn emit(
    compilation: &Compilation,
    wrappers: &[WrapperInfo],
    metadata: &BuildMetadata,
    options: &EmitOptions,
) -> Result<Vec<u8>, EmitError> {
    let mut units = Vec::with_capacity(compilation.trees().len());
    for tree in compilation.trees() {
        let name = if tree.name() == METADATA_UNIT {
            METADATA_UNIT.to_string()
        } else {
            wrappers
                .iter()
                .find(|w| w.unit_name() == tree.name())
                .map(|w| format!("{}.ts", w.qualified_name()))
                .unwrap_or_else(|| tree.name().to_string())
        };
        units.push(ModuleUnit {
            code: normalize(&name, tree.text())?,
            name,
        });
    }
    units.sort_by(|a, b| a.name.cmp(&b.name));

    let debug = options.debug_info.then(|| DebugInfo {
        format: DEBUG_FORMAT.to_string(),
        documents: units
            .iter()
            .map(|u| DebugDocument {
                name: u.name.clone(),
                checksum: sha256_hex(u.code.as_bytes()),
                source: u.code.clone(),
            })
            .collect(),
    });

    let payload = ModulePayload {
        metadata: metadata.clone(),
        bindings: binding_tables(wrappers, compilation.catalog()),
        units,
        debug,
    };
    let body = serde_json::to_vec(&payload)?;
    let module_id = Sha256::digest(&body);

    let mut image = Vec::with_capacity(HEADER_LEN + body.len());
    image.extend_from_slice(MODULE_MAGIC);
    image.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    image.extend_from_slice(&options.base_address.to_le_bytes());
    image.extend_from_slice(&options.file_alignment.to_le_bytes());
    image.extend_from_slice(&(body.len() as u64).to_le_bytes());
    image.extend_from_slice(&module_id);
    image.extend_from_slice(&body);

    let alignment = options.file_alignment.max(1) as usize;
    let padded = image.len().div_ceil(alignment) * alignment;
    image.resize(padded, 0);
    Ok(image)
}

pub fn write_image(bytes: &[u8], path: &Path) -> Result<(), EmitError> {
    let io_error = |source| EmitError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    fs::write(path, bytes).map_err(io_error)
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModule {
    pub module_id: String,
    pub base_address: u64,
    pub file_alignment: u32,
    pub metadata: BuildMetadata,
    pub units: Vec<ModuleUnit>,
    pub bindings: Vec<BindingTable>,
    pub debug: Option<DebugInfo>,
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N], EmitError> {
    bytes
        .get(offset..offset + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| EmitError::InvalidImage("truncated header".to_string()))
}

impl LoadedModule {
    pub fn load(bytes: &[u8]) -> Result<Self, EmitError> {
        let magic: [u8; 6] = read_array(bytes, 0)?;
        if &magic != MODULE_MAGIC {
            return Err(EmitError::InvalidImage("bad magic".to_string()));
        }
        let version = u16::from_le_bytes(read_array(bytes, 6)?);
        if version != FORMAT_VERSION {
            return Err(EmitError::InvalidImage(format!(
                "unsupported format version {}",
                version
            )));
        }
        let base_address = u64::from_le_bytes(read_array(bytes, 8)?);
        let file_alignment = u32::from_le_bytes(read_array(bytes, 16)?);
        let body_len = u64::from_le_bytes(read_array(bytes, 20)?) as usize;
        let module_id: [u8; 32] = read_array(bytes, 28)?;

        let body = bytes
            .get(HEADER_LEN..HEADER_LEN + body_len)
            .ok_or_else(|| EmitError::InvalidImage("truncated payload".to_string()))?;
        if Sha256::digest(body).as_slice() != &module_id[..] {
            return Err(EmitError::InvalidImage("module id mismatch".to_string()));
        }
        let payload: ModulePayload = serde_json::from_slice(body)?;

        Ok(Self {
            module_id: module_id.iter().map(|b| format!("{:02x}", b)).collect(),
            base_address,
            file_alignment,
            metadata: payload.metadata,
            units: payload.units,
            bindings: payload.bindings,
            debug: payload.debug,
        })
    }

    pub fn unit(&self, name: &str) -> Option<&ModuleUnit> {
        self.units.iter().find(|u| u.name == name)
    }

    pub fn binding_table(&self, wrapper: &str) -> Option<&BindingTable> {
        self.bindings.iter().find(|t| t.wrapper == wrapper)
    }
}
