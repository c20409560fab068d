//! Codegen module for the view compiler
//!
//! Renders a `WrapperInfo` (and its dependents) into one TypeScript unit:
//! an `export namespace` block holding one wrapper class per wrapper. Output is
//! a pure function of its inputs so it can be hashed and compared in tests.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::config::{BuildConfiguration, CompilerConfig};
use crate::discovery::{BindingExpressionInfo, ContentKind, WrapperInfo, BINDING_PROPERTY_PREFIX};
use crate::host::HostContext;
use crate::types::{MemberDef, MemberKind, TypeCatalog, TypeId, VOID_TYPE};

pub const SOURCE_FIELD: &str = "source";
pub const DATA_SOURCE_ACCESSOR: &str = "getDataSource";
pub const WRAPPER_CONTRACT: &str = "runtime.DataSourceWrapper";
pub const UNWRAP_HELPER: &str = "runtime.unwrapOrDefault";
pub const CONVERT_HELPER: &str = "runtime.convert";
pub const METADATA_UNIT: &str = "__build_metadata.ts";

const RESERVED_MEMBERS: [&str; 3] = [SOURCE_FIELD, DATA_SOURCE_ACCESSOR, "constructor"];
const INDENT: &str = "        ";

// ═══════════════════════════════════════════════════════════════════════════════
// BUILD METADATA
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildMetadata {
    pub tool_version: String,
    pub configuration: BuildConfiguration,
}

/// The once-per-run unit carrying build attributes into the emitted module.
pub fn render_metadata(metadata: &BuildMetadata) -> String {
    format!(
        "export const buildMetadata = {{\n    toolVersion: {},\n    configuration: {},\n}} as const;\n",
        string_literal(&metadata.tool_version),
        string_literal(&metadata.configuration.to_string()),
    )
}

fn string_literal(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

// ═══════════════════════════════════════════════════════════════════════════════
// WRAPPER RENDERING
// ═══════════════════════════════════════════════════════════════════════════════

/// Renders the unit for a top-level wrapper. Dependents are emitted as sibling
/// classes in the same namespace block.
pub fn render(wrapper: &WrapperInfo, host: &HostContext, config: &CompilerConfig) -> String {
    let mut out = String::new();

    for line in render_imports(wrapper, config) {
        out.push_str(&line);
        out.push('\n');
    }

    out.push('\n');
    out.push_str(&format!("export namespace {} {{\n", wrapper.namespace));
    let classes: Vec<String> = wrapper
        .flatten()
        .into_iter()
        .map(|w| render_class(w, host.catalog()))
        .collect();
    out.push_str(&classes.join("\n\n"));
    out.push_str("\n}\n");
    out
}

fn render_imports(wrapper: &WrapperInfo, config: &CompilerConfig) -> Vec<String> {
    let modules: BTreeSet<&str> = wrapper
        .imports
        .iter()
        .chain(config.baseline_imports.iter())
        .map(String::as_str)
        .collect();

    let mut lines = vec![format!(
        "import * as runtime from {};",
        string_literal(&config.runtime_module)
    )];
    for module in modules {
        if module != config.runtime_module {
            lines.push(format!("import {};", string_literal(module)));
        }
    }
    lines
}

fn render_class(wrapper: &WrapperInfo, catalog: &TypeCatalog) -> String {
    let wrapped = catalog.display_name(wrapper.wrapped_type);
    let mut members = vec![
        format!("{}private readonly {}: {};", INDENT, SOURCE_FIELD, wrapped),
        format!(
            "{i}constructor({f}: {t}) {{\n{i}    this.{f} = {f};\n{i}}}",
            i = INDENT,
            f = SOURCE_FIELD,
            t = wrapped
        ),
        format!(
            "{i}{a}(): {t} {{\n{i}    return this.{f};\n{i}}}",
            i = INDENT,
            a = DATA_SOURCE_ACCESSOR,
            f = SOURCE_FIELD,
            t = wrapped
        ),
    ];

    members.extend(render_content_members(wrapper.content_kind));
    members.extend(render_forwarding_members(wrapper, catalog));
    for expr in &wrapper.expressions {
        members.extend(render_binding(expr, catalog));
    }

    format!(
        "    export class {} implements {}<{}> {{\n{}\n    }}",
        wrapper.class_name,
        WRAPPER_CONTRACT,
        wrapped,
        members.join("\n\n")
    )
}

fn content_member_name(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Content => "HasContent",
        ContentKind::Items => "HasItems",
    }
}

fn render_content_members(kind: Option<ContentKind>) -> Vec<String> {
    let Some(kind) = kind else {
        return Vec::new();
    };
    let probe = match kind {
        ContentKind::Content => "Content",
        ContentKind::Items => "Items",
    };
    vec![format!(
        "{i}get {name}(): boolean {{\n{i}    return this.{f}.{probe} != null;\n{i}}}",
        i = INDENT,
        name = content_member_name(kind),
        f = SOURCE_FIELD,
        probe = probe
    )]
}

// ═══════════════════════════════════════════════════════════════════════════════
// FORWARDING MEMBERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Forwards the wrapped type's public methods, properties and fields. Only the
/// first member seen per name is forwarded, walking from the most derived type.
fn render_forwarding_members(wrapper: &WrapperInfo, catalog: &TypeCatalog) -> Vec<String> {
    let mut seen: HashSet<&str> = RESERVED_MEMBERS.iter().copied().collect();
    if let Some(kind) = wrapper.content_kind {
        seen.insert(content_member_name(kind));
    }

    let mut out = Vec::new();
    for owner in catalog.base_chain(wrapper.wrapped_type) {
        if catalog.is_object(owner) {
            continue;
        }
        for member in &catalog.get(owner).members {
            if !is_forwardable(member) || member.name.starts_with(BINDING_PROPERTY_PREFIX) {
                continue;
            }
            if !seen.insert(member.name.as_str()) {
                continue;
            }
            out.push(render_forwarding_member(owner, member, catalog));
        }
    }
    out
}

fn is_forwardable(member: &MemberDef) -> bool {
    if !member.is_public || member.is_special {
        return false;
    }
    match member.kind {
        MemberKind::Method | MemberKind::Field => true,
        MemberKind::Property => member.parameters.is_empty() && (member.can_read || member.can_write),
        _ => false,
    }
}

fn render_forwarding_member(owner: TypeId, member: &MemberDef, catalog: &TypeCatalog) -> String {
    let target = if member.is_static {
        catalog.display_name(owner)
    } else {
        format!("this.{}", SOURCE_FIELD)
    };
    let modifier = if member.is_static { "static " } else { "" };
    let ty = type_reference(member.ty, catalog);
    let name = &member.name;

    match member.kind {
        MemberKind::Method => {
            let params: Vec<String> = member
                .parameters
                .iter()
                .enumerate()
                .map(|(i, p)| parameter_name(&p.name, i))
                .collect();
            let typed: Vec<String> = member
                .parameters
                .iter()
                .zip(&params)
                .map(|(p, n)| format!("{}: {}", n, catalog.display_name(p.ty)))
                .collect();
            format!(
                "{i}{m}{name}({typed}): {ty} {{\n{i}    return {target}.{name}({args});\n{i}}}",
                i = INDENT,
                m = modifier,
                name = name,
                typed = typed.join(", "),
                ty = ty,
                target = target,
                args = params.join(", ")
            )
        }
        _ => {
            let mut accessors = Vec::new();
            if member.kind == MemberKind::Field || member.can_read {
                accessors.push(format!(
                    "{i}{m}get {name}(): {ty} {{\n{i}    return {target}.{name};\n{i}}}",
                    i = INDENT,
                    m = modifier,
                    name = name,
                    ty = ty,
                    target = target
                ));
            }
            if member.kind == MemberKind::Field || member.can_write {
                accessors.push(format!(
                    "{i}{m}set {name}(value: {ty}) {{\n{i}    {target}.{name} = value;\n{i}}}",
                    i = INDENT,
                    m = modifier,
                    name = name,
                    ty = ty,
                    target = target
                ));
            }
            accessors.join("\n\n")
        }
    }
}

fn type_reference(ty: Option<TypeId>, catalog: &TypeCatalog) -> String {
    match ty {
        Some(t) if catalog.full_name(t) != Some(VOID_TYPE) => catalog.display_name(t),
        _ => "void".to_string(),
    }
}

fn parameter_name(name: &str, index: usize) -> String {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name != "value";
    if valid {
        name.to_string()
    } else {
        format!("arg{}", index)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BINDING PROPERTIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Accessor expression for a member path, relative to the wrapped source.
pub fn source_path(member_path: &str) -> String {
    if member_path.is_empty() {
        format!("this.{}", SOURCE_FIELD)
    } else {
        format!("this.{}.{}", SOURCE_FIELD, member_path)
    }
}

pub fn unwrap_call(value: &str) -> String {
    format!("{}({})", UNWRAP_HELPER, value)
}

pub fn convert_call(target: &str, value: &str) -> String {
    format!("{}<{}>({})", CONVERT_HELPER, target, value)
}

fn render_binding(expr: &BindingExpressionInfo, catalog: &TypeCatalog) -> Vec<String> {
    let ty = catalog.display_name(expr.target_type);
    let path = source_path(&expr.member_path);
    let mut out = Vec::new();

    if expr.generate_getter {
        let value = if expr.nullable_fixup {
            unwrap_call(&path)
        } else if let Some(target) = &expr.conversion_target {
            convert_call(target, &path)
        } else {
            path.clone()
        };
        out.push(format!(
            "{i}get {name}(): {ty} {{\n{i}    return {value};\n{i}}}",
            i = INDENT,
            name = expr.property_name,
            ty = ty,
            value = value
        ));
    }

    // The data source itself cannot be reassigned.
    if expr.generate_setter && !expr.member_path.is_empty() {
        out.push(format!(
            "{i}set {name}(value: {ty}) {{\n{i}    {path} = value;\n{i}}}",
            i = INDENT,
            name = expr.property_name,
            ty = ty,
            path = path
        ));
    }
    out
}
