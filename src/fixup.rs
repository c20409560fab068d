//! Fixup rewrites.
//!
//! Two span-based rewrites run in a fixed order over each generated unit:
//! conversion correction on binding getters, then removal of setters the
//! semantic model proves invalid. Edits are collected as `(start, end,
//! replacement)` and applied back to front so earlier spans stay valid.

use serde::Serialize;

use crate::codegen::{convert_call, unwrap_call};
use crate::compilation::{Compilation, SyntaxTree};
use crate::semantic::{
    fixup_shape, is_fixup_value, AccessorKind, ClassFacts, FixupShape, SemanticModel, ValueType,
};
use crate::types::Conversion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: u32,
    pub end: u32,
    pub replacement: String,
}

pub fn apply_edits(text: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by(|a, b| b.start.cmp(&a.start));
    let mut out = text.to_string();
    for edit in edits {
        out.replace_range(edit.start as usize..edit.end as usize, &edit.replacement);
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// REWRITE 1: CONVERSIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Wraps getter values whose type does not implicitly convert to the declared
/// property type: nullable values are unwrapped, explicit conversions are
/// spelled out. Values with no conversion at all are left for diagnostics.
pub fn conversion_edits(model: &SemanticModel) -> Vec<Edit> {
    let mut edits = Vec::new();
    for property in model.binding_properties() {
        let Some((value, span)) = property.getter.and_then(|g| g.value.as_ref()) else {
            continue;
        };
        let Some(declared_text) = property.declared_type() else {
            continue;
        };
        let Some(declared) = model.resolve_type(declared_text) else {
            continue;
        };
        let ValueType::Known(actual) = model.value_type(property.class, value) else {
            continue;
        };

        let replacement = match model.catalog().classify_conversion(actual, declared) {
            Conversion::NullableUnwrap => unwrap_call(value),
            Conversion::Explicit => convert_call(declared_text, value),
            _ => continue,
        };
        tracing::debug!(
            "[Fixup] {}.{}: {} -> {}",
            property.class.name,
            property.name,
            value,
            replacement
        );
        edits.push(Edit {
            start: span.start,
            end: span.end,
            replacement,
        });
    }
    edits
}

// ═══════════════════════════════════════════════════════════════════════════════
// REWRITE 2: SETTERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Removes a binding setter when its target is not writable, cannot accept
/// the declared type, or when the getter needed a conversion (the value would
/// not round-trip).
pub fn setter_edits(model: &SemanticModel, text: &str) -> Vec<Edit> {
    let mut edits = Vec::new();
    for property in model.binding_properties() {
        let Some(setter) = property.setter else {
            continue;
        };
        let getter_fixed = property
            .getter
            .and_then(|g| g.value.as_ref())
            .map_or(false, |(value, _)| is_fixup_value(value));
        if !getter_fixed && model.setter_is_valid(&property) {
            continue;
        }

        // Take the blank line and indentation in front of the setter as well.
        let start = text[..setter.span.start as usize].trim_end().len() as u32;
        tracing::debug!("[Fixup] {}.{}: setter removed", property.class.name, property.name);
        edits.push(Edit {
            start,
            end: setter.span.end,
            replacement: String::new(),
        });
    }
    edits
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════════

/// What survived fixup for one binding property, read back from the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingOutcome {
    pub class_name: String,
    pub property_name: String,
    pub generate_getter: bool,
    pub generate_setter: bool,
    pub nullable_fixup: bool,
    pub conversion_source: Option<String>,
    pub conversion_target: Option<String>,
}

pub fn outcomes(model: &SemanticModel) -> Vec<BindingOutcome> {
    model
        .binding_properties()
        .into_iter()
        .map(|property| {
            let value = property.getter.and_then(|g| g.value.as_ref()).map(|(v, _)| v.as_str());
            let (nullable_fixup, conversion) = match value {
                Some(v) => classify_fixup(model, property.class, v),
                None => (false, None),
            };
            let (conversion_source, conversion_target) = match conversion {
                Some((s, t)) => (Some(s), Some(t)),
                None => (None, None),
            };
            BindingOutcome {
                class_name: property.class.name.clone(),
                property_name: property.name.to_string(),
                generate_getter: property.getter.is_some(),
                generate_setter: property
                    .class
                    .member(property.name, AccessorKind::Setter)
                    .is_some(),
                nullable_fixup,
                conversion_source,
                conversion_target,
            }
        })
        .collect()
}

fn classify_fixup(model: &SemanticModel, class: &ClassFacts, value: &str) -> (bool, Option<(String, String)>) {
    match fixup_shape(value) {
        Some(FixupShape::Unwrap(_)) => (true, None),
        Some(FixupShape::Convert { target, inner }) => {
            let source = match model.value_type(class, inner) {
                ValueType::Known(t) => model.catalog().display_name(t),
                _ => inner.to_string(),
            };
            (false, Some((source, target.to_string())))
        }
        None => (false, None),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DRIVER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct FixupResult {
    /// Rewritten tree, `None` when both rewrites left the text unchanged.
    pub tree: Option<SyntaxTree>,
    pub outcomes: Vec<BindingOutcome>,
}

/// Runs both rewrites over one tree of `compilation`.
pub fn fixup_tree(compilation: &Compilation, tree: &SyntaxTree) -> FixupResult {
    if tree.has_syntax_errors() {
        return FixupResult {
            tree: None,
            outcomes: outcomes(&compilation.semantic_model(tree)),
        };
    }

    let first = rewrite(tree, |model, _| conversion_edits(model), compilation);
    let current = first.as_ref().unwrap_or(tree);
    let second = rewrite(current, setter_edits, compilation);
    let final_tree = second.or(first);

    let final_model = compilation.semantic_model(final_tree.as_ref().unwrap_or(tree));
    FixupResult {
        outcomes: outcomes(&final_model),
        tree: final_tree,
    }
}

fn rewrite<F>(tree: &SyntaxTree, edits_for: F, compilation: &Compilation) -> Option<SyntaxTree>
where
    F: Fn(&SemanticModel, &str) -> Vec<Edit>,
{
    let model = compilation.semantic_model(tree);
    let edits = edits_for(&model, tree.text());
    if edits.is_empty() {
        return None;
    }
    let text = apply_edits(tree.text(), edits);
    Some(SyntaxTree::parse(tree.name(), &text))
}
