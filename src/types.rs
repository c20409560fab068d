//! Host Type Graph
//!
//! An arena of type definitions addressed by `TypeId`. The host runtime owns
//! the real metadata; this module holds the snapshot the compiler reasons over:
//! full names, assembly origin, members and the conversion rules used by the
//! semantic model.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

pub const OBJECT_TYPE: &str = "System.Object";
pub const VOID_TYPE: &str = "System.Void";
pub const NULLABLE_DEFINITION: &str = "System.Nullable`1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl TypeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Member kinds, declared in hashing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberKind {
    Constructor,
    Event,
    Field,
    Method,
    Property,
    NestedType,
}

impl MemberKind {
    pub fn label(self) -> &'static str {
        match self {
            MemberKind::Constructor => "Constructor",
            MemberKind::Event => "Event",
            MemberKind::Field => "Field",
            MemberKind::Method => "Method",
            MemberKind::Property => "Property",
            MemberKind::NestedType => "NestedType",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TypeShape {
    #[default]
    Class,
    Struct,
    Interface,
    Enum,
    GenericParameter,
    Array,
    ByRef,
    Pointer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDef {
    pub name: String,
    pub kind: MemberKind,
    /// Field, property and event type; method return type; nested type.
    pub ty: Option<TypeId>,
    pub parameters: Vec<Parameter>,
    pub is_static: bool,
    pub is_public: bool,
    /// Accessor, operator and other compiler-generated methods.
    pub is_special: bool,
    pub can_read: bool,
    pub can_write: bool,
    /// Dependency property that accepts binding expressions.
    pub bindable: bool,
    /// Bindable property attached through `Container.Property` syntax.
    pub attached: bool,
}

#[derive(Debug, Clone)]
pub struct TypeDef {
    /// Name the host registered the type under.
    pub key: String,
    /// `None` for unbound generic parameters.
    pub full_name: Option<String>,
    pub assembly: String,
    pub shape: TypeShape,
    pub element: Option<TypeId>,
    pub base: Option<TypeId>,
    pub generic_definition: Option<TypeId>,
    pub type_arguments: Vec<TypeId>,
    pub members: Vec<MemberDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Identity,
    Implicit,
    /// `Nullable<T>` to `T` (or to a type `T` converts to implicitly).
    NullableUnwrap,
    Explicit,
    None,
}

impl Conversion {
    pub fn is_implicit(self) -> bool {
        matches!(self, Conversion::Identity | Conversion::Implicit)
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("type '{0}' is declared more than once")]
    DuplicateType(String),
    #[error("'{referenced_by}' references unknown type '{name}'")]
    UnknownType { referenced_by: String, name: String },
    #[error("invalid type catalog: {0}")]
    Json(#[from] serde_json::Error),
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECLARATIONS
// ═══════════════════════════════════════════════════════════════════════════════

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDecl {
    pub name: String,
    pub kind: MemberKind,
    #[serde(default, rename = "type")]
    pub ty: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterDecl>,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default = "yes")]
    pub public: bool,
    #[serde(default)]
    pub special: bool,
    #[serde(default = "yes")]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub bindable: bool,
    #[serde(default)]
    pub attached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDecl {
    pub name: String,
    #[serde(default)]
    pub assembly: String,
    #[serde(default)]
    pub kind: TypeShape,
    #[serde(default)]
    pub element: Option<String>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub generic_definition: Option<String>,
    #[serde(default)]
    pub type_arguments: Vec<String>,
    #[serde(default)]
    pub members: Vec<MemberDecl>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CATALOG
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    types: Vec<TypeDef>,
    by_key: HashMap<String, TypeId>,
    by_display: HashMap<String, TypeId>,
}

impl TypeCatalog {
    /// Builds the arena in two passes: ids are assigned first so declarations
    /// may reference each other in any order (including cycles).
    pub fn from_decls(decls: Vec<TypeDecl>) -> Result<Self, CatalogError> {
        let mut by_key = HashMap::new();
        for (i, decl) in decls.iter().enumerate() {
            if by_key.insert(decl.name.clone(), TypeId(i as u32)).is_some() {
                return Err(CatalogError::DuplicateType(decl.name.clone()));
            }
        }

        let lookup = |owner: &str, name: &str| -> Result<TypeId, CatalogError> {
            by_key
                .get(name)
                .copied()
                .ok_or_else(|| CatalogError::UnknownType {
                    referenced_by: owner.to_string(),
                    name: name.to_string(),
                })
        };
        let lookup_opt = |owner: &str, name: &Option<String>| -> Result<Option<TypeId>, CatalogError> {
            name.as_deref().map(|n| lookup(owner, n)).transpose()
        };

        let mut types = Vec::with_capacity(decls.len());
        for decl in &decls {
            let owner = decl.name.as_str();
            let mut members = Vec::with_capacity(decl.members.len());
            for m in &decl.members {
                let parameters = m
                    .parameters
                    .iter()
                    .map(|p| {
                        Ok(Parameter {
                            name: p.name.clone(),
                            ty: lookup(owner, &p.ty)?,
                        })
                    })
                    .collect::<Result<Vec<_>, CatalogError>>()?;
                members.push(MemberDef {
                    name: m.name.clone(),
                    kind: m.kind,
                    ty: lookup_opt(owner, &m.ty)?,
                    parameters,
                    is_static: m.is_static,
                    is_public: m.public,
                    is_special: m.special,
                    can_read: m.read,
                    can_write: m.write,
                    bindable: m.bindable,
                    attached: m.attached,
                });
            }

            let type_arguments = decl
                .type_arguments
                .iter()
                .map(|a| lookup(owner, a))
                .collect::<Result<Vec<_>, _>>()?;

            types.push(TypeDef {
                key: decl.name.clone(),
                full_name: match decl.kind {
                    TypeShape::GenericParameter => None,
                    _ => Some(decl.name.clone()),
                },
                assembly: decl.assembly.clone(),
                shape: decl.kind,
                element: lookup_opt(owner, &decl.element)?,
                base: lookup_opt(owner, &decl.base)?,
                generic_definition: lookup_opt(owner, &decl.generic_definition)?,
                type_arguments,
                members,
            });
        }

        let mut catalog = TypeCatalog {
            types,
            by_key,
            by_display: HashMap::new(),
        };
        for i in 0..catalog.types.len() {
            let id = TypeId(i as u32);
            let display = catalog.display_name(id);
            catalog.by_display.entry(display).or_insert(id);
        }
        Ok(catalog)
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let decls: Vec<TypeDecl> = serde_json::from_str(json)?;
        Self::from_decls(decls)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, id: TypeId) -> &TypeDef {
        &self.types[id.index()]
    }

    pub fn ids(&self) -> impl Iterator<Item = TypeId> {
        (0..self.types.len() as u32).map(TypeId)
    }

    /// Looks a type up by the name it was registered under.
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.by_key.get(name).copied()
    }

    /// Looks a type up by the name used in generated source.
    pub fn lookup_display(&self, name: &str) -> Option<TypeId> {
        self.by_display
            .get(name)
            .copied()
            .or_else(|| self.lookup(name))
    }

    pub fn full_name(&self, id: TypeId) -> Option<&str> {
        self.get(id).full_name.as_deref()
    }

    /// Source-level spelling of a type: `System.Nullable<System.Double>`,
    /// `Demo.Item[]`, nested `Outer.Inner`.
    pub fn display_name(&self, id: TypeId) -> String {
        self.display_name_bounded(id, 0)
    }

    fn display_name_bounded(&self, id: TypeId, depth: usize) -> String {
        let ty = self.get(id);
        if depth > 32 {
            return ty.key.clone();
        }
        match ty.shape {
            TypeShape::Array => match ty.element {
                Some(e) => format!("{}[]", self.display_name_bounded(e, depth + 1)),
                None => ty.key.clone(),
            },
            TypeShape::ByRef | TypeShape::Pointer => match ty.element {
                Some(e) => self.display_name_bounded(e, depth + 1),
                None => ty.key.clone(),
            },
            TypeShape::GenericParameter => ty.key.clone(),
            _ => {
                if let Some(def) = ty.generic_definition {
                    let args: Vec<String> = ty
                        .type_arguments
                        .iter()
                        .map(|a| self.display_name_bounded(*a, depth + 1))
                        .collect();
                    let def_name = self.display_name_bounded(def, depth + 1);
                    format!("{}<{}>", def_name, args.join(", "))
                } else {
                    let name = ty.full_name.as_deref().unwrap_or(&ty.key);
                    strip_arity(name).replace('+', ".")
                }
            }
        }
    }

    /// Resolves `Full.Name` and checks it lives in `assembly`.
    pub fn resolve_qualified(&self, full_name: &str, assembly: &str) -> Option<TypeId> {
        let id = self.lookup(full_name)?;
        self.get(id)
            .assembly
            .eq_ignore_ascii_case(assembly)
            .then_some(id)
    }

    pub fn is_framework(&self, id: TypeId, framework_assemblies: &HashSet<String>) -> bool {
        framework_assemblies.contains(&self.get(id).assembly)
    }

    /// The type itself followed by its base types.
    pub fn base_chain(&self, id: TypeId) -> Vec<TypeId> {
        let mut chain = vec![id];
        let mut current = self.get(id).base;
        while let Some(b) = current {
            if chain.contains(&b) {
                break;
            }
            chain.push(b);
            current = self.get(b).base;
        }
        chain
    }

    pub fn derives_from(&self, derived: TypeId, base: TypeId) -> bool {
        self.base_chain(derived).contains(&base)
    }

    pub fn is_object(&self, id: TypeId) -> bool {
        self.full_name(id) == Some(OBJECT_TYPE)
    }

    /// Finds a member by name on the type or its bases (derived first).
    pub fn find_member<F>(&self, id: TypeId, name: &str, filter: F) -> Option<(TypeId, &MemberDef)>
    where
        F: Fn(&MemberDef) -> bool,
    {
        for owner in self.base_chain(id) {
            if let Some(m) = self
                .get(owner)
                .members
                .iter()
                .find(|m| m.name == name && filter(m))
            {
                return Some((owner, m));
            }
        }
        None
    }

    pub fn nullable_underlying(&self, id: TypeId) -> Option<TypeId> {
        let ty = self.get(id);
        let def = ty.generic_definition?;
        if self.full_name(def) == Some(NULLABLE_DEFINITION) {
            ty.type_arguments.first().copied()
        } else {
            None
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SIGNATURES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn member_signature(&self, member: &MemberDef) -> String {
        let ty_name = |t: Option<TypeId>| {
            t.map(|t| self.display_name(t))
                .unwrap_or_else(|| VOID_TYPE.to_string())
        };
        let params = member
            .parameters
            .iter()
            .map(|p| self.display_name(p.ty))
            .collect::<Vec<_>>()
            .join(", ");
        let body = match member.kind {
            MemberKind::Constructor => format!("Void .ctor({})", params),
            MemberKind::Method => format!("{} {}({})", ty_name(member.ty), member.name, params),
            MemberKind::Property if !member.parameters.is_empty() => {
                format!("{} {}[{}]", ty_name(member.ty), member.name, params)
            }
            MemberKind::Property => {
                let access = match (member.can_read, member.can_write) {
                    (true, true) => " { get; set; }",
                    (true, false) => " { get; }",
                    (false, true) => " { set; }",
                    (false, false) => "",
                };
                format!("{} {}{}", ty_name(member.ty), member.name, access)
            }
            MemberKind::Field | MemberKind::Event => {
                format!("{} {}", ty_name(member.ty), member.name)
            }
            MemberKind::NestedType => ty_name(member.ty),
        };
        if member.is_static {
            format!("static {}", body)
        } else {
            body
        }
    }

    /// Every type a member mentions in its signature.
    pub fn referenced_types(member: &MemberDef) -> Vec<TypeId> {
        let mut out = Vec::with_capacity(member.parameters.len() + 1);
        if let Some(t) = member.ty {
            out.push(t);
        }
        out.extend(member.parameters.iter().map(|p| p.ty));
        out
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONVERSIONS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn classify_conversion(&self, from: TypeId, to: TypeId) -> Conversion {
        if from == to {
            return Conversion::Identity;
        }
        if self.is_implicit(from, to) {
            return Conversion::Implicit;
        }
        if let Some(inner) = self.nullable_underlying(from) {
            if inner == to || self.is_implicit(inner, to) {
                return Conversion::NullableUnwrap;
            }
        }
        if self.is_explicit(from, to) {
            Conversion::Explicit
        } else {
            Conversion::None
        }
    }

    fn is_implicit(&self, from: TypeId, to: TypeId) -> bool {
        if from == to {
            return true;
        }
        if let (Some(f), Some(t)) = (self.full_name(from), self.full_name(to)) {
            if numeric_widening(f, t) {
                return true;
            }
        }
        if self.is_object(to) || self.derives_from(from, to) {
            return true;
        }
        match self.nullable_underlying(to) {
            Some(inner) => {
                self.nullable_underlying(from).map_or(false, |f| self.is_implicit(f, inner))
                    || self.is_implicit(from, inner)
            }
            None => false,
        }
    }

    fn is_explicit(&self, from: TypeId, to: TypeId) -> bool {
        let numeric_like = |id: TypeId| {
            self.get(id).shape == TypeShape::Enum
                || self.full_name(id).map_or(false, |n| numeric_rank(n).is_some())
        };
        if numeric_like(from) && numeric_like(to) {
            return true;
        }
        if self.is_object(from) || self.derives_from(to, from) {
            return true;
        }
        if let Some(inner) = self.nullable_underlying(from) {
            return self.is_explicit(inner, to);
        }
        if let Some(inner) = self.nullable_underlying(to) {
            return self.is_explicit(from, inner);
        }
        false
    }
}

fn strip_arity(name: &str) -> &str {
    match name.find('`') {
        Some(i) => &name[..i],
        None => name,
    }
}

const NUMERIC_TYPES: [&str; 12] = [
    "System.SByte",
    "System.Byte",
    "System.Int16",
    "System.UInt16",
    "System.Int32",
    "System.UInt32",
    "System.Int64",
    "System.UInt64",
    "System.Char",
    "System.Single",
    "System.Double",
    "System.Decimal",
];

fn numeric_rank(name: &str) -> Option<usize> {
    NUMERIC_TYPES.iter().position(|n| *n == name)
}

fn numeric_widening(from: &str, to: &str) -> bool {
    let targets: &[&str] = match from {
        "System.SByte" => &["Int16", "Int32", "Int64", "Single", "Double", "Decimal"],
        "System.Byte" => &[
            "Int16", "UInt16", "Int32", "UInt32", "Int64", "UInt64", "Single", "Double", "Decimal",
        ],
        "System.Int16" => &["Int32", "Int64", "Single", "Double", "Decimal"],
        "System.UInt16" => &["Int32", "UInt32", "Int64", "UInt64", "Single", "Double", "Decimal"],
        "System.Int32" => &["Int64", "Single", "Double", "Decimal"],
        "System.UInt32" => &["Int64", "UInt64", "Single", "Double", "Decimal"],
        "System.Int64" | "System.UInt64" => &["Single", "Double", "Decimal"],
        "System.Char" => &["UInt16", "Int32", "UInt32", "Int64", "UInt64", "Single", "Double", "Decimal"],
        "System.Single" => &["Double"],
        _ => &[],
    };
    to.strip_prefix("System.")
        .map_or(false, |short| targets.contains(&short))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TypeCatalog {
        TypeCatalog::from_json(
            r#"[
            { "name": "System.Object", "assembly": "System.Runtime" },
            { "name": "System.Int32", "assembly": "System.Runtime", "kind": "struct" },
            { "name": "System.Double", "assembly": "System.Runtime", "kind": "struct" },
            { "name": "System.String", "assembly": "System.Runtime", "base": "System.Object" },
            { "name": "T", "kind": "generic-parameter" },
            { "name": "System.Nullable`1", "assembly": "System.Runtime", "kind": "struct" },
            { "name": "System.Nullable`1[System.Double]", "assembly": "System.Runtime",
              "kind": "struct", "genericDefinition": "System.Nullable`1",
              "typeArguments": ["System.Double"] },
            { "name": "Demo.Animal", "assembly": "Demo", "base": "System.Object" },
            { "name": "Demo.Dog", "assembly": "Demo", "base": "Demo.Animal",
              "members": [ { "name": "Bark", "kind": "method", "type": "System.String" } ] },
            { "name": "Demo.Dog[]", "assembly": "Demo", "kind": "array", "element": "Demo.Dog" }
        ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_display_names() {
        let c = catalog();
        let nullable = c.lookup("System.Nullable`1[System.Double]").unwrap();
        assert_eq!(c.display_name(nullable), "System.Nullable<System.Double>");
        assert_eq!(c.lookup_display("System.Nullable<System.Double>"), Some(nullable));
        let arr = c.lookup("Demo.Dog[]").unwrap();
        assert_eq!(c.display_name(arr), "Demo.Dog[]");
        assert_eq!(c.full_name(c.lookup("T").unwrap()), None);
    }

    #[test]
    fn test_conversions() {
        let c = catalog();
        let int = c.lookup("System.Int32").unwrap();
        let double = c.lookup("System.Double").unwrap();
        let nullable = c.lookup("System.Nullable`1[System.Double]").unwrap();
        let animal = c.lookup("Demo.Animal").unwrap();
        let dog = c.lookup("Demo.Dog").unwrap();
        let object = c.lookup("System.Object").unwrap();

        assert_eq!(c.classify_conversion(int, int), Conversion::Identity);
        assert_eq!(c.classify_conversion(int, double), Conversion::Implicit);
        assert_eq!(c.classify_conversion(double, int), Conversion::Explicit);
        assert_eq!(c.classify_conversion(nullable, double), Conversion::NullableUnwrap);
        assert_eq!(c.classify_conversion(double, nullable), Conversion::Implicit);
        assert_eq!(c.classify_conversion(dog, animal), Conversion::Implicit);
        assert_eq!(c.classify_conversion(animal, dog), Conversion::Explicit);
        assert_eq!(c.classify_conversion(dog, object), Conversion::Implicit);
        assert_eq!(c.classify_conversion(dog, int), Conversion::None);
    }

    #[test]
    fn test_unknown_reference_is_rejected() {
        let err = TypeCatalog::from_json(r#"[{ "name": "A", "base": "Missing" }]"#).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownType { .. }));
    }

    #[test]
    fn test_member_lookup_walks_bases() {
        let c = TypeCatalog::from_json(
            r#"[
            { "name": "S", "assembly": "x" },
            { "name": "Base", "assembly": "x", "members": [
                { "name": "Name", "kind": "property", "type": "S", "write": true } ] },
            { "name": "Derived", "assembly": "x", "base": "Base" }
        ]"#,
        )
        .unwrap();
        let derived = c.lookup("Derived").unwrap();
        let (owner, member) = c
            .find_member(derived, "Name", |m| m.kind == MemberKind::Property)
            .unwrap();
        assert_eq!(owner, c.lookup("Base").unwrap());
        assert_eq!(c.member_signature(member), "S Name { get; set; }");
    }
}
