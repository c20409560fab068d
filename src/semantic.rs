//! Semantic model over one generated unit.
//!
//! The oxc AST supplies structure (classes, accessors, spans); type facts come
//! from the host catalog. Generated wrapper members follow a small fixed set of
//! shapes, so their value expressions are classified by pattern and resolved
//! member by member against the wrapped type.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::{Class, MethodDefinition, MethodDefinitionKind, Statement};
use oxc_ast_visit::{walk, Visit};
use oxc_parser::Parser;
use oxc_span::{GetSpan, Span};
use regex::Regex;

use crate::codegen::SOURCE_FIELD;
use crate::compilation::{source_type, SyntaxTree};
use crate::diagnostics::{
    CompilerError, LineIndex, SourceLocation, ERR_INVALID_SETTER, ERR_NO_CONVERSION,
    ERR_UNKNOWN_TYPE, ERR_UNRESOLVED_MEMBER, WARN_UNREFERENCED_ASSEMBLY,
};
use crate::discovery::BINDING_PROPERTY_PREFIX;
use crate::references::ReferenceSet;
use crate::types::{Conversion, MemberKind, TypeCatalog, TypeId};

lazy_static! {
    static ref WRAPPED_TYPE_RE: Regex = Regex::new(r"DataSourceWrapper<(.+)>\s*$").unwrap();
    static ref SETTER_PARAM_RE: Regex =
        Regex::new(r"^\(?\s*[A-Za-z_$][\w$]*\s*:\s*(.+?)\s*\)?$").unwrap();
    static ref ASSIGNMENT_RE: Regex = Regex::new(r"^(.+?)\s*=\s*value\s*;?$").unwrap();
    static ref UNWRAP_RE: Regex = Regex::new(r"^runtime\.unwrapOrDefault\((.+)\)$").unwrap();
    static ref CONVERT_RE: Regex = Regex::new(r"^runtime\.convert<(.+?)>\((.+)\)$").unwrap();
    static ref SOURCE_PATH_RE: Regex =
        Regex::new(r"^this\.source((?:\.[A-Za-z_][A-Za-z0-9_]*)*)$").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// FACTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    Constructor,
    Getter,
    Setter,
    Method,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberFacts {
    pub name: String,
    pub kind: AccessorKind,
    pub is_static: bool,
    pub span: Span,
    /// Return type of getters and methods, parameter type of setters.
    pub declared_type: Option<String>,
    /// Returned expression of a single-statement getter.
    pub value: Option<(String, Span)>,
    /// Left-hand side of a setter's `... = value;` body.
    pub assigned: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassFacts {
    pub name: String,
    pub wrapped_type: Option<String>,
    pub members: Vec<MemberFacts>,
}

impl ClassFacts {
    pub fn member(&self, name: &str, kind: AccessorKind) -> Option<&MemberFacts> {
        self.members.iter().find(|m| m.name == name && m.kind == kind)
    }
}

/// Getter/setter pair generated for one binding expression.
#[derive(Debug, Clone, Copy)]
pub struct BindingProperty<'m> {
    pub class: &'m ClassFacts,
    pub name: &'m str,
    pub getter: Option<&'m MemberFacts>,
    pub setter: Option<&'m MemberFacts>,
}

impl BindingProperty<'_> {
    pub fn declared_type(&self) -> Option<&str> {
        self.getter
            .or(self.setter)
            .and_then(|m| m.declared_type.as_deref())
    }

    fn span(&self) -> Span {
        self.getter.or(self.setter).map_or(Span::default(), |m| m.span)
    }
}

/// Static type of a getter's value expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Known(TypeId),
    UnresolvedMember(String),
    /// Not a generated shape; left unchecked.
    Opaque,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathTarget {
    pub ty: TypeId,
    pub writable: bool,
}

/// A getter value already wrapped by a fixup helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupShape<'v> {
    Unwrap(&'v str),
    Convert { target: &'v str, inner: &'v str },
}

pub fn fixup_shape(value: &str) -> Option<FixupShape<'_>> {
    let value = value.trim();
    if let Some(caps) = UNWRAP_RE.captures(value) {
        return caps.get(1).map(|inner| FixupShape::Unwrap(inner.as_str()));
    }
    let caps = CONVERT_RE.captures(value)?;
    Some(FixupShape::Convert {
        target: caps.get(1)?.as_str(),
        inner: caps.get(2)?.as_str(),
    })
}

pub fn is_fixup_value(value: &str) -> bool {
    fixup_shape(value).is_some()
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLECTION
// ═══════════════════════════════════════════════════════════════════════════════

struct FactCollector<'s> {
    text: &'s str,
    classes: Vec<ClassFacts>,
    open: Vec<usize>,
}

impl FactCollector<'_> {
    fn slice(&self, span: Span) -> &str {
        &self.text[span.start as usize..span.end as usize]
    }
}

impl<'a> Visit<'a> for FactCollector<'_> {
    fn visit_class(&mut self, class: &Class<'a>) {
        let name = class
            .id
            .as_ref()
            .map(|id| id.name.to_string())
            .unwrap_or_default();
        let header = self.slice(Span::new(class.span.start, class.body.span.start));
        let wrapped_type = WRAPPED_TYPE_RE
            .captures(header.trim_end())
            .map(|c| c[1].trim().to_string());

        self.classes.push(ClassFacts {
            name,
            wrapped_type,
            members: Vec::new(),
        });
        self.open.push(self.classes.len() - 1);
        walk::walk_class(self, class);
        self.open.pop();
    }

    fn visit_method_definition(&mut self, def: &MethodDefinition<'a>) {
        if let Some(&index) = self.open.last() {
            let facts = self.method_facts(def);
            self.classes[index].members.push(facts);
        }
        walk::walk_method_definition(self, def);
    }
}

impl FactCollector<'_> {
    fn method_facts(&self, def: &MethodDefinition) -> MemberFacts {
        let kind = match def.kind {
            MethodDefinitionKind::Constructor => AccessorKind::Constructor,
            MethodDefinitionKind::Get => AccessorKind::Getter,
            MethodDefinitionKind::Set => AccessorKind::Setter,
            MethodDefinitionKind::Method => AccessorKind::Method,
        };
        let function = &def.value;

        let declared_type = match kind {
            AccessorKind::Setter => SETTER_PARAM_RE
                .captures(self.slice(function.params.span).trim())
                .map(|c| c[1].to_string()),
            _ => function
                .return_type
                .as_ref()
                .map(|ann| self.slice(ann.type_annotation.span()).trim().to_string()),
        };

        let first_statement = function
            .body
            .as_ref()
            .and_then(|body| body.statements.first());
        let value = match (kind, first_statement) {
            (AccessorKind::Getter, Some(Statement::ReturnStatement(ret))) => ret
                .argument
                .as_ref()
                .map(|arg| (self.slice(arg.span()).to_string(), arg.span())),
            _ => None,
        };
        let assigned = match (kind, first_statement) {
            (AccessorKind::Setter, Some(stmt)) => ASSIGNMENT_RE
                .captures(self.slice(stmt.span()).trim())
                .map(|c| c[1].trim().to_string()),
            _ => None,
        };

        MemberFacts {
            name: def
                .key
                .static_name()
                .map(|n| n.to_string())
                .unwrap_or_default(),
            kind,
            is_static: def.r#static,
            span: def.span,
            declared_type,
            value,
            assigned,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODEL
// ═══════════════════════════════════════════════════════════════════════════════

pub struct SemanticModel<'c> {
    unit: String,
    index: LineIndex,
    classes: Vec<ClassFacts>,
    catalog: &'c TypeCatalog,
    references: &'c ReferenceSet,
}

impl<'c> SemanticModel<'c> {
    pub fn build(tree: &SyntaxTree, catalog: &'c TypeCatalog, references: &'c ReferenceSet) -> Self {
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, tree.text(), source_type()).parse();
        let mut collector = FactCollector {
            text: tree.text(),
            classes: Vec::new(),
            open: Vec::new(),
        };
        collector.visit_program(&ret.program);

        Self {
            unit: tree.name().to_string(),
            index: LineIndex::new(tree.text()),
            classes: collector.classes,
            catalog,
            references,
        }
    }

    pub fn catalog(&self) -> &'c TypeCatalog {
        self.catalog
    }

    pub fn classes(&self) -> &[ClassFacts] {
        &self.classes
    }

    pub fn class(&self, name: &str) -> Option<&ClassFacts> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn location(&self, span: Span) -> SourceLocation {
        self.index.location(span.start as usize)
    }

    /// Binding properties of every class, in declaration order.
    pub fn binding_properties(&self) -> Vec<BindingProperty<'_>> {
        let mut out: Vec<BindingProperty> = Vec::new();
        for class in &self.classes {
            for member in &class.members {
                if !member.name.starts_with(BINDING_PROPERTY_PREFIX) {
                    continue;
                }
                if out
                    .iter()
                    .any(|p| std::ptr::eq(p.class, class) && p.name == member.name)
                {
                    continue;
                }
                out.push(BindingProperty {
                    class,
                    name: &member.name,
                    getter: class.member(&member.name, AccessorKind::Getter),
                    setter: class.member(&member.name, AccessorKind::Setter),
                });
            }
        }
        out
    }

    pub fn resolve_type(&self, text: &str) -> Option<TypeId> {
        self.catalog.lookup_display(text.trim())
    }

    pub fn wrapped_type(&self, class: &ClassFacts) -> Option<TypeId> {
        class.wrapped_type.as_deref().and_then(|t| self.resolve_type(t))
    }

    /// Follows a dotted member path from `root` through public instance
    /// properties and fields.
    pub fn resolve_path(&self, root: TypeId, path: &str) -> Option<PathTarget> {
        let mut target = PathTarget {
            ty: root,
            writable: false,
        };
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            let (_, member) = self.catalog.find_member(target.ty, segment, |m| {
                m.is_public
                    && !m.is_static
                    && m.parameters.is_empty()
                    && matches!(m.kind, MemberKind::Property | MemberKind::Field)
            })?;
            target = PathTarget {
                ty: member.ty?,
                writable: member.kind == MemberKind::Field || member.can_write,
            };
        }
        Some(target)
    }

    pub fn value_type(&self, class: &ClassFacts, value: &str) -> ValueType {
        let value = value.trim();
        match fixup_shape(value) {
            Some(FixupShape::Unwrap(inner)) => {
                return match self.value_type(class, inner) {
                    ValueType::Known(t) => {
                        ValueType::Known(self.catalog.nullable_underlying(t).unwrap_or(t))
                    }
                    other => other,
                };
            }
            Some(FixupShape::Convert { target, .. }) => {
                return match self.resolve_type(target) {
                    Some(t) => ValueType::Known(t),
                    None => ValueType::Opaque,
                };
            }
            None => {}
        }
        if let Some(caps) = SOURCE_PATH_RE.captures(value) {
            let Some(root) = self.wrapped_type(class) else {
                return ValueType::Opaque;
            };
            let path = caps[1].trim_start_matches('.');
            return match self.resolve_path(root, path) {
                Some(target) => ValueType::Known(target.ty),
                None => ValueType::UnresolvedMember(path.to_string()),
            };
        }
        ValueType::Opaque
    }

    /// Target of a setter's assignment, `None` when it is not a source path
    /// or does not resolve.
    pub fn setter_target(&self, class: &ClassFacts, setter: &MemberFacts) -> Option<PathTarget> {
        let assigned = setter.assigned.as_deref()?;
        let caps = SOURCE_PATH_RE.captures(assigned)?;
        let path = caps[1].trim_start_matches('.');
        if path.is_empty() {
            return None;
        }
        self.resolve_path(self.wrapped_type(class)?, path)
    }

    /// Whether the setter of a binding property may stay: its target must be
    /// writable and accept the declared type without a conversion.
    pub fn setter_is_valid(&self, property: &BindingProperty) -> bool {
        let Some(setter) = property.setter else {
            return true;
        };
        let Some(declared) = property.declared_type().and_then(|t| self.resolve_type(t)) else {
            return false;
        };
        match self.setter_target(property.class, setter) {
            Some(target) => {
                target.writable && self.catalog.classify_conversion(declared, target.ty).is_implicit()
            }
            None => false,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DIAGNOSTICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn diagnostics(&self) -> Vec<CompilerError> {
        let mut out = Vec::new();
        for property in self.binding_properties() {
            self.check_binding(&property, &mut out);
        }
        out
    }

    fn error(&self, code: &str, message: String, span: Span) -> CompilerError {
        CompilerError::new(code, &message, &self.unit, self.location(span))
    }

    fn check_binding(&self, property: &BindingProperty, out: &mut Vec<CompilerError>) {
        let Some(declared_text) = property.declared_type() else {
            return;
        };
        let Some(declared) = self.resolve_type(declared_text) else {
            out.push(self.error(
                ERR_UNKNOWN_TYPE,
                format!("The type name '{}' could not be found", declared_text),
                property.span(),
            ));
            return;
        };

        let assembly = &self.catalog.get(declared).assembly;
        if !self.references.contains(assembly) {
            out.push(CompilerError::warning(
                WARN_UNREFERENCED_ASSEMBLY,
                &format!(
                    "The type '{}' is defined in assembly '{}', which is not referenced",
                    declared_text, assembly
                ),
                &self.unit,
                self.location(property.span()),
            ));
        }

        if let Some((value, span)) = property.getter.and_then(|g| g.value.as_ref()) {
            match self.value_type(property.class, value) {
                ValueType::Known(actual) => {
                    let conversion = self.catalog.classify_conversion(actual, declared);
                    if !conversion.is_implicit() {
                        let mut err = self.error(
                            ERR_NO_CONVERSION,
                            format!(
                                "Cannot implicitly convert type '{}' to '{}'",
                                self.catalog.display_name(actual),
                                declared_text
                            ),
                            *span,
                        );
                        if conversion != Conversion::None {
                            err.hints.push("An explicit conversion exists".to_string());
                        }
                        out.push(err);
                    }
                }
                ValueType::UnresolvedMember(path) => {
                    out.push(self.error(
                        ERR_UNRESOLVED_MEMBER,
                        format!("'{}' does not resolve to a readable member of the data source", path),
                        *span,
                    ));
                }
                ValueType::Opaque => {}
            }
        }

        if let Some(setter) = property.setter {
            if !self.setter_is_valid(property) {
                let target = setter
                    .assigned
                    .clone()
                    .unwrap_or_else(|| format!("this.{}", SOURCE_FIELD));
                out.push(self.error(
                    ERR_INVALID_SETTER,
                    format!(
                        "Property '{}' cannot assign '{}' to '{}'",
                        property.name, declared_text, target
                    ),
                    setter.span,
                ));
            }
        }
    }
}
