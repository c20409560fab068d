//! Discovery Module
//!
//! Finds view definitions on disk and in the host template registry, then walks
//! each markup tree to collect the binding expressions a wrapper type must
//! expose.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::CompilerConfig;
use crate::diagnostics::{
    CompilerError, SourceLocation, ERR_BINDING_PATH, ERR_DIRECTIVE_VALUE, ERR_NOT_BINDABLE,
    ERR_NOT_QUALIFIED, ERR_NO_DEFAULT_PROPERTY, ERR_UNKNOWN_DIRECTIVE, ERR_UNKNOWN_ELEMENT,
    ERR_UNRESOLVED_TYPE,
};
use crate::host::HostContext;
use crate::markup::{parse_markup, MarkupElement};
use crate::syntax::{is_valid_member_path, BindingSyntax, ExpressionSyntax};
use crate::types::{MemberKind, TypeId};

pub const VIEW_ROOT_TAG: &str = "View";
pub const PROVIDER_ATTRIBUTE: &str = "Provider";
pub const PROVIDER_SENTINEL: &str = "Bindings";
pub const VIEW_MODEL_ATTRIBUTE: &str = "ViewModelType";
pub const NAMESPACE_ATTRIBUTE: &str = "Namespace";
pub const DIRECTIVE_TAG: &str = "Directive";
pub const DIRECTIVE_TYPE_ATTRIBUTE: &str = "Type";
pub const DEFAULT_NAMESPACE: &str = "Views.Generated";
pub const BINDING_PROPERTY_PREFIX: &str = "__bind_";

// ═══════════════════════════════════════════════════════════════════════════════
// MODEL
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct ViewDefinition {
    pub namespace: String,
    pub wrapper_name: String,
    pub path: String,
    pub root: MarkupElement,
    pub templated_control: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingExpressionInfo {
    pub file: String,
    pub location: SourceLocation,
    pub text: String,
    pub member_path: String,
    pub target_type: TypeId,
    pub property_name: String,
    pub generate_getter: bool,
    pub generate_setter: bool,
    pub nullable_fixup: bool,
    pub conversion_source: Option<String>,
    pub conversion_target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    Content,
    Items,
}

#[derive(Debug, Clone)]
pub struct WrapperInfo {
    /// Process-unique, names the temporary compilation unit.
    pub id: u64,
    pub class_name: String,
    pub namespace: String,
    pub wrapped_type: TypeId,
    pub expressions: Vec<BindingExpressionInfo>,
    pub imports: Vec<String>,
    pub references: Vec<String>,
    pub source_text: String,
    pub dependents: Vec<WrapperInfo>,
    pub content_kind: Option<ContentKind>,
    pub view: Arc<ViewDefinition>,
}

static WRAPPER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_wrapper_id() -> u64 {
    WRAPPER_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

impl WrapperInfo {
    pub fn unit_name(&self) -> String {
        format!("__unit_{}.ts", self.id)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.class_name)
    }

    /// This wrapper followed by all nested dependents, depth first.
    pub fn flatten(&self) -> Vec<&WrapperInfo> {
        let mut out = vec![self];
        for d in &self.dependents {
            out.extend(d.flatten());
        }
        out
    }

    pub fn for_each_mut<F: FnMut(&mut WrapperInfo)>(&mut self, f: &mut F) {
        f(self);
        for d in &mut self.dependents {
            d.for_each_mut(f);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DiscoveryErrorKind {
    #[error("unrecognized directive type '{0}'")]
    UnknownDirective(String),
    #[error("'{0}' directive requires a value")]
    DirectiveValue(String),
    #[error("'{property}' is not a bindable property of '{element}'")]
    NotBindable { element: String, property: String },
    #[error("'{0}' has no default property to bind its content to")]
    NoDefaultProperty(String),
    #[error("'{0}' is not a known element type")]
    UnknownElement(String),
    #[error("binding path '{0}' is not a dotted member path")]
    BindingPath(String),
    #[error("view model type '{0}' is not fully qualified")]
    NotQualified(String),
    #[error("'{0}' does not declare a ViewModelType")]
    MissingViewModelType(String),
    #[error("type '{0}' could not be resolved")]
    UnresolvedType(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{file}({location}): {kind}")]
pub struct DiscoveryError {
    pub file: String,
    pub location: SourceLocation,
    pub kind: DiscoveryErrorKind,
}

impl DiscoveryError {
    fn new(file: &str, location: SourceLocation, kind: DiscoveryErrorKind) -> Self {
        Self {
            file: file.to_string(),
            location,
            kind,
        }
    }

    pub fn code(&self) -> &'static str {
        match self.kind {
            DiscoveryErrorKind::UnknownDirective(_) => ERR_UNKNOWN_DIRECTIVE,
            DiscoveryErrorKind::DirectiveValue(_) => ERR_DIRECTIVE_VALUE,
            DiscoveryErrorKind::NotBindable { .. } => ERR_NOT_BINDABLE,
            DiscoveryErrorKind::NoDefaultProperty(_) => ERR_NO_DEFAULT_PROPERTY,
            DiscoveryErrorKind::UnknownElement(_) => ERR_UNKNOWN_ELEMENT,
            DiscoveryErrorKind::BindingPath(_) => ERR_BINDING_PATH,
            DiscoveryErrorKind::NotQualified(_) | DiscoveryErrorKind::MissingViewModelType(_) => {
                ERR_NOT_QUALIFIED
            }
            DiscoveryErrorKind::UnresolvedType(_) => ERR_UNRESOLVED_TYPE,
        }
    }

    pub fn to_compiler_error(&self) -> CompilerError {
        CompilerError::new(self.code(), &self.kind.to_string(), &self.file, self.location)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

static DEFAULT_SYNTAX: BindingSyntax = BindingSyntax;

pub struct Discovery<'a> {
    host: &'a HostContext,
    config: &'a CompilerConfig,
    syntax: &'a dyn ExpressionSyntax,
}

impl<'a> Discovery<'a> {
    pub fn new(host: &'a HostContext, config: &'a CompilerConfig) -> Self {
        Self {
            host,
            config,
            syntax: &DEFAULT_SYNTAX,
        }
    }

    pub fn with_syntax(mut self, syntax: &'a dyn ExpressionSyntax) -> Self {
        self.syntax = syntax;
        self
    }

    /// Recursively scans `root_dir` for view files. Files that fail to parse or
    /// are not views are skipped.
    pub fn find_views(&self, root_dir: &Path) -> Vec<Arc<ViewDefinition>> {
        let mut views = Vec::new();
        for file_path in self.find_view_files(root_dir) {
            let source = match fs::read_to_string(&file_path) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("[Discovery] Failed to read {:?}: {}", file_path, e);
                    continue;
                }
            };
            let path_str = file_path.to_string_lossy().to_string();
            match self.view_from_source(&source, &path_str) {
                Ok(Some(view)) => views.push(Arc::new(view)),
                Ok(None) => {
                    tracing::debug!("[Discovery] {} is not a view, skipping", path_str);
                }
                Err(e) => {
                    tracing::warn!("[Discovery] Skipping malformed markup {}: {}", path_str, e.message);
                }
            }
        }
        tracing::info!("[Discovery] Found {} views under {:?}", views.len(), root_dir);
        views
    }

    fn find_view_files(&self, dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .map(|entry| entry.into_path())
            .filter(|path| path.is_file() && self.config.is_view_file(path))
            .collect()
    }

    /// Parses a view document. `Ok(None)` means well-formed markup that is not
    /// a view (wrong root tag or a foreign provider).
    pub fn view_from_source(
        &self,
        source: &str,
        path: &str,
    ) -> Result<Option<ViewDefinition>, CompilerError> {
        let root = parse_markup(source, path)?;
        if root.tag != VIEW_ROOT_TAG {
            return Ok(None);
        }
        if let Some(provider) = root.attribute_value(PROVIDER_ATTRIBUTE) {
            if provider != PROVIDER_SENTINEL {
                return Ok(None);
            }
        }

        let stem = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("View");
        Ok(Some(ViewDefinition {
            namespace: namespace_of(&root),
            wrapper_name: unique_wrapper_name(stem),
            path: path.to_string(),
            root,
            templated_control: None,
        }))
    }

    /// One definition per template registered with the host.
    pub fn find_templates(&self) -> Vec<Arc<ViewDefinition>> {
        let mut views = Vec::new();
        for entry in self.host.templates().entries() {
            let path = format!("template:{}", entry.name);
            match parse_markup(&entry.markup, &path) {
                Ok(root) => views.push(Arc::new(ViewDefinition {
                    namespace: namespace_of(&root),
                    wrapper_name: unique_wrapper_name(&entry.name),
                    path,
                    root,
                    templated_control: entry.templated_control.clone(),
                })),
                Err(e) => {
                    tracing::warn!("[Discovery] Skipping template {}: {}", entry.name, e.message);
                }
            }
        }
        views
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // WRAPPER CONSTRUCTION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn build_wrapper(&self, view: Arc<ViewDefinition>) -> Result<WrapperInfo, DiscoveryError> {
        let root = &view.root;
        let wrapped_type = match &view.templated_control {
            Some(control) => self.host.catalog().lookup(control).ok_or_else(|| {
                DiscoveryError::new(
                    &view.path,
                    root.location,
                    DiscoveryErrorKind::UnresolvedType(control.clone()),
                )
            })?,
            None => self.resolve_view_model(&view.path, root)?,
        };

        let (imports, references) = parse_directives(&view.path, root)?;

        let mut walk = ExpressionWalk::new(self, &view, wrapped_type, &imports, &references);
        walk.visit_element(root, true)?;
        let ExpressionWalk {
            expressions,
            dependents,
            ..
        } = walk;

        let class_name = view.wrapper_name.clone();
        let namespace = view.namespace.clone();
        tracing::debug!(
            "[Discovery] {} binds {} expressions ({} dependents)",
            class_name,
            expressions.len(),
            dependents.len()
        );
        Ok(WrapperInfo {
            id: next_wrapper_id(),
            class_name,
            namespace,
            wrapped_type,
            expressions: finalize_expressions(expressions),
            imports,
            references,
            source_text: String::new(),
            dependents,
            content_kind: self.content_kind(wrapped_type),
            view,
        })
    }

    fn resolve_view_model(&self, file: &str, element: &MarkupElement) -> Result<TypeId, DiscoveryError> {
        let attr = element.attribute(VIEW_MODEL_ATTRIBUTE).ok_or_else(|| {
            DiscoveryError::new(
                file,
                element.location,
                DiscoveryErrorKind::MissingViewModelType(element.tag.clone()),
            )
        })?;
        let value = attr.value.trim();
        let (type_name, assembly) = value
            .split_once(',')
            .map(|(t, a)| (t.trim(), a.trim()))
            .filter(|(t, a)| !t.is_empty() && !a.is_empty())
            .ok_or_else(|| {
                DiscoveryError::new(
                    file,
                    attr.location,
                    DiscoveryErrorKind::NotQualified(value.to_string()),
                )
            })?;
        self.host
            .catalog()
            .resolve_qualified(type_name, assembly)
            .ok_or_else(|| {
                DiscoveryError::new(
                    file,
                    attr.location,
                    DiscoveryErrorKind::UnresolvedType(value.to_string()),
                )
            })
    }

    fn content_kind(&self, wrapped: TypeId) -> Option<ContentKind> {
        let catalog = self.host.catalog();
        let derives = |name: &str| {
            catalog
                .lookup(name)
                .map_or(false, |base| catalog.derives_from(wrapped, base))
        };
        if derives(&self.config.content_control_type) {
            Some(ContentKind::Content)
        } else if derives(&self.config.items_control_type) {
            Some(ContentKind::Items)
        } else {
            None
        }
    }

    fn is_template_region(&self, element_type: Option<TypeId>) -> bool {
        let catalog = self.host.catalog();
        match (element_type, catalog.lookup(&self.config.framework_template_type)) {
            (Some(ty), Some(template)) => catalog.derives_from(ty, template),
            _ => false,
        }
    }
}

fn namespace_of(root: &MarkupElement) -> String {
    root.attribute_value(NAMESPACE_ATTRIBUTE)
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE)
        .to_string()
}

/// Sanitised stem plus a random suffix, so equally named views in different
/// directories never collide.
pub fn unique_wrapper_name(stem: &str) -> String {
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{}_{}", name, suffix)
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIRECTIVES
// ═══════════════════════════════════════════════════════════════════════════════

/// Reads the `Directive` children of `root` into (imports, references).
pub fn parse_directives(
    file: &str,
    root: &MarkupElement,
) -> Result<(Vec<String>, Vec<String>), DiscoveryError> {
    let mut imports = Vec::new();
    let mut references = Vec::new();

    for directive in root.child_elements().filter(|e| e.tag == DIRECTIVE_TAG) {
        let kind = directive
            .attribute_value(DIRECTIVE_TYPE_ATTRIBUTE)
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        let target = match kind.as_str() {
            "import" => &mut imports,
            "reference" => &mut references,
            _ => {
                return Err(DiscoveryError::new(
                    file,
                    directive.location,
                    DiscoveryErrorKind::UnknownDirective(kind),
                ))
            }
        };
        let value = directive.text_content().trim().to_string();
        if value.is_empty() {
            return Err(DiscoveryError::new(
                file,
                directive.location,
                DiscoveryErrorKind::DirectiveValue(kind),
            ));
        }
        target.push(value);
    }

    Ok((imports, references))
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPRESSION WALK
// ═══════════════════════════════════════════════════════════════════════════════

struct ExpressionWalk<'d, 'a> {
    discovery: &'d Discovery<'a>,
    view: &'d Arc<ViewDefinition>,
    wrapped: TypeId,
    imports: &'d [String],
    references: &'d [String],
    class_name: String,
    expressions: Vec<BindingExpressionInfo>,
    dependents: Vec<WrapperInfo>,
}

impl<'d, 'a> ExpressionWalk<'d, 'a> {
    fn new(
        discovery: &'d Discovery<'a>,
        view: &'d Arc<ViewDefinition>,
        wrapped: TypeId,
        imports: &'d [String],
        references: &'d [String],
    ) -> Self {
        Self {
            discovery,
            view,
            wrapped,
            imports,
            references,
            class_name: view.wrapper_name.clone(),
            expressions: Vec::new(),
            dependents: Vec::new(),
        }
    }

    fn file(&self) -> &str {
        &self.view.path
    }

    fn visit_element(&mut self, element: &MarkupElement, is_root: bool) -> Result<(), DiscoveryError> {
        if element.tag == DIRECTIVE_TAG || element.tag.contains('.') {
            return Ok(());
        }

        let host = self.discovery.host;
        let element_type = host.known_type(&element.tag);

        if !is_root && self.discovery.is_template_region(element_type) {
            let dependent = self.build_dependent(element)?;
            self.dependents.push(dependent);
            return Ok(());
        }

        for attr in &element.attributes {
            if !self.discovery.syntax.is_binding_expression(&attr.value) {
                continue;
            }
            let (property, ty) = self.resolve_target(element, element_type, &attr.name, attr.location)?;
            self.record(&attr.value, attr.location, &property, ty)?;
        }

        let property_prefix = format!("{}.", element.tag);
        for child in element.child_elements() {
            let Some(property) = child.tag.strip_prefix(&property_prefix) else {
                continue;
            };
            let value = child.text_content();
            if !self.discovery.syntax.is_binding_expression(&value) {
                continue;
            }
            let (property, ty) = self.resolve_target(element, element_type, property, child.location)?;
            self.record(&value, child.location, &property, ty)?;
        }

        if let Some(text) = element.sole_text() {
            if self.discovery.syntax.is_binding_expression(&text.value) {
                let ty = element_type.ok_or_else(|| {
                    DiscoveryError::new(
                        self.file(),
                        element.location,
                        DiscoveryErrorKind::UnknownElement(element.tag.clone()),
                    )
                })?;
                let property = host.default_property(ty).map(str::to_string).ok_or_else(|| {
                    DiscoveryError::new(
                        self.file(),
                        text.location,
                        DiscoveryErrorKind::NoDefaultProperty(element.tag.clone()),
                    )
                })?;
                let (property, ty) = self.resolve_target(element, element_type, &property, text.location)?;
                self.record(&text.value, text.location, &property, ty)?;
            }
        }

        for child in element.child_elements() {
            self.visit_element(child, false)?;
        }
        Ok(())
    }

    /// Resolves `Container.Property` (attached) or `Property` (direct) to a
    /// bindable property and returns its name and type.
    fn resolve_target(
        &self,
        element: &MarkupElement,
        element_type: Option<TypeId>,
        name: &str,
        location: SourceLocation,
    ) -> Result<(String, TypeId), DiscoveryError> {
        let host = self.discovery.host;
        let catalog = host.catalog();
        let not_bindable = || {
            DiscoveryError::new(
                self.file(),
                location,
                DiscoveryErrorKind::NotBindable {
                    element: element.tag.clone(),
                    property: name.to_string(),
                },
            )
        };

        let (owner, property, attached) = match name.split_once('.') {
            Some((container, property)) => {
                (host.known_type(container).ok_or_else(not_bindable)?, property, true)
            }
            None => {
                let owner = element_type.ok_or_else(|| {
                    DiscoveryError::new(
                        self.file(),
                        element.location,
                        DiscoveryErrorKind::UnknownElement(element.tag.clone()),
                    )
                })?;
                (owner, name, false)
            }
        };

        catalog
            .find_member(owner, property, |m| m.bindable && m.attached == attached)
            .and_then(|(_, m)| m.ty)
            .map(|ty| (property.to_string(), ty))
            .ok_or_else(not_bindable)
    }

    fn record(
        &mut self,
        text: &str,
        location: SourceLocation,
        property: &str,
        bindable_type: TypeId,
    ) -> Result<(), DiscoveryError> {
        let member_path = self.discovery.syntax.member_path(text);
        if !is_valid_member_path(&member_path) {
            return Err(DiscoveryError::new(
                self.file(),
                location,
                DiscoveryErrorKind::BindingPath(member_path),
            ));
        }

        // A same-named settable property on the data source decides the type.
        let catalog = self.discovery.host.catalog();
        let target_type = catalog
            .find_member(self.wrapped, property, |m| {
                m.kind == MemberKind::Property
                    && m.is_public
                    && !m.is_static
                    && m.can_write
                    && m.parameters.is_empty()
            })
            .and_then(|(_, m)| m.ty)
            .unwrap_or(bindable_type);

        self.expressions.push(BindingExpressionInfo {
            file: self.file().to_string(),
            location,
            text: text.to_string(),
            member_path,
            target_type,
            property_name: String::new(),
            generate_getter: true,
            generate_setter: true,
            nullable_fixup: false,
            conversion_source: None,
            conversion_target: None,
        });
        Ok(())
    }

    fn build_dependent(&mut self, element: &MarkupElement) -> Result<WrapperInfo, DiscoveryError> {
        let wrapped = self.discovery.resolve_view_model(self.file(), element)?;
        let mut walk = ExpressionWalk::new(
            self.discovery,
            self.view,
            wrapped,
            self.imports,
            self.references,
        );
        walk.class_name = format!("{}_Template{}", self.class_name, self.dependents.len());
        for child in element.child_elements() {
            walk.visit_element(child, false)?;
        }
        let ExpressionWalk {
            class_name,
            expressions,
            dependents,
            ..
        } = walk;

        Ok(WrapperInfo {
            id: next_wrapper_id(),
            class_name,
            namespace: self.view.namespace.clone(),
            wrapped_type: wrapped,
            expressions: finalize_expressions(expressions),
            imports: self.imports.to_vec(),
            references: self.references.to_vec(),
            source_text: String::new(),
            dependents,
            content_kind: self.discovery.content_kind(wrapped),
            view: Arc::clone(self.view),
        })
    }
}

/// Collapses identical `(text, type)` pairs (first occurrence wins) and names
/// the generated properties in discovery order.
pub fn finalize_expressions(expressions: Vec<BindingExpressionInfo>) -> Vec<BindingExpressionInfo> {
    let mut seen = HashSet::new();
    let mut out: Vec<BindingExpressionInfo> = expressions
        .into_iter()
        .filter(|e| seen.insert((e.text.clone(), e.target_type)))
        .collect();
    for (i, expr) in out.iter_mut().enumerate() {
        expr.property_name = format!("{}{}", BINDING_PROPERTY_PREFIX, i);
    }
    out
}
