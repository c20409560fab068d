//! Shared compilation artifact.
//!
//! A `Compilation` is an immutable set of syntax trees plus the references and
//! type catalog they are checked against. Parallel fixup workers read it through
//! `SharedCompilation::snapshot` and publish rewritten trees through
//! `replace_tree`, the only mutator.

use oxc_allocator::Allocator;
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use rayon::prelude::*;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::diagnostics::{CompilerError, SourceLocation, ERR_PARSE, ERR_SEMANTIC};
use crate::references::ReferenceSet;
use crate::semantic::SemanticModel;
use crate::types::TypeCatalog;

pub fn source_type() -> SourceType {
    SourceType::default().with_typescript(true).with_module(true)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYNTAX TREE
// ═══════════════════════════════════════════════════════════════════════════════

/// One parsed unit. The oxc AST borrows its arena, so only the text and the
/// syntax diagnostics are kept; consumers re-parse on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxTree {
    name: String,
    text: Arc<str>,
    diagnostics: Vec<CompilerError>,
}

impl SyntaxTree {
    pub fn parse(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            text: Arc::from(text),
            diagnostics: syntax_diagnostics(name, text),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn diagnostics(&self) -> &[CompilerError] {
        &self.diagnostics
    }

    pub fn has_syntax_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

fn syntax_diagnostics(name: &str, text: &str) -> Vec<CompilerError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, text, source_type()).parse();
    if !ret.errors.is_empty() {
        return ret
            .errors
            .iter()
            .map(|e| CompilerError::new(ERR_PARSE, &e.to_string(), name, SourceLocation::new(1, 1)))
            .collect();
    }

    let semantic = SemanticBuilder::new()
        .with_check_syntax_error(true)
        .build(&ret.program);
    semantic
        .errors
        .iter()
        .map(|e| CompilerError::new(ERR_SEMANTIC, &e.to_string(), name, SourceLocation::new(1, 1)))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Compilation {
    trees: Vec<Arc<SyntaxTree>>,
    references: Arc<ReferenceSet>,
    catalog: Arc<TypeCatalog>,
}

/// Result of one compile pass.
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub diagnostics: Vec<CompilerError>,
    pub artifact: Arc<Compilation>,
}

impl CompileOutcome {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(CompilerError::is_error)
    }
}

impl Compilation {
    pub fn new(trees: Vec<SyntaxTree>, references: Arc<ReferenceSet>, catalog: Arc<TypeCatalog>) -> Self {
        Self {
            trees: trees.into_iter().map(Arc::new).collect(),
            references,
            catalog,
        }
    }

    pub fn trees(&self) -> &[Arc<SyntaxTree>] {
        &self.trees
    }

    pub fn tree(&self, name: &str) -> Option<&Arc<SyntaxTree>> {
        self.trees.iter().find(|t| t.name() == name)
    }

    pub fn references(&self) -> &ReferenceSet {
        &self.references
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn semantic_model(&self, tree: &SyntaxTree) -> SemanticModel<'_> {
        SemanticModel::build(tree, &self.catalog, &self.references)
    }

    /// Syntax plus semantic diagnostics for every tree, in tree order.
    pub fn diagnostics(&self) -> Vec<CompilerError> {
        self.trees
            .par_iter()
            .map(|tree| {
                if tree.has_syntax_errors() {
                    tree.diagnostics().to_vec()
                } else {
                    self.semantic_model(tree).diagnostics()
                }
            })
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED COMPILATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error, PartialEq)]
#[error("tree '{0}' is not part of the current compilation")]
pub struct StaleTree(pub String);

#[derive(Debug)]
pub struct SharedCompilation {
    current: Mutex<Arc<Compilation>>,
}

impl SharedCompilation {
    pub fn new(compilation: Compilation) -> Self {
        Self {
            current: Mutex::new(Arc::new(compilation)),
        }
    }

    /// Immutable view of the compilation as currently published.
    pub fn snapshot(&self) -> Arc<Compilation> {
        let guard = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Swaps `old` for `new`, copying the tree list. `old` must be the exact
    /// tree currently published under its name.
    pub fn replace_tree(&self, old: &Arc<SyntaxTree>, new: SyntaxTree) -> Result<Arc<SyntaxTree>, StaleTree> {
        let mut guard = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let index = guard
            .trees
            .iter()
            .position(|t| Arc::ptr_eq(t, old))
            .ok_or_else(|| StaleTree(old.name().to_string()))?;

        let new = Arc::new(new);
        let mut next = Compilation::clone(&guard);
        next.trees[index] = Arc::clone(&new);
        *guard = Arc::new(next);
        Ok(new)
    }

    pub fn outcome(&self) -> CompileOutcome {
        let artifact = self.snapshot();
        CompileOutcome {
            diagnostics: artifact.diagnostics(),
            artifact,
        }
    }
}
