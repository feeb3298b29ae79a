//! Core types for the knowledge base.
//!
//! This module defines the records that flow between pipeline stages:
//! - Units and their dependency records
//! - Per-unit symbol records (types, enums, callables, aliases, delegates)

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered key/value specifiers captured from a declaring macro
/// (`UCLASS(BlueprintType, meta=(DisplayName="X"))`). Flags map to `"true"`.
pub type Specifiers = IndexMap<String, String>;

/// Prefix of an interface type name. A base named `I` followed by an
/// uppercase letter is treated as an interface.
pub fn is_interface_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some('I'), Some(c)) if c.is_ascii_uppercase()
    )
}

/// Source position of a symbol. `file` is relative to the source root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: usize,
}

impl Location {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

// ============================================================================
// Units
// ============================================================================

/// An independently buildable module, identified by its build manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub name: String,
    /// Manifest path relative to the source root.
    pub manifest_path: String,
    /// Unit directory relative to the source root.
    pub dir: String,
    pub category: String,
    /// SHA-256 over the manifest and every owned source file.
    pub content_hash: String,
    /// Owned source files, sorted, relative to the source root.
    pub source_files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Public,
    Private,
    Dynamic,
    Weak,
    Circular,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Dynamic => "dynamic",
            Self::Weak => "weak",
            Self::Circular => "circular",
        }
    }
}

/// Declared dependencies of one unit, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub unit: String,
    pub public: Vec<String>,
    pub private: Vec<String>,
    #[serde(default)]
    pub dynamic: Vec<String>,
    #[serde(default)]
    pub weak: Vec<String>,
    #[serde(default)]
    pub circular: Vec<String>,
}

impl DependencyRecord {
    pub fn empty(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            ..Self::default()
        }
    }

    pub fn list_mut(&mut self, kind: DependencyKind) -> &mut Vec<String> {
        match kind {
            DependencyKind::Public => &mut self.public,
            DependencyKind::Private => &mut self.private,
            DependencyKind::Dynamic => &mut self.dynamic,
            DependencyKind::Weak => &mut self.weak,
            DependencyKind::Circular => &mut self.circular,
        }
    }

    /// Append a dependency, keeping the first occurrence of duplicates.
    pub fn push(&mut self, kind: DependencyKind, name: &str) {
        let list = self.list_mut(kind);
        if !list.iter().any(|existing| existing == name) {
            list.push(name.to_string());
        }
    }

    /// Edges that make up the dependency graph: public, private and
    /// dynamically loaded dependencies.
    pub fn graph_edges(&self) -> impl Iterator<Item = (&str, DependencyKind)> {
        self.public
            .iter()
            .map(|d| (d.as_str(), DependencyKind::Public))
            .chain(
                self.private
                    .iter()
                    .map(|d| (d.as_str(), DependencyKind::Private)),
            )
            .chain(
                self.dynamic
                    .iter()
                    .map(|d| (d.as_str(), DependencyKind::Dynamic)),
            )
    }

    pub fn is_empty(&self) -> bool {
        self.public.is_empty()
            && self.private.is_empty()
            && self.dynamic.is_empty()
            && self.weak.is_empty()
            && self.circular.is_empty()
    }
}

// ============================================================================
// Symbols
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Class,
    Struct,
    Union,
}

impl TypeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Union => "union",
        }
    }
}

/// Data member of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDecl {
    pub name: String,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macro_name: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub specifiers: Specifiers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    /// Enclosing namespaces and types joined with `::`. Empty at global scope.
    pub namespace: String,
    pub kind: TypeKind,
    /// Full ordered base list.
    pub bases: Vec<String>,
    /// First base that is not an interface.
    pub parent: Option<String>,
    pub interfaces: Vec<String>,
    /// Member callable names in declaration order.
    pub methods: Vec<String>,
    pub properties: Vec<PropertyDecl>,
    pub doc: Option<String>,
    pub location: Location,
    pub macro_name: Option<String>,
    pub specifiers: Specifiers,
}

impl TypeDecl {
    pub fn qualified_name(&self) -> String {
        qualify(&self.namespace, &self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    pub namespace: String,
    pub scoped: bool,
    pub underlying: Option<String>,
    pub values: Vec<String>,
    pub doc: Option<String>,
    pub location: Location,
    pub macro_name: Option<String>,
    pub specifiers: Specifiers,
}

impl EnumDecl {
    pub fn qualified_name(&self) -> String {
        qualify(&self.namespace, &self.name)
    }
}

/// One parameter of a callable or delegate signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// A function or method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callable {
    pub name: String,
    pub namespace: String,
    /// Owning type for member callables.
    pub owner: Option<String>,
    pub return_type: String,
    pub params: Vec<Param>,
    pub is_pure_virtual: bool,
    pub is_virtual: bool,
    pub is_static: bool,
    pub is_const: bool,
    pub doc: Option<String>,
    pub declaration: Location,
    /// Where the body lives, once resolved.
    pub definition: Option<Location>,
    pub macro_name: Option<String>,
    pub specifiers: Specifiers,
    /// Names called from the body, sorted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<String>,
}

impl Callable {
    /// `Owner::Name` for members, plain name otherwise, namespace-qualified.
    pub fn qualified_name(&self) -> String {
        match &self.owner {
            Some(owner) => qualify(&self.namespace, &format!("{owner}::{}", self.name)),
            None => qualify(&self.namespace, &self.name),
        }
    }

    pub fn param_types(&self) -> String {
        self.params
            .iter()
            .map(|p| p.type_name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn signature(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|p| match &p.name {
                Some(name) => format!("{} {}", p.type_name, name),
                None => p.type_name.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let mut sig = if self.return_type.is_empty() {
            format!("{}({})", self.name, params)
        } else {
            format!("{} {}({})", self.return_type, self.name, params)
        };
        if self.is_const {
            sig.push_str(" const");
        }
        if self.is_pure_virtual {
            sig.push_str(" = 0");
        }
        sig
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasForm {
    Typedef,
    Using,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAlias {
    pub name: String,
    pub namespace: String,
    pub target: String,
    pub form: AliasForm,
    pub doc: Option<String>,
    pub location: Location,
}

impl TypeAlias {
    pub fn qualified_name(&self) -> String {
        qualify(&self.namespace, &self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegateKind {
    Single,
    Multicast,
    Dynamic,
    DynamicMulticast,
    Sparse,
    Event,
}

impl DelegateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multicast => "multicast",
            Self::Dynamic => "dynamic",
            Self::DynamicMulticast => "dynamic_multicast",
            Self::Sparse => "sparse",
            Self::Event => "event",
        }
    }
}

/// A delegate type declared through a `DECLARE_*DELEGATE*` or
/// `DECLARE_*EVENT*` macro. The declaring macro name and any return/owner
/// types live in `specifiers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateDecl {
    pub name: String,
    pub namespace: String,
    pub kind: DelegateKind,
    pub params: Vec<Param>,
    pub doc: Option<String>,
    pub location: Location,
    pub specifiers: Specifiers,
}

impl DelegateDecl {
    pub fn qualified_name(&self) -> String {
        qualify(&self.namespace, &self.name)
    }
}

/// A file that could not be extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub file: String,
    pub kind: String,
    pub error: String,
}

/// Everything extracted from one unit's source files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub unit: String,
    pub types: Vec<TypeDecl>,
    pub enums: Vec<EnumDecl>,
    pub callables: Vec<Callable>,
    pub aliases: Vec<TypeAlias>,
    pub delegates: Vec<DelegateDecl>,
    pub failures: Vec<FileFailure>,
    pub files_parsed: usize,
}

impl SymbolRecord {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            ..Self::default()
        }
    }

    pub fn symbol_count(&self) -> usize {
        self.types.len()
            + self.enums.len()
            + self.callables.len()
            + self.aliases.len()
            + self.delegates.len()
    }

    pub fn find_type(&self, name: &str) -> Option<&TypeDecl> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn find_callable(&self, qualified_name: &str) -> Option<&Callable> {
        self.callables
            .iter()
            .find(|c| c.qualified_name() == qualified_name)
    }
}

/// Join a scope and a name with `::`.
pub fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}::{name}")
    }
}
