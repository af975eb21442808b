//! Top-level declarations of a script unit

use super::{Block, Ident, Span, Spanned};

/// A parsed script file: the root of the syntax tree
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptUnit {
    /// Top-level items in declaration order
    pub items: Vec<Item>,
    /// Span of the whole unit
    pub span: Span,
}

impl ScriptUnit {
    /// Create a new script unit
    #[must_use]
    pub fn new(items: Vec<Item>, span: Span) -> Self {
        Self { items, span }
    }

    /// Iterate over the subroutine declarations in declaration order
    pub fn subroutines(&self) -> impl Iterator<Item = &SubroutineDecl> {
        self.items.iter().filter_map(|item| match &item.kind {
            ItemKind::Subroutine(decl) => Some(decl),
            ItemKind::Include(_) => None,
        })
    }

    /// Iterate over the include directives in declaration order
    pub fn includes(&self) -> impl Iterator<Item = &Include> {
        self.items.iter().filter_map(|item| match &item.kind {
            ItemKind::Include(include) => Some(include),
            ItemKind::Subroutine(_) => None,
        })
    }

    /// Find an include by its alias
    #[must_use]
    pub fn include_by_alias(&self, alias: &str) -> Option<&Include> {
        self.includes().find(|include| include.alias == alias)
    }

    /// Find a subroutine declaration index by name
    #[must_use]
    pub fn find_subroutine(&self, name: &str) -> Option<usize> {
        self.subroutines().position(|decl| decl.name.name == name)
    }
}

impl Spanned for ScriptUnit {
    fn span(&self) -> Span {
        self.span
    }
}

/// A top-level item
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// What kind of item this is
    pub kind: ItemKind,
    /// Source location
    pub span: Span,
}

impl Item {
    /// Create a new item
    #[must_use]
    pub fn new(kind: ItemKind, span: Span) -> Self {
        Self { kind, span }
    }
}

impl Spanned for Item {
    fn span(&self) -> Span {
        self.span
    }
}

/// The kind of top-level item
#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    /// A chapter, scene, or function declaration
    Subroutine(SubroutineDecl),
    /// An `include "path" [as alias];` directive
    Include(Include),
}

/// The kind of subroutine a declaration introduces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SubroutineKind {
    Chapter = 0,
    Scene = 1,
    Function = 2,
}

impl SubroutineKind {
    /// Keyword spelling of the kind
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Chapter => "chapter",
            Self::Scene => "scene",
            Self::Function => "function",
        }
    }
}

impl TryFrom<u8> for SubroutineKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Chapter),
            1 => Ok(Self::Scene),
            2 => Ok(Self::Function),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for SubroutineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// A declared parameter. Owned by the declaration; the parser's
/// disambiguation scope refers to these by name while the body parses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Parameter name, including any `$` sigil
    pub name: Ident,
}

impl Parameter {
    /// Create a new parameter
    #[must_use]
    pub fn new(name: Ident) -> Self {
        Self { name }
    }
}

/// A chapter, scene, or function declaration
#[derive(Debug, Clone, PartialEq)]
pub struct SubroutineDecl {
    /// Chapter, scene, or function
    pub kind: SubroutineKind,
    /// Declared name
    pub name: Ident,
    /// Declared parameters (always empty for chapters and scenes)
    pub params: Vec<Parameter>,
    /// The body
    pub body: Block,
    /// Dialogue blocks declared in the body, in source order:
    /// (box name, block name, span of the start tag)
    pub dialogue_blocks: Vec<(String, String, Span)>,
    /// Source location of the whole declaration
    pub span: Span,
}

impl SubroutineDecl {
    /// Parameter names in declaration order
    #[must_use]
    pub fn param_names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.name.clone()).collect()
    }
}

impl Spanned for SubroutineDecl {
    fn span(&self) -> Span {
        self.span
    }
}

/// An `include` directive referencing another script file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    /// The quoted path as written
    pub path: String,
    /// The alias used for qualified calls; defaults to the file stem
    pub alias: String,
    /// Source location
    pub span: Span,
}

impl Include {
    /// Create a new include, deriving the default alias from the path
    #[must_use]
    pub fn new(path: impl Into<String>, alias: Option<String>, span: Span) -> Self {
        let path = path.into();
        let alias = alias.unwrap_or_else(|| {
            std::path::Path::new(&path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone())
        });
        Self { path, alias, span }
    }
}

impl Spanned for Include {
    fn span(&self) -> Span {
        self.span
    }
}
