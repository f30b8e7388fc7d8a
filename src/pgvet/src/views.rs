//! The view fragment library and its resolution into concrete views.
//!
//! Views are declared as fragment sequences: literal SQL text interleaved
//! with references to other named views. Resolution substitutes every
//! reference with the generated name of the referenced view and emits the
//! fully concrete `CREATE VIEW` bodies in dependency order.
//!
//! The library itself is an immutable arena; resolution is a pure function
//! over it. A view whose source text changes produces different resolved SQL
//! and therefore a different generated name, so it and everything that
//! references it are naturally re-derived on the next run without any
//! explicit reset bookkeeping.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::sourcemap::{MapEntry, SourceMap};

/// Identity of a view in the library: the `(module, name)` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ViewId {
    /// Host module (file) the view is declared in.
    pub module: String,
    /// Declared view name within the module.
    pub name: String,
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.name)
    }
}

/// One segment of a view fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Segment {
    /// Literal SQL text copied verbatim from the host source.
    #[serde(rename_all = "camelCase")]
    Literal {
        /// The SQL text.
        text: String,
        /// Offset of the text in the host source file.
        source_offset: u32,
    },
    /// A reference to another named view.
    #[serde(rename_all = "camelCase")]
    Ref {
        /// Module of the referenced view; defaults to the referencing
        /// view's own module.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module: Option<String>,
        /// Name of the referenced view.
        name: String,
        /// Offset of the reference in the host source file.
        source_offset: u32,
    },
}

impl Segment {
    fn source_offset(&self) -> u32 {
        match self {
            Segment::Literal { source_offset, .. } | Segment::Ref { source_offset, .. } => {
                *source_offset
            }
        }
    }
}

/// A view as declared in the host source: an ordered fragment sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewDecl {
    /// Host module (file) the view is declared in.
    pub module: String,
    /// Declared view name.
    pub name: String,
    /// The fragment segments, in order.
    pub segments: Vec<Segment>,
    /// Full contents of the declaring file, for rendering positions.
    #[serde(default)]
    pub source_text: String,
}

impl ViewDecl {
    /// The view's identity.
    pub fn id(&self) -> ViewId {
        ViewId {
            module: self.module.clone(),
            name: self.name.clone(),
        }
    }

    fn first_offset(&self) -> u32 {
        self.segments.first().map(Segment::source_offset).unwrap_or(0)
    }
}

/// A fully substituted view, ready to create in the sandbox.
#[derive(Debug, Clone)]
pub struct ResolvedView {
    /// The view's identity in the library.
    pub id: ViewId,
    /// The generated, content-derived view name.
    ///
    /// Identical resolved SQL always yields the identical name, so checking
    /// whether a view of this name is already installed doubles as a SQL
    /// equivalence check.
    pub generated_name: String,
    /// The fully substituted view body (the `SELECT ...` text).
    pub sql: String,
    /// Map from body offsets back into the host source.
    pub source_map: SourceMap,
    /// Contents of the declaring file.
    pub source_text: String,
}

/// Why a view could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveErrorKind {
    /// The view depends on itself, directly or transitively.
    SelfDependency,
    /// A referenced view is absent from the library.
    MissingDependency {
        /// The referenced name.
        name: String,
        /// The module the name was resolved against.
        module: String,
    },
}

/// A non-fatal resolution error, attributed to a source position.
#[derive(Debug, Clone)]
pub struct ResolveError {
    /// The view that failed to resolve.
    pub view: ViewId,
    /// What went wrong.
    pub kind: ResolveErrorKind,
    /// Position of the offending fragment in the declaring file.
    pub source_offset: u32,
    /// Contents of the declaring file.
    pub source_text: String,
}

/// The outcome of resolving a view library.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Fully resolved views in dependency order: children strictly before
    /// parents, each view exactly once. Views that could not be resolved are
    /// excluded entirely.
    pub views: Vec<ResolvedView>,
    /// Resolution errors; independent views still resolve.
    pub errors: Vec<ResolveError>,
}

impl Resolution {
    /// Looks up the generated name for a library view, if it resolved.
    pub fn generated_name(&self, id: &ViewId) -> Option<&str> {
        self.views
            .iter()
            .find(|v| &v.id == id)
            .map(|v| v.generated_name.as_str())
    }
}

/// Derives the generated view name from resolved SQL text.
pub fn generated_view_name(sql: &str) -> String {
    let digest = Sha256::digest(sql.as_bytes());
    let hex = format!("{:x}", digest);
    format!("pgv_{}", &hex[..16])
}

struct Resolved {
    generated_name: String,
    sql: String,
    entries: Vec<MapEntry>,
}

/// Resolves a view library into concrete, dependency-ordered views.
pub fn resolve(library: &[ViewDecl]) -> Resolution {
    let mut decls: BTreeMap<ViewId, &ViewDecl> = BTreeMap::new();
    for decl in library {
        decls.entry(decl.id()).or_insert(decl);
    }

    let mut errors = Vec::new();
    let cyclic = cyclic_members(&decls);
    for id in &cyclic {
        let decl = decls[id];
        errors.push(ResolveError {
            view: id.clone(),
            kind: ResolveErrorKind::SelfDependency,
            source_offset: decl.first_offset(),
            source_text: decl.source_text.clone(),
        });
    }

    let mut memo: BTreeMap<ViewId, Option<Resolved>> = BTreeMap::new();
    for decl in library {
        resolve_one(&decl.id(), &decls, &cyclic, &mut memo, &mut errors);
    }

    // Emit children strictly before parents. The added set guarantees each
    // view appears exactly once even when it is a dependency of several
    // parents.
    let mut added = BTreeSet::new();
    let mut views = Vec::new();
    for decl in library {
        emit(&decl.id(), &decls, &memo, &mut added, &mut views);
    }

    Resolution { views, errors }
}

fn dependency_id(decl: &ViewDecl, module: &Option<String>, name: &str) -> ViewId {
    ViewId {
        module: module.clone().unwrap_or_else(|| decl.module.clone()),
        name: name.to_owned(),
    }
}

fn resolve_one(
    id: &ViewId,
    decls: &BTreeMap<ViewId, &ViewDecl>,
    cyclic: &BTreeSet<ViewId>,
    memo: &mut BTreeMap<ViewId, Option<Resolved>>,
    errors: &mut Vec<ResolveError>,
) -> bool {
    if let Some(resolved) = memo.get(id) {
        return resolved.is_some();
    }
    if cyclic.contains(id) {
        memo.insert(id.clone(), None);
        return false;
    }
    let decl = decls[id];
    let mut sql = String::new();
    let mut entries = Vec::new();
    let mut ok = true;
    for segment in &decl.segments {
        match segment {
            Segment::Literal { text, source_offset } => {
                let start = u32::try_from(sql.len()).expect("sql fits in u32");
                sql.push_str(text);
                let end = u32::try_from(sql.len()).expect("sql fits in u32");
                entries.push(MapEntry::literal(*source_offset, start, end));
            }
            Segment::Ref {
                module,
                name,
                source_offset,
            } => {
                let dep = dependency_id(decl, module, name);
                if !decls.contains_key(&dep) {
                    errors.push(ResolveError {
                        view: id.clone(),
                        kind: ResolveErrorKind::MissingDependency {
                            name: dep.name.clone(),
                            module: dep.module.clone(),
                        },
                        source_offset: *source_offset,
                        source_text: decl.source_text.clone(),
                    });
                    ok = false;
                    continue;
                }
                if !resolve_one(&dep, decls, cyclic, memo, errors) {
                    // The root cause is already reported against the
                    // dependency itself.
                    ok = false;
                    continue;
                }
                let dep_name = memo[&dep]
                    .as_ref()
                    .expect("dependency resolved")
                    .generated_name
                    .clone();
                let start = u32::try_from(sql.len()).expect("sql fits in u32");
                sql.push_str(&dep_name);
                let end = u32::try_from(sql.len()).expect("sql fits in u32");
                entries.push(MapEntry::substitution(*source_offset, start, end));
            }
        }
    }
    let resolved = ok.then(|| Resolved {
        generated_name: generated_view_name(&sql),
        sql,
        entries,
    });
    memo.insert(id.clone(), resolved);
    ok
}

fn emit(
    id: &ViewId,
    decls: &BTreeMap<ViewId, &ViewDecl>,
    memo: &BTreeMap<ViewId, Option<Resolved>>,
    added: &mut BTreeSet<ViewId>,
    out: &mut Vec<ResolvedView>,
) {
    if added.contains(id) {
        return;
    }
    let Some(Some(resolved)) = memo.get(id) else {
        return;
    };
    added.insert(id.clone());
    let decl = decls[id];
    for segment in &decl.segments {
        if let Segment::Ref { module, name, .. } = segment {
            emit(&dependency_id(decl, module, name), decls, memo, added, out);
        }
    }
    out.push(ResolvedView {
        id: id.clone(),
        generated_name: resolved.generated_name.clone(),
        sql: resolved.sql.clone(),
        source_map: SourceMap::new(resolved.entries.clone()),
        source_text: decl.source_text.clone(),
    });
}

/// The set of views that depend on themselves, directly or transitively.
fn cyclic_members(decls: &BTreeMap<ViewId, &ViewDecl>) -> BTreeSet<ViewId> {
    let mut cyclic = BTreeSet::new();
    for start in decls.keys() {
        let mut stack: Vec<ViewId> = direct_deps(decls[start]);
        let mut seen = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if &id == start {
                cyclic.insert(start.clone());
                break;
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(decl) = decls.get(&id) {
                stack.extend(direct_deps(decl));
            }
        }
    }
    cyclic
}

fn direct_deps(decl: &ViewDecl) -> Vec<ViewId> {
    decl.segments
        .iter()
        .filter_map(|segment| match segment {
            Segment::Ref { module, name, .. } => Some(dependency_id(decl, module, name)),
            Segment::Literal { .. } => None,
        })
        .collect()
}
