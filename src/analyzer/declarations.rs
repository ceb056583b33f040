//! Host API declaration surfaces
//!
//! Parses a host's published `.d.ts` surface into an in-memory index of
//! types and members, used as ground truth by the snippet checker. Indexes
//! are built once per host and shared read-only afterwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tree_sitter::{Node, Parser};

/// Host applications with a scripting surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Host {
    Excel,
    Word,
    PowerPoint,
}

impl Host {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "excel" => Some(Host::Excel),
            "word" => Some(Host::Word),
            "powerpoint" => Some(Host::PowerPoint),
            _ => None,
        }
    }

    /// The global namespace the host exposes to snippets.
    pub fn namespace(&self) -> &'static str {
        match self {
            Host::Excel => "Excel",
            Host::Word => "Word",
            Host::PowerPoint => "PowerPoint",
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// One declared parameter of a method.
#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: String,
    pub type_name: String,
    pub optional: bool,
}

#[derive(Debug, Clone)]
pub enum MemberKind {
    Method {
        params: Vec<ParamDecl>,
        return_type: String,
    },
    Property {
        type_name: String,
        readonly: bool,
    },
}

/// One member of a declared type, with its raw signature text and doc comment.
#[derive(Debug, Clone)]
pub struct MemberDecl {
    pub name: String,
    pub signature: String,
    pub doc: String,
    pub kind: MemberKind,
}

impl MemberDecl {
    pub fn is_method(&self) -> bool {
        matches!(self.kind, MemberKind::Method { .. })
    }
}

/// One class/interface/enum from the declaration surface.
#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub name: String,
    pub namespace: String,
    pub extends: Option<String>,
    pub members: Vec<MemberDecl>,
    pub is_enum: bool,
}

/// Parsed declaration surface for one host.
pub struct DeclarationIndex {
    host: Host,
    types: HashMap<String, TypeDecl>,
    namespace_functions: HashMap<String, MemberDecl>,
}

impl DeclarationIndex {
    /// Parse a declaration surface. Parse problems in the surface itself are
    /// skipped over, never fatal: an unparsable region simply contributes no
    /// types.
    pub fn parse(host: Host, source: &str) -> Self {
        let mut index = Self {
            host,
            types: HashMap::new(),
            namespace_functions: HashMap::new(),
        };

        let mut parser = Parser::new();
        if parser
            .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            .is_err()
        {
            return index;
        }
        let Some(tree) = parser.parse(source, None) else {
            return index;
        };

        collect_scope(&tree.root_node(), source, host.namespace(), &mut index);
        index
    }

    pub fn host(&self) -> Host {
        self.host
    }

    /// Look up a type by plain or namespace-qualified name.
    pub fn lookup_type(&self, name: &str) -> Option<&TypeDecl> {
        let plain = strip_namespace(name, self.host.namespace());
        self.types.get(plain)
    }

    /// Resolve a member, walking the `extends` chain.
    pub fn member(&self, type_name: &str, member_name: &str) -> Option<&MemberDecl> {
        let mut current = self.lookup_type(type_name);
        let mut hops = 0;
        while let Some(decl) = current {
            if let Some(member) = decl.members.iter().find(|m| m.name == member_name) {
                return Some(member);
            }
            hops += 1;
            if hops > 16 {
                break; // cycle guard
            }
            current = decl.extends.as_deref().and_then(|base| self.lookup_type(base));
        }
        None
    }

    /// All member names of a type, inherited ones included.
    pub fn member_names(&self, type_name: &str) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = self.lookup_type(type_name);
        let mut hops = 0;
        while let Some(decl) = current {
            names.extend(decl.members.iter().map(|m| m.name.clone()));
            hops += 1;
            if hops > 16 {
                break;
            }
            current = decl.extends.as_deref().and_then(|base| self.lookup_type(base));
        }
        names
    }

    /// Member declaration lines of a type, for fix-hint rendering.
    pub fn member_signatures(&self, type_name: &str) -> Vec<String> {
        let mut signatures = Vec::new();
        let mut current = self.lookup_type(type_name);
        let mut hops = 0;
        while let Some(decl) = current {
            signatures.extend(decl.members.iter().map(|m| m.signature.clone()));
            hops += 1;
            if hops > 16 {
                break;
            }
            current = decl.extends.as_deref().and_then(|base| self.lookup_type(base));
        }
        signatures
    }

    /// Best-scoring member of `type_name` for a misspelled name.
    pub fn closest_member(&self, type_name: &str, wanted: &str) -> Option<(&MemberDecl, f64)> {
        let mut best: Option<(&MemberDecl, f64)> = None;
        let mut current = self.lookup_type(type_name);
        let mut hops = 0;
        while let Some(decl) = current {
            for member in &decl.members {
                let score = similarity(&member.name, wanted);
                if best.map(|(_, s)| score > s).unwrap_or(true) {
                    best = Some((member, score));
                }
            }
            hops += 1;
            if hops > 16 {
                break;
            }
            current = decl.extends.as_deref().and_then(|base| self.lookup_type(base));
        }
        best
    }

    /// Function declared directly on the host namespace (e.g. `Excel.run`).
    pub fn namespace_function(&self, name: &str) -> Option<&MemberDecl> {
        self.namespace_functions.get(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDecl> {
        self.types.values()
    }

    /// Every `(owner, member)` pair in this surface, for fuzzy fallback.
    pub fn member_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for decl in self.types.values() {
            for member in &decl.members {
                pairs.push((decl.name.clone(), member.name.clone()));
            }
        }
        pairs
    }
}

/// Fetches the raw declaration surface text for a host.
#[async_trait]
pub trait SurfaceProvider: Send + Sync {
    async fn fetch(&self, host: Host) -> anyhow::Result<String>;
}

/// Per-host declaration indexes, built lazily and shared read-only.
///
/// Owned by the composition root and handed by reference into the detector,
/// so concurrent pipeline runs share one cache without hidden global state.
pub struct DeclarationCatalog {
    provider: Box<dyn SurfaceProvider>,
    indexes: RwLock<HashMap<Host, Arc<DeclarationIndex>>>,
}

impl DeclarationCatalog {
    pub fn new(provider: Box<dyn SurfaceProvider>) -> Self {
        Self {
            provider,
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// The index for `host`, fetching and parsing the surface on first use.
    ///
    /// A missing or unfetchable surface is a configuration failure: logged
    /// and returned as `None`, never an error (the analyzer then reports an
    /// empty result).
    pub async fn get_or_load(&self, host: Host) -> Option<Arc<DeclarationIndex>> {
        if let Some(index) = self.loaded(host) {
            return Some(index);
        }
        let source = match self.provider.fetch(host).await {
            Ok(source) => source,
            Err(err) => {
                tracing::warn!("no declaration surface for {host}: {err}");
                return None;
            }
        };
        let index = Arc::new(DeclarationIndex::parse(host, &source));
        let mut guard = self.indexes.write().ok()?;
        Some(guard.entry(host).or_insert(index).clone())
    }

    /// The index for `host` if it has been built already.
    pub fn loaded(&self, host: Host) -> Option<Arc<DeclarationIndex>> {
        self.indexes.read().ok()?.get(&host).cloned()
    }

    /// Every `(owner, member)` pair across all hosts loaded so far.
    pub fn all_member_pairs(&self) -> Vec<(String, String)> {
        let Ok(guard) = self.indexes.read() else {
            return Vec::new();
        };
        let mut pairs = Vec::new();
        for index in guard.values() {
            pairs.extend(index.member_pairs());
        }
        pairs
    }

    /// Find a member on any loaded surface, for fuzzy-fallback hint text.
    pub fn find_member(&self, owner: &str, member: &str) -> Option<MemberDecl> {
        let guard = self.indexes.read().ok()?;
        for index in guard.values() {
            if let Some(decl) = index.member(owner, member) {
                return Some(decl.clone());
            }
        }
        None
    }
}

/// Character-bigram Dice similarity, case-insensitive.
///
/// Symbol names are short, so bigrams separate `getRange`/`getRanges`
/// (close) from `getRange`/`delete` (far) better than whole-token overlap.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.to_ascii_lowercase();
    let b = b.to_ascii_lowercase();
    if a == b {
        return 1.0;
    }
    let bigrams = |s: &str| -> Vec<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };
    let left = bigrams(&a);
    let mut right = bigrams(&b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let mut hits = 0usize;
    for gram in &left {
        if let Some(pos) = right.iter().position(|g| g == gram) {
            right.remove(pos);
            hits += 1;
        }
    }
    (2.0 * hits as f64) / (left.len() + bigrams(&b).len()) as f64
}

fn strip_namespace<'a>(name: &'a str, namespace: &str) -> &'a str {
    let name = name.trim();
    name.strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(name)
}

fn node_text(node: &Node, source: &str) -> String {
    source[node.start_byte()..node.end_byte()].to_string()
}

/// Doc comment attached to a node: the nearest preceding `/**` sibling,
/// looking through punctuation tokens.
fn doc_comment(node: &Node, source: &str) -> String {
    let mut prev = node.prev_sibling();
    while let Some(p) = prev {
        if p.kind() == "comment" {
            let text = node_text(&p, source);
            if text.starts_with("/**") {
                return text;
            }
            prev = p.prev_sibling();
        } else if !p.is_named() {
            prev = p.prev_sibling();
        } else {
            break;
        }
    }
    String::new()
}

/// Walk one scope (program root or namespace body) collecting declarations.
fn collect_scope(node: &Node, source: &str, namespace: &str, index: &mut DeclarationIndex) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            // `declare namespace Excel { ... }` wraps the real module node
            "ambient_declaration" => collect_scope(&child, source, namespace, index),
            "internal_module" | "module" => {
                if let Some(body) = child.child_by_field_name("body") {
                    collect_scope(&body, source, namespace, index);
                }
            }
            "class_declaration" | "abstract_class_declaration" | "interface_declaration" => {
                if let Some(decl) = parse_type_decl(&child, source, namespace) {
                    index.types.insert(decl.name.clone(), decl);
                }
            }
            "enum_declaration" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let name = node_text(&name_node, source);
                    index.types.insert(
                        name.clone(),
                        TypeDecl {
                            name,
                            namespace: namespace.to_string(),
                            extends: None,
                            members: enum_members(&child, source),
                            is_enum: true,
                        },
                    );
                }
            }
            "function_declaration" | "function_signature" => {
                if let Some(member) = parse_method(&child, source) {
                    index.namespace_functions.insert(member.name.clone(), member);
                }
            }
            _ => {}
        }
    }
}

fn enum_members(node: &Node, source: &str) -> Vec<MemberDecl> {
    let mut members = Vec::new();
    let Some(body) = node.child_by_field_name("body") else {
        return members;
    };
    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        if child.kind() == "enum_assignment" || child.kind() == "property_identifier" {
            let name = child
                .child_by_field_name("name")
                .map(|n| node_text(&n, source))
                .unwrap_or_else(|| node_text(&child, source));
            members.push(MemberDecl {
                signature: name.clone(),
                doc: String::new(),
                kind: MemberKind::Property {
                    type_name: "string".to_string(),
                    readonly: true,
                },
                name,
            });
        }
    }
    members
}

fn parse_type_decl(node: &Node, source: &str, namespace: &str) -> Option<TypeDecl> {
    let name = node_text(&node.child_by_field_name("name")?, source);
    let mut extends = None;

    // `extends` clause lives in an (extends_clause) under (class_heritage)
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "class_heritage" || child.kind() == "extends_clause" {
            let text = node_text(&child, source);
            let base = text.trim_start_matches("extends").trim();
            if !base.is_empty() {
                extends = Some(
                    base.split(&[',', '<'][..])
                        .next()
                        .unwrap_or(base)
                        .trim()
                        .to_string(),
                );
            }
        }
    }

    let body = node.child_by_field_name("body")?;
    let mut members = Vec::new();
    let mut body_cursor = body.walk();
    for member_node in body.named_children(&mut body_cursor) {
        match member_node.kind() {
            "method_definition" | "method_signature" | "abstract_method_signature" => {
                if let Some(member) = parse_method(&member_node, source) {
                    members.push(member);
                }
            }
            "public_field_definition" | "property_signature" => {
                if let Some(member) = parse_property(&member_node, source) {
                    members.push(member);
                }
            }
            _ => {}
        }
    }

    Some(TypeDecl {
        name,
        namespace: namespace.to_string(),
        extends,
        members,
        is_enum: false,
    })
}

fn parse_method(node: &Node, source: &str) -> Option<MemberDecl> {
    let name = node_text(&node.child_by_field_name("name")?, source);
    let mut params = Vec::new();
    if let Some(param_list) = node.child_by_field_name("parameters") {
        let mut cursor = param_list.walk();
        for param in param_list.named_children(&mut cursor) {
            match param.kind() {
                "required_parameter" | "optional_parameter" => {
                    let param_name = param
                        .child_by_field_name("pattern")
                        .map(|n| node_text(&n, source))
                        .unwrap_or_default();
                    let type_name = param
                        .child_by_field_name("type")
                        .map(|n| clean_type_text(&node_text(&n, source)))
                        .unwrap_or_else(|| "any".to_string());
                    params.push(ParamDecl {
                        name: param_name,
                        type_name,
                        optional: param.kind() == "optional_parameter",
                    });
                }
                _ => {}
            }
        }
    }
    let return_type = node
        .child_by_field_name("return_type")
        .map(|n| clean_type_text(&node_text(&n, source)))
        .unwrap_or_else(|| "void".to_string());

    Some(MemberDecl {
        signature: signature_line(node, source),
        doc: doc_comment(node, source),
        kind: MemberKind::Method { params, return_type },
        name,
    })
}

fn parse_property(node: &Node, source: &str) -> Option<MemberDecl> {
    let name = node_text(&node.child_by_field_name("name")?, source);
    let type_name = node
        .child_by_field_name("type")
        .map(|n| clean_type_text(&node_text(&n, source)))
        .unwrap_or_else(|| "any".to_string());
    let full_text = node_text(node, source);
    Some(MemberDecl {
        signature: signature_line(node, source),
        doc: doc_comment(node, source),
        kind: MemberKind::Property {
            type_name,
            readonly: full_text.trim_start().starts_with("readonly"),
        },
        name,
    })
}

/// Single-line signature text for hint rendering.
fn signature_line(node: &Node, source: &str) -> String {
    node_text(node, source)
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .to_string()
        + ";"
}

/// Normalize a type-annotation text: drop the leading colon and whitespace.
fn clean_type_text(text: &str) -> String {
    text.trim().trim_start_matches(':').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SURFACE: &str = r#"
declare namespace Excel {
    function run(callback: (context: Excel.RequestContext) => any): any;
    class RequestContext {
        readonly workbook: Excel.Workbook;
        sync(): any;
    }
    class Workbook {
        /** Gets the currently active worksheet. */
        getActiveWorksheet(): Excel.Worksheet;
    }
    class Worksheet {
        readonly name: string;
        getRange(address?: string): Excel.Range;
    }
    class Range {
        values: any[][];
        readonly address: string;
        load(propertyNames?: string): Excel.Range;
        getCell(row: number, column: number): Excel.Range;
    }
    enum BorderLineStyle {
        continuous,
        dash,
    }
}
"#;

    fn index() -> DeclarationIndex {
        DeclarationIndex::parse(Host::Excel, SURFACE)
    }

    #[test]
    fn test_parses_classes_and_members() {
        let index = index();
        let range = index.lookup_type("Range").unwrap();
        assert_eq!(range.members.len(), 4);
        assert!(index.member("Range", "getCell").is_some());
        assert!(index.member("Excel.Range", "load").is_some());
    }

    #[test]
    fn test_method_params_and_return_type() {
        let index = index();
        let member = index.member("Range", "getCell").unwrap();
        match &member.kind {
            MemberKind::Method { params, return_type } => {
                assert_eq!(params.len(), 2);
                assert_eq!(params[0].type_name, "number");
                assert!(return_type.contains("Range"));
            }
            _ => panic!("getCell should be a method"),
        }
    }

    #[test]
    fn test_readonly_property_detected() {
        let index = index();
        let member = index.member("Range", "address").unwrap();
        match &member.kind {
            MemberKind::Property { readonly, .. } => assert!(*readonly),
            _ => panic!("address should be a property"),
        }
    }

    #[test]
    fn test_doc_comment_attached() {
        let index = index();
        let member = index.member("Workbook", "getActiveWorksheet").unwrap();
        assert!(member.doc.contains("currently active worksheet"));
    }

    #[test]
    fn test_namespace_function() {
        let index = index();
        assert!(index.namespace_function("run").is_some());
    }

    #[test]
    fn test_enum_indexed() {
        let index = index();
        let decl = index.lookup_type("BorderLineStyle").unwrap();
        assert!(decl.is_enum);
        assert_eq!(decl.members.len(), 2);
    }

    #[test]
    fn test_closest_member_finds_misspelling() {
        let index = index();
        let (member, score) = index.closest_member("Range", "getCel").unwrap();
        assert_eq!(member.name, "getCell");
        assert!(score > 0.6);
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("getRange", "getRange"), 1.0);
        assert!(similarity("getRange", "getRanges") > 0.8);
        assert!(similarity("getRange", "delete") < 0.35);
    }

    #[test]
    fn test_member_pairs_flattened() {
        let index = index();
        let pairs = index.member_pairs();
        assert!(pairs.contains(&("Worksheet".to_string(), "getRange".to_string())));
    }

    struct FixedProvider;

    #[async_trait]
    impl SurfaceProvider for FixedProvider {
        async fn fetch(&self, host: Host) -> anyhow::Result<String> {
            match host {
                Host::Excel => Ok(SURFACE.to_string()),
                _ => anyhow::bail!("no surface"),
            }
        }
    }

    #[tokio::test]
    async fn test_catalog_loads_once_and_caches() {
        let catalog = DeclarationCatalog::new(Box::new(FixedProvider));
        assert!(catalog.loaded(Host::Excel).is_none());
        let first = catalog.get_or_load(Host::Excel).await.unwrap();
        let second = catalog.get_or_load(Host::Excel).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_catalog_missing_surface_is_none() {
        let catalog = DeclarationCatalog::new(Box::new(FixedProvider));
        assert!(catalog.get_or_load(Host::Word).await.is_none());
    }
}
