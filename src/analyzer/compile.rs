//! Snippet type checking against a declaration surface
//!
//! Walks the snippet AST with a scope-tracking checker, resolving
//! identifiers, member accesses and calls against the host's declaration
//! index. Produces compiler-style diagnostic messages; nothing here ever
//! aborts analysis.

use super::declarations::{DeclarationIndex, MemberDecl, MemberKind};
use std::collections::HashMap;
use tree_sitter::{Node, Tree};

/// One raw diagnostic before classification.
#[derive(Debug, Clone)]
pub(crate) struct RawDiagnostic {
    pub line: usize,
    pub line_text: String,
    pub message: String,
    pub context: DiagnosticContext,
}

/// Symbol information the classifier uses to build targeted fix hints.
#[derive(Debug, Clone, Default)]
pub(crate) struct DiagnosticContext {
    pub owner_type: Option<String>,
    pub member_name: Option<String>,
    pub call_signature: Option<String>,
}

/// What the checker learned about local variables, consumed by the
/// runtime-risk scans.
#[derive(Debug, Default)]
pub(crate) struct ScopeSummary {
    /// Variables whose inferred type is a declared host type (plain name).
    pub host_typed_vars: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
enum TypeRef {
    Unknown,
    Void,
    Number,
    Str,
    Boolean,
    Array,
    /// An instance of a declared type, by plain name.
    Named(String),
    /// The host namespace object itself.
    Namespace,
    /// A class or enum referenced as a value (`Excel.Range`).
    TypeObject(String),
    /// A resolved method reference awaiting its call.
    Method { owner: String, name: String },
    /// A locally declared function.
    Function,
}

pub(crate) fn check_snippet(
    tree: &Tree,
    source: &str,
    index: &DeclarationIndex,
) -> (Vec<RawDiagnostic>, ScopeSummary) {
    let mut checker = Checker {
        index,
        source,
        scopes: vec![HashMap::new()],
        diagnostics: Vec::new(),
        summary: ScopeSummary::default(),
    };

    let root = tree.root_node();
    checker.check_block(&root, true);
    (checker.diagnostics, checker.summary)
}

struct Checker<'a> {
    index: &'a DeclarationIndex,
    source: &'a str,
    scopes: Vec<HashMap<String, TypeRef>>,
    diagnostics: Vec<RawDiagnostic>,
    summary: ScopeSummary,
}

/// Ambient globals every snippet may reference without declaration.
const AMBIENT_GLOBALS: &[&str] = &[
    "console",
    "Math",
    "JSON",
    "Date",
    "Promise",
    "Array",
    "Object",
    "String",
    "Number",
    "Boolean",
    "OfficeExtension",
    "CustomFunctions",
    "undefined",
    "null",
    "NaN",
];

impl<'a> Checker<'a> {
    fn text(&self, node: &Node) -> String {
        self.source[node.start_byte()..node.end_byte()].to_string()
    }

    fn push_diag(&mut self, node: &Node, message: String, context: DiagnosticContext) {
        let line = node.start_position().row + 1;
        let line_text = self
            .source
            .lines()
            .nth(node.start_position().row)
            .unwrap_or("")
            .trim()
            .to_string();
        self.diagnostics.push(RawDiagnostic {
            line,
            line_text,
            message,
            context,
        });
    }

    fn declare(&mut self, name: String, ty: TypeRef) {
        if let TypeRef::Named(type_name) = &ty {
            self.summary
                .host_typed_vars
                .insert(name.clone(), type_name.clone());
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, ty);
        }
    }

    fn lookup(&self, name: &str) -> Option<TypeRef> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }

    /// Function declarations are hoisted: register the block's functions
    /// before any statement runs.
    fn hoist_functions(&mut self, block: &Node) {
        let mut cursor = block.walk();
        for child in block.named_children(&mut cursor) {
            if child.kind() == "function_declaration" {
                if let Some(name) = child.child_by_field_name("name") {
                    let name = self.text(&name);
                    self.declare(name, TypeRef::Function);
                }
            }
        }
    }

    fn check_block(&mut self, node: &Node, top_level: bool) {
        self.hoist_functions(node);
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.check_statement(&child, top_level);
        }
    }

    fn check_statement(&mut self, node: &Node, top_level: bool) {
        match node.kind() {
            "ERROR" | "MISSING" => {
                self.push_diag(node, "Expression expected.".to_string(), Default::default());
            }
            "import_statement" => {
                let module = node
                    .child_by_field_name("source")
                    .map(|n| self.text(&n))
                    .unwrap_or_default();
                let module = module.trim_matches(|c| c == '"' || c == '\'' || c == '`');
                self.push_diag(
                    node,
                    format!(
                        "Cannot find module '{}' or its corresponding type declarations.",
                        module
                    ),
                    Default::default(),
                );
            }
            "lexical_declaration" | "variable_declaration" => {
                let mut cursor = node.walk();
                for declarator in node.named_children(&mut cursor) {
                    if declarator.kind() != "variable_declarator" {
                        continue;
                    }
                    let name = declarator
                        .child_by_field_name("name")
                        .map(|n| self.text(&n))
                        .unwrap_or_default();
                    let annotated = declarator
                        .child_by_field_name("type")
                        .map(|n| self.resolve_type_text(&self.text(&n)));
                    let inferred = declarator
                        .child_by_field_name("value")
                        .map(|value| self.infer(&value));
                    let ty = annotated.or(inferred).unwrap_or(TypeRef::Unknown);
                    if !name.is_empty() {
                        self.declare(name, ty);
                    }
                }
            }
            "function_declaration" => self.check_function(node),
            "expression_statement" => {
                if top_level {
                    self.check_top_level_await(node);
                }
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.infer(&child);
                }
            }
            "return_statement" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.infer(&child);
                }
            }
            "if_statement" | "while_statement" | "do_statement" | "try_statement"
            | "for_statement" | "for_in_statement" | "statement_block" | "else_clause"
            | "catch_clause" | "finally_clause" | "switch_statement" => {
                self.check_compound(node);
            }
            _ => {
                // Anything else (labels, empty statements) is walked for
                // nested syntax errors only.
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if child.kind() == "ERROR" {
                        self.push_diag(&child, "Expression expected.".to_string(), Default::default());
                    }
                }
            }
        }
    }

    /// Control-flow statements: declare loop bindings, recurse into bodies,
    /// infer condition expressions.
    fn check_compound(&mut self, node: &Node) {
        self.scopes.push(HashMap::new());

        if node.kind() == "for_in_statement" {
            if let Some(left) = node.child_by_field_name("left") {
                let name = self.text(&left);
                self.declare(name, TypeRef::Unknown);
            }
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "statement_block" => self.check_block(&child, false),
                "else_clause" | "catch_clause" | "finally_clause" => self.check_compound(&child),
                kind if kind.ends_with("_statement") || kind.ends_with("_declaration") => {
                    self.check_statement(&child, false)
                }
                "ERROR" => {
                    self.push_diag(&child, "Expression expected.".to_string(), Default::default())
                }
                _ => {
                    // conditions, initializers, increments
                    if !matches!(child.kind(), "statement_block") {
                        self.infer(&child);
                    }
                }
            }
        }

        self.scopes.pop();
    }

    fn check_function(&mut self, node: &Node) {
        self.scopes.push(HashMap::new());
        if let Some(params) = node.child_by_field_name("parameters") {
            let mut cursor = params.walk();
            for param in params.named_children(&mut cursor) {
                match param.kind() {
                    "required_parameter" | "optional_parameter" => {
                        let name = param
                            .child_by_field_name("pattern")
                            .map(|n| self.text(&n))
                            .unwrap_or_default();
                        let ty = param
                            .child_by_field_name("type")
                            .map(|n| self.resolve_type_text(&self.text(&n)))
                            .unwrap_or(TypeRef::Unknown);
                        self.declare(name, ty);
                    }
                    "identifier" => {
                        let name = self.text(&param);
                        self.declare(name, TypeRef::Unknown);
                    }
                    _ => {}
                }
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            if body.kind() == "statement_block" {
                self.check_block(&body, false);
            } else {
                // expression-bodied arrow
                self.infer(&body);
            }
        }
        self.check_missing_return(node);
        self.scopes.pop();
    }

    /// A declared non-void return type with no return statement in the body.
    fn check_missing_return(&mut self, node: &Node) {
        let Some(return_type) = node.child_by_field_name("return_type") else {
            return;
        };
        let declared = self.text(&return_type);
        let declared = declared.trim().trim_start_matches(':').trim();
        let inner = declared
            .strip_prefix("Promise<")
            .and_then(|r| r.strip_suffix('>'))
            .unwrap_or(declared);
        if matches!(inner, "void" | "any" | "undefined") {
            return;
        }
        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        if !self.text(&body).contains("return") {
            self.push_diag(
                node,
                "A function whose declared type is neither 'undefined', 'void', nor 'any' must return a value.".to_string(),
                Default::default(),
            );
        }
    }

    /// Await in a top-level expression statement is a module-only construct.
    fn check_top_level_await(&mut self, node: &Node) {
        if contains_kind(node, "await_expression") {
            self.push_diag(
                node,
                "'await' expressions are only allowed at the top level of a file when that file is a module, but this file has no imports or exports.".to_string(),
                Default::default(),
            );
        }
    }

    fn infer(&mut self, node: &Node) -> TypeRef {
        match node.kind() {
            "string" | "template_string" => {
                if node.kind() == "template_string" {
                    let mut cursor = node.walk();
                    for child in node.named_children(&mut cursor) {
                        if child.kind() == "template_substitution" {
                            let mut inner = child.walk();
                            for expr in child.named_children(&mut inner) {
                                self.infer(&expr);
                            }
                        }
                    }
                }
                TypeRef::Str
            }
            "number" => TypeRef::Number,
            "true" | "false" => TypeRef::Boolean,
            "array" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.infer(&child);
                }
                TypeRef::Array
            }
            "object" => TypeRef::Unknown,
            "identifier" => self.infer_identifier(node),
            "member_expression" => self.infer_member(node),
            "subscript_expression" => {
                if let Some(object) = node.child_by_field_name("object") {
                    self.infer(&object);
                }
                if let Some(idx) = node.child_by_field_name("index") {
                    self.infer(&idx);
                }
                TypeRef::Unknown
            }
            "call_expression" => self.infer_call(node),
            "new_expression" => self.infer_new(node),
            "await_expression" => {
                let mut cursor = node.walk();
                let inner = node
                    .named_children(&mut cursor)
                    .next()
                    .map(|c| self.infer(&c))
                    .unwrap_or(TypeRef::Unknown);
                inner
            }
            "assignment_expression" => self.infer_assignment(node),
            "augmented_assignment_expression" => {
                if let Some(left) = node.child_by_field_name("left") {
                    self.infer(&left);
                }
                if let Some(right) = node.child_by_field_name("right") {
                    self.infer(&right);
                }
                TypeRef::Unknown
            }
            "binary_expression" => self.infer_binary(node),
            "parenthesized_expression" | "non_null_expression" => {
                let mut cursor = node.walk();
                let inferred = node.named_children(&mut cursor)
                    .next()
                    .map(|c| self.infer(&c))
                    .unwrap_or(TypeRef::Unknown);
                inferred
            }
            "as_expression" => self.infer_as(node),
            "arrow_function" | "function_expression" => {
                self.check_function(node);
                TypeRef::Function
            }
            "unary_expression" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.infer(&child);
                }
                TypeRef::Unknown
            }
            "ternary_expression" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.infer(&child);
                }
                TypeRef::Unknown
            }
            "ERROR" => {
                self.push_diag(node, "Expression expected.".to_string(), Default::default());
                TypeRef::Unknown
            }
            _ => TypeRef::Unknown,
        }
    }

    fn infer_identifier(&mut self, node: &Node) -> TypeRef {
        let name = self.text(node);
        if let Some(ty) = self.lookup(&name) {
            return ty;
        }
        if name == self.index.host().namespace() {
            return TypeRef::Namespace;
        }
        if AMBIENT_GLOBALS.contains(&name.as_str()) {
            return TypeRef::Unknown;
        }
        self.push_diag(
            node,
            format!("Cannot find name '{}'.", name),
            Default::default(),
        );
        TypeRef::Unknown
    }

    fn infer_member(&mut self, node: &Node) -> TypeRef {
        let Some(object) = node.child_by_field_name("object") else {
            return TypeRef::Unknown;
        };
        let Some(property) = node.child_by_field_name("property") else {
            return TypeRef::Unknown;
        };
        let prop = self.text(&property);
        let object_ty = self.infer(&object);

        match object_ty {
            TypeRef::Namespace => {
                if self.index.namespace_function(&prop).is_some() {
                    return TypeRef::Method {
                        owner: self.index.host().namespace().to_string(),
                        name: prop,
                    };
                }
                if self.index.lookup_type(&prop).is_some() {
                    return TypeRef::TypeObject(prop);
                }
                let owner = format!("typeof {}", self.index.host().namespace());
                self.push_diag(
                    node,
                    format!("Property '{}' does not exist on type '{}'.", prop, owner),
                    DiagnosticContext {
                        owner_type: Some(owner),
                        member_name: Some(prop),
                        call_signature: None,
                    },
                );
                TypeRef::Unknown
            }
            TypeRef::TypeObject(type_name) => {
                let decl = self.index.lookup_type(&type_name);
                let is_enum = decl.map(|d| d.is_enum).unwrap_or(false);
                if self.index.member(&type_name, &prop).is_some() {
                    if is_enum {
                        TypeRef::Str
                    } else {
                        TypeRef::Unknown
                    }
                } else {
                    let owner = format!("typeof {}", type_name);
                    self.push_diag(
                        node,
                        format!("Property '{}' does not exist on type '{}'.", prop, owner),
                        DiagnosticContext {
                            owner_type: Some(owner),
                            member_name: Some(prop),
                            call_signature: None,
                        },
                    );
                    TypeRef::Unknown
                }
            }
            TypeRef::Named(type_name) => match self.index.member(&type_name, &prop) {
                Some(member) => match &member.kind {
                    MemberKind::Method { .. } => TypeRef::Method {
                        owner: type_name,
                        name: prop,
                    },
                    MemberKind::Property { type_name: prop_ty, .. } => {
                        let resolved = prop_ty.clone();
                        self.resolve_type_text(&resolved)
                    }
                },
                None => {
                    let mut message =
                        format!("Property '{}' does not exist on type '{}'.", prop, type_name);
                    if let Some((candidate, score)) = self.index.closest_member(&type_name, &prop) {
                        if score >= 0.6 {
                            message = format!(
                                "Property '{}' does not exist on type '{}'. Did you mean '{}'?",
                                prop, type_name, candidate.name
                            );
                        }
                    }
                    self.push_diag(
                        node,
                        message,
                        DiagnosticContext {
                            owner_type: Some(type_name),
                            member_name: Some(prop),
                            call_signature: None,
                        },
                    );
                    TypeRef::Unknown
                }
            },
            TypeRef::Str if prop == "length" => TypeRef::Number,
            TypeRef::Array if prop == "length" => TypeRef::Number,
            _ => TypeRef::Unknown,
        }
    }

    fn infer_call(&mut self, node: &Node) -> TypeRef {
        let Some(callee) = node.child_by_field_name("function") else {
            return TypeRef::Unknown;
        };
        let callee_ty = self.infer(&callee);

        let args: Vec<Node> = node
            .child_by_field_name("arguments")
            .map(|list| {
                let mut cursor = list.walk();
                list.named_children(&mut cursor).collect()
            })
            .unwrap_or_default();
        let arg_types: Vec<TypeRef> = args.iter().map(|a| self.infer(a)).collect();

        match callee_ty {
            TypeRef::Method { owner, name } => self.check_call(node, &owner, &name, &args, &arg_types),
            _ => TypeRef::Unknown,
        }
    }

    fn check_call(
        &mut self,
        node: &Node,
        owner: &str,
        name: &str,
        args: &[Node],
        arg_types: &[TypeRef],
    ) -> TypeRef {
        let member = if owner == self.index.host().namespace() {
            self.index.namespace_function(name).cloned()
        } else {
            self.index.member(owner, name).cloned()
        };
        let Some(member) = member else {
            return TypeRef::Unknown;
        };
        let MemberKind::Method { params, return_type } = &member.kind else {
            return TypeRef::Unknown;
        };

        let overloads = self.overload_signatures(owner, name);
        let required = params.iter().filter(|p| !p.optional).count();
        let total = params.len();
        let got = args.len();

        if got < required || got > total {
            if overloads.len() > 1 {
                self.push_diag(
                    node,
                    format!(
                        "No overload matches this call. Overload 1 of {}, '{}', gave the following error.",
                        overloads.len(),
                        overloads[0],
                    ),
                    DiagnosticContext {
                        owner_type: Some(owner.to_string()),
                        member_name: Some(name.to_string()),
                        call_signature: Some(overloads.join("\n")),
                    },
                );
            } else {
                let expected = if required == total {
                    format!("{}", required)
                } else {
                    format!("{}-{}", required, total)
                };
                self.push_diag(
                    node,
                    format!("Expected {} arguments, but got {}.", expected, got),
                    DiagnosticContext {
                        owner_type: Some(owner.to_string()),
                        member_name: Some(name.to_string()),
                        call_signature: Some(member.signature.clone()),
                    },
                );
            }
        } else {
            for (i, param) in params.iter().enumerate() {
                let Some(arg_ty) = arg_types.get(i) else { break };
                let declared = param.type_name.as_str();
                let actual = match arg_ty {
                    TypeRef::Str => Some("string"),
                    TypeRef::Number => Some("number"),
                    TypeRef::Boolean => Some("boolean"),
                    _ => None,
                };
                if let Some(actual) = actual {
                    if matches!(declared, "string" | "number" | "boolean") && declared != actual {
                        self.push_diag(
                            &args[i],
                            format!(
                                "Argument of type '{}' is not assignable to parameter of type '{}'.",
                                actual, declared
                            ),
                            DiagnosticContext {
                                owner_type: Some(owner.to_string()),
                                member_name: Some(name.to_string()),
                                call_signature: Some(member.signature.clone()),
                            },
                        );
                    }
                }
            }
        }

        self.resolve_type_text(return_type)
    }

    fn overload_signatures(&self, owner: &str, name: &str) -> Vec<String> {
        if owner == self.index.host().namespace() {
            return self
                .index
                .namespace_function(name)
                .map(|m| vec![m.signature.clone()])
                .unwrap_or_default();
        }
        let Some(decl) = self.index.lookup_type(owner) else {
            return Vec::new();
        };
        decl.members
            .iter()
            .filter(|m| m.name == name && m.is_method())
            .map(|m| m.signature.clone())
            .collect()
    }

    fn infer_new(&mut self, node: &Node) -> TypeRef {
        let Some(constructor) = node.child_by_field_name("constructor") else {
            return TypeRef::Unknown;
        };
        let ty = self.infer(&constructor);
        if let Some(args) = node.child_by_field_name("arguments") {
            let mut cursor = args.walk();
            for arg in args.named_children(&mut cursor) {
                self.infer(&arg);
            }
        }
        match ty {
            TypeRef::TypeObject(name) => TypeRef::Named(name),
            _ => TypeRef::Unknown,
        }
    }

    fn infer_assignment(&mut self, node: &Node) -> TypeRef {
        let right_ty = node
            .child_by_field_name("right")
            .map(|right| self.infer(&right))
            .unwrap_or(TypeRef::Unknown);

        let Some(left) = node.child_by_field_name("left") else {
            return right_ty;
        };

        if left.kind() == "member_expression" {
            let object_ty = left
                .child_by_field_name("object")
                .map(|object| self.infer(&object))
                .unwrap_or(TypeRef::Unknown);
            let prop = left
                .child_by_field_name("property")
                .map(|p| self.text(&p))
                .unwrap_or_default();

            if let TypeRef::Named(type_name) = object_ty {
                match self.index.member(&type_name, &prop) {
                    Some(MemberDecl {
                        kind: MemberKind::Property { readonly, type_name: prop_ty },
                        ..
                    }) => {
                        if *readonly {
                            self.push_diag(
                                &left,
                                format!(
                                    "Cannot assign to '{}' because it is a read-only property.",
                                    prop
                                ),
                                DiagnosticContext {
                                    owner_type: Some(type_name.clone()),
                                    member_name: Some(prop.clone()),
                                    call_signature: None,
                                },
                            );
                        } else {
                            let declared = prop_ty.as_str();
                            let actual = match right_ty {
                                TypeRef::Str => Some("string"),
                                TypeRef::Number => Some("number"),
                                TypeRef::Boolean => Some("boolean"),
                                TypeRef::Void => Some("void"),
                                _ => None,
                            };
                            if let Some(actual) = actual {
                                if matches!(declared, "string" | "number" | "boolean")
                                    && declared != actual
                                {
                                    self.push_diag(
                                        node,
                                        format!(
                                            "Type '{}' is not assignable to type '{}'.",
                                            actual, declared
                                        ),
                                        DiagnosticContext {
                                            owner_type: Some(type_name.clone()),
                                            member_name: Some(prop.clone()),
                                            call_signature: None,
                                        },
                                    );
                                }
                            }
                        }
                    }
                    Some(_) | None => {
                        // missing member already reported by infer_member
                        // when the access is read; for writes we report here
                        if self.index.member(&type_name, &prop).is_none() {
                            let mut message = format!(
                                "Property '{}' does not exist on type '{}'.",
                                prop, type_name
                            );
                            if let Some((candidate, score)) =
                                self.index.closest_member(&type_name, &prop)
                            {
                                if score >= 0.6 {
                                    message = format!(
                                        "Property '{}' does not exist on type '{}'. Did you mean '{}'?",
                                        prop, type_name, candidate.name
                                    );
                                }
                            }
                            self.push_diag(
                                &left,
                                message,
                                DiagnosticContext {
                                    owner_type: Some(type_name),
                                    member_name: Some(prop),
                                    call_signature: None,
                                },
                            );
                        }
                    }
                }
            }
        } else if left.kind() == "identifier" {
            let name = self.text(&left);
            if self.lookup(&name).is_none() {
                // implicit global assignment; declare to avoid cascades
                self.declare(name, right_ty.clone());
            }
        }

        right_ty
    }

    fn infer_binary(&mut self, node: &Node) -> TypeRef {
        let left_ty = node
            .child_by_field_name("left")
            .map(|l| self.infer(&l))
            .unwrap_or(TypeRef::Unknown);
        let right_ty = node
            .child_by_field_name("right")
            .map(|r| self.infer(&r))
            .unwrap_or(TypeRef::Unknown);
        let operator = node
            .child_by_field_name("operator")
            .map(|o| self.text(&o))
            .unwrap_or_default();

        if operator == "+" {
            let clash = match (&left_ty, &right_ty) {
                (TypeRef::Number, TypeRef::Named(t)) | (TypeRef::Named(t), TypeRef::Number) => {
                    Some(t.clone())
                }
                _ => None,
            };
            if let Some(t) = clash {
                self.push_diag(
                    node,
                    format!(
                        "Operator '+' cannot be applied to types 'number' and '{}'.",
                        t
                    ),
                    Default::default(),
                );
                return TypeRef::Unknown;
            }
        }

        match (&left_ty, &right_ty) {
            (TypeRef::Str, _) | (_, TypeRef::Str) if operator == "+" => TypeRef::Str,
            (TypeRef::Number, TypeRef::Number) => TypeRef::Number,
            _ => TypeRef::Unknown,
        }
    }

    fn infer_as(&mut self, node: &Node) -> TypeRef {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        let value_ty = children
            .first()
            .map(|c| self.infer(c))
            .unwrap_or(TypeRef::Unknown);
        let Some(target) = children.get(1) else {
            return TypeRef::Unknown;
        };
        let target_text = self.text(target);
        let target_ty = self.resolve_type_text(&target_text);

        let value_prim = match value_ty {
            TypeRef::Str => Some("string"),
            TypeRef::Number => Some("number"),
            TypeRef::Boolean => Some("boolean"),
            _ => None,
        };
        let target_prim = match &target_ty {
            TypeRef::Str => Some("string"),
            TypeRef::Number => Some("number"),
            TypeRef::Boolean => Some("boolean"),
            _ => None,
        };
        if let (Some(v), Some(t)) = (value_prim, target_prim) {
            if v != t {
                self.push_diag(
                    node,
                    format!(
                        "Conversion of type '{}' to type '{}' may be a mistake because neither type sufficiently overlaps with the other.",
                        v, t
                    ),
                    Default::default(),
                );
            }
        }
        target_ty
    }

    /// Map a type-annotation text to a TypeRef, unwrapping Promise<> and
    /// stripping the host namespace prefix.
    fn resolve_type_text(&self, text: &str) -> TypeRef {
        let mut t = text.trim().trim_start_matches(':').trim();
        while let Some(inner) = t.strip_prefix("Promise<").and_then(|r| r.strip_suffix('>')) {
            t = inner.trim();
        }
        if t.ends_with("[]") {
            return TypeRef::Array;
        }
        match t {
            "void" => return TypeRef::Void,
            "any" | "unknown" | "object" => return TypeRef::Unknown,
            "string" => return TypeRef::Str,
            "number" => return TypeRef::Number,
            "boolean" => return TypeRef::Boolean,
            _ => {}
        }
        if t.starts_with('(') || t.contains("=>") {
            return TypeRef::Unknown;
        }
        let plain = t
            .strip_prefix(self.index.host().namespace())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(t);
        if self.index.lookup_type(plain).is_some() {
            TypeRef::Named(plain.to_string())
        } else {
            TypeRef::Unknown
        }
    }
}

fn contains_kind(node: &Node, kind: &str) -> bool {
    if node.kind() == kind {
        return true;
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if contains_kind(&child, kind) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::declarations::Host;
    use tree_sitter::Parser;

    const SURFACE: &str = r#"
declare namespace Excel {
    function run(callback: (context: Excel.RequestContext) => any): any;
    class RequestContext {
        readonly workbook: Excel.Workbook;
        sync(): any;
    }
    class Workbook {
        getActiveWorksheet(): Excel.Worksheet;
    }
    class Worksheet {
        readonly name: string;
        getRange(address: string): Excel.Range;
    }
    class Range {
        values: any[][];
        readonly address: string;
        load(propertyNames?: string): Excel.Range;
        getCell(row: number, column: number): Excel.Range;
    }
}
"#;

    fn run_check(snippet: &str) -> Vec<RawDiagnostic> {
        let index = DeclarationIndex::parse(Host::Excel, SURFACE);
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            .unwrap();
        let tree = parser.parse(snippet, None).unwrap();
        check_snippet(&tree, snippet, &index).0
    }

    #[test]
    fn test_clean_snippet_has_no_diagnostics() {
        let snippet = r#"
async function main() {
  await Excel.run(async (context: Excel.RequestContext) => {
    const sheet = context.workbook.getActiveWorksheet();
    const range = sheet.getRange("A1");
    range.load("values");
    await context.sync();
    console.log(range.values);
  });
}
"#;
        let diags = run_check(snippet);
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    }

    #[test]
    fn test_nested_function_declarations_hoisted() {
        let snippet = r#"
async function main() {
  helper();
  function helper() {}
}
"#;
        let diags = run_check(snippet);
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    }

    #[test]
    fn test_unknown_identifier_reported() {
        let diags = run_check("function f() { mystery(); }");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("Cannot find name 'mystery'"));
    }

    #[test]
    fn test_missing_property_with_spelling_suggestion() {
        let snippet = r#"
function f(sheet: Excel.Worksheet) {
  const range = sheet.getRang("A1");
}
"#;
        let diags = run_check(snippet);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("does not exist on type 'Worksheet'"));
        assert!(diags[0].message.contains("Did you mean 'getRange'?"));
    }

    #[test]
    fn test_argument_count_mismatch() {
        let snippet = r#"
function f(range: Excel.Range) {
  range.getCell(1);
}
"#;
        let diags = run_check(snippet);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("arguments, but got 1"));
        assert!(diags[0].context.call_signature.is_some());
    }

    #[test]
    fn test_argument_type_mismatch() {
        let snippet = r#"
function f(range: Excel.Range) {
  range.getCell("one", 0);
}
"#;
        let diags = run_check(snippet);
        assert_eq!(diags.len(), 1);
        assert!(diags[0]
            .message
            .contains("Argument of type 'string' is not assignable to parameter of type 'number'"));
    }

    #[test]
    fn test_readonly_assignment_reported() {
        let snippet = r#"
function f(range: Excel.Range) {
  range.address = "B2";
}
"#;
        let diags = run_check(snippet);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("Cannot assign to 'address'"));
    }

    #[test]
    fn test_import_statement_reported() {
        let diags = run_check("import fs from \"fs\";");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("Cannot find module 'fs'"));
    }

    #[test]
    fn test_top_level_await_reported() {
        let diags = run_check("await Excel.run(async (context: Excel.RequestContext) => {});");
        assert!(diags
            .iter()
            .any(|d| d.message.contains("only allowed at the top level")));
    }

    #[test]
    fn test_chained_member_types_resolve() {
        // workbook -> worksheet -> range chains resolve through return types
        let snippet = r#"
function f(context: Excel.RequestContext) {
  const range = context.workbook.getActiveWorksheet().getRange("A1");
  range.load("values");
}
"#;
        let diags = run_check(snippet);
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    }

    #[test]
    fn test_missing_return_with_declared_type() {
        let snippet = r#"
function f(): number {
  const x = 1;
}
"#;
        let diags = run_check(snippet);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("must return a value"));
    }

    #[test]
    fn test_host_typed_vars_tracked() {
        let index = DeclarationIndex::parse(Host::Excel, SURFACE);
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            .unwrap();
        let snippet = r#"
function f(context: Excel.RequestContext) {
  const sheet = context.workbook.getActiveWorksheet();
}
"#;
        let tree = parser.parse(snippet, None).unwrap();
        let (_, summary) = check_snippet(&tree, snippet, &index);
        assert_eq!(summary.host_typed_vars.get("sheet").map(String::as_str), Some("Worksheet"));
    }
}
