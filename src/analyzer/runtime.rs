//! Heuristic runtime-risk scans
//!
//! Flags patterns that type-check but fail or misbehave at run time:
//! missing entry function, import/require usage, property access chained
//! onto a call result, host-object reads before load(), and suspicious
//! A1-notation range strings.

use super::compile::ScopeSummary;
use super::declarations::{DeclarationIndex, Host};
use super::DetectionResult;
use regex::Regex;
use tree_sitter::{Node, Tree};

pub(crate) fn scan(
    tree: &Tree,
    source: &str,
    _host: Host,
    is_custom_function: bool,
    index: &DeclarationIndex,
    summary: &ScopeSummary,
) -> DetectionResult {
    let mut result = DetectionResult::new();
    let root = tree.root_node();

    if !is_custom_function {
        result.merge(find_entry_function(&root, source));
    }
    result.merge(find_import_and_require(&root, source));
    result.merge(find_property_access_after_call(&root, source));
    result.merge(find_unloaded_host_object_access(&root, source, index, summary));
    result.merge(find_a1_notation_in_concatenation(&root, source));
    result.merge(find_a1_notation_in_interpolation(&root, source));
    result.merge(find_a1_notation_in_string_literals(&root, source));
    result
}

fn walk<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    out.push(node);
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk(child, out);
    }
}

fn text(node: &Node, source: &str) -> String {
    source[node.start_byte()..node.end_byte()].to_string()
}

fn line_of(node: &Node) -> usize {
    node.start_position().row + 1
}

/// The entry function `main` must exist, take no parameters, and be async.
fn find_entry_function(root: &Node, source: &str) -> DetectionResult {
    let mut result = DetectionResult::new();
    let mut nodes = Vec::new();
    walk(*root, &mut nodes);

    let mut found = false;
    let mut valid_signature = false;
    let mut declared_async = false;

    for node in &nodes {
        if node.kind() != "function_declaration" {
            continue;
        }
        let Some(name) = node.child_by_field_name("name") else {
            continue;
        };
        if text(&name, source) != "main" {
            continue;
        }
        found = true;
        let param_count = node
            .child_by_field_name("parameters")
            .map(|params| {
                let mut cursor = params.walk();
                params.named_children(&mut cursor).count()
            })
            .unwrap_or(0);
        if param_count == 0 {
            valid_signature = true;
        }
        // the async keyword is an unnamed leading child
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "async" {
                declared_async = true;
            }
        }
    }

    if !found {
        result.compile_errors.push(
            "Error: Entry function 'main' not found in the code. The entry function 'main' is the starting point of the code execution. It may be missed, or have another name. Fix suggestion: Add a function named 'main' as the entry point of the code, wrapping existing function calls in the right order.".to_string(),
        );
    } else {
        if !valid_signature {
            result.compile_errors.push(
                "Error: Entry function 'main' has invalid signature. The entry function 'main' must not have any parameter. Fix suggestion: Remove the parameters from the 'main' function, and make sure it has no parameter.".to_string(),
            );
        }
        if !declared_async {
            result.compile_errors.push(
                "Error: Entry function 'main' is not defined as an async function. The entry function 'main' must be defined as an async function. Fix suggestion: Add the 'async' keyword before the 'main' function declaration.".to_string(),
            );
        }
    }

    result
}

/// Dependencies must be mocked inline; import/require is always wrong.
fn find_import_and_require(root: &Node, source: &str) -> DetectionResult {
    let mut result = DetectionResult::new();
    let mut nodes = Vec::new();
    walk(*root, &mut nodes);

    for node in &nodes {
        let is_import = node.kind() == "import_statement";
        let is_require = matches!(node.kind(), "variable_declaration" | "lexical_declaration" | "expression_statement")
            && text(node, source).contains("require(");
        if is_import || is_require {
            result.compile_errors.push(format!(
                "Error: Found \"import\" or \"require\" statement at line {}. Fix suggestion: Use a mockup object or interface for dependencies.",
                line_of(node)
            ));
        }
    }

    result
}

/// A property read chained directly onto a call result must be split across
/// two statements, or the proxy object is consumed before it is populated.
fn find_property_access_after_call(root: &Node, source: &str) -> DetectionResult {
    let mut result = DetectionResult::new();
    let mut nodes = Vec::new();
    walk(*root, &mut nodes);

    for node in &nodes {
        if node.kind() != "member_expression" {
            continue;
        }
        let Some(object) = node.child_by_field_name("object") else {
            continue;
        };
        if object.kind() != "call_expression" {
            continue;
        }
        // `foo().bar()` is a method chain, not a property read
        if node
            .parent()
            .map(|p| p.kind() == "call_expression")
            .unwrap_or(false)
        {
            continue;
        }
        let expression = text(&object, source);
        let property = node
            .child_by_field_name("property")
            .map(|p| text(&p, source))
            .unwrap_or_default();
        result.runtime_errors.push(format!(
            "Error: Property access directly after a call expression: {}.{} at line {}. Fix suggestion: The immediate property access after a function call is forbidden. Store the result of the function call {} in a variable first, preferably in the previous line, then access the property {} from that variable in the next line.",
            expression, property, line_of(node), expression, property
        ));
    }

    result
}

/// Reading a property of a host API object before load() has run returns an
/// empty proxy value. Heuristic: the variable's inferred type belongs to the
/// host surface and no `<var>.load(` appears earlier in the snippet.
fn find_unloaded_host_object_access(
    root: &Node,
    source: &str,
    index: &DeclarationIndex,
    summary: &ScopeSummary,
) -> DetectionResult {
    let mut result = DetectionResult::new();
    let mut nodes = Vec::new();
    walk(*root, &mut nodes);

    for node in &nodes {
        if node.kind() != "member_expression" {
            continue;
        }
        let Some(object) = node.child_by_field_name("object") else {
            continue;
        };
        if object.kind() != "identifier" {
            continue;
        }
        let var_name = text(&object, source);
        let Some(type_name) = summary.host_typed_vars.get(&var_name) else {
            continue;
        };
        let property = node
            .child_by_field_name("property")
            .map(|p| text(&p, source))
            .unwrap_or_default();
        // only data reads need a prior load; navigation properties that
        // yield another host object do not
        let needs_load = index
            .member(type_name, &property)
            .map(|m| match &m.kind {
                super::declarations::MemberKind::Property { type_name, .. } => {
                    index.lookup_type(type_name).is_none()
                }
                _ => false,
            })
            .unwrap_or(false);
        if !needs_load {
            continue;
        }
        let preceding = &source[..node.start_byte()];
        if preceding.contains(&format!("{}.load(", var_name)) {
            continue;
        }
        result.runtime_errors.push(format!(
            "Double check: host API object property access: {}.{} at line {}. Make sure the property {} has been loaded from {} using the load function before reading it.",
            var_name, property, line_of(node), property, var_name
        ));
    }

    result
}

fn column_to_number(column: &str) -> u64 {
    let mut result = 0u64;
    for c in column.chars() {
        result = result * 26 + (c as u64 - 'A' as u64 + 1);
    }
    result
}

/// Un-anchored search: any A1-looking fragment in the text counts.
fn is_valid_a1_notation(range: &str) -> bool {
    let Ok(re) = Regex::new(r"([A-Z]+)\d+(?::([A-Z]+)\d+)?") else {
        return false;
    };
    let Some(caps) = re.captures(range) else {
        return false;
    };
    match caps.get(2) {
        Some(second) => column_to_number(&caps[1]) <= column_to_number(second.as_str()),
        None => true,
    }
}

fn string_literal_value(node: &Node, source: &str) -> String {
    text(node, source)
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string()
}

/// A number looks range-offset-like when it is a literal or a `.length` read.
fn is_numeric_ish(node: &Node, source: &str) -> bool {
    match node.kind() {
        "number" => true,
        "member_expression" => node
            .child_by_field_name("property")
            .map(|p| text(&p, source) == "length")
            .unwrap_or(false),
        "binary_expression" => {
            let left = node.child_by_field_name("left");
            let right = node.child_by_field_name("right");
            left.map(|n| is_numeric_ish(&n, source)).unwrap_or(false)
                || right.map(|n| is_numeric_ish(&n, source)).unwrap_or(false)
        }
        "parenthesized_expression" => {
            let mut cursor = node.walk();
            let numeric = node.named_children(&mut cursor)
                .next()
                .map(|c| is_numeric_ish(&c, source))
                .unwrap_or(false);
            numeric
        }
        _ => false,
    }
}

const A1_SIZE_REMINDER: &str = "Double check whether the A1 notation is intended to represent the expected range size, for example whether it contains the range of headers or just the range of data. If the A1 notation contains a header, always count that header in following places. If the size is not expected, update the code to match the expected size.";

/// `"A1:B" + offset` where the offset is numeric.
fn find_a1_notation_in_concatenation(root: &Node, source: &str) -> DetectionResult {
    let mut result = DetectionResult::new();
    let mut nodes = Vec::new();
    walk(*root, &mut nodes);

    for node in &nodes {
        if node.kind() != "binary_expression" {
            continue;
        }
        let operator = node
            .child_by_field_name("operator")
            .map(|o| text(&o, source))
            .unwrap_or_default();
        if operator != "+" {
            continue;
        }
        let Some(left) = node.child_by_field_name("left") else { continue };
        let Some(right) = node.child_by_field_name("right") else { continue };

        let sides = [(&left, &right), (&right, &left)];
        for (literal, offset) in sides {
            if literal.kind() == "string"
                && is_valid_a1_notation(&string_literal_value(literal, source))
                && is_numeric_ish(offset, source)
            {
                result.runtime_errors.push(format!(
                    "Double check: Excel A1 notation in string concatenation: '{}' at line {}. Based on the A1 notation definition and the code context, double check whether {} represents the expected row size, and whether the expression '{}' represents the expected range size. {}",
                    text(node, source), line_of(node), text(offset, source), text(node, source), A1_SIZE_REMINDER
                ));
                break;
            }
        }
    }

    result
}

/// `` `A2:A${...}` `` where the substitution is a numeric offset. Sub-cases
/// distinguish a plain property read from a +/- expression, and which side
/// the numeric literal sits on.
fn find_a1_notation_in_interpolation(root: &Node, source: &str) -> DetectionResult {
    let mut result = DetectionResult::new();
    let mut nodes = Vec::new();
    walk(*root, &mut nodes);

    for node in &nodes {
        if node.kind() != "template_string" {
            continue;
        }
        let full_text = text(node, source);
        let head = full_text
            .trim_start_matches('`')
            .split("${")
            .next()
            .unwrap_or("");
        if !is_valid_a1_notation(head) {
            continue;
        }
        let mut cursor = node.walk();
        let Some(substitution) = node
            .named_children(&mut cursor)
            .find(|c| c.kind() == "template_substitution")
        else {
            continue;
        };
        let mut sub_cursor = substitution.walk();
        let Some(expr) = substitution.named_children(&mut sub_cursor).next() else {
            continue;
        };

        match expr.kind() {
            "member_expression" if is_numeric_ish(&expr, source) => {
                result.runtime_errors.push(format!(
                    "Double check: Excel A1 notation in string interpolation: {} at line {}. Based on the A1 notation definition and the code context, double check that {} represents the expected size. {}",
                    full_text, line_of(node), text(&expr, source), A1_SIZE_REMINDER
                ));
            }
            "binary_expression" => {
                let operator = expr
                    .child_by_field_name("operator")
                    .map(|o| text(&o, source))
                    .unwrap_or_default();
                if operator != "+" && operator != "-" {
                    continue;
                }
                let left = expr.child_by_field_name("left");
                let right = expr.child_by_field_name("right");
                let (Some(left), Some(right)) = (left, right) else { continue };
                let expr_text = text(&expr, source);

                if right.kind() == "number" && is_numeric_ish(&left, source) {
                    result.runtime_errors.push(format!(
                        "Double check: Excel A1 notation in string interpolation: {} at line {}. Double check that '{}' has the expected size, because you are adding or subtracting the number '{}' on '{}'. {}",
                        full_text, line_of(node), expr_text, text(&right, source), text(&left, source), A1_SIZE_REMINDER
                    ));
                } else if left.kind() == "number" && is_numeric_ish(&right, source) {
                    result.runtime_errors.push(format!(
                        "Double check: Excel A1 notation in string interpolation: {} at line {}. Double check that '{}' has the expected size, because you are adding or subtracting the number '{}' on '{}'. {}",
                        full_text, line_of(node), expr_text, text(&left, source), text(&right, source), A1_SIZE_REMINDER
                    ));
                } else {
                    result.runtime_errors.push(format!(
                        "Double check: Excel A1 notation in string interpolation: {} at line {}. Double check that '{}' has the expected size, because you are adding or subtracting '{}' on '{}'. {}",
                        full_text, line_of(node), expr_text, text(&right, source), text(&left, source), A1_SIZE_REMINDER
                    ));
                }
            }
            _ => {}
        }
    }

    result
}

/// Every literal that merely looks like an A1 range earns a generic flag.
fn find_a1_notation_in_string_literals(root: &Node, source: &str) -> DetectionResult {
    let mut result = DetectionResult::new();
    let mut nodes = Vec::new();
    walk(*root, &mut nodes);

    for node in &nodes {
        if node.kind() != "string" {
            continue;
        }
        let value = string_literal_value(node, source);
        if is_valid_a1_notation(&value) {
            result.runtime_errors.push(format!(
                "Double check: Excel A1 notation in string literal: {} at line {}. Ensure {} has the expected size. If its size is not fixed, update the code to read the size from a variable, an object property or a function return value, converting the literal to a template string or string interpolation. {}",
                value, line_of(node), value, A1_SIZE_REMINDER
            ));
        }
    }

    result
}
