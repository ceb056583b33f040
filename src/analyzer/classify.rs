//! Diagnostic classification and fix-hint synthesis
//!
//! Each raw diagnostic is matched, in priority order, against a fixed table
//! of recognizers. The first match increments its telemetry counter and
//! builds a targeted fix suggestion; anything unrecognized lands in the
//! catch-all counter with no hint.

use super::compile::RawDiagnostic;
use super::declarations::{similarity, DeclarationCatalog, DeclarationIndex};
use crate::telemetry::{self, TelemetryData};
use regex::Regex;

/// Minimum global similarity for a fuzzy member-name fallback.
const FUZZY_MATCH_THRESHOLD: f64 = 0.35;
/// A local (exact-owner) match at or above this score wins outright.
const LOCAL_MATCH_THRESHOLD: f64 = 0.5;

pub(crate) fn format_diagnostics(
    diagnostics: Vec<RawDiagnostic>,
    index: &DeclarationIndex,
    catalog: &DeclarationCatalog,
    telemetry: &mut TelemetryData,
) -> Vec<String> {
    diagnostics
        .into_iter()
        .map(|diag| {
            let suggestion = classify(&diag, index, catalog, telemetry);
            let mut error = format!(
                "Invalid code snippet at Line {}:\n```typescript\n{}\n```\nError message:\n{}",
                diag.line, diag.line_text, diag.message
            );
            if let Some(suggestion) = suggestion {
                error.push_str(&format!("\nFix suggestion: {}", suggestion));
            }
            error.push('\n');
            error
        })
        .collect()
}

fn classify(
    diag: &RawDiagnostic,
    index: &DeclarationIndex,
    catalog: &DeclarationCatalog,
    telemetry: &mut TelemetryData,
) -> Option<String> {
    let message = diag.message.trim().replace(['\r', '\n'], "");

    if message.contains("Did you mean") {
        telemetry.add_measurement(
            telemetry::MEASUREMENT_COMPILE_ERROR_PROPERTY_WITH_SUGGESTION_COUNT,
            1.0,
        );
        let re =
            Regex::new(r"Property '([^']+)' does not exist on type '[^']+'. Did you mean '([^']+)'")
                .ok()?;
        let caps = re.captures(&message)?;
        return Some(format!(
            "Change code to use '{}' instead of '{}'.",
            &caps[2], &caps[1]
        ));
    }

    if message.contains("does not exist on type ") {
        telemetry.add_measurement(
            telemetry::MEASUREMENT_COMPILE_ERROR_PROPERTY_NOT_EXIST_COUNT,
            1.0,
        );
        return property_not_found_hint(diag, &message, index, catalog);
    }

    if message
        .contains("A function whose declared type is neither 'undefined', 'void', nor 'any' must return a value")
    {
        telemetry.add_measurement(
            telemetry::MEASUREMENT_COMPILE_ERROR_NO_FUNCTION_RETURN_COUNT,
            1.0,
        );
        return Some("Make sure the function is implemented and returns a value.".to_string());
    }

    if message.contains("Cannot find module") {
        telemetry.add_measurement(
            telemetry::MEASUREMENT_COMPILE_ERROR_CANNOT_FIND_MODULE_COUNT,
            1.0,
        );
        return Some("Remove the module import statement from the code.".to_string());
    }

    if message.contains("arguments, but got ") {
        telemetry.add_measurement(
            telemetry::MEASUREMENT_COMPILE_ERROR_ARGUMENT_COUNT_MISMATCH_COUNT,
            1.0,
        );
        if let Some(signature) = &diag.context.call_signature {
            return Some(format!(
                "Rewrite the code with the correct number of arguments. Following is the method signature: \n```typescript\n{}\n```\n",
                signature
            ));
        }
        return Some("Rewrite the code with the correct number of arguments.".to_string());
    }

    if message.contains("Argument of type") {
        telemetry.add_measurement(
            telemetry::MEASUREMENT_COMPILE_ERROR_ARGUMENT_TYPE_MISMATCH_COUNT,
            1.0,
        );
        if let Some(signature) = &diag.context.call_signature {
            return Some(format!(
                "You made the method call with an invalid argument, or the type of the argument does not match the expected type. If the source type is a union type that could convert to the target type, convert it to the single matching type using the \"as\" keyword. Otherwise, rewrite the method invocation following the method declaration below: \n```typescript\n{}\n```\n",
                signature
            ));
        }
        let re = Regex::new(
            r"Argument of type '([^']+)' is not assignable to parameter of type '([^']+)'",
        )
        .ok()?;
        if let Some(caps) = re.captures(&message) {
            return Some(format!(
                "Find a property or method of the type '{}' that serves a similar purpose and results in the type '{}', then rewrite the code to use it. Or rewrite the code using an alternative approach to achieve the same purpose.",
                &caps[1], &caps[2]
            ));
        }
        return Some(
            "Rewrite relevant code, or use an alternative approach to achieve the same purpose."
                .to_string(),
        );
    }

    if message.contains("Operator '+' cannot be applied to types") {
        telemetry.add_measurement(
            telemetry::MEASUREMENT_COMPILE_ERROR_OPERATOR_MISMATCH_COUNT,
            1.0,
        );
        return Some(
            "Understand the purpose of that operation. The left-hand or right-hand operand is unexpected; you used a wrong object, or should use an alternative form of that object, to make the two operands type-compatible for the operator."
                .to_string(),
        );
    }

    if message.contains("may be a mistake because neither type sufficiently overlaps with the other")
    {
        telemetry.add_measurement(
            telemetry::MEASUREMENT_COMPILE_ERROR_CONVERT_TYPE_MISTAKE_COUNT,
            1.0,
        );
        return Some(
            "Understand the purpose of that expression. The right-hand operand is unexpected; you used a wrong object, or should use an alternative form of that object, to make the two operands type-compatible."
                .to_string(),
        );
    }

    if message.contains("No overload matches this call. Overload 1 of ") {
        telemetry.add_measurement(
            telemetry::MEASUREMENT_COMPILE_ERROR_OVERLOAD_MISMATCH_COUNT,
            1.0,
        );
        if let Some(signature) = &diag.context.call_signature {
            return Some(format!(
                "You have mixed several overload forms of the method. Rewrite the code following one of these method declarations: \n```typescript\n{}\n```\n",
                signature
            ));
        }
        let re = Regex::new(r"Overload (\d+) of (\d+), '([^']+)', gave the following error").ok()?;
        if let Some(caps) = re.captures(&message) {
            return Some(format!(
                "You have mixed several overload forms of the method. You used a wrong object, or should use an alternative form of that object, to match this method declaration \"{}\".",
                &caps[3]
            ));
        }
        return Some(
            "You have mixed several overload forms of the method. Rewrite the call to match the first overload."
                .to_string(),
        );
    }

    // Must come after the overload/argument checks: their messages can also
    // mention assignability.
    if message.contains("is not assignable to type") {
        telemetry.add_measurement(
            telemetry::MEASUREMENT_COMPILE_ERROR_TYPE_NOT_ASSIGNABLE_COUNT,
            1.0,
        );
        return Some(
            "Understand the purpose of that assignment. The right-hand operand is unexpected; you used a wrong object, the right-hand operand is not assignable (like 'void'), or you should use an alternative form of that object to make the two sides type-compatible."
                .to_string(),
        );
    }

    if message.contains("Cannot find name") {
        telemetry.add_measurement(
            telemetry::MEASUREMENT_COMPILE_ERROR_CANNOT_FIND_NAME_COUNT,
            1.0,
        );
        return Some(
            "Declare the variable before using it or implement the missing function.".to_string(),
        );
    }

    if message.contains("Cannot assign to") {
        telemetry.add_measurement(
            telemetry::MEASUREMENT_COMPILE_ERROR_CANNOT_ASSIGN_READONLY_COUNT,
            1.0,
        );
        return Some(
            "Remove the assignment statement, or find a method available to change the value."
                .to_string(),
        );
    }

    if message.contains("expressions are only allowed at the top level of a file when that file is a module")
    {
        telemetry.add_measurement(
            telemetry::MEASUREMENT_COMPILE_ERROR_TOP_LEVEL_EXPRESSION_COUNT,
            1.0,
        );
        return Some(
            "Wrap the await expression in an async function, or wrap all the code in an async function."
                .to_string(),
        );
    }

    if message.contains("Expression expected") {
        telemetry.add_measurement(
            telemetry::MEASUREMENT_COMPILE_ERROR_EXPRESSION_EXPECTED_COUNT,
            1.0,
        );
        return Some("The expression is incomplete, finish it with a hypothetical implementation.".to_string());
    }

    telemetry.add_measurement(telemetry::MEASUREMENT_COMPILE_ERROR_OTHERS_COUNT, 1.0);
    None
}

/// Hint for a property that does not exist on its owning type.
///
/// Union owners get per-arm guidance. Otherwise the closest member of the
/// exact owner wins when the match is strong; a weak local match falls back
/// to fuzzy search over every `(owner, member)` pair of all loaded surfaces,
/// preferring candidates that agree with the local search.
fn property_not_found_hint(
    diag: &RawDiagnostic,
    message: &str,
    index: &DeclarationIndex,
    catalog: &DeclarationCatalog,
) -> Option<String> {
    let re = Regex::new(r"Property '([^']+)' does not exist on type '([^']+)'").ok()?;
    let caps = re.captures(message)?;
    let invalid_property = caps[1].to_string();
    let class_name = caps[2].replace("typeof", "").trim().to_string();

    let arms: Vec<&str> = class_name.split('|').map(str::trim).collect();
    if arms.len() > 1 {
        return Some(format!(
            "The type is a union type. Add code to convert the union type to a single type using the \"as\" keyword, then use the property of that type. Pick the most relevant one of the types to convert: {}.",
            arms.join(", ")
        ));
    }

    let local_best = index
        .closest_member(&class_name, &invalid_property)
        .map(|(member, score)| (member.clone(), score));

    if let Some((member, score)) = &local_best {
        if *score >= LOCAL_MATCH_THRESHOLD {
            return Some(member_hint(&invalid_property, &member.signature, &member.doc));
        }
    }

    // Global fuzzy fallback across every loaded surface, preferring
    // candidates consistent with the local search.
    let local_name = local_best.as_ref().map(|(m, _)| m.name.clone());
    let mut best: Option<(String, String, f64)> = None;
    for (owner, member) in catalog.all_member_pairs() {
        let mut score = similarity(&member, &invalid_property);
        if score < FUZZY_MATCH_THRESHOLD {
            continue;
        }
        if owner == class_name {
            score += 0.1;
        }
        if Some(&member) == local_name.as_ref() {
            score += 0.05;
        }
        if best.as_ref().map(|(_, _, s)| score > *s).unwrap_or(true) {
            best = Some((owner, member, score));
        }
    }
    if let Some((owner, member, _)) = best {
        if let Some(decl) = catalog.find_member(&owner, &member) {
            return Some(member_hint(&invalid_property, &decl.signature, &decl.doc));
        }
    }

    let member_names = index.member_signatures(&class_name);
    Some(format!(
        "'{}' is an invalid property or method, rewrite the code. Use another approach as alternative. Following are the available properties and methods of the type '{}': \n```typescript\n{}\n```\n",
        invalid_property,
        class_name,
        member_names.join("\n")
    ))
}

fn member_hint(invalid_property: &str, signature: &str, doc: &str) -> String {
    let mut hint = format!(
        "'{}' is an invalid property or method. Use this member instead: \n```typescript\n{}\n```\n",
        invalid_property, signature
    );
    if !doc.is_empty() {
        hint.push_str(&format!("Its documentation: {}\n", doc));
    }
    hint
}
