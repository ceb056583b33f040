//! Prompt constants and builders for every LLM call in the pipeline.

use crate::analyzer::Host;

/// Reference notes appended to Excel generation and fix calls. Keeps the
/// model honest about A1 notation sizes, the most common failure source.
pub const EXCEL_REFERENCE_PROMPT: &str = r#"The following content is written using Markdown syntax, using "Bold" style to highlight the key information.

# Understanding Microsoft Excel A1 notation string:
**Excel A1 notation** is a way to refer to cells and ranges in Excel. It uses the column letter and row number to identify a cell. For example, "A1" refers to the cell at the first column and first row.
**A1 notation range** is represented by two cell references separated by a colon. For example, "A1:B2" represents a range that includes cells A1, B1, A2, and B2.
To determine the size of a range represented by an A1 notation, calculate the difference between the row numbers and the column letters of the two cell references.
For example, in the range "A1:B2":
- The row size is 2 - 1 + 1 = 2 (subtract the first row number from the second and add 1 because Excel is 1-indexed).
- The column size is 2 - 1 + 1 = 2 (subtract the first column number from the second and add 1, assuming A is 1, B is 2, etc.).
So the A1 notation range "A1:B2" represents a **2x2** area, and the range "D5:H6" represents a **2x5**.

# Valid A1 notation string:
A valid A1 notation string is a combination of a column letter and a row number. The column letters are always uppercase and the row number is always a positive integer. **Row numbers are 1-indexed, so "A3" means the 3rd row.**
For a **single cell**, the A1 notation is the column letter followed by the row number, for example "A1".
For **multiple cells**, the A1 notation is the top-left cell, a colon (:), then the bottom-right cell, for example "A1:B2".

# Dynamic A1 notation string and the host JavaScript API:
Given an array of data to build an A1 notation string, make sure the size of the range matches the size of the data array. For example, for an array named "dataArray" with 10 elements written to a multi-cell range starting from "A2", the expression should be `A2:B${dataArray.length + 1}`.

# Range size in the host JavaScript API:
Values of a single cell or multiple cells are represented by a two-dimensional array. A single cell is [[value]]. The range "A1:B2" is [[ , ], [ , ]].

# Declared size and actual size of a range:
The right-hand operand of the .values property must be a two-dimensional array whose size equals the **declared** size of the range. For a 2x3 range: `range.values = [[ , , ], [ , , ]]`.

Let's think step by step.
"#;

/// Reference notes for Excel custom-function scenarios.
pub const CUSTOM_FUNCTION_REFERENCE_PROMPT: &str = r#"The following content is written using Markdown syntax, using "Bold" style to highlight the key information.

# References:
## Understanding the difference between a custom function and a normal TypeScript/JavaScript function:
## Metadata
Custom functions require a JSDoc metadata comment that specifies the function name, parameters and return value. The host uses this metadata to register the function.

## Async Pattern
Custom functions can be asynchronous, but they must return a Promise object; the host waits for the Promise to resolve to get the result.

## Streaming Pattern
Streaming custom functions take a handler parameter (typically the last parameter) and call the handler.setResult method to update the cell value.

## Error Handling
To return an error from a custom function, throw an OfficeExtension.Error object with a specific error code.

## Limited API Access
Custom functions can only call the subset of the host JavaScript API designed for custom functions.

## Stateless
Custom functions are stateless; each call has separate memory and computation.

## Example of a custom function:
```typescript
/**
 * Returns the second highest value in a matrixed range of values.
 * @customfunction
 * @param {number[][]} values Multiple ranges of values.
 */
function secondHighest(values) {
  let highest = values[0][0],
    secondHighest = values[0][0];
  for (let i = 0; i < values.length; i++) {
    for (let j = 0; j < values[i].length; j++) {
      if (values[i][j] >= highest) {
        secondHighest = highest;
        highest = values[i][j];
      } else if (values[i][j] >= secondHighest) {
        secondHighest = values[i][j];
      }
    }
  }
  return secondHighest;
}
```
The @customfunction tag marks the function as a custom function. The @param and @returns tags specify the parameters and return value. Follow this pattern exactly.

So once you understand the concept of custom functions, make sure:
- The JSDoc comment is correctly added to the function.
- The function returns a value.
- The function follows the asynchronous pattern if necessary.
- The function follows the streaming pattern if necessary.

Let's think step by step.
"#;

/// System prompt for the pre-scan classification call.
pub fn pre_scan_system_prompt() -> String {
    r#"You are a classifier for scripting requests against host applications (Excel, Word, PowerPoint).

Given the user's request, decide:
- "host": which host application the request targets ("Excel", "Word" or "PowerPoint")
- "customFunctions": true only if the request asks for an Excel custom function (a formula callable from a cell)
- "complexity": an integer score 0-100 rating how hard the request is to implement (number of objects touched, data transformations, cross-sheet work)
- "shouldContinue": false if the request is not about generating host script code at all, or asks for something disallowed; true otherwise

RESPONSE FORMAT (JSON, nothing else):
{ "host": "Excel", "customFunctions": false, "complexity": 20, "shouldContinue": true }
"#
    .to_string()
}

/// User prompt for the pre-scan classification call.
pub fn pre_scan_user_prompt(user_input: &str) -> String {
    format!("The user's request is:\n\"{}\"\n\nClassify it.", user_input)
}

/// User prompt for the task-breakdown call.
pub fn breakdown_user_prompt(user_input: &str) -> String {
    format!(
        r#"Break the following request into an ordered list of small functions that together implement it, plus a short functional spec of the whole task.

The request:
"{}"

RESPONSE FORMAT (JSON, nothing else):
{{
  "spec": "one-paragraph functional description of the task",
  "funcs": [
    "Create a function named 'x' that ...",
    "Create a function named 'y' that ..."
  ]
}}"#,
        user_input
    )
}

/// Preamble prepended to the breakdown prompt for custom-function asks.
pub fn custom_function_breakdown_preamble() -> &'static str {
    "This is a task about Excel custom functions, pay attention if this is a regular custom function or a streaming custom function:\n\n"
}

/// The synthetic final subtask appended to every non-custom-function breakdown.
pub fn entry_function_subtask() -> String {
    "Create an entry function named 'main'. This function doesn't take any parameters and will call other functions in the list in right order. The function should be declared as 'async function'.".to_string()
}

/// Wraps a retrieved reference snippet for any call that carries one.
pub fn code_sample_prompt(sample: &str) -> String {
    format!(
        "Here is a reference snippet that solves a similar task. Use it to learn API usage, not to copy verbatim:\n```typescript\n{}\n```\n",
        sample
    )
}

/// Main user prompt for the code-synthesis call.
pub fn generate_code_user_prompt(code_spec: &str, host: Host, funcs: &[String]) -> String {
    let numbered = funcs
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{}. {}", i + 1, f))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"Generate a single self-contained TypeScript snippet for the {host} JavaScript API that implements the spec below.

Functional spec:
{code_spec}

Implement exactly these functions, in order:
{numbered}

RULES:
- Output exactly one fenced ```typescript code block and nothing else outside it.
- Do not import or require any module; mock external dependencies inline.
- Store the result of a method call in a variable before accessing its properties.
- Load host object properties with load() before reading them.
"#,
    )
}

/// Renders grouped declarations as pseudo-class reference blocks.
pub fn declarations_prompt(grouped: &[(String, Vec<String>)]) -> String {
    let mut block = String::from(
        "Here are some API declarations you may want to use as reference; only pick those relevant to the task:\n```typescript\n",
    );
    for (class_name, signatures) in grouped {
        block.push_str(&format!(
            "class {} extends OfficeExtension.ClientObject {{\n  {}\n}}\n",
            class_name,
            signatures.join("\n  ")
        ));
    }
    block.push_str("```\n");
    block
}

/// System prompt for one fix iteration, enumerating outstanding issues.
pub fn fix_issue_system_prompt(
    host: Host,
    substeps: &[String],
    errors: &[String],
    warnings: &[String],
) -> String {
    let steps = substeps
        .iter()
        .map(|s| format!("- {}", s))
        .collect::<Vec<_>>()
        .join("\n");
    let mut prompt = format!(
        r#"You are a senior developer fixing a TypeScript snippet written against the {host} JavaScript API. The snippet implements these subtasks:
{steps}

The snippet currently has the following problems. Fix all of them without changing what the code is meant to do.
"#,
    );
    if !errors.is_empty() {
        prompt.push_str("\nCompile errors:\n");
        for error in errors {
            prompt.push_str(&format!("{}\n", error));
        }
    }
    if !warnings.is_empty() {
        prompt.push_str("\nRuntime risks, double check each one:\n");
        for warning in warnings {
            prompt.push_str(&format!("{}\n", warning));
        }
    }
    prompt.push_str(
        "\nReturn the complete corrected snippet in a single fenced ```typescript code block. Do not drop existing functions. No explanation outside the block.\n",
    );
    prompt
}

/// User prompt for one fix iteration, embedding the current snippet.
pub fn fix_issue_user_prompt(
    code_snippet: &str,
    additional_info: &str,
    historical_errors: &[String],
) -> String {
    let mut prompt = format!(
        "The current snippet:\n```typescript\n{}\n```\n",
        code_snippet
    );
    if !additional_info.is_empty() {
        prompt.push_str(&format!("\nNote from the previous attempt: {}\n", additional_info));
    }
    if !historical_errors.is_empty() {
        prompt.push_str("\nErrors already seen in earlier rounds, avoid reintroducing them:\n");
        for error in historical_errors {
            prompt.push_str(&format!("- {}\n", error.trim()));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_prompt_numbers_subtasks() {
        let funcs = vec!["Create a function named 'readCell'".to_string()];
        let prompt = generate_code_user_prompt("read a cell", Host::Excel, &funcs);
        assert!(prompt.contains("1. Create a function named 'readCell'"));
        assert!(prompt.contains("Excel"));
    }

    #[test]
    fn test_declarations_prompt_renders_pseudo_classes() {
        let grouped = vec![(
            "Range".to_string(),
            vec!["getCell(row: number, column: number): Excel.Range;".to_string()],
        )];
        let prompt = declarations_prompt(&grouped);
        assert!(prompt.contains("class Range extends OfficeExtension.ClientObject"));
        assert!(prompt.contains("getCell"));
    }

    #[test]
    fn test_fix_system_prompt_lists_errors_and_warnings() {
        let prompt = fix_issue_system_prompt(
            Host::Excel,
            &["Create main".to_string()],
            &["Error: bad call".to_string()],
            &["Double check: A1 size".to_string()],
        );
        assert!(prompt.contains("Compile errors:"));
        assert!(prompt.contains("Runtime risks"));
        assert!(prompt.contains("Error: bad call"));
    }

    #[test]
    fn test_fix_user_prompt_carries_rejection_note() {
        let prompt = fix_issue_user_prompt("let a = 1;", "previous fix deleted too much", &[]);
        assert!(prompt.contains("previous fix deleted too much"));
    }
}
