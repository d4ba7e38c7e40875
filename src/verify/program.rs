//! Builds the programs that exercise user code for each test form.

use crate::error::{Result, SandboxError};
use crate::verify::value::Value;

/// User code followed by a print of `expression`.
pub fn expression_program(code: &str, expression: &str) -> String {
    format!("{code}\n\nprint({expression})\n")
}

/// The call text `name(arg1, arg2)` with arguments as Python literals.
pub fn call_expression(function_name: &str, args: &[Value]) -> String {
    let args: Vec<String> = args.iter().map(Value::to_literal).collect();
    format!("{function_name}({})", args.join(", "))
}

/// User code followed by a call whose result is printed with `repr`.
pub fn function_call_program(code: &str, call: &str) -> String {
    format!("{code}\n\n_result = {call}\nprint(repr(_result))\n")
}

/// Reject anything that is not a plain (possibly dotted) Python identifier.
pub fn validate_function_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c == '_' || c.is_alphabetic())
                && chars.all(|c| c == '_' || c.is_alphanumeric())
        });

    if valid {
        Ok(())
    } else {
        Err(SandboxError::InvalidFunctionName(name.to_string()))
    }
}
