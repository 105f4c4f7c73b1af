//! Function scope that user code runs in
//!
//! The user's source is compiled with the `AsyncFunction` constructor, so it
//! becomes a function body in the global scope and closes over nothing of the
//! wrapper. Its parameters are the only capabilities it receives: `console`
//! and `print` write through the capture op, `input` and `args` carry the
//! request data, and `Deno` is shadowed. The wrapper holds the ops object in
//! its own closure and removes `globalThis.Deno` before the body runs. It
//! evaluates to a promise that settles to `null` on success or to the error
//! message on failure.

use crate::Result;

const PRELUDE: &str = r#"(async (ops, source, input, args) => {
  delete globalThis.Deno;
  const format = (value) => {
    if (typeof value === "string") return value;
    if (value instanceof Error) return `${value.name}: ${value.message}`;
    if (typeof value === "object" && value !== null) {
      try {
        const text = JSON.stringify(value);
        if (text !== undefined) return text;
      } catch (_) {}
    }
    return String(value);
  };
  const writer = (isError) => (...values) => {
    ops.op_capture_write(isError, values.map(format).join(" "));
  };
  const console = Object.freeze({
    log: writer(false),
    info: writer(false),
    debug: writer(false),
    warn: writer(true),
    error: writer(true),
    trace: writer(true),
  });
  globalThis.console = console;
  const describe = (error) => {
    try {
      if (error instanceof SyntaxError) return `${error.name}: ${error.message}`;
      const text = error instanceof Error ? error.message || error.name : String(error);
      return text || "Uncaught exception";
    } catch (_) {
      return "Uncaught exception";
    }
  };
  const AsyncFunction = (async () => {}).constructor;
  try {
    const body = new AsyncFunction("console", "print", "input", "args", "Deno", source);
    await body.call(undefined, console, console.log, input, args, undefined);
    return null;
  } catch (error) {
    return describe(error);
  }
})(Deno.core.ops, "#;

/// Script name reported in stack traces
pub(super) const SCRIPT_NAME: &str = "<sandbox>";

/// Build the script for one execution
pub(super) fn wrap(code: &str, input: &str, args: &[String]) -> Result<String> {
    // JSON literals are valid JS expressions
    let source = serde_json::to_string(code)?;
    let input = serde_json::to_string(input)?;
    let args = serde_json::to_string(args)?;

    let mut script =
        String::with_capacity(PRELUDE.len() + source.len() + input.len() + args.len() + 8);
    script.push_str(PRELUDE);
    for (i, literal) in [source, input, args].iter().enumerate() {
        if i > 0 {
            script.push_str(", ");
        }
        script.push_str(literal);
    }
    script.push(')');
    Ok(script)
}

/// Reduce an engine error report to the message a user should see
pub(super) fn describe_error(report: &str) -> String {
    let first = report.lines().next().unwrap_or(report).trim();
    let message = first.strip_prefix("Uncaught ").unwrap_or(first);
    if message.is_empty() {
        "Unknown JavaScript error".to_string()
    } else {
        message.to_string()
    }
}
