//! Source wrapping for injected scripts.
//!
//! The caller's source is embedded in a shim that captures console output
//! into an ordered log list, evaluates the source exactly once, and emits a
//! single terminal receipt carrying either the stringified result (with the
//! sentinel `'undefined'` for an absent result) or the thrown error's
//! message and stack, plus the captured logs.

use injex_core::event::RECEIPT_TYPE;

/// Wrap caller source for injection.
#[must_use]
pub fn wrap_source(source: &str) -> String {
    // JSON string escaping is valid JS string escaping.
    let literal = serde_json::Value::String(source.to_owned()).to_string();
    format!(
        r"(function() {{
    var initialLogs = [];
    var originalLog = console.log;

    console.log = function() {{
        var args = Array.prototype.slice.call(arguments);
        var logMsg = args.map(function(arg) {{
            return typeof arg === 'object' ? JSON.stringify(arg) : String(arg);
        }}).join(' ');
        initialLogs.push(logMsg);
        originalLog.apply(console, arguments);
    }};

    var scriptResult;
    var scriptError;
    try {{
        scriptResult = eval({literal});
    }} catch (e) {{
        scriptError = {{ message: e.toString(), stack: e.stack }};
    }}

    console.log = originalLog;

    send({{
        type: '{RECEIPT_TYPE}',
        result: scriptError ? undefined : (scriptResult !== undefined ? scriptResult.toString() : 'undefined'),
        error: scriptError,
        initial_logs: initialLogs
    }});
}})();"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_source_as_escaped_literal() {
        let wrapped = wrap_source("1+1");
        assert!(wrapped.contains(r#"eval("1+1")"#));
        assert!(wrapped.contains(RECEIPT_TYPE));
    }

    #[test]
    fn test_escapes_quotes_and_newlines() {
        let wrapped = wrap_source("var s = \"a\";\nsend(s)");
        assert!(wrapped.contains(r#"eval("var s = \"a\";\nsend(s)")"#));
    }

    #[test]
    fn test_restores_console_log_after_capture() {
        let wrapped = wrap_source("console.log('x')");
        assert!(wrapped.contains("console.log = originalLog"));
        assert!(wrapped.contains("initialLogs.push"));
    }
}
