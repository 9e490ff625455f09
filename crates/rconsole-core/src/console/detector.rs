//! Completion detection for IRB/Pry style consoles
//!
//! The console never says "done"; the only signal is the idle prompt it
//! prints once it wants more input. Everything here works on text that has
//! been passed through `strip_control_sequences` first, since colour codes
//! between the response and the prompt would defeat an end-anchored match.

use once_cell::sync::Lazy;
use regex::Regex;

/// CSI (cursor/colour), OSC (window title), charset selection and other
/// two-byte escapes, plus stray BEL/CR bytes.
static CONTROL_SEQUENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\x1b\[[0-9;?<=>]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[()#][0-9A-Za-z]|\x1b[@-Z\\^_=>]|[\x07\r]",
    )
    .unwrap()
});

/// Idle prompt on the last line, preceded by a newline (or at the very start
/// of the text for the first prompt after boot):
/// - `irb(main):001:0> ` / `irb(main):002:0* ` / `irb(main):003> `
/// - `[1] pry(main)> `
/// - `user@host(main)> `, `pry(main)> `, `myapp(dev)> `
static PROMPT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?:\A|\n)(?:",
        r#"[\w.-]+\([^()\n]*\):\d+(?::\d+)?[>*"']"#,
        r"|\[\d+\] [\w.-]+\([^()\n]*\)[>*]",
        r"|[\w.@-]+\([^()\n]*\)[>*]",
        r")[ \t]*\z",
    ))
    .unwrap()
});

/// A line that starts with a well-known Ruby/Rails exception class
static EXCEPTION_LINE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?m)^(?:",
        r"SyntaxError|NameError|NoMethodError|ArgumentError|TypeError|ZeroDivisionError",
        r"|RuntimeError|StandardError|ScriptError|LoadError|KeyError|IndexError|RangeError",
        r"|FrozenError|NotImplementedError|LocalJumpError|FloatDomainError|IOError|StopIteration",
        r"|Errno::\w+|JSON::ParserError|PG::\w+|Mysql2::Error|SQLite3::\w+",
        r"|ActiveRecord::(?:RecordNotFound|RecordInvalid|RecordNotUnique|StatementInvalid",
        r"|ConnectionNotEstablished|RecordNotSaved|SubclassNotFound|UnknownAttributeError)",
        r"|ActiveModel::(?:UnknownAttributeError|ValidationError)",
        r")\b",
    ))
    .unwrap()
});

/// Backtrace headers: IRB's `(irb):1:in ...` location line and the reversed
/// `Traceback (most recent call last):` form
static TRACE_HEADER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:Traceback \(most recent call last\)|\((?:irb|pry)\):\d+:in )").unwrap()
});

/// Remove terminal escape sequences and carriage returns
pub fn strip_control_sequences(text: &str) -> String {
    CONTROL_SEQUENCE_PATTERN.replace_all(text, "").into_owned()
}

/// Whether cleaned output ends with an idle prompt
pub fn is_complete(text: &str) -> bool {
    PROMPT_PATTERN.is_match(text)
}

/// Everything before the trailing prompt line, or the whole text when no
/// prompt is present (timeouts, partial output).
pub fn extract_response(text: &str) -> &str {
    match PROMPT_PATTERN.find(text) {
        Some(m) => &text[..m.start()],
        None => text,
    }
}

/// The line that marks a response as an error, if any
pub fn detect_error(response: &str) -> Option<String> {
    let m = EXCEPTION_LINE_PATTERN
        .find(response)
        .or_else(|| TRACE_HEADER_PATTERN.find(response))?;
    let line_start = response[..m.start()].rfind('\n').map_or(0, |i| i + 1);
    let line_end = response[m.start()..]
        .find('\n')
        .map_or(response.len(), |i| m.start() + i);
    Some(response[line_start..line_end].trim().to_string())
}
