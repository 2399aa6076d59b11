//! Repair of almost-JSON text returned by the generator.
//!
//! The generator is asked for strict JSON but is not reliable about escaping
//! multi-line code samples: it wraps output in markdown fences, pads it with
//! prose, and emits literal line breaks inside string values. The functions
//! here recover the one known failure mode each; anything else still fails in
//! the downstream parser, which is the caller's problem to handle.

/// Escape literal line breaks that occur inside quoted JSON string values.
///
/// Single left-to-right scan with two bits of state: whether we are inside a
/// double-quoted string, and whether the previous character was an unconsumed
/// backslash. LF and CR are rewritten independently to their two-character
/// escaped forms; every other character passes through unchanged. An
/// unterminated string leaves the scanner in-string at end of input and the
/// output is returned as-is.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escape_pending = false;

    for c in raw.chars() {
        if escape_pending {
            out.push(c);
            escape_pending = false;
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                escape_pending = true;
            }
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            _ => out.push(c),
        }
    }

    out
}

/// Trim a generator reply down to the JSON document it is expected to carry.
///
/// Strips surrounding markdown code fences, then cuts to the substring from
/// the first `[` or `{` to the last matching `]` or `}`. Runs before
/// [`sanitize`], never inside it. Input without any JSON-looking span is
/// returned as-is for the parser to reject.
pub fn extract_json_payload(raw: &str) -> &str {
    let inner = strip_markdown_fences(raw);
    trim_to_json_span(inner)
}

/// Remove markdown code fences (```json ... ``` or ``` ... ```), returning
/// the inner content. Bare input passes through.
fn strip_markdown_fences(input: &str) -> &str {
    let trimmed = input.trim();

    if let Some(rest) = trimmed.strip_prefix("```") {
        // Skip the optional language tag on the opening fence line
        let after_tag = match rest.find('\n') {
            Some(pos) => &rest[pos + 1..],
            None => return "",
        };
        if let Some(pos) = after_tag.rfind("```") {
            return after_tag[..pos].trim();
        }
        return after_tag.trim();
    }

    trimmed
}

fn trim_to_json_span(input: &str) -> &str {
    let open = input.find(['[', '{']);
    let Some(start) = open else {
        return input;
    };
    let close = match &input[start..start + 1] {
        "[" => ']',
        _ => '}',
    };
    match input.rfind(close) {
        Some(end) if end > start => &input[start..=end],
        _ => input,
    }
}

/// Second unescape pass for double-escaping producers: rewrite the
/// two-character sequences `\n`, `\t`, `\r`, `\\` into the literal control
/// characters. Unknown escapes are left untouched.
pub fn unescape_code(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some('r') => {
                chars.next();
                out.push('\r');
            }
            Some('\\') => {
                chars.next();
                out.push('\\');
            }
            _ => out.push('\\'),
        }
    }

    out
}

/// True when a parsed string value looks double-escaped: it carries `\n`/`\t`
/// escape sequences but not a single literal newline. Code that parsed
/// cleanly from well-formed JSON already contains literal newlines and must
/// not be unescaped a second time.
pub fn looks_double_escaped(s: &str) -> bool {
    !s.contains('\n') && (s.contains("\\n") || s.contains("\\t"))
}
