//! Splitting CWL strings into literal text and `$(...)` placeholders.

use super::ExprError;

/// A piece of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    /// Literal text, escapes already removed
    Text(String),
    /// JavaScript source between `$(` and the matching `)`
    Placeholder(String),
}

/// Split `text` at every unescaped `$(...)`. `\$(` stays literal.
pub fn scan(text: &str) -> Result<Vec<StringPart>, ExprError> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && chars.get(i + 1) == Some(&'$') && chars.get(i + 2) == Some(&'(') {
            literal.push_str("$(");
            i += 3;
            continue;
        }
        if c == '$' && chars.get(i + 1) == Some(&'(') {
            let end = matching_close(&chars, i + 1).ok_or_else(|| ExprError::Eval {
                expression: text.to_string(),
                message: "unterminated $( expression".to_string(),
            })?;
            if !literal.is_empty() {
                parts.push(StringPart::Text(std::mem::take(&mut literal)));
            }
            parts.push(StringPart::Placeholder(chars[i + 2..end].iter().collect()));
            i = end + 1;
            continue;
        }
        literal.push(c);
        i += 1;
    }

    if !literal.is_empty() {
        parts.push(StringPart::Text(literal));
    }
    Ok(parts)
}

/// The body of `text` when it is exactly one `${ ... }` block.
pub fn function_body(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if !trimmed.starts_with("${") {
        return None;
    }
    let chars: Vec<char> = trimmed.chars().collect();
    let end = matching_close(&chars, 1)?;
    if end != chars.len() - 1 {
        return None;
    }
    // `${` is two ASCII bytes and the final `}` one byte
    Some(&trimmed[2..trimmed.len() - 1])
}

/// The source of `text` when it is exactly one `$( ... )` placeholder.
pub fn single_placeholder(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if !trimmed.starts_with("$(") {
        return None;
    }
    match scan(trimmed) {
        Ok(parts) => match parts.as_slice() {
            [StringPart::Placeholder(code)] => Some(code.clone()),
            _ => None,
        },
        Err(_) => None,
    }
}

/// Index of the bracket closing the one at `open`, skipping nested brackets
/// and JavaScript string literals.
fn matching_close(chars: &[char], open: usize) -> Option<usize> {
    let mut stack = vec![closing(chars[open])?];
    let mut quote: Option<char> = None;
    let mut i = open + 1;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
        } else {
            match c {
                '"' | '\'' | '`' => quote = Some(c),
                '(' | '[' | '{' => stack.push(closing(c)?),
                ')' | ']' | '}' => {
                    if stack.pop() != Some(c) {
                        return None;
                    }
                    if stack.is_empty() {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn closing(open: char) -> Option<char> {
    match open {
        '(' => Some(')'),
        '[' => Some(']'),
        '{' => Some('}'),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_mixed() {
        let parts = scan("sample_$(inputs.n + 1).txt").unwrap();
        assert_eq!(
            parts,
            vec![
                StringPart::Text("sample_".to_string()),
                StringPart::Placeholder("inputs.n + 1".to_string()),
                StringPart::Text(".txt".to_string()),
            ]
        );
    }

    #[test]
    fn test_scan_nested_and_quoted() {
        let parts = scan("$(inputs.f.basename.replace(\")\", \"(\"))").unwrap();
        assert_eq!(
            parts,
            vec![StringPart::Placeholder(
                "inputs.f.basename.replace(\")\", \"(\")".to_string()
            )]
        );
    }

    #[test]
    fn test_escaped_placeholder() {
        let parts = scan("cost: \\$(5)").unwrap();
        assert_eq!(parts, vec![StringPart::Text("cost: $(5)".to_string())]);
    }

    #[test]
    fn test_unterminated() {
        assert!(scan("$(inputs.x").is_err());
    }

    #[test]
    fn test_function_body() {
        assert_eq!(function_body("${ return 1; }"), Some(" return 1; "));
        assert_eq!(function_body("  ${ return {a: 1}; }\n"), Some(" return {a: 1}; "));
        assert_eq!(function_body("${a} and ${b}"), None);
        assert_eq!(function_body("echo ${HOME}"), None);
    }

    #[test]
    fn test_single_placeholder() {
        assert_eq!(single_placeholder("$(inputs.x)"), Some("inputs.x".to_string()));
        assert_eq!(single_placeholder("$(inputs.x).txt"), None);
        assert_eq!(single_placeholder("plain"), None);
    }
}
