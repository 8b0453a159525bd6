//! The textual key=value grammar carried inside xmessages
//!
//! Messages look like `new:  ID=foo\ bar BIN="/bin/ls"` - a prefix up to the
//! first `:`, then whitespace separated `key=value` pairs. Values may be
//! bare words with `\`, `"` and space escaped by a backslash, double quoted
//! strings in which `\` escapes `"`, `\`, `` ` ``, `$` and newline, or
//! single quoted strings which are taken literally with no escapes at all.
//! The quoting rules are lifted from shell word splitting so that hand
//! written messages behave the way people expect.

/// Serialize a message from a prefix and key / value pairs.
///
/// Values are emitted in the backslash escaped bare word form; the result
/// always parses back through [unserialize].
pub fn serialize<'a, I>(prefix: &str, pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = format!("{prefix}:  ");
    let mut first = true;

    for (key, value) in pairs {
        if !first {
            out.push(' ');
        }
        first = false;

        out.push_str(key);
        out.push('=');
        for c in value.chars() {
            if matches!(c, '\\' | '"' | ' ') {
                out.push('\\');
            }
            out.push(c);
        }
    }

    out
}

/// Parse a serialized message back into its prefix and key / value pairs.
///
/// Returns `None` when there is no `:` terminating the prefix or when a
/// quoted value is left unterminated. Trailing text that does not parse as a
/// `key=` simply ends the pair list.
pub fn unserialize(message: &str) -> Option<(String, Vec<(String, String)>)> {
    let colon = message.find(':')?;
    let prefix = message[..colon].to_string();
    let mut rest = &message[colon + 1..];
    let mut pairs = Vec::new();

    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }

        let eq = match rest.find('=') {
            Some(i) => i,
            None => break,
        };
        let key = rest[..eq].trim_matches(' ').to_string();
        rest = rest[eq + 1..].trim_start_matches(' ');

        let (value, remainder) = if let Some(body) = rest.strip_prefix('"') {
            unquote_double(body)?
        } else if let Some(body) = rest.strip_prefix('\'') {
            unquote_single(body)?
        } else {
            unescape_bare(rest)
        };

        pairs.push((key, value));
        rest = remainder;
    }

    Some((prefix, pairs))
}

// `body` starts just after the opening double quote. In double quotes a
// backslash only escapes " \ ` $ and newline; before anything else it is a
// literal backslash.
fn unquote_double(body: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = body.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((value, &body[i + 1..])),
            '\\' => match chars.clone().next() {
                Some((_, next)) if matches!(next, '"' | '\\' | '`' | '$' | '\n') => {
                    value.push(next);
                    chars.next();
                }
                _ => value.push('\\'),
            },
            _ => value.push(c),
        }
    }

    None // no closing quote
}

// `body` starts just after the opening single quote; the content is literal.
fn unquote_single(body: &str) -> Option<(String, &str)> {
    let end = body.find('\'')?;

    Some((body[..end].to_string(), &body[end + 1..]))
}

// A bare word runs to the first unescaped space; a backslash escapes any
// following character. A dangling backslash at the end of input is dropped.
fn unescape_bare(body: &str) -> (String, &str) {
    let mut value = String::new();
    let mut chars = body.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            ' ' => return (value, &body[i..]),
            '\\' => {
                if let Some((_, next)) = chars.next() {
                    value.push(next);
                }
            }
            _ => value.push(c),
        }
    }

    (value, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    fn owned(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test_case("new:  ID=abc", "new", &[("ID", "abc")]; "single pair")]
    #[test_case("new:  ID=abc BIN=ls", "new", &[("ID", "abc"), ("BIN", "ls")]; "two pairs")]
    #[test_case("change: ID=a\\ b", "change", &[("ID", "a b")]; "escaped space")]
    #[test_case("change: ID=a\\\\b", "change", &[("ID", "a\\b")]; "escaped backslash")]
    #[test_case("remove: ID=\"a b\"", "remove", &[("ID", "a b")]; "double quoted")]
    #[test_case("remove: ID=\"a\\\"b\"", "remove", &[("ID", "a\"b")]; "escaped quote")]
    #[test_case("remove: ID=\"a\\qb\"", "remove", &[("ID", "a\\qb")]; "literal backslash in quotes")]
    #[test_case("remove: ID='a \\\"b'", "remove", &[("ID", "a \\\"b")]; "single quotes are literal")]
    #[test_case("new:   ID  =  abc", "new", &[("ID", "abc")]; "spaces around key and value")]
    #[test_case("new:  ID=", "new", &[("ID", "")]; "empty value")]
    #[test_case("new:", "new", &[]; "no pairs")]
    #[test_case("new:  garbage", "new", &[]; "trailing garbage ends the list")]
    #[test]
    fn unserialize_parses(message: &str, prefix: &str, pairs: &[(&str, &str)]) {
        let (p, kv) = unserialize(message).expect("message to parse");
        assert_eq!(p, prefix);
        assert_eq!(kv, owned(pairs));
    }

    #[test_case("no prefix separator"; "missing colon")]
    #[test_case("new: ID=\"unterminated"; "unterminated double quote")]
    #[test_case("new: ID='unterminated"; "unterminated single quote")]
    #[test]
    fn unserialize_rejects(message: &str) {
        assert_eq!(unserialize(message), None);
    }

    #[test_case(&[("ID", "simple")]; "plain value")]
    #[test_case(&[("ID", "with space"), ("BIN", "/bin/ls")]; "value containing a space")]
    #[test_case(&[("NAME", "a\\b\"c d")]; "all three metacharacters")]
    #[test_case(&[("K", "")]; "empty value")]
    #[test]
    fn serialized_messages_parse_back(pairs: &[(&str, &str)]) {
        let message = serialize("new", pairs.iter().copied());
        let (prefix, kv) = unserialize(&message).expect("serialized message to parse");

        assert_eq!(prefix, "new");
        assert_eq!(kv, owned(pairs));
    }

    #[test]
    fn serialize_uses_the_escaped_form() {
        assert_eq!(serialize("new", [("ID", "a b")]), "new:  ID=a\\ b");
    }
}
