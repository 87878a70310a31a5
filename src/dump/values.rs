//! Parser for the value tuple of a dump `INSERT` line
//!
//! A payload looks like `1,'it\'s',NULL,3.5`: comma separated, strings in
//! single quotes with backslash escapes (or doubled quotes), bare tokens for
//! numbers and `NULL`. Quoted strings are unescaped; bare tokens are trimmed
//! and passed through, so a bare `NULL` stays the literal `NULL`.

use eyre::{Result, bail};

/// Split one payload into positional raw values
///
/// # Errors
/// Returns an error on an unterminated quoted string or on text trailing a
/// closing quote before the next comma.
///
/// # Example
/// ```
/// use skrape::dump::parse_values;
///
/// let values = parse_values(r"1,'it\'s, fine',NULL").unwrap();
/// assert_eq!(values, vec!["1", "it's, fine", "NULL"]);
/// ```
pub fn parse_values(payload: &str) -> Result<Vec<String>> {
    let mut values = Vec::new();
    let mut chars = payload.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| *c == ' ') {
            chars.next();
        }

        if chars.peek() == Some(&'\'') {
            chars.next();
            let mut value = String::new();
            let mut closed = false;

            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some(escaped) => value.push(unescape(escaped)),
                        None => bail!("dangling escape at end of payload"),
                    },
                    '\'' if chars.peek() == Some(&'\'') => {
                        chars.next();
                        value.push('\'');
                    }
                    '\'' => {
                        closed = true;
                        break;
                    }
                    c => value.push(c),
                }
            }

            if !closed {
                bail!("unterminated quoted value in payload");
            }
            values.push(value);

            while chars.peek().is_some_and(|c| *c == ' ') {
                chars.next();
            }
            match chars.next() {
                Some(',') => continue,
                None => break,
                Some(c) => bail!("unexpected '{}' after quoted value", c),
            }
        } else {
            let mut token = String::new();
            let mut more = false;
            for c in chars.by_ref() {
                if c == ',' {
                    more = true;
                    break;
                }
                token.push(c);
            }
            values.push(token.trim().to_string());
            if !more {
                break;
            }
        }
    }

    Ok(values)
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        '0' => '\0',
        'b' => '\x08',
        'Z' => '\x1a',
        other => other,
    }
}
