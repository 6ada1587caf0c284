//! AWK extended regular expressions on the `regex` crate.
//!
//! The two syntaxes mostly agree. The rewrite covers where they do not: a
//! `{` that cannot open an interval, a stray `}`, a repetition operator with
//! nothing to repeat, and `[` inside a bracket expression.

use regex::Regex;

/// Compile AWK regex text: literals, dynamic regexes, `FS` and `RS`
pub(crate) fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&translate(pattern))
}

#[derive(Clone, Copy, PartialEq)]
enum Prev {
    /// Start of the pattern, or after `(`, `|` or `^`
    Nothing,
    Atom,
    Repetition,
}

fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut prev = Prev::Nothing;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                out.push(c);
                if let Some(&escaped) = chars.get(i + 1) {
                    out.push(escaped);
                    i += 1;
                }
                prev = Prev::Atom;
            }
            '[' => {
                i = bracket(&chars, i, &mut out);
                prev = Prev::Atom;
                continue;
            }
            '{' => match interval_end(&chars, i) {
                Some(end) if prev != Prev::Nothing => {
                    out.extend(&chars[i..end]);
                    i = end;
                    prev = Prev::Repetition;
                    continue;
                }
                _ => {
                    out.push_str("\\{");
                    prev = Prev::Atom;
                }
            },
            '}' => {
                out.push_str("\\}");
                prev = Prev::Atom;
            }
            '*' | '+' | '?' if prev == Prev::Nothing => {
                out.push('\\');
                out.push(c);
                prev = Prev::Atom;
            }
            '*' | '+' | '?' => {
                out.push(c);
                prev = Prev::Repetition;
            }
            '(' | '|' | '^' => {
                out.push(c);
                prev = Prev::Nothing;
            }
            _ => {
                out.push(c);
                prev = Prev::Atom;
            }
        }
        i += 1;
    }
    out
}

/// `{n}`, `{n,}` or `{n,m}` starting at `start`; the index past its `}`
fn interval_end(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    let digits = |i: &mut usize| {
        let from = *i;
        while chars.get(*i).is_some_and(char::is_ascii_digit) {
            *i += 1;
        }
        *i > from
    };
    if !digits(&mut i) {
        return None;
    }
    if chars.get(i) == Some(&',') {
        i += 1;
        digits(&mut i);
    }
    (chars.get(i) == Some(&'}')).then_some(i + 1)
}

/// Copy the bracket expression at `start`, returning the index past its
/// closing `]`. An unterminated one is copied as is for the regex crate to
/// report.
fn bracket(chars: &[char], start: usize, out: &mut String) -> usize {
    let mut i = start + 1;
    let mut body = String::from("[");
    if chars.get(i) == Some(&'^') {
        body.push('^');
        i += 1;
    }
    // a leading `]` is a member
    if chars.get(i) == Some(&']') {
        body.push_str("\\]");
        i += 1;
    }
    while let Some(&c) = chars.get(i) {
        match c {
            ']' => {
                out.push_str(&body);
                out.push(']');
                return i + 1;
            }
            '[' if matches!(chars.get(i + 1), Some(':' | '.' | '=')) => {
                let kind = chars[i + 1];
                let close = (i + 2..chars.len().saturating_sub(1))
                    .find(|&j| chars[j] == kind && chars[j + 1] == ']');
                match close {
                    Some(j) => {
                        body.extend(&chars[i..j + 2]);
                        i = j + 2;
                    }
                    None => {
                        body.push_str("\\[");
                        i += 1;
                    }
                }
            }
            '[' => {
                body.push_str("\\[");
                i += 1;
            }
            '\\' => {
                body.push(c);
                if let Some(&escaped) = chars.get(i + 1) {
                    body.push(escaped);
                    i += 1;
                }
                i += 1;
            }
            _ => {
                body.push(c);
                i += 1;
            }
        }
    }
    out.extend(&chars[start..]);
    chars.len()
}
