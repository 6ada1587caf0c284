use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use regex::Regex;
use tracing::warn;

use super::record::FieldSeparator;
use super::streams::shell;
use super::{Avm, Operand, scalar};
use crate::ast::Builtin;
use crate::error::{Error, Result};
use crate::format::sprintf;
use crate::ir::{AwkTuples, Place, VarRef};
use crate::value::Value;

/// xorshift64 generator behind `rand` and `srand`
#[derive(Debug, Clone)]
pub(crate) struct Random {
    seed: f64,
    state: u64,
}

impl Random {
    pub(crate) fn new(seed: f64) -> Self {
        let state = seed.to_bits() ^ 0x9E37_79B9_7F4A_7C15;
        Self {
            seed,
            // xorshift never leaves zero
            state: if state == 0 { 0x9E37_79B9_7F4A_7C15 } else { state },
        }
    }

    /// Uniform in [0, 1)
    pub(crate) fn next(&mut self) -> f64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Restart from `seed`, returning the previous seed
    pub(crate) fn reseed(&mut self, seed: f64) -> f64 {
        let previous = self.seed;
        *self = Random::new(seed);
        previous
    }
}

impl Avm {
    pub(super) fn call_builtin(
        &mut self,
        tuples: &AwkTuples,
        builtin: Builtin,
        args: Vec<Operand>,
    ) -> Result<Value> {
        let mut args = args.into_iter();
        match builtin {
            Builtin::Length => {
                let length = match args.next() {
                    Some(Operand::Array(array)) => array.borrow().len(),
                    Some(operand) => self.string(&scalar(operand)?).chars().count(),
                    None => self.record.text().chars().count(),
                };
                Ok(Value::from_number(length as f64))
            }
            Builtin::Match => {
                let subject = match args.next() {
                    Some(operand) => self.string(&scalar(operand)?),
                    None => String::new(),
                };
                let pattern = args
                    .next()
                    .ok_or_else(|| Error::runtime("match: missing regex"))?;
                let regex = self.regex(tuples, pattern)?;
                let (start, length) = match regex.find(&subject) {
                    Some(m) => (
                        subject[..m.start()].chars().count() + 1,
                        m.as_str().chars().count() as f64,
                    ),
                    None => (0, -1.0),
                };
                self.vars.rstart = start as f64;
                self.vars.rlength = length;
                Ok(Value::from_number(start as f64))
            }
            Builtin::Dump => {
                let dump = match args.next() {
                    Some(Operand::Array(array)) => {
                        let array = array.borrow();
                        let mut entries: Vec<_> = array.iter().collect();
                        entries.sort_by(|a, b| a.0.cmp(b.0));
                        entries
                            .into_iter()
                            .map(|(key, value)| format!("{}={}\n", key, self.string(value)))
                            .collect::<String>()
                    }
                    Some(operand) => format!("{}\n", self.string(&scalar(operand)?)),
                    None => self.dump_globals(),
                };
                self.output.write_all(dump.as_bytes())?;
                Ok(Value::from_number(0.0))
            }
            Builtin::Split | Builtin::Sub | Builtin::Gsub => Err(Error::runtime(format!(
                "{} has its own instruction",
                builtin.name()
            ))),
            _ => {
                let values = args.map(scalar).collect::<Result<Vec<_>>>()?;
                self.call_scalar_builtin(builtin, &values)
            }
        }
    }

    fn call_scalar_builtin(&mut self, builtin: Builtin, args: &[Value]) -> Result<Value> {
        let number = |i: usize| args.get(i).map(Value::to_number).unwrap_or(0.0);

        let value = match builtin {
            // String functions
            Builtin::Substr => {
                let s = self.arg_text(args, 0);
                let length = args.get(2).map(Value::to_number);
                Value::from_string(substr(&s, number(1), length))
            }
            Builtin::Index => {
                let s = self.arg_text(args, 0);
                let target = self.arg_text(args, 1);
                Value::from_number(index(&s, &target) as f64)
            }
            Builtin::Sprintf => {
                let (format, rest) = match args.split_first() {
                    Some((format, rest)) => (self.string(format), rest),
                    None => (String::new(), args),
                };
                Value::from_string(sprintf(&format, rest, &self.vars.convfmt))
            }
            Builtin::Tolower => Value::from_string(self.arg_text(args, 0).to_lowercase()),
            Builtin::Toupper => Value::from_string(self.arg_text(args, 0).to_uppercase()),

            // Math functions
            Builtin::Sin => Value::from_number(number(0).sin()),
            Builtin::Cos => Value::from_number(number(0).cos()),
            Builtin::Atan2 => Value::from_number(number(0).atan2(number(1))),
            Builtin::Exp => Value::from_number(number(0).exp()),
            Builtin::Log => Value::from_number(number(0).ln()),
            Builtin::Sqrt => Value::from_number(number(0).sqrt()),
            Builtin::Int => Value::from_number(number(0).trunc()),
            Builtin::Rand => Value::from_number(self.random.next()),
            Builtin::Srand => {
                let seed = match args.first() {
                    Some(seed) => seed.to_number(),
                    None => SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_secs() as f64)
                        .unwrap_or(0.0),
                };
                Value::from_number(self.random.reseed(seed))
            }

            // I/O and system functions
            Builtin::System => {
                self.flush_all()?;
                let command = self.arg_text(args, 0);
                let status = match shell(&command).status() {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(e) => {
                        warn!(command = %command, error = %e, "system cannot run command");
                        -1
                    }
                };
                Value::from_number(status as f64)
            }
            Builtin::Close => {
                let name = self.arg_text(args, 0);
                let closed = match self.outputs.close(&name) {
                    Some(result) => Some(result),
                    None => self.inputs.close(&name),
                };
                let status = match closed {
                    Some(Ok(status)) => status,
                    Some(Err(e)) => {
                        warn!(stream = %name, error = %e, "close failed");
                        -1
                    }
                    None => {
                        warn!(stream = %name, "close of a stream that is not open");
                        -1
                    }
                };
                Value::from_number(status as f64)
            }
            Builtin::Fflush => {
                let status = match args.first() {
                    None => {
                        self.flush_all()?;
                        0
                    }
                    Some(name) => {
                        let name = self.string(name);
                        match self.outputs.flush(&name) {
                            Some(Ok(())) => 0,
                            Some(Err(e)) => {
                                warn!(stream = %name, error = %e, "fflush failed");
                                -1
                            }
                            None if name == "/dev/stdout" || name.is_empty() => {
                                self.output.flush()?;
                                0
                            }
                            None => -1,
                        }
                    }
                };
                Value::from_number(status as f64)
            }

            // Extended set
            Builtin::Sleep => {
                self.flush_all()?;
                let seconds = number(0);
                if seconds > 0.0 && seconds.is_finite() {
                    std::thread::sleep(Duration::from_secs_f64(seconds));
                }
                Value::from_number(0.0)
            }

            // Extended type set
            Builtin::ToInteger => Value::from_number(number(0).trunc()),
            Builtin::ToDouble => Value::from_number(number(0)),
            Builtin::ToString => Value::from_string(self.arg_text(args, 0)),

            Builtin::Length
            | Builtin::Match
            | Builtin::Dump
            | Builtin::Split
            | Builtin::Sub
            | Builtin::Gsub => {
                return Err(Error::runtime(format!(
                    "{} cannot take plain values",
                    builtin.name()
                )));
            }
        };
        Ok(value)
    }

    fn arg_text(&self, args: &[Value], i: usize) -> String {
        args.get(i).map(|v| self.string(v)).unwrap_or_default()
    }

    fn flush_all(&mut self) -> Result<()> {
        self.output.flush()?;
        self.outputs.flush_all()?;
        Ok(())
    }

    /// `name=value` for every global, in layout order
    fn dump_globals(&self) -> String {
        let mut dump = String::new();
        for (name, slot) in self.names.iter().zip(&self.globals) {
            let line = match slot {
                super::Slot::Untyped => format!("{}=\n", name),
                super::Slot::Scalar(value) => format!("{}={}\n", name, self.string(value)),
                super::Slot::Array(array) => {
                    format!("{}=<array of {}>\n", name, array.borrow().len())
                }
            };
            dump.push_str(&line);
        }
        dump
    }

    /// `split(text, array[, separator])`; returns the number of pieces
    pub(super) fn split(
        &mut self,
        tuples: &AwkTuples,
        array: VarRef,
        text: Value,
        separator: Option<Operand>,
    ) -> Result<usize> {
        let text = self.string(&text);
        let pieces = match separator {
            None => self.field_separator.split(&text, self.vars.rs.is_empty()),
            Some(Operand::Regex(id)) => {
                FieldSeparator::Regex(tuples.regex(id).clone()).split(&text, false)
            }
            Some(operand) => {
                let separator = self.string(&scalar(operand)?);
                let separator = if separator.chars().count() > 1 {
                    FieldSeparator::Regex(self.dynamic_regex(&separator)?)
                } else {
                    FieldSeparator::new(&separator)?
                };
                separator.split(&text, false)
            }
        };

        let array = self.array(array)?;
        let mut elements = array.borrow_mut();
        elements.clear();
        for (i, piece) in pieces.iter().enumerate() {
            elements.insert((i + 1).to_string(), Value::from_input(piece.as_str()));
        }
        Ok(pieces.len())
    }

    /// `sub`/`gsub` on a place; returns the number of replacements
    pub(super) fn substitute(
        &mut self,
        place: Place,
        index: Option<Value>,
        regex: &Regex,
        replacement: Value,
        global: bool,
    ) -> Result<usize> {
        let replacement = self.string(&replacement);
        let target = self.read_place(place, index.as_ref())?;
        let target = self.string(&target);
        let (result, count) = substitute(regex, &replacement, &target, global);
        if count > 0 {
            self.write_place(place, index.as_ref(), Value::from_string(result))?;
        }
        Ok(count)
    }
}

/// 1-based, rounded, clamped to the string
fn substr(s: &str, start: f64, length: Option<f64>) -> String {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as f64;
    let start = start.round();
    let end = match length {
        Some(length) => start + length.round(),
        None => len + 1.0,
    };
    let from = start.max(1.0);
    let to = end.min(len + 1.0);
    // also catches NaN
    if !(from < to) {
        return String::new();
    }
    chars[(from as usize - 1)..(to as usize - 1)].iter().collect()
}

/// 1-based character position of `target` in `s`, 0 when absent
fn index(s: &str, target: &str) -> usize {
    if target.is_empty() {
        return 0;
    }
    s.find(target)
        .map(|byte| s[..byte].chars().count() + 1)
        .unwrap_or(0)
}

/// Replace the first (or every) match of `regex` in `target`. In the
/// replacement `&` is the matched text, `\&` a literal ampersand and `\\`
/// a backslash.
pub(crate) fn substitute(regex: &Regex, replacement: &str, target: &str, global: bool) -> (String, usize) {
    let mut result = String::with_capacity(target.len());
    let mut last = 0;
    let mut count = 0;
    for m in regex.find_iter(target) {
        result.push_str(&target[last..m.start()]);
        expand_replacement(replacement, m.as_str(), &mut result);
        last = m.end();
        count += 1;
        if !global {
            break;
        }
    }
    result.push_str(&target[last..]);
    (result, count)
}

fn expand_replacement(replacement: &str, matched: &str, out: &mut String) {
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some('&') | Some('\\') => {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                _ => out.push('\\'),
            },
            '&' => out.push_str(matched),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substr() {
        assert_eq!(substr("hello", 2.0, Some(3.0)), "ell");
        assert_eq!(substr("hello", 3.0, None), "llo");
        assert_eq!(substr("hello", 0.0, Some(2.0)), "h");
        assert_eq!(substr("hello", -1.0, Some(3.0)), "h");
        assert_eq!(substr("hello", 4.0, Some(100.0)), "lo");
        assert_eq!(substr("hello", 10.0, None), "");
        assert_eq!(substr("hello", 2.0, Some(-1.0)), "");
        assert_eq!(substr("héllo", 2.0, Some(2.0)), "él");
        assert_eq!(substr("hello", f64::NAN, None), "");
    }

    #[test]
    fn test_index() {
        assert_eq!(index("hello", "ll"), 3);
        assert_eq!(index("hello", "z"), 0);
        assert_eq!(index("hello", ""), 0);
        assert_eq!(index("héllo", "l"), 3);
    }

    #[test]
    fn test_substitute() {
        let re = Regex::new("o").unwrap();
        assert_eq!(substitute(&re, "0", "foo boo", false), ("f0o boo".to_string(), 1));
        assert_eq!(substitute(&re, "0", "foo boo", true), ("f00 b00".to_string(), 4));
        assert_eq!(substitute(&re, "0", "abc", true), ("abc".to_string(), 0));
    }

    #[test]
    fn test_replacement_escapes() {
        let re = Regex::new("[0-9]+").unwrap();
        assert_eq!(substitute(&re, "<&>", "a12b", false).0, "a<12>b");
        assert_eq!(substitute(&re, r"\&", "a12b", false).0, "a&b");
        assert_eq!(substitute(&re, r"\\&", "a12b", false).0, r"a\12b");
        assert_eq!(substitute(&re, r"\n", "a12b", false).0, r"a\nb");
    }

    #[test]
    fn test_empty_matches() {
        let re = Regex::new("x*").unwrap();
        assert_eq!(substitute(&re, "-", "abc", true), ("-a-b-c-".to_string(), 4));
    }

    #[test]
    fn test_random_is_deterministic() {
        let mut a = Random::new(0.0);
        let mut b = Random::new(0.0);
        for _ in 0..100 {
            let x = a.next();
            assert!((0.0..1.0).contains(&x));
            assert_eq!(x, b.next());
        }
        let mut c = Random::new(42.0);
        assert_ne!(Random::new(0.0).next(), c.next());
    }

    #[test]
    fn test_reseed_returns_previous_seed() {
        let mut random = Random::new(0.0);
        assert_eq!(random.reseed(7.0), 0.0);
        assert_eq!(random.reseed(9.0), 7.0);
        let first = random.next();
        random.reseed(9.0);
        assert_eq!(random.next(), first);
    }
}
