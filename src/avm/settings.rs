use std::collections::HashMap;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};

/// Everything the AVM needs from the outside world for one run
pub struct AwkSettings {
    pub(crate) input: Box<dyn BufRead>,
    pub(crate) output: Box<dyn Write>,
    pub(crate) field_separator: Option<String>,
    pub(crate) record_separator: Option<String>,
    pub(crate) variables: Vec<(String, String)>,
    pub(crate) operands: Vec<String>,
    pub(crate) program_name: String,
    pub(crate) environment: Option<HashMap<String, String>>,
}

impl Default for AwkSettings {
    fn default() -> Self {
        Self {
            input: Box::new(BufReader::new(io::stdin())),
            output: Box::new(io::stdout()),
            field_separator: None,
            record_separator: None,
            variables: Vec::new(),
            operands: Vec::new(),
            program_name: "tawk".to_string(),
            environment: None,
        }
    }
}

impl AwkSettings {
    /// Standard input and output, no overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream read when no file operand is given, and for the `-` operand
    pub fn input(mut self, input: impl Read + 'static) -> Self {
        self.input = Box::new(BufReader::new(input));
        self
    }

    pub fn output(mut self, output: impl Write + 'static) -> Self {
        self.output = Box::new(output);
        self
    }

    /// Initial `FS`
    pub fn field_separator(mut self, fs: impl Into<String>) -> Self {
        self.field_separator = Some(fs.into());
        self
    }

    /// Initial `RS`
    pub fn record_separator(mut self, rs: impl Into<String>) -> Self {
        self.record_separator = Some(rs.into());
        self
    }

    /// Assignment applied before BEGIN, like `-v name=value`
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.push((name.into(), value.into()));
        self
    }

    /// A file name or a `name=value` assignment, processed in order by the
    /// main loop
    pub fn operand(mut self, operand: impl Into<String>) -> Self {
        self.operands.push(operand.into());
        self
    }

    pub fn operands<I, S>(mut self, operands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operands.extend(operands.into_iter().map(Into::into));
        self
    }

    /// `ARGV[0]`
    pub fn program_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = name.into();
        self
    }

    /// Contents of `ENVIRON`; the process environment when never set
    pub fn environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = Some(environment);
        self
    }
}

impl fmt::Debug for AwkSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwkSettings")
            .field("field_separator", &self.field_separator)
            .field("record_separator", &self.record_separator)
            .field("variables", &self.variables)
            .field("operands", &self.operands)
            .field("program_name", &self.program_name)
            .finish_non_exhaustive()
    }
}

/// Split `name=value` when `name` is a valid identifier
pub(crate) fn split_assignment(operand: &str) -> Option<(&str, &str)> {
    let (name, value) = operand.split_once('=')?;
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((name, value))
}

/// Process escape sequences in a command-line assignment value
pub(crate) fn unescape(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            None => result.push('\\'),
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('b') => result.push('\x08'),
            Some('f') => result.push('\x0C'),
            Some('a') => result.push('\x07'),
            Some('v') => result.push('\x0B'),
            Some(d @ '0'..='7') => {
                let mut code = d.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            code = code * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                if let Some(c) = char::from_u32(code) {
                    result.push(c);
                }
            }
            Some(other) => result.push(other),
        }
    }
    result
}
