//! Records and fields: reading records with `RS`, splitting them with `FS`.

use std::io::{self, BufRead};

use regex::Regex;

use crate::ere;
use crate::error::Result;

/// Compiled form of `RS`
#[derive(Debug, Clone)]
pub(crate) enum RecordSeparator {
    Newline,
    Char(char),
    /// `RS = ""`: records are separated by blank lines
    Paragraph,
    Regex(Regex),
}

impl RecordSeparator {
    pub(crate) fn new(rs: &str) -> Result<Self> {
        let mut chars = rs.chars();
        let separator = match (chars.next(), chars.next()) {
            (None, _) => RecordSeparator::Paragraph,
            (Some('\n'), None) => RecordSeparator::Newline,
            (Some(c), None) => RecordSeparator::Char(c),
            _ => RecordSeparator::Regex(ere::compile(rs)?),
        };
        Ok(separator)
    }
}

/// Compiled form of `FS`, also used by `split`
#[derive(Debug, Clone)]
pub(crate) enum FieldSeparator {
    /// `" "`: runs of blanks, leading and trailing ones ignored
    Whitespace,
    Char(char),
    /// `""`: every character is a field
    Empty,
    Regex(Regex),
}

impl FieldSeparator {
    pub(crate) fn new(fs: &str) -> Result<Self> {
        let mut chars = fs.chars();
        let separator = match (chars.next(), chars.next()) {
            (None, _) => FieldSeparator::Empty,
            (Some(' '), None) => FieldSeparator::Whitespace,
            (Some(c), None) => FieldSeparator::Char(c),
            _ => FieldSeparator::Regex(ere::compile(fs)?),
        };
        Ok(separator)
    }

    /// Split `text` into fields. In paragraph mode a newline always
    /// separates fields.
    pub(crate) fn split(&self, text: &str, paragraph: bool) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        let pieces: Vec<String> = match self {
            FieldSeparator::Whitespace => {
                return text
                    .split(|c| matches!(c, ' ' | '\t' | '\n'))
                    .filter(|field| !field.is_empty())
                    .map(String::from)
                    .collect();
            }
            FieldSeparator::Empty => return text.chars().map(String::from).collect(),
            FieldSeparator::Char(c) => text.split(*c).map(String::from).collect(),
            FieldSeparator::Regex(regex) => regex.split(text).map(String::from).collect(),
        };
        if paragraph {
            pieces
                .iter()
                .flat_map(|piece| piece.split('\n'))
                .map(String::from)
                .collect()
        } else {
            pieces
        }
    }
}

/// Reads records from a stream. Text read past the end of a record stays
/// buffered, so `RS` may change between records.
pub(crate) struct RecordReader {
    reader: Box<dyn BufRead>,
    pending: String,
    eof: bool,
}

impl RecordReader {
    pub(crate) fn new(reader: Box<dyn BufRead>) -> Self {
        Self {
            reader,
            pending: String::new(),
            eof: false,
        }
    }

    /// Buffer one more line; false at end of input
    fn fill(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let read = self.reader.read_line(&mut self.pending)?;
        if read == 0 {
            self.eof = true;
        }
        Ok(read > 0)
    }

    /// Everything left, or `None` when nothing is
    fn take_rest(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    pub(crate) fn next_record(&mut self, separator: &RecordSeparator) -> io::Result<Option<String>> {
        match separator {
            RecordSeparator::Newline => {
                let record = self.until_char('\n')?;
                Ok(record.map(|mut r| {
                    if r.ends_with('\r') {
                        r.pop();
                    }
                    r
                }))
            }
            RecordSeparator::Char(c) => self.until_char(*c),
            RecordSeparator::Paragraph => self.paragraph(),
            RecordSeparator::Regex(regex) => self.until_regex(regex),
        }
    }

    fn until_char(&mut self, separator: char) -> io::Result<Option<String>> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.pending[scanned..].find(separator) {
                let end = scanned + pos;
                let record = self.pending[..end].to_string();
                self.pending.drain(..end + separator.len_utf8());
                return Ok(Some(record));
            }
            scanned = self.pending.len();
            if !self.fill()? {
                return Ok(self.take_rest());
            }
        }
    }

    fn paragraph(&mut self) -> io::Result<Option<String>> {
        // leading newlines never start a record
        loop {
            let blank = self.pending.len() - self.pending.trim_start_matches('\n').len();
            self.pending.drain(..blank);
            if !self.pending.is_empty() || !self.fill()? {
                break;
            }
        }

        let mut scanned = 0;
        loop {
            if let Some(pos) = self.pending[scanned..].find("\n\n") {
                let end = scanned + pos;
                let record = self.pending[..end].to_string();
                self.pending.drain(..end + 2);
                return Ok(Some(record));
            }
            // the last character may pair with the next line's newline
            scanned = self
                .pending
                .char_indices()
                .next_back()
                .map(|(i, _)| i)
                .unwrap_or(0);
            if !self.fill()? {
                let rest = self.take_rest();
                return Ok(rest.map(|r| r.trim_end_matches('\n').to_string()));
            }
        }
    }

    fn until_regex(&mut self, regex: &Regex) -> io::Result<Option<String>> {
        loop {
            let found = regex
                .find_iter(&self.pending)
                .find(|m| !m.is_empty())
                .map(|m| (m.start(), m.end()));
            if let Some((start, end)) = found {
                // a match touching the end of the buffer may grow
                if end < self.pending.len() || self.eof {
                    let record = self.pending[..start].to_string();
                    self.pending.drain(..end);
                    return Ok(Some(record));
                }
            }
            if !self.fill()? && found.is_none() {
                return Ok(self.take_rest());
            }
        }
    }
}

/// `$0` and its fields
#[derive(Debug, Default)]
pub(crate) struct Record {
    text: String,
    fields: Vec<String>,
}

impl Record {
    /// Replace `$0` and re-split it
    pub(crate) fn set(&mut self, text: String, fs: &FieldSeparator, paragraph: bool) {
        self.fields = fs.split(&text, paragraph);
        self.text = text;
    }

    pub(crate) fn resplit(&mut self, fs: &FieldSeparator, paragraph: bool) {
        self.fields = fs.split(&self.text, paragraph);
    }

    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn nf(&self) -> usize {
        self.fields.len()
    }

    /// `$index`; fields past NF are empty
    pub(crate) fn get(&self, index: usize) -> &str {
        match index {
            0 => &self.text,
            n => self.fields.get(n - 1).map(String::as_str).unwrap_or(""),
        }
    }

    /// Assign `$index` for index >= 1, extending NF as needed, and rebuild
    /// `$0` with `ofs`
    pub(crate) fn set_field(&mut self, index: usize, value: String, ofs: &str) {
        if self.fields.len() < index {
            self.fields.resize(index, String::new());
        }
        self.fields[index - 1] = value;
        self.rebuild(ofs);
    }

    /// Truncate or extend the fields to `nf` and rebuild `$0`
    pub(crate) fn set_nf(&mut self, nf: usize, ofs: &str) {
        self.fields.resize(nf, String::new());
        self.rebuild(ofs);
    }

    fn rebuild(&mut self, ofs: &str) {
        self.text = self.fields.join(ofs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(text: &'static str) -> RecordReader {
        RecordReader::new(Box::new(text.as_bytes()))
    }

    fn records(text: &'static str, rs: &str) -> Vec<String> {
        let separator = RecordSeparator::new(rs).unwrap();
        let mut reader = reader(text);
        let mut out = Vec::new();
        while let Some(record) = reader.next_record(&separator).unwrap() {
            out.push(record);
        }
        out
    }

    #[test]
    fn test_newline_records() {
        assert_eq!(records("a\nb\r\nc", "\n"), vec!["a", "b", "c"]);
        assert_eq!(records("a\n\nb\n", "\n"), vec!["a", "", "b"]);
        assert!(records("", "\n").is_empty());
    }

    #[test]
    fn test_single_char_records() {
        assert_eq!(records("a;b;c\n", ";"), vec!["a", "b", "c\n"]);
    }

    #[test]
    fn test_paragraph_records() {
        let text = "\n\nname one\naddr one\n\n\n\nname two\naddr two\n";
        assert_eq!(
            records(text, ""),
            vec!["name one\naddr one", "name two\naddr two"]
        );
    }

    #[test]
    fn test_regex_records() {
        assert_eq!(records("a12b345c", "[0-9]+"), vec!["a", "b", "c"]);
        assert_eq!(records("one, two,three", ", *"), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_separator_may_change_between_records() {
        let mut reader = reader("a;b\nc;d\n");
        let semi = RecordSeparator::new(";").unwrap();
        let newline = RecordSeparator::new("\n").unwrap();
        assert_eq!(reader.next_record(&semi).unwrap().unwrap(), "a");
        assert_eq!(reader.next_record(&newline).unwrap().unwrap(), "b");
        assert_eq!(reader.next_record(&semi).unwrap().unwrap(), "c");
        assert_eq!(reader.next_record(&newline).unwrap().unwrap(), "d");
        assert!(reader.next_record(&newline).unwrap().is_none());
    }

    #[test]
    fn test_field_separators() {
        let ws = FieldSeparator::new(" ").unwrap();
        assert_eq!(ws.split("  a \t b\nc  ", false), vec!["a", "b", "c"]);
        assert!(ws.split("   ", false).is_empty());

        let colon = FieldSeparator::new(":").unwrap();
        assert_eq!(colon.split("a::b", false), vec!["a", "", "b"]);

        let tab = FieldSeparator::new("\t").unwrap();
        assert_eq!(tab.split("a b\tc", false), vec!["a b", "c"]);

        let regex = FieldSeparator::new("[,;]+").unwrap();
        assert_eq!(regex.split("a,;b;c", false), vec!["a", "b", "c"]);

        let empty = FieldSeparator::new("").unwrap();
        assert_eq!(empty.split("abc", false), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_paragraph_mode_splits_on_newline() {
        let colon = FieldSeparator::new(":").unwrap();
        assert_eq!(colon.split("a:b\nc", true), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_default_separator_only_splits_on_blanks_and_newlines() {
        let ws = FieldSeparator::Whitespace;
        assert_eq!(ws.split("a\u{a0}b c", false), vec!["a\u{a0}b", "c"]);
        assert_eq!(ws.split("a\x0bb\x0cc", false), vec!["a\x0bb\x0cc"]);
        assert_eq!(ws.split("a\r\nb", false), vec!["a\r", "b"]);
    }

    #[test]
    fn test_brace_separator_is_literal() {
        let brace = FieldSeparator::new("{+").unwrap();
        assert_eq!(brace.split("a{{b{c", false), vec!["a", "b", "c"]);
        let rs = RecordSeparator::new("}{").unwrap();
        assert!(matches!(rs, RecordSeparator::Regex(_)));
    }

    #[test]
    fn test_bad_separator_regex() {
        assert!(FieldSeparator::new("[").is_err());
        assert!(RecordSeparator::new("(ab").is_err());
    }

    #[test]
    fn test_record_fields() {
        let ws = FieldSeparator::Whitespace;
        let mut record = Record::default();
        record.set("a b c".to_string(), &ws, false);
        assert_eq!(record.nf(), 3);
        assert_eq!(record.get(0), "a b c");
        assert_eq!(record.get(2), "b");
        assert_eq!(record.get(9), "");

        record.set_field(2, "X".to_string(), "-");
        assert_eq!(record.text(), "a-X-c");

        record.set_field(5, "e".to_string(), "-");
        assert_eq!(record.nf(), 5);
        assert_eq!(record.text(), "a-X-c--e");

        record.set_nf(2, " ");
        assert_eq!(record.text(), "a X");
    }
}
