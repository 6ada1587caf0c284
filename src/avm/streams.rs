//! Files, pipes and commands opened by `print >`, `print >>`, `print |`,
//! `getline < file` and `cmd | getline`, keyed by the name the program
//! used.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, Command, Stdio};

use tracing::debug;

use super::record::RecordReader;
use crate::ir::Redirect;

/// Run `command` through the shell
pub(crate) fn shell(command: &str) -> Command {
    let mut shell = Command::new("sh");
    shell.arg("-c").arg(command);
    shell
}

fn exit_code(child: &mut Child) -> io::Result<i32> {
    Ok(child.wait()?.code().unwrap_or(-1))
}

enum OutputStream {
    File(BufWriter<File>),
    Pipe {
        child: Child,
        stdin: Option<BufWriter<ChildStdin>>,
    },
}

impl OutputStream {
    fn open(name: &str, redirect: Redirect) -> io::Result<Self> {
        let stream = match redirect {
            Redirect::Truncate | Redirect::Append => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .append(redirect == Redirect::Append)
                    .truncate(redirect == Redirect::Truncate)
                    .open(name)
                    .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", name, e)))?;
                OutputStream::File(BufWriter::new(file))
            }
            Redirect::Pipe => {
                let mut child = shell(name).stdin(Stdio::piped()).spawn()?;
                let stdin = child.stdin.take().map(BufWriter::new);
                OutputStream::Pipe { child, stdin }
            }
        };
        debug!(name, ?redirect, "opened output stream");
        Ok(stream)
    }

    fn close(self) -> io::Result<i32> {
        match self {
            OutputStream::File(mut file) => {
                file.flush()?;
                Ok(0)
            }
            OutputStream::Pipe { mut child, stdin } => {
                if let Some(mut stdin) = stdin {
                    stdin.flush()?;
                }
                exit_code(&mut child)
            }
        }
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputStream::File(file) => file.write(buf),
            OutputStream::Pipe { stdin, .. } => match stdin {
                Some(stdin) => stdin.write(buf),
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe is closed")),
            },
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputStream::File(file) => file.flush(),
            OutputStream::Pipe { stdin, .. } => match stdin {
                Some(stdin) => stdin.flush(),
                None => Ok(()),
            },
        }
    }
}

/// Redirected output, opened on first use
#[derive(Default)]
pub(crate) struct OutputStreams {
    streams: HashMap<String, OutputStream>,
}

impl OutputStreams {
    /// The stream for `name`; `>` truncates only when the file is first
    /// opened
    pub(crate) fn stream(&mut self, name: &str, redirect: Redirect) -> io::Result<&mut dyn Write> {
        let stream = match self.streams.entry(name.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(OutputStream::open(name, redirect)?),
        };
        Ok(stream)
    }

    pub(crate) fn flush(&mut self, name: &str) -> Option<io::Result<()>> {
        self.streams.get_mut(name).map(|stream| stream.flush())
    }

    pub(crate) fn flush_all(&mut self) -> io::Result<()> {
        for stream in self.streams.values_mut() {
            stream.flush()?;
        }
        Ok(())
    }

    pub(crate) fn close(&mut self, name: &str) -> Option<io::Result<i32>> {
        let stream = self.streams.remove(name)?;
        debug!(name, "closing output stream");
        Some(stream.close())
    }

    pub(crate) fn close_all(&mut self) -> io::Result<()> {
        let mut result = Ok(());
        for (name, stream) in self.streams.drain() {
            debug!(name = %name, "closing output stream");
            if let Err(e) = stream.close() {
                result = Err(e);
            }
        }
        result
    }
}

struct CommandInput {
    child: Child,
    reader: RecordReader,
}

/// Files and commands read by getline
#[derive(Default)]
pub(crate) struct InputStreams {
    files: HashMap<String, RecordReader>,
    commands: HashMap<String, CommandInput>,
}

impl InputStreams {
    pub(crate) fn file(&mut self, name: &str) -> io::Result<&mut RecordReader> {
        let reader = match self.files.entry(name.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let reader: RecordReader = if name == "-" || name == "/dev/stdin" {
                    RecordReader::new(Box::new(BufReader::new(io::stdin())))
                } else {
                    RecordReader::new(Box::new(BufReader::new(File::open(name)?)))
                };
                debug!(name, "opened input file");
                e.insert(reader)
            }
        };
        Ok(reader)
    }

    pub(crate) fn command(&mut self, command: &str) -> io::Result<&mut RecordReader> {
        let input = match self.commands.entry(command.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let mut child = shell(command).stdout(Stdio::piped()).spawn()?;
                let stdout = child.stdout.take().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::BrokenPipe, "command has no output")
                })?;
                debug!(command, "opened input command");
                e.insert(CommandInput {
                    child,
                    reader: RecordReader::new(Box::new(BufReader::new(stdout))),
                })
            }
        };
        Ok(&mut input.reader)
    }

    pub(crate) fn close(&mut self, name: &str) -> Option<io::Result<i32>> {
        if self.files.remove(name).is_some() {
            debug!(name, "closed input file");
            return Some(Ok(0));
        }
        let CommandInput { mut child, reader } = self.commands.remove(name)?;
        drop(reader);
        debug!(command = name, "closing input command");
        Some(exit_code(&mut child))
    }

    pub(crate) fn close_all(&mut self) {
        self.files.clear();
        for (_, CommandInput { mut child, reader }) in self.commands.drain() {
            drop(reader);
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avm::record::RecordSeparator;

    #[test]
    fn test_truncate_then_append_to_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let name = path.to_str().unwrap();
        std::fs::write(&path, "old\n").unwrap();

        let mut streams = OutputStreams::default();
        streams.stream(name, Redirect::Truncate).unwrap().write_all(b"a\n").unwrap();
        // still open: no second truncation
        streams.stream(name, Redirect::Truncate).unwrap().write_all(b"b\n").unwrap();
        assert_eq!(streams.close(name).unwrap().unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");

        streams.stream(name, Redirect::Append).unwrap().write_all(b"c\n").unwrap();
        streams.close_all().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn test_close_unknown_stream() {
        let mut outputs = OutputStreams::default();
        let mut inputs = InputStreams::default();
        assert!(outputs.close("nothing").is_none());
        assert!(inputs.close("nothing").is_none());
    }

    #[test]
    fn test_read_file_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, "one\ntwo\n").unwrap();
        let name = path.to_str().unwrap();

        let separator = RecordSeparator::Newline;
        let mut inputs = InputStreams::default();
        let first = inputs.file(name).unwrap().next_record(&separator).unwrap();
        let second = inputs.file(name).unwrap().next_record(&separator).unwrap();
        assert_eq!(first.as_deref(), Some("one"));
        assert_eq!(second.as_deref(), Some("two"));
        assert_eq!(inputs.close(name).unwrap().unwrap(), 0);
        // reopened from the start
        let again = inputs.file(name).unwrap().next_record(&separator).unwrap();
        assert_eq!(again.as_deref(), Some("one"));
    }

    #[test]
    fn test_missing_input_file() {
        let mut inputs = InputStreams::default();
        assert!(inputs.file("/nonexistent/tawk/input").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_input() {
        let separator = RecordSeparator::Newline;
        let mut inputs = InputStreams::default();
        let line = inputs
            .command("echo hello")
            .unwrap()
            .next_record(&separator)
            .unwrap();
        assert_eq!(line.as_deref(), Some("hello"));
        assert_eq!(inputs.close("echo hello").unwrap().unwrap(), 0);
    }
}
