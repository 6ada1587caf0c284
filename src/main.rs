use std::process;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tawk::{Avm, AwkSettings, Compiler, Error, ExtensionRegistry, Result, ScriptSource};

/// tawk - pattern scanning and processing language
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Input field separator
    #[arg(short = 'F', value_name = "fs")]
    field_separator: Option<String>,

    /// Assignment applied before the program starts
    #[arg(short = 'v', value_name = "var=value", action = clap::ArgAction::Append)]
    assignments: Vec<String>,

    /// Read the program from a file; repeatable
    #[arg(short = 'f', value_name = "progfile", action = clap::ArgAction::Append)]
    program_files: Vec<String>,

    /// Print the linked tuple queue instead of running it
    #[arg(long)]
    dump: bool,

    /// Enable _sleep and _dump
    #[arg(short = 'y')]
    extended_functions: bool,

    /// Enable _INTEGER, _DOUBLE and _STRING
    #[arg(short = 't')]
    type_functions: bool,

    /// Program text (unless -f is given), then files and var=value operands
    #[arg(value_name = "program", trailing_var_arg = true, allow_hyphen_values = true)]
    arguments: Vec<String>,
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_env("TAWK_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("tawk: {}", e);
            process::exit(2);
        }
    }
}

fn run(args: Args) -> Result<i32> {
    let mut arguments = args.arguments.into_iter();
    let sources = if args.program_files.is_empty() {
        let program = arguments
            .next()
            .ok_or_else(|| Error::invalid_argument("no program given"))?;
        vec![ScriptSource::from_str("<command-line>", program)]
    } else {
        args.program_files
            .iter()
            .map(|file| match file.as_str() {
                "-" => ScriptSource::new("<stdin>", std::io::stdin(), false),
                path => ScriptSource::from_file(path),
            })
            .collect()
    };

    let extensions = ExtensionRegistry::new();
    let compiler = Compiler::new(
        extensions.clone(),
        args.extended_functions,
        args.type_functions,
        false,
    );
    let tuples = compiler.compile(&sources)?;
    if args.dump {
        print!("{}", tuples);
        return Ok(0);
    }

    let mut settings = AwkSettings::new().program_name("tawk").operands(arguments);
    if let Some(fs) = args.field_separator {
        settings = settings.field_separator(field_separator(&fs));
    }
    for assignment in &args.assignments {
        let (name, value) = assignment.split_once('=').ok_or_else(|| {
            Error::invalid_argument(format!("-v expects var=value, got '{}'", assignment))
        })?;
        settings = settings.variable(name, value);
    }

    let status = Avm::new(settings, extensions).interpret(&tuples)?;
    Ok(status.code)
}

/// `-F t` means a tab; escape sequences are processed
fn field_separator(fs: &str) -> String {
    match fs {
        "t" => "\t".to_string(),
        _ => fs.replace("\\t", "\t").replace("\\\\", "\\"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_separator_escapes() {
        assert_eq!(field_separator("t"), "\t");
        assert_eq!(field_separator("\\t"), "\t");
        assert_eq!(field_separator(":"), ":");
        assert_eq!(field_separator("[,;]"), "[,;]");
    }

    #[test]
    fn test_program_then_operands() {
        let args = Args::parse_from(["tawk", "-F:", "-v", "x=1", "{ print }", "a", "y=2"]);
        assert_eq!(args.field_separator.as_deref(), Some(":"));
        assert_eq!(args.assignments, vec!["x=1"]);
        assert_eq!(args.arguments, vec!["{ print }", "a", "y=2"]);
    }

    #[test]
    fn test_program_files() {
        let args = Args::parse_from(["tawk", "-f", "a.awk", "-f", "b.awk", "--dump", "in"]);
        assert_eq!(args.program_files, vec!["a.awk", "b.awk"]);
        assert!(args.dump);
        assert_eq!(args.arguments, vec!["in"]);
    }
}
