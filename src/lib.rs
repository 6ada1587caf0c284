//! tawk - an AWK compiler and virtual machine
//!
//! AWK source is compiled into a linked queue of tuples, which the AVM
//! (AWK virtual machine) then runs against input records.
//!
//! # Example
//!
//! ```
//! use tawk::{Avm, AwkSettings, Compiler, ExtensionRegistry};
//!
//! let tuples = Compiler::default()
//!     .compile_str(r#"BEGIN { print "Hello, World!" }"#)
//!     .unwrap();
//!
//! let mut avm = Avm::new(
//!     AwkSettings::new().output(std::io::sink()),
//!     ExtensionRegistry::new(),
//! );
//! let status = avm.interpret(&tuples).unwrap();
//! assert_eq!(status.code, 0);
//! ```
//!
//! # Field Processing Example
//!
//! ```
//! use std::fs;
//! use tawk::{Avm, AwkSettings, Compiler, ExtensionRegistry};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let out = dir.path().join("out.txt");
//! let program = format!(r#"{{ print $2, $1 > "{}" }}"#, out.display());
//! let tuples = Compiler::default().compile_str(&program).unwrap();
//!
//! let settings = AwkSettings::new()
//!     .field_separator(",")
//!     .input(&b"hello,world\nfoo,bar\n"[..]);
//! Avm::new(settings, ExtensionRegistry::new())
//!     .interpret(&tuples)
//!     .unwrap();
//!
//! assert_eq!(fs::read_to_string(out).unwrap(), "world hello\nbar foo\n");
//! ```
//!
//! # Extension Functions
//!
//! ```
//! use tawk::{Avm, AwkSettings, Compiler, ExtensionRegistry, Value};
//!
//! let mut extensions = ExtensionRegistry::new();
//! extensions.register("shout", |args: &[Value]| {
//!     Ok(Value::from_string(args[0].to_string_val().to_uppercase()))
//! });
//!
//! let compiler = Compiler::new(extensions.clone(), false, false, false);
//! let tuples = compiler.compile_str(r#"BEGIN { exit length(shout("abc")) }"#).unwrap();
//! let mut avm = Avm::new(AwkSettings::new(), extensions);
//! assert_eq!(avm.interpret(&tuples).unwrap().code, 3);
//! ```

pub mod ast;
pub mod avm;
pub mod compiler;
mod ere;
pub mod error;
pub mod ext;
pub mod format;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod semantic;
pub mod value;

pub use avm::{Avm, AwkSettings, ExitStatus, Phase};
pub use compiler::{Compiler, ScriptSource};
pub use error::{Error, Result, SourceLocation};
pub use ext::{ExtensionFn, ExtensionRegistry};
pub use ir::AwkTuples;
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::Parser;
pub use semantic::SyntaxTree;
pub use value::Value;
