//! The compile pipeline: sources through the lexer, parser, both semantic
//! passes, IR generation and linking.

use std::cell::RefCell;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::ext::ExtensionRegistry;
use crate::ir::AwkTuples;
use crate::ir::codegen::CodeGenerator;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::semantic::SyntaxTree;

enum Content {
    Text(String),
    File(PathBuf),
    Reader(RefCell<Box<dyn Read>>),
}

/// One piece of AWK source. Sources given to a single compilation are
/// concatenated in order.
pub struct ScriptSource {
    description: String,
    content: Content,
    intermediate: bool,
}

impl ScriptSource {
    /// Source read from `reader` when compiled. `intermediate` marks
    /// already-compiled code, which the compiler refuses.
    pub fn new(description: impl Into<String>, reader: impl Read + 'static, intermediate: bool) -> Self {
        Self {
            description: description.into(),
            content: Content::Reader(RefCell::new(Box::new(reader))),
            intermediate,
        }
    }

    pub fn from_str(description: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            content: Content::Text(text.into()),
            intermediate: false,
        }
    }

    /// A program file, read when compiled
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            description: path.display().to_string(),
            content: Content::File(path.to_path_buf()),
            intermediate: false,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_intermediate(&self) -> bool {
        self.intermediate
    }

    fn read_to_string(&self) -> Result<String> {
        let text = match &self.content {
            Content::Text(text) => text.clone(),
            Content::File(path) => fs::read_to_string(path).map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("{}: {}", self.description, e),
                ))
            })?,
            Content::Reader(reader) => {
                let mut text = String::new();
                reader.borrow_mut().read_to_string(&mut text)?;
                text
            }
        };
        Ok(text)
    }
}

impl fmt::Debug for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptSource")
            .field("description", &self.description)
            .field("intermediate", &self.intermediate)
            .finish_non_exhaustive()
    }
}

/// Turns AWK source into linked tuples. Holds only configuration, so one
/// compiler can be used for any number of compilations.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    extensions: ExtensionRegistry,
    additional_functions: bool,
    additional_type_functions: bool,
    use_stdin: bool,
}

impl Compiler {
    /// `additional_functions` enables `_sleep` and `_dump`,
    /// `additional_type_functions` enables `_INTEGER`, `_DOUBLE` and
    /// `_STRING`. With `use_stdin` the input is read even when the program
    /// has only BEGIN rules.
    pub fn new(
        extensions: ExtensionRegistry,
        additional_functions: bool,
        additional_type_functions: bool,
        use_stdin: bool,
    ) -> Self {
        Self {
            extensions,
            additional_functions,
            additional_type_functions,
            use_stdin,
        }
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// Compile and link `sources`
    pub fn compile(&self, sources: &[ScriptSource]) -> Result<AwkTuples> {
        if let Some(source) = sources.iter().find(|s| s.is_intermediate()) {
            return Err(Error::invalid_argument(format!(
                "cannot compile intermediate code: {}",
                source.description()
            )));
        }

        let mut tree = self.parse_ast(sources)?;
        // pass 1 binds back-references, pass 2 forward references
        tree.semantic_analysis()?;
        tree.semantic_analysis()?;
        debug!(passes = tree.passes(), "semantic analysis done");

        let mut tuples = CodeGenerator::new(tree.program())
            .with_input_loop(self.use_stdin)
            .generate()?;
        tuples.post_process();
        debug!(
            tuples = tuples.len(),
            globals = tuples.layout().len(),
            functions = tuples.functions().len(),
            "linked tuple queue"
        );
        Ok(tuples)
    }

    /// Compile a single inline program
    pub fn compile_str(&self, program: &str) -> Result<AwkTuples> {
        self.compile(&[ScriptSource::from_str("<inline-script>", program)])
    }

    /// The syntax tree of `sources`, before semantic analysis
    pub fn parse_ast(&self, sources: &[ScriptSource]) -> Result<SyntaxTree> {
        let texts = sources
            .iter()
            .map(ScriptSource::read_to_string)
            .collect::<Result<Vec<_>>>()?;
        let text = texts.join("\n");

        let tokens = Lexer::new(&text).tokenize()?;
        debug!(tokens = tokens.len(), sources = sources.len(), "tokenized");
        let program = Parser::new(tokens)
            .with_extended_functions(self.additional_functions)
            .with_type_functions(self.additional_type_functions)
            .parse()?;
        debug!(
            rules = program.rules.len(),
            functions = program.functions.len(),
            "parsed"
        );
        Ok(SyntaxTree::new(program).with_extensions(self.extensions.names()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_compile_str() {
        let tuples = Compiler::default()
            .compile_str(r#"BEGIN { print "hi" }"#)
            .unwrap();
        assert!(tuples.is_linked());
        assert_eq!(tuples.begin(), Some(0));
    }

    #[test]
    fn test_sources_are_concatenated() {
        let sources = [
            ScriptSource::from_str("a", "function twice(x) { return 2 * x }"),
            ScriptSource::new("b", "BEGIN { print twice(2) }".as_bytes(), false),
        ];
        let tuples = Compiler::default().compile(&sources).unwrap();
        assert_eq!(tuples.functions().len(), 1);
        assert_eq!(tuples.functions()[0].name, "twice");
    }

    #[test]
    fn test_intermediate_source_rejected_before_reading() {
        let sources = [
            ScriptSource::from_file("/nonexistent/tawk/program.awk"),
            ScriptSource::new("compiled", "".as_bytes(), true),
        ];
        let err = Compiler::default().compile(&sources).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(err.to_string().contains("compiled"));
    }

    #[test]
    fn test_unreadable_source() {
        let sources = [ScriptSource::from_file("/nonexistent/tawk/program.awk")];
        let err = Compiler::default().compile(&sources).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("program.awk"));
    }

    #[test]
    fn test_program_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"{ print $1 }\n").unwrap();
        let tuples = Compiler::default()
            .compile(&[ScriptSource::from_file(file.path())])
            .unwrap();
        assert!(tuples.main().is_some());
    }

    #[test]
    fn test_forward_reference_resolves() {
        let program = "BEGIN { print f(1) } function f(x) { return g(x) } function g(y) { return y }";
        assert!(Compiler::default().compile_str(program).is_ok());
    }

    #[test]
    fn test_undefined_function() {
        let err = Compiler::default()
            .compile_str("BEGIN { nosuch(1) }")
            .unwrap_err();
        assert!(matches!(err, Error::Semantic { .. }));
        assert!(err.to_string().contains("nosuch"));
    }

    #[test]
    fn test_next_in_begin_rejected() {
        let err = Compiler::default().compile_str("BEGIN { next }").unwrap_err();
        assert!(matches!(err, Error::Semantic { .. }));
    }

    #[test]
    fn test_extension_resolution() {
        let mut extensions = ExtensionRegistry::new();
        extensions.register("ext_len", |args: &[Value]| {
            Ok(Value::from_number(args.len() as f64))
        });
        let compiler = Compiler::new(extensions, false, false, false);
        assert!(compiler.extensions().contains("ext_len"));
        assert!(compiler.compile_str("BEGIN { ext_len(1, 2) }").is_ok());
        assert!(Compiler::default().compile_str("BEGIN { ext_len(1, 2) }").is_err());
    }

    #[test]
    fn test_extended_function_flags() {
        let program = "BEGIN { _sleep(0) }";
        assert!(Compiler::default().compile_str(program).is_err());
        assert!(Compiler::new(ExtensionRegistry::new(), true, false, false)
            .compile_str(program)
            .is_ok());

        let typed = "BEGIN { x = _INTEGER(2.5) }";
        assert!(Compiler::new(ExtensionRegistry::new(), false, true, false)
            .compile_str(typed)
            .is_ok());
    }

    #[test]
    fn test_use_stdin_adds_input_loop() {
        let program = "BEGIN { x = 1 }";
        assert!(Compiler::default().compile_str(program).unwrap().main().is_none());
        let tuples = Compiler::new(ExtensionRegistry::new(), false, false, true)
            .compile_str(program)
            .unwrap();
        assert!(tuples.main().is_some());
    }

    #[test]
    fn test_parse_ast_is_not_analysed() {
        let sources = [ScriptSource::from_str("a", "BEGIN { f() } function f() {}")];
        let tree = Compiler::default().parse_ast(&sources).unwrap();
        assert_eq!(tree.passes(), 0);
        assert_eq!(tree.unresolved_calls(), 1);
    }
}
