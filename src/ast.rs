use crate::error::SourceLocation;

/// A complete AWK program
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub rules: Vec<Rule>,
    pub functions: Vec<FunctionDef>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the function called `name`
    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }
}

/// A pattern-action rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: Option<Pattern>,
    pub action: Option<Block>,
    /// Declaration order among all rules and functions
    pub position: usize,
    pub location: SourceLocation,
}

/// Pattern types that can trigger a rule
#[derive(Debug, Clone)]
pub enum Pattern {
    /// BEGIN - runs before any input
    Begin,
    /// END - runs after all input
    End,
    /// Expression that evaluates to true/false
    Expr(Expr),
    /// Regex pattern: /pattern/
    Regex(String),
    /// Range pattern: start, end
    Range {
        start: Box<Pattern>,
        end: Box<Pattern>,
    },
}

/// User-defined function
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Block,
    /// Declaration order among all rules and functions
    pub position: usize,
    /// Which parameters are used as arrays, filled in by semantic analysis
    pub array_params: Vec<bool>,
    pub location: SourceLocation,
}

impl FunctionDef {
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p == name)
    }
}

/// A block of statements
#[derive(Debug, Clone)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub location: SourceLocation,
}

impl Block {
    pub fn new(statements: Vec<Stmt>, location: SourceLocation) -> Self {
        Self { statements, location }
    }

    pub fn empty(location: SourceLocation) -> Self {
        Self {
            statements: Vec::new(),
            location,
        }
    }
}

/// Statement types
#[derive(Debug, Clone)]
pub enum Stmt {
    /// Expression statement (e.g., function call, assignment)
    Expr(Expr),

    /// Print statement: print expr, expr, ...
    Print {
        args: Vec<Expr>,
        output: Option<OutputRedirect>,
        location: SourceLocation,
    },

    /// Printf statement: printf format, expr, ...
    Printf {
        format: Expr,
        args: Vec<Expr>,
        output: Option<OutputRedirect>,
        location: SourceLocation,
    },

    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        location: SourceLocation,
    },

    While {
        condition: Expr,
        body: Box<Stmt>,
        location: SourceLocation,
    },

    DoWhile {
        body: Box<Stmt>,
        condition: Expr,
        location: SourceLocation,
    },

    /// C-style for loop
    For {
        init: Option<Expr>,
        condition: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
        location: SourceLocation,
    },

    /// For-in loop (array iteration)
    ForIn {
        var: String,
        array: String,
        body: Box<Stmt>,
        location: SourceLocation,
    },

    Block(Block),

    Break { location: SourceLocation },

    Continue { location: SourceLocation },

    /// Skip to the next record
    Next { location: SourceLocation },

    Exit {
        code: Option<Expr>,
        location: SourceLocation,
    },

    Return {
        value: Option<Expr>,
        location: SourceLocation,
    },

    /// `delete array[index]`, or `delete array` when `index` is empty
    Delete {
        array: String,
        index: Vec<Expr>,
        location: SourceLocation,
    },

    /// Empty statement (just a semicolon)
    Empty,
}

/// Output redirection for print/printf
#[derive(Debug, Clone)]
pub enum OutputRedirect {
    /// > file
    Truncate(Expr),
    /// >> file
    Append(Expr),
    /// | command
    Pipe(Expr),
}

/// Input source for getline
#[derive(Debug, Clone)]
pub enum GetlineInput {
    /// < file
    File(Box<Expr>),
    /// command |
    Pipe(Box<Expr>),
}

/// Binding of a call site to its callee
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// Not yet bound; semantic analysis must resolve it
    Unresolved,
    Builtin(Builtin),
    /// User function: index into `Program::functions`
    User { id: usize, arity: usize },
    /// Function supplied by the extension registry
    Extension(String),
}

/// Built-in functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Length,
    Substr,
    Index,
    Split,
    Sub,
    Gsub,
    Match,
    Sprintf,
    Sin,
    Cos,
    Atan2,
    Exp,
    Log,
    Sqrt,
    Int,
    Rand,
    Srand,
    Tolower,
    Toupper,
    System,
    Close,
    Fflush,
    // extended set
    Sleep,
    Dump,
    // extended type set
    ToInteger,
    ToDouble,
    ToString,
}

impl Builtin {
    /// Look up a built-in by name. The extended sets are only visible when
    /// enabled.
    pub fn from_name(name: &str, extended: bool, typed: bool) -> Option<Self> {
        let builtin = match name {
            "length" => Builtin::Length,
            "substr" => Builtin::Substr,
            "index" => Builtin::Index,
            "split" => Builtin::Split,
            "sub" => Builtin::Sub,
            "gsub" => Builtin::Gsub,
            "match" => Builtin::Match,
            "sprintf" => Builtin::Sprintf,
            "sin" => Builtin::Sin,
            "cos" => Builtin::Cos,
            "atan2" => Builtin::Atan2,
            "exp" => Builtin::Exp,
            "log" => Builtin::Log,
            "sqrt" => Builtin::Sqrt,
            "int" => Builtin::Int,
            "rand" => Builtin::Rand,
            "srand" => Builtin::Srand,
            "tolower" => Builtin::Tolower,
            "toupper" => Builtin::Toupper,
            "system" => Builtin::System,
            "close" => Builtin::Close,
            "fflush" => Builtin::Fflush,
            "_sleep" if extended => Builtin::Sleep,
            "_dump" if extended => Builtin::Dump,
            "_INTEGER" if typed => Builtin::ToInteger,
            "_DOUBLE" if typed => Builtin::ToDouble,
            "_STRING" if typed => Builtin::ToString,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Length => "length",
            Builtin::Substr => "substr",
            Builtin::Index => "index",
            Builtin::Split => "split",
            Builtin::Sub => "sub",
            Builtin::Gsub => "gsub",
            Builtin::Match => "match",
            Builtin::Sprintf => "sprintf",
            Builtin::Sin => "sin",
            Builtin::Cos => "cos",
            Builtin::Atan2 => "atan2",
            Builtin::Exp => "exp",
            Builtin::Log => "log",
            Builtin::Sqrt => "sqrt",
            Builtin::Int => "int",
            Builtin::Rand => "rand",
            Builtin::Srand => "srand",
            Builtin::Tolower => "tolower",
            Builtin::Toupper => "toupper",
            Builtin::System => "system",
            Builtin::Close => "close",
            Builtin::Fflush => "fflush",
            Builtin::Sleep => "_sleep",
            Builtin::Dump => "_dump",
            Builtin::ToInteger => "_INTEGER",
            Builtin::ToDouble => "_DOUBLE",
            Builtin::ToString => "_STRING",
        }
    }

    /// Accepted argument counts (inclusive)
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Builtin::Length => (0, 1),
            Builtin::Substr => (2, 3),
            Builtin::Index => (2, 2),
            Builtin::Split => (2, 3),
            Builtin::Sub | Builtin::Gsub => (2, 3),
            Builtin::Match => (2, 2),
            Builtin::Sprintf => (1, usize::MAX),
            Builtin::Atan2 => (2, 2),
            Builtin::Rand => (0, 0),
            Builtin::Srand | Builtin::Fflush | Builtin::Dump => (0, 1),
            Builtin::Sin
            | Builtin::Cos
            | Builtin::Exp
            | Builtin::Log
            | Builtin::Sqrt
            | Builtin::Int
            | Builtin::Tolower
            | Builtin::Toupper
            | Builtin::System
            | Builtin::Close
            | Builtin::Sleep
            | Builtin::ToInteger
            | Builtin::ToDouble
            | Builtin::ToString => (1, 1),
        }
    }
}

/// Expression types
#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64, SourceLocation),

    String(String, SourceLocation),

    /// Regex literal; matches against `$0` unless it is the operand of
    /// `~`, `!~` or a regex argument of a built-in
    Regex(String, SourceLocation),

    Var(String, SourceLocation),

    /// Field access: $expr
    Field(Box<Expr>, SourceLocation),

    /// Array access: arr[index] or arr[i,j]
    ArrayAccess {
        array: String,
        indices: Vec<Expr>,
        location: SourceLocation,
    },

    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
        location: SourceLocation,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        location: SourceLocation,
    },

    Assign {
        target: Box<Expr>,
        op: AssignOp,
        value: Box<Expr>,
        location: SourceLocation,
    },

    /// ++x
    PreIncrement(Box<Expr>, SourceLocation),

    /// --x
    PreDecrement(Box<Expr>, SourceLocation),

    /// x++
    PostIncrement(Box<Expr>, SourceLocation),

    /// x--
    PostDecrement(Box<Expr>, SourceLocation),

    /// cond ? then : else
    Ternary {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        location: SourceLocation,
    },

    Call {
        name: String,
        args: Vec<Expr>,
        target: CallTarget,
        location: SourceLocation,
    },

    /// Array membership: (key) in array
    InArray {
        key: Vec<Expr>,
        array: String,
        location: SourceLocation,
    },

    /// expr ~ pattern or expr !~ pattern
    Match {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
        location: SourceLocation,
    },

    /// Getline as expression (returns status)
    Getline {
        var: Option<Box<Expr>>,
        input: Option<GetlineInput>,
        location: SourceLocation,
    },

    /// Grouping parentheses (for precedence)
    Group(Box<Expr>, SourceLocation),
}

impl Expr {
    pub fn location(&self) -> SourceLocation {
        match self {
            Expr::Number(_, loc)
            | Expr::String(_, loc)
            | Expr::Regex(_, loc)
            | Expr::Var(_, loc)
            | Expr::Field(_, loc)
            | Expr::ArrayAccess { location: loc, .. }
            | Expr::Binary { location: loc, .. }
            | Expr::Unary { location: loc, .. }
            | Expr::Assign { location: loc, .. }
            | Expr::PreIncrement(_, loc)
            | Expr::PreDecrement(_, loc)
            | Expr::PostIncrement(_, loc)
            | Expr::PostDecrement(_, loc)
            | Expr::Ternary { location: loc, .. }
            | Expr::Call { location: loc, .. }
            | Expr::InArray { location: loc, .. }
            | Expr::Match { location: loc, .. }
            | Expr::Getline { location: loc, .. }
            | Expr::Group(_, loc) => *loc,
        }
    }

    /// Whether this expression can be assigned to
    pub fn is_lvalue(&self) -> bool {
        matches!(self, Expr::Var(..) | Expr::Field(..) | Expr::ArrayAccess { .. })
    }

    /// The bare variable name, looking through grouping parentheses
    pub fn as_var_name(&self) -> Option<&str> {
        match self {
            Expr::Var(name, _) => Some(name),
            Expr::Group(inner, _) => inner.as_var_name(),
            _ => None,
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,

    // Comparison
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,

    // Logical
    And,
    Or,

    // String
    Concat,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg, // -x
    Pos, // +x
    Not, // !x
}

/// Assignment operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,    // =
    AddAssign, // +=
    SubAssign, // -=
    MulAssign, // *=
    DivAssign, // /=
    ModAssign, // %=
    PowAssign, // ^=
}
