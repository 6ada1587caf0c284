use std::fmt;

use crate::error::SourceLocation;

/// Kinds of AWK tokens
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    String(String),
    /// Pattern text between the slashes, escapes untouched
    Regex(String),
    Identifier(String),
    /// An identifier immediately followed by `(`: a function call
    FuncName(String),

    // keywords
    Begin,
    End,
    Function,
    If,
    Else,
    While,
    For,
    Do,
    In,
    Break,
    Continue,
    Next,
    Exit,
    Return,
    Delete,
    Getline,
    Print,
    Printf,

    // arithmetic and assignment
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Increment,
    Decrement,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    CaretAssign,

    // comparison, logic and matching
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    And,
    Or,
    Not,
    Match,
    NotMatch,

    Dollar,
    Question,
    Colon,
    /// `|`, output pipe or `cmd | getline`
    Pipe,
    /// `>>`
    Append,

    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Semicolon,
    Comma,
    Newline,
    Eof,
}

impl TokenKind {
    /// The keyword spelled `word`, if any. `func` is accepted for `function`.
    pub fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word {
            "BEGIN" => TokenKind::Begin,
            "END" => TokenKind::End,
            "function" | "func" => TokenKind::Function,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "do" => TokenKind::Do,
            "in" => TokenKind::In,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "next" => TokenKind::Next,
            "exit" => TokenKind::Exit,
            "return" => TokenKind::Return,
            "delete" => TokenKind::Delete,
            "getline" => TokenKind::Getline,
            "print" => TokenKind::Print,
            "printf" => TokenKind::Printf,
            _ => return None,
        };
        Some(kind)
    }

    pub fn can_start_expression(&self) -> bool {
        matches!(
            self,
            TokenKind::Number(_)
                | TokenKind::String(_)
                | TokenKind::Regex(_)
                | TokenKind::Identifier(_)
                | TokenKind::FuncName(_)
                | TokenKind::Getline
                | TokenKind::LeftParen
                | TokenKind::Dollar
                | TokenKind::Not
                | TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Increment
                | TokenKind::Decrement
        )
    }

    /// Whether a `/` after this token divides rather than opening a regex
    pub fn produces_value(&self) -> bool {
        matches!(
            self,
            TokenKind::Number(_)
                | TokenKind::String(_)
                | TokenKind::Identifier(_)
                | TokenKind::RightParen
                | TokenKind::RightBracket
                | TokenKind::Increment
                | TokenKind::Decrement
        )
    }

    fn symbol(&self) -> Option<&'static str> {
        let symbol = match self {
            TokenKind::Begin => "BEGIN",
            TokenKind::End => "END",
            TokenKind::Function => "function",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::For => "for",
            TokenKind::Do => "do",
            TokenKind::In => "in",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Next => "next",
            TokenKind::Exit => "exit",
            TokenKind::Return => "return",
            TokenKind::Delete => "delete",
            TokenKind::Getline => "getline",
            TokenKind::Print => "print",
            TokenKind::Printf => "printf",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Caret => "^",
            TokenKind::Increment => "++",
            TokenKind::Decrement => "--",
            TokenKind::Assign => "=",
            TokenKind::PlusAssign => "+=",
            TokenKind::MinusAssign => "-=",
            TokenKind::StarAssign => "*=",
            TokenKind::SlashAssign => "/=",
            TokenKind::PercentAssign => "%=",
            TokenKind::CaretAssign => "^=",
            TokenKind::Less => "<",
            TokenKind::LessEqual => "<=",
            TokenKind::Greater => ">",
            TokenKind::GreaterEqual => ">=",
            TokenKind::Equal => "==",
            TokenKind::NotEqual => "!=",
            TokenKind::And => "&&",
            TokenKind::Or => "||",
            TokenKind::Not => "!",
            TokenKind::Match => "~",
            TokenKind::NotMatch => "!~",
            TokenKind::Dollar => "$",
            TokenKind::Question => "?",
            TokenKind::Colon => ":",
            TokenKind::Pipe => "|",
            TokenKind::Append => ">>",
            TokenKind::LeftParen => "(",
            TokenKind::RightParen => ")",
            TokenKind::LeftBrace => "{",
            TokenKind::RightBrace => "}",
            TokenKind::LeftBracket => "[",
            TokenKind::RightBracket => "]",
            TokenKind::Semicolon => ";",
            TokenKind::Comma => ",",
            _ => return None,
        };
        Some(symbol)
    }
}

/// Source spelling, for error messages
impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(symbol) = self.symbol() {
            return write!(f, "'{}'", symbol);
        }
        match self {
            TokenKind::Number(n) => write!(f, "number {}", n),
            TokenKind::String(s) => write!(f, "string {:?}", s),
            TokenKind::Regex(r) => write!(f, "regex /{}/", r),
            TokenKind::Identifier(name) => write!(f, "identifier '{}'", name),
            TokenKind::FuncName(name) => write!(f, "function name '{}'", name),
            TokenKind::Newline => f.write_str("newline"),
            _ => f.write_str("end of input"),
        }
    }
}

/// A token with its location in the source
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub location: SourceLocation,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize, column: usize) -> Self {
        Self {
            kind,
            location: SourceLocation::new(line, column),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords() {
        assert_eq!(TokenKind::keyword("func"), Some(TokenKind::Function));
        assert_eq!(TokenKind::keyword("getline"), Some(TokenKind::Getline));
        assert_eq!(TokenKind::keyword("begin"), None);
        assert_eq!(TokenKind::keyword("nextfile"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(TokenKind::Append.to_string(), "'>>'");
        assert_eq!(TokenKind::Printf.to_string(), "'printf'");
        assert_eq!(TokenKind::Identifier("x".into()).to_string(), "identifier 'x'");
        assert_eq!(TokenKind::Eof.to_string(), "end of input");
    }
}
