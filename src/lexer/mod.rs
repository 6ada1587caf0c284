mod tokens;

pub use tokens::{Token, TokenKind};

use crate::error::{Error, Result};

/// AWK lexer that tokenizes source code
pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: usize,
    column: usize,
    last_token_produces_value: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
            last_token_produces_value: false,
        }
    }

    /// Tokenize the entire source, returning all tokens
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let estimated_tokens = self.source.len() / 4 + 1;
        let mut tokens = Vec::with_capacity(estimated_tokens.min(1024));

        loop {
            let token = self.next_token()?;
            let is_eof = matches!(token.kind, TokenKind::Eof);
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    /// Get the next token from the source
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments();

        let (line, col) = (self.line, self.column);

        let Some((_pos, ch)) = self.peek_char() else {
            return Ok(Token::new(TokenKind::Eof, line, col));
        };

        let token = match ch {
            '\n' => {
                self.advance();
                Token::new(TokenKind::Newline, line, col)
            }

            '"' => self.scan_string()?,

            // Regex or division - depends on context
            '/' => {
                if self.last_token_produces_value {
                    self.advance();
                    self.with_assign(TokenKind::Slash, TokenKind::SlashAssign, line, col)
                } else {
                    self.scan_regex()?
                }
            }

            '.' if self.peek_next_is_digit() => self.scan_number()?,
            '0'..='9' => self.scan_number()?,

            'a'..='z' | 'A'..='Z' | '_' => self.scan_identifier()?,

            '+' => {
                self.advance();
                if self.peek_char_is('+') {
                    self.advance();
                    Token::new(TokenKind::Increment, line, col)
                } else {
                    self.with_assign(TokenKind::Plus, TokenKind::PlusAssign, line, col)
                }
            }
            '-' => {
                self.advance();
                if self.peek_char_is('-') {
                    self.advance();
                    Token::new(TokenKind::Decrement, line, col)
                } else {
                    self.with_assign(TokenKind::Minus, TokenKind::MinusAssign, line, col)
                }
            }
            '*' => {
                self.advance();
                // `**` and `**=` are common synonyms for `^` and `^=`
                if self.peek_char_is('*') {
                    self.advance();
                    self.with_assign(TokenKind::Caret, TokenKind::CaretAssign, line, col)
                } else {
                    self.with_assign(TokenKind::Star, TokenKind::StarAssign, line, col)
                }
            }
            '%' => {
                self.advance();
                self.with_assign(TokenKind::Percent, TokenKind::PercentAssign, line, col)
            }
            '^' => {
                self.advance();
                self.with_assign(TokenKind::Caret, TokenKind::CaretAssign, line, col)
            }
            '<' => {
                self.advance();
                self.with_assign(TokenKind::Less, TokenKind::LessEqual, line, col)
            }
            '>' => {
                self.advance();
                if self.peek_char_is('>') {
                    self.advance();
                    Token::new(TokenKind::Append, line, col)
                } else {
                    self.with_assign(TokenKind::Greater, TokenKind::GreaterEqual, line, col)
                }
            }
            '=' => {
                self.advance();
                self.with_assign(TokenKind::Assign, TokenKind::Equal, line, col)
            }
            '!' => {
                self.advance();
                if self.peek_char_is('~') {
                    self.advance();
                    Token::new(TokenKind::NotMatch, line, col)
                } else {
                    self.with_assign(TokenKind::Not, TokenKind::NotEqual, line, col)
                }
            }
            '~' => {
                self.advance();
                Token::new(TokenKind::Match, line, col)
            }
            '&' => {
                self.advance();
                if self.peek_char_is('&') {
                    self.advance();
                    Token::new(TokenKind::And, line, col)
                } else {
                    return Err(Error::lexer("unexpected '&', did you mean '&&'?", line, col));
                }
            }
            '|' => {
                self.advance();
                if self.peek_char_is('|') {
                    self.advance();
                    Token::new(TokenKind::Or, line, col)
                } else {
                    Token::new(TokenKind::Pipe, line, col)
                }
            }
            '$' => self.single(TokenKind::Dollar, line, col),
            '?' => self.single(TokenKind::Question, line, col),
            ':' => self.single(TokenKind::Colon, line, col),
            '(' => self.single(TokenKind::LeftParen, line, col),
            ')' => self.single(TokenKind::RightParen, line, col),
            '{' => self.single(TokenKind::LeftBrace, line, col),
            '}' => self.single(TokenKind::RightBrace, line, col),
            '[' => self.single(TokenKind::LeftBracket, line, col),
            ']' => self.single(TokenKind::RightBracket, line, col),
            ';' => self.single(TokenKind::Semicolon, line, col),
            ',' => self.single(TokenKind::Comma, line, col),

            _ => {
                return Err(Error::lexer(
                    format!("unexpected character '{}'", ch),
                    line,
                    col,
                ));
            }
        };

        self.last_token_produces_value = token.kind.produces_value();
        Ok(token)
    }

    fn single(&mut self, kind: TokenKind, line: usize, col: usize) -> Token {
        self.advance();
        Token::new(kind, line, col)
    }

    /// `plain` unless the next character is `=`
    fn with_assign(&mut self, plain: TokenKind, assign: TokenKind, line: usize, col: usize) -> Token {
        if self.peek_char_is('=') {
            self.advance();
            Token::new(assign, line, col)
        } else {
            Token::new(plain, line, col)
        }
    }

    fn peek_char(&mut self) -> Option<(usize, char)> {
        self.chars.peek().copied()
    }

    fn peek_char_is(&mut self, expected: char) -> bool {
        self.chars.peek().map(|(_, c)| *c == expected).unwrap_or(false)
    }

    fn peek_next_is_digit(&self) -> bool {
        let mut chars = self.chars.clone();
        chars.next();
        chars.next().map(|(_, c)| c.is_ascii_digit()).unwrap_or(false)
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((_, ch)) = result {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        result
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek_char() {
                Some((_, ' ' | '\t' | '\r')) => {
                    self.advance();
                }
                Some((_, '\\')) => {
                    // Line continuation
                    let mut chars = self.chars.clone();
                    chars.next();
                    match chars.peek().map(|(_, c)| *c) {
                        Some('\n') => {
                            self.advance();
                            self.advance();
                        }
                        Some('\r') => {
                            self.advance();
                            self.advance();
                            if self.peek_char_is('\n') {
                                self.advance();
                            }
                        }
                        _ => break,
                    }
                }
                Some((_, '#')) => {
                    while let Some((_, ch)) = self.peek_char() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_string(&mut self) -> Result<Token> {
        let (line, col) = (self.line, self.column);
        self.advance(); // consume opening quote

        let mut value = String::new();

        loop {
            match self.advance() {
                Some((_, '"')) => break,
                Some((_, '\\')) => match self.peek_char() {
                    Some((_, '\n')) => {
                        // escaped newline continues the string
                        self.advance();
                    }
                    Some(_) => {
                        let escaped = self.scan_escape(line, col)?;
                        value.push(escaped);
                    }
                    None => return Err(Error::lexer("unterminated string", line, col)),
                },
                Some((_, '\n')) => {
                    return Err(Error::lexer("unterminated string (newline in string)", line, col));
                }
                Some((_, ch)) => value.push(ch),
                None => {
                    return Err(Error::lexer("unterminated string", line, col));
                }
            }
        }

        Ok(Token::new(TokenKind::String(value), line, col))
    }

    /// Decode the escape sequence after a backslash
    fn scan_escape(&mut self, line: usize, col: usize) -> Result<char> {
        let Some((_, c)) = self.advance() else {
            return Err(Error::lexer("unterminated escape sequence", line, col));
        };
        let escaped = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\x08',
            'f' => '\x0C',
            'a' => '\x07',
            'v' => '\x0B',
            '\\' => '\\',
            '"' => '"',
            '/' => '/',
            '0'..='7' => {
                let mut code = c.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek_char() {
                        Some((_, d @ '0'..='7')) => {
                            code = code * 8 + d.to_digit(8).unwrap_or(0);
                            self.advance();
                        }
                        _ => break,
                    }
                }
                char::from_u32(code)
                    .ok_or_else(|| Error::lexer("invalid octal escape", line, col))?
            }
            // Unknown escape, just use the character
            other => other,
        };
        Ok(escaped)
    }

    fn scan_regex(&mut self) -> Result<Token> {
        let (line, col) = (self.line, self.column);
        self.advance(); // consume opening slash

        let mut pattern = String::new();
        let mut in_bracket = false;

        loop {
            match self.advance() {
                Some((_, '/')) if !in_bracket => break,
                Some((_, '\\')) => match self.advance() {
                    // `\/` is only an escape for the delimiter
                    Some((_, '/')) => pattern.push('/'),
                    Some((_, '\n')) => {}
                    Some((_, ch)) => {
                        pattern.push('\\');
                        pattern.push(ch);
                    }
                    None => return Err(Error::lexer("unterminated regex", line, col)),
                },
                Some((_, '[')) => {
                    if !in_bracket {
                        in_bracket = true;
                        pattern.push('[');
                        // a leading `]` (or `^]`) is literal inside a bracket expression
                        if self.peek_char_is('^') {
                            self.advance();
                            pattern.push('^');
                        }
                        if self.peek_char_is(']') {
                            self.advance();
                            pattern.push_str("\\]");
                        }
                    } else {
                        pattern.push('[');
                        if self.peek_char_is(':') {
                            // character class such as [:alpha:]
                            while let Some((_, ch)) = self.advance() {
                                pattern.push(ch);
                                if ch == ']' {
                                    break;
                                }
                            }
                        }
                    }
                }
                Some((_, ']')) => {
                    in_bracket = false;
                    pattern.push(']');
                }
                Some((_, '\n')) => {
                    return Err(Error::lexer("unterminated regex (newline in regex)", line, col));
                }
                Some((_, ch)) => pattern.push(ch),
                None => {
                    return Err(Error::lexer("unterminated regex", line, col));
                }
            }
        }

        Ok(Token::new(TokenKind::Regex(pattern), line, col))
    }

    fn scan_number(&mut self) -> Result<Token> {
        let (line, col) = (self.line, self.column);
        let start_pos = self.chars.peek().map(|(pos, _)| *pos).unwrap_or(0);
        let mut end_pos = start_pos;

        while let Some((pos, ch)) = self.peek_char() {
            if ch.is_ascii_digit() {
                end_pos = pos + 1;
                self.advance();
            } else {
                break;
            }
        }

        if self.peek_char_is('.') {
            self.advance();
            end_pos += 1;

            while let Some((pos, ch)) = self.peek_char() {
                if ch.is_ascii_digit() {
                    end_pos = pos + 1;
                    self.advance();
                } else {
                    break;
                }
            }
        }

        // Exponent part, only when digits follow
        if let Some((_, 'e' | 'E')) = self.peek_char() {
            let mut ahead = self.chars.clone();
            ahead.next();
            let mut sign = false;
            if let Some((_, '+' | '-')) = ahead.peek() {
                ahead.next();
                sign = true;
            }
            if ahead.peek().map(|(_, c)| c.is_ascii_digit()).unwrap_or(false) {
                self.advance();
                end_pos += 1;
                if sign {
                    self.advance();
                    end_pos += 1;
                }
                while let Some((pos, ch)) = self.peek_char() {
                    if ch.is_ascii_digit() {
                        end_pos = pos + 1;
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        let number_str = &self.source[start_pos..end_pos];
        let value: f64 = number_str
            .parse()
            .map_err(|_| Error::lexer(format!("invalid number '{}'", number_str), line, col))?;

        Ok(Token::new(TokenKind::Number(value), line, col))
    }

    fn scan_identifier(&mut self) -> Result<Token> {
        let (line, col) = (self.line, self.column);
        let start_pos = self.chars.peek().map(|(pos, _)| *pos).unwrap_or(0);
        let mut end_pos = start_pos;

        while let Some((pos, ch)) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                end_pos = pos + 1;
                self.advance();
            } else {
                break;
            }
        }

        let ident = &self.source[start_pos..end_pos];

        let kind = match TokenKind::keyword(ident) {
            Some(keyword) => keyword,
            None if self.peek_char_is('(') => TokenKind::FuncName(ident.to_string()),
            None => TokenKind::Identifier(ident.to_string()),
        };

        Ok(Token::new(kind, line, col))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_tokens() {
        let tokens = kinds("x + y - z * w / v % u");
        assert!(matches!(tokens[1], TokenKind::Plus));
        assert!(matches!(tokens[3], TokenKind::Minus));
        assert!(matches!(tokens[5], TokenKind::Star));
        assert!(matches!(tokens[7], TokenKind::Slash));
        assert!(matches!(tokens[9], TokenKind::Percent));
    }

    #[test]
    fn test_keywords() {
        let tokens = kinds("BEGIN END if else while for print func");
        assert!(matches!(tokens[0], TokenKind::Begin));
        assert!(matches!(tokens[1], TokenKind::End));
        assert!(matches!(tokens[2], TokenKind::If));
        assert!(matches!(tokens[3], TokenKind::Else));
        assert!(matches!(tokens[4], TokenKind::While));
        assert!(matches!(tokens[5], TokenKind::For));
        assert!(matches!(tokens[6], TokenKind::Print));
        assert!(matches!(tokens[7], TokenKind::Function));
    }

    #[test]
    fn test_numbers() {
        let tokens = kinds("42 3.14 1e10 2.5e-3 .5");
        assert!(matches!(tokens[0], TokenKind::Number(n) if n == 42.0));
        assert!(matches!(tokens[1], TokenKind::Number(n) if (n - 3.14).abs() < 0.001));
        assert!(matches!(tokens[2], TokenKind::Number(n) if n == 1e10));
        assert!(matches!(tokens[3], TokenKind::Number(n) if (n - 2.5e-3).abs() < 0.0001));
        assert!(matches!(tokens[4], TokenKind::Number(n) if n == 0.5));
    }

    #[test]
    fn test_number_followed_by_identifier_e() {
        // `1e` is the number 1 followed by the variable e
        let tokens = kinds("1 e");
        assert!(matches!(tokens[0], TokenKind::Number(n) if n == 1.0));
        assert!(matches!(&tokens[1], TokenKind::Identifier(s) if s == "e"));
    }

    #[test]
    fn test_strings() {
        let tokens = kinds(r#""hello" "world\n" "Don\47t""#);
        assert!(matches!(&tokens[0], TokenKind::String(s) if s == "hello"));
        assert!(matches!(&tokens[1], TokenKind::String(s) if s == "world\n"));
        assert!(matches!(&tokens[2], TokenKind::String(s) if s == "Don't"));
    }

    #[test]
    fn test_regex_vs_division() {
        let tokens = kinds("x / 2");
        assert!(matches!(tokens[1], TokenKind::Slash));

        let tokens = kinds("/pattern/");
        assert!(matches!(&tokens[0], TokenKind::Regex(s) if s == "pattern"));
    }

    #[test]
    fn test_regex_escapes_and_brackets() {
        let tokens = kinds(r"/a\/b/ /[/]x/ /\./");
        assert!(matches!(&tokens[0], TokenKind::Regex(s) if s == "a/b"));
        assert!(matches!(&tokens[1], TokenKind::Regex(s) if s == "[/]x"));
        assert!(matches!(&tokens[2], TokenKind::Regex(s) if s == r"\."));
    }

    #[test]
    fn test_empty_regex() {
        let tokens = kinds("//");
        assert!(matches!(&tokens[0], TokenKind::Regex(s) if s.is_empty()));
    }

    #[test]
    fn test_func_name_requires_adjacent_paren() {
        let tokens = kinds("foo(1) bar (2)");
        assert!(matches!(&tokens[0], TokenKind::FuncName(s) if s == "foo"));
        assert!(matches!(&tokens[4], TokenKind::Identifier(s) if s == "bar"));
    }

    #[test]
    fn test_line_tracking() {
        let tokens = Lexer::new("a\nb\nc").tokenize().unwrap();
        assert_eq!(tokens[0].location.line, 1);
        assert_eq!(tokens[2].location.line, 2);
        assert_eq!(tokens[4].location.line, 3);
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("\"abc").tokenize().unwrap_err();
        assert!(matches!(err, Error::Lexer { .. }));
    }
}
