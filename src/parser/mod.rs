use crate::ast::*;
use crate::error::{Error, Result, SourceLocation};
use crate::lexer::{Token, TokenKind};

/// AWK parser using recursive descent
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    /// Next declaration position handed to a rule or function
    position: usize,
    /// Parsing a print/printf argument list, where `>` is a redirection
    /// and `|` a pipe
    in_print: bool,
    extended_functions: bool,
    type_functions: bool,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            position: 0,
            in_print: false,
            extended_functions: false,
            type_functions: false,
        }
    }

    /// Recognize `_sleep` and `_dump` as built-ins
    pub fn with_extended_functions(mut self, enabled: bool) -> Self {
        self.extended_functions = enabled;
        self
    }

    /// Recognize `_INTEGER`, `_DOUBLE` and `_STRING` as built-ins
    pub fn with_type_functions(mut self, enabled: bool) -> Self {
        self.type_functions = enabled;
        self
    }

    /// Parse a complete AWK program
    pub fn parse(&mut self) -> Result<Program> {
        let mut program = Program::new();

        self.skip_terminators();

        while !self.is_at_end() {
            if self.check(&TokenKind::Function) {
                let function = self.parse_function()?;
                if program.function_index(&function.name).is_some() {
                    return Err(Error::parser(
                        format!("function '{}' redefined", function.name),
                        function.location.line,
                        function.location.column,
                    ));
                }
                program.functions.push(function);
            } else {
                program.rules.push(self.parse_rule()?);
            }
            self.skip_terminators();
        }

        Ok(program)
    }

    fn next_position(&mut self) -> usize {
        let position = self.position;
        self.position += 1;
        position
    }

    fn builtin(&self, name: &str) -> Option<Builtin> {
        Builtin::from_name(name, self.extended_functions, self.type_functions)
    }

    /// Parse a function definition
    fn parse_function(&mut self) -> Result<FunctionDef> {
        let location = self.current_location();
        self.expect(&TokenKind::Function)?;

        let name = match self.peek_kind() {
            Some(TokenKind::Identifier(name)) | Some(TokenKind::FuncName(name)) => name.clone(),
            other => {
                return Err(Error::parser(
                    format!("expected function name, found {}", found(other)),
                    location.line,
                    location.column,
                ));
            }
        };
        self.advance();
        if self.builtin(&name).is_some() {
            return Err(Error::parser(
                format!("cannot redefine built-in function '{}'", name),
                location.line,
                location.column,
            ));
        }
        self.expect(&TokenKind::LeftParen)?;

        let mut params: Vec<String> = Vec::new();
        self.skip_newlines();
        if !self.check(&TokenKind::RightParen) {
            loop {
                let param = self.expect_identifier()?;
                if params.contains(&param) || param == name {
                    let loc = self.current_location();
                    return Err(Error::parser(
                        format!("duplicate parameter '{}' in function '{}'", param, name),
                        loc.line,
                        loc.column,
                    ));
                }
                params.push(param);
                self.skip_newlines();
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
                self.skip_newlines();
            }
        }
        self.expect(&TokenKind::RightParen)?;
        self.skip_newlines();

        let body = self.parse_block()?;
        let array_params = vec![false; params.len()];

        Ok(FunctionDef {
            name,
            params,
            body,
            position: self.next_position(),
            array_params,
            location,
        })
    }

    /// Parse a pattern-action rule
    fn parse_rule(&mut self) -> Result<Rule> {
        let location = self.current_location();

        // BEGIN/END need an action
        if self.match_token(&TokenKind::Begin) || self.match_token(&TokenKind::End) {
            let pattern = if matches!(self.previous_kind(), Some(TokenKind::Begin)) {
                Pattern::Begin
            } else {
                Pattern::End
            };
            self.skip_newlines();
            let action = Some(self.parse_block()?);
            return Ok(Rule {
                pattern: Some(pattern),
                action,
                position: self.next_position(),
                location,
            });
        }

        // Action-only rule
        if self.check(&TokenKind::LeftBrace) {
            let action = Some(self.parse_block()?);
            return Ok(Rule {
                pattern: None,
                action,
                position: self.next_position(),
                location,
            });
        }

        let pattern = Some(self.parse_pattern()?);

        // The action must start on the same line as the pattern
        let action = if self.check(&TokenKind::LeftBrace) {
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(Rule {
            pattern,
            action,
            position: self.next_position(),
            location,
        })
    }

    /// Parse a pattern: an expression, a bare regex or a range
    fn parse_pattern(&mut self) -> Result<Pattern> {
        let start = self.parse_single_pattern()?;

        if self.match_token(&TokenKind::Comma) {
            self.skip_newlines();
            let end = self.parse_single_pattern()?;
            return Ok(Pattern::Range {
                start: Box::new(start),
                end: Box::new(end),
            });
        }

        Ok(start)
    }

    fn parse_single_pattern(&mut self) -> Result<Pattern> {
        match self.parse_expression()? {
            Expr::Regex(pattern, _) => Ok(Pattern::Regex(pattern)),
            expr => Ok(Pattern::Expr(expr)),
        }
    }

    /// Parse a block { ... }
    fn parse_block(&mut self) -> Result<Block> {
        let location = self.current_location();
        self.expect(&TokenKind::LeftBrace)?;
        self.skip_terminators();

        let mut statements = Vec::new();

        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            statements.push(self.parse_statement()?);
            self.skip_terminators();
        }

        self.expect(&TokenKind::RightBrace)?;

        Ok(Block::new(statements, location))
    }

    /// Parse a single statement
    fn parse_statement(&mut self) -> Result<Stmt> {
        self.skip_newlines();

        let location = self.current_location();

        if self.check(&TokenKind::Semicolon) {
            self.advance();
            return Ok(Stmt::Empty);
        }

        if self.check(&TokenKind::LeftBrace) {
            return Ok(Stmt::Block(self.parse_block()?));
        }

        if self.match_token(&TokenKind::If) {
            return self.parse_if_statement(location);
        }

        if self.match_token(&TokenKind::While) {
            return self.parse_while_statement(location);
        }

        if self.match_token(&TokenKind::For) {
            return self.parse_for_statement(location);
        }

        if self.match_token(&TokenKind::Do) {
            return self.parse_do_while_statement(location);
        }

        if self.match_token(&TokenKind::Break) {
            return Ok(Stmt::Break { location });
        }

        if self.match_token(&TokenKind::Continue) {
            return Ok(Stmt::Continue { location });
        }

        if self.match_token(&TokenKind::Next) {
            return Ok(Stmt::Next { location });
        }

        if self.match_token(&TokenKind::Exit) {
            let code = if self.can_start_expression() {
                Some(self.parse_expression()?)
            } else {
                None
            };
            return Ok(Stmt::Exit { code, location });
        }

        if self.match_token(&TokenKind::Return) {
            let value = if self.can_start_expression() {
                Some(self.parse_expression()?)
            } else {
                None
            };
            return Ok(Stmt::Return { value, location });
        }

        if self.match_token(&TokenKind::Delete) {
            let name = self.expect_identifier()?;

            // `delete array[i]` or the whole array
            let indices = if self.match_token(&TokenKind::LeftBracket) {
                self.parse_subscripts()?
            } else {
                Vec::new()
            };

            return Ok(Stmt::Delete {
                array: name,
                index: indices,
                location,
            });
        }

        if self.match_token(&TokenKind::Print) {
            return self.parse_print_statement(location);
        }

        if self.match_token(&TokenKind::Printf) {
            return self.parse_printf_statement(location);
        }

        let expr = self.parse_expression()?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_if_statement(&mut self, location: SourceLocation) -> Result<Stmt> {
        self.expect(&TokenKind::LeftParen)?;
        let condition = self.parse_expression()?;
        self.expect(&TokenKind::RightParen)?;
        self.skip_newlines();

        let then_branch = Box::new(self.parse_statement()?);

        // Look past terminators for an else, giving them back if there is none
        let saved = self.current;
        self.skip_terminators();
        let else_branch = if self.match_token(&TokenKind::Else) {
            self.skip_newlines();
            Some(Box::new(self.parse_statement()?))
        } else {
            self.current = saved;
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            location,
        })
    }

    fn parse_while_statement(&mut self, location: SourceLocation) -> Result<Stmt> {
        self.expect(&TokenKind::LeftParen)?;
        let condition = self.parse_expression()?;
        self.expect(&TokenKind::RightParen)?;

        // `while (cond);` has an empty body
        if self.match_token(&TokenKind::Semicolon) {
            return Ok(Stmt::While {
                condition,
                body: Box::new(Stmt::Empty),
                location,
            });
        }
        self.skip_newlines();

        let body = Box::new(self.parse_statement()?);

        Ok(Stmt::While {
            condition,
            body,
            location,
        })
    }

    fn parse_for_statement(&mut self, location: SourceLocation) -> Result<Stmt> {
        self.expect(&TokenKind::LeftParen)?;

        // for (var in array)
        if let Some(TokenKind::Identifier(name)) = self.peek_kind() {
            let name = name.clone();
            let saved_pos = self.current;
            self.advance();

            if self.match_token(&TokenKind::In) {
                if let Some(TokenKind::Identifier(array)) = self.peek_kind() {
                    let array = array.clone();
                    self.advance();
                    if self.match_token(&TokenKind::RightParen) {
                        self.skip_newlines();
                        let body = Box::new(self.parse_statement()?);

                        return Ok(Stmt::ForIn {
                            var: name,
                            array,
                            body,
                            location,
                        });
                    }
                }
            }

            // Not a for-in, backtrack
            self.current = saved_pos;
        }

        let init = if !self.check(&TokenKind::Semicolon) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon)?;
        self.skip_newlines();

        let condition = if !self.check(&TokenKind::Semicolon) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon)?;
        self.skip_newlines();

        let update = if !self.check(&TokenKind::RightParen) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(&TokenKind::RightParen)?;

        if self.match_token(&TokenKind::Semicolon) {
            return Ok(Stmt::For {
                init,
                condition,
                update,
                body: Box::new(Stmt::Empty),
                location,
            });
        }
        self.skip_newlines();

        let body = Box::new(self.parse_statement()?);

        Ok(Stmt::For {
            init,
            condition,
            update,
            body,
            location,
        })
    }

    fn parse_do_while_statement(&mut self, location: SourceLocation) -> Result<Stmt> {
        self.skip_newlines();
        let body = Box::new(self.parse_statement()?);
        self.skip_terminators();
        self.expect(&TokenKind::While)?;
        self.expect(&TokenKind::LeftParen)?;
        let condition = self.parse_expression()?;
        self.expect(&TokenKind::RightParen)?;

        Ok(Stmt::DoWhile {
            body,
            condition,
            location,
        })
    }

    fn parse_print_statement(&mut self, location: SourceLocation) -> Result<Stmt> {
        let args = self.parse_print_args()?;
        let output = self.parse_output_redirect()?;

        Ok(Stmt::Print {
            args,
            output,
            location,
        })
    }

    fn parse_printf_statement(&mut self, location: SourceLocation) -> Result<Stmt> {
        let mut args = self.parse_print_args()?;
        if args.is_empty() {
            return Err(Error::parser(
                "printf: no format",
                location.line,
                location.column,
            ));
        }
        let format = args.remove(0);
        let output = self.parse_output_redirect()?;

        Ok(Stmt::Printf {
            format,
            args,
            output,
            location,
        })
    }

    /// Arguments of print/printf: `a, b` or `(a, b)`
    fn parse_print_args(&mut self) -> Result<Vec<Expr>> {
        if self.check(&TokenKind::LeftParen) {
            let saved = self.current;
            self.advance();
            if let Ok(list) = self.parse_paren_list() {
                if self.at_print_end() {
                    return Ok(list);
                }
            }
            self.current = saved;
        }

        let mut args = Vec::new();
        if self.can_start_expression() {
            args.push(self.parse_print_arg()?);
            while self.match_token(&TokenKind::Comma) {
                self.skip_newlines();
                args.push(self.parse_print_arg()?);
            }
        }
        Ok(args)
    }

    /// Expression list after `(`, through the closing `)`
    fn parse_paren_list(&mut self) -> Result<Vec<Expr>> {
        let saved_print = std::mem::replace(&mut self.in_print, false);
        let result = (|| -> Result<Vec<Expr>> {
            self.skip_newlines();
            let mut list = vec![self.parse_expression()?];
            self.skip_newlines();
            while self.match_token(&TokenKind::Comma) {
                self.skip_newlines();
                list.push(self.parse_expression()?);
                self.skip_newlines();
            }
            self.expect(&TokenKind::RightParen)?;
            Ok(list)
        })();
        self.in_print = saved_print;
        result
    }

    fn at_print_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            None | Some(
                TokenKind::Newline
                    | TokenKind::Semicolon
                    | TokenKind::RightBrace
                    | TokenKind::Greater
                    | TokenKind::Append
                    | TokenKind::Pipe
                    | TokenKind::Eof
            )
        )
    }

    fn parse_print_arg(&mut self) -> Result<Expr> {
        let saved = std::mem::replace(&mut self.in_print, true);
        let result = self.parse_ternary();
        self.in_print = saved;
        result
    }

    fn parse_output_redirect(&mut self) -> Result<Option<OutputRedirect>> {
        let saved = std::mem::replace(&mut self.in_print, true);
        let result = if self.match_token(&TokenKind::Greater) {
            self.parse_concat().map(|t| Some(OutputRedirect::Truncate(t)))
        } else if self.match_token(&TokenKind::Append) {
            self.parse_concat().map(|t| Some(OutputRedirect::Append(t)))
        } else if self.match_token(&TokenKind::Pipe) {
            self.parse_concat().map(|t| Some(OutputRedirect::Pipe(t)))
        } else {
            Ok(None)
        };
        self.in_print = saved;
        result
    }

    /// Parse an expression
    fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let expr = self.parse_ternary()?;

        let location = self.current_location();
        let op = if self.match_token(&TokenKind::Assign) {
            Some(AssignOp::Assign)
        } else if self.match_token(&TokenKind::PlusAssign) {
            Some(AssignOp::AddAssign)
        } else if self.match_token(&TokenKind::MinusAssign) {
            Some(AssignOp::SubAssign)
        } else if self.match_token(&TokenKind::StarAssign) {
            Some(AssignOp::MulAssign)
        } else if self.match_token(&TokenKind::SlashAssign) {
            Some(AssignOp::DivAssign)
        } else if self.match_token(&TokenKind::PercentAssign) {
            Some(AssignOp::ModAssign)
        } else if self.match_token(&TokenKind::CaretAssign) {
            Some(AssignOp::PowAssign)
        } else {
            None
        };

        if let Some(op) = op {
            let target = unwrap_group(expr);
            if !target.is_lvalue() {
                return Err(Error::parser(
                    "invalid assignment target",
                    location.line,
                    location.column,
                ));
            }
            self.skip_newlines();
            let value = self.parse_assignment()?;
            return Ok(Expr::Assign {
                target: Box::new(target),
                op,
                value: Box::new(value),
                location,
            });
        }

        Ok(expr)
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let expr = self.parse_or()?;

        if self.match_token(&TokenKind::Question) {
            let location = self.current_location();
            self.skip_newlines();
            let then_expr = self.parse_ternary()?;
            self.skip_newlines();
            self.expect(&TokenKind::Colon)?;
            self.skip_newlines();
            let else_expr = self.parse_ternary()?;
            return Ok(Expr::Ternary {
                condition: Box::new(expr),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                location,
            });
        }

        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut expr = self.parse_and()?;

        while self.match_token(&TokenKind::Or) {
            let location = self.current_location();
            self.skip_newlines();
            let right = self.parse_and()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op: BinaryOp::Or,
                right: Box::new(right),
                location,
            };
        }

        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut expr = self.parse_in()?;

        while self.match_token(&TokenKind::And) {
            let location = self.current_location();
            self.skip_newlines();
            let right = self.parse_in()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op: BinaryOp::And,
                right: Box::new(right),
                location,
            };
        }

        Ok(expr)
    }

    fn parse_in(&mut self) -> Result<Expr> {
        let mut expr = self.parse_match()?;

        // expr in array
        while self.match_token(&TokenKind::In) {
            let location = self.current_location();
            let array = self.expect_identifier()?;
            expr = Expr::InArray {
                key: vec![expr],
                array,
                location,
            };
        }

        Ok(expr)
    }

    fn parse_match(&mut self) -> Result<Expr> {
        let mut expr = self.parse_comparison()?;

        loop {
            let location = self.current_location();
            let negated = if self.match_token(&TokenKind::Match) {
                false
            } else if self.match_token(&TokenKind::NotMatch) {
                true
            } else {
                break;
            };
            let pattern = self.parse_comparison()?;
            expr = Expr::Match {
                expr: Box::new(expr),
                pattern: Box::new(pattern),
                negated,
                location,
            };
        }

        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let expr = self.parse_pipe_getline()?;

        let location = self.current_location();
        let op = if self.match_token(&TokenKind::Less) {
            BinaryOp::Lt
        } else if self.match_token(&TokenKind::LessEqual) {
            BinaryOp::Le
        } else if !self.in_print && self.match_token(&TokenKind::Greater) {
            // inside print arguments `>` is a redirection
            BinaryOp::Gt
        } else if self.match_token(&TokenKind::GreaterEqual) {
            BinaryOp::Ge
        } else if self.match_token(&TokenKind::Equal) {
            BinaryOp::Eq
        } else if self.match_token(&TokenKind::NotEqual) {
            BinaryOp::Ne
        } else {
            return Ok(expr);
        };

        // comparisons do not chain
        let right = self.parse_pipe_getline()?;
        Ok(Expr::Binary {
            left: Box::new(expr),
            op,
            right: Box::new(right),
            location,
        })
    }

    /// `cmd | getline [var]`
    fn parse_pipe_getline(&mut self) -> Result<Expr> {
        let mut expr = self.parse_concat()?;

        while !self.in_print
            && self.check(&TokenKind::Pipe)
            && matches!(self.peek_kind_at(1), Some(TokenKind::Getline))
        {
            let location = self.current_location();
            self.advance();
            self.advance();
            let var = self.parse_getline_target()?;
            expr = Expr::Getline {
                var,
                input: Some(GetlineInput::Pipe(Box::new(expr))),
                location,
            };
        }

        Ok(expr)
    }

    fn parse_concat(&mut self) -> Result<Expr> {
        let mut expr = self.parse_additive()?;

        // Concatenation is implicit between adjacent expressions
        while self.can_start_concat_operand() {
            let right = self.parse_additive()?;
            let location = expr.location();
            expr = Expr::Binary {
                left: Box::new(expr),
                op: BinaryOp::Concat,
                right: Box::new(right),
                location,
            };
        }

        Ok(expr)
    }

    fn can_start_concat_operand(&self) -> bool {
        if let Some(kind) = self.peek_kind() {
            matches!(
                kind,
                TokenKind::Number(_)
                    | TokenKind::String(_)
                    | TokenKind::Identifier(_)
                    | TokenKind::FuncName(_)
                    | TokenKind::Dollar
                    | TokenKind::LeftParen
                    | TokenKind::Not
                    | TokenKind::Increment
                    | TokenKind::Decrement
            )
        } else {
            false
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut expr = self.parse_multiplicative()?;

        loop {
            let location = self.current_location();
            let op = if self.match_token(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.match_token(&TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };

            let right = self.parse_multiplicative()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
                location,
            };
        }

        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut expr = self.parse_unary()?;

        loop {
            let location = self.current_location();
            let op = if self.match_token(&TokenKind::Star) {
                BinaryOp::Mul
            } else if self.match_token(&TokenKind::Slash) {
                BinaryOp::Div
            } else if self.match_token(&TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };

            let right = self.parse_unary()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
                location,
            };
        }

        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let location = self.current_location();

        let op = if self.match_token(&TokenKind::Not) {
            UnaryOp::Not
        } else if self.match_token(&TokenKind::Minus) {
            UnaryOp::Neg
        } else if self.match_token(&TokenKind::Plus) {
            UnaryOp::Pos
        } else {
            return self.parse_power();
        };

        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            location,
        })
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let expr = self.parse_increment()?;

        // Exponentiation is right-associative and binds tighter than unary minus
        if self.match_token(&TokenKind::Caret) {
            let location = self.current_location();
            let right = self.parse_unary()?;
            return Ok(Expr::Binary {
                left: Box::new(expr),
                op: BinaryOp::Pow,
                right: Box::new(right),
                location,
            });
        }

        Ok(expr)
    }

    fn parse_increment(&mut self) -> Result<Expr> {
        let location = self.current_location();

        if self.match_token(&TokenKind::Increment) {
            let operand = self.expect_lvalue()?;
            return Ok(Expr::PreIncrement(Box::new(operand), location));
        }

        if self.match_token(&TokenKind::Decrement) {
            let operand = self.expect_lvalue()?;
            return Ok(Expr::PreDecrement(Box::new(operand), location));
        }

        let expr = self.parse_field()?;
        if expr.is_lvalue() {
            let location = self.current_location();
            if self.match_token(&TokenKind::Increment) {
                return Ok(Expr::PostIncrement(Box::new(expr), location));
            }
            if self.match_token(&TokenKind::Decrement) {
                return Ok(Expr::PostDecrement(Box::new(expr), location));
            }
        }

        Ok(expr)
    }

    fn expect_lvalue(&mut self) -> Result<Expr> {
        let location = self.current_location();
        let expr = unwrap_group(self.parse_field()?);
        if expr.is_lvalue() {
            Ok(expr)
        } else {
            Err(Error::parser(
                "increment or decrement of a non-variable",
                location.line,
                location.column,
            ))
        }
    }

    fn parse_field(&mut self) -> Result<Expr> {
        let location = self.current_location();
        if self.match_token(&TokenKind::Dollar) {
            let index = match self.peek_kind() {
                Some(TokenKind::Increment | TokenKind::Decrement) => self.parse_increment()?,
                Some(TokenKind::Minus | TokenKind::Plus | TokenKind::Not) => {
                    let op_location = self.current_location();
                    let op = match self.advance().map(|t| &t.kind) {
                        Some(TokenKind::Minus) => UnaryOp::Neg,
                        Some(TokenKind::Plus) => UnaryOp::Pos,
                        _ => UnaryOp::Not,
                    };
                    let operand = self.parse_field()?;
                    Expr::Unary {
                        op,
                        operand: Box::new(operand),
                        location: op_location,
                    }
                }
                _ => self.parse_field()?,
            };
            return Ok(Expr::Field(Box::new(index), location));
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let location = self.current_location();

        let Some(kind) = self.peek_kind().cloned() else {
            return Err(Error::parser(
                "unexpected end of input",
                location.line,
                location.column,
            ));
        };

        match kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n, location))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Expr::String(s, location))
            }
            TokenKind::Regex(r) => {
                self.advance();
                Ok(Expr::Regex(r, location))
            }
            TokenKind::FuncName(name) => {
                self.advance();
                self.expect(&TokenKind::LeftParen)?;
                let args = self.parse_call_args()?;
                match self.builtin(&name) {
                    Some(builtin) => self.builtin_call(builtin, args, location),
                    None => Ok(Expr::Call {
                        name,
                        args,
                        target: CallTarget::Unresolved,
                        location,
                    }),
                }
            }
            TokenKind::Identifier(name) => {
                self.advance();

                if let Some(builtin) = self.builtin(&name) {
                    // built-ins may be written with a space before `(`;
                    // `length` alone means length($0)
                    if self.match_token(&TokenKind::LeftParen) {
                        let args = self.parse_call_args()?;
                        return self.builtin_call(builtin, args, location);
                    }
                    if builtin == Builtin::Length {
                        return self.builtin_call(builtin, Vec::new(), location);
                    }
                    return Err(Error::parser(
                        format!("built-in function '{}' requires arguments", name),
                        location.line,
                        location.column,
                    ));
                }

                if self.match_token(&TokenKind::LeftBracket) {
                    let indices = self.parse_subscripts()?;
                    return Ok(Expr::ArrayAccess {
                        array: name,
                        indices,
                        location,
                    });
                }

                Ok(Expr::Var(name, location))
            }
            TokenKind::Getline => {
                self.advance();
                let var = self.parse_getline_target()?;

                let input = if self.match_token(&TokenKind::Less) {
                    Some(GetlineInput::File(Box::new(self.parse_increment()?)))
                } else {
                    None
                };

                Ok(Expr::Getline {
                    var,
                    input,
                    location,
                })
            }
            TokenKind::LeftParen => {
                self.advance();
                let mut list = self.parse_paren_list()?;

                // (i, j) in array
                if list.len() > 1 {
                    if !self.match_token(&TokenKind::In) {
                        return Err(Error::parser(
                            "expected 'in' after parenthesized expression list",
                            location.line,
                            location.column,
                        ));
                    }
                    let array = self.expect_identifier()?;
                    return Ok(Expr::InArray {
                        key: list,
                        array,
                        location,
                    });
                }

                let expr = list.remove(0);
                Ok(Expr::Group(Box::new(expr), location))
            }
            other => Err(Error::parser(
                format!("unexpected token {}", other),
                location.line,
                location.column,
            )),
        }
    }

    /// Arguments after `(` through `)`
    fn parse_call_args(&mut self) -> Result<Vec<Expr>> {
        let saved_print = std::mem::replace(&mut self.in_print, false);
        let result = (|| -> Result<Vec<Expr>> {
            let mut args = Vec::new();
            self.skip_newlines();
            if !self.check(&TokenKind::RightParen) {
                args.push(self.parse_expression()?);
                self.skip_newlines();
                while self.match_token(&TokenKind::Comma) {
                    self.skip_newlines();
                    args.push(self.parse_expression()?);
                    self.skip_newlines();
                }
            }
            self.expect(&TokenKind::RightParen)?;
            Ok(args)
        })();
        self.in_print = saved_print;
        result
    }

    /// Subscripts after `[` through `]`
    fn parse_subscripts(&mut self) -> Result<Vec<Expr>> {
        let saved_print = std::mem::replace(&mut self.in_print, false);
        let result = (|| -> Result<Vec<Expr>> {
            let mut indices = vec![self.parse_expression()?];
            while self.match_token(&TokenKind::Comma) {
                self.skip_newlines();
                indices.push(self.parse_expression()?);
            }
            self.expect(&TokenKind::RightBracket)?;
            Ok(indices)
        })();
        self.in_print = saved_print;
        result
    }

    /// Optional variable, field or element read by getline
    fn parse_getline_target(&mut self) -> Result<Option<Box<Expr>>> {
        match self.peek_kind() {
            Some(TokenKind::Dollar) => Ok(Some(Box::new(self.parse_field()?))),
            Some(TokenKind::Identifier(name)) if self.builtin(name).is_none() => {
                let location = self.current_location();
                let name = name.clone();
                self.advance();
                if self.match_token(&TokenKind::LeftBracket) {
                    let indices = self.parse_subscripts()?;
                    Ok(Some(Box::new(Expr::ArrayAccess {
                        array: name,
                        indices,
                        location,
                    })))
                } else {
                    Ok(Some(Box::new(Expr::Var(name, location))))
                }
            }
            _ => Ok(None),
        }
    }

    /// Check a built-in call's shape and bind it
    fn builtin_call(
        &self,
        builtin: Builtin,
        args: Vec<Expr>,
        location: SourceLocation,
    ) -> Result<Expr> {
        let (min, max) = builtin.arity();
        if args.len() < min || args.len() > max {
            return Err(Error::parser(
                format!(
                    "wrong number of arguments ({}) to built-in function '{}'",
                    args.len(),
                    builtin.name()
                ),
                location.line,
                location.column,
            ));
        }

        match builtin {
            Builtin::Split if args[1].as_var_name().is_none() => {
                return Err(Error::parser(
                    "split: second argument must be an array name",
                    location.line,
                    location.column,
                ));
            }
            Builtin::Sub | Builtin::Gsub if args.len() == 3 && !unwrap_group_ref(&args[2]).is_lvalue() => {
                return Err(Error::parser(
                    format!("{}: third argument must be assignable", builtin.name()),
                    location.line,
                    location.column,
                ));
            }
            _ => {}
        }

        Ok(Expr::Call {
            name: builtin.name().to_string(),
            args,
            target: CallTarget::Builtin(builtin),
            location,
        })
    }

    // ===== Helper methods =====

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.current).map(|t| &t.kind)
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.current + offset).map(|t| &t.kind)
    }

    fn previous_kind(&self) -> Option<&TokenKind> {
        self.current
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| &t.kind)
    }

    fn current_location(&self) -> SourceLocation {
        self.tokens
            .get(self.current)
            .map(|t| t.location)
            .unwrap_or(SourceLocation::new(0, 0))
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek_kind(), None | Some(TokenKind::Eof))
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind()
            .map(|k| std::mem::discriminant(k) == std::mem::discriminant(kind))
            .unwrap_or(false)
    }

    fn advance(&mut self) -> Option<&Token> {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous_token()
    }

    fn previous_token(&self) -> Option<&Token> {
        self.current.checked_sub(1).and_then(|i| self.tokens.get(i))
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            let loc = self.current_location();
            Err(Error::parser(
                format!("expected {}, found {}", kind, found(self.peek_kind())),
                loc.line,
                loc.column,
            ))
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        if let Some(TokenKind::Identifier(name)) = self.peek_kind() {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            let loc = self.current_location();
            Err(Error::parser(
                format!("expected identifier, found {}", found(self.peek_kind())),
                loc.line,
                loc.column,
            ))
        }
    }

    fn skip_newlines(&mut self) {
        while self.match_token(&TokenKind::Newline) {}
    }

    fn skip_terminators(&mut self) {
        while self.match_token(&TokenKind::Newline) || self.match_token(&TokenKind::Semicolon) {}
    }

    fn can_start_expression(&self) -> bool {
        self.peek_kind()
            .map(|k| k.can_start_expression())
            .unwrap_or(false)
    }
}

fn found(kind: Option<&TokenKind>) -> String {
    kind.map_or_else(|| "end of input".to_string(), |k| k.to_string())
}

fn unwrap_group(expr: Expr) -> Expr {
    match expr {
        Expr::Group(inner, _) => unwrap_group(*inner),
        other => other,
    }
}

fn unwrap_group_ref(expr: &Expr) -> &Expr {
    match expr {
        Expr::Group(inner, _) => unwrap_group_ref(inner),
        other => other,
    }
}
