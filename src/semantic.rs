//! Semantic analysis: binds every call site to its callee and infers which
//! function parameters are arrays.
//!
//! Analysis runs twice over the same tree. The first pass only binds calls
//! whose callee is declared at or before the enclosing rule or function;
//! the second binds the rest, falls back to the extension registry, and
//! reports anything still unresolved. After the second pass every call
//! target is known, so IR generation needs no further pass.

use std::collections::BTreeSet;

use tracing::debug;

use crate::ast::*;
use crate::error::{Error, Result, SourceLocation};

/// A parsed program together with its analysis state
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    program: Program,
    extensions: BTreeSet<String>,
    passes: usize,
}

impl SyntaxTree {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            extensions: BTreeSet::new(),
            passes: 0,
        }
    }

    /// Names that may be bound as extension calls
    pub fn with_extensions<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.extensions = names.into_iter().map(str::to_string).collect();
        self
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn into_program(self) -> Program {
        self.program
    }

    /// Number of analysis passes run so far
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Run one analysis pass. The first call binds back-references, every
    /// later call binds forward references and fails on unresolved names.
    pub fn semantic_analysis(&mut self) -> Result<()> {
        let forward = self.passes > 0;
        let signatures: Vec<Signature> = self
            .program
            .functions
            .iter()
            .map(|f| Signature {
                name: f.name.clone(),
                position: f.position,
                arity: f.params.len(),
            })
            .collect();

        // Binding is idempotent, so walking again until the array
        // parameter sets stop growing is safe.
        let mut rounds = 0;
        loop {
            rounds += 1;
            let array_params: Vec<Vec<bool>> = self
                .program
                .functions
                .iter()
                .map(|f| f.array_params.clone())
                .collect();

            for rule in &mut self.program.rules {
                let phase = match rule.pattern {
                    Some(Pattern::Begin) => Phase::Begin,
                    Some(Pattern::End) => Phase::End,
                    _ => Phase::Main,
                };
                let mut resolver = Resolver {
                    signatures: &signatures,
                    array_params: &array_params,
                    extensions: &self.extensions,
                    forward,
                    position: rule.position,
                    phase,
                    loop_depth: 0,
                    params: &[],
                    marks: Vec::new(),
                };
                if let Some(pattern) = &mut rule.pattern {
                    resolver.pattern(pattern)?;
                }
                if let Some(action) = &mut rule.action {
                    resolver.block(action)?;
                }
            }

            let mut changed = false;
            for function in &mut self.program.functions {
                let mut resolver = Resolver {
                    signatures: &signatures,
                    array_params: &array_params,
                    extensions: &self.extensions,
                    forward,
                    position: function.position,
                    phase: Phase::Function,
                    loop_depth: 0,
                    params: &function.params,
                    marks: function.array_params.clone(),
                };
                resolver.block(&mut function.body)?;
                let marks = resolver.marks;
                if marks != function.array_params {
                    function.array_params = marks;
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }

        self.passes += 1;
        debug!(
            pass = self.passes,
            rounds,
            unresolved = self.unresolved_calls(),
            "semantic analysis pass finished"
        );
        Ok(())
    }

    /// Count call sites still in the unresolved state
    pub fn unresolved_calls(&self) -> usize {
        let mut count = 0;
        let mut visit = |expr: &Expr| {
            if let Expr::Call {
                target: CallTarget::Unresolved,
                ..
            } = expr
            {
                count += 1;
            }
        };
        for rule in &self.program.rules {
            match &rule.pattern {
                Some(Pattern::Expr(expr)) => walk_expr(expr, &mut visit),
                Some(Pattern::Range { start, end }) => {
                    for p in [start.as_ref(), end.as_ref()] {
                        if let Pattern::Expr(expr) = p {
                            walk_expr(expr, &mut visit);
                        }
                    }
                }
                _ => {}
            }
            if let Some(action) = &rule.action {
                for stmt in &action.statements {
                    walk_stmt(stmt, &mut visit);
                }
            }
        }
        for function in &self.program.functions {
            for stmt in &function.body.statements {
                walk_stmt(stmt, &mut visit);
            }
        }
        count
    }
}

struct Signature {
    name: String,
    position: usize,
    arity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Begin,
    Main,
    End,
    Function,
}

struct Resolver<'a> {
    signatures: &'a [Signature],
    array_params: &'a [Vec<bool>],
    extensions: &'a BTreeSet<String>,
    forward: bool,
    position: usize,
    phase: Phase,
    loop_depth: usize,
    /// Parameters of the enclosing function
    params: &'a [String],
    /// Parameters seen used as arrays
    marks: Vec<bool>,
}

impl Resolver<'_> {
    fn mark_array(&mut self, name: &str) {
        if let Some(index) = self.params.iter().position(|p| p == name) {
            self.marks[index] = true;
        }
    }

    fn pattern(&mut self, pattern: &mut Pattern) -> Result<()> {
        match pattern {
            Pattern::Expr(expr) => self.expr(expr),
            Pattern::Range { start, end } => {
                self.pattern(start)?;
                self.pattern(end)
            }
            Pattern::Begin | Pattern::End | Pattern::Regex(_) => Ok(()),
        }
    }

    fn block(&mut self, block: &mut Block) -> Result<()> {
        for stmt in &mut block.statements {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn loop_body(&mut self, body: &mut Stmt) -> Result<()> {
        self.loop_depth += 1;
        let result = self.stmt(body);
        self.loop_depth -= 1;
        result
    }

    fn stmt(&mut self, stmt: &mut Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr(expr) => self.expr(expr),
            Stmt::Print { args, output, .. } => {
                for arg in args {
                    self.expr(arg)?;
                }
                self.redirect(output)
            }
            Stmt::Printf {
                format,
                args,
                output,
                ..
            } => {
                self.expr(format)?;
                for arg in args {
                    self.expr(arg)?;
                }
                self.redirect(output)
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.expr(condition)?;
                self.stmt(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.stmt(else_branch)?;
                }
                Ok(())
            }
            Stmt::While {
                condition, body, ..
            }
            | Stmt::DoWhile {
                body, condition, ..
            } => {
                self.expr(condition)?;
                self.loop_body(body)
            }
            Stmt::For {
                init,
                condition,
                update,
                body,
                ..
            } => {
                for expr in [init, condition, update].into_iter().flatten() {
                    self.expr(expr)?;
                }
                self.loop_body(body)
            }
            Stmt::ForIn { array, body, .. } => {
                self.mark_array(array);
                self.loop_body(body)
            }
            Stmt::Block(block) => self.block(block),
            Stmt::Break { location } if self.loop_depth == 0 => {
                Err(Error::semantic("'break' is not inside a loop", *location))
            }
            Stmt::Continue { location } if self.loop_depth == 0 => {
                Err(Error::semantic("'continue' is not inside a loop", *location))
            }
            Stmt::Next { location } if matches!(self.phase, Phase::Begin | Phase::End) => {
                Err(Error::semantic("'next' used in a BEGIN or END action", *location))
            }
            Stmt::Return { location, .. } if self.phase != Phase::Function => {
                Err(Error::semantic("'return' used outside a function", *location))
            }
            Stmt::Return { value, .. } | Stmt::Exit { code: value, .. } => match value {
                Some(expr) => self.expr(expr),
                None => Ok(()),
            },
            Stmt::Delete { array, index, .. } => {
                self.mark_array(array);
                for expr in index {
                    self.expr(expr)?;
                }
                Ok(())
            }
            Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Next { .. } | Stmt::Empty => Ok(()),
        }
    }

    fn redirect(&mut self, output: &mut Option<OutputRedirect>) -> Result<()> {
        match output {
            Some(OutputRedirect::Truncate(target))
            | Some(OutputRedirect::Append(target))
            | Some(OutputRedirect::Pipe(target)) => self.expr(target),
            None => Ok(()),
        }
    }

    fn expr(&mut self, expr: &mut Expr) -> Result<()> {
        match expr {
            Expr::Number(..) | Expr::String(..) | Expr::Regex(..) | Expr::Var(..) => Ok(()),
            Expr::Field(index, _) => self.expr(index),
            Expr::ArrayAccess { array, indices, .. } => {
                self.mark_array(array);
                for index in indices {
                    self.expr(index)?;
                }
                Ok(())
            }
            Expr::Binary { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)
            }
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Assign { target, value, .. } => {
                self.expr(target)?;
                self.expr(value)
            }
            Expr::PreIncrement(operand, _)
            | Expr::PreDecrement(operand, _)
            | Expr::PostIncrement(operand, _)
            | Expr::PostDecrement(operand, _)
            | Expr::Group(operand, _) => self.expr(operand),
            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
                ..
            } => {
                self.expr(condition)?;
                self.expr(then_expr)?;
                self.expr(else_expr)
            }
            Expr::InArray { key, array, .. } => {
                self.mark_array(array);
                for k in key {
                    self.expr(k)?;
                }
                Ok(())
            }
            Expr::Match { expr, pattern, .. } => {
                self.expr(expr)?;
                self.expr(pattern)
            }
            Expr::Getline { var, input, .. } => {
                if let Some(var) = var {
                    self.expr(var)?;
                }
                match input {
                    Some(GetlineInput::File(source)) | Some(GetlineInput::Pipe(source)) => {
                        self.expr(source)
                    }
                    None => Ok(()),
                }
            }
            Expr::Call {
                name,
                args,
                target,
                location,
            } => {
                for arg in args.iter_mut() {
                    self.expr(arg)?;
                }
                if *target == CallTarget::Unresolved {
                    *target = self.bind(name, args.len(), *location)?;
                }
                self.mark_array_arguments(target, args);
                Ok(())
            }
        }
    }

    fn bind(&self, name: &str, argc: usize, location: SourceLocation) -> Result<CallTarget> {
        if let Some(id) = self.signatures.iter().position(|s| s.name == name) {
            let signature = &self.signatures[id];
            if self.forward || signature.position <= self.position {
                if argc > signature.arity {
                    return Err(Error::semantic(
                        format!(
                            "function '{}' called with {} arguments, accepts at most {}",
                            name, argc, signature.arity
                        ),
                        location,
                    ));
                }
                return Ok(CallTarget::User {
                    id,
                    arity: signature.arity,
                });
            }
        }

        if !self.forward {
            return Ok(CallTarget::Unresolved);
        }

        if self.extensions.contains(name) {
            return Ok(CallTarget::Extension(name.to_string()));
        }

        Err(Error::semantic(
            format!("unresolved function '{}'", name),
            location,
        ))
    }

    /// Parameters passed where an array is expected are arrays too
    fn mark_array_arguments(&mut self, target: &CallTarget, args: &[Expr]) {
        match target {
            CallTarget::Builtin(Builtin::Split) => {
                if let Some(name) = args.get(1).and_then(Expr::as_var_name) {
                    self.mark_array(name);
                }
            }
            CallTarget::User { id, .. } => {
                let callee = &self.array_params[*id];
                for (arg, is_array) in args.iter().zip(callee) {
                    if *is_array {
                        if let Some(name) = arg.as_var_name() {
                            self.mark_array(name);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

/// Visit every expression under `stmt`, outermost first
pub(crate) fn walk_stmt(stmt: &Stmt, visit: &mut impl FnMut(&Expr)) {
    match stmt {
        Stmt::Expr(expr) => walk_expr(expr, visit),
        Stmt::Print { args, output, .. } => {
            args.iter().for_each(|a| walk_expr(a, visit));
            walk_redirect(output, visit);
        }
        Stmt::Printf {
            format,
            args,
            output,
            ..
        } => {
            walk_expr(format, visit);
            args.iter().for_each(|a| walk_expr(a, visit));
            walk_redirect(output, visit);
        }
        Stmt::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            walk_expr(condition, visit);
            walk_stmt(then_branch, visit);
            if let Some(else_branch) = else_branch {
                walk_stmt(else_branch, visit);
            }
        }
        Stmt::While {
            condition, body, ..
        }
        | Stmt::DoWhile {
            body, condition, ..
        } => {
            walk_expr(condition, visit);
            walk_stmt(body, visit);
        }
        Stmt::For {
            init,
            condition,
            update,
            body,
            ..
        } => {
            for expr in [init, condition, update].into_iter().flatten() {
                walk_expr(expr, visit);
            }
            walk_stmt(body, visit);
        }
        Stmt::ForIn { body, .. } => walk_stmt(body, visit),
        Stmt::Block(block) => block.statements.iter().for_each(|s| walk_stmt(s, visit)),
        Stmt::Return { value, .. } | Stmt::Exit { code: value, .. } => {
            if let Some(expr) = value {
                walk_expr(expr, visit);
            }
        }
        Stmt::Delete { index, .. } => index.iter().for_each(|e| walk_expr(e, visit)),
        Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Next { .. } | Stmt::Empty => {}
    }
}

fn walk_redirect(output: &Option<OutputRedirect>, visit: &mut impl FnMut(&Expr)) {
    if let Some(
        OutputRedirect::Truncate(target)
        | OutputRedirect::Append(target)
        | OutputRedirect::Pipe(target),
    ) = output
    {
        walk_expr(target, visit);
    }
}

pub(crate) fn walk_expr(expr: &Expr, visit: &mut impl FnMut(&Expr)) {
    visit(expr);
    match expr {
        Expr::Number(..) | Expr::String(..) | Expr::Regex(..) | Expr::Var(..) => {}
        Expr::Field(inner, _)
        | Expr::Unary { operand: inner, .. }
        | Expr::PreIncrement(inner, _)
        | Expr::PreDecrement(inner, _)
        | Expr::PostIncrement(inner, _)
        | Expr::PostDecrement(inner, _)
        | Expr::Group(inner, _) => walk_expr(inner, visit),
        Expr::ArrayAccess { indices, .. } => indices.iter().for_each(|e| walk_expr(e, visit)),
        Expr::Binary { left, right, .. } => {
            walk_expr(left, visit);
            walk_expr(right, visit);
        }
        Expr::Assign { target, value, .. } => {
            walk_expr(target, visit);
            walk_expr(value, visit);
        }
        Expr::Ternary {
            condition,
            then_expr,
            else_expr,
            ..
        } => {
            walk_expr(condition, visit);
            walk_expr(then_expr, visit);
            walk_expr(else_expr, visit);
        }
        Expr::Call { args, .. } => args.iter().for_each(|e| walk_expr(e, visit)),
        Expr::InArray { key, .. } => key.iter().for_each(|e| walk_expr(e, visit)),
        Expr::Match { expr, pattern, .. } => {
            walk_expr(expr, visit);
            walk_expr(pattern, visit);
        }
        Expr::Getline { var, input, .. } => {
            if let Some(var) = var {
                walk_expr(var, visit);
            }
            if let Some(GetlineInput::File(source) | GetlineInput::Pipe(source)) = input {
                walk_expr(source, visit);
            }
        }
    }
}
