//! Lowers an analysed syntax tree into an unlinked tuple queue.

use tracing::debug;

use super::*;
use crate::ast::*;
use crate::ere;
use crate::error::{Error, Result, SourceLocation};

/// Jump targets of the innermost enclosing loop
#[derive(Debug, Clone, Copy)]
struct LoopLabels {
    break_label: Label,
    continue_label: Label,
}

/// Single-traversal IR generator
pub struct CodeGenerator<'a> {
    program: &'a Program,
    tuples: AwkTuples,
    /// Operand stack depth implied by the tuples emitted so far
    depth: isize,
    function: Option<&'a FunctionDef>,
    entries: Vec<Label>,
    loops: Vec<LoopLabels>,
    /// Emit the main loop even without main or END rules
    input_loop: bool,
}

/// Generate the tuple queue for `program`. Every call site must already be
/// resolved. The result still needs [`AwkTuples::post_process`].
pub fn generate(program: &Program) -> Result<AwkTuples> {
    CodeGenerator::new(program).generate()
}

impl<'a> CodeGenerator<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self {
            program,
            tuples: AwkTuples::new(),
            depth: 0,
            function: None,
            entries: Vec::new(),
            loops: Vec::new(),
            input_loop: false,
        }
    }

    /// Always consume the input, even for a BEGIN-only program
    pub fn with_input_loop(mut self, input_loop: bool) -> Self {
        self.input_loop = input_loop;
        self
    }

    pub fn generate(mut self) -> Result<AwkTuples> {
        for function in &self.program.functions {
            let entry = self.tuples.new_label();
            self.entries.push(entry);
            self.tuples.add_function(FunctionInfo {
                name: function.name.clone(),
                arity: function.params.len(),
                entry,
                array_params: function.array_params.clone(),
            });
        }

        let program = self.program;
        let begin: Vec<&Rule> = program
            .rules
            .iter()
            .filter(|r| matches!(r.pattern, Some(Pattern::Begin)))
            .collect();
        let end: Vec<&Rule> = program
            .rules
            .iter()
            .filter(|r| matches!(r.pattern, Some(Pattern::End)))
            .collect();
        let main: Vec<&Rule> = program
            .rules
            .iter()
            .filter(|r| !matches!(r.pattern, Some(Pattern::Begin | Pattern::End)))
            .collect();

        if !begin.is_empty() {
            self.tuples.set_begin(self.tuples.next_address());
            for rule in &begin {
                if let Some(action) = &rule.action {
                    self.block(action)?;
                }
            }
            self.emit(Opcode::PhaseEnd, 0);
        }

        // END actions see the last record, so input is read for them too
        if !main.is_empty() || !end.is_empty() || self.input_loop {
            self.tuples.set_main(self.tuples.next_address());
            let top = self.tuples.new_label();
            let done = self.tuples.new_label();
            self.tuples.place_label(top);
            self.emit(Opcode::NextRecord { eof: done }, 0);
            for rule in &main {
                self.rule(rule)?;
            }
            self.emit(Opcode::Jump(top), 0);
            self.tuples.place_label(done);
            self.emit(Opcode::PhaseEnd, 0);
        }

        if !end.is_empty() {
            self.tuples.set_end(self.tuples.next_address());
            for rule in &end {
                if let Some(action) = &rule.action {
                    self.block(action)?;
                }
            }
            self.emit(Opcode::PhaseEnd, 0);
        }

        for (id, function) in program.functions.iter().enumerate() {
            self.function = Some(function);
            self.tuples.place_label(self.entries[id]);
            self.block(&function.body)?;
            let line = function.location.line;
            self.emit(Opcode::PushUninitialized, line);
            self.emit(Opcode::Return, line);
            self.function = None;
        }

        assert_eq!(self.depth, 0, "operand stack unbalanced after code generation");
        debug!(
            tuples = self.tuples.len(),
            globals = self.tuples.layout().len(),
            functions = program.functions.len(),
            "generated tuple queue"
        );
        Ok(self.tuples)
    }

    fn emit(&mut self, opcode: Opcode, line: usize) -> Address {
        self.depth += opcode.stack_effect();
        self.tuples.push(opcode, line)
    }

    fn regex(&mut self, pattern: &str) -> Result<RegexId> {
        let regex = ere::compile(pattern)?;
        Ok(self.tuples.add_regex(regex))
    }

    // ===== Rules =====

    fn rule(&mut self, rule: &Rule) -> Result<()> {
        let line = rule.location.line;
        let skip = self.tuples.new_label();

        match &rule.pattern {
            None => {}
            Some(Pattern::Range { start, end }) => {
                let range = self.tuples.new_range();
                let active = self.tuples.new_label();
                let run = self.tuples.new_label();
                self.emit(Opcode::RangeActive { range, target: active }, line);
                self.condition(start, line)?;
                self.emit(Opcode::JumpIfFalse(skip), line);
                self.emit(Opcode::SetRange { range, active: true }, line);
                // the record that opens the range may also close it
                self.tuples.place_label(active);
                self.condition(end, line)?;
                self.emit(Opcode::JumpIfFalse(run), line);
                self.emit(Opcode::SetRange { range, active: false }, line);
                self.tuples.place_label(run);
            }
            Some(pattern) => {
                self.condition(pattern, line)?;
                self.emit(Opcode::JumpIfFalse(skip), line);
            }
        }

        match &rule.action {
            Some(action) => self.block(action)?,
            None => {
                self.emit(
                    Opcode::Print {
                        argc: 0,
                        redirect: None,
                    },
                    line,
                );
            }
        }
        self.tuples.place_label(skip);
        Ok(())
    }

    /// Push the truth value of a single pattern
    fn condition(&mut self, pattern: &Pattern, line: usize) -> Result<()> {
        match pattern {
            Pattern::Expr(expr) => self.expr(expr),
            Pattern::Regex(source) => {
                let id = self.regex(source)?;
                self.emit(Opcode::MatchRecord(id), line);
                Ok(())
            }
            Pattern::Begin | Pattern::End | Pattern::Range { .. } => Err(Error::semantic(
                "BEGIN, END and ranges cannot be part of a range pattern",
                SourceLocation::new(line, 0),
            )),
        }
    }

    // ===== Statements =====

    fn block(&mut self, block: &Block) -> Result<()> {
        for stmt in &block.statements {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn with_loop(&mut self, labels: LoopLabels, body: &Stmt) -> Result<()> {
        self.loops.push(labels);
        let result = self.stmt(body);
        self.loops.pop();
        result
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.expr(expr)?;
                self.emit(Opcode::Pop, expr.location().line);
            }
            Stmt::Print {
                args,
                output,
                location,
            } => {
                for arg in args {
                    self.expr(arg)?;
                }
                let redirect = self.redirect(output)?;
                self.emit(
                    Opcode::Print {
                        argc: args.len(),
                        redirect,
                    },
                    location.line,
                );
            }
            Stmt::Printf {
                format,
                args,
                output,
                location,
            } => {
                self.expr(format)?;
                for arg in args {
                    self.expr(arg)?;
                }
                let redirect = self.redirect(output)?;
                self.emit(
                    Opcode::Printf {
                        argc: args.len() + 1,
                        redirect,
                    },
                    location.line,
                );
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                location,
            } => {
                let line = location.line;
                let otherwise = self.tuples.new_label();
                self.expr(condition)?;
                self.emit(Opcode::JumpIfFalse(otherwise), line);
                self.stmt(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let end = self.tuples.new_label();
                        self.emit(Opcode::Jump(end), line);
                        self.tuples.place_label(otherwise);
                        self.stmt(else_branch)?;
                        self.tuples.place_label(end);
                    }
                    None => self.tuples.place_label(otherwise),
                }
            }
            Stmt::While {
                condition,
                body,
                location,
            } => {
                let line = location.line;
                let top = self.tuples.new_label();
                let end = self.tuples.new_label();
                self.tuples.place_label(top);
                self.expr(condition)?;
                self.emit(Opcode::JumpIfFalse(end), line);
                self.with_loop(
                    LoopLabels {
                        break_label: end,
                        continue_label: top,
                    },
                    body,
                )?;
                self.emit(Opcode::Jump(top), line);
                self.tuples.place_label(end);
            }
            Stmt::DoWhile {
                body,
                condition,
                location,
            } => {
                let line = location.line;
                let top = self.tuples.new_label();
                let test = self.tuples.new_label();
                let end = self.tuples.new_label();
                self.tuples.place_label(top);
                self.with_loop(
                    LoopLabels {
                        break_label: end,
                        continue_label: test,
                    },
                    body,
                )?;
                self.tuples.place_label(test);
                self.expr(condition)?;
                self.emit(Opcode::JumpIfTrue(top), line);
                self.tuples.place_label(end);
            }
            Stmt::For {
                init,
                condition,
                update,
                body,
                location,
            } => {
                let line = location.line;
                if let Some(init) = init {
                    self.expr(init)?;
                    self.emit(Opcode::Pop, line);
                }
                let top = self.tuples.new_label();
                let next = self.tuples.new_label();
                let end = self.tuples.new_label();
                self.tuples.place_label(top);
                if let Some(condition) = condition {
                    self.expr(condition)?;
                    self.emit(Opcode::JumpIfFalse(end), line);
                }
                self.with_loop(
                    LoopLabels {
                        break_label: end,
                        continue_label: next,
                    },
                    body,
                )?;
                self.tuples.place_label(next);
                if let Some(update) = update {
                    self.expr(update)?;
                    self.emit(Opcode::Pop, line);
                }
                self.emit(Opcode::Jump(top), line);
                self.tuples.place_label(end);
            }
            Stmt::ForIn {
                var,
                array,
                body,
                location,
            } => {
                let line = location.line;
                let array = self.array_ref(array, *location)?;
                let var = self.var_place(var);
                let next = self.tuples.new_label();
                let end = self.tuples.new_label();
                self.emit(Opcode::ForInStart(array), line);
                self.tuples.place_label(next);
                self.emit(Opcode::ForInNext { var, exit: end }, line);
                self.with_loop(
                    LoopLabels {
                        break_label: end,
                        continue_label: next,
                    },
                    body,
                )?;
                self.emit(Opcode::Jump(next), line);
                self.tuples.place_label(end);
                self.emit(Opcode::ForInEnd, line);
            }
            Stmt::Block(block) => self.block(block)?,
            Stmt::Break { location } => {
                let labels = self.current_loop("break", *location)?;
                self.emit(Opcode::Jump(labels.break_label), location.line);
            }
            Stmt::Continue { location } => {
                let labels = self.current_loop("continue", *location)?;
                self.emit(Opcode::Jump(labels.continue_label), location.line);
            }
            Stmt::Next { location } => {
                self.emit(Opcode::Next, location.line);
            }
            Stmt::Exit { code, location } => {
                if let Some(code) = code {
                    self.expr(code)?;
                }
                self.emit(
                    Opcode::Exit {
                        has_code: code.is_some(),
                    },
                    location.line,
                );
            }
            Stmt::Return { value, location } => {
                match value {
                    Some(value) => self.expr(value)?,
                    None => {
                        self.emit(Opcode::PushUninitialized, location.line);
                    }
                }
                self.emit(Opcode::Return, location.line);
            }
            Stmt::Delete {
                array,
                index,
                location,
            } => {
                let array = self.array_ref(array, *location)?;
                if index.is_empty() {
                    self.emit(Opcode::DeleteArray(array), location.line);
                } else {
                    self.key(index, location.line)?;
                    self.emit(Opcode::DeleteElement(array), location.line);
                }
            }
            Stmt::Empty => {}
        }
        Ok(())
    }

    fn current_loop(&self, keyword: &str, location: SourceLocation) -> Result<LoopLabels> {
        self.loops.last().copied().ok_or_else(|| {
            Error::semantic(format!("'{}' is not inside a loop", keyword), location)
        })
    }

    /// Push the redirect target, if any
    fn redirect(&mut self, output: &Option<OutputRedirect>) -> Result<Option<Redirect>> {
        let (target, redirect) = match output {
            None => return Ok(None),
            Some(OutputRedirect::Truncate(target)) => (target, Redirect::Truncate),
            Some(OutputRedirect::Append(target)) => (target, Redirect::Append),
            Some(OutputRedirect::Pipe(target)) => (target, Redirect::Pipe),
        };
        self.expr(target)?;
        Ok(Some(redirect))
    }

    // ===== Variables =====

    fn local_slot(&self, name: &str) -> Option<u32> {
        self.function
            .and_then(|f| f.param_index(name))
            .map(|index| index as u32)
    }

    fn var_ref(&mut self, name: &str) -> VarRef {
        match self.local_slot(name) {
            Some(slot) => VarRef::Local(slot),
            None => VarRef::Global(self.tuples.layout_mut().intern(name)),
        }
    }

    /// A plain variable used as a scalar
    fn var_place(&mut self, name: &str) -> Place {
        if self.local_slot(name).is_none() {
            if let Some(special) = SpecialVar::from_name(name) {
                return Place::Special(special);
            }
        }
        Place::Var(self.var_ref(name))
    }

    fn array_ref(&mut self, name: &str, location: SourceLocation) -> Result<VarRef> {
        if self.local_slot(name).is_none() && SpecialVar::from_name(name).is_some() {
            return Err(Error::semantic(
                format!("cannot use special variable '{}' as an array", name),
                location,
            ));
        }
        Ok(self.var_ref(name))
    }

    /// A bare variable usable as an array argument
    fn argument_ref(&mut self, expr: &Expr) -> Option<VarRef> {
        let name = expr.as_var_name()?;
        if self.local_slot(name).is_none() && SpecialVar::from_name(name).is_some() {
            return None;
        }
        Some(self.var_ref(name))
    }

    /// Push a subscript, joining multi-dimensional keys with SUBSEP
    fn key(&mut self, indices: &[Expr], line: usize) -> Result<()> {
        for index in indices {
            self.expr(index)?;
        }
        if indices.len() > 1 {
            self.emit(Opcode::JoinKeys(indices.len()), line);
        }
        Ok(())
    }

    /// Push the index operand of an assignable expression and return its place
    fn lvalue(&mut self, expr: &Expr) -> Result<Place> {
        match expr {
            Expr::Var(name, _) => Ok(self.var_place(name)),
            Expr::Field(index, _) => {
                self.expr(index)?;
                Ok(Place::Field)
            }
            Expr::ArrayAccess {
                array,
                indices,
                location,
            } => {
                let array = self.array_ref(array, *location)?;
                self.key(indices, location.line)?;
                Ok(Place::Element(array))
            }
            Expr::Group(inner, _) => self.lvalue(inner),
            other => Err(Error::semantic("expression is not assignable", other.location())),
        }
    }

    // ===== Expressions =====

    fn expr(&mut self, expr: &Expr) -> Result<()> {
        let line = expr.location().line;
        match expr {
            Expr::Number(n, _) => {
                self.emit(Opcode::PushNumber(*n), line);
            }
            Expr::String(s, _) => {
                self.emit(Opcode::PushString(s.clone()), line);
            }
            Expr::Regex(source, _) => {
                let id = self.regex(source)?;
                self.emit(Opcode::MatchRecord(id), line);
            }
            Expr::Var(..) | Expr::Field(..) | Expr::ArrayAccess { .. } => {
                let place = self.lvalue(expr)?;
                self.emit(Opcode::Load(place), line);
            }
            Expr::Binary {
                left, op, right, ..
            } => self.binary(left, *op, right, line)?,
            Expr::Unary { op, operand, .. } => {
                self.expr(operand)?;
                let opcode = match op {
                    UnaryOp::Neg => Opcode::Negate,
                    UnaryOp::Pos => Opcode::UnaryPlus,
                    UnaryOp::Not => Opcode::Not,
                };
                self.emit(opcode, line);
            }
            Expr::Assign {
                target, op, value, ..
            } => {
                let place = self.lvalue(target)?;
                self.expr(value)?;
                let opcode = match op {
                    AssignOp::Assign => Opcode::Store(place),
                    AssignOp::AddAssign => compound(place, ArithOp::Add),
                    AssignOp::SubAssign => compound(place, ArithOp::Sub),
                    AssignOp::MulAssign => compound(place, ArithOp::Mul),
                    AssignOp::DivAssign => compound(place, ArithOp::Div),
                    AssignOp::ModAssign => compound(place, ArithOp::Mod),
                    AssignOp::PowAssign => compound(place, ArithOp::Pow),
                };
                self.emit(opcode, line);
            }
            Expr::PreIncrement(target, _) => self.update(target, UpdateOp::PreIncrement, line)?,
            Expr::PreDecrement(target, _) => self.update(target, UpdateOp::PreDecrement, line)?,
            Expr::PostIncrement(target, _) => self.update(target, UpdateOp::PostIncrement, line)?,
            Expr::PostDecrement(target, _) => self.update(target, UpdateOp::PostDecrement, line)?,
            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
                ..
            } => {
                let otherwise = self.tuples.new_label();
                let end = self.tuples.new_label();
                self.expr(condition)?;
                self.emit(Opcode::JumpIfFalse(otherwise), line);
                self.expr(then_expr)?;
                self.emit(Opcode::Jump(end), line);
                // only one branch's value reaches `end`
                self.depth -= 1;
                self.tuples.place_label(otherwise);
                self.expr(else_expr)?;
                self.tuples.place_label(end);
            }
            Expr::Call {
                name,
                args,
                target,
                location,
            } => self.call(name, args, target, *location)?,
            Expr::InArray {
                key,
                array,
                location,
            } => {
                let array = self.array_ref(array, *location)?;
                self.key(key, line)?;
                self.emit(Opcode::InArray(array), line);
            }
            Expr::Match {
                expr,
                pattern,
                negated,
                ..
            } => {
                self.expr(expr)?;
                self.regex_operand(pattern)?;
                self.emit(Opcode::Match { negated: *negated }, line);
            }
            Expr::Getline { var, input, .. } => {
                let place = match var {
                    Some(var) => Some(self.lvalue(var)?),
                    None => None,
                };
                let source = match input {
                    None => GetlineSource::Main,
                    Some(GetlineInput::File(file)) => {
                        self.expr(file)?;
                        GetlineSource::File
                    }
                    Some(GetlineInput::Pipe(command)) => {
                        self.expr(command)?;
                        GetlineSource::Command
                    }
                };
                self.emit(Opcode::Getline { source, place }, line);
            }
            Expr::Group(inner, _) => self.expr(inner)?,
        }
        Ok(())
    }

    fn binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr, line: usize) -> Result<()> {
        let opcode = match op {
            BinaryOp::And | BinaryOp::Or => return self.short_circuit(left, op, right, line),
            BinaryOp::Add => Opcode::Arith(ArithOp::Add),
            BinaryOp::Sub => Opcode::Arith(ArithOp::Sub),
            BinaryOp::Mul => Opcode::Arith(ArithOp::Mul),
            BinaryOp::Div => Opcode::Arith(ArithOp::Div),
            BinaryOp::Mod => Opcode::Arith(ArithOp::Mod),
            BinaryOp::Pow => Opcode::Arith(ArithOp::Pow),
            BinaryOp::Lt => Opcode::Compare(CmpOp::Lt),
            BinaryOp::Le => Opcode::Compare(CmpOp::Le),
            BinaryOp::Gt => Opcode::Compare(CmpOp::Gt),
            BinaryOp::Ge => Opcode::Compare(CmpOp::Ge),
            BinaryOp::Eq => Opcode::Compare(CmpOp::Eq),
            BinaryOp::Ne => Opcode::Compare(CmpOp::Ne),
            BinaryOp::Concat => Opcode::Concat,
        };
        self.expr(left)?;
        self.expr(right)?;
        self.emit(opcode, line);
        Ok(())
    }

    /// `&&` and `||` yield 1 or 0 and skip the right operand when decided
    fn short_circuit(&mut self, left: &Expr, op: BinaryOp, right: &Expr, line: usize) -> Result<()> {
        let decided = self.tuples.new_label();
        let end = self.tuples.new_label();
        let (jump, decided_value, otherwise): (fn(Label) -> Opcode, f64, f64) = match op {
            BinaryOp::And => (Opcode::JumpIfFalse, 0.0, 1.0),
            _ => (Opcode::JumpIfTrue, 1.0, 0.0),
        };

        self.expr(left)?;
        self.emit(jump(decided), line);
        self.expr(right)?;
        self.emit(jump(decided), line);
        self.emit(Opcode::PushNumber(otherwise), line);
        self.emit(Opcode::Jump(end), line);
        self.depth -= 1;
        self.tuples.place_label(decided);
        self.emit(Opcode::PushNumber(decided_value), line);
        self.tuples.place_label(end);
        Ok(())
    }

    fn update(&mut self, target: &Expr, op: UpdateOp, line: usize) -> Result<()> {
        let place = self.lvalue(target)?;
        self.emit(Opcode::Update { place, op }, line);
        Ok(())
    }

    /// Push a regex operand: literals stay compiled, anything else is
    /// converted at run time
    fn regex_operand(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Regex(source, location) => {
                let id = self.regex(source)?;
                self.emit(Opcode::PushRegex(id), location.line);
                Ok(())
            }
            Expr::Group(inner, _) if matches!(inner.as_ref(), Expr::Regex(..)) => {
                self.regex_operand(inner)
            }
            other => self.expr(other),
        }
    }

    fn call(
        &mut self,
        name: &str,
        args: &[Expr],
        target: &CallTarget,
        location: SourceLocation,
    ) -> Result<()> {
        let line = location.line;
        match target {
            CallTarget::Builtin(builtin) => self.builtin(*builtin, args, line),
            CallTarget::User { id, .. } => {
                let program = self.program;
                let callee = &program.functions[*id];
                for (index, arg) in args.iter().enumerate() {
                    match self.argument_ref(arg) {
                        Some(var) => {
                            let array = callee.array_params.get(index).copied().unwrap_or(false);
                            self.emit(Opcode::PushArgument { var, array }, line);
                        }
                        None => self.expr(arg)?,
                    }
                }
                self.emit(
                    Opcode::Call {
                        function: *id,
                        entry: self.entries[*id],
                        argc: args.len(),
                    },
                    line,
                );
                Ok(())
            }
            CallTarget::Extension(extension) => {
                for arg in args {
                    self.expr(arg)?;
                }
                self.emit(
                    Opcode::CallExtension {
                        name: extension.clone(),
                        argc: args.len(),
                    },
                    line,
                );
                Ok(())
            }
            CallTarget::Unresolved => Err(Error::semantic(
                format!("unresolved function '{}'", name),
                location,
            )),
        }
    }

    fn builtin(&mut self, builtin: Builtin, args: &[Expr], line: usize) -> Result<()> {
        match builtin {
            Builtin::Length | Builtin::Dump if args.len() == 1 => {
                // the argument may name an array
                match self.argument_ref(&args[0]) {
                    Some(var) => {
                        self.emit(Opcode::PushArgument { var, array: false }, line);
                    }
                    None => self.expr(&args[0])?,
                }
            }
            Builtin::Length => {
                self.emit(Opcode::PushNumber(0.0), line);
                self.emit(Opcode::Load(Place::Field), line);
                self.emit(Opcode::CallBuiltin { builtin, argc: 1 }, line);
                return Ok(());
            }
            Builtin::Split => {
                let array = match args[1].as_var_name() {
                    Some(name) => self.array_ref(name, args[1].location())?,
                    None => {
                        return Err(Error::semantic(
                            "split: second argument must be an array name",
                            args[1].location(),
                        ));
                    }
                };
                self.expr(&args[0])?;
                if let Some(separator) = args.get(2) {
                    self.regex_operand(separator)?;
                }
                self.emit(
                    Opcode::Split {
                        array,
                        has_separator: args.len() == 3,
                    },
                    line,
                );
                return Ok(());
            }
            Builtin::Sub | Builtin::Gsub => {
                let place = match args.get(2) {
                    Some(target) => self.lvalue(target)?,
                    None => {
                        self.emit(Opcode::PushNumber(0.0), line);
                        Place::Field
                    }
                };
                self.regex_operand(&args[0])?;
                self.expr(&args[1])?;
                self.emit(
                    Opcode::Substitute {
                        place,
                        global: builtin == Builtin::Gsub,
                    },
                    line,
                );
                return Ok(());
            }
            Builtin::Match => {
                self.expr(&args[0])?;
                self.regex_operand(&args[1])?;
            }
            _ => {
                for arg in args {
                    self.expr(arg)?;
                }
            }
        }
        self.emit(
            Opcode::CallBuiltin {
                builtin,
                argc: args.len(),
            },
            line,
        );
        Ok(())
    }
}

fn compound(place: Place, op: ArithOp) -> Opcode {
    Opcode::Update {
        place,
        op: UpdateOp::Compound(op),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::semantic::SyntaxTree;

    fn compile(source: &str) -> AwkTuples {
        let tokens = Lexer::new(source).tokenize().unwrap();
        let mut tree = SyntaxTree::new(Parser::new(tokens).parse().unwrap());
        tree.semantic_analysis().unwrap();
        tree.semantic_analysis().unwrap();
        let mut tuples = generate(tree.program()).unwrap();
        tuples.post_process();
        tuples
    }

    fn opcodes(tuples: &AwkTuples) -> Vec<&Opcode> {
        tuples.tuples().iter().map(Tuple::opcode).collect()
    }

    #[test]
    fn test_begin_only_program() {
        let tuples = compile(r#"BEGIN { print "hi" }"#);
        assert_eq!(tuples.begin(), Some(0));
        assert_eq!(tuples.main(), None);
        assert_eq!(tuples.end(), None);
        assert_eq!(
            opcodes(&tuples),
            vec![
                &Opcode::PushString("hi".to_string()),
                &Opcode::Print {
                    argc: 1,
                    redirect: None
                },
                &Opcode::PhaseEnd,
            ]
        );
    }

    #[test]
    fn test_input_loop_for_begin_only_program() {
        let tokens = Lexer::new("BEGIN { x = 1 }").tokenize().unwrap();
        let mut tree = SyntaxTree::new(Parser::new(tokens).parse().unwrap());
        tree.semantic_analysis().unwrap();
        let mut tuples = CodeGenerator::new(tree.program())
            .with_input_loop(true)
            .generate()
            .unwrap();
        tuples.post_process();
        let main = tuples.main().unwrap();
        assert!(matches!(
            tuples.get(main).unwrap().opcode(),
            Opcode::NextRecord { .. }
        ));
    }

    #[test]
    fn test_main_loop_shape() {
        let tuples = compile("// { print }");
        let main = tuples.main().unwrap();
        let fetch = tuples.get(main).unwrap();
        assert!(matches!(fetch.opcode(), Opcode::NextRecord { .. }));
        // end of input leaves through the phase end
        let eof = fetch.target().unwrap();
        assert_eq!(tuples.get(eof).unwrap().opcode(), &Opcode::PhaseEnd);
        // the wraparound jump returns to the fetch
        let wrap = tuples.get(eof - 1).unwrap();
        assert!(matches!(wrap.opcode(), Opcode::Jump(_)));
        assert_eq!(wrap.target(), Some(main));
    }

    #[test]
    fn test_end_rule_forces_main_loop() {
        let tuples = compile("END { print NR }");
        assert!(tuples.main().is_some());
        assert!(tuples.end().is_some());
    }

    #[test]
    fn test_rule_without_action_prints_record() {
        let tuples = compile("NR > 1");
        assert!(opcodes(&tuples).contains(&&Opcode::Print {
            argc: 0,
            redirect: None
        }));
    }

    #[test]
    fn test_globals_in_first_encounter_order() {
        let tuples = compile("BEGIN { b = 1; a = 2; b = 3; NR = 4 }");
        let names: Vec<&str> = tuples.layout().names().collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(tuples.layout().is_frozen());
    }

    #[test]
    fn test_function_body_ends_with_implicit_return() {
        let tuples = compile("function f(x) { x = 1 } BEGIN { f(2) }");
        let ops = opcodes(&tuples);
        let n = ops.len();
        assert_eq!(ops[n - 2], &Opcode::PushUninitialized);
        assert_eq!(ops[n - 1], &Opcode::Return);

        let call = tuples
            .tuples()
            .iter()
            .find(|t| matches!(t.opcode(), Opcode::Call { .. }))
            .unwrap();
        let entry = call.target().unwrap();
        // entry is the first tuple of the function body, after END/BEGIN
        assert!(entry > tuples.begin().unwrap());
        assert!(matches!(
            tuples.get(entry).unwrap().opcode(),
            Opcode::PushNumber(_)
        ));
    }

    #[test]
    fn test_array_argument_passed_by_reference() {
        let tuples = compile("function fill(a) { a[1] = 1 } BEGIN { fill(arr) }");
        assert!(opcodes(&tuples).contains(&&Opcode::PushArgument {
            var: VarRef::Global(0),
            array: true
        }));
    }

    #[test]
    fn test_locals_resolve_to_frame_slots() {
        let tuples = compile("function f(a, b) { return a + b } BEGIN { f(1, 2) }");
        let ops = opcodes(&tuples);
        assert!(ops.contains(&&Opcode::Load(Place::Var(VarRef::Local(0)))));
        assert!(ops.contains(&&Opcode::Load(Place::Var(VarRef::Local(1)))));
        assert!(tuples.layout().is_empty());
    }

    #[test]
    fn test_compiling_twice_gives_identical_links() {
        let source = "function f(n) { return n < 2 ? n : f(n-1) + f(n-2) }
                      /x/, /y/ { print f(NR) }
                      { for (k in seen) delete seen[k]; while (i < 3) i++ }";
        let first = compile(source);
        let second = compile(source);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.tuples().iter().zip(second.tuples()) {
            assert_eq!(a.target(), b.target());
            assert_eq!(a.next(), b.next());
        }
    }

    #[test]
    fn test_every_target_in_range() {
        let tuples = compile(
            "BEGIN { if (x) y = 1; else y = 2; do { z++ } while (z < 3) }
             { a = $1 && $2 || !$3 }
             END { for (;;) break }",
        );
        for tuple in tuples.tuples() {
            if let Some(target) = tuple.target() {
                assert!(target < tuples.len());
            }
        }
    }

    #[test]
    fn test_bad_regex_literal_fails() {
        let tokens = Lexer::new("/a(/ { print }").tokenize().unwrap();
        let mut tree = SyntaxTree::new(Parser::new(tokens).parse().unwrap());
        tree.semantic_analysis().unwrap();
        tree.semantic_analysis().unwrap();
        assert!(matches!(generate(tree.program()), Err(Error::Regex(_))));
    }

    #[test]
    fn test_special_variable_as_array_fails() {
        let tokens = Lexer::new("BEGIN { NR[1] = 2 }").tokenize().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        assert!(matches!(generate(&program), Err(Error::Semantic { .. })));
    }
}
