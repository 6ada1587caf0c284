//! The AWK virtual machine: executes a linked tuple queue.
//!
//! Execution runs in phases. BEGIN code runs first, then the main loop
//! reads every input record, then END code runs. Each phase is a run of
//! tuples ending in `PhaseEnd`; `exit` ends a phase early.

mod builtins;
mod record;
mod settings;
mod streams;

pub use settings::AwkSettings;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::rc::Rc;

use regex::Regex;
use tracing::{debug, trace, warn};

use crate::ere;
use crate::error::{Error, Result};
use crate::ext::ExtensionRegistry;
use crate::format::sprintf;
use crate::ir::{
    Address, ArithOp, AwkTuples, CmpOp, GetlineSource, Opcode, Place, Redirect, RegexId,
    SpecialVar, Tuple, UpdateOp, VarRef,
};
use crate::value::{DEFAULT_NUMBER_FORMAT, Value, compare_values};

use builtins::Random;
use record::{FieldSeparator, Record, RecordReader, RecordSeparator};
use settings::{split_assignment, unescape};
use streams::{InputStreams, OutputStreams};

type ArrayRef = Rc<RefCell<HashMap<String, Value>>>;

/// Where the AVM is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Begin,
    MainLoop,
    End,
    Done,
    Error,
}

/// Result of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i32,
    /// Whether the program executed `exit`
    pub explicit: bool,
}

/// How a phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    PhaseEnd,
    Exit(i32),
}

enum Step {
    Next,
    Jump(Address),
    Done(Flow),
}

/// A variable slot. Untyped slots become scalars or arrays on first use.
#[derive(Debug, Clone, Default)]
enum Slot {
    #[default]
    Untyped,
    Scalar(Value),
    Array(ArrayRef),
}

#[derive(Debug, Clone)]
enum Operand {
    Scalar(Value),
    Array(ArrayRef),
    Regex(RegexId),
}

struct ForIn {
    array: ArrayRef,
    keys: Vec<String>,
    position: usize,
}

struct Frame {
    function: Option<usize>,
    locals: Vec<Slot>,
    return_address: Option<Address>,
    stack_base: usize,
    iterators: Vec<ForIn>,
}

impl Frame {
    /// The frame phase code runs in
    fn root() -> Self {
        Self {
            function: None,
            locals: Vec::new(),
            return_address: None,
            stack_base: 0,
            iterators: Vec::new(),
        }
    }
}

struct Specials {
    nr: f64,
    fnr: f64,
    fs: String,
    ofs: String,
    rs: String,
    ors: String,
    ofmt: String,
    convfmt: String,
    subsep: String,
    filename: String,
    rstart: f64,
    rlength: f64,
}

impl Default for Specials {
    fn default() -> Self {
        Self {
            nr: 0.0,
            fnr: 0.0,
            fs: " ".to_string(),
            ofs: " ".to_string(),
            rs: "\n".to_string(),
            ors: "\n".to_string(),
            ofmt: DEFAULT_NUMBER_FORMAT.to_string(),
            convfmt: DEFAULT_NUMBER_FORMAT.to_string(),
            subsep: "\x1c".to_string(),
            filename: String::new(),
            rstart: 0.0,
            rlength: -1.0,
        }
    }
}

/// Settings consumed when the run starts
#[derive(Default)]
struct Startup {
    field_separator: Option<String>,
    record_separator: Option<String>,
    variables: Vec<(String, String)>,
    program_name: String,
    environment: Option<HashMap<String, String>>,
}

/// The main input: operands in order, or the settings input
struct MainInput {
    stdin: Option<Box<dyn BufRead>>,
    current: Option<RecordReader>,
    operands: Vec<String>,
    /// Next ARGV index to look at
    next_operand: usize,
    saw_file: bool,
}

/// The AWK virtual machine
pub struct Avm {
    extensions: ExtensionRegistry,
    startup: Startup,
    phase: Phase,

    globals: Vec<Slot>,
    names: Vec<String>,
    function_names: Vec<String>,
    frames: Vec<Frame>,
    stack: Vec<Operand>,

    vars: Specials,
    field_separator: FieldSeparator,
    record_separator: RecordSeparator,
    record: Record,
    ranges: Vec<bool>,
    regex_cache: HashMap<String, Regex>,
    random: Random,
    exit_code: i32,

    argv: Option<ArrayRef>,
    argc: Option<usize>,
    input: MainInput,
    output: BufWriter<Box<dyn Write>>,
    outputs: OutputStreams,
    inputs: InputStreams,
}

impl Avm {
    pub fn new(settings: AwkSettings, extensions: ExtensionRegistry) -> Self {
        let AwkSettings {
            input,
            output,
            field_separator,
            record_separator,
            variables,
            operands,
            program_name,
            environment,
        } = settings;
        Self {
            extensions,
            startup: Startup {
                field_separator,
                record_separator,
                variables,
                program_name,
                environment,
            },
            phase: Phase::Init,
            globals: Vec::new(),
            names: Vec::new(),
            function_names: Vec::new(),
            frames: vec![Frame::root()],
            stack: Vec::new(),
            vars: Specials::default(),
            field_separator: FieldSeparator::Whitespace,
            record_separator: RecordSeparator::Newline,
            record: Record::default(),
            ranges: Vec::new(),
            regex_cache: HashMap::new(),
            random: Random::new(0.0),
            exit_code: 0,
            argv: None,
            argc: None,
            input: MainInput {
                stdin: Some(input),
                current: None,
                operands,
                next_operand: 1,
                saw_file: false,
            },
            output: BufWriter::new(output),
            outputs: OutputStreams::default(),
            inputs: InputStreams::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run a linked program to completion. An AVM runs one program once.
    pub fn interpret(&mut self, tuples: &AwkTuples) -> Result<ExitStatus> {
        if !tuples.is_linked() {
            return Err(Error::invalid_argument("tuple queue has not been linked"));
        }
        if self.phase != Phase::Init {
            return Err(Error::invalid_argument("AVM has already run a program"));
        }

        let result = self.prepare(tuples).and_then(|()| self.run_phases(tuples));
        let closed = self.shutdown();
        match result.and_then(|explicit| closed.map(|()| explicit)) {
            Ok(explicit) => {
                self.phase = Phase::Done;
                debug!(code = self.exit_code, explicit, "AVM finished");
                Ok(ExitStatus {
                    code: self.exit_code,
                    explicit,
                })
            }
            Err(e) => {
                self.phase = Phase::Error;
                Err(e)
            }
        }
    }

    fn prepare(&mut self, tuples: &AwkTuples) -> Result<()> {
        let layout = tuples.layout();
        self.names = layout.names().map(String::from).collect();
        self.function_names = tuples.functions().iter().map(|f| f.name.clone()).collect();
        self.globals = vec![Slot::Untyped; layout.len()];
        self.ranges = vec![false; tuples.range_count()];

        let startup = std::mem::take(&mut self.startup);
        if let Some(fs) = startup.field_separator {
            self.set_special(SpecialVar::Fs, Value::from_string(fs))?;
        }
        if let Some(rs) = startup.record_separator {
            self.set_special(SpecialVar::Rs, Value::from_string(rs))?;
        }

        let operands = self.input.operands.clone();
        if let Some(offset) = layout.offset("ARGV") {
            let mut argv = HashMap::new();
            argv.insert("0".to_string(), Value::from_string(startup.program_name));
            for (i, operand) in operands.iter().enumerate() {
                argv.insert((i + 1).to_string(), Value::from_input(operand.as_str()));
            }
            let argv = Rc::new(RefCell::new(argv));
            self.globals[offset as usize] = Slot::Array(argv.clone());
            self.argv = Some(argv);
        }
        if let Some(offset) = layout.offset("ARGC") {
            let argc = Value::from_number((operands.len() + 1) as f64);
            self.globals[offset as usize] = Slot::Scalar(argc);
            self.argc = Some(offset as usize);
        }
        if let Some(offset) = layout.offset("ENVIRON") {
            let environment = startup
                .environment
                .unwrap_or_else(|| std::env::vars().collect());
            let environ = environment
                .into_iter()
                .map(|(name, value)| (name, Value::from_input(value)))
                .collect();
            self.globals[offset as usize] = Slot::Array(Rc::new(RefCell::new(environ)));
        }

        for (name, value) in &startup.variables {
            self.assign_variable(name, value)?;
        }
        debug!(
            globals = self.globals.len(),
            functions = self.function_names.len(),
            tuples = tuples.len(),
            "AVM prepared"
        );
        Ok(())
    }

    /// Returns whether `exit` ran
    fn run_phases(&mut self, tuples: &AwkTuples) -> Result<bool> {
        let mut exited = false;
        if let Some(begin) = tuples.begin() {
            self.enter(Phase::Begin);
            exited = matches!(self.run(tuples, begin)?, Flow::Exit(_));
        }
        if !exited {
            if let Some(main) = tuples.main() {
                self.enter(Phase::MainLoop);
                exited = matches!(self.run(tuples, main)?, Flow::Exit(_));
            }
        }
        // END runs even after exit; exit inside END stops it
        if let Some(end) = tuples.end() {
            self.enter(Phase::End);
            if let Flow::Exit(_) = self.run(tuples, end)? {
                exited = true;
            }
        }
        Ok(exited)
    }

    fn enter(&mut self, phase: Phase) {
        debug!(?phase, "entering phase");
        self.phase = phase;
    }

    fn shutdown(&mut self) -> Result<()> {
        self.output.flush()?;
        self.outputs.close_all()?;
        self.inputs.close_all();
        Ok(())
    }

    fn run(&mut self, tuples: &AwkTuples, start: Address) -> Result<Flow> {
        let mut address = start;
        loop {
            let tuple = tuples
                .get(address)
                .ok_or_else(|| Error::runtime(format!("no tuple at address {}", address)))?;
            let step = self
                .execute(tuples, tuple)
                .map_err(|e| e.at_line(tuple.line()))?;
            address = match step {
                Step::Next => tuple
                    .next()
                    .ok_or_else(|| Error::runtime("execution ran past the last tuple"))?,
                Step::Jump(target) => target,
                Step::Done(flow) => {
                    if let Flow::Exit(code) = flow {
                        trace!(code, "exit");
                        self.frames.truncate(1);
                        self.frames[0].iterators.clear();
                    }
                    self.stack.clear();
                    return Ok(flow);
                }
            };
        }
    }

    fn execute(&mut self, tuples: &AwkTuples, tuple: &Tuple) -> Result<Step> {
        match tuple.opcode() {
            Opcode::PushNumber(n) => self.push(Value::from_number(*n)),
            Opcode::PushString(s) => self.push(Value::from_string(s.as_str())),
            Opcode::PushUninitialized => self.push(Value::Uninitialized),
            Opcode::PushRegex(id) => self.stack.push(Operand::Regex(*id)),
            Opcode::Pop => {
                self.pop()?;
            }

            Opcode::Load(place) => {
                let index = self.pop_index(place)?;
                let value = self.read_place(*place, index.as_ref())?;
                self.push(value);
            }
            Opcode::Store(place) => {
                let value = self.pop_value()?;
                let index = self.pop_index(place)?;
                self.write_place(*place, index.as_ref(), value.clone())?;
                self.push(value);
            }
            Opcode::Update { place, op } => {
                let operand = match op {
                    UpdateOp::Compound(_) => self.pop_value()?.to_number(),
                    _ => 0.0,
                };
                let index = self.pop_index(place)?;
                let old = self.read_place(*place, index.as_ref())?.to_number();
                let (new, result) = match op {
                    UpdateOp::Compound(op) => {
                        let new = arith(*op, old, operand)?;
                        (new, new)
                    }
                    UpdateOp::PreIncrement => (old + 1.0, old + 1.0),
                    UpdateOp::PreDecrement => (old - 1.0, old - 1.0),
                    UpdateOp::PostIncrement => (old + 1.0, old),
                    UpdateOp::PostDecrement => (old - 1.0, old),
                };
                self.write_place(*place, index.as_ref(), Value::from_number(new))?;
                self.push(Value::from_number(result));
            }

            Opcode::Arith(op) => {
                let right = self.pop_value()?.to_number();
                let left = self.pop_value()?.to_number();
                self.push(Value::from_number(arith(*op, left, right)?));
            }
            Opcode::Negate => {
                let value = self.pop_value()?;
                self.push(Value::from_number(-value.to_number()));
            }
            Opcode::UnaryPlus => {
                let value = self.pop_value()?;
                self.push(Value::from_number(value.to_number()));
            }
            Opcode::Not => {
                let value = self.pop_value()?;
                self.push(Value::from_bool(!value.is_truthy()));
            }
            Opcode::Concat => {
                let right = self.pop_value()?;
                let left = self.pop_value()?;
                let mut text = self.string(&left);
                text.push_str(&right.as_str(&self.vars.convfmt));
                self.push(Value::from_string(text));
            }
            Opcode::Compare(op) => {
                let right = self.pop_value()?;
                let left = self.pop_value()?;
                let ordering = compare_values(&left, &right, &self.vars.convfmt);
                let result = match op {
                    CmpOp::Lt => ordering.is_lt(),
                    CmpOp::Le => ordering.is_le(),
                    CmpOp::Gt => ordering.is_gt(),
                    CmpOp::Ge => ordering.is_ge(),
                    CmpOp::Eq => ordering.is_eq(),
                    CmpOp::Ne => ordering.is_ne(),
                };
                self.push(Value::from_bool(result));
            }
            Opcode::Match { negated } => {
                let pattern = self.pop()?;
                let regex = self.regex(tuples, pattern)?;
                let subject = self.pop_value()?;
                let matched = regex.is_match(&subject.as_str(&self.vars.convfmt));
                self.push(Value::from_bool(matched != *negated));
            }
            Opcode::MatchRecord(id) => {
                let matched = tuples.regex(*id).is_match(self.record.text());
                self.push(Value::from_bool(matched));
            }

            Opcode::JoinKeys(n) => {
                let keys = self.pop_values(*n)?;
                let key = keys
                    .iter()
                    .map(|k| self.string(k))
                    .collect::<Vec<_>>()
                    .join(self.vars.subsep.as_str());
                self.push(Value::from_string(key));
            }
            Opcode::InArray(var) => {
                let key = self.pop_value()?;
                let key = self.string(&key);
                let present = self.array(*var)?.borrow().contains_key(&key);
                self.push(Value::from_bool(present));
            }
            Opcode::DeleteElement(var) => {
                let key = self.pop_value()?;
                let key = self.string(&key);
                self.array(*var)?.borrow_mut().remove(&key);
            }
            Opcode::DeleteArray(var) => self.array(*var)?.borrow_mut().clear(),

            Opcode::Jump(_) => return Ok(Step::Jump(target(tuple)?)),
            Opcode::JumpIfFalse(_) => {
                if !self.pop_value()?.is_truthy() {
                    return Ok(Step::Jump(target(tuple)?));
                }
            }
            Opcode::JumpIfTrue(_) => {
                if self.pop_value()?.is_truthy() {
                    return Ok(Step::Jump(target(tuple)?));
                }
            }
            Opcode::RangeActive { range, .. } => {
                if self.range(*range)? {
                    return Ok(Step::Jump(target(tuple)?));
                }
            }
            Opcode::SetRange { range, active } => {
                self.range(*range)?;
                self.ranges[*range] = *active;
            }

            Opcode::ForInStart(var) => {
                let array = self.array(*var)?;
                let keys = array.borrow().keys().cloned().collect();
                self.frame()?.iterators.push(ForIn {
                    array,
                    keys,
                    position: 0,
                });
            }
            Opcode::ForInNext { var, .. } => {
                let iterator = self
                    .frame()?
                    .iterators
                    .last_mut()
                    .ok_or_else(|| Error::runtime("for-in step without a loop"))?;
                let mut next = None;
                while let Some(key) = iterator.keys.get(iterator.position) {
                    iterator.position += 1;
                    // keys deleted during the loop are skipped
                    if iterator.array.borrow().contains_key(key) {
                        next = Some(key.clone());
                        break;
                    }
                }
                match next {
                    Some(key) => self.write_place(*var, None, Value::from_string(key))?,
                    None => return Ok(Step::Jump(target(tuple)?)),
                }
            }
            Opcode::ForInEnd => {
                self.frame()?.iterators.pop();
            }

            Opcode::PushArgument { var, array } => {
                let operand = match (self.slot(*var)?.clone(), *array) {
                    (Slot::Array(a), _) => Operand::Array(a),
                    (Slot::Scalar(v), _) => Operand::Scalar(v),
                    (Slot::Untyped, true) => Operand::Array(self.array(*var)?),
                    (Slot::Untyped, false) => Operand::Scalar(Value::Uninitialized),
                };
                self.stack.push(operand);
            }
            Opcode::Call { function, argc, .. } => {
                let entry = target(tuple)?;
                let arity = tuples
                    .functions()
                    .get(*function)
                    .map(|f| f.arity)
                    .ok_or_else(|| Error::runtime(format!("no function #{}", function)))?;
                let args = self.pop_operands(*argc)?;
                let mut locals: Vec<Slot> = args
                    .into_iter()
                    .map(|arg| match arg {
                        Operand::Array(a) => Slot::Array(a),
                        // an uninitialized argument may still become an array
                        Operand::Scalar(Value::Uninitialized) => Slot::Untyped,
                        Operand::Scalar(v) => Slot::Scalar(v),
                        Operand::Regex(id) => {
                            Slot::Scalar(Value::from_string(tuples.regex(id).as_str()))
                        }
                    })
                    .collect();
                if locals.len() < arity {
                    locals.resize(arity, Slot::Untyped);
                }
                trace!(function = %self.function_name(*function), "call");
                self.frames.push(Frame {
                    function: Some(*function),
                    locals,
                    return_address: tuple.next(),
                    stack_base: self.stack.len(),
                    iterators: Vec::new(),
                });
                return Ok(Step::Jump(entry));
            }
            Opcode::CallBuiltin { builtin, argc } => {
                let args = self.pop_operands(*argc)?;
                let value = self.call_builtin(tuples, *builtin, args)?;
                self.push(value);
            }
            Opcode::CallExtension { name, argc } => {
                let args = self.pop_values(*argc)?;
                let handler = self
                    .extensions
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::runtime(format!("unknown extension function '{}'", name)))?;
                let value = handler(args.as_slice())?;
                self.push(value);
            }
            Opcode::Return => {
                let value = self.pop_value()?;
                if self.frames.len() < 2 {
                    return Err(Error::runtime("return outside a function"));
                }
                let frame = self
                    .frames
                    .pop()
                    .ok_or_else(|| Error::runtime("return outside a function"))?;
                self.stack.truncate(frame.stack_base);
                self.push(value);
                let address = frame
                    .return_address
                    .ok_or_else(|| Error::runtime("function has no return address"))?;
                return Ok(Step::Jump(address));
            }

            Opcode::Split {
                array,
                has_separator,
            } => {
                let separator = if *has_separator {
                    Some(self.pop()?)
                } else {
                    None
                };
                let text = self.pop_value()?;
                let count = self.split(tuples, *array, text, separator)?;
                self.push(Value::from_number(count as f64));
            }
            Opcode::Substitute { place, global } => {
                let replacement = self.pop_value()?;
                let pattern = self.pop()?;
                let regex = self.regex(tuples, pattern)?;
                let index = self.pop_index(place)?;
                let count = self.substitute(*place, index, &regex, replacement, *global)?;
                self.push(Value::from_number(count as f64));
            }
            Opcode::Getline { source, place } => {
                let result = self.getline(*source, *place)?;
                self.push(Value::from_number(result));
            }

            Opcode::Print { argc, redirect } => {
                let destination = self.pop_destination(*redirect)?;
                let values = self.pop_values(*argc)?;
                let mut text = if values.is_empty() {
                    self.record.text().to_string()
                } else {
                    values
                        .iter()
                        .map(|v| v.as_str(&self.vars.ofmt).into_owned())
                        .collect::<Vec<_>>()
                        .join(self.vars.ofs.as_str())
                };
                text.push_str(&self.vars.ors);
                self.write_output(destination, &text)?;
            }
            Opcode::Printf { argc, redirect } => {
                let destination = self.pop_destination(*redirect)?;
                let values = self.pop_values(*argc)?;
                let (format, args) = values
                    .split_first()
                    .ok_or_else(|| Error::runtime("printf: no format"))?;
                let text = sprintf(&self.string(format), args, &self.vars.convfmt);
                self.write_output(destination, &text)?;
            }

            Opcode::Next => {
                if self.phase != Phase::MainLoop {
                    return Err(Error::runtime("next used in BEGIN or END"));
                }
                self.frames.truncate(1);
                self.frames[0].iterators.clear();
                self.stack.clear();
                let main = tuples
                    .main()
                    .ok_or_else(|| Error::runtime("next without a main loop"))?;
                return Ok(Step::Jump(main));
            }
            Opcode::Exit { has_code } => {
                if *has_code {
                    self.exit_code = self.pop_value()?.to_number() as i32;
                }
                return Ok(Step::Done(Flow::Exit(self.exit_code)));
            }
            Opcode::NextRecord { .. } => match self.next_main_record()? {
                Some(text) => {
                    self.vars.nr += 1.0;
                    self.vars.fnr += 1.0;
                    trace!(nr = self.vars.nr, "record");
                    self.set_record(text);
                }
                None => return Ok(Step::Jump(target(tuple)?)),
            },
            Opcode::PhaseEnd => return Ok(Step::Done(Flow::PhaseEnd)),
        }
        Ok(Step::Next)
    }

    // ===== Operand stack =====

    fn push(&mut self, value: Value) {
        self.stack.push(Operand::Scalar(value));
    }

    fn pop(&mut self) -> Result<Operand> {
        self.stack
            .pop()
            .ok_or_else(|| Error::runtime("operand stack underflow"))
    }

    fn pop_value(&mut self) -> Result<Value> {
        let operand = self.pop()?;
        scalar(operand)
    }

    fn pop_operands(&mut self, n: usize) -> Result<Vec<Operand>> {
        if self.stack.len() < n {
            return Err(Error::runtime("operand stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop_values(&mut self, n: usize) -> Result<Vec<Value>> {
        self.pop_operands(n)?.into_iter().map(scalar).collect()
    }

    fn pop_index(&mut self, place: &Place) -> Result<Option<Value>> {
        if place.is_indexed() {
            self.pop_value().map(Some)
        } else {
            Ok(None)
        }
    }

    fn pop_destination(&mut self, redirect: Option<Redirect>) -> Result<Option<(String, Redirect)>> {
        match redirect {
            Some(redirect) => {
                let name = self.pop_value()?;
                Ok(Some((self.string(&name), redirect)))
            }
            None => Ok(None),
        }
    }

    /// String form of a value, numbers through CONVFMT
    fn string(&self, value: &Value) -> String {
        value.to_string_with_format(&self.vars.convfmt)
    }

    // ===== Variables =====

    fn frame(&mut self) -> Result<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| Error::runtime("no active frame"))
    }

    fn slot(&mut self, var: VarRef) -> Result<&mut Slot> {
        let slot = match var {
            VarRef::Global(offset) => self.globals.get_mut(offset as usize),
            VarRef::Local(index) => self
                .frames
                .last_mut()
                .and_then(|frame| frame.locals.get_mut(index as usize)),
        };
        slot.ok_or_else(|| Error::runtime(format!("no variable slot {}", var)))
    }

    fn function_name(&self, function: usize) -> &str {
        self.function_names
            .get(function)
            .map(String::as_str)
            .unwrap_or("?")
    }

    fn var_name(&self, var: VarRef) -> String {
        match var {
            VarRef::Global(offset) => self
                .names
                .get(offset as usize)
                .cloned()
                .unwrap_or_else(|| var.to_string()),
            VarRef::Local(index) => {
                let function = self
                    .frames
                    .last()
                    .and_then(|frame| frame.function)
                    .map(|f| self.function_name(f))
                    .unwrap_or("?");
                format!("parameter {} of {}", index + 1, function)
            }
        }
    }

    fn load_var(&mut self, var: VarRef) -> Result<Value> {
        let value = match self.slot(var)? {
            Slot::Untyped => Some(Value::Uninitialized),
            Slot::Scalar(value) => Some(value.clone()),
            Slot::Array(_) => None,
        };
        value.ok_or_else(|| {
            Error::runtime(format!(
                "attempt to use array {} in a scalar context",
                self.var_name(var)
            ))
        })
    }

    fn store_var(&mut self, var: VarRef, value: Value) -> Result<()> {
        if matches!(self.slot(var)?, Slot::Array(_)) {
            return Err(Error::runtime(format!(
                "attempt to assign to array {}",
                self.var_name(var)
            )));
        }
        *self.slot(var)? = Slot::Scalar(value);
        Ok(())
    }

    /// The array in `var`, created if the slot is untyped
    fn array(&mut self, var: VarRef) -> Result<ArrayRef> {
        let slot = self.slot(var)?;
        let array = match slot {
            Slot::Array(array) => Some(array.clone()),
            Slot::Untyped => {
                let array = ArrayRef::default();
                *slot = Slot::Array(array.clone());
                Some(array)
            }
            Slot::Scalar(_) => None,
        };
        array.ok_or_else(|| {
            Error::runtime(format!(
                "attempt to use scalar {} as an array",
                self.var_name(var)
            ))
        })
    }

    fn range(&self, range: usize) -> Result<bool> {
        self.ranges
            .get(range)
            .copied()
            .ok_or_else(|| Error::runtime(format!("no range #{}", range)))
    }

    fn read_place(&mut self, place: Place, index: Option<&Value>) -> Result<Value> {
        match place {
            Place::Var(var) => self.load_var(var),
            Place::Special(var) => Ok(self.special(var)),
            Place::Field => {
                let index = field_index(index)?;
                if index > self.record.nf() {
                    return Ok(Value::Uninitialized);
                }
                Ok(Value::from_input(self.record.get(index)))
            }
            Place::Element(var) => {
                let key = self.string(required(index)?);
                let array = self.array(var)?;
                let value = array.borrow_mut().entry(key).or_default().clone();
                Ok(value)
            }
        }
    }

    fn write_place(&mut self, place: Place, index: Option<&Value>, value: Value) -> Result<()> {
        match place {
            Place::Var(var) => self.store_var(var, value),
            Place::Special(var) => self.set_special(var, value),
            Place::Field => {
                let index = field_index(index)?;
                let text = self.string(&value);
                if index == 0 {
                    self.set_record(text);
                } else {
                    self.record.set_field(index, text, &self.vars.ofs);
                }
                Ok(())
            }
            Place::Element(var) => {
                let key = self.string(required(index)?);
                self.array(var)?.borrow_mut().insert(key, value);
                Ok(())
            }
        }
    }

    fn special(&self, var: SpecialVar) -> Value {
        let vars = &self.vars;
        match var {
            SpecialVar::Nr => Value::from_number(vars.nr),
            SpecialVar::Nf => Value::from_number(self.record.nf() as f64),
            SpecialVar::Fnr => Value::from_number(vars.fnr),
            SpecialVar::Fs => Value::from_string(vars.fs.as_str()),
            SpecialVar::Ofs => Value::from_string(vars.ofs.as_str()),
            SpecialVar::Rs => Value::from_string(vars.rs.as_str()),
            SpecialVar::Ors => Value::from_string(vars.ors.as_str()),
            SpecialVar::Ofmt => Value::from_string(vars.ofmt.as_str()),
            SpecialVar::Convfmt => Value::from_string(vars.convfmt.as_str()),
            SpecialVar::Subsep => Value::from_string(vars.subsep.as_str()),
            SpecialVar::Filename => Value::from_string(vars.filename.as_str()),
            SpecialVar::Rstart => Value::from_number(vars.rstart),
            SpecialVar::Rlength => Value::from_number(vars.rlength),
        }
    }

    fn set_special(&mut self, var: SpecialVar, value: Value) -> Result<()> {
        let text = self.string(&value);
        let vars = &mut self.vars;
        match var {
            SpecialVar::Nr => vars.nr = value.to_number(),
            SpecialVar::Fnr => vars.fnr = value.to_number(),
            SpecialVar::Nf => {
                let nf = value.to_number();
                if nf < 0.0 {
                    return Err(Error::runtime(format!("NF set to negative value {}", nf)));
                }
                self.record.set_nf(nf as usize, &vars.ofs);
            }
            SpecialVar::Fs => {
                self.field_separator = FieldSeparator::new(&text)?;
                vars.fs = text;
                self.record.resplit(&self.field_separator, vars.rs.is_empty());
            }
            SpecialVar::Rs => {
                self.record_separator = RecordSeparator::new(&text)?;
                vars.rs = text;
            }
            SpecialVar::Ofs => vars.ofs = text,
            SpecialVar::Ors => vars.ors = text,
            SpecialVar::Ofmt => vars.ofmt = text,
            SpecialVar::Convfmt => vars.convfmt = text,
            SpecialVar::Subsep => vars.subsep = text,
            SpecialVar::Filename => vars.filename = text,
            SpecialVar::Rstart => vars.rstart = value.to_number(),
            SpecialVar::Rlength => vars.rlength = value.to_number(),
        }
        Ok(())
    }

    /// `-v` and operand assignments. Names the program never mentions are
    /// ignored.
    fn assign_variable(&mut self, name: &str, value: &str) -> Result<()> {
        let value = Value::from_input(unescape(value));
        if let Some(special) = SpecialVar::from_name(name) {
            return self.set_special(special, value);
        }
        match self.names.iter().position(|n| n == name) {
            Some(offset) => self.store_var(VarRef::Global(offset as u32), value),
            None => {
                debug!(name, "ignoring assignment to a variable the program never uses");
                Ok(())
            }
        }
    }

    fn set_record(&mut self, text: String) {
        let paragraph = self.vars.rs.is_empty();
        self.record.set(text, &self.field_separator, paragraph);
    }

    /// Compiled regex for a pattern operand
    fn regex(&mut self, tuples: &AwkTuples, operand: Operand) -> Result<Regex> {
        match operand {
            Operand::Regex(id) => Ok(tuples.regex(id).clone()),
            Operand::Scalar(value) => {
                let pattern = self.string(&value);
                self.dynamic_regex(&pattern)
            }
            Operand::Array(_) => Err(Error::runtime("attempt to use array as a regex")),
        }
    }

    fn dynamic_regex(&mut self, pattern: &str) -> Result<Regex> {
        if let Some(regex) = self.regex_cache.get(pattern) {
            return Ok(regex.clone());
        }
        let regex = ere::compile(pattern)?;
        self.regex_cache.insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }

    // ===== Input =====

    /// The next record of the main input, moving through operands
    fn next_main_record(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(reader) = self.input.current.as_mut() {
                if let Some(text) = reader.next_record(&self.record_separator)? {
                    return Ok(Some(text));
                }
                self.input.current = None;
            }

            match self.next_operand() {
                Some(operand) => {
                    if let Some((name, value)) = split_assignment(&operand) {
                        self.assign_variable(name, value)?;
                        continue;
                    }
                    self.open_main_input(&operand)?;
                }
                None if !self.input.saw_file => {
                    // no file operands: read the input stream once
                    self.input.saw_file = true;
                    let Some(stdin) = self.input.stdin.take() else {
                        return Ok(None);
                    };
                    debug!("reading standard input");
                    self.vars.fnr = 0.0;
                    self.input.current = Some(RecordReader::new(stdin));
                }
                None => return Ok(None),
            }
        }
    }

    fn next_operand(&mut self) -> Option<String> {
        loop {
            let index = self.input.next_operand;
            let count = match self.argc {
                Some(offset) => match &self.globals[offset] {
                    Slot::Scalar(value) => value.to_number().max(0.0) as usize,
                    _ => 0,
                },
                None => self.input.operands.len() + 1,
            };
            if index >= count {
                return None;
            }
            self.input.next_operand += 1;
            let operand = match &self.argv {
                Some(argv) => argv
                    .borrow()
                    .get(&index.to_string())
                    .map(|v| self.string(v))
                    .unwrap_or_default(),
                None => self.input.operands.get(index - 1).cloned().unwrap_or_default(),
            };
            if !operand.is_empty() {
                return Some(operand);
            }
        }
    }

    fn open_main_input(&mut self, name: &str) -> Result<()> {
        self.input.saw_file = true;
        let reader: Box<dyn BufRead> = if name == "-" {
            match self.input.stdin.take() {
                Some(stdin) => stdin,
                None => Box::new(io::empty()),
            }
        } else {
            let file = File::open(name)
                .map_err(|e| Error::Io(io::Error::new(e.kind(), format!("{}: {}", name, e))))?;
            Box::new(BufReader::new(file))
        };
        debug!(name, "opened input file");
        self.vars.filename = name.to_string();
        self.vars.fnr = 0.0;
        self.input.current = Some(RecordReader::new(reader));
        Ok(())
    }

    /// Returns 1 on success, 0 at end of input, -1 when the source cannot
    /// be opened
    fn getline(&mut self, source: GetlineSource, place: Option<Place>) -> Result<f64> {
        let name = match source {
            GetlineSource::Main => None,
            GetlineSource::File | GetlineSource::Command => {
                let name = self.pop_value()?;
                Some(self.string(&name))
            }
        };
        let index = match &place {
            Some(place) => self.pop_index(place)?,
            None => None,
        };

        let record = match (source, name) {
            (GetlineSource::File, Some(name)) => match self.inputs.file(&name) {
                Ok(reader) => reader.next_record(&self.record_separator)?,
                Err(e) => {
                    warn!(file = %name, error = %e, "getline cannot open file");
                    return Ok(-1.0);
                }
            },
            (GetlineSource::Command, Some(command)) => {
                // earlier output must reach the terminal before the command's
                self.output.flush()?;
                self.outputs.flush_all()?;
                match self.inputs.command(&command) {
                    Ok(reader) => reader.next_record(&self.record_separator)?,
                    Err(e) => {
                        warn!(command = %command, error = %e, "getline cannot run command");
                        return Ok(-1.0);
                    }
                }
            }
            _ => self.next_main_record()?,
        };
        let Some(text) = record else {
            return Ok(0.0);
        };

        match source {
            GetlineSource::Main => {
                self.vars.nr += 1.0;
                self.vars.fnr += 1.0;
            }
            GetlineSource::Command => self.vars.nr += 1.0,
            GetlineSource::File => {}
        }
        match place {
            Some(place) => self.write_place(place, index.as_ref(), Value::from_input(text))?,
            None => self.set_record(text),
        }
        Ok(1.0)
    }

    // ===== Output =====

    fn write_output(&mut self, destination: Option<(String, Redirect)>, text: &str) -> Result<()> {
        match destination {
            None => self.output.write_all(text.as_bytes())?,
            Some((name, _)) if name == "/dev/stdout" || name == "-" => {
                self.output.write_all(text.as_bytes())?
            }
            Some((name, _)) if name == "/dev/stderr" => {
                self.output.flush()?;
                io::stderr().write_all(text.as_bytes())?;
            }
            Some((name, redirect)) => {
                if redirect == Redirect::Pipe {
                    self.output.flush()?;
                }
                self.outputs
                    .stream(&name, redirect)?
                    .write_all(text.as_bytes())?;
            }
        }
        Ok(())
    }
}

fn target(tuple: &Tuple) -> Result<Address> {
    tuple
        .target()
        .ok_or_else(|| Error::runtime(format!("{} has no jump target", tuple.opcode())))
}

fn scalar(operand: Operand) -> Result<Value> {
    match operand {
        Operand::Scalar(value) => Ok(value),
        Operand::Array(_) => Err(Error::runtime("attempt to use array in a scalar context")),
        Operand::Regex(_) => Err(Error::runtime("regex used where a value is expected")),
    }
}

fn required(index: Option<&Value>) -> Result<&Value> {
    index.ok_or_else(|| Error::runtime("missing array subscript"))
}

fn field_index(index: Option<&Value>) -> Result<usize> {
    let index = index.map(Value::to_number).unwrap_or(0.0);
    if index < 0.0 || index.is_nan() {
        return Err(Error::runtime(format!("attempt to access field {}", index)));
    }
    Ok(index as usize)
}

fn arith(op: ArithOp, left: f64, right: f64) -> Result<f64> {
    let result = match op {
        ArithOp::Add => left + right,
        ArithOp::Sub => left - right,
        ArithOp::Mul => left * right,
        ArithOp::Div => {
            if right == 0.0 {
                return Err(Error::runtime("division by zero"));
            }
            left / right
        }
        ArithOp::Mod => {
            if right == 0.0 {
                return Err(Error::runtime("division by zero in %"));
            }
            left % right
        }
        ArithOp::Pow => left.powf(right),
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;

    /// Output sink the test keeps a handle to
    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    fn run_with(program: &str, settings: AwkSettings) -> (Result<ExitStatus>, String) {
        let tuples = Compiler::default().compile_str(program).unwrap();
        let capture = Capture::default();
        let mut avm = Avm::new(settings.output(capture.clone()), ExtensionRegistry::new());
        let status = avm.interpret(&tuples);
        (status, capture.text())
    }

    fn run(program: &str, input: &'static str) -> String {
        let (status, output) = run_with(program, AwkSettings::new().input(input.as_bytes()));
        status.unwrap();
        output
    }

    #[test]
    fn test_begin_print() {
        assert_eq!(run(r#"BEGIN { print "hello" }"#, ""), "hello\n");
    }

    #[test]
    fn test_fields() {
        assert_eq!(run("{ print $2, $1 }", "a b\nc d\n"), "b a\nd c\n");
        assert_eq!(run("{ print NF }", "a b c\n\n"), "3\n0\n");
    }

    #[test]
    fn test_arithmetic_and_output_format() {
        assert_eq!(run("BEGIN { print 1 + 2 * 3, 7 / 2, 2 ^ 10 }", ""), "7 3.5 1024\n");
        assert_eq!(run("BEGIN { print 10 % 3, -7 % 3 }", ""), "1 -1\n");
        assert_eq!(run("BEGIN { OFMT = \"%.2f\"; print 3.14159 }", ""), "3.14\n");
    }

    #[test]
    fn test_division_by_zero() {
        let (status, _) = run_with("BEGIN { x = 0; print 1 / x }", AwkSettings::new());
        let err = status.unwrap_err();
        assert!(err.to_string().contains("division by zero"));
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_uninitialized_and_concat() {
        assert_eq!(run("BEGIN { print x + 1, \"<\" x \">\" }", ""), "1 <>\n");
        assert_eq!(run("BEGIN { x = 1; y = 2; print x y }", ""), "12\n");
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run("{ print ($1 < $2) }", "10 9\n"), "0\n");
        assert_eq!(run("BEGIN { print (\"10\" < \"9\") }", ""), "1\n");
        assert_eq!(run("{ print ($1 == 1) }", "1.0\n"), "1\n");
    }

    #[test]
    fn test_field_past_nf_is_uninitialized() {
        assert_eq!(run("{ print ($3 == 0), ($3 == \"\") }", "a b\n"), "1 1\n");
        assert_eq!(run("{ print ($2 == 0), ($2 == \"\") }", "a \n"), "1 1\n");
        assert_eq!(run("{ x = $5; print NF, length(x) }", "a b\n"), "2 0\n");
    }

    #[test]
    fn test_for_in_key_is_a_string() {
        let program = r#"BEGIN { a["9"] = 1; for (k in a) print (k < 10), (k == "9") }"#;
        assert_eq!(run(program, ""), "0 1\n");
    }

    #[test]
    fn test_dynamic_regex_with_literal_brace() {
        let program = r#"$0 ~ "{" { n++ } END { print n + 0 }"#;
        assert_eq!(run(program, "a{b\nc\n}{\n"), "2\n");
    }

    #[test]
    fn test_control_flow() {
        let program = r#"BEGIN {
            for (i = 1; i <= 5; i++) {
                if (i == 2) continue
                if (i == 4) break
                s = s i
            }
            while (j < 3) j++
            do { k++ } while (k < 0)
            print s, j, k
        }"#;
        assert_eq!(run(program, ""), "13 3 1\n");
    }

    #[test]
    fn test_arrays() {
        let program = r#"BEGIN {
            a["x"] = 1; a["y"] = 2
            delete a["x"]
            print ("x" in a), ("y" in a), length(a)
            b[1, 2] = 3
            for (k in b) { split(k, parts, SUBSEP); print parts[1], parts[2] }
            delete a
            print length(a)
        }"#;
        assert_eq!(run(program, ""), "0 1 1\n1 2\n0\n");
    }

    #[test]
    fn test_for_in_skips_deleted_keys() {
        let program = r#"BEGIN {
            a[1]; a[2]; a[3]
            for (k in a) { delete a; n++ }
            print n
        }"#;
        assert_eq!(run(program, ""), "1\n");
    }

    #[test]
    fn test_functions_and_recursion() {
        let program = r#"
            function fact(n) { return n <= 1 ? 1 : n * fact(n - 1) }
            function fill(arr, n,   i) { for (i = 1; i <= n; i++) arr[i] = i * i }
            BEGIN { print fact(10); fill(sq, 3); print sq[1], sq[2], sq[3], i }
        "#;
        assert_eq!(run(program, ""), "3628800\n1 4 9 \n");
    }

    #[test]
    fn test_function_without_return_value() {
        let program = "function f() { x = 1 } BEGIN { v = f(); print \"[\" v \"]\", x }";
        assert_eq!(run(program, ""), "[] 1\n");
    }

    #[test]
    fn test_field_assignment_rebuilds_record() {
        assert_eq!(run("{ $2 = \"X\"; print; print NF }", "a b c\n"), "a X c\n3\n");
        assert_eq!(
            run("BEGIN { OFS = \"-\" } { $5 = \"e\"; print }", "a b\n"),
            "a-b---e\n"
        );
        assert_eq!(run("{ NF = 2; print }", "a b c d\n"), "a b\n");
        assert_eq!(run("{ $0 = \"x y z\"; print $3, NF }", "a\n"), "z 3\n");
    }

    #[test]
    fn test_negative_field_is_an_error() {
        let (status, _) = run_with(
            "{ print $(-1) }",
            AwkSettings::new().input("a\n".as_bytes()),
        );
        assert!(status.unwrap_err().to_string().contains("field -1"));
    }

    #[test]
    fn test_fs_assignment() {
        assert_eq!(run("BEGIN { FS = \",\" } { print $2 }", "a,b,c\n"), "b\n");
        assert_eq!(run("{ print $2 }", "a:b\n"), "\n");
        let (status, output) = run_with(
            "{ print $2 }",
            AwkSettings::new()
                .field_separator(":")
                .input("a:b\n".as_bytes()),
        );
        status.unwrap();
        assert_eq!(output, "b\n");
    }

    #[test]
    fn test_patterns_and_ranges() {
        let input = "1\n2\nstart\n3\nend\n4\n";
        assert_eq!(run("/start/,/end/", input), "start\n3\nend\n");
        assert_eq!(run("$1 > 2 && $1 < 4", input), "3\n");
        assert_eq!(run("!/[0-9]/ { n++ } END { print n }", input), "2\n");
    }

    #[test]
    fn test_next_and_exit() {
        assert_eq!(run("NR == 2 { next } { print }", "a\nb\nc\n"), "a\nc\n");
        let (status, output) = run_with(
            "{ print; exit 3 } END { print \"end\" }",
            AwkSettings::new().input("a\nb\n".as_bytes()),
        );
        assert_eq!(
            status.unwrap(),
            ExitStatus {
                code: 3,
                explicit: true
            }
        );
        assert_eq!(output, "a\nend\n");
    }

    #[test]
    fn test_exit_in_end_keeps_code() {
        let (status, output) = run_with(
            "BEGIN { exit 2 } END { print \"end\"; exit; print \"never\" }",
            AwkSettings::new(),
        );
        assert_eq!(status.unwrap().code, 2);
        assert_eq!(output, "end\n");
    }

    #[test]
    fn test_nr_and_end_sees_last_record() {
        assert_eq!(run("END { print NR, $0 }", "a\nb\nlast one\n"), "3 last one\n");
    }

    #[test]
    fn test_variables_and_operands() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        std::fs::write(&first, "1\n2\n").unwrap();
        std::fs::write(&second, "3\n").unwrap();

        let settings = AwkSettings::new()
            .variable("prefix", "v:")
            .operand(first.to_str().unwrap())
            .operand("prefix=w:")
            .operand(second.to_str().unwrap());
        let (status, output) = run_with("{ print prefix FNR, NR }", settings);
        status.unwrap();
        assert_eq!(output, "v:1 1\nv:2 2\nw:1 3\n");
    }

    #[test]
    fn test_missing_input_file() {
        let settings = AwkSettings::new().operand("/nonexistent/tawk/input");
        let (status, _) = run_with("{ print }", settings);
        let err = status.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tawk/input"));
    }

    #[test]
    fn test_argv_and_environ() {
        let mut environment = HashMap::new();
        environment.insert("HOME".to_string(), "/home/tawk".to_string());
        let settings = AwkSettings::new()
            .program_name("awk")
            .operands(["a", "b"])
            .environment(environment);
        let (status, output) = run_with(
            "BEGIN { print ARGC, ARGV[0], ARGV[2], ENVIRON[\"HOME\"] }",
            settings,
        );
        status.unwrap();
        assert_eq!(output, "3 awk b /home/tawk\n");
    }

    #[test]
    fn test_argv_edits_change_operands() {
        let settings = AwkSettings::new()
            .operand("/nonexistent/tawk/input")
            .input("from stdin\n".as_bytes());
        let (status, output) = run_with("BEGIN { ARGV[1] = \"-\" } { print }", settings);
        status.unwrap();
        assert_eq!(output, "from stdin\n");
    }

    #[test]
    fn test_paragraph_mode() {
        let input = "Jane\n12 Main St\n\nJohn\n9 Elm St\n";
        assert_eq!(
            run("BEGIN { RS = \"\" } { print NR \": \" $1 \" / \" $NF }", input),
            "1: Jane / St\n2: John / St\n"
        );
    }

    #[test]
    fn test_getline_forms() {
        let program = r#"NR == 1 { getline; print "now", $0, NR } NR == 3 { getline line; print "var", line, NR, $0 }"#;
        assert_eq!(run(program, "a\nb\nc\nd\n"), "now b 2\nvar d 4 c\n");
    }

    #[test]
    fn test_getline_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, "x\ny\n").unwrap();
        let program = format!(
            r#"BEGIN {{ while ((getline line < "{0}") > 0) n++; print n, NR; print (getline x < "/nonexistent/tawk") }}"#,
            path.display()
        );
        assert_eq!(run(&program, ""), "2 0\n-1\n");
    }

    #[test]
    fn test_print_redirection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let program = format!(
            r#"{{ print $1 > "{0}" }} END {{ close("{0}"); print "done" >> "{0}" }}"#,
            path.display()
        );
        assert_eq!(run(&program, "a\nb\n"), "");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\ndone\n");
    }

    #[test]
    fn test_printf() {
        assert_eq!(
            run(r#"{ printf "%-5s|%3d|%.2f\n", $1, $2, $3 }"#, "ab 7 3.14159\n"),
            "ab   |  7|3.14\n"
        );
    }

    #[test]
    fn test_avm_runs_once() {
        let tuples = Compiler::new(ExtensionRegistry::new(), false, false, false)
            .compile_str("BEGIN { print 1 }")
            .unwrap();
        let mut avm = Avm::new(AwkSettings::new().output(io::sink()), ExtensionRegistry::new());
        assert_eq!(avm.phase(), Phase::Init);
        avm.interpret(&tuples).unwrap();
        assert_eq!(avm.phase(), Phase::Done);
        // one run per AVM
        assert!(avm.interpret(&tuples).is_err());
    }

    #[test]
    fn test_extension_call() {
        let mut extensions = ExtensionRegistry::new();
        extensions.register("double", |args: &[Value]| {
            Ok(Value::from_number(args[0].to_number() * 2.0))
        });
        let tuples = Compiler::new(extensions.clone(), false, false, false)
            .compile_str("BEGIN { print double(21) }")
            .unwrap();
        let capture = Capture::default();
        let mut avm = Avm::new(AwkSettings::new().output(capture.clone()), extensions);
        avm.interpret(&tuples).unwrap();
        assert_eq!(capture.text(), "42\n");
    }

    #[test]
    fn test_extension_missing_at_runtime() {
        let mut extensions = ExtensionRegistry::new();
        extensions.register("double", |args: &[Value]| Ok(args[0].clone()));
        let tuples = Compiler::new(extensions, false, false, false)
            .compile_str("BEGIN { print double(21) }")
            .unwrap();
        let mut avm = Avm::new(AwkSettings::new().output(io::sink()), ExtensionRegistry::new());
        let err = avm.interpret(&tuples).unwrap_err();
        assert!(err.to_string().contains("unknown extension function"));
        assert_eq!(avm.phase(), Phase::Error);
    }

    #[test]
    fn test_unlinked_tuples_rejected() {
        let mut avm = Avm::new(AwkSettings::new(), ExtensionRegistry::new());
        let err = avm.interpret(&AwkTuples::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
