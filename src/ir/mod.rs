//! The tuple queue: a flat, address-linked instruction list executed by the
//! AVM.
//!
//! The generator appends tuples and refers to jump targets through labels.
//! [`AwkTuples::post_process`] then assigns every tuple its address, its
//! `next` address and the resolved address of its label, after which the
//! queue is read-only.

pub mod codegen;

use std::collections::HashMap;
use std::fmt;

use regex::Regex;

use crate::ast::Builtin;

/// Position of a tuple in the queue
pub type Address = usize;

/// Forward reference to an address, resolved by the linker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Index into the compiled regex table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegexId(pub usize);

/// Variables with meaning to the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialVar {
    Nr,
    Nf,
    Fnr,
    Fs,
    Ofs,
    Rs,
    Ors,
    Ofmt,
    Convfmt,
    Subsep,
    Filename,
    Rstart,
    Rlength,
}

impl SpecialVar {
    pub fn from_name(name: &str) -> Option<Self> {
        let var = match name {
            "NR" => SpecialVar::Nr,
            "NF" => SpecialVar::Nf,
            "FNR" => SpecialVar::Fnr,
            "FS" => SpecialVar::Fs,
            "OFS" => SpecialVar::Ofs,
            "RS" => SpecialVar::Rs,
            "ORS" => SpecialVar::Ors,
            "OFMT" => SpecialVar::Ofmt,
            "CONVFMT" => SpecialVar::Convfmt,
            "SUBSEP" => SpecialVar::Subsep,
            "FILENAME" => SpecialVar::Filename,
            "RSTART" => SpecialVar::Rstart,
            "RLENGTH" => SpecialVar::Rlength,
            _ => return None,
        };
        Some(var)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpecialVar::Nr => "NR",
            SpecialVar::Nf => "NF",
            SpecialVar::Fnr => "FNR",
            SpecialVar::Fs => "FS",
            SpecialVar::Ofs => "OFS",
            SpecialVar::Rs => "RS",
            SpecialVar::Ors => "ORS",
            SpecialVar::Ofmt => "OFMT",
            SpecialVar::Convfmt => "CONVFMT",
            SpecialVar::Subsep => "SUBSEP",
            SpecialVar::Filename => "FILENAME",
            SpecialVar::Rstart => "RSTART",
            SpecialVar::Rlength => "RLENGTH",
        }
    }
}

/// A named variable slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarRef {
    /// Offset in the global layout
    Global(u32),
    /// Slot in the current call frame
    Local(u32),
}

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarRef::Global(offset) => write!(f, "global[{}]", offset),
            VarRef::Local(slot) => write!(f, "local[{}]", slot),
        }
    }
}

/// Something that can be read and assigned. `Field` and `Element` take
/// their index or key from the operand stack, below any value operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Place {
    Var(VarRef),
    Special(SpecialVar),
    Field,
    Element(VarRef),
}

impl Place {
    /// Whether the place pops an index/key operand
    pub fn is_indexed(&self) -> bool {
        matches!(self, Place::Field | Place::Element(_))
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Place::Var(var) => write!(f, "{}", var),
            Place::Special(var) => f.write_str(var.name()),
            Place::Field => f.write_str("$[]"),
            Place::Element(var) => write!(f, "{}[]", var),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// Read-modify-write operations on a place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    /// `place op= value`, pops the value
    Compound(ArithOp),
    PreIncrement,
    PreDecrement,
    PostIncrement,
    PostDecrement,
}

/// Output redirection; the target name is the top operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirect {
    Truncate,
    Append,
    Pipe,
}

/// Where getline reads from; file and command names are the top operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetlineSource {
    /// The main input
    Main,
    File,
    Command,
}

/// AVM instructions
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    PushNumber(f64),
    PushString(String),
    PushUninitialized,
    /// Regex operand for `~`, `split`, `sub`, `gsub` and `match`
    PushRegex(RegexId),
    Pop,

    Load(Place),
    /// Assign the top operand, leaving it on the stack
    Store(Place),
    Update { place: Place, op: UpdateOp },

    Arith(ArithOp),
    Negate,
    UnaryPlus,
    Not,
    Concat,
    Compare(CmpOp),
    /// Pops pattern then subject
    Match { negated: bool },
    /// Match a regex against `$0`
    MatchRecord(RegexId),

    /// Join the top `n` operands with SUBSEP into one key
    JoinKeys(usize),
    InArray(VarRef),
    DeleteElement(VarRef),
    DeleteArray(VarRef),

    Jump(Label),
    JumpIfFalse(Label),
    JumpIfTrue(Label),
    /// Jump when the range latch is set
    RangeActive { range: usize, target: Label },
    SetRange { range: usize, active: bool },

    /// Snapshot the keys of an array for `for (k in a)`
    ForInStart(VarRef),
    /// Assign the next key to `var`, or jump to `exit` when done
    ForInNext { var: Place, exit: Label },
    ForInEnd,

    /// Push a variable as a call argument: arrays by reference, scalars by
    /// value. `array` creates the array when the slot is still untyped.
    PushArgument { var: VarRef, array: bool },
    Call { function: usize, entry: Label, argc: usize },
    CallBuiltin { builtin: Builtin, argc: usize },
    CallExtension { name: String, argc: usize },
    Return,

    /// Pops the optional separator then the string
    Split { array: VarRef, has_separator: bool },
    /// `sub`/`gsub`: pops replacement, regex and the place's index
    Substitute { place: Place, global: bool },
    Getline { source: GetlineSource, place: Option<Place> },

    Print { argc: usize, redirect: Option<Redirect> },
    Printf { argc: usize, redirect: Option<Redirect> },

    Next,
    Exit { has_code: bool },
    /// Read the next main-loop record, jumping to `eof` at end of input
    NextRecord { eof: Label },
    PhaseEnd,
}

impl Opcode {
    /// The label this opcode jumps or calls to
    pub fn label(&self) -> Option<Label> {
        match self {
            Opcode::Jump(label)
            | Opcode::JumpIfFalse(label)
            | Opcode::JumpIfTrue(label)
            | Opcode::RangeActive { target: label, .. }
            | Opcode::ForInNext { exit: label, .. }
            | Opcode::Call { entry: label, .. }
            | Opcode::NextRecord { eof: label } => Some(*label),
            _ => None,
        }
    }

    /// Net change in operand stack depth when the opcode falls through
    pub fn stack_effect(&self) -> isize {
        fn indexed(place: &Place) -> isize {
            if place.is_indexed() { 1 } else { 0 }
        }

        match self {
            Opcode::PushNumber(_)
            | Opcode::PushString(_)
            | Opcode::PushUninitialized
            | Opcode::PushRegex(_)
            | Opcode::MatchRecord(_)
            | Opcode::PushArgument { .. } => 1,
            Opcode::Pop => -1,
            Opcode::Load(place) => 1 - indexed(place),
            Opcode::Store(place) => -indexed(place),
            Opcode::Update { place, op } => {
                let value = if matches!(op, UpdateOp::Compound(_)) { 1 } else { 0 };
                1 - indexed(place) - value
            }
            Opcode::Arith(_) | Opcode::Concat | Opcode::Compare(_) | Opcode::Match { .. } => -1,
            Opcode::Negate | Opcode::UnaryPlus | Opcode::Not => 0,
            Opcode::JoinKeys(n) => 1 - *n as isize,
            Opcode::InArray(_) => 0,
            Opcode::DeleteElement(_) => -1,
            Opcode::DeleteArray(_) => 0,
            Opcode::Jump(_) => 0,
            Opcode::JumpIfFalse(_) | Opcode::JumpIfTrue(_) => -1,
            Opcode::RangeActive { .. } | Opcode::SetRange { .. } => 0,
            Opcode::ForInStart(_) | Opcode::ForInNext { .. } | Opcode::ForInEnd => 0,
            Opcode::Call { argc, .. }
            | Opcode::CallBuiltin { argc, .. }
            | Opcode::CallExtension { argc, .. } => 1 - *argc as isize,
            Opcode::Return => -1,
            Opcode::Split { has_separator, .. } => {
                if *has_separator { -1 } else { 0 }
            }
            Opcode::Substitute { place, .. } => -1 - indexed(place),
            Opcode::Getline { source, place } => {
                let source = if matches!(source, GetlineSource::Main) { 0 } else { 1 };
                let index = place.as_ref().map(indexed).unwrap_or(0);
                1 - source - index
            }
            Opcode::Print { argc, redirect } | Opcode::Printf { argc, redirect } => {
                -(*argc as isize) - if redirect.is_some() { 1 } else { 0 }
            }
            Opcode::Next | Opcode::PhaseEnd | Opcode::NextRecord { .. } => 0,
            Opcode::Exit { has_code } => {
                if *has_code { -1 } else { 0 }
            }
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::PushNumber(n) => write!(f, "push_number {}", n),
            Opcode::PushString(s) => write!(f, "push_string {:?}", s),
            Opcode::PushUninitialized => f.write_str("push_uninitialized"),
            Opcode::PushRegex(id) => write!(f, "push_regex #{}", id.0),
            Opcode::Pop => f.write_str("pop"),
            Opcode::Load(place) => write!(f, "load {}", place),
            Opcode::Store(place) => write!(f, "store {}", place),
            Opcode::Update { place, op } => write!(f, "update {} {:?}", place, op),
            Opcode::Arith(op) => write!(f, "arith {:?}", op),
            Opcode::Negate => f.write_str("negate"),
            Opcode::UnaryPlus => f.write_str("unary_plus"),
            Opcode::Not => f.write_str("not"),
            Opcode::Concat => f.write_str("concat"),
            Opcode::Compare(op) => write!(f, "compare {:?}", op),
            Opcode::Match { negated } => {
                f.write_str(if *negated { "not_match" } else { "match" })
            }
            Opcode::MatchRecord(id) => write!(f, "match_record #{}", id.0),
            Opcode::JoinKeys(n) => write!(f, "join_keys {}", n),
            Opcode::InArray(var) => write!(f, "in_array {}", var),
            Opcode::DeleteElement(var) => write!(f, "delete_element {}", var),
            Opcode::DeleteArray(var) => write!(f, "delete_array {}", var),
            Opcode::Jump(label) => write!(f, "jump {}", label),
            Opcode::JumpIfFalse(label) => write!(f, "jump_if_false {}", label),
            Opcode::JumpIfTrue(label) => write!(f, "jump_if_true {}", label),
            Opcode::RangeActive { range, target } => {
                write!(f, "range_active {} {}", range, target)
            }
            Opcode::SetRange { range, active } => write!(f, "set_range {} {}", range, active),
            Opcode::ForInStart(var) => write!(f, "for_in_start {}", var),
            Opcode::ForInNext { var, exit } => write!(f, "for_in_next {} {}", var, exit),
            Opcode::ForInEnd => f.write_str("for_in_end"),
            Opcode::PushArgument { var, array } => {
                write!(f, "push_argument {}{}", var, if *array { " array" } else { "" })
            }
            Opcode::Call {
                function,
                entry,
                argc,
            } => write!(f, "call #{} {} argc={}", function, entry, argc),
            Opcode::CallBuiltin { builtin, argc } => {
                write!(f, "call_builtin {} argc={}", builtin.name(), argc)
            }
            Opcode::CallExtension { name, argc } => {
                write!(f, "call_extension {} argc={}", name, argc)
            }
            Opcode::Return => f.write_str("return"),
            Opcode::Split {
                array,
                has_separator,
            } => write!(f, "split {} separator={}", array, has_separator),
            Opcode::Substitute { place, global } => {
                write!(f, "{} {}", if *global { "gsub" } else { "sub" }, place)
            }
            Opcode::Getline { source, place } => match place {
                Some(place) => write!(f, "getline {:?} {}", source, place),
                None => write!(f, "getline {:?}", source),
            },
            Opcode::Print { argc, redirect } => write!(f, "print argc={} {:?}", argc, redirect),
            Opcode::Printf { argc, redirect } => write!(f, "printf argc={} {:?}", argc, redirect),
            Opcode::Next => f.write_str("next"),
            Opcode::Exit { has_code } => write!(f, "exit has_code={}", has_code),
            Opcode::NextRecord { eof } => write!(f, "next_record {}", eof),
            Opcode::PhaseEnd => f.write_str("phase_end"),
        }
    }
}

/// One instruction with its source line and link fields
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    opcode: Opcode,
    line: usize,
    address: Option<Address>,
    next: Option<Address>,
    target: Option<Address>,
}

impl Tuple {
    fn new(opcode: Opcode, line: usize) -> Self {
        Self {
            opcode,
            line,
            address: None,
            next: None,
            target: None,
        }
    }

    pub fn opcode(&self) -> &Opcode {
        &self.opcode
    }

    /// Source line that produced this tuple
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn address(&self) -> Option<Address> {
        self.address
    }

    pub fn next(&self) -> Option<Address> {
        self.next
    }

    /// Resolved jump or call target
    pub fn target(&self) -> Option<Address> {
        self.target
    }

    fn touch(&mut self, address: Address, next: Option<Address>, target: Option<Address>) {
        self.address = Some(address);
        self.next = next;
        self.target = target;
    }
}

/// Global variable name to offset mapping, in first-encounter order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalLayout {
    names: Vec<String>,
    offsets: HashMap<String, u32>,
    frozen: bool,
}

impl GlobalLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of `name`, assigning the next one on first encounter
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(offset) = self.offsets.get(name) {
            return *offset;
        }
        assert!(!self.frozen, "global layout is frozen, cannot add '{}'", name);
        let offset = self.names.len() as u32;
        self.names.push(name.to_string());
        self.offsets.insert(name.to_string(), offset);
        offset
    }

    pub fn offset(&self, name: &str) -> Option<u32> {
        self.offsets.get(name).copied()
    }

    pub fn name(&self, offset: u32) -> Option<&str> {
        self.names.get(offset as usize).map(String::as_str)
    }

    /// Names in offset order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn freeze(&mut self) {
        self.frozen = true;
    }
}

/// A user function as the AVM sees it
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInfo {
    pub name: String,
    /// Number of declared parameters (locals)
    pub arity: usize,
    pub entry: Label,
    pub array_params: Vec<bool>,
}

/// The compiled program
#[derive(Debug, Clone, Default)]
pub struct AwkTuples {
    tuples: Vec<Tuple>,
    labels: Vec<Option<Address>>,
    functions: Vec<FunctionInfo>,
    regexes: Vec<Regex>,
    layout: GlobalLayout,
    begin: Option<Address>,
    main: Option<Address>,
    end: Option<Address>,
    ranges: usize,
    linked: bool,
}

impl AwkTuples {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Building =====

    /// Append a tuple, returning its address
    pub fn push(&mut self, opcode: Opcode, line: usize) -> Address {
        assert!(!self.linked, "cannot append to a linked tuple queue");
        self.tuples.push(Tuple::new(opcode, line));
        self.tuples.len() - 1
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the address of the next tuple appended
    pub fn place_label(&mut self, label: Label) {
        let slot = &mut self.labels[label.0];
        assert!(slot.is_none(), "label {} placed twice", label);
        *slot = Some(self.tuples.len());
    }

    pub fn add_regex(&mut self, regex: Regex) -> RegexId {
        if let Some(index) = self.regexes.iter().position(|r| r.as_str() == regex.as_str()) {
            return RegexId(index);
        }
        self.regexes.push(regex);
        RegexId(self.regexes.len() - 1)
    }

    pub fn add_function(&mut self, function: FunctionInfo) {
        self.functions.push(function);
    }

    pub fn new_range(&mut self) -> usize {
        self.ranges += 1;
        self.ranges - 1
    }

    pub fn set_begin(&mut self, address: Address) {
        self.begin = Some(address);
    }

    pub fn set_main(&mut self, address: Address) {
        self.main = Some(address);
    }

    pub fn set_end(&mut self, address: Address) {
        self.end = Some(address);
    }

    pub fn layout_mut(&mut self) -> &mut GlobalLayout {
        &mut self.layout
    }

    /// Address the next appended tuple will get
    pub fn next_address(&self) -> Address {
        self.tuples.len()
    }

    // ===== Linking =====

    /// Touch every tuple: address = position, next = position + 1, target =
    /// the address of its label. Freezes the global layout. Running it
    /// again on an unchanged queue changes nothing.
    pub fn post_process(&mut self) {
        let len = self.tuples.len();
        for (address, tuple) in self.tuples.iter_mut().enumerate() {
            let next = if address + 1 < len { Some(address + 1) } else { None };
            let target = tuple.opcode.label().map(|label| {
                let target = self.labels[label.0]
                    .unwrap_or_else(|| panic!("label {} was never placed", label));
                assert!(target < len, "label {} points past the end of the queue", label);
                target
            });
            tuple.touch(address, next, target);
        }
        self.layout.freeze();
        self.linked = true;
    }

    // ===== Reading =====

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn get(&self, address: Address) -> Option<&Tuple> {
        self.tuples.get(address)
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }

    pub fn regex(&self, id: RegexId) -> &Regex {
        &self.regexes[id.0]
    }

    pub fn layout(&self) -> &GlobalLayout {
        &self.layout
    }

    pub fn begin(&self) -> Option<Address> {
        self.begin
    }

    pub fn main(&self) -> Option<Address> {
        self.main
    }

    pub fn end(&self) -> Option<Address> {
        self.end
    }

    pub fn range_count(&self) -> usize {
        self.ranges
    }
}

impl fmt::Display for AwkTuples {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entry = |address: Option<Address>| match address {
            Some(address) => address.to_string(),
            None => "-".to_string(),
        };
        writeln!(
            f,
            "; begin={} main={} end={} globals={}",
            entry(self.begin),
            entry(self.main),
            entry(self.end),
            self.layout.len()
        )?;
        for function in &self.functions {
            let address = self.labels[function.entry.0];
            writeln!(
                f,
                "; function {}/{} at {}",
                function.name,
                function.arity,
                entry(address)
            )?;
        }
        for (index, tuple) in self.tuples.iter().enumerate() {
            write!(f, "{:>5} {:>4}  {}", tuple.address.unwrap_or(index), tuple.line, tuple.opcode)?;
            if let Some(target) = tuple.target {
                write!(f, " -> {}", target)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
