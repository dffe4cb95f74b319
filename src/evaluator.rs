//! Element-wise evaluation of captured calls.
//!
//! A call such as `log(x + 1)` is compiled once into a postfix program
//! over numbered variable slots. An [`Instance`] owns the slots and a
//! scratch stack and is reused for every row: set the variables, run,
//! read the result.

use std::collections::HashMap;

use crate::error::ColumnError;
use crate::parse::Expr;
use crate::rewrite::{PROTECT, UNPROTECT};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Builtin {
    Log,
    Exp,
    Sqrt,
    Abs,
    Sin,
    Cos,
    Tan,
    Log10,
    Log2,
    Log1p,
    Expm1,
    Floor,
    Ceil,
    Round,
    Pow,
    Min,
    Max,
}

impl Builtin {
    fn lookup(name: &str, arity: usize) -> Option<Builtin> {
        let f = match (name, arity) {
            ("log", 1) => Builtin::Log,
            ("exp", 1) => Builtin::Exp,
            ("sqrt", 1) => Builtin::Sqrt,
            ("abs", 1) => Builtin::Abs,
            ("sin", 1) => Builtin::Sin,
            ("cos", 1) => Builtin::Cos,
            ("tan", 1) => Builtin::Tan,
            ("log10", 1) => Builtin::Log10,
            ("log2", 1) => Builtin::Log2,
            ("log1p", 1) => Builtin::Log1p,
            ("expm1", 1) => Builtin::Expm1,
            ("floor", 1) => Builtin::Floor,
            ("ceil", 1) => Builtin::Ceil,
            ("round", 1) => Builtin::Round,
            ("pow", 2) => Builtin::Pow,
            ("min", 2) => Builtin::Min,
            ("max", 2) => Builtin::Max,
            _ => return None,
        };
        Some(f)
    }

    fn arity(self) -> usize {
        match self {
            Builtin::Pow | Builtin::Min | Builtin::Max => 2,
            _ => 1,
        }
    }

    fn apply1(self, x: f64) -> f64 {
        match self {
            Builtin::Log => x.ln(),
            Builtin::Exp => x.exp(),
            Builtin::Sqrt => x.sqrt(),
            Builtin::Abs => x.abs(),
            Builtin::Sin => x.sin(),
            Builtin::Cos => x.cos(),
            Builtin::Tan => x.tan(),
            Builtin::Log10 => x.log10(),
            Builtin::Log2 => x.log2(),
            Builtin::Log1p => x.ln_1p(),
            Builtin::Expm1 => x.exp_m1(),
            Builtin::Floor => x.floor(),
            Builtin::Ceil => x.ceil(),
            Builtin::Round => x.round(),
            Builtin::Pow | Builtin::Min | Builtin::Max => f64::NAN,
        }
    }

    fn apply2(self, x: f64, y: f64) -> f64 {
        match self {
            Builtin::Pow => x.powf(y),
            Builtin::Min => x.min(y),
            Builtin::Max => x.max(y),
            _ => f64::NAN,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Const(f64),
    Load(usize),
    Neg,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Call(Builtin),
    /// A call the evaluator does not know; running it fails.
    Unknown(String),
}

/// Compilation context: declares variable slots and collects
/// instructions.
#[derive(Debug, Default)]
pub struct Context {
    variables: HashMap<String, usize>,
    names: Vec<String>,
    instructions: Vec<Instruction>,
}

/// A compiled call body.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCall {
    names: Vec<String>,
    instructions: Vec<Instruction>,
}

/// A reusable evaluation state for one compiled call.
#[derive(Debug)]
pub struct Instance<'a> {
    call: &'a CompiledCall,
    locals: Vec<f64>,
    stack: Vec<f64>,
}

impl Context {
    pub fn new() -> Context {
        Context::default()
    }

    /// Every variable a compiled body refers to needs a slot declared
    /// beforehand; `unprotect(...)` sub-expressions are declared under
    /// their rendered form.
    pub fn define_var(&mut self, name: &str) -> usize {
        if let Some(slot) = self.variables.get(name) {
            return *slot;
        }
        let slot = self.names.len();
        self.variables.insert(name.to_string(), slot);
        self.names.push(name.to_string());
        slot
    }

    fn load(&mut self, name: &str) {
        let slot = self.define_var(name);
        self.instructions.push(Instruction::Load(slot));
    }

    fn fold(&mut self, args: &[Expr], op: Instruction) {
        for (i, arg) in args.iter().enumerate() {
            self.int_compile(arg);
            if i > 0 {
                self.instructions.push(op.clone());
            }
        }
    }

    fn int_compile(&mut self, e: &Expr) {
        match e {
            Expr::Number(n) => self.instructions.push(Instruction::Const(*n)),
            Expr::Ident(name) => self.load(name),
            Expr::Call { head, args } => match (head.as_str(), args.len()) {
                (UNPROTECT, 1) => self.load(&args[0].to_string()),
                (PROTECT, 1) => self.int_compile(&args[0]),
                ("-", 1) => {
                    self.int_compile(&args[0]);
                    self.instructions.push(Instruction::Neg);
                }
                ("-", 2) => self.fold(args, Instruction::Sub),
                ("/", 2) => self.fold(args, Instruction::Div),
                ("^", 2) => self.fold(args, Instruction::Pow),
                ("+", n) if n >= 2 => self.fold(args, Instruction::Add),
                ("*", n) if n >= 2 => self.fold(args, Instruction::Mul),
                (name, arity) => {
                    for arg in args {
                        self.int_compile(arg);
                    }
                    match Builtin::lookup(name, arity) {
                        Some(f) => self.instructions.push(Instruction::Call(f)),
                        None => self.instructions.push(Instruction::Unknown(name.to_string())),
                    }
                }
            },
        }
    }

    /// Compile a call body to a program over the declared slots.
    pub fn compile(mut self, body: &Expr) -> CompiledCall {
        self.int_compile(body);
        CompiledCall {
            names: self.names,
            instructions: self.instructions,
        }
    }
}

impl CompiledCall {
    /// Slot names, in slot order.
    pub fn variables(&self) -> &[String] {
        &self.names
    }

    /// Calls the evaluator cannot run.
    pub fn unknown_functions(&self) -> Vec<&str> {
        self.instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Unknown(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn instantiate(&self) -> Instance {
        Instance {
            call: self,
            locals: vec![0.0; self.names.len()],
            stack: Vec::with_capacity(self.instructions.len()),
        }
    }
}

impl<'a> Instance<'a> {
    pub fn set_f64(&mut self, slot: usize, value: f64) {
        if let Some(local) = self.locals.get_mut(slot) {
            *local = value;
        }
    }

    fn pop(&mut self) -> f64 {
        self.stack.pop().unwrap_or(f64::NAN)
    }

    /// Evaluate the program against the current slot values.
    pub fn run(&mut self) -> Result<f64, ColumnError> {
        self.stack.clear();
        let call = self.call;
        for instruction in &call.instructions {
            match instruction {
                Instruction::Const(n) => self.stack.push(*n),
                Instruction::Load(slot) => {
                    let value = self.locals.get(*slot).copied().unwrap_or(f64::NAN);
                    self.stack.push(value)
                }
                Instruction::Neg => {
                    let x = self.pop();
                    self.stack.push(-x)
                }
                Instruction::Call(f) if f.arity() == 1 => {
                    let x = self.pop();
                    self.stack.push(f.apply1(x))
                }
                Instruction::Add
                | Instruction::Sub
                | Instruction::Mul
                | Instruction::Div
                | Instruction::Pow
                | Instruction::Call(_) => {
                    let y = self.pop();
                    let x = self.pop();
                    let result = match instruction {
                        Instruction::Add => x + y,
                        Instruction::Sub => x - y,
                        Instruction::Mul => x * y,
                        Instruction::Div => x / y,
                        Instruction::Pow => x.powf(y),
                        Instruction::Call(f) => f.apply2(x, y),
                        _ => f64::NAN,
                    };
                    self.stack.push(result)
                }
                Instruction::Unknown(name) => {
                    return Err(ColumnError::UnknownFunction(name.clone()))
                }
            }
        }
        Ok(self.pop())
    }
}
