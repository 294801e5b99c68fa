//! The stack-based virtual machine: a fetch-decode-dispatch loop over a
//! flat opcode array, driven by a program counter. Owns an evaluation
//! stack, a return stack (`GOSUB`/`RETURN`), and a loop-frame stack
//! (`FOR`/`NEXT`). Side effects (console, graphics, timing, randomness)
//! are delegated to external hosts passed in at construction.

use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bytecode::{CompiledProgram, Opcode, NEXT_INNERMOST};
use crate::console::Console;
use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::functions::FnId;
use crate::graphics::GraphicsHost;
use crate::symtab::SymbolCounts;
use crate::timer::Clock;
use crate::value::Value;

pub type Result<T> = core::result::Result<T, RuntimeError>;

#[derive(Debug, Clone)]
enum NumArray {
    Undefined,
    D1(Vec<f64>),
    D2(Vec<Vec<f64>>),
}

#[derive(Debug, Clone)]
enum StrArray {
    Undefined,
    D1(Vec<Rc<String>>),
    D2(Vec<Vec<Rc<String>>>),
}

struct LoopFrame {
    slot: u32,
    end: f64,
    step: f64,
    check_pc: usize,
}

/// Owns every store the VM needs: scalar values, array values, the
/// evaluation/return/loop-frame stacks, and the print column counter.
/// A fresh `Vm` is clean memory; the stores are sized from the compiled
/// program's symbol counts but grow on demand as newly observed slots
/// exceed current capacity.
pub struct Vm<'a> {
    program: &'a CompiledProgram,
    pc: usize,
    last_line: u32,

    num_scalars: Vec<f64>,
    str_scalars: Vec<Rc<String>>,
    num_arrays: Vec<NumArray>,
    str_arrays: Vec<StrArray>,

    stack: Vec<Value>,
    return_stack: Vec<usize>,
    loop_frames: Vec<LoopFrame>,
    max_stack_depth: usize,

    print_col: usize,

    clock: Clock,
    rng: StdRng,

    halted: bool,
}

impl<'a> Vm<'a> {
    pub fn new(program: &'a CompiledProgram, rng_seed: Option<u64>) -> Vm<'a> {
        Vm::with_counts(program, program.symbols, rng_seed, crate::config::Config::default().max_stack_depth)
    }

    /// Like [`Vm::new`], but enforces `max_stack_depth` on `GOSUB`'s
    /// return stack instead of the compiled-in default.
    pub fn with_stack_limit(program: &'a CompiledProgram, rng_seed: Option<u64>, max_stack_depth: usize) -> Vm<'a> {
        Vm::with_counts(program, program.symbols, rng_seed, max_stack_depth)
    }

    fn with_counts(
        program: &'a CompiledProgram,
        counts: SymbolCounts,
        rng_seed: Option<u64>,
        max_stack_depth: usize,
    ) -> Vm<'a> {
        let rng = match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Vm {
            program,
            pc: 0,
            last_line: 0,
            num_scalars: vec![0.0; counts.numeric_scalars as usize],
            str_scalars: vec![Rc::new(String::new()); counts.string_scalars as usize],
            num_arrays: (0..counts.numeric_arrays).map(|_| NumArray::Undefined).collect(),
            str_arrays: (0..counts.string_arrays).map(|_| StrArray::Undefined).collect(),
            stack: Vec::new(),
            return_stack: Vec::new(),
            loop_frames: Vec::new(),
            max_stack_depth,
            print_col: 0,
            clock: Clock::new(),
            rng,
            halted: false,
        }
    }

    /// Pushes a return address, raising `StackOverflow` once the return
    /// stack would exceed `max_stack_depth` (runaway `GOSUB` recursion
    /// with no matching `RETURN`).
    fn push_return(&mut self, pc: usize) -> Result<()> {
        if self.return_stack.len() >= self.max_stack_depth {
            return Err(self.err(RuntimeErrorKind::StackOverflow));
        }
        self.return_stack.push(pc);
        Ok(())
    }

    fn err(&self, kind: RuntimeErrorKind) -> RuntimeError {
        RuntimeError::at(kind, self.last_line)
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or_else(|| self.err(RuntimeErrorKind::StackUnderflow))
    }

    fn pop_num(&mut self) -> Result<f64> {
        self.pop()?.as_num()
    }

    fn pop_args(&mut self, argc: u32) -> Result<Vec<Value>> {
        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.pop()?);
        }
        args.reverse();
        Ok(args)
    }

    fn ensure_num_slot(&mut self, index: usize) {
        if index >= self.num_scalars.len() {
            self.num_scalars.resize(index + 1, 0.0);
        }
    }

    fn ensure_str_slot(&mut self, index: usize) {
        if index >= self.str_scalars.len() {
            self.str_scalars.resize(index + 1, Rc::new(String::new()));
        }
    }

    fn ensure_num_array_slot(&mut self, index: usize) {
        if index >= self.num_arrays.len() {
            self.num_arrays.resize_with(index + 1, || NumArray::Undefined);
        }
    }

    fn ensure_str_array_slot(&mut self, index: usize) {
        if index >= self.str_arrays.len() {
            self.str_arrays.resize_with(index + 1, || StrArray::Undefined);
        }
    }

    fn load_scalar(&mut self, slot: u32) -> Value {
        let index = (slot >> 1) as usize;
        if slot & 1 == 1 {
            self.ensure_str_slot(index);
            Value::Str(self.str_scalars[index].clone())
        } else {
            self.ensure_num_slot(index);
            Value::Num(self.num_scalars[index])
        }
    }

    fn store_scalar(&mut self, slot: u32, value: Value) -> Result<()> {
        let index = (slot >> 1) as usize;
        if slot & 1 == 1 {
            self.ensure_str_slot(index);
            self.str_scalars[index] = Rc::new(value.coerce_to_string().canonical_string());
        } else {
            self.ensure_num_slot(index);
            self.num_scalars[index] = value.as_num()?;
        }
        Ok(())
    }

    /// Runs to completion (`HALT`) or the first error.
    pub fn run(&mut self, console: &mut dyn Console, graphics: &mut dyn GraphicsHost) -> Result<()> {
        while !self.halted {
            if let Err(e) = self.step(console, graphics) {
                tracing::debug!(pc = self.pc, line = self.last_line, kind = ?e.kind, "vm dispatch error");
                return Err(e);
            }
        }
        Ok(())
    }

    fn fetch(&mut self) -> Opcode {
        let op = self.program.code[self.pc].clone();
        self.last_line = self.program.line_for_pc(self.pc).unwrap_or(self.last_line);
        self.pc += 1;
        op
    }

    fn step(&mut self, console: &mut dyn Console, graphics: &mut dyn GraphicsHost) -> Result<()> {
        let op = self.fetch();
        match op {
            Opcode::PushNum(n) => self.stack.push(Value::Num(n)),
            Opcode::PushStr(s) => self.stack.push(Value::Str(s)),

            Opcode::Load(slot) => {
                let v = self.load_scalar(slot);
                self.stack.push(v);
            }
            Opcode::Store(slot) => {
                let v = self.pop()?;
                self.store_scalar(slot, v)?;
            }

            Opcode::DimArr { slot, dim } => self.op_dim(slot, dim)?,
            Opcode::LoadArr { slot, dim } => self.op_load_arr(slot, dim)?,
            Opcode::StoreArr { slot, dim } => self.op_store_arr(slot, dim)?,

            Opcode::Add => self.op_add()?,
            Opcode::Sub => self.op_binary_num(|a, b| Ok(a - b))?,
            Opcode::Mul => self.op_binary_num(|a, b| Ok(a * b))?,
            Opcode::Div => self.op_div()?,
            Opcode::Pow => self.op_binary_num(|a, b| Ok(a.powf(b)))?,
            Opcode::Mod => self.op_mod()?,
            Opcode::Neg => {
                let a = self.pop_num()?;
                self.stack.push(Value::Num(-a));
            }

            Opcode::Ceq => self.op_compare(|o| o == std::cmp::Ordering::Equal)?,
            Opcode::Cne => self.op_compare(|o| o != std::cmp::Ordering::Equal)?,
            Opcode::Clt => self.op_compare(|o| o == std::cmp::Ordering::Less)?,
            Opcode::Cle => self.op_compare(|o| o != std::cmp::Ordering::Greater)?,
            Opcode::Cgt => self.op_compare(|o| o == std::cmp::Ordering::Greater)?,
            Opcode::Cge => self.op_compare(|o| o != std::cmp::Ordering::Less)?,

            Opcode::And => {
                let b = self.pop()?.truthy()?;
                let a = self.pop()?.truthy()?;
                self.stack.push(Value::bool(a && b));
            }
            Opcode::Or => {
                let b = self.pop()?.truthy()?;
                let a = self.pop()?.truthy()?;
                self.stack.push(Value::bool(a || b));
            }
            Opcode::Not => {
                let a = self.pop()?.truthy()?;
                self.stack.push(Value::bool(!a));
            }

            Opcode::Jmp(target) => self.pc = target,
            Opcode::Jz(target) => {
                if !self.pop()?.truthy()? {
                    self.pc = target;
                }
            }

            Opcode::Gosub(target) => {
                self.push_return(self.pc)?;
                self.pc = target;
            }
            Opcode::RetSub => {
                self.pc = self.return_stack.pop().ok_or_else(|| self.err(RuntimeErrorKind::ReturnWithoutGosub))?;
            }

            Opcode::OnGoto(idx) => self.op_on(idx, false)?,
            Opcode::OnGosub(idx) => self.op_on(idx, true)?,

            Opcode::ForInit(slot) => {
                let step = self.pop_num()?;
                let end = self.pop_num()?;
                self.loop_frames.push(LoopFrame { slot, end, step, check_pc: self.pc });
            }
            Opcode::ForCheck { slot: _, exit_pc } => self.op_for_check(exit_pc)?,
            Opcode::ForIncr(slot) => self.op_for_incr(slot)?,

            Opcode::CallFn { fn_id, argc } => self.op_call_fn(fn_id, argc, console, graphics)?,

            Opcode::Print => {
                let v = self.pop()?;
                let s = v.canonical_string();
                self.print_col += s.chars().count();
                console.print(&s);
            }
            Opcode::PrintZone => {
                let pad = 14 - (self.print_col % 14);
                let spaces = " ".repeat(pad);
                self.print_col += spaces.len();
                console.print(&spaces);
            }
            Opcode::PrintNewline => {
                console.print("\n");
                self.print_col = 0;
            }
            Opcode::SuppressNewline => {}

            Opcode::Halt => self.halted = true,
        }
        Ok(())
    }

    fn op_dim(&mut self, slot: u32, dim: u8) -> Result<()> {
        let index = (slot >> 1) as usize;
        let is_string = slot & 1 == 1;
        if dim == 1 {
            let n = self.pop_num()? as i64;
            if n < 0 {
                return Err(self.err(RuntimeErrorKind::SubscriptOutOfRange));
            }
            if is_string {
                self.ensure_str_array_slot(index);
                self.str_arrays[index] = StrArray::D1(vec![Rc::new(String::new()); n as usize + 1]);
            } else {
                self.ensure_num_array_slot(index);
                self.num_arrays[index] = NumArray::D1(vec![0.0; n as usize + 1]);
            }
        } else {
            let cols = self.pop_num()? as i64;
            let rows = self.pop_num()? as i64;
            if rows < 0 || cols < 0 {
                return Err(self.err(RuntimeErrorKind::SubscriptOutOfRange));
            }
            if is_string {
                self.ensure_str_array_slot(index);
                self.str_arrays[index] =
                    StrArray::D2(vec![vec![Rc::new(String::new()); cols as usize + 1]; rows as usize + 1]);
            } else {
                self.ensure_num_array_slot(index);
                self.num_arrays[index] = NumArray::D2(vec![vec![0.0; cols as usize + 1]; rows as usize + 1]);
            }
        }
        Ok(())
    }

    fn op_load_arr(&mut self, slot: u32, dim: u8) -> Result<()> {
        let index = (slot >> 1) as usize;
        let is_string = slot & 1 == 1;
        if dim == 1 {
            let i = self.pop_num()? as i64;
            if is_string {
                self.ensure_str_array_slot(index);
                match &self.str_arrays[index] {
                    StrArray::D1(v) => {
                        let v = v.get(i as usize).cloned().ok_or_else(|| self.err(RuntimeErrorKind::SubscriptOutOfRange))?;
                        self.stack.push(Value::Str(v));
                    }
                    StrArray::Undefined => return Err(self.err(RuntimeErrorKind::UndefinedArray)),
                    StrArray::D2(_) => return Err(self.err(RuntimeErrorKind::TypeMismatch)),
                }
            } else {
                self.ensure_num_array_slot(index);
                match &self.num_arrays[index] {
                    NumArray::D1(v) => {
                        let v = *v.get(i as usize).ok_or_else(|| self.err(RuntimeErrorKind::SubscriptOutOfRange))?;
                        self.stack.push(Value::Num(v));
                    }
                    NumArray::Undefined => return Err(self.err(RuntimeErrorKind::UndefinedArray)),
                    NumArray::D2(_) => return Err(self.err(RuntimeErrorKind::TypeMismatch)),
                }
            }
        } else {
            let j = self.pop_num()? as i64;
            let i = self.pop_num()? as i64;
            if is_string {
                self.ensure_str_array_slot(index);
                match &self.str_arrays[index] {
                    StrArray::D2(v) => {
                        let row = v.get(i as usize).ok_or_else(|| self.err(RuntimeErrorKind::SubscriptOutOfRange))?;
                        let cell = row.get(j as usize).cloned().ok_or_else(|| self.err(RuntimeErrorKind::SubscriptOutOfRange))?;
                        self.stack.push(Value::Str(cell));
                    }
                    StrArray::Undefined => return Err(self.err(RuntimeErrorKind::UndefinedArray)),
                    StrArray::D1(_) => return Err(self.err(RuntimeErrorKind::TypeMismatch)),
                }
            } else {
                self.ensure_num_array_slot(index);
                match &self.num_arrays[index] {
                    NumArray::D2(v) => {
                        let row = v.get(i as usize).ok_or_else(|| self.err(RuntimeErrorKind::SubscriptOutOfRange))?;
                        let cell = *row.get(j as usize).ok_or_else(|| self.err(RuntimeErrorKind::SubscriptOutOfRange))?;
                        self.stack.push(Value::Num(cell));
                    }
                    NumArray::Undefined => return Err(self.err(RuntimeErrorKind::UndefinedArray)),
                    NumArray::D1(_) => return Err(self.err(RuntimeErrorKind::TypeMismatch)),
                }
            }
        }
        Ok(())
    }

    fn op_store_arr(&mut self, slot: u32, dim: u8) -> Result<()> {
        let index = (slot >> 1) as usize;
        let is_string = slot & 1 == 1;
        let value = self.pop()?;
        if dim == 1 {
            let i = self.pop_num()? as i64;
            if is_string {
                self.ensure_str_array_slot(index);
                match &mut self.str_arrays[index] {
                    StrArray::D1(v) => {
                        let cell = v.get_mut(i as usize).ok_or_else(|| RuntimeError::at(RuntimeErrorKind::SubscriptOutOfRange, self.last_line))?;
                        *cell = Rc::new(value.coerce_to_string().canonical_string());
                    }
                    StrArray::Undefined => return Err(self.err(RuntimeErrorKind::UndefinedArray)),
                    StrArray::D2(_) => return Err(self.err(RuntimeErrorKind::TypeMismatch)),
                }
            } else {
                let n = value.as_num()?;
                self.ensure_num_array_slot(index);
                match &mut self.num_arrays[index] {
                    NumArray::D1(v) => {
                        let cell = v.get_mut(i as usize).ok_or_else(|| RuntimeError::at(RuntimeErrorKind::SubscriptOutOfRange, self.last_line))?;
                        *cell = n;
                    }
                    NumArray::Undefined => return Err(self.err(RuntimeErrorKind::UndefinedArray)),
                    NumArray::D2(_) => return Err(self.err(RuntimeErrorKind::TypeMismatch)),
                }
            }
        } else {
            let j = self.pop_num()? as i64;
            let i = self.pop_num()? as i64;
            if is_string {
                self.ensure_str_array_slot(index);
                match &mut self.str_arrays[index] {
                    StrArray::D2(v) => {
                        let row = v.get_mut(i as usize).ok_or_else(|| RuntimeError::at(RuntimeErrorKind::SubscriptOutOfRange, self.last_line))?;
                        let cell = row.get_mut(j as usize).ok_or_else(|| RuntimeError::at(RuntimeErrorKind::SubscriptOutOfRange, self.last_line))?;
                        *cell = Rc::new(value.coerce_to_string().canonical_string());
                    }
                    StrArray::Undefined => return Err(self.err(RuntimeErrorKind::UndefinedArray)),
                    StrArray::D1(_) => return Err(self.err(RuntimeErrorKind::TypeMismatch)),
                }
            } else {
                let n = value.as_num()?;
                self.ensure_num_array_slot(index);
                match &mut self.num_arrays[index] {
                    NumArray::D2(v) => {
                        let row = v.get_mut(i as usize).ok_or_else(|| RuntimeError::at(RuntimeErrorKind::SubscriptOutOfRange, self.last_line))?;
                        let cell = row.get_mut(j as usize).ok_or_else(|| RuntimeError::at(RuntimeErrorKind::SubscriptOutOfRange, self.last_line))?;
                        *cell = n;
                    }
                    NumArray::Undefined => return Err(self.err(RuntimeErrorKind::UndefinedArray)),
                    NumArray::D1(_) => return Err(self.err(RuntimeErrorKind::TypeMismatch)),
                }
            }
        }
        Ok(())
    }

    fn op_add(&mut self) -> Result<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (&a, &b) {
            (Value::Num(x), Value::Num(y)) => self.stack.push(Value::Num(x + y)),
            _ => {
                let mut s = a.canonical_string();
                s.push_str(&b.canonical_string());
                self.stack.push(Value::str(s));
            }
        }
        Ok(())
    }

    fn op_binary_num(&mut self, f: impl Fn(f64, f64) -> Result<f64>) -> Result<()> {
        let b = self.pop_num()?;
        let a = self.pop_num()?;
        self.stack.push(Value::Num(f(a, b)?));
        Ok(())
    }

    fn op_div(&mut self) -> Result<()> {
        let b = self.pop_num()?;
        let a = self.pop_num()?;
        if b == 0.0 {
            return Err(self.err(RuntimeErrorKind::DivisionByZero));
        }
        self.stack.push(Value::Num(a / b));
        Ok(())
    }

    fn op_mod(&mut self) -> Result<()> {
        let b = self.pop_num()?;
        let a = self.pop_num()?;
        if b == 0.0 {
            return Err(self.err(RuntimeErrorKind::DivisionByZero));
        }
        self.stack.push(Value::Num(a % b));
        Ok(())
    }

    fn op_compare(&mut self, f: impl Fn(std::cmp::Ordering) -> bool) -> Result<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        let ordering = match (&a, &b) {
            (Value::Num(x), Value::Num(y)) => x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal),
            _ => a.canonical_string().cmp(&b.canonical_string()),
        };
        self.stack.push(Value::bool(f(ordering)));
        Ok(())
    }

    fn op_on(&mut self, table_idx: usize, is_gosub: bool) -> Result<()> {
        let k = self.pop_num()? as i64;
        let table = &self.program.jump_tables[table_idx];
        if k >= 1 && (k as usize) <= table.len() {
            let target = table[(k - 1) as usize];
            if is_gosub {
                self.push_return(self.pc)?;
            }
            self.pc = target;
        }
        Ok(())
    }

    fn for_continues(step: f64, var: f64, end: f64) -> bool {
        if step >= 0.0 {
            var <= end
        } else {
            var >= end
        }
    }

    fn op_for_check(&mut self, exit_pc: usize) -> Result<()> {
        let frame = self.loop_frames.last().ok_or_else(|| self.err(RuntimeErrorKind::NextWithoutFor))?;
        let (var_slot, step, end) = (frame.slot, frame.step, frame.end);
        let var = self.load_scalar(var_slot).as_num()?;
        if Self::for_continues(step, var, end) {
            // falls through into the loop body, which follows immediately.
        } else {
            self.loop_frames.pop();
            self.pc = exit_pc;
        }
        Ok(())
    }

    fn op_for_incr(&mut self, slot: u32) -> Result<()> {
        if slot != NEXT_INNERMOST {
            let pos = self.loop_frames.iter().rposition(|f| f.slot == slot);
            match pos {
                Some(pos) => self.loop_frames.truncate(pos + 1),
                None => return Err(self.err(RuntimeErrorKind::NextWithoutFor)),
            }
        }
        let frame = self.loop_frames.pop().ok_or_else(|| self.err(RuntimeErrorKind::NextWithoutFor))?;
        let var = self.load_scalar(frame.slot).as_num()? + frame.step;
        self.store_scalar(frame.slot, Value::Num(var))?;
        if Self::for_continues(frame.step, var, frame.end) {
            self.pc = frame.check_pc;
            self.loop_frames.push(frame);
        }
        Ok(())
    }

    fn op_call_fn(
        &mut self,
        fn_id: FnId,
        argc: u32,
        console: &mut dyn Console,
        graphics: &mut dyn GraphicsHost,
    ) -> Result<()> {
        use FnId::*;
        match fn_id {
            Input => return self.call_input(argc, console),
            _ => {}
        }

        let real_argc = argc & !(1u32 << 30);
        let args = self.pop_args(real_argc)?;
        let result = match fn_id {
            Abs => Some(Value::Num(args[0].as_num()?.abs())),
            Int => Some(Value::Num(args[0].as_num()?.floor())),
            Sgn => Some(Value::Num(args[0].as_num()?.signum())),
            Sqr => Some(Value::Num(args[0].as_num()?.sqrt())),
            Sin => Some(Value::Num(args[0].as_num()?.sin())),
            Cos => Some(Value::Num(args[0].as_num()?.cos())),
            Tan => Some(Value::Num(args[0].as_num()?.tan())),
            Atn => Some(Value::Num(args[0].as_num()?.atan())),
            Log => {
                let x = args[0].as_num()?;
                if x <= 0.0 {
                    return Err(self.err(RuntimeErrorKind::DomainError));
                }
                Some(Value::Num(x.ln()))
            }
            Exp => Some(Value::Num(args[0].as_num()?.exp())),
            Pi => Some(Value::Num(std::f64::consts::PI)),
            Rad => Some(Value::Num(args[0].as_num()?.to_radians())),
            Deg => Some(Value::Num(args[0].as_num()?.to_degrees())),
            Min => Some(Value::Num(args[0].as_num()?.min(args[1].as_num()?))),
            Max => Some(Value::Num(args[0].as_num()?.max(args[1].as_num()?))),
            Clamp => {
                let (x, lo, hi) = (args[0].as_num()?, args[1].as_num()?, args[2].as_num()?);
                Some(Value::Num(x.clamp(lo, hi)))
            }
            ModFn => {
                let (a, b) = (args[0].as_num()?, args[1].as_num()?);
                if b == 0.0 {
                    return Err(self.err(RuntimeErrorKind::DivisionByZero));
                }
                Some(Value::Num(a % b))
            }

            Rnd => Some(Value::Num(self.rng.gen::<f64>())),
            Rndi => {
                let n = args[0].as_num()? as i64;
                Some(Value::Num(self.rng.gen_range(0..=n.max(0)) as f64))
            }
            Randomize => {
                if let Some(seed) = args.first() {
                    self.rng = StdRng::seed_from_u64(seed.as_num()? as u64);
                } else {
                    self.rng = StdRng::from_entropy();
                }
                None
            }
            Timer => Some(Value::Num(self.clock.seconds())),

            StrDollar => Some(Value::str(args[0].canonical_string())),
            Val => {
                let s = args[0].as_str()?;
                Some(Value::Num(s.trim().parse::<f64>().unwrap_or(0.0)))
            }
            Len => Some(Value::Num(args[0].as_str()?.chars().count() as f64)),
            ChrDollar => {
                let n = args[0].as_num()? as u32;
                let ch = char::from_u32(n).unwrap_or('\0');
                Some(Value::str(ch.to_string()))
            }
            Asc => {
                let s = args[0].as_str()?;
                Some(Value::Num(s.chars().next().map(|c| c as u32).unwrap_or(0) as f64))
            }
            LeftDollar => {
                let s = args[0].as_str()?;
                let k = (args[1].as_num()? as usize).min(s.chars().count());
                Some(Value::str(s.chars().take(k).collect::<String>()))
            }
            RightDollar => {
                let s = args[0].as_str()?;
                let len = s.chars().count();
                let k = (args[1].as_num()? as usize).min(len);
                Some(Value::str(s.chars().skip(len - k).collect::<String>()))
            }
            MidDollar => {
                let s = args[0].as_str()?;
                let len = s.chars().count();
                let p = (args[1].as_num()? as usize).max(1) - 1;
                let take = if args.len() >= 3 { args[2].as_num()? as usize } else { len.saturating_sub(p) };
                Some(Value::str(s.chars().skip(p.min(len)).take(take).collect::<String>()))
            }
            Spc => {
                let n = args[0].as_num()?.max(0.0) as usize;
                Some(Value::str(" ".repeat(n)))
            }
            Tab => {
                let col = args[0].as_num()?.max(1.0) as usize;
                let n = col.saturating_sub(1).saturating_sub(self.print_col);
                Some(Value::str(" ".repeat(n)))
            }
            Instr => {
                let (start, hay, needle) = if args.len() == 3 {
                    (args[0].as_num()? as usize, args[1].as_str()?.clone(), args[2].as_str()?.clone())
                } else {
                    (1, args[0].as_str()?.clone(), args[1].as_str()?.clone())
                };
                let haystack: Vec<char> = hay.chars().collect();
                let needle: Vec<char> = needle.chars().collect();
                let from = start.saturating_sub(1);
                let mut found = 0usize;
                if !needle.is_empty() && from <= haystack.len() {
                    for i in from..=haystack.len().saturating_sub(needle.len()) {
                        if haystack[i..].starts_with(needle.as_slice()) {
                            found = i + 1;
                            break;
                        }
                    }
                }
                Some(Value::Num(found as f64))
            }
            StringDollar => {
                let n = args[0].as_num()?.max(0.0) as usize;
                let ch = match &args[1] {
                    Value::Num(c) => char::from_u32(*c as u32).unwrap_or('\0'),
                    Value::Str(s) => s.chars().next().unwrap_or('\0'),
                };
                Some(Value::str(ch.to_string().repeat(n)))
            }

            Locate => {
                let row = args[0].as_num()? as i64;
                let col = args.get(1).map(|v| v.as_num()).transpose()?.unwrap_or(1.0) as i64;
                console.print(&format!("\x1b[{};{}H", row, col));
                self.print_col = col.max(1) as usize - 1;
                None
            }

            Screen => {
                let w = args[0].as_num()? as i64;
                let h = args.get(1).map(|v| v.as_num()).transpose()?.unwrap_or(w as f64) as i64;
                graphics.ensure_screen(w, h).map_err(|_| self.err(RuntimeErrorKind::DomainError))?;
                None
            }
            Cls => {
                graphics.cls().map_err(|_| self.err(RuntimeErrorKind::DomainError))?;
                None
            }
            Color => {
                match args.len() {
                    1 => graphics.color_palette(args[0].as_num()? as i64),
                    3 => graphics.color_rgb(args[0].as_num()?, args[1].as_num()?, args[2].as_num()?),
                    _ => return Err(self.err(RuntimeErrorKind::TypeMismatch)),
                }
                None
            }
            ColorHsv => {
                graphics.color_hsv(args[0].as_num()?, args[1].as_num()?, args[2].as_num()?);
                None
            }
            Pset => {
                graphics.pset(args[0].as_num()?, args[1].as_num()?).map_err(|_| self.err(RuntimeErrorKind::DomainError))?;
                None
            }
            Line => {
                let shorthand = argc & (1 << 30) != 0;
                if shorthand {
                    let (x2, y2) = (args[0].as_num()?, args[1].as_num()?);
                    if let Some(c) = args.get(2) {
                        graphics.color_palette(c.as_num()? as i64);
                    }
                    graphics.line_to(x2, y2).map_err(|_| self.err(RuntimeErrorKind::DomainError))?;
                } else {
                    let (x1, y1, x2, y2) = (args[0].as_num()?, args[1].as_num()?, args[2].as_num()?, args[3].as_num()?);
                    if let Some(c) = args.get(4) {
                        graphics.color_palette(c.as_num()? as i64);
                    }
                    graphics.line(x1, y1, x2, y2).map_err(|_| self.err(RuntimeErrorKind::DomainError))?;
                }
                None
            }
            Circle => {
                graphics
                    .circle(args[0].as_num()?, args[1].as_num()?, args[2].as_num()?)
                    .map_err(|_| self.err(RuntimeErrorKind::DomainError))?;
                None
            }
            Box => {
                let fill = args.get(4).map(|v| v.as_num()).transpose()?.map(|n| n != 0.0).unwrap_or(false);
                graphics
                    .box_(args[0].as_num()?, args[1].as_num()?, args[2].as_num()?, args[3].as_num()?, fill)
                    .map_err(|_| self.err(RuntimeErrorKind::DomainError))?;
                None
            }
            Paint => {
                graphics.paint(args[0].as_num()?, args[1].as_num()?).map_err(|_| self.err(RuntimeErrorKind::DomainError))?;
                None
            }
            Flush => {
                graphics.flush().map_err(|_| self.err(RuntimeErrorKind::DomainError))?;
                None
            }
            SaveImage => {
                graphics.save(args[0].as_str()?).map_err(|_| self.err(RuntimeErrorKind::DomainError))?;
                None
            }
            Sleep => {
                graphics.sleep_ms(args[0].as_num()?.max(0.0) as u64);
                None
            }
            Point => Some(Value::bool(graphics.point_non_black(args[0].as_num()?, args[1].as_num()?))),
            GLocate => {
                graphics.text_locate(args[0].as_num()?, args[1].as_num()?);
                None
            }
            GPrint => {
                graphics.text_print(args[0].as_str()?);
                None
            }

            Input => unreachable!("handled above"),
        };

        if let Some(v) = result {
            self.stack.push(v);
        }
        Ok(())
    }

    fn call_input(&mut self, slot: u32, console: &mut dyn Console) -> Result<()> {
        let line = console.read_line().unwrap_or_default();
        let is_string = slot & 1 == 1;
        let value = if is_string { Value::str(line) } else { Value::Num(line.trim().parse::<f64>().unwrap_or(0.0)) };
        self.store_scalar(slot, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::console::BufferConsole;
    use crate::graphics::NullGraphicsHost;
    use crate::program::StoredProgram;

    fn run_program(lines: &[(u32, &str)], input: &str) -> String {
        let mut p = StoredProgram::new();
        for (n, s) in lines {
            p.set_line(*n, s);
        }
        let compiled = compile(&p).expect("compiles");
        let mut vm = Vm::new(&compiled, Some(1));
        let mut console = BufferConsole::new(input);
        let mut gfx = NullGraphicsHost::new();
        vm.run(&mut console, &mut gfx).expect("runs");
        console.output
    }

    #[test]
    fn test_assignment_and_print() {
        let out = run_program(&[(10, "A = 3 : B = 4"), (20, "PRINT A + B")], "");
        assert_eq!(out, "7\n");
    }

    #[test]
    fn test_mixed_string_number_print() {
        let out = run_program(&[(10, "A$=\"HI\" : N=7"), (20, "PRINT A$; N"), (30, "PRINT A$, N")], "");
        assert_eq!(out, "HI7\nHI            7\n");
    }

    #[test]
    fn test_for_next_sum() {
        let out = run_program(&[(10, "S=0"), (20, "FOR I=1 TO 5 : S=S+I : NEXT"), (30, "PRINT S")], "");
        assert_eq!(out, "15\n");
    }

    #[test]
    fn test_gosub_return() {
        let out = run_program(&[(10, "GOSUB 100"), (20, "PRINT \"B\""), (30, "END"), (100, "PRINT \"A\" : RETURN")], "");
        assert_eq!(out, "A\nB\n");
    }

    #[test]
    fn test_if_then_else_line_targets() {
        let lines = [
            (10, "INPUT S"),
            (20, "IF S >= 60 THEN 100 ELSE 200"),
            (100, "PRINT \"PASS\" : END"),
            (200, "PRINT \"FAIL\" : END"),
        ];
        assert_eq!(run_program(&lines, "59\n"), "FAIL\n");
        assert_eq!(run_program(&lines, "60\n"), "PASS\n");
    }

    #[test]
    fn test_def_fn_use() {
        let out = run_program(&[(10, "DEF FN SQR2(X) = X*X"), (20, "PRINT FN SQR2(6)")], "");
        assert_eq!(out, "36\n");
    }

    #[test]
    fn test_for_zero_iterations() {
        let out = run_program(&[(10, "FOR I=1 TO 0 : PRINT I : NEXT"), (20, "PRINT \"DONE\"")], "");
        assert_eq!(out, "DONE\n");
    }

    #[test]
    fn test_for_descending_step() {
        let out = run_program(&[(10, "FOR I=5 TO 1 STEP -1 : PRINT I; : NEXT"), (20, "PRINT \"\"")], "");
        assert_eq!(out, "54321\n");
    }

    #[test]
    fn test_on_goto_out_of_range_falls_through() {
        let out = run_program(&[(10, "ON 9 GOTO 100,200"), (20, "PRINT \"FELLTHROUGH\"")], "");
        assert_eq!(out, "FELLTHROUGH\n");
    }

    #[test]
    fn test_dim_subscript_zero_is_valid() {
        let out = run_program(&[(10, "DIM A(3)"), (20, "A(0) = 9"), (30, "PRINT A(0)")], "");
        assert_eq!(out, "9\n");
    }

    #[test]
    fn test_division_by_zero_errors() {
        let mut p = StoredProgram::new();
        p.set_line(10, "PRINT 1/0");
        let compiled = compile(&p).unwrap();
        let mut vm = Vm::new(&compiled, Some(1));
        let mut console = BufferConsole::default();
        let mut gfx = NullGraphicsHost::new();
        let err = vm.run(&mut console, &mut gfx).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
    }

    #[test]
    fn test_val_str_round_trip() {
        let out = run_program(&[(10, "PRINT VAL(STR$(42))")], "");
        assert_eq!(out, "42\n");
    }

    #[test]
    fn test_unbounded_gosub_recursion_raises_stack_overflow() {
        let mut p = StoredProgram::new();
        p.set_line(10, "GOSUB 10");
        let compiled = compile(&p).unwrap();
        let mut vm = Vm::with_stack_limit(&compiled, Some(1), 16);
        let mut console = BufferConsole::default();
        let mut gfx = NullGraphicsHost::new();
        let err = vm.run(&mut console, &mut gfx).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::StackOverflow);
    }

    #[test]
    fn test_asc_chr_round_trip() {
        let out = run_program(&[(10, "PRINT ASC(CHR$(65))")], "");
        assert_eq!(out, "65\n");
    }

    #[test]
    fn test_left_right_concat_identity() {
        let out = run_program(&[(10, "A$=\"HELLO\""), (20, "PRINT LEFT$(A$,2) + RIGHT$(A$,3)")], "");
        assert_eq!(out, "HELLO\n");
    }
}
