//! The Fable virtual machine
//!
//! Executes one cooperative slice of a thread at a time: instructions
//! run until a yield point (dialogue line, input wait, call, return,
//! select) or until the thread's frame stack empties. The scheduler
//! owns thread lifecycles; the VM owns the global store and resolves
//! cross-module calls through its [`ModuleRegistry`].

mod error;
mod host;

pub use error::RuntimeError;
pub use host::{Host, NullHost};

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::AssignOp;
use crate::bytecode::{Const, CurvePointValue, Instruction, Subroutine, Symbol, Value};
use crate::module::{Module, ModuleError, ModuleRegistry};
use crate::scheduler::{ActionQueue, ThreadAction};

/// Maximum script call nesting
const MAX_CALL_DEPTH: usize = 64;

/// The per-thread value stack
#[derive(Debug, Clone, Default)]
pub struct OperandStack(Vec<Value>);

impl OperandStack {
    /// Create an empty stack
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a value
    pub fn push(&mut self, value: Value) {
        self.0.push(value);
    }

    /// Pop a value; underflow names the instruction for the fault
    pub fn pop(&mut self, op: &'static str) -> Result<Value, RuntimeError> {
        self.0.pop().ok_or(RuntimeError::StackUnderflow { op })
    }

    /// Current depth
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the stack is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The top value, if any
    #[must_use]
    pub fn peek(&self) -> Option<&Value> {
        self.0.last()
    }
}

/// One call frame
#[derive(Debug)]
pub struct Frame {
    /// Module the subroutine came from
    pub module: Rc<Module>,
    /// The executing body
    pub subroutine: Rc<Subroutine>,
    /// Next instruction index
    pub ip: usize,
    /// Parameter bindings
    pub locals: HashMap<String, Value>,
}

/// Execution state of one script thread
#[derive(Debug)]
pub struct ThreadContext {
    /// Thread name, unique within the scheduler
    pub name: String,
    /// Call frames, innermost last
    pub frames: Vec<Frame>,
    /// Operand stack shared by all frames of the thread
    pub stack: OperandStack,
    /// Label chosen by the most recent select
    pub selected: Option<Rc<str>>,
}

impl ThreadContext {
    /// Create a thread entering a subroutine with no arguments
    pub fn new(
        name: impl Into<String>,
        module: Rc<Module>,
        index: usize,
    ) -> Result<Self, ModuleError> {
        let subroutine = module.subroutine(index)?;
        Ok(Self {
            name: name.into(),
            frames: vec![Frame {
                module,
                subroutine,
                ip: 0,
                locals: HashMap::new(),
            }],
            stack: OperandStack::new(),
            selected: None,
        })
    }

    /// Whether the thread has finished executing
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Why a slice ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceOutcome {
    /// The thread hit a yield point and remains runnable or suspended
    Yielded,
    /// The thread's outermost subroutine returned
    Finished,
}

/// The virtual machine: global store plus module resolution
#[derive(Debug, Default)]
pub struct Vm {
    /// The global variable store, shared by all threads
    pub globals: HashMap<String, Value>,
    /// Loaded modules for far-call resolution
    pub registry: ModuleRegistry,
}

impl Vm {
    /// Create a VM with an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a VM over an existing registry
    #[must_use]
    pub fn with_registry(registry: ModuleRegistry) -> Self {
        Self {
            globals: HashMap::new(),
            registry,
        }
    }

    /// Read a global, treating missing entries as null
    #[must_use]
    pub fn global(&self, name: &str) -> Value {
        self.globals.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Execute one slice of a thread
    pub fn run_slice(
        &mut self,
        thread: &mut ThreadContext,
        host: &mut dyn Host,
        actions: &ActionQueue,
    ) -> Result<SliceOutcome, RuntimeError> {
        loop {
            let (instruction, module) = {
                let Some(frame) = thread.frames.last_mut() else {
                    return Ok(SliceOutcome::Finished);
                };
                match frame.subroutine.instructions.get(frame.ip) {
                    Some(instruction) => {
                        let instruction = instruction.clone();
                        frame.ip += 1;
                        (instruction, Rc::clone(&frame.module))
                    }
                    // Ran off the end of the body: implicit return
                    None => (Instruction::Return, Rc::clone(&frame.module)),
                }
            };

            match instruction {
                Instruction::PushValue(constant) => {
                    let value = match constant {
                        Const::Null => Value::Null,
                        Const::Bool(v) => Value::Bool(v),
                        Const::Int(v) => Value::Int(v),
                        Const::Float(v) => Value::Float(v),
                        Const::Str(id) => Value::Str(module.string(id)?),
                    };
                    thread.stack.push(value);
                }
                Instruction::PushGlobal(id) => {
                    let name = module.string(id)?;
                    thread.stack.push(self.global(&name));
                }
                Instruction::PushLocal(id) => {
                    let name = module.string(id)?;
                    let value = thread
                        .frames
                        .last()
                        .and_then(|f| f.locals.get(name.as_ref()))
                        .cloned()
                        .unwrap_or(Value::Null);
                    thread.stack.push(value);
                }
                Instruction::ApplyBinary(op) => {
                    let rhs = thread.stack.pop("apply_binary")?;
                    let lhs = thread.stack.pop("apply_binary")?;
                    thread.stack.push(Value::binary(op, &lhs, &rhs)?);
                }
                Instruction::ApplyUnary(op) => {
                    let operand = thread.stack.pop("apply_unary")?;
                    thread.stack.push(Value::unary(op, &operand)?);
                }
                Instruction::AssignGlobal(id, op) => {
                    let value = thread.stack.pop("assign_global")?;
                    let name = module.string(id)?;
                    let new = combined(self.global(&name), op, value)?;
                    self.globals.insert(name.to_string(), new);
                }
                Instruction::AssignLocal(id, op) => {
                    let value = thread.stack.pop("assign_local")?;
                    let name = module.string(id)?;
                    let frame = thread
                        .frames
                        .last_mut()
                        .ok_or(RuntimeError::StackUnderflow { op: "assign_local" })?;
                    let old = frame
                        .locals
                        .get(name.as_ref())
                        .cloned()
                        .unwrap_or(Value::Null);
                    let new = combined(old, op, value)?;
                    frame.locals.insert(name.to_string(), new.clone());
                    // Sigiled parameters stay visible as globals
                    if name.starts_with('$') {
                        self.globals.insert(name.to_string(), new);
                    }
                }
                Instruction::ConvertToDelta => {
                    let value = thread.stack.pop("convert_to_delta")?;
                    thread.stack.push(value.into_delta()?);
                }
                Instruction::Pop => {
                    thread.stack.pop("pop")?;
                }
                Instruction::SetDialogueBlock { box_name, name } => {
                    let box_name = module.string(box_name)?;
                    let name = module.string(name)?;
                    self.globals.insert(
                        "$dialogue_box".to_string(),
                        Value::Str(Rc::clone(&box_name)),
                    );
                    self.globals
                        .insert("$dialogue_block".to_string(), Value::Str(Rc::clone(&name)));
                    host.dialogue_block_entered(&box_name, &name);
                }
                Instruction::Say(id) => {
                    let text = module.string(id)?;
                    host.dialogue_line(&text);
                    return Ok(SliceOutcome::Yielded);
                }
                Instruction::WaitForInput => {
                    // The slice ends whether or not input was ready;
                    // only an unready host suspends the thread
                    if !host.wait_for_input() {
                        actions.push(ThreadAction::Suspend {
                            name: thread.name.clone(),
                            timeout: None,
                        });
                    }
                    return Ok(SliceOutcome::Yielded);
                }
                Instruction::Call { symbol, argc } => {
                    let args = pop_args(&mut thread.stack, argc)?;
                    match symbol {
                        Symbol::Index(index) => {
                            self.call_into(thread, &module, usize::from(index), &args)?;
                        }
                        Symbol::Name(id) => {
                            let name = module.string(id)?;
                            if let Some(index) = module.find(&name) {
                                self.call_into(thread, &module, index, &args)?;
                            } else {
                                let result = host
                                    .call_builtin(&thread.name, &name, &args, actions)
                                    .unwrap_or(Value::Null);
                                thread.stack.push(result);
                            }
                        }
                    }
                    // Every call ends the slice, resolved or not, so
                    // per-tick work stays bounded and any actions a
                    // built-in enqueued apply on the very next tick
                    return Ok(SliceOutcome::Yielded);
                }
                Instruction::CallFar {
                    module: path,
                    symbol,
                    argc,
                } => {
                    let args = pop_args(&mut thread.stack, argc)?;
                    let path = module.string(path)?;
                    let symbol = module.string(symbol)?;
                    let target = self.registry.get(&path);
                    match target.and_then(|m| m.find(&symbol).map(|i| (m, i))) {
                        Some((target, index)) => {
                            self.call_into(thread, &target, index, &args)?;
                        }
                        // Unresolved far calls evaluate to null
                        None => thread.stack.push(Value::Null),
                    }
                    return Ok(SliceOutcome::Yielded);
                }
                Instruction::Jump(target) => {
                    jump(thread, target)?;
                }
                Instruction::JumpIfEquals(target) => {
                    let rhs = thread.stack.pop("jump_if_equals")?;
                    let lhs = thread.stack.pop("jump_if_equals")?;
                    if lhs.loose_eq(&rhs) {
                        jump(thread, target)?;
                    }
                }
                Instruction::JumpIfNotEquals(target) => {
                    let rhs = thread.stack.pop("jump_if_not_equals")?;
                    let lhs = thread.stack.pop("jump_if_not_equals")?;
                    if !lhs.loose_eq(&rhs) {
                        jump(thread, target)?;
                    }
                }
                Instruction::Return => {
                    thread.frames.pop();
                    if thread.frames.is_empty() {
                        return Ok(SliceOutcome::Finished);
                    }
                    // The call expression's value
                    thread.stack.push(Value::Null);
                    return Ok(SliceOutcome::Yielded);
                }
                Instruction::Select(entries) => {
                    if entries.is_empty() {
                        thread.selected = None;
                        continue;
                    }
                    let mut labels = Vec::with_capacity(entries.len());
                    for (label, _) in &entries {
                        labels.push(module.string(*label)?.to_string());
                    }
                    let choice = host.present_choices(&labels).min(labels.len() - 1);
                    thread.selected = Some(Rc::from(labels[choice].as_str()));
                    return Ok(SliceOutcome::Yielded);
                }
                Instruction::GetSelectedChoice => {
                    let value = thread
                        .selected
                        .as_ref()
                        .map_or(Value::Null, |label| Value::Str(Rc::clone(label)));
                    thread.stack.push(value);
                }
                Instruction::MakeCurve(kinds) => {
                    let mut points = Vec::with_capacity(kinds.len());
                    for kind in kinds.iter().rev() {
                        let y = pop_number(&mut thread.stack)?;
                        let x = pop_number(&mut thread.stack)?;
                        points.push(CurvePointValue {
                            x,
                            y,
                            interior: *kind == crate::ast::CurvePointKind::Interior,
                        });
                    }
                    points.reverse();
                    thread.stack.push(Value::Curve(Rc::from(points)));
                }
            }
        }
    }

    /// Push a frame for a subroutine call, binding arguments to
    /// parameters in declaration order. Sigiled parameters are mirrored
    /// into the global store.
    fn call_into(
        &mut self,
        thread: &mut ThreadContext,
        module: &Rc<Module>,
        index: usize,
        args: &[Value],
    ) -> Result<(), RuntimeError> {
        if thread.frames.len() >= MAX_CALL_DEPTH {
            return Err(RuntimeError::CallDepthExceeded {
                limit: MAX_CALL_DEPTH,
            });
        }
        let subroutine = module.subroutine(index)?;
        let mut locals = HashMap::new();
        if let Some(info) = module.info(index) {
            for (i, param) in info.params.iter().enumerate() {
                let value = args.get(i).cloned().unwrap_or(Value::Null);
                if param.starts_with('$') {
                    self.globals.insert(param.clone(), value.clone());
                }
                locals.insert(param.clone(), value);
            }
        }
        thread.frames.push(Frame {
            module: Rc::clone(module),
            subroutine,
            ip: 0,
            locals,
        });
        Ok(())
    }
}

/// Pop `argc` arguments; they were pushed right to left, so successive
/// pops produce declaration order.
fn pop_args(stack: &mut OperandStack, argc: u8) -> Result<Vec<Value>, RuntimeError> {
    let mut args = Vec::with_capacity(usize::from(argc));
    for _ in 0..argc {
        args.push(stack.pop("call")?);
    }
    Ok(args)
}

fn pop_number(stack: &mut OperandStack) -> Result<f64, RuntimeError> {
    let value = stack.pop("make_curve")?;
    value
        .as_number()
        .ok_or(RuntimeError::CurvePointNotNumeric {
            found: value.type_name(),
        })
}

fn combined(old: Value, op: AssignOp, value: Value) -> Result<Value, RuntimeError> {
    match op.combine_op() {
        None => Ok(value),
        Some(bin) => Ok(Value::binary(bin, &old, &value)?),
    }
}

fn jump(thread: &mut ThreadContext, target: u32) -> Result<(), RuntimeError> {
    let frame = thread
        .frames
        .last_mut()
        .ok_or(RuntimeError::BadJump { target })?;
    // Landing one past the last instruction is an implicit return
    if target as usize > frame.subroutine.instructions.len() {
        return Err(RuntimeError::BadJump { target });
    }
    frame.ip = target as usize;
    Ok(())
}
