//! Bytecode instruction set for the Fable virtual machine
//!
//! A stack-based instruction set. Instructions are serialized as an
//! opcode byte followed by little-endian operands; jump targets are
//! absolute instruction indices within the owning subroutine, so the
//! variable byte width of instructions never affects control flow.

use crate::ast::{AssignOp, BinOp, CurvePointKind, UnaryOp};

use super::error::DecodeError;

/// Index into a module's string table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrId(pub u16);

impl std::fmt::Display for StrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "str#{}", self.0)
    }
}

/// An immediate constant carried by a push instruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Const {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// String constants live in the module string table
    Str(StrId),
}

impl Const {
    const TAG_NULL: u8 = 0;
    const TAG_BOOL: u8 = 1;
    const TAG_INT: u8 = 2;
    const TAG_FLOAT: u8 = 3;
    const TAG_STR: u8 = 4;

    fn encode(self, out: &mut Vec<u8>) {
        match self {
            Const::Null => out.push(Self::TAG_NULL),
            Const::Bool(b) => {
                out.push(Self::TAG_BOOL);
                out.push(u8::from(b));
            }
            Const::Int(v) => {
                out.push(Self::TAG_INT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Const::Float(v) => {
                out.push(Self::TAG_FLOAT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Const::Str(id) => {
                out.push(Self::TAG_STR);
                out.extend_from_slice(&id.0.to_le_bytes());
            }
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        match r.u8()? {
            Self::TAG_NULL => Ok(Const::Null),
            Self::TAG_BOOL => Ok(Const::Bool(r.u8()? != 0)),
            Self::TAG_INT => Ok(Const::Int(i64::from_le_bytes(r.array()?))),
            Self::TAG_FLOAT => Ok(Const::Float(f64::from_le_bytes(r.array()?))),
            Self::TAG_STR => Ok(Const::Str(StrId(r.u16()?))),
            other => Err(DecodeError::InvalidOperand(other)),
        }
    }
}

/// How a call names its target within the current module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// A subroutine resolved at compile time to its table index
    Index(u16),
    /// A name resolved at run time (built-ins, late-bound commands)
    Name(StrId),
}

impl Symbol {
    fn encode(self, out: &mut Vec<u8>) {
        match self {
            Symbol::Index(i) => {
                out.push(0);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Symbol::Name(id) => {
                out.push(1);
                out.extend_from_slice(&id.0.to_le_bytes());
            }
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        match r.u8()? {
            0 => Ok(Symbol::Index(r.u16()?)),
            1 => Ok(Symbol::Name(StrId(r.u16()?))),
            other => Err(DecodeError::InvalidOperand(other)),
        }
    }
}

/// One virtual machine instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Push an immediate constant
    PushValue(Const),
    /// Push the value of a global variable (missing globals read null)
    PushGlobal(StrId),
    /// Push the value of a frame-local variable
    PushLocal(StrId),
    /// Pop two operands (right, left) and push the operation result
    ApplyBinary(BinOp),
    /// Pop one operand and push the operation result
    ApplyUnary(UnaryOp),
    /// Pop a value and write it to a global, combining per the operator
    AssignGlobal(StrId, AssignOp),
    /// Pop a value and write it to a frame-local, combining per the
    /// operator
    AssignLocal(StrId, AssignOp),
    /// Pop a numeric value and push it rewrapped as a delta
    ConvertToDelta,
    /// Pop and discard the top of stack
    Pop,
    /// Enter a dialogue block: bind the presentation box and block name
    SetDialogueBlock { box_name: StrId, name: StrId },
    /// Emit a dialogue line (yield point)
    Say(StrId),
    /// Pause until player input (yield point)
    WaitForInput,
    /// Call a subroutine or built-in in the current module, popping
    /// `argc` arguments in declaration order (yield point)
    Call { symbol: Symbol, argc: u8 },
    /// Call a subroutine in another module by include path (yield point)
    CallFar {
        module: StrId,
        symbol: StrId,
        argc: u8,
    },
    /// Unconditional jump to an instruction index
    Jump(u32),
    /// Pop two values; jump when they compare equal
    JumpIfEquals(u32),
    /// Pop two values; jump when they compare unequal
    JumpIfNotEquals(u32),
    /// Return from the current subroutine (yield point)
    Return,
    /// Present a choice menu and suspend; entries are (label, target)
    /// pairs in declaration order (yield point)
    Select(Vec<(StrId, u32)>),
    /// Push the label chosen by the most recent select, or null
    GetSelectedChoice,
    /// Pop 2N numbers ((x, y) pairs, last pushed on top) and push a
    /// curve value; one flag per point marks interior control points
    MakeCurve(Vec<CurvePointKind>),
}

// Opcode bytes. The numbering is part of the container format.
const OP_PUSH_VALUE: u8 = 0;
const OP_PUSH_GLOBAL: u8 = 1;
const OP_PUSH_LOCAL: u8 = 2;
const OP_APPLY_BINARY: u8 = 3;
const OP_APPLY_UNARY: u8 = 4;
const OP_ASSIGN_GLOBAL: u8 = 5;
const OP_ASSIGN_LOCAL: u8 = 6;
const OP_CONVERT_TO_DELTA: u8 = 7;
const OP_POP: u8 = 8;
const OP_SET_DIALOGUE_BLOCK: u8 = 9;
const OP_SAY: u8 = 10;
const OP_WAIT_FOR_INPUT: u8 = 11;
const OP_CALL: u8 = 12;
const OP_CALL_FAR: u8 = 13;
const OP_JUMP: u8 = 14;
const OP_JUMP_IF_EQUALS: u8 = 15;
const OP_JUMP_IF_NOT_EQUALS: u8 = 16;
const OP_RETURN: u8 = 17;
const OP_SELECT: u8 = 18;
const OP_GET_SELECTED_CHOICE: u8 = 19;
const OP_MAKE_CURVE: u8 = 20;

impl Instruction {
    /// Human-readable mnemonic
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Instruction::PushValue(_) => "push_value",
            Instruction::PushGlobal(_) => "push_global",
            Instruction::PushLocal(_) => "push_local",
            Instruction::ApplyBinary(_) => "apply_binary",
            Instruction::ApplyUnary(_) => "apply_unary",
            Instruction::AssignGlobal(..) => "assign_global",
            Instruction::AssignLocal(..) => "assign_local",
            Instruction::ConvertToDelta => "convert_to_delta",
            Instruction::Pop => "pop",
            Instruction::SetDialogueBlock { .. } => "set_dialogue_block",
            Instruction::Say(_) => "say",
            Instruction::WaitForInput => "wait_for_input",
            Instruction::Call { .. } => "call",
            Instruction::CallFar { .. } => "call_far",
            Instruction::Jump(_) => "jump",
            Instruction::JumpIfEquals(_) => "jump_if_equals",
            Instruction::JumpIfNotEquals(_) => "jump_if_not_equals",
            Instruction::Return => "return",
            Instruction::Select(_) => "select",
            Instruction::GetSelectedChoice => "get_selected_choice",
            Instruction::MakeCurve(_) => "make_curve",
        }
    }

    /// Whether executing this instruction can suspend the thread
    #[must_use]
    pub const fn is_yield_point(&self) -> bool {
        matches!(
            self,
            Instruction::Say(_)
                | Instruction::WaitForInput
                | Instruction::Call { .. }
                | Instruction::CallFar { .. }
                | Instruction::Return
                | Instruction::Select(_)
        )
    }

    /// Append the serialized form to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Instruction::PushValue(c) => {
                out.push(OP_PUSH_VALUE);
                c.encode(out);
            }
            Instruction::PushGlobal(id) => {
                out.push(OP_PUSH_GLOBAL);
                out.extend_from_slice(&id.0.to_le_bytes());
            }
            Instruction::PushLocal(id) => {
                out.push(OP_PUSH_LOCAL);
                out.extend_from_slice(&id.0.to_le_bytes());
            }
            Instruction::ApplyBinary(op) => {
                out.push(OP_APPLY_BINARY);
                out.push(*op as u8);
            }
            Instruction::ApplyUnary(op) => {
                out.push(OP_APPLY_UNARY);
                out.push(*op as u8);
            }
            Instruction::AssignGlobal(id, op) => {
                out.push(OP_ASSIGN_GLOBAL);
                out.extend_from_slice(&id.0.to_le_bytes());
                out.push(*op as u8);
            }
            Instruction::AssignLocal(id, op) => {
                out.push(OP_ASSIGN_LOCAL);
                out.extend_from_slice(&id.0.to_le_bytes());
                out.push(*op as u8);
            }
            Instruction::ConvertToDelta => out.push(OP_CONVERT_TO_DELTA),
            Instruction::Pop => out.push(OP_POP),
            Instruction::SetDialogueBlock { box_name, name } => {
                out.push(OP_SET_DIALOGUE_BLOCK);
                out.extend_from_slice(&box_name.0.to_le_bytes());
                out.extend_from_slice(&name.0.to_le_bytes());
            }
            Instruction::Say(id) => {
                out.push(OP_SAY);
                out.extend_from_slice(&id.0.to_le_bytes());
            }
            Instruction::WaitForInput => out.push(OP_WAIT_FOR_INPUT),
            Instruction::Call { symbol, argc } => {
                out.push(OP_CALL);
                symbol.encode(out);
                out.push(*argc);
            }
            Instruction::CallFar {
                module,
                symbol,
                argc,
            } => {
                out.push(OP_CALL_FAR);
                out.extend_from_slice(&module.0.to_le_bytes());
                out.extend_from_slice(&symbol.0.to_le_bytes());
                out.push(*argc);
            }
            Instruction::Jump(target) => {
                out.push(OP_JUMP);
                out.extend_from_slice(&target.to_le_bytes());
            }
            Instruction::JumpIfEquals(target) => {
                out.push(OP_JUMP_IF_EQUALS);
                out.extend_from_slice(&target.to_le_bytes());
            }
            Instruction::JumpIfNotEquals(target) => {
                out.push(OP_JUMP_IF_NOT_EQUALS);
                out.extend_from_slice(&target.to_le_bytes());
            }
            Instruction::Return => out.push(OP_RETURN),
            Instruction::Select(entries) => {
                out.push(OP_SELECT);
                let count = u16::try_from(entries.len()).unwrap_or(u16::MAX);
                out.extend_from_slice(&count.to_le_bytes());
                for (label, target) in entries {
                    out.extend_from_slice(&label.0.to_le_bytes());
                    out.extend_from_slice(&target.to_le_bytes());
                }
            }
            Instruction::GetSelectedChoice => out.push(OP_GET_SELECTED_CHOICE),
            Instruction::MakeCurve(points) => {
                out.push(OP_MAKE_CURVE);
                let count = u16::try_from(points.len()).unwrap_or(u16::MAX);
                out.extend_from_slice(&count.to_le_bytes());
                for kind in points {
                    out.push(match kind {
                        CurvePointKind::Endpoint => 0,
                        CurvePointKind::Interior => 1,
                    });
                }
            }
        }
    }

    /// Decode one instruction from the reader
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let opcode = r.u8()?;
        match opcode {
            OP_PUSH_VALUE => Ok(Instruction::PushValue(Const::decode(r)?)),
            OP_PUSH_GLOBAL => Ok(Instruction::PushGlobal(StrId(r.u16()?))),
            OP_PUSH_LOCAL => Ok(Instruction::PushLocal(StrId(r.u16()?))),
            OP_APPLY_BINARY => {
                let byte = r.u8()?;
                let op = BinOp::try_from(byte).map_err(DecodeError::InvalidOperand)?;
                Ok(Instruction::ApplyBinary(op))
            }
            OP_APPLY_UNARY => {
                let byte = r.u8()?;
                let op = UnaryOp::try_from(byte).map_err(DecodeError::InvalidOperand)?;
                Ok(Instruction::ApplyUnary(op))
            }
            OP_ASSIGN_GLOBAL => {
                let id = StrId(r.u16()?);
                let op = AssignOp::try_from(r.u8()?).map_err(DecodeError::InvalidOperand)?;
                Ok(Instruction::AssignGlobal(id, op))
            }
            OP_ASSIGN_LOCAL => {
                let id = StrId(r.u16()?);
                let op = AssignOp::try_from(r.u8()?).map_err(DecodeError::InvalidOperand)?;
                Ok(Instruction::AssignLocal(id, op))
            }
            OP_CONVERT_TO_DELTA => Ok(Instruction::ConvertToDelta),
            OP_POP => Ok(Instruction::Pop),
            OP_SET_DIALOGUE_BLOCK => Ok(Instruction::SetDialogueBlock {
                box_name: StrId(r.u16()?),
                name: StrId(r.u16()?),
            }),
            OP_SAY => Ok(Instruction::Say(StrId(r.u16()?))),
            OP_WAIT_FOR_INPUT => Ok(Instruction::WaitForInput),
            OP_CALL => Ok(Instruction::Call {
                symbol: Symbol::decode(r)?,
                argc: r.u8()?,
            }),
            OP_CALL_FAR => Ok(Instruction::CallFar {
                module: StrId(r.u16()?),
                symbol: StrId(r.u16()?),
                argc: r.u8()?,
            }),
            OP_JUMP => Ok(Instruction::Jump(r.u32()?)),
            OP_JUMP_IF_EQUALS => Ok(Instruction::JumpIfEquals(r.u32()?)),
            OP_JUMP_IF_NOT_EQUALS => Ok(Instruction::JumpIfNotEquals(r.u32()?)),
            OP_RETURN => Ok(Instruction::Return),
            OP_SELECT => {
                let count = r.u16()? as usize;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let label = StrId(r.u16()?);
                    let target = r.u32()?;
                    entries.push((label, target));
                }
                Ok(Instruction::Select(entries))
            }
            OP_GET_SELECTED_CHOICE => Ok(Instruction::GetSelectedChoice),
            OP_MAKE_CURVE => {
                let count = r.u16()? as usize;
                let mut points = Vec::with_capacity(count);
                for _ in 0..count {
                    points.push(match r.u8()? {
                        0 => CurvePointKind::Endpoint,
                        1 => CurvePointKind::Interior,
                        other => return Err(DecodeError::InvalidOperand(other)),
                    });
                }
                Ok(Instruction::MakeCurve(points))
            }
            other => Err(DecodeError::InvalidOpcode(other)),
        }
    }
}

/// The executable body of one subroutine
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Subroutine {
    /// Decoded instruction stream
    pub instructions: Vec<Instruction>,
    /// Instruction index of each dialogue block's entry, in declaration
    /// order; parallel to the block list in the runtime info table
    pub block_starts: Vec<u32>,
}

impl Subroutine {
    /// Serialize the body to bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let block_count = u16::try_from(self.block_starts.len()).unwrap_or(u16::MAX);
        out.extend_from_slice(&block_count.to_le_bytes());
        for start in &self.block_starts {
            out.extend_from_slice(&start.to_le_bytes());
        }
        let instr_count = u32::try_from(self.instructions.len()).unwrap_or(u32::MAX);
        out.extend_from_slice(&instr_count.to_le_bytes());
        for instruction in &self.instructions {
            instruction.encode(&mut out);
        }
        out
    }

    /// Deserialize a body from bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let block_count = r.u16()? as usize;
        let mut block_starts = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            block_starts.push(r.u32()?);
        }
        let instr_count = r.u32()? as usize;
        let mut instructions = Vec::with_capacity(instr_count.min(1 << 16));
        for _ in 0..instr_count {
            instructions.push(Instruction::decode(&mut r)?);
        }
        Ok(Self {
            instructions,
            block_starts,
        })
    }
}

/// Little-endian cursor over a byte slice
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self
            .pos
            .checked_add(N)
            .ok_or(DecodeError::UnexpectedEnd)?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(DecodeError::UnexpectedEnd)?;
        self.pos = end;
        let mut array = [0u8; N];
        array.copy_from_slice(slice);
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_simple_body() {
        let body = Subroutine {
            instructions: vec![
                Instruction::PushValue(Const::Int(42)),
                Instruction::AssignGlobal(StrId(3), AssignOp::Set),
                Instruction::Return,
            ],
            block_starts: vec![],
        };
        let bytes = body.encode();
        let decoded = Subroutine::decode(&bytes).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn encode_decode_control_flow() {
        let body = Subroutine {
            instructions: vec![
                Instruction::PushGlobal(StrId(0)),
                Instruction::PushValue(Const::Bool(true)),
                Instruction::JumpIfNotEquals(5),
                Instruction::Say(StrId(1)),
                Instruction::Jump(0),
                Instruction::Return,
            ],
            block_starts: vec![3],
        };
        let bytes = body.encode();
        let decoded = Subroutine::decode(&bytes).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn encode_decode_select_and_curve() {
        let body = Subroutine {
            instructions: vec![
                Instruction::Select(vec![(StrId(0), 3), (StrId(1), 7)]),
                Instruction::GetSelectedChoice,
                Instruction::MakeCurve(vec![
                    CurvePointKind::Endpoint,
                    CurvePointKind::Interior,
                    CurvePointKind::Endpoint,
                ]),
                Instruction::Return,
            ],
            block_starts: vec![],
        };
        let bytes = body.encode();
        let decoded = Subroutine::decode(&bytes).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn truncated_body_is_an_error() {
        let body = Subroutine {
            instructions: vec![Instruction::PushValue(Const::Float(1.5))],
            block_starts: vec![],
        };
        let mut bytes = body.encode();
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            Subroutine::decode(&bytes),
            Err(DecodeError::UnexpectedEnd)
        ));
    }

    #[test]
    fn invalid_opcode_is_an_error() {
        // zero blocks, one instruction, bogus opcode
        let bytes = [0, 0, 1, 0, 0, 0, 0xEE];
        assert!(matches!(
            Subroutine::decode(&bytes),
            Err(DecodeError::InvalidOpcode(0xEE))
        ));
    }

    #[test]
    fn yield_points() {
        assert!(Instruction::WaitForInput.is_yield_point());
        assert!(Instruction::Return.is_yield_point());
        assert!(Instruction::Say(StrId(0)).is_yield_point());
        assert!(!Instruction::Pop.is_yield_point());
        assert!(!Instruction::Jump(0).is_yield_point());
    }
}
