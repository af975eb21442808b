//! Bytecode disassembler for debugging and tooling

use std::fmt::Write;

use super::instruction::{Const, Instruction, StrId, Subroutine, Symbol};

/// Disassemble a subroutine body to a string. The string table is used
/// to show interned text inline; missing entries print as raw ids.
#[must_use]
pub fn disassemble(body: &Subroutine, name: &str, strings: &[String]) -> String {
    let mut output = String::new();
    writeln!(output, "== {name} ==").unwrap();
    for (index, instruction) in body.instructions.iter().enumerate() {
        let marker = if body.block_starts.contains(&(index as u32)) {
            '*'
        } else {
            ' '
        };
        write!(output, "{index:04}{marker} {:<20}", instruction.name()).unwrap();
        write_operands(&mut output, instruction, strings);
        output.push('\n');
    }
    output
}

fn lookup(strings: &[String], id: StrId) -> String {
    strings
        .get(id.0 as usize)
        .map_or_else(|| id.to_string(), |s| format!("{s:?}"))
}

fn write_operands(output: &mut String, instruction: &Instruction, strings: &[String]) {
    match instruction {
        Instruction::PushValue(constant) => match constant {
            Const::Null => write!(output, "null"),
            Const::Bool(v) => write!(output, "{v}"),
            Const::Int(v) => write!(output, "{v}"),
            Const::Float(v) => write!(output, "{v}"),
            Const::Str(id) => write!(output, "{}", lookup(strings, *id)),
        }
        .unwrap(),
        Instruction::PushGlobal(id)
        | Instruction::PushLocal(id)
        | Instruction::Say(id) => {
            write!(output, "{}", lookup(strings, *id)).unwrap();
        }
        Instruction::ApplyBinary(op) => write!(output, "{op}").unwrap(),
        Instruction::ApplyUnary(op) => write!(output, "{op}").unwrap(),
        Instruction::AssignGlobal(id, op) | Instruction::AssignLocal(id, op) => {
            write!(output, "{} {op}", lookup(strings, *id)).unwrap();
        }
        Instruction::SetDialogueBlock { box_name, name } => {
            write!(
                output,
                "{} {}",
                lookup(strings, *box_name),
                lookup(strings, *name)
            )
            .unwrap();
        }
        Instruction::Call {
            symbol: Symbol::Index(i),
            argc,
        } => write!(output, "sub#{i} argc={argc}").unwrap(),
        Instruction::Call {
            symbol: Symbol::Name(id),
            argc,
        } => {
            write!(output, "{} argc={argc}", lookup(strings, *id)).unwrap();
        }
        Instruction::CallFar {
            module,
            symbol,
            argc,
        } => {
            write!(
                output,
                "{} :: {} argc={argc}",
                lookup(strings, *module),
                lookup(strings, *symbol)
            )
            .unwrap();
        }
        Instruction::Jump(target)
        | Instruction::JumpIfEquals(target)
        | Instruction::JumpIfNotEquals(target) => {
            write!(output, "-> {target:04}").unwrap();
        }
        Instruction::Select(entries) => {
            for (i, (label, target)) in entries.iter().enumerate() {
                if i > 0 {
                    write!(output, ", ").unwrap();
                }
                write!(output, "{} -> {target:04}", lookup(strings, *label)).unwrap();
            }
        }
        Instruction::MakeCurve(points) => {
            write!(output, "{} points", points.len()).unwrap();
        }
        Instruction::ConvertToDelta
        | Instruction::Pop
        | Instruction::WaitForInput
        | Instruction::Return
        | Instruction::GetSelectedChoice => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AssignOp;

    #[test]
    fn disassembly_shows_interned_strings_and_targets() {
        let body = Subroutine {
            instructions: vec![
                Instruction::PushValue(Const::Int(3)),
                Instruction::AssignGlobal(StrId(0), AssignOp::Set),
                Instruction::Jump(0),
                Instruction::Return,
            ],
            block_starts: vec![],
        };
        let strings = vec!["$gold".to_string()];
        let text = disassemble(&body, "S", &strings);
        assert!(text.contains("== S =="));
        assert!(text.contains("\"$gold\""));
        assert!(text.contains("-> 0000"));
    }

    #[test]
    fn block_starts_are_marked() {
        let body = Subroutine {
            instructions: vec![
                Instruction::SetDialogueBlock {
                    box_name: StrId(0),
                    name: StrId(1),
                },
                Instruction::Return,
            ],
            block_starts: vec![0],
        };
        let strings = vec!["narrator".to_string(), "intro".to_string()];
        let text = disassemble(&body, "S", &strings);
        assert!(text.lines().next().is_some());
        assert!(text.contains("0000*"));
    }
}
