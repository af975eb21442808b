//! Lowering from syntax trees to bytecode
//!
//! Each subroutine compiles to a flat instruction stream. Jumps are
//! emitted with placeholder targets and patched once the destination
//! index is known. Variables with a `$` sigil live in the global store;
//! bare names resolve to the current frame's locals (parameters).

use std::collections::HashMap;

use crate::ast::{
    Block, Expr, ExprKind, Literal, ScriptUnit, Stmt, StmtKind, SubroutineDecl, SubroutineKind,
};

use super::error::CompileError;
use super::instruction::{Const, Instruction, StrId, Subroutine, Symbol};

/// A fully compiled script unit, ready for container serialization
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledUnit {
    /// Compiled subroutines in declaration order
    pub subroutines: Vec<CompiledSubroutine>,
    /// Include paths in declaration order
    pub includes: Vec<String>,
    /// The module string table
    pub strings: Vec<String>,
}

impl CompiledUnit {
    /// Find a compiled subroutine index by name
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.subroutines.iter().position(|s| s.name == name)
    }
}

/// One compiled subroutine with its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSubroutine {
    /// Declared name
    pub name: String,
    /// Chapter, scene, or function
    pub kind: SubroutineKind,
    /// Parameter names in declaration order, sigils preserved
    pub params: Vec<String>,
    /// Dialogue blocks in declaration order: (box name, block name),
    /// parallel to the body's block start table
    pub dialogue_blocks: Vec<(String, String)>,
    /// The executable body
    pub body: Subroutine,
}

/// Deduplicating string table builder
#[derive(Debug, Default)]
struct Interner {
    map: HashMap<String, StrId>,
    strings: Vec<String>,
}

impl Interner {
    fn intern(&mut self, text: &str) -> Result<StrId, CompileError> {
        if let Some(id) = self.map.get(text) {
            return Ok(*id);
        }
        let index = u16::try_from(self.strings.len()).map_err(|_| {
            CompileError::TooManyStrings {
                limit: usize::from(u16::MAX),
            }
        })?;
        let id = StrId(index);
        self.strings.push(text.to_string());
        self.map.insert(text.to_string(), id);
        Ok(id)
    }
}

/// The bytecode compiler
pub struct Compiler<'a> {
    unit: &'a ScriptUnit,
    interner: Interner,
    /// Parameter names of the subroutine being compiled
    params: Vec<String>,
    code: Vec<Instruction>,
    block_starts: Vec<u32>,
    /// Break patch sites, one list per enclosing loop
    loops: Vec<Vec<usize>>,
}

impl<'a> Compiler<'a> {
    /// Compile a whole script unit
    pub fn compile(unit: &'a ScriptUnit) -> Result<CompiledUnit, CompileError> {
        let subroutine_count = unit.subroutines().count();
        if subroutine_count > usize::from(u16::MAX) {
            return Err(CompileError::TooManySubroutines {
                limit: usize::from(u16::MAX),
            });
        }

        let mut compiler = Compiler {
            unit,
            interner: Interner::default(),
            params: Vec::new(),
            code: Vec::new(),
            block_starts: Vec::new(),
            loops: Vec::new(),
        };

        let mut subroutines = Vec::with_capacity(subroutine_count);
        for decl in unit.subroutines() {
            subroutines.push(compiler.subroutine(decl)?);
        }
        let includes = unit.includes().map(|inc| inc.path.clone()).collect();
        Ok(CompiledUnit {
            subroutines,
            includes,
            strings: compiler.interner.strings,
        })
    }

    fn subroutine(&mut self, decl: &SubroutineDecl) -> Result<CompiledSubroutine, CompileError> {
        self.params = decl.param_names();
        self.code = Vec::new();
        self.block_starts = Vec::new();

        self.block(&decl.body)?;
        self.emit(Instruction::Return);

        if self.code.len() > u32::MAX as usize {
            return Err(CompileError::SubroutineTooLong {
                name: decl.name.name.clone(),
            });
        }
        Ok(CompiledSubroutine {
            name: decl.name.name.clone(),
            kind: decl.kind,
            params: decl.param_names(),
            dialogue_blocks: decl
                .dialogue_blocks
                .iter()
                .map(|(box_name, name, _)| (box_name.clone(), name.clone()))
                .collect(),
            body: Subroutine {
                instructions: std::mem::take(&mut self.code),
                block_starts: std::mem::take(&mut self.block_starts),
            },
        })
    }

    // ==================== Emission helpers ====================

    fn emit(&mut self, instruction: Instruction) -> usize {
        self.code.push(instruction);
        self.code.len() - 1
    }

    fn here(&self) -> u32 {
        self.code.len() as u32
    }

    /// Point a previously emitted jump at the current position
    fn patch_jump(&mut self, at: usize) {
        let target = self.here();
        if let Some(
            Instruction::Jump(t)
            | Instruction::JumpIfEquals(t)
            | Instruction::JumpIfNotEquals(t),
        ) = self.code.get_mut(at)
        {
            *t = target;
        }
    }

    /// Whether a variable name resolves to a frame local
    fn is_local(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name)
    }

    // ==================== Statements ====================

    fn block(&mut self, block: &Block) -> Result<(), CompileError> {
        for stmt in &block.stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                // Assignments leave nothing; other expressions leave a
                // value that statement position must discard.
                if let ExprKind::Assign { target, op, value } = &expr.kind {
                    self.assign(target, *op, value.as_deref())?;
                } else {
                    self.expr(expr)?;
                    self.emit(Instruction::Pop);
                }
                Ok(())
            }
            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                self.expr(cond)?;
                self.emit(Instruction::PushValue(Const::Bool(true)));
                let to_else = self.emit(Instruction::JumpIfNotEquals(0));
                self.block(then_block)?;
                match else_block {
                    Some(else_block) => {
                        let to_end = self.emit(Instruction::Jump(0));
                        self.patch_jump(to_else);
                        self.block(else_block)?;
                        self.patch_jump(to_end);
                    }
                    None => self.patch_jump(to_else),
                }
                Ok(())
            }
            StmtKind::While { cond, body } => {
                let start = self.here();
                self.expr(cond)?;
                self.emit(Instruction::PushValue(Const::Bool(true)));
                let to_end = self.emit(Instruction::JumpIfNotEquals(0));
                self.loops.push(Vec::new());
                self.block(body)?;
                self.emit(Instruction::Jump(start));
                self.patch_jump(to_end);
                let breaks = self.loops.pop().unwrap_or_default();
                for site in breaks {
                    self.patch_jump(site);
                }
                Ok(())
            }
            StmtKind::Break => {
                let site = self.emit(Instruction::Jump(0));
                match self.loops.last_mut() {
                    Some(breaks) => breaks.push(site),
                    // The parser already diagnosed this; degrade to a
                    // subroutine return so execution stays defined.
                    None => self.code[site] = Instruction::Return,
                }
                Ok(())
            }
            StmtKind::Select { cases } => self.select(cases),
            StmtKind::Dialogue(block) => {
                self.block_starts.push(self.here());
                let box_name = self.interner.intern(&block.box_name)?;
                let name = self.interner.intern(&block.name)?;
                self.emit(Instruction::SetDialogueBlock { box_name, name });
                self.block(&block.body)
            }
            StmtKind::Say(text) => {
                let id = self.interner.intern(text)?;
                self.emit(Instruction::Say(id));
                Ok(())
            }
            StmtKind::Wait => {
                self.emit(Instruction::WaitForInput);
                Ok(())
            }
        }
    }

    fn select(&mut self, cases: &[crate::ast::SelectCase]) -> Result<(), CompileError> {
        let mut labels = Vec::with_capacity(cases.len());
        for case in cases {
            labels.push(self.interner.intern(&case.label)?);
        }

        let select_site = self.emit(Instruction::Select(
            labels.iter().map(|&label| (label, 0)).collect(),
        ));

        // Dispatch chain: compare the stored choice against each label
        let mut dispatch_sites = Vec::with_capacity(cases.len());
        for &label in &labels {
            self.emit(Instruction::GetSelectedChoice);
            self.emit(Instruction::PushValue(Const::Str(label)));
            dispatch_sites.push(self.emit(Instruction::JumpIfEquals(0)));
        }
        let no_match = self.emit(Instruction::Jump(0));

        let mut case_starts = Vec::with_capacity(cases.len());
        let mut end_sites = vec![no_match];
        for (case, site) in cases.iter().zip(&dispatch_sites) {
            case_starts.push(self.here());
            self.patch_jump(*site);
            self.block(&case.body)?;
            end_sites.push(self.emit(Instruction::Jump(0)));
        }
        for site in end_sites {
            self.patch_jump(site);
        }

        // Record the resolved case entry points in the select table
        if let Some(Instruction::Select(entries)) = self.code.get_mut(select_site) {
            for (entry, start) in entries.iter_mut().zip(&case_starts) {
                entry.1 = *start;
            }
        }
        Ok(())
    }

    fn assign(
        &mut self,
        target: &str,
        op: crate::ast::AssignOp,
        value: Option<&Expr>,
    ) -> Result<(), CompileError> {
        match value {
            Some(value) => self.expr(value)?,
            // Increment and decrement: the operand is the target's own
            // current value
            None => self.push_variable(target)?,
        }
        let id = self.interner.intern(target)?;
        if self.is_local(target) {
            self.emit(Instruction::AssignLocal(id, op));
        } else {
            self.emit(Instruction::AssignGlobal(id, op));
        }
        Ok(())
    }

    fn argc(count: usize) -> Result<u8, CompileError> {
        u8::try_from(count).map_err(|_| CompileError::TooManyArguments { count })
    }

    fn push_variable(&mut self, name: &str) -> Result<(), CompileError> {
        let id = self.interner.intern(name)?;
        if self.is_local(name) {
            self.emit(Instruction::PushLocal(id));
        } else {
            self.emit(Instruction::PushGlobal(id));
        }
        Ok(())
    }

    // ==================== Expressions ====================

    /// Compile an expression that leaves exactly one value on the stack
    fn expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Literal(literal) => {
                let constant = match literal {
                    Literal::Null => Const::Null,
                    Literal::Bool(v) => Const::Bool(*v),
                    Literal::Int(v) => Const::Int(*v),
                    Literal::Float(v) => Const::Float(*v),
                    Literal::Str(text) => Const::Str(self.interner.intern(text)?),
                };
                self.emit(Instruction::PushValue(constant));
                Ok(())
            }
            ExprKind::Variable(name) => self.push_variable(name),
            ExprKind::Assign { target, op, value } => {
                // Assignment in value position: perform the assignment,
                // then read the target back. Chained assignments fall
                // out of this naturally.
                self.assign(target, *op, value.as_deref())?;
                self.push_variable(target)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.emit(Instruction::ApplyBinary(*op));
                Ok(())
            }
            ExprKind::Unary { op, operand } => {
                self.expr(operand)?;
                self.emit(Instruction::ApplyUnary(*op));
                Ok(())
            }
            ExprKind::Delta(operand) => {
                self.expr(operand)?;
                self.emit(Instruction::ConvertToDelta);
                Ok(())
            }
            ExprKind::Call { callee, args } => {
                // Arguments push right to left so the callee pops them
                // in declaration order
                for arg in args.iter().rev() {
                    self.expr(arg)?;
                }
                let symbol = match self.unit.find_subroutine(callee) {
                    Some(index) => Symbol::Index(index as u16),
                    None => Symbol::Name(self.interner.intern(callee)?),
                };
                let argc = Self::argc(args.len())?;
                self.emit(Instruction::Call { symbol, argc });
                Ok(())
            }
            ExprKind::FarCall {
                module_path,
                callee,
                args,
            } => {
                for arg in args.iter().rev() {
                    self.expr(arg)?;
                }
                let module = self.interner.intern(module_path)?;
                let symbol = self.interner.intern(callee)?;
                let argc = Self::argc(args.len())?;
                self.emit(Instruction::CallFar {
                    module,
                    symbol,
                    argc,
                });
                Ok(())
            }
            ExprKind::Bezier(points) => {
                for point in points {
                    self.expr(&point.x)?;
                    self.expr(&point.y)?;
                }
                self.emit(Instruction::MakeCurve(
                    points.iter().map(|p| p.kind).collect(),
                ));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignOp, BinOp};
    use crate::parser::Parser;

    fn compile_source(source: &str) -> CompiledUnit {
        let (unit, diagnostics) = Parser::parse(source);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        Compiler::compile(&unit).expect("compile failed")
    }

    fn instructions<'a>(unit: &'a CompiledUnit, name: &str) -> &'a [Instruction] {
        let index = unit.find(name).expect("subroutine not found");
        &unit.subroutines[index].body.instructions
    }

    fn str_id(unit: &CompiledUnit, text: &str) -> StrId {
        let index = unit
            .strings
            .iter()
            .position(|s| s == text)
            .unwrap_or_else(|| panic!("string {text:?} not interned"));
        StrId(index as u16)
    }

    #[test]
    fn assignment_lowers_to_global_store() {
        let unit = compile_source("scene \"S\" {\n  $gold = 10;\n}\n");
        let gold = str_id(&unit, "$gold");
        assert_eq!(
            instructions(&unit, "S"),
            &[
                Instruction::PushValue(Const::Int(10)),
                Instruction::AssignGlobal(gold, AssignOp::Set),
                Instruction::Return,
            ]
        );
    }

    #[test]
    fn parameter_reference_is_local() {
        let unit = compile_source("function f(amount) {\n  $total = amount;\n}\n");
        let amount = str_id(&unit, "amount");
        let code = instructions(&unit, "f");
        assert!(code.contains(&Instruction::PushLocal(amount)));
    }

    #[test]
    fn increment_reads_target_first() {
        let unit = compile_source("scene \"S\" {\n  $hp++;\n}\n");
        let hp = str_id(&unit, "$hp");
        assert_eq!(
            instructions(&unit, "S"),
            &[
                Instruction::PushGlobal(hp),
                Instruction::AssignGlobal(hp, AssignOp::Add),
                Instruction::Return,
            ]
        );
    }

    #[test]
    fn chained_assignment_reads_inner_target_back() {
        let unit = compile_source("scene \"S\" {\n  $a = $b = 1;\n}\n");
        let a = str_id(&unit, "$a");
        let b = str_id(&unit, "$b");
        assert_eq!(
            instructions(&unit, "S"),
            &[
                Instruction::PushValue(Const::Int(1)),
                Instruction::AssignGlobal(b, AssignOp::Set),
                Instruction::PushGlobal(b),
                Instruction::AssignGlobal(a, AssignOp::Set),
                Instruction::Return,
            ]
        );
    }

    #[test]
    fn expression_statement_pops_its_value() {
        let unit = compile_source("scene \"S\" {\n  fadeout;\n}\n");
        let fadeout = str_id(&unit, "fadeout");
        assert_eq!(
            instructions(&unit, "S"),
            &[
                Instruction::Call {
                    symbol: Symbol::Name(fadeout),
                    argc: 0
                },
                Instruction::Pop,
                Instruction::Return,
            ]
        );
    }

    #[test]
    fn call_to_declared_subroutine_resolves_to_index() {
        let unit = compile_source(
            "function helper() {\n}\nscene \"S\" {\n  helper();\n}\n",
        );
        let code = instructions(&unit, "S");
        assert!(code.contains(&Instruction::Call {
            symbol: Symbol::Index(0),
            argc: 0
        }));
    }

    #[test]
    fn arguments_push_right_to_left() {
        let unit = compile_source("scene \"S\" {\n  bg \"a.png\", 300;\n}\n");
        let path = str_id(&unit, "a.png");
        let code = instructions(&unit, "S");
        assert_eq!(
            &code[..2],
            &[
                Instruction::PushValue(Const::Int(300)),
                Instruction::PushValue(Const::Str(path)),
            ]
        );
    }

    #[test]
    fn if_jump_targets_skip_the_then_block() {
        let unit = compile_source("scene \"S\" {\n  if ($x == 1) {\n    $y = 2;\n  }\n}\n");
        let code = instructions(&unit, "S");
        // cond(3) + push true + conditional jump + body(2) + return
        let Instruction::JumpIfNotEquals(target) = code[4] else {
            panic!("expected conditional jump, got {:?}", code[4]);
        };
        assert_eq!(target, 7);
        assert_eq!(code[3], Instruction::PushValue(Const::Bool(true)));
        assert!(matches!(code[2], Instruction::ApplyBinary(BinOp::Eq)));
    }

    #[test]
    fn while_loops_back_and_break_exits() {
        let unit = compile_source(
            "scene \"S\" {\n  while (true) {\n    break;\n  }\n}\n",
        );
        let code = instructions(&unit, "S");
        // 0: push true (cond), 1: push true, 2: jmp_ne end,
        // 3: break jump, 4: jump 0, 5: return
        assert_eq!(code[2], Instruction::JumpIfNotEquals(5));
        assert_eq!(code[3], Instruction::Jump(5));
        assert_eq!(code[4], Instruction::Jump(0));
        assert_eq!(code[5], Instruction::Return);
    }

    #[test]
    fn dialogue_block_start_is_recorded() {
        let unit = compile_source(
            "scene \"S\" {\n  $x = 1;\n<narrator intro>\n\"Hi.\"\n<end>\n}\n",
        );
        let index = unit.find("S").unwrap();
        let sub = &unit.subroutines[index];
        assert_eq!(sub.body.block_starts, vec![2]);
        assert_eq!(
            sub.body.instructions[2],
            Instruction::SetDialogueBlock {
                box_name: str_id(&unit, "narrator"),
                name: str_id(&unit, "intro"),
            }
        );
        assert_eq!(sub.dialogue_blocks, vec![("narrator".into(), "intro".into())]);
    }

    #[test]
    fn select_table_points_at_case_starts() {
        let unit = compile_source(
            "scene \"S\" {\n  select {\n    case \"A\":\n      $x = 1;\n    case \"B\":\n      $x = 2;\n  }\n}\n",
        );
        let code = instructions(&unit, "S");
        let Instruction::Select(entries) = &code[0] else {
            panic!("expected select first, got {:?}", code[0]);
        };
        assert_eq!(entries.len(), 2);
        for &(label, target) in entries {
            // Each target lands inside the code and the dispatch chain
            // reaches the same place through its comparison jump
            assert!((target as usize) < code.len());
            assert!(code
                .iter()
                .any(|i| *i == Instruction::JumpIfEquals(target)));
            assert!(unit.strings.get(label.0 as usize).is_some());
        }
    }

    #[test]
    fn delta_and_curve_lowering() {
        let unit = compile_source("scene \"S\" {\n  move @30, (0, 0), {5, 9}, (10, 0);\n}\n");
        let code = instructions(&unit, "S");
        assert!(code.contains(&Instruction::ConvertToDelta));
        assert!(code.iter().any(|i| matches!(
            i,
            Instruction::MakeCurve(kinds) if kinds.len() == 3
        )));
    }

    #[test]
    fn far_call_references_include_path() {
        let unit = compile_source(
            "include \"lib/common.fab\" as common;\nscene \"S\" {\n  common.fade_in(200);\n}\n",
        );
        assert_eq!(unit.includes, vec!["lib/common.fab".to_string()]);
        let path = str_id(&unit, "lib/common.fab");
        let symbol = str_id(&unit, "fade_in");
        let code = instructions(&unit, "S");
        assert!(code.contains(&Instruction::CallFar {
            module: path,
            symbol,
            argc: 1
        }));
    }

    #[test]
    fn string_table_deduplicates() {
        let unit = compile_source(
            "scene \"S\" {\n  $x = \"dup\";\n  $y = \"dup\";\n}\n",
        );
        assert_eq!(unit.strings.iter().filter(|s| *s == "dup").count(), 1);
    }
}
