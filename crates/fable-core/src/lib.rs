//! Fable Core - Engine for the Fable visual-novel scripting language
//!
//! This crate provides the core functionality:
//! - Lexer: Tokenization of script source
//! - AST: Abstract syntax tree definitions
//! - Parser: AST construction from the token stream
//! - Bytecode: Instruction set and compiler
//! - Module: Seekable binary container with lazy body loading
//! - VM: Slice-based bytecode execution
//! - Scheduler: Cooperative script threads

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lexer module - tokenization of Fable script source
pub mod lexer;

/// Abstract Syntax Tree - parsed representation of Fable scripts
pub mod ast;

/// Parser module - converts tokens into AST
pub mod parser;

/// Bytecode module - instruction set, values, and compiler
pub mod bytecode;

/// Module container - binary format writer, loader, and registry
pub mod module;

/// Virtual Machine module - bytecode execution in host-driven slices
pub mod vm;

/// Scheduler module - cooperative script threads
pub mod scheduler;

/// Convenience re-export of lexer
pub use lexer::Lexer;

/// Convenience re-export of parser
pub use parser::Parser;

/// Convenience re-export of bytecode compiler
pub use bytecode::Compiler;

/// Convenience re-export of runtime values
pub use bytecode::Value;

/// Convenience re-export of the container types
pub use module::{Module, ModuleRegistry, ModuleWriter};

/// Convenience re-export of the VM
pub use vm::{Host, NullHost, Vm};

/// Convenience re-export of the scheduler
pub use scheduler::{ActionQueue, Scheduler, ThreadAction};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }

    /// Helper running a whole script through the public surface:
    /// parse, compile, write, load, schedule.
    fn run_script(source: &str, entry: &str) -> Scheduler {
        let (unit, diagnostics) = Parser::parse(source);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let compiled = Compiler::compile(&unit).unwrap();
        let bytes = ModuleWriter::new().to_bytes(&compiled).unwrap();
        let module = Rc::new(Module::load(Cursor::new(bytes), "main").unwrap());

        let mut scheduler = Scheduler::new(Vm::new());
        scheduler.spawn("main", module, entry);
        let mut host = NullHost;
        for i in 0..20 {
            scheduler.tick(Duration::from_millis(i * 16), &mut host);
            if scheduler.is_idle() {
                break;
            }
        }
        scheduler
    }

    #[test]
    fn smoke_arithmetic() {
        let scheduler = run_script("scene \"S\" {\n  $gold = 3 * 5 + 1;\n}\n", "S");
        assert_eq!(scheduler.vm().global("$gold"), Value::Int(16));
    }

    #[test]
    fn smoke_while_loop() {
        let scheduler = run_script(
            "scene \"S\" {\n  $n = 0;\n  while ($n < 5) {\n    $n = $n + 1;\n  }\n}\n",
            "S",
        );
        assert_eq!(scheduler.vm().global("$n"), Value::Int(5));
    }

    #[test]
    fn smoke_function_call_with_sigil_param() {
        let scheduler = run_script(
            "function pay($amount) {\n  $paid = $amount;\n}\nscene \"S\" {\n  pay(250);\n}\n",
            "S",
        );
        assert_eq!(scheduler.vm().global("$paid"), Value::Int(250));
        assert_eq!(scheduler.vm().global("$amount"), Value::Int(250));
    }
}
