//! End-to-end tests for the script pipeline: parse, compile, write a
//! module container to disk, load it back, and run it under the
//! scheduler.

use std::fs::File;
use std::io::Cursor;
use std::rc::Rc;
use std::time::Duration;

use fable_core::bytecode::{Compiler, Value};
use fable_core::module::{Module, ModuleRegistry, ModuleWriter};
use fable_core::parser::{DiagnosticKind, Parser};
use fable_core::scheduler::{ActionQueue, Scheduler, ThreadAction};
use fable_core::vm::{Host, NullHost, Vm};

fn compile(source: &str) -> fable_core::bytecode::CompiledUnit {
    let (unit, diagnostics) = Parser::parse(source);
    assert!(diagnostics.is_empty(), "{diagnostics:?}");
    Compiler::compile(&unit).unwrap()
}

fn load_from_memory(source: &str, name: &str) -> Rc<Module> {
    let bytes = ModuleWriter::with_timestamp(0)
        .to_bytes(&compile(source))
        .unwrap();
    Rc::new(Module::load(Cursor::new(bytes), name).unwrap())
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Drives a story: records dialogue, answers every wait immediately,
/// and picks a fixed choice index.
#[derive(Default)]
struct StoryHost {
    lines: Vec<String>,
    blocks: Vec<(String, String)>,
    choice: usize,
    builtin_calls: Vec<(String, Vec<Value>)>,
}

impl Host for StoryHost {
    fn dialogue_block_entered(&mut self, box_name: &str, block_name: &str) {
        self.blocks
            .push((box_name.to_string(), block_name.to_string()));
    }

    fn dialogue_line(&mut self, text: &str) {
        self.lines.push(text.to_string());
    }

    fn wait_for_input(&mut self) -> bool {
        true
    }

    fn present_choices(&mut self, _labels: &[String]) -> usize {
        self.choice
    }

    fn call_builtin(
        &mut self,
        _thread: &str,
        name: &str,
        args: &[Value],
        _actions: &ActionQueue,
    ) -> Option<Value> {
        self.builtin_calls.push((name.to_string(), args.to_vec()));
        None
    }
}

fn run_story(module: Rc<Module>, entry: &str, host: &mut dyn Host) -> Scheduler {
    run_story_on(Scheduler::new(Vm::new()), module, entry, host)
}

fn run_story_on(
    mut scheduler: Scheduler,
    module: Rc<Module>,
    entry: &str,
    host: &mut dyn Host,
) -> Scheduler {
    scheduler.spawn("main", module, entry);
    for i in 0..100 {
        let faults = scheduler.tick(ms(i * 16), host);
        assert!(faults.is_empty(), "{faults:?}");
        if scheduler.is_idle() {
            return scheduler;
        }
    }
    panic!("story did not finish");
}

const TAVERN: &str = r#"
. The opening scene of the tavern chapter.
chapter "Tavern" {
  $gold = 20;
  $visits = 0;
<narrator intro>
  "You push open the tavern door."
<wait>
  "The barkeep looks up."
<end>
  select {
    case "Order a drink":
      $gold -= 5;
    case "Leave":
      $left = true;
  }
  $visits = $visits + 1;
}
"#;

#[test]
fn story_written_to_disk_replays_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tavern.fabm");

    let mut out = File::create(&path).unwrap();
    ModuleWriter::with_timestamp(1_700_000_000_000)
        .write(&compile(TAVERN), &mut out)
        .unwrap();
    drop(out);

    let module = Rc::new(Module::load(File::open(&path).unwrap(), "tavern").unwrap());
    assert_eq!(module.timestamp_ms(), 1_700_000_000_000);

    let mut host = StoryHost::default();
    let scheduler = run_story(module, "Tavern", &mut host);

    assert_eq!(
        host.lines,
        ["You push open the tavern door.", "The barkeep looks up."]
    );
    assert_eq!(host.blocks, [("narrator".to_string(), "intro".to_string())]);
    // Choice 0 ordered the drink
    assert_eq!(scheduler.vm().global("$gold"), Value::Int(15));
    assert_eq!(scheduler.vm().global("$left"), Value::Null);
    assert_eq!(scheduler.vm().global("$visits"), Value::Int(1));
}

#[test]
fn second_choice_takes_the_other_branch() {
    let module = load_from_memory(TAVERN, "tavern");
    let mut host = StoryHost {
        choice: 1,
        ..StoryHost::default()
    };
    let scheduler = run_story(module, "Tavern", &mut host);
    assert_eq!(scheduler.vm().global("$gold"), Value::Int(20));
    assert_eq!(scheduler.vm().global("$left"), Value::Bool(true));
}

#[test]
fn bodies_decode_once_from_a_file_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lazy.fabm");
    let mut out = File::create(&path).unwrap();
    ModuleWriter::with_timestamp(0)
        .write(&compile(TAVERN), &mut out)
        .unwrap();
    drop(out);

    let module = Module::load(File::open(&path).unwrap(), "lazy").unwrap();
    let first = module.subroutine(0).unwrap();
    let second = module.subroutine(0).unwrap();
    assert!(Rc::ptr_eq(&first, &second));
}

#[test]
fn peek_timestamp_without_loading() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stamp.fabm");
    let mut out = File::create(&path).unwrap();
    ModuleWriter::with_timestamp(99)
        .write(&compile("scene \"S\" {\n}\n"), &mut out)
        .unwrap();
    drop(out);

    let mut file = File::open(&path).unwrap();
    assert_eq!(Module::peek_timestamp(&mut file).unwrap(), 99);
}

#[test]
fn far_calls_cross_module_boundaries() {
    let library = load_from_memory(
        "function brighten($brightness) {\n  $lit = true;\n}\n",
        "effects",
    );
    let main = load_from_memory(
        "include \"fx/effects.fab\" as fx;\nscene \"Dawn\" {\n  fx.brighten(80);\n}\n",
        "main",
    );
    assert_eq!(main.imports(), ["fx/effects.fab"]);

    let mut registry = ModuleRegistry::new();
    registry.insert("fx/effects.fab", library);
    let scheduler = run_story_on(
        Scheduler::new(Vm::with_registry(registry)),
        main,
        "Dawn",
        &mut NullHost,
    );
    assert_eq!(scheduler.vm().global("$lit"), Value::Bool(true));
    assert_eq!(scheduler.vm().global("$brightness"), Value::Int(80));
}

#[test]
fn delta_and_curve_arguments_reach_builtins() {
    let module = load_from_memory(
        "scene \"Pan\" {\n  fade(@50);\n  move (0, 0), {60, 120}, (100, 0);\n}\n",
        "main",
    );
    let mut host = StoryHost::default();
    run_story(module, "Pan", &mut host);

    assert_eq!(host.builtin_calls.len(), 2);
    assert_eq!(host.builtin_calls[0].0, "fade");
    assert_eq!(host.builtin_calls[0].1, vec![Value::Delta(50.0)]);
    assert_eq!(host.builtin_calls[1].0, "move");
    let Value::Curve(points) = &host.builtin_calls[1].1[0] else {
        panic!("expected a curve argument");
    };
    assert_eq!(points.len(), 3);
    assert!(points[1].interior);
}

#[test]
fn quoted_parameter_references_stay_identifiers() {
    // Inside give(), the quoted "amount" matches a parameter and reads
    // it; outside, the same quoted text is a plain string literal.
    let module = load_from_memory(
        "function give(amount) {\n  $granted = \"amount\";\n}\nscene \"S\" {\n  give(42);\n  $label = \"amount\";\n}\n",
        "main",
    );
    let scheduler = run_story(module, "S", &mut NullHost);
    assert_eq!(scheduler.vm().global("$granted"), Value::Int(42));
    assert_eq!(scheduler.vm().global("$label"), Value::str("amount"));
}

#[test]
fn stray_markup_is_reported_once_and_skipped() {
    let source = "scene \"S\" {\n  $a = 1;\n  <broken tag that never closes\n  $b = 2;\n}\n";
    let (unit, diagnostics) = Parser::parse(source);
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind, DiagnosticKind::StrayMarkup);

    // The surrounding statements still compile and run
    let compiled = Compiler::compile(&unit).unwrap();
    let bytes = ModuleWriter::with_timestamp(0).to_bytes(&compiled).unwrap();
    let module = Rc::new(Module::load(Cursor::new(bytes), "main").unwrap());
    let scheduler = run_story(module, "S", &mut NullHost);
    assert_eq!(scheduler.vm().global("$a"), Value::Int(1));
    assert_eq!(scheduler.vm().global("$b"), Value::Int(2));
}

#[test]
fn parallel_threads_share_the_global_store() {
    let module = load_from_memory(
        "scene \"Writer\" {\n  $shared = 7;\n}\nscene \"Reader\" {\n  $seen = $shared;\n}\n",
        "main",
    );
    let mut scheduler = Scheduler::new(Vm::new());
    scheduler.spawn("writer", Rc::clone(&module), "Writer");
    scheduler.spawn("reader", module, "Reader");
    let mut host = NullHost;
    for i in 0..10 {
        scheduler.tick(ms(i), &mut host);
    }
    assert!(scheduler.is_idle());
    assert_eq!(scheduler.vm().global("$seen"), Value::Int(7));
}

#[test]
fn input_wait_resumes_on_player_action() {
    struct SilentHost {
        lines: Vec<String>,
    }
    impl Host for SilentHost {
        fn dialogue_line(&mut self, text: &str) {
            self.lines.push(text.to_string());
        }
    }

    let module = load_from_memory(
        "scene \"S\" {\n<narrator>\n  \"Before.\"\n<wait>\n  \"After.\"\n<end>\n}\n",
        "main",
    );
    let mut scheduler = Scheduler::new(Vm::new());
    scheduler.spawn("main", module, "S");
    let mut host = SilentHost { lines: Vec::new() };

    for i in 0..5 {
        scheduler.tick(ms(i), &mut host);
    }
    assert_eq!(host.lines, ["Before."]);

    scheduler.actions().push(ThreadAction::Resume {
        name: "main".to_string(),
    });
    for i in 5..10 {
        scheduler.tick(ms(i), &mut host);
    }
    assert_eq!(host.lines, ["Before.", "After."]);
    assert!(scheduler.is_idle());
}
