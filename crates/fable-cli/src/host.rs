//! Terminal host for running stories

use std::io::{self, BufRead, Write};
use std::time::Duration;

use fable_core::bytecode::Value;
use fable_core::scheduler::{ActionQueue, ThreadAction};
use fable_core::vm::Host;

/// Plays a story on stdin/stdout: dialogue prints to the terminal,
/// waits and choice menus read from the keyboard.
pub struct ConsoleHost {
    current_box: String,
}

impl Default for ConsoleHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleHost {
    pub fn new() -> Self {
        Self {
            current_box: String::new(),
        }
    }

    fn read_line(&self) -> String {
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
        line.trim().to_string()
    }
}

impl Host for ConsoleHost {
    fn dialogue_block_entered(&mut self, box_name: &str, _block_name: &str) {
        self.current_box = box_name.to_string();
    }

    fn dialogue_line(&mut self, text: &str) {
        if self.current_box.is_empty() {
            println!("{text}");
        } else {
            println!("[{}] {text}", self.current_box);
        }
    }

    fn wait_for_input(&mut self) -> bool {
        print!("  (press enter) ");
        let _ = io::stdout().flush();
        self.read_line();
        // Input was consumed synchronously; keep executing
        true
    }

    fn present_choices(&mut self, labels: &[String]) -> usize {
        for (i, label) in labels.iter().enumerate() {
            println!("  {}) {label}", i + 1);
        }
        loop {
            print!("> ");
            let _ = io::stdout().flush();
            if let Ok(n) = self.read_line().parse::<usize>() {
                if n >= 1 && n <= labels.len() {
                    return n - 1;
                }
            }
            println!("enter a number between 1 and {}", labels.len());
        }
    }

    fn call_builtin(
        &mut self,
        thread: &str,
        name: &str,
        args: &[Value],
        actions: &ActionQueue,
    ) -> Option<Value> {
        match name {
            "sleep" => {
                let millis = args.first().and_then(Value::as_number).unwrap_or(0.0);
                actions.push(ThreadAction::Suspend {
                    name: thread.to_string(),
                    timeout: Some(Duration::from_millis(millis as u64)),
                });
                Some(Value::Null)
            }
            "print" => {
                let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
                println!("{}", rendered.join(" "));
                Some(Value::Null)
            }
            _ => {
                eprintln!("(unhandled command: {name})");
                None
            }
        }
    }
}
