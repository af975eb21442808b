//! Cooperative thread scheduler
//!
//! Script threads never preempt each other: each runnable thread gets
//! one VM slice per tick, in creation order. Lifecycle changes
//! (create, suspend, resume, terminate) go through a shared
//! [`ActionQueue`] and are applied exactly once, at the start of the
//! next tick, so a built-in can never mutate the thread table while a
//! slice is executing over it. Time is supplied by the caller as a
//! monotonic `Duration`; the scheduler itself never reads a clock
//! except in [`Scheduler::run`].

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::module::Module;
use crate::vm::{Host, RuntimeError, SliceOutcome, ThreadContext, Vm};

/// A deferred thread lifecycle change
#[derive(Debug, Clone)]
pub enum ThreadAction {
    /// Create a thread entering `subroutine` of `module`
    Create {
        name: String,
        module: Rc<Module>,
        subroutine: String,
        /// Start suspended instead of runnable
        suspended: bool,
    },
    /// Suspend a thread, optionally resuming it after `timeout`
    Suspend {
        name: String,
        timeout: Option<Duration>,
    },
    /// Make a suspended thread runnable again
    Resume { name: String },
    /// Remove a thread entirely
    Terminate { name: String },
}

/// Shared queue of pending thread actions. Cloning is cheap and all
/// clones feed the same queue.
#[derive(Debug, Clone, Default)]
pub struct ActionQueue(Rc<RefCell<VecDeque<ThreadAction>>>);

impl ActionQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an action for the next tick
    pub fn push(&self, action: ThreadAction) {
        self.0.borrow_mut().push_back(action);
    }

    /// Take every pending action, leaving the queue empty
    #[must_use]
    pub fn drain(&self) -> Vec<ThreadAction> {
        self.0.borrow_mut().drain(..).collect()
    }

    /// Number of pending actions
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Whether no actions are pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

/// Lifecycle state of a scheduled thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Gets a slice every tick
    Running,
    /// Skipped until resumed or its timeout elapses
    Suspended,
}

/// A runtime error together with the thread it faulted
#[derive(Debug)]
pub struct ThreadFault {
    /// Name of the faulted thread (it has been terminated)
    pub thread: String,
    /// The error that faulted it
    pub error: RuntimeError,
}

impl std::fmt::Display for ThreadFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "thread '{}' faulted: {}", self.thread, self.error)
    }
}

struct Thread {
    context: ThreadContext,
    state: ThreadState,
    suspended_at: Duration,
    timeout: Option<Duration>,
}

/// The cooperative scheduler
pub struct Scheduler {
    vm: Vm,
    threads: HashMap<String, Thread>,
    /// Creation order; slices are dealt in this order every tick
    order: Vec<String>,
    actions: ActionQueue,
}

impl Scheduler {
    /// Create a scheduler over a VM
    #[must_use]
    pub fn new(vm: Vm) -> Self {
        Self {
            vm,
            threads: HashMap::new(),
            order: Vec::new(),
            actions: ActionQueue::new(),
        }
    }

    /// A handle to the shared action queue
    #[must_use]
    pub fn actions(&self) -> ActionQueue {
        self.actions.clone()
    }

    /// The underlying VM
    #[must_use]
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// The underlying VM, mutably
    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }

    /// Enqueue creation of a runnable thread
    pub fn spawn(
        &self,
        name: impl Into<String>,
        module: Rc<Module>,
        subroutine: impl Into<String>,
    ) {
        self.actions.push(ThreadAction::Create {
            name: name.into(),
            module,
            subroutine: subroutine.into(),
            suspended: false,
        });
    }

    /// Number of live threads
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Whether no threads remain and nothing is pending
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.threads.is_empty() && self.actions.is_empty()
    }

    /// Lifecycle state of a thread, if it exists
    #[must_use]
    pub fn state_of(&self, name: &str) -> Option<ThreadState> {
        self.threads.get(name).map(|t| t.state)
    }

    /// Run one tick: apply pending actions, wake timed-out suspends,
    /// then deal one slice to every runnable thread in creation order.
    /// Returns the faults of any threads that died this tick.
    pub fn tick(&mut self, now: Duration, host: &mut dyn Host) -> Vec<ThreadFault> {
        let mut faults = Vec::new();

        // Pending actions are drained exactly once per tick; actions
        // enqueued during the slices below wait for the next tick.
        for action in self.actions.drain() {
            self.apply(action, now, &mut faults);
        }

        // Timed resumes happen before any slice so a thread whose
        // timeout elapsed is never skipped an extra tick
        for thread in self.threads.values_mut() {
            if thread.state == ThreadState::Suspended {
                if let Some(timeout) = thread.timeout {
                    if now.saturating_sub(thread.suspended_at) >= timeout {
                        thread.state = ThreadState::Running;
                        thread.timeout = None;
                    }
                }
            }
        }

        let snapshot = self.order.clone();
        for name in snapshot {
            let Some(thread) = self.threads.get_mut(&name) else {
                continue;
            };
            if thread.state != ThreadState::Running {
                continue;
            }
            match self.vm.run_slice(&mut thread.context, host, &self.actions) {
                Ok(SliceOutcome::Yielded) => {}
                Ok(SliceOutcome::Finished) => {
                    self.actions.push(ThreadAction::Terminate { name });
                }
                Err(error) => {
                    faults.push(ThreadFault {
                        thread: name.clone(),
                        error,
                    });
                    self.actions.push(ThreadAction::Terminate { name });
                }
            }
        }
        faults
    }

    /// Drive ticks on a real clock until every thread finishes or the
    /// remaining threads can never wake (suspended without timeouts).
    pub fn run(&mut self, host: &mut dyn Host) -> Vec<ThreadFault> {
        let start = Instant::now();
        let mut faults = Vec::new();
        loop {
            faults.extend(self.tick(start.elapsed(), host));
            if self.is_idle() {
                break;
            }
            let deadlocked = self.actions.is_empty()
                && self
                    .threads
                    .values()
                    .all(|t| t.state == ThreadState::Suspended && t.timeout.is_none());
            if deadlocked {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        faults
    }

    fn apply(&mut self, action: ThreadAction, now: Duration, faults: &mut Vec<ThreadFault>) {
        match action {
            ThreadAction::Create {
                name,
                module,
                subroutine,
                suspended,
            } => {
                let Some(index) = module.find(&subroutine) else {
                    faults.push(ThreadFault {
                        thread: name,
                        error: RuntimeError::UnknownSubroutine {
                            module: module.name().to_string(),
                            symbol: subroutine,
                        },
                    });
                    return;
                };
                match ThreadContext::new(name.clone(), module, index) {
                    Ok(context) => {
                        if !self.threads.contains_key(&name) {
                            self.order.push(name.clone());
                        }
                        self.threads.insert(
                            name,
                            Thread {
                                context,
                                state: if suspended {
                                    ThreadState::Suspended
                                } else {
                                    ThreadState::Running
                                },
                                suspended_at: now,
                                timeout: None,
                            },
                        );
                    }
                    Err(error) => faults.push(ThreadFault {
                        thread: name,
                        error: error.into(),
                    }),
                }
            }
            ThreadAction::Suspend { name, timeout } => {
                if let Some(thread) = self.threads.get_mut(&name) {
                    thread.state = ThreadState::Suspended;
                    thread.suspended_at = now;
                    thread.timeout = timeout;
                }
            }
            ThreadAction::Resume { name } => {
                if let Some(thread) = self.threads.get_mut(&name) {
                    thread.state = ThreadState::Running;
                    thread.timeout = None;
                }
            }
            ThreadAction::Terminate { name } => {
                self.threads.remove(&name);
                self.order.retain(|n| *n != name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Compiler, Value};
    use crate::module::ModuleWriter;
    use crate::parser::Parser;
    use crate::vm::NullHost;
    use std::io::Cursor;

    fn load_module(source: &str, name: &str) -> Rc<Module> {
        let (unit, diagnostics) = Parser::parse(source);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let compiled = Compiler::compile(&unit).unwrap();
        let bytes = ModuleWriter::with_timestamp(0).to_bytes(&compiled).unwrap();
        Rc::new(Module::load(Cursor::new(bytes), name).unwrap())
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[derive(Default)]
    struct LineHost {
        lines: Vec<String>,
    }

    impl Host for LineHost {
        fn dialogue_line(&mut self, text: &str) {
            self.lines.push(text.to_string());
        }

        fn call_builtin(
            &mut self,
            thread: &str,
            name: &str,
            args: &[Value],
            actions: &ActionQueue,
        ) -> Option<Value> {
            if name == "sleep" {
                let millis = args.first().and_then(Value::as_number).unwrap_or(0.0);
                actions.push(ThreadAction::Suspend {
                    name: thread.to_string(),
                    timeout: Some(Duration::from_millis(millis as u64)),
                });
                return Some(Value::Null);
            }
            None
        }
    }

    #[test]
    fn thread_runs_to_completion_and_is_removed() {
        let module = load_module("scene \"S\" {\n  $done = true;\n}\n", "main");
        let mut scheduler = Scheduler::new(Vm::new());
        scheduler.spawn("main", module, "S");

        let mut host = NullHost;
        let faults = scheduler.tick(ms(0), &mut host);
        assert!(faults.is_empty());
        assert_eq!(scheduler.thread_count(), 1);
        // Termination was enqueued; the next tick applies it
        let faults = scheduler.tick(ms(16), &mut host);
        assert!(faults.is_empty());
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.vm().global("$done"), Value::Bool(true));
    }

    #[test]
    fn slices_interleave_in_creation_order() {
        let module = load_module(
            "scene \"A\" {\n<narrator>\n\"a1\"\n\"a2\"\n<end>\n}\nscene \"B\" {\n<narrator>\n\"b1\"\n\"b2\"\n<end>\n}\n",
            "main",
        );
        let mut scheduler = Scheduler::new(Vm::new());
        scheduler.spawn("first", Rc::clone(&module), "A");
        scheduler.spawn("second", module, "B");

        let mut host = LineHost::default();
        for i in 0..10 {
            scheduler.tick(ms(i), &mut host);
        }
        assert_eq!(host.lines, ["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn builtin_calls_interleave_between_threads() {
        #[derive(Default)]
        struct CallOrderHost {
            calls: Vec<String>,
        }
        impl Host for CallOrderHost {
            fn call_builtin(
                &mut self,
                thread: &str,
                name: &str,
                _args: &[Value],
                _actions: &ActionQueue,
            ) -> Option<Value> {
                self.calls.push(format!("{thread}:{name}"));
                Some(Value::Null)
            }
        }

        let module = load_module(
            "scene \"A\" {\n  ping();\n  pong();\n}\nscene \"B\" {\n  ping();\n  pong();\n}\n",
            "main",
        );
        let mut scheduler = Scheduler::new(Vm::new());
        scheduler.spawn("a", Rc::clone(&module), "A");
        scheduler.spawn("b", module, "B");

        let mut host = CallOrderHost::default();
        for i in 0..10 {
            scheduler.tick(ms(i), &mut host);
        }
        // One call per thread per tick: a and b alternate
        assert_eq!(host.calls, ["a:ping", "b:ping", "a:pong", "b:pong"]);
    }

    #[test]
    fn timed_suspend_wakes_after_its_timeout() {
        let module = load_module(
            "scene \"S\" {\n  sleep(100);\n  $woke = true;\n}\n",
            "main",
        );
        let mut scheduler = Scheduler::new(Vm::new());
        scheduler.spawn("sleeper", module, "S");
        let mut host = LineHost::default();

        scheduler.tick(ms(0), &mut host); // runs up to the sleep call
        scheduler.tick(ms(10), &mut host); // suspend applied
        assert_eq!(scheduler.state_of("sleeper"), Some(ThreadState::Suspended));

        scheduler.tick(ms(50), &mut host);
        assert_eq!(scheduler.state_of("sleeper"), Some(ThreadState::Suspended));
        assert_eq!(scheduler.vm().global("$woke"), Value::Null);

        scheduler.tick(ms(120), &mut host);
        assert_eq!(scheduler.vm().global("$woke"), Value::Bool(true));
    }

    #[test]
    fn two_sleepers_wake_independently() {
        let module = load_module(
            "scene \"Fast\" {\n  sleep(100);\n  $fast = true;\n}\nscene \"Slow\" {\n  sleep(150);\n  $slow = true;\n}\n",
            "main",
        );
        let mut scheduler = Scheduler::new(Vm::new());
        scheduler.spawn("fast", Rc::clone(&module), "Fast");
        scheduler.spawn("slow", module, "Slow");
        let mut host = LineHost::default();

        scheduler.tick(ms(0), &mut host);
        scheduler.tick(ms(10), &mut host);

        scheduler.tick(ms(115), &mut host);
        assert_eq!(scheduler.vm().global("$fast"), Value::Bool(true));
        assert_eq!(scheduler.vm().global("$slow"), Value::Null);

        scheduler.tick(ms(165), &mut host);
        assert_eq!(scheduler.vm().global("$slow"), Value::Bool(true));
    }

    #[test]
    fn input_wait_suspends_until_resumed() {
        let module = load_module(
            "scene \"S\" {\n<narrator>\n\"Before.\"\n<wait>\n\"After.\"\n<end>\n}\n",
            "main",
        );
        let mut scheduler = Scheduler::new(Vm::new());
        scheduler.spawn("talker", module, "S");
        let mut host = LineHost::default();

        for i in 0..5 {
            scheduler.tick(ms(i), &mut host);
        }
        assert_eq!(host.lines, ["Before."]);
        assert_eq!(scheduler.state_of("talker"), Some(ThreadState::Suspended));

        // Player input arrives
        scheduler.actions().push(ThreadAction::Resume {
            name: "talker".to_string(),
        });
        for i in 5..10 {
            scheduler.tick(ms(i), &mut host);
        }
        assert_eq!(host.lines, ["Before.", "After."]);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn faulted_thread_is_reported_and_removed() {
        let module = load_module(
            "scene \"Bad\" {\n  $x = 1 / 0;\n}\nscene \"Good\" {\n  $ok = true;\n}\n",
            "main",
        );
        let mut scheduler = Scheduler::new(Vm::new());
        scheduler.spawn("bad", Rc::clone(&module), "Bad");
        scheduler.spawn("good", module, "Good");
        let mut host = NullHost;

        let faults = scheduler.tick(ms(0), &mut host);
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].thread, "bad");

        scheduler.tick(ms(16), &mut host);
        assert!(scheduler.state_of("bad").is_none());
        assert_eq!(scheduler.vm().global("$ok"), Value::Bool(true));
    }

    #[test]
    fn spawning_an_unknown_subroutine_faults() {
        let module = load_module("scene \"S\" {\n}\n", "main");
        let mut scheduler = Scheduler::new(Vm::new());
        scheduler.spawn("ghost", module, "Missing");
        let faults = scheduler.tick(ms(0), &mut NullHost);
        assert_eq!(faults.len(), 1);
        assert!(matches!(
            faults[0].error,
            RuntimeError::UnknownSubroutine { .. }
        ));
        assert!(scheduler.is_idle());
    }

    #[test]
    fn actions_drain_once_per_tick() {
        let module = load_module("scene \"S\" {\n  $x = 1;\n}\n", "main");
        let mut scheduler = Scheduler::new(Vm::new());
        scheduler.spawn("a", module, "S");
        assert_eq!(scheduler.actions().len(), 1);
        scheduler.tick(ms(0), &mut NullHost);
        // The create was consumed; only the finish-termination remains
        assert_eq!(scheduler.actions().len(), 1);
        let pending = scheduler.actions().drain();
        assert!(matches!(
            pending.as_slice(),
            [ThreadAction::Terminate { name }] if name == "a"
        ));
    }
}
