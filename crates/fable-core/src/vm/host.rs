//! The host interface
//!
//! The engine never draws, sleeps, or reads input itself; everything
//! observable goes through a [`Host`]. Defaults make every callback
//! optional so tests and headless tools can implement only what they
//! inspect.

use crate::bytecode::Value;
use crate::scheduler::ActionQueue;

/// Callbacks from the virtual machine to the embedding application
pub trait Host {
    /// A dialogue block was entered
    fn dialogue_block_entered(&mut self, box_name: &str, block_name: &str) {
        let _ = (box_name, block_name);
    }

    /// A dialogue line should be presented
    fn dialogue_line(&mut self, text: &str) {
        let _ = text;
    }

    /// A `<wait>` pause was reached. Return true when input is already
    /// available and the thread should stay runnable instead of
    /// suspending; either way the current slice ends.
    fn wait_for_input(&mut self) -> bool {
        false
    }

    /// Present a choice menu and return the index of the chosen label
    fn present_choices(&mut self, labels: &[String]) -> usize {
        let _ = labels;
        0
    }

    /// A call did not resolve to a script subroutine. Return the call's
    /// value to handle it as a built-in command; return `None` to leave
    /// it unhandled (the call then evaluates to null). `thread` names
    /// the calling thread; built-ins may enqueue thread actions, which
    /// take effect on the next tick.
    fn call_builtin(
        &mut self,
        thread: &str,
        name: &str,
        args: &[Value],
        actions: &ActionQueue,
    ) -> Option<Value> {
        let _ = (thread, name, args, actions);
        None
    }
}

/// A host that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHost;

impl Host for NullHost {}
