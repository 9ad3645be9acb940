use super::context::{self, Context, Transfer as RawTransfer};
use super::stack::{STACK_MAGIC, Stack};
use super::state::{State, Transfer};
use crate::scheduler::context::with_current;

use std::io;
use std::panic::{self, AssertUnwindSafe};

/// The user function of a coroutine.
pub(crate) type Function = Box<dyn FnOnce()>;

/// Number of bytes shown from each end of a corrupted stack.
const DUMP_BYTES: usize = 64;

/// Control block of a coroutine.
///
/// The scheduler stores these in its slab; the slot index plus `id` form
/// the public [`Coroutine`](super::Coroutine) handle.
pub(crate) struct Record {
    /// Identifier of the current incarnation, renewed by every recreate.
    pub(crate) id: u64,

    pub(crate) state: State,

    /// Saved context, refreshed every time this coroutine jumps away.
    pub(crate) context: Context,

    /// `None` for the original coroutine, which runs on the host stack.
    pub(crate) stack: Option<Stack>,

    /// The user function, taken by the trampoline on first entry.
    pub(crate) function: Option<Function>,

    /// Value exchanged between `suspend` and `resume`.
    pub(crate) transfer: Transfer,
}

impl Record {
    /// Creates the pseudo-coroutine standing for the host thread.
    ///
    /// It has no stack of its own and starts out running.
    pub(crate) fn original(id: u64) -> Self {
        Self {
            id,
            state: State::Running,
            context: Context::null(),
            stack: None,
            function: None,
            transfer: Transfer::Empty,
        }
    }

    /// Allocates a fresh coroutine with at least `stack_size` usable bytes.
    pub(crate) fn create(id: u64, function: Function, stack_size: usize) -> io::Result<Self> {
        let stack = Stack::new(stack_size)?;
        let context = unsafe { context::make(stack.top(), trampoline) };

        Ok(Self {
            id,
            state: State::Ready,
            context,
            stack: Some(stack),
            function: Some(function),
            transfer: Transfer::Empty,
        })
    }

    /// Turns a dead coroutine into a fresh one, reusing its stack.
    ///
    /// The stack is replaced only when `stack_size` exceeds what the cached
    /// one provides; it never shrinks.
    pub(crate) fn recreate(
        &mut self,
        id: u64,
        function: Function,
        stack_size: usize,
    ) -> io::Result<()> {
        debug_assert_eq!(self.state, State::Dead);

        let stack = match self.stack.take() {
            Some(stack) if stack.size() >= stack_size => {
                stack.write_guards();
                stack
            }
            _ => Stack::new(stack_size)?,
        };

        self.context = unsafe { context::make(stack.top(), trampoline) };
        self.stack = Some(stack);
        self.id = id;
        self.state = State::Ready;
        self.function = Some(function);
        self.transfer = Transfer::Empty;

        Ok(())
    }

    /// Usable stack bytes, `0` for the original coroutine.
    pub(crate) fn stack_size(&self) -> usize {
        self.stack.as_ref().map_or(0, Stack::size)
    }

    /// Aborts the process if either stack sentinel was overwritten.
    ///
    /// Nothing on a corrupted stack can be trusted, so there is no attempt
    /// to unwind or recover.
    pub(crate) fn check_guards(&self) {
        let Some(stack) = &self.stack else {
            return;
        };

        if stack.guards_intact() {
            return;
        }

        let (low, high) = stack.bounds();
        let (overflow, underflow) = stack.guards();

        log::error!(
            "coroutine#{}: stack [{low:#x}, {high:#x}) corrupted: overflow sentinel {overflow:#x}, underflow sentinel {underflow:#x}, expected {STACK_MAGIC:#x}",
            self.id
        );
        log::error!("  low  {low:#x}: {}", hex_dump(low, DUMP_BYTES));
        log::error!(
            "  high {:#x}: {}",
            high - DUMP_BYTES,
            hex_dump(high - DUMP_BYTES, DUMP_BYTES)
        );

        eprintln!("costack: stack of coroutine#{} is corrupted, aborting", self.id);
        std::process::abort();
    }
}

fn hex_dump(address: usize, len: usize) -> String {
    let bytes = unsafe { std::slice::from_raw_parts(address as *const u8, len) };

    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// First code executed on every coroutine stack.
///
/// Records the context of whoever switched in, runs the user function and
/// hands the coroutine to `finish`. A panic in the user function is caught
/// here and parked on the scheduler, which re-raises it on the host stack.
extern "C" fn trampoline(transfer: RawTransfer) -> ! {
    with_current(|core| {
        let function = core.enter_fresh(transfer);

        if let Some(function) = function {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(function)) {
                core.store_panic(payload);
            }
        }

        core.finish();
    });

    unreachable!("dead coroutine resumed")
}
