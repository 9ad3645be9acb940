//! Machine context switching.
//!
//! This module is the only place that touches registers and stack pointers
//! directly. It exposes two operations in the style of `fcontext`:
//!
//! - [`make`] lays out an initial frame at the top of a fresh stack, so that
//!   the first [`jump`] into it lands in an entry function,
//! - [`jump`] saves the callee-saved registers of the current context on its
//!   own stack, switches to the target stack, restores its registers and
//!   hands over a [`Transfer`].
//!
//! A [`Context`] is the saved stack pointer of a suspended context. It is
//! invalidated by the jump that resumes it: the jumped-to side receives the
//! fresh handle of whoever jumped, and must store it before that context can
//! be resumed again.

use std::ffi::c_void;
use std::ptr;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("costack only supports x86_64 and aarch64");

/// Saved stack pointer of a suspended execution context.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Context(*mut c_void);

impl Context {
    /// A handle that does not name any context yet.
    ///
    /// The host thread's context starts like this and is filled in by the
    /// first jump away from it.
    pub(crate) const fn null() -> Self {
        Self(ptr::null_mut())
    }

    pub(crate) fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// Value produced by a [`jump`].
///
/// `context` is the freshly saved context of the side that jumped, `data`
/// is the payload it passed along.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct Transfer {
    pub(crate) context: Context,
    pub(crate) data: *mut c_void,
}

/// Entry point of a fresh context.
///
/// It receives the transfer of the first jump into the context and must
/// never return: the only way out is another [`jump`].
pub(crate) type Entry = extern "C" fn(Transfer) -> !;

/// Builds a context at `top` whose first activation calls `entry`.
///
/// # Safety
///
/// `top` must be the high end of a writable stack region large enough for
/// the initial frame and for everything `entry` will execute. The region
/// must stay alive and untouched by anything else for as long as the
/// context may run.
pub(crate) unsafe fn make(top: *mut u8, entry: Entry) -> Context {
    let top = (top as usize) & !15;

    #[cfg(target_arch = "x86_64")]
    unsafe {
        // Eight saved slots (mxcsr/fpu, r12-r15, rbx, rbp, rip) and a null
        // return address for the entry frame, which leaves rsp at 8 mod 16
        // on entry exactly as after a call.
        let sp = top - 0x48;
        let frame = sp as *mut u64;
        for i in 0..9 {
            frame.add(i).write(0);
        }

        (sp as *mut u32).write(0x1F80);
        ((sp + 4) as *mut u16).write(0x037F);
        frame.add(7).write(entry as usize as u64);

        Context(sp as *mut c_void)
    }

    #[cfg(target_arch = "aarch64")]
    unsafe {
        // d8-d15, x19-x28, fp, lr and pc; fp and lr stay null.
        let sp = top - 0xb0;
        let frame = sp as *mut u64;
        for i in 0..22 {
            frame.add(i).write(0);
        }

        frame.add(20).write(entry as usize as u64);

        Context(sp as *mut c_void)
    }
}

/// Switches to `to`, passing `data` along.
///
/// Returns when some other context jumps back to the one that called this
/// function. The returned [`Transfer`] carries the context of that other
/// side and its payload.
///
/// # Safety
///
/// `to` must be a context produced by [`make`] or by a previous jump, and
/// must not have been resumed since it was produced.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn jump(to: Context, data: *mut c_void) -> Transfer {
    std::arch::naked_asm!(
        "lea rsp, [rsp - 0x38]",
        "stmxcsr dword ptr [rsp]",
        "fnstcw word ptr [rsp + 0x4]",
        "mov [rsp + 0x08], r12",
        "mov [rsp + 0x10], r13",
        "mov [rsp + 0x18], r14",
        "mov [rsp + 0x20], r15",
        "mov [rsp + 0x28], rbx",
        "mov [rsp + 0x30], rbp",
        "mov rax, rsp",
        "mov rsp, rdi",
        "mov r8, [rsp + 0x38]",
        "ldmxcsr dword ptr [rsp]",
        "fldcw word ptr [rsp + 0x4]",
        "mov r12, [rsp + 0x08]",
        "mov r13, [rsp + 0x10]",
        "mov r14, [rsp + 0x18]",
        "mov r15, [rsp + 0x20]",
        "mov rbx, [rsp + 0x28]",
        "mov rbp, [rsp + 0x30]",
        "lea rsp, [rsp + 0x40]",
        // rax:rdx is the returned transfer, rdi:rsi the entry argument.
        "mov rdx, rsi",
        "mov rdi, rax",
        "jmp r8",
    )
}

/// Switches to `to`, passing `data` along.
///
/// See the x86_64 variant for the contract.
///
/// # Safety
///
/// `to` must be a context produced by [`make`] or by a previous jump, and
/// must not have been resumed since it was produced.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn jump(to: Context, data: *mut c_void) -> Transfer {
    std::arch::naked_asm!(
        "sub sp, sp, #0xb0",
        "stp d8, d9, [sp, #0x00]",
        "stp d10, d11, [sp, #0x10]",
        "stp d12, d13, [sp, #0x20]",
        "stp d14, d15, [sp, #0x30]",
        "stp x19, x20, [sp, #0x40]",
        "stp x21, x22, [sp, #0x50]",
        "stp x23, x24, [sp, #0x60]",
        "stp x25, x26, [sp, #0x70]",
        "stp x27, x28, [sp, #0x80]",
        "stp x29, x30, [sp, #0x90]",
        "str x30, [sp, #0xa0]",
        "mov x4, sp",
        "mov sp, x0",
        "ldp d8, d9, [sp, #0x00]",
        "ldp d10, d11, [sp, #0x10]",
        "ldp d12, d13, [sp, #0x20]",
        "ldp d14, d15, [sp, #0x30]",
        "ldp x19, x20, [sp, #0x40]",
        "ldp x21, x22, [sp, #0x50]",
        "ldp x23, x24, [sp, #0x60]",
        "ldp x25, x26, [sp, #0x70]",
        "ldp x27, x28, [sp, #0x80]",
        "ldp x29, x30, [sp, #0x90]",
        // x0:x1 is both the returned transfer and the entry argument.
        "mov x0, x4",
        "ldr x4, [sp, #0xa0]",
        "add sp, sp, #0xb0",
        "ret x4",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;

    thread_local! {
        static HITS: Cell<usize> = const { Cell::new(0) };
    }

    extern "C" fn ping(transfer: Transfer) -> ! {
        let mut back = transfer.context;
        let mut value = transfer.data as usize;

        loop {
            HITS.with(|h| h.set(h.get() + 1));
            let next = unsafe { jump(back, (value * 2) as *mut c_void) };
            back = next.context;
            value = next.data as usize;
        }
    }

    #[test]
    fn test_jump_round_trips_payload() {
        let mut stack = vec![0u8; 64 * 1024];
        let top = unsafe { stack.as_mut_ptr().add(stack.len()) };

        let mut context = unsafe { make(top, ping) };

        for i in 1..=5usize {
            let transfer = unsafe { jump(context, i as *mut c_void) };
            assert_eq!(transfer.data as usize, i * 2);
            context = transfer.context;
        }

        assert_eq!(HITS.with(|h| h.get()), 5);
    }

    #[test]
    fn test_null_context() {
        assert!(Context::null().is_null());
    }
}
