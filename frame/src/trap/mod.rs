// SPDX-License-Identifier: MPL-2.0

//! Control of the local interrupt-enable flag.
//!
//! Every CPU carries one interrupt-enable flag. [`disable_local`] captures
//! the flag, clears it and returns a guard; dropping the guard restores the
//! captured value verbatim, not an unconditional enable, so nested
//! critical sections compose: an inner guard taken while an outer holder
//! already disabled interrupts observes "disabled" and restores "disabled".
//!
//! On the host reference platform a CPU is a thread and the flag is
//! thread-local; on metal this module maps onto the interrupt-flag bits of
//! the saved processor state.

use core::cell::Cell;

std::thread_local! {
    static LOCAL_IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Returns whether interrupts are enabled on the local CPU.
pub fn is_local_enabled() -> bool {
    LOCAL_IRQ_ENABLED.with(|flag| flag.get())
}

/// Enables interrupts on the local CPU.
pub fn enable_local() {
    LOCAL_IRQ_ENABLED.with(|flag| flag.set(true));
}

/// Disables interrupts on the local CPU, capturing the previous state.
///
/// The returned guard restores the captured state when dropped.
#[must_use]
pub fn disable_local() -> DisabledLocalIrqGuard {
    let was_enabled = LOCAL_IRQ_ENABLED.with(|flag| flag.replace(false));
    DisabledLocalIrqGuard {
        was_enabled,
        _not_send: core::marker::PhantomData,
    }
}

/// A guard for disabled local IRQs.
pub struct DisabledLocalIrqGuard {
    was_enabled: bool,
    // An IRQ guard belongs to the CPU that created it.
    _not_send: core::marker::PhantomData<*mut ()>,
}

impl Drop for DisabledLocalIrqGuard {
    fn drop(&mut self) {
        LOCAL_IRQ_ENABLED.with(|flag| flag.set(self.was_enabled));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_saved_state() {
        assert!(is_local_enabled());
        {
            let _outer = disable_local();
            assert!(!is_local_enabled());
            {
                let _inner = disable_local();
                assert!(!is_local_enabled());
            }
            // The inner guard restores "disabled", not "enabled".
            assert!(!is_local_enabled());
        }
        assert!(is_local_enabled());
    }
}
