// SPDX-License-Identifier: MPL-2.0

//! Cross-CPU debug stop.
//!
//! One CPU enters diagnostic mode and signals every other running CPU to
//! stop. Each target saves a context snapshot into its CPU descriptor,
//! flips its state to `Stopped` and spins until resumed; the initiator
//! blocks until all targets report stopped. On the host platform the stop
//! signal is a per-CPU flag observed at stop-check points (the idle loop
//! and long waits); on metal the same entry point is the stop-IPI handler.

use std::sync::atomic::Ordering;
use std::time::Duration;

use log::{debug, warn};

use crate::cpu::{self, CpuContext, CpuState};
use crate::task::current_task;
use crate::time::now;

const STOP_TIMEOUT_MS: u64 = 2000;

/// Stops every other running CPU and waits until they have all parked.
pub fn debug_stop_others() {
    let me = cpu::current_cpu_id();
    let targets: Vec<_> = cpu::descriptors()
        .iter()
        .filter(|d| d.logical() != me && d.state() == CpuState::Running)
        .collect();

    for desc in &targets {
        desc.stop_requested.store(true, Ordering::Release);
    }

    let deadline = now() + Duration::from_millis(STOP_TIMEOUT_MS);
    for desc in &targets {
        while desc.state() != CpuState::Stopped {
            if now() >= deadline {
                warn!(
                    "debug stop: cpu {} did not stop in time",
                    desc.logical().as_u32()
                );
                break;
            }
            std::thread::yield_now();
        }
    }
    debug!("debug stop: all other CPUs parked");
}

/// Releases every CPU parked by [`debug_stop_others`].
pub fn debug_resume_others() {
    for desc in cpu::descriptors() {
        if desc.state() == CpuState::Stopped {
            desc.set_state(CpuState::Running);
        }
    }
}

/// The stop-check point. Stores the caller's context and parks it while a
/// debug stop is in effect; returns immediately otherwise.
pub fn check_debug_stop() {
    let me = cpu::current_cpu_id();
    let Some(desc) = cpu::descriptor(me) else {
        return;
    };
    if !desc.stop_requested.swap(false, Ordering::AcqRel) {
        return;
    }

    *desc.saved_context.lock() = Some(CpuContext {
        cpu: me,
        task: current_task().id(),
    });
    desc.set_state(CpuState::Stopped);
    debug!("cpu {} stopped for debugger", me.as_u32());

    while desc.state() == CpuState::Stopped {
        std::thread::sleep(Duration::from_millis(1));
    }
}
