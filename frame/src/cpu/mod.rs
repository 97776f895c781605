// SPDX-License-Identifier: MPL-2.0

//! CPU identity.
//!
//! Logical CPU ids are dense and fixed after boot; logical id 0 is the
//! boot-strap processor. Each CPU carries a local interrupt-controller id
//! ("APIC id") in a per-CPU register; [`current_cpu_id`] reads that
//! register and maps it through the boot-time table. The result is only
//! valid for the duration of the current non-preemptible section; a
//! caller that may block must reread afterwards.

use core::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use spin::Once;

use crate::sync::SpinLock;

/// A logical CPU id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(u32);

impl CpuId {
    /// The boot-strap processor.
    pub const BSP: CpuId = CpuId(0);

    pub const fn new(id: u32) -> Self {
        CpuId(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// The life-cycle state of a CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CpuState {
    NotStarted = 0,
    Running = 1,
    Stopped = 2,
}

/// The execution snapshot a CPU stores when it parks for the debugger.
#[derive(Debug, Clone, Copy)]
pub struct CpuContext {
    pub cpu: CpuId,
    pub task: u64,
}

pub(crate) struct CpuDescriptor {
    logical: CpuId,
    apic_id: u32,
    state: AtomicU8,
    pub(crate) stop_requested: AtomicBool,
    pub(crate) saved_context: SpinLock<Option<CpuContext>>,
}

impl CpuDescriptor {
    fn new(logical: CpuId, apic_id: u32) -> Self {
        Self {
            logical,
            apic_id,
            state: AtomicU8::new(CpuState::NotStarted as u8),
            stop_requested: AtomicBool::new(false),
            saved_context: SpinLock::new(None),
        }
    }

    pub(crate) fn logical(&self) -> CpuId {
        self.logical
    }

    pub(crate) fn apic_id(&self) -> u32 {
        self.apic_id
    }

    pub(crate) fn state(&self) -> CpuState {
        match self.state.load(Ordering::Acquire) {
            0 => CpuState::NotStarted,
            1 => CpuState::Running,
            _ => CpuState::Stopped,
        }
    }

    pub(crate) fn set_state(&self, state: CpuState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

static CPUS: Once<Vec<CpuDescriptor>> = Once::new();

std::thread_local! {
    // The per-CPU identity register.
    static LOCAL_APIC_ID: Cell<u32> = const { Cell::new(0) };
}

/// Populates the CPU table. Called once by the SMP coordinator before any
/// application processor is signalled; the mapping is fixed afterwards.
pub fn init(bsp_apic_id: u32, ap_apic_ids: &[u32]) {
    CPUS.call_once(|| {
        let mut cpus = Vec::with_capacity(1 + ap_apic_ids.len());
        cpus.push(CpuDescriptor::new(CpuId::BSP, bsp_apic_id));
        for (i, &apic_id) in ap_apic_ids.iter().enumerate() {
            cpus.push(CpuDescriptor::new(CpuId(i as u32 + 1), apic_id));
        }
        cpus[0].set_state(CpuState::Running);
        cpus
    });
    set_local_apic_id(bsp_apic_id);
}

/// Binds the calling CPU's identity register.
pub fn set_local_apic_id(apic_id: u32) {
    LOCAL_APIC_ID.with(|reg| reg.set(apic_id));
}

/// Returns the number of CPUs known to the system.
pub fn num_cpus() -> u32 {
    CPUS.get().map_or(1, |cpus| cpus.len() as u32)
}

/// Returns whether more than one CPU participates.
pub fn smp_enabled() -> bool {
    num_cpus() > 1
}

/// Returns the logical id of the calling CPU.
///
/// Returns [`CpuId::BSP`] when SMP is disabled. The value is stable only
/// within the current non-preemptible section.
pub fn current_cpu_id() -> CpuId {
    if !smp_enabled() {
        return CpuId::BSP;
    }
    let apic_id = LOCAL_APIC_ID.with(|reg| reg.get());
    let cpus = CPUS.get().expect("CPU table not initialized");
    cpus.iter()
        .find(|cpu| cpu.apic_id == apic_id)
        .map_or(CpuId::BSP, |cpu| cpu.logical)
}

/// Returns the state of the given CPU.
pub fn cpu_state(cpu: CpuId) -> CpuState {
    descriptor(cpu).map_or(CpuState::NotStarted, CpuDescriptor::state)
}

/// Returns the context the CPU saved when it stopped for the debugger.
pub fn saved_context(cpu: CpuId) -> Option<CpuContext> {
    descriptor(cpu).and_then(|desc| *desc.saved_context.lock())
}

pub(crate) fn descriptor(cpu: CpuId) -> Option<&'static CpuDescriptor> {
    CPUS.get()?.get(cpu.0 as usize)
}

pub(crate) fn descriptors() -> &'static [CpuDescriptor] {
    CPUS.get().map_or(&[], Vec::as_slice)
}
