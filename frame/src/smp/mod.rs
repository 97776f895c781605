// SPDX-License-Identifier: MPL-2.0

//! Multiprocessor boot support.
//!
//! The boot-strap processor (BSP) runs first; the application processors
//! (APs) wait for a startup signal. The BSP publishes the boot payload
//! (the relocated trampoline template plus the descriptor-table pointer)
//! through the [`ApTransport`], then drives every AP through the classic
//! sequence: INIT, wait, optional level de-assert for older interrupt
//! controllers, STARTUP (repeated once if the AP has not left its
//! real-mode phase) and finally a handshake that ends when the AP reports
//! its idle task running. Bring-up is strictly serial: at most one AP is
//! in flight at any time.
//!
//! Failure to publish the payload or an AP that never reaches protected
//! mode is fatal and halts the machine (panic).

mod loopback;
pub mod stop;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, info};
use spin::Once;

use crate::cpu::{self, CpuState};
use crate::sync::{ordered_load, ordered_store};
use crate::task::{current_task, Task};
use crate::time::{now, wait_ms};
use crate::Result;

pub use loopback::LoopbackTransport;

/// Physical address the STARTUP vector points the APs at.
const AP_BOOT_START_PA: u64 = 0x8000;
const PAGE_SIZE: u64 = 4096;
const TRAMPOLINE_LEN: usize = 128;

/// How long an AP may take to report protected mode, and then its idle
/// task, before bring-up gives up.
const HANDSHAKE_TIMEOUT_MS: u64 = 2000;

/// The boot payload the BSP publishes before signalling any AP.
pub struct BootPayload {
    /// The relocated trampoline template, placed at the startup page.
    pub trampoline: Vec<u8>,
    /// Pointer to the descriptor table the APs load on their way out of
    /// the real-mode phase.
    pub descriptor_table_ptr: u64,
    /// Page number encoded into the STARTUP signal.
    pub startup_vector: u8,
}

/// The machine contract for waking application processors.
pub trait ApTransport: Send + Sync {
    /// Places the boot payload at the addresses the APs will read.
    fn publish_boot_payload(&self, payload: &BootPayload) -> Result<()>;

    /// Sends the INIT signal to one AP.
    fn send_init(&self, apic_id: u32);

    /// Whether the interrupt controller requires a level de-assert after
    /// INIT (older controllers do).
    fn needs_init_deassert(&self) -> bool {
        false
    }

    /// Broadcasts the INIT level de-assert.
    fn send_init_deassert(&self);

    /// Sends the STARTUP signal pointing at `vector`.
    fn send_startup(&self, apic_id: u32, vector: u8);
}

struct ApHandshake {
    /// The AP has left its real-mode phase.
    protected_mode: AtomicU32,
    /// The BSP allows the AP to continue past registration.
    may_proceed: AtomicU32,
    /// The AP's idle task is running.
    idle_reached: AtomicU32,
}

impl ApHandshake {
    const fn new() -> Self {
        Self {
            protected_mode: AtomicU32::new(0),
            may_proceed: AtomicU32::new(0),
            idle_reached: AtomicU32::new(0),
        }
    }
}

struct ApBootInfo {
    per_ap: BTreeMap<u32, ApHandshake>,
}

static AP_BOOT_INFO: Once<ApBootInfo> = Once::new();
static AP_LATE_ENTRY: Once<fn()> = Once::new();
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Registers the function APs run once released from the handshake.
/// Without one, released APs sit in the idle loop.
pub fn register_ap_late_entry(entry: fn()) {
    AP_LATE_ENTRY.call_once(|| entry);
}

fn build_boot_payload(descriptor_table_ptr: u64) -> BootPayload {
    let startup_vector = (AP_BOOT_START_PA / PAGE_SIZE) as u8;
    // The template is opaque to this layer; the vector and the descriptor
    // pointer are patched at fixed offsets during relocation.
    let mut trampoline = vec![0u8; TRAMPOLINE_LEN];
    trampoline[0] = startup_vector;
    trampoline[8..16].copy_from_slice(&descriptor_table_ptr.to_le_bytes());
    BootPayload {
        trampoline,
        descriptor_table_ptr,
        startup_vector,
    }
}

/// Boots all application processors, one at a time.
///
/// `bsp_apic_id` identifies the calling CPU; `ap_apic_ids` lists the APs
/// in bring-up order. Returns once every AP has reached its idle loop.
pub fn boot_all_aps(transport: Arc<dyn ApTransport>, bsp_apic_id: u32, ap_apic_ids: &[u32]) {
    cpu::init(bsp_apic_id, ap_apic_ids);
    if ap_apic_ids.is_empty() {
        return;
    }

    AP_BOOT_INFO.call_once(|| {
        let per_ap = ap_apic_ids
            .iter()
            .map(|&apic_id| (apic_id, ApHandshake::new()))
            .collect();
        ApBootInfo { per_ap }
    });

    let payload = build_boot_payload(descriptor_table_ptr());
    if let Err(e) = transport.publish_boot_payload(&payload) {
        panic!("SMP: cannot publish AP boot payload: {:?}", e);
    }

    for &apic_id in ap_apic_ids {
        debug!("SMP: bringing up AP {}", apic_id);
        let handshake = handshake(apic_id);

        transport.send_init(apic_id);
        wait_ms(10);
        if transport.needs_init_deassert() {
            transport.send_init_deassert();
            wait_ms(2);
        }

        transport.send_startup(apic_id, payload.startup_vector);
        wait_ms(2);
        if ordered_load(&handshake.protected_mode) == 0 {
            // The first STARTUP did not move the AP past real mode.
            transport.send_startup(apic_id, payload.startup_vector);
        }
        if !wait_flag(&handshake.protected_mode, HANDSHAKE_TIMEOUT_MS) {
            panic!("SMP: AP {} failed to reach protected mode", apic_id);
        }

        ordered_store(&handshake.may_proceed, 1);
        if !wait_flag(&handshake.idle_reached, HANDSHAKE_TIMEOUT_MS) {
            panic!("SMP: AP {} failed to start its idle task", apic_id);
        }

        if let Some(desc) = cpu::descriptors().iter().find(|d| d.apic_id() == apic_id) {
            desc.set_state(CpuState::Running);
        }
        debug!("SMP: AP {} is idle", apic_id);
    }
    info!("SMP: bring-up complete, {} CPUs online", cpu::num_cpus());
}

/// The entry point an AP reaches once its STARTUP took effect.
pub fn ap_main(apic_id: u32) {
    cpu::set_local_apic_id(apic_id);
    let handshake = handshake(apic_id);

    ordered_store(&handshake.protected_mode, 1);
    while ordered_load(&handshake.may_proceed) == 0 {
        core::hint::spin_loop();
        std::thread::yield_now();
    }

    // This task is the CPU's idle task.
    let _idle = current_task();
    ordered_store(&handshake.idle_reached, 1);

    match AP_LATE_ENTRY.get() {
        Some(entry) => entry(),
        None => idle_loop(),
    }
}

fn idle_loop() {
    while !SHUTDOWN.load(Ordering::Acquire) {
        stop::check_debug_stop();
        Task::park_timeout(core::time::Duration::from_millis(1));
    }
}

/// Asks the idle loops to wind down. Host-platform power-off.
pub fn shutdown_aps() {
    SHUTDOWN.store(true, Ordering::Release);
}

fn handshake(apic_id: u32) -> &'static ApHandshake {
    AP_BOOT_INFO
        .get()
        .and_then(|info| info.per_ap.get(&apic_id))
        .expect("AP signalled before its boot info was published")
}

fn wait_flag(flag: &AtomicU32, timeout_ms: u64) -> bool {
    let deadline = now() + core::time::Duration::from_millis(timeout_ms);
    while ordered_load(flag) == 0 {
        if now() >= deadline {
            return false;
        }
        std::thread::yield_now();
    }
    true
}

fn descriptor_table_ptr() -> u64 {
    // The shared descriptor table lives just above the trampoline page.
    AP_BOOT_START_PA + PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{cpu_state, current_cpu_id, num_cpus, saved_context, CpuId};

    // Bring-up, identity, debug stop and resume share one boot topology,
    // so they run as a single sequential test.
    #[test]
    fn bring_up_stop_and_resume() {
        let _ = env_logger::builder().is_test(true).try_init();

        // Swallowing the first STARTUP of every AP exercises the retry.
        let transport = Arc::new(LoopbackTransport::dropping_first_startup());
        boot_all_aps(transport, 0, &[4, 6]);

        assert_eq!(num_cpus(), 3);
        assert_eq!(current_cpu_id(), CpuId::BSP);
        assert_eq!(cpu_state(CpuId::BSP), CpuState::Running);
        for cpu in 1..3 {
            assert_eq!(cpu_state(CpuId::new(cpu)), CpuState::Running);
        }

        // Stop every other CPU; each must save a context snapshot.
        stop::debug_stop_others();
        for cpu in 1..3 {
            let cpu = CpuId::new(cpu);
            assert_eq!(cpu_state(cpu), CpuState::Stopped);
            let ctx = saved_context(cpu).expect("stopped CPU saved no context");
            assert_eq!(ctx.cpu, cpu);
        }

        stop::debug_resume_others();
        for cpu in 1..3 {
            assert_eq!(cpu_state(CpuId::new(cpu)), CpuState::Running);
        }

        shutdown_aps();
    }
}
