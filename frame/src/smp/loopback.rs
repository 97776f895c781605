// SPDX-License-Identifier: MPL-2.0

use std::collections::BTreeMap;

use super::{ap_main, ApTransport, BootPayload};
use crate::sync::SpinLock;
use crate::{Error, Result};

#[derive(Default)]
struct ApSim {
    waiting_for_startup: bool,
    started: bool,
    startups_seen: u32,
}

/// The host-platform transport: every application processor is a thread.
///
/// INIT moves the simulated AP into its wait-for-STARTUP state; the first
/// effective STARTUP spawns the AP thread at [`ap_main`]. The
/// `dropping_first_startup` flavour swallows each AP's first STARTUP the
/// way real hardware occasionally does, which exercises the coordinator's
/// retry path.
pub struct LoopbackTransport {
    published: SpinLock<bool>,
    drop_first_startup: bool,
    aps: SpinLock<BTreeMap<u32, ApSim>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            published: SpinLock::new(false),
            drop_first_startup: false,
            aps: SpinLock::new(BTreeMap::new()),
        }
    }

    /// A transport that ignores the first STARTUP sent to each AP.
    pub fn dropping_first_startup() -> Self {
        Self {
            drop_first_startup: true,
            ..Self::new()
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ApTransport for LoopbackTransport {
    fn publish_boot_payload(&self, payload: &BootPayload) -> Result<()> {
        if payload.trampoline.is_empty() || payload.descriptor_table_ptr == 0 {
            return Err(Error::InvalidArgs);
        }
        *self.published.lock() = true;
        Ok(())
    }

    fn send_init(&self, apic_id: u32) {
        let mut aps = self.aps.lock();
        let sim = aps.entry(apic_id).or_default();
        if !sim.started {
            sim.waiting_for_startup = true;
        }
    }

    fn send_init_deassert(&self) {
        // Level de-assert has no observable effect on the loopback.
    }

    fn send_startup(&self, apic_id: u32, _vector: u8) {
        if !*self.published.lock() {
            return;
        }
        let mut aps = self.aps.lock();
        let Some(sim) = aps.get_mut(&apic_id) else {
            return;
        };
        if !sim.waiting_for_startup || sim.started {
            return;
        }
        sim.startups_seen += 1;
        if self.drop_first_startup && sim.startups_seen == 1 {
            return;
        }
        sim.started = true;
        std::thread::Builder::new()
            .name(format!("ap-{}", apic_id))
            .spawn(move || ap_main(apic_id))
            .expect("cannot spawn AP");
    }
}
