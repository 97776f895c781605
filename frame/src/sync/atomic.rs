// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{fence, AtomicU32, Ordering};

/// Stores a 32-bit word with a full memory fence.
///
/// All writes program-ordered before this store are published before any
/// CPU can observe the stored value, so a flag stored this way establishes
/// a happens-before with the matching [`ordered_load`].
pub fn ordered_store(word: &AtomicU32, val: u32) {
    fence(Ordering::SeqCst);
    word.store(val, Ordering::SeqCst);
}

/// Loads a 32-bit word with a full memory fence.
pub fn ordered_load(word: &AtomicU32) -> u32 {
    let val = word.load(Ordering::SeqCst);
    fence(Ordering::SeqCst);
    val
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn store_publishes_prior_writes() {
        let flag = Arc::new(AtomicU32::new(0));
        let payload = Arc::new(AtomicU32::new(0));

        let producer = {
            let flag = flag.clone();
            let payload = payload.clone();
            std::thread::spawn(move || {
                payload.store(42, Ordering::Relaxed);
                ordered_store(&flag, 1);
            })
        };
        while ordered_load(&flag) == 0 {
            core::hint::spin_loop();
        }
        assert_eq!(payload.load(Ordering::Relaxed), 42);
        producer.join().unwrap();
    }
}
