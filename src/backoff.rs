// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Adaptive backoff: spin → pause → yield → sleep.
// Used where a peer is known to be about to act and there is no kernel
// primitive to block on (the shm backend's slot publication).

use std::time::Duration;

/// One backoff step for iteration counter `k`.
///
/// - k < 4:  busy spin (do nothing)
/// - k < 16: CPU pause hint
/// - k < 32: thread yield
/// - k >= 32: sleep 1ms
#[inline]
pub(crate) fn adaptive_yield(k: &mut u32) {
    if *k < 4 {
        // busy spin
    } else if *k < 16 {
        std::hint::spin_loop();
    } else if *k < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_millis(1));
        return;
    }
    *k += 1;
}

/// Back off until `ready` returns `Some`, or until `give_up` returns true.
pub(crate) fn spin_until<T>(
    mut ready: impl FnMut() -> Option<T>,
    mut give_up: impl FnMut() -> bool,
) -> Option<T> {
    let mut k = 0u32;
    loop {
        if let Some(v) = ready() {
            return Some(v);
        }
        if give_up() {
            return None;
        }
        adaptive_yield(&mut k);
    }
}
