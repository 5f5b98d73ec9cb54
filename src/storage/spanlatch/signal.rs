// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! One-shot broadcast signals and cancellation tokens.
//!
//! A fired channel is modeled by dropping its only sender: every receiver
//! clone observes the disconnect, at once and forever, which gives the
//! broadcast-once semantics latch waiters rely on.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

/// One-shot broadcast primitive. `signal` fires at most once; once fired the
/// signal stays fired and every past or future waiter observes it.
#[derive(Debug)]
pub(crate) struct Signal {
    fired: AtomicBool,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl Signal {
    pub(crate) fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            fired: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Fire the signal, waking all current waiters. Idempotent.
    pub(crate) fn signal(&self) {
        if !self.fired.swap(true, Ordering::Release) {
            self.tx.lock().take();
        }
    }

    /// Non-blocking check of the fire state.
    pub(crate) fn signaled(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Channel that disconnects once the signal fires. Never carries a
    /// message; waiters select on the disconnect.
    pub(crate) fn wait_channel(&self) -> &Receiver<()> {
        &self.rx
    }
}

/// Fires the paired [`CancelToken`]. Cancels on explicit `cancel` or on
/// drop, so holding the handle for the duration of the operation mirrors the
/// usual deferred-cancel pattern.
pub struct CancelHandle {
    tx: Mutex<Option<Sender<()>>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.lock().take();
    }
}

/// Observer side of a cancellation pair. Cloneable; all clones observe the
/// same cancellation.
#[derive(Clone)]
pub struct CancelToken {
    rx: Option<Receiver<()>>,
}

impl CancelToken {
    /// A token that can never fire, for callers that do not need
    /// cancellation.
    pub fn inert() -> Self {
        Self { rx: None }
    }

    pub fn is_canceled(&self) -> bool {
        match &self.rx {
            None => false,
            Some(rx) => matches!(rx.try_recv(), Err(crossbeam_channel::TryRecvError::Disconnected)),
        }
    }

    pub(crate) fn wait_channel(&self) -> Option<&Receiver<()>> {
        self.rx.as_ref()
    }
}

/// Create a connected cancellation handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = bounded(0);
    (
        CancelHandle {
            tx: Mutex::new(Some(tx)),
        },
        CancelToken { rx: Some(rx) },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn signal_fires_once_for_all_waiters() {
        let signal = std::sync::Arc::new(Signal::new());
        assert!(!signal.signaled());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let signal = std::sync::Arc::clone(&signal);
            handles.push(thread::spawn(move || {
                // recv errors with Disconnected once the signal fires.
                let _ = signal.wait_channel().recv();
                assert!(signal.signaled());
            }));
        }
        thread::sleep(Duration::from_millis(10));
        signal.signal();
        signal.signal();
        for handle in handles {
            handle.join().expect("waiter");
        }
    }

    #[test]
    fn cancel_pair_propagates_on_cancel_and_drop() {
        let (handle, token) = cancel_pair();
        let clone = token.clone();
        assert!(!token.is_canceled());
        handle.cancel();
        assert!(token.is_canceled());
        assert!(clone.is_canceled());

        let (handle, token) = cancel_pair();
        drop(handle);
        assert!(token.is_canceled());
    }

    #[test]
    fn inert_token_never_cancels() {
        let token = CancelToken::inert();
        assert!(!token.is_canceled());
    }
}
