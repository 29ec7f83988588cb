// MIT License
//
// Copyright (c) 2020 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Admission control serializing structural growth against batches.

use parking_lot::{Condvar, Mutex};

/// The gate: any number of batches may be in flight at once while it is
/// open, while a thread that wants to replace the bucket array closes it,
/// waits for every other in-flight batch to finish, and reopens it when the
/// replacement is complete.
///
/// The gate has its own mutex, deliberately separate from the bucket
/// stripes, so gate bookkeeping never contends with key-level work. All
/// wait/notify pairing lives behind these four methods.
pub(crate) struct Gate {
    state: Mutex<State>,
    /// Signaled when the gate reopens.
    opened: Condvar,
    /// Signaled when an in-flight batch finishes while the gate is closed.
    drained: Condvar,
}

struct State {
    open: bool,
    in_flight: usize,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Gate {
            state: Mutex::new(State {
                open: true,
                in_flight: 0,
            }),
            opened: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    /// Blocks until the gate is open, then registers the calling thread as
    /// in flight.
    ///
    /// Every `enter` must be balanced by exactly one `exit`, or by a
    /// successful [`try_close`](Gate::try_close) followed by
    /// [`reopen`](Gate::reopen).
    pub(crate) fn enter(&self) {
        let mut state = self.state.lock();

        while !state.open {
            self.opened.wait(&mut state);
        }

        state.in_flight += 1;
    }

    /// Deregisters the calling in-flight thread.
    ///
    /// If the gate is closed and this thread was the last one a would-be
    /// grower is draining, wakes the grower.
    pub(crate) fn exit(&self) {
        let mut state = self.state.lock();

        debug_assert!(state.in_flight > 0);
        state.in_flight -= 1;

        if !state.open && state.in_flight == 1 {
            self.drained.notify_one();
        }
    }

    /// Attempts to close the gate on behalf of the calling in-flight
    /// thread.
    ///
    /// If the gate is open, closes it, blocks until the caller is the sole
    /// remaining in-flight thread, and returns true: the caller now has
    /// exclusive access to everything the gate protects and must call
    /// [`reopen`](Gate::reopen) when finished. If another thread already
    /// holds the gate closed, returns false immediately; the caller's
    /// subsequent [`exit`](Gate::exit) is what lets that thread proceed.
    pub(crate) fn try_close(&self) -> bool {
        let mut state = self.state.lock();

        if !state.open {
            return false;
        }

        state.open = false;

        while state.in_flight > 1 {
            self.drained.wait(&mut state);
        }

        true
    }

    /// Reopens the gate, deregisters the calling grower, and wakes every
    /// thread waiting to enter.
    pub(crate) fn reopen(&self) {
        let mut state = self.state.lock();

        debug_assert!(!state.open);
        debug_assert_eq!(state.in_flight, 1);

        state.open = true;
        state.in_flight -= 1;

        self.opened.notify_all();
    }
}
