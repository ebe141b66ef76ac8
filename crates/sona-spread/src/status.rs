//! Codec lifecycle state machine
//!
//! Two independent axes: the codec axis (is the heavy precomputed state
//! usable?) and the processing axis (is a `process()` call in flight?).
//! The audio actor only ever loads atomics here; waiting is reserved for
//! the control actor.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::{Condvar, Mutex};
use portable_atomic::AtomicF32;

/// Codec initialisation status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodecStatus {
    /// Configuration changed since the last (re)initialisation
    NotInitialised = 0,
    /// `init_codec` is rebuilding the heavy state
    Initialising = 1,
    /// Ready for processing
    Initialised = 2,
}

impl CodecStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Initialising,
            2 => Self::Initialised,
            _ => Self::NotInitialised,
        }
    }
}

/// Lifecycle flags shared between the control and audio actors
pub(crate) struct Lifecycle {
    codec: AtomicU8,
    ongoing: AtomicBool,
    progress: AtomicF32,
    progress_text: Mutex<String>,
    init_lock: Mutex<()>,
    init_done: Condvar,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            codec: AtomicU8::new(CodecStatus::NotInitialised as u8),
            ongoing: AtomicBool::new(false),
            progress: AtomicF32::new(0.0),
            progress_text: Mutex::new(String::new()),
            init_lock: Mutex::new(()),
            init_done: Condvar::new(),
        }
    }

    pub fn codec_status(&self) -> CodecStatus {
        CodecStatus::from_u8(self.codec.load(Ordering::Acquire))
    }

    pub fn processing_ongoing(&self) -> bool {
        self.ongoing.load(Ordering::Acquire)
    }

    /// Transition to `NotInitialised` after a configuration change.
    ///
    /// If initialisation is in flight, waits for it to complete first so
    /// the heavy state is never invalidated mid-construction.
    pub fn request_reinit(&self) {
        loop {
            let current = self.codec.load(Ordering::Acquire);
            if current == CodecStatus::Initialising as u8 {
                let mut guard = self.init_lock.lock();
                // Re-check under the lock; finish_init publishes before notifying
                if self.codec.load(Ordering::Acquire) == CodecStatus::Initialising as u8 {
                    self.init_done.wait(&mut guard);
                }
                continue;
            }
            if self
                .codec
                .compare_exchange(
                    current,
                    CodecStatus::NotInitialised as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return;
            }
        }
    }

    /// Claim the `Initialising` state. Returns false when there is nothing
    /// to do (already initialised, or another init is running).
    pub fn try_begin_init(&self) -> bool {
        self.codec
            .compare_exchange(
                CodecStatus::NotInitialised as u8,
                CodecStatus::Initialising as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Publish `Initialised` and wake any setter waiting in
    /// [`request_reinit`]
    pub fn finish_init(&self) {
        let _guard = self.init_lock.lock();
        self.codec
            .store(CodecStatus::Initialised as u8, Ordering::Release);
        self.init_done.notify_all();
    }

    pub fn begin_process(&self) {
        self.ongoing.store(true, Ordering::Release);
    }

    pub fn end_process(&self) {
        self.ongoing.store(false, Ordering::Release);
    }

    pub fn set_progress(&self, fraction: f32, text: &str) {
        self.progress.store(fraction, Ordering::Relaxed);
        let mut guard = self.progress_text.lock();
        guard.clear();
        guard.push_str(text);
    }

    pub fn progress(&self) -> f32 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn progress_text(&self) -> String {
        self.progress_text.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let lc = Lifecycle::new();
        assert_eq!(lc.codec_status(), CodecStatus::NotInitialised);
        assert!(!lc.processing_ongoing());
    }

    #[test]
    fn test_init_cycle() {
        let lc = Lifecycle::new();
        assert!(lc.try_begin_init());
        assert_eq!(lc.codec_status(), CodecStatus::Initialising);
        // A second claim while initialising must fail
        assert!(!lc.try_begin_init());
        lc.finish_init();
        assert_eq!(lc.codec_status(), CodecStatus::Initialised);
        // Nothing to do when already initialised
        assert!(!lc.try_begin_init());
    }

    #[test]
    fn test_request_reinit_from_initialised() {
        let lc = Lifecycle::new();
        assert!(lc.try_begin_init());
        lc.finish_init();
        lc.request_reinit();
        assert_eq!(lc.codec_status(), CodecStatus::NotInitialised);
    }

    #[test]
    fn test_request_reinit_waits_for_init() {
        use std::sync::Arc;

        let lc = Arc::new(Lifecycle::new());
        assert!(lc.try_begin_init());

        let waiter = {
            let lc = Arc::clone(&lc);
            std::thread::spawn(move || {
                lc.request_reinit();
                lc.codec_status()
            })
        };

        // Give the waiter a moment to block, then complete the init
        std::thread::sleep(std::time::Duration::from_millis(20));
        lc.finish_init();

        assert_eq!(waiter.join().unwrap(), CodecStatus::NotInitialised);
    }
}
