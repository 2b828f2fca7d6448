// Copyright 2025-2026 CEMAXECUTER LLC

//! Transmit sink: bridges an upstream sample producer and a hardware
//! transfer engine through a bounded [`SlotRing`].
//!
//! The fill side (`work`) converts `Complex32` samples into a scratch slot and
//! queues it once full, blocking while the ring has no room. The drain side
//! runs on the engine's thread, pops one slot per transfer and never blocks:
//! an empty ring is answered with silence. `stop` flushes the partial slot,
//! queues trailing silence and waits for the engine to run dry.

use num_complex::Complex32;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tx_dsp::Converter;

use crate::error::{SinkError, SinkResult};
use crate::ring::SlotRing;
use crate::{DrainFn, DrainStatus, TransferEngine};

/// HackRF transfer size in bytes (131072 complex samples)
pub const DEFAULT_SLOT_SIZE: usize = 16 * 32 * 512;

/// Default number of queued transfers
pub const DEFAULT_BUFFER_COUNT: usize = 15;

/// Full silence slots queued after the flushed partial slot on stop
pub const TRAILING_SILENCE_SLOTS: usize = 5;

/// How often blocked waits re-check the engine
const STREAMING_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Ring capacity in slots
    pub buffer_count: usize,
    /// Bytes per slot; must equal the engine's transfer size
    pub slot_size: usize,
    /// Upper bound on the whole stop sequence. `None` waits forever.
    pub stop_timeout: Option<Duration>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
            slot_size: DEFAULT_SLOT_SIZE,
            stop_timeout: None,
        }
    }
}

impl SinkConfig {
    pub fn validate(&self) -> SinkResult<()> {
        if self.buffer_count == 0 {
            return Err(SinkError::Config("buffer count must be at least 1".into()));
        }
        if self.slot_size == 0 || self.slot_size % 2 != 0 {
            return Err(SinkError::Config(format!(
                "slot size {} must be a non-zero multiple of 2",
                self.slot_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Idle,
    Streaming,
    Stopping,
    Stopped,
}

/// Diagnostic counters, updated from both sides of the ring.
#[derive(Debug, Default)]
pub struct TxStats {
    slots_pushed: AtomicU64,
    slots_drained: AtomicU64,
    underruns: AtomicU64,
    deferred_pushes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxStatsSnapshot {
    /// Slots queued by the fill side, including stop padding
    pub slots_pushed: u64,
    /// Slots handed to the engine
    pub slots_drained: u64,
    /// Transfers answered with silence while not stopping
    pub underruns: u64,
    /// Full slots whose push lost a race and was retried later
    pub deferred_pushes: u64,
}

impl TxStats {
    pub fn snapshot(&self) -> TxStatsSnapshot {
        TxStatsSnapshot {
            slots_pushed: self.slots_pushed.load(Ordering::Relaxed),
            slots_drained: self.slots_drained.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            deferred_pushes: self.deferred_pushes.load(Ordering::Relaxed),
        }
    }
}

struct RingState {
    ring: SlotRing,
    stopping: bool,
}

/// State shared between the fill side and the engine's drain closure.
struct Shared {
    state: Mutex<RingState>,
    /// Signalled on both "room available" and "slot available"
    cond: Condvar,
    stats: TxStats,
}

impl Shared {
    fn push(&self, st: &mut RingState, slot: &[i8]) -> bool {
        if !st.ring.try_push(slot) {
            return false;
        }
        self.stats.slots_pushed.fetch_add(1, Ordering::Relaxed);
        self.cond.notify_all();
        true
    }

    fn drain(&self, dest: &mut [i8]) -> DrainStatus {
        let mut st = self.state.lock();

        if dest.len() == st.ring.slot_size() && st.ring.try_pop(dest) {
            self.stats.slots_drained.fetch_add(1, Ordering::Relaxed);
            self.cond.notify_all();
            return DrainStatus::Continue;
        }

        dest.fill(0);

        if st.stopping {
            self.cond.notify_all();
            return DrainStatus::Terminate;
        }

        self.stats.underruns.fetch_add(1, Ordering::Relaxed);
        if dest.len() != st.ring.slot_size() {
            log::debug!(
                "tx transfer of {} bytes does not match slot size {}",
                dest.len(),
                st.ring.slot_size()
            );
        } else {
            log::debug!("tx underrun");
        }
        DrainStatus::Continue
    }
}

/// Wait on the condvar for one poll period. Returns false once `deadline`
/// has passed.
fn wait_tick(
    cond: &Condvar,
    guard: &mut MutexGuard<'_, RingState>,
    deadline: Option<Instant>,
) -> bool {
    let mut timeout = STREAMING_POLL;
    if let Some(deadline) = deadline {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        timeout = timeout.min(deadline - now);
    }
    cond.wait_for(guard, timeout);
    true
}

/// Single-stream transmit sink over a [`TransferEngine`].
pub struct TxSink<E: TransferEngine> {
    engine: Option<E>,
    shared: Arc<Shared>,
    converter: Converter,
    /// Slot being assembled by the fill side
    scratch: Vec<i8>,
    /// Bytes of `scratch` already written
    fill_offset: usize,
    state: SinkState,
    config: SinkConfig,
}

impl<E: TransferEngine> TxSink<E> {
    /// Create a sink bound to `engine`.
    pub fn new(config: SinkConfig, engine: E) -> SinkResult<Self> {
        Self::build(config, Some(engine))
    }

    /// Create a sink with no engine; `start` fails until one is bound.
    pub fn unbound(config: SinkConfig) -> SinkResult<Self> {
        Self::build(config, None)
    }

    fn build(config: SinkConfig, engine: Option<E>) -> SinkResult<Self> {
        config.validate()?;

        if config.buffer_count != DEFAULT_BUFFER_COUNT || config.slot_size != DEFAULT_SLOT_SIZE {
            log::info!(
                "using {} buffers of size {}",
                config.buffer_count,
                config.slot_size
            );
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(RingState {
                ring: SlotRing::new(config.buffer_count, config.slot_size),
                stopping: false,
            }),
            cond: Condvar::new(),
            stats: TxStats::default(),
        });

        Ok(Self {
            engine,
            shared,
            converter: Converter::detect(),
            scratch: vec![0i8; config.slot_size],
            fill_offset: 0,
            state: SinkState::Idle,
            config,
        })
    }

    /// Replace the sample converter (mainly for benchmarking a fixed path).
    pub fn with_converter(mut self, converter: Converter) -> Self {
        self.converter = converter;
        self
    }

    /// Bind an engine, returning the previous one. Only allowed while idle
    /// or stopped.
    pub fn bind(&mut self, engine: E) -> SinkResult<Option<E>> {
        if matches!(self.state, SinkState::Streaming | SinkState::Stopping) {
            return Err(SinkError::Config("cannot rebind a streaming sink".into()));
        }
        Ok(self.engine.replace(engine))
    }

    pub fn engine(&self) -> Option<&E> {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> Option<&mut E> {
        self.engine.as_mut()
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    pub fn converter(&self) -> Converter {
        self.converter
    }

    pub fn fill_offset(&self) -> usize {
        self.fill_offset
    }

    /// Slots currently queued for the engine.
    pub fn queued(&self) -> usize {
        self.shared.state.lock().ring.len()
    }

    pub fn stats(&self) -> TxStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Drain closure over this sink's ring, as handed to the engine on start.
    pub fn drain_callback(&self) -> DrainFn {
        let shared = Arc::clone(&self.shared);
        Box::new(move |dest: &mut [i8]| shared.drain(dest))
    }

    /// Begin streaming: the engine starts calling the drain closure.
    pub fn start(&mut self) -> SinkResult<()> {
        let engine = self.engine.as_mut().ok_or(SinkError::NoDevice)?;

        if self.state == SinkState::Streaming {
            log::warn!("TX sink already streaming");
            return Ok(());
        }

        let transfer_size = engine.transfer_size();
        if transfer_size != self.config.slot_size {
            return Err(SinkError::Config(format!(
                "slot size {} does not match engine transfer size {}",
                self.config.slot_size, transfer_size
            )));
        }

        {
            let mut st = self.shared.state.lock();
            st.stopping = false;
            // A stop that timed out can leave stale slots behind
            if self.state != SinkState::Idle {
                st.ring.clear();
            }
        }
        self.fill_offset = 0;

        let shared = Arc::clone(&self.shared);
        engine
            .start_transfer(Box::new(move |dest: &mut [i8]| shared.drain(dest)))
            .map_err(|e| {
                log::error!("failed to start TX streaming: {}", e);
                SinkError::HardwareStart(e)
            })?;

        self.state = SinkState::Streaming;
        log::info!(
            "TX streaming started ({} buffers x {} bytes, {} converter)",
            self.config.buffer_count,
            self.config.slot_size,
            self.converter.kind().name()
        );
        Ok(())
    }

    /// Convert and queue up to one slot's worth of `input`.
    ///
    /// Blocks until the ring has room, then returns how many samples were
    /// consumed. Zero is a legitimate answer when a full slot could not be
    /// queued; the same samples should be offered again.
    ///
    /// Fails with [`SinkError::EngineStopped`] if the engine stops on its
    /// own while the ring is full.
    pub fn work(&mut self, input: &[Complex32]) -> SinkResult<usize> {
        let shared = &*self.shared;

        {
            let engine = match self.state {
                SinkState::Streaming => self.engine.as_ref(),
                _ => None,
            };
            let mut st = shared.state.lock();
            while !st.ring.has_room() {
                if engine.is_some_and(|e| !e.is_streaming()) {
                    log::error!("TX engine stopped with {} slots queued", st.ring.len());
                    return Err(SinkError::EngineStopped);
                }
                shared.cond.wait_for(&mut st, STREAMING_POLL);
            }
        }

        let slot_size = self.scratch.len();
        let prev_offset = self.fill_offset;
        let remaining = (slot_size - prev_offset) / 2;
        let count = input.len().min(remaining);
        let end = prev_offset + count * 2;

        self.converter
            .convert(&input[..count], &mut self.scratch[prev_offset..end]);
        self.fill_offset = end;

        if count == remaining {
            let mut st = shared.state.lock();
            if shared.push(&mut st, &self.scratch) {
                self.fill_offset = 0;
            } else {
                // Only reachable if another pusher raced the wait above;
                // `&mut self` rules that out today

                self.fill_offset = prev_offset;
                shared.stats.deferred_pushes.fetch_add(1, Ordering::Relaxed);
                log::debug!("tx overrun: slot push deferred");
                return Ok(0);
            }
        }

        Ok(count)
    }

    /// Feed `input` through `work` until every sample is consumed.
    pub fn work_all(&mut self, mut input: &[Complex32]) -> SinkResult<()> {
        while !input.is_empty() {
            let consumed = self.work(input)?;
            input = &input[consumed..];
        }
        Ok(())
    }

    /// Flush the partial slot, queue trailing silence, wait for the engine to
    /// run dry, then stop it.
    ///
    /// The sink ends up `Stopped` even when the engine rejects the stop
    /// request or the timeout fires.
    pub fn stop(&mut self) -> SinkResult<()> {
        if self.engine.is_none() {
            return Err(SinkError::NoDevice);
        }
        if self.state != SinkState::Streaming {
            return Ok(());
        }

        self.state = SinkState::Stopping;
        let drained = self.flush_and_wait();

        let stopped = match self.engine.as_mut() {
            Some(engine) => engine.stop_transfer(),
            None => Ok(()),
        };
        self.state = SinkState::Stopped;

        let stats = self.stats();
        log::info!(
            "TX streaming stopped ({} slots sent, {} underruns, {} deferred pushes)",
            stats.slots_drained,
            stats.underruns,
            stats.deferred_pushes
        );

        if let Err(e) = &stopped {
            log::error!("failed to stop TX streaming: {}", e);
        }
        drained?;
        stopped.map_err(SinkError::HardwareStop)
    }

    fn flush_and_wait(&mut self) -> SinkResult<()> {
        let Some(engine) = self.engine.as_ref() else {
            return Ok(());
        };
        let deadline = self.config.stop_timeout.map(|t| Instant::now() + t);
        let timed_out = || {
            let limit = self.config.stop_timeout.unwrap_or_default();
            log::warn!("TX stop did not complete within {:?}", limit);
            SinkError::StopTimeout(limit)
        };

        let shared = &*self.shared;
        let mut st = shared.state.lock();

        while !st.ring.has_room() {
            if !engine.is_streaming() {
                return Err(SinkError::EngineStopped);
            }
            if !wait_tick(&shared.cond, &mut st, deadline) {
                return Err(timed_out());
            }
        }

        // Pad the partial slot with silence
        self.scratch[self.fill_offset..].fill(0);
        shared.push(&mut st, &self.scratch);
        self.fill_offset = 0;

        // Extra silence so the tail of the burst is not cut off
        self.scratch.fill(0);
        for _ in 0..TRAILING_SILENCE_SLOTS {
            while !st.ring.has_room() {
                if !engine.is_streaming() {
                    return Err(SinkError::EngineStopped);
                }
                if !wait_tick(&shared.cond, &mut st, deadline) {
                    return Err(timed_out());
                }
            }
            shared.push(&mut st, &self.scratch);
        }

        st.stopping = true;

        while engine.is_streaming() {
            if !wait_tick(&shared.cond, &mut st, deadline) {
                return Err(timed_out());
            }
        }

        Ok(())
    }
}
