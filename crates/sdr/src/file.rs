// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::{DrainFn, DrainStatus, TransferEngine};

/// Software transfer engine: pulls one transfer at a time through the drain
/// callback on its own thread and writes it out as CS8 (interleaved i8 I/Q).
///
/// With a sample rate set, transfers are paced like the USB engine would; with
/// none, the thread drains as fast as the writer accepts data.
pub struct FileSink<W: Write + Send + 'static> {
    /// Present while idle; moved into the worker while streaming
    writer: Option<W>,
    transfer_size: usize,
    interval: Option<Duration>,
    streaming: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    worker: Option<JoinHandle<io::Result<W>>>,
}

impl FileSink<BufWriter<File>> {
    /// Create (truncate) `path` as the output.
    pub fn create(path: impl AsRef<Path>, transfer_size: usize) -> Result<Self, String> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| format!("failed to create {}: {}", path.display(), e))?;
        log::info!("writing CS8 to {}", path.display());
        Ok(Self::new(BufWriter::with_capacity(1024 * 1024, file), transfer_size))
    }
}

impl<W: Write + Send + 'static> FileSink<W> {
    pub fn new(writer: W, transfer_size: usize) -> Self {
        Self {
            writer: Some(writer),
            transfer_size,
            interval: None,
            streaming: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Pace transfers at `sample_rate` complex samples per second.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.interval = if sample_rate == 0 {
            None
        } else {
            let samples = (self.transfer_size / 2) as f64;
            Some(Duration::from_secs_f64(samples / sample_rate as f64))
        };
        self
    }

    /// The writer, once the engine is idle again.
    pub fn writer(&self) -> Option<&W> {
        self.writer.as_ref()
    }

    pub fn into_writer(mut self) -> Option<W> {
        if self.worker.is_some() {
            let _ = self.stop_transfer();
        }
        self.writer.take()
    }

    fn run(
        mut writer: W,
        mut drain: DrainFn,
        transfer_size: usize,
        interval: Option<Duration>,
        stop_requested: &AtomicBool,
    ) -> io::Result<W> {
        let mut buf = vec![0i8; transfer_size];
        let mut next = Instant::now();

        while !stop_requested.load(Ordering::Acquire) {
            // The engine does not send the buffer that carried Terminate
            if drain(&mut buf) == DrainStatus::Terminate {
                break;
            }

            // SAFETY: i8 and u8 have identical size and alignment.
            let bytes = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, buf.len()) };
            writer.write_all(bytes)?;

            if let Some(interval) = interval {
                next += interval;
                let now = Instant::now();
                if next > now {
                    thread::sleep(next - now);
                } else {
                    next = now;
                }
            }
        }

        writer.flush()?;
        Ok(writer)
    }
}

impl<W: Write + Send + 'static> TransferEngine for FileSink<W> {
    fn start_transfer(&mut self, drain: DrainFn) -> Result<(), String> {
        if self.worker.is_some() {
            return Err("file sink already streaming".to_string());
        }
        let writer = self
            .writer
            .take()
            .ok_or_else(|| "file sink output lost after a write error".to_string())?;

        self.stop_requested.store(false, Ordering::Release);
        self.streaming.store(true, Ordering::Release);

        let streaming = Arc::clone(&self.streaming);
        let stop_requested = Arc::clone(&self.stop_requested);
        let transfer_size = self.transfer_size;
        let interval = self.interval;

        let worker = thread::Builder::new()
            .name("file-tx".into())
            .spawn(move || {
                let result = Self::run(writer, drain, transfer_size, interval, &stop_requested);
                if let Err(ref e) = result {
                    log::error!("file sink write error: {}", e);
                }
                streaming.store(false, Ordering::Release);
                result
            })
            .map_err(|e| {
                self.streaming.store(false, Ordering::Release);
                format!("failed to spawn file sink thread: {}", e)
            })?;

        self.worker = Some(worker);
        Ok(())
    }

    fn stop_transfer(&mut self) -> Result<(), String> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        self.stop_requested.store(true, Ordering::Release);
        let result = worker
            .join()
            .map_err(|_| "file sink thread panicked".to_string())?;
        self.streaming.store(false, Ordering::Release);

        let writer = result.map_err(|e| format!("write error: {}", e))?;
        self.writer = Some(writer);
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    fn transfer_size(&self) -> usize {
        self.transfer_size
    }
}

impl<W: Write + Send + 'static> Drop for FileSink<W> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_transfer() {
            log::error!("file sink: {}", e);
        }
    }
}
