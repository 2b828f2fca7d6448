pub mod error;
pub mod file;
pub mod hackrf;
pub mod ring;
pub mod sink;

pub use error::{SinkError, SinkResult};
pub use ring::SlotRing;
pub use sink::{SinkConfig, SinkState, TxSink, TxStats, TxStatsSnapshot};

/// What a drain callback tells the transfer engine after filling a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// Keep calling
    Continue,
    /// Queue is drained and the stream is stopping; end the transfer loop
    Terminate,
}

/// Drain callback handed to a transfer engine. Called on the engine's own
/// thread with one transfer-sized destination buffer; must not block.
pub type DrainFn = Box<dyn FnMut(&mut [i8]) -> DrainStatus + Send>;

/// Common trait for transmit transfer engines
pub trait TransferEngine: Send {
    /// Start pulling buffers through `drain` on the engine's own thread.
    fn start_transfer(&mut self, drain: DrainFn) -> Result<(), String>;

    /// Stop the transfer loop and release the device-side stream.
    fn stop_transfer(&mut self) -> Result<(), String>;

    /// Whether the engine is still invoking the drain callback.
    fn is_streaming(&self) -> bool;

    /// Size in bytes of every buffer passed to the drain callback
    fn transfer_size(&self) -> usize;
}

impl<E: TransferEngine + ?Sized> TransferEngine for Box<E> {
    fn start_transfer(&mut self, drain: DrainFn) -> Result<(), String> {
        (**self).start_transfer(drain)
    }

    fn stop_transfer(&mut self) -> Result<(), String> {
        (**self).stop_transfer()
    }

    fn is_streaming(&self) -> bool {
        (**self).is_streaming()
    }

    fn transfer_size(&self) -> usize {
        (**self).transfer_size()
    }
}
