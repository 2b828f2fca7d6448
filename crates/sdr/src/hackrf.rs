// Copyright 2025-2026 CEMAXECUTER LLC

//! HackRF transmit engine over the libhackrf C API.
//!
//! Device settings and gain helpers are always available; the FFI engine
//! itself needs the `hackrf` feature (links libhackrf).

/// Highest HackRF TX sample rate
pub const MAX_SAMPLE_RATE: u32 = 20_000_000;

/// TX VGA (IF) gain range in dB, 1 dB steps
pub const TX_VGA_GAIN_MAX: u32 = 47;

/// The RF amplifier is a single 14 dB stage
pub const RF_AMP_GAIN: u32 = 14;

/// Transmit-side device settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HackrfTxConfig {
    pub sample_rate: u32,
    pub center_freq: u64,
    /// TX VGA gain in dB, clipped to 0..=47
    pub if_gain: u32,
    /// RF amp gain in dB, snapped to 0 or 14
    pub rf_gain: u32,
    /// Antenna port bias power
    pub bias: bool,
}

impl Default for HackrfTxConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8_000_000,
            center_freq: 2_450_000_000,
            if_gain: 16,
            // Amp off by default to protect the front end
            rf_gain: 0,
            bias: false,
        }
    }
}

impl HackrfTxConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(format!(
                "HackRF sample rate must be between 1 Hz and 20 MHz (got {})",
                self.sample_rate
            ));
        }
        Ok(())
    }
}

/// Clip a requested TX VGA gain to the supported range.
pub fn clip_tx_vga_gain(gain: u32) -> u32 {
    gain.min(TX_VGA_GAIN_MAX)
}

/// Whether a requested RF gain turns the 14 dB amp on (nearest step).
pub fn amp_enabled_for(rf_gain: u32) -> bool {
    rf_gain >= (RF_AMP_GAIN + 1) / 2
}

/// Extract serial from interface string like "hackrf-SERIAL".
/// `""` and `"hackrf"` mean the first device.
pub fn parse_serial(iface: &str) -> Result<Option<String>, String> {
    if iface.is_empty() || iface == "hackrf" {
        return Ok(None);
    }
    match iface.split_once('-') {
        Some(("hackrf", serial)) if !serial.is_empty() => Ok(Some(serial.to_string())),
        _ => Err(format!(
            "invalid HackRF interface: '{}' (expected hackrf-SERIAL)",
            iface
        )),
    }
}

#[cfg(feature = "hackrf")]
pub use device::HackrfSink;

#[cfg(feature = "hackrf")]
mod device {
    use std::ffi::CString;
    use std::os::raw::{c_char, c_int, c_void};
    use std::ptr;

    use super::{amp_enabled_for, clip_tx_vga_gain, parse_serial, HackrfTxConfig};
    use crate::sink::DEFAULT_SLOT_SIZE;
    use crate::{DrainFn, DrainStatus, TransferEngine};

    const HACKRF_SUCCESS: c_int = 0;
    const HACKRF_TRUE: c_int = 1;

    #[repr(C)]
    pub struct HackrfTransfer {
        pub device: *mut c_void,
        pub buffer: *mut u8,
        pub buffer_length: i32,
        pub valid_length: i32,
        pub rx_ctx: *mut c_void,
        pub tx_ctx: *mut c_void,
    }

    type HackrfDevice = c_void;

    extern "C" {
        fn hackrf_init() -> c_int;
        fn hackrf_exit() -> c_int;
        fn hackrf_open(device: *mut *mut HackrfDevice) -> c_int;
        fn hackrf_open_by_serial(
            desired_serial_number: *const c_char,
            device: *mut *mut HackrfDevice,
        ) -> c_int;
        fn hackrf_close(device: *mut HackrfDevice) -> c_int;
        fn hackrf_set_sample_rate(device: *mut HackrfDevice, freq_hz: f64) -> c_int;
        fn hackrf_set_freq(device: *mut HackrfDevice, freq_hz: u64) -> c_int;
        fn hackrf_set_txvga_gain(device: *mut HackrfDevice, value: u32) -> c_int;
        fn hackrf_set_amp_enable(device: *mut HackrfDevice, value: u8) -> c_int;
        fn hackrf_set_antenna_enable(device: *mut HackrfDevice, value: u8) -> c_int;
        fn hackrf_start_tx(
            device: *mut HackrfDevice,
            callback: unsafe extern "C" fn(*mut HackrfTransfer) -> c_int,
            tx_ctx: *mut c_void,
        ) -> c_int;
        fn hackrf_stop_tx(device: *mut HackrfDevice) -> c_int;
        fn hackrf_is_streaming(device: *mut HackrfDevice) -> c_int;
    }

    /// Context passed to the HackRF TX callback
    struct TxContext {
        drain: DrainFn,
    }

    unsafe extern "C" fn tx_callback(transfer: *mut HackrfTransfer) -> c_int {
        let transfer = &mut *transfer;
        let ctx = &mut *(transfer.tx_ctx as *mut TxContext);
        let len = transfer.valid_length.max(0) as usize;

        // HackRF takes signed bytes; the transfer buffer is typed as u8
        let buf = std::slice::from_raw_parts_mut(transfer.buffer as *mut i8, len);

        match (ctx.drain)(buf) {
            DrainStatus::Continue => 0,
            DrainStatus::Terminate => -1,
        }
    }

    /// Opened HackRF configured for transmit.
    pub struct HackrfSink {
        dev: *mut HackrfDevice,
        /// Drain context of the current (or last) stream; freed on the next
        /// start or on drop, once libhackrf no longer references it
        ctx: *mut TxContext,
        serial: Option<String>,
        config: HackrfTxConfig,
        if_gain: u32,
    }

    // HackRF device pointer is thread-safe (single owner)
    unsafe impl Send for HackrfSink {}

    fn check(r: c_int, what: &str) -> Result<(), String> {
        if r == HACKRF_SUCCESS {
            Ok(())
        } else {
            Err(format!("{} failed: {}", what, r))
        }
    }

    impl HackrfSink {
        /// Open a HackRF and apply `config`. `iface` is `hackrf` or
        /// `hackrf-SERIAL`.
        pub fn open(iface: &str, config: HackrfTxConfig) -> Result<Self, String> {
            config.validate()?;
            let serial = parse_serial(iface)?;

            unsafe {
                check(hackrf_init(), "hackrf_init")?;

                let mut dev: *mut HackrfDevice = ptr::null_mut();
                let r = if let Some(ref s) = serial {
                    let cs = CString::new(s.as_str()).map_err(|e| {
                        hackrf_exit();
                        format!("CString error: {}", e)
                    })?;
                    hackrf_open_by_serial(cs.as_ptr(), &mut dev)
                } else {
                    hackrf_open(&mut dev)
                };

                if let Err(e) = check(r, "hackrf_open") {
                    hackrf_exit();
                    return Err(e);
                }

                log::info!("HackRF opened (serial={:?})", serial);

                // From here on Drop closes the device on error
                let mut sink = Self {
                    dev,
                    ctx: ptr::null_mut(),
                    serial,
                    config,
                    if_gain: 0,
                };
                sink.configure()?;
                Ok(sink)
            }
        }

        fn configure(&mut self) -> Result<(), String> {
            let amp = amp_enabled_for(self.config.rf_gain);
            unsafe {
                check(
                    hackrf_set_sample_rate(self.dev, self.config.sample_rate as f64),
                    "hackrf_set_sample_rate",
                )?;
                check(hackrf_set_freq(self.dev, self.config.center_freq), "hackrf_set_freq")?;
                check(hackrf_set_amp_enable(self.dev, amp as u8), "hackrf_set_amp_enable")?;
                check(
                    hackrf_set_antenna_enable(self.dev, self.config.bias as u8),
                    "hackrf_set_antenna_enable",
                )?;
            }
            self.set_tx_vga_gain(self.config.if_gain)?;

            log::info!(
                "HackRF TX configured ({} MHz, {} MS/s, IF={} dB, amp={}, bias={})",
                self.config.center_freq / 1_000_000,
                self.config.sample_rate as f64 / 1e6,
                self.if_gain,
                amp,
                self.config.bias,
            );
            Ok(())
        }

        /// Set the TX VGA gain, clipped to 0..=47 dB. Returns the applied gain.
        pub fn set_tx_vga_gain(&mut self, gain: u32) -> Result<u32, String> {
            let clipped = clip_tx_vga_gain(gain);
            unsafe {
                check(hackrf_set_txvga_gain(self.dev, clipped), "hackrf_set_txvga_gain")?;
            }
            self.if_gain = clipped;
            Ok(clipped)
        }

        pub fn tx_vga_gain(&self) -> u32 {
            self.if_gain
        }

        pub fn serial(&self) -> Option<&str> {
            self.serial.as_deref()
        }

        pub fn config(&self) -> &HackrfTxConfig {
            &self.config
        }

        unsafe fn free_ctx(&mut self) {
            if !self.ctx.is_null() {
                let _ = Box::from_raw(self.ctx);
                self.ctx = ptr::null_mut();
            }
        }
    }

    impl TransferEngine for HackrfSink {
        fn start_transfer(&mut self, drain: DrainFn) -> Result<(), String> {
            if self.is_streaming() {
                return Err("HackRF already streaming".to_string());
            }

            unsafe {
                self.free_ctx();
                let ctx = Box::into_raw(Box::new(TxContext { drain }));

                let r = hackrf_start_tx(self.dev, tx_callback, ctx as *mut c_void);
                if r != HACKRF_SUCCESS {
                    let _ = Box::from_raw(ctx);
                    return Err(format!("hackrf_start_tx failed: {}", r));
                }
                self.ctx = ctx;
            }

            log::info!("HackRF TX streaming started");
            Ok(())
        }

        fn stop_transfer(&mut self) -> Result<(), String> {
            unsafe { check(hackrf_stop_tx(self.dev), "hackrf_stop_tx") }
        }

        fn is_streaming(&self) -> bool {
            unsafe { hackrf_is_streaming(self.dev) == HACKRF_TRUE }
        }

        fn transfer_size(&self) -> usize {
            DEFAULT_SLOT_SIZE
        }
    }

    impl Drop for HackrfSink {
        fn drop(&mut self) {
            unsafe {
                if self.is_streaming() {
                    hackrf_stop_tx(self.dev);
                }
                hackrf_close(self.dev);
                self.free_ctx();
                hackrf_exit();
            }
        }
    }
}
