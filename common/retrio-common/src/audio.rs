//! Host audio rate controller: a lock-free SPSC ring buffer of stereo samples
//! plus the rate-control policy that reconciles emulation rate with the host
//! audio device rate.
//!
//! The emulation thread owns the [`SampleProducer`] and pushes resampled
//! samples after every frame; the host audio thread owns the
//! [`DeviceCallback`] and drains the ring from its callback. The head/tail
//! indices are the only atomics in the entire workspace.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub const DEFAULT_OUTPUT_FREQUENCY: u32 = 48000;

// Ring capacity in stereo pairs; power of two so index math stays cheap
const RING_CAPACITY: usize = 16 * 1024;

// DynamicRate aims to keep this many pairs buffered (~85ms at 48kHz)
const DYNAMIC_RATE_TARGET: usize = 4096;

// AudioDriven keeps just over one typical device callback buffered
const AUDIO_DRIVEN_TARGET: usize = 1024;

// LargeBuffer trades latency for immunity to scheduling hiccups
const LARGE_BUFFER_TARGET: usize = 8192;

// DynamicRate never adjusts the consumption ratio by more than this
const MAX_RATE_ADJUSTMENT: f64 = 0.05;

// Underruns decay the held sample instead of repeating or zeroing it
const UNDERRUN_FADE: f32 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Run emulation from the audio callback's demand. Lowest latency;
    /// emulation rate follows the audio device.
    AudioDriven,
    /// Run emulation at wall-clock rate and let a PI controller absorb the
    /// drift between the emulated sample rate and the device rate.
    #[default]
    DynamicRate,
    /// Fixed oversized buffer, no rate control.
    LargeBuffer,
}

impl SyncMode {
    fn target_pairs(self) -> usize {
        match self {
            Self::AudioDriven => AUDIO_DRIVEN_TARGET,
            Self::DynamicRate => DYNAMIC_RATE_TARGET,
            Self::LargeBuffer => LARGE_BUFFER_TARGET,
        }
    }
}

// Interleaved stereo storage. The producer only writes slots in the free
// region it claimed before publishing `write_pos` with Release ordering, and
// the consumer only reads slots before publishing `read_pos`, so the
// unsynchronized sample storage is never accessed concurrently at the same
// index.
struct SharedRing {
    samples: UnsafeCell<Box<[f32]>>,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
    underruns: AtomicU64,
    overruns: AtomicU64,
}

// SAFETY: see the access protocol described above; SampleProducer and
// DeviceCallback are not Clone, so there is exactly one reader and one writer
unsafe impl Sync for SharedRing {}
unsafe impl Send for SharedRing {}

impl SharedRing {
    const LEN: usize = 2 * RING_CAPACITY;

    fn new() -> Self {
        Self {
            samples: UnsafeCell::new(vec![0.0; Self::LEN].into_boxed_slice()),
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            underruns: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
        }
    }

    fn write_slot(&self, index: usize, value: f32) {
        // SAFETY: only the producer calls this, and only on slots between
        // write_pos and read_pos-1 which the consumer will not touch until
        // write_pos is published
        unsafe {
            (*self.samples.get())[index] = value;
        }
    }

    fn read_slot(&self, index: usize) -> f32 {
        // SAFETY: only the consumer calls this, and only on slots between
        // read_pos and write_pos-1 which the producer will not reuse until
        // read_pos is published
        unsafe { (*self.samples.get())[index] }
    }

    fn buffered_pairs(&self) -> usize {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        (write_pos.wrapping_sub(read_pos) % Self::LEN) / 2
    }
}

/// Create a connected producer/consumer pair around a new ring buffer.
#[must_use]
pub fn rate_controlled_channel(
    mode: SyncMode,
    output_frequency: u32,
) -> (SampleProducer, DeviceCallback) {
    let ring = Arc::new(SharedRing::new());

    let producer = SampleProducer {
        ring: Arc::clone(&ring),
        output_frequency,
        resample_accumulator: 0.0,
        volume: 1.0,
    };
    let callback = DeviceCallback {
        ring,
        mode,
        rate_adjustment: 1.0,
        resample_accumulator: 0.0,
        prev_sample: (0.0, 0.0),
        last_sample: (0.0, 0.0),
    };

    (producer, callback)
}

/// Emulation-thread half: resamples core output to the device frequency with
/// linear interpolation and pushes it into the ring.
pub struct SampleProducer {
    ring: Arc<SharedRing>,
    output_frequency: u32,
    resample_accumulator: f64,
    volume: f32,
}

impl SampleProducer {
    /// Push one frame's worth of samples produced at `source_frequency`.
    /// Samples that do not fit are dropped and counted as overruns.
    pub fn push_samples(&mut self, samples: &[(f32, f32)], source_frequency: u32) {
        if samples.is_empty() {
            return;
        }

        // ratio > 1 skips input samples; ratio < 1 repeats them
        let ratio = f64::from(source_frequency) / f64::from(self.output_frequency);

        let mut write_pos = self.ring.write_pos.load(Ordering::Relaxed);
        let read_pos = self.ring.read_pos.load(Ordering::Acquire);

        'outer: for (i, &(left, right)) in samples.iter().enumerate() {
            let (next_left, next_right) = samples.get(i + 1).copied().unwrap_or((left, right));

            while self.resample_accumulator < 1.0 {
                let t = self.resample_accumulator as f32;
                let out_left = (left + t * (next_left - left)) * self.volume;
                let out_right = (right + t * (next_right - right)) * self.volume;

                // Leave one slot pair free to distinguish full from empty
                let next_write = (write_pos + 2) % SharedRing::LEN;
                if next_write == read_pos || (write_pos + 1) % SharedRing::LEN == read_pos {
                    self.ring.overruns.fetch_add(1, Ordering::Relaxed);
                    break 'outer;
                }

                self.ring.write_slot(write_pos, out_left);
                self.ring.write_slot((write_pos + 1) % SharedRing::LEN, out_right);
                write_pos = next_write;

                self.resample_accumulator += ratio;
            }

            self.resample_accumulator -= 1.0;
        }

        self.ring.write_pos.store(write_pos, Ordering::Release);
    }

    #[must_use]
    pub fn buffered_pairs(&self) -> usize {
        self.ring.buffered_pairs()
    }

    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.ring.overruns.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn underrun_count(&self) -> u64 {
        self.ring.underruns.load(Ordering::Relaxed)
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    #[must_use]
    pub fn output_frequency(&self) -> u32 {
        self.output_frequency
    }
}

/// Audio-thread half: fills device buffers from the ring, applying the
/// configured sync policy.
pub struct DeviceCallback {
    ring: Arc<SharedRing>,
    mode: SyncMode,
    rate_adjustment: f64,
    resample_accumulator: f32,
    prev_sample: (f32, f32),
    last_sample: (f32, f32),
}

impl DeviceCallback {
    /// Fill an interleaved stereo buffer. Call from the device callback.
    pub fn fill(&mut self, out: &mut [f32]) {
        if self.mode == SyncMode::DynamicRate {
            self.update_rate_control();
        }

        let mut read_pos = self.ring.read_pos.load(Ordering::Relaxed);
        let write_pos = self.ring.write_pos.load(Ordering::Acquire);

        for frame in out.chunks_exact_mut(2) {
            if self.mode == SyncMode::DynamicRate {
                // Consume ring samples at the adjusted rate and linearly
                // interpolate the output between the two most recent ones
                self.resample_accumulator += self.rate_adjustment as f32;
                while self.resample_accumulator >= 1.0 {
                    self.resample_accumulator -= 1.0;
                    read_pos = self.advance_one_pair(read_pos, write_pos);
                }

                let t = self.resample_accumulator;
                frame[0] = self.prev_sample.0 * (1.0 - t) + self.last_sample.0 * t;
                frame[1] = self.prev_sample.1 * (1.0 - t) + self.last_sample.1 * t;
            } else {
                read_pos = self.advance_one_pair(read_pos, write_pos);
                frame[0] = self.last_sample.0;
                frame[1] = self.last_sample.1;
            }
        }

        self.ring.read_pos.store(read_pos, Ordering::Release);
    }

    fn advance_one_pair(&mut self, read_pos: usize, write_pos: usize) -> usize {
        let available = write_pos.wrapping_sub(read_pos) % SharedRing::LEN;
        if available >= 2 {
            self.prev_sample = self.last_sample;
            self.last_sample = (
                self.ring.read_slot(read_pos),
                self.ring.read_slot((read_pos + 1) % SharedRing::LEN),
            );
            (read_pos + 2) % SharedRing::LEN
        } else {
            self.ring.underruns.fetch_add(1, Ordering::Relaxed);
            self.prev_sample = self.last_sample;
            self.last_sample.0 *= UNDERRUN_FADE;
            self.last_sample.1 *= UNDERRUN_FADE;
            read_pos
        }
    }

    fn update_rate_control(&mut self) {
        // Proportional gain: 500 pairs of error contributes a 5% adjustment
        const P_GAIN: f64 = 0.0001;
        // Fast exponential smoothing stands in for the integral term
        const SMOOTHING: f64 = 0.85;

        let buffered = self.ring.buffered_pairs();
        let error = buffered as f64 - self.mode.target_pairs() as f64;
        let p_term = error * P_GAIN;

        self.rate_adjustment =
            self.rate_adjustment * SMOOTHING + (1.0 + p_term) * (1.0 - SMOOTHING);
        self.rate_adjustment =
            self.rate_adjustment.clamp(1.0 - MAX_RATE_ADJUSTMENT, 1.0 + MAX_RATE_ADJUSTMENT);
    }

    /// In AudioDriven mode, how many more stereo pairs the emulation side
    /// should produce before the next callback. Always 0 in other modes.
    #[must_use]
    pub fn pairs_needed(&self, callback_pairs: usize) -> usize {
        if self.mode != SyncMode::AudioDriven {
            return 0;
        }

        let wanted = callback_pairs + self.mode.target_pairs();
        wanted.saturating_sub(self.ring.buffered_pairs())
    }

    #[must_use]
    pub fn rate_adjustment(&self) -> f64 {
        self.rate_adjustment
    }

    #[must_use]
    pub fn mode(&self) -> SyncMode {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_silence(producer: &mut SampleProducer, pairs: usize, frequency: u32) {
        producer.push_samples(&vec![(0.1, -0.1); pairs], frequency);
    }

    #[test]
    fn passthrough_preserves_sample_count() {
        let (mut producer, _callback) = rate_controlled_channel(SyncMode::LargeBuffer, 48000);

        push_silence(&mut producer, 480, 48000);
        assert_eq!(producer.buffered_pairs(), 480);
        assert_eq!(producer.overrun_count(), 0);
    }

    #[test]
    fn upsampling_produces_more_pairs() {
        let (mut producer, _callback) = rate_controlled_channel(SyncMode::LargeBuffer, 48000);

        // 32040 -> 48000 should produce roughly 1.5x the input pairs
        push_silence(&mut producer, 3204, 32040);
        let buffered = producer.buffered_pairs();
        assert!((4750..=4850).contains(&buffered), "buffered {buffered}");
    }

    #[test]
    fn overfull_ring_counts_overruns_and_drops() {
        let (mut producer, _callback) = rate_controlled_channel(SyncMode::LargeBuffer, 48000);

        push_silence(&mut producer, RING_CAPACITY + 500, 48000);
        assert!(producer.overrun_count() > 0);
        assert!(producer.buffered_pairs() <= RING_CAPACITY);
    }

    #[test]
    fn underrun_fades_toward_zero() {
        let (mut producer, mut callback) = rate_controlled_channel(SyncMode::LargeBuffer, 48000);

        producer.push_samples(&[(1.0, 1.0)], 48000);

        let mut out = vec![0.0; 64];
        callback.fill(&mut out);

        assert!(producer.underrun_count() > 0);
        // Each successive underrun frame decays by the fade factor
        assert!(out[2] < out[0] || out[0] == 1.0);
        let last = *out.last().unwrap();
        assert!(last < 0.5, "expected decayed tail, got {last}");
    }

    // Dynamic rate regulation with a device running 0.5% slower than nominal:
    // after one emulated second, occupancy stays within 20% of the target and
    // underruns stay rare
    #[test]
    fn dynamic_rate_absorbs_device_drift() {
        const SOURCE_RATE: u32 = 32040;
        const DEVICE_RATE: f64 = 48000.0 * 0.995;

        let (mut producer, mut callback) = rate_controlled_channel(SyncMode::DynamicRate, 48000);

        // Prefill to the target occupancy, as a host would before unpausing
        push_silence(&mut producer, DYNAMIC_RATE_TARGET * SOURCE_RATE as usize / 48000, SOURCE_RATE);

        let mut device_accumulator = 0.0_f64;
        for _ in 0..60 {
            // One frame of emulated audio
            push_silence(&mut producer, SOURCE_RATE as usize / 60, SOURCE_RATE);

            // One frame of device consumption at the skewed rate
            device_accumulator += DEVICE_RATE / 60.0;
            let pairs = device_accumulator as usize;
            device_accumulator -= pairs as f64;

            let mut out = vec![0.0; 2 * pairs];
            callback.fill(&mut out);
        }

        let occupancy = producer.buffered_pairs() as f64;
        let target = DYNAMIC_RATE_TARGET as f64;
        assert!(
            (occupancy - target).abs() <= 0.2 * target,
            "occupancy {occupancy} strayed from target {target}"
        );
        assert!(producer.underrun_count() <= 5, "underruns {}", producer.underrun_count());
    }
}
