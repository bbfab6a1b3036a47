//! Types and traits shared between the emulation cores and their hosts

use crate::savestate::SaveStateError;
use bincode::{Decode, Encode};
use std::fmt::{Display, Formatter};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Self = Self::rgb(0, 0, 0);

    #[must_use]
    #[inline]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

impl Default for Color {
    #[inline]
    fn default() -> Self {
        Self::BLACK
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// A completed video frame: a borrowed pixel buffer plus its dimensions.
///
/// The pixel slice is valid until the next `run_frame` call. Its length is
/// always at least `size.width * size.height`; hosts must ignore any pixels
/// past that point.
#[derive(Debug, Clone, Copy)]
pub struct FrameBuffer<'a> {
    pub pixels: &'a [Color],
    pub size: FrameSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimingMode {
    #[default]
    Ntsc,
    Pal,
}

impl Display for TimingMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ntsc => write!(f, "NTSC"),
            Self::Pal => write!(f, "PAL"),
        }
    }
}

/// The virtual button set shared by every supported console.
///
/// Consoles that lack a button simply ignore it (e.g. the Game Boy has no
/// X/Y/L/R). The bus translates pressed buttons into the platform's joypad
/// wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct JoypadState {
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
    pub l: bool,
    pub r: bool,
    pub start: bool,
    pub select: bool,
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl JoypadState {
    const BUTTONS: [(u16, fn(&mut Self) -> &mut bool); 12] = [
        (1 << 0, |j| &mut j.a),
        (1 << 1, |j| &mut j.b),
        (1 << 2, |j| &mut j.x),
        (1 << 3, |j| &mut j.y),
        (1 << 4, |j| &mut j.l),
        (1 << 5, |j| &mut j.r),
        (1 << 6, |j| &mut j.start),
        (1 << 7, |j| &mut j.select),
        (1 << 8, |j| &mut j.up),
        (1 << 9, |j| &mut j.down),
        (1 << 10, |j| &mut j.left),
        (1 << 11, |j| &mut j.right),
    ];

    /// Build a `JoypadState` from the host-facing button bitmask
    /// (bit 0 = A through bit 11 = Right).
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        let mut joypad = Self::default();
        for (mask, field) in Self::BUTTONS {
            *field(&mut joypad) = bits & mask != 0;
        }
        joypad
    }

    #[must_use]
    pub fn bits(mut self) -> u16 {
        let mut bits = 0;
        for (mask, field) in Self::BUTTONS {
            if *field(&mut self) {
                bits |= mask;
            }
        }
        bits
    }
}

/// The plugin-style contract every console core implements.
///
/// One `run_frame` call advances emulation by exactly one video frame; the
/// host then reads the framebuffer, drains audio samples into its rate
/// controller, and (periodically) persists battery saves.
pub trait EmulatorCore {
    /// Advance by one frame using the given input state.
    fn run_frame(&mut self, joypad: JoypadState);

    /// Reset to the defined post-boot state, as if the console had been power
    /// cycled with the cartridge still inserted.
    fn reset(&mut self);

    fn frame_buffer(&self) -> FrameBuffer<'_>;

    /// The native output rate of this core's audio unit, in Hz.
    fn audio_sample_rate(&self) -> u32;

    /// Move all pending stereo samples out of the core.
    fn drain_audio_samples(&mut self, out: &mut Vec<(f32, f32)>);

    /// Serialize all component state into `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails; `out` is left unspecified.
    fn save_state(&self, out: &mut Vec<u8>) -> Result<(), SaveStateError>;

    /// Restore previously serialized state.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is truncated or was produced by a
    /// different save-state version. On error the emulator state is
    /// unchanged.
    fn load_state(&mut self, bytes: &[u8]) -> Result<(), SaveStateError>;

    fn has_battery_save(&self) -> bool;

    /// The current contents of battery-backed save media, if any.
    fn battery_save(&self) -> Option<Vec<u8>>;

    /// Replace battery-backed save media contents. Malformed blobs (wrong
    /// length) reset the media to factory contents.
    fn set_battery_save(&mut self, bytes: &[u8]);
}
