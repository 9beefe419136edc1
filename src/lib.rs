//! A frequency-dependent Ambisonic decoder.
//!
//! Decodes Ambisonic signals up to 7th order to an arbitrary loudspeaker
//! layout, with separate decoders below and above a transition frequency.
//! Optionally, the loudspeaker signals are binauralised with HRTFs.
//!
//! Use [`init_ambi_dec`] to get the [`AmbiDecControls`] for the control thread
//! and the [`AmbiDecPlayhead`] for the audio callback.

#[macro_use]
extern crate lazy_static;

pub mod ambi_dec;
pub mod building_blocks;
pub mod error;

pub use crate::ambi_dec::*;
pub use crate::building_blocks::{
    ChannelOrder, CodecStatus, DecoderConfig, DecoderSlot, DecodingMethod, DiffuseFieldEq,
    HrirSource, LoudspeakerArrayPreset, NormType, ProcessingStatus,
};
pub use crate::error::{AmbiDecError, Result};

// processing is done in frames, which are split into hops for the filterbank
pub const FRAME_SIZE: usize = 512;
pub const HOP_SIZE: usize = 128;
pub const TIME_SLOTS: usize = FRAME_SIZE / HOP_SIZE;
pub const NUM_BANDS: usize = HOP_SIZE + 1;

pub const MAX_ORDER: usize = 7;
pub const MAX_NUM_SH: usize = (MAX_ORDER + 1) * (MAX_ORDER + 1);
pub const MIN_NUM_LOUDSPEAKERS: usize = 4;
pub const MAX_NUM_LOUDSPEAKERS: usize = 64;
pub const MAX_NUM_OUTPUTS: usize = MAX_NUM_LOUDSPEAKERS;
pub const NUM_EARS: usize = 2;

/// points on the sphere to evaluate the decoder normalisation on
pub const NORM_GRID_POINTS: usize = 480;
/// virtual loudspeakers of the AllRAD t-design stand-in
pub const ALLRAD_GRID_POINTS: usize = 2000;
pub const NORM_EPS: f64 = 2.23e-6;

// resolution of the HRTF interpolation table, in degrees
pub const HRTF_INTERP_AZI_RES: usize = 2;
pub const HRTF_INTERP_ELEV_RES: usize = 5;

#[cfg(test)]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;
