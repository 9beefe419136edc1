pub mod decoders;
pub mod filterbank;
pub mod frequency_table;
pub mod hrir;
pub mod hrtf;
pub mod layouts;
pub mod matrix;
pub mod spherical_harmonics;
pub mod vbap;

pub use crate::building_blocks::filterbank::{FilterBank, StftFilterbank};
pub use crate::building_blocks::hrir::HrirSource;
pub use crate::building_blocks::layouts::LoudspeakerArrayPreset;

/// the available decoding methods
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecodingMethod {
    Sad,    // sampling
    Mmd,    // mode-matching
    Epad,   // energy-preserving
    AllRad, // all-round (vbap over a virtual t-design-ish grid)
}

/// post-decode normalisation, which also sets the perceived loudness of
/// diffuse sound fields
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiffuseFieldEq {
    AmplitudePreserving,
    EnergyPreserving,
}

/// the two decoders, one for the low frequencies, one for the high frequencies
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecoderSlot {
    Low,
    High,
}

impl DecoderSlot {
    pub const ALL: [DecoderSlot; 2] = [DecoderSlot::Low, DecoderSlot::High];

    #[inline(always)]
    pub fn index(self) -> usize {
        match self {
            DecoderSlot::Low => 0,
            DecoderSlot::High => 1,
        }
    }
}

/// channel ordering of the incoming ambisonic signals
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelOrder {
    Acn,
    Fuma, // first order only
}

/// normalisation of the incoming ambisonic signals
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NormType {
    N3d,
    Sn3d,
    Fuma, // first order only
}

/// whether the decoder has everything it needs to run
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecStatus {
    NotInitialised,
    Initialising,
    Initialised,
}

/// whether an audio block is currently in flight
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessingStatus {
    Ongoing,
    NotOngoing,
}

/// the slot configuration: method, weighting and normalisation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecoderConfig {
    pub method: DecodingMethod,
    pub max_re: bool,
    pub diffuse_eq: DiffuseFieldEq,
}

impl DecoderConfig {
    pub fn default_for(slot: DecoderSlot) -> Self {
        match slot {
            DecoderSlot::Low => DecoderConfig {
                method: DecodingMethod::AllRad,
                max_re: false,
                diffuse_eq: DiffuseFieldEq::AmplitudePreserving,
            },
            DecoderSlot::High => DecoderConfig {
                method: DecodingMethod::AllRad,
                max_re: true,
                diffuse_eq: DiffuseFieldEq::EnergyPreserving,
            },
        }
    }
}
