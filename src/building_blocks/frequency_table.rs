use crate::{HOP_SIZE, NUM_BANDS};

lazy_static! {
    static ref CENTRE_FREQS_44100: [f32; NUM_BANDS] = centre_freqs_for(44100.0);
    static ref CENTRE_FREQS_48000: [f32; NUM_BANDS] = centre_freqs_for(48000.0);
}

fn centre_freqs_for(samplerate: f32) -> [f32; NUM_BANDS] {
    let mut freqs = [0.0; NUM_BANDS];
    // bins of a 2 * HOP_SIZE point transform
    let bin_width = samplerate / (2 * HOP_SIZE) as f32;
    for (band, freq) in freqs.iter_mut().enumerate() {
        *freq = band as f32 * bin_width;
    }
    freqs
}

/// Per-band centre frequencies of the filterbank, in Hz.
///
/// Only two tables exist, one for 44.1kHz and one for 48kHz.
/// Any other samplerate gets the 48kHz table.
pub fn band_centre_freqs(samplerate: f32) -> &'static [f32; NUM_BANDS] {
    if samplerate == 44100.0 {
        &CENTRE_FREQS_44100
    } else {
        &CENTRE_FREQS_48000
    }
}
