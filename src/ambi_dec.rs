pub mod ambi_dec_controls;
pub mod ambi_dec_playhead;
pub mod codec_status;
pub mod synthesis;

// crossbeam for the control queue
use crossbeam::channel::Receiver;
use crossbeam::channel::Sender;

use std::sync::Arc;

use crate::building_blocks::hrtf::HrtfSet;
use crate::building_blocks::{ChannelOrder, DecoderConfig, NormType};
use crate::NUM_BANDS;

pub use crate::ambi_dec::{
    ambi_dec_controls::*, ambi_dec_playhead::*, codec_status::*, synthesis::DecoderArena,
};

/// Everything the audio thread needs to decode, built on the control side
/// and handed over in one piece.
#[derive(Clone)]
pub(crate) struct RenderState {
    pub(crate) generation: u64,
    pub(crate) loudspeaker_dirs_deg: Vec<[f32; 2]>,
    pub(crate) master_order: usize,
    pub(crate) slots: [DecoderConfig; 2],
    pub(crate) decoders: [DecoderArena; 2],
    pub(crate) hrtfs: Option<Arc<HrtfSet>>, // only if binauralising
    pub(crate) freqs: &'static [f32; NUM_BANDS],
}

impl RenderState {
    pub(crate) fn num_loudspeakers(&self) -> usize {
        self.loudspeaker_dirs_deg.len()
    }
}

/// parameters that can change without re-initialising,
/// plus the hand-over of fresh render states
pub(crate) enum ControlMessage {
    SetTransitionFreq(f32),
    SetDecOrder(usize, usize), // band, order
    SetDecOrderAllBands(usize),
    SetChannelOrder(ChannelOrder),
    SetNormType(NormType),
    NewRenderState(Box<RenderState>),
}

/// Creates the two halves of the decoder. Use the controls from
/// your control thread, the playhead in your audio callback.
pub fn init_ambi_dec(samplerate: f32) -> (AmbiDecControls, AmbiDecPlayhead) {
    let (tx, rx): (Sender<ControlMessage>, Receiver<ControlMessage>) =
        crossbeam::channel::bounded(2000);

    // retired render states go back to be dropped outside the audio thread
    let (garbage_tx, garbage_rx): (Sender<Box<RenderState>>, Receiver<Box<RenderState>>) =
        crossbeam::channel::bounded(16);

    let status = Arc::new(CodecStatusBlock::new());

    let controls = AmbiDecControls::new(samplerate, &status, tx, garbage_rx);
    let playhead = AmbiDecPlayhead::new(&status, rx, garbage_tx);

    (controls, playhead)
}

// TEST TEST TEST
#[cfg(test)]
mod tests {
    use super::*;
    use crate::building_blocks::spherical_harmonics::real_sh_deg;
    use crate::building_blocks::{
        CodecStatus, DecoderSlot, DecodingMethod, DiffuseFieldEq, LoudspeakerArrayPreset,
    };
    use crate::{FRAME_SIZE, HOP_SIZE};

    /// first-order plane wave from the given direction, white noise, one second
    fn plane_wave(azi: f64, elev: f64, len: usize) -> Vec<Vec<f32>> {
        let rng = fastrand::Rng::with_seed(42);
        let y = real_sh_deg(1, azi, elev);
        let noise: Vec<f32> = (0..len).map(|_| rng.f32() * 2.0 - 1.0).collect();
        (0..4)
            .map(|ch| noise.iter().map(|s| s * y[ch] as f32).collect())
            .collect()
    }

    /// runs the signal through the playhead in odd-sized blocks,
    /// returns the per-channel output energy
    fn run(playhead: &mut AmbiDecPlayhead, input: &[Vec<f32>], num_out: usize) -> Vec<f32> {
        let len = input[0].len();
        let mut energy = vec![0.0; num_out];
        let mut out = vec![vec![0.0; 441]; num_out];
        let mut pos = 0;
        while pos < len {
            let n = 441.min(len - pos);
            let ins: Vec<&[f32]> = input.iter().map(|ch| &ch[pos..pos + n]).collect();
            let mut outs: Vec<&mut [f32]> = out.iter_mut().map(|ch| &mut ch[..n]).collect();
            playhead.process(&ins, &mut outs, n);
            for (ch, samples) in outs.iter().enumerate() {
                energy[ch] += samples.iter().map(|s| s * s).sum::<f32>();
            }
            pos += n;
        }
        energy
    }

    fn setup(binauralise: bool) -> (AmbiDecControls, AmbiDecPlayhead) {
        let (controls, playhead) = init_ambi_dec(48000.0);
        controls.set_output_config_preset(LoudspeakerArrayPreset::TDesign24);
        controls.set_master_dec_order(3);
        controls.set_norm_type(NormType::N3d);
        for slot in DecoderSlot::ALL {
            controls.set_dec_method(slot, DecodingMethod::AllRad);
        }
        controls.set_transition_freq(800.0);
        controls.set_binaurale_ls(binauralise);
        controls.set_use_default_hrirs(true);
        controls.ensure_initialised().unwrap();
        assert_eq!(controls.codec_status(), CodecStatus::Initialised);
        (controls, playhead)
    }

    #[test]
    fn test_loudspeaker_scenario() {
        let (controls, mut playhead) = setup(false);
        assert_eq!(controls.num_outputs(), 24);

        let energy = run(&mut playhead, &plane_wave(90.0, 0.0, 48000), 24);

        let dirs = LoudspeakerArrayPreset::TDesign24.dirs_deg();
        let nearest = dirs.iter().position(|d| *d == [90.0, 0.0]).unwrap();
        for (ls, e) in energy.iter().enumerate() {
            if ls != nearest {
                assert!(energy[nearest] > *e);
            }
        }
    }

    #[test]
    fn test_binaural_scenario() {
        let (controls, mut playhead) = setup(true);
        assert_eq!(controls.num_outputs(), 2);
        assert!(controls.using_default_hrirs());

        let left_source = run(&mut playhead, &plane_wave(90.0, 0.0, 48000), 2);
        assert!(left_source[0] > left_source[1]);

        let right_source = run(&mut playhead, &plane_wave(-90.0, 0.0, 48000), 2);
        assert!(right_source[1] > right_source[0]);
    }

    #[test]
    fn test_latency() {
        let (controls, mut playhead) = init_ambi_dec(48000.0);
        controls.set_output_config_preset(LoudspeakerArrayPreset::TDesign24);
        controls.set_master_dec_order(1);
        controls.set_norm_type(NormType::N3d);
        // same decoder above and below the transition, so the whole thing is flat
        for slot in DecoderSlot::ALL {
            controls.set_dec_method(slot, DecodingMethod::Sad);
            controls.set_dec_enable_max_re(slot, false);
            controls.set_dec_norm_type(slot, DiffuseFieldEq::AmplitudePreserving);
        }
        controls.ensure_initialised().unwrap();

        let delay = playhead.processing_delay();
        assert_eq!(delay, FRAME_SIZE + HOP_SIZE);
        assert_eq!(delay, controls.processing_delay());

        let len = 4 * FRAME_SIZE;
        let mut impulse = vec![vec![0.0; len]; 4];
        impulse[0][0] = 1.0;
        let ins: Vec<&[f32]> = impulse.iter().map(|ch| &ch[..]).collect();
        let mut out = vec![vec![0.0; len]; 24];
        let mut outs: Vec<&mut [f32]> = out.iter_mut().map(|ch| &mut ch[..]).collect();
        playhead.process(&ins, &mut outs, len);

        for ch in out.iter() {
            for s in ch[..delay].iter() {
                assert!(s.abs() < 0.00001);
            }
            assert!(ch[delay].abs() > 0.001);
        }
    }

    #[test]
    fn test_mute_until_initialised() {
        let (controls, mut playhead) = init_ambi_dec(48000.0);
        controls.set_output_config_preset(LoudspeakerArrayPreset::Cube);

        let input = plane_wave(0.0, 0.0, 4 * FRAME_SIZE);
        let energy = run(&mut playhead, &input, 8);
        assert!(energy.iter().all(|e| *e == 0.0));

        controls.ensure_initialised().unwrap();
        let energy = run(&mut playhead, &input, 8);
        assert!(energy.iter().any(|e| *e > 0.0));

        // invalidated, mute again (after the frame in flight)
        controls.set_master_dec_order(2);
        run(&mut playhead, &input, 8);
        let energy = run(&mut playhead, &input, 8);
        assert!(energy.iter().all(|e| *e == 0.0));
    }
}
