use num_complex::*;

// crossbeam for the control queue
use crossbeam::channel::{Receiver, Sender, TrySendError};

use std::sync::Arc;

use crate::ambi_dec::codec_status::CodecStatusBlock;
use crate::ambi_dec::{ControlMessage, RenderState};
use crate::building_blocks::hrtf::LoudspeakerHrtfCache;
use crate::building_blocks::spherical_harmonics::{convert_to_acn_n3d, num_sh};
use crate::building_blocks::{
    ChannelOrder, CodecStatus, DecoderSlot, FilterBank, NormType, ProcessingStatus,
    StftFilterbank,
};
use crate::{
    FRAME_SIZE, HOP_SIZE, MAX_NUM_LOUDSPEAKERS, MAX_NUM_OUTPUTS, MAX_NUM_SH, NUM_BANDS, NUM_EARS,
    TIME_SLOTS,
};

use super::ambi_dec_controls::DEFAULT_TRANSITION_FREQ;

const RETIRED_CAPACITY: usize = 8;

/// This is the "Playhead", that is, the part you use in the
/// audio callback of your application
pub struct AmbiDecPlayhead {
    status: Arc<CodecStatusBlock>,
    control_q_rec: Receiver<ControlMessage>,
    garbage_q_send: Sender<Box<RenderState>>,
    state: Option<Box<RenderState>>,
    pending_state: Option<Box<RenderState>>,
    // retired states the garbage queue had no room for
    retired: Vec<Box<RenderState>>,
    // live parameters
    transition_freq: f32,
    band_orders: [usize; NUM_BANDS],
    ch_order: ChannelOrder,
    norm_type: NormType,
    // fifos, with a shared cursor
    in_fifo: Vec<Vec<f32>>,
    out_fifo: Vec<Vec<f32>>,
    fifo_idx: usize,
    // per-band processing
    filterbank: StftFilterbank,
    spec_in: Vec<Complex<f32>>,
    spec_ls: Vec<Complex<f32>>,
    spec_bin: Vec<Complex<f32>>,
    hrtf_cache: LoudspeakerHrtfCache,
    was_muted: bool,
}

impl AmbiDecPlayhead {
    pub(crate) fn new(
        status: &Arc<CodecStatusBlock>,
        rx: Receiver<ControlMessage>,
        garbage_tx: Sender<Box<RenderState>>,
    ) -> AmbiDecPlayhead {
        AmbiDecPlayhead {
            status: Arc::clone(status),
            control_q_rec: rx,
            garbage_q_send: garbage_tx,
            state: None,
            pending_state: None,
            retired: Vec::with_capacity(RETIRED_CAPACITY),
            transition_freq: DEFAULT_TRANSITION_FREQ,
            band_orders: [1; NUM_BANDS],
            ch_order: ChannelOrder::Acn,
            norm_type: NormType::Sn3d,
            in_fifo: vec![vec![0.0; FRAME_SIZE]; MAX_NUM_SH],
            out_fifo: vec![vec![0.0; FRAME_SIZE]; MAX_NUM_OUTPUTS],
            fifo_idx: 0,
            filterbank: StftFilterbank::new(MAX_NUM_SH, MAX_NUM_OUTPUTS),
            spec_in: vec![Complex::new(0.0, 0.0); NUM_BANDS * MAX_NUM_SH],
            spec_ls: vec![Complex::new(0.0, 0.0); NUM_BANDS * MAX_NUM_LOUDSPEAKERS],
            spec_bin: vec![Complex::new(0.0, 0.0); NUM_BANDS * NUM_EARS],
            hrtf_cache: LoudspeakerHrtfCache::new(),
            was_muted: true,
        }
    }

    /// the overall delay of the decoder, in samples
    pub fn processing_delay(&self) -> usize {
        FRAME_SIZE + self.filterbank.delay()
    }

    pub fn codec_status(&self) -> CodecStatus {
        self.status.codec_status()
    }

    /// hand a render state back to be dropped on the control side
    fn retire(&mut self, old: Box<RenderState>) {
        match self.garbage_q_send.try_send(old) {
            Ok(()) => {}
            Err(TrySendError::Full(old)) => {
                if self.retired.len() < self.retired.capacity() {
                    self.retired.push(old);
                } else {
                    // the control side hasn't drained anything for a long time
                    drop(old);
                }
            }
            // the controls are gone, nobody will ever pick it up
            Err(TrySendError::Disconnected(old)) => drop(old),
        }
    }

    /// try again to hand over what didn't fit into the garbage queue before
    fn flush_retired(&mut self) {
        while let Some(old) = self.retired.pop() {
            match self.garbage_q_send.try_send(old) {
                Ok(()) => {}
                Err(TrySendError::Full(old)) => {
                    self.retired.push(old);
                    return;
                }
                Err(TrySendError::Disconnected(old)) => drop(old),
            }
        }
    }

    fn handle_control_messages(&mut self, initialised: bool) {
        while let Ok(cm) = self.control_q_rec.try_recv() {
            match cm {
                ControlMessage::SetTransitionFreq(freq) => self.transition_freq = freq,
                ControlMessage::SetDecOrder(band, order) => self.band_orders[band] = order,
                ControlMessage::SetDecOrderAllBands(order) => self.band_orders = [order; NUM_BANDS],
                ControlMessage::SetChannelOrder(ch_order) => self.ch_order = ch_order,
                ControlMessage::SetNormType(norm_type) => self.norm_type = norm_type,
                ControlMessage::NewRenderState(state) => {
                    if let Some(old) = self.pending_state.replace(state) {
                        self.retire(old);
                    }
                }
            }
        }

        // only adopt what the status says is complete
        if initialised {
            if let Some(new_state) = self.pending_state.take() {
                self.adopt(new_state);
            }
        }
    }

    fn adopt(&mut self, new_state: Box<RenderState>) {
        let num_ls = new_state.num_loudspeakers();

        if let Some(hrtfs) = new_state.hrtfs.as_ref() {
            let same_hrtfs = self
                .state
                .as_ref()
                .and_then(|s| s.hrtfs.as_ref())
                .map(|old| Arc::ptr_eq(old, hrtfs))
                .unwrap_or(false);
            if !same_hrtfs {
                self.hrtf_cache.invalidate_all();
            }
            for (ls, dir) in new_state.loudspeaker_dirs_deg.iter().enumerate() {
                self.hrtf_cache.set_direction(ls, dir[0], dir[1]);
            }
        }

        let num_out = if new_state.hrtfs.is_some() {
            NUM_EARS
        } else {
            num_ls
        };
        self.filterbank
            .set_num_channels(num_sh(new_state.master_order), num_out);

        if let Some(old) = self.state.replace(new_state) {
            self.retire(old);
        }
    }

    /**
     * Main processing function. Takes any number of samples (as long as all
     * the buffers have them), so there's no need to match the frame size.
     * Missing input channels count as silent, surplus output channels are zeroed.
     * The output stays silent as long as the decoder isn't initialised.
     */
    pub fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], num_samples: usize) {
        self.status.set_processing_status(ProcessingStatus::Ongoing);

        // status first, so that everything published before it is in the queue
        let initialised = self.status.codec_status() == CodecStatus::Initialised;
        self.flush_retired();
        self.handle_control_messages(initialised);

        let (num_sh_in, num_out) = match self.state.as_ref() {
            Some(state) => (
                num_sh(state.master_order),
                if state.hrtfs.is_some() {
                    NUM_EARS
                } else {
                    state.num_loudspeakers()
                },
            ),
            None => (0, 0),
        };

        let mut pos = 0;
        while pos < num_samples {
            let n = (FRAME_SIZE - self.fifo_idx).min(num_samples - pos);
            let fifo_range = self.fifo_idx..self.fifo_idx + n;

            for (ch, fifo) in self.in_fifo.iter_mut().enumerate().take(num_sh_in) {
                match inputs.get(ch) {
                    Some(input) => fifo[fifo_range.clone()].copy_from_slice(&input[pos..pos + n]),
                    None => fifo[fifo_range.clone()].iter_mut().for_each(|s| *s = 0.0),
                }
            }
            for (ch, output) in outputs.iter_mut().enumerate() {
                if ch < num_out {
                    output[pos..pos + n].copy_from_slice(&self.out_fifo[ch][fifo_range.clone()]);
                } else {
                    output[pos..pos + n].iter_mut().for_each(|s| *s = 0.0);
                }
            }

            self.fifo_idx += n;
            pos += n;

            if self.fifo_idx == FRAME_SIZE {
                self.fifo_idx = 0;
                // re-check, the configuration might have been invalidated in the meantime
                if self.status.codec_status() == CodecStatus::Initialised && self.state.is_some()
                {
                    self.process_frame();
                } else {
                    self.mute_frame();
                }
            }
        }

        self.status
            .set_processing_status(ProcessingStatus::NotOngoing);
    }

    fn mute_frame(&mut self) {
        for ch in self.out_fifo.iter_mut() {
            ch.iter_mut().for_each(|s| *s = 0.0);
        }
        self.was_muted = true;
    }

    fn process_frame(&mut self) {
        let state = match self.state.as_ref() {
            Some(state) => state,
            None => return,
        };

        if self.was_muted {
            self.filterbank.reset();
            self.was_muted = false;
        }

        let master_order = state.master_order;
        let num_sh_in = num_sh(master_order);
        let num_ls = state.num_loudspeakers();

        convert_to_acn_n3d(
            &mut self.in_fifo[..num_sh_in],
            num_sh_in,
            self.ch_order,
            self.norm_type,
        );

        if let Some(hrtfs) = state.hrtfs.as_ref() {
            self.hrtf_cache.update(hrtfs, num_ls);
        }
        let bin_gain = 1.0 / (num_ls as f32).sqrt();

        for t in 0..TIME_SLOTS {
            self.filterbank
                .forward(&self.in_fifo, t * HOP_SIZE, &mut self.spec_in);

            for band in 0..NUM_BANDS {
                let slot = if state.freqs[band] < self.transition_freq {
                    DecoderSlot::Low
                } else {
                    DecoderSlot::High
                };
                let config = &state.slots[slot.index()];
                let arena = &state.decoders[slot.index()];

                let order = self.band_orders[band].clamp(1, master_order);
                let nsh = num_sh(order);
                let dec = arena.matrix_cmplx(order, config.max_re);
                let norm = arena.norm_for(order, config.diffuse_eq);

                let spec_in = &self.spec_in[band * num_sh_in..band * num_sh_in + nsh];
                let spec_ls = &mut self.spec_ls[band * num_ls..(band + 1) * num_ls];
                for (ls, out) in spec_ls.iter_mut().enumerate() {
                    let row = &dec[ls * nsh..(ls + 1) * nsh];
                    let mut acc = Complex::new(0.0, 0.0);
                    for (d, x) in row.iter().zip(spec_in.iter()) {
                        acc += d * x;
                    }
                    *out = acc * norm;
                }

                if state.hrtfs.is_some() {
                    for ear in 0..NUM_EARS {
                        let mut acc = Complex::new(0.0, 0.0);
                        for (ls, x) in spec_ls.iter().enumerate() {
                            acc += x * self.hrtf_cache.filter(ls)[band * NUM_EARS + ear];
                        }
                        self.spec_bin[band * NUM_EARS + ear] = acc * bin_gain;
                    }
                }
            }

            if state.hrtfs.is_some() {
                self.filterbank
                    .inverse(&self.spec_bin, &mut self.out_fifo, t * HOP_SIZE);
            } else {
                self.filterbank
                    .inverse(&self.spec_ls, &mut self.out_fifo, t * HOP_SIZE);
            }
        }
    }
}

impl Drop for AmbiDecPlayhead {
    fn drop(&mut self) {
        self.status
            .set_processing_status(ProcessingStatus::NotOngoing);
    }
}
