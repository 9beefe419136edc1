use std::sync::Arc;

use num_complex::*;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::{HOP_SIZE, NUM_BANDS};

/// The time-frequency transform the decoder runs on.
///
/// Spectra are laid out band-major, that is `spec[band * num_channels + channel]`.
pub trait FilterBank {
    fn num_in_channels(&self) -> usize;
    fn num_out_channels(&self) -> usize;

    /// analyse one hop (`HOP_SIZE` samples, starting at `offset`) of every input channel
    fn forward(&mut self, frame: &[Vec<f32>], offset: usize, spec: &mut [Complex<f32>]);

    /// synthesise one hop of every output channel, written starting at `offset`
    fn inverse(&mut self, spec: &[Complex<f32>], frame: &mut [Vec<f32>], offset: usize);

    /// Changes the number of active channels, up to the maximum given at
    /// construction. Doesn't allocate.
    fn set_num_channels(&mut self, num_in: usize, num_out: usize);

    /// clear all internal state
    fn reset(&mut self);

    /// processing delay in samples
    fn delay(&self) -> usize;
}

/**
 * Short-time fourier filterbank with 50% overlapping sqrt-hann windows
 * (weighted overlap-add). The squared window adds up to one across
 * the overlap, so analysis followed by synthesis is a pure delay of one hop.
 * All FFT buffers are allocated up front, processing doesn't allocate.
 */
pub struct StftFilterbank {
    num_in: usize,
    num_out: usize,
    max_in: usize,
    max_out: usize,
    window: Vec<f32>,
    r2c: Arc<dyn RealToComplex<f32>>,
    c2r: Arc<dyn ComplexToReal<f32>>,
    in_history: Vec<Vec<f32>>,
    out_tail: Vec<Vec<f32>>,
    fwd_in: Vec<f32>,
    fwd_out: Vec<Complex<f32>>,
    fwd_scratch: Vec<Complex<f32>>,
    inv_in: Vec<Complex<f32>>,
    inv_out: Vec<f32>,
    inv_scratch: Vec<Complex<f32>>,
}

impl StftFilterbank {
    /// filterbank for at most `max_in` input and `max_out` output channels, all active
    pub fn new(max_in: usize, max_out: usize) -> Self {
        let len = 2 * HOP_SIZE;
        let window = (0..len)
            .map(|n| (std::f32::consts::PI * n as f32 / len as f32).sin())
            .collect();

        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(len);
        let c2r = planner.plan_fft_inverse(len);
        let fwd_scratch = r2c.make_scratch_vec();
        let inv_scratch = c2r.make_scratch_vec();

        StftFilterbank {
            num_in: max_in,
            num_out: max_out,
            max_in,
            max_out,
            window,
            r2c,
            c2r,
            in_history: vec![vec![0.0; HOP_SIZE]; max_in],
            out_tail: vec![vec![0.0; HOP_SIZE]; max_out],
            fwd_in: vec![0.0; len],
            fwd_out: vec![Complex::new(0.0, 0.0); NUM_BANDS],
            fwd_scratch,
            inv_in: vec![Complex::new(0.0, 0.0); NUM_BANDS],
            inv_out: vec![0.0; len],
            inv_scratch,
        }
    }
}

impl FilterBank for StftFilterbank {
    fn num_in_channels(&self) -> usize {
        self.num_in
    }

    fn num_out_channels(&self) -> usize {
        self.num_out
    }

    fn forward(&mut self, frame: &[Vec<f32>], offset: usize, spec: &mut [Complex<f32>]) {
        for ch in 0..self.num_in {
            let hop = &frame[ch][offset..offset + HOP_SIZE];
            for n in 0..HOP_SIZE {
                self.fwd_in[n] = self.in_history[ch][n] * self.window[n];
                self.fwd_in[n + HOP_SIZE] = hop[n] * self.window[n + HOP_SIZE];
            }
            self.in_history[ch].copy_from_slice(hop);

            // only fails on buffer length mismatch, and the lengths are fixed
            if self
                .r2c
                .process_with_scratch(&mut self.fwd_in, &mut self.fwd_out, &mut self.fwd_scratch)
                .is_err()
            {
                self.fwd_out.iter_mut().for_each(|b| *b = Complex::new(0.0, 0.0));
            }
            for (band, bin) in self.fwd_out.iter().enumerate() {
                spec[band * self.num_in + ch] = *bin;
            }
        }
    }

    fn inverse(&mut self, spec: &[Complex<f32>], frame: &mut [Vec<f32>], offset: usize) {
        for ch in 0..self.num_out {
            for band in 0..NUM_BANDS {
                self.inv_in[band] = spec[band * self.num_out + ch];
            }
            // dc and nyquist bins of a real signal have no imaginary part
            self.inv_in[0].im = 0.0;
            self.inv_in[NUM_BANDS - 1].im = 0.0;

            if self
                .c2r
                .process_with_scratch(&mut self.inv_in, &mut self.inv_out, &mut self.inv_scratch)
                .is_err()
            {
                self.inv_out.iter_mut().for_each(|s| *s = 0.0);
            }

            // the inverse transform is unnormalised
            let scale = 1.0 / self.inv_out.len() as f32;
            let out = &mut frame[ch][offset..offset + HOP_SIZE];
            for n in 0..HOP_SIZE {
                out[n] = self.inv_out[n] * scale * self.window[n] + self.out_tail[ch][n];
                self.out_tail[ch][n] =
                    self.inv_out[n + HOP_SIZE] * scale * self.window[n + HOP_SIZE];
            }
        }
    }

    fn set_num_channels(&mut self, num_in: usize, num_out: usize) {
        let num_in = num_in.min(self.max_in);
        let num_out = num_out.min(self.max_out);
        // channels coming back to life start from silence
        for hist in self.in_history[self.num_in.min(num_in)..num_in].iter_mut() {
            hist.iter_mut().for_each(|s| *s = 0.0);
        }
        for tail in self.out_tail[self.num_out.min(num_out)..num_out].iter_mut() {
            tail.iter_mut().for_each(|s| *s = 0.0);
        }
        self.num_in = num_in;
        self.num_out = num_out;
    }

    fn reset(&mut self) {
        for buf in self.in_history.iter_mut().chain(self.out_tail.iter_mut()) {
            buf.iter_mut().for_each(|s| *s = 0.0);
        }
    }

    fn delay(&self) -> usize {
        HOP_SIZE
    }
}

// TEST TEST TEST
#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_identity_is_one_hop_delay() {
        let mut fb = StftFilterbank::new(1, 1);
        let mut spec = vec![Complex::new(0.0, 0.0); NUM_BANDS];

        let signal: Vec<f32> = (0..HOP_SIZE * 8)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / 48000.0).sin())
            .collect();

        let mut input = vec![vec![0.0; HOP_SIZE]];
        let mut output = vec![vec![0.0; HOP_SIZE]];
        let mut result = Vec::new();

        for hop in signal.chunks(HOP_SIZE) {
            input[0].copy_from_slice(hop);
            fb.forward(&input, 0, &mut spec);
            fb.inverse(&spec, &mut output, 0);
            result.extend_from_slice(&output[0]);
        }

        for i in HOP_SIZE..signal.len() {
            assert_approx_eq::assert_approx_eq!(result[i], signal[i - HOP_SIZE], 0.0001);
        }
    }

    #[test]
    fn test_hops_dont_allocate() {
        let mut fb = StftFilterbank::new(4, 8);
        fb.set_num_channels(4, 6);
        let mut spec_in = vec![Complex::new(0.0, 0.0); NUM_BANDS * 4];
        let mut spec_out = vec![Complex::new(0.0, 0.0); NUM_BANDS * 6];
        let input = vec![vec![0.5; HOP_SIZE]; 4];
        let mut output = vec![vec![0.0; HOP_SIZE]; 6];

        assert_no_alloc::assert_no_alloc(|| {
            for _ in 0..4 {
                fb.forward(&input, 0, &mut spec_in);
                spec_out[..NUM_BANDS * 4].copy_from_slice(&spec_in);
                fb.inverse(&spec_out, &mut output, 0);
            }
        });
    }

    #[test]
    fn test_band_of_a_sine() {
        // a sine right on a bin centre ends up (mostly) in that band
        let mut fb = StftFilterbank::new(1, 1);
        let mut spec = vec![Complex::new(0.0, 0.0); NUM_BANDS];
        let bin = 10;
        let freq = bin as f32 * 48000.0 / (2 * HOP_SIZE) as f32;

        let mut input = vec![vec![0.0; HOP_SIZE]];
        for h in 0..4 {
            for n in 0..HOP_SIZE {
                let i = h * HOP_SIZE + n;
                input[0][n] = (2.0 * PI * freq * i as f32 / 48000.0).sin();
            }
            fb.forward(&input, 0, &mut spec);
        }

        let peak = (0..NUM_BANDS)
            .max_by(|a, b| spec[*a].norm().total_cmp(&spec[*b].norm()))
            .unwrap();
        assert_eq!(peak, bin);
    }

    #[test]
    fn test_channel_reconfiguration() {
        let mut fb = StftFilterbank::new(4, 4);
        fb.set_num_channels(2, 8);
        assert_eq!(fb.num_in_channels(), 2);
        assert_eq!(fb.num_out_channels(), 4);

        // the spectrum stride follows the active channel count
        let mut spec = vec![Complex::new(0.0, 0.0); NUM_BANDS * 2];
        let input = vec![vec![1.0; HOP_SIZE], vec![0.0; HOP_SIZE]];
        fb.forward(&input, 0, &mut spec);
        assert!(spec[0].norm() > 0.0);
        assert_approx_eq::assert_approx_eq!(spec[1].norm(), 0.0, 0.000001);

        fb.reset();
        fb.forward(&vec![vec![0.0; HOP_SIZE]; 2], 0, &mut spec);
        for bin in spec.iter() {
            assert_approx_eq::assert_approx_eq!(bin.norm(), 0.0, 0.000001);
        }
    }
}
