//! HRTF preparation and interpolation.
//!
//! The HRIRs are brought to the filterbank's band layout, then split into
//! per-band magnitudes and one interaural time difference per direction.
//! Interpolating those separately (and rebuilding the phase from the ITD)
//! avoids the comb-filtering you'd get from mixing complex HRTFs directly.

use chfft::RFft1D;
use num_complex::*;

use crate::building_blocks::frequency_table::band_centre_freqs;
use crate::building_blocks::hrir::{HrirSet, HrirSource};
use crate::building_blocks::vbap::CompressedVbapTable;
use crate::error::Result;
use crate::{
    HOP_SIZE, HRTF_INTERP_AZI_RES, HRTF_INTERP_ELEV_RES, MAX_NUM_LOUDSPEAKERS, NUM_BANDS,
    NUM_EARS,
};

// largest plausible interaural delay, in seconds
const MAX_ITD: f32 = 0.001;

/// One ITD per direction (seconds, right-ear arrival minus left-ear arrival,
/// so positive for sources on the left). Picks the cross-correlation peak
/// within the plausible range, refined by parabolic interpolation.
pub fn estimate_itds(hrirs: &HrirSet) -> Vec<f32> {
    let max_lag = (MAX_ITD * hrirs.samplerate()).ceil() as isize;
    let len = hrirs.length() as isize;
    let mut xcorr = vec![0.0; (2 * max_lag + 1) as usize];

    (0..hrirs.num_dirs())
        .map(|dir| {
            let left = hrirs.hrir(dir, 0);
            let right = hrirs.hrir(dir, 1);

            for (i, lag) in (-max_lag..=max_lag).enumerate() {
                let mut acc = 0.0;
                for n in 0.max(-lag)..len.min(len - lag) {
                    acc += left[n as usize] * right[(n + lag) as usize];
                }
                xcorr[i] = acc;
            }

            let peak = (0..xcorr.len())
                .max_by(|a, b| xcorr[*a].total_cmp(&xcorr[*b]))
                .unwrap_or(max_lag as usize);

            let mut frac = 0.0;
            if peak > 0 && peak < xcorr.len() - 1 {
                let (ym1, y0, yp1) = (xcorr[peak - 1], xcorr[peak], xcorr[peak + 1]);
                let denom = ym1 - 2.0 * y0 + yp1;
                if denom.abs() > f32::EPSILON {
                    frac = (0.5 * (ym1 - yp1) / denom).clamp(-0.5, 0.5);
                }
            }

            (peak as f32 - max_lag as f32 + frac) / hrirs.samplerate()
        })
        .collect()
}

/// Transforms the HRIRs to the filterbank's bands, laid out as [dir][band][ear].
/// Longer responses are transformed at a finer resolution and then sampled
/// at the band centres, so nothing gets truncated.
pub fn hrirs_to_filterbank(hrirs: &HrirSet) -> Vec<Complex<f32>> {
    let fb_len = 2 * HOP_SIZE;
    let fft_len = hrirs.length().next_power_of_two().max(fb_len);
    let step = fft_len / fb_len;

    let mut fft = RFft1D::<f32>::new(fft_len);
    let mut padded = vec![0.0; fft_len];
    let mut filters = vec![Complex::new(0.0, 0.0); hrirs.num_dirs() * NUM_BANDS * NUM_EARS];

    for dir in 0..hrirs.num_dirs() {
        for ear in 0..NUM_EARS {
            padded[..hrirs.length()].copy_from_slice(hrirs.hrir(dir, ear));
            let bins = fft.forward(&padded);
            for band in 0..NUM_BANDS {
                filters[(dir * NUM_BANDS + band) * NUM_EARS + ear] = bins[band * step];
            }
        }
    }

    filters
}

/// Diffuse-field equalisation: every band of every ear is divided by its RMS
/// magnitude over all directions. The phase is rebuilt from the ITDs, which
/// leaves the filters linear-phase apart from the interaural delay.
pub fn diffuse_field_equalise(
    filters: &mut [Complex<f32>],
    itds: &[f32],
    freqs: &[f32; NUM_BANDS],
) {
    let num_dirs = itds.len();
    for band in 0..NUM_BANDS {
        for ear in 0..NUM_EARS {
            let mut power = 0.0;
            for dir in 0..num_dirs {
                power += filters[(dir * NUM_BANDS + band) * NUM_EARS + ear].norm_sqr();
            }
            let rms = (power / num_dirs as f32).sqrt();
            let eq = if rms > 1e-9 { 1.0 / rms } else { 0.0 };

            for (dir, itd) in itds.iter().enumerate() {
                let idx = (dir * NUM_BANDS + band) * NUM_EARS + ear;
                let mag = filters[idx].norm() * eq;
                filters[idx] = itd_filter(mag, *itd, freqs[band], ear);
            }
        }
    }
}

/// magnitude plus the ITD phase, left ear leads for positive ITDs
#[inline(always)]
fn itd_filter(mag: f32, itd: f32, freq: f32, ear: usize) -> Complex<f32> {
    let phase = std::f32::consts::PI * freq * itd;
    if ear == 0 {
        Complex::from_polar(mag, phase)
    } else {
        Complex::from_polar(mag, -phase)
    }
}

/**
 * A fully prepared HRTF set: the HRIRs, their ITDs, per-band filters
 * and magnitudes, and the interpolation table over the measured directions.
 */
pub struct HrtfSet {
    hrirs: HrirSet,
    itds: Vec<f32>,
    filters: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    table: CompressedVbapTable,
    freqs: &'static [f32; NUM_BANDS],
    using_default: bool,
}

impl HrtfSet {
    /**
     * Loads and prepares the HRTFs. If the file can't be read, or its
     * directions can't be triangulated, the whole thing is done once more
     * with the default set. Only if that fails as well, there's an error.
     */
    pub fn prepare(source: &HrirSource, samplerate: f32, preproc: bool) -> Result<Self> {
        HrtfSet::prepare_with_default(source, samplerate, preproc, HrirSet::default_set)
    }

    /// Same as `prepare`, with the default set coming from `default_set`.
    pub fn prepare_with_default(
        source: &HrirSource,
        samplerate: f32,
        preproc: bool,
        default_set: fn(f32) -> HrirSet,
    ) -> Result<Self> {
        let attempt = match source {
            HrirSource::Default => HrtfSet::from_hrirs(default_set(samplerate), preproc, true),
            HrirSource::File(path) => HrirSet::from_file(path, samplerate)
                .and_then(|hrirs| HrtfSet::from_hrirs(hrirs, preproc, false)),
        };

        match attempt {
            Ok(set) => Ok(set),
            Err(e) if *source != HrirSource::Default => {
                log::warn!("couldn't use HRIRs from {source:?} ({e}), falling back to the default set");
                HrtfSet::from_hrirs(default_set(samplerate), preproc, true)
            }
            Err(e) => Err(e),
        }
    }

    pub fn from_hrirs(hrirs: HrirSet, preproc: bool, using_default: bool) -> Result<Self> {
        let itds = estimate_itds(&hrirs);

        let dirs_deg: Vec<[f64; 2]> = hrirs
            .dirs_deg()
            .iter()
            .map(|d| [d[0] as f64, d[1] as f64])
            .collect();
        let table =
            CompressedVbapTable::generate(&dirs_deg, HRTF_INTERP_AZI_RES, HRTF_INTERP_ELEV_RES)?;

        let freqs = band_centre_freqs(hrirs.samplerate());
        let mut filters = hrirs_to_filterbank(&hrirs);
        if preproc {
            diffuse_field_equalise(&mut filters, &itds, freqs);
        }
        let magnitudes = filters.iter().map(|h| h.norm()).collect();

        Ok(HrtfSet {
            hrirs,
            itds,
            filters,
            magnitudes,
            table,
            freqs,
            using_default,
        })
    }

    /// Interpolated filter for one direction, written to `out` as [band][ear].
    /// Doesn't allocate, so it can run on the audio thread.
    pub fn interpolate(&self, azi_deg: f32, elev_deg: f32, out: &mut [Complex<f32>]) {
        let (idx, w) = self.table.lookup(azi_deg, elev_deg);

        let itd = w[0] * self.itds[idx[0]] + w[1] * self.itds[idx[1]] + w[2] * self.itds[idx[2]];

        for band in 0..NUM_BANDS {
            for ear in 0..NUM_EARS {
                let mut mag = 0.0;
                for k in 0..3 {
                    mag += w[k] * self.magnitudes[(idx[k] * NUM_BANDS + band) * NUM_EARS + ear];
                }
                out[band * NUM_EARS + ear] = itd_filter(mag, itd, self.freqs[band], ear);
            }
        }
    }

    pub fn num_dirs(&self) -> usize {
        self.hrirs.num_dirs()
    }

    pub fn hrir_samplerate(&self) -> f32 {
        self.hrirs.samplerate()
    }

    pub fn hrir_length(&self) -> usize {
        self.hrirs.length()
    }

    pub fn using_default_hrirs(&self) -> bool {
        self.using_default
    }

    pub fn itds(&self) -> &[f32] {
        &self.itds
    }

    /// per-band filters, [dir][band][ear]
    pub fn filters(&self) -> &[Complex<f32>] {
        &self.filters
    }

    pub fn table(&self) -> &CompressedVbapTable {
        &self.table
    }
}

/**
 * Interpolated HRTFs for each loudspeaker, only recomputed
 * for loudspeakers whose direction changed.
 */
pub struct LoudspeakerHrtfCache {
    filters: Vec<Complex<f32>>, // [ls][band][ear]
    dirs_deg: Vec<[f32; 2]>,
    dirty: Vec<bool>,
}

impl Default for LoudspeakerHrtfCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LoudspeakerHrtfCache {
    pub fn new() -> Self {
        LoudspeakerHrtfCache {
            filters: vec![Complex::new(0.0, 0.0); MAX_NUM_LOUDSPEAKERS * NUM_BANDS * NUM_EARS],
            dirs_deg: vec![[0.0; 2]; MAX_NUM_LOUDSPEAKERS],
            dirty: vec![true; MAX_NUM_LOUDSPEAKERS],
        }
    }

    pub fn set_direction(&mut self, ls: usize, azi_deg: f32, elev_deg: f32) {
        if self.dirs_deg[ls] != [azi_deg, elev_deg] {
            self.dirs_deg[ls] = [azi_deg, elev_deg];
            self.dirty[ls] = true;
        }
    }

    /// i.e. when the HRTF set itself changed
    pub fn invalidate_all(&mut self) {
        self.dirty.iter_mut().for_each(|d| *d = true);
    }

    pub fn is_dirty(&self, ls: usize) -> bool {
        self.dirty[ls]
    }

    /// recompute the dirty ones among the first `num_ls` loudspeakers
    pub fn update(&mut self, hrtfs: &HrtfSet, num_ls: usize) {
        for ls in 0..num_ls {
            if self.dirty[ls] {
                let [azi, elev] = self.dirs_deg[ls];
                let start = ls * NUM_BANDS * NUM_EARS;
                hrtfs.interpolate(azi, elev, &mut self.filters[start..start + NUM_BANDS * NUM_EARS]);
                self.dirty[ls] = false;
            }
        }
    }

    /// the [band][ear] filter of one loudspeaker
    #[inline(always)]
    pub fn filter(&self, ls: usize) -> &[Complex<f32>] {
        let start = ls * NUM_BANDS * NUM_EARS;
        &self.filters[start..start + NUM_BANDS * NUM_EARS]
    }
}
