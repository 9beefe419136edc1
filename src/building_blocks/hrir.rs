//! Head-related impulse response sets.
//!
//! There's a built-in default set, computed from a spherical head model,
//! and a simple binary file format for measured sets:
//!
//! ```text
//! b"HRIR"                        magic
//! u32 samplerate                 little endian, as everything else
//! u32 ir length
//! u32 number of directions
//! per direction:
//!     f32 azimuth, f32 elevation   (degrees)
//!     f32 * length  left ear
//!     f32 * length  right ear
//! ```

use chfft::RFft1D;
use num_complex::*;
use rubato::{FftFixedIn, Resampler};

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{AmbiDecError, Result};
use crate::NUM_EARS;

const HEAD_RADIUS: f32 = 0.0875;
const SPEED_OF_SOUND: f32 = 343.0;
const DEFAULT_HRIR_LEN: usize = 256;
const DEFAULT_ONSET_SECONDS: f32 = 0.001;

// head shadow model parameters, after Brown & Duda
const SHADOW_ALPHA_MIN: f32 = 0.1;
const SHADOW_THETA_MIN_DEG: f32 = 150.0;

// resampling block size
const RESAMPLE_CHUNK: usize = 128;

// upper bounds for the header fields of an HRIR file
const MAX_HRIR_DIRS: usize = 1 << 16;
const MAX_HRIR_LEN: usize = 1 << 16;

/// where the HRIRs come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HrirSource {
    Default,
    File(PathBuf),
}

/**
 * A set of head-related impulse responses, stored as [direction][ear][sample].
 */
#[derive(Clone, Debug)]
pub struct HrirSet {
    dirs_deg: Vec<[f32; 2]>,
    hrirs: Vec<f32>,
    length: usize,
    samplerate: f32,
}

impl HrirSet {
    pub fn new(dirs_deg: Vec<[f32; 2]>, hrirs: Vec<f32>, length: usize, samplerate: f32) -> Self {
        debug_assert!(hrirs.len() == dirs_deg.len() * NUM_EARS * length);
        HrirSet {
            dirs_deg,
            hrirs,
            length,
            samplerate,
        }
    }

    /// Reads an HRIR file, resampled to `samplerate` if necessary.
    pub fn from_file<P: AsRef<Path>>(path: P, samplerate: f32) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        HrirSet::from_reader(BufReader::new(file), samplerate)
    }

    pub fn from_reader<R: Read>(mut reader: R, samplerate: f32) -> Result<Self> {
        let mut magic = [0; 4];
        reader.read_exact(&mut magic)?;
        if &magic != b"HRIR" {
            return Err(AmbiDecError::InvalidHrirFile("bad magic".to_string()));
        }

        let file_sr = read_u32(&mut reader)?;
        let length = read_u32(&mut reader)? as usize;
        let num_dirs = read_u32(&mut reader)? as usize;

        if length == 0 || file_sr == 0 {
            return Err(AmbiDecError::InvalidHrirFile(format!(
                "invalid length {length} or samplerate {file_sr}"
            )));
        }
        if length > MAX_HRIR_LEN || num_dirs > MAX_HRIR_DIRS {
            return Err(AmbiDecError::InvalidHrirFile(format!(
                "{num_dirs} directions of length {length} is more than supported"
            )));
        }
        if num_dirs < 4 {
            return Err(AmbiDecError::TooFewDirections(num_dirs));
        }

        // grows with what's actually in the file
        let mut dirs_deg = Vec::new();
        let mut irs: Vec<Vec<f32>> = Vec::new();
        for _ in 0..num_dirs {
            let azi = read_f32(&mut reader)?;
            let elev = read_f32(&mut reader)?;
            dirs_deg.push([azi, elev]);
            for _ in 0..NUM_EARS {
                let mut ir = Vec::with_capacity(length);
                for _ in 0..length {
                    ir.push(read_f32(&mut reader)?);
                }
                irs.push(ir);
            }
        }

        // resample IRs if needed ...
        if file_sr as f32 != samplerate {
            log::info!("resampling HRIRs from {file_sr}Hz to {samplerate}Hz");
            irs = irs
                .iter()
                .map(|ir| resample_ir(ir, file_sr as usize, samplerate as usize))
                .collect::<Result<Vec<_>>>()?;
        }

        let length = irs.iter().map(|ir| ir.len()).min().unwrap_or(0);
        let mut hrirs = Vec::with_capacity(num_dirs * NUM_EARS * length);
        for ir in irs.iter() {
            hrirs.extend_from_slice(&ir[..length]);
        }

        Ok(HrirSet::new(dirs_deg, hrirs, length, samplerate))
    }

    /// Writes the set in the binary format described in the module docs.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 + self.hrirs.len() * 4 + self.dirs_deg.len() * 8);
        bytes.extend_from_slice(b"HRIR");
        bytes.extend_from_slice(&(self.samplerate as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.length as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.dirs_deg.len() as u32).to_le_bytes());
        for (d, dir) in self.dirs_deg.iter().enumerate() {
            bytes.extend_from_slice(&dir[0].to_le_bytes());
            bytes.extend_from_slice(&dir[1].to_le_bytes());
            for ear in 0..NUM_EARS {
                for s in self.hrir(d, ear) {
                    bytes.extend_from_slice(&s.to_le_bytes());
                }
            }
        }
        bytes
    }

    /**
     * The built-in set: a rigid spherical head, with woodworth arrival times
     * and a one-pole/one-zero head shadow filter per ear. Directions are rings
     * every 15 degrees of elevation (azimuths staggered from ring to ring), plus the poles.
     */
    pub fn default_set(samplerate: f32) -> Self {
        let mut dirs_deg = vec![[0.0, -90.0]];
        for (ring, elev) in (-75..=75).step_by(15).enumerate() {
            let offset = if ring % 2 == 0 { 7.5 } else { 0.0 };
            for a in 0..24 {
                let mut azi = -180.0 + offset + 15.0 * a as f32;
                if azi >= 180.0 {
                    azi -= 360.0;
                }
                dirs_deg.push([azi, elev as f32]);
            }
        }
        dirs_deg.push([0.0, 90.0]);

        let mut fft = RFft1D::<f32>::new(DEFAULT_HRIR_LEN);
        let mut spectrum = vec![Complex::new(0.0, 0.0); DEFAULT_HRIR_LEN / 2 + 1];
        let mut hrirs = Vec::with_capacity(dirs_deg.len() * NUM_EARS * DEFAULT_HRIR_LEN);

        let w0 = SPEED_OF_SOUND / HEAD_RADIUS;
        for dir in dirs_deg.iter() {
            let (azi, elev) = (dir[0].to_radians(), dir[1].to_radians());
            // left ear sits at +90 degrees azimuth
            let lateral = elev.cos() * azi.sin();
            for ear_side in [1.0, -1.0] {
                let theta = (ear_side * lateral).clamp(-1.0, 1.0).acos();
                let alpha = (1.0 + SHADOW_ALPHA_MIN / 2.0)
                    + (1.0 - SHADOW_ALPHA_MIN / 2.0)
                        * (theta / SHADOW_THETA_MIN_DEG.to_radians() * std::f32::consts::PI).cos();
                let tau = DEFAULT_ONSET_SECONDS + woodworth_delay(theta);

                for (k, bin) in spectrum.iter_mut().enumerate() {
                    let w = 2.0 * std::f32::consts::PI * k as f32 * samplerate
                        / DEFAULT_HRIR_LEN as f32;
                    let shadow = Complex::new(1.0, alpha * w / (2.0 * w0))
                        / Complex::new(1.0, w / (2.0 * w0));
                    *bin = shadow * Complex::from_polar(1.0, -w * tau);
                }
                spectrum[0].im = 0.0;
                spectrum[DEFAULT_HRIR_LEN / 2].im = 0.0;

                hrirs.extend_from_slice(&fft.backward(&spectrum)[..DEFAULT_HRIR_LEN]);
            }
        }

        HrirSet::new(dirs_deg, hrirs, DEFAULT_HRIR_LEN, samplerate)
    }

    pub fn num_dirs(&self) -> usize {
        self.dirs_deg.len()
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn samplerate(&self) -> f32 {
        self.samplerate
    }

    pub fn dirs_deg(&self) -> &[[f32; 2]] {
        &self.dirs_deg
    }

    pub fn hrir(&self, dir: usize, ear: usize) -> &[f32] {
        let start = (dir * NUM_EARS + ear) * self.length;
        &self.hrirs[start..start + self.length]
    }
}

/// arrival time at an ear, relative to the head centre, for a source
/// at angle `theta` (radians) from the ear axis
fn woodworth_delay(theta: f32) -> f32 {
    let a_c = HEAD_RADIUS / SPEED_OF_SOUND;
    if theta < std::f32::consts::FRAC_PI_2 {
        -a_c * theta.cos()
    } else {
        a_c * (theta - std::f32::consts::FRAC_PI_2)
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f32<R: Read>(reader: &mut R) -> Result<f32> {
    let mut buf = [0; 4];
    reader.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

fn resample_ir(ir: &[f32], sr_in: usize, sr_out: usize) -> Result<Vec<f32>> {
    // zero-pad for resampling blocks, plus one extra block to flush the resampler
    let num_chunks = (ir.len() + RESAMPLE_CHUNK - 1) / RESAMPLE_CHUNK + 1;
    let mut padded = ir.to_vec();
    padded.resize(num_chunks * RESAMPLE_CHUNK, 0.0);

    let mut resampler = FftFixedIn::<f32>::new(sr_in, sr_out, RESAMPLE_CHUNK, 1, 1);
    let mut resampled: Vec<f32> = Vec::new();
    for chunk in padded.chunks(RESAMPLE_CHUNK) {
        let mut waves_out = resampler
            .process(&vec![chunk.to_vec()])
            .map_err(|e| AmbiDecError::InvalidHrirFile(format!("resampling failed: {e}")))?;
        resampled.append(&mut waves_out[0]);
    }

    let out_len = (ir.len() as f64 * sr_out as f64 / sr_in as f64).ceil() as usize;
    resampled.resize(out_len.max(1), 0.0);
    Ok(resampled)
}

// TEST TEST TEST
#[cfg(test)]
mod tests {
    use super::*;

    fn energy(x: &[f32]) -> f32 {
        x.iter().map(|s| s * s).sum()
    }

    #[test]
    fn test_default_set_shape() {
        let set = HrirSet::default_set(48000.0);
        assert_eq!(set.num_dirs(), 11 * 24 + 2);
        assert_eq!(set.length(), DEFAULT_HRIR_LEN);
        for dir in set.dirs_deg() {
            assert!(dir[0] >= -180.0 && dir[0] < 180.0);
        }
    }

    #[test]
    fn test_default_set_head_shadow() {
        let set = HrirSet::default_set(48000.0);
        let left = set
            .dirs_deg()
            .iter()
            .position(|d| d[0] == 90.0 && d[1] == 0.0)
            .unwrap();
        assert!(energy(set.hrir(left, 0)) > 2.0 * energy(set.hrir(left, 1)));

        let right = set
            .dirs_deg()
            .iter()
            .position(|d| d[0] == -90.0 && d[1] == 0.0)
            .unwrap();
        assert!(energy(set.hrir(right, 1)) > 2.0 * energy(set.hrir(right, 0)));
    }

    #[test]
    fn test_file_round_trip_and_resampling() {
        let set = HrirSet::default_set(44100.0);
        let bytes = set.to_bytes();

        let same = HrirSet::from_reader(&bytes[..], 44100.0).unwrap();
        assert_eq!(same.num_dirs(), set.num_dirs());
        assert_eq!(same.length(), set.length());
        assert_eq!(same.hrir(7, 1), set.hrir(7, 1));

        let resampled = HrirSet::from_reader(&bytes[..], 48000.0).unwrap();
        assert_eq!(resampled.num_dirs(), set.num_dirs());
        assert_eq!(resampled.length(), 279);
        assert_approx_eq::assert_approx_eq!(resampled.samplerate(), 48000.0, 0.001);
    }

    #[test]
    fn test_invalid_files() {
        assert!(HrirSet::from_reader(&b"RIFF0000"[..], 48000.0).is_err());

        let mut bytes = b"HRIR".to_vec();
        bytes.extend_from_slice(&48000_u32.to_le_bytes());
        bytes.extend_from_slice(&16_u32.to_le_bytes());
        bytes.extend_from_slice(&2_u32.to_le_bytes());
        assert!(matches!(
            HrirSet::from_reader(&bytes[..], 48000.0),
            Err(AmbiDecError::TooFewDirections(2))
        ));

        // truncated
        let set = HrirSet::default_set(48000.0);
        let bytes = set.to_bytes();
        assert!(HrirSet::from_reader(&bytes[..1000], 48000.0).is_err());

        assert!(matches!(
            HrirSet::from_file("/this/path/does/not/exist.hrir", 48000.0),
            Err(AmbiDecError::HrirIo(_))
        ));
    }

    #[test]
    fn test_oversized_header_is_rejected() {
        for (length, num_dirs) in [(1_u32, u32::MAX), (u32::MAX, 8), (1 << 17, 4)] {
            let mut bytes = b"HRIR".to_vec();
            bytes.extend_from_slice(&48000_u32.to_le_bytes());
            bytes.extend_from_slice(&length.to_le_bytes());
            bytes.extend_from_slice(&num_dirs.to_le_bytes());
            assert!(matches!(
                HrirSet::from_reader(&bytes[..], 48000.0),
                Err(AmbiDecError::InvalidHrirFile(_))
            ));
        }

        // a header promising far more than the file holds
        let mut bytes = b"HRIR".to_vec();
        bytes.extend_from_slice(&48000_u32.to_le_bytes());
        bytes.extend_from_slice(&16_u32.to_le_bytes());
        bytes.extend_from_slice(&(1_u32 << 16).to_le_bytes());
        assert!(matches!(
            HrirSet::from_reader(&bytes[..], 48000.0),
            Err(AmbiDecError::HrirIo(_))
        ));
    }
}
