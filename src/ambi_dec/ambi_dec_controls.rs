use parking_lot::Mutex;

// crossbeam for the control queue
use crossbeam::channel::{Receiver, Sender};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::ambi_dec::codec_status::{CodecStatusBlock, InitStage};
use crate::ambi_dec::synthesis::synthesise_decoders;
use crate::ambi_dec::{ControlMessage, RenderState};
use crate::building_blocks::frequency_table::band_centre_freqs;
use crate::building_blocks::hrir::HrirSet;
use crate::building_blocks::hrtf::HrtfSet;
use crate::building_blocks::layouts::wrap_azi;
use crate::building_blocks::{
    ChannelOrder, CodecStatus, DecoderConfig, DecoderSlot, DecodingMethod, DiffuseFieldEq,
    HrirSource, LoudspeakerArrayPreset, NormType, ProcessingStatus,
};
use crate::error::Result;
use crate::{
    FRAME_SIZE, HOP_SIZE, MAX_NUM_LOUDSPEAKERS, MAX_ORDER, MIN_NUM_LOUDSPEAKERS, NUM_BANDS,
    NUM_EARS,
};

pub const DEFAULT_TRANSITION_FREQ: f32 = 800.0;
pub const MIN_TRANSITION_FREQ: f32 = 500.0;
pub const MAX_TRANSITION_FREQ: f32 = 2000.0;

pub const DEFAULT_SAMPLERATE: f32 = 48000.0;
pub const MIN_SAMPLERATE: f32 = 8000.0;
pub const MAX_SAMPLERATE: f32 = 384000.0;

// how long to sleep while waiting for the audio thread
const WAIT_INTERVAL: Duration = Duration::from_millis(10);

/// the complete user configuration, as the controls see it
#[derive(Clone, Debug)]
pub(crate) struct DecoderSettings {
    samplerate: f32,
    num_loudspeakers: usize,
    loudspeaker_dirs_deg: [[f32; 2]; MAX_NUM_LOUDSPEAKERS],
    master_order: usize,
    band_orders: [usize; NUM_BANDS],
    slots: [DecoderConfig; 2],
    transition_freq: f32,
    binauralise: bool,
    use_default_hrirs: bool,
    hrir_path: Option<PathBuf>,
    preproc_hrirs: bool,
    ch_order: ChannelOrder,
    norm_type: NormType,
    // bumped by every change the HRTFs depend on
    hrtf_generation: u64,
}

/// clamps to the supported range, `None` for values that aren't a rate at all
fn sanitise_samplerate(samplerate: f32) -> Option<f32> {
    if samplerate.is_finite() && samplerate > 0.0 {
        Some(samplerate.clamp(MIN_SAMPLERATE, MAX_SAMPLERATE))
    } else {
        None
    }
}

impl DecoderSettings {
    fn new(samplerate: f32) -> Self {
        let samplerate = sanitise_samplerate(samplerate).unwrap_or_else(|| {
            log::warn!("invalid samplerate {samplerate}, using {DEFAULT_SAMPLERATE}");
            DEFAULT_SAMPLERATE
        });
        let mut settings = DecoderSettings {
            samplerate,
            num_loudspeakers: 0,
            loudspeaker_dirs_deg: [[0.0; 2]; MAX_NUM_LOUDSPEAKERS],
            master_order: 1,
            band_orders: [1; NUM_BANDS],
            slots: [
                DecoderConfig::default_for(DecoderSlot::Low),
                DecoderConfig::default_for(DecoderSlot::High),
            ],
            transition_freq: DEFAULT_TRANSITION_FREQ,
            binauralise: false,
            use_default_hrirs: true,
            hrir_path: None,
            preproc_hrirs: true,
            ch_order: ChannelOrder::Acn,
            norm_type: NormType::Sn3d,
            hrtf_generation: 0,
        };
        settings.load_preset(LoudspeakerArrayPreset::TDesign24);
        settings
    }

    fn load_preset(&mut self, preset: LoudspeakerArrayPreset) {
        let dirs = preset.dirs_deg();
        self.num_loudspeakers = dirs.len();
        for (slot, dir) in self.loudspeaker_dirs_deg.iter_mut().zip(dirs.iter()) {
            *slot = [dir[0] as f32, dir[1] as f32];
        }
    }

    fn hrir_source(&self) -> HrirSource {
        match &self.hrir_path {
            Some(path) if !self.use_default_hrirs => HrirSource::File(path.clone()),
            _ => HrirSource::Default,
        }
    }
}

/**
 * These are the controls, the part you use in your control (or GUI) thread
 * to configure the decoder and to trigger the (re-)initialisation.
 *
 * Setters that change the decoding matrices or the HRTFs mark the decoder
 * as not initialised, which mutes the output until `ensure_initialised()`
 * has been called.
 */
pub struct AmbiDecControls {
    settings: Mutex<DecoderSettings>,
    // the prepared HRTFs, with the settings generation they were made for
    hrtfs: Mutex<Option<(u64, Arc<HrtfSet>)>>,
    default_hrirs: fn(f32) -> HrirSet,
    last_error: Mutex<Option<String>>,
    status: Arc<CodecStatusBlock>,
    control_q_send: Sender<ControlMessage>,
    garbage_q_rec: Receiver<Box<RenderState>>,
}

impl AmbiDecControls {
    pub(crate) fn new(
        samplerate: f32,
        status: &Arc<CodecStatusBlock>,
        tx: Sender<ControlMessage>,
        garbage_rx: Receiver<Box<RenderState>>,
    ) -> AmbiDecControls {
        AmbiDecControls {
            settings: Mutex::new(DecoderSettings::new(samplerate)),
            hrtfs: Mutex::new(None),
            default_hrirs: HrirSet::default_set,
            last_error: Mutex::new(None),
            status: Arc::clone(status),
            control_q_send: tx,
            garbage_q_rec: garbage_rx,
        }
    }

    fn send(&self, msg: ControlMessage) {
        if self.control_q_send.try_send(msg).is_err() {
            log::warn!("control queue full or closed, message dropped");
        }
    }

    /// change the settings and mark the decoder as not initialised
    fn invalidate_with(&self, f: impl FnOnce(&mut DecoderSettings)) {
        f(&mut self.settings.lock());
        self.status.invalidate();
    }

    /// same, for anything that changes the HRTFs
    fn invalidate_hrtfs_with(&self, f: impl FnOnce(&mut DecoderSettings)) {
        self.invalidate_with(|s| {
            f(s);
            s.hrtf_generation += 1;
        });
    }

    /////////////////////
    // LAYOUT          //
    /////////////////////

    pub fn set_num_loudspeakers(&self, num: usize) {
        let num = num.clamp(MIN_NUM_LOUDSPEAKERS, MAX_NUM_LOUDSPEAKERS);
        self.invalidate_with(|s| s.num_loudspeakers = num);
    }

    pub fn set_loudspeaker_azi_deg(&self, idx: usize, azi_deg: f32) {
        if idx >= MAX_NUM_LOUDSPEAKERS {
            return;
        }
        // keep 180 as 180
        let azi = if azi_deg == 180.0 {
            azi_deg
        } else {
            wrap_azi(azi_deg as f64) as f32
        };
        self.invalidate_with(|s| s.loudspeaker_dirs_deg[idx][0] = azi);
    }

    pub fn set_loudspeaker_elev_deg(&self, idx: usize, elev_deg: f32) {
        if idx >= MAX_NUM_LOUDSPEAKERS {
            return;
        }
        let elev = elev_deg.clamp(-90.0, 90.0);
        self.invalidate_with(|s| s.loudspeaker_dirs_deg[idx][1] = elev);
    }

    pub fn set_output_config_preset(&self, preset: LoudspeakerArrayPreset) {
        self.invalidate_with(|s| s.load_preset(preset));
    }

    /////////////////////
    // DECODERS        //
    /////////////////////

    /// Sets the master order. All bands are reset to it.
    pub fn set_master_dec_order(&self, order: usize) {
        let order = order.clamp(1, MAX_ORDER);
        self.invalidate_with(|s| {
            s.master_order = order;
            s.band_orders = [order; NUM_BANDS];
        });
        self.send(ControlMessage::SetDecOrderAllBands(order));
    }

    /// Decoding order of a single band, clamped to the master order.
    pub fn set_dec_order(&self, band: usize, order: usize) {
        if band >= NUM_BANDS {
            return;
        }
        let order = {
            let mut settings = self.settings.lock();
            let order = order.clamp(1, settings.master_order);
            settings.band_orders[band] = order;
            order
        };
        self.send(ControlMessage::SetDecOrder(band, order));
    }

    pub fn set_dec_order_all_bands(&self, order: usize) {
        let order = {
            let mut settings = self.settings.lock();
            let order = order.clamp(1, settings.master_order);
            settings.band_orders = [order; NUM_BANDS];
            order
        };
        self.send(ControlMessage::SetDecOrderAllBands(order));
    }

    pub fn set_dec_method(&self, slot: DecoderSlot, method: DecodingMethod) {
        self.invalidate_with(|s| s.slots[slot.index()].method = method);
    }

    pub fn set_dec_enable_max_re(&self, slot: DecoderSlot, enable: bool) {
        self.invalidate_with(|s| s.slots[slot.index()].max_re = enable);
    }

    pub fn set_dec_norm_type(&self, slot: DecoderSlot, eq: DiffuseFieldEq) {
        self.invalidate_with(|s| s.slots[slot.index()].diffuse_eq = eq);
    }

    /// Bands below the transition frequency use the low-frequency decoder.
    pub fn set_transition_freq(&self, freq: f32) {
        let freq = freq.clamp(MIN_TRANSITION_FREQ, MAX_TRANSITION_FREQ);
        self.settings.lock().transition_freq = freq;
        self.send(ControlMessage::SetTransitionFreq(freq));
    }

    /////////////////////
    // BINAURAL        //
    /////////////////////

    pub fn set_binaurale_ls(&self, binauralise: bool) {
        self.invalidate_with(|s| s.binauralise = binauralise);
    }

    pub fn set_use_default_hrirs(&self, use_default: bool) {
        self.invalidate_hrtfs_with(|s| s.use_default_hrirs = use_default);
    }

    /// Use the HRIRs from the given file. If it can't be loaded,
    /// initialisation falls back to the default set.
    pub fn set_sofa_file_path<P: AsRef<Path>>(&self, path: P) {
        let path = path.as_ref().to_path_buf();
        self.invalidate_hrtfs_with(|s| {
            s.hrir_path = Some(path);
            s.use_default_hrirs = false;
        });
    }

    pub fn set_enable_hrirs_preproc(&self, enable: bool) {
        self.invalidate_hrtfs_with(|s| s.preproc_hrirs = enable);
    }

    /////////////////////
    // INPUT FORMAT    //
    /////////////////////

    pub fn set_ch_order(&self, ch_order: ChannelOrder) {
        self.settings.lock().ch_order = ch_order;
        self.send(ControlMessage::SetChannelOrder(ch_order));
    }

    pub fn set_norm_type(&self, norm_type: NormType) {
        self.settings.lock().norm_type = norm_type;
        self.send(ControlMessage::SetNormType(norm_type));
    }

    /// Clamped to 8kHz to 384kHz. Values that aren't a valid rate are ignored.
    pub fn set_samplerate(&self, samplerate: f32) {
        match sanitise_samplerate(samplerate) {
            Some(samplerate) => self.invalidate_hrtfs_with(|s| s.samplerate = samplerate),
            None => log::warn!("ignoring invalid samplerate {samplerate}"),
        }
    }

    /////////////////////
    // INITIALISATION  //
    /////////////////////

    /**
     * Computes everything the current configuration needs and hands it
     * over to the playhead. Does nothing if the decoder is already
     * initialised, or if another thread is initialising it right now.
     *
     * Only fails if not even the default HRTFs could be prepared, in which
     * case the decoder stays muted and the error is also kept in `last_error()`.
     */
    pub fn ensure_initialised(&self) -> Result<()> {
        // drop retired render states
        self.garbage_q_rec.try_iter().for_each(drop);

        if !self.status.try_begin_init() {
            return Ok(());
        }

        self.status.set_progress(InitStage::ComputingDecoders, 0.0);

        // let the block in flight finish
        while self.status.processing_status() == ProcessingStatus::Ongoing {
            std::thread::sleep(WAIT_INTERVAL);
        }

        let settings = self.settings.lock().clone();
        let num_ls = settings.num_loudspeakers;
        let dirs: Vec<[f64; 2]> = settings.loudspeaker_dirs_deg[..num_ls]
            .iter()
            .map(|d| [d[0] as f64, d[1] as f64])
            .collect();

        log::info!(
            "initialising decoder: {num_ls} loudspeakers, order {}, {:?}/{:?}",
            settings.master_order,
            settings.slots[0].method,
            settings.slots[1].method
        );

        let decoders = synthesise_decoders(&dirs, settings.master_order, &settings.slots, |p| {
            self.status.set_progress(InitStage::ComputingDecoders, 0.5 * p)
        });

        self.status.set_progress(InitStage::PreparingHrtfs, 0.5);
        let hrtfs = match self.prepared_hrtfs(&settings) {
            Ok(hrtfs) => hrtfs,
            Err(e) => {
                log::error!("couldn't prepare any HRTFs: {e}");
                *self.last_error.lock() = Some(e.to_string());
                self.status.abort_init();
                self.status.set_progress(InitStage::Idle, 0.0);
                return Err(e);
            }
        };
        *self.last_error.lock() = None;

        self.status.set_progress(InitStage::Publishing, 0.9);

        // configuration changed in the meantime, this one is stale already
        if self.status.codec_status() != CodecStatus::Initialising {
            log::info!("configuration changed while initialising, discarding");
            self.status.set_progress(InitStage::Idle, 0.0);
            return Ok(());
        }

        let state = Box::new(RenderState {
            generation: self.status.next_generation(),
            loudspeaker_dirs_deg: settings.loudspeaker_dirs_deg[..num_ls].to_vec(),
            master_order: settings.master_order,
            slots: settings.slots,
            decoders,
            hrtfs: if settings.binauralise {
                Some(hrtfs)
            } else {
                None
            },
            freqs: band_centre_freqs(settings.samplerate),
        });

        if self
            .control_q_send
            .try_send(ControlMessage::NewRenderState(state))
            .is_err()
        {
            log::warn!("couldn't hand over the render state, control queue full or closed");
            self.status.abort_init();
            self.status.set_progress(InitStage::Idle, 0.0);
            return Ok(());
        }

        // publish last
        if self.status.try_finish_init() {
            self.status.set_progress(InitStage::Done, 1.0);
            log::info!("decoder initialised");
        } else {
            self.status.set_progress(InitStage::Idle, 0.0);
        }

        Ok(())
    }

    /// the cached HRTFs, re-prepared unless they were made for this very settings snapshot
    fn prepared_hrtfs(&self, settings: &DecoderSettings) -> Result<Arc<HrtfSet>> {
        let mut cached = self.hrtfs.lock();

        if let Some((generation, hrtfs)) = cached.as_ref() {
            if *generation == settings.hrtf_generation {
                return Ok(Arc::clone(hrtfs));
            }
        }

        let hrtfs = HrtfSet::prepare_with_default(
            &settings.hrir_source(),
            settings.samplerate,
            settings.preproc_hrirs,
            self.default_hrirs,
        )?;

        log::info!(
            "prepared {} HRTFs{}",
            hrtfs.num_dirs(),
            if hrtfs.using_default_hrirs() {
                " (default set)"
            } else {
                ""
            }
        );

        let hrtfs = Arc::new(hrtfs);
        *cached = Some((settings.hrtf_generation, Arc::clone(&hrtfs)));
        Ok(hrtfs)
    }

    /////////////////////
    // GETTERS         //
    /////////////////////

    pub fn codec_status(&self) -> CodecStatus {
        self.status.codec_status()
    }

    pub fn progress(&self) -> f32 {
        self.status.progress()
    }

    pub fn progress_text(&self) -> String {
        self.status.stage().text().to_string()
    }

    /// the fatal error of the last initialisation attempt, if any
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn processing_delay(&self) -> usize {
        FRAME_SIZE + HOP_SIZE
    }

    pub fn samplerate(&self) -> f32 {
        self.settings.lock().samplerate
    }

    pub fn band_centre_freqs(&self) -> &'static [f32; NUM_BANDS] {
        band_centre_freqs(self.samplerate())
    }

    pub fn num_loudspeakers(&self) -> usize {
        self.settings.lock().num_loudspeakers
    }

    pub fn loudspeaker_azi_deg(&self, idx: usize) -> f32 {
        self.settings.lock().loudspeaker_dirs_deg[idx.min(MAX_NUM_LOUDSPEAKERS - 1)][0]
    }

    pub fn loudspeaker_elev_deg(&self, idx: usize) -> f32 {
        self.settings.lock().loudspeaker_dirs_deg[idx.min(MAX_NUM_LOUDSPEAKERS - 1)][1]
    }

    pub fn master_dec_order(&self) -> usize {
        self.settings.lock().master_order
    }

    pub fn dec_order(&self, band: usize) -> usize {
        self.settings.lock().band_orders[band.min(NUM_BANDS - 1)]
    }

    pub fn dec_method(&self, slot: DecoderSlot) -> DecodingMethod {
        self.settings.lock().slots[slot.index()].method
    }

    pub fn dec_enable_max_re(&self, slot: DecoderSlot) -> bool {
        self.settings.lock().slots[slot.index()].max_re
    }

    pub fn dec_norm_type(&self, slot: DecoderSlot) -> DiffuseFieldEq {
        self.settings.lock().slots[slot.index()].diffuse_eq
    }

    pub fn transition_freq(&self) -> f32 {
        self.settings.lock().transition_freq
    }

    pub fn binaurale_ls(&self) -> bool {
        self.settings.lock().binauralise
    }

    pub fn use_default_hrirs(&self) -> bool {
        self.settings.lock().use_default_hrirs
    }

    pub fn sofa_file_path(&self) -> Option<PathBuf> {
        self.settings.lock().hrir_path.clone()
    }

    pub fn enable_hrirs_preproc(&self) -> bool {
        self.settings.lock().preproc_hrirs
    }

    pub fn ch_order(&self) -> ChannelOrder {
        self.settings.lock().ch_order
    }

    pub fn norm_type(&self) -> NormType {
        self.settings.lock().norm_type
    }

    /// loudspeakers, or ears when binauralising
    pub fn num_outputs(&self) -> usize {
        let settings = self.settings.lock();
        if settings.binauralise {
            NUM_EARS
        } else {
            settings.num_loudspeakers
        }
    }

    pub fn num_ears(&self) -> usize {
        NUM_EARS
    }

    /// whether the prepared HRTFs are the default ones (also after a fallback)
    pub fn using_default_hrirs(&self) -> bool {
        self.hrtfs
            .lock()
            .as_ref()
            .map(|(_, h)| h.using_default_hrirs())
            .unwrap_or(true)
    }

    pub fn num_hrirs(&self) -> usize {
        self.hrtfs
            .lock()
            .as_ref()
            .map(|(_, h)| h.num_dirs())
            .unwrap_or(0)
    }

    pub fn hrir_samplerate(&self) -> Option<f32> {
        self.hrtfs.lock().as_ref().map(|(_, h)| h.hrir_samplerate())
    }
}

impl Drop for AmbiDecControls {
    fn drop(&mut self) {
        // don't pull the rug from under an initialisation or an audio block
        while self.status.codec_status() == CodecStatus::Initialising
            || self.status.processing_status() == ProcessingStatus::Ongoing
        {
            std::thread::sleep(WAIT_INTERVAL);
        }
    }
}
