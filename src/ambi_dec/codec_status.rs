use crossbeam::atomic::AtomicCell;

use crate::building_blocks::{CodecStatus, ProcessingStatus};

/// what the initialisation is currently busy with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitStage {
    Idle,
    ComputingDecoders,
    PreparingHrtfs,
    Publishing,
    Done,
}

impl InitStage {
    pub fn text(self) -> &'static str {
        match self {
            InitStage::Idle => "Idle",
            InitStage::ComputingDecoders => "Computing decoding matrices",
            InitStage::PreparingHrtfs => "Preparing HRTFs",
            InitStage::Publishing => "Handing over to the audio thread",
            InitStage::Done => "Done!",
        }
    }
}

/**
 * The status flags shared between the controls and the playhead.
 * The codec status guards the render state, the processing status
 * tells whether an audio block is in flight.
 */
pub struct CodecStatusBlock {
    codec_status: AtomicCell<CodecStatus>,
    processing_status: AtomicCell<ProcessingStatus>,
    progress: AtomicCell<f32>,
    stage: AtomicCell<InitStage>,
    generation: AtomicCell<u64>, // number of render states built so far
}

impl Default for CodecStatusBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecStatusBlock {
    pub fn new() -> Self {
        CodecStatusBlock {
            codec_status: AtomicCell::new(CodecStatus::NotInitialised),
            processing_status: AtomicCell::new(ProcessingStatus::NotOngoing),
            progress: AtomicCell::new(0.0),
            stage: AtomicCell::new(InitStage::Idle),
            generation: AtomicCell::new(0),
        }
    }

    pub fn codec_status(&self) -> CodecStatus {
        self.codec_status.load()
    }

    /// called by every setter that makes the current render state stale
    pub fn invalidate(&self) {
        self.codec_status.store(CodecStatus::NotInitialised);
    }

    /// NotInitialised -> Initialising. Returns false if someone else is
    /// already on it, or there's nothing to do.
    pub fn try_begin_init(&self) -> bool {
        self.codec_status
            .compare_exchange(CodecStatus::NotInitialised, CodecStatus::Initialising)
            .is_ok()
    }

    /// Initialising -> Initialised. Fails if the configuration
    /// changed while initialising.
    pub fn try_finish_init(&self) -> bool {
        self.codec_status
            .compare_exchange(CodecStatus::Initialising, CodecStatus::Initialised)
            .is_ok()
    }

    /// Initialising -> NotInitialised, after a failed initialisation
    pub fn abort_init(&self) {
        let _ = self
            .codec_status
            .compare_exchange(CodecStatus::Initialising, CodecStatus::NotInitialised);
    }

    pub fn processing_status(&self) -> ProcessingStatus {
        self.processing_status.load()
    }

    pub fn set_processing_status(&self, status: ProcessingStatus) {
        self.processing_status.store(status);
    }

    pub fn set_progress(&self, stage: InitStage, progress: f32) {
        self.stage.store(stage);
        self.progress.store(progress.clamp(0.0, 1.0));
    }

    pub fn progress(&self) -> f32 {
        self.progress.load()
    }

    pub fn stage(&self) -> InitStage {
        self.stage.load()
    }

    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1) + 1
    }

    pub fn generation(&self) -> u64 {
        self.generation.load()
    }
}
