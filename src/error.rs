use thiserror::Error;

/// Errors that can come up while preparing a decoder configuration.
/// None of these ever reach the audio thread, which simply mutes.
#[derive(Debug, Error)]
pub enum AmbiDecError {
    #[error("couldn't read HRIR file: {0}")]
    HrirIo(#[from] std::io::Error),

    #[error("invalid HRIR file: {0}")]
    InvalidHrirFile(String),

    #[error("HRIR set needs at least 4 directions, got {0}")]
    TooFewDirections(usize),

    #[error("HRTF interpolation table generation failed: {0}")]
    HrtfTableGeneration(String),

    #[error("triangulation failed: {0}")]
    Triangulation(String),
}

pub type Result<T> = std::result::Result<T, AmbiDecError>;
