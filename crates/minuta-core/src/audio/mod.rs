//! Audio conditioning, chunking and quality analysis.

pub mod chunker;
pub mod preprocess;
pub mod quality;
pub mod wav;

pub use chunker::split;
pub use preprocess::{Preprocessor, TARGET_SAMPLE_RATE, WavPreprocessor};
pub use quality::{MIN_LEARNING_QUALITY, audio_quality};
pub use wav::{WavData, read_wav, wav_duration_sec, write_wav_mono};
