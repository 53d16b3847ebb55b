pub mod device;
pub mod output;
pub mod pcm;
pub mod playback;
pub mod thread;

// Public API
pub use device::{OutputDeviceInfo, OutputDeviceSelector};
pub use output::{CpalOutput, OutputBackend};
pub use pcm::PcmAudio;
pub use playback::{PlaybackEngine, PlaybackSnapshot, PlaybackStats};
pub use thread::{PlaybackHandle, PlaybackThread};
