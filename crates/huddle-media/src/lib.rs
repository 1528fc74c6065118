//! Capture devices and codecs as seen by the network layer.
//!
//! Cameras, screen grabbers, microphones, speakers and the video codec are
//! external collaborators. This crate pins down the traits the client
//! workers call and ships small stand-ins for hosts without the real thing.

pub mod audio;
pub mod video;

pub use audio::{
    AudioConfig, AudioError, AudioSink, AudioSource, NullSink, SilenceSource, UnavailableInput,
    UnavailableOutput,
};
pub use video::{
    FrameCodec, FrameSource, RawCodec, StillSource, UnavailableSource, VideoConfig, VideoError,
    VideoFrame,
};
