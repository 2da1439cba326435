//! The three long-lived threads of a playback session

mod audio;
mod demux;
mod video;

pub(crate) use audio::AudioWorker;
pub(crate) use demux::DemuxWorker;
pub(crate) use video::VideoWorker;
