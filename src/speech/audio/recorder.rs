mod file;
mod pipewire;

use std::{
    path::Path,
    sync::{Arc, Mutex, mpsc::Receiver},
};

use file::FileAudioRecorder;
use pipewire::PipewireAudioRecorder;

use crate::logger::Logger;

use super::{StopTrigger, format::SoundSpec};

pub type ListenResult = anyhow::Result<(Receiver<Vec<u8>>, StopTrigger, Option<SoundSpec>)>;

pub struct AudioRecorder(AudioRecorderImpl);

impl AudioRecorder {
    /// Pick the audio source: a sample file when one is configured, the
    /// system microphone otherwise. Microphone support is probed here, so a
    /// machine without a capture device fails before any session starts.
    pub fn new(logger: Arc<Mutex<dyn Logger>>, from_file: Option<&Path>) -> anyhow::Result<Self> {
        match from_file {
            Some(path) => Ok(Self(AudioRecorderImpl::SampleFile(FileAudioRecorder::new(
                path,
            )))),
            None => Ok(Self(AudioRecorderImpl::Pipewire(
                PipewireAudioRecorder::new(logger)?,
            ))),
        }
    }

    pub fn listen(&mut self, request_format: Option<SoundSpec>) -> ListenResult {
        self.0.listen(request_format)
    }
}

enum AudioRecorderImpl {
    Pipewire(PipewireAudioRecorder),
    SampleFile(FileAudioRecorder),
}

impl AudioRecorderImpl {
    fn listen(&mut self, request_format: Option<SoundSpec>) -> ListenResult {
        match self {
            Self::Pipewire(rec) => rec.listen(request_format),
            Self::SampleFile(rec) => rec.listen(request_format),
        }
    }
}
