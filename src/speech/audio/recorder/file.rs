use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::speech::audio::StopTrigger;
use crate::speech::audio::format::SoundSpec;

use super::ListenResult;

const CHUNK_SIZE: usize = 4096;

/// An audio "recorder" that replays raw PCM from a file, paced to the rate
/// the audio would take to speak. Useful for exercising the pipeline on
/// machines without a microphone.
pub struct FileAudioRecorder {
    path: PathBuf,
}

impl FileAudioRecorder {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn listen(&mut self, request_format: Option<SoundSpec>) -> ListenResult {
        let f = File::open(&self.path)?;

        // The file is assumed to already contain audio in the requested
        // format; there is nothing to negotiate.
        let spec = request_format.unwrap_or_else(SoundSpec::realtime_input);
        #[allow(clippy::cast_precision_loss)]
        let chunk_pause =
            Duration::from_secs_f64(CHUNK_SIZE as f64 / f64::from(spec.bytes_per_second()));

        let (sender, receiver) = mpsc::channel();
        let trigger = StopTrigger::new();

        let trigger_for_thread = trigger.clone();
        thread::spawn(move || {
            let mut reader = BufReader::new(f);
            let mut buf = [0u8; CHUNK_SIZE];

            while !trigger_for_thread.has_stopped() {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(count) => {
                        if sender.send(buf[..count].to_vec()).is_err() {
                            break;
                        }
                        thread::sleep(chunk_pause);
                    }
                }
            }
        });

        Ok((receiver, trigger, Some(spec)))
    }
}
