use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use viva_coach::logger::ConsoleLogger;
use viva_coach::speech::audio::format::SoundSpec;
use viva_coach::speech::audio::recorder::AudioRecorder;

// Records five seconds of microphone audio in the format the transcription
// backend expects, and writes it to output.pcm. Point VIVA_COACH__AUDIO_FILE
// at the result to run practice sessions without a microphone.

fn main() -> anyhow::Result<()> {
    let logger = Arc::new(Mutex::new(ConsoleLogger::new()));

    let mut rec = AudioRecorder::new(logger, None)?;

    let (receiver, stop, _negotiated) = rec.listen(Some(SoundSpec::realtime_input()))?;
    thread::sleep(Duration::from_secs(5));
    stop.stop();

    let mut bytes: Vec<u8> = Vec::new();
    let mut total_bytes = 0;
    for chunk in receiver {
        total_bytes += chunk.len();
        bytes.extend(chunk);
    }

    #[allow(clippy::cast_precision_loss)]
    let total_mb = total_bytes as f32 / 1_000_000.0;

    println!("Total bytes received: {total_bytes} bytes ({total_mb:.2} MB)");

    // can be played back using
    //     ffplay -autoexit -f s16le -ar 24000 -ac 1 output.pcm
    let output_path = "output.pcm";

    let mut file = File::create(output_path)?;
    file.write_all(&bytes)?;

    Ok(())
}
