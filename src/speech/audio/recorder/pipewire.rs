use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
    time::Duration,
};

use anyhow::{Context as AnyhowContext, anyhow};
use pipewire::spa::param::audio::{AudioFormat as PwAudioFormat, AudioInfoRaw};
use pipewire::{context::Context, main_loop::MainLoop, spa, stream::StreamRef};
use spa::pod::serialize::PodSerializer;

use crate::{
    logger::Logger,
    speech::audio::{
        StopTrigger,
        format::{PCMFormat, SoundSpec},
    },
};

use super::ListenResult;

struct StreamUserData {}

pub struct PipewireAudioRecorder {
    logger: Arc<Mutex<dyn Logger>>,
}

impl PipewireAudioRecorder {
    /// Probing connects to the daemon once and drops the connection again;
    /// machines without working PipeWire fail here instead of mid-session.
    pub fn new(logger: Arc<Mutex<dyn Logger>>) -> anyhow::Result<Self> {
        probe_capture_support()?;
        Ok(Self { logger })
    }

    pub fn listen(&mut self, request_format: Option<SoundSpec>) -> ListenResult {
        let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>();
        let (quit_tx, quit_rx) = pipewire::channel::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<()>>();
        let (spec_tx, spec_rx) = mpsc::channel::<SoundSpec>();

        let logger = self.logger.clone();
        thread::spawn(move || {
            if let Err(err) =
                run_capture_loop(&ready_tx, quit_rx, audio_tx, spec_tx, logger, request_format)
            {
                let _ = ready_tx.send(Err(err));
            }
        });

        ready_rx
            .recv()
            .context("The capture thread ended before reporting readiness")??;

        // The format callback only runs once the loop is live, so the
        // negotiated spec arrives after the readiness handshake.
        let negotiated = spec_rx
            .recv_timeout(Duration::from_secs(5))
            .context("Timed out waiting for the audio stream format")?;

        let (out_tx, out_rx) = mpsc::channel();
        let trigger = StopTrigger::new();

        let trigger_for_thread = trigger.clone();
        thread::spawn(move || {
            forward_until_stopped(&audio_rx, &out_tx, &trigger_for_thread);
            // Capture is over; tell the PipeWire loop to quit as well.
            let _ = quit_tx.send(());
        });

        Ok((out_rx, trigger, Some(negotiated)))
    }
}

fn probe_capture_support() -> anyhow::Result<()> {
    let mainloop = MainLoop::new(None)
        .context("Speech capture is unavailable: failed to initialize the PipeWire main loop")?;
    let context = Context::new(&mainloop)
        .context("Speech capture is unavailable: failed to create a PipeWire context")?;
    context
        .connect(None)
        .context("Speech capture is unavailable: could not connect to the PipeWire daemon")?;
    Ok(())
}

fn forward_until_stopped(
    source: &mpsc::Receiver<Vec<u8>>,
    sink: &mpsc::Sender<Vec<u8>>,
    trigger: &StopTrigger,
) {
    while !trigger.has_stopped() {
        match source.recv_timeout(Duration::from_millis(20)) {
            Ok(data) => {
                if sink.send(data).is_err() {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Body of the capture thread. Reports setup success or failure over `ready`
/// exactly once, just before entering the main loop; the loop then runs until
/// a quit message arrives.
fn run_capture_loop(
    ready: &mpsc::Sender<anyhow::Result<()>>,
    quit: pipewire::channel::Receiver<()>,
    audio_tx: mpsc::Sender<Vec<u8>>,
    spec_tx: mpsc::Sender<SoundSpec>,
    logger: Arc<Mutex<dyn Logger>>,
    request_format: Option<SoundSpec>,
) -> anyhow::Result<()> {
    let mainloop = MainLoop::new(None).context("Failed to initialize the PipeWire main loop")?;
    let context = Context::new(&mainloop).context("Failed to create a PipeWire context")?;
    let core = context
        .connect(None)
        .context("Could not connect to the PipeWire daemon")?;

    let _quit_watch = quit.attach(mainloop.loop_(), {
        let mainloop = mainloop.clone();
        move |()| mainloop.quit()
    });

    /* Make one parameter with the supported formats. The SPA_PARAM_EnumFormat
     * id means that this is a format enumeration (of 1 value). Without a
     * requested format we leave the fields empty and accept the native graph
     * rate and channels. */
    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    if let Some(SoundSpec::PCM {
        format,
        sample_rate_hz,
        num_channels,
    }) = request_format
    {
        let pw_format = match format {
            PCMFormat::S16LE => PwAudioFormat::S16LE,
        };
        audio_info.set_format(pw_format);
        audio_info.set_rate(sample_rate_hz);
        audio_info.set_channels(num_channels);
    }
    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };
    let values = PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|_| anyhow!("Could not serialize the requested audio format"))?
    .0
    .into_inner();

    let mut params = [spa::pod::Pod::from_bytes(&values)
        .ok_or_else(|| anyhow!("Could not build the audio format parameter"))?];

    let properties = pipewire::properties::properties! {
        *pipewire::keys::MEDIA_TYPE => "Audio",
        *pipewire::keys::MEDIA_CATEGORY => "Capture",
        *pipewire::keys::MEDIA_ROLE => "Communication",
    };
    let stream = pipewire::stream::Stream::new(&core, "speech-capture", properties)
        .context("Failed to create the capture stream")?;

    stream
        .connect(
            spa::utils::Direction::Input,
            None,
            pipewire::stream::StreamFlags::AUTOCONNECT
                | pipewire::stream::StreamFlags::MAP_BUFFERS
                | pipewire::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .context("Failed to connect the capture stream")?;

    let listener = stream.add_local_listener_with_user_data(StreamUserData {});
    let listener = add_param_changed_callback(listener, spec_tx, logger.clone());
    let listener = add_process_callback(listener, audio_tx, logger);
    // listener must outlive the main loop
    let _listener = listener
        .register()
        .context("Failed to register the stream listener")?;

    ready.send(Ok(())).ok();
    mainloop.run();

    Ok(())
}

fn add_param_changed_callback(
    listener: pipewire::stream::ListenerLocalBuilder<'_, StreamUserData>,
    spec_tx: mpsc::Sender<SoundSpec>,
    logger: Arc<Mutex<dyn Logger>>,
) -> pipewire::stream::ListenerLocalBuilder<'_, StreamUserData> {
    listener.param_changed(move |_stream, _user_data, id, param| {
        // param == None means to clear the format
        let Some(param) = param else {
            return;
        };
        if id != spa::param::ParamType::Format.as_raw() {
            return;
        }

        let Ok((media_type, media_subtype)) = spa::param::format_utils::parse_format(param) else {
            return;
        };

        // only accept raw audio
        if media_type != spa::param::format::MediaType::Audio
            || media_subtype != spa::param::format::MediaSubtype::Raw
        {
            return;
        }

        let mut audio_info = AudioInfoRaw::default();
        if audio_info.parse(param).is_err() {
            logger
                .lock()
                .unwrap()
                .warn("Could not parse the negotiated audio format");
            return;
        }

        let format = match audio_info.format() {
            PwAudioFormat::S16LE => PCMFormat::S16LE,
            other => {
                // No spec is reported; the caller times out and fails the
                // capture start instead of transcribing garbage.
                logger
                    .lock()
                    .unwrap()
                    .warn(&format!("Device negotiated unsupported format {other:?}"));
                return;
            }
        };
        let sample_rate_hz = audio_info.rate();
        let num_channels = audio_info.channels();
        let _ = spec_tx.send(SoundSpec::PCM {
            format,
            sample_rate_hz,
            num_channels,
        });
    })
}

fn add_process_callback(
    listener: pipewire::stream::ListenerLocalBuilder<'_, StreamUserData>,
    audio_tx: mpsc::Sender<Vec<u8>>,
    logger: Arc<Mutex<dyn Logger>>,
) -> pipewire::stream::ListenerLocalBuilder<'_, StreamUserData> {
    listener.process(move |stream: &StreamRef, _user_data: &mut StreamUserData| {
        let Some(mut buf) = stream.dequeue_buffer() else {
            logger.lock().unwrap().error("Capture stream produced no buffer");
            return;
        };

        for data in buf.datas_mut() {
            let chunk = data.chunk();
            let data_from = chunk.offset() as usize;
            let data_to = data_from + chunk.size() as usize;

            let bytes: &[u8] = data.data().unwrap_or(&mut []);
            let bytes: &[u8] = &bytes[data_from..data_to];

            if audio_tx.send(bytes.to_vec()).is_err() {
                // receiver side has shut down; the quit message follows shortly
                return;
            }
        }
    })
}
