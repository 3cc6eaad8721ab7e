use std::fmt::Display;

#[derive(Clone, PartialEq, Eq)]
pub enum SoundSpec {
    PCM {
        format: PCMFormat,
        sample_rate_hz: u32,
        num_channels: u32,
    },
}

impl SoundSpec {
    /// The input the realtime transcription endpoint requires: 16-bit
    /// little-endian PCM at 24 kHz, mono.
    #[must_use]
    pub fn realtime_input() -> Self {
        Self::PCM {
            format: PCMFormat::S16LE,
            sample_rate_hz: 24000,
            num_channels: 1,
        }
    }

    #[must_use]
    pub fn bytes_per_second(&self) -> u32 {
        match self {
            Self::PCM {
                format,
                sample_rate_hz,
                num_channels,
            } => format.bytes_per_sample() * sample_rate_hz * num_channels,
        }
    }
}

impl Display for SoundSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Audio format [")?;
        match self {
            Self::PCM {
                format,
                sample_rate_hz,
                num_channels,
            } => {
                f.write_str(&format!("{format}, "))?;
                f.write_str(&format!("{sample_rate_hz} Hz, "))?;
                f.write_str(&format!("{num_channels} channels"))?;
            }
        }
        f.write_str("]")
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PCMFormat {
    S16LE,
}

impl PCMFormat {
    #[must_use]
    pub fn bytes_per_sample(self) -> u32 {
        match self {
            PCMFormat::S16LE => 2,
        }
    }
}

impl Display for PCMFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_str = match self {
            PCMFormat::S16LE => "s16le",
        };
        f.write_str(fmt_str)
    }
}
