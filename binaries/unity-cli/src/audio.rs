use std::path::Path;

use color_eyre::eyre::{self, WrapErr};
use fairseq2::{
    ggml::{format::tensor_size, Context, Tensor},
    ElementType,
};

/// The sample rate the speech encoder was trained on.
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples are fed to the filter bank in 16-bit range.
const WAVEFORM_SCALE: f32 = (1 << 15) as f32;

/// A mono waveform, scaled to 16-bit range.
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decodes a WAV file, averaging its channels into one.
pub fn read_wav(path: &Path) -> eyre::Result<Waveform> {
    let mut reader = hound::WavReader::open(path)
        .wrap_err_with(|| format!("Could not read WAV file {}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_rate != SAMPLE_RATE {
        tracing::warn!(
            "{} is sampled at {} Hz, expected {SAMPLE_RATE} Hz",
            path.display(),
            spec.sample_rate
        );
    }

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            if !(1..=32).contains(&spec.bits_per_sample) {
                eyre::bail!("Unsupported bits per sample: {}", spec.bits_per_sample);
            }
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_value))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let samples = samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32 * WAVEFORM_SCALE)
        .collect();

    Ok(Waveform {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Copies `waveform` into an `f32` tensor in a context of its own.
pub fn input_tensor(waveform: &Waveform) -> eyre::Result<(Context, Tensor)> {
    let n_samples = waveform.samples.len();
    if n_samples == 0 {
        eyre::bail!("The audio file has no samples");
    }

    let context = Context::new_with_allocate(tensor_size(ElementType::F32, n_samples));
    let mut tensor = context
        .new_tensor_1d(ElementType::F32, n_samples)?
        .set_name("input_waveform");
    let data = waveform
        .samples
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect::<Vec<u8>>();
    tensor.write_data(&data);

    Ok((context, tensor))
}
