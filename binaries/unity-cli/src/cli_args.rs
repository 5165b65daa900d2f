use std::{fmt, path::PathBuf};

use clap::{Parser, ValueEnum};
use color_eyre::eyre::{Result, WrapErr};
use fairseq2::{LoadProgress, Model, ModelArchitecture, ModelLoader, ModelParameters};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub enum Args {
    #[command()]
    /// Print the hyperparameters and the tensors of a checkpoint.
    Info(Box<Info>),

    #[command()]
    /// Load a checkpoint and prepare an audio file as its input.
    Run(Box<Run>),
}

#[derive(Parser, Debug)]
pub struct Info {
    #[command(flatten)]
    pub model_load: ModelLoad,
}

#[derive(Parser, Debug)]
pub struct Run {
    #[command(flatten)]
    pub model_load: ModelLoad,

    /// The WAV file to translate. Expected to be sampled at 16 kHz.
    #[arg(long, short = 'a')]
    pub audio_path: PathBuf,

    /// The task to perform.
    #[arg(long, value_enum, default_value_t = Task::S2tt)]
    pub task: Task,

    /// The language to translate into, as a three-letter code.
    #[arg(long, default_value = "eng")]
    pub tgt_lang: String,

    /// The language of the input, as a three-letter code. Required for text input.
    #[arg(long)]
    pub src_lang: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ModelLoad {
    /// Where to load the model from
    #[arg(long, short = 'm')]
    pub model_path: PathBuf,

    /// The architecture of the model.
    #[arg(long, default_value = "unity")]
    pub architecture: ModelArchitecture,

    /// Don't use mmap to load the model.
    #[arg(long)]
    pub no_mmap: bool,
}
impl ModelLoad {
    pub fn load<L: ModelLoader>(&self) -> Result<Model<L>> {
        let params = ModelParameters {
            prefer_mmap: !self.no_mmap,
        };

        let mut sp = Some(spinoff::Spinner::new(
            spinoff::spinners::Dots2,
            "Loading model...",
            None,
        ));
        let now = std::time::Instant::now();
        let mut prev_load_time = now;

        let model = fairseq2::load::<L>(&self.model_path, params, |progress| match progress {
            LoadProgress::HyperparametersLoaded => {
                if let Some(sp) = sp.as_mut() {
                    sp.update_text("Loaded hyperparameters")
                };
            }
            LoadProgress::ContextSize { bytes } => tracing::debug!(
                "ggml ctx size = {}",
                bytesize::to_string(bytes as u64, false)
            ),
            LoadProgress::TensorsAllocated { tensor_count } => {
                tracing::debug!("Allocated {tensor_count} tensors")
            }
            LoadProgress::TensorLoaded {
                current_tensor,
                tensor_count,
            } => {
                if prev_load_time.elapsed().as_millis() > 500 {
                    // Re-rendering on every message keeps resetting the spinner.
                    if let Some(sp) = sp.as_mut() {
                        sp.update_text(format!(
                            "Loaded tensor {}/{tensor_count}",
                            current_tensor + 1,
                        ));
                    };
                    prev_load_time = std::time::Instant::now();
                }
            }
            LoadProgress::Loaded {
                file_size,
                tensor_count,
            } => {
                if let Some(sp) = sp.take() {
                    sp.success(&format!(
                        "Loaded {tensor_count} tensors ({}) after {}ms",
                        bytesize::to_string(file_size, false),
                        now.elapsed().as_millis()
                    ));
                };
            }
        })
        .wrap_err("Could not load model");

        if model.is_err() {
            // If we've failed at loading the model, we probably haven't stopped the spinner yet.
            // Cancel it now if needed.
            if let Some(sp) = sp {
                sp.fail("Failed to load model")
            }
        }

        model
    }
}

/// What a [Task] consumes or produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Modality {
    Speech,
    Text,
}
impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Speech => write!(f, "speech"),
            Modality::Text => write!(f, "text"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Task {
    /// Speech to speech translation.
    S2st,
    /// Speech to text translation.
    S2tt,
    /// Text to speech translation.
    T2st,
    /// Text to text translation.
    T2tt,
    /// Automatic speech recognition.
    Asr,
}
impl Task {
    pub fn input_modality(self) -> Modality {
        match self {
            Task::S2st | Task::S2tt | Task::Asr => Modality::Speech,
            Task::T2st | Task::T2tt => Modality::Text,
        }
    }

    pub fn output_modality(self) -> Modality {
        match self {
            Task::S2st | Task::T2st => Modality::Speech,
            Task::S2tt | Task::T2tt | Task::Asr => Modality::Text,
        }
    }
}
impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::S2st => write!(f, "S2ST"),
            Task::S2tt => write!(f, "S2TT"),
            Task::T2st => write!(f, "T2ST"),
            Task::T2tt => write!(f, "T2TT"),
            Task::Asr => write!(f, "ASR"),
        }
    }
}
