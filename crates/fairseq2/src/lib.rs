//! This crate loads [fairseq2](https://github.com/facebookresearch/fairseq2) checkpoints
//! stored in the ggml container format. The following architectures are supported:
//!
//! - [UnitY](fairseq2_unity), the SeamlessM4T speech and text translation model
//!
//! Loading only materializes the weights; running the model is up to the caller.
//!
//! # Example
//!
//! ```no_run
//! // load a UnitY checkpoint from disk
//! let model = fairseq2::load::<fairseq2::models::Unity>(
//!     // path to the checkpoint
//!     std::path::Path::new("/path/to/checkpoint.ggml"),
//!     // fairseq2::ModelParameters
//!     Default::default(),
//!     // load progress callback
//!     fairseq2::load_progress_callback_stdout,
//! )
//! .unwrap_or_else(|err| panic!("Failed to load model: {err}"));
//!
//! for (name, tensor) in model.tensors().iter() {
//!     println!("{name}: {:?}", tensor.dims());
//! }
//! ```
#![deny(missing_docs)]

use std::{fmt::Display, str::FromStr};

pub use fairseq2_base::{
    ggml, ggml::format as ggml_format, load, load_from_reader, load_progress_callback_stdout,
    save, util, ElementType, Hyperparameters, LoadError, LoadProgress, Model, ModelLoader,
    ModelParameters, SaveError, TensorTable,
};

use serde::Serialize;

macro_rules! define_models {
    ($(($model_lowercase:ident, $model_lowercase_str:literal, $model_pascalcase:ident, $krate_ident:ident, $display_name:literal)),*) => {
        /// All available models.
        pub mod models {
            $(
                #[cfg(feature = $model_lowercase_str)]
                pub use $krate_ident::{self as $model_lowercase, $model_pascalcase};
            )*
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        /// All available model architectures.
        pub enum ModelArchitecture {
            $(
                #[cfg(feature = $model_lowercase_str)]
                #[doc = concat!("[", $display_name, "](", stringify!($krate_ident), ")")]
                $model_pascalcase,
            )*
        }

        impl ModelArchitecture {
            /// All available model architectures
            pub const ALL: &[Self] = &[
                $(
                    #[cfg(feature = $model_lowercase_str)]
                    Self::$model_pascalcase,
                )*
            ];
        }

        impl ModelArchitecture {
            /// Use a visitor to dispatch some code based on the model architecture.
            pub fn visit<R>(&self, visitor: &mut impl ModelArchitectureVisitor<R>) -> R {
                match *self {
                    $(
                        #[cfg(feature = $model_lowercase_str)]
                        Self::$model_pascalcase => visitor.visit::<models::$model_pascalcase>(),
                    )*
                }
            }
        }

        impl FromStr for ModelArchitecture {
            type Err = LoadError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s
                    .to_lowercase()
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .as_str()
                {
                    $(
                        #[cfg(feature = $model_lowercase_str)]
                        $model_lowercase_str => Ok(Self::$model_pascalcase),
                    )*

                    _ => Err(LoadError::UnknownArchitecture {
                        architecture: s.to_owned(),
                    }),
                }
            }
        }

        impl Display for ModelArchitecture {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match *self {
                    $(
                        #[cfg(feature = $model_lowercase_str)]
                        Self::$model_pascalcase => write!(f, $display_name),
                    )*
                }
            }
        }
    };
}

define_models!((unity, "unity", Unity, fairseq2_unity, "UnitY"));

/// Used to dispatch some code based on the model architecture.
pub trait ModelArchitectureVisitor<R> {
    /// Visit a model architecture.
    fn visit<L: ModelLoader + 'static>(&mut self) -> R;
}
