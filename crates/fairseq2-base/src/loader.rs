//! Functionality for loading checkpoints. Very barebones; designed to be driven by `fairseq2`.

use std::{
    fs::File,
    io::{BufRead, BufReader, Cursor},
    path::{Path, PathBuf},
};

use ggml::{
    format::{
        loader::{load_weights, TensorHandler, TensorLoadInfo},
        read_container_header, FormatMagic, LoadError as FormatLoadError,
    },
    Context, ContextError, ElementType,
};
use memmap2::Mmap;
use thiserror::Error;

use crate::{Hyperparameters, Model, ModelLoader, ModelParameters, TensorTable};

/// Each variant represents a step within the process of loading the model.
/// These can be used to report progress to the user.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LoadProgress {
    /// The hyperparameters have been loaded from the model.
    HyperparametersLoaded,
    /// The context has been created.
    ContextSize {
        /// The size of the context.
        bytes: usize,
    },
    /// Every tensor of the architecture has been allocated.
    TensorsAllocated {
        /// The number of tensors that will be loaded.
        tensor_count: usize,
    },
    /// A tensor has been loaded.
    TensorLoaded {
        /// The current tensor (0-indexed).
        current_tensor: usize,
        /// The number of total tensors.
        tensor_count: usize,
    },
    /// The model has finished fully loading.
    Loaded {
        /// The number of bytes in the checkpoint.
        file_size: u64,
        /// The number of tensors in the checkpoint.
        tensor_count: usize,
    },
}

#[derive(Error, Debug)]
/// Errors encountered during the loading process.
pub enum LoadError {
    #[error("the file {path:?} does not exist")]
    /// The file does not exist.
    FileDoesNotExist {
        /// The path that failed.
        path: PathBuf,
    },
    #[error("could not open file {path:?}")]
    /// A file failed to open.
    OpenFileFailed {
        /// The original error.
        source: std::io::Error,
        /// The path that failed.
        path: PathBuf,
    },
    #[error("the checkpoint ended unexpectedly")]
    /// The stream ended before a field or payload was complete.
    TruncatedInput,
    #[error("non-specific I/O error")]
    /// A non-specific IO error.
    Io(#[source] std::io::Error),
    #[error("could not convert bytes to a UTF-8 string")]
    /// One of the strings encountered was not valid UTF-8.
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("invalid integer conversion")]
    /// One of the integers encountered could not be converted to a more appropriate type.
    InvalidIntegerConversion(#[from] std::num::TryFromIntError),
    #[error("invalid magic value {magic}")]
    /// An invalid magic value was encountered during the loading process.
    InvalidMagic {
        /// The magic value that was encountered.
        magic: FormatMagic,
    },
    #[error("invalid format version {version}")]
    /// The version of the format is not supported by this version of `fairseq2`.
    InvalidFormatVersion {
        /// The version that was encountered.
        version: u32,
    },
    /// The tensor `tensor_name` had an unsupported element type.
    #[error("invalid element type {element_type} for tensor `{tensor_name}`")]
    UnsupportedElementType {
        /// The name of the tensor.
        tensor_name: String,
        /// The element type that was encountered.
        element_type: u32,
    },
    #[error("invariant broken: {invariant}")]
    /// An invariant was broken.
    InvariantBroken {
        /// The invariant that was broken.
        invariant: String,
    },
    #[error("invalid hyperparameter `{field}`: {reason}")]
    /// A hyperparameter has a value the architecture cannot be built with.
    InvalidHyperparameter {
        /// The name of the field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    #[error("not enough space in the context (needed {requested} bytes, available {available} bytes)")]
    /// The context ran out of memory while allocating the architecture's tensors.
    OutOfArenaMemory {
        /// The number of bytes that were requested.
        requested: usize,
        /// The number of bytes that were still available.
        available: usize,
    },
    #[error("tensor `{tensor_name}` was allocated more than once")]
    /// The architecture registered two tensors under the same name.
    DuplicateTensorName {
        /// The name of the tensor.
        tensor_name: String,
    },
    #[error("unknown tensor `{tensor_name}`")]
    /// The checkpoint contains a tensor that is not part of the architecture.
    UnknownTensorName {
        /// The name of the tensor.
        tensor_name: String,
    },
    #[error("tensor `{tensor_name}` has shape {actual:?}, expected {expected:?}")]
    /// The dimensions of a tensor in the checkpoint differ from the allocated ones.
    ShapeMismatch {
        /// The name of the tensor.
        tensor_name: String,
        /// The shape that was allocated.
        expected: Vec<usize>,
        /// The shape found in the checkpoint.
        actual: Vec<usize>,
    },
    #[error("tensor `{tensor_name}` has element type {actual}, expected {expected}")]
    /// The element type of a tensor in the checkpoint differs from the allocated one.
    ElementTypeMismatch {
        /// The name of the tensor.
        tensor_name: String,
        /// The element type that was allocated.
        expected: ElementType,
        /// The element type found in the checkpoint.
        actual: ElementType,
    },
    #[error("tensor `{tensor_name}` appears more than once in the checkpoint")]
    /// A tensor was loaded twice.
    DuplicateTensorRecord {
        /// The name of the tensor.
        tensor_name: String,
    },
    #[error("tensor `{tensor_name}` is missing from the checkpoint")]
    /// A tensor of the architecture had no record in the checkpoint.
    MissingTensor {
        /// The name of the tensor.
        tensor_name: String,
    },
    #[error("unknown architecture {architecture}")]
    /// The requested architecture is not supported.
    UnknownArchitecture {
        /// The architecture that was requested.
        architecture: String,
    },
}
impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => LoadError::TruncatedInput,
            _ => LoadError::Io(err),
        }
    }
}
impl From<FormatLoadError<LoadError>> for LoadError {
    fn from(value: FormatLoadError<LoadError>) -> Self {
        match value {
            FormatLoadError::InvalidMagic(magic) => LoadError::InvalidMagic { magic },
            FormatLoadError::InvalidFormatVersion(version) => {
                LoadError::InvalidFormatVersion { version }
            }
            FormatLoadError::Io(err) => LoadError::from(err),
            FormatLoadError::InvalidUtf8(err) => LoadError::InvalidUtf8(err),
            FormatLoadError::InvalidIntegerConversion(err) => {
                LoadError::InvalidIntegerConversion(err)
            }
            FormatLoadError::ImplementationError(err) => err,
            FormatLoadError::UnsupportedElementType { tensor_name, ftype } => {
                LoadError::UnsupportedElementType {
                    tensor_name,
                    element_type: ftype,
                }
            }
            FormatLoadError::InvariantBroken(invariant) => LoadError::InvariantBroken { invariant },
        }
    }
}
impl From<ContextError> for LoadError {
    fn from(value: ContextError) -> Self {
        match value {
            ContextError::OutOfMemory {
                requested,
                available,
            } => LoadError::OutOfArenaMemory {
                requested,
                available,
            },
            ContextError::AllocationFailed { mem_size } => LoadError::OutOfArenaMemory {
                requested: mem_size,
                available: 0,
            },
            err => LoadError::InvariantBroken {
                invariant: err.to_string(),
            },
        }
    }
}

/// Loads the specified checkpoint from disk as the architecture `L`.
///
/// The file is read through a [memory map](Mmap) if [ModelParameters::prefer_mmap] is set,
/// and through a buffered reader otherwise. Either way, the tensors end up in a [Context]
/// owned by the returned [Model].
pub fn load<L: ModelLoader>(
    path: &Path,
    params: ModelParameters,
    mut load_progress_callback: impl FnMut(LoadProgress),
) -> Result<Model<L>, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileDoesNotExist {
            path: path.to_owned(),
        });
    }

    let file = File::open(path).map_err(|e| LoadError::OpenFileFailed {
        source: e,
        path: path.to_owned(),
    })?;
    let file_size = file.metadata()?.len();
    tracing::trace!("Read model file from {:?}", path);

    let model = if params.prefer_mmap {
        // SAFETY: the mapping is only read while `file` is open, and is dropped before returning.
        let mmap = unsafe { Mmap::map(&file)? };
        tracing::trace!("Mapped {} bytes", mmap.len());
        load_from_reader::<L>(&mut Cursor::new(&mmap[..]), &mut load_progress_callback)?
    } else {
        load_from_reader::<L>(&mut BufReader::new(&file), &mut load_progress_callback)?
    };

    (load_progress_callback)(LoadProgress::Loaded {
        file_size,
        tensor_count: model.tensors.len(),
    });

    tracing::trace!("Loaded model");

    Ok(model)
}

/// Loads a checkpoint as the architecture `L` from any buffered reader.
///
/// Reports every step but [LoadProgress::Loaded], which needs the size of the file.
pub fn load_from_reader<L: ModelLoader>(
    reader: &mut dyn BufRead,
    mut load_progress_callback: impl FnMut(LoadProgress),
) -> Result<Model<L>, LoadError> {
    read_container_header::<LoadError>(reader)?;

    let hyperparameters = L::load_hparams(reader)?;
    hyperparameters.validate()?;
    tracing::debug!(?hyperparameters, "Loaded hyperparameters");
    (load_progress_callback)(LoadProgress::HyperparametersLoaded);

    let ctx_size = L::compute_context_size(&hyperparameters);
    tracing::debug!("Context size: {}", ctx_size);
    (load_progress_callback)(LoadProgress::ContextSize { bytes: ctx_size });
    let context = Context::try_new_with_allocate(ctx_size)?;

    let mut tensors = TensorTable::new();
    let arch = L::tensors_alloc(&hyperparameters, &context, &mut tensors)?;
    tracing::debug!(
        "Allocated {} tensors, {} of {} context bytes used",
        tensors.len(),
        context.used_mem(),
        context.mem_size()
    );
    (load_progress_callback)(LoadProgress::TensorsAllocated {
        tensor_count: tensors.len(),
    });

    let mut weight_loader = WeightLoader {
        tensors: &mut tensors,
        load_progress_callback: &mut load_progress_callback,
        loaded_tensor_count: 0,
    };
    load_weights(reader, &mut weight_loader)?;

    if let Some(tensor_name) = tensors.first_missing() {
        return Err(LoadError::MissingTensor {
            tensor_name: tensor_name.to_owned(),
        });
    }
    tracing::trace!("Loaded {} tensors", tensors.len());

    Ok(Model {
        hyperparameters,
        arch,
        tensors,
        context,
    })
}

/// Copies tensor records into the tensors of a [TensorTable], matched by name.
struct WeightLoader<'a> {
    tensors: &'a mut TensorTable,
    load_progress_callback: &'a mut dyn FnMut(LoadProgress),
    loaded_tensor_count: usize,
}
impl TensorHandler<LoadError> for WeightLoader<'_> {
    fn tensor_buffer(
        &mut self,
        info: TensorLoadInfo,
        reader: &mut dyn BufRead,
    ) -> Result<(), LoadError> {
        let tensor = self.tensors.get_for_load(&info.name)?;

        let expected = tensor.dims();
        if expected != info.dims() {
            let actual = info.dims().to_vec();
            return Err(LoadError::ShapeMismatch {
                tensor_name: info.name,
                expected,
                actual,
            });
        }
        let expected = tensor.get_type();
        if expected != info.element_type {
            return Err(LoadError::ElementTypeMismatch {
                tensor_name: info.name,
                expected,
                actual: info.element_type,
            });
        }

        tensor.read_exact_from(reader)?;
        self.tensors.mark_loaded(&info.name);
        tracing::trace!("Loaded tensor `{}`", info.name);

        (self.load_progress_callback)(LoadProgress::TensorLoaded {
            current_tensor: self.loaded_tensor_count,
            tensor_count: self.tensors.len(),
        });
        self.loaded_tensor_count += 1;

        Ok(())
    }
}

/// A implementation for `load_progress_callback` that outputs to `stdout`.
pub fn load_progress_callback_stdout(progress: LoadProgress) {
    match progress {
        LoadProgress::HyperparametersLoaded => println!("Loaded hyperparameters"),
        LoadProgress::ContextSize { bytes } => println!(
            "ggml ctx size = {:.2} MB\n",
            bytes as f64 / (1024.0 * 1024.0)
        ),
        LoadProgress::TensorsAllocated { tensor_count } => {
            println!("Allocated {tensor_count} tensors")
        }
        LoadProgress::TensorLoaded {
            current_tensor,
            tensor_count,
        } => {
            let current_tensor = current_tensor + 1;
            if current_tensor % 8 == 0 || current_tensor == tensor_count {
                println!("Loaded tensor {current_tensor}/{tensor_count}");
            }
        }
        LoadProgress::Loaded {
            file_size: byte_size,
            tensor_count,
        } => {
            println!("Loading of model complete");
            println!(
                "Model size = {:.2} MB / num tensors = {}",
                byte_size as f64 / 1024.0 / 1024.0,
                tensor_count
            );
        }
    };
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use ggml::{
        format::{
            data_size,
            saver::{save, SaveHandler, TensorSaveInfo},
            tensor_size,
        },
        Tensor, MAX_DIMS,
    };

    use super::*;
    use crate::util;

    #[derive(Debug, Clone, PartialEq)]
    struct ToyHyperparameters {
        dim: i64,
        n_layers: i64,
        scale: f32,
        tied: bool,
    }
    impl Hyperparameters for ToyHyperparameters {
        fn read_ggml(reader: &mut dyn BufRead) -> Result<Self, LoadError> {
            Ok(Self {
                dim: util::read_i64(reader)?,
                n_layers: util::read_i64(reader)?,
                scale: util::read_f32(reader)?,
                tied: util::read_bool(reader)?,
            })
        }

        fn write_ggml(&self, writer: &mut dyn Write) -> Result<(), std::io::Error> {
            util::write_i64(writer, self.dim)?;
            util::write_i64(writer, self.n_layers)?;
            util::write_f32(writer, self.scale)?;
            util::write_bool(writer, self.tied)
        }

        fn validate(&self) -> Result<(), LoadError> {
            util::ensure_positive("dim", self.dim)?;
            util::ensure_non_negative("n_layers", self.n_layers)
        }
    }

    struct Toy;
    #[derive(Debug)]
    struct ToyArch {
        layers: Vec<Tensor>,
    }
    impl ModelLoader for Toy {
        type Hyperparameters = ToyHyperparameters;
        type Arch = ToyArch;

        fn compute_context_size(hyperparameters: &ToyHyperparameters) -> usize {
            hyperparameters.n_layers as usize
                * tensor_size(ElementType::F32, 2 * hyperparameters.dim as usize)
        }

        fn tensors_alloc(
            hyperparameters: &ToyHyperparameters,
            context: &Context,
            tensors: &mut TensorTable,
        ) -> Result<ToyArch, LoadError> {
            let dim = util::to_usize("dim", hyperparameters.dim)?;
            let layers = (0..hyperparameters.n_layers)
                .map(|i| {
                    tensors.alloc(
                        context,
                        format!("layers.{i}.weight"),
                        ElementType::F32,
                        &[dim, 2],
                    )
                })
                .collect::<Result<_, _>>()?;
            Ok(ToyArch { layers })
        }
    }

    const HPARAMS: ToyHyperparameters = ToyHyperparameters {
        dim: 3,
        n_layers: 2,
        scale: 0.5,
        tied: true,
    };

    struct Record {
        name: String,
        dims: Vec<usize>,
        element_type: ElementType,
    }
    impl Record {
        fn f32(name: &str, dims: &[usize]) -> Self {
            Self::typed(name, dims, ElementType::F32)
        }

        fn typed(name: &str, dims: &[usize], element_type: ElementType) -> Self {
            Self {
                name: name.to_owned(),
                dims: dims.to_vec(),
                element_type,
            }
        }

        fn data(&self) -> Vec<u8> {
            let n_bytes = data_size(self.element_type, self.dims.iter().product());
            (0..n_bytes).map(|i| (i + self.name.len()) as u8).collect()
        }
    }

    struct CheckpointWriter<'a> {
        hyperparameters: &'a ToyHyperparameters,
        records: &'a [Record],
    }
    impl SaveHandler<std::io::Error> for CheckpointWriter<'_> {
        fn write_hyperparameters(&mut self, writer: &mut dyn Write) -> Result<(), std::io::Error> {
            self.hyperparameters.write_ggml(writer)
        }

        fn tensor_data(&mut self, tensor_name: &str) -> Result<TensorSaveInfo, std::io::Error> {
            let record = self
                .records
                .iter()
                .find(|r| r.name == tensor_name)
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))?;
            let mut dims = [1; MAX_DIMS];
            dims[..record.dims.len()].copy_from_slice(&record.dims);
            Ok(TensorSaveInfo {
                n_dims: record.dims.len(),
                dims,
                element_type: record.element_type,
                data: record.data(),
            })
        }
    }

    fn checkpoint(hyperparameters: &ToyHyperparameters, records: &[Record]) -> Vec<u8> {
        let mut buffer = Vec::new();
        let names = records.iter().map(|r| r.name.clone()).collect::<Vec<_>>();
        save(
            &mut buffer,
            &mut CheckpointWriter {
                hyperparameters,
                records,
            },
            &names,
        )
        .unwrap();
        buffer
    }

    fn complete_records() -> Vec<Record> {
        vec![
            Record::f32("layers.0.weight", &[3, 2]),
            Record::f32("layers.1.weight", &[3, 2]),
        ]
    }

    fn load_bytes(bytes: &[u8]) -> Result<Model<Toy>, LoadError> {
        load_from_reader::<Toy>(&mut Cursor::new(bytes), |_| {})
    }

    #[test]
    fn loads_complete_checkpoint() {
        let records = complete_records();
        let bytes = checkpoint(&HPARAMS, &records);

        let mut progress = vec![];
        let model =
            load_from_reader::<Toy>(&mut Cursor::new(&bytes), |p| progress.push(p)).unwrap();

        assert_eq!(model.hyperparameters(), &HPARAMS);
        assert_eq!(model.arch().layers.len(), 2);
        assert_eq!(model.tensors().len(), 2);
        assert_eq!(model.context().used_mem(), Toy::compute_context_size(&HPARAMS));
        for (record, layer) in records.iter().zip(&model.arch().layers) {
            assert_eq!(layer.name(), record.name);
            assert_eq!(layer.to_vec(), record.data());
        }

        assert_eq!(
            progress,
            vec![
                LoadProgress::HyperparametersLoaded,
                LoadProgress::ContextSize {
                    bytes: Toy::compute_context_size(&HPARAMS)
                },
                LoadProgress::TensorsAllocated { tensor_count: 2 },
                LoadProgress::TensorLoaded {
                    current_tensor: 0,
                    tensor_count: 2
                },
                LoadProgress::TensorLoaded {
                    current_tensor: 1,
                    tensor_count: 2
                },
            ]
        );
    }

    #[test]
    fn loads_records_in_any_order() {
        let mut records = complete_records();
        records.reverse();
        let model = load_bytes(&checkpoint(&HPARAMS, &records)).unwrap();
        assert_eq!(
            model.tensors().names().collect::<Vec<_>>(),
            ["layers.0.weight", "layers.1.weight"]
        );
    }

    #[test]
    fn loads_empty_architecture() {
        let hparams = ToyHyperparameters {
            n_layers: 0,
            ..HPARAMS
        };
        let model = load_bytes(&checkpoint(&hparams, &[])).unwrap();
        assert!(model.tensors().is_empty());
        assert_eq!(model.context().mem_size(), 0);
    }

    #[test]
    fn rejects_invalid_magic() {
        let mut bytes = checkpoint(&HPARAMS, &complete_records());
        bytes[0] ^= 0xff;
        assert!(matches!(load_bytes(&bytes), Err(LoadError::InvalidMagic { .. })));
    }

    #[test]
    fn rejects_invalid_version() {
        let mut bytes = checkpoint(&HPARAMS, &complete_records());
        bytes[4..8].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            load_bytes(&bytes),
            Err(LoadError::InvalidFormatVersion { version: 7 })
        ));
    }

    #[test]
    fn rejects_invalid_hyperparameters() {
        let hparams = ToyHyperparameters { dim: 0, ..HPARAMS };
        assert!(matches!(
            load_bytes(&checkpoint(&hparams, &[])),
            Err(LoadError::InvalidHyperparameter { field: "dim", .. })
        ));
    }

    #[test]
    fn rejects_truncated_checkpoints() {
        let bytes = checkpoint(&HPARAMS, &complete_records());
        // Cutting into the header, the hyperparameters or a record all truncate the input.
        for len in [2, 10, 20, bytes.len() - 1] {
            assert!(
                matches!(load_bytes(&bytes[..len]), Err(LoadError::TruncatedInput)),
                "truncated at {len}"
            );
        }
    }

    #[test]
    fn rejects_unknown_tensor() {
        let mut records = complete_records();
        records.push(Record::f32("layers.2.weight", &[3, 2]));
        assert!(matches!(
            load_bytes(&checkpoint(&HPARAMS, &records)),
            Err(LoadError::UnknownTensorName { tensor_name }) if tensor_name == "layers.2.weight"
        ));
    }

    #[test]
    fn rejects_shape_mismatch() {
        let records = vec![Record::f32("layers.0.weight", &[2, 3])];
        match load_bytes(&checkpoint(&HPARAMS, &records)) {
            Err(LoadError::ShapeMismatch {
                tensor_name,
                expected,
                actual,
            }) => {
                assert_eq!(tensor_name, "layers.0.weight");
                assert_eq!(expected, vec![3, 2]);
                assert_eq!(actual, vec![2, 3]);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn rejects_element_type_mismatch() {
        let records = vec![Record::typed("layers.0.weight", &[3, 2], ElementType::F16)];
        assert!(matches!(
            load_bytes(&checkpoint(&HPARAMS, &records)),
            Err(LoadError::ElementTypeMismatch {
                expected: ElementType::F32,
                actual: ElementType::F16,
                ..
            })
        ));
    }

    #[test]
    fn rejects_duplicate_records() {
        let records = complete_records();
        let mut names = records.iter().map(|r| r.name.clone()).collect::<Vec<_>>();
        names.push(names[0].clone());

        let mut bytes = Vec::new();
        save(
            &mut bytes,
            &mut CheckpointWriter {
                hyperparameters: &HPARAMS,
                records: &records,
            },
            &names,
        )
        .unwrap();
        assert!(matches!(
            load_bytes(&bytes),
            Err(LoadError::DuplicateTensorRecord { tensor_name })
                if tensor_name == "layers.0.weight"
        ));
    }

    #[test]
    fn rejects_missing_tensors() {
        let records = vec![Record::f32("layers.1.weight", &[3, 2])];
        assert!(matches!(
            load_bytes(&checkpoint(&HPARAMS, &records)),
            Err(LoadError::MissingTensor { tensor_name }) if tensor_name == "layers.0.weight"
        ));
    }

    #[test]
    fn loads_from_file_with_and_without_mmap() {
        let records = complete_records();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&checkpoint(&HPARAMS, &records)).unwrap();
        file.flush().unwrap();
        let file_size = file.as_file().metadata().unwrap().len();

        for prefer_mmap in [true, false] {
            let mut last = None;
            let model = load::<Toy>(file.path(), ModelParameters { prefer_mmap }, |p| {
                last = Some(p)
            })
            .unwrap();
            assert_eq!(
                last,
                Some(LoadProgress::Loaded {
                    file_size,
                    tensor_count: 2
                })
            );
            assert_eq!(model.arch().layers[1].to_vec(), records[1].data());
        }
    }

    #[test]
    fn reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.bin");
        assert!(matches!(
            load::<Toy>(&path, ModelParameters::default(), |_| {}),
            Err(LoadError::FileDoesNotExist { .. })
        ));
    }
}
