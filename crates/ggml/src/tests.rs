use std::{
    collections::BTreeMap,
    error::Error,
    io::{BufRead, Cursor, Read, Write},
};

use crate::{
    format::{loader, saver, tensor_size, LoadError},
    *,
};
use rand::{distributions::Uniform, prelude::*};

#[derive(Debug)]
struct DummyError;
impl std::fmt::Display for DummyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self, f)
    }
}
impl Error for DummyError {}

fn random_model(element_type: Type, tensor_count: usize) -> Model {
    let mut rng = rand::thread_rng();
    Model {
        hyperparameters: Hyperparameters {
            some_hyperparameter: random(),
            some_other_hyperparameter: random(),
            some_flag: random(),
        },
        tensors: (0..tensor_count)
            .map(|i| {
                let n_dims = Uniform::from(1..=MAX_DIMS).sample(&mut rng);
                let mut dims = [1; MAX_DIMS];
                for dim in dims.iter_mut().take(n_dims) {
                    *dim = Uniform::from(1..6).sample(&mut rng);
                }

                let n_elements = dims.iter().product::<usize>();
                let data = (0..format::data_size(element_type, n_elements))
                    .map(|_| random())
                    .collect::<Vec<_>>();

                (
                    format!("tensor_{}", i),
                    saver::TensorSaveInfo {
                        n_dims,
                        dims,
                        element_type,
                        data,
                    },
                )
            })
            .collect(),
    }
}

fn save_model(model: &Model) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut save_handler = MockSaveHandler { model };
    saver::save(
        &mut buffer,
        &mut save_handler,
        &model.tensors.keys().cloned().collect::<Vec<String>>(),
    )
    .unwrap();
    buffer
}

#[test]
fn can_roundtrip_loader_and_saver() {
    let model = random_model(Type::F16, 10);
    let buffer = save_model(&model);

    // Load the model and confirm that it is the same as the original.
    let mut cursor = Cursor::new(&buffer);
    let mut load_handler = MockLoadHandler {
        loaded_model: Model::default(),
    };
    loader::load(&mut cursor, &mut load_handler).unwrap();
    assert_eq!(load_handler.loaded_model, model);
}

#[test]
fn rejects_invalid_magic() {
    let mut buffer = save_model(&random_model(Type::F32, 1));
    buffer[..4].copy_from_slice(b"GGUF");

    let mut load_handler = MockLoadHandler {
        loaded_model: Model::default(),
    };
    let err = loader::load(&mut Cursor::new(&buffer), &mut load_handler).unwrap_err();
    assert!(matches!(
        err,
        LoadError::InvalidMagic(format::FormatMagic(m)) if m == u32::from_le_bytes(*b"GGUF")
    ));
}

#[test]
fn rejects_invalid_version() {
    let mut buffer = save_model(&random_model(Type::F32, 1));
    buffer[4..8].copy_from_slice(&2u32.to_le_bytes());

    let mut load_handler = MockLoadHandler {
        loaded_model: Model::default(),
    };
    let err = loader::load(&mut Cursor::new(&buffer), &mut load_handler).unwrap_err();
    assert!(matches!(err, LoadError::InvalidFormatVersion(2)));
}

fn record(name: &str, dims: &[i64], ftype: u32, payload: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::new();
    util::write_string(&mut buffer, name).unwrap();
    util::write_u32(&mut buffer, dims.len() as u32).unwrap();
    for &dim in dims {
        util::write_i64(&mut buffer, dim).unwrap();
    }
    util::write_u32(&mut buffer, ftype).unwrap();
    buffer.extend_from_slice(payload);
    buffer
}

#[test]
fn rejects_unknown_element_type() {
    let buffer = record("weird", &[2], 42, &[0; 8]);
    let mut load_handler = MockLoadHandler {
        loaded_model: Model::default(),
    };
    let err = loader::load_weights(&mut Cursor::new(&buffer), &mut load_handler).unwrap_err();
    assert!(matches!(
        err,
        LoadError::UnsupportedElementType { tensor_name, ftype: 42 } if tensor_name == "weird"
    ));
}

#[test]
fn rejects_too_many_dimensions() {
    let buffer = record("wide", &[1, 1, 1, 1, 1], 0, &[0; 4]);
    let err = loader::read_tensor_info::<DummyError>(&mut Cursor::new(&buffer)).unwrap_err();
    assert!(matches!(err, LoadError::InvariantBroken(_)));
}

#[test]
fn rejects_negative_dimensions() {
    let buffer = record("negative", &[-3], 0, &[]);
    let err = loader::read_tensor_info::<DummyError>(&mut Cursor::new(&buffer)).unwrap_err();
    assert!(matches!(err, LoadError::InvalidIntegerConversion(_)));
}

#[test]
fn truncated_payload_is_an_io_error() {
    let buffer = record("short", &[4], 0, &[0; 10]);
    let mut load_handler = MockLoadHandler {
        loaded_model: Model::default(),
    };
    let err = loader::load_weights(&mut Cursor::new(&buffer), &mut load_handler).unwrap_err();
    assert!(matches!(err, LoadError::ImplementationError(_)));
}

#[test]
fn handler_must_consume_payload() {
    struct SkippingHandler;
    impl loader::TensorHandler<DummyError> for SkippingHandler {
        fn tensor_buffer(
            &mut self,
            _info: loader::TensorLoadInfo,
            _reader: &mut dyn BufRead,
        ) -> Result<(), DummyError> {
            Ok(())
        }
    }

    let buffer = record("skipped", &[2, 2], 0, &[0; 16]);
    let err = loader::load_weights(&mut Cursor::new(&buffer), &mut SkippingHandler).unwrap_err();
    assert!(matches!(err, LoadError::InvariantBroken(_)));
}

#[test]
fn saver_rejects_mismatched_data_length() {
    let mut model = random_model(Type::F32, 1);
    model.tensors.values_mut().for_each(|t| t.data.push(0));

    let mut save_handler = MockSaveHandler { model: &model };
    let err = saver::save(
        &mut Vec::new(),
        &mut save_handler,
        &model.tensors.keys().cloned().collect::<Vec<String>>(),
    )
    .unwrap_err();
    assert!(matches!(err, saver::SaveError::InvariantBroken(_)));
}

#[test]
fn read_bool_rejects_other_bytes() {
    assert!(!util::read_bool(&mut Cursor::new([0u8])).unwrap());
    assert!(util::read_bool(&mut Cursor::new([1u8])).unwrap());
    let err = util::read_bool(&mut Cursor::new([2u8])).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[test]
fn context_tracks_used_memory() {
    let sizes = [(Type::F32, 7usize), (Type::F16, 3), (Type::Q4_0, 64), (Type::I8, 1)];
    let expected: usize = sizes.iter().map(|&(t, n)| tensor_size(t, n)).sum();

    let ctx = Context::new_with_allocate(expected);
    for &(t, n) in &sizes {
        ctx.new_tensor_1d(t, n).unwrap();
    }
    assert_eq!(ctx.used_mem(), expected);
    assert_eq!(ctx.n_objects(), sizes.len());
    assert_eq!(ctx.used_mem() % MEM_ALIGN, 0);
}

#[test]
fn context_reports_exhaustion() {
    let ctx = Context::new_with_allocate(tensor_size(Type::F32, 16));
    let first = ctx.new_tensor_2d(Type::F32, 4, 4).unwrap();
    assert_eq!(first.nbytes(), 64);
    assert_eq!(ctx.used_mem(), ctx.mem_size());

    let err = ctx.new_tensor_1d(Type::F32, 1).unwrap_err();
    assert_eq!(
        err,
        ContextError::OutOfMemory {
            requested: tensor_size(Type::F32, 1),
            available: 0,
        }
    );
    assert_eq!(ctx.n_objects(), 1);
}

#[test]
fn context_rejects_overflowing_shapes() {
    let ctx = Context::new_with_allocate(1024);
    let err = ctx
        .new_tensor_2d(Type::F32, usize::MAX / 2, 4)
        .unwrap_err();
    assert!(matches!(err, ContextError::OutOfMemory { .. }));
    assert_eq!(ctx.used_mem(), 0);
}

#[test]
fn context_rejects_invalid_shapes() {
    let ctx = Context::new_with_allocate(4096);
    assert_eq!(
        ctx.new_tensor(Type::F32, &[]).unwrap_err(),
        ContextError::InvalidDimensionCount { n_dims: 0 }
    );
    assert_eq!(
        ctx.new_tensor(Type::F32, &[1; 5]).unwrap_err(),
        ContextError::InvalidDimensionCount { n_dims: 5 }
    );
    assert_eq!(
        ctx.new_tensor_1d(Type::Q8_0, 33).unwrap_err(),
        ContextError::UnalignedRow {
            element_type: Type::Q8_0,
            ne0: 33,
            block_size: 32
        }
    );
}

#[test]
fn tensors_do_not_overlap() {
    let ctx = Context::new_with_allocate(4 * tensor_size(Type::F32, 5));
    let mut tensors = (0..4)
        .map(|i| {
            ctx.new_tensor_1d(Type::F32, 5)
                .unwrap()
                .set_name(&format!("t{i}"))
        })
        .collect::<Vec<_>>();

    for (i, tensor) in tensors.iter_mut().enumerate() {
        tensor.write_data(&[i as u8 + 1; 20]);
    }
    for (i, tensor) in ctx.tensors().iter().enumerate() {
        assert_eq!(tensor.name(), format!("t{i}"));
        assert_eq!(tensor.to_vec(), vec![i as u8 + 1; 20]);
    }
}

#[test]
fn tensor_reports_shape() {
    let ctx = Context::new_with_allocate(
        tensor_size(Type::F32, 512 * 64 * 8 * 4) + tensor_size(Type::F16, 8 * 2 * 3),
    );
    let tensor = ctx
        .new_tensor_4d(Type::F32, 512, 64, 8, 4)
        .unwrap()
        .set_name("attn");
    assert_eq!(tensor.get_ne(), [512, 64, 8, 4]);
    assert_eq!(tensor.dims(), vec![512, 64, 8, 4]);
    assert_eq!(tensor.n_dims(), 4);
    assert_eq!(tensor.nelements(), 512 * 64 * 8 * 4);
    assert_eq!(tensor.nbytes(), 512 * 64 * 8 * 4 * 4);
    assert_eq!(tensor.get_nb(), [4, 2048, 2048 * 64, 2048 * 64 * 8]);
    assert_eq!(tensor.get_type(), Type::F32);
    assert_eq!(tensor.element_size(), 4);

    let norm = ctx.new_tensor_3d(Type::F16, 8, 2, 3).unwrap();
    assert_eq!(norm.get_ne(), [8, 2, 3, 1]);
    assert_eq!(norm.dims(), vec![8, 2, 3]);
    assert_eq!(norm.get_nb(), [2, 16, 32, 96]);
    assert_eq!(norm.nbytes(), 96);
    assert_eq!(ctx.used_mem(), ctx.mem_size());
}

#[test]
fn tensor_loads_from_reader() {
    let ctx = Context::new_with_allocate(tensor_size(Type::I8, 6));
    let mut tensor = ctx.new_tensor_2d(Type::I8, 3, 2).unwrap();
    let mut reader = Cursor::new(vec![1u8, 2, 3, 4, 5, 6, 7]);
    tensor.read_exact_from(&mut reader).unwrap();
    assert_eq!(tensor.to_vec(), vec![1, 2, 3, 4, 5, 6]);

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, vec![7]);

    tensor.zero_data();
    assert_eq!(tensor.to_vec(), vec![0; 6]);
}

#[test]
#[should_panic]
fn tensor_reads_are_bounds_checked() {
    let ctx = Context::new_with_allocate(2 * tensor_size(Type::F32, 2));
    let tensor = ctx.new_tensor_1d(Type::F32, 2).unwrap();
    ctx.new_tensor_1d(Type::F32, 2).unwrap();
    let mut dst = [0u8; 4];
    tensor.read_data(6, &mut dst);
}

#[test]
#[should_panic]
fn tensor_writes_are_bounds_checked() {
    let ctx = Context::new_with_allocate(tensor_size(Type::F32, 2));
    let mut tensor = ctx.new_tensor_1d(Type::F32, 2).unwrap();
    tensor.write_data(&[0; 9]);
}

#[test]
#[should_panic]
fn tensor_outliving_context_panics() {
    let ctx = Context::new_with_allocate(tensor_size(Type::F32, 1));
    let tensor = ctx.new_tensor_1d(Type::F32, 1).unwrap();
    drop(ctx);
    tensor.nbytes();
}

#[derive(Default, PartialEq, Debug)]
struct Hyperparameters {
    some_hyperparameter: u32,
    some_other_hyperparameter: i64,
    some_flag: bool,
}
impl Hyperparameters {
    fn read(reader: &mut dyn BufRead) -> Result<Self, std::io::Error> {
        Ok(Self {
            some_hyperparameter: util::read_u32(reader)?,
            some_other_hyperparameter: util::read_i64(reader)?,
            some_flag: util::read_bool(reader)?,
        })
    }

    fn write(&self, writer: &mut dyn Write) -> Result<(), std::io::Error> {
        util::write_u32(writer, self.some_hyperparameter)?;
        util::write_i64(writer, self.some_other_hyperparameter)?;
        util::write_bool(writer, self.some_flag)?;
        Ok(())
    }
}

#[derive(Default, PartialEq, Debug)]
struct Model {
    hyperparameters: Hyperparameters,
    tensors: BTreeMap<String, saver::TensorSaveInfo>,
}

struct MockSaveHandler<'a> {
    model: &'a Model,
}
impl saver::SaveHandler<DummyError> for MockSaveHandler<'_> {
    fn write_hyperparameters(&mut self, writer: &mut dyn Write) -> Result<(), DummyError> {
        self.model.hyperparameters.write(writer).unwrap();
        Ok(())
    }

    fn tensor_data(&mut self, tensor_name: &str) -> Result<saver::TensorSaveInfo, DummyError> {
        self.model
            .tensors
            .get(tensor_name)
            .cloned()
            .ok_or(DummyError)
    }
}

struct MockLoadHandler {
    loaded_model: Model,
}
impl loader::LoadHandler<DummyError> for MockLoadHandler {
    fn read_hyperparameters(&mut self, reader: &mut dyn BufRead) -> Result<(), DummyError> {
        self.loaded_model.hyperparameters = Hyperparameters::read(reader).map_err(|_| DummyError)?;
        Ok(())
    }
}
impl loader::TensorHandler<DummyError> for MockLoadHandler {
    fn tensor_buffer(
        &mut self,
        info: loader::TensorLoadInfo,
        reader: &mut dyn BufRead,
    ) -> Result<(), DummyError> {
        let data = util::read_bytes_with_len(reader, info.calc_size()).map_err(|_| DummyError)?;
        let tensor = saver::TensorSaveInfo {
            n_dims: info.n_dims,
            dims: info.dims,
            element_type: info.element_type,
            data,
        };
        self.loaded_model.tensors.insert(info.name, tensor);
        Ok(())
    }
}

#[test]
fn context_reports_failed_allocation() {
    assert_eq!(
        Context::try_new_with_allocate(usize::MAX).unwrap_err(),
        ContextError::AllocationFailed {
            mem_size: usize::MAX
        }
    );
    assert_eq!(Context::try_new_with_allocate(64).unwrap().mem_size(), 64);
}
