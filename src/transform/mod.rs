/*!
Program-to-program rewrites.

A [`Transform`] reads a resolved [`Program`] and either declines to run
([`ApplyResult::Skip`]) or produces a new program, built through a
[`CloneContext`] and resolved again. A [`Manager`] runs a sequence of
transforms, feeding each one the output of the previous one.

Transforms never mutate their input. Problems with the input that a
transform can't handle are reported as diagnostics on the output program,
which then fails [`Program::is_valid`]. Violated preconditions established by
earlier passes are internal compiler errors and panic, naming the transform
that was running.
*/

use crate::{proc::LayoutError, FastHashMap, Program};
use std::{
    any::{Any, TypeId},
    cell::Cell,
    sync::OnceLock,
};

/// Panic with an internal compiler error, naming the running transform.
macro_rules! ice {
    ($($arg:tt)*) => {
        panic!(
            "internal compiler error in {}: {}",
            $crate::transform::currently_running().unwrap_or("<no transform>"),
            format_args!($($arg)*)
        )
    };
}

mod clone;
mod decompose_memory_access;
mod decompose_strided_array;
mod decompose_strided_matrix;
mod transpose_row_major;

pub use clone::CloneContext;
pub use decompose_memory_access::{BufferIntrinsic, BufferIntrinsics, DecomposeMemoryAccess};
pub use decompose_strided_array::DecomposeStridedArray;
pub use decompose_strided_matrix::DecomposeStridedMatrix;
pub use transpose_row_major::TransposeRowMajor;

#[derive(Clone, Debug, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("{0}")]
    Unsupported(String),
    #[error("Unknown transform '{0}'")]
    UnknownTransform(String),
}

/// Outcome of [`Transform::apply`].
#[derive(Debug)]
pub enum ApplyResult {
    /// Nothing to do: the input program is the result.
    Skip,
    Program(Program),
}

impl ApplyResult {
    /// Report a failed transformation as an invalid copy of `src`.
    fn from_result(src: &Program, result: Result<Program, TransformError>) -> Self {
        match result {
            Ok(program) => Self::Program(program),
            Err(error) => {
                log::debug!("{} failed: {}", currently_running().unwrap_or("transform"), error);
                Self::Program(src.with_error(error))
            }
        }
    }
}

/// Auxiliary inputs and outputs of transforms, keyed by type.
#[derive(Debug, Default)]
pub struct DataMap {
    map: FastHashMap<TypeId, Box<dyn Any>>,
}

impl DataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data`, replacing any previous value of the same type.
    pub fn add<T: Any>(&mut self, data: T) {
        self.map.insert(TypeId::of::<T>(), Box::new(data));
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.map.get(&TypeId::of::<T>())?.downcast_ref()
    }

    pub fn take<T: Any>(&mut self) -> Option<T> {
        let data = self.map.remove(&TypeId::of::<T>())?;
        data.downcast().ok().map(|data| *data)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

pub trait Transform {
    /// The name used by the registry and in log messages.
    fn name(&self) -> &'static str;

    /// Rewrite `src`. Auxiliary results are added to `outputs`.
    fn apply(&self, src: &Program, inputs: &DataMap, outputs: &mut DataMap) -> ApplyResult;
}

/// The result of a [`Manager`] run.
#[derive(Debug)]
pub struct Output {
    pub program: Program,
    pub data: DataMap,
}

/// Backends with a preset pipeline, see [`Manager::for_backend`].
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum Backend {
    Hlsl,
    Spirv,
    Wgsl,
}

/// Names of the transforms to run, in order.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Config {
    pub transforms: Vec<String>,
}

/// Runs a sequence of transforms.
#[derive(Default)]
pub struct Manager {
    transforms: Vec<Box<dyn Transform>>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    /// The pipeline a backend needs.
    ///
    /// Transforms that establish invariants run first:
    /// 1. [`TransposeRowMajor`]
    /// 2. [`DecomposeStridedMatrix`]
    /// 3. [`DecomposeStridedArray`]
    /// 4. [`DecomposeMemoryAccess`]
    ///
    /// SPIR-V addresses buffers natively and skips the last step. WGSL is
    /// re-emitted as is.
    pub fn for_backend(backend: Backend) -> Self {
        let manager = Self::new();
        match backend {
            Backend::Hlsl => manager
                .add(TransposeRowMajor)
                .add(DecomposeStridedMatrix)
                .add(DecomposeStridedArray)
                .add(DecomposeMemoryAccess),
            Backend::Spirv => manager
                .add(TransposeRowMajor)
                .add(DecomposeStridedMatrix)
                .add(DecomposeStridedArray),
            Backend::Wgsl => manager,
        }
    }

    /// Build a pipeline from registry names.
    pub fn from_config(config: &Config) -> Result<Self, TransformError> {
        let mut manager = Self::new();
        for name in config.transforms.iter() {
            let entry =
                lookup(name).ok_or_else(|| TransformError::UnknownTransform(name.clone()))?;
            manager.transforms.push((entry.create)());
        }
        Ok(manager)
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Run all transforms over `program`.
    ///
    /// Stops early once a transform produces an invalid program; that
    /// program is returned with its diagnostics.
    pub fn run(&self, program: &Program, inputs: &DataMap) -> Output {
        let mut data = DataMap::new();
        let mut current: Option<Program> = None;
        for transform in self.transforms.iter() {
            let src = current.as_ref().unwrap_or(program);
            if !src.is_valid() {
                break;
            }
            let result = {
                profiling::scope!(transform.name());
                let _guard = RunningGuard::enter(transform.name());
                transform.apply(src, inputs, &mut data)
            };
            match result {
                ApplyResult::Skip => log::debug!("skipping {}", transform.name()),
                ApplyResult::Program(output) => {
                    log::debug!("applied {}", transform.name());
                    current = Some(output);
                }
            }
        }
        Output {
            program: current.unwrap_or_else(|| program.clone()),
            data,
        }
    }
}

/// A named transform constructor.
pub struct Entry {
    pub name: &'static str,
    pub create: fn() -> Box<dyn Transform>,
}

/// Every transform, by name.
pub fn registry() -> &'static [Entry] {
    static REGISTRY: OnceLock<Vec<Entry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        vec![
            Entry {
                name: decompose_memory_access::NAME,
                create: || Box::new(DecomposeMemoryAccess),
            },
            Entry {
                name: decompose_strided_array::NAME,
                create: || Box::new(DecomposeStridedArray),
            },
            Entry {
                name: decompose_strided_matrix::NAME,
                create: || Box::new(DecomposeStridedMatrix),
            },
            Entry {
                name: transpose_row_major::NAME,
                create: || Box::new(TransposeRowMajor),
            },
        ]
    })
}

pub fn lookup(name: &str) -> Option<&'static Entry> {
    registry().iter().find(|entry| entry.name == name)
}

thread_local! {
    static CURRENTLY_RUNNING: Cell<Option<&'static str>> = Cell::new(None);
}

/// The transform the [`Manager`] is running on this thread, if any.
pub fn currently_running() -> Option<&'static str> {
    CURRENTLY_RUNNING.with(Cell::get)
}

/// Marks a transform as running until dropped.
struct RunningGuard {
    previous: Option<&'static str>,
}

impl RunningGuard {
    fn enter(name: &'static str) -> Self {
        let previous = CURRENTLY_RUNNING.with(|running| running.replace(Some(name)));
        RunningGuard { previous }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        CURRENTLY_RUNNING.with(|running| running.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_map() {
        #[derive(Debug, PartialEq)]
        struct Counter(u32);

        let mut map = DataMap::new();
        assert!(map.get::<Counter>().is_none());
        map.add(Counter(1));
        map.add(Counter(2));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get::<Counter>(), Some(&Counter(2)));
        assert_eq!(map.take::<Counter>(), Some(Counter(2)));
        assert!(map.is_empty());
    }

    #[test]
    fn registry_names() {
        let names = registry().iter().map(|entry| entry.name).collect::<Vec<_>>();
        assert_eq!(
            names,
            [
                "decompose-memory-access",
                "decompose-strided-array",
                "decompose-strided-matrix",
                "transpose-row-major",
            ]
        );
        for entry in registry() {
            assert_eq!((entry.create)().name(), entry.name);
        }
    }

    #[test]
    fn unknown_transform() {
        let config = Config {
            transforms: vec!["decompose-strided-array".to_string(), "bogus".to_string()],
        };
        match Manager::from_config(&config) {
            Err(TransformError::UnknownTransform(name)) => assert_eq!(name, "bogus"),
            other => panic!("unexpected result {:?}", other.map(|m| m.len())),
        }
    }

    #[test]
    fn running_guard_nests() {
        assert_eq!(currently_running(), None);
        {
            let _outer = RunningGuard::enter("outer");
            {
                let _inner = RunningGuard::enter("inner");
                assert_eq!(currently_running(), Some("inner"));
            }
            assert_eq!(currently_running(), Some("outer"));
        }
        assert_eq!(currently_running(), None);
    }
}
