/*! Backend-portability transforms for resolved WGSL programs.

The central structure of the crate is [`Program`]: an immutable [`Module`]
together with its resolved semantic side-table ([`valid::ModuleInfo`]) and the
diagnostics produced while resolving it.

To improve performance and reduce memory usage, every node is stored in an
[`Arena`] and referred to by a [`Handle`]. Expressions and statements of all
functions share the module-wide arenas. Children are always appended before
their parents, so walking an arena in order visits operands before the
expressions that use them.

Programs are created with a [`ProgramBuilder`] and rewritten by the
[`transform`]s, each of which clones its input into a fresh builder through a
[`transform::CloneContext`], recording replacements for the nodes it needs to
change. The result of every transform is resolved again, so that the next
transform of a [`transform::Manager`] pipeline sees a fully typed program.
!*/

#![allow(
    clippy::new_without_default,
    clippy::match_like_matches_macro,
    clippy::too_many_arguments
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    clippy::pattern_type_mismatch
)]

mod arena;
pub mod back;
pub mod proc;
mod program;
mod span;
mod symbol;
pub mod transform;
pub mod valid;

pub use crate::arena::{Arena, Handle, HandleVec, UniqueArena};
pub use crate::program::{Diagnostic, Diagnostics, Program, ProgramBuilder, Severity};
pub use crate::span::Span;
pub use crate::symbol::{Symbol, SymbolTable};

use std::{
    collections::{HashMap, HashSet},
    hash::BuildHasherDefault,
    num::NonZeroU32,
};

/// Number of bytes per scalar.
pub type Bytes = u8;

/// Hash map that is faster but not resilient to DoS attacks.
pub type FastHashMap<K, T> = HashMap<K, T, BuildHasherDefault<fxhash::FxHasher>>;
/// Hash set that is faster but not resilient to DoS attacks.
pub type FastHashSet<K> = HashSet<K, BuildHasherDefault<fxhash::FxHasher>>;

/// Primitive type for a scalar.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum ScalarKind {
    /// Signed integer type.
    Sint,
    /// Unsigned integer type.
    Uint,
    /// Floating point type.
    Float,
    /// Boolean type.
    Bool,
}

/// Characteristics of a scalar type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Scalar {
    /// How the value's bits are to be interpreted.
    pub kind: ScalarKind,

    /// This size of the value in bytes.
    pub width: Bytes,
}

impl Scalar {
    pub const I32: Self = Self {
        kind: ScalarKind::Sint,
        width: 4,
    };
    pub const U32: Self = Self {
        kind: ScalarKind::Uint,
        width: 4,
    };
    pub const F32: Self = Self {
        kind: ScalarKind::Float,
        width: 4,
    };
    pub const F16: Self = Self {
        kind: ScalarKind::Float,
        width: 2,
    };
    pub const BOOL: Self = Self {
        kind: ScalarKind::Bool,
        width: 1,
    };

    /// The WGSL spelling of this scalar type.
    pub const fn to_wgsl(self) -> &'static str {
        match (self.kind, self.width) {
            (ScalarKind::Sint, _) => "i32",
            (ScalarKind::Uint, _) => "u32",
            (ScalarKind::Float, 2) => "f16",
            (ScalarKind::Float, _) => "f32",
            (ScalarKind::Bool, _) => "bool",
        }
    }
}

/// Number of components in a vector.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum VectorSize {
    /// 2D vector
    Bi = 2,
    /// 3D vector
    Tri = 3,
    /// 4D vector
    Quad = 4,
}

impl VectorSize {
    pub const fn from_u32(count: u32) -> Option<Self> {
        match count {
            2 => Some(Self::Bi),
            3 => Some(Self::Tri),
            4 => Some(Self::Quad),
            _ => None,
        }
    }
}

/// Addressing space of variables.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum AddressSpace {
    /// Function locals.
    Function,
    /// Private data, per invocation, mutable.
    Private,
    /// Workgroup shared data, mutable.
    WorkGroup,
    /// Uniform buffer data.
    Uniform,
    /// Storage buffer data, potentially mutable.
    Storage,
    /// Opaque handles, such as samplers and images.
    Handle,
    /// Push constants.
    PushConstant,
    /// Pixel local storage.
    PixelLocal,
    /// Immediate data.
    Immediate,
}

impl AddressSpace {
    /// The WGSL spelling of this address space.
    pub const fn to_wgsl(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Private => "private",
            Self::WorkGroup => "workgroup",
            Self::Uniform => "uniform",
            Self::Storage => "storage",
            Self::Handle => "handle",
            Self::PushConstant => "push_constant",
            Self::PixelLocal => "pixel_local",
            Self::Immediate => "immediate",
        }
    }

    /// The access mode used for variables declared without an explicit one.
    pub const fn default_access(self) -> StorageAccess {
        match self {
            Self::Uniform | Self::Storage | Self::Handle | Self::PushConstant | Self::Immediate => {
                StorageAccess::LOAD
            }
            _ => StorageAccess::all(),
        }
    }
}

bitflags::bitflags! {
    /// Flags describing how a variable's memory may be accessed.
    #[cfg_attr(feature = "serialize", derive(serde::Serialize))]
    #[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
    #[derive(Default)]
    pub struct StorageAccess: u32 {
        /// Storage can be used as a source for load ops.
        const LOAD = 0x1;
        /// Storage can be used as a target for store ops.
        const STORE = 0x2;
    }
}

impl StorageAccess {
    /// The WGSL spelling of this access mode.
    pub fn to_wgsl(self) -> &'static str {
        if self == Self::all() {
            "read_write"
        } else if self.contains(Self::STORE) {
            "write"
        } else {
            "read"
        }
    }
}

bitflags::bitflags! {
    /// Language extensions enabled with `enable` directives.
    #[cfg_attr(feature = "serialize", derive(serde::Serialize))]
    #[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
    #[derive(Default)]
    pub struct Extensions: u8 {
        /// `enable f16;`
        const F16 = 0x1;
    }
}

/// Size of an array.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum ArraySize {
    /// The array size is constant.
    Constant(NonZeroU32),
    /// The array size can change at runtime.
    Dynamic,
}

/// Member of a user-defined structure.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct StructMember {
    pub name: String,
    /// Type of the field.
    pub ty: Handle<Type>,
    /// Explicit `@offset` of the member, in bytes.
    pub offset: Option<u32>,
    /// Explicit `@align` of the member, in bytes.
    pub align: Option<u32>,
    /// Explicit `@size` of the member, in bytes.
    pub size: Option<u32>,
    /// Custom byte distance between the columns of a matrix member, or of
    /// the matrices of an array-of-matrices member.
    pub matrix_stride: Option<u32>,
    /// The matrix (or the matrices of the array) are stored row by row.
    pub row_major: bool,
}

impl StructMember {
    /// A member with no explicit layout attributes.
    pub fn new(name: impl Into<String>, ty: Handle<Type>) -> Self {
        StructMember {
            name: name.into(),
            ty,
            offset: None,
            align: None,
            size: None,
            matrix_stride: None,
            row_major: false,
        }
    }
}

/// A data type declared in the module.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Type {
    /// The name of the type, if any. Structs are always named.
    pub name: Option<String>,
    /// Inner structure that depends on the kind of the type.
    pub inner: TypeInner,
}

/// Enum with additional information, depending on the kind of type.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum TypeInner {
    /// Number of integral or floating-point kind.
    Scalar(Scalar),
    /// Vector of numbers.
    Vector { size: VectorSize, scalar: Scalar },
    /// Matrix of floats.
    Matrix {
        columns: VectorSize,
        rows: VectorSize,
        scalar: Scalar,
    },
    /// Atomic scalar.
    Atomic(Scalar),
    /// Pointer to another type.
    Pointer {
        base: Handle<Type>,
        space: AddressSpace,
        access: StorageAccess,
    },
    /// Homogeneous list of elements.
    ///
    /// `stride` is the explicit `@stride` annotation, if any. Without one,
    /// the natural stride of `base` applies.
    Array {
        base: Handle<Type>,
        size: ArraySize,
        stride: Option<u32>,
    },
    /// User-defined structure.
    Struct { members: Vec<StructMember> },
}

impl TypeInner {
    /// Return the scalar type of `self`, for numeric and atomic types.
    pub const fn scalar(&self) -> Option<Scalar> {
        match *self {
            Self::Scalar(scalar) | Self::Atomic(scalar) => Some(scalar),
            Self::Vector { scalar, .. } | Self::Matrix { scalar, .. } => Some(scalar),
            _ => None,
        }
    }

    /// The number of elements of a fixed-size array, if `self` is one.
    pub const fn array_count(&self) -> Option<u32> {
        match *self {
            Self::Array {
                size: ArraySize::Constant(count),
                ..
            } => Some(count.get()),
            _ => None,
        }
    }
}

/// A literal value.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum Literal {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    /// Half-precision float, stored widened.
    F16(f32),
}

impl Literal {
    pub const fn scalar(&self) -> Scalar {
        match *self {
            Self::Bool(_) => Scalar::BOOL,
            Self::I32(_) => Scalar::I32,
            Self::U32(_) => Scalar::U32,
            Self::F32(_) => Scalar::F32,
            Self::F16(_) => Scalar::F16,
        }
    }
}

/// Operation that can be applied on a single value.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum UnaryOperator {
    Negate,
    LogicalNot,
    BitwiseNot,
    /// `&e`: take the address of a memory reference.
    AddressOf,
    /// `*e`: dereference a pointer.
    Indirection,
}

impl UnaryOperator {
    pub const fn to_wgsl(self) -> &'static str {
        match self {
            Self::Negate => "-",
            Self::LogicalNot => "!",
            Self::BitwiseNot => "~",
            Self::AddressOf => "&",
            Self::Indirection => "*",
        }
    }
}

/// Operation that can be applied on two values.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    ExclusiveOr,
    InclusiveOr,
    LogicalAnd,
    LogicalOr,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOperator {
    pub const fn is_comparison(self) -> bool {
        match self {
            Self::Equal
            | Self::NotEqual
            | Self::Less
            | Self::LessEqual
            | Self::Greater
            | Self::GreaterEqual => true,
            _ => false,
        }
    }

    pub const fn to_wgsl(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::And => "&",
            Self::ExclusiveOr => "^",
            Self::InclusiveOr => "|",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
            Self::ShiftLeft => "<<",
            Self::ShiftRight => ">>",
        }
    }
}

/// Atomic read-modify-write functions, and atomic loads and stores.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum AtomicFunction {
    Load,
    Store,
    Add,
    Subtract,
    Max,
    Min,
    And,
    InclusiveOr,
    ExclusiveOr,
    Exchange,
    CompareExchangeWeak,
}

impl AtomicFunction {
    pub const ALL: [Self; 11] = [
        Self::Load,
        Self::Store,
        Self::Add,
        Self::Subtract,
        Self::Max,
        Self::Min,
        Self::And,
        Self::InclusiveOr,
        Self::ExclusiveOr,
        Self::Exchange,
        Self::CompareExchangeWeak,
    ];

    /// The number of value operands following the pointer.
    pub const fn value_operands(self) -> usize {
        match self {
            Self::Load => 0,
            Self::CompareExchangeWeak => 2,
            _ => 1,
        }
    }
}

/// Builtin functions understood by the resolver and the transforms.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum BuiltinFunction {
    Transpose,
    Atomic(AtomicFunction),
}

impl BuiltinFunction {
    pub const fn to_wgsl(self) -> &'static str {
        match self {
            Self::Transpose => "transpose",
            Self::Atomic(fun) => match fun {
                AtomicFunction::Load => "atomicLoad",
                AtomicFunction::Store => "atomicStore",
                AtomicFunction::Add => "atomicAdd",
                AtomicFunction::Subtract => "atomicSub",
                AtomicFunction::Max => "atomicMax",
                AtomicFunction::Min => "atomicMin",
                AtomicFunction::And => "atomicAnd",
                AtomicFunction::InclusiveOr => "atomicOr",
                AtomicFunction::ExclusiveOr => "atomicXor",
                AtomicFunction::Exchange => "atomicExchange",
                AtomicFunction::CompareExchangeWeak => "atomicCompareExchangeWeak",
            },
        }
    }
}

/// What a [`Expression::Call`] invokes.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum Callee {
    /// A user-declared function, by name.
    Function(Symbol),
    Builtin(BuiltinFunction),
    /// A value constructor (or conversion) for the given type.
    Construct(Handle<Type>),
}

/// An expression that can be evaluated to obtain a value.
///
/// Expressions form trees: every expression is owned by exactly one parent
/// expression or statement.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum Expression {
    Literal(Literal),
    /// Reference to a variable, parameter, or value declaration.
    Identifier(Symbol),
    /// Structure member access or vector swizzle.
    Member { base: Handle<Expression>, member: Symbol },
    /// Array, matrix or vector element access.
    Index {
        base: Handle<Expression>,
        index: Handle<Expression>,
    },
    Unary {
        op: UnaryOperator,
        expr: Handle<Expression>,
    },
    Binary {
        op: BinaryOperator,
        left: Handle<Expression>,
        right: Handle<Expression>,
    },
    Call {
        callee: Callee,
        arguments: Vec<Handle<Expression>>,
    },
    Bitcast {
        ty: Handle<Type>,
        expr: Handle<Expression>,
    },
}

/// Kind of a declaration statement.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum DeclarationKind {
    Var,
    Let,
    Const,
}

/// A sequence of statements.
pub type Block = Vec<Handle<Statement>>;

/// Instructions which make up an executable block.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum Statement {
    Block(Block),
    /// A function-scope `var`, `let` or `const` declaration.
    Declare {
        kind: DeclarationKind,
        name: Symbol,
        ty: Option<Handle<Type>>,
        init: Option<Handle<Expression>>,
    },
    Assign {
        target: Handle<Expression>,
        value: Handle<Expression>,
    },
    /// A function call whose result, if any, is discarded.
    Call(Handle<Expression>),
    If {
        condition: Handle<Expression>,
        accept: Block,
        reject: Block,
    },
    For {
        init: Option<Handle<Statement>>,
        condition: Option<Handle<Expression>>,
        update: Option<Handle<Statement>>,
        body: Block,
    },
    Loop {
        body: Block,
        continuing: Block,
    },
    Break,
    Continue,
    Return(Option<Handle<Expression>>),
    Discard,
}

/// Binding of a global resource.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ResourceBinding {
    pub group: u32,
    pub binding: u32,
}

/// Variable defined at module level.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct GlobalVariable {
    pub name: Symbol,
    pub space: AddressSpace,
    pub access: StorageAccess,
    pub binding: Option<ResourceBinding>,
    pub ty: Handle<Type>,
    pub init: Option<Handle<Expression>>,
}

/// Stage of the programmable pipeline.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute { workgroup_size: [u32; 3] },
}

/// A primitive memory operation performed by a body-less function.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum IntrinsicOp {
    Load,
    Store,
    Atomic(AtomicFunction),
}

impl IntrinsicOp {
    pub const fn to_wgsl(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Store => "store",
            Self::Atomic(fun) => match fun {
                AtomicFunction::Load => "atomic_load",
                AtomicFunction::Store => "atomic_store",
                AtomicFunction::Add => "atomic_add",
                AtomicFunction::Subtract => "atomic_sub",
                AtomicFunction::Max => "atomic_max",
                AtomicFunction::Min => "atomic_min",
                AtomicFunction::And => "atomic_and",
                AtomicFunction::InclusiveOr => "atomic_or",
                AtomicFunction::ExclusiveOr => "atomic_xor",
                AtomicFunction::Exchange => "atomic_exchange",
                AtomicFunction::CompareExchangeWeak => "atomic_compare_exchange_weak",
            },
        }
    }
}

/// The scalar or vector type moved by an [`Intrinsic`].
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct IntrinsicType {
    pub size: Option<VectorSize>,
    pub scalar: Scalar,
}

impl IntrinsicType {
    /// The spelling used in intrinsic names: `u32`, `vec3_f32`, ...
    pub fn to_wgsl(self) -> String {
        match self.size {
            None => self.scalar.to_wgsl().to_string(),
            Some(size) => format!("vec{}_{}", size as u8, self.scalar.to_wgsl()),
        }
    }
}

/// Identification of a backend-implemented buffer operation.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Intrinsic {
    pub op: IntrinsicOp,
    pub space: AddressSpace,
    pub ty: IntrinsicType,
    /// The buffer variable the operation reads or writes.
    pub buffer: Symbol,
}

impl Intrinsic {
    /// The name printed in the `@internal(...)` attribute.
    pub fn internal_name(&self) -> String {
        format!(
            "intrinsic_{}_{}_{}",
            self.op.to_wgsl(),
            self.space.to_wgsl(),
            self.ty.to_wgsl()
        )
    }
}

/// Validation checks an internal function may opt out of.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum DisabledValidation {
    FunctionHasNoBody,
}

impl DisabledValidation {
    pub const fn to_wgsl(self) -> &'static str {
        match self {
            Self::FunctionHasNoBody => "disable_validation__function_has_no_body",
        }
    }
}

/// Compiler-generated attributes, printed as `@internal(...)`.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum InternalAttribute {
    Intrinsic(Intrinsic),
    DisableValidation(DisabledValidation),
}

/// A function argument.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct FunctionArgument {
    pub name: Symbol,
    pub ty: Handle<Type>,
}

/// A function defined in the module.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Function {
    pub name: Symbol,
    pub arguments: Vec<FunctionArgument>,
    pub result: Option<Handle<Type>>,
    /// `None` for body-less intrinsic stubs.
    pub body: Option<Block>,
    pub stage: Option<ShaderStage>,
    pub attributes: Vec<InternalAttribute>,
}

impl Function {
    pub fn intrinsic(&self) -> Option<&Intrinsic> {
        self.attributes.iter().find_map(|attribute| match *attribute {
            InternalAttribute::Intrinsic(ref intrinsic) => Some(intrinsic),
            InternalAttribute::DisableValidation(_) => None,
        })
    }

    pub fn disables(&self, validation: DisabledValidation) -> bool {
        self.attributes
            .contains(&InternalAttribute::DisableValidation(validation))
    }
}

/// A module-scope declaration, in source order.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum Declaration {
    Struct(Handle<Type>),
    GlobalVariable(Handle<GlobalVariable>),
    Function(Handle<Function>),
}

/// Shader module: the syntax tree of a program.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Module {
    pub extensions: Extensions,
    pub symbols: SymbolTable,
    /// Storage for the types defined in this module.
    pub types: UniqueArena<Type>,
    pub expressions: Arena<Expression>,
    pub statements: Arena<Statement>,
    pub global_variables: Arena<GlobalVariable>,
    pub functions: Arena<Function>,
    /// Module-scope declarations in source order.
    pub declarations: Vec<Declaration>,
}

impl Module {
    /// Iterate the functions in declaration order.
    pub fn functions_in_order(&self) -> impl Iterator<Item = Handle<Function>> + '_ {
        self.declarations.iter().filter_map(|decl| match *decl {
            Declaration::Function(handle) => Some(handle),
            _ => None,
        })
    }

    pub fn find_global(&self, name: &str) -> Option<Handle<GlobalVariable>> {
        let symbol = self.symbols.get(name)?;
        self.global_variables.fetch_if(|var| var.name == symbol)
    }

    pub fn find_function(&self, name: &str) -> Option<Handle<Function>> {
        let symbol = self.symbols.get(name)?;
        self.functions.fetch_if(|fun| fun.name == symbol)
    }

    /// Return the struct type declared with `name`.
    pub fn find_struct(&self, name: &str) -> Option<Handle<Type>> {
        self.declarations.iter().find_map(|decl| match *decl {
            Declaration::Struct(handle) if self.types[handle].name.as_deref() == Some(name) => {
                Some(handle)
            }
            _ => None,
        })
    }
}
