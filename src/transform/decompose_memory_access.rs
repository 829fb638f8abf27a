/*!
Lowering of buffer accesses to offset-addressed intrinsic calls.

Every load, store and atomic operation on a `storage` or `uniform` buffer is
replaced by a call taking the byte offset of the accessed location:

```text
let x = sb.b[i].c;          let x = sb_load((16u + (32u * u32(i))));
sb.b[i].c = x;       -->    sb_store((16u + (32u * u32(i))), x);
atomicAdd(&sb.n, 1u);       sbatomicAdd(4u, 1u);
```

Scalars and vectors are accessed through body-less functions tagged with an
[`Intrinsic`] attribute, which backends implement natively. Matrices, arrays
and structures get helper functions that call the helpers of their elements.
Helpers are created on first use, once per operation, buffer and type.

Offsets are folded while walking the access chain from the buffer variable
to the accessed expression, so static steps collapse into constants while
dynamic indices stay symbolic, in chain order.

Pointers into buffers must have been removed by an earlier pass.
*/

use super::{ApplyResult, CloneContext, DataMap, Transform, TransformError};
use smallvec::SmallVec;
use crate::{
    arena::{Handle, UniqueArena},
    valid::{Binding, MemberKind},
    AddressSpace, AtomicFunction, BinaryOperator, BuiltinFunction, Callee, Expression,
    FastHashMap, Function, FunctionArgument, GlobalVariable, InternalAttribute, Intrinsic,
    IntrinsicOp, IntrinsicType, Program, Scalar, Statement, Symbol, Type, TypeInner,
    UnaryOperator, VectorSize,
};

pub(super) const NAME: &str = "decompose-memory-access";

/// Decompose `storage` and `uniform` buffer accesses into intrinsic calls.
///
/// Adds a [`BufferIntrinsics`] record to the output data.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecomposeMemoryAccess;

/// A body-less function generated for a primitive buffer operation.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferIntrinsic {
    pub function: String,
    pub buffer: String,
    pub intrinsic: Intrinsic,
}

/// The intrinsic functions a backend has to provide.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BufferIntrinsics {
    pub stubs: Vec<BufferIntrinsic>,
}

impl BufferIntrinsics {
    pub fn find(&self, function: &str) -> Option<&BufferIntrinsic> {
        self.stubs.iter().find(|stub| stub.function == function)
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
enum HelperKind {
    Load,
    Store,
    Atomic(AtomicFunction),
}

#[derive(Default)]
struct State {
    /// Helpers by kind, buffer and (destination) type.
    helpers: FastHashMap<(HelperKind, Handle<GlobalVariable>, Handle<Type>), Symbol>,
    intrinsics: BufferIntrinsics,
}

type Context<'a> = CloneContext<'a, State>;

/// A byte offset expression, folded as it is built.
#[derive(Clone, Debug, PartialEq)]
enum Offset {
    Literal(u32),
    /// An index expression of the source program.
    Index(Handle<Expression>),
    Add(Box<Offset>, Box<Offset>),
    Mul(Box<Offset>, Box<Offset>),
}

impl Offset {
    fn add(self, other: Offset) -> Offset {
        match (self, other) {
            (Offset::Literal(a), Offset::Literal(b)) => Offset::Literal(a.wrapping_add(b)),
            (lhs, Offset::Literal(0)) => lhs,
            (Offset::Literal(0), rhs) => rhs,
            (lhs, rhs) => Offset::Add(Box::new(lhs), Box::new(rhs)),
        }
    }

    fn mul(self, other: Offset) -> Offset {
        match (self, other) {
            (Offset::Literal(a), Offset::Literal(b)) => Offset::Literal(a.wrapping_mul(b)),
            (Offset::Literal(0), _) | (_, Offset::Literal(0)) => Offset::Literal(0),
            (lhs, Offset::Literal(1)) => lhs,
            (Offset::Literal(1), rhs) => rhs,
            (lhs, rhs) => Offset::Mul(Box::new(lhs), Box::new(rhs)),
        }
    }

    /// Emit the offset into the destination program.
    fn build(&self, ctx: &mut Context<'_>) -> Handle<Expression> {
        match *self {
            Offset::Literal(value) => ctx.dst.u32(value),
            Offset::Index(index) => {
                let src = ctx.src;
                let cloned = ctx.clone_expression(index);
                let is_u32 = src.info[index]
                    .ty
                    .map_or(false, |ty| src.module.types[ty].inner == TypeInner::Scalar(Scalar::U32));
                if is_u32 {
                    cloned
                } else {
                    let u32_ty = ctx.dst.scalar(Scalar::U32);
                    ctx.dst.construct(u32_ty, vec![cloned])
                }
            }
            Offset::Add(ref lhs, ref rhs) => {
                let lhs = lhs.build(ctx);
                let rhs = rhs.build(ctx);
                ctx.dst.add(lhs, rhs)
            }
            Offset::Mul(ref lhs, ref rhs) => {
                let lhs = lhs.build(ctx);
                let rhs = rhs.build(ctx);
                ctx.dst.mul(lhs, rhs)
            }
        }
    }
}

/// A decomposed access: the buffer, the offset and the accessed type.
#[derive(Clone, Debug)]
struct BufferAccess {
    var: Handle<GlobalVariable>,
    offset: Offset,
    ty: Handle<Type>,
}

fn is_buffer(space: AddressSpace) -> bool {
    matches!(space, AddressSpace::Storage | AddressSpace::Uniform)
}

/// The buffer variable `expr` designates memory of, if any.
fn buffer_root(src: &Program, expr: Handle<Expression>) -> Option<Handle<GlobalVariable>> {
    let var = src.info.root_global(expr)?;
    if is_buffer(src.module.global_variables[var].space) {
        Some(var)
    } else {
        None
    }
}

/// Walk the access chain ending at `expr` down to its buffer variable.
fn access_offset(src: &Program, expr: Handle<Expression>) -> (Handle<GlobalVariable>, Offset) {
    let module = &src.module;

    // Walk down to the buffer variable, then fold the steps from the root.
    let mut chain = SmallVec::<[Handle<Expression>; 8]>::new();
    let mut current = expr;
    let var = loop {
        match module.expressions[current] {
            Expression::Identifier(_) => match src.info[current].binding {
                Some(Binding::Global(var)) if !src.info[current].is_pointer(&module.types) => {
                    break var
                }
                _ => ice!(
                    "buffer access through pointer {:?}, pointers must be simplified first",
                    current
                ),
            },
            Expression::Member { base, .. } | Expression::Index { base, .. } => {
                chain.push(current);
                current = base;
            }
            Expression::Unary {
                op: UnaryOperator::Indirection,
                expr: pointer,
            } => match module.expressions[pointer] {
                Expression::Unary {
                    op: UnaryOperator::AddressOf,
                    expr: inner,
                } => current = inner,
                _ => ice!(
                    "buffer access through pointer {:?}, pointers must be simplified first",
                    pointer
                ),
            },
            ref other => ice!("unexpected {:?} in buffer access chain", other),
        }
    };

    let offset = chain
        .iter()
        .rev()
        .fold(Offset::Literal(0), |offset, &step| {
            offset.add(step_offset(src, step))
        });
    (var, offset)
}

/// The byte offset added by a single `Member` or `Index` step.
fn step_offset(src: &Program, step: Handle<Expression>) -> Offset {
    let module = &src.module;
    let layouter = &src.info.layouter;
    let (base, index) = match module.expressions[step] {
        Expression::Member { base, .. } => (base, None),
        Expression::Index { base, index } => (base, Some(index)),
        ref other => ice!("unexpected {:?} in buffer access chain", other),
    };
    let base_ty = match src.info[base].ty {
        Some(ty) => ty,
        None => ice!("access base {:?} has no type", base),
    };

    let index = match index {
        Some(index) => index,
        None => {
            let offset = match (src.info[step].member.as_ref(), &module.types[base_ty].inner) {
                (Some(&MemberKind::Struct(index)), _) => layouter.member_offset(base_ty, index),
                (Some(&MemberKind::Component(component)), &TypeInner::Vector { scalar, .. }) => {
                    component as u32 * scalar.width as u32
                }
                (member, _) => ice!("unexpected member {:?} in buffer access {:?}", member, step),
            };
            return Offset::Literal(offset);
        }
    };

    let stride = match module.types[base_ty].inner {
        TypeInner::Array { .. } => layouter.array_stride(&module.types, base_ty),
        TypeInner::Matrix { rows, scalar, .. } => crate::proc::Layouter::column_stride(rows, scalar),
        TypeInner::Vector { scalar, .. } => scalar.width as u32,
        ref other => ice!("indexing {:?} in buffer access {:?}", other, step),
    };
    let index = match src.info[index].constant.and_then(|value| value.as_index()) {
        Some(value) => Offset::Literal(value),
        None => Offset::Index(index),
    };
    Offset::Literal(stride).mul(index)
}

fn contains_runtime_array(types: &UniqueArena<Type>, ty: Handle<Type>) -> bool {
    match types[ty].inner {
        TypeInner::Array {
            size: crate::ArraySize::Dynamic,
            ..
        } => true,
        TypeInner::Array { base, .. } => contains_runtime_array(types, base),
        TypeInner::Struct { ref members } => members
            .iter()
            .any(|member| contains_runtime_array(types, member.ty)),
        _ => false,
    }
}

impl BufferAccess {
    fn new(src: &Program, expr: Handle<Expression>) -> Result<Self, TransformError> {
        let (var, offset) = access_offset(src, expr);
        let ty = match src.info[expr].ty {
            Some(ty) => ty,
            None => ice!("buffer access {:?} has no type", expr),
        };
        if contains_runtime_array(&src.module.types, ty) {
            return Err(TransformError::Unsupported(format!(
                "runtime-sized arrays of '{}' can't be accessed as a whole",
                src.module
                    .symbols
                    .name(src.module.global_variables[var].name)
            )));
        }
        Ok(BufferAccess { var, offset, ty })
    }
}

fn atomic_suffix(fun: AtomicFunction) -> &'static str {
    match fun {
        AtomicFunction::Load => "Load",
        AtomicFunction::Store => "Store",
        AtomicFunction::Add => "Add",
        AtomicFunction::Subtract => "Sub",
        AtomicFunction::Max => "Max",
        AtomicFunction::Min => "Min",
        AtomicFunction::And => "And",
        AtomicFunction::InclusiveOr => "Or",
        AtomicFunction::ExclusiveOr => "Xor",
        AtomicFunction::Exchange => "Exchange",
        AtomicFunction::CompareExchangeWeak => "CompareExchangeWeak",
    }
}

/// Reserve the name of a new helper of `var`: `sb_load`, `sb_store_1`, `sbatomicAdd`.
fn helper_name(ctx: &mut Context<'_>, kind: HelperKind, var: Handle<GlobalVariable>) -> Symbol {
    let src = ctx.src;
    let buffer = src.module.symbols.name(src.module.global_variables[var].name);
    let prefix = match kind {
        HelperKind::Load => format!("{buffer}_load"),
        HelperKind::Store => format!("{buffer}_store"),
        HelperKind::Atomic(fun) => format!("{buffer}atomic{}", atomic_suffix(fun)),
    };
    ctx.dst.unique_symbol(&prefix)
}

fn offset_argument(ctx: &mut Context<'_>) -> FunctionArgument {
    FunctionArgument {
        name: ctx.dst.symbol("offset"),
        ty: ctx.dst.scalar(Scalar::U32),
    }
}

/// `(offset + delta)`
fn offset_plus(ctx: &mut Context<'_>, delta: u32) -> Handle<Expression> {
    let offset = ctx.dst.ident("offset");
    let delta = ctx.dst.u32(delta);
    ctx.dst.add(offset, delta)
}

/// `(offset + (i * stride))`
fn offset_plus_element(ctx: &mut Context<'_>, stride: u32) -> Handle<Expression> {
    let offset = ctx.dst.ident("offset");
    let i = ctx.dst.ident("i");
    let stride = ctx.dst.u32(stride);
    let scaled = ctx.dst.mul(i, stride);
    ctx.dst.add(offset, scaled)
}

/// `for(var i = 0u; (i < count); i = (i + 1u)) { body }`
fn element_loop(
    ctx: &mut Context<'_>,
    count: u32,
    body: Vec<Handle<Statement>>,
) -> Handle<Statement> {
    let zero = ctx.dst.u32(0);
    let init = ctx.dst.var("i", None, Some(zero));
    let i = ctx.dst.ident("i");
    let count = ctx.dst.u32(count);
    let condition = ctx.dst.binary(BinaryOperator::Less, i, count);
    let i = ctx.dst.ident("i");
    let i_value = ctx.dst.ident("i");
    let one = ctx.dst.u32(1);
    let next = ctx.dst.add(i_value, one);
    let update = ctx.dst.assign(i, next);
    ctx.dst.for_(Some(init), Some(condition), Some(update), body)
}

/// Declare a body-less intrinsic function.
fn intrinsic_stub(
    ctx: &mut Context<'_>,
    name: Symbol,
    op: IntrinsicOp,
    var: Handle<GlobalVariable>,
    ty: IntrinsicType,
    arguments: Vec<FunctionArgument>,
    result: Option<Handle<Type>>,
) {
    let src = ctx.src;
    let global = &src.module.global_variables[var];
    let intrinsic = Intrinsic {
        op,
        space: global.space,
        ty,
        buffer: global.name,
    };
    log::debug!(
        "declaring {} as {}",
        ctx.dst.module.symbols.name(name),
        intrinsic.internal_name()
    );
    ctx.state.intrinsics.stubs.push(BufferIntrinsic {
        function: ctx.dst.module.symbols.name(name).to_string(),
        buffer: src.module.symbols.name(global.name).to_string(),
        intrinsic,
    });
    ctx.dst
        .stub(name, arguments, result, InternalAttribute::Intrinsic(intrinsic));
}

fn push_helper(
    ctx: &mut Context<'_>,
    name: Symbol,
    arguments: Vec<FunctionArgument>,
    result: Option<Handle<Type>>,
    body: Vec<Handle<Statement>>,
) {
    log::debug!("synthesized {}", ctx.dst.module.symbols.name(name));
    ctx.dst.push_function(Function {
        name,
        arguments,
        result,
        body: Some(body),
        stage: None,
        attributes: Vec::new(),
    });
}

/// The helper that loads or stores a scalar or vector of type `ty`.
fn leaf_function(
    ctx: &mut Context<'_>,
    kind: HelperKind,
    var: Handle<GlobalVariable>,
    ty: Handle<Type>,
    size: Option<VectorSize>,
    scalar: Scalar,
) -> Symbol {
    let key = (kind, var, ty);
    if let Some(&name) = ctx.state.helpers.get(&key) {
        return name;
    }
    let name = helper_name(ctx, kind, var);
    ctx.state.helpers.insert(key, name);

    let intrinsic_ty = IntrinsicType { size, scalar };
    let offset = offset_argument(ctx);
    match kind {
        HelperKind::Load => {
            intrinsic_stub(ctx, name, IntrinsicOp::Load, var, intrinsic_ty, vec![offset], Some(ty))
        }
        HelperKind::Store => {
            let value = FunctionArgument {
                name: ctx.dst.symbol("value"),
                ty,
            };
            intrinsic_stub(
                ctx,
                name,
                IntrinsicOp::Store,
                var,
                intrinsic_ty,
                vec![offset, value],
                None,
            )
        }
        HelperKind::Atomic(_) => ice!("atomic helper requested for non-atomic {:?}", ty),
    }
    name
}

/// The helper that loads a value of source type `ty` from `var`.
fn load_function(ctx: &mut Context<'_>, var: Handle<GlobalVariable>, ty: Handle<Type>) -> Symbol {
    let dst_ty = ctx.clone_type(ty);
    let key = (HelperKind::Load, var, dst_ty);
    if let Some(&name) = ctx.state.helpers.get(&key) {
        return name;
    }

    let src = ctx.src;
    let layouter = &src.info.layouter;
    match src.module.types[ty].inner {
        TypeInner::Scalar(scalar) => leaf_function(ctx, HelperKind::Load, var, dst_ty, None, scalar),
        TypeInner::Vector { size, scalar } => {
            leaf_function(ctx, HelperKind::Load, var, dst_ty, Some(size), scalar)
        }
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => {
            let name = helper_name(ctx, HelperKind::Load, var);
            ctx.state.helpers.insert(key, name);
            let column_ty = ctx.dst.vec(rows, scalar);
            let column =
                leaf_function(ctx, HelperKind::Load, var, column_ty, Some(rows), scalar);
            let stride = crate::proc::Layouter::column_stride(rows, scalar);
            let values = (0..columns as u32)
                .map(|index| {
                    let offset = offset_plus(ctx, index * stride);
                    ctx.dst.call_symbol(column, vec![offset])
                })
                .collect();
            let matrix = ctx.dst.construct(dst_ty, values);
            let ret = ctx.dst.ret(Some(matrix));
            let offset = offset_argument(ctx);
            push_helper(ctx, name, vec![offset], Some(dst_ty), vec![ret]);
            name
        }
        TypeInner::Array { base, size, .. } => {
            let count = match size {
                crate::ArraySize::Constant(count) => count.get(),
                crate::ArraySize::Dynamic => ice!("load of runtime-sized array {:?}", ty),
            };
            let name = helper_name(ctx, HelperKind::Load, var);
            ctx.state.helpers.insert(key, name);
            let element = load_function(ctx, var, base);
            let stride = layouter.array_stride(&src.module.types, ty);

            let decl = ctx.dst.var("arr", Some(dst_ty), None);
            let arr = ctx.dst.ident("arr");
            let i = ctx.dst.ident("i");
            let target = ctx.dst.index(arr, i);
            let offset = offset_plus_element(ctx, stride);
            let value = ctx.dst.call_symbol(element, vec![offset]);
            let assign = ctx.dst.assign(target, value);
            let for_ = element_loop(ctx, count, vec![assign]);
            let arr = ctx.dst.ident("arr");
            let ret = ctx.dst.ret(Some(arr));

            let offset = offset_argument(ctx);
            push_helper(ctx, name, vec![offset], Some(dst_ty), vec![decl, for_, ret]);
            name
        }
        TypeInner::Struct { ref members } => {
            let name = helper_name(ctx, HelperKind::Load, var);
            ctx.state.helpers.insert(key, name);
            let offsets = layouter.member_offsets(ty);
            let values = members
                .iter()
                .zip(offsets)
                .map(|(member, &member_offset)| {
                    let function = load_function(ctx, var, member.ty);
                    let offset = offset_plus(ctx, member_offset);
                    ctx.dst.call_symbol(function, vec![offset])
                })
                .collect();
            let value = ctx.dst.construct(dst_ty, values);
            let ret = ctx.dst.ret(Some(value));
            let offset = offset_argument(ctx);
            push_helper(ctx, name, vec![offset], Some(dst_ty), vec![ret]);
            name
        }
        TypeInner::Atomic(_) | TypeInner::Pointer { .. } => {
            ice!("load of {:?} from a buffer", src.module.types[ty].inner)
        }
    }
}

/// The helper that stores a value of source type `ty` into `var`.
fn store_function(ctx: &mut Context<'_>, var: Handle<GlobalVariable>, ty: Handle<Type>) -> Symbol {
    let dst_ty = ctx.clone_type(ty);
    let key = (HelperKind::Store, var, dst_ty);
    if let Some(&name) = ctx.state.helpers.get(&key) {
        return name;
    }

    let src = ctx.src;
    let layouter = &src.info.layouter;
    let value_argument = |ctx: &mut Context<'_>| FunctionArgument {
        name: ctx.dst.symbol("value"),
        ty: dst_ty,
    };
    match src.module.types[ty].inner {
        TypeInner::Scalar(scalar) => {
            leaf_function(ctx, HelperKind::Store, var, dst_ty, None, scalar)
        }
        TypeInner::Vector { size, scalar } => {
            leaf_function(ctx, HelperKind::Store, var, dst_ty, Some(size), scalar)
        }
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => {
            let name = helper_name(ctx, HelperKind::Store, var);
            ctx.state.helpers.insert(key, name);
            let column_ty = ctx.dst.vec(rows, scalar);
            let column =
                leaf_function(ctx, HelperKind::Store, var, column_ty, Some(rows), scalar);
            let stride = crate::proc::Layouter::column_stride(rows, scalar);
            let body = (0..columns as u32)
                .map(|index| {
                    let offset = offset_plus(ctx, index * stride);
                    let value = ctx.dst.ident("value");
                    let index = ctx.dst.u32(index);
                    let value = ctx.dst.index(value, index);
                    let call = ctx.dst.call_symbol(column, vec![offset, value]);
                    ctx.dst.call_stmt(call)
                })
                .collect();
            let arguments = vec![offset_argument(ctx), value_argument(ctx)];
            push_helper(ctx, name, arguments, None, body);
            name
        }
        TypeInner::Array { base, size, .. } => {
            let count = match size {
                crate::ArraySize::Constant(count) => count.get(),
                crate::ArraySize::Dynamic => ice!("store of runtime-sized array {:?}", ty),
            };
            let name = helper_name(ctx, HelperKind::Store, var);
            ctx.state.helpers.insert(key, name);
            let element = store_function(ctx, var, base);
            let stride = layouter.array_stride(&src.module.types, ty);

            let value = ctx.dst.ident("value");
            let decl = ctx.dst.var("arr", None, Some(value));
            let offset = offset_plus_element(ctx, stride);
            let arr = ctx.dst.ident("arr");
            let i = ctx.dst.ident("i");
            let element_value = ctx.dst.index(arr, i);
            let call = ctx.dst.call_symbol(element, vec![offset, element_value]);
            let call = ctx.dst.call_stmt(call);
            let for_ = element_loop(ctx, count, vec![call]);

            let arguments = vec![offset_argument(ctx), value_argument(ctx)];
            push_helper(ctx, name, arguments, None, vec![decl, for_]);
            name
        }
        TypeInner::Struct { ref members } => {
            let name = helper_name(ctx, HelperKind::Store, var);
            ctx.state.helpers.insert(key, name);
            let offsets = layouter.member_offsets(ty);
            let body = members
                .iter()
                .zip(offsets)
                .map(|(member, &member_offset)| {
                    let function = store_function(ctx, var, member.ty);
                    let offset = offset_plus(ctx, member_offset);
                    let value = ctx.dst.ident("value");
                    let value = ctx.dst.member(value, &member.name);
                    let call = ctx.dst.call_symbol(function, vec![offset, value]);
                    ctx.dst.call_stmt(call)
                })
                .collect();
            let arguments = vec![offset_argument(ctx), value_argument(ctx)];
            push_helper(ctx, name, arguments, None, body);
            name
        }
        TypeInner::Atomic(_) | TypeInner::Pointer { .. } => {
            ice!("store of {:?} into a buffer", src.module.types[ty].inner)
        }
    }
}

/// The intrinsic performing atomic `fun` on an atomic of source type `ty`.
fn atomic_function(
    ctx: &mut Context<'_>,
    fun: AtomicFunction,
    var: Handle<GlobalVariable>,
    ty: Handle<Type>,
    result: Option<Handle<Type>>,
) -> Symbol {
    let dst_ty = ctx.clone_type(ty);
    let kind = HelperKind::Atomic(fun);
    let key = (kind, var, dst_ty);
    if let Some(&name) = ctx.state.helpers.get(&key) {
        return name;
    }
    let scalar = match ctx.src.module.types[ty].inner {
        TypeInner::Atomic(scalar) => scalar,
        ref other => ice!("atomic operation on {:?}", other),
    };

    let name = helper_name(ctx, kind, var);
    ctx.state.helpers.insert(key, name);
    let value_ty = ctx.dst.scalar(scalar);
    let mut arguments = vec![offset_argument(ctx)];
    for index in 1..=fun.value_operands() {
        arguments.push(FunctionArgument {
            name: ctx.dst.symbol(&format!("param_{index}")),
            ty: value_ty,
        });
    }
    let result = result.map(|ty| ctx.clone_type(ty));
    intrinsic_stub(
        ctx,
        name,
        IntrinsicOp::Atomic(fun),
        var,
        IntrinsicType { size: None, scalar },
        arguments,
        result,
    );
    name
}

/// Record the replacements of every buffer access of the source program.
fn decompose(ctx: &mut Context<'_>) -> Result<(), TransformError> {
    let src = ctx.src;
    let module = &src.module;

    for (handle, expression) in module.expressions.iter() {
        let info = match src.info.get(handle) {
            Some(info) => info,
            None => continue,
        };

        if let Expression::Identifier(_) = *expression {
            if let Some(&TypeInner::Pointer { space, .. }) =
                info.ty.map(|ty| &module.types[ty].inner)
            {
                if is_buffer(space) {
                    ice!(
                        "pointer {:?} into {} memory, pointers must be simplified first",
                        handle,
                        space.to_wgsl()
                    );
                }
            }
        }

        if info.load && info.reference.is_some() && buffer_root(src, handle).is_some() {
            let access = BufferAccess::new(src, handle)?;
            ctx.replace_expression(handle, move |ctx| {
                let offset = access.offset.build(ctx);
                let function = load_function(ctx, access.var, access.ty);
                ctx.dst.call_symbol(function, vec![offset])
            });
            continue;
        }

        if let Expression::Call {
            callee: Callee::Builtin(BuiltinFunction::Atomic(fun)),
            ref arguments,
        } = *expression
        {
            let target = match module.expressions[arguments[0]] {
                Expression::Unary {
                    op: UnaryOperator::AddressOf,
                    expr,
                } if buffer_root(src, expr).is_some() => expr,
                _ => continue,
            };
            let access = BufferAccess::new(src, target)?;
            let values = arguments[1..].to_vec();
            let result = info.ty;
            ctx.replace_expression(handle, move |ctx| {
                let mut arguments = vec![access.offset.build(ctx)];
                arguments.extend(values.iter().map(|&value| ctx.clone_expression(value)));
                let function = atomic_function(ctx, fun, access.var, access.ty, result);
                ctx.dst.call_symbol(function, arguments)
            });
        }
    }

    for (handle, statement) in module.statements.iter() {
        if let Statement::Assign { target, value } = *statement {
            if buffer_root(src, target).is_none() {
                continue;
            }
            let access = BufferAccess::new(src, target)?;
            ctx.replace_statement(handle, move |ctx| {
                let offset = access.offset.build(ctx);
                let value = ctx.clone_expression(value);
                let function = store_function(ctx, access.var, access.ty);
                let call = ctx.dst.call_symbol(function, vec![offset, value]);
                ctx.dst.call_stmt(call)
            });
        }
    }

    Ok(())
}

fn should_run(src: &Program) -> bool {
    src.module
        .expressions
        .iter()
        .any(|(handle, _)| buffer_root(src, handle).is_some())
}

impl Transform for DecomposeMemoryAccess {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, src: &Program, _inputs: &DataMap, outputs: &mut DataMap) -> ApplyResult {
        if !should_run(src) {
            return ApplyResult::Skip;
        }
        let mut ctx = CloneContext::new(src, State::default());
        let result = decompose(&mut ctx).map(|()| {
            ctx.clone_module();
            let (builder, state) = ctx.finish();
            outputs.add(state.intrinsics);
            builder.build()
        });
        ApplyResult::from_result(src, result)
    }
}

#[cfg(test)]
mod tests {
    use super::Offset;

    #[test]
    fn offset_folding() {
        let fold = Offset::Literal(0)
            .add(Offset::Literal(16))
            .add(Offset::Literal(8).mul(Offset::Literal(3)));
        assert_eq!(fold, Offset::Literal(40));

        assert_eq!(
            Offset::Literal(4).mul(Offset::Literal(1)).add(Offset::Literal(0)),
            Offset::Literal(4)
        );
        assert_eq!(Offset::Literal(0).mul(Offset::Literal(7)), Offset::Literal(0));
    }
}
