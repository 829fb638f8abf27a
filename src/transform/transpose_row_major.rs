/*!
Lowering of row-major matrices to column-major ones.

A `@row_major` matrix member `m : matCxR<T>` is stored row by row, which is
exactly the column-major layout of its transpose. The member is re-typed as
`matRxC<T>` and accesses are rewritten so that code still observes the
logical matrix:

```text
let x = s.m;          -->   let x = transpose(s.m);
s.m = x;              -->   s.m = transpose(x);
let c = s.m[i];       -->   let c = tint_load_row(s.m, u32(i));
s.m[i] = c;           -->   s.m = tint_store_row(s.m, u32(i), c);
s.m[i][j]             -->   s.m[j][i]
```

Arrays of row-major matrices keep their count and stride, and are converted
element-wise by `tint_transpose_arr` helpers when copied as a whole.

An access rooted at a row-major member stays *pending* while it is indexed
further, and is converted where its value is finally read or written.
*/

use super::{ApplyResult, CloneContext, DataMap, Transform, TransformError};
use crate::{
    arena::Handle,
    valid::{MemberKind, Parent},
    BinaryOperator, BuiltinFunction, Callee, DeclarationKind, Expression, FastHashMap, Function,
    FunctionArgument, Program, Scalar, Statement, StructMember, Symbol, Type, TypeInner,
    UnaryOperator,
};

pub(super) const NAME: &str = "transpose-row-major";

/// Store row-major matrices as column-major transposes.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransposeRowMajor;

/// An access to (a part of) a row-major member, in logical terms.
#[derive(Clone, Copy, Debug)]
enum Pending {
    /// The member itself, holding an array of matrices of source type `ty`.
    Array { ty: Handle<Type> },
    /// A whole matrix of source type `ty`.
    Matrix { ty: Handle<Type> },
    /// Column `column` of the matrix `matrix`.
    Column {
        matrix: Handle<Expression>,
        ty: Handle<Type>,
        column: Handle<Expression>,
    },
    /// Component `row` of column `column` of the matrix `matrix`.
    Scalar {
        matrix: Handle<Expression>,
        column: Handle<Expression>,
        row: Row,
    },
}

#[derive(Clone, Copy, Debug)]
enum Row {
    Index(Handle<Expression>),
    Component(u8),
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
enum HelperKind {
    TransposeArray,
    LoadRow,
    StoreRow,
}

#[derive(Default)]
struct State {
    /// Helpers by kind and (destination) argument and result types.
    helpers: FastHashMap<(HelperKind, Handle<Type>, Handle<Type>), Symbol>,
}

type Context<'a> = CloneContext<'a, State>;

/// The stored form of the source type `ty`, in the destination program.
fn transposed(ctx: &mut Context<'_>, ty: Handle<Type>) -> Handle<Type> {
    let src = ctx.src;
    match src.module.types[ty].inner {
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => ctx.dst.mat(rows, columns, scalar),
        TypeInner::Array { base, size, stride } => {
            let base = transposed(ctx, base);
            ctx.dst.ty(TypeInner::Array { base, size, stride })
        }
        ref other => ice!("row-major member of type {:?}", other),
    }
}

/// The column count and scalar of the destination matrix type `ty`.
fn matrix_shape(ctx: &Context<'_>, ty: Handle<Type>) -> (u32, Scalar) {
    match ctx.dst.module.types[ty].inner {
        TypeInner::Matrix {
            columns, scalar, ..
        } => (columns as u32, scalar),
        ref other => ice!("expected a matrix, found {:?}", other),
    }
}

fn helper_function(
    ctx: &mut Context<'_>,
    name: Symbol,
    arguments: Vec<(&str, Handle<Type>)>,
    result: Handle<Type>,
    body: Vec<Handle<Statement>>,
) {
    log::debug!("synthesized {}", ctx.dst.module.symbols.name(name));
    let arguments = arguments
        .into_iter()
        .map(|(argument, ty)| FunctionArgument {
            name: ctx.dst.symbol(argument),
            ty,
        })
        .collect();
    ctx.dst.push_function(Function {
        name,
        arguments,
        result: Some(result),
        body: Some(body),
        stage: None,
        attributes: Vec::new(),
    });
}

/// `fn tint_transpose_arr(a : from) -> to`, transposing every element.
fn transpose_array(ctx: &mut Context<'_>, from: Handle<Type>, to: Handle<Type>) -> Symbol {
    let key = (HelperKind::TransposeArray, from, to);
    if let Some(&name) = ctx.state.helpers.get(&key) {
        return name;
    }
    let count = match ctx.dst.module.types[from].inner.array_count() {
        Some(count) => count,
        None => ice!("transposing a runtime-sized array"),
    };
    let name = ctx.dst.unique_symbol("tint_transpose_arr");
    ctx.state.helpers.insert(key, name);

    let decl = ctx.dst.var("r", Some(to), None);
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

    let r = ctx.dst.ident("r");
    let i = ctx.dst.ident("i");
    let target = ctx.dst.index(r, i);
    let a = ctx.dst.ident("a");
    let i = ctx.dst.ident("i");
    let element = ctx.dst.index(a, i);
    let element = ctx.dst.builtin(BuiltinFunction::Transpose, vec![element]);
    let assign = ctx.dst.assign(target, element);
    let for_ = ctx
        .dst
        .for_(Some(init), Some(condition), Some(update), vec![assign]);
    let r = ctx.dst.ident("r");
    let ret = ctx.dst.ret(Some(r));

    helper_function(ctx, name, vec![("a", from)], to, vec![decl, for_, ret]);
    name
}

/// `fn tint_load_row(m : matRxC, c : u32) -> vecR`, gathering logical
/// column `c` of the stored matrix `m`.
fn load_row(ctx: &mut Context<'_>, stored: Handle<Type>) -> Symbol {
    let (columns, scalar) = matrix_shape(ctx, stored);
    let size = match crate::VectorSize::from_u32(columns) {
        Some(size) => size,
        None => ice!("matrix with {} columns", columns),
    };
    let result = ctx.dst.vec(size, scalar);
    let key = (HelperKind::LoadRow, stored, result);
    if let Some(&name) = ctx.state.helpers.get(&key) {
        return name;
    }
    let name = ctx.dst.unique_symbol("tint_load_row");
    ctx.state.helpers.insert(key, name);

    let components = (0..columns)
        .map(|index| {
            let m = ctx.dst.ident("m");
            let index = ctx.dst.u32(index);
            let stored_column = ctx.dst.index(m, index);
            let c = ctx.dst.ident("c");
            ctx.dst.index(stored_column, c)
        })
        .collect();
    let value = ctx.dst.construct(result, components);
    let ret = ctx.dst.ret(Some(value));
    let u32_ty = ctx.dst.scalar(Scalar::U32);
    helper_function(ctx, name, vec![("m", stored), ("c", u32_ty)], result, vec![ret]);
    name
}

/// `fn tint_store_row(m : matRxC, c : u32, v : vecR) -> matRxC`, returning
/// `m` with logical column `c` replaced by `v`.
fn store_row(ctx: &mut Context<'_>, stored: Handle<Type>) -> Symbol {
    let (columns, scalar) = matrix_shape(ctx, stored);
    let size = match crate::VectorSize::from_u32(columns) {
        Some(size) => size,
        None => ice!("matrix with {} columns", columns),
    };
    let column_ty = ctx.dst.vec(size, scalar);
    let key = (HelperKind::StoreRow, stored, column_ty);
    if let Some(&name) = ctx.state.helpers.get(&key) {
        return name;
    }
    let name = ctx.dst.unique_symbol("tint_store_row");
    ctx.state.helpers.insert(key, name);

    let m = ctx.dst.ident("m");
    let mut body = vec![ctx.dst.var("r", None, Some(m))];
    for index in 0..columns {
        let r = ctx.dst.ident("r");
        let stored_index = ctx.dst.u32(index);
        let stored_column = ctx.dst.index(r, stored_index);
        let c = ctx.dst.ident("c");
        let target = ctx.dst.index(stored_column, c);
        let v = ctx.dst.ident("v");
        let component = ctx.dst.u32(index);
        let value = ctx.dst.index(v, component);
        body.push(ctx.dst.assign(target, value));
    }
    let r = ctx.dst.ident("r");
    body.push(ctx.dst.ret(Some(r)));
    let u32_ty = ctx.dst.scalar(Scalar::U32);
    helper_function(
        ctx,
        name,
        vec![("m", stored), ("c", u32_ty), ("v", column_ty)],
        stored,
        body,
    );
    name
}

/// Clone the index `expr` as a `u32`.
fn clone_index(ctx: &mut Context<'_>, expr: Handle<Expression>) -> Handle<Expression> {
    let src = ctx.src;
    let is_u32 = src.info[expr]
        .ty
        .map_or(false, |ty| src.module.types[ty].inner == TypeInner::Scalar(Scalar::U32));
    let cloned = ctx.clone_expression(expr);
    if is_u32 {
        cloned
    } else {
        let u32_ty = ctx.dst.scalar(Scalar::U32);
        ctx.dst.construct(u32_ty, vec![cloned])
    }
}

/// Convert the stored value `value` of source type `ty` to its logical form.
fn to_logical(ctx: &mut Context<'_>, ty: Handle<Type>, value: Handle<Expression>) -> Handle<Expression> {
    match ctx.src.module.types[ty].inner {
        TypeInner::Matrix { .. } => ctx.dst.builtin(BuiltinFunction::Transpose, vec![value]),
        _ => {
            let from = transposed(ctx, ty);
            let to = ctx.clone_type(ty);
            let helper = transpose_array(ctx, from, to);
            ctx.dst.call_symbol(helper, vec![value])
        }
    }
}

/// Convert the logical value `value` of source type `ty` to its stored form.
fn to_stored(ctx: &mut Context<'_>, ty: Handle<Type>, value: Handle<Expression>) -> Handle<Expression> {
    match ctx.src.module.types[ty].inner {
        TypeInner::Matrix { .. } => ctx.dst.builtin(BuiltinFunction::Transpose, vec![value]),
        _ => {
            let from = ctx.clone_type(ty);
            let to = transposed(ctx, ty);
            let helper = transpose_array(ctx, from, to);
            ctx.dst.call_symbol(helper, vec![value])
        }
    }
}

/// Source struct types with row-major members, and the flags of their members.
fn row_major_structs(src: &Program) -> FastHashMap<Handle<Type>, Vec<bool>> {
    src.module
        .types
        .iter()
        .filter_map(|(handle, ty)| match ty.inner {
            TypeInner::Struct { ref members } if members.iter().any(|m| m.row_major) => {
                Some((handle, members.iter().map(|m| m.row_major).collect()))
            }
            _ => None,
        })
        .collect()
}

fn convert_member(ctx: &mut Context<'_>, member: &StructMember) -> StructMember {
    if !member.row_major {
        return ctx.clone_member(member);
    }
    StructMember {
        ty: transposed(ctx, member.ty),
        row_major: false,
        ..member.clone()
    }
}

fn unsupported(what: &str) -> TransformError {
    TransformError::Unsupported(format!("{what} of a row-major matrix"))
}

/// Evaluate the indices with side effects in the access chain `expr` once,
/// into `let`s emitted before `stmt`.
fn hoist_indices(ctx: &mut Context<'_>, stmt: Handle<Statement>, mut expr: Handle<Expression>) {
    let src = ctx.src;
    let mut indices = Vec::new();
    loop {
        match src.module.expressions[expr] {
            Expression::Member { base, .. } => expr = base,
            Expression::Index { base, index } => {
                if src.info[index].has_side_effects {
                    indices.push(index);
                }
                expr = base;
            }
            _ => break,
        }
    }
    // Innermost access first, in evaluation order.
    for index in indices.into_iter().rev() {
        let name = ctx.dst.unique_symbol("tint_symbol");
        ctx.insert_before(stmt, move |ctx| {
            let value = ctx.clone_expression_node(index);
            ctx.dst.stmt(Statement::Declare {
                kind: DeclarationKind::Let,
                name,
                ty: None,
                init: Some(value),
            })
        });
        ctx.replace_expression(index, move |ctx| ctx.dst.expr(Expression::Identifier(name)));
    }
}

/// Record the conversion of the pending access `expr` where it is consumed.
fn resolve_pending(
    ctx: &mut Context<'_>,
    expr: Handle<Expression>,
    pending: Pending,
) -> Result<(), TransformError> {
    let src = ctx.src;
    let module = &src.module;

    if let Pending::Scalar {
        matrix,
        column,
        row,
    } = pending
    {
        // The stored matrix holds element [column][row] at [row][column].
        ctx.replace_expression(expr, move |ctx| {
            let matrix = ctx.clone_expression(matrix);
            let row = match row {
                Row::Index(row) => ctx.clone_expression(row),
                Row::Component(component) => ctx.dst.u32(component as u32),
            };
            let stored_column = ctx.dst.index(matrix, row);
            let column = ctx.clone_expression(column);
            ctx.dst.index(stored_column, column)
        });
        return Ok(());
    }

    match src.info[expr].parent {
        Some(Parent::Expression(parent)) => {
            if let Expression::Unary {
                op: UnaryOperator::AddressOf,
                ..
            } = module.expressions[parent]
            {
                return Err(unsupported("taking the address"));
            }
        }
        Some(Parent::Statement(stmt)) => match module.statements[stmt] {
            Statement::Assign { target, value } if target == expr => {
                if let Pending::Column { matrix, .. } = pending {
                    // The matrix is both read and written.
                    if src.info[matrix].has_side_effects {
                        hoist_indices(ctx, stmt, matrix);
                    }
                }
                ctx.replace_statement(stmt, move |ctx| match pending {
                    Pending::Array { ty } | Pending::Matrix { ty } => {
                        let target = ctx.clone_expression(target);
                        let value = ctx.clone_expression(value);
                        let value = to_stored(ctx, ty, value);
                        ctx.dst.assign(target, value)
                    }
                    Pending::Column { matrix, ty, column } => {
                        let stored = transposed(ctx, ty);
                        let helper = store_row(ctx, stored);
                        let target = ctx.clone_expression(matrix);
                        let current = ctx.clone_expression(matrix);
                        let column = clone_index(ctx, column);
                        let value = ctx.clone_expression(value);
                        let value = ctx.dst.call_symbol(helper, vec![current, column, value]);
                        ctx.dst.assign(target, value)
                    }
                    Pending::Scalar { .. } => unreachable!(),
                });
                return Ok(());
            }
            _ => {}
        },
        Some(Parent::Global(_)) | None => {}
    }

    if !src.info[expr].load {
        return Err(unsupported("this use"));
    }
    if let Pending::Array { ty } = pending {
        if module.types[ty].inner.array_count().is_none() {
            return Err(unsupported("loading a runtime-sized array"));
        }
    }
    ctx.replace_expression(expr, move |ctx| match pending {
        Pending::Array { ty } | Pending::Matrix { ty } => {
            let value = ctx.clone_expression_node(expr);
            to_logical(ctx, ty, value)
        }
        Pending::Column { matrix, ty, column } => {
            let stored = transposed(ctx, ty);
            let helper = load_row(ctx, stored);
            let matrix = ctx.clone_expression(matrix);
            let column = clone_index(ctx, column);
            ctx.dst.call_symbol(helper, vec![matrix, column])
        }
        Pending::Scalar { .. } => unreachable!(),
    });
    Ok(())
}

fn transpose(
    ctx: &mut Context<'_>,
    structs: &FastHashMap<Handle<Type>, Vec<bool>>,
) -> Result<(), TransformError> {
    let src = ctx.src;
    let module = &src.module;

    // Pending accesses, in arena order. Operands precede the expressions
    // using them, so a base is classified before its accessors.
    let mut pending = Vec::new();
    let mut classified = FastHashMap::<Handle<Expression>, Pending>::default();

    for (handle, expression) in module.expressions.iter() {
        let info = match src.info.get(handle) {
            Some(info) => info,
            None => continue,
        };
        let next = match *expression {
            Expression::Member { base, .. } => match (info.member.as_ref(), classified.get(&base)) {
                (Some(&MemberKind::Struct(index)), _) => {
                    let owner = match src.info[base].object_type(&module.types) {
                        Some(owner) => owner,
                        None => continue,
                    };
                    let is_row_major = structs
                        .get(&owner)
                        .map_or(false, |flags| flags[index as usize]);
                    let ty = match info.ty {
                        Some(ty) if is_row_major => ty,
                        _ => continue,
                    };
                    if info.reference.is_none() {
                        // A member of a struct value is converted right away.
                        ctx.replace_expression(handle, move |ctx| {
                            let value = ctx.clone_expression_node(handle);
                            to_logical(ctx, ty, value)
                        });
                        continue;
                    }
                    match module.types[ty].inner {
                        TypeInner::Array { .. } => Pending::Array { ty },
                        _ => Pending::Matrix { ty },
                    }
                }
                (
                    Some(&MemberKind::Component(component)),
                    Some(&Pending::Column { matrix, column, .. }),
                ) => Pending::Scalar {
                    matrix,
                    column,
                    row: Row::Component(component),
                },
                _ => continue,
            },
            Expression::Index { base, index } => match classified.get(&base) {
                Some(&Pending::Array { ty }) => match module.types[ty].inner {
                    TypeInner::Array { base, .. } => Pending::Matrix { ty: base },
                    ref other => ice!("pending array of type {:?}", other),
                },
                Some(&Pending::Matrix { ty }) => Pending::Column {
                    matrix: base,
                    ty,
                    column: index,
                },
                Some(&Pending::Column { matrix, column, .. }) => Pending::Scalar {
                    matrix,
                    column,
                    row: Row::Index(index),
                },
                Some(&Pending::Scalar { .. }) | None => continue,
            },
            _ => continue,
        };
        classified.insert(handle, next);
        pending.push(handle);
    }

    for handle in pending {
        // Accesses that are indexed further resolve at their accessor.
        let propagated = match src.info[handle].parent {
            Some(Parent::Expression(parent)) => classified.contains_key(&parent),
            _ => false,
        };
        if !propagated {
            resolve_pending(ctx, handle, classified[&handle])?;
        }
    }

    // Constructor arguments for row-major members are logical values.
    for (handle, expression) in module.expressions.iter() {
        let (ty, arguments) = match *expression {
            Expression::Call {
                callee: Callee::Construct(ty),
                ref arguments,
            } if !arguments.is_empty() && structs.contains_key(&ty) => (ty, arguments.clone()),
            _ => continue,
        };
        let flags = structs[&ty].clone();
        ctx.replace_expression(handle, move |ctx| {
            let src = ctx.src;
            let members = match src.module.types[ty].inner {
                TypeInner::Struct { ref members } => members,
                ref other => ice!("constructing {:?}", other),
            };
            let values = arguments
                .iter()
                .zip(members.iter().zip(flags.iter()))
                .map(|(&argument, (member, &row_major))| {
                    let value = ctx.clone_expression(argument);
                    if row_major {
                        to_stored(ctx, member.ty, value)
                    } else {
                        value
                    }
                })
                .collect();
            let ty = ctx.clone_type(ty);
            ctx.dst.construct(ty, values)
        });
    }

    for &ty in structs.keys() {
        ctx.replace_type(ty, move |ctx| {
            let src = ctx.src;
            let source = &src.module.types[ty];
            let members = match source.inner {
                TypeInner::Struct { ref members } => members
                    .iter()
                    .map(|member| convert_member(ctx, member))
                    .collect(),
                ref other => ice!("row-major member in {:?}", other),
            };
            ctx.dst.module.types.insert(
                Type {
                    name: source.name.clone(),
                    inner: TypeInner::Struct { members },
                },
                src.module.types.get_span(ty),
            )
        });
    }

    Ok(())
}

fn should_run(src: &Program) -> bool {
    !row_major_structs(src).is_empty()
}

impl Transform for TransposeRowMajor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, src: &Program, _inputs: &DataMap, _outputs: &mut DataMap) -> ApplyResult {
        if !should_run(src) {
            return ApplyResult::Skip;
        }
        let structs = row_major_structs(src);
        let mut ctx = CloneContext::new(src, State::default());
        let result = transpose(&mut ctx, &structs).map(|()| {
            ctx.clone_module();
            let (builder, _) = ctx.finish();
            builder.build()
        });
        ApplyResult::from_result(src, result)
    }
}
