/*!
Removal of custom matrix strides.

A structure member whose `@stride` (the matrix stride) differs from the
natural column stride is re-typed as an array of column vectors carrying
that stride, and every use of the member converts between the two forms
through a helper:

```text
struct S {                                struct S {
  @stride(32)                               m : @stride(32) array<vec2<f32>, 2u>,
  m : mat2x2<f32>,              -->       }
}
let x = s.m;                              let x = arr_to_mat2x2_stride_32(s.m);
s.m = x;                                  s.m = mat2x2_stride_32_to_arr(x);
s.m[1]                                    s.m[1]
```

Columns selected by an index access need no conversion. A matrix stride
equal to the natural stride is simply dropped.

For a member holding an array of matrices, each matrix is converted on
element access. The array itself can't be copied as a whole, and can't
carry an array stride other than the natural one of its new elements.
*/

use super::{ApplyResult, CloneContext, DataMap, Transform, TransformError};
use crate::{
    arena::Handle, proc::Layouter, valid::MemberKind, valid::Parent, ArraySize, Callee,
    Expression, FastHashMap, FunctionArgument, Program, Scalar, Statement, StructMember, Symbol,
    Type, TypeInner, UnaryOperator, VectorSize,
};

pub(super) const NAME: &str = "decompose-strided-matrix";

/// Replace custom-stride matrix members with arrays of column vectors.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecomposeStridedMatrix;

/// A matrix member with a custom column stride.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
struct StridedMatrix {
    columns: VectorSize,
    rows: VectorSize,
    scalar: Scalar,
    stride: u32,
}

/// How a decomposed member is laid out.
#[derive(Clone, Copy, Debug)]
enum MemberLayout {
    Matrix(StridedMatrix),
    /// An array of matrices, with the original array stride.
    Array {
        matrix: StridedMatrix,
        size: ArraySize,
        stride: Option<u32>,
    },
}

impl MemberLayout {
    const fn matrix(&self) -> StridedMatrix {
        match *self {
            MemberLayout::Matrix(matrix) | MemberLayout::Array { matrix, .. } => matrix,
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
enum Direction {
    ArrayToMatrix,
    MatrixToArray,
}

#[derive(Default)]
struct State {
    helpers: FastHashMap<(Direction, StridedMatrix), Symbol>,
}

type Context<'a> = CloneContext<'a, State>;

impl StridedMatrix {
    fn matrix_type(&self, ctx: &mut Context<'_>) -> Handle<Type> {
        ctx.dst.mat(self.columns, self.rows, self.scalar)
    }

    /// `@stride(S) array<vecR<T>, C>`
    fn array_type(&self, ctx: &mut Context<'_>) -> Handle<Type> {
        let column = ctx.dst.vec(self.rows, self.scalar);
        ctx.dst
            .strided_array(column, Some(self.columns as u32), Some(self.stride))
    }

    /// `mat2x3`
    fn short_name(&self) -> String {
        format!("mat{}x{}", self.columns as u8, self.rows as u8)
    }
}

/// The conversion function between the two forms of `matrix`.
fn helper(ctx: &mut Context<'_>, direction: Direction, matrix: StridedMatrix) -> Symbol {
    if let Some(&name) = ctx.state.helpers.get(&(direction, matrix)) {
        return name;
    }
    let prefix = match direction {
        Direction::ArrayToMatrix => {
            format!("arr_to_{}_stride_{}", matrix.short_name(), matrix.stride)
        }
        Direction::MatrixToArray => {
            format!("{}_stride_{}_to_arr", matrix.short_name(), matrix.stride)
        }
    };
    let name = ctx.dst.unique_symbol(&prefix);
    ctx.state.helpers.insert((direction, matrix), name);

    let matrix_ty = matrix.matrix_type(ctx);
    let array_ty = matrix.array_type(ctx);
    let (argument_name, argument_ty, result_ty) = match direction {
        Direction::ArrayToMatrix => ("arr", array_ty, matrix_ty),
        Direction::MatrixToArray => ("m", matrix_ty, array_ty),
    };
    let columns = (0..matrix.columns as u32)
        .map(|column| {
            let value = ctx.dst.ident(argument_name);
            let index = ctx.dst.u32(column);
            ctx.dst.index(value, index)
        })
        .collect();
    let value = ctx.dst.construct(result_ty, columns);
    let body = vec![ctx.dst.ret(Some(value))];
    let argument = FunctionArgument {
        name: ctx.dst.symbol(argument_name),
        ty: argument_ty,
    };
    log::debug!("synthesized {}", prefix);
    ctx.dst.push_function(crate::Function {
        name,
        arguments: vec![argument],
        result: Some(result_ty),
        body: Some(body),
        stage: None,
        attributes: Vec::new(),
    });
    name
}

/// Classify the members of struct types with matrix strides.
fn member_layouts(
    src: &Program,
) -> Result<FastHashMap<(Handle<Type>, u32), Option<MemberLayout>>, TransformError> {
    let types = &src.module.types;
    let mut layouts = FastHashMap::default();
    for (handle, ty) in types.iter() {
        let members = match ty.inner {
            TypeInner::Struct { ref members } => members,
            _ => continue,
        };
        for (index, member) in members.iter().enumerate() {
            let stride = match member.matrix_stride {
                Some(stride) => stride,
                None => continue,
            };
            let matrix_of = |ty: Handle<Type>| match types[ty].inner {
                TypeInner::Matrix {
                    columns,
                    rows,
                    scalar,
                } => StridedMatrix {
                    columns,
                    rows,
                    scalar,
                    stride,
                },
                ref other => ice!("matrix stride on {:?}", other),
            };
            let layout = match types[member.ty].inner {
                TypeInner::Array { base, size, stride: array_stride } => {
                    let matrix = matrix_of(base);
                    let redundant = stride == Layouter::column_stride(matrix.rows, matrix.scalar);
                    let element_stride = Layouter::strided_matrix(
                        matrix.columns,
                        matrix.rows,
                        matrix.scalar,
                        stride,
                    )
                    .to_stride();
                    match array_stride {
                        Some(array_stride) if !redundant && array_stride != element_stride => {
                            return Err(TransformError::Unsupported(format!(
                                "member '{}': array stride {} of matrices with a custom stride, expected {}",
                                member.name, array_stride, element_stride
                            )));
                        }
                        _ => {}
                    }
                    MemberLayout::Array {
                        matrix,
                        size,
                        stride: array_stride,
                    }
                }
                _ => MemberLayout::Matrix(matrix_of(member.ty)),
            };
            let natural = Layouter::column_stride(layout.matrix().rows, layout.matrix().scalar);
            // `None` marks a redundant stride, which is just dropped.
            let layout = if stride == natural { None } else { Some(layout) };
            layouts.insert((handle, index as u32), layout);
        }
    }
    Ok(layouts)
}

/// Convert a member's type for the output.
fn convert_member(
    ctx: &mut Context<'_>,
    member: &StructMember,
    layout: Option<MemberLayout>,
) -> StructMember {
    let ty = match layout {
        None => ctx.clone_type(member.ty),
        Some(MemberLayout::Matrix(matrix)) => matrix.array_type(ctx),
        Some(MemberLayout::Array {
            matrix,
            size,
            stride,
        }) => {
            let base = matrix.array_type(ctx);
            ctx.dst.ty(TypeInner::Array { base, size, stride })
        }
    };
    StructMember {
        ty,
        matrix_stride: None,
        ..member.clone()
    }
}

/// Record the conversions of a matrix-valued access to a decomposed member.
fn convert_matrix_use(
    ctx: &mut Context<'_>,
    expr: Handle<Expression>,
    matrix: StridedMatrix,
) -> Result<(), TransformError> {
    let src = ctx.src;
    let module = &src.module;
    match src.info[expr].parent {
        Some(Parent::Expression(parent)) => match module.expressions[parent] {
            // A column.
            Expression::Index { base, .. } if base == expr => return Ok(()),
            Expression::Unary {
                op: UnaryOperator::AddressOf,
                ..
            } => {
                return Err(TransformError::Unsupported(
                    "pointers to matrices with a custom stride".to_string(),
                ))
            }
            _ => {}
        },
        Some(Parent::Statement(stmt)) => {
            if let Statement::Assign { target, value } = module.statements[stmt] {
                if target == expr {
                    ctx.replace_statement(stmt, move |ctx| {
                        let target = ctx.clone_expression(target);
                        let value = ctx.clone_expression(value);
                        let convert = helper(ctx, Direction::MatrixToArray, matrix);
                        let value = ctx.dst.call_symbol(convert, vec![value]);
                        ctx.dst.assign(target, value)
                    });
                    return Ok(());
                }
            }
        }
        Some(Parent::Global(_)) | None => {}
    }
    ctx.replace_expression(expr, move |ctx| {
        let value = ctx.clone_expression_node(expr);
        let convert = helper(ctx, Direction::ArrayToMatrix, matrix);
        ctx.dst.call_symbol(convert, vec![value])
    });
    Ok(())
}

fn decompose(
    ctx: &mut Context<'_>,
    layouts: &FastHashMap<(Handle<Type>, u32), Option<MemberLayout>>,
) -> Result<(), TransformError> {
    let src = ctx.src;
    let module = &src.module;

    for (handle, expression) in module.expressions.iter() {
        match *expression {
            Expression::Member { base, .. } => {
                let index = match src.info[handle].member {
                    Some(MemberKind::Struct(index)) => index,
                    _ => continue,
                };
                let owner = match src.info[base].object_type(&module.types) {
                    Some(ty) => ty,
                    None => continue,
                };
                match layouts.get(&(owner, index)) {
                    Some(&Some(MemberLayout::Matrix(matrix))) => {
                        convert_matrix_use(ctx, handle, matrix)?
                    }
                    Some(&Some(MemberLayout::Array { matrix, .. })) => {
                        // Only single matrices of the array are converted.
                        let element = match src.info[handle].parent {
                            Some(Parent::Expression(parent)) => match module.expressions[parent] {
                                Expression::Index { base, .. } if base == handle => Some(parent),
                                _ => None,
                            },
                            _ => None,
                        };
                        match element {
                            Some(element) => convert_matrix_use(ctx, element, matrix)?,
                            None => {
                                return Err(TransformError::Unsupported(
                                    "arrays of matrices with a custom stride can only be accessed per element"
                                        .to_string(),
                                ))
                            }
                        }
                    }
                    Some(&None) | None => {}
                }
            }
            Expression::Call {
                callee: Callee::Construct(ty),
                ref arguments,
            } if !arguments.is_empty() => {
                let members = match module.types[ty].inner {
                    TypeInner::Struct { ref members } => members,
                    _ => continue,
                };
                let mut conversions = Vec::with_capacity(members.len());
                for index in 0..members.len() as u32 {
                    conversions.push(match layouts.get(&(ty, index)) {
                        Some(&Some(MemberLayout::Matrix(matrix))) => Some(matrix),
                        Some(&Some(MemberLayout::Array { .. })) => {
                            return Err(TransformError::Unsupported(
                                "constructing arrays of matrices with a custom stride".to_string(),
                            ))
                        }
                        Some(&None) | None => None,
                    });
                }
                if conversions.iter().all(Option::is_none) {
                    continue;
                }
                let arguments = arguments.clone();
                ctx.replace_expression(handle, move |ctx| {
                    let ty = ctx.clone_type(ty);
                    let values = arguments
                        .iter()
                        .zip(conversions.iter())
                        .map(|(&argument, &conversion)| {
                            let value = ctx.clone_expression(argument);
                            match conversion {
                                Some(matrix) => {
                                    let convert = helper(ctx, Direction::MatrixToArray, matrix);
                                    ctx.dst.call_symbol(convert, vec![value])
                                }
                                None => value,
                            }
                        })
                        .collect();
                    ctx.dst.construct(ty, values)
                });
            }
            _ => {}
        }
    }

    // Rebuild every structure with a matrix stride.
    let mut structs = layouts.keys().map(|&(ty, _)| ty).collect::<Vec<_>>();
    structs.sort();
    structs.dedup();
    for ty in structs {
        let member_layouts = match module.types[ty].inner {
            TypeInner::Struct { ref members } => (0..members.len() as u32)
                .map(|index| layouts.get(&(ty, index)).copied().flatten())
                .collect::<Vec<_>>(),
            _ => continue,
        };
        ctx.replace_type(ty, move |ctx| {
            let src = ctx.src;
            let source = &src.module.types[ty];
            let members = match source.inner {
                TypeInner::Struct { ref members } => members
                    .iter()
                    .zip(member_layouts.iter())
                    .map(|(member, &layout)| convert_member(ctx, member, layout))
                    .collect(),
                _ => Vec::new(),
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
    src.module.types.iter().any(|(_, ty)| match ty.inner {
        TypeInner::Struct { ref members } => {
            members.iter().any(|member| member.matrix_stride.is_some())
        }
        _ => false,
    })
}

impl Transform for DecomposeStridedMatrix {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, src: &Program, _inputs: &DataMap, _outputs: &mut DataMap) -> ApplyResult {
        if !should_run(src) {
            return ApplyResult::Skip;
        }
        let result = member_layouts(src).and_then(|layouts| {
            let mut ctx = CloneContext::new(src, State::default());
            decompose(&mut ctx, &layouts)?;
            ctx.clone_module();
            let (builder, _) = ctx.finish();
            Ok(builder.build())
        });
        ApplyResult::from_result(src, result)
    }
}
