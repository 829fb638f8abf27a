use crate::{
    arena::{Handle, UniqueArena},
    proc::{Alignment, Layouter},
    AddressSpace, Extensions, ScalarKind, Type, TypeInner,
};

#[derive(Clone, Copy, Debug, thiserror::Error)]
pub enum Disalignment {
    #[error("The array stride {stride} is not a multiple of the required alignment {alignment}")]
    ArrayStride { stride: u32, alignment: Alignment },
    #[error("The struct member[{index}] offset {offset} is not a multiple of the required alignment {alignment}")]
    Member {
        index: u32,
        offset: u32,
        alignment: Alignment,
    },
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum TypeError {
    #[error("The {0:?} scalar width {1} is not supported")]
    InvalidWidth(ScalarKind, crate::Bytes),
    #[error("f16 requires `enable f16;`")]
    MissingF16Extension,
    #[error("Matrices of {0:?} are not supported")]
    InvalidMatrixScalar(ScalarKind),
    #[error("Structure member '{0}' is marked row-major but is not a matrix or an array of matrices")]
    InvalidRowMajor(String),
    #[error("Structure member '{0}' has a matrix stride but is not a matrix or an array of matrices")]
    InvalidMatrixStride(String),
    #[error("Structure member '{name}' can't be dynamically-sized, has type {ty:?}")]
    InvalidDynamicArray { name: String, ty: Handle<Type> },
    #[error("Atomics of {0:?} are not supported")]
    InvalidAtomic(ScalarKind),
    #[error("Uniform buffer layout is violated")]
    UniformLayout(#[from] Disalignment),
    #[error("Type {0:?} can't be used in a uniform buffer")]
    NotUniformCompatible(Handle<Type>),
}

pub(super) fn validate_type(
    handle: Handle<Type>,
    types: &UniqueArena<Type>,
    extensions: Extensions,
) -> Result<(), TypeError> {
    let ty = &types[handle];
    if let Some(scalar) = ty.inner.scalar() {
        match (scalar.kind, scalar.width) {
            (ScalarKind::Float, 2) if !extensions.contains(Extensions::F16) => {
                return Err(TypeError::MissingF16Extension)
            }
            (ScalarKind::Float, 2 | 4) | (ScalarKind::Sint | ScalarKind::Uint, 4) => {}
            (ScalarKind::Bool, 1) => {}
            (kind, width) => return Err(TypeError::InvalidWidth(kind, width)),
        }
    }

    match ty.inner {
        TypeInner::Matrix { scalar, .. } if scalar.kind != ScalarKind::Float => {
            Err(TypeError::InvalidMatrixScalar(scalar.kind))
        }
        TypeInner::Atomic(scalar)
            if !matches!(scalar.kind, ScalarKind::Sint | ScalarKind::Uint) =>
        {
            Err(TypeError::InvalidAtomic(scalar.kind))
        }
        TypeInner::Struct { .. } => validate_struct_members(handle, types),
        _ => Ok(()),
    }
}

/// Check the attributes of the members of struct `ty`.
fn validate_struct_members(
    ty: Handle<Type>,
    types: &UniqueArena<Type>,
) -> Result<(), TypeError> {
    let members = match types[ty].inner {
        TypeInner::Struct { ref members } => members,
        _ => return Ok(()),
    };
    for (index, member) in members.iter().enumerate() {
        let inner = &types[member.ty].inner;
        let is_matrix_like = match *inner {
            TypeInner::Matrix { .. } => true,
            TypeInner::Array { base, .. } => matches!(types[base].inner, TypeInner::Matrix { .. }),
            _ => false,
        };
        if member.row_major && !is_matrix_like {
            return Err(TypeError::InvalidRowMajor(member.name.clone()));
        }
        if member.matrix_stride.is_some() && !is_matrix_like {
            return Err(TypeError::InvalidMatrixStride(member.name.clone()));
        }
        if let TypeInner::Array {
            size: crate::ArraySize::Dynamic,
            ..
        } = *inner
        {
            if index + 1 != members.len() {
                return Err(TypeError::InvalidDynamicArray {
                    name: member.name.clone(),
                    ty: member.ty,
                });
            }
        }
    }
    Ok(())
}

/// Check the stricter layout rules of the uniform address space.
pub(super) fn validate_uniform_layout(
    ty: Handle<Type>,
    types: &UniqueArena<Type>,
    layouter: &Layouter,
) -> Result<(), TypeError> {
    match types[ty].inner {
        TypeInner::Scalar(_) | TypeInner::Vector { .. } | TypeInner::Matrix { .. } => Ok(()),
        TypeInner::Array {
            base,
            size: crate::ArraySize::Constant(_),
            ..
        } => {
            let stride = layouter.array_stride(types, ty);
            if !Alignment::SIXTEEN.is_aligned(stride) {
                return Err(Disalignment::ArrayStride {
                    stride,
                    alignment: Alignment::SIXTEEN,
                }
                .into());
            }
            validate_uniform_layout(base, types, layouter)
        }
        TypeInner::Struct { ref members } => {
            let offsets = layouter.member_offsets(ty);
            for (index, (member, &offset)) in members.iter().zip(offsets).enumerate() {
                let alignment = layouter.required_alignment(types, member.ty, AddressSpace::Uniform);
                if !alignment.is_aligned(offset) {
                    return Err(Disalignment::Member {
                        index: index as u32,
                        offset,
                        alignment,
                    }
                    .into());
                }
                validate_uniform_layout(member.ty, types, layouter)?;
            }
            Ok(())
        }
        TypeInner::Array { .. } | TypeInner::Atomic(_) | TypeInner::Pointer { .. } => {
            Err(TypeError::NotUniformCompatible(ty))
        }
    }
}
