use super::Alignment;
use crate::{
    arena::{Handle, HandleVec, UniqueArena},
    AddressSpace, ArraySize, FastHashMap, StructMember, Type, TypeInner,
};
use std::ops;

/// Size and alignment information for a type.
#[derive(Clone, Copy, Debug, Hash, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct TypeLayout {
    pub size: u32,
    pub alignment: Alignment,
}

impl TypeLayout {
    /// Produce the stride as if this type is a base of an array.
    pub const fn to_stride(&self) -> u32 {
        self.alignment.round_up(self.size)
    }
}

/// Helper processor that derives the sizes of all types.
///
/// `Layouter` uses the default layout algorithm/table, described in
/// [WGSL §4.3.7, "Memory Layout"]. Explicit `@stride`, `@offset`, `@align`
/// and `@size` attributes override the defaults.
///
/// A `Layouter` may be indexed by `Handle<Type>` values: `layouter[handle]` is the
/// layout of the type whose handle is `handle`.
///
/// [WGSL §4.3.7, "Memory Layout"](https://gpuweb.github.io/gpuweb/wgsl/#memory-layouts)
#[derive(Clone, Debug, Default)]
pub struct Layouter {
    /// Layouts for types in an arena, indexed by `Handle` index.
    layouts: HandleVec<Type, TypeLayout>,
    /// Byte offsets of the members of every struct type.
    offsets: FastHashMap<Handle<Type>, Box<[u32]>>,
}

impl ops::Index<Handle<Type>> for Layouter {
    type Output = TypeLayout;
    fn index(&self, handle: Handle<Type>) -> &TypeLayout {
        &self.layouts[handle]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
pub enum LayoutErrorInner {
    #[error("Array element type {0:?} doesn't exist")]
    InvalidArrayElementType(Handle<Type>),
    #[error("Struct member[{0}] type {1:?} doesn't exist")]
    InvalidStructMemberType(u32, Handle<Type>),
    #[error("Runtime-sized type used where a fixed size is required")]
    RuntimeSized,
    #[error("Array stride {stride} is smaller than the element size {size}")]
    StrideTooSmall { stride: u32, size: u32 },
    #[error("Array stride {stride} is not a multiple of the element alignment {alignment}")]
    MisalignedStride { stride: u32, alignment: Alignment },
    #[error("Alignment {0} is not a power of two")]
    InvalidAlignment(u32),
    #[error("Struct member[{index}] offset {offset} overlaps the previous member, which ends at {end}")]
    MemberOverlap { index: u32, offset: u32, end: u32 },
    #[error("Struct member[{index}] offset {offset} is not a multiple of its alignment {alignment}")]
    MisalignedMember {
        index: u32,
        offset: u32,
        alignment: Alignment,
    },
    #[error("Struct member[{index}] size {size} is smaller than its type's size {min}")]
    MemberSizeTooSmall { index: u32, size: u32, min: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
#[error("Error laying out type {ty:?}: {inner}")]
pub struct LayoutError {
    pub ty: Handle<Type>,
    pub inner: LayoutErrorInner,
}

impl LayoutErrorInner {
    const fn with(self, ty: Handle<Type>) -> LayoutError {
        LayoutError { ty, inner: self }
    }
}

impl Layouter {
    /// Byte offsets of the members of the struct type `ty`.
    pub fn member_offsets(&self, ty: Handle<Type>) -> &[u32] {
        self.offsets.get(&ty).map_or(&[], |offsets| offsets)
    }

    /// The byte offset of member `index` of the struct type `ty`.
    pub fn member_offset(&self, ty: Handle<Type>, index: u32) -> u32 {
        self.member_offsets(ty)[index as usize]
    }

    /// The byte distance between consecutive elements of the array `ty`.
    ///
    /// # Panics
    ///
    /// If `ty` is not an array type.
    pub fn array_stride(&self, types: &UniqueArena<Type>, ty: Handle<Type>) -> u32 {
        match types[ty].inner {
            TypeInner::Array { base, stride, .. } => {
                stride.unwrap_or_else(|| self[base].to_stride())
            }
            ref other => unreachable!("array_stride of {other:?}"),
        }
    }

    /// The stride `base` gets as an array element without an explicit `@stride`.
    pub fn natural_stride(&self, base: Handle<Type>) -> u32 {
        self[base].to_stride()
    }

    /// The byte distance between the columns of a matrix with `rows` rows.
    pub fn column_stride(rows: crate::VectorSize, scalar: crate::Scalar) -> u32 {
        Alignment::from(rows) * scalar.width as u32
    }

    /// The size of `ty`, failing for types whose size is only known at runtime.
    pub fn static_size(&self, types: &UniqueArena<Type>, ty: Handle<Type>) -> Result<u32, LayoutError> {
        match types[ty].inner {
            TypeInner::Array {
                size: ArraySize::Dynamic,
                ..
            } => Err(LayoutErrorInner::RuntimeSized.with(ty)),
            TypeInner::Struct { ref members } => match members.last() {
                Some(last) => self.static_size(types, last.ty).map(|_| self[ty].size),
                None => Ok(self[ty].size),
            },
            _ => Ok(self[ty].size),
        }
    }

    /// The alignment `ty` must have when placed in `space`.
    ///
    /// The uniform address space rounds the alignment of arrays, matrices and
    /// structures up to 16 bytes.
    pub fn required_alignment(
        &self,
        types: &UniqueArena<Type>,
        ty: Handle<Type>,
        space: AddressSpace,
    ) -> Alignment {
        let alignment = self[ty].alignment;
        match (space, &types[ty].inner) {
            (
                AddressSpace::Uniform,
                &TypeInner::Array { .. } | &TypeInner::Matrix { .. } | &TypeInner::Struct { .. },
            ) => alignment.max(Alignment::SIXTEEN),
            _ => alignment,
        }
    }

    /// Extend this `Layouter` with layouts for any new entries in `types`.
    ///
    /// Types are laid out in arena order, so a type may only refer to types
    /// with smaller handles. When a type fails to lay out, a best-effort layout
    /// is still recorded for it before the error is returned, so calling
    /// `update` again resumes with the next type.
    pub fn update(&mut self, types: &UniqueArena<Type>) -> Result<(), LayoutError> {
        use crate::TypeInner as Ti;

        for (ty_handle, ty) in types.iter().skip(self.layouts.len()) {
            let (layout, error) = match ty.inner {
                Ti::Scalar(scalar) | Ti::Atomic(scalar) => {
                    let width = scalar.width as u32;
                    let layout = TypeLayout {
                        size: width,
                        alignment: Alignment::new(width).unwrap_or(Alignment::ONE),
                    };
                    (layout, None)
                }
                Ti::Vector { size, scalar } => {
                    let layout = TypeLayout {
                        size: size as u32 * scalar.width as u32,
                        alignment: Self::vector_alignment(size, scalar),
                    };
                    (layout, None)
                }
                Ti::Matrix {
                    columns,
                    rows,
                    scalar,
                } => {
                    let layout = TypeLayout {
                        size: columns as u32 * Self::column_stride(rows, scalar),
                        alignment: Self::vector_alignment(rows, scalar),
                    };
                    (layout, None)
                }
                Ti::Pointer { .. } => (
                    TypeLayout {
                        size: 0,
                        alignment: Alignment::ONE,
                    },
                    None,
                ),
                Ti::Array { base, size, stride } => {
                    if base >= ty_handle {
                        let fallback = TypeLayout {
                            size: 0,
                            alignment: Alignment::ONE,
                        };
                        self.layouts.insert(ty_handle, fallback);
                        return Err(LayoutErrorInner::InvalidArrayElementType(base).with(ty_handle));
                    }
                    let element = self[base];
                    let natural = element.to_stride();
                    let mut error = None;
                    let stride = match stride {
                        Some(stride) if stride < element.size => {
                            error = Some(LayoutErrorInner::StrideTooSmall {
                                stride,
                                size: element.size,
                            });
                            natural
                        }
                        Some(stride) if !element.alignment.is_aligned(stride) => {
                            error = Some(LayoutErrorInner::MisalignedStride {
                                stride,
                                alignment: element.alignment,
                            });
                            natural
                        }
                        Some(stride) => stride,
                        None => natural,
                    };
                    let count = match size {
                        ArraySize::Constant(count) => count.get(),
                        ArraySize::Dynamic => 1,
                    };
                    let layout = TypeLayout {
                        size: count * stride,
                        alignment: element.alignment,
                    };
                    (layout, error)
                }
                Ti::Struct { ref members } => {
                    let mut alignment = Alignment::ONE;
                    let mut offset = 0;
                    let mut offsets = Vec::with_capacity(members.len());
                    let mut error = None;
                    for (index, member) in members.iter().enumerate() {
                        let index = index as u32;
                        if member.ty >= ty_handle {
                            error.get_or_insert(LayoutErrorInner::InvalidStructMemberType(
                                index, member.ty,
                            ));
                            offsets.push(offset);
                            continue;
                        }
                        let member_layout = match types[member.ty].inner {
                            ref inner @ Ti::Matrix { .. } => {
                                Self::annotated_matrix(member, inner).unwrap_or(self[member.ty])
                            }
                            Ti::Array { base, size, stride } => {
                                match Self::annotated_matrix(member, &types[base].inner) {
                                    Some(element) => {
                                        let count = match size {
                                            ArraySize::Constant(count) => count.get(),
                                            ArraySize::Dynamic => 1,
                                        };
                                        TypeLayout {
                                            size: count
                                                * stride.unwrap_or_else(|| element.to_stride()),
                                            alignment: element.alignment,
                                        }
                                    }
                                    None => self[member.ty],
                                }
                            }
                            _ => self[member.ty],
                        };
                        let member_alignment = match member.align {
                            Some(align) => Alignment::new(align).unwrap_or_else(|| {
                                error.get_or_insert(LayoutErrorInner::InvalidAlignment(align));
                                member_layout.alignment
                            }),
                            None => member_layout.alignment,
                        };
                        let start = match member.offset {
                            Some(explicit) if explicit < offset => {
                                error.get_or_insert(LayoutErrorInner::MemberOverlap {
                                    index,
                                    offset: explicit,
                                    end: offset,
                                });
                                member_alignment.round_up(offset)
                            }
                            Some(explicit) if !member_alignment.is_aligned(explicit) => {
                                error.get_or_insert(LayoutErrorInner::MisalignedMember {
                                    index,
                                    offset: explicit,
                                    alignment: member_alignment,
                                });
                                member_alignment.round_up(explicit)
                            }
                            Some(explicit) => explicit,
                            None => member_alignment.round_up(offset),
                        };
                        let span = match member.size {
                            Some(size) if size < member_layout.size => {
                                error.get_or_insert(LayoutErrorInner::MemberSizeTooSmall {
                                    index,
                                    size,
                                    min: member_layout.size,
                                });
                                member_layout.size
                            }
                            Some(size) => size,
                            None => member_layout.size,
                        };
                        offsets.push(start);
                        offset = start + span;
                        alignment = alignment.max(member_alignment);
                    }
                    self.offsets.insert(ty_handle, offsets.into_boxed_slice());
                    let layout = TypeLayout {
                        size: alignment.round_up(offset),
                        alignment,
                    };
                    (layout, error)
                }
            };
            self.layouts.insert(ty_handle, layout);
            if let Some(inner) = error {
                return Err(inner.with(ty_handle));
            }
        }

        Ok(())
    }

    /// The layout of a `matCxR` whose columns are `stride` bytes apart.
    pub fn strided_matrix(
        columns: crate::VectorSize,
        rows: crate::VectorSize,
        scalar: crate::Scalar,
        stride: u32,
    ) -> TypeLayout {
        TypeLayout {
            size: columns as u32 * stride,
            alignment: Self::vector_alignment(rows, scalar),
        }
    }

    /// The layout a matrix of type `inner` gets as (an element of) `member`,
    /// if the member's attributes change it.
    fn annotated_matrix(member: &StructMember, inner: &TypeInner) -> Option<TypeLayout> {
        match *inner {
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } if member.row_major || member.matrix_stride.is_some() => {
                // Row-major matrices are stored as their transpose.
                let (columns, rows) = if member.row_major {
                    (rows, columns)
                } else {
                    (columns, rows)
                };
                let stride = member
                    .matrix_stride
                    .unwrap_or_else(|| Self::column_stride(rows, scalar));
                Some(Self::strided_matrix(columns, rows, scalar, stride))
            }
            _ => None,
        }
    }

    fn vector_alignment(size: crate::VectorSize, scalar: crate::Scalar) -> Alignment {
        Alignment::new(Alignment::from(size) * scalar.width as u32).unwrap_or(Alignment::ONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Scalar, Span, VectorSize};
    use std::num::NonZeroU32;

    fn scalar(types: &mut UniqueArena<Type>, scalar: Scalar) -> Handle<Type> {
        types.insert(
            Type {
                name: None,
                inner: TypeInner::Scalar(scalar),
            },
            Span::UNDEFINED,
        )
    }

    fn vector(types: &mut UniqueArena<Type>, size: VectorSize, scalar: Scalar) -> Handle<Type> {
        types.insert(
            Type {
                name: None,
                inner: TypeInner::Vector { size, scalar },
            },
            Span::UNDEFINED,
        )
    }

    fn structure(
        types: &mut UniqueArena<Type>,
        name: &str,
        members: Vec<StructMember>,
    ) -> Handle<Type> {
        types.insert(
            Type {
                name: Some(name.to_string()),
                inner: TypeInner::Struct { members },
            },
            Span::UNDEFINED,
        )
    }

    #[test]
    fn vec3_member_offsets() {
        let mut types = UniqueArena::new();
        let f32 = scalar(&mut types, Scalar::F32);
        let i32 = scalar(&mut types, Scalar::I32);
        let vec3 = vector(&mut types, VectorSize::Tri, Scalar::F32);
        let s = structure(
            &mut types,
            "S",
            vec![
                StructMember::new("a", f32),
                StructMember::new("b", vec3),
                StructMember::new("c", i32),
            ],
        );

        let mut layouter = Layouter::default();
        layouter.update(&types).unwrap();
        assert_eq!(layouter.member_offsets(s), &[0, 16, 28]);
        assert_eq!(layouter[s].size, 32);
        assert_eq!(layouter[s].alignment, Alignment::SIXTEEN);
        assert_eq!(layouter[vec3].to_stride(), 16);
    }

    #[test]
    fn matrix_layout() {
        let mut types = UniqueArena::new();
        let mat3x3 = types.insert(
            Type {
                name: None,
                inner: TypeInner::Matrix {
                    columns: VectorSize::Tri,
                    rows: VectorSize::Tri,
                    scalar: Scalar::F32,
                },
            },
            Span::UNDEFINED,
        );
        let mat4x2_f16 = types.insert(
            Type {
                name: None,
                inner: TypeInner::Matrix {
                    columns: VectorSize::Quad,
                    rows: VectorSize::Bi,
                    scalar: Scalar::F16,
                },
            },
            Span::UNDEFINED,
        );
        let mut layouter = Layouter::default();
        layouter.update(&types).unwrap();
        assert_eq!(layouter[mat3x3].size, 48);
        assert_eq!(layouter[mat3x3].alignment, Alignment::SIXTEEN);
        assert_eq!(layouter[mat4x2_f16].size, 16);
        assert_eq!(layouter[mat4x2_f16].alignment, Alignment::FOUR);
    }

    #[test]
    fn explicit_stride_and_runtime_size() {
        let mut types = UniqueArena::new();
        let f32 = scalar(&mut types, Scalar::F32);
        let strided = types.insert(
            Type {
                name: None,
                inner: TypeInner::Array {
                    base: f32,
                    size: ArraySize::Constant(NonZeroU32::new(4).unwrap()),
                    stride: Some(16),
                },
            },
            Span::UNDEFINED,
        );
        let runtime = types.insert(
            Type {
                name: None,
                inner: TypeInner::Array {
                    base: f32,
                    size: ArraySize::Dynamic,
                    stride: None,
                },
            },
            Span::UNDEFINED,
        );
        let mut layouter = Layouter::default();
        layouter.update(&types).unwrap();
        assert_eq!(layouter[strided].size, 64);
        assert_eq!(layouter.array_stride(&types, strided), 16);
        assert_eq!(layouter.array_stride(&types, runtime), 4);
        assert_eq!(
            layouter.static_size(&types, runtime),
            Err(LayoutError {
                ty: runtime,
                inner: LayoutErrorInner::RuntimeSized
            })
        );
        assert_eq!(
            layouter.required_alignment(&types, strided, AddressSpace::Uniform),
            Alignment::SIXTEEN
        );
        assert_eq!(
            layouter.required_alignment(&types, strided, AddressSpace::Storage),
            Alignment::FOUR
        );
    }

    #[test]
    fn explicit_member_attributes() {
        let mut types = UniqueArena::new();
        let f32 = scalar(&mut types, Scalar::F32);
        let s = structure(
            &mut types,
            "S",
            vec![
                StructMember {
                    size: Some(16),
                    ..StructMember::new("a", f32)
                },
                StructMember {
                    align: Some(32),
                    ..StructMember::new("b", f32)
                },
                StructMember {
                    offset: Some(40),
                    ..StructMember::new("c", f32)
                },
            ],
        );
        let mut layouter = Layouter::default();
        layouter.update(&types).unwrap();
        assert_eq!(layouter.member_offsets(s), &[0, 32, 40]);
        assert_eq!(layouter[s].size, 64);
    }

    #[test]
    fn errors_do_not_stall_update() {
        let mut types = UniqueArena::new();
        let f32 = scalar(&mut types, Scalar::F32);
        let bad = types.insert(
            Type {
                name: None,
                inner: TypeInner::Array {
                    base: f32,
                    size: ArraySize::Dynamic,
                    stride: Some(2),
                },
            },
            Span::UNDEFINED,
        );
        let vec2 = vector(&mut types, VectorSize::Bi, Scalar::F32);
        let mut layouter = Layouter::default();
        let error = layouter.update(&types).unwrap_err();
        assert_eq!(error.ty, bad);
        layouter.update(&types).unwrap();
        assert_eq!(layouter[vec2].size, 8);
    }

    #[test]
    fn matrix_stride_member() {
        let mut types = UniqueArena::new();
        let f32 = scalar(&mut types, Scalar::F32);
        let mat2x2 = types.insert(
            Type {
                name: None,
                inner: TypeInner::Matrix {
                    columns: VectorSize::Bi,
                    rows: VectorSize::Bi,
                    scalar: Scalar::F32,
                },
            },
            Span::UNDEFINED,
        );
        let s = structure(
            &mut types,
            "S",
            vec![
                StructMember {
                    matrix_stride: Some(32),
                    ..StructMember::new("m", mat2x2)
                },
                StructMember::new("after", f32),
            ],
        );
        let mut layouter = Layouter::default();
        layouter.update(&types).unwrap();
        assert_eq!(layouter.member_offsets(s), &[0, 64]);
        assert_eq!(layouter[mat2x2].size, 16);
    }

    #[test]
    fn row_major_member() {
        let mut types = UniqueArena::new();
        let f32 = scalar(&mut types, Scalar::F32);
        let mat3x2 = types.insert(
            Type {
                name: None,
                inner: TypeInner::Matrix {
                    columns: VectorSize::Tri,
                    rows: VectorSize::Bi,
                    scalar: Scalar::F32,
                },
            },
            Span::UNDEFINED,
        );
        let s = structure(
            &mut types,
            "S",
            vec![
                StructMember {
                    row_major: true,
                    ..StructMember::new("m", mat3x2)
                },
                StructMember::new("after", f32),
            ],
        );
        let mut layouter = Layouter::default();
        layouter.update(&types).unwrap();
        // Two rows of vec3<f32>.
        assert_eq!(layouter.member_offsets(s), &[0, 32]);
        assert_eq!(layouter[s].alignment, Alignment::SIXTEEN);
        assert_eq!(layouter[mat3x2].size, 24);
    }

    #[test]
    fn row_major_array_member() {
        let mut types = UniqueArena::new();
        let f32 = scalar(&mut types, Scalar::F32);
        let mat3x2 = types.insert(
            Type {
                name: None,
                inner: TypeInner::Matrix {
                    columns: VectorSize::Tri,
                    rows: VectorSize::Bi,
                    scalar: Scalar::F32,
                },
            },
            Span::UNDEFINED,
        );
        let array = types.insert(
            Type {
                name: None,
                inner: TypeInner::Array {
                    base: mat3x2,
                    size: ArraySize::Constant(NonZeroU32::new(2).unwrap()),
                    stride: None,
                },
            },
            Span::UNDEFINED,
        );
        let s = structure(
            &mut types,
            "S",
            vec![
                StructMember {
                    row_major: true,
                    ..StructMember::new("m", array)
                },
                StructMember::new("x", f32),
            ],
        );
        let strided = structure(
            &mut types,
            "T",
            vec![
                StructMember {
                    matrix_stride: Some(16),
                    ..StructMember::new("m", array)
                },
                StructMember::new("x", f32),
            ],
        );
        let mut layouter = Layouter::default();
        layouter.update(&types).unwrap();
        // Each element is two rows of vec3<f32>.
        assert_eq!(layouter.member_offsets(s), &[0, 64]);
        // Each element is three columns, 16 bytes apart.
        assert_eq!(layouter.member_offsets(strided), &[0, 96]);
        assert_eq!(layouter[array].size, 48);
    }
}
