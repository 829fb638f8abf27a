use super::{Binding, ExpressionInfo, MemberKind, ModuleInfo, ModuleItem, Parent, Reference};
use crate::{
    arena::{Arena, Handle, UniqueArena},
    proc::{constant, ConstantError},
    AddressSpace, AtomicFunction, BinaryOperator, BuiltinFunction, Callee, Expression, Extensions,
    FastHashMap, Function, GlobalVariable, Literal, Scalar, ScalarKind, Span, Statement,
    StorageAccess, StructMember, Symbol, SymbolTable, Type, TypeInner, UnaryOperator, VectorSize,
};
use arrayvec::ArrayVec;

#[derive(Clone, Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("Unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("'{0}' is not a value")]
    NotAValue(String),
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),
    #[error("Expression {0:?} has no value")]
    NoValue(Handle<Expression>),
    #[error("Type {0:?} has no member '{1}'")]
    UnknownMember(Handle<Type>, String),
    #[error("Invalid swizzle '{0}'")]
    InvalidSwizzle(String),
    #[error("Type {0:?} can't be indexed")]
    InvalidIndexBase(Handle<Type>),
    #[error("Index {0:?} is not an integer scalar")]
    InvalidIndexType(Handle<Expression>),
    #[error("Index {index} is out of bounds for {count} elements")]
    IndexOutOfBounds { index: u32, count: u32 },
    #[error("Operand {0:?} of the address-of operator is not a memory reference")]
    NotAReference(Handle<Expression>),
    #[error("Operand {0:?} of the indirection operator is not a pointer")]
    NotAPointer(Handle<Expression>),
    #[error("Operator {op:?} can't be applied to type {ty:?}")]
    InvalidUnaryOperand { op: UnaryOperator, ty: Handle<Type> },
    #[error("Operator {op:?} can't be applied to types {left:?} and {right:?}")]
    InvalidBinaryOperands {
        op: BinaryOperator,
        left: Handle<Type>,
        right: Handle<Type>,
    },
    #[error("Function '{function}' requires {required} arguments, but {seen} are provided")]
    ArgumentCount {
        function: String,
        required: usize,
        seen: usize,
    },
    #[error("Argument {0:?} is not a pointer to an atomic in storage or workgroup memory")]
    InvalidAtomicPointer(Handle<Expression>),
    #[error("Argument {0:?} of transpose is not a matrix")]
    InvalidTransposeArgument(Handle<Expression>),
    #[error("Type {ty:?} can't be constructed from {seen} arguments")]
    InvalidConstruction { ty: Handle<Type>, seen: usize },
    #[error("Bitcast to {0:?} is invalid")]
    InvalidBitcast(Handle<Type>),
    #[error("f16 requires `enable f16;`")]
    MissingF16Extension,
    #[error(transparent)]
    Constant(#[from] ConstantError),
}

/// An identifier in function scope.
#[derive(Clone, Copy, Debug)]
pub(super) struct Local {
    pub binding: Binding,
    pub ty: Handle<Type>,
    pub reference: Option<Reference>,
    pub root: Option<Binding>,
    pub constant: Option<Literal>,
}

/// The state of a walk over a module's expressions and statements.
pub(super) struct Resolver<'a> {
    pub types: &'a mut UniqueArena<Type>,
    pub expressions: &'a Arena<Expression>,
    pub statements: &'a Arena<Statement>,
    pub global_variables: &'a Arena<GlobalVariable>,
    pub functions: &'a Arena<Function>,
    pub symbols: &'a SymbolTable,
    pub extensions: Extensions,
    pub module_scope: &'a FastHashMap<Symbol, ModuleItem>,
    pub info: &'a mut ModuleInfo,
    pub scopes: Vec<FastHashMap<Symbol, Local>>,
    pub function: Option<Handle<Function>>,
}

impl<'a> Resolver<'a> {
    pub(super) fn intern(&mut self, inner: TypeInner) -> Handle<Type> {
        self.types.insert(Type { name: None, inner }, Span::UNDEFINED)
    }

    pub(super) fn value_type(&self, expr: Handle<Expression>) -> Result<Handle<Type>, ExpressionError> {
        self.info[expr].ty.ok_or(ExpressionError::NoValue(expr))
    }

    /// Mark `expr` as being used for its value.
    pub(super) fn consume(&mut self, expr: Handle<Expression>) {
        let info = self.info.expression_mut(expr);
        if info.reference.is_some() {
            info.load = true;
        }
    }

    fn set_parent(&mut self, expr: Handle<Expression>, parent: Parent) {
        self.info.expression_mut(expr).parent = Some(parent);
    }

    /// Resolve `expr` as an operand of `parent`, and consume its value.
    fn operand(&mut self, expr: Handle<Expression>, parent: Handle<Expression>) -> Result<(), ExpressionError> {
        self.resolve(expr)?;
        self.set_parent(expr, Parent::Expression(parent));
        self.consume(expr);
        Ok(())
    }

    /// Resolve a full expression owned by `parent`, consuming its value.
    pub(super) fn resolve_value(
        &mut self,
        expr: Handle<Expression>,
        parent: Parent,
    ) -> Result<(), ExpressionError> {
        self.resolve(expr)?;
        self.set_parent(expr, parent);
        self.consume(expr);
        Ok(())
    }

    /// Resolve a full expression owned by `parent`, without consuming it.
    pub(super) fn resolve_reference(
        &mut self,
        expr: Handle<Expression>,
        parent: Parent,
    ) -> Result<(), ExpressionError> {
        self.resolve(expr)?;
        self.set_parent(expr, parent);
        Ok(())
    }

    fn lookup(&self, name: Symbol) -> Result<ExpressionInfo, ExpressionError> {
        for scope in self.scopes.iter().rev() {
            if let Some(local) = scope.get(&name) {
                return Ok(ExpressionInfo {
                    ty: Some(local.ty),
                    reference: local.reference,
                    root: local.root,
                    binding: Some(local.binding),
                    constant: local.constant,
                    ..Default::default()
                });
            }
        }
        match self.module_scope.get(&name) {
            Some(&ModuleItem::Global(handle)) => {
                let var = &self.global_variables[handle];
                Ok(ExpressionInfo {
                    ty: Some(var.ty),
                    reference: Some(Reference {
                        space: var.space,
                        access: var.access,
                    }),
                    root: Some(Binding::Global(handle)),
                    binding: Some(Binding::Global(handle)),
                    ..Default::default()
                })
            }
            Some(&ModuleItem::Function(_)) | Some(&ModuleItem::Struct) => Err(
                ExpressionError::NotAValue(self.symbols.name(name).to_string()),
            ),
            None => Err(ExpressionError::UnknownIdentifier(
                self.symbols.name(name).to_string(),
            )),
        }
    }

    /// The accessed type and reference of an access base, looking through pointers.
    fn access_base(&self, base: Handle<Expression>) -> Result<(Handle<Type>, Option<Reference>), ExpressionError> {
        let ty = self.value_type(base)?;
        Ok(match self.types[ty].inner {
            TypeInner::Pointer {
                base: pointee,
                space,
                access,
            } => (pointee, Some(Reference { space, access })),
            _ => (ty, self.info[base].reference),
        })
    }

    pub(super) fn resolve(&mut self, handle: Handle<Expression>) -> Result<(), ExpressionError> {
        let expressions = self.expressions;
        let info = match expressions[handle] {
            Expression::Literal(literal) => {
                if let Literal::F16(_) = literal {
                    if !self.extensions.contains(Extensions::F16) {
                        return Err(ExpressionError::MissingF16Extension);
                    }
                }
                ExpressionInfo {
                    ty: Some(self.intern(TypeInner::Scalar(literal.scalar()))),
                    constant: Some(literal),
                    ..Default::default()
                }
            }
            Expression::Identifier(name) => self.lookup(name)?,
            Expression::Member { base, member } => {
                self.resolve(base)?;
                self.set_parent(base, Parent::Expression(handle));
                self.resolve_member(base, member)?
            }
            Expression::Index { base, index } => {
                self.resolve(base)?;
                self.set_parent(base, Parent::Expression(handle));
                self.operand(index, handle)?;
                self.resolve_index(base, index)?
            }
            Expression::Unary { op, expr } => {
                self.resolve(expr)?;
                self.set_parent(expr, Parent::Expression(handle));
                self.resolve_unary(op, expr)?
            }
            Expression::Binary { op, left, right } => {
                self.operand(left, handle)?;
                self.operand(right, handle)?;
                self.resolve_binary(op, left, right)?
            }
            Expression::Call {
                callee,
                ref arguments,
            } => {
                for &argument in arguments.iter() {
                    self.operand(argument, handle)?;
                }
                self.resolve_call(callee, arguments)?
            }
            Expression::Bitcast { ty, expr } => {
                self.operand(expr, handle)?;
                let from = self.value_type(expr)?;
                let size = |inner: &TypeInner| match *inner {
                    TypeInner::Scalar(scalar) => Some((None, scalar.width)),
                    TypeInner::Vector { size, scalar } => Some((Some(size), scalar.width)),
                    _ => None,
                };
                match (size(&self.types[from].inner), size(&self.types[ty].inner)) {
                    (Some(a), Some(b)) if a == b => {}
                    _ => return Err(ExpressionError::InvalidBitcast(ty)),
                }
                ExpressionInfo {
                    ty: Some(ty),
                    has_side_effects: self.info[expr].has_side_effects,
                    ..Default::default()
                }
            }
        };
        self.info.insert_expression(handle, info);
        Ok(())
    }

    fn resolve_member(
        &mut self,
        base: Handle<Expression>,
        member: Symbol,
    ) -> Result<ExpressionInfo, ExpressionError> {
        let (object_ty, reference) = self.access_base(base)?;
        let symbols = self.symbols;
        let name = symbols.name(member);
        let base_info = &self.info[base];
        let (root, has_side_effects) = (base_info.root, base_info.has_side_effects);
        match self.types[object_ty].inner {
            TypeInner::Struct { ref members } => {
                let index = members
                    .iter()
                    .position(|m| m.name == name)
                    .ok_or_else(|| ExpressionError::UnknownMember(object_ty, name.to_string()))?;
                Ok(ExpressionInfo {
                    ty: Some(members[index].ty),
                    reference,
                    root: reference.and(root),
                    member: Some(MemberKind::Struct(index as u32)),
                    has_side_effects,
                    ..Default::default()
                })
            }
            TypeInner::Vector { size, scalar } => {
                let mut components = ArrayVec::<u8, 4>::new();
                for c in name.chars() {
                    let component = match c {
                        'x' | 'r' => 0,
                        'y' | 'g' => 1,
                        'z' | 'b' => 2,
                        'w' | 'a' => 3,
                        _ => return Err(ExpressionError::InvalidSwizzle(name.to_string())),
                    };
                    if component >= size as u8 || components.try_push(component).is_err() {
                        return Err(ExpressionError::InvalidSwizzle(name.to_string()));
                    }
                }
                match VectorSize::from_u32(components.len() as u32) {
                    None if components.len() == 1 => Ok(ExpressionInfo {
                        ty: Some(self.intern(TypeInner::Scalar(scalar))),
                        reference,
                        root: reference.and(root),
                        member: Some(MemberKind::Component(components[0])),
                        has_side_effects,
                        ..Default::default()
                    }),
                    Some(size) => {
                        // A swizzle of a reference reads the whole vector.
                        self.consume(base);
                        Ok(ExpressionInfo {
                            ty: Some(self.intern(TypeInner::Vector { size, scalar })),
                            member: Some(MemberKind::Swizzle(components)),
                            has_side_effects,
                            ..Default::default()
                        })
                    }
                    None => Err(ExpressionError::InvalidSwizzle(name.to_string())),
                }
            }
            _ => Err(ExpressionError::UnknownMember(object_ty, name.to_string())),
        }
    }

    fn resolve_index(
        &mut self,
        base: Handle<Expression>,
        index: Handle<Expression>,
    ) -> Result<ExpressionInfo, ExpressionError> {
        let index_ty = self.value_type(index)?;
        match self.types[index_ty].inner {
            TypeInner::Scalar(Scalar {
                kind: ScalarKind::Sint | ScalarKind::Uint,
                ..
            }) => {}
            _ => return Err(ExpressionError::InvalidIndexType(index)),
        }

        let (object_ty, reference) = self.access_base(base)?;
        let (element, count) = match self.types[object_ty].inner {
            TypeInner::Array { base, .. } => (base, self.types[object_ty].inner.array_count()),
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => (
                self.intern(TypeInner::Vector { size: rows, scalar }),
                Some(columns as u32),
            ),
            TypeInner::Vector { size, scalar } => {
                (self.intern(TypeInner::Scalar(scalar)), Some(size as u32))
            }
            _ => return Err(ExpressionError::InvalidIndexBase(object_ty)),
        };

        if let (Some(constant), Some(count)) = (self.info[index].constant, count) {
            let out_of_bounds = match constant {
                Literal::I32(value) => value < 0 || value as u32 >= count,
                Literal::U32(value) => value >= count,
                _ => false,
            };
            if out_of_bounds {
                return Err(ExpressionError::IndexOutOfBounds {
                    index: constant.as_index().unwrap_or(u32::MAX),
                    count,
                });
            }
        }

        if reference.is_none() {
            self.consume(base);
        }
        let base_info = &self.info[base];
        Ok(ExpressionInfo {
            ty: Some(element),
            reference,
            root: reference.and(base_info.root),
            has_side_effects: base_info.has_side_effects || self.info[index].has_side_effects,
            ..Default::default()
        })
    }

    fn resolve_unary(
        &mut self,
        op: UnaryOperator,
        expr: Handle<Expression>,
    ) -> Result<ExpressionInfo, ExpressionError> {
        let has_side_effects = self.info[expr].has_side_effects;
        match op {
            UnaryOperator::AddressOf => {
                let info = &self.info[expr];
                let (reference, root) = match info.reference {
                    Some(reference) => (reference, info.root),
                    None => return Err(ExpressionError::NotAReference(expr)),
                };
                let base = self.value_type(expr)?;
                let ty = self.intern(TypeInner::Pointer {
                    base,
                    space: reference.space,
                    access: reference.access,
                });
                Ok(ExpressionInfo {
                    ty: Some(ty),
                    root,
                    has_side_effects,
                    ..Default::default()
                })
            }
            UnaryOperator::Indirection => {
                self.consume(expr);
                let ty = self.value_type(expr)?;
                match self.types[ty].inner {
                    TypeInner::Pointer {
                        base,
                        space,
                        access,
                    } => Ok(ExpressionInfo {
                        ty: Some(base),
                        reference: Some(Reference { space, access }),
                        root: self.info[expr].root,
                        has_side_effects,
                        ..Default::default()
                    }),
                    _ => Err(ExpressionError::NotAPointer(expr)),
                }
            }
            UnaryOperator::Negate | UnaryOperator::LogicalNot | UnaryOperator::BitwiseNot => {
                self.consume(expr);
                let ty = self.value_type(expr)?;
                let kind = self.types[ty].inner.scalar().map(|scalar| scalar.kind);
                let valid = match (op, kind) {
                    (UnaryOperator::Negate, Some(ScalarKind::Sint | ScalarKind::Float)) => true,
                    (UnaryOperator::LogicalNot, Some(ScalarKind::Bool)) => true,
                    (UnaryOperator::BitwiseNot, Some(ScalarKind::Sint | ScalarKind::Uint)) => true,
                    _ => false,
                };
                if !valid || matches!(self.types[ty].inner, TypeInner::Atomic(_)) {
                    return Err(ExpressionError::InvalidUnaryOperand { op, ty });
                }
                let constant = match self.info[expr].constant {
                    Some(value) => Some(constant::unary(op, value)?),
                    None => None,
                };
                Ok(ExpressionInfo {
                    ty: Some(ty),
                    constant,
                    has_side_effects,
                    ..Default::default()
                })
            }
        }
    }

    fn resolve_binary(
        &mut self,
        op: BinaryOperator,
        left: Handle<Expression>,
        right: Handle<Expression>,
    ) -> Result<ExpressionInfo, ExpressionError> {
        use BinaryOperator as Bo;

        let left_ty = self.value_type(left)?;
        let right_ty = self.value_type(right)?;
        let invalid = || ExpressionError::InvalidBinaryOperands {
            op,
            left: left_ty,
            right: right_ty,
        };
        let left_inner = self.types[left_ty].inner.clone();
        let right_inner = self.types[right_ty].inner.clone();

        let result = match (op, &left_inner, &right_inner) {
            (Bo::ShiftLeft | Bo::ShiftRight, _, _) => left_ty,
            (_, &TypeInner::Atomic(_), _) | (_, _, &TypeInner::Atomic(_)) => return Err(invalid()),
            (_, l, r) if op.is_comparison() => match (l, r) {
                (&TypeInner::Scalar(_), &TypeInner::Scalar(_)) if left_ty == right_ty => {
                    self.intern(TypeInner::Scalar(Scalar::BOOL))
                }
                (&TypeInner::Vector { size, .. }, &TypeInner::Vector { .. })
                    if left_ty == right_ty =>
                {
                    self.intern(TypeInner::Vector {
                        size,
                        scalar: Scalar::BOOL,
                    })
                }
                _ => return Err(invalid()),
            },
            (Bo::LogicalAnd | Bo::LogicalOr, &TypeInner::Scalar(Scalar::BOOL), _)
                if left_ty == right_ty =>
            {
                left_ty
            }
            (Bo::LogicalAnd | Bo::LogicalOr, _, _) => return Err(invalid()),
            (
                Bo::Multiply,
                &TypeInner::Matrix {
                    columns,
                    rows,
                    scalar,
                },
                &TypeInner::Vector { size, .. },
            ) if columns == size => self.intern(TypeInner::Vector { size: rows, scalar }),
            (
                Bo::Multiply,
                &TypeInner::Vector { size, scalar },
                &TypeInner::Matrix { columns, rows, .. },
            ) if rows == size => self.intern(TypeInner::Vector {
                size: columns,
                scalar,
            }),
            (
                Bo::Multiply,
                &TypeInner::Matrix {
                    columns: left_columns,
                    rows,
                    scalar,
                },
                &TypeInner::Matrix {
                    columns,
                    rows: right_rows,
                    ..
                },
            ) if left_columns == right_rows => self.intern(TypeInner::Matrix {
                columns,
                rows,
                scalar,
            }),
            (Bo::Multiply | Bo::Divide, &TypeInner::Scalar(s), &TypeInner::Vector { scalar, .. })
                if s == scalar =>
            {
                right_ty
            }
            (Bo::Multiply, &TypeInner::Scalar(s), &TypeInner::Matrix { scalar, .. })
                if s == scalar =>
            {
                right_ty
            }
            (_, &TypeInner::Vector { scalar, .. }, &TypeInner::Scalar(s))
            | (_, &TypeInner::Matrix { scalar, .. }, &TypeInner::Scalar(s))
                if s == scalar =>
            {
                left_ty
            }
            _ if left_ty == right_ty => left_ty,
            _ => return Err(invalid()),
        };

        let constant = match (self.info[left].constant, self.info[right].constant) {
            (Some(l), Some(r)) => Some(constant::binary(op, l, r)?),
            _ => None,
        };
        Ok(ExpressionInfo {
            ty: Some(result),
            constant,
            has_side_effects: self.info[left].has_side_effects
                || self.info[right].has_side_effects,
            ..Default::default()
        })
    }

    fn resolve_call(
        &mut self,
        callee: Callee,
        arguments: &[Handle<Expression>],
    ) -> Result<ExpressionInfo, ExpressionError> {
        let arguments_have_side_effects = arguments
            .iter()
            .any(|&argument| self.info[argument].has_side_effects);
        match callee {
            Callee::Function(name) => {
                let function = match self.module_scope.get(&name) {
                    Some(&ModuleItem::Function(handle)) => &self.functions[handle],
                    _ => {
                        return Err(ExpressionError::UnknownFunction(
                            self.symbols.name(name).to_string(),
                        ))
                    }
                };
                if function.arguments.len() != arguments.len() {
                    return Err(ExpressionError::ArgumentCount {
                        function: self.symbols.name(name).to_string(),
                        required: function.arguments.len(),
                        seen: arguments.len(),
                    });
                }
                Ok(ExpressionInfo {
                    ty: function.result,
                    has_side_effects: true,
                    ..Default::default()
                })
            }
            Callee::Builtin(BuiltinFunction::Transpose) => {
                let argument = match *arguments {
                    [argument] => argument,
                    _ => {
                        return Err(ExpressionError::ArgumentCount {
                            function: BuiltinFunction::Transpose.to_wgsl().to_string(),
                            required: 1,
                            seen: arguments.len(),
                        })
                    }
                };
                let ty = self.value_type(argument)?;
                match self.types[ty].inner {
                    TypeInner::Matrix {
                        columns,
                        rows,
                        scalar,
                    } => Ok(ExpressionInfo {
                        ty: Some(self.intern(TypeInner::Matrix {
                            columns: rows,
                            rows: columns,
                            scalar,
                        })),
                        has_side_effects: arguments_have_side_effects,
                        ..Default::default()
                    }),
                    _ => Err(ExpressionError::InvalidTransposeArgument(argument)),
                }
            }
            Callee::Builtin(BuiltinFunction::Atomic(fun)) => {
                let required = 1 + fun.value_operands();
                if arguments.len() != required {
                    return Err(ExpressionError::ArgumentCount {
                        function: BuiltinFunction::Atomic(fun).to_wgsl().to_string(),
                        required,
                        seen: arguments.len(),
                    });
                }
                let pointer = arguments[0];
                let pointer_ty = self.value_type(pointer)?;
                let scalar = match self.types[pointer_ty].inner {
                    TypeInner::Pointer {
                        base,
                        space: AddressSpace::Storage | AddressSpace::WorkGroup,
                        access,
                    } if access.contains(StorageAccess::STORE) => match self.types[base].inner {
                        TypeInner::Atomic(scalar) => scalar,
                        _ => return Err(ExpressionError::InvalidAtomicPointer(pointer)),
                    },
                    _ => return Err(ExpressionError::InvalidAtomicPointer(pointer)),
                };
                let ty = match fun {
                    AtomicFunction::Store => None,
                    AtomicFunction::CompareExchangeWeak => Some(self.compare_exchange_result(scalar)),
                    _ => Some(self.intern(TypeInner::Scalar(scalar))),
                };
                Ok(ExpressionInfo {
                    ty,
                    has_side_effects: true,
                    ..Default::default()
                })
            }
            Callee::Construct(ty) => {
                let expected = match self.types[ty].inner {
                    TypeInner::Struct { ref members } => Some(members.len()),
                    TypeInner::Array { .. } => self.types[ty].inner.array_count().map(|c| c as usize),
                    TypeInner::Scalar(_) => Some(1),
                    _ => None,
                };
                if let Some(expected) = expected {
                    if !arguments.is_empty() && arguments.len() != expected {
                        return Err(ExpressionError::InvalidConstruction {
                            ty,
                            seen: arguments.len(),
                        });
                    }
                }
                let constant = match (&self.types[ty].inner, arguments) {
                    (&TypeInner::Scalar(scalar), &[argument]) => self.info[argument]
                        .constant
                        .map(|value| constant::convert(value, scalar)),
                    _ => None,
                };
                Ok(ExpressionInfo {
                    ty: Some(ty),
                    constant,
                    has_side_effects: arguments_have_side_effects,
                    ..Default::default()
                })
            }
        }
    }

    /// The structure returned by `atomicCompareExchangeWeak`.
    fn compare_exchange_result(&mut self, scalar: Scalar) -> Handle<Type> {
        let old_value = self.intern(TypeInner::Scalar(scalar));
        let exchanged = self.intern(TypeInner::Scalar(Scalar::BOOL));
        self.types.insert(
            Type {
                name: Some(format!(
                    "__atomic_compare_exchange_result_{}",
                    scalar.to_wgsl()
                )),
                inner: TypeInner::Struct {
                    members: vec![
                        StructMember::new("old_value", old_value),
                        StructMember::new("exchanged", exchanged),
                    ],
                },
            },
            Span::UNDEFINED,
        )
    }
}
