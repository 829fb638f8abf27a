use super::{
    expression::{ExpressionError, Local, Resolver},
    Binding, Parent, Reference, StatementInfo,
};
use crate::{
    arena::Handle, AddressSpace, Block, DeclarationKind, DisabledValidation, Expression, Function,
    GlobalVariable, Scalar, Statement, StorageAccess, Type, TypeInner,
};

#[derive(Clone, Debug, thiserror::Error)]
pub enum FunctionError {
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error("Function has no body and doesn't opt out of the check")]
    MissingBody,
    #[error("Argument {index} has type {ty:?}, which can't be passed to functions")]
    InvalidArgumentType { index: u32, ty: Handle<Type> },
    #[error("Declaration of '{0}' needs a type or an initializer")]
    MissingType(String),
    #[error("Initializer of '{0}' doesn't match its type")]
    InitializerMismatch(String),
    #[error("'{0}' is declared as `const` but its initializer is not a constant expression")]
    NotConstant(String),
    #[error("'{0}' needs an initializer")]
    MissingInitializer(String),
    #[error("The pointer {0:?} doesn't relate to a valid destination for a store")]
    InvalidStorePointer(Handle<Expression>),
    #[error("The destination {0:?} is read-only")]
    ReadOnlyStore(Handle<Expression>),
    #[error("Store of {value:?} into {target:?} doesn't have matching types")]
    InvalidStoreTypes {
        target: Handle<Type>,
        value: Handle<Type>,
    },
    #[error("The expression {0:?} is not a function call")]
    InvalidCallStatement(Handle<Expression>),
    #[error("The condition {0:?} is not a boolean scalar")]
    InvalidCondition(Handle<Expression>),
    #[error("The `return` value {0:?} does not match the function return value")]
    InvalidReturnType(Option<Handle<Expression>>),
    #[error("Global variable in {0:?} space can't have an initializer")]
    InvalidInitializer(AddressSpace),
}

impl<'a> Resolver<'a> {
    pub(super) fn resolve_global(&mut self, handle: Handle<GlobalVariable>) -> Result<(), FunctionError> {
        let global_variables = self.global_variables;
        let var = &global_variables[handle];
        if let Some(init) = var.init {
            match var.space {
                AddressSpace::Private | AddressSpace::Function => {}
                space => return Err(FunctionError::InvalidInitializer(space)),
            }
            self.resolve_value(init, Parent::Global(handle))?;
            let ty = self.value_type(init)?;
            if ty != var.ty {
                return Err(FunctionError::InitializerMismatch(
                    self.symbols.name(var.name).to_string(),
                ));
            }
        }
        Ok(())
    }

    pub(super) fn resolve_function(&mut self, handle: Handle<Function>) -> Result<(), FunctionError> {
        let functions = self.functions;
        let fun = &functions[handle];
        self.function = Some(handle);
        self.scopes.clear();

        let mut arguments = crate::FastHashMap::default();
        for (index, argument) in fun.arguments.iter().enumerate() {
            let index = index as u32;
            let root = match self.types[argument.ty].inner {
                TypeInner::Pointer { .. } => Some(Binding::Argument(handle, index)),
                TypeInner::Atomic(_) => {
                    return Err(FunctionError::InvalidArgumentType {
                        index,
                        ty: argument.ty,
                    })
                }
                _ => None,
            };
            arguments.insert(
                argument.name,
                Local {
                    binding: Binding::Argument(handle, index),
                    ty: argument.ty,
                    reference: None,
                    root,
                    constant: None,
                },
            );
        }
        self.scopes.push(arguments);

        let result = match fun.body {
            Some(ref body) => self.resolve_block(body, None),
            None if fun.disables(DisabledValidation::FunctionHasNoBody) => Ok(()),
            None => Err(FunctionError::MissingBody),
        };
        self.scopes.clear();
        self.function = None;
        result
    }

    fn resolve_block(
        &mut self,
        block: &Block,
        parent: Option<Handle<Statement>>,
    ) -> Result<(), FunctionError> {
        self.scopes.push(Default::default());
        for &statement in block.iter() {
            self.resolve_statement(statement, parent)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn resolve_condition(
        &mut self,
        condition: Handle<Expression>,
        statement: Handle<Statement>,
    ) -> Result<(), FunctionError> {
        self.resolve_value(condition, Parent::Statement(statement))?;
        let ty = self.value_type(condition)?;
        match self.types[ty].inner {
            TypeInner::Scalar(Scalar::BOOL) => Ok(()),
            _ => Err(FunctionError::InvalidCondition(condition)),
        }
    }

    fn resolve_statement(
        &mut self,
        handle: Handle<Statement>,
        parent: Option<Handle<Statement>>,
    ) -> Result<(), FunctionError> {
        if let Some(function) = self.function {
            self.info
                .insert_statement(handle, StatementInfo { function, parent });
        }

        let statements = self.statements;
        match statements[handle] {
            Statement::Block(ref block) => self.resolve_block(block, Some(handle))?,
            Statement::Declare {
                kind,
                name,
                ty,
                init,
            } => {
                let symbols = self.symbols;
                let display = || symbols.name(name).to_string();
                if let Some(init) = init {
                    self.resolve_value(init, Parent::Statement(handle))?;
                }
                let init_ty = match init {
                    Some(init) => Some(self.value_type(init)?),
                    None => None,
                };
                let ty = match (ty, init_ty) {
                    (Some(ty), Some(init_ty)) if ty != init_ty => {
                        return Err(FunctionError::InitializerMismatch(display()))
                    }
                    (Some(ty), _) | (None, Some(ty)) => ty,
                    (None, None) => return Err(FunctionError::MissingType(display())),
                };
                let local = match kind {
                    DeclarationKind::Var => Local {
                        binding: Binding::Local(handle),
                        ty,
                        reference: Some(Reference {
                            space: AddressSpace::Function,
                            access: StorageAccess::all(),
                        }),
                        root: Some(Binding::Local(handle)),
                        constant: None,
                    },
                    DeclarationKind::Let => {
                        let init = init.ok_or_else(|| FunctionError::MissingInitializer(display()))?;
                        Local {
                            binding: Binding::Local(handle),
                            ty,
                            reference: None,
                            root: self.info[init].root,
                            constant: None,
                        }
                    }
                    DeclarationKind::Const => {
                        let init = init.ok_or_else(|| FunctionError::MissingInitializer(display()))?;
                        let constant = self.info[init]
                            .constant
                            .ok_or_else(|| FunctionError::NotConstant(display()))?;
                        Local {
                            binding: Binding::Local(handle),
                            ty,
                            reference: None,
                            root: None,
                            constant: Some(constant),
                        }
                    }
                };
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name, local);
                }
            }
            Statement::Assign { target, value } => {
                self.resolve_reference(target, Parent::Statement(handle))?;
                self.resolve_value(value, Parent::Statement(handle))?;
                let target_info = &self.info[target];
                match target_info.reference {
                    Some(reference) if reference.access.contains(StorageAccess::STORE) => {}
                    Some(_) => return Err(FunctionError::ReadOnlyStore(target)),
                    None => return Err(FunctionError::InvalidStorePointer(target)),
                }
                let target_ty = self.value_type(target)?;
                let value_ty = self.value_type(value)?;
                if target_ty != value_ty || matches!(self.types[target_ty].inner, TypeInner::Atomic(_))
                {
                    return Err(FunctionError::InvalidStoreTypes {
                        target: target_ty,
                        value: value_ty,
                    });
                }
            }
            Statement::Call(expr) => {
                if !matches!(self.expressions[expr], Expression::Call { .. }) {
                    return Err(FunctionError::InvalidCallStatement(expr));
                }
                self.resolve_value(expr, Parent::Statement(handle))?;
            }
            Statement::If {
                condition,
                ref accept,
                ref reject,
            } => {
                self.resolve_condition(condition, handle)?;
                self.resolve_block(accept, Some(handle))?;
                self.resolve_block(reject, Some(handle))?;
            }
            Statement::For {
                init,
                condition,
                update,
                ref body,
            } => {
                self.scopes.push(Default::default());
                if let Some(init) = init {
                    self.resolve_statement(init, Some(handle))?;
                }
                if let Some(condition) = condition {
                    self.resolve_condition(condition, handle)?;
                }
                if let Some(update) = update {
                    self.resolve_statement(update, Some(handle))?;
                }
                self.resolve_block(body, Some(handle))?;
                self.scopes.pop();
            }
            Statement::Loop {
                ref body,
                ref continuing,
            } => {
                // `continuing` sees the declarations of the loop body.
                self.scopes.push(Default::default());
                for &statement in body.iter().chain(continuing.iter()) {
                    self.resolve_statement(statement, Some(handle))?;
                }
                self.scopes.pop();
            }
            Statement::Return(value) => {
                let functions = self.functions;
                let expected = self.function.and_then(|function| functions[function].result);
                let seen = match value {
                    Some(value) => {
                        self.resolve_value(value, Parent::Statement(handle))?;
                        Some(self.value_type(value)?)
                    }
                    None => None,
                };
                if expected != seen {
                    return Err(FunctionError::InvalidReturnType(value));
                }
            }
            Statement::Break | Statement::Continue | Statement::Discard => {}
        }
        Ok(())
    }
}
