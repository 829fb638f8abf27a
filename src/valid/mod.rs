/*!
Semantic resolution and validation.

The [`Validator`] walks a [`Module`] once and produces a [`ModuleInfo`]: the
side-table that maps every expression to its resolved type, memory reference,
root variable, constant value and parent. Errors do not stop the walk; they
are reported to the caller's [`Diagnostics`] and the erroneous function is
left partially resolved.
*/

mod expression;
mod function;
mod r#type;

use crate::{
    arena::Handle,
    proc::{LayoutError, Layouter},
    AddressSpace, Declaration, Diagnostics, Expression, FastHashMap, Function, GlobalVariable,
    Literal, Module, Statement, StorageAccess, Symbol, Type, TypeInner, UniqueArena,
};
use arrayvec::ArrayVec;
use std::ops;

pub use expression::ExpressionError;
pub use function::FunctionError;
pub use r#type::{Disalignment, TypeError};

/// A memory reference: the value of an expression that designates storage.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct Reference {
    pub space: AddressSpace,
    pub access: StorageAccess,
}

/// What an identifier resolves to.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Binding {
    Global(Handle<GlobalVariable>),
    /// A function-scope declaration statement.
    Local(Handle<Statement>),
    Argument(Handle<Function>, u32),
}

/// How a [`Expression::Member`] was resolved.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum MemberKind {
    /// Index of a structure member.
    Struct(u32),
    /// A single vector component.
    Component(u8),
    /// A multi-component swizzle.
    Swizzle(ArrayVec<u8, 4>),
}

/// The node that owns an expression.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Parent {
    Expression(Handle<Expression>),
    Statement(Handle<Statement>),
    Global(Handle<GlobalVariable>),
}

/// Resolved facts about a single expression.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExpressionInfo {
    /// The type of the value, or of the referenced storage for references.
    /// `None` for calls of functions without a result.
    pub ty: Option<Handle<Type>>,
    /// Set when the expression designates memory rather than a value.
    pub reference: Option<Reference>,
    /// The reference is read at this point: its parent consumes a value.
    pub load: bool,
    /// The variable a reference or pointer ultimately designates.
    pub root: Option<Binding>,
    /// For identifiers, the declaration they resolve to.
    pub binding: Option<Binding>,
    pub member: Option<MemberKind>,
    pub constant: Option<Literal>,
    pub has_side_effects: bool,
    pub parent: Option<Parent>,
}

impl ExpressionInfo {
    /// The type being accessed: the pointee for pointer values, the value type otherwise.
    pub fn object_type(&self, types: &UniqueArena<Type>) -> Option<Handle<Type>> {
        let ty = self.ty?;
        match types[ty].inner {
            TypeInner::Pointer { base, .. } => Some(base),
            _ => Some(ty),
        }
    }

    pub fn is_pointer(&self, types: &UniqueArena<Type>) -> bool {
        match self.ty {
            Some(ty) => matches!(types[ty].inner, TypeInner::Pointer { .. }),
            None => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StatementInfo {
    pub function: Handle<Function>,
    /// The enclosing compound statement, if any.
    pub parent: Option<Handle<Statement>>,
}

/// The semantic side-table of a module.
#[derive(Clone, Debug, Default)]
pub struct ModuleInfo {
    expressions: Vec<Option<ExpressionInfo>>,
    statements: Vec<Option<StatementInfo>>,
    pub layouter: Layouter,
}

impl ops::Index<Handle<Expression>> for ModuleInfo {
    type Output = ExpressionInfo;
    fn index(&self, handle: Handle<Expression>) -> &Self::Output {
        match self.get(handle) {
            Some(info) => info,
            None => panic!("expression {handle:?} was not resolved"),
        }
    }
}

impl ModuleInfo {
    pub fn get(&self, handle: Handle<Expression>) -> Option<&ExpressionInfo> {
        self.expressions.get(handle.index())?.as_ref()
    }

    pub fn statement(&self, handle: Handle<Statement>) -> Option<&StatementInfo> {
        self.statements.get(handle.index())?.as_ref()
    }

    /// Iterate over every resolved expression.
    pub fn expressions(&self) -> impl Iterator<Item = (usize, &ExpressionInfo)> {
        self.expressions
            .iter()
            .enumerate()
            .filter_map(|(index, info)| info.as_ref().map(|info| (index, info)))
    }

    /// The global variable a reference or pointer expression is rooted at.
    pub fn root_global(&self, handle: Handle<Expression>) -> Option<Handle<GlobalVariable>> {
        match self.get(handle)?.root {
            Some(Binding::Global(var)) => Some(var),
            _ => None,
        }
    }

    fn insert_expression(&mut self, handle: Handle<Expression>, info: ExpressionInfo) {
        let index = handle.index();
        if self.expressions.len() <= index {
            self.expressions.resize(index + 1, None);
        }
        self.expressions[index] = Some(info);
    }

    fn expression_mut(&mut self, handle: Handle<Expression>) -> &mut ExpressionInfo {
        match self.expressions.get_mut(handle.index()) {
            Some(Some(info)) => info,
            _ => panic!("expression {handle:?} was not resolved"),
        }
    }

    fn insert_statement(&mut self, handle: Handle<Statement>, info: StatementInfo) {
        let index = handle.index();
        if self.statements.len() <= index {
            self.statements.resize(index + 1, None);
        }
        self.statements[index] = Some(info);
    }
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum ValidationError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("Type {handle:?} '{name}' is invalid")]
    Type {
        handle: Handle<Type>,
        name: String,
        #[source]
        error: TypeError,
    },
    #[error("'{0}' is declared more than once")]
    Redeclaration(String),
    #[error("Global variable {handle:?} '{name}' is invalid")]
    GlobalVariable {
        handle: Handle<GlobalVariable>,
        name: String,
        #[source]
        error: FunctionError,
    },
    #[error("Function {handle:?} '{name}' is invalid")]
    Function {
        handle: Handle<Function>,
        name: String,
        #[source]
        error: FunctionError,
    },
}

/// A module-scope name.
#[derive(Clone, Copy, Debug)]
enum ModuleItem {
    Global(Handle<GlobalVariable>),
    Function(Handle<Function>),
    Struct,
}

#[derive(Debug, Default)]
pub struct Validator {
    module_scope: FastHashMap<Symbol, ModuleItem>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `module`, reporting problems to `diagnostics`.
    ///
    /// Types derived during resolution (swizzle results, pointers, matrix
    /// columns) are interned into `module.types`.
    pub fn validate(&mut self, module: &mut Module, diagnostics: &mut Diagnostics) -> ModuleInfo {
        profiling::scope!("validate");
        let mut info = ModuleInfo::default();

        while let Err(error) = info.layouter.update(&module.types) {
            diagnostics.add_error(
                ValidationError::from(error),
                module.types.get_span(error.ty),
            );
        }

        for (handle, ty) in module.types.iter() {
            if let Err(error) = r#type::validate_type(handle, &module.types, module.extensions) {
                diagnostics.add_error(
                    ValidationError::Type {
                        handle,
                        name: ty.name.clone().unwrap_or_default(),
                        error,
                    },
                    module.types.get_span(handle),
                );
            }
        }

        self.collect_module_scope(module, diagnostics);

        for (handle, var) in module.global_variables.iter() {
            if var.space != AddressSpace::Uniform {
                continue;
            }
            if let Err(error) =
                r#type::validate_uniform_layout(var.ty, &module.types, &info.layouter)
            {
                diagnostics.add_error(
                    ValidationError::Type {
                        handle: var.ty,
                        name: module.symbols.name(var.name).to_string(),
                        error,
                    },
                    module.global_variables.get_span(handle),
                );
            }
        }

        let Module {
            extensions,
            ref symbols,
            ref mut types,
            ref expressions,
            ref statements,
            ref global_variables,
            ref functions,
            ref declarations,
        } = *module;

        let mut resolver = expression::Resolver {
            types,
            expressions,
            statements,
            global_variables,
            functions,
            symbols,
            extensions,
            module_scope: &self.module_scope,
            info: &mut info,
            scopes: Vec::new(),
            function: None,
        };

        for decl in declarations.iter() {
            match *decl {
                Declaration::Struct(_) => {}
                Declaration::GlobalVariable(handle) => {
                    if let Err(error) = resolver.resolve_global(handle) {
                        diagnostics.add_error(
                            ValidationError::GlobalVariable {
                                handle,
                                name: symbols.name(global_variables[handle].name).to_string(),
                                error,
                            },
                            global_variables.get_span(handle),
                        );
                    }
                }
                Declaration::Function(handle) => {
                    if let Err(error) = resolver.resolve_function(handle) {
                        log::trace!("function {:?} failed to resolve: {}", handle, error);
                        diagnostics.add_error(
                            ValidationError::Function {
                                handle,
                                name: symbols.name(functions[handle].name).to_string(),
                                error,
                            },
                            functions.get_span(handle),
                        );
                    }
                }
            }
        }

        // Lay out the types derived while resolving expressions.
        while let Err(error) = info.layouter.update(types) {
            diagnostics.add_error(ValidationError::from(error), types.get_span(error.ty));
        }

        info
    }

    fn collect_module_scope(&mut self, module: &Module, diagnostics: &mut Diagnostics) {
        self.module_scope.clear();
        for decl in module.declarations.iter() {
            let (name, item, span) = match *decl {
                Declaration::Struct(handle) => {
                    let name = module.types[handle].name.as_deref().unwrap_or_default();
                    match module.symbols.get(name) {
                        Some(symbol) => (symbol, ModuleItem::Struct, module.types.get_span(handle)),
                        None => continue,
                    }
                }
                Declaration::GlobalVariable(handle) => (
                    module.global_variables[handle].name,
                    ModuleItem::Global(handle),
                    module.global_variables.get_span(handle),
                ),
                Declaration::Function(handle) => (
                    module.functions[handle].name,
                    ModuleItem::Function(handle),
                    module.functions.get_span(handle),
                ),
            };
            if self.module_scope.insert(name, item).is_some() {
                diagnostics.add_error(
                    ValidationError::Redeclaration(module.symbols.name(name).to_string()),
                    span,
                );
            }
        }
    }
}
