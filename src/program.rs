/*!
Frozen programs and the builder that produces them.

A [`ProgramBuilder`] accumulates a [`Module`]. [`ProgramBuilder::build`] runs
the [`Validator`](crate::valid::Validator) over it and freezes the result,
together with the semantic side-table and any diagnostics, into a [`Program`].
*/

use crate::{
    arena::Handle, valid, AddressSpace, ArraySize, BinaryOperator, Block, BuiltinFunction, Callee,
    Declaration, DeclarationKind, DisabledValidation, Expression, Extensions, Function,
    FunctionArgument, GlobalVariable, InternalAttribute, Literal, Module, ResourceBinding, Scalar,
    ShaderStage, Span, Statement, StorageAccess, StructMember, Symbol, Type, TypeInner,
    UnaryOperator, VectorSize,
};
use std::{fmt, num::NonZeroU32};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Severity {
    Warning,
    Error,
}

/// A message attached to a program.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub span: Span,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {}: {}", self.span, severity, self.message)
    }
}

/// An ordered list of diagnostics.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diagnostics {
    list: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn add_error(&mut self, message: impl fmt::Display, span: Span) {
        self.list.push(Diagnostic {
            severity: Severity::Error,
            span,
            message: message.to_string(),
        });
    }

    pub fn add_warning(&mut self, message: impl fmt::Display, span: Span) {
        self.list.push(Diagnostic {
            severity: Severity::Warning,
            span,
            message: message.to_string(),
        });
    }

    pub fn contains_errors(&self) -> bool {
        self.list
            .iter()
            .any(|diagnostic| diagnostic.severity == Severity::Error)
    }

    pub fn extend(&mut self, other: &Diagnostics) {
        self.list.extend_from_slice(&other.list);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diagnostic in self.list.iter() {
            writeln!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

/// An immutable, resolved program.
#[derive(Clone, Debug)]
pub struct Program {
    pub module: Module,
    pub info: valid::ModuleInfo,
    pub diagnostics: Diagnostics,
}

impl Program {
    /// Whether the program was produced without errors.
    pub fn is_valid(&self) -> bool {
        !self.diagnostics.contains_errors()
    }

    /// A copy of this program that additionally carries an error.
    pub fn with_error(&self, message: impl fmt::Display) -> Self {
        let mut program = self.clone();
        program.diagnostics.add_error(message, Span::UNDEFINED);
        program
    }
}

/// Incrementally assembles a [`Module`].
///
/// Names are interned on the way in: every `&str` argument is registered in
/// the module's symbol table.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    pub module: Module,
    pub diagnostics: Diagnostics,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the module and freeze it into a [`Program`].
    pub fn build(self) -> Program {
        let ProgramBuilder {
            mut module,
            mut diagnostics,
        } = self;
        let info = valid::Validator::new().validate(&mut module, &mut diagnostics);
        Program {
            module,
            info,
            diagnostics,
        }
    }

    pub fn enable(&mut self, extensions: Extensions) {
        self.module.extensions |= extensions;
    }

    pub fn symbol(&mut self, name: &str) -> Symbol {
        self.module.symbols.register(name)
    }

    /// Reserve a name that is not used anywhere in the module yet.
    pub fn unique_symbol(&mut self, prefix: &str) -> Symbol {
        self.module.symbols.new_unique(prefix)
    }

    // Types

    pub fn ty(&mut self, inner: TypeInner) -> Handle<Type> {
        self.module
            .types
            .insert(Type { name: None, inner }, Span::UNDEFINED)
    }

    pub fn scalar(&mut self, scalar: Scalar) -> Handle<Type> {
        self.ty(TypeInner::Scalar(scalar))
    }

    pub fn vec(&mut self, size: VectorSize, scalar: Scalar) -> Handle<Type> {
        self.ty(TypeInner::Vector { size, scalar })
    }

    pub fn mat(&mut self, columns: VectorSize, rows: VectorSize, scalar: Scalar) -> Handle<Type> {
        self.ty(TypeInner::Matrix {
            columns,
            rows,
            scalar,
        })
    }

    pub fn atomic(&mut self, scalar: Scalar) -> Handle<Type> {
        self.ty(TypeInner::Atomic(scalar))
    }

    /// A fixed-size array. `count` must not be zero.
    pub fn array(&mut self, base: Handle<Type>, count: u32) -> Handle<Type> {
        self.strided_array(base, Some(count), None)
    }

    pub fn runtime_array(&mut self, base: Handle<Type>) -> Handle<Type> {
        self.strided_array(base, None, None)
    }

    /// An array with an optional count and an optional explicit stride.
    pub fn strided_array(
        &mut self,
        base: Handle<Type>,
        count: Option<u32>,
        stride: Option<u32>,
    ) -> Handle<Type> {
        let size = match count.and_then(NonZeroU32::new) {
            Some(count) => ArraySize::Constant(count),
            None => ArraySize::Dynamic,
        };
        self.ty(TypeInner::Array { base, size, stride })
    }

    pub fn pointer(
        &mut self,
        base: Handle<Type>,
        space: AddressSpace,
        access: StorageAccess,
    ) -> Handle<Type> {
        self.ty(TypeInner::Pointer {
            base,
            space,
            access,
        })
    }

    /// Declare a named structure.
    pub fn structure(&mut self, name: &str, members: Vec<StructMember>) -> Handle<Type> {
        self.symbol(name);
        let handle = self.module.types.insert(
            Type {
                name: Some(name.to_string()),
                inner: TypeInner::Struct { members },
            },
            Span::UNDEFINED,
        );
        self.module.declarations.push(Declaration::Struct(handle));
        handle
    }

    // Expressions

    pub fn expr(&mut self, expression: Expression) -> Handle<Expression> {
        self.module.expressions.append(expression, Span::UNDEFINED)
    }

    pub fn literal(&mut self, literal: Literal) -> Handle<Expression> {
        self.expr(Expression::Literal(literal))
    }

    pub fn u32(&mut self, value: u32) -> Handle<Expression> {
        self.literal(Literal::U32(value))
    }

    pub fn i32(&mut self, value: i32) -> Handle<Expression> {
        self.literal(Literal::I32(value))
    }

    pub fn f32(&mut self, value: f32) -> Handle<Expression> {
        self.literal(Literal::F32(value))
    }

    pub fn f16(&mut self, value: f32) -> Handle<Expression> {
        self.literal(Literal::F16(value))
    }

    pub fn bool(&mut self, value: bool) -> Handle<Expression> {
        self.literal(Literal::Bool(value))
    }

    pub fn ident(&mut self, name: &str) -> Handle<Expression> {
        let symbol = self.symbol(name);
        self.expr(Expression::Identifier(symbol))
    }

    pub fn member(&mut self, base: Handle<Expression>, name: &str) -> Handle<Expression> {
        let member = self.symbol(name);
        self.expr(Expression::Member { base, member })
    }

    pub fn index(
        &mut self,
        base: Handle<Expression>,
        index: Handle<Expression>,
    ) -> Handle<Expression> {
        self.expr(Expression::Index { base, index })
    }

    pub fn unary(&mut self, op: UnaryOperator, expr: Handle<Expression>) -> Handle<Expression> {
        self.expr(Expression::Unary { op, expr })
    }

    pub fn address_of(&mut self, expr: Handle<Expression>) -> Handle<Expression> {
        self.unary(UnaryOperator::AddressOf, expr)
    }

    pub fn deref(&mut self, expr: Handle<Expression>) -> Handle<Expression> {
        self.unary(UnaryOperator::Indirection, expr)
    }

    pub fn binary(
        &mut self,
        op: BinaryOperator,
        left: Handle<Expression>,
        right: Handle<Expression>,
    ) -> Handle<Expression> {
        self.expr(Expression::Binary { op, left, right })
    }

    pub fn add(&mut self, left: Handle<Expression>, right: Handle<Expression>) -> Handle<Expression> {
        self.binary(BinaryOperator::Add, left, right)
    }

    pub fn mul(&mut self, left: Handle<Expression>, right: Handle<Expression>) -> Handle<Expression> {
        self.binary(BinaryOperator::Multiply, left, right)
    }

    /// Call a user function by name.
    pub fn call(&mut self, function: &str, arguments: Vec<Handle<Expression>>) -> Handle<Expression> {
        let symbol = self.symbol(function);
        self.call_symbol(symbol, arguments)
    }

    pub fn call_symbol(
        &mut self,
        function: Symbol,
        arguments: Vec<Handle<Expression>>,
    ) -> Handle<Expression> {
        self.expr(Expression::Call {
            callee: Callee::Function(function),
            arguments,
        })
    }

    pub fn builtin(
        &mut self,
        fun: BuiltinFunction,
        arguments: Vec<Handle<Expression>>,
    ) -> Handle<Expression> {
        self.expr(Expression::Call {
            callee: Callee::Builtin(fun),
            arguments,
        })
    }

    pub fn construct(
        &mut self,
        ty: Handle<Type>,
        arguments: Vec<Handle<Expression>>,
    ) -> Handle<Expression> {
        self.expr(Expression::Call {
            callee: Callee::Construct(ty),
            arguments,
        })
    }

    pub fn bitcast(&mut self, ty: Handle<Type>, expr: Handle<Expression>) -> Handle<Expression> {
        self.expr(Expression::Bitcast { ty, expr })
    }

    // Statements

    pub fn stmt(&mut self, statement: Statement) -> Handle<Statement> {
        self.module.statements.append(statement, Span::UNDEFINED)
    }

    pub fn declare(
        &mut self,
        kind: DeclarationKind,
        name: &str,
        ty: Option<Handle<Type>>,
        init: Option<Handle<Expression>>,
    ) -> Handle<Statement> {
        let name = self.symbol(name);
        self.stmt(Statement::Declare {
            kind,
            name,
            ty,
            init,
        })
    }

    pub fn var(
        &mut self,
        name: &str,
        ty: Option<Handle<Type>>,
        init: Option<Handle<Expression>>,
    ) -> Handle<Statement> {
        self.declare(DeclarationKind::Var, name, ty, init)
    }

    pub fn let_(&mut self, name: &str, init: Handle<Expression>) -> Handle<Statement> {
        self.declare(DeclarationKind::Let, name, None, Some(init))
    }

    pub fn const_(&mut self, name: &str, init: Handle<Expression>) -> Handle<Statement> {
        self.declare(DeclarationKind::Const, name, None, Some(init))
    }

    pub fn assign(
        &mut self,
        target: Handle<Expression>,
        value: Handle<Expression>,
    ) -> Handle<Statement> {
        self.stmt(Statement::Assign { target, value })
    }

    pub fn call_stmt(&mut self, call: Handle<Expression>) -> Handle<Statement> {
        self.stmt(Statement::Call(call))
    }

    pub fn ret(&mut self, value: Option<Handle<Expression>>) -> Handle<Statement> {
        self.stmt(Statement::Return(value))
    }

    pub fn if_(
        &mut self,
        condition: Handle<Expression>,
        accept: Block,
        reject: Block,
    ) -> Handle<Statement> {
        self.stmt(Statement::If {
            condition,
            accept,
            reject,
        })
    }

    pub fn for_(
        &mut self,
        init: Option<Handle<Statement>>,
        condition: Option<Handle<Expression>>,
        update: Option<Handle<Statement>>,
        body: Block,
    ) -> Handle<Statement> {
        self.stmt(Statement::For {
            init,
            condition,
            update,
            body,
        })
    }

    pub fn loop_(&mut self, body: Block, continuing: Block) -> Handle<Statement> {
        self.stmt(Statement::Loop { body, continuing })
    }

    // Module-scope declarations

    pub fn global(
        &mut self,
        name: &str,
        space: AddressSpace,
        access: Option<StorageAccess>,
        binding: Option<ResourceBinding>,
        ty: Handle<Type>,
        init: Option<Handle<Expression>>,
    ) -> Handle<GlobalVariable> {
        let name = self.symbol(name);
        self.push_global(GlobalVariable {
            name,
            space,
            access: access.unwrap_or_else(|| space.default_access()),
            binding,
            ty,
            init,
        })
    }

    /// Declare a `var<storage>` buffer at `@group(group) @binding(binding)`.
    pub fn storage(
        &mut self,
        name: &str,
        group: u32,
        binding: u32,
        ty: Handle<Type>,
        access: StorageAccess,
    ) -> Handle<GlobalVariable> {
        self.global(
            name,
            AddressSpace::Storage,
            Some(access),
            Some(ResourceBinding { group, binding }),
            ty,
            None,
        )
    }

    /// Declare a `var<uniform>` buffer at `@group(group) @binding(binding)`.
    pub fn uniform(
        &mut self,
        name: &str,
        group: u32,
        binding: u32,
        ty: Handle<Type>,
    ) -> Handle<GlobalVariable> {
        self.global(
            name,
            AddressSpace::Uniform,
            None,
            Some(ResourceBinding { group, binding }),
            ty,
            None,
        )
    }

    pub fn push_global(&mut self, var: GlobalVariable) -> Handle<GlobalVariable> {
        let handle = self.module.global_variables.append(var, Span::UNDEFINED);
        self.module
            .declarations
            .push(Declaration::GlobalVariable(handle));
        handle
    }

    pub fn function(
        &mut self,
        name: &str,
        arguments: Vec<(&str, Handle<Type>)>,
        result: Option<Handle<Type>>,
        body: Block,
    ) -> Handle<Function> {
        let name = self.symbol(name);
        let arguments = arguments
            .into_iter()
            .map(|(arg_name, ty)| FunctionArgument {
                name: self.symbol(arg_name),
                ty,
            })
            .collect();
        self.push_function(Function {
            name,
            arguments,
            result,
            body: Some(body),
            stage: None,
            attributes: Vec::new(),
        })
    }

    pub fn entry_point(&mut self, name: &str, stage: ShaderStage, body: Block) -> Handle<Function> {
        let name = self.symbol(name);
        self.push_function(Function {
            name,
            arguments: Vec::new(),
            result: None,
            body: Some(body),
            stage: Some(stage),
            attributes: Vec::new(),
        })
    }

    /// A `@compute @workgroup_size(1)` entry point.
    pub fn compute(&mut self, name: &str, body: Block) -> Handle<Function> {
        self.entry_point(
            name,
            ShaderStage::Compute {
                workgroup_size: [1, 1, 1],
            },
            body,
        )
    }

    /// Declare a body-less function carrying the given internal attribute.
    pub fn stub(
        &mut self,
        name: Symbol,
        arguments: Vec<FunctionArgument>,
        result: Option<Handle<Type>>,
        attribute: InternalAttribute,
    ) -> Handle<Function> {
        self.push_function(Function {
            name,
            arguments,
            result,
            body: None,
            stage: None,
            attributes: vec![
                attribute,
                InternalAttribute::DisableValidation(DisabledValidation::FunctionHasNoBody),
            ],
        })
    }

    pub fn push_function(&mut self, function: Function) -> Handle<Function> {
        let handle = self.module.functions.append(function, Span::UNDEFINED);
        self.module.declarations.push(Declaration::Function(handle));
        handle
    }
}
