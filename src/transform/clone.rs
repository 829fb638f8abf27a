use crate::{
    arena::Handle, Block, Callee, Declaration, Expression, FastHashMap, FastHashSet, Function,
    FunctionArgument, GlobalVariable, Program, ProgramBuilder, Statement, StructMember, Type,
    TypeInner,
};
use std::rc::Rc;

type Replacer<'a, S, T> = Rc<dyn Fn(&mut CloneContext<'a, S>) -> Handle<T> + 'a>;

/// Copies a source program into a fresh [`ProgramBuilder`], applying edits.
///
/// Edits are recorded up front against handles of the source program
/// ([`replace_expression`](Self::replace_expression) and friends) and
/// applied during a single walk of the module in declaration order. Nodes
/// without an edit are copied as they are. Replacement closures receive the
/// context itself, so they can clone parts of the source (through
/// [`clone_expression`](Self::clone_expression), which applies nested edits)
/// and build new nodes in [`dst`](Self::dst).
///
/// The destination starts with a copy of the source symbol table, so source
/// symbols stay valid in the output and names generated with
/// [`ProgramBuilder::unique_symbol`] never collide with existing ones.
///
/// `S` is transform-specific state, such as helper function caches.
pub struct CloneContext<'a, S> {
    pub src: &'a Program,
    pub dst: ProgramBuilder,
    pub state: S,
    types: FastHashMap<Handle<Type>, Handle<Type>>,
    type_replacements: FastHashMap<Handle<Type>, Replacer<'a, S, Type>>,
    expression_replacements: FastHashMap<Handle<Expression>, Replacer<'a, S, Expression>>,
    statement_replacements: FastHashMap<Handle<Statement>, Replacer<'a, S, Statement>>,
    removed: FastHashSet<Handle<Statement>>,
    inserted_before: FastHashMap<Handle<Statement>, Vec<Replacer<'a, S, Statement>>>,
    inserted_after: FastHashMap<Handle<Statement>, Vec<Replacer<'a, S, Statement>>>,
}

impl<'a, S> CloneContext<'a, S> {
    pub fn new(src: &'a Program, state: S) -> Self {
        let mut dst = ProgramBuilder::new();
        dst.module.symbols = src.module.symbols.clone();
        dst.module.extensions = src.module.extensions;
        dst.diagnostics.extend(&src.diagnostics);
        CloneContext {
            src,
            dst,
            state,
            types: FastHashMap::default(),
            type_replacements: FastHashMap::default(),
            expression_replacements: FastHashMap::default(),
            statement_replacements: FastHashMap::default(),
            removed: FastHashSet::default(),
            inserted_before: FastHashMap::default(),
            inserted_after: FastHashMap::default(),
        }
    }

    /// Clone `ty` with `replacer` instead. The replacement is built once.
    pub fn replace_type<F>(&mut self, ty: Handle<Type>, replacer: F)
    where
        F: Fn(&mut Self) -> Handle<Type> + 'a,
    {
        log::trace!("replacing type {:?}", ty);
        self.type_replacements.insert(ty, Rc::new(replacer));
    }

    /// Clone `expr` with `replacer` instead, every time it is cloned.
    pub fn replace_expression<F>(&mut self, expr: Handle<Expression>, replacer: F)
    where
        F: Fn(&mut Self) -> Handle<Expression> + 'a,
    {
        log::trace!("replacing expression {:?}", expr);
        let previous = self.expression_replacements.insert(expr, Rc::new(replacer));
        if previous.is_some() {
            ice!("expression {:?} is replaced twice", expr);
        }
    }

    pub fn replace_statement<F>(&mut self, stmt: Handle<Statement>, replacer: F)
    where
        F: Fn(&mut Self) -> Handle<Statement> + 'a,
    {
        log::trace!("replacing statement {:?}", stmt);
        let previous = self.statement_replacements.insert(stmt, Rc::new(replacer));
        if previous.is_some() {
            ice!("statement {:?} is replaced twice", stmt);
        }
    }

    /// Drop `stmt` from its block.
    pub fn remove_statement(&mut self, stmt: Handle<Statement>) {
        log::trace!("removing statement {:?}", stmt);
        self.removed.insert(stmt);
    }

    /// Emit the statement built by `builder` just before `stmt`.
    pub fn insert_before<F>(&mut self, stmt: Handle<Statement>, builder: F)
    where
        F: Fn(&mut Self) -> Handle<Statement> + 'a,
    {
        self.inserted_before
            .entry(stmt)
            .or_default()
            .push(Rc::new(builder));
    }

    /// Emit the statement built by `builder` just after `stmt`.
    pub fn insert_after<F>(&mut self, stmt: Handle<Statement>, builder: F)
    where
        F: Fn(&mut Self) -> Handle<Statement> + 'a,
    {
        self.inserted_after
            .entry(stmt)
            .or_default()
            .push(Rc::new(builder));
    }

    pub fn clone_type(&mut self, ty: Handle<Type>) -> Handle<Type> {
        if let Some(&cloned) = self.types.get(&ty) {
            return cloned;
        }
        let cloned = match self.type_replacements.get(&ty).cloned() {
            Some(replacer) => replacer(self),
            None => self.clone_type_node(ty),
        };
        self.types.insert(ty, cloned);
        cloned
    }

    /// Clone `ty` itself, ignoring its replacement but not those of its components.
    pub fn clone_type_node(&mut self, ty: Handle<Type>) -> Handle<Type> {
        let src = self.src;
        let source = &src.module.types[ty];
        let inner = match source.inner {
            TypeInner::Scalar(_)
            | TypeInner::Vector { .. }
            | TypeInner::Matrix { .. }
            | TypeInner::Atomic(_) => source.inner.clone(),
            TypeInner::Pointer {
                base,
                space,
                access,
            } => TypeInner::Pointer {
                base: self.clone_type(base),
                space,
                access,
            },
            TypeInner::Array { base, size, stride } => TypeInner::Array {
                base: self.clone_type(base),
                size,
                stride,
            },
            TypeInner::Struct { ref members } => TypeInner::Struct {
                members: members
                    .iter()
                    .map(|member| self.clone_member(member))
                    .collect(),
            },
        };
        self.dst.module.types.insert(
            Type {
                name: source.name.clone(),
                inner,
            },
            src.module.types.get_span(ty),
        )
    }

    pub fn clone_member(&mut self, member: &StructMember) -> StructMember {
        StructMember {
            ty: self.clone_type(member.ty),
            ..member.clone()
        }
    }

    pub fn clone_expression(&mut self, expr: Handle<Expression>) -> Handle<Expression> {
        match self.expression_replacements.get(&expr).cloned() {
            Some(replacer) => replacer(self),
            None => self.clone_expression_node(expr),
        }
    }

    /// Clone `expr` itself, ignoring its replacement but not those of its operands.
    ///
    /// Replacements use this to wrap the expression they replace.
    pub fn clone_expression_node(&mut self, expr: Handle<Expression>) -> Handle<Expression> {
        let src = self.src;
        let expression = match src.module.expressions[expr] {
            Expression::Literal(literal) => Expression::Literal(literal),
            Expression::Identifier(name) => Expression::Identifier(name),
            Expression::Member { base, member } => Expression::Member {
                base: self.clone_expression(base),
                member,
            },
            Expression::Index { base, index } => Expression::Index {
                base: self.clone_expression(base),
                index: self.clone_expression(index),
            },
            Expression::Unary { op, expr } => Expression::Unary {
                op,
                expr: self.clone_expression(expr),
            },
            Expression::Binary { op, left, right } => Expression::Binary {
                op,
                left: self.clone_expression(left),
                right: self.clone_expression(right),
            },
            Expression::Call {
                callee,
                ref arguments,
            } => Expression::Call {
                callee: match callee {
                    Callee::Construct(ty) => Callee::Construct(self.clone_type(ty)),
                    Callee::Function(_) | Callee::Builtin(_) => callee,
                },
                arguments: arguments
                    .iter()
                    .map(|&argument| self.clone_expression(argument))
                    .collect(),
            },
            Expression::Bitcast { ty, expr } => Expression::Bitcast {
                ty: self.clone_type(ty),
                expr: self.clone_expression(expr),
            },
        };
        self.dst
            .module
            .expressions
            .append(expression, src.module.expressions.get_span(expr))
    }

    pub fn clone_statement(&mut self, stmt: Handle<Statement>) -> Handle<Statement> {
        if let Some(replacer) = self.statement_replacements.get(&stmt).cloned() {
            return replacer(self);
        }
        let src = self.src;
        let statement = match src.module.statements[stmt] {
            Statement::Block(ref block) => Statement::Block(self.clone_block(block)),
            Statement::Declare {
                kind,
                name,
                ty,
                init,
            } => Statement::Declare {
                kind,
                name,
                ty: ty.map(|ty| self.clone_type(ty)),
                init: init.map(|init| self.clone_expression(init)),
            },
            Statement::Assign { target, value } => Statement::Assign {
                target: self.clone_expression(target),
                value: self.clone_expression(value),
            },
            Statement::Call(expr) => Statement::Call(self.clone_expression(expr)),
            Statement::If {
                condition,
                ref accept,
                ref reject,
            } => Statement::If {
                condition: self.clone_expression(condition),
                accept: self.clone_block(accept),
                reject: self.clone_block(reject),
            },
            Statement::For {
                init,
                condition,
                update,
                ref body,
            } => Statement::For {
                init: init.map(|init| self.clone_statement(init)),
                condition: condition.map(|condition| self.clone_expression(condition)),
                update: update.map(|update| self.clone_statement(update)),
                body: self.clone_block(body),
            },
            Statement::Loop {
                ref body,
                ref continuing,
            } => Statement::Loop {
                body: self.clone_block(body),
                continuing: self.clone_block(continuing),
            },
            Statement::Break => Statement::Break,
            Statement::Continue => Statement::Continue,
            Statement::Return(value) => {
                Statement::Return(value.map(|value| self.clone_expression(value)))
            }
            Statement::Discard => Statement::Discard,
        };
        self.dst
            .module
            .statements
            .append(statement, src.module.statements.get_span(stmt))
    }

    pub fn clone_block(&mut self, block: &[Handle<Statement>]) -> Block {
        let mut cloned = Block::with_capacity(block.len());
        for &stmt in block.iter() {
            if let Some(builders) = self.inserted_before.get(&stmt).cloned() {
                cloned.extend(builders.iter().map(|builder| builder(self)));
            }
            if !self.removed.contains(&stmt) {
                cloned.push(self.clone_statement(stmt));
            }
            if let Some(builders) = self.inserted_after.get(&stmt).cloned() {
                cloned.extend(builders.iter().map(|builder| builder(self)));
            }
        }
        cloned
    }

    pub fn clone_global(&mut self, handle: Handle<GlobalVariable>) -> Handle<GlobalVariable> {
        let src = self.src;
        let var = &src.module.global_variables[handle];
        let cloned = GlobalVariable {
            ty: self.clone_type(var.ty),
            init: var.init.map(|init| self.clone_expression(init)),
            ..var.clone()
        };
        let span = src.module.global_variables.get_span(handle);
        let new_handle = self.dst.module.global_variables.append(cloned, span);
        self.dst
            .module
            .declarations
            .push(Declaration::GlobalVariable(new_handle));
        new_handle
    }

    /// Clone a function. Functions created while cloning its body are
    /// declared before it.
    pub fn clone_function(&mut self, handle: Handle<Function>) -> Handle<Function> {
        let src = self.src;
        let fun = &src.module.functions[handle];
        let arguments = fun
            .arguments
            .iter()
            .map(|argument| FunctionArgument {
                name: argument.name,
                ty: self.clone_type(argument.ty),
            })
            .collect();
        let result = fun.result.map(|ty| self.clone_type(ty));
        let body = fun.body.as_ref().map(|body| self.clone_block(body));
        let cloned = Function {
            name: fun.name,
            arguments,
            result,
            body,
            stage: fun.stage,
            attributes: fun.attributes.clone(),
        };
        let span = src.module.functions.get_span(handle);
        let new_handle = self.dst.module.functions.append(cloned, span);
        self.dst
            .module
            .declarations
            .push(Declaration::Function(new_handle));
        new_handle
    }

    /// Clone every module-scope declaration, in order.
    pub fn clone_module(&mut self) {
        profiling::scope!("clone_module");
        let src = self.src;
        for decl in src.module.declarations.iter() {
            match *decl {
                Declaration::Struct(handle) => {
                    let cloned = self.clone_type(handle);
                    self.dst
                        .module
                        .declarations
                        .push(Declaration::Struct(cloned));
                }
                Declaration::GlobalVariable(handle) => {
                    self.clone_global(handle);
                }
                Declaration::Function(handle) => {
                    self.clone_function(handle);
                }
            }
        }
    }

    pub fn finish(self) -> (ProgramBuilder, S) {
        (self.dst, self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::CloneContext;
    use crate::{back::wgsl, ProgramBuilder, Scalar, Statement};

    fn source() -> crate::Program {
        let mut b = ProgramBuilder::new();
        let f32_ty = b.scalar(Scalar::F32);
        let one = b.f32(1.0);
        let a = b.var("a", Some(f32_ty), Some(one));
        let target = b.ident("a");
        let two = b.f32(2.0);
        let assign = b.assign(target, two);
        b.compute("main", vec![a, assign]);
        b.build()
    }

    fn print(program: &crate::Program) -> String {
        assert!(program.is_valid(), "{}", program.diagnostics);
        wgsl::write_string(&program.module, &program.info, wgsl::WriterFlags::empty()).unwrap()
    }

    fn find_assign(program: &crate::Program) -> (crate::Handle<Statement>, crate::Handle<crate::Expression>) {
        program
            .module
            .statements
            .iter()
            .find_map(|(handle, stmt)| match *stmt {
                Statement::Assign { value, .. } => Some((handle, value)),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn identity() {
        let src = source();
        let mut ctx = CloneContext::new(&src, ());
        ctx.clone_module();
        let (builder, ()) = ctx.finish();
        assert_eq!(print(&builder.build()), print(&src));
    }

    #[test]
    fn control_flow() {
        let mut b = ProgramBuilder::new();
        let zero = b.u32(0);
        let decl = b.var("i", None, Some(zero));
        let i = b.ident("i");
        let four = b.u32(4);
        let done = b.binary(crate::BinaryOperator::GreaterEqual, i, four);
        let exit = b.stmt(Statement::Break);
        let check = b.if_(done, vec![exit], Vec::new());
        let target = b.ident("i");
        let i = b.ident("i");
        let one = b.u32(1);
        let next = b.add(i, one);
        let step = b.assign(target, next);
        let body = b.loop_(vec![check], vec![step]);
        b.compute("main", vec![decl, body]);
        let src = b.build();

        let mut ctx = CloneContext::new(&src, ());
        ctx.clone_module();
        let (builder, ()) = ctx.finish();
        assert_eq!(
            print(&builder.build()),
            "\
@compute @workgroup_size(1)
fn main() {
  var i = 0u;
  loop {
    if ((i >= 4u)) {
      break;
    }
    continuing {
      i = (i + 1u);
    }
  }
}
"
        );
    }

    #[test]
    fn replace_wraps_original() {
        let src = source();
        let (_, value) = find_assign(&src);
        let mut ctx = CloneContext::new(&src, ());
        ctx.replace_expression(value, move |ctx| {
            let inner = ctx.clone_expression_node(value);
            ctx.dst.unary(crate::UnaryOperator::Negate, inner)
        });
        ctx.clone_module();
        let (builder, ()) = ctx.finish();
        assert_eq!(
            print(&builder.build()),
            "\
@compute @workgroup_size(1)
fn main() {
  var a : f32 = 1.0f;
  a = -(2.0f);
}
"
        );
    }

    #[test]
    fn insert_and_remove() {
        let src = source();
        let (assign, _) = find_assign(&src);
        let mut ctx = CloneContext::new(&src, ());
        ctx.remove_statement(assign);
        ctx.insert_before(assign, |ctx| {
            let value = ctx.dst.f32(3.0);
            ctx.dst.let_("b", value)
        });
        ctx.insert_after(assign, |ctx| ctx.dst.ret(None));
        ctx.clone_module();
        let (builder, ()) = ctx.finish();
        assert_eq!(
            print(&builder.build()),
            "\
@compute @workgroup_size(1)
fn main() {
  var a : f32 = 1.0f;
  let b = 3.0f;
  return;
}
"
        );
    }
}
