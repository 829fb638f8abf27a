use super::Error;
use crate::{
    back::Level,
    valid::ModuleInfo,
    AddressSpace, ArraySize, Callee, Declaration, DeclarationKind, Expression, Extensions,
    Function, GlobalVariable, Handle, InternalAttribute, Literal, Module, ShaderStage, Statement,
    StorageAccess, StructMember, Type, TypeInner,
};
use std::fmt::Write;

/// Shorthand result used internally by the backend
type BackendResult = Result<(), Error>;

bitflags::bitflags! {
    #[cfg_attr(feature = "serialize", derive(serde::Serialize))]
    #[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
    #[derive(Default)]
    pub struct WriterFlags: u32 {
        /// Always annotate the type information instead of inferring.
        const EXPLICIT_TYPES = 0x1;
    }
}

pub struct Writer<W> {
    out: W,
    flags: WriterFlags,
}

impl<W: Write> Writer<W> {
    pub fn new(out: W, flags: WriterFlags) -> Self {
        Writer { out, flags }
    }

    pub fn write(&mut self, module: &Module, info: &ModuleInfo) -> BackendResult {
        let mut first = true;
        let mut separate = |out: &mut W| -> BackendResult {
            if !first {
                writeln!(out)?;
            }
            first = false;
            Ok(())
        };

        if module.extensions.contains(Extensions::F16) {
            separate(&mut self.out)?;
            writeln!(self.out, "enable f16;")?;
        }

        for decl in module.declarations.iter() {
            separate(&mut self.out)?;
            match *decl {
                Declaration::Struct(handle) => self.write_struct(module, handle)?,
                Declaration::GlobalVariable(handle) => {
                    self.write_global(module, info, &module.global_variables[handle])?
                }
                Declaration::Function(handle) => {
                    self.write_function(module, info, &module.functions[handle])?
                }
            }
        }

        Ok(())
    }

    /// Helper method used to write structs
    ///
    /// # Notes
    /// Ends in a newline
    fn write_struct(&mut self, module: &Module, handle: Handle<Type>) -> BackendResult {
        let ty = &module.types[handle];
        let members = match ty.inner {
            TypeInner::Struct { ref members } => members,
            _ => unreachable!("declared struct {:?} is not a struct", handle),
        };
        writeln!(
            self.out,
            "struct {} {{",
            ty.name.as_deref().unwrap_or_default()
        )?;
        let level = Level(1);
        for member in members.iter() {
            if self.write_member_attributes(member, level)? {
                writeln!(self.out)?;
            }
            write!(self.out, "{}{} : ", level, member.name)?;
            self.write_type(module, member.ty)?;
            writeln!(self.out, ",")?;
        }
        writeln!(self.out, "}}")?;
        Ok(())
    }

    /// Returns whether any attribute was written.
    fn write_member_attributes(&mut self, member: &StructMember, level: Level) -> Result<bool, Error> {
        let mut attributes = Vec::new();
        if let Some(offset) = member.offset {
            attributes.push(format!("@offset({offset})"));
        }
        if let Some(align) = member.align {
            attributes.push(format!("@align({align})"));
        }
        if let Some(size) = member.size {
            attributes.push(format!("@size({size})"));
        }
        if let Some(stride) = member.matrix_stride {
            attributes.push(format!("@stride({stride})"));
        }
        if member.row_major {
            attributes.push("@row_major".to_string());
        }
        if attributes.is_empty() {
            return Ok(false);
        }
        write!(self.out, "{}{}", level, attributes.join(" "))?;
        Ok(true)
    }

    fn write_global(
        &mut self,
        module: &Module,
        info: &ModuleInfo,
        var: &GlobalVariable,
    ) -> BackendResult {
        if let Some(ref binding) = var.binding {
            write!(
                self.out,
                "@group({}) @binding({}) ",
                binding.group, binding.binding
            )?;
        }
        write!(self.out, "var")?;
        match var.space {
            AddressSpace::Handle => {}
            AddressSpace::Storage => write!(
                self.out,
                "<{}, {}>",
                var.space.to_wgsl(),
                var.access.to_wgsl()
            )?,
            space => write!(self.out, "<{}>", space.to_wgsl())?,
        }
        write!(self.out, " {} : ", module.symbols.name(var.name))?;
        self.write_type(module, var.ty)?;
        if let Some(init) = var.init {
            write!(self.out, " = ")?;
            self.write_expr(module, info, init)?;
        }
        writeln!(self.out, ";")?;
        Ok(())
    }

    /// Helper method used to write functions
    ///
    /// # Notes
    /// Ends in a newline
    fn write_function(
        &mut self,
        module: &Module,
        info: &ModuleInfo,
        func: &Function,
    ) -> BackendResult {
        if !func.attributes.is_empty() {
            let attributes = func
                .attributes
                .iter()
                .map(|attribute| match *attribute {
                    InternalAttribute::Intrinsic(ref intrinsic) => {
                        format!("@internal({})", intrinsic.internal_name())
                    }
                    InternalAttribute::DisableValidation(validation) => {
                        format!("@internal({})", validation.to_wgsl())
                    }
                })
                .collect::<Vec<_>>();
            writeln!(self.out, "{}", attributes.join(" "))?;
        }
        match func.stage {
            Some(ShaderStage::Vertex) => writeln!(self.out, "@vertex")?,
            Some(ShaderStage::Fragment) => writeln!(self.out, "@fragment")?,
            Some(ShaderStage::Compute { workgroup_size }) => {
                // Trailing dimensions of size 1 are implied.
                let used = match workgroup_size {
                    [_, 1, 1] => 1,
                    [_, _, 1] => 2,
                    _ => 3,
                };
                let sizes = workgroup_size[..used]
                    .iter()
                    .map(|size| size.to_string())
                    .collect::<Vec<_>>();
                writeln!(self.out, "@compute @workgroup_size({})", sizes.join(", "))?;
            }
            None => {}
        }

        write!(self.out, "fn {}(", module.symbols.name(func.name))?;
        for (index, argument) in func.arguments.iter().enumerate() {
            if index != 0 {
                write!(self.out, ", ")?;
            }
            write!(self.out, "{} : ", module.symbols.name(argument.name))?;
            self.write_type(module, argument.ty)?;
        }
        write!(self.out, ")")?;
        if let Some(result) = func.result {
            write!(self.out, " -> ")?;
            self.write_type(module, result)?;
        }

        match func.body {
            Some(ref body) => {
                writeln!(self.out, " {{")?;
                for &stmt in body.iter() {
                    self.write_stmt(module, info, stmt, Level(1))?;
                }
                writeln!(self.out, "}}")?;
            }
            None => writeln!(self.out)?,
        }
        Ok(())
    }

    fn write_type(&mut self, module: &Module, ty: Handle<Type>) -> BackendResult {
        let ty = &module.types[ty];
        if let Some(ref name) = ty.name {
            write!(self.out, "{name}")?;
            return Ok(());
        }
        match ty.inner {
            TypeInner::Scalar(scalar) => write!(self.out, "{}", scalar.to_wgsl())?,
            TypeInner::Vector { size, scalar } => write!(
                self.out,
                "vec{}<{}>",
                size as u8,
                scalar.to_wgsl()
            )?,
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => write!(
                self.out,
                "mat{}x{}<{}>",
                columns as u8,
                rows as u8,
                scalar.to_wgsl()
            )?,
            TypeInner::Atomic(scalar) => write!(self.out, "atomic<{}>", scalar.to_wgsl())?,
            TypeInner::Pointer {
                base,
                space,
                access,
            } => {
                write!(self.out, "ptr<{}, ", space.to_wgsl())?;
                self.write_type(module, base)?;
                if space == AddressSpace::Storage || access != StorageAccess::all() {
                    write!(self.out, ", {}", access.to_wgsl())?;
                }
                write!(self.out, ">")?;
            }
            TypeInner::Array { base, size, stride } => {
                if let Some(stride) = stride {
                    write!(self.out, "@stride({stride}) ")?;
                }
                write!(self.out, "array<")?;
                self.write_type(module, base)?;
                if let ArraySize::Constant(count) = size {
                    write!(self.out, ", {count}u")?;
                }
                write!(self.out, ">")?;
            }
            TypeInner::Struct { .. } => unreachable!("anonymous struct type"),
        }
        Ok(())
    }

    /// Helper method used to write statements
    ///
    /// # Notes
    /// Always adds a newline
    fn write_stmt(
        &mut self,
        module: &Module,
        info: &ModuleInfo,
        stmt: Handle<Statement>,
        level: Level,
    ) -> BackendResult {
        write!(self.out, "{level}")?;
        match module.statements[stmt] {
            Statement::Block(ref block) => {
                writeln!(self.out, "{{")?;
                self.write_block(module, info, block, level)?;
                writeln!(self.out, "{level}}}")?;
            }
            Statement::If { .. } => {
                self.write_if(module, info, stmt, level)?;
                writeln!(self.out)?;
            }
            Statement::For {
                init,
                condition,
                update,
                ref body,
            } => {
                write!(self.out, "for(")?;
                if let Some(init) = init {
                    self.write_simple_stmt(module, info, init)?;
                }
                write!(self.out, ";")?;
                if let Some(condition) = condition {
                    write!(self.out, " ")?;
                    self.write_expr(module, info, condition)?;
                }
                write!(self.out, ";")?;
                if let Some(update) = update {
                    write!(self.out, " ")?;
                    self.write_simple_stmt(module, info, update)?;
                }
                writeln!(self.out, ") {{")?;
                self.write_block(module, info, body, level)?;
                writeln!(self.out, "{level}}}")?;
            }
            Statement::Loop {
                ref body,
                ref continuing,
            } => {
                writeln!(self.out, "loop {{")?;
                self.write_block(module, info, body, level)?;
                if !continuing.is_empty() {
                    let l2 = level.next();
                    writeln!(self.out, "{l2}continuing {{")?;
                    self.write_block(module, info, continuing, l2)?;
                    writeln!(self.out, "{l2}}}")?;
                }
                writeln!(self.out, "{level}}}")?;
            }
            _ => {
                self.write_simple_stmt(module, info, stmt)?;
                writeln!(self.out, ";")?;
            }
        }
        Ok(())
    }

    fn write_block(
        &mut self,
        module: &Module,
        info: &ModuleInfo,
        block: &[Handle<Statement>],
        level: Level,
    ) -> BackendResult {
        for &stmt in block.iter() {
            self.write_stmt(module, info, stmt, level.next())?;
        }
        Ok(())
    }

    /// Writes an `if` chain, folding `else { if ... }` into `else if`.
    ///
    /// # Notes
    /// Ends without a newline
    fn write_if(
        &mut self,
        module: &Module,
        info: &ModuleInfo,
        stmt: Handle<Statement>,
        level: Level,
    ) -> BackendResult {
        let (condition, accept, reject) = match module.statements[stmt] {
            Statement::If {
                condition,
                ref accept,
                ref reject,
            } => (condition, accept, reject),
            _ => unreachable!(),
        };
        write!(self.out, "if (")?;
        self.write_expr(module, info, condition)?;
        writeln!(self.out, ") {{")?;
        self.write_block(module, info, accept, level)?;
        write!(self.out, "{level}}}")?;
        match reject[..] {
            [] => {}
            [nested] if matches!(module.statements[nested], Statement::If { .. }) => {
                write!(self.out, " else ")?;
                self.write_if(module, info, nested, level)?;
            }
            _ => {
                writeln!(self.out, " else {{")?;
                self.write_block(module, info, reject, level)?;
                write!(self.out, "{level}}}")?;
            }
        }
        Ok(())
    }

    /// Writes a statement that fits on one line, without the trailing `;`.
    fn write_simple_stmt(
        &mut self,
        module: &Module,
        info: &ModuleInfo,
        stmt: Handle<Statement>,
    ) -> BackendResult {
        match module.statements[stmt] {
            Statement::Declare {
                kind,
                name,
                ty,
                init,
            } => {
                let keyword = match kind {
                    DeclarationKind::Var => "var",
                    DeclarationKind::Let => "let",
                    DeclarationKind::Const => "const",
                };
                write!(self.out, "{} {}", keyword, module.symbols.name(name))?;
                let ty = match (ty, init) {
                    (Some(ty), _) => Some(ty),
                    (None, Some(init)) if self.flags.contains(WriterFlags::EXPLICIT_TYPES) => {
                        match info.get(init).and_then(|info| info.ty) {
                            Some(ty) => Some(ty),
                            None => return Err(Error::UnresolvedExpression(init)),
                        }
                    }
                    (None, _) => None,
                };
                if let Some(ty) = ty {
                    write!(self.out, " : ")?;
                    self.write_type(module, ty)?;
                }
                if let Some(init) = init {
                    write!(self.out, " = ")?;
                    self.write_expr(module, info, init)?;
                }
            }
            Statement::Assign { target, value } => {
                self.write_expr(module, info, target)?;
                write!(self.out, " = ")?;
                self.write_expr(module, info, value)?;
            }
            Statement::Call(expr) => self.write_expr(module, info, expr)?,
            Statement::Break => write!(self.out, "break")?,
            Statement::Continue => write!(self.out, "continue")?,
            Statement::Discard => write!(self.out, "discard")?,
            Statement::Return(value) => {
                write!(self.out, "return")?;
                if let Some(value) = value {
                    write!(self.out, " ")?;
                    self.write_expr(module, info, value)?;
                }
            }
            Statement::Block(_)
            | Statement::If { .. }
            | Statement::For { .. }
            | Statement::Loop { .. } => {
                unreachable!("compound statement {:?} in a simple position", stmt)
            }
        }
        Ok(())
    }

    /// Helper method to write expressions
    ///
    /// # Notes
    /// Doesn't add any newlines or leading/trailing spaces
    fn write_expr(
        &mut self,
        module: &Module,
        info: &ModuleInfo,
        expr: Handle<Expression>,
    ) -> BackendResult {
        match module.expressions[expr] {
            Expression::Literal(literal) => self.write_literal(literal)?,
            Expression::Identifier(name) => write!(self.out, "{}", module.symbols.name(name))?,
            Expression::Member { base, member } => {
                self.write_expr(module, info, base)?;
                write!(self.out, ".{}", module.symbols.name(member))?;
            }
            Expression::Index { base, index } => {
                self.write_expr(module, info, base)?;
                write!(self.out, "[")?;
                self.write_expr(module, info, index)?;
                write!(self.out, "]")?;
            }
            Expression::Unary { op, expr } => {
                write!(self.out, "{}(", op.to_wgsl())?;
                self.write_expr(module, info, expr)?;
                write!(self.out, ")")?;
            }
            Expression::Binary { op, left, right } => {
                write!(self.out, "(")?;
                self.write_expr(module, info, left)?;
                write!(self.out, " {} ", op.to_wgsl())?;
                self.write_expr(module, info, right)?;
                write!(self.out, ")")?;
            }
            Expression::Call {
                callee,
                ref arguments,
            } => {
                match callee {
                    Callee::Function(name) => write!(self.out, "{}", module.symbols.name(name))?,
                    Callee::Builtin(fun) => write!(self.out, "{}", fun.to_wgsl())?,
                    Callee::Construct(ty) => self.write_type(module, ty)?,
                }
                write!(self.out, "(")?;
                for (index, &argument) in arguments.iter().enumerate() {
                    if index != 0 {
                        write!(self.out, ", ")?;
                    }
                    self.write_expr(module, info, argument)?;
                }
                write!(self.out, ")")?;
            }
            Expression::Bitcast { ty, expr } => {
                write!(self.out, "bitcast<")?;
                self.write_type(module, ty)?;
                write!(self.out, ">(")?;
                self.write_expr(module, info, expr)?;
                write!(self.out, ")")?;
            }
        }
        Ok(())
    }

    fn write_literal(&mut self, literal: Literal) -> BackendResult {
        match literal {
            Literal::Bool(value) => write!(self.out, "{value}")?,
            Literal::I32(value) => write!(self.out, "{value}i")?,
            Literal::U32(value) => write!(self.out, "{value}u")?,
            Literal::F32(value) => write!(self.out, "{}f", float_str(value))?,
            Literal::F16(value) => write!(self.out, "{}h", float_str(value))?,
        }
        Ok(())
    }

    pub fn finish(self) -> W {
        self.out
    }
}

/// Spell a float so that it always reads as a float: `1.0`, `0.5`.
fn float_str(value: f32) -> String {
    if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::float_str;

    #[test]
    fn floats() {
        assert_eq!(float_str(1.0), "1.0");
        assert_eq!(float_str(-2.0), "-2.0");
        assert_eq!(float_str(0.5), "0.5");
    }
}
