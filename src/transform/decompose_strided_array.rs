/*!
Removal of explicit array strides.

An array whose `@stride` equals the natural stride of its element simply
loses the attribute. Any other stride is expressed with a wrapper structure
whose single member is padded to the stride:

```text
struct strided_arr {
  @size(32)
  el : f32,
}

@stride(32) array<f32, 4u>    -->    array<strided_arr, 4u>
a[i]                          -->    a[i].el
array<f32, 4u>(x, y, ...)     -->    array<strided_arr, 4u>(strided_arr(x), ...)
```

Whole-array copies keep working since both sides get the same type. One
wrapper is created per stride and element type.
*/

use super::{ApplyResult, CloneContext, DataMap, Transform};
use crate::{
    arena::Handle, Callee, Expression, FastHashMap, Program, StructMember, Type, TypeInner,
};

pub(super) const NAME: &str = "decompose-strided-array";

/// Replace `@stride` arrays with arrays of padded wrapper structures.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecomposeStridedArray;

#[derive(Default)]
struct State {
    /// Wrapper structures, by stride and (destination) element type.
    wrappers: FastHashMap<(u32, Handle<Type>), Handle<Type>>,
}

type Context<'a> = CloneContext<'a, State>;

fn wrapper(ctx: &mut Context<'_>, stride: u32, element: Handle<Type>) -> Handle<Type> {
    if let Some(&wrapper) = ctx.state.wrappers.get(&(stride, element)) {
        return wrapper;
    }
    let name = ctx.dst.unique_symbol("strided_arr");
    let name = ctx.dst.module.symbols.name(name).to_string();
    let wrapper = ctx.dst.structure(
        &name,
        vec![StructMember {
            size: Some(stride),
            ..StructMember::new("el", element)
        }],
    );
    log::debug!("wrapping elements of stride {} in {}", stride, name);
    ctx.state.wrappers.insert((stride, element), wrapper);
    wrapper
}

/// The element type of the array `ty` of the destination program.
fn array_base(ctx: &Context<'_>, ty: Handle<Type>) -> Handle<Type> {
    match ctx.dst.module.types[ty].inner {
        TypeInner::Array { base, .. } => base,
        ref other => ice!("expected an array, found {:?}", other),
    }
}

fn should_run(src: &Program) -> bool {
    src.module.types.iter().any(|(_, ty)| {
        matches!(
            ty.inner,
            TypeInner::Array {
                stride: Some(_),
                ..
            }
        )
    })
}

impl Transform for DecomposeStridedArray {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, src: &Program, _inputs: &DataMap, _outputs: &mut DataMap) -> ApplyResult {
        if !should_run(src) {
            return ApplyResult::Skip;
        }
        let module = &src.module;
        let layouter = &src.info.layouter;
        let mut ctx = CloneContext::new(src, State::default());

        // Source arrays that get wrapped elements.
        let mut wrapped = Vec::new();
        for (handle, ty) in module.types.iter() {
            let (base, size, stride) = match ty.inner {
                TypeInner::Array {
                    base,
                    size,
                    stride: Some(stride),
                } => (base, size, stride),
                _ => continue,
            };
            if stride == layouter.natural_stride(base) {
                ctx.replace_type(handle, move |ctx| {
                    let base = ctx.clone_type(base);
                    ctx.dst.ty(TypeInner::Array {
                        base,
                        size,
                        stride: None,
                    })
                });
            } else {
                wrapped.push(handle);
                ctx.replace_type(handle, move |ctx| {
                    let element = ctx.clone_type(base);
                    let base = wrapper(ctx, stride, element);
                    ctx.dst.ty(TypeInner::Array {
                        base,
                        size,
                        stride: None,
                    })
                });
            }
        }

        for (handle, expression) in module.expressions.iter() {
            match *expression {
                Expression::Index { base, .. } => {
                    let info = &src.info[base];
                    let object = match info.ty {
                        Some(ty) => ty,
                        None => continue,
                    };
                    if info.is_pointer(&module.types) {
                        if let Some(pointee) = info.object_type(&module.types) {
                            if wrapped.contains(&pointee) {
                                ice!(
                                    "index through pointer {:?} to a strided array, pointers must be simplified first",
                                    base
                                );
                            }
                        }
                        continue;
                    }
                    if !wrapped.contains(&object) {
                        continue;
                    }
                    ctx.replace_expression(handle, move |ctx| {
                        let element = ctx.clone_expression_node(handle);
                        ctx.dst.member(element, "el")
                    });
                }
                Expression::Call {
                    callee: Callee::Construct(ty),
                    ref arguments,
                } if wrapped.contains(&ty) && !arguments.is_empty() => {
                    let arguments = arguments.clone();
                    ctx.replace_expression(handle, move |ctx| {
                        let array = ctx.clone_type(ty);
                        let wrapper = array_base(ctx, array);
                        let elements = arguments
                            .iter()
                            .map(|&argument| {
                                let value = ctx.clone_expression(argument);
                                ctx.dst.construct(wrapper, vec![value])
                            })
                            .collect();
                        ctx.dst.construct(array, elements)
                    });
                }
                _ => {}
            }
        }

        ctx.clone_module();
        let (builder, _) = ctx.finish();
        ApplyResult::Program(builder.build())
    }
}
