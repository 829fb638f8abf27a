/*!
Backend for [WGSL][wgsl] (WebGPU Shading Language).

The output keeps the layout attributes the transforms operate on
(`@stride`, `@row_major`, member `@offset`) and the compiler-internal
`@internal(...)` attributes, so it is not always accepted by a WGSL front
end. It is meant for inspecting and testing transformed programs.

[wgsl]: https://gpuweb.github.io/gpuweb/wgsl.html
*/

mod writer;

use thiserror::Error;

pub use writer::{Writer, WriterFlags};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    FmtError(#[from] std::fmt::Error),
    #[error("Expression {0:?} has no resolved type")]
    UnresolvedExpression(crate::Handle<crate::Expression>),
}

pub fn write_string(
    module: &crate::Module,
    info: &crate::valid::ModuleInfo,
    flags: WriterFlags,
) -> Result<String, Error> {
    let mut w = Writer::new(String::new(), flags);
    w.write(module, info)?;
    let output = w.finish();
    Ok(output)
}
