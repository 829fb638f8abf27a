/*!
Tests for transform pipelines: backend presets, configured pipelines and
the interplay of transforms.
*/

use wgsl_lower::{
    back::wgsl::{self, WriterFlags},
    transform::{
        Backend, BufferIntrinsics, Config, DataMap, DecomposeStridedArray, Manager,
        TransposeRowMajor,
    },
    Program, ProgramBuilder, Scalar, StorageAccess, StructMember, VectorSize,
};

fn print(program: &Program) -> String {
    assert!(program.is_valid(), "{}", program.diagnostics);
    wgsl::write_string(&program.module, &program.info, WriterFlags::empty()).unwrap()
}

fn check(text: &str, snapshot: &str) {
    if text != snapshot {
        for diff in diff::lines(text, snapshot) {
            match diff {
                diff::Result::Left(l) => println!("-{l}"),
                diff::Result::Both(l, _) => println!(" {l}"),
                diff::Result::Right(r) => println!("+{r}"),
            }
        }
        panic!("Snapshot failed");
    }
}

/// A buffer with a row-major matrix and a strided array, read in `main`.
fn mixed_program(take_address: bool) -> Program {
    let _ = env_logger::try_init();
    let mut b = ProgramBuilder::new();
    let mat = b.mat(VectorSize::Bi, VectorSize::Tri, Scalar::F32);
    let f32_ty = b.scalar(Scalar::F32);
    let a = b.strided_array(f32_ty, Some(2), Some(16));
    let s = b.structure(
        "S",
        vec![
            StructMember {
                row_major: true,
                ..StructMember::new("m", mat)
            },
            StructMember::new("a", a),
        ],
    );
    b.storage("sb", 0, 0, s, StorageAccess::all());

    let sb = b.ident("sb");
    let m = b.member(sb, "m");
    let m = if take_address { b.address_of(m) } else { m };
    let load_matrix = b.let_("m", m);
    let sb = b.ident("sb");
    let a = b.member(sb, "a");
    let one = b.u32(1);
    let element = b.index(a, one);
    let load_element = b.let_("x", element);
    b.compute("main", vec![load_matrix, load_element]);

    let program = b.build();
    assert!(program.is_valid(), "{}", program.diagnostics);
    program
}

const HLSL_OUTPUT: &str = "\
struct strided_arr {
  @size(16)
  el : f32,
}

struct S {
  m : mat3x2<f32>,
  a : array<strided_arr, 2u>,
}

@group(0) @binding(0) var<storage, read_write> sb : S;

@internal(intrinsic_load_storage_vec2_f32) @internal(disable_validation__function_has_no_body)
fn sb_load_1(offset : u32) -> vec2<f32>

fn sb_load(offset : u32) -> mat3x2<f32> {
  return mat3x2<f32>(sb_load_1((offset + 0u)), sb_load_1((offset + 8u)), sb_load_1((offset + 16u)));
}

@internal(intrinsic_load_storage_f32) @internal(disable_validation__function_has_no_body)
fn sb_load_2(offset : u32) -> f32

@compute @workgroup_size(1)
fn main() {
  let m = transpose(sb_load(0u));
  let x = sb_load_2(40u);
}
";

#[test]
fn backend_presets() {
    assert_eq!(Manager::for_backend(Backend::Hlsl).len(), 4);
    assert_eq!(Manager::for_backend(Backend::Spirv).len(), 3);
    assert!(Manager::for_backend(Backend::Wgsl).is_empty());
}

#[test]
fn hlsl_pipeline() {
    let output = Manager::for_backend(Backend::Hlsl).run(&mixed_program(false), &DataMap::new());
    check(&print(&output.program), HLSL_OUTPUT);

    let module = &output.program.module;
    let names = module
        .functions_in_order()
        .map(|handle| module.symbols.name(module.functions[handle].name))
        .collect::<Vec<_>>();
    assert_eq!(names, ["sb_load_1", "sb_load", "sb_load_2", "main"]);
    let stub = module.find_function("sb_load_1").expect("missing stub");
    assert!(module.functions[stub].body.is_none());

    let intrinsics = output
        .data
        .get::<BufferIntrinsics>()
        .expect("missing buffer intrinsics");
    assert_eq!(intrinsics.stubs.len(), 2);
    assert!(intrinsics.find("sb_load").is_none());
    assert!(intrinsics.find("sb_load_1").is_some());
    assert!(intrinsics.find("sb_load_2").is_some());
}

#[test]
fn spirv_pipeline_keeps_buffer_accesses() {
    let output = Manager::for_backend(Backend::Spirv).run(&mixed_program(false), &DataMap::new());
    let text = print(&output.program);
    assert!(text.contains("  let m = transpose(sb.m);\n"), "{text}");
    assert!(text.contains("  let x = sb.a[1u].el;\n"), "{text}");
    assert!(output.data.get::<BufferIntrinsics>().is_none());
}

#[test]
fn wgsl_pipeline_is_identity() {
    let program = mixed_program(false);
    let output = Manager::for_backend(Backend::Wgsl).run(&program, &DataMap::new());
    assert_eq!(print(&output.program), print(&program));
    assert!(output.data.is_empty());
}

#[test]
fn configured_pipeline() {
    let config = Config {
        transforms: [
            "transpose-row-major",
            "decompose-strided-matrix",
            "decompose-strided-array",
            "decompose-memory-access",
        ]
        .iter()
        .map(|name| name.to_string())
        .collect(),
    };
    let manager = Manager::from_config(&config).unwrap();
    assert_eq!(manager.len(), 4);
    let output = manager.run(&mixed_program(false), &DataMap::new());
    check(&print(&output.program), HLSL_OUTPUT);
}

#[test]
fn independent_transforms_commute() {
    let program = mixed_program(false);
    let first = Manager::new()
        .add(TransposeRowMajor)
        .add(DecomposeStridedArray)
        .run(&program, &DataMap::new());
    let second = Manager::new()
        .add(DecomposeStridedArray)
        .add(TransposeRowMajor)
        .run(&program, &DataMap::new());
    assert_eq!(print(&first.program), print(&second.program));
}

#[test]
fn pipeline_stops_at_first_failure() {
    let output = Manager::for_backend(Backend::Hlsl).run(&mixed_program(true), &DataMap::new());
    assert!(!output.program.is_valid());
    let messages = output
        .program
        .diagnostics
        .iter()
        .map(|d| d.message.as_str())
        .collect::<Vec<_>>();
    assert_eq!(messages, ["taking the address of a row-major matrix"]);
    assert!(output.data.get::<BufferIntrinsics>().is_none());
}
