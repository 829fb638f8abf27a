/*!
Tests for the removal of custom matrix strides.
*/

use wgsl_lower::{
    back::wgsl::{self, WriterFlags},
    transform::{ApplyResult, DataMap, DecomposeStridedMatrix, Manager, Transform},
    Handle, Program, ProgramBuilder, Scalar, StorageAccess, StructMember, Type, VectorSize,
};

fn run(program: &Program) -> Program {
    let _ = env_logger::try_init();
    assert!(program.is_valid(), "{}", program.diagnostics);
    Manager::new()
        .add(DecomposeStridedMatrix)
        .run(program, &DataMap::new())
        .program
}

fn check(program: &Program, snapshot: &str) {
    assert!(program.is_valid(), "{}", program.diagnostics);
    let text = wgsl::write_string(&program.module, &program.info, WriterFlags::empty()).unwrap();
    if text != snapshot {
        for diff in diff::lines(&text, snapshot) {
            match diff {
                diff::Result::Left(l) => println!("-{l}"),
                diff::Result::Both(l, _) => println!(" {l}"),
                diff::Result::Right(r) => println!("+{r}"),
            }
        }
        panic!("Snapshot failed");
    }
}

fn assert_unsupported(program: &Program, message: &str) {
    assert!(!program.is_valid());
    assert!(
        program.diagnostics.iter().any(|d| d.message == message),
        "{}",
        program.diagnostics
    );
}

/// `struct S { @stride(stride) m : ty }` in a storage buffer `s`.
fn strided_struct(b: &mut ProgramBuilder, ty: Handle<Type>, stride: u32) -> Handle<Type> {
    let s = b.structure(
        "S",
        vec![StructMember {
            matrix_stride: Some(stride),
            ..StructMember::new("m", ty)
        }],
    );
    b.storage("s", 0, 0, s, StorageAccess::all());
    s
}

#[test]
fn matrix_member() {
    let mut b = ProgramBuilder::new();
    let mat = b.mat(VectorSize::Bi, VectorSize::Bi, Scalar::F32);
    let s = strided_struct(&mut b, mat, 32);

    let s_ident = b.ident("s");
    let m = b.member(s_ident, "m");
    let load = b.let_("x", m);

    let x = b.ident("x");
    let value = b.construct(s, vec![x]);
    let construct = b.let_("y", value);

    let s_ident = b.ident("s");
    let target = b.member(s_ident, "m");
    let x = b.ident("x");
    let store = b.assign(target, x);

    let s_ident = b.ident("s");
    let m = b.member(s_ident, "m");
    let one = b.u32(1);
    let column = b.index(m, one);
    let column = b.let_("c", column);

    let y = b.ident("y");
    let m = b.member(y, "m");
    let from_value = b.let_("z", m);

    b.compute("main", vec![load, construct, store, column, from_value]);

    check(
        &run(&b.build()),
        "\
struct S {
  m : @stride(32) array<vec2<f32>, 2u>,
}

@group(0) @binding(0) var<storage, read_write> s : S;

fn arr_to_mat2x2_stride_32(arr : @stride(32) array<vec2<f32>, 2u>) -> mat2x2<f32> {
  return mat2x2<f32>(arr[0u], arr[1u]);
}

fn mat2x2_stride_32_to_arr(m : mat2x2<f32>) -> @stride(32) array<vec2<f32>, 2u> {
  return @stride(32) array<vec2<f32>, 2u>(m[0u], m[1u]);
}

@compute @workgroup_size(1)
fn main() {
  let x = arr_to_mat2x2_stride_32(s.m);
  let y = S(mat2x2_stride_32_to_arr(x));
  s.m = mat2x2_stride_32_to_arr(x);
  let c = s.m[1u];
  let z = arr_to_mat2x2_stride_32(y.m);
}
",
    );
}

#[test]
fn natural_stride_is_dropped() {
    let mut b = ProgramBuilder::new();
    let mat = b.mat(VectorSize::Bi, VectorSize::Bi, Scalar::F32);
    strided_struct(&mut b, mat, 8);
    let s = b.ident("s");
    let m = b.member(s, "m");
    let x = b.let_("x", m);
    b.compute("main", vec![x]);

    let output = run(&b.build());
    check(
        &output,
        "\
struct S {
  m : mat2x2<f32>,
}

@group(0) @binding(0) var<storage, read_write> s : S;

@compute @workgroup_size(1)
fn main() {
  let x = s.m;
}
",
    );

    // Nothing is left to decompose.
    let again = DecomposeStridedMatrix.apply(&output, &DataMap::new(), &mut DataMap::new());
    assert!(matches!(again, ApplyResult::Skip));
}

#[test]
fn array_of_matrices() {
    let mut b = ProgramBuilder::new();
    let mat = b.mat(VectorSize::Bi, VectorSize::Bi, Scalar::F32);
    let array = b.array(mat, 2);
    let s = strided_struct(&mut b, array, 16);
    let s_ident = b.ident("s");
    let m = b.member(s_ident, "m");
    let one = b.u32(1);
    let element = b.index(m, one);
    let x = b.let_("x", element);

    let s_ident = b.ident("s");
    let m = b.member(s_ident, "m");
    let zero = b.u32(0);
    let target = b.index(m, zero);
    let value = b.ident("x");
    let store = b.assign(target, value);
    b.compute("main", vec![x, store]);

    let program = b.build();
    // Each matrix takes two 16 byte columns.
    assert_eq!(program.info.layouter[s].size, 64);
    let output = run(&program);
    let s = output.module.find_struct("S").expect("missing struct");
    assert_eq!(output.info.layouter[s].size, 64);

    check(
        &output,
        "\
struct S {
  m : array<@stride(16) array<vec2<f32>, 2u>, 2u>,
}

@group(0) @binding(0) var<storage, read_write> s : S;

fn arr_to_mat2x2_stride_16(arr : @stride(16) array<vec2<f32>, 2u>) -> mat2x2<f32> {
  return mat2x2<f32>(arr[0u], arr[1u]);
}

fn mat2x2_stride_16_to_arr(m : mat2x2<f32>) -> @stride(16) array<vec2<f32>, 2u> {
  return @stride(16) array<vec2<f32>, 2u>(m[0u], m[1u]);
}

@compute @workgroup_size(1)
fn main() {
  let x = arr_to_mat2x2_stride_16(s.m[1u]);
  s.m[0u] = mat2x2_stride_16_to_arr(x);
}
",
    );
}

#[test]
fn array_stride_of_strided_matrices() {
    let mut b = ProgramBuilder::new();
    let mat = b.mat(VectorSize::Bi, VectorSize::Bi, Scalar::F32);
    let array = b.strided_array(mat, Some(2), Some(64));
    strided_struct(&mut b, array, 16);
    let s = b.ident("s");
    let m = b.member(s, "m");
    let one = b.u32(1);
    let element = b.index(m, one);
    let x = b.let_("x", element);
    b.compute("main", vec![x]);

    assert_unsupported(
        &run(&b.build()),
        "member 'm': array stride 64 of matrices with a custom stride, expected 32",
    );

    // The natural stride of the strided matrices is kept.
    let mut b = ProgramBuilder::new();
    let mat = b.mat(VectorSize::Bi, VectorSize::Bi, Scalar::F32);
    let array = b.strided_array(mat, Some(2), Some(32));
    strided_struct(&mut b, array, 16);
    let output = run(&b.build());
    assert!(output.is_valid(), "{}", output.diagnostics);
    let text = wgsl::write_string(&output.module, &output.info, WriterFlags::empty()).unwrap();
    assert!(
        text.contains("  m : @stride(32) array<@stride(16) array<vec2<f32>, 2u>, 2u>,\n"),
        "{text}"
    );
}

#[test]
fn whole_array_of_matrices() {
    let mut b = ProgramBuilder::new();
    let mat = b.mat(VectorSize::Bi, VectorSize::Bi, Scalar::F32);
    let array = b.array(mat, 2);
    strided_struct(&mut b, array, 16);
    let s = b.ident("s");
    let m = b.member(s, "m");
    let x = b.let_("x", m);
    b.compute("main", vec![x]);

    assert_unsupported(
        &run(&b.build()),
        "arrays of matrices with a custom stride can only be accessed per element",
    );
}

#[test]
fn pointer_to_strided_matrix() {
    let mut b = ProgramBuilder::new();
    let mat = b.mat(VectorSize::Bi, VectorSize::Bi, Scalar::F32);
    strided_struct(&mut b, mat, 32);
    let s = b.ident("s");
    let m = b.member(s, "m");
    let pointer = b.address_of(m);
    let p = b.let_("p", pointer);
    b.compute("main", vec![p]);

    assert_unsupported(
        &run(&b.build()),
        "pointers to matrices with a custom stride",
    );
}
