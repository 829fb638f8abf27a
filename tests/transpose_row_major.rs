/*!
Tests for the lowering of row-major matrices.
*/

use wgsl_lower::{
    back::wgsl::{self, WriterFlags},
    transform::{DataMap, Manager, TransposeRowMajor},
    Handle, Program, ProgramBuilder, Scalar, StorageAccess, StructMember, Type, VectorSize,
};

fn run(program: &Program) -> Program {
    let _ = env_logger::try_init();
    assert!(program.is_valid(), "{}", program.diagnostics);
    Manager::new()
        .add(TransposeRowMajor)
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

/// `struct S { @row_major m : ty }` in a storage buffer `s`.
fn row_major_struct(b: &mut ProgramBuilder, ty: Handle<Type>) -> Handle<Type> {
    let s = b.structure(
        "S",
        vec![StructMember {
            row_major: true,
            ..StructMember::new("m", ty)
        }],
    );
    b.storage("s", 0, 0, s, StorageAccess::all());
    s
}

#[test]
fn matrix_accesses() {
    let mut b = ProgramBuilder::new();
    let mat = b.mat(VectorSize::Bi, VectorSize::Tri, Scalar::F32);
    row_major_struct(&mut b, mat);

    let s = b.ident("s");
    let m = b.member(s, "m");
    let load = b.let_("x", m);

    let s = b.ident("s");
    let target = b.member(s, "m");
    let x = b.ident("x");
    let store = b.assign(target, x);

    let s = b.ident("s");
    let m = b.member(s, "m");
    let one = b.u32(1);
    let column = b.index(m, one);
    let load_column = b.let_("c", column);

    let s = b.ident("s");
    let m = b.member(s, "m");
    let one = b.u32(1);
    let target = b.index(m, one);
    let c = b.ident("c");
    let store_column = b.assign(target, c);

    let s = b.ident("s");
    let m = b.member(s, "m");
    let one = b.u32(1);
    let column = b.index(m, one);
    let two = b.u32(2);
    let element = b.index(column, two);
    let load_element = b.let_("e", element);

    let s = b.ident("s");
    let m = b.member(s, "m");
    let zero = b.u32(0);
    let column = b.index(m, zero);
    let y = b.member(column, "y");
    let e = b.ident("e");
    let store_element = b.assign(y, e);

    b.compute(
        "main",
        vec![
            load,
            store,
            load_column,
            store_column,
            load_element,
            store_element,
        ],
    );

    check(
        &run(&b.build()),
        "\
struct S {
  m : mat3x2<f32>,
}

@group(0) @binding(0) var<storage, read_write> s : S;

fn tint_load_row(m : mat3x2<f32>, c : u32) -> vec3<f32> {
  return vec3<f32>(m[0u][c], m[1u][c], m[2u][c]);
}

fn tint_store_row(m : mat3x2<f32>, c : u32, v : vec3<f32>) -> mat3x2<f32> {
  var r = m;
  r[0u][c] = v[0u];
  r[1u][c] = v[1u];
  r[2u][c] = v[2u];
  return r;
}

@compute @workgroup_size(1)
fn main() {
  let x = transpose(s.m);
  s.m = transpose(x);
  let c = tint_load_row(s.m, 1u);
  s.m = tint_store_row(s.m, 1u, c);
  let e = s.m[2u][1u];
  s.m[1u][0u] = e;
}
",
    );
}

#[test]
fn array_of_matrices() {
    let mut b = ProgramBuilder::new();
    let mat = b.mat(VectorSize::Bi, VectorSize::Tri, Scalar::F32);
    let array = b.strided_array(mat, Some(2), Some(32));
    row_major_struct(&mut b, array);

    let s = b.ident("s");
    let m = b.member(s, "m");
    let load = b.let_("x", m);

    let s = b.ident("s");
    let target = b.member(s, "m");
    let x = b.ident("x");
    let store = b.assign(target, x);

    let s = b.ident("s");
    let m = b.member(s, "m");
    let one = b.u32(1);
    let element = b.index(m, one);
    let load_element = b.let_("y", element);

    b.compute("main", vec![load, store, load_element]);

    check(
        &run(&b.build()),
        "\
struct S {
  m : @stride(32) array<mat3x2<f32>, 2u>,
}

@group(0) @binding(0) var<storage, read_write> s : S;

fn tint_transpose_arr(a : @stride(32) array<mat3x2<f32>, 2u>) -> @stride(32) array<mat2x3<f32>, 2u> {
  var r : @stride(32) array<mat2x3<f32>, 2u>;
  for(var i = 0u; (i < 2u); i = (i + 1u)) {
    r[i] = transpose(a[i]);
  }
  return r;
}

fn tint_transpose_arr_1(a : @stride(32) array<mat2x3<f32>, 2u>) -> @stride(32) array<mat3x2<f32>, 2u> {
  var r : @stride(32) array<mat3x2<f32>, 2u>;
  for(var i = 0u; (i < 2u); i = (i + 1u)) {
    r[i] = transpose(a[i]);
  }
  return r;
}

@compute @workgroup_size(1)
fn main() {
  let x = tint_transpose_arr(s.m);
  s.m = tint_transpose_arr_1(x);
  let y = transpose(s.m[1u]);
}
",
    );
}

#[test]
fn struct_values_convert_on_member_access() {
    let mut b = ProgramBuilder::new();
    let mat = b.mat(VectorSize::Bi, VectorSize::Tri, Scalar::F32);
    let s_ty = row_major_struct(&mut b, mat);

    let s = b.ident("s");
    let copy = b.let_("t", s);
    let t = b.ident("t");
    let m = b.member(t, "m");
    let x = b.let_("x", m);
    let x_value = b.ident("x");
    let value = b.construct(s_ty, vec![x_value]);
    let u = b.let_("u", value);
    b.compute("main", vec![copy, x, u]);

    check(
        &run(&b.build()),
        "\
struct S {
  m : mat3x2<f32>,
}

@group(0) @binding(0) var<storage, read_write> s : S;

@compute @workgroup_size(1)
fn main() {
  let t = s;
  let x = transpose(t.m);
  let u = S(transpose(x));
}
",
    );
}

#[test]
fn pointer_to_row_major_matrix() {
    let mut b = ProgramBuilder::new();
    let mat = b.mat(VectorSize::Bi, VectorSize::Tri, Scalar::F32);
    row_major_struct(&mut b, mat);
    let s = b.ident("s");
    let m = b.member(s, "m");
    let pointer = b.address_of(m);
    let p = b.let_("p", pointer);
    b.compute("main", vec![p]);

    let output = run(&b.build());
    assert!(!output.is_valid());
    assert!(
        output
            .diagnostics
            .iter()
            .any(|d| d.message == "taking the address of a row-major matrix"),
        "{}",
        output.diagnostics
    );
}

#[test]
fn column_store_evaluates_index_once() {
    let mut b = ProgramBuilder::new();
    let mat = b.mat(VectorSize::Bi, VectorSize::Tri, Scalar::F32);
    let array = b.array(mat, 4);
    let s_ty = row_major_struct(&mut b, array);
    let vec3 = b.vec(VectorSize::Tri, Scalar::F32);

    let u32_ty = b.scalar(Scalar::U32);
    let one = b.u32(1);
    let ret = b.ret(Some(one));
    b.function("next", Vec::new(), Some(u32_ty), vec![ret]);

    let s = b.ident("s");
    let m = b.member(s, "m");
    let next = b.call("next", Vec::new());
    let matrix = b.index(m, next);
    let one = b.u32(1);
    let target = b.index(matrix, one);
    let values = [1.0, 2.0, 3.0].iter().map(|&value| b.f32(value)).collect();
    let value = b.construct(vec3, values);
    let store = b.assign(target, value);
    b.compute("main", vec![store]);

    let program = b.build();
    // Each matrix is stored as three rows of vec2<f32>.
    assert_eq!(program.info.layouter[s_ty].size, 96);
    let output = run(&program);
    let s_ty = output.module.find_struct("S").expect("missing struct");
    assert_eq!(output.info.layouter[s_ty].size, 96);

    check(
        &output,
        "\
struct S {
  m : array<mat3x2<f32>, 4u>,
}

@group(0) @binding(0) var<storage, read_write> s : S;

fn next() -> u32 {
  return 1u;
}

fn tint_store_row(m : mat3x2<f32>, c : u32, v : vec3<f32>) -> mat3x2<f32> {
  var r = m;
  r[0u][c] = v[0u];
  r[1u][c] = v[1u];
  r[2u][c] = v[2u];
  return r;
}

@compute @workgroup_size(1)
fn main() {
  let tint_symbol = next();
  s.m[tint_symbol] = tint_store_row(s.m[tint_symbol], 1u, vec3<f32>(1.0f, 2.0f, 3.0f));
}
",
    );
}
