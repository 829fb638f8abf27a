/*!
Tests for the removal of explicit array strides.
*/

use wgsl_lower::{
    back::wgsl::{self, WriterFlags},
    transform::{ApplyResult, DataMap, DecomposeStridedArray, Manager, Transform},
    Program, ProgramBuilder, Scalar, StorageAccess, StructMember,
};

fn run(program: &Program) -> Program {
    let _ = env_logger::try_init();
    assert!(program.is_valid(), "{}", program.diagnostics);
    Manager::new()
        .add(DecomposeStridedArray)
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

#[test]
fn natural_stride_is_dropped() {
    let mut b = ProgramBuilder::new();
    let f32_ty = b.scalar(Scalar::F32);
    let a = b.strided_array(f32_ty, Some(4), Some(4));
    let s = b.structure("S", vec![StructMember::new("a", a)]);
    b.storage("s", 0, 0, s, StorageAccess::all());
    let s = b.ident("s");
    let a = b.member(s, "a");
    let one = b.u32(1);
    let element = b.index(a, one);
    let x = b.let_("x", element);
    b.compute("main", vec![x]);

    let output = run(&b.build());
    check(
        &output,
        "\
struct S {
  a : array<f32, 4u>,
}

@group(0) @binding(0) var<storage, read_write> s : S;

@compute @workgroup_size(1)
fn main() {
  let x = s.a[1u];
}
",
    );

    // Nothing is left to decompose.
    let again = DecomposeStridedArray.apply(&output, &DataMap::new(), &mut DataMap::new());
    assert!(matches!(again, ApplyResult::Skip));
}

#[test]
fn elements_are_wrapped() {
    let mut b = ProgramBuilder::new();
    let f32_ty = b.scalar(Scalar::F32);
    let a = b.strided_array(f32_ty, Some(4), Some(32));
    let s = b.structure("S", vec![StructMember::new("a", a)]);
    b.storage("s", 0, 0, s, StorageAccess::all());

    let s_ident = b.ident("s");
    let member = b.member(s_ident, "a");
    let two = b.u32(2);
    let element = b.index(member, two);
    let load = b.let_("x", element);

    let s_ident = b.ident("s");
    let member = b.member(s_ident, "a");
    let one = b.u32(1);
    let target = b.index(member, one);
    let value = b.ident("x");
    let store = b.assign(target, value);

    let s_ident = b.ident("s");
    let member = b.member(s_ident, "a");
    let copy = b.let_("arr", member);

    let s_ident = b.ident("s");
    let target = b.member(s_ident, "a");
    let values = [1.0, 2.0, 3.0, 4.0]
        .iter()
        .map(|&value| b.f32(value))
        .collect();
    let value = b.construct(a, values);
    let init = b.assign(target, value);

    b.compute("main", vec![load, store, copy, init]);

    check(
        &run(&b.build()),
        "\
struct strided_arr {
  @size(32)
  el : f32,
}

struct S {
  a : array<strided_arr, 4u>,
}

@group(0) @binding(0) var<storage, read_write> s : S;

@compute @workgroup_size(1)
fn main() {
  let x = s.a[2u].el;
  s.a[1u].el = x;
  let arr = s.a;
  s.a = array<strided_arr, 4u>(strided_arr(1.0f), strided_arr(2.0f), strided_arr(3.0f), strided_arr(4.0f));
}
",
    );
}

#[test]
fn one_wrapper_per_stride() {
    let mut b = ProgramBuilder::new();
    let f32_ty = b.scalar(Scalar::F32);
    let a = b.strided_array(f32_ty, Some(2), Some(16));
    let c = b.strided_array(f32_ty, Some(3), Some(16));
    let d = b.strided_array(f32_ty, Some(2), Some(8));
    let s = b.structure(
        "S",
        vec![
            StructMember::new("a", a),
            StructMember::new("b", c),
            StructMember::new("c", d),
        ],
    );
    b.storage("s", 0, 0, s, StorageAccess::all());

    let output = run(&b.build());
    let module = &output.module;
    let layouter = &output.info.layouter;
    let wide = module.find_struct("strided_arr").expect("missing wrapper");
    let narrow = module.find_struct("strided_arr_1").expect("missing wrapper");
    assert_eq!(layouter[wide].size, 16);
    assert_eq!(layouter[narrow].size, 8);
    let s = module.find_struct("S").expect("missing struct");
    assert_eq!(layouter.member_offsets(s), &[0, 32, 80]);

    check(
        &output,
        "\
struct strided_arr {
  @size(16)
  el : f32,
}

struct strided_arr_1 {
  @size(8)
  el : f32,
}

struct S {
  a : array<strided_arr, 2u>,
  b : array<strided_arr, 3u>,
  c : array<strided_arr_1, 2u>,
}

@group(0) @binding(0) var<storage, read_write> s : S;
",
    );
}

#[test]
fn arrays_without_stride_are_skipped() {
    let mut b = ProgramBuilder::new();
    let f32_ty = b.scalar(Scalar::F32);
    let a = b.array(f32_ty, 4);
    b.storage("s", 0, 0, a, StorageAccess::all());
    let program = b.build();

    let result = DecomposeStridedArray.apply(&program, &DataMap::new(), &mut DataMap::new());
    assert!(matches!(result, ApplyResult::Skip));
}

#[test]
#[should_panic(expected = "internal compiler error in decompose-strided-array")]
fn index_through_pointer() {
    let mut b = ProgramBuilder::new();
    let f32_ty = b.scalar(Scalar::F32);
    let a = b.strided_array(f32_ty, Some(4), Some(16));
    b.storage("s", 0, 0, a, StorageAccess::all());
    let s = b.ident("s");
    let pointer = b.address_of(s);
    let p = b.let_("p", pointer);
    let p_value = b.ident("p");
    let one = b.u32(1);
    let element = b.index(p_value, one);
    let x = b.let_("x", element);
    b.compute("main", vec![p, x]);

    run(&b.build());
}
