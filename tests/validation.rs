/*!
Tests for semantic resolution and the diagnostics of invalid programs.
*/

use wgsl_lower::{
    valid::{Binding, MemberKind, Parent, Reference},
    AddressSpace, AtomicFunction, BuiltinFunction, Literal, Program, ProgramBuilder, Scalar,
    StorageAccess, StructMember, TypeInner, VectorSize,
};

fn messages(program: &Program) -> Vec<String> {
    program
        .diagnostics
        .iter()
        .map(|d| d.message.clone())
        .collect()
}

#[test]
fn references_and_loads() {
    let _ = env_logger::try_init();
    let mut b = ProgramBuilder::new();
    let f32_ty = b.scalar(Scalar::F32);
    let vec4 = b.vec(VectorSize::Quad, Scalar::F32);
    let s = b.structure(
        "S",
        vec![StructMember::new("a", f32_ty), StructMember::new("v", vec4)],
    );
    let sb = b.storage("sb", 0, 0, s, StorageAccess::all());

    let base = b.ident("sb");
    let load = b.member(base, "a");
    let x = b.let_("x", load);

    let sb_ident = b.ident("sb");
    let target = b.member(sb_ident, "a");
    let value = b.ident("x");
    let store = b.assign(target, value);

    let sb_ident = b.ident("sb");
    let v = b.member(sb_ident, "v");
    let swizzle = b.member(v, "xy");
    let xy = b.let_("xy", swizzle);

    let sb_ident = b.ident("sb");
    let v_again = b.member(sb_ident, "v");
    let component = b.member(v_again, "y");
    let y = b.let_("y", component);

    b.compute("main", vec![x, store, xy, y]);
    let program = b.build();
    assert!(program.is_valid(), "{}", program.diagnostics);
    assert_eq!(program.module.find_global("sb"), Some(sb));
    let info = &program.info;

    let reference = Some(Reference {
        space: AddressSpace::Storage,
        access: StorageAccess::all(),
    });

    assert!(info[load].load);
    assert_eq!(info[load].reference, reference);
    assert_eq!(info[load].root, Some(Binding::Global(sb)));
    assert_eq!(info[load].member, Some(MemberKind::Struct(0)));
    assert_eq!(info[load].parent, Some(Parent::Statement(x)));
    assert!(!info[base].load);
    assert_eq!(info[base].binding, Some(Binding::Global(sb)));
    assert_eq!(info[base].parent, Some(Parent::Expression(load)));

    assert!(!info[target].load);
    assert_eq!(info[target].parent, Some(Parent::Statement(store)));
    assert!(!info[value].load);
    assert!(matches!(info[value].binding, Some(Binding::Local(decl)) if decl == x));

    // A swizzle reads the whole vector and produces a value.
    assert!(info[v].load);
    assert_eq!(info[swizzle].reference, None);
    assert_eq!(
        info[swizzle].member,
        Some(MemberKind::Swizzle([0, 1].into_iter().collect()))
    );

    // A single component is still a reference.
    assert!(!info[v_again].load);
    assert!(info[component].load);
    assert_eq!(info[component].reference, reference);
    assert_eq!(info[component].member, Some(MemberKind::Component(1)));
}

#[test]
fn pointers_keep_their_root() {
    let mut b = ProgramBuilder::new();
    let u32_ty = b.scalar(Scalar::U32);
    let sb = b.storage("sb", 0, 0, u32_ty, StorageAccess::all());
    let sb_ident = b.ident("sb");
    let pointer = b.address_of(sb_ident);
    let p = b.let_("p", pointer);
    let p_ident = b.ident("p");
    let value = b.deref(p_ident);
    let x = b.let_("x", value);
    b.compute("main", vec![p, x]);
    let program = b.build();
    assert!(program.is_valid(), "{}", program.diagnostics);
    let info = &program.info;

    assert!(!info[sb_ident].load);
    assert_eq!(info[sb_ident].parent, Some(Parent::Expression(pointer)));
    assert!(info[pointer].is_pointer(&program.module.types));
    assert_eq!(info[pointer].object_type(&program.module.types), Some(u32_ty));
    assert_eq!(program.info.root_global(p_ident), Some(sb));
    assert_eq!(program.info.root_global(value), Some(sb));
    assert!(info[value].load);
}

#[test]
fn constants_are_folded() {
    let mut b = ProgramBuilder::new();
    let two = b.u32(2);
    let three = b.u32(3);
    let product = b.mul(two, three);
    let k = b.const_("k", product);
    let k_ident = b.ident("k");
    let one = b.u32(1);
    let sum = b.add(k_ident, one);
    let x = b.let_("x", sum);
    b.compute("main", vec![k, x]);
    let program = b.build();
    assert!(program.is_valid(), "{}", program.diagnostics);

    assert_eq!(program.info[product].constant, Some(Literal::U32(6)));
    assert_eq!(program.info[sum].constant, Some(Literal::U32(7)));
}

#[test]
fn compare_exchange_result() {
    let mut b = ProgramBuilder::new();
    let atomic = b.atomic(Scalar::U32);
    b.storage("sb", 0, 0, atomic, StorageAccess::all());
    let sb = b.ident("sb");
    let pointer = b.address_of(sb);
    let compare = b.u32(1);
    let value = b.u32(2);
    let call = b.builtin(
        BuiltinFunction::Atomic(AtomicFunction::CompareExchangeWeak),
        vec![pointer, compare, value],
    );
    let r = b.let_("r", call);
    b.compute("main", vec![r]);
    let program = b.build();
    assert!(program.is_valid(), "{}", program.diagnostics);

    let ty = program.info[call].ty.expect("no result type");
    let result = &program.module.types[ty];
    assert_eq!(
        result.name.as_deref(),
        Some("__atomic_compare_exchange_result_u32")
    );
    match result.inner {
        TypeInner::Struct { ref members } => {
            let names = members.iter().map(|m| m.name.as_str()).collect::<Vec<_>>();
            assert_eq!(names, ["old_value", "exchanged"]);
        }
        ref other => panic!("unexpected result type {other:?}"),
    }
}

#[test]
fn unknown_identifier() {
    let mut b = ProgramBuilder::new();
    let missing = b.ident("missing");
    let x = b.let_("x", missing);
    b.compute("main", vec![x]);
    let program = b.build();

    assert!(!program.is_valid());
    let messages = messages(&program);
    assert_eq!(messages.len(), 1, "{messages:?}");
    assert!(messages[0].ends_with("'main' is invalid"), "{messages:?}");
}

#[test]
fn redeclaration() {
    let mut b = ProgramBuilder::new();
    let u32_ty = b.scalar(Scalar::U32);
    b.storage("sb", 0, 0, u32_ty, StorageAccess::all());
    b.storage("sb", 0, 1, u32_ty, StorageAccess::all());
    let program = b.build();

    assert!(!program.is_valid());
    assert_eq!(messages(&program), ["'sb' is declared more than once"]);
}

#[test]
fn store_to_read_only_buffer() {
    let mut b = ProgramBuilder::new();
    let u32_ty = b.scalar(Scalar::U32);
    b.storage("ro", 0, 0, u32_ty, StorageAccess::LOAD);
    let target = b.ident("ro");
    let one = b.u32(1);
    let store = b.assign(target, one);
    b.compute("main", vec![store]);
    let program = b.build();

    assert!(!program.is_valid());
    let messages = messages(&program);
    assert_eq!(messages.len(), 1, "{messages:?}");
    assert!(messages[0].ends_with("'main' is invalid"), "{messages:?}");
}

#[test]
fn uniform_array_stride() {
    let mut b = ProgramBuilder::new();
    let f32_ty = b.scalar(Scalar::F32);
    let array = b.array(f32_ty, 4);
    let u = b.structure(
        "U",
        vec![
            StructMember::new("scale", f32_ty),
            StructMember::new("values", array),
        ],
    );
    b.uniform("ub", 0, 0, u);
    let program = b.build();

    assert!(!program.is_valid());
    let messages = messages(&program);
    assert_eq!(messages.len(), 1, "{messages:?}");
    assert!(messages[0].ends_with("'ub' is invalid"), "{messages:?}");

    // The same struct is fine in a storage buffer.
    let mut b = ProgramBuilder::new();
    let f32_ty = b.scalar(Scalar::F32);
    let array = b.array(f32_ty, 4);
    let u = b.structure(
        "U",
        vec![
            StructMember::new("scale", f32_ty),
            StructMember::new("values", array),
        ],
    );
    b.storage("sb", 0, 0, u, StorageAccess::LOAD);
    let program = b.build();
    assert!(program.is_valid(), "{}", program.diagnostics);
}

#[test]
fn row_major_requires_a_matrix() {
    let mut b = ProgramBuilder::new();
    let f32_ty = b.scalar(Scalar::F32);
    b.structure(
        "S",
        vec![StructMember {
            row_major: true,
            ..StructMember::new("x", f32_ty)
        }],
    );
    let program = b.build();

    assert!(!program.is_valid());
    let messages = messages(&program);
    assert_eq!(messages.len(), 1, "{messages:?}");
    assert!(messages[0].ends_with("'S' is invalid"), "{messages:?}");
}
