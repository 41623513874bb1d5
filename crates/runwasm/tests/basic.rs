use runwasm::{
    Engine, EngineConfig, Extern, LinkError, Linker, Module, Store, Trap, Val,
};
use wasmparser::{FuncType, ValType};

/// Instantiate `wat` with no host functions.
fn instantiate(wat: &str) -> Result<(Store<()>, runwasm::Instance), anyhow::Error> {
    instantiate_with(Engine::default(), wat)
}

fn instantiate_with(
    engine: Engine,
    wat: &str,
) -> Result<(Store<()>, runwasm::Instance), anyhow::Error> {
    let module = Module::new(&engine, wat)?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let instance = linker.instantiate(&mut store, &module)?;
    Ok((store, instance))
}

fn trap_of(err: &anyhow::Error) -> Option<&Trap> {
    err.downcast_ref::<Trap>()
}

#[test]
fn return_const_i32() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(
        r#"
        (module
            (func (export "answer") (result i32)
                i32.const 42
            )
        )
    "#,
    )?;
    let result: (i32,) = instance.call(&mut store, "answer", ())?;
    assert_eq!(result, (42,));
    Ok(())
}

#[test]
fn multi_value_results_with_multiple_arguments() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(
        r#"
        (module
            (func (export "divmod") (param i32 i32) (result i32 i32)
                local.get 0
                local.get 1
                i32.div_u
                local.get 0
                local.get 1
                i32.rem_u
            )
        )
    "#,
    )?;
    let result: (i32, i32) = instance.call(&mut store, "divmod", (17, 5))?;
    assert_eq!(result, (3, 2));
    Ok(())
}

#[test]
fn loop_computes_factorial() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(
        r#"
        (module
            (func (export "fac") (param i64) (result i64)
                (local $acc i64)
                i64.const 1
                local.set $acc
                block $done
                    loop $next
                        local.get 0
                        i64.eqz
                        br_if $done
                        local.get $acc
                        local.get 0
                        i64.mul
                        local.set $acc
                        local.get 0
                        i64.const 1
                        i64.sub
                        local.set 0
                        br $next
                    end
                end
                local.get $acc
            )
        )
    "#,
    )?;
    let result: (i64,) = instance.call(&mut store, "fac", (20i64,))?;
    assert_eq!(result, (2_432_902_008_176_640_000,));
    Ok(())
}

#[test]
fn recursive_calls_return_through_frames() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(
        r#"
        (module
            (func $fib (export "fib") (param i32) (result i32)
                local.get 0
                i32.const 2
                i32.lt_u
                if (result i32)
                    local.get 0
                else
                    local.get 0
                    i32.const 1
                    i32.sub
                    call $fib
                    local.get 0
                    i32.const 2
                    i32.sub
                    call $fib
                    i32.add
                end
            )
        )
    "#,
    )?;
    let result: (i32,) = instance.call(&mut store, "fib", (20,))?;
    assert_eq!(result, (6765,));
    Ok(())
}

#[test]
fn br_table_selects_targets_and_default() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(
        r#"
        (module
            (func (export "classify") (param i32) (result i32)
                block $two
                    block $one
                        block $zero
                            local.get 0
                            br_table $zero $one $two
                        end
                        i32.const 100
                        return
                    end
                    i32.const 101
                    return
                end
                i32.const 102
            )
        )
    "#,
    )?;
    for (input, expected) in [(0, 100), (1, 101), (2, 102), (7, 102), (-1, 102)] {
        let result: (i32,) = instance.call(&mut store, "classify", (input,))?;
        assert_eq!(result, (expected,), "input {input}");
    }
    Ok(())
}

#[test]
fn branches_carry_block_results() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(
        r#"
        (module
            (func (export "pick") (param i32) (result i32)
                i32.const 1
                block (result i32)
                    i32.const 7
                    local.get 0
                    br_if 0
                    drop
                    i32.const 9
                end
                i32.add
            )
        )
    "#,
    )?;
    let taken: (i32,) = instance.call(&mut store, "pick", (1,))?;
    let fallthrough: (i32,) = instance.call(&mut store, "pick", (0,))?;
    assert_eq!(taken, (8,));
    assert_eq!(fallthrough, (10,));
    Ok(())
}

#[test]
fn memory_data_segments_and_loads() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(
        r#"
        (module
            (memory (export "memory") 1)
            (data (i32.const 8) "\ff\01")
            (func (export "load8_s") (result i32)
                i32.const 8
                i32.load8_s
            )
            (func (export "load16_u") (result i32)
                i32.const 0
                i32.load16_u offset=8
            )
            (func (export "roundtrip") (param f64) (result f64)
                i32.const 64
                local.get 0
                f64.store
                i32.const 64
                f64.load
            )
        )
    "#,
    )?;
    let (byte,): (i32,) = instance.call(&mut store, "load8_s", ())?;
    let (half,): (i32,) = instance.call(&mut store, "load16_u", ())?;
    let (float,): (f64,) = instance.call(&mut store, "roundtrip", (2.5f64,))?;
    assert_eq!(byte, -1);
    assert_eq!(half, 0x01ff);
    assert_eq!(float, 2.5);
    let memory = instance.memory().ok_or_else(|| anyhow::anyhow!("no memory"))?;
    assert_eq!(&memory.data()[8..10], &[0xff, 0x01]);
    assert_eq!(instance.get_export("memory"), Some(Extern::Memory));
    Ok(())
}

#[test]
fn out_of_bounds_access_traps() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(
        r#"
        (module
            (memory 1)
            (func (export "peek") (param i32) (result i32)
                local.get 0
                i32.load
            )
        )
    "#,
    )?;
    let ok: (i32,) = instance.call(&mut store, "peek", (65_532,))?;
    assert_eq!(ok, (0,));
    let err = instance
        .call::<_, _, (i32,)>(&mut store, "peek", (65_533,))
        .unwrap_err();
    assert_eq!(trap_of(&err), Some(&Trap::MemoryOutOfBounds));
    Ok(())
}

#[test]
fn memory_grow_reports_old_size() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(
        r#"
        (module
            (memory 1 3)
            (func (export "grow") (param i32) (result i32)
                local.get 0
                memory.grow
            )
            (func (export "size") (result i32)
                memory.size
            )
        )
    "#,
    )?;
    let first: (i32,) = instance.call(&mut store, "grow", (1,))?;
    let too_far: (i32,) = instance.call(&mut store, "grow", (5,))?;
    let size: (i32,) = instance.call(&mut store, "size", ())?;
    assert_eq!(first, (1,));
    assert_eq!(too_far, (-1,));
    assert_eq!(size, (2,));
    Ok(())
}

#[test]
fn globals_persist_between_calls() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(
        r#"
        (module
            (global $count (export "count") (mut i32) (i32.const 10))
            (func (export "bump") (result i32)
                global.get $count
                i32.const 1
                i32.add
                global.set $count
                global.get $count
            )
        )
    "#,
    )?;
    let _: (i32,) = instance.call(&mut store, "bump", ())?;
    let second: (i32,) = instance.call(&mut store, "bump", ())?;
    assert_eq!(second, (12,));
    assert_eq!(instance.get_global("count"), Some(Val::I32(12)));
    assert_eq!(instance.get_global("bump"), None);
    Ok(())
}

#[test]
fn start_function_runs_during_instantiation() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(
        r#"
        (module
            (global $g (mut i32) (i32.const 0))
            (func $init
                i32.const 5
                global.set $g
            )
            (start $init)
            (func (export "get") (result i32)
                global.get $g
            )
        )
    "#,
    )?;
    let result: (i32,) = instance.call(&mut store, "get", ())?;
    assert_eq!(result, (5,));
    Ok(())
}

const INDIRECT_WAT: &str = r#"
    (module
        (type $unary (func (param i32) (result i32)))
        (type $nullary (func (result i32)))
        (table 4 funcref)
        (elem (i32.const 0) $double $seven)
        (func $double (type $unary)
            local.get 0
            i32.const 2
            i32.mul
        )
        (func $seven (type $nullary)
            i32.const 7
        )
        (func (export "apply") (param i32 i32) (result i32)
            local.get 1
            local.get 0
            call_indirect (type $unary)
        )
    )
"#;

#[test]
fn call_indirect_dispatches_through_table() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(INDIRECT_WAT)?;
    let result: (i32,) = instance.call(&mut store, "apply", (0, 21))?;
    assert_eq!(result, (42,));
    Ok(())
}

#[test]
fn call_indirect_traps() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(INDIRECT_WAT)?;
    let cases = [
        (1, Trap::IndirectCallTypeMismatch),
        (2, Trap::UninitializedElement),
        (9, Trap::UndefinedElement),
    ];
    for (slot, expected) in cases {
        let err = instance
            .call::<_, _, (i32,)>(&mut store, "apply", (slot, 1))
            .unwrap_err();
        assert_eq!(trap_of(&err), Some(&expected), "slot {slot}");
    }
    Ok(())
}

#[test]
fn arithmetic_traps_surface_as_trap_values() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(
        r#"
        (module
            (func (export "div") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.div_s
            )
            (func (export "boom")
                unreachable
            )
            (func (export "trunc") (param f32) (result i32)
                local.get 0
                i32.trunc_f32_s
            )
        )
    "#,
    )?;
    let err = instance.call::<_, _, (i32,)>(&mut store, "div", (1, 0)).unwrap_err();
    assert_eq!(trap_of(&err), Some(&Trap::DivisionByZero));
    let err = instance
        .call::<_, _, (i32,)>(&mut store, "div", (i32::MIN, -1))
        .unwrap_err();
    assert_eq!(trap_of(&err), Some(&Trap::IntegerOverflow));
    let err = instance.call::<_, _, ()>(&mut store, "boom", ()).unwrap_err();
    assert_eq!(trap_of(&err), Some(&Trap::Unreachable));
    let err = instance
        .call::<_, _, (i32,)>(&mut store, "trunc", (f32::NAN,))
        .unwrap_err();
    assert_eq!(trap_of(&err), Some(&Trap::InvalidConversion));

    // The instance stays usable after a trap.
    let ok: (i32,) = instance.call(&mut store, "div", (9, 3))?;
    assert_eq!(ok, (3,));
    Ok(())
}

#[test]
fn unbounded_recursion_exhausts_the_call_stack() -> Result<(), anyhow::Error> {
    let engine = Engine::new(EngineConfig {
        max_call_depth: 500,
        ..EngineConfig::default()
    });
    let (mut store, mut instance) = instantiate_with(
        engine,
        r#"
        (module
            (func $forever (export "forever")
                call $forever
            )
        )
    "#,
    )?;
    let err = instance.call::<_, _, ()>(&mut store, "forever", ()).unwrap_err();
    assert_eq!(trap_of(&err), Some(&Trap::CallStackExhausted));
    Ok(())
}

#[test]
fn fuel_limits_runaway_loops() -> Result<(), anyhow::Error> {
    let engine = Engine::new(EngineConfig {
        fuel: Some(10_000),
        ..EngineConfig::default()
    });
    let (mut store, mut instance) = instantiate_with(
        engine,
        r#"
        (module
            (func (export "spin")
                loop
                    br 0
                end
            )
            (func (export "quick") (result i32)
                i32.const 1
            )
        )
    "#,
    )?;
    let err = instance.call::<_, _, ()>(&mut store, "spin", ()).unwrap_err();
    assert_eq!(trap_of(&err), Some(&Trap::OutOfFuel));
    // Fuel is per call.
    let quick: (i32,) = instance.call(&mut store, "quick", ())?;
    assert_eq!(quick, (1,));
    Ok(())
}

#[test]
fn host_functions_see_store_data_and_memory() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (import "env" "record" (func $record (param i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "hi")
            (func (export "main")
                i32.const 3
                call $record
                i32.const 4
                call $record
            )
        )
    "#,
    )?;
    let mut linker: Linker<Vec<i32>> = Linker::new(&engine);
    linker.func_new(
        "env",
        "record",
        FuncType::new([ValType::I32], []),
        |mut caller, args| {
            let memory = caller
                .memory()
                .ok_or_else(|| anyhow::anyhow!("no memory"))?;
            memory[2] = b'!';
            if let [Val::I32(v)] = args {
                caller.data_mut().push(*v);
            }
            Ok(vec![])
        },
    )?;
    let mut store = Store::new(&engine, Vec::<i32>::new());
    let mut instance = linker.instantiate(&mut store, &module)?;
    instance.call::<_, _, ()>(&mut store, "main", ())?;
    let memory = instance.memory().ok_or_else(|| anyhow::anyhow!("no memory"))?;
    assert_eq!(memory.read_c_str(), "hi!");
    assert_eq!(store.into_data(), vec![3, 4]);
    Ok(())
}

#[test]
fn host_errors_become_traps() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (import "env" "fail" (func $fail (result i32)))
            (func (export "main") (result i32)
                call $fail
            )
        )
    "#,
    )?;
    let mut linker = Linker::new(&engine);
    linker.func_new("env", "fail", FuncType::new([], [ValType::I32]), |_, _| {
        anyhow::bail!("host refused")
    })?;
    let mut store = Store::new(&engine, ());
    let mut instance = linker.instantiate(&mut store, &module)?;
    let err = instance.call::<_, _, (i32,)>(&mut store, "main", ()).unwrap_err();
    match trap_of(&err) {
        Some(Trap::Host { name, message }) => {
            assert_eq!(name, "env.fail");
            assert!(message.contains("host refused"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[test]
fn missing_import_is_unresolved() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"(module (import "env" "missing" (func)))"#,
    )?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let err = linker.instantiate(&mut store, &module).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<LinkError>(),
        Some(LinkError::UnresolvedImport { module, name }) if module == "env" && name == "missing"
    ));
    Ok(())
}

#[test]
fn memory_imports_are_not_supported() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"(module (import "env" "memory" (memory 1)))"#,
    )?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let err = linker.instantiate(&mut store, &module).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<LinkError>(),
        Some(LinkError::UnsupportedImport { kind: "memory", .. })
    ));
    Ok(())
}

#[test]
fn duplicate_definitions_are_rejected() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let mut linker = Linker::<()>::new(&engine);
    linker.func_unary_numeric("env", "negate", |_, v| Ok(v))?;
    assert!(linker.func_unary_numeric("env", "negate", |_, v| Ok(v)).is_err());
    Ok(())
}

#[test]
fn out_of_bounds_data_segment_fails_instantiation() {
    let err = instantiate(
        r#"
        (module
            (memory 1)
            (data (i32.const 65535) "ab")
        )
    "#,
    )
    .err()
    .unwrap();
    assert!(matches!(
        err.downcast_ref::<LinkError>(),
        Some(LinkError::DataOutOfBounds)
    ));
}

#[test]
fn simd_modules_are_rejected_at_compile_time() {
    let engine = Engine::default();
    let result = Module::new(
        &engine,
        r#"(module (func (result i32) v128.const i32x4 0 0 0 0 i32x4.extract_lane 0))"#,
    );
    assert!(result.is_err());
}

#[test]
fn arguments_are_checked_against_param_types() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(
        r#"
        (module
            (func (export "id") (param i32) (result i32)
                local.get 0
            )
        )
    "#,
    )?;
    assert!(instance.call_dynamic(&mut store, "id", &[]).is_err());
    assert!(
        instance
            .call_dynamic(&mut store, "id", &[Val::F32(1.0)])
            .is_err()
    );
    assert!(instance.call_dynamic(&mut store, "nope", &[]).is_err());
    let results = instance.call_dynamic(&mut store, "id", &[Val::I32(3)])?;
    assert_eq!(results, vec![Val::I32(3)]);
    Ok(())
}

#[test]
fn module_reads_from_file_and_describes_itself() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sample.wasm");
    std::fs::write(&path, runwasm::host::sample_module(true)?)?;

    let engine = Engine::default();
    let module = Module::from_file(&engine, &path)?;
    let import = &module.imports()[0];
    assert_eq!((import.module.as_str(), import.name.as_str()), ("env", "negate"));
    let export = &module.exports()[0];
    assert_eq!(export.name, "main");
    let ty = module
        .export_func_type("main")
        .ok_or_else(|| anyhow::anyhow!("main has no type"))?;
    assert!(ty.params().is_empty());
    assert_eq!(ty.results(), &[ValType::F32]);

    assert!(Module::from_file(&engine, dir.path().join("absent.wasm")).is_err());
    Ok(())
}

#[test]
fn host_writes_to_memory_are_visible_to_wasm() -> Result<(), anyhow::Error> {
    let (mut store, mut instance) = instantiate(
        r#"
        (module
            (memory (export "memory") 1)
            (func (export "read") (result i32)
                i32.const 16
                i32.load
            )
        )
    "#,
    )?;
    let memory = instance
        .memory_mut()
        .ok_or_else(|| anyhow::anyhow!("no memory"))?;
    memory.data_mut()[16..20].copy_from_slice(&1234i32.to_le_bytes());
    let result: (i32,) = instance.call(&mut store, "read", ())?;
    assert_eq!(result, (1234,));
    Ok(())
}

#[test]
fn instances_only_run_in_their_own_store() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::from_bytes(&engine, &runwasm::host::sample_module(true)?)?;
    let linker = runwasm::host::host_linker(&engine)?;
    let mut home = Store::new(&engine, ());
    let mut instance = linker.instantiate(&mut home, &module)?;

    let mut other = Store::new(&engine, ());
    let err = instance
        .call::<_, _, (f32,)>(&mut other, "main", ())
        .unwrap_err();
    assert!(err.to_string().contains("not instantiated in"), "{err}");

    let result: (f32,) = instance.call(&mut home, "main", ())?;
    assert_eq!(result, (-42.0,));
    Ok(())
}
