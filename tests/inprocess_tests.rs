//! In-process integration tests that contribute to coverage.
//!
//! These tests drive the assembler and VM APIs directly instead of spawning
//! a separate process, so they are included in coverage measurement.

use std::path::Path;
use std::sync::Arc;

use kiln::asm::assemble;
use kiln::config::RuntimeConfig;
use kiln::platform::{MemoryPlatform, PCall};
use kiln::vm::{Assembler, Assembly, Fault, Op, Outcome, ResultCode, Value, Vm};

fn snapshot_program(name: &str) -> Arc<Assembly> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
        .join(name);
    let source = std::fs::read_to_string(&path).unwrap();
    Arc::new(assemble(&source).unwrap_or_else(|e| panic!("{}: {}", name, e)))
}

fn run_snapshot(name: &str) -> (Outcome, String) {
    let platform = Arc::new(MemoryPlatform::new());
    let vm = Vm::new(RuntimeConfig::default(), platform.clone());
    let outcome = vm.run(&snapshot_program(name));
    (outcome, platform.console_output())
}

fn vm_with(platform: Arc<MemoryPlatform>) -> Vm {
    Vm::new(RuntimeConfig::default(), platform)
}

// Snapshot programs
#[test]
fn test_basic_hello() {
    let (outcome, out) = run_snapshot("basic/hello.kasm");
    assert!(outcome.is_ok());
    assert_eq!(out, "hello, kiln\n");
}

#[test]
fn test_basic_arithmetic() {
    let (outcome, out) = run_snapshot("basic/arithmetic.kasm");
    assert!(outcome.is_ok());
    assert_eq!(out, "42\n2500000000\n3.0\n-1\n");
}

#[test]
fn test_basic_closure() {
    let (outcome, out) = run_snapshot("basic/closure.kasm");
    assert!(outcome.is_ok());
    assert_eq!(out, "42\n");
}

#[test]
fn test_errors_assert_keeps_prior_output() {
    let (outcome, out) = run_snapshot("errors/assert.kasm");
    assert_eq!(outcome.code, ResultCode::AssertFailed);
    assert_eq!(outcome.message.as_deref(), Some("one is not two"));
    assert_eq!(out, "before\n");
}

#[test]
fn test_errors_fail_message() {
    let (outcome, _) = run_snapshot("errors/fail.kasm");
    assert_eq!(outcome.code, ResultCode::Fail);
    assert_eq!(outcome.message.as_deref(), Some("giving up"));
}

#[test]
fn test_errors_union_mismatch() {
    let (outcome, out) = run_snapshot("errors/union_mismatch.kasm");
    assert_eq!(outcome.code, ResultCode::AssertFailed);
    assert_eq!(out, "2\n");
}

// Scenario: a balanced program leaves 5 on the stack for Ret
#[test]
fn test_add_two_literals() {
    let mut asm = Assembler::new();
    asm.entry("main").unwrap();
    asm.label("main").unwrap();
    asm.emit(Op::LoadLitInt(2)).unwrap();
    asm.emit(Op::LoadLitInt(3)).unwrap();
    asm.emit(Op::AddInt).unwrap();
    asm.emit(Op::Ret).unwrap();
    let assembly = Arc::new(asm.close().unwrap());

    let outcome = vm_with(Arc::new(MemoryPlatform::new())).run(&assembly);
    assert_eq!(outcome.code, ResultCode::Ok);
    assert_eq!(outcome.value, Some(Value::Int32(5)));
}

// Scenario: fork then block yields the callee's result
#[test]
fn test_fork_block_matches_direct_call() {
    let source = "
        .entry main
        main:
            LoadLitInt 6
            LoadLitInt 7
            CallForked mul 2
            FutureBlock
            LoadLitInt 6
            LoadLitInt 7
            Call mul 2
            EqValue
            Ret
        mul:
            MulInt
            Ret
    ";
    let assembly = Arc::new(assemble(source).unwrap());
    let vm = vm_with(Arc::new(MemoryPlatform::new()));
    for _ in 0..20 {
        assert_eq!(vm.execute(&assembly), Ok(Value::Int32(1)));
    }
}

// Scenario: waitNano(0) on a future whose executor is parked returns false
#[test]
fn test_wait_nano_zero_on_pending_future() {
    let source = "
        .entry main
        main:
            Alloc 2
            LoadLitInt 0
            LoadLitInt 0
            MakeStruct 2
            Store 0
            Load 0
            CallForked gated 1
            Store 1

            Load 1
            LoadLitLong 0
            FutureWaitNano
            Not
            Assert \"future completed before its gate opened\"

            Load 0
            LoadLitInt 1
            StoreField 2 0
            Load 1
            FutureBlock
            Ret

        ; parks until field 0 of the gate is 1
        gated:
            LoadLitInt 1
            AtomicBlock 0
            LoadLitInt 42
            Ret
    ";
    let assembly = Arc::new(assemble(source).unwrap());
    let outcome = vm_with(Arc::new(MemoryPlatform::new())).run(&assembly);
    assert_eq!(outcome.code, ResultCode::Ok, "{:?}", outcome.message);
    assert_eq!(outcome.value, Some(Value::Int32(42)));
}

// Scenario: one lazy cell forced concurrently computes exactly once
#[test]
fn test_lazy_cell_computes_once() {
    const FORKS: usize = 8;

    let mut asm = Assembler::new();
    asm.entry("main").unwrap();
    asm.label("main").unwrap();
    asm.emit(Op::Alloc(1)).unwrap();
    asm.emit_to(Op::MakeClosure(0, 0), "compute").unwrap();
    asm.make_lazy().unwrap();
    asm.emit(Op::Store(0)).unwrap();
    for _ in 0..FORKS {
        asm.emit(Op::Load(0)).unwrap();
        asm.emit_to(Op::CallForked(0, 1), "get").unwrap();
    }
    // every forked result must equal the one main observes
    for _ in 0..FORKS {
        asm.emit(Op::FutureBlock).unwrap();
        asm.emit(Op::Load(0)).unwrap();
        asm.lazy_get().unwrap();
        asm.emit(Op::EqValue).unwrap();
        asm.assert("getters disagree").unwrap();
    }
    asm.emit(Op::Load(0)).unwrap();
    asm.lazy_get().unwrap();
    asm.emit(Op::Ret).unwrap();

    asm.label("get").unwrap();
    asm.lazy_get().unwrap();
    asm.emit(Op::Ret).unwrap();

    asm.label("compute").unwrap();
    asm.load_string("side effect").unwrap();
    asm.emit(Op::PCall(PCall::ConsolePrint.code())).unwrap();
    asm.emit(Op::Pop).unwrap();
    asm.emit(Op::LoadLitLong(1234)).unwrap();
    asm.emit(Op::Ret).unwrap();
    let assembly = Arc::new(asm.close().unwrap());

    for _ in 0..10 {
        let platform = Arc::new(MemoryPlatform::new());
        let outcome = vm_with(platform.clone()).run(&assembly);
        assert_eq!(outcome.code, ResultCode::Ok, "{:?}", outcome.message);
        assert_eq!(outcome.value, Some(Value::Int64(1234)));
        assert_eq!(platform.console_output(), "side effect\n");
    }
}

#[test]
fn test_lazy_snapshot_program() {
    for _ in 0..10 {
        let (outcome, out) = run_snapshot("concurrency/lazy.kasm");
        assert!(outcome.is_ok(), "{:?}", outcome.message);
        assert_eq!(out, "computing\nok\n");
    }
}

// Scenario: tail recursion stays bounded where plain recursion overflows
#[test]
fn test_tail_recursion_bounded_plain_recursion_overflows() {
    let config = RuntimeConfig {
        call_stack_capacity: 16,
        ..RuntimeConfig::default()
    };
    let vm = Vm::new(config, Arc::new(MemoryPlatform::new()));

    let tail = snapshot_program("basic/tail_recursion.kasm");
    assert_eq!(vm.execute(&tail), Ok(Value::Int32(0)));

    let plain = snapshot_program("errors/recursion_overflow.kasm");
    assert_eq!(vm.execute(&plain), Err(Fault::CallStackOverflow { capacity: 16 }));
}

#[test]
fn test_forked_fault_leaves_future_pending() {
    let source = "
        .entry main
        main:
            CallForked boom 0
            Dup
            LoadLitLong 50000000
            FutureWaitNano
            Swap
            Pop
            Ret
        boom:
            LoadLitInt 1
            LoadLitInt 0
            DivInt
            Ret
    ";
    let assembly = Arc::new(assemble(source).unwrap());
    let outcome = vm_with(Arc::new(MemoryPlatform::new())).run(&assembly);
    assert_eq!(outcome.code, ResultCode::Ok);
    assert_eq!(outcome.value, Some(Value::Int32(0)));
}

#[test]
fn test_platform_calls_through_memory_platform() {
    let source = r#"
        .entry main
        main:
            LoadLitString "HOME"
            PCall EnvGet
            PCall ConsolePrint
            Pop
            PCall ProcessArgCount
            IntToString
            PCall ConsolePrint
            Pop
            LoadLitInt 0
            PCall ProcessArg
            PCall ConsolePrint
            Ret
    "#;
    let assembly = Arc::new(assemble(source).unwrap());
    let platform = Arc::new(
        MemoryPlatform::new()
            .with_env("HOME", "/home/kiln")
            .with_args(["first", "second"]),
    );
    let outcome = vm_with(platform.clone()).run(&assembly);
    assert!(outcome.is_ok());
    assert_eq!(platform.console_output(), "/home/kiln\n2\nfirst\n");
}

#[test]
fn test_legacy_entrypoint_list() {
    let source = r#"
        .entry first
        first:
            LoadLitString "first"
            PCall ConsolePrint
            Ret
        second:
            LoadLitString "second"
            PCall ConsolePrint
            Ret
    "#;
    let assembly = Arc::new(assemble(source).unwrap());
    let platform = Arc::new(MemoryPlatform::new());
    let outcome = vm_with(platform.clone()).run_entrypoints(&assembly, &[11, 0]);
    assert!(outcome.is_ok());
    assert_eq!(platform.console_output(), "second\nfirst\n");
}
