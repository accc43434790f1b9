mod common;

use common::{Memory, Vm, VmConfig, VmError, VmStatus, assemble, run_source};
use common::{run_until_error, stack_of};
use vm::PAGE_SIZE;

#[test]
fn handles_are_never_reused() {
    let vm = run_source(
        r#"
        memplz      # 0
        memplz      # 1
        push 0
        memcya
        memplz      # 2, not 0
        halt
    "#,
    );
    assert_eq!(stack_of(&vm), vec![0.0, 1.0, 2.0]);
    assert_eq!(vm.memory().live_pages(), 2);
    assert!(!vm.memory().exists(0));
}

#[test]
fn freeing_twice_is_a_no_op() {
    let vm = run_source("memplz\ndup\nmemcya\nmemcya\npush 42\nmemcya");
    assert!(vm.stack().is_empty());
    assert_eq!(vm.memory().live_pages(), 0);
}

#[test]
fn memcheck_reports_liveness() {
    let vm = run_source(
        r#"
        memplz
        dup
        memcheck    # 1
        swap
        dup
        memcya
        memcheck    # 0 after free
        push -1
        memcheck    # 0 for a non-handle
    "#,
    );
    assert_eq!(stack_of(&vm), vec![1.0, 0.0, 0.0]);
}

#[test]
fn access_to_freed_page_fails_without_side_effects() {
    let code = assemble("memplz\nmemcya\npush 9\npush 1\npush 0\npush 0\nmemstore byte")
        .expect("assemble should succeed");
    let mut vm = Vm::new(code);

    assert_eq!(run_until_error(&mut vm), VmError::PageNotFound(0));
    assert_eq!(stack_of(&vm), vec![9.0, 1.0, 0.0, 0.0]);

    let mut vm = Vm::new(assemble("push 8\npush 0\npush 5\nmemload float").expect("assemble"));
    assert_eq!(run_until_error(&mut vm), VmError::PageNotFound(5));
    assert_eq!(stack_of(&vm), vec![8.0, 0.0, 5.0]);
}

#[test]
fn byte_store_and_load_round_trip() {
    let vm = run_source(
        r#"
        memplz
        pop
        push 30
        push 20
        push 10
        push 3      # length
        push 5      # address
        push 0      # handle
        memstore byte
        push 3
        push 5
        push 0
        memload byte
        halt
    "#,
    );

    let page = vm.memory().get(0).expect("page 0 should be live");
    assert_eq!(page.read_bytes(5, 3).expect("in range"), &[10, 20, 30]);
    assert_eq!(page.as_bytes()[4], 0);
    assert_eq!(stack_of(&vm), vec![30.0, 20.0, 10.0]);
}

#[test]
fn float_store_and_load_round_trip() {
    let vm = run_source(
        r#"
        memplz
        pop
        push -2.25
        push 1.5
        push 16
        push 8
        push 0
        memstore float
        push 16
        push 8
        push 0
        memload float
    "#,
    );

    let page = vm.memory().get(0).expect("page 0 should be live");
    assert_eq!(page.read_f64(8).expect("in range"), 1.5);
    assert_eq!(page.read_f64(16).expect("in range"), -2.25);
    assert_eq!(&page.as_bytes()[8..16], &1.5f64.to_le_bytes());
    assert_eq!(stack_of(&vm), vec![-2.25, 1.5]);
}

#[test]
fn out_of_bounds_access_is_rejected() {
    let source = format!("memplz\npop\npush 7\npush 2\npush {}\npush 0\nmemstore byte", PAGE_SIZE - 1);
    let mut vm = Vm::new(assemble(&source).expect("assemble should succeed"));

    assert_eq!(
        run_until_error(&mut vm),
        VmError::PageOutOfBounds {
            handle: 0,
            address: PAGE_SIZE - 1,
            len: 2,
        }
    );
    assert_eq!(stack_of(&vm).len(), 4);

    let source = format!("memplz\npop\npush 1\npush {PAGE_SIZE}\npush 0\nmemload byte");
    let mut vm = Vm::new(assemble(&source).expect("assemble should succeed"));
    assert!(matches!(
        run_until_error(&mut vm),
        VmError::PageOutOfBounds { .. }
    ));
}

#[test]
fn float_access_length_must_be_whole_doubles() {
    let mut vm = Vm::new(
        assemble("memplz\npop\npush 12\npush 0\npush 0\nmemload float")
            .expect("assemble should succeed"),
    );
    assert!(matches!(
        run_until_error(&mut vm),
        VmError::InvalidOperand(_)
    ));
    assert_eq!(stack_of(&vm), vec![12.0, 0.0, 0.0]);
}

#[test]
fn invalid_byte_value_writes_nothing() {
    let mut vm = Vm::new(
        assemble("memplz\npop\npush 256\npush 1\npush 2\npush 1\npush 0\nmemstore byte")
            .expect("assemble should succeed"),
    );

    assert!(matches!(
        run_until_error(&mut vm),
        VmError::InvalidOperand(_)
    ));
    assert_eq!(stack_of(&vm), vec![256.0, 1.0, 2.0, 1.0, 0.0]);
    let page = vm.memory().get(0).expect("page 0 should be live");
    assert!(page.as_bytes().iter().all(|&byte| byte == 0));
}

#[test]
fn store_needs_every_value_present() {
    let mut vm = Vm::new(
        assemble("memplz\npop\npush 1\npush 4\npush 0\npush 0\nmemstore byte")
            .expect("assemble should succeed"),
    );
    assert_eq!(run_until_error(&mut vm), VmError::StackUnderflow);
    assert_eq!(stack_of(&vm).len(), 4);
}

#[test]
fn page_limit_is_enforced() {
    let code = assemble("memplz\nmemplz").expect("assemble should succeed");
    let mut vm = Vm::with_config(
        code,
        VmConfig {
            max_pages: Some(1),
            ..VmConfig::default()
        },
    );

    assert_eq!(run_until_error(&mut vm), VmError::PageLimit(1));
    assert_eq!(stack_of(&vm), vec![0.0]);
    assert_eq!(vm.memory().live_pages(), 1);

    vm.memory_mut().free(0);
    assert_eq!(vm.step(), Ok(VmStatus::Running));
    assert_eq!(stack_of(&vm), vec![0.0, 1.0]);
}

#[test]
fn memory_arena_direct_use() {
    let mut memory = Memory::new();
    let first = memory.allocate().expect("allocate");
    let second = memory.allocate().expect("allocate");
    assert_ne!(first, second);

    let page = memory.get_mut(second).expect("live page");
    page.write_f64(3, f64::NEG_INFINITY).expect("unaligned write");
    assert_eq!(page.read_f64(3), Ok(f64::NEG_INFINITY));
    assert!(page.read_f64(PAGE_SIZE - 7).is_err());

    memory.free(first);
    assert_eq!(memory.get(first).err(), Some(VmError::PageNotFound(first)));
    let handles: Vec<u64> = memory.pages().map(|page| page.handle()).collect();
    assert_eq!(handles, vec![second]);
    assert_eq!(memory.allocate().expect("allocate"), 2);
}
