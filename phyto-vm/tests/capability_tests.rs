mod common;

use common::{
    AddTwo, CapabilityTable, Counter, Vm, VmError, VmStatus, assemble, run_until_error, stack_of,
    static_failing, static_page_count, static_peek_then_fail,
};

fn vm_with(source: &str, table: CapabilityTable) -> Vm {
    let mut vm = Vm::new(assemble(source).expect("assemble should succeed"));
    vm.set_capabilities(table);
    vm
}

fn host_table() -> CapabilityTable {
    let mut table = CapabilityTable::new();
    table.register("add2", Box::new(AddTwo));
    table.register("count", Box::new(Counter { calls: 0 }));
    table.register_static("fail", static_failing);
    table.register_static("pages", static_page_count);
    table.register_static("peekfail", static_peek_then_fail);
    table
}

#[test]
fn without_a_table_both_opcodes_are_not_implemented() {
    let mut vm = Vm::new(assemble("capabilitycheck clock").expect("assemble"));
    assert_eq!(
        vm.step(),
        Err(VmError::NotImplemented("clock".to_string()))
    );
    assert_eq!(vm.position(), 0);

    let mut vm = Vm::new(assemble("push 1\ncapability clock").expect("assemble"));
    assert_eq!(
        run_until_error(&mut vm),
        VmError::NotImplemented("clock".to_string())
    );
    assert_eq!(stack_of(&vm), vec![1.0]);
    assert_eq!(vm.position(), 9);
}

#[test]
fn capabilitycheck_pushes_presence_flag() {
    let mut vm = vm_with("capabilitycheck add2\ncapabilitycheck clock", host_table());
    vm.run().expect("vm should run");
    assert_eq!(stack_of(&vm), vec![1.0, 0.0]);
}

#[test]
fn capability_invokes_registered_handler() {
    let mut vm = vm_with("push 2\npush 40\ncapability add2\nhalt", host_table());
    assert_eq!(vm.run(), Ok(VmStatus::Halted));
    assert_eq!(stack_of(&vm), vec![42.0]);
}

#[test]
fn dynamic_handlers_keep_state_between_calls() {
    let mut vm = vm_with("capability count\ncapability count\ncapability count", host_table());
    vm.run().expect("vm should run");
    assert_eq!(stack_of(&vm), vec![1.0, 2.0, 3.0]);
}

#[test]
fn static_handlers_see_memory() {
    let mut vm = vm_with("memplz\nmemplz\ncapability pages", host_table());
    vm.run().expect("vm should run");
    assert_eq!(stack_of(&vm), vec![0.0, 1.0, 2.0]);
}

#[test]
fn unregistered_capability_is_not_implemented() {
    let mut vm = vm_with("push 1\ncapability clock", host_table());
    assert_eq!(
        run_until_error(&mut vm),
        VmError::NotImplemented("clock".to_string())
    );
    assert_eq!(stack_of(&vm), vec![1.0]);
    assert_eq!(vm.position(), 9);
}

#[test]
fn failing_handler_leaves_stack_as_it_was() {
    let mut vm = vm_with("push 7\npush 8\ncapability fail", host_table());
    assert_eq!(
        run_until_error(&mut vm),
        VmError::InvalidOperand("rejected by host")
    );
    assert_eq!(stack_of(&vm), vec![7.0, 8.0]);
    assert_eq!(vm.position(), 18);

    let mut vm = vm_with("push 1\ncapability add2", host_table());
    assert_eq!(run_until_error(&mut vm), VmError::StackUnderflow);
    assert_eq!(stack_of(&vm), vec![1.0]);
}

#[test]
fn failing_handler_leaves_pages_and_stack_untouched() {
    let mut vm = vm_with("memplz\ncapability peekfail", host_table());
    assert_eq!(
        run_until_error(&mut vm),
        VmError::InvalidOperand("page rejected by host")
    );
    assert_eq!(vm.position(), 1);
    assert_eq!(stack_of(&vm), vec![0.0]);
    assert_eq!(vm.memory().live_pages(), 1);
    let page = vm.memory().get(0).expect("page 0 should be live");
    assert!(page.as_bytes().iter().all(|&byte| byte == 0));
}

#[test]
fn table_can_be_extended_after_install() {
    let mut vm = vm_with("capabilitycheck late", CapabilityTable::new());
    vm.capabilities_mut()
        .expect("table installed")
        .register_static("late", static_page_count);
    vm.run().expect("vm should run");
    assert_eq!(stack_of(&vm), vec![1.0]);

    let table = host_table();
    assert_eq!(table.len(), 5);
    assert!(table.contains("fail"));
    assert_eq!(
        format!("{table:?}"),
        r#"CapabilityTable { names: ["add2", "count", "fail", "pages", "peekfail"] }"#
    );
}
