use super::{Vm, VmError};

/// Formats `err` with the offset and opcode of the instruction that raised it.
pub fn render_vm_error(vm: &Vm, err: &VmError) -> String {
    let mut out = format!("runtime error: {err}");
    let position = vm.position();
    match vm.opcode_at(position) {
        Some(opcode) => out.push_str(&format!("\nat offset {position} ({opcode})")),
        None => out.push_str(&format!("\nat offset {position}")),
    }
    out.push_str(&format!(
        "\nstack depth {} of {}, {} live page(s)",
        vm.stack().len(),
        vm.stack().max(),
        vm.memory().live_pages()
    ));
    out
}
