use super::FrameLayout;

// Frame, from sp up: rdi/Method*, padding, xmm0-xmm7, rcx, rdx, rbx, rbp,
// rsi, r8, r9, r12-r15, return address.
//
// Argument registers in order are rsi, rdx, rcx, r8, r9, which do not follow
// their spill order.
fn gpr_index_to_offset(index: u32) -> usize {
    match index {
        0 => 4 * 8,
        1 => 8,
        2 => 0,
        3 => 5 * 8,
        4 => 6 * 8,
        _ => unreachable!("unexpected gpr index: {index}"),
    }
}

/// Hard float, five core and eight xmm argument registers.
pub static LAYOUT: FrameLayout = FrameLayout {
    name: "x86_64",
    soft_float: false,
    num_gpr_args: 5,
    num_fpr_args: 8,
    gpr_spill_bytes: 8,
    fpr_spill_bytes: 8,
    gpr1_offset: 112,
    fpr1_offset: 16,
    lr_offset: 200,
    frame_size: 208,
    gpr_index_to_offset,
};
