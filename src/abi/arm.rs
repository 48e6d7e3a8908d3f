use super::FrameLayout;

// r1-r3 carry arguments, r0 holds Method* and is spilled as padding.
// Frame: Method*, r0, r1-r3, r5-r8, r10, r11, lr. 44 bytes rounded to 48.
fn gpr_index_to_offset(index: u32) -> usize {
    index as usize * 4
}

/// Soft float, 32-bit core registers.
pub static LAYOUT: FrameLayout = FrameLayout {
    name: "arm",
    soft_float: true,
    num_gpr_args: 3,
    num_fpr_args: 0,
    gpr_spill_bytes: 4,
    fpr_spill_bytes: 4,
    gpr1_offset: 8,
    fpr1_offset: 8,
    lr_offset: 44,
    frame_size: 48,
    gpr_index_to_offset,
};
