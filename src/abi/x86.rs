use super::FrameLayout;

// Frame: eax/Method*, ecx, edx, ebx, ebp, esi, edi, return address.
fn gpr_index_to_offset(index: u32) -> usize {
    index as usize * 4
}

/// Soft float, ecx, edx and ebx carry arguments.
pub static LAYOUT: FrameLayout = FrameLayout {
    name: "x86",
    soft_float: true,
    num_gpr_args: 3,
    num_fpr_args: 0,
    gpr_spill_bytes: 4,
    fpr_spill_bytes: 4,
    gpr1_offset: 4,
    fpr1_offset: 0,
    lr_offset: 28,
    frame_size: 32,
    gpr_index_to_offset,
};
