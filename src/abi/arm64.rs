use super::FrameLayout;

// Frame: Method*, padding, d0-d7, x1-x7, x20-x29, lr.
fn gpr_index_to_offset(index: u32) -> usize {
    index as usize * 8
}

/// Hard float, x1-x7 and d0-d7 carry arguments.
pub static LAYOUT: FrameLayout = FrameLayout {
    name: "arm64",
    soft_float: false,
    num_gpr_args: 7,
    num_fpr_args: 8,
    gpr_spill_bytes: 8,
    fpr_spill_bytes: 8,
    gpr1_offset: 80,
    fpr1_offset: 16,
    lr_offset: 216,
    frame_size: 224,
    gpr_index_to_offset,
};
