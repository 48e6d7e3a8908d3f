//! Layouts of the "refs and args" callee-save frame that the host's quick
//! trampoline stub spills before calling into the hook, and the walk that
//! locates every argument of a method inside such a frame.

use std::ptr;

use crate::types::{MirrorRef, PrimitiveType, Shorty};
use crate::value::JValue;

/// The arm layout
pub mod arm;

/// The arm64 layout
pub mod arm64;

/// The x86 layout
pub mod x86;

/// The x86_64 layout
pub mod x64;


/// Bytes of one outgoing stack argument slot in the caller's frame.
const STACK_ARG_BYTES: usize = 4;

/// Bytes of the `Method*` reference at the bottom of a quick frame.
const STACK_REFERENCE_BYTES: usize = 4;

/// Shape of a refs-and-args callee-save frame. All offsets are relative to
/// the frame's stack pointer, which points at the callee's `Method*`.
#[derive(Debug)]
pub struct FrameLayout {
    /// ISA name
    pub name: &'static str,
    /// Floating point arguments travel in core registers
    pub soft_float: bool,
    /// Number of arguments passed in core registers, excluding `Method*`
    pub num_gpr_args: u32,
    /// Number of arguments passed in floating point registers
    pub num_fpr_args: u32,
    /// Bytes of one spilled core register
    pub gpr_spill_bytes: usize,
    /// Bytes of one spilled floating point register
    pub fpr_spill_bytes: usize,
    /// Offset of the first spilled core argument register
    pub gpr1_offset: usize,
    /// Offset of the first spilled floating point argument register
    pub fpr1_offset: usize,
    /// Offset of the return address
    pub lr_offset: usize,
    /// Total size of the frame
    pub frame_size: usize,
    /// Offset of core argument register `index` from `gpr1_offset`
    pub gpr_index_to_offset: fn(u32) -> usize,
}

impl FrameLayout {
    /// Offset of the first stack argument in the caller's frame. Soft float
    /// ABIs reserve spill space for the register arguments there as well.
    pub fn stack_args_offset(&self) -> usize {
        let start = if self.soft_float {
            self.num_gpr_args as usize * self.gpr_spill_bytes + STACK_REFERENCE_BYTES
        } else {
            STACK_REFERENCE_BYTES
        };
        self.frame_size + start
    }

    /// Read the caller's pc.
    ///
    /// # Safety
    ///
    /// `sp` must point at a refs-and-args frame of this layout.
    pub unsafe fn calling_pc(&self, sp: *const u8) -> usize {
        let lr = unsafe { sp.add(self.lr_offset) };
        if self.gpr_spill_bytes == 8 {
            unsafe { ptr::read_unaligned(lr as *const u64) as usize }
        } else {
            unsafe { ptr::read_unaligned(lr as *const u32) as usize }
        }
    }

    fn has_fpr_left(&self, fpr_index: u32) -> bool {
        self.num_fpr_args != 0 && fpr_index < self.num_fpr_args
    }
}

/// The layout of the build target, if it is supported.
pub fn native() -> Option<&'static FrameLayout> {
    if cfg!(target_arch = "arm") {
        Some(&arm::LAYOUT)
    } else if cfg!(target_arch = "aarch64") {
        Some(&arm64::LAYOUT)
    } else if cfg!(target_arch = "x86") {
        Some(&x86::LAYOUT)
    } else if cfg!(target_arch = "x86_64") {
        Some(&x64::LAYOUT)
    } else {
        None
    }
}

/// Where one argument lives in a quick frame.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ArgSlot {
    /// The argument kind
    pub ty: PrimitiveType,
    /// Offset of the value, or of its low half when split
    pub offset: usize,
    /// Offset of the high half of a 64-bit value split between the last
    /// core register and the stack
    pub high_offset: Option<usize>,
}

impl ArgSlot {
    /// Read the argument.
    ///
    /// # Safety
    ///
    /// `sp` must point at a frame described by the layout this slot was
    /// computed from.
    pub unsafe fn read(&self, sp: *const u8) -> JValue {
        let at = |off: usize| unsafe { sp.add(off) };
        match self.ty {
            PrimitiveType::Long | PrimitiveType::Double => match self.high_offset {
                Some(high) => {
                    let low = unsafe { ptr::read_unaligned(at(self.offset) as *const u32) };
                    let high = unsafe { ptr::read_unaligned(at(high) as *const u32) };
                    JValue::from_bits(low as u64 | ((high as u64) << 32))
                }
                None => JValue::from_bits(unsafe {
                    ptr::read_unaligned(at(self.offset) as *const u64)
                }),
            },
            _ => JValue::from_bits(unsafe {
                ptr::read_unaligned(at(self.offset) as *const u32)
            } as u64),
        }
    }

    /// Overwrite a reference argument in place.
    ///
    /// # Safety
    ///
    /// Same as [`ArgSlot::read`], and the frame must be writable.
    pub unsafe fn write_reference(&self, sp: *mut u8, value: MirrorRef) {
        debug_assert!(self.ty.is_reference());
        unsafe { ptr::write_unaligned(sp.add(self.offset) as *mut u32, value.0) };
    }
}

/// Walks the arguments of a method as the quick calling convention placed
/// them: the receiver first for instance methods, then each parameter of
/// the shorty.
pub struct QuickArgumentVisitor<'a> {
    layout: &'a FrameLayout,
    is_static: bool,
    shorty: &'a Shorty,
    gpr_index: u32,
    fpr_index: u32,
    stack_index: usize,
}

impl<'a> QuickArgumentVisitor<'a> {
    /// Create a visitor for a method of `shorty`.
    pub fn new(layout: &'a FrameLayout, is_static: bool, shorty: &'a Shorty) -> Self {
        Self {
            layout,
            is_static,
            shorty,
            gpr_index: 0,
            fpr_index: 0,
            stack_index: 0,
        }
    }

    fn stack_offset(&self, index: usize) -> usize {
        self.layout.stack_args_offset() + index * STACK_ARG_BYTES
    }

    fn param_offset(&self, ty: PrimitiveType) -> usize {
        let l = self.layout;
        if !l.soft_float && matches!(ty, PrimitiveType::Float | PrimitiveType::Double) {
            if l.has_fpr_left(self.fpr_index) {
                return l.fpr1_offset + self.fpr_index as usize * l.fpr_spill_bytes;
            }
            return self.stack_offset(self.stack_index);
        }
        if self.gpr_index < l.num_gpr_args {
            return l.gpr1_offset + (l.gpr_index_to_offset)(self.gpr_index);
        }
        self.stack_offset(self.stack_index)
    }

    fn slot(&self, ty: PrimitiveType, split: bool) -> ArgSlot {
        ArgSlot {
            ty,
            offset: self.param_offset(ty),
            // the high half always lands in the first stack slot
            high_offset: split.then(|| self.stack_offset(0)),
        }
    }

    /// Compute the slot of every argument.
    pub fn visit(mut self) -> Vec<ArgSlot> {
        let l = self.layout;
        let wide_stack_slots = 8 / STACK_ARG_BYTES;
        let mut slots = Vec::with_capacity(self.shorty.params().len() + 1);

        if !self.is_static {
            slots.push(self.slot(PrimitiveType::Not, false));
            if !l.soft_float || l.num_gpr_args == 0 {
                self.stack_index += 1;
            }
            if l.num_gpr_args > 0 {
                self.gpr_index += 1;
            }
        }

        for &ty in self.shorty.params() {
            match ty {
                PrimitiveType::Not
                | PrimitiveType::Boolean
                | PrimitiveType::Byte
                | PrimitiveType::Char
                | PrimitiveType::Short
                | PrimitiveType::Int => {
                    slots.push(self.slot(ty, false));
                    if !l.soft_float || l.num_gpr_args == self.gpr_index {
                        self.stack_index += 1;
                    }
                    if self.gpr_index < l.num_gpr_args {
                        self.gpr_index += 1;
                    }
                }
                PrimitiveType::Float => {
                    slots.push(self.slot(ty, false));
                    if l.soft_float {
                        if self.gpr_index < l.num_gpr_args {
                            self.gpr_index += 1;
                        } else {
                            self.stack_index += 1;
                        }
                    } else {
                        if l.has_fpr_left(self.fpr_index) {
                            self.fpr_index += 1;
                        }
                        self.stack_index += 1;
                    }
                }
                PrimitiveType::Long | PrimitiveType::Double
                    if l.soft_float || ty == PrimitiveType::Long =>
                {
                    let split = l.gpr_spill_bytes == 4 && self.gpr_index + 1 == l.num_gpr_args;
                    slots.push(self.slot(ty, split));
                    if !l.soft_float || l.num_gpr_args == self.gpr_index {
                        self.stack_index += wide_stack_slots;
                    }
                    if self.gpr_index < l.num_gpr_args {
                        self.gpr_index += 1;
                        if l.gpr_spill_bytes == 4 {
                            if self.gpr_index < l.num_gpr_args {
                                self.gpr_index += 1;
                            } else if l.soft_float {
                                self.stack_index += 1;
                            }
                        }
                    }
                }
                PrimitiveType::Double => {
                    let split = l.fpr_spill_bytes == 4 && self.fpr_index + 1 == l.num_fpr_args;
                    slots.push(self.slot(ty, split));
                    if l.has_fpr_left(self.fpr_index) {
                        self.fpr_index += 1;
                        if l.fpr_spill_bytes == 4 && l.has_fpr_left(self.fpr_index) {
                            self.fpr_index += 1;
                        }
                    }
                    self.stack_index += wide_stack_slots;
                }
                PrimitiveType::Long | PrimitiveType::Void => {
                    unreachable!("{ty} in parameters of {}", self.shorty)
                }
            }
        }
        slots
    }
}
