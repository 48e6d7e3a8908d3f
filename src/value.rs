use crate::callbacks::Runtime;
use crate::err::HookError;
use crate::types::{ExceptionKind, JObject, MethodId, MirrorRef, PrimitiveType, Shorty};

/// A raw 64-bit value of any kind. Narrow kinds live in the low bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct JValue(u64);

#[allow(missing_docs)]
impl JValue {
    /// All bits zero: `false`, `0`, `0.0` or null.
    pub const ZERO: JValue = JValue(0);

    /// Wrap raw bits.
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
    /// The raw bits, as returned through the native calling convention.
    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn from_z(v: bool) -> Self {
        Self(v as u64)
    }
    pub fn from_b(v: i8) -> Self {
        Self(v as i32 as u32 as u64)
    }
    pub fn from_c(v: u16) -> Self {
        Self(v as u64)
    }
    pub fn from_s(v: i16) -> Self {
        Self(v as i32 as u32 as u64)
    }
    pub fn from_i(v: i32) -> Self {
        Self(v as u32 as u64)
    }
    pub fn from_j(v: i64) -> Self {
        Self(v as u64)
    }
    pub fn from_f(v: f32) -> Self {
        Self(v.to_bits() as u64)
    }
    pub fn from_d(v: f64) -> Self {
        Self(v.to_bits())
    }
    pub fn from_object(v: JObject) -> Self {
        Self(v.0 as u64)
    }
    pub fn from_mirror(v: MirrorRef) -> Self {
        Self(v.0 as u64)
    }

    pub fn z(self) -> bool {
        self.0 as u8 != 0
    }
    pub fn b(self) -> i8 {
        self.0 as i8
    }
    pub fn c(self) -> u16 {
        self.0 as u16
    }
    pub fn s(self) -> i16 {
        self.0 as i16
    }
    pub fn i(self) -> i32 {
        self.0 as i32
    }
    pub fn j(self) -> i64 {
        self.0 as i64
    }
    pub fn f(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }
    pub fn d(self) -> f64 {
        f64::from_bits(self.0)
    }
    pub fn object(self) -> JObject {
        JObject(self.0 as usize)
    }
    pub fn mirror(self) -> MirrorRef {
        MirrorRef(self.0 as u32)
    }
}

fn int_value(ty: PrimitiveType, v: JValue) -> Option<i32> {
    match ty {
        PrimitiveType::Byte => Some(v.b() as i32),
        PrimitiveType::Char => Some(v.c() as i32),
        PrimitiveType::Short => Some(v.s() as i32),
        PrimitiveType::Int => Some(v.i()),
        _ => None,
    }
}

/// Convert `value` of kind `src` to kind `dst`, allowing the identity and the
/// widening primitive conversions only.
pub fn convert_primitive_value(
    src: PrimitiveType,
    dst: PrimitiveType,
    value: JValue,
) -> Option<JValue> {
    if src == dst {
        return Some(value);
    }
    match (src, dst) {
        (PrimitiveType::Byte, PrimitiveType::Short) => Some(JValue::from_s(value.b() as i16)),
        (PrimitiveType::Byte | PrimitiveType::Char | PrimitiveType::Short, PrimitiveType::Int) => {
            int_value(src, value).map(JValue::from_i)
        }
        (_, PrimitiveType::Long) => int_value(src, value).map(|v| JValue::from_j(v as i64)),
        (PrimitiveType::Long, PrimitiveType::Float) => Some(JValue::from_f(value.j() as f32)),
        (_, PrimitiveType::Float) => int_value(src, value).map(|v| JValue::from_f(v as f32)),
        (PrimitiveType::Long, PrimitiveType::Double) => Some(JValue::from_d(value.j() as f64)),
        (PrimitiveType::Float, PrimitiveType::Double) => Some(JValue::from_d(value.f() as f64)),
        (_, PrimitiveType::Double) => int_value(src, value).map(|v| JValue::from_d(v as f64)),
        _ => None,
    }
}

/// Arguments of a direct invocation, packed into 32-bit words the way the
/// quick invoke stubs expect them: the receiver first, then every argument,
/// wide values taking two words (low word first).
#[derive(Clone, Default, Debug)]
pub struct ArgArray {
    words: Vec<u32>,
}

#[allow(missing_docs)]
impl ArgArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, value: u32) {
        self.words.push(value);
    }

    pub fn append_wide(&mut self, value: u64) {
        self.words.push(value as u32);
        self.words.push((value >> 32) as u32);
    }

    pub fn append_float(&mut self, value: f32) {
        self.append(value.to_bits());
    }

    pub fn append_double(&mut self, value: f64) {
        self.append_wide(value.to_bits());
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn num_bytes(&self) -> usize {
        self.words.len() * 4
    }

    fn append_value(&mut self, ty: PrimitiveType, value: JValue) {
        match ty {
            PrimitiveType::Long => self.append_wide(value.j() as u64),
            PrimitiveType::Double => self.append_double(value.d()),
            PrimitiveType::Float => self.append_float(value.f()),
            PrimitiveType::Boolean => self.append(value.z() as u32),
            PrimitiveType::Byte => self.append(value.b() as i32 as u32),
            PrimitiveType::Char => self.append(value.c() as u32),
            PrimitiveType::Short => self.append(value.s() as i32 as u32),
            _ => self.append(value.i() as u32),
        }
    }

    /// Build the arguments of `method` from a boxed argument array. Every
    /// primitive parameter is unboxed and widened if needed. On failure an
    /// `IllegalArgumentException` is left pending.
    pub fn from_object_array<R: Runtime>(
        rt: &R,
        method: MethodId,
        shorty: &Shorty,
        receiver: MirrorRef,
        args: JObject,
    ) -> Result<Self, HookError> {
        let mut arg_array = Self::new();
        if !receiver.is_null() {
            arg_array.append(receiver.0);
        }
        for (idx, &ty) in shorty.params().iter().enumerate() {
            let arg = rt.array_get(args, idx);
            let fail = |expected: &str| {
                rt.throw_new(
                    ExceptionKind::IllegalArgument,
                    &format!(
                        "method {} argument {} has type {}, got {}",
                        rt.pretty_method(method),
                        idx + 1,
                        expected,
                        rt.pretty_type_of(arg)
                    ),
                );
                HookError::ExceptionPending
            };
            if ty.is_reference() {
                if !arg.is_null() && !rt.is_instance_of_param_type(arg, method, idx) {
                    return Err(fail(&rt.pretty_param_type(method, idx)));
                }
                arg_array.append(rt.decode(arg).0);
                continue;
            }
            if arg.is_null() {
                return Err(fail(ty.name()));
            }
            let value = rt
                .unbox_primitive(arg)
                .and_then(|(src, v)| convert_primitive_value(src, ty, v))
                .ok_or_else(|| fail(ty.name()))?;
            arg_array.append_value(ty, value);
        }
        Ok(arg_array)
    }
}
