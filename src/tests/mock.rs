//! A single-threaded model of the host runtime: a heap of objects addressed by
//! 32-bit references, handle tables for local and global references, and
//! methods whose bodies are Rust closures.

use std::collections::{HashMap, HashSet};
use std::ptr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::abi::{ArgSlot, FrameLayout, QuickArgumentVisitor};
use crate::*;

pub const TRAMPOLINE: usize = 0xdead_0000;

const GLOBAL_TAG: usize = 0x2000_0000;
const LOCAL_TAG: usize = 0x4000_0000;

pub type Body = Arc<dyn Fn(&Mock, &[JValue]) -> JValue + Send + Sync>;

#[derive(Clone, Debug)]
pub enum Obj {
    Instance { class: u32, value: i32 },
    Boxed(PrimitiveType, JValue),
    Array(Vec<MirrorRef>),
    Member(MethodId, MemberKind),
    Throwable { kind: String, msg: String },
    Moved(MirrorRef),
}

#[derive(Clone)]
pub struct MockMethod {
    name: String,
    shorty: String,
    flags: AccessFlags,
    entry: usize,
    class: u32,
    ret_class: Option<u32>,
    super_method: Option<MethodId>,
    body: Body,
}

#[derive(Default)]
struct State {
    heap: Vec<Obj>,
    locals: Vec<MirrorRef>,
    frames: Vec<usize>,
    globals: Vec<Option<MirrorRef>>,
    methods: Vec<MockMethod>,
    superclasses: HashMap<u32, u32>,
    failing_clinit: HashSet<u32>,
    initialized: HashSet<u32>,
    pending: MirrorRef,
    fail_clone: bool,
    top_of_stack: usize,
    no_suspension: Vec<&'static str>,
}

impl State {
    fn alloc(&mut self, obj: Obj) -> MirrorRef {
        self.heap.push(obj);
        MirrorRef(self.heap.len() as u32)
    }

    fn obj(&self, m: MirrorRef) -> &Obj {
        assert!(!m.is_null(), "null dereference");
        match &self.heap[m.0 as usize - 1] {
            Obj::Moved(to) => panic!("stale reference {m:?}, moved to {to:?}"),
            obj => obj,
        }
    }

    fn decode(&self, obj: JObject) -> MirrorRef {
        if obj.is_null() {
            MirrorRef::NULL
        } else if obj.0 & GLOBAL_TAG != 0 {
            self.globals[obj.0 & !GLOBAL_TAG].expect("deleted global reference")
        } else if obj.0 & LOCAL_TAG != 0 {
            self.locals[obj.0 & !LOCAL_TAG]
        } else {
            panic!("raw handle {obj:?}")
        }
    }

    fn add_local(&mut self, m: MirrorRef) -> JObject {
        if m.is_null() {
            return JObject::NULL;
        }
        self.locals.push(m);
        JObject(LOCAL_TAG | (self.locals.len() - 1))
    }

    fn method(&self, m: MethodId) -> &MockMethod {
        &self.methods[m.0 - 1]
    }

    fn method_mut(&mut self, m: MethodId) -> &mut MockMethod {
        &mut self.methods[m.0 - 1]
    }

    fn instance_of(&self, m: MirrorRef, class: u32) -> bool {
        let Obj::Instance { class: mut c, .. } = *self.obj(m) else {
            return false;
        };
        loop {
            if c == class {
                return true;
            }
            match self.superclasses.get(&c) {
                Some(&s) => c = s,
                None => return false,
            }
        }
    }

    fn throw_new(&mut self, kind: &str, msg: &str) {
        self.pending = self.alloc(Obj::Throwable {
            kind: kind.to_owned(),
            msg: msg.to_owned(),
        });
    }
}

#[derive(Clone, Default)]
pub struct Mock {
    state: Arc<Mutex<State>>,
}

impl Mock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&self, class: u32, superclass: Option<u32>) {
        if let Some(s) = superclass {
            self.state.lock().superclasses.insert(class, s);
        }
    }

    pub fn add_method<F>(&self, name: &str, shorty: &str, flags: AccessFlags, class: u32, body: F) -> MethodId
    where
        F: Fn(&Mock, &[JValue]) -> JValue + Send + Sync + 'static,
    {
        let mut s = self.state.lock();
        let id = MethodId(s.methods.len() + 1);
        s.methods.push(MockMethod {
            name: name.to_owned(),
            shorty: shorty.to_owned(),
            flags,
            entry: 0x7000_0000 + id.0 * 0x100,
            class,
            ret_class: None,
            super_method: None,
            body: Arc::new(body),
        });
        id
    }

    pub fn set_ret_class(&self, m: MethodId, class: u32) {
        self.state.lock().method_mut(m).ret_class = Some(class);
    }

    pub fn set_super_method(&self, m: MethodId, super_method: MethodId) {
        self.state.lock().method_mut(m).super_method = Some(super_method);
    }

    pub fn set_fail_clone(&self, fail: bool) {
        self.state.lock().fail_clone = fail;
    }

    pub fn fail_clinit(&self, class: u32) {
        self.state.lock().failing_clinit.insert(class);
    }

    pub fn is_initialized(&self, class: u32) -> bool {
        self.state.lock().initialized.contains(&class)
    }

    /// A reflective handle of `m`, as a local reference.
    pub fn reflect(&self, m: MethodId) -> JObject {
        let mut s = self.state.lock();
        let kind = if s.method(m).flags.contains(AccessFlags::CONSTRUCTOR) {
            MemberKind::Constructor
        } else {
            MemberKind::Method
        };
        let r = s.alloc(Obj::Member(m, kind));
        s.add_local(r)
    }

    pub fn member_of(&self, handle: JObject) -> (MethodId, MemberKind) {
        let s = self.state.lock();
        match *s.obj(s.decode(handle)) {
            Obj::Member(m, kind) => (m, kind),
            ref other => panic!("not a member: {other:?}"),
        }
    }

    pub fn new_instance(&self, class: u32, value: i32) -> MirrorRef {
        self.state.lock().alloc(Obj::Instance { class, value })
    }

    pub fn instance_value(&self, m: MirrorRef) -> i32 {
        match *self.state.lock().obj(m) {
            Obj::Instance { value, .. } => value,
            ref other => panic!("not an instance: {other:?}"),
        }
    }

    pub fn handle_value(&self, obj: JObject) -> i32 {
        let m = self.decode(obj);
        self.instance_value(m)
    }

    pub fn boxed(&self, ty: PrimitiveType, v: JValue) -> JObject {
        self.box_primitive(ty, v)
    }

    pub fn unboxed(&self, obj: JObject) -> (PrimitiveType, JValue) {
        self.unbox_primitive(obj).expect("not a box")
    }

    pub fn array_of(&self, elements: &[JObject]) -> JObject {
        let array = self.new_object_array(elements.len());
        for (i, &e) in elements.iter().enumerate() {
            self.array_set(array, i, e);
        }
        array
    }

    pub fn elements(&self, array: JObject) -> Vec<JObject> {
        (0..self.array_length(array))
            .map(|i| self.array_get(array, i))
            .collect()
    }

    /// Move an object, as a compacting collector would, updating every handle.
    pub fn relocate(&self, obj: JObject) -> MirrorRef {
        let mut s = self.state.lock();
        let old = s.decode(obj);
        let copy = s.obj(old).clone();
        let new = s.alloc(copy);
        s.heap[old.0 as usize - 1] = Obj::Moved(new);
        for r in s.locals.iter_mut().filter(|r| **r == old) {
            *r = new;
        }
        for r in s.globals.iter_mut().flatten().filter(|r| **r == old) {
            *r = new;
        }
        new
    }

    /// The pending exception as (kind, message), clearing it.
    pub fn take_exception(&self) -> Option<(String, String)> {
        let mut s = self.state.lock();
        let pending = std::mem::take(&mut s.pending);
        if pending.is_null() {
            return None;
        }
        match s.obj(pending) {
            Obj::Throwable { kind, msg } => Some((kind.clone(), msg.clone())),
            other => panic!("not a throwable: {other:?}"),
        }
    }

    pub fn throwable_kind(&self, obj: JObject) -> String {
        let s = self.state.lock();
        match s.obj(s.decode(obj)) {
            Obj::Throwable { kind, .. } => kind.clone(),
            other => panic!("not a throwable: {other:?}"),
        }
    }

    pub fn live_globals(&self) -> usize {
        self.state.lock().globals.iter().flatten().count()
    }

    pub fn top_of_stack(&self) -> usize {
        self.state.lock().top_of_stack
    }

    pub fn assert_balanced(&self) {
        let s = self.state.lock();
        assert!(s.frames.is_empty(), "unbalanced local frames");
        assert!(s.no_suspension.is_empty(), "unbalanced no-suspension scopes");
    }

    /// Run the body of `m` as a regular call would.
    pub fn call_body(&self, m: MethodId, receiver: MirrorRef, args: &[JValue]) -> JValue {
        let (body, is_static) = {
            let s = self.state.lock();
            let method = s.method(m);
            (method.body.clone(), method.flags.contains(AccessFlags::STATIC))
        };
        let mut values = Vec::with_capacity(args.len() + 1);
        if !is_static {
            values.push(JValue::from_mirror(receiver));
        }
        values.extend_from_slice(args);
        body(self, &values)
    }
}

impl Runtime for Mock {
    fn method_from_reflected(&self, member: JObject) -> Option<MethodId> {
        let s = self.state.lock();
        match *s.obj(s.decode(member)) {
            Obj::Member(m, _) => Some(m),
            _ => None,
        }
    }

    fn shorty(&self, method: MethodId) -> Shorty {
        Shorty::parse(&self.state.lock().method(method).shorty).expect("mock shorty")
    }

    fn access_flags(&self, method: MethodId) -> AccessFlags {
        self.state.lock().method(method).flags
    }

    fn set_access_flags(&self, method: MethodId, flags: AccessFlags) {
        self.state.lock().method_mut(method).flags = flags;
    }

    fn entry_point(&self, method: MethodId) -> usize {
        self.state.lock().method(method).entry
    }

    fn set_entry_point(&self, method: MethodId, entry: usize) {
        self.state.lock().method_mut(method).entry = entry;
    }

    fn clone_method(&self, method: MethodId) -> Option<MethodId> {
        let mut s = self.state.lock();
        if s.fail_clone {
            s.throw_new("OutOfMemoryError", "clone");
            return None;
        }
        let copy = s.method(method).clone();
        s.methods.push(copy);
        Some(MethodId(s.methods.len()))
    }

    fn new_reflected_member(&self, method: MethodId, kind: MemberKind) -> JObject {
        let mut s = self.state.lock();
        let r = s.alloc(Obj::Member(method, kind));
        s.add_local(r)
    }

    fn ensure_initialized(&self, method: MethodId) -> bool {
        let mut s = self.state.lock();
        let class = s.method(method).class;
        if s.failing_clinit.contains(&class) {
            s.throw_new("ExceptionInInitializerError", "clinit");
            return false;
        }
        s.initialized.insert(class);
        true
    }

    fn find_super_method(&self, method: MethodId, _vtable_slot: u32) -> Option<MethodId> {
        self.state.lock().method(method).super_method
    }

    fn new_global_ref(&self, obj: JObject) -> JObject {
        let mut s = self.state.lock();
        let m = s.decode(obj);
        s.globals.push(Some(m));
        JObject(GLOBAL_TAG | (s.globals.len() - 1))
    }

    fn delete_global_ref(&self, obj: JObject) {
        let mut s = self.state.lock();
        let slot = &mut s.globals[obj.0 & !GLOBAL_TAG];
        assert!(slot.is_some(), "double delete of {obj:?}");
        *slot = None;
    }

    fn add_local_ref(&self, obj: MirrorRef) -> JObject {
        self.state.lock().add_local(obj)
    }

    fn delete_local_ref(&self, obj: JObject) {
        if obj.0 & LOCAL_TAG != 0 {
            self.state.lock().locals[obj.0 & !LOCAL_TAG] = MirrorRef::NULL;
        }
    }

    fn decode(&self, obj: JObject) -> MirrorRef {
        self.state.lock().decode(obj)
    }

    fn push_local_frame(&self) -> bool {
        let mut s = self.state.lock();
        let mark = s.locals.len();
        s.frames.push(mark);
        true
    }

    fn pop_local_frame(&self) {
        let mut s = self.state.lock();
        let mark = s.frames.pop().expect("no local frame");
        s.locals.truncate(mark);
    }

    fn box_primitive(&self, ty: PrimitiveType, value: JValue) -> JObject {
        let mut s = self.state.lock();
        let r = s.alloc(Obj::Boxed(ty, value));
        s.add_local(r)
    }

    fn unbox_primitive(&self, obj: JObject) -> Option<(PrimitiveType, JValue)> {
        let s = self.state.lock();
        match *s.obj(s.decode(obj)) {
            Obj::Boxed(ty, v) => Some((ty, v)),
            _ => None,
        }
    }

    fn is_instance_of_declaring_class(&self, obj: JObject, method: MethodId) -> bool {
        let s = self.state.lock();
        s.instance_of(s.decode(obj), s.method(method).class)
    }

    fn is_instance_of_param_type(&self, _obj: JObject, _method: MethodId, _index: usize) -> bool {
        true
    }

    fn is_instance_of_return_type(&self, obj: JObject, method: MethodId) -> bool {
        let s = self.state.lock();
        match s.method(method).ret_class {
            Some(class) => s.instance_of(s.decode(obj), class),
            None => true,
        }
    }

    fn new_object_array(&self, len: usize) -> JObject {
        let mut s = self.state.lock();
        let r = s.alloc(Obj::Array(vec![MirrorRef::NULL; len]));
        s.add_local(r)
    }

    fn array_length(&self, array: JObject) -> usize {
        let s = self.state.lock();
        match s.obj(s.decode(array)) {
            Obj::Array(v) => v.len(),
            other => panic!("not an array: {other:?}"),
        }
    }

    fn array_get(&self, array: JObject, index: usize) -> JObject {
        let mut s = self.state.lock();
        let element = match s.obj(s.decode(array)) {
            Obj::Array(v) => v[index],
            other => panic!("not an array: {other:?}"),
        };
        s.add_local(element)
    }

    fn array_set(&self, array: JObject, index: usize, value: JObject) {
        let mut s = self.state.lock();
        let value = s.decode(value);
        let a = s.decode(array);
        match &mut s.heap[a.0 as usize - 1] {
            Obj::Array(v) => v[index] = value,
            other => panic!("not an array: {other:?}"),
        }
    }

    fn set_top_of_stack(&self, sp: *mut u8) {
        self.state.lock().top_of_stack = sp as usize;
    }

    fn start_assert_no_suspension(&self, cause: &'static str) -> Option<&'static str> {
        let mut s = self.state.lock();
        let old = s.no_suspension.last().copied();
        s.no_suspension.push(cause);
        old
    }

    fn end_assert_no_suspension(&self, old_cause: Option<&'static str>) {
        let mut s = self.state.lock();
        s.no_suspension.pop();
        assert_eq!(s.no_suspension.last().copied(), old_cause);
    }

    fn exception_pending(&self) -> bool {
        !self.state.lock().pending.is_null()
    }

    fn exception_occurred(&self) -> JObject {
        let mut s = self.state.lock();
        let pending = s.pending;
        s.add_local(pending)
    }

    fn exception_clear(&self) {
        self.state.lock().pending = MirrorRef::NULL;
    }

    fn throw(&self, throwable: JObject) {
        let mut s = self.state.lock();
        s.pending = s.decode(throwable);
    }

    fn throw_new(&self, kind: ExceptionKind, msg: &str) {
        self.state.lock().throw_new(&format!("{kind:?}"), msg);
    }

    fn invoke(&self, method: MethodId, shorty: &Shorty, args: &ArgArray) -> JValue {
        let (body, is_static) = {
            let s = self.state.lock();
            let m = s.method(method);
            assert_ne!(m.entry, TRAMPOLINE, "direct invoke of hooked {}", m.name);
            (m.body.clone(), m.flags.contains(AccessFlags::STATIC))
        };
        let words = args.words();
        let mut values = Vec::new();
        let mut i = 0;
        if !is_static {
            values.push(JValue::from_bits(words[0] as u64));
            i = 1;
        }
        for ty in shorty.params() {
            if ty.is_wide() {
                values.push(JValue::from_bits(
                    words[i] as u64 | ((words[i + 1] as u64) << 32),
                ));
                i += 2;
            } else {
                values.push(JValue::from_bits(words[i] as u64));
                i += 1;
            }
        }
        assert_eq!(i, words.len());
        body(self, &values)
    }

    fn pretty_method(&self, method: MethodId) -> String {
        self.state.lock().method(method).name.clone()
    }

    fn pretty_type_of(&self, obj: JObject) -> String {
        if obj.is_null() {
            return "null".to_owned();
        }
        let s = self.state.lock();
        match s.obj(s.decode(obj)) {
            Obj::Instance { class, .. } => format!("Class{class}"),
            Obj::Boxed(ty, _) => ty.boxed_descriptor().unwrap_or("?").to_owned(),
            Obj::Array(_) => "java.lang.Object[]".to_owned(),
            Obj::Member(..) => "java.lang.reflect.Member".to_owned(),
            Obj::Throwable { kind, .. } => kind.clone(),
            Obj::Moved(_) => unreachable!(),
        }
    }

    fn pretty_param_type(&self, _method: MethodId, _index: usize) -> String {
        "java.lang.Object".to_owned()
    }

    fn pretty_return_type(&self, method: MethodId) -> String {
        match self.state.lock().method(method).ret_class {
            Some(class) => format!("Class{class}"),
            None => "java.lang.Object".to_owned(),
        }
    }
}

/// A refs-and-args frame as the host stub would spill it.
pub struct Frame {
    mem: Vec<u64>,
    slots: Vec<ArgSlot>,
}

impl Frame {
    pub fn build(
        layout: &FrameLayout,
        method: MethodId,
        shorty: &Shorty,
        is_static: bool,
        receiver: MirrorRef,
        args: &[JValue],
    ) -> Self {
        let mut mem = vec![0u64; (layout.frame_size + 256) / 8];
        let slots = QuickArgumentVisitor::new(layout, is_static, shorty).visit();
        let mut values = Vec::with_capacity(slots.len());
        if !is_static {
            values.push(JValue::from_mirror(receiver));
        }
        values.extend_from_slice(args);
        assert_eq!(values.len(), slots.len());

        let sp = mem.as_mut_ptr() as *mut u8;
        unsafe {
            ptr::write_unaligned(sp as *mut u32, method.0 as u32);
            for (slot, v) in slots.iter().zip(&values) {
                let at = sp.add(slot.offset);
                match (slot.ty.is_wide(), slot.high_offset) {
                    (true, Some(high)) => {
                        ptr::write_unaligned(at as *mut u32, v.bits() as u32);
                        ptr::write_unaligned(sp.add(high) as *mut u32, (v.bits() >> 32) as u32);
                    }
                    (true, None) => ptr::write_unaligned(at as *mut u64, v.bits()),
                    (false, _) => ptr::write_unaligned(at as *mut u32, v.bits() as u32),
                }
            }
        }
        Self { mem, slots }
    }

    pub fn sp(&mut self) -> *mut u8 {
        self.mem.as_mut_ptr() as *mut u8
    }

    /// Argument `index`, the receiver being 0 for instance methods.
    pub fn read(&self, index: usize) -> JValue {
        unsafe { self.slots[index].read(self.mem.as_ptr() as *const u8) }
    }
}

/// Call `method` the way compiled code would: through its entry point.
pub fn call_with_frame<H: HookHandler<Mock>>(
    manager: &HookManager<Mock, H>,
    method: MethodId,
    receiver: MirrorRef,
    args: &[JValue],
) -> (JValue, Option<Frame>) {
    let rt = manager.runtime();
    if rt.entry_point(method) != TRAMPOLINE {
        return (rt.call_body(method, receiver, args), None);
    }
    let shorty = rt.shorty(method);
    let is_static = rt.access_flags(method).contains(AccessFlags::STATIC);
    let layout = manager.context().config().layout();
    let mut frame = Frame::build(layout, method, &shorty, is_static, receiver, args);
    let bits = unsafe { manager.on_trampoline_entry(method, receiver, frame.sp()) };
    rt.assert_balanced();
    (JValue::from_bits(bits), Some(frame))
}

pub fn call<H: HookHandler<Mock>>(
    manager: &HookManager<Mock, H>,
    method: MethodId,
    receiver: MirrorRef,
    args: &[JValue],
) -> JValue {
    call_with_frame(manager, method, receiver, args).0
}
