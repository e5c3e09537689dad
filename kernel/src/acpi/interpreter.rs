//! AML bytecode evaluator.
//!
//! A single tree-walking interpreter is shared by namespace construction
//! (the initial pass over DSDT/SSDT, executed as top-level "statements"
//! with no method frame) and control-method invocation. `GLOBAL_LOCK`
//! only keeps table loading exclusive of method execution (`load_table`
//! takes it for write, `call_method` for read): separate control methods
//! run concurrently on separate kernel threads and contend with each
//! other through AML-level `Mutex`/`Event` objects (`do_acquire`/
//! `do_wait` below), the way real firmware expects.

use alloc::{string::String, sync::Arc, vec::Vec};

use spin::{Mutex, RwLock};

use super::{
    namespace::{Namespace, Node, NodeKind},
    opcodes::{self, RegionSpace},
    parser::{AmlError, AmlResult, Cursor},
    value::{conv, Reference, Value},
};
use crate::{
    error::{KernelError, KernelResult},
    process::ProcessId,
};

/// Excludes `load_table` (write) from `call_method` (read); concurrent
/// `call_method` calls run in parallel against each other.
pub static GLOBAL_LOCK: RwLock<()> = RwLock::new(());

/// Identity used to key AML `Mutex` ownership -- the calling kernel
/// thread's PID, or `ProcessId(0)` if invoked with no current task (e.g.
/// during early boot table loading).
fn current_owner() -> ProcessId {
    crate::sched::scheduler::current_scheduler()
        .lock()
        .current()
        .map(|t| unsafe { t.as_ref().pid })
        .unwrap_or(ProcessId(0))
}

const MAX_WHILE_ITERATIONS: u32 = 1_000_000;

/// Non-local control flow produced by executing one statement.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    args: [Value; 7],
    locals: [Value; 8],
}

impl Frame {
    fn new() -> Self {
        Self {
            args: core::array::from_fn(|_| Value::Uninitialized),
            locals: core::array::from_fn(|_| Value::Uninitialized),
        }
    }
}

/// Execution context for one pass over a term list: the namespace being
/// built/read, the current scope path, and (inside a method) its Arg/Local
/// frame.
pub struct Interpreter<'ns> {
    namespace: &'ns Namespace,
    scope: String,
    frame: Option<Frame>,
}

impl<'ns> Interpreter<'ns> {
    pub fn new(namespace: &'ns Namespace, scope: &str) -> Self {
        Self {
            namespace,
            scope: scope.into(),
            frame: None,
        }
    }

    /// Load a table's top-level term list into the namespace.
    pub fn load_table(namespace: &'ns Namespace, aml: &[u8]) -> AmlResult<()> {
        let mut interp = Interpreter::new(namespace, "\\");
        let mut cursor = Cursor::new(aml);
        interp.exec_term_list(&mut cursor)?;
        Ok(())
    }

    /// Invoke a `Method` node with already-evaluated arguments.
    pub fn invoke_method(namespace: &'ns Namespace, node: &Arc<Node>, scope: &str, args: Vec<Value>) -> AmlResult<Value> {
        let mut interp = Interpreter::new(namespace, scope);
        let mut frame = Frame::new();
        for (i, arg) in args.into_iter().take(7).enumerate() {
            frame.args[i] = arg;
        }
        interp.frame = Some(frame);
        let body = node.aml_body.lock().clone();
        let mut cursor = Cursor::new(&body);
        match interp.exec_term_list(&mut cursor)? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::Integer(0)),
        }
    }

    fn exec_term_list(&mut self, cursor: &mut Cursor) -> AmlResult<Flow> {
        while !cursor.is_empty() {
            match self.exec_term(cursor)? {
                Flow::Normal => continue,
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_term(&mut self, cursor: &mut Cursor) -> AmlResult<Flow> {
        let first = cursor.peek()?;
        if is_name_start(first) {
            // A bare name at statement position is a method invocation
            // whose return value is discarded.
            self.eval_name_reference(cursor)?;
            return Ok(Flow::Normal);
        }

        match first {
            opcodes::NAME_OP => {
                cursor.next_byte()?;
                let name = cursor.name_string()?;
                let val = self.eval_term_arg(cursor)?;
                let path = self.namespace.normalize(&self.scope, &name);
                let node = self.namespace.declare(&path, NodeKind::Name);
                *node.value.lock() = val;
                Ok(Flow::Normal)
            }
            opcodes::SCOPE_OP => {
                cursor.next_byte()?;
                self.exec_scoped_decl(cursor, NodeKind::Scope, 0)?;
                Ok(Flow::Normal)
            }
            opcodes::METHOD_OP => {
                cursor.next_byte()?;
                let len = cursor.package_length()?;
                let mut sub = cursor.sub_cursor(len)?;
                let name = sub.name_string()?;
                let flags = sub.next_byte()?;
                let arg_count = flags & 0x7;
                let serialized = flags & 0x8 != 0;
                let body = sub.take(sub.remaining())?.to_vec();
                let path = self.namespace.normalize(&self.scope, &name);
                let node = self.namespace.declare(&path, NodeKind::Method { arg_count, serialized });
                node.set_method_body(arg_count, serialized, body);
                Ok(Flow::Normal)
            }
            opcodes::IF_OP => self.exec_if(cursor),
            opcodes::WHILE_OP => self.exec_while(cursor),
            opcodes::BREAK_OP => {
                cursor.next_byte()?;
                Ok(Flow::Break)
            }
            opcodes::CONTINUE_OP => {
                cursor.next_byte()?;
                Ok(Flow::Continue)
            }
            opcodes::RETURN_OP => {
                cursor.next_byte()?;
                let val = if cursor.is_empty() {
                    Value::Integer(0)
                } else {
                    self.eval_term_arg(cursor)?
                };
                Ok(Flow::Return(val))
            }
            opcodes::NOOP_OP => {
                cursor.next_byte()?;
                Ok(Flow::Normal)
            }
            opcodes::EXT_OP_PREFIX => self.exec_ext_decl(cursor),
            _ => {
                // Fall through to expression evaluation; the result of a
                // statement-position expression is simply discarded.
                self.eval_term_arg(cursor)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_if(&mut self, cursor: &mut Cursor) -> AmlResult<Flow> {
        cursor.next_byte()?; // IfOp
        let len = cursor.package_length()?;
        let mut sub = cursor.sub_cursor(len)?;
        let predicate = self.eval_term_arg(&mut sub)?;
        let taken = predicate.as_integer().unwrap_or(0) != 0;

        let mut flow = Flow::Normal;
        if taken {
            flow = self.exec_term_list(&mut sub)?;
        }

        if cursor.peek() == Ok(opcodes::ELSE_OP) {
            cursor.next_byte()?;
            let else_len = cursor.package_length()?;
            let mut else_sub = cursor.sub_cursor(else_len)?;
            if !taken {
                flow = self.exec_term_list(&mut else_sub)?;
            }
        }
        Ok(flow)
    }

    fn exec_while(&mut self, cursor: &mut Cursor) -> AmlResult<Flow> {
        cursor.next_byte()?; // WhileOp
        let len = cursor.package_length()?;
        let body = cursor.sub_cursor(len)?.take_rest();

        for _ in 0..MAX_WHILE_ITERATIONS {
            let mut iter_cursor = Cursor::new(body);
            let predicate = self.eval_term_arg(&mut iter_cursor)?;
            if predicate.as_integer().unwrap_or(0) == 0 {
                break;
            }
            match self.exec_term_list(&mut iter_cursor)? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Continue | Flow::Normal => continue,
            }
        }
        Ok(Flow::Normal)
    }

    /// `Scope`/`Device`/`ThermalZone`/`PowerResource`-style declarations:
    /// `PkgLength NameString <header bytes> TermList`. `header_skip` is the
    /// number of fixed bytes between the name and the term list (0 for
    /// Scope/Device/ThermalZone; Processor/PowerResource carry extra
    /// fields handled by their own callers).
    fn exec_scoped_decl(&mut self, cursor: &mut Cursor, kind: NodeKind, header_skip: usize) -> AmlResult<()> {
        let len = cursor.package_length()?;
        let mut sub = cursor.sub_cursor(len)?;
        let name = sub.name_string()?;
        if header_skip > 0 {
            sub.take(header_skip)?;
        }
        let path = self.namespace.normalize(&self.scope, &name);
        self.namespace.declare(&path, kind);

        let saved_scope = core::mem::replace(&mut self.scope, path);
        self.exec_term_list(&mut sub)?;
        self.scope = saved_scope;
        Ok(())
    }

    fn exec_ext_decl(&mut self, cursor: &mut Cursor) -> AmlResult<Flow> {
        cursor.next_byte()?; // ExtOpPrefix
        let ext = cursor.next_byte()?;
        match ext {
            opcodes::EXT_DEVICE_OP => self.exec_scoped_decl(cursor, NodeKind::Device, 0)?,
            opcodes::EXT_THERMAL_ZONE_OP => self.exec_scoped_decl(cursor, NodeKind::ThermalZone, 0)?,
            opcodes::EXT_PROCESSOR_OP => self.exec_scoped_decl(cursor, NodeKind::Processor, 6)?,
            opcodes::EXT_POWER_RES_OP => self.exec_scoped_decl(cursor, NodeKind::PowerResource, 3)?,
            opcodes::EXT_MUTEX_OP => {
                let name = cursor.name_string()?;
                let sync_level = cursor.next_byte()?;
                let path = self.namespace.normalize(&self.scope, &name);
                let node = self.namespace.declare(&path, NodeKind::Mutex);
                *node.value.lock() = Value::Integer(sync_level as u64);
            }
            opcodes::EXT_EVENT_OP => {
                let name = cursor.name_string()?;
                let path = self.namespace.normalize(&self.scope, &name);
                self.namespace.declare(&path, NodeKind::Event);
            }
            opcodes::EXT_OP_REGION_OP => {
                let name = cursor.name_string()?;
                let space = RegionSpace::from(cursor.next_byte()?);
                let offset = self.eval_term_arg(cursor)?.as_integer().unwrap_or(0);
                let length = self.eval_term_arg(cursor)?.as_integer().unwrap_or(0);
                let path = self.namespace.normalize(&self.scope, &name);
                let node = self.namespace.declare(&path, NodeKind::OpRegion);
                *node.value.lock() = Value::Register(region_info(space, offset, length));
            }
            opcodes::EXT_FIELD_OP => self.exec_field(cursor)?,
            opcodes::EXT_INDEX_FIELD_OP | opcodes::EXT_BANK_FIELD_OP => {
                // Bit-accurate index/bank field decode is out of scope;
                // consume the declaration's bytes so parsing can continue
                // past it without corrupting the cursor.
                let len = cursor.package_length()?;
                cursor.sub_cursor(len)?;
            }
            opcodes::EXT_ACQUIRE_OP => {
                let mutex = cursor.name_string()?;
                let timeout = cursor.take(2)?;
                let timeout_ms = u16::from_le_bytes([timeout[0], timeout[1]]);
                self.do_acquire(&mutex, timeout_ms)?;
            }
            opcodes::EXT_RELEASE_OP => {
                let mutex = cursor.name_string()?;
                self.do_release(&mutex)?;
            }
            opcodes::EXT_RESET_OP => {
                let event = cursor.name_string()?;
                self.do_reset(&event)?;
            }
            opcodes::EXT_SIGNAL_OP => {
                let event = cursor.name_string()?;
                self.do_signal(&event)?;
            }
            opcodes::EXT_WAIT_OP => {
                let event = cursor.name_string()?;
                let timeout_ms = self.eval_term_arg(cursor)?.as_integer().unwrap_or(0xFFFF);
                self.do_wait(&event, timeout_ms)?;
            }
            opcodes::EXT_STALL_OP | opcodes::EXT_SLEEP_OP => {
                self.eval_term_arg(cursor)?;
            }
            opcodes::EXT_FATAL_OP => {
                return Err(AmlError::UnknownOpcode(opcodes::EXT_FATAL_OP));
            }
            opcodes::EXT_UNLOAD_OP => {
                cursor.name_string()?;
            }
            opcodes::EXT_COND_REF_OF_OP => {
                let name = cursor.name_string()?;
                let target = cursor.name_string()?;
                let found = self.namespace.resolve(&self.scope, &name).is_some();
                if !target.is_empty() {
                    self.store(&target, Value::Integer(found as u64))?;
                }
            }
            opcodes::EXT_REVISION_OP | opcodes::EXT_DEBUG_OP => {}
            other => return Err(AmlError::UnknownOpcode(other)),
        }
        Ok(Flow::Normal)
    }

    /// `Acquire(MutexObject, Timeout)` (ACPI spec 19.6.2). `timeout_ms ==
    /// 0xFFFF` means wait indefinitely; any other value is a millisecond
    /// bound. Returns `0` on success, `1` if the timeout elapsed first.
    /// Recursive acquisition by the same thread just bumps a depth
    /// counter, matching real AML Mutex semantics.
    fn do_acquire(&mut self, name: &str, timeout_ms: u16) -> AmlResult<u64> {
        let node = self
            .namespace
            .resolve(&self.scope, name)
            .ok_or(AmlError::InvalidName)?;
        let owner = current_owner();
        loop {
            {
                let mut held = node.sync.mutex_owner.lock();
                match *held {
                    None => {
                        *held = Some((owner, 1));
                        return Ok(0);
                    }
                    Some((holder, depth)) if holder == owner => {
                        *held = Some((holder, depth + 1));
                        return Ok(0);
                    }
                    _ => {}
                }
            }
            let reason = if timeout_ms == 0xFFFF {
                node.sync.blocker.block_indefinite()
            } else {
                node.sync
                    .blocker
                    .block_with_timeout_ns(timeout_ms as u64 * 1_000_000)
            };
            if reason == crate::sched::WakeReason::TimedOut {
                return Ok(1);
            }
            // Woken: re-check ownership at the top of the loop.
        }
    }

    /// `Release(MutexObject)`. A no-op (per spec, silently ignored) if the
    /// calling thread does not hold the mutex.
    fn do_release(&mut self, name: &str) -> AmlResult<()> {
        let node = self
            .namespace
            .resolve(&self.scope, name)
            .ok_or(AmlError::InvalidName)?;
        let owner = current_owner();
        let mut held = node.sync.mutex_owner.lock();
        if let Some((holder, depth)) = *held {
            if holder == owner {
                if depth > 1 {
                    *held = Some((holder, depth - 1));
                } else {
                    *held = None;
                    drop(held);
                    node.sync.blocker.unblock();
                }
            }
        }
        Ok(())
    }

    /// `Wait(EventObject, Timeout)`. Consumes one pending signal if
    /// available, else parks until `Signal` posts one or the timeout
    /// elapses. Returns `0` if signaled, `1` on timeout.
    fn do_wait(&mut self, name: &str, timeout_ms: u64) -> AmlResult<u64> {
        let node = self
            .namespace
            .resolve(&self.scope, name)
            .ok_or(AmlError::InvalidName)?;
        loop {
            let prev = node.sync.event_count.load(core::sync::atomic::Ordering::Acquire);
            if prev > 0
                && node
                    .sync
                    .event_count
                    .compare_exchange(
                        prev,
                        prev - 1,
                        core::sync::atomic::Ordering::AcqRel,
                        core::sync::atomic::Ordering::Acquire,
                    )
                    .is_ok()
            {
                return Ok(0);
            }
            let reason = if timeout_ms == 0xFFFF {
                node.sync.blocker.block_indefinite()
            } else {
                node.sync.blocker.block_with_timeout_ns(timeout_ms * 1_000_000)
            };
            if reason == crate::sched::WakeReason::TimedOut {
                return Ok(1);
            }
        }
    }

    /// `Signal(EventObject)`: posts one signal and wakes the longest-
    /// waiting `Wait`er, if any.
    fn do_signal(&mut self, name: &str) -> AmlResult<()> {
        let node = self
            .namespace
            .resolve(&self.scope, name)
            .ok_or(AmlError::InvalidName)?;
        node.sync
            .event_count
            .fetch_add(1, core::sync::atomic::Ordering::AcqRel);
        node.sync.blocker.unblock();
        Ok(())
    }

    /// `Reset(EventObject)`: clears the event's pending signal count.
    fn do_reset(&mut self, name: &str) -> AmlResult<()> {
        let node = self
            .namespace
            .resolve(&self.scope, name)
            .ok_or(AmlError::InvalidName)?;
        node.sync
            .event_count
            .store(0, core::sync::atomic::Ordering::Release);
        Ok(())
    }

    /// `Field`: `PkgLength NameString FieldFlags FieldElement*`, where each
    /// `FieldElement` is either a 4-char name plus a bit-width, or a
    /// reserved (unnamed) run of bits that just advances the bit cursor.
    fn exec_field(&mut self, cursor: &mut Cursor) -> AmlResult<()> {
        let len = cursor.package_length()?;
        let mut sub = cursor.sub_cursor(len)?;
        let region_name = sub.name_string()?;
        let region_path = self.namespace.normalize(&self.scope, &region_name);
        let flags = sub.next_byte()?;
        let access = access_type_from_flags(flags);

        let mut bit_offset = 0u64;
        while !sub.is_empty() {
            let tag = sub.peek()?;
            if tag == 0x00 {
                sub.next_byte()?;
                bit_offset += sub.field_bit_width()?;
            } else {
                let name = sub.name_seg_field()?;
                let width = sub.field_bit_width()?;
                let path = self.namespace.normalize(&self.scope, &name);
                let node = self.namespace.declare(&path, NodeKind::Field);
                *node.value.lock() = Value::FieldUnit(super::value::FieldUnit {
                    region_path: region_path.clone(),
                    bit_offset,
                    bit_width: width,
                    access,
                });
                bit_offset += width;
            }
        }
        Ok(())
    }

    fn eval_name_reference(&mut self, cursor: &mut Cursor) -> AmlResult<Value> {
        let name = cursor.name_string()?;
        let Some(node) = self.namespace.resolve(&self.scope, &name) else {
            return Ok(Value::Uninitialized);
        };
        if let NodeKind::Method { arg_count, .. } = node.kind() {
            let mut args = Vec::with_capacity(arg_count as usize);
            for _ in 0..arg_count {
                args.push(self.eval_term_arg(cursor)?);
            }
            let node_scope = self.namespace.normalize(&self.scope, &name);
            let parent_scope = parent_of(&node_scope);
            return Interpreter::invoke_method(self.namespace, &node, &parent_scope, args);
        }
        Ok(node.value.lock().clone())
    }

    fn eval_term_arg(&mut self, cursor: &mut Cursor) -> AmlResult<Value> {
        let first = cursor.peek()?;
        if is_name_start(first) {
            return self.eval_name_reference(cursor);
        }

        let opcode = cursor.next_byte()?;
        match opcode {
            opcodes::ZERO_OP => Ok(Value::Integer(0)),
            opcodes::ONE_OP => Ok(Value::Integer(1)),
            opcodes::ONES_OP => Ok(Value::Integer(u64::MAX)),
            opcodes::BYTE_PREFIX => Ok(Value::Integer(cursor.next_byte()? as u64)),
            opcodes::WORD_PREFIX => {
                let b = cursor.take(2)?;
                Ok(Value::Integer(u16::from_le_bytes([b[0], b[1]]) as u64))
            }
            opcodes::DWORD_PREFIX => {
                let b = cursor.take(4)?;
                Ok(Value::Integer(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64))
            }
            opcodes::QWORD_PREFIX => {
                let b = cursor.take(8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                Ok(Value::Integer(u64::from_le_bytes(arr)))
            }
            opcodes::STRING_PREFIX => {
                let mut bytes = Vec::new();
                loop {
                    let b = cursor.next_byte()?;
                    if b == 0 {
                        break;
                    }
                    bytes.push(b);
                }
                Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            }
            opcodes::BUFFER_OP => {
                let len = cursor.package_length()?;
                let mut sub = cursor.sub_cursor(len)?;
                let size = self.eval_term_arg(&mut sub)?.as_integer().unwrap_or(0) as usize;
                let mut data = sub.take_rest().to_vec();
                data.resize(size.max(data.len()), 0);
                Ok(Value::Buffer(data))
            }
            opcodes::PACKAGE_OP | opcodes::VAR_PACKAGE_OP => {
                let len = cursor.package_length()?;
                let mut sub = cursor.sub_cursor(len)?;
                if opcode == opcodes::PACKAGE_OP {
                    sub.next_byte()?; // fixed element count, informational
                } else {
                    self.eval_term_arg(&mut sub)?;
                }
                let mut elements = Vec::new();
                while !sub.is_empty() {
                    elements.push(Arc::new(Mutex::new(self.eval_term_arg(&mut sub)?)));
                }
                Ok(Value::Package(elements))
            }
            opcodes::LOCAL0..=opcodes::LOCAL7 => {
                let idx = (opcode - opcodes::LOCAL0) as usize;
                Ok(self.frame.as_ref().map(|f| f.locals[idx].clone()).unwrap_or(Value::Uninitialized))
            }
            opcodes::ARG0..=opcodes::ARG6 => {
                let idx = (opcode - opcodes::ARG0) as usize;
                Ok(self.frame.as_ref().map(|f| f.args[idx].clone()).unwrap_or(Value::Uninitialized))
            }
            opcodes::STORE_OP => {
                let src = self.eval_term_arg(cursor)?;
                let target = cursor.name_string()?;
                if !target.is_empty() {
                    self.store(&target, src.clone())?;
                }
                Ok(src)
            }
            opcodes::ADD_OP
            | opcodes::SUBTRACT_OP
            | opcodes::MULTIPLY_OP
            | opcodes::SHIFT_LEFT_OP
            | opcodes::SHIFT_RIGHT_OP
            | opcodes::AND_OP
            | opcodes::NAND_OP
            | opcodes::OR_OP
            | opcodes::NOR_OP
            | opcodes::XOR_OP
            | opcodes::MOD_OP => self.eval_binary_integer_op(opcode, cursor),
            opcodes::NOT_OP => {
                let a = self.eval_integer(cursor)?;
                let target = cursor.name_string()?;
                let result = !a;
                if !target.is_empty() {
                    self.store(&target, Value::Integer(result))?;
                }
                Ok(Value::Integer(result))
            }
            opcodes::INCREMENT_OP | opcodes::DECREMENT_OP => {
                let name = cursor.name_string()?;
                let current = self.load(&name)?.as_integer().unwrap_or(0);
                let next = if opcode == opcodes::INCREMENT_OP {
                    current.wrapping_add(1)
                } else {
                    current.wrapping_sub(1)
                };
                self.store(&name, Value::Integer(next))?;
                Ok(Value::Integer(next))
            }
            opcodes::L_AND_OP => {
                let a = self.eval_integer(cursor)?;
                let b = self.eval_integer(cursor)?;
                Ok(Value::Integer(((a != 0) && (b != 0)) as u64))
            }
            opcodes::L_OR_OP => {
                let a = self.eval_integer(cursor)?;
                let b = self.eval_integer(cursor)?;
                Ok(Value::Integer(((a != 0) || (b != 0)) as u64))
            }
            opcodes::L_NOT_OP => {
                let a = self.eval_integer(cursor)?;
                Ok(Value::Integer((a == 0) as u64))
            }
            opcodes::L_EQUAL_OP | opcodes::L_GREATER_OP | opcodes::L_LESS_OP => {
                let a = self.eval_integer(cursor)?;
                let b = self.eval_integer(cursor)?;
                let result = match opcode {
                    opcodes::L_EQUAL_OP => a == b,
                    opcodes::L_GREATER_OP => a > b,
                    _ => a < b,
                };
                Ok(Value::Integer(result as u64))
            }
            opcodes::SIZE_OF_OP => {
                let name = cursor.name_string()?;
                let val = self.load(&name)?;
                Ok(Value::Integer(val.size_of().unwrap_or(0)))
            }
            opcodes::OBJECT_TYPE_OP => {
                let name = cursor.name_string()?;
                let val = self.load(&name)?;
                Ok(Value::Integer(object_type_code(&val)))
            }
            opcodes::REF_OF_OP => {
                let name = cursor.name_string()?;
                let path = self.namespace.normalize(&self.scope, &name);
                Ok(Value::Reference(Reference { path }))
            }
            opcodes::DEREF_OF_OP => {
                let v = self.eval_term_arg(cursor)?;
                match v {
                    Value::Reference(r) => self.load(&r.path),
                    other => Ok(other),
                }
            }
            opcodes::INDEX_OP => {
                let src = self.eval_term_arg(cursor)?;
                let idx = self.eval_integer(cursor)? as usize;
                let target = cursor.name_string()?;
                let result = match &src {
                    Value::Package(p) => p.get(idx).map(|v| v.lock().clone()).unwrap_or(Value::Uninitialized),
                    Value::Buffer(b) => b.get(idx).map(|byte| Value::Integer(*byte as u64)).unwrap_or(Value::Uninitialized),
                    _ => Value::Uninitialized,
                };
                if !target.is_empty() {
                    self.store(&target, result.clone())?;
                }
                Ok(result)
            }
            opcodes::COPY_OBJECT_OP => {
                let v = self.eval_term_arg(cursor)?;
                let target = cursor.name_string()?;
                if !target.is_empty() {
                    self.store(&target, v.clone())?;
                }
                Ok(v)
            }
            opcodes::TO_BUFFER_OP | opcodes::TO_HEX_STRING_OP | opcodes::TO_DEC_STRING_OP | opcodes::TO_INTEGER_OP | opcodes::TO_STRING_OP => {
                let v = self.eval_term_arg(cursor)?;
                let target = cursor.name_string()?;
                let mask = match opcode {
                    opcodes::TO_BUFFER_OP => conv::BUFFER,
                    opcodes::TO_INTEGER_OP => conv::INTEGER,
                    _ => conv::STRING,
                };
                let converted = v.convert(mask).unwrap_or(Value::Uninitialized);
                if !target.is_empty() {
                    self.store(&target, converted.clone())?;
                }
                Ok(converted)
            }
            opcodes::NOTIFY_OP => {
                let name = cursor.name_string()?;
                let value = self.eval_integer(cursor)?;
                println!("[ACPI] Notify({}, {:#x})", name, value);
                Ok(Value::Integer(0))
            }
            opcodes::EXT_OP_PREFIX => {
                let ext = cursor.next_byte()?;
                self.eval_ext_expr(ext, cursor)
            }
            other => Err(AmlError::UnknownOpcode(other)),
        }
    }

    fn eval_ext_expr(&mut self, ext: u8, cursor: &mut Cursor) -> AmlResult<Value> {
        match ext {
            opcodes::EXT_ACQUIRE_OP => {
                let mutex = cursor.name_string()?;
                let timeout = cursor.take(2)?;
                let timeout_ms = u16::from_le_bytes([timeout[0], timeout[1]]);
                Ok(Value::Integer(self.do_acquire(&mutex, timeout_ms)?))
            }
            opcodes::EXT_RELEASE_OP => {
                let mutex = cursor.name_string()?;
                self.do_release(&mutex)?;
                Ok(Value::Integer(0))
            }
            opcodes::EXT_WAIT_OP => {
                let event = cursor.name_string()?;
                let timeout_ms = self.eval_term_arg(cursor)?.as_integer().unwrap_or(0xFFFF);
                Ok(Value::Integer(self.do_wait(&event, timeout_ms)?))
            }
            opcodes::EXT_SIGNAL_OP => {
                let event = cursor.name_string()?;
                self.do_signal(&event)?;
                Ok(Value::Integer(0))
            }
            opcodes::EXT_RESET_OP => {
                let event = cursor.name_string()?;
                self.do_reset(&event)?;
                Ok(Value::Integer(0))
            }
            opcodes::EXT_COND_REF_OF_OP => {
                let name = cursor.name_string()?;
                let found = self.namespace.resolve(&self.scope, &name).is_some();
                Ok(Value::Integer(found as u64))
            }
            opcodes::EXT_REVISION_OP => Ok(Value::Integer(2)),
            opcodes::EXT_DEBUG_OP => Ok(Value::Uninitialized),
            other => Err(AmlError::UnknownOpcode(other)),
        }
    }

    fn eval_binary_integer_op(&mut self, opcode: u8, cursor: &mut Cursor) -> AmlResult<Value> {
        let a = self.eval_integer(cursor)?;
        let b = self.eval_integer(cursor)?;
        let target = cursor.name_string()?;
        let result = match opcode {
            opcodes::ADD_OP => a.wrapping_add(b),
            opcodes::SUBTRACT_OP => a.wrapping_sub(b),
            opcodes::MULTIPLY_OP => a.wrapping_mul(b),
            opcodes::SHIFT_LEFT_OP => a.wrapping_shl(b as u32),
            opcodes::SHIFT_RIGHT_OP => a.wrapping_shr(b as u32),
            opcodes::AND_OP => a & b,
            opcodes::NAND_OP => !(a & b),
            opcodes::OR_OP => a | b,
            opcodes::NOR_OP => !(a | b),
            opcodes::XOR_OP => a ^ b,
            opcodes::MOD_OP => {
                if b == 0 {
                    0
                } else {
                    a % b
                }
            }
            _ => unreachable!(),
        };
        if !target.is_empty() {
            self.store(&target, Value::Integer(result))?;
        }
        Ok(Value::Integer(result))
    }

    fn eval_integer(&mut self, cursor: &mut Cursor) -> AmlResult<u64> {
        Ok(self.eval_term_arg(cursor)?.as_integer().unwrap_or(0))
    }

    fn load(&mut self, name: &str) -> AmlResult<Value> {
        match name {
            "" => Ok(Value::Uninitialized),
            _ if is_local_or_arg(name) => Ok(Value::Uninitialized),
            _ => Ok(self
                .namespace
                .resolve(&self.scope, name)
                .map(|n| n.value.lock().clone())
                .unwrap_or(Value::Uninitialized)),
        }
    }

    fn store(&mut self, name: &str, value: Value) -> AmlResult<()> {
        let path = self.namespace.normalize(&self.scope, name);
        let node = self.namespace.declare(&path, NodeKind::Name);
        *node.value.lock() = value;
        Ok(())
    }
}

fn is_local_or_arg(name: &str) -> bool {
    name.len() == 1 && matches!(name.as_bytes()[0], b'0'..=b'9')
}

fn is_name_start(byte: u8) -> bool {
    byte == b'\\' || byte == b'^' || byte == b'_' || byte.is_ascii_uppercase() || byte == opcodes::DUAL_NAME_PREFIX || byte == opcodes::MULTI_NAME_PREFIX
}

fn parent_of(path: &str) -> String {
    match path.rfind('.') {
        Some(idx) => path[..idx].into(),
        None => "\\".into(),
    }
}

fn access_type_from_flags(flags: u8) -> super::value::AccessType {
    match flags & 0x0F {
        1 => super::value::AccessType::Byte,
        2 => super::value::AccessType::Word,
        3 => super::value::AccessType::DWord,
        4 => super::value::AccessType::QWord,
        5 => super::value::AccessType::Buffer,
        _ => super::value::AccessType::Any,
    }
}

fn region_info(space: RegionSpace, offset: u64, length: u64) -> super::value::RegionInfo {
    let space = match space {
        RegionSpace::SystemMemory => 0,
        RegionSpace::SystemIo => 1,
        RegionSpace::PciConfig => 2,
        RegionSpace::EmbeddedControl => 3,
        RegionSpace::SmBus => 4,
        RegionSpace::GeneralPurposeIo => 8,
        RegionSpace::GenericSerialBus => 9,
        RegionSpace::Other(v) => v,
    };
    super::value::RegionInfo { space, offset, length }
}

/// ACPI `ObjectType` return codes (Table 19-10 in the ACPI spec).
fn object_type_code(value: &Value) -> u64 {
    match value {
        Value::Uninitialized => 0,
        Value::Integer(_) => 1,
        Value::String(_) => 2,
        Value::Buffer(_) => 3,
        Value::Package(_) => 4,
        Value::FieldUnit(_) => 5,
        Value::Register(_) => 10,
        Value::Reference(_) => 14,
    }
}

pub fn to_kernel_error(e: AmlError) -> KernelError {
    match e {
        AmlError::UnexpectedEnd | AmlError::InvalidPkgLength | AmlError::InvalidName => {
            KernelError::InvalidArgument { name: "AML", value: "malformed table" }
        }
        AmlError::UnknownOpcode(_) => KernelError::NotImplemented { feature: "AML opcode" },
    }
}

pub fn load_table(namespace: &Namespace, aml: &[u8]) -> KernelResult<()> {
    let _guard = GLOBAL_LOCK.write();
    Interpreter::load_table(namespace, aml).map_err(to_kernel_error)
}

/// Evaluate a name by absolute path. Plain `Name` declarations (the common
/// way a device exposes a static `_HID`) just return their stored value;
/// only `Method` nodes actually run their body.
pub fn call_method(namespace: &Namespace, path: &str, args: Vec<Value>) -> KernelResult<Value> {
    let _guard = GLOBAL_LOCK.read();
    let node = namespace
        .resolve("\\", path)
        .ok_or(KernelError::NotFound { resource: "AML method" })?;
    if !matches!(node.kind(), NodeKind::Method { .. }) {
        return Ok(node.value.lock().clone());
    }
    let scope = parent_of(path);
    Interpreter::invoke_method(namespace, &node, &scope, args).map_err(to_kernel_error)
}
