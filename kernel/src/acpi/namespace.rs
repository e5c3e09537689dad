//! AML namespace tree.
//!
//! ACPI names are 4-character segments (`NameSeg`) joined into dotted
//! paths with `\` as the root and `^` as "one level up". The namespace is
//! populated by the interpreter's first pass over DSDT/SSDT (declarations
//! create nodes; `Method` bodies are stashed unevaluated) and then walked
//! again whenever a method runs or a `_STA`/`_HID`/`_CRS`-style control
//! method fires.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};

use core::sync::atomic::AtomicU32;

use spin::{Mutex, RwLock};

use super::value::Value;
use crate::{process::ProcessId, sched::ThreadBlocker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Scope,
    Device,
    Method { arg_count: u8, serialized: bool },
    Name,
    OpRegion,
    Field,
    Mutex,
    Event,
    Processor,
    PowerResource,
    ThermalZone,
}

/// Runtime synchronization state for `Mutex`/`Event` nodes. Present on
/// every node (cheap -- an empty queue and a couple of words) but only
/// touched by `EXT_ACQUIRE_OP`/`EXT_RELEASE_OP`/`EXT_WAIT_OP`/
/// `EXT_SIGNAL_OP`/`EXT_RESET_OP` against nodes of the matching kind.
pub struct NodeSync {
    /// `(owning thread, recursive-acquire depth)` for a `Mutex` node.
    pub mutex_owner: Mutex<Option<(ProcessId, u32)>>,
    /// Pending signal count for an `Event` node.
    pub event_count: AtomicU32,
    /// Threads parked in `Acquire`/`Wait` on this node.
    pub blocker: ThreadBlocker,
}

impl NodeSync {
    fn new() -> Self {
        Self {
            mutex_owner: Mutex::new(None),
            event_count: AtomicU32::new(0),
            blocker: ThreadBlocker::new(),
        }
    }
}

/// A single entry in the namespace tree.
pub struct Node {
    pub name: String,
    pub kind: Mutex<NodeKind>,
    pub value: Mutex<Value>,
    /// Raw AML term list for a `Method`, evaluated lazily on invocation.
    pub aml_body: Mutex<Vec<u8>>,
    pub children: RwLock<BTreeMap<String, Arc<Node>>>,
    pub sync: NodeSync,
}

impl Node {
    fn new(name: String, kind: NodeKind) -> Arc<Node> {
        Arc::new(Node {
            name,
            kind: Mutex::new(kind),
            value: Mutex::new(Value::Uninitialized),
            aml_body: Mutex::new(Vec::new()),
            children: RwLock::new(BTreeMap::new()),
            sync: NodeSync::new(),
        })
    }

    pub fn kind(&self) -> NodeKind {
        *self.kind.lock()
    }

    pub fn set_method_body(&self, arg_count: u8, serialized: bool, body: Vec<u8>) {
        *self.kind.lock() = NodeKind::Method { arg_count, serialized };
        *self.aml_body.lock() = body;
    }
}

/// Owns the whole tree, rooted at `\`.
pub struct Namespace {
    pub root: Arc<Node>,
}

impl Namespace {
    pub fn new() -> Self {
        Self {
            root: Node::new(String::from("\\"), NodeKind::Scope),
        }
    }

    /// Create (or return the existing) node at an absolute or
    /// root-relative dotted path, creating intermediate scopes as needed.
    pub fn declare(&self, path: &str, kind: NodeKind) -> Arc<Node> {
        let segments = split_path(path);
        let mut current = self.root.clone();
        for (i, seg) in segments.iter().enumerate() {
            let is_last = i == segments.len() - 1;
            let next = {
                let children = current.children.read();
                children.get(seg).cloned()
            };
            current = match next {
                Some(node) => {
                    if is_last {
                        *node.kind.lock() = kind;
                    }
                    node
                }
                None => {
                    let node = Node::new(seg.clone(), if is_last { kind } else { NodeKind::Scope });
                    current.children.write().insert(seg.clone(), node.clone());
                    node
                }
            };
        }
        current
    }

    /// Resolve a name using the ACPI search rules: try the path relative
    /// to `scope`, then walk upward through each enclosing scope until the
    /// root is reached (single-segment names only; multi-segment names are
    /// resolved from the root or from `scope` directly, matching how DSDT
    /// bytecode typically references `_SB.PCI0...`-style paths).
    pub fn resolve(&self, scope: &str, name: &str) -> Option<Arc<Node>> {
        let (up, rest) = strip_carets(name);
        if rest.starts_with('\\') || up > 0 || rest.contains('.') {
            return self.lookup_absolute(&normalize(scope, name));
        }

        // Plain single-segment name: search this scope then each ancestor.
        let mut search_scope = scope.to_string();
        loop {
            let candidate = join(&search_scope, rest);
            if let Some(node) = self.lookup_absolute(&candidate) {
                return Some(node);
            }
            if search_scope == "\\" {
                return None;
            }
            search_scope = ascend(&search_scope, 1);
        }
    }

    /// Compute the absolute path a declaration's `NameString` refers to,
    /// without requiring the target to already exist (used for `Name`/
    /// `Scope`/`Device`/`Method` declarations and `Store` targets).
    pub fn normalize(&self, scope: &str, name: &str) -> String {
        normalize(scope, name)
    }

    fn lookup_absolute(&self, path: &str) -> Option<Arc<Node>> {
        let segments = split_path(path);
        let mut current = self.root.clone();
        for seg in segments {
            let next = current.children.read().get(&seg).cloned()?;
            current = next;
        }
        Some(current)
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.trim_start_matches('\\')
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn strip_carets(name: &str) -> (u32, &str) {
    let mut up = 0;
    let mut rest = name;
    while let Some(stripped) = rest.strip_prefix('^') {
        up += 1;
        rest = stripped;
    }
    (up, rest)
}

fn normalize(scope: &str, name: &str) -> String {
    if let Some(rest) = name.strip_prefix('\\') {
        return join("\\", rest);
    }
    let (up, rest) = strip_carets(name);
    let base = ascend(scope, up);
    join(&base, rest)
}

fn ascend(scope: &str, levels: u32) -> String {
    let mut segments = split_path(scope);
    for _ in 0..levels {
        segments.pop();
    }
    if segments.is_empty() {
        String::from("\\")
    } else {
        alloc::format!("\\{}", segments.join("."))
    }
}

fn join(scope: &str, name: &str) -> String {
    let mut segments = split_path(scope);
    segments.extend(split_path(name));
    if segments.is_empty() {
        String::from("\\")
    } else {
        alloc::format!("\\{}", segments.join("."))
    }
}
