//! Process and VM configuration

use serde::Deserialize;

use crate::callback::Callback;

/// Options consumed once by [`init`](crate::init)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InitOptions {
    /// Engine flags, e.g. `--expose-gc` or `--max-call-depth=128`
    pub flags: Vec<String>,
    /// Strip recognized flags from the list handed back by `init`
    pub remove_flags: bool,
}

impl InitOptions {
    /// Options with the given flags
    pub fn with_flags<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            flags: flags.into_iter().map(Into::into).collect(),
            remove_flags: false,
        }
    }

    /// Strip recognized flags
    pub fn remove_flags(mut self, remove: bool) -> Self {
        self.remove_flags = remove;
        self
    }
}

/// Options for [`Vm::create`](crate::Vm::create)
///
/// Generation sizes are in bytes. Unset sizes use the engine defaults.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct VmOptions {
    /// Hard heap limit per environment; breaching it is an out-of-memory condition
    pub max_old_generation_size: Option<usize>,
    /// Upper bound of the collection trigger
    pub max_young_generation_size: Option<usize>,
    /// Pre-sizes the heap slot table
    pub initial_old_generation_size: Option<usize>,
    /// Heap size that triggers the first collection
    pub initial_young_generation_size: Option<usize>,
    /// Bound of the macrotask queue
    pub max_pending_tasks: Option<usize>,
    /// Startup snapshot produced by [`Vm::create_snapshot`](crate::Vm::create_snapshot)
    #[serde(skip)]
    pub snapshot_blob: Option<Vec<u8>>,
    /// Native functions a snapshot may refer to, matched by identity
    #[serde(skip)]
    pub external_references: Vec<Callback>,
}

impl std::fmt::Debug for VmOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmOptions")
            .field("max_old_generation_size", &self.max_old_generation_size)
            .field("max_young_generation_size", &self.max_young_generation_size)
            .field("initial_old_generation_size", &self.initial_old_generation_size)
            .field(
                "initial_young_generation_size",
                &self.initial_young_generation_size,
            )
            .field("max_pending_tasks", &self.max_pending_tasks)
            .field("snapshot_blob", &self.snapshot_blob.as_ref().map(Vec::len))
            .field("external_references", &self.external_references.len())
            .finish()
    }
}

/// Default collection trigger: 1 MB
pub const DEFAULT_INITIAL_YOUNG: usize = 1024 * 1024;
/// Default trigger ceiling: 16 MB
pub const DEFAULT_MAX_YOUNG: usize = 16 * 1024 * 1024;
/// Default hard heap limit: 512 MB
pub const DEFAULT_MAX_OLD: usize = 512 * 1024 * 1024;
/// Default macrotask queue bound
pub const DEFAULT_MAX_PENDING_TASKS: usize = 1024;

/// Approximate size of one heap slot, used to turn byte hints into slot counts
pub(crate) const SLOT_SIZE_HINT: usize = 128;

impl VmOptions {
    /// Set the hard heap limit
    pub fn max_old_generation_size(mut self, bytes: usize) -> Self {
        self.max_old_generation_size = Some(bytes);
        self
    }

    /// Set the collection trigger ceiling
    pub fn max_young_generation_size(mut self, bytes: usize) -> Self {
        self.max_young_generation_size = Some(bytes);
        self
    }

    /// Set the initial heap reservation
    pub fn initial_old_generation_size(mut self, bytes: usize) -> Self {
        self.initial_old_generation_size = Some(bytes);
        self
    }

    /// Set the first collection trigger
    pub fn initial_young_generation_size(mut self, bytes: usize) -> Self {
        self.initial_young_generation_size = Some(bytes);
        self
    }

    /// Set the macrotask queue bound
    pub fn max_pending_tasks(mut self, tasks: usize) -> Self {
        self.max_pending_tasks = Some(tasks);
        self
    }

    /// Start from a snapshot blob
    pub fn snapshot_blob(mut self, blob: Vec<u8>) -> Self {
        self.snapshot_blob = Some(blob);
        self
    }

    /// Register native functions a snapshot may refer to
    pub fn external_references(mut self, refs: Vec<Callback>) -> Self {
        self.external_references = refs;
        self
    }
}

/// Resolved heap limits for one VM
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeapLimits {
    pub hard_limit: usize,
    pub initial_trigger: usize,
    pub max_trigger: usize,
    pub initial_slots: usize,
}

impl HeapLimits {
    pub(crate) fn resolve(options: &VmOptions, process_default: Option<usize>) -> Self {
        let initial_trigger = options
            .initial_young_generation_size
            .unwrap_or(DEFAULT_INITIAL_YOUNG)
            .max(1);
        let max_trigger = options
            .max_young_generation_size
            .unwrap_or(DEFAULT_MAX_YOUNG)
            .max(initial_trigger);
        let hard_limit = options
            .max_old_generation_size
            .or(process_default)
            .unwrap_or(DEFAULT_MAX_OLD);
        let initial_slots = options.initial_old_generation_size.unwrap_or(0) / SLOT_SIZE_HINT;
        Self {
            hard_limit,
            initial_trigger,
            max_trigger,
            initial_slots,
        }
    }
}
