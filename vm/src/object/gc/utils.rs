use itertools::Itertools;

/// Why an identity stopped being recognizable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireCause {
    /// the peer sent retireExports
    Peer,
    /// the vat collected an object the peer could still recognize
    Collected,
}

/// Emitted exactly once per identity whose recognizability ends. Weak
/// collection entries keyed on `vref` are already gone when this is seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retirement {
    pub vref: String,
    pub cause: RetireCause,
}

/// GC signals the vat sends to its kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcSyscall {
    DropImports(Vec<String>),
    RetireImports(Vec<String>),
    RetireExports(Vec<String>),
}

/// What one end-of-delivery sweep did. Every list is in processing order,
/// which is sorted by identity string within each pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// baseRefs whose state was deleted
    pub collected: Vec<String>,
    pub retired_exports: Vec<String>,
    pub dropped_imports: Vec<String>,
    pub retired_imports: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.collected.is_empty()
            && self.retired_exports.is_empty()
            && self.dropped_imports.is_empty()
            && self.retired_imports.is_empty()
    }

    /// The syscalls this sweep owes the kernel, one sorted batch per kind.
    pub fn syscalls(&self) -> Vec<GcSyscall> {
        let sorted = |vrefs: &[String]| vrefs.iter().cloned().sorted().collect();
        let mut out = Vec::new();
        if !self.dropped_imports.is_empty() {
            out.push(GcSyscall::DropImports(sorted(&self.dropped_imports)));
        }
        if !self.retired_imports.is_empty() {
            out.push(GcSyscall::RetireImports(sorted(&self.retired_imports)));
        }
        if !self.retired_exports.is_empty() {
            out.push(GcSyscall::RetireExports(sorted(&self.retired_exports)));
        }
        out
    }
}

impl From<&SweepReport> for (usize, usize) {
    fn from(r: &SweepReport) -> Self {
        (r.collected.len(), r.retired_exports.len())
    }
}
