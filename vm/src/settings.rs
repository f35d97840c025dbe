/// Knobs for one vat's virtual object layer.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Largest serialized body accepted for a single state property or an
    /// outbound payload.
    pub max_capdata_size: usize,

    /// Let durable kinds store references to ephemeral objects.
    pub relax_durability_rules: bool,

    /// Record every backing store operation in the `MemoryStore` op log.
    pub log_store_ops: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            max_capdata_size: 16 * 1024,
            relax_durability_rules: false,
            log_store_ops: false,
        }
    }
}
