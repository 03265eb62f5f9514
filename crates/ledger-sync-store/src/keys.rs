//! Well-known store key constants.

/// Store keys used by the sync layer
pub struct StoreKeys;

impl StoreKeys {
    /// Transient sync event, visible to all contexts until cleanup
    pub const SYNC_EVENT: &'static str = "ledger_sync_event";

    /// Mutual-exclusion lock record (JSON)
    pub const SYNC_LOCK: &'static str = "ledger_sync_lock";

    /// Monotonically increasing data version counter
    pub const DATA_VERSION: &'static str = "ledger_sync_data_version";

    /// Timestamp stamped when cached transaction data must be refetched
    pub const TRANSACTIONS_DIRTY: &'static str = "ledger_transactions_dirty";
}
