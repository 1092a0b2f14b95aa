//! Transaction contracts - the coordinator's view of a transaction
//!
//! Transactions are created, committed, and aborted by a coordinator
//! outside this crate. The access coordinator only needs identity,
//! timing, the abort hook, and a way to hear about completion, so that is
//! all the trait asks for.

use crate::AccessError;

#[cfg(test)]
pub(crate) mod testing;

/// Transaction identity as raw bytes
pub type TxnId = Vec<u8>;

/// The transaction handle consumed by the access coordinator.
///
/// Times are wall-clock milliseconds. `abort` is the transaction
/// coordinator's hook; calling it must eventually complete the
/// transaction and fire its completion listeners with `committed =
/// false`.
pub trait Transaction: Send + Sync {
    /// Unique transaction id
    fn id(&self) -> &[u8];

    /// When the transaction was created, in milliseconds
    fn creation_time(&self) -> u64;

    /// How long the transaction may run, in milliseconds
    fn timeout(&self) -> u64;

    /// Aborts the transaction with the given cause
    fn abort(&self, cause: &AccessError);

    /// Registers a listener fired after the transaction completes and
    /// every participant has finished
    fn register_completion_listener(&self, listener: Box<dyn CompletionListener>);
}

/// Callback fired once a transaction has fully completed.
///
/// Listeners run after all participants have seen the final outcome,
/// which is what lets the access coordinator release locks without
/// breaking read-your-writes during the commit phase.
pub trait CompletionListener: Send + Sync {
    fn after_completion(&self, committed: bool);
}
