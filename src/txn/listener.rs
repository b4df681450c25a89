use crate::error::ParticipantError;

/// Callbacks around the completion of a transaction.
///
/// `before_completion` runs before any participant is prepared; an error
/// aborts the transaction. `after_completion` runs once the transaction is
/// committed or aborted; its errors are only logged.
pub trait TransactionListener: Send + Sync {
    fn before_completion(&self) -> Result<(), ParticipantError>;

    fn after_completion(&self, committed: bool) -> Result<(), ParticipantError>;

    fn type_name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
