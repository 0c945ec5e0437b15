//! Transaction control.
//!
//! The server keeps one implicit transaction per connection; requests are
//! never tagged with a transaction id. The client mirrors that state so it
//! can refuse a nested `begin` locally and so the scoped helper knows what to
//! undo.

use crate::client::Client;
use crate::error::ClientError;
use oxidb_protocol::{BeginTxResult, Command, Request};
use std::fmt;
use std::future::Future;

/// The client's view of the server-side transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Idle,
    Active,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Idle => write!(f, "idle"),
            TransactionState::Active => write!(f, "active"),
        }
    }
}

impl Client {
    /// Starts a transaction.
    ///
    /// Fails with [`ClientError::TransactionAlreadyActive`] without contacting
    /// the server if one is already active on this connection.
    pub async fn begin_transaction(&self) -> Result<BeginTxResult, ClientError> {
        let conn = self.connection();
        if !conn.reserve_transaction() {
            return Err(ClientError::TransactionAlreadyActive);
        }

        match self.call_as(Request::new(Command::BeginTx)).await {
            Ok(result) => Ok(result),
            Err(e) => {
                conn.set_transaction_state(TransactionState::Idle);
                Err(e)
            }
        }
    }

    /// Commits the active transaction.
    ///
    /// Always sent, even if the client believes no transaction is active.
    /// The state is `Idle` afterwards whether or not the commit succeeded.
    pub async fn commit_transaction(&self) -> Result<(), ClientError> {
        let result = self.call(Request::new(Command::CommitTx)).await;
        self.connection().set_transaction_state(TransactionState::Idle);
        result.map(|_| ())
    }

    /// Rolls back the active transaction.
    pub async fn rollback_transaction(&self) -> Result<(), ClientError> {
        let result = self.call(Request::new(Command::RollbackTx)).await;
        self.connection().set_transaction_state(TransactionState::Idle);
        result.map(|_| ())
    }

    /// Runs `body` inside a transaction.
    ///
    /// Commits if `body` returns `Ok`. If `body` or the commit fails, the
    /// transaction is rolled back and the original error is returned; a
    /// failing rollback is logged and otherwise ignored. Rollback is skipped
    /// when the connection is already closed.
    ///
    /// `body` receives a clone of this client, sharing the connection.
    ///
    /// ```no_run
    /// # use oxidb_client::{Client, ClientError};
    /// # use serde_json::json;
    /// # async fn example(client: Client) -> Result<(), ClientError> {
    /// client
    ///     .transaction(|tx| async move {
    ///         tx.insert("orders", json!({"item": "book"})).await?;
    ///         tx.insert("ledger", json!({"amount": 12})).await?;
    ///         Ok::<_, ClientError>(())
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn transaction<F, Fut, T, E>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ClientError>,
    {
        self.begin_transaction().await?;

        let err = match body(self.clone()).await {
            Ok(value) => match self.commit_transaction().await {
                Ok(()) => return Ok(value),
                Err(e) => E::from(e),
            },
            Err(e) => e,
        };

        self.abort_transaction().await;
        Err(err)
    }

    async fn abort_transaction(&self) {
        let conn = self.connection();
        if !conn.is_open() {
            conn.set_transaction_state(TransactionState::Idle);
            return;
        }
        if let Err(e) = self.rollback_transaction().await {
            tracing::warn!(error = %e, "rollback after failed transaction also failed");
        }
    }

    /// Returns the client's view of the transaction state.
    pub fn transaction_state(&self) -> TransactionState {
        self.connection().transaction_state()
    }

    /// Returns whether a transaction is active on this connection.
    pub fn in_transaction(&self) -> bool {
        self.transaction_state() == TransactionState::Active
    }
}
