//! Per-call options.
//!
//! [`CallOptions`] is a plain value built fluently and handed to exactly one
//! terminal operation. Nothing is stored on the repository, so concurrent
//! callers sharing a repository never see each other's settings.

use backend_traits::{BackendOptions, TransactionId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub transaction: Option<TransactionId>,
    pub related: Vec<String>,
    pub require: bool,
    pub debug: bool,
    pub include_removed: bool,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the call inside `transaction`
    pub fn with_transaction(mut self, transaction: TransactionId) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Append relation names to eager-load
    pub fn with_related<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related.extend(names.into_iter().map(Into::into));
        self
    }

    /// Replace the relation names to eager-load
    pub fn replace_related<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related = names.into_iter().map(Into::into).collect();
        self
    }

    /// Turn an empty result into `NotFound`
    pub fn require(mut self, require: bool) -> Self {
        self.require = require;
        self
    }

    /// Log backend calls at info level
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Show soft-deleted rows alongside live ones
    pub fn include_removed(mut self, include: bool) -> Self {
        self.include_removed = include;
        self
    }

    /// Options for the backend call, with strictness set explicitly
    pub(crate) fn backend(&self, require: bool) -> BackendOptions {
        BackendOptions {
            require,
            debug: self.debug,
            transaction: self.transaction,
        }
    }
}
