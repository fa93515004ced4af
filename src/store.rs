//! sled persistence. Each entity is stored with its full history as one
//! CBOR value so an action reads and writes a single key.
use std::sync::Arc;

use sled::Tree;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError, TransactionResult,
    TransactionalTree,
};

use crate::authz::AllowlistEntry;
use crate::context::{EventContext, RequestContext};
use crate::error::WorkflowError;
use crate::variant::Track;

pub fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, WorkflowError> {
    minicbor::to_vec(value).map_err(|e| WorkflowError::Codec(e.to_string()))
}

pub fn decode<T>(bytes: &[u8]) -> Result<T, WorkflowError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| WorkflowError::Codec(e.to_string()))
}

pub(crate) fn abort(err: WorkflowError) -> ConflictableTransactionError<WorkflowError> {
    ConflictableTransactionError::Abort(err)
}

pub(crate) fn tx_load<T>(tree: &TransactionalTree, id: &str, kind: &'static str) -> ConflictableTransactionResult<T, WorkflowError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(id.as_bytes())? {
        Some(bytes) => decode(&bytes).map_err(abort),
        None => Err(abort(WorkflowError::NotFound {
            kind,
            id: id.to_string(),
        })),
    }
}

pub(crate) fn tx_save<T: minicbor::Encode<()>>(
    tree: &TransactionalTree,
    id: &str,
    value: &T,
) -> ConflictableTransactionResult<(), WorkflowError> {
    let bytes = encode(value).map_err(abort)?;
    tree.insert(id.as_bytes(), bytes)?;
    Ok(())
}

/// Unwraps a finished transaction into the crate error.
pub(crate) fn finish<T>(result: TransactionResult<T, WorkflowError>) -> Result<T, WorkflowError> {
    result.map_err(|err| match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => WorkflowError::Storage(err),
    })
}

fn allowlist_key(track: Track, level: u32) -> String {
    let track = match track {
        Track::Approval => "approval",
        Track::Signing => "signing",
    };
    format!("{track}/{level}")
}

pub struct Store {
    pub(crate) requests: Tree,
    pub(crate) events: Tree,
    pub(crate) counters: Tree,
    pub(crate) numbers: Tree,
    allowlists: Tree,
}

impl Store {
    pub fn open(instance: Arc<sled::Db>) -> Result<Self, WorkflowError> {
        Ok(Self {
            requests: instance.open_tree("requests")?,
            events: instance.open_tree("events")?,
            counters: instance.open_tree("counters")?,
            numbers: instance.open_tree("numbers")?,
            allowlists: instance.open_tree("allowlists")?,
        })
    }

    fn load<T>(tree: &Tree, id: &str, kind: &'static str) -> Result<T, WorkflowError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match tree.get(id.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(WorkflowError::NotFound {
                kind,
                id: id.to_string(),
            }),
        }
    }

    fn scan<T>(tree: &Tree) -> Result<Vec<T>, WorkflowError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        tree.iter().values().map(|v| decode(&v?)).collect()
    }

    pub fn load_request(&self, id: &str) -> Result<RequestContext, WorkflowError> {
        Self::load(&self.requests, id, "request")
    }

    pub fn load_event(&self, id: &str) -> Result<EventContext, WorkflowError> {
        Self::load(&self.events, id, "event")
    }

    pub fn insert_request(&self, context: &RequestContext) -> Result<(), WorkflowError> {
        self.requests
            .insert(context.request.id.as_bytes(), encode(context)?)?;
        Ok(())
    }

    pub fn requests(&self) -> Result<Vec<RequestContext>, WorkflowError> {
        Self::scan(&self.requests)
    }

    pub fn events(&self) -> Result<Vec<EventContext>, WorkflowError> {
        Self::scan(&self.events)
    }

    pub fn allowlist(&self, track: Track, level: u32) -> Result<Vec<AllowlistEntry>, WorkflowError> {
        match self.allowlists.get(allowlist_key(track, level))? {
            Some(bytes) => decode(&bytes),
            None => Ok(Vec::new()),
        }
    }

    pub fn set_allowlist(&self, track: Track, level: u32, entries: &[AllowlistEntry]) -> Result<(), WorkflowError> {
        self.allowlists
            .insert(allowlist_key(track, level), encode(&entries.to_vec())?)?;
        Ok(())
    }

    /// The request a number was issued to, if any.
    pub fn number_owner(&self, number: &str) -> Result<Option<String>, WorkflowError> {
        Ok(self
            .numbers
            .get(number.as_bytes())?
            .map(|owner| String::from_utf8_lossy(&owner).into_owned()))
    }
}
