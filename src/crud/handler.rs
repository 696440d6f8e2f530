//! CRUD operations bound to one collection and one validator.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::store::{Collection, Document, RecordId, StoreError};
use crate::validator::{FieldError, Validator};

/// Base fields the adapter maintains on every record.
pub const CREATED_AT: &str = "createdAt";
pub const MODIFIED_AT: &str = "modifiedAt";
pub const IS_DELETED: &str = "isDeleted";
pub const DELETED_AT: &str = "deletedAt";

/// Fields a client payload cannot set.
const RESERVED_FIELDS: [&str; 5] = ["_id", CREATED_AT, MODIFIED_AT, IS_DELETED, DELETED_AT];

#[derive(Debug, Error)]
pub enum CrudError {
    #[error("request body is empty")]
    EmptyBody,

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("payload failed validation")]
    Validation(Vec<FieldError>),

    /// The id is not syntactically valid for the store.
    #[error("invalid record id")]
    InvalidId,

    #[error("record not found")]
    NotFound,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub type CrudResult<T> = Result<T, CrudError>;

/// Decode a request body into a JSON object.
///
/// `{}` decodes fine; it is rejected later, after the validator has had a
/// chance to name the missing fields.
pub fn parse_body(body: &[u8]) -> CrudResult<Document> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(CrudError::EmptyBody);
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CrudError::InvalidBody(
            "request body must be a JSON object".to_string(),
        )),
        Err(e) => Err(CrudError::InvalidBody(e.to_string())),
    }
}

/// Generic CRUD adapter.
///
/// Every side effect stays inside the bound collection.
#[derive(Debug, Clone)]
pub struct CrudHandler {
    collection: Arc<dyn Collection>,
    validator: Validator,
}

impl CrudHandler {
    pub fn new(collection: Arc<dyn Collection>, validator: Validator) -> Self {
        Self {
            collection,
            validator,
        }
    }

    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub async fn create(&self, payload: Document) -> CrudResult<Document> {
        let mut fields = self.checked(payload)?;
        let now = timestamp();
        fields.insert(CREATED_AT.to_string(), now.clone().into());
        fields.insert(MODIFIED_AT.to_string(), now.into());
        fields.insert(IS_DELETED.to_string(), false.into());
        fields.insert(DELETED_AT.to_string(), Value::Null);

        Ok(self.collection.insert(fields).await?)
    }

    pub async fn list(&self) -> CrudResult<Vec<Document>> {
        Ok(self.collection.find_all().await?)
    }

    pub async fn get(&self, id: &str) -> CrudResult<Document> {
        let id = parse_id(id)?;
        self.collection
            .find_by_id(&id)
            .await?
            .ok_or(CrudError::NotFound)
    }

    /// Partial update: only supplied fields change.
    pub async fn update(&self, id: &str, payload: Document) -> CrudResult<Document> {
        let id = parse_id(id)?;
        let mut changes = self.checked(payload)?;
        changes.insert(MODIFIED_AT.to_string(), timestamp().into());

        self.collection
            .update_by_id(&id, changes)
            .await?
            .ok_or(CrudError::NotFound)
    }

    pub async fn delete(&self, id: &str) -> CrudResult<Document> {
        let id = parse_id(id)?;
        self.collection
            .delete_by_id(&id)
            .await?
            .ok_or(CrudError::NotFound)
    }

    /// Validate a payload and strip server-owned fields.
    ///
    /// The validator sees the payload as sent; emptiness is judged on what
    /// remains after stripping.
    fn checked(&self, mut fields: Document) -> CrudResult<Document> {
        if !self.validator.is_noop() {
            let report = self.validator.validate(&Value::Object(fields.clone()));
            if !report.valid {
                return Err(CrudError::Validation(report.errors));
            }
        }

        for reserved in RESERVED_FIELDS {
            fields.remove(reserved);
        }
        if fields.is_empty() {
            return Err(CrudError::EmptyBody);
        }
        Ok(fields)
    }
}

/// Parse a path id; malformed ids are reported before the body is looked at.
pub fn parse_id(id: &str) -> CrudResult<RecordId> {
    id.parse().map_err(|_| CrudError::InvalidId)
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
