//! Turns one module definition into a bound route entry.

use thiserror::Error;

use crate::crud::CrudHandler;
use crate::routing::table::RouteEntry;
use crate::store::types::{collection_name, path_key};
use crate::store::{CollectionStore, ModuleDefinition, ProjectDefinition, StoreError};
use crate::validator::Validator;

/// Failure to build a single route. Never fatal to the rest of a reload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteSynthesisError {
    #[error("{project}/{module}: invalid path segment: {reason}")]
    InvalidSegment {
        project: String,
        module: String,
        reason: &'static str,
    },

    #[error("{project}/{module}: {source}")]
    Collection {
        project: String,
        module: String,
        #[source]
        source: StoreError,
    },
}

fn check_segment(segment: &str) -> Result<(), &'static str> {
    if segment.is_empty() {
        return Err("name is empty");
    }
    if segment.contains('/') {
        return Err("name contains '/'");
    }
    if segment == "." || segment == ".." {
        return Err("name is a relative path component");
    }
    Ok(())
}

/// Bind `project/module` to its collection and the project's validator.
pub async fn synthesize(
    project: &ProjectDefinition,
    module: &ModuleDefinition,
    validator: &Validator,
    collections: &dyn CollectionStore,
) -> Result<RouteEntry, RouteSynthesisError> {
    for segment in [&project.name, &module.name] {
        check_segment(segment).map_err(|reason| RouteSynthesisError::InvalidSegment {
            project: project.name.clone(),
            module: module.name.clone(),
            reason,
        })?;
    }

    let collection = collections
        .collection(&collection_name(&project.name, &module.name))
        .await
        .map_err(|source| RouteSynthesisError::Collection {
            project: project.name.clone(),
            module: module.name.clone(),
            source,
        })?;

    Ok(RouteEntry {
        path_key: path_key(&project.name, &module.name),
        project: project.name.clone(),
        module: module.name.clone(),
        handler: CrudHandler::new(collection, validator.clone()),
    })
}
