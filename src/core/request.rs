//! GraphQL request parsing and operation classification
//!
//! A [`GqlRequest`] is the raw payload a client sends inside a `start` frame.
//! [`ParsedRequest::parse`] runs it through `graphql_parser`, selects the
//! operation named by `operationName` (or the only one present), classifies
//! it, and records the top-level response keys in selection order. The parsed
//! form — which also carries the connection's [`QueryKind`] — is what the
//! planner and the dispatch engine work with.

use crate::core::error::RequestError;
use graphql_parser::query::{Definition, OperationDefinition, Selection, parse_query};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The raw operation payload carried by a `start` frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GqlRequest {
    /// GraphQL document text
    pub query: String,

    /// Operation variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Map<String, Value>>,

    /// Which operation in the document to execute
    #[serde(
        rename = "operationName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
}

impl GqlRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }
}

/// What kind of operation a request resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// Which dialect a document is interpreted under
///
/// Fixed per connection by the handshake path. Relay documents resolve
/// against the planner's Relay surface (node ids, connections) instead of
/// the standard one; the transport only carries the tag through to the
/// planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Standard,
    Relay,
}

/// A request that parsed successfully
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub raw: GqlRequest,
    pub kind: OperationKind,
    /// Dialect the connection was opened under
    pub dialect: QueryKind,
    /// Top-level response keys in selection order (alias wins over name)
    pub root_fields: Vec<String>,
}

impl ParsedRequest {
    /// Parse and classify a raw request under the connection's dialect
    pub fn parse(raw: GqlRequest, dialect: QueryKind) -> Result<Self, RequestError> {
        let doc = parse_query::<String>(&raw.query).map_err(|e| RequestError::ParseFailed {
            message: e.to_string(),
        })?;

        let operations: Vec<&OperationDefinition<'_, String>> = doc
            .definitions
            .iter()
            .filter_map(|def| match def {
                Definition::Operation(op) => Some(op),
                Definition::Fragment(_) => None,
            })
            .collect();

        if operations.is_empty() {
            return Err(RequestError::NoOperation);
        }

        let selected = match raw.operation_name.as_deref() {
            Some(wanted) => operations
                .iter()
                .find(|op| operation_name(op) == Some(wanted))
                .copied()
                .ok_or_else(|| RequestError::OperationNotFound {
                    name: wanted.to_string(),
                })?,
            None => {
                if operations.len() > 1 {
                    return Err(RequestError::AmbiguousOperation);
                }
                operations[0]
            }
        };

        let kind = match selected {
            OperationDefinition::Query(_) | OperationDefinition::SelectionSet(_) => {
                OperationKind::Query
            }
            OperationDefinition::Mutation(_) => OperationKind::Mutation,
            OperationDefinition::Subscription(_) => OperationKind::Subscription,
        };

        let root_fields = root_field_keys(selected);

        Ok(Self {
            raw,
            kind,
            dialect,
            root_fields,
        })
    }
}

fn operation_name<'a>(op: &'a OperationDefinition<'_, String>) -> Option<&'a str> {
    match op {
        OperationDefinition::Query(q) => q.name.as_deref(),
        OperationDefinition::Mutation(m) => m.name.as_deref(),
        OperationDefinition::Subscription(s) => s.name.as_deref(),
        OperationDefinition::SelectionSet(_) => None,
    }
}

/// Response keys of the top-level selection set, aliases respected
fn root_field_keys(op: &OperationDefinition<'_, String>) -> Vec<String> {
    let items = match op {
        OperationDefinition::Query(q) => &q.selection_set.items,
        OperationDefinition::Mutation(m) => &m.selection_set.items,
        OperationDefinition::Subscription(s) => &s.selection_set.items,
        OperationDefinition::SelectionSet(s) => &s.items,
    };

    items
        .iter()
        .filter_map(|sel| match sel {
            Selection::Field(field) => {
                Some(field.alias.clone().unwrap_or_else(|| field.name.clone()))
            }
            // Fragment spreads at the root are resolved by the planner
            _ => None,
        })
        .collect()
}
