//! Line-delimited JSON messages between `RemoteSpace` and `SpaceServer`.
//!
//! One request and one response per connection, each a single JSON line.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{LeaseId, SpaceError, Wait};
use crate::domain::{Entry, Template};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum Request {
    Write { entry: Entry, lease: Option<Duration> },
    Take { template: Template, wait: Wait },
    Read { template: Template, wait: Wait },
    ReadAll { template: Template },
    Renew { lease: LeaseId, period: Duration },
    Cancel { lease: LeaseId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub(crate) enum Response {
    Lease { lease: LeaseId },
    Entry { entry: Entry },
    Entries { entries: Vec<Entry> },
    Done,
    Error { error: WireError },
}

/// `SpaceError` without the payloads the caller already knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum WireError {
    NoMatch,
    LeaseNotFound,
    Closed,
    Failed(String),
}

impl From<&SpaceError> for WireError {
    fn from(e: &SpaceError) -> Self {
        match e {
            SpaceError::NoMatch(_) => WireError::NoMatch,
            SpaceError::LeaseNotFound(_) => WireError::LeaseNotFound,
            SpaceError::Closed => WireError::Closed,
            other => WireError::Failed(other.to_string()),
        }
    }
}

impl Request {
    /// Rebuild the caller-side error for a failed request.
    pub(crate) fn error(&self, error: WireError) -> SpaceError {
        match (error, self) {
            (WireError::NoMatch, Request::Take { template, .. } | Request::Read { template, .. }) => {
                SpaceError::NoMatch(template.clone())
            }
            (WireError::LeaseNotFound, Request::Renew { lease, .. } | Request::Cancel { lease }) => {
                SpaceError::LeaseNotFound(*lease)
            }
            (WireError::Closed, _) => SpaceError::Closed,
            (WireError::Failed(message), _) => SpaceError::Protocol(message),
            (other, request) => SpaceError::Protocol(format!("unexpected {other:?} for {request:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskState;

    #[test]
    fn requests_are_tagged_by_op() {
        let request = Request::Take {
            template: Template::task(None, Some(TaskState::Todo)),
            wait: Wait::Forever,
        };
        let line = serde_json::to_string(&request).unwrap();

        assert!(line.starts_with(r#"{"op":"take""#));
        assert!(!line.contains('\n'));
        assert_eq!(serde_json::from_str::<Request>(&line).unwrap(), request);
    }

    #[test]
    fn no_match_error_recovers_template() {
        let template = Template::task(Some("a"), None);
        let request = Request::Read {
            template: template.clone(),
            wait: Wait::NOW,
        };

        match request.error(WireError::NoMatch) {
            SpaceError::NoMatch(t) => assert_eq!(t, template),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mismatched_error_is_a_protocol_error() {
        let request = Request::ReadAll { template: Template::any() };
        assert!(matches!(
            request.error(WireError::LeaseNotFound),
            SpaceError::Protocol(_)
        ));
    }
}
