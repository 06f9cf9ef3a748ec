//! Branded ID newtypes.
//!
//! Workflows, sessions, connections, and streamed responses each get their
//! own newtype over `String` so a connection id can never be passed where a
//! workflow id is expected. Generated ids are `<prefix>_<uuid v7>` so they
//! sort by creation time and are recognisable in logs.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh time-ordered id.
            #[must_use]
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()))
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of one consultation workflow instance.
    WorkflowId, "wf"
}

branded_id! {
    /// Caller-supplied correlation key; defaults to the workflow id.
    SessionId, "sess"
}

branded_id! {
    /// Identifier of one observer connection.
    ConnectionId, "conn"
}

branded_id! {
    /// Identifier of one streamed assistant response.
    ResponseId, "resp"
}

impl SessionId {
    /// The session id used when a caller does not supply one.
    #[must_use]
    pub fn for_workflow(workflow_id: &WorkflowId) -> Self {
        Self(workflow_id.as_str().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn generated_ids_carry_prefix() {
        assert!(WorkflowId::new().starts_with("wf_"));
        assert!(ConnectionId::new().starts_with("conn_"));
        assert!(ResponseId::new().starts_with("resp_"));
    }

    #[test]
    fn generated_suffix_is_uuid_v7() {
        let id = ConnectionId::new();
        let raw = id.as_str().trim_start_matches("conn_");
        let parsed = Uuid::parse_str(raw).unwrap();
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(WorkflowId::new(), WorkflowId::new());
    }

    #[test]
    fn session_defaults_to_workflow_id() {
        let wf = WorkflowId::from("wf_abc");
        assert_eq!(SessionId::for_workflow(&wf).as_str(), "wf_abc");
    }

    #[test]
    fn map_lookup_by_str() {
        let mut map = HashMap::new();
        let _ = map.insert(WorkflowId::from("W1"), 1);
        assert_eq!(map.get("W1"), Some(&1));
    }

    #[test]
    fn serializes_transparently() {
        let id = WorkflowId::from("W1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"W1\"");
        let back: WorkflowId = serde_json::from_str("\"W1\"").unwrap();
        assert_eq!(back, id);
    }
}
