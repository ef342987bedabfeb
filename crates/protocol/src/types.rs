use serde::{Deserialize, Serialize};

/// Descriptor of an item stored remotely.
///
/// Returned by the final chunk of an upload and by async copy jobs
/// (via the job's `resourceId`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub e_tag: String,
}
