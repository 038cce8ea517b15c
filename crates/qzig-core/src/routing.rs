//! Resource paths for the device tree.
//!
//! Every node is addressed remotely by the chain of `<kind>/<id>` pairs
//! from the network down to the node itself, e.g.
//! `/network/N/device/D/value/V/state/S`. On disk the same chain is used
//! without the leading network pair, since there is exactly one network
//! per store.

use std::fmt;

use crate::models::NodeKind;

/// Address of one node in the tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodePath {
    segments: Vec<(NodeKind, String)>,
}

impl NodePath {
    /// Path of the network root
    pub fn network(id: impl Into<String>) -> Self {
        Self {
            segments: vec![(NodeKind::Network, id.into())],
        }
    }

    /// Path of a child of this node
    pub fn child(&self, kind: NodeKind, id: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push((kind, id.into()));
        Self { segments }
    }

    pub fn device(&self, id: impl Into<String>) -> Self {
        self.child(NodeKind::Device, id)
    }

    pub fn value(&self, id: impl Into<String>) -> Self {
        self.child(NodeKind::Value, id)
    }

    pub fn state(&self, id: impl Into<String>) -> Self {
        self.child(NodeKind::State, id)
    }

    /// Kind of the addressed node
    pub fn kind(&self) -> NodeKind {
        self.segments
            .last()
            .map(|(kind, _)| *kind)
            .unwrap_or(NodeKind::Network)
    }

    /// Id of the addressed node
    pub fn id(&self) -> &str {
        self.segments
            .last()
            .map(|(_, id)| id.as_str())
            .unwrap_or_default()
    }

    /// All `(kind, id)` pairs from the root down
    pub fn segments(&self) -> &[(NodeKind, String)] {
        &self.segments
    }

    /// Remote URL of the node
    ///
    /// ```
    /// # use qzig_core::routing::NodePath;
    /// let path = NodePath::network("n1").device("d1").value("v1");
    /// assert_eq!(path.url(), "/network/n1/device/d1/value/v1");
    /// ```
    pub fn url(&self) -> String {
        let mut url = String::new();
        for (kind, id) in &self.segments {
            url.push('/');
            url.push_str(kind.as_str());
            url.push('/');
            url.push_str(id);
        }
        url
    }

    /// Remote URL of the collection of `kind` children below this node
    ///
    /// ```
    /// # use qzig_core::models::NodeKind;
    /// # use qzig_core::routing::NodePath;
    /// let path = NodePath::network("n1");
    /// assert_eq!(path.collection_url(NodeKind::Device), "/network/n1/device");
    /// ```
    pub fn collection_url(&self, kind: NodeKind) -> String {
        format!("{}/{}", self.url(), kind.as_str())
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Split an inbound request URL into its last `(kind, id)` pair.
///
/// Only the final two segments select the target; anything before them
/// is ignored. Returns `None` when fewer than two segments are present.
///
/// ```
/// # use qzig_core::routing::parse_resource_url;
/// assert_eq!(
///     parse_resource_url("/network/n/device/d/value/v/state/s"),
///     Some(("state", "s"))
/// );
/// assert_eq!(parse_resource_url("/state/"), None);
/// assert_eq!(parse_resource_url("state"), None);
/// ```
pub fn parse_resource_url(url: &str) -> Option<(&str, &str)> {
    let mut parts = url.split('/').filter(|s| !s.is_empty()).rev();
    let id = parts.next()?;
    let kind = parts.next()?;
    Some((kind, id))
}
