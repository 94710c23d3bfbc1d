// Copyright 2025 JiangLong.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Dual identifiers and identifier resolution.
//!
//! Every cluster and node group is addressed through an [`Iid`]: a
//! caller-chosen `name` plus the provider-issued `system_id`. When both are
//! present the system id is authoritative and the name is informational.

use crate::shared::error::PmksError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Iid {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub system_id: String,
}

impl Iid {
    pub fn new(name: impl Into<String>, system_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_id: system_id.into(),
        }
    }

    pub fn from_name(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }

    pub fn from_system_id(system_id: impl Into<String>) -> Self {
        Self::new("", system_id)
    }

    /// Neither part is set; such an identifier cannot be looked up.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.system_id.is_empty()
    }

    pub fn has_system_id(&self) -> bool {
        !self.system_id.is_empty()
    }

    /// Whether `self` and `other` address the same resource.
    ///
    /// System ids decide when both sides carry one. Otherwise the names must
    /// match, and an empty name never matches anything.
    pub fn same_resource(&self, other: &Iid) -> bool {
        if self.has_system_id() && other.has_system_id() {
            return self.system_id == other.system_id;
        }
        !self.name.is_empty() && self.name == other.name
    }
}

impl fmt::Display for Iid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.name.is_empty(), self.system_id.is_empty()) {
            (false, false) => write!(f, "{} ({})", self.name, self.system_id),
            (false, true) => write!(f, "{}", self.name),
            (true, false) => write!(f, "#{}", self.system_id),
            (true, true) => write!(f, "<empty>"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Cluster,
    NodeGroup,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "cluster",
            ResourceKind::NodeGroup => "node group",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything addressed through an [`Iid`].
pub trait Identified {
    fn iid(&self) -> &Iid;
}

/// Find the resource `iid` refers to within a freshly listed resource set.
///
/// The system id is searched first when present and is never second-guessed
/// by the name. A bare name that matches more than one resource is an error
/// rather than a pick of the first match.
pub fn resolve<'a, T: Identified>(
    op: &'static str,
    kind: ResourceKind,
    items: &'a [T],
    iid: &Iid,
) -> Result<&'a T, PmksError> {
    if iid.is_empty() {
        return Err(PmksError::EmptyIdentifier { op, kind });
    }

    if iid.has_system_id() {
        return items
            .iter()
            .find(|item| item.iid().system_id == iid.system_id)
            .ok_or_else(|| PmksError::not_found(op, kind, iid.clone()));
    }

    let mut matches = items.iter().filter(|item| item.iid().name == iid.name);
    let first = matches
        .next()
        .ok_or_else(|| PmksError::not_found(op, kind, iid.clone()))?;
    let others = matches.count();
    if others > 0 {
        return Err(PmksError::AmbiguousName {
            op,
            kind,
            name: iid.name.clone(),
            count: others + 1,
        });
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item(Iid);

    impl Identified for Item {
        fn iid(&self) -> &Iid {
            &self.0
        }
    }

    fn items() -> Vec<Item> {
        vec![
            Item(Iid::new("pool-a", "np-1")),
            Item(Iid::new("pool-b", "np-2")),
            Item(Iid::new("pool-b", "np-3")),
        ]
    }

    #[test]
    fn test_resolve_by_system_id_ignores_name_ambiguity() {
        let items = items();
        let found = resolve("get", ResourceKind::NodeGroup, &items, &Iid::from_system_id("np-3"))
            .unwrap();
        assert_eq!(found.iid().system_id, "np-3");

        // A stale name does not redirect the lookup.
        let found = resolve("get", ResourceKind::NodeGroup, &items, &Iid::new("pool-a", "np-2"))
            .unwrap();
        assert_eq!(found.iid().name, "pool-b");
    }

    #[test]
    fn test_resolve_unique_name() {
        let items = items();
        let found = resolve("get", ResourceKind::NodeGroup, &items, &Iid::from_name("pool-a"))
            .unwrap();
        assert_eq!(found.iid().system_id, "np-1");
    }

    #[test]
    fn test_resolve_ambiguous_name() {
        let items = items();
        let err = resolve("get", ResourceKind::NodeGroup, &items, &Iid::from_name("pool-b"))
            .err()
            .unwrap();
        match err {
            PmksError::AmbiguousName { name, count, .. } => {
                assert_eq!(name, "pool-b");
                assert_eq!(count, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_not_found() {
        let items = items();
        let err = resolve("get", ResourceKind::Cluster, &items, &Iid::from_system_id("missing"))
            .err()
            .unwrap();
        assert!(matches!(err, PmksError::NotFound { .. }));

        let err = resolve("get", ResourceKind::Cluster, &items, &Iid::from_name("pool-z"))
            .err()
            .unwrap();
        assert!(matches!(err, PmksError::NotFound { .. }));
    }

    #[test]
    fn test_resolve_empty_identifier() {
        let items = items();
        let err = resolve("get", ResourceKind::Cluster, &items, &Iid::default())
            .err()
            .unwrap();
        assert!(matches!(err, PmksError::EmptyIdentifier { .. }));
    }

    #[test]
    fn test_same_resource() {
        let a = Iid::new("cluster-1", "c-1");
        assert!(a.same_resource(&Iid::new("renamed", "c-1")));
        assert!(!a.same_resource(&Iid::new("cluster-1", "c-2")));
        assert!(a.same_resource(&Iid::from_name("cluster-1")));
        assert!(Iid::from_name("cluster-1").same_resource(&a));
        assert!(!Iid::from_name("").same_resource(&Iid::from_name("")));
    }

    #[test]
    fn test_display() {
        assert_eq!(Iid::new("a", "b").to_string(), "a (b)");
        assert_eq!(Iid::from_name("a").to_string(), "a");
        assert_eq!(Iid::from_system_id("b").to_string(), "#b");
    }
}
