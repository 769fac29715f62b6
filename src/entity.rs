//! The decoded OSM entity model.
//!
//! Entities are immutable once decoded; sinks borrow them only for the
//! duration of a single `process` call.

use std::fmt;

/// Key/value tags attached to an entity, in decode order.
pub type Tags = Vec<(String, String)>;

/// The closed set of OSM entity kinds.
///
/// The kind drives routing, output directory naming, and which columnar
/// schema is used for the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A single point with coordinates.
    Node,
    /// An ordered list of node references.
    Way,
    /// An ordered list of typed member references.
    Relation,
}

impl EntityKind {
    /// Every kind, in the order output is conventionally produced.
    pub const ALL: [Self; 3] = [Self::Node, Self::Way, Self::Relation];

    /// The lowercase name used for directories, file names, and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance fields optionally attached to an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Edit version of the entity.
    pub version: Option<i32>,
    /// Timestamp of the last edit, in milliseconds since the epoch.
    pub timestamp_ms: Option<i64>,
    /// Changeset the last edit belongs to.
    pub changeset: Option<i64>,
    /// Numeric identifier of the last editor.
    pub uid: Option<i32>,
    /// Display name of the last editor.
    pub user: Option<String>,
}

impl Metadata {
    /// Returns true when no provenance field is present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.version.is_none()
            && self.timestamp_ms.is_none()
            && self.changeset.is_none()
            && self.uid.is_none()
            && self.user.is_none()
    }
}

/// One typed member reference of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Kind of the referenced entity.
    pub kind: EntityKind,
    /// Identifier of the referenced entity.
    pub member_ref: i64,
    /// Role of the member within the relation; may be empty.
    pub role: String,
}

/// Kind-specific payload of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// WGS84 coordinates of a node.
    Node {
        /// Latitude in degrees.
        lat: f64,
        /// Longitude in degrees.
        lon: f64,
    },
    /// Ordered node references of a way.
    Way {
        /// Referenced node identifiers, in way order.
        refs: Vec<i64>,
    },
    /// Ordered typed members of a relation.
    Relation {
        /// Members in relation order.
        members: Vec<Member>,
    },
}

/// One decoded record from the source map dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// OSM identifier, unique per kind.
    pub id: i64,
    /// Key/value tags in decode order.
    pub tags: Tags,
    /// Provenance block, if the source carried one.
    pub metadata: Option<Metadata>,
    /// Kind-specific payload.
    pub payload: Payload,
}

impl Entity {
    /// A bare node entity without tags or metadata.
    #[must_use]
    pub const fn node(id: i64, lat: f64, lon: f64) -> Self {
        Self {
            id,
            tags: Vec::new(),
            metadata: None,
            payload: Payload::Node { lat, lon },
        }
    }

    /// A bare way entity without tags or metadata.
    #[must_use]
    pub const fn way(id: i64, refs: Vec<i64>) -> Self {
        Self {
            id,
            tags: Vec::new(),
            metadata: None,
            payload: Payload::Way { refs },
        }
    }

    /// A bare relation entity without tags or metadata.
    #[must_use]
    pub const fn relation(id: i64, members: Vec<Member>) -> Self {
        Self {
            id,
            tags: Vec::new(),
            metadata: None,
            payload: Payload::Relation { members },
        }
    }

    /// The kind of this entity, derived from its payload.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self.payload {
            Payload::Node { .. } => EntityKind::Node,
            Payload::Way { .. } => EntityKind::Way,
            Payload::Relation { .. } => EntityKind::Relation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_payload() {
        assert_eq!(Entity::node(1, 0.0, 0.0).kind(), EntityKind::Node);
        assert_eq!(Entity::way(1, vec![2, 3]).kind(), EntityKind::Way);
        assert_eq!(Entity::relation(1, Vec::new()).kind(), EntityKind::Relation);
    }

    #[test]
    fn kind_names_are_lowercase() {
        assert_eq!(EntityKind::Node.to_string(), "node");
        assert_eq!(EntityKind::Way.to_string(), "way");
        assert_eq!(EntityKind::Relation.to_string(), "relation");
    }

    #[test]
    fn empty_metadata_is_detected() {
        assert!(Metadata::default().is_empty());
        let with_version = Metadata {
            version: Some(1),
            ..Metadata::default()
        };
        assert!(!with_version.is_empty());
    }
}
