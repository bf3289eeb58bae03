use std::collections::BTreeSet;

use super::{Published, QualifiedName};

/// One property-level difference of a modified catalog entity.
///
/// Each variant carries the old value (and, where it is not recoverable from
/// the current snapshot, the new one too), so listeners can diff without any
/// pre/post event pairing.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishedChange {
    /// The entity's name or owning namespace changed.
    Renamed {
        /// The fully qualified name before the change.
        old: QualifiedName,
    },
    /// A layer was assigned a different default style.
    DefaultStyleChanged {
        /// Previous default style name.
        old: Option<String>,
        /// New default style name.
        new: Option<String>,
    },
    /// A layer's alternate-style set changed.
    StylesChanged {
        /// The alternate styles before the change.
        old: BTreeSet<String>,
    },
    /// A group's member-layer list changed.
    GroupLayersChanged,
    /// A group's per-member style list changed.
    GroupStylesChanged,
    /// The entity's caching metadata (`caching.*` keys) changed.
    CachingMetadataChanged,
}

/// A single logical catalog mutation, delivered to the listeners after the
/// catalog has applied it.
///
/// `Modified` carries the applied snapshot *and* the property diffs in one
/// value: there is no implicit pairing of separate before/after
/// notifications, and no same-thread delivery assumption.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEvent {
    /// A layer or group was added.
    Added(Published),
    /// A layer or group was modified; `current` is the post-change snapshot.
    Modified {
        /// The entity after the mutation.
        current: Published,
        /// What changed, with old values.
        changes: Vec<PublishedChange>,
    },
    /// A layer or group was removed; the snapshot is the last known state.
    Removed(Published),
    /// A namespace (workspace) was renamed, re-prefixing every resource in
    /// it.
    NamespaceRenamed {
        /// Previous namespace prefix.
        old: String,
        /// New namespace prefix.
        new: String,
    },
    /// A style was renamed without its content changing.
    StyleRenamed {
        /// Previous style name.
        old: String,
        /// New style name.
        new: String,
    },
    /// A style's content was modified (not renamed).
    StyleModified {
        /// The style's name.
        name: String,
    },
}
