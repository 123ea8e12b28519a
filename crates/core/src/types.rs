/// Node identifiers in a UI workflow graph are integers.
pub type NodeId = i64;

/// Link identifiers in a UI workflow graph.
pub type LinkId = i64;
