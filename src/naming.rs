use std::fmt;

/// A fully resolved index name, namespace prefix already applied.
///
/// Names coming back from the cluster (alias listings, bulk item results)
/// already carry the prefix; wrap them with [`PhysicalIndex::from_store`]
/// so they are never resolved a second time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhysicalIndex(String);

impl PhysicalIndex {
    pub fn from_store(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhysicalIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps logical model names to physical index names by prefixing the
/// configured namespace. Resolution is pure; the namespace is lower-cased
/// once at construction time.
#[derive(Debug, Clone)]
pub struct IndexNameResolver {
    namespace: Option<String>,
}

impl IndexNameResolver {
    pub fn new(namespace: &str) -> Self {
        let namespace = namespace.trim();
        Self {
            namespace: if namespace.is_empty() {
                None
            } else {
                Some(namespace.to_lowercase())
            },
        }
    }

    pub fn resolve(&self, model_name: &str) -> PhysicalIndex {
        match &self.namespace {
            Some(namespace) => PhysicalIndex(format!("{namespace}_{model_name}")),
            None => PhysicalIndex(model_name.to_string()),
        }
    }
}
