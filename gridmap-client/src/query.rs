//! Opaque server-interpreted query expressions.
//!
//! Filters, entry processors, and aggregators are evaluated entirely on the
//! server; the client only names them and serializes their arguments. Each
//! record is a `(name, args)` pair the server resolves against its own
//! catalog.

use gridmap_core::{GridError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A server-side filter expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    name: String,
    #[serde(default)]
    args: Value,
}

impl Filter {
    /// Creates a filter by server-side name with raw arguments.
    pub fn named(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// The filter matching every entry. Registering a listener without a
    /// filter normalizes to this.
    pub fn always() -> Self {
        Self::named("always", Value::Null)
    }

    /// The filter matching no entry.
    pub fn never() -> Self {
        Self::named("never", Value::Null)
    }

    /// Matches entries whose extracted attribute equals `value`.
    pub fn equal(path: impl Into<String>, value: impl Serialize) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| GridError::Serialization(e.to_string()))?;
        Ok(Self::named(
            "equal",
            serde_json::json!({ "path": path.into(), "value": value }),
        ))
    }

    /// Returns the server-side name of this filter.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A server-side entry processor expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Processor {
    name: String,
    #[serde(default)]
    args: Value,
}

impl Processor {
    /// Creates a processor by server-side name with raw arguments.
    pub fn named(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Returns the server-side name of this processor.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A server-side aggregator expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregator {
    name: String,
    #[serde(default)]
    args: Value,
}

impl Aggregator {
    /// Creates an aggregator by server-side name with raw arguments.
    pub fn named(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Counts matching entries.
    pub fn count() -> Self {
        Self::named("count", Value::Null)
    }

    /// Sums the attribute at `path` across matching entries.
    pub fn sum(path: impl Into<String>) -> Self {
        Self::named("sum", serde_json::json!({ "path": path.into() }))
    }

    /// Averages the attribute at `path` across matching entries.
    pub fn average(path: impl Into<String>) -> Self {
        Self::named("average", serde_json::json!({ "path": path.into() }))
    }

    /// Returns the server-side name of this aggregator.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_filter_is_canonical() {
        // The "always" singleton must serialize identically everywhere it is
        // constructed, since it doubles as a group index key.
        let s = gridmap_core::Serializer::json();
        let a = s.serialize(&Filter::always()).unwrap();
        let b = s.serialize(&Filter::always()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_equal_filter_shape() {
        let filter = Filter::equal("customer.tier", "gold").unwrap();
        assert_eq!(filter.name(), "equal");
    }

    #[test]
    fn test_aggregator_helpers() {
        assert_eq!(Aggregator::count().name(), "count");
        assert_eq!(Aggregator::sum("amount").name(), "sum");
        assert_eq!(Aggregator::average("amount").name(), "average");
    }
}
