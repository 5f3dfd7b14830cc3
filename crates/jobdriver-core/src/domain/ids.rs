//! Domain identifiers.
//!
//! Job records are addressed by `JobKey` (namespace + name), the way the
//! controllers that create them address every other namespaced resource.
//! Driver slots and history entries get ULID-based ids instead: they are
//! generated by us, never by callers, and sort by creation time.
//!
//! ## Phantom Type パターン
//! `Id<T>` は共通実装を一つに保ちつつ、`DriverId` と `HistoryId` を
//! コンパイル時に区別するためのもの（`T` は実行時には存在しない）。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"driver-", "history-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ULID-backed identifier tagged with a marker type.
///
/// Serialized as its display form (`driver-01H...`), so persisted records
/// stay readable and the prefix round-trips.
#[repr(transparent)]
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

// derive would require `T: Clone`/`T: Copy` on the marker
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh id from the system clock.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Returned when a string is not `<prefix><ulid>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id {value:?}: expected prefix {expected:?} followed by a ULID")]
pub struct ParseIdError {
    pub value: String,
    pub expected: &'static str,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError {
            value: s.to_string(),
            expected: T::prefix(),
        };
        let raw = s.strip_prefix(T::prefix()).ok_or_else(err)?;
        let ulid = Ulid::from_string(raw).map_err(|_| err())?;
        Ok(Self::from_ulid(ulid))
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Driver {}

impl IdMarker for Driver {
    fn prefix() -> &'static str {
        "driver-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum History {}

impl IdMarker for History {
    fn prefix() -> &'static str {
        "history-"
    }
}

/// Identity stamped into `claimed_by`. Every driver slot owns one.
pub type DriverId = Id<Driver>;

/// Identifier of one history entry.
pub type HistoryId = Id<History>;

/// Namespaced name of a job record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub namespace: String,
    pub name: String,
}

impl JobKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let driver = DriverId::generate();
        let history = HistoryId::generate();

        assert!(driver.to_string().starts_with("driver-"));
        assert!(history.to_string().starts_with("history-"));
        // let _: DriverId = history; // <- does not compile
    }

    #[test]
    fn id_parses_its_display_form() {
        let id = DriverId::generate();
        let parsed: DriverId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);

        let wrong = "history-01ARZ3NDEKTSV4RRFFQ69G5FAV".parse::<DriverId>();
        assert!(wrong.is_err());
    }

    #[test]
    fn id_serializes_as_prefixed_string() {
        let id = HistoryId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        assert_eq!(std::mem::size_of::<DriverId>(), std::mem::size_of::<Ulid>());
    }

    #[test]
    fn job_key_orders_by_namespace_then_name() {
        let a = JobKey::new("a", "z");
        let b = JobKey::new("b", "a");
        assert!(a < b);
        assert_eq!(a.to_string(), "a/z");
    }
}
