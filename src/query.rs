//! Slots and query types.
//!
//! A fact is a row `[s, p, o]` (or `[s, p, o, t]` for temporal data). A
//! query type picks two slots as the lookup key and predicts the third:
//!
//! | Query type | Key | Target | Index name |
//! |------------|-----|--------|------------|
//! | `sp_` | (S, P) | O | `sp_to_o` |
//! | `s_o` | (S, O) | P | `so_to_p` |
//! | `_po` | (P, O) | S | `po_to_s` |

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One fixed position in a fact row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Subject,
    Predicate,
    Object,
    Time,
}

impl Slot {
    /// The three slots a scorer can corrupt, in S, P, O order.
    pub const SPO: [Slot; 3] = [Slot::Subject, Slot::Predicate, Slot::Object];

    /// Column of this slot in a fact row.
    #[inline]
    pub fn column(self) -> usize {
        match self {
            Slot::Subject => 0,
            Slot::Predicate => 1,
            Slot::Object => 2,
            Slot::Time => 3,
        }
    }

    /// Whether the slot holds entity indices (as opposed to relations or timestamps).
    pub fn is_entity(self) -> bool {
        matches!(self, Slot::Subject | Slot::Object)
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Slot::Subject => "s",
            Slot::Predicate => "p",
            Slot::Object => "o",
            Slot::Time => "t",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Which two slots form the key and which one is predicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueryType {
    /// (subject, predicate) → object
    #[serde(rename = "sp_")]
    Sp,
    /// (subject, object) → predicate
    #[serde(rename = "s_o")]
    So,
    /// (predicate, object) → subject
    #[serde(rename = "_po")]
    Po,
}

impl QueryType {
    pub const ALL: [QueryType; 3] = [QueryType::Sp, QueryType::So, QueryType::Po];

    /// Key slots in the order they are stored in a query row.
    pub fn key_slots(self) -> (Slot, Slot) {
        match self {
            QueryType::Sp => (Slot::Subject, Slot::Predicate),
            QueryType::So => (Slot::Subject, Slot::Object),
            QueryType::Po => (Slot::Predicate, Slot::Object),
        }
    }

    pub fn target_slot(self) -> Slot {
        match self {
            QueryType::Sp => Slot::Object,
            QueryType::So => Slot::Predicate,
            QueryType::Po => Slot::Subject,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            QueryType::Sp => "sp_",
            QueryType::So => "s_o",
            QueryType::Po => "_po",
        }
    }

    /// Name of the fact index backing this query type.
    pub fn index_name(self) -> &'static str {
        match self {
            QueryType::Sp => "sp_to_o",
            QueryType::So => "so_to_p",
            QueryType::Po => "po_to_s",
        }
    }

    /// Expand `[n, 2]` query keys into `[n, 3]` triples with the target slot set to 0.
    ///
    /// Scoring calls that replace the target slot ignore its stored value, so the
    /// placeholder never reaches a score.
    pub fn query_triples(self, queries: ArrayView2<'_, usize>) -> Array2<usize> {
        let (k1, k2) = self.key_slots();
        let mut triples = Array2::zeros((queries.nrows(), 3));
        for (row, query) in queries.outer_iter().enumerate() {
            triples[[row, k1.column()]] = query[0];
            triples[[row, k2.column()]] = query[1];
        }
        triples
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QueryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sp_" | "sp_to_o" => Ok(QueryType::Sp),
            "s_o" | "so_to_p" => Ok(QueryType::So),
            "_po" | "po_to_s" => Ok(QueryType::Po),
            other => Err(Error::Config(format!(
                "unsupported query type '{}', expected one of sp_, s_o, _po",
                other
            ))),
        }
    }
}
