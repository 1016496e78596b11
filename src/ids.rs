//! Sortable identifiers shared across entities.
//!
//! Branches, organizations, projects, and backup rows are all keyed by ULIDs: 128-bit
//! values that sort lexicographically by creation time, unlike a random UUIDv4. A
//! monotonic factory is used per process so that two IDs minted in the same millisecond
//! still preserve generation order.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

static GENERATOR: Mutex<Option<Generator>> = Mutex::new(None);

fn next_ulid() -> Ulid {
    let mut guard = GENERATOR.lock().expect("ulid generator poisoned");
    let generator = guard.get_or_insert_with(Generator::new);
    generator.generate().expect("ulid generator exhausted for this millisecond")
}

macro_rules! ulid_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            pub fn new() -> Self {
                Self(next_ulid())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Ulid::from_str(s)?))
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> <sqlx::Postgres as sqlx::Database>::TypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: <sqlx::Postgres as sqlx::Database>::ValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Ok(Self(Ulid::from_str(s)?))
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut <sqlx::Postgres as sqlx::Database>::ArgumentBuffer<'q>,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <String as sqlx::Encode<sqlx::Postgres>>::encode(self.0.to_string(), buf)
            }
        }
    };
}

ulid_newtype!(OrganizationId);
ulid_newtype!(ProjectId);
ulid_newtype!(BranchId);
ulid_newtype!(ApiKeyId);
ulid_newtype!(BackupScheduleId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_monotonically_sortable() {
        let mut previous = BranchId::new();
        for _ in 0..1000 {
            let id = BranchId::new();
            assert!(id.0 > previous.0);
            previous = id;
        }
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let id = BranchId::new();
        let parsed: BranchId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
