use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(n: u64) -> Self {
                Self(n)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                Self(n)
            }
        }
    };
}

numeric_id!(
    /// Server-assigned layer identifier.
    LayerId
);
numeric_id!(
    /// Server-assigned layer group identifier.
    GroupId
);
numeric_id!(
    /// Server-assigned basemap identifier.
    BasemapId
);

#[cfg(test)]
mod tests {
    use super::LayerId;

    #[test]
    fn serializes_as_bare_number() {
        let json = serde_json::to_string(&LayerId(42)).unwrap();
        assert_eq!(json, "42");
        let back: LayerId = serde_json::from_str("7").unwrap();
        assert_eq!(back, LayerId(7));
    }

    #[test]
    fn orders_numerically() {
        let mut ids = vec![LayerId(3), LayerId(1), LayerId(2)];
        ids.sort();
        assert_eq!(ids, vec![LayerId(1), LayerId(2), LayerId(3)]);
        assert_eq!(LayerId(12).to_string(), "12");
    }
}
