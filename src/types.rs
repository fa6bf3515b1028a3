//! Shared enums used across the codebase
//!
//! Every enum here is persisted as lower-case TEXT and serialized the same way
//! over the wire, so `text_enum!` generates the serde, `FromStr`, `Display`
//! and sqlx glue in one place.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl Type<Postgres> for $name {
            fn type_info() -> PgTypeInfo {
                <String as Type<Postgres>>::type_info()
            }

            fn compatible(ty: &PgTypeInfo) -> bool {
                <String as Type<Postgres>>::compatible(ty)
            }
        }

        impl<'r> Decode<'r, Postgres> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let text = <&str as Decode<'r, Postgres>>::decode(value)?;
                Ok(text.parse::<$name>()?)
            }
        }

        impl<'q> Encode<'q, Postgres> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> IsNull {
                <&str as Encode<'q, Postgres>>::encode(self.as_str(), buf)
            }
        }
    };
}

text_enum! {
    /// Lifecycle state of a tenant account
    TenantStatus {
        Active => "active",
        Suspended => "suspended",
        Trial => "trial",
    }
}

impl TenantStatus {
    /// Suspended tenants cannot resolve a scope; trial tenants can.
    pub fn is_usable(&self) -> bool {
        !matches!(self, TenantStatus::Suspended)
    }
}

text_enum! {
    /// Whether a tenant runs a single organization or a parent hierarchy
    TenantOrganizationType {
        Standalone => "standalone",
        Parent => "parent",
    }
}

text_enum! {
    OrganizationType {
        Parent => "parent",
        Sub => "sub",
        Standalone => "standalone",
    }
}

text_enum! {
    /// Entities a location can be assigned to
    AssignmentEntityType {
        Organization => "organization",
        Tenant => "tenant",
    }
}

text_enum! {
    AssignmentType {
        Primary => "primary",
        Secondary => "secondary",
        Backup => "backup",
    }
}

text_enum! {
    /// Level at which a credit configuration row is defined
    ConfigScope {
        Global => "global",
        Tenant => "tenant",
        Organization => "organization",
        Location => "location",
    }
}

text_enum! {
    AllowancePeriod {
        Day => "day",
        Week => "week",
        Month => "month",
        Year => "year",
    }
}

text_enum! {
    /// Owner kind of a credit account
    CreditEntityType {
        Tenant => "tenant",
        Organization => "organization",
        Location => "location",
        User => "user",
        Application => "application",
    }
}

text_enum! {
    TransactionType {
        Allocation => "allocation",
        Consumption => "consumption",
        Transfer => "transfer",
        Refund => "refund",
        Expiry => "expiry",
    }
}

text_enum! {
    /// Where the credits of a pool came from
    PoolSource {
        Purchase => "purchase",
        Allocation => "allocation",
        Transfer => "transfer",
        Refund => "refund",
        Trial => "trial",
        Sharing => "sharing",
    }
}

text_enum! {
    MembershipEntityType {
        Organization => "organization",
        Location => "location",
    }
}

text_enum! {
    MembershipType {
        Member => "member",
        Manager => "manager",
        Owner => "owner",
    }
}

text_enum! {
    MembershipStatus {
        Active => "active",
        Pending => "pending",
        Revoked => "revoked",
    }
}
