use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Wire spelling of [`OrderContext::General`].
pub const GENERAL_CONTEXT: &str = "general";

/// Identity of a marketplace participant (street-food vendor or supplier).
///
/// Deserializes from either a JSON string or an integer, since clients send
/// both (`"counterpartyId": 2` and `"counterpartyId": "2"`). Blank ids are
/// rejected at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OrderId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s.trim().to_string(),
            RawId::Number(n) => n.to_string(),
        }
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let id = RawId::deserialize(deserializer)?.into_string();
    if id.is_empty() {
        return Err(de::Error::custom("identifier must not be empty"));
    }
    Ok(id)
}

macro_rules! string_id {
    ($ty:ident) => {
        impl $ty {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                deserialize_id(deserializer).map(Self)
            }
        }
    };
}

string_id!(UserId);
string_id!(OrderId);

/// Which order, if any, a conversation is scoped to.
///
/// `General` covers direct chat that is not tied to an order. On the wire an
/// absent field, `null`, and the literal string `"general"` all mean
/// `General`; in the store it is a `NULL` order id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum OrderContext {
    #[default]
    General,
    Specific(OrderId),
}

impl OrderContext {
    /// Decode from the optional raw string carried by requests and rows.
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => OrderContext::General,
            Some(GENERAL_CONTEXT) => OrderContext::General,
            Some(id) => OrderContext::Specific(OrderId::new(id)),
        }
    }

    pub fn order_id(&self) -> Option<&OrderId> {
        match self {
            OrderContext::General => None,
            OrderContext::Specific(id) => Some(id),
        }
    }
}

impl From<Option<OrderId>> for OrderContext {
    fn from(value: Option<OrderId>) -> Self {
        match value {
            Some(id) => OrderContext::Specific(id),
            None => OrderContext::General,
        }
    }
}

impl fmt::Display for OrderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderContext::General => f.write_str(GENERAL_CONTEXT),
            OrderContext::Specific(id) => write!(f, "{}", id),
        }
    }
}

impl Serialize for OrderContext {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            OrderContext::General => serializer.serialize_str(GENERAL_CONTEXT),
            OrderContext::Specific(id) => serializer.serialize_str(id.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for OrderContext {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<RawId>::deserialize(deserializer)?.map(RawId::into_string);
        Ok(OrderContext::from_wire(raw.as_deref()))
    }
}
