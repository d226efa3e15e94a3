use chrono::{DateTime, Duration, Utc};
use serde::{de::Visitor, Deserialize, Deserializer};
use std::fmt;

/// Client credentials access token for the patron platform.
///
/// Held by one registration session and dropped with it.
#[derive(Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthToken {
    #[serde(alias = "access_token")]
    pub access_token: String,
    #[serde(default = "default_token_type", alias = "token_type")]
    pub token_type: String,
    #[serde(
        default,
        rename = "expiresIn",
        alias = "expires_in",
        deserialize_with = "expire_in_to_instant"
    )]
    pub expires: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn expire_in_to_instant<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ExpireInVisitor;

    impl<'de> Visitor<'de> for ExpireInVisitor {
        type Value = Option<DateTime<Utc>>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an integer containing seconds")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }

        fn visit_some<D>(self, d: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            use serde::de::Error;

            let expire_in: u64 = serde::de::Deserialize::deserialize(d)?;
            i64::try_from(expire_in)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|expire_in| Utc::now().checked_add_signed(expire_in))
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("expiresIn out of range: {}", expire_in)))
        }
    }

    deserializer.deserialize_option(ExpireInVisitor)
}

impl AuthToken {
    pub fn expired(&self) -> bool {
        if let Some(expires) = self.expires {
            expires < Utc::now()
        } else {
            false
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires", &self.expires)
            .finish()
    }
}
