use serde::{Deserialize, Serialize};

/// Card tier the platform is willing to issue for an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    /// No card can be issued for this address alone.
    None,
    Temporary,
    Standard,
    Juvenile,
}

impl CardType {
    /// Card type assumed when the server does not state one: New York
    /// addresses get a standard card, everything else none.
    pub fn from_region(region: &str) -> CardType {
        if region == "NY" {
            CardType::Standard
        } else {
            CardType::None
        }
    }

    pub fn can_issue(&self) -> bool {
        !matches!(self, CardType::None)
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            CardType::None => "none",
            CardType::Temporary => "temporary",
            CardType::Standard => "standard",
            CardType::Juvenile => "juvenile",
        }
    }
}

impl Default for CardType {
    fn default() -> Self {
        CardType::None
    }
}
