use std::time::Duration;

use encoding_rs::Encoding;
use serde::{de, Deserialize, Deserializer};
use serde_aux::field_attributes::deserialize_option_number_from_string;

#[derive(Clone, Debug, Deserialize)]
pub struct RequestSettings {
    /// Milliseconds.
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub timeout: Option<u64>,
    #[serde(deserialize_with = "deserialize_encoding")]
    pub encoding: &'static Encoding,
}

impl RequestSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            timeout: None,
            encoding: encoding_rs::UTF_8,
        }
    }
}

fn deserialize_encoding<'de, D>(deserializer: D) -> Result<&'static Encoding, D::Error>
where
    D: Deserializer<'de>,
{
    let label = String::deserialize(deserializer)?;
    Encoding::for_label(label.as_bytes())
        .ok_or_else(|| de::Error::custom(format!("{label} is not a known encoding")))
}
