use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;

use crate::server::{Ephemeral, Fixed, PortAllocator};

#[derive(Clone, Debug, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
}

impl ServerSettings {
    /// Port `0` lets the OS choose on every listen.
    pub fn port_allocator(&self) -> Box<dyn PortAllocator> {
        match self.port {
            0 => Box::new(Ephemeral),
            port => Box::new(Fixed(port)),
        }
    }
}
