//! Wire format of update announcements.

use serde::{Deserialize, Serialize};

use crate::bus::BusError;
use crate::config::InstanceRole;

/// `{"PublicProxy": bool, "PrivateProxy": bool}`
///
/// Missing flags read as `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNotification {
    #[serde(rename = "PublicProxy", default)]
    pub public_proxy: bool,

    #[serde(rename = "PrivateProxy", default)]
    pub private_proxy: bool,
}

impl UpdateNotification {
    pub fn decode(text: &str) -> Result<Self, BusError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn applies_to(&self, role: InstanceRole) -> bool {
        match role {
            InstanceRole::Public => self.public_proxy,
            InstanceRole::Private => self.private_proxy,
        }
    }
}
