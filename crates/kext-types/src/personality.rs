use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::BundleIdentifier;

/// A driver-matching personality: the dictionary a kext publishes to the
/// kernel catalog so that the kernel can match devices against it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Personality(pub Map<String, Value>);

impl Personality {
    /// The numeric `IOKitDebug` property, if the personality carries one.
    ///
    /// Personalities with a nonzero debug level are withheld from the
    /// kernel catalog under safe boot.
    pub fn io_kit_debug(&self) -> Option<i64> {
        self.0.get("IOKitDebug").and_then(Value::as_i64)
    }

    /// The minimal demand-load personality published for a kext with no
    /// personalities of its own: it matches `IOResources` and names the
    /// bundle in `OSBundleModuleDemand`, so the kernel gets a chance to
    /// load the module from its own prelinked set first.
    pub fn module_demand(identifier: &BundleIdentifier) -> Self {
        let mut map = Map::new();
        map.insert(
            "CFBundleIdentifier".to_string(),
            Value::String(identifier.to_string()),
        );
        map.insert(
            "IOProviderClass".to_string(),
            Value::String("IOResources".to_string()),
        );
        map.insert(
            "IOMatchCategory".to_string(),
            Value::String("OSBundleModuleDemand".to_string()),
        );
        map.insert(
            "OSBundleModuleDemand".to_string(),
            Value::String(identifier.to_string()),
        );
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Personality {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde_json::json;

    use super::*;

    #[test]
    fn io_kit_debug_reads_the_numeric_property() {
        let personality: Personality =
            serde_json::from_value(json!({"IOProviderClass": "IOPCIDevice", "IOKitDebug": 65535}))
                .unwrap();
        assert_eq!(personality.io_kit_debug(), Some(65535));

        let quiet: Personality =
            serde_json::from_value(json!({"IOProviderClass": "IOPCIDevice"})).unwrap();
        assert_eq!(quiet.io_kit_debug(), None);
    }

    #[test]
    fn module_demand_names_the_bundle() {
        let identifier = BundleIdentifier::from_str("com.example.driver").unwrap();
        let personality = Personality::module_demand(&identifier);
        assert_eq!(
            personality.0.get("OSBundleModuleDemand"),
            Some(&json!("com.example.driver"))
        );
        assert_eq!(
            personality.0.get("IOProviderClass"),
            Some(&json!("IOResources"))
        );
    }
}
