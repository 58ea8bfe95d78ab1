use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Trait for items scraped by spiders.
///
/// Items are data, not links to crawl: the engine passes them untouched to
/// the pipeline chain.
pub trait Item: Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync + 'static {
    /// Get the item type name
    fn item_type(&self) -> &'static str;

    /// Convert the item to JSON
    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serde(e.to_string()))
    }
}

/// A dynamic item that can hold any key-value pairs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicItem {
    /// The type of the item
    #[serde(rename = "_type")]
    pub item_type_name: String,

    /// The fields of the item
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

impl DynamicItem {
    /// Create a new dynamic item
    pub fn new<S: Into<String>>(item_type_name: S) -> Self {
        Self {
            item_type_name: item_type_name.into(),
            fields: HashMap::new(),
        }
    }

    /// Set a field value
    pub fn set<K: Into<String>, V: Into<serde_json::Value>>(
        &mut self,
        key: K,
        value: V,
    ) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    /// Check if a field exists
    pub fn has_field(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }
}

impl Item for DynamicItem {
    fn item_type(&self) -> &'static str {
        "dynamic_item"
    }
}

/// Convert any [`Item`] into the [`DynamicItem`] currency of the pipeline chain
pub fn to_dynamic_item<I: Item>(item: &I) -> Result<DynamicItem> {
    let value = serde_json::to_value(item)?;
    match value {
        serde_json::Value::Object(map) => {
            let mut dynamic = DynamicItem::new(item.item_type());
            for (k, v) in map {
                dynamic.set(k, v);
            }
            Ok(dynamic)
        }
        _ => Err(Error::Item("item is not an object".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestItem {
        title: String,
        price: f64,
    }

    impl Item for TestItem {
        fn item_type(&self) -> &'static str {
            "test_item"
        }
    }

    #[test]
    fn test_dynamic_item() {
        let mut item = DynamicItem::new("product");
        item.set("title", "Test Product").set("price", 19.99);

        assert_eq!(item.get("title").unwrap(), &json!("Test Product"));
        assert!(item.has_field("price"));
        assert!(!item.has_field("description"));
    }

    #[test]
    fn test_to_dynamic_item() {
        let item = TestItem {
            title: "Test Product".to_string(),
            price: 19.99,
        };

        let dynamic = to_dynamic_item(&item).unwrap();
        assert_eq!(dynamic.item_type_name, "test_item");
        assert_eq!(dynamic.get("title").unwrap(), &json!("Test Product"));
        assert_eq!(dynamic.get("price").unwrap(), &json!(19.99));
    }

    #[test]
    fn test_item_to_json() {
        let item = TestItem {
            title: "Test Product".to_string(),
            price: 19.99,
        };

        let json_str = item.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed["title"], "Test Product");
    }
}
