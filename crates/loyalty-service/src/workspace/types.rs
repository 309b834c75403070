//! 工作台页面模型与属性构造
//!
//! 页面属性保持原始 JSON，读取由 `webhook::properties` 解释；
//! 写入时用本模块的构造函数生成平台要求的属性结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// 属性名 → 属性值
pub type PropertyMap = Map<String, Value>;

/// 页面的父级
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageParent {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_id: Option<String>,
}

/// 工作台页面
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<PageParent>,
    #[serde(default)]
    pub properties: PropertyMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edited_time: Option<String>,
    #[serde(default)]
    pub archived: bool,
}

impl Page {
    pub fn database_id(&self) -> Option<&str> {
        self.parent.as_ref()?.database_id.as_deref()
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// 数据库查询结果（游标分页）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub results: Vec<Page>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// 比较用的页面 ID：去掉连字符并转小写
pub fn canonical_id(id: &str) -> String {
    id.chars()
        .filter(|c| *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

// ==================== 属性构造 ====================

pub fn title(text: &str) -> Value {
    json!({ "title": [{ "text": { "content": text } }] })
}

pub fn rich_text(text: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": text } }] })
}

pub fn number(value: i64) -> Value {
    json!({ "number": value })
}

pub fn phone_number(phone: &str) -> Value {
    json!({ "phone_number": phone })
}

pub fn select(name: &str) -> Value {
    json!({ "select": { "name": name } })
}

pub fn status(name: &str) -> Value {
    json!({ "status": { "name": name } })
}

pub fn relation(page_ids: &[&str]) -> Value {
    let ids: Vec<Value> = page_ids.iter().map(|id| json!({ "id": id })).collect();
    json!({ "relation": ids })
}

pub fn date(at: DateTime<Utc>) -> Value {
    json!({ "date": { "start": at.to_rfc3339() } })
}

// ==================== 查询过滤 ====================

/// 文本类属性等值过滤（rich_text / title）
pub fn text_equals(property: &str, value: &str) -> Value {
    json!({ "property": property, "rich_text": { "equals": value } })
}

pub fn phone_equals(property: &str, value: &str) -> Value {
    json!({ "property": property, "phone_number": { "equals": value } })
}

pub fn number_equals(property: &str, value: i64) -> Value {
    json!({ "property": property, "number": { "equals": value } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_id() {
        assert_eq!(
            canonical_id("1A2b-3C4d-5e6F"),
            canonical_id("1a2b3c4d5e6f")
        );
    }

    #[test]
    fn test_page_deserialize_partial() {
        let page: Page = serde_json::from_value(json!({
            "id": "abc",
            "properties": { "Puntos": { "type": "number", "number": 5 } }
        }))
        .unwrap();
        assert_eq!(page.database_id(), None);
        assert!(page.property("Puntos").is_some());
        assert!(!page.archived);
    }

    #[test]
    fn test_relation_builder() {
        let v = relation(&["p1", "p2"]);
        assert_eq!(v["relation"][1]["id"], "p2");
    }
}
