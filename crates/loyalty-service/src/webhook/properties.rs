//! 页面属性解释器
//!
//! 工作台属性是带类型标签的多态 JSON。每个读取函数按标签分派到纯提取逻辑，
//! 未知类型、缺失属性或类型不匹配一律返回 None，不报错。

use serde_json::Value;

use crate::models::normalize_phone;
use crate::workspace::PropertyMap;

/// 属性类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Title,
    RichText,
    Number,
    Select,
    Status,
    MultiSelect,
    Relation,
    Rollup,
    Formula,
    PhoneNumber,
    Email,
    Url,
    Date,
    Checkbox,
    UniqueId,
}

impl PropertyKind {
    const ALL: [PropertyKind; 15] = [
        Self::Title,
        Self::RichText,
        Self::Number,
        Self::Select,
        Self::Status,
        Self::MultiSelect,
        Self::Relation,
        Self::Rollup,
        Self::Formula,
        Self::PhoneNumber,
        Self::Email,
        Self::Url,
        Self::Date,
        Self::Checkbox,
        Self::UniqueId,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::RichText => "rich_text",
            Self::Number => "number",
            Self::Select => "select",
            Self::Status => "status",
            Self::MultiSelect => "multi_select",
            Self::Relation => "relation",
            Self::Rollup => "rollup",
            Self::Formula => "formula",
            Self::PhoneNumber => "phone_number",
            Self::Email => "email",
            Self::Url => "url",
            Self::Date => "date",
            Self::Checkbox => "checkbox",
            Self::UniqueId => "unique_id",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }
}

/// 识别属性类型：优先 `type` 字段，否则取第一个已知标签键
pub fn kind_of(prop: &Value) -> Option<PropertyKind> {
    let obj = prop.as_object()?;
    if let Some(tag) = obj.get("type").and_then(Value::as_str) {
        return PropertyKind::from_tag(tag);
    }
    PropertyKind::ALL
        .into_iter()
        .find(|k| obj.contains_key(k.tag()))
}

/// 属性的载荷部分
fn payload(prop: &Value, kind: PropertyKind) -> Option<&Value> {
    prop.get(kind.tag()).filter(|v| !v.is_null())
}

fn rich_text_plain(items: &Value) -> Option<String> {
    let text: String = items
        .as_array()?
        .iter()
        .filter_map(|item| {
            item.get("plain_text")
                .and_then(Value::as_str)
                .or_else(|| item.pointer("/text/content").and_then(Value::as_str))
        })
        .collect();
    let text = text.trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}

/// 公式结果按其内部类型取值
fn formula_text(formula: &Value) -> Option<String> {
    match formula.get("type").and_then(Value::as_str)? {
        "string" => formula.get("string").and_then(Value::as_str).and_then(non_empty),
        "number" => formula.get("number").and_then(Value::as_f64).map(format_number),
        "boolean" => formula.get("boolean").and_then(Value::as_bool).map(|b| b.to_string()),
        "date" => formula.pointer("/date/start").and_then(Value::as_str).and_then(non_empty),
        _ => None,
    }
}

/// 汇总：数值直接取；数组取第一个可读元素
fn rollup_text(rollup: &Value) -> Option<String> {
    match rollup.get("type").and_then(Value::as_str)? {
        "number" => rollup.get("number").and_then(Value::as_f64).map(format_number),
        "date" => rollup.pointer("/date/start").and_then(Value::as_str).and_then(non_empty),
        "array" => rollup
            .get("array")?
            .as_array()?
            .iter()
            .find_map(as_text),
        _ => None,
    }
}

/// 读取为文本
pub fn as_text(prop: &Value) -> Option<String> {
    let kind = kind_of(prop)?;
    let value = payload(prop, kind)?;

    match kind {
        PropertyKind::Title | PropertyKind::RichText => rich_text_plain(value),
        PropertyKind::Number => value.as_f64().map(format_number),
        PropertyKind::Select | PropertyKind::Status => {
            value.get("name").and_then(Value::as_str).and_then(non_empty)
        }
        PropertyKind::MultiSelect => {
            let names: Vec<&str> = value
                .as_array()?
                .iter()
                .filter_map(|o| o.get("name").and_then(Value::as_str))
                .collect();
            if names.is_empty() { None } else { Some(names.join(", ")) }
        }
        PropertyKind::PhoneNumber | PropertyKind::Email | PropertyKind::Url => {
            value.as_str().and_then(non_empty)
        }
        PropertyKind::Date => value.get("start").and_then(Value::as_str).and_then(non_empty),
        PropertyKind::Checkbox => value.as_bool().map(|b| b.to_string()),
        PropertyKind::Formula => formula_text(value),
        PropertyKind::Rollup => rollup_text(value),
        PropertyKind::UniqueId => {
            let number = value.get("number").and_then(Value::as_i64)?;
            Some(match value.get("prefix").and_then(Value::as_str) {
                Some(prefix) if !prefix.is_empty() => format!("{prefix}-{number}"),
                _ => number.to_string(),
            })
        }
        PropertyKind::Relation => None,
    }
}

/// 读取为数值；文本类属性尝试按数字解析
pub fn as_number(prop: &Value) -> Option<f64> {
    let kind = kind_of(prop)?;
    let value = payload(prop, kind)?;

    match kind {
        PropertyKind::Number => value.as_f64(),
        PropertyKind::Formula if value.get("type").and_then(Value::as_str) == Some("number") => {
            value.get("number").and_then(Value::as_f64)
        }
        PropertyKind::Rollup => match value.get("type").and_then(Value::as_str)? {
            "number" => value.get("number").and_then(Value::as_f64),
            "array" => value.get("array")?.as_array()?.iter().find_map(as_number),
            _ => None,
        },
        PropertyKind::UniqueId => value.get("number").and_then(Value::as_f64),
        PropertyKind::Relation | PropertyKind::Checkbox | PropertyKind::Date => None,
        _ => as_text(prop).and_then(|s| s.replace(',', "").trim().parse::<f64>().ok()),
    }
}

/// 读取关联页面 ID 列表
pub fn as_relation_ids(prop: &Value) -> Vec<String> {
    let Some(kind) = kind_of(prop) else {
        return Vec::new();
    };
    let Some(value) = payload(prop, kind) else {
        return Vec::new();
    };

    match kind {
        PropertyKind::Relation => value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|r| r.get("id").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
        PropertyKind::Rollup => value
            .get("array")
            .and_then(Value::as_array)
            .map(|items| items.iter().flat_map(as_relation_ids).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// 读取为规范化手机号
pub fn as_phone(prop: &Value) -> Option<String> {
    as_text(prop).and_then(|s| normalize_phone(&s))
}

/// 按属性名读取页面属性
pub struct PropertyReader<'a> {
    properties: &'a PropertyMap,
}

impl<'a> PropertyReader<'a> {
    pub fn new(properties: &'a PropertyMap) -> Self {
        Self { properties }
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.properties.get(name).and_then(as_text)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.properties.get(name).and_then(as_number)
    }

    pub fn relation_ids(&self, name: &str) -> Vec<String> {
        self.properties
            .get(name)
            .map(as_relation_ids)
            .unwrap_or_default()
    }

    pub fn phone(&self, name: &str) -> Option<String> {
        self.properties.get(name).and_then(as_phone)
    }

    /// 本地 ID 属性（数字或文本）
    pub fn local_id(&self, name: &str) -> Option<i64> {
        self.number(name)
            .filter(|n| n.fract() == 0.0 && *n > 0.0)
            .map(|n| n as i64)
    }
}
