use std::path::PathBuf;

use bytes::Bytes;

/// 参数值
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// 嵌套结构（数组 / 对象）
    Json(serde_json::Value),
    /// multipart 专用的文件或二进制分段
    Part(MultipartPart),
}

impl ParamValue {
    /// 标量值的文本形式，`Null` / `Json` 对象 / `Part` 返回 `None`
    pub fn as_text(&self) -> Option<String> {
        match self {
            ParamValue::Bool(value) => Some(value.to_string()),
            ParamValue::Int(value) => Some(value.to_string()),
            ParamValue::Float(value) => Some(value.to_string()),
            ParamValue::Text(value) => Some(value.clone()),
            ParamValue::Json(serde_json::Value::String(value)) => Some(value.clone()),
            ParamValue::Json(serde_json::Value::Number(value)) => Some(value.to_string()),
            ParamValue::Json(serde_json::Value::Bool(value)) => Some(value.to_string()),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<serde_json::Value> for ParamValue {
    fn from(value: serde_json::Value) -> Self {
        ParamValue::Json(value)
    }
}

impl From<MultipartPart> for ParamValue {
    fn from(value: MultipartPart) -> Self {
        ParamValue::Part(value)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ParamValue::Null, Into::into)
    }
}

/// 保持插入顺序的参数映射
///
/// 重复插入同一个键会原地替换旧值，顺序保持第一次插入的位置。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, ParamValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        let index = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 以 `other` 的条目覆盖当前参数
    pub fn extend(&mut self, other: Params) {
        for (key, value) in other.entries {
            self.insert(key, value);
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

/// multipart 分段的负载来源
#[derive(Debug, Clone, PartialEq)]
pub enum PartPayload {
    Bytes(Bytes),
    /// 磁盘文件，发送时按块读取
    File(PathBuf),
}

/// multipart 分段（字段名取参数键）
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartPart {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub payload: PartPayload,
}

impl MultipartPart {
    pub fn bytes(payload: impl Into<Bytes>) -> Self {
        Self {
            file_name: None,
            content_type: None,
            payload: PartPayload::Bytes(payload.into()),
        }
    }

    /// 磁盘文件分段，文件名默认取路径的最后一段
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Self {
            file_name,
            content_type: None,
            payload: PartPayload::File(path),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_keep_insertion_order() {
        let mut params = Params::new().with("b", 1).with("a", "x").with("c", true);
        params.insert("b", 2);

        let keys: Vec<&str> = params.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(params.get("b"), Some(&ParamValue::Int(2)));
        assert_eq!(params.remove("a"), Some(ParamValue::Text("x".into())));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_option_maps_to_null() {
        let value: ParamValue = None::<String>.into();
        assert_eq!(value, ParamValue::Null);
        assert_eq!(value.as_text(), None);
        assert_eq!(ParamValue::from(Some(3)).as_text().as_deref(), Some("3"));
    }

    #[test]
    fn test_file_part_defaults_file_name() {
        let part = MultipartPart::file("/tmp/report.pdf").with_content_type("application/pdf");
        assert_eq!(part.file_name.as_deref(), Some("report.pdf"));
        assert_eq!(part.content_type.as_deref(), Some("application/pdf"));
    }
}
