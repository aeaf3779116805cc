use url::form_urlencoded::Serializer;

use crate::error::{EngineError, EngineResult};
use crate::types::params::{ParamValue, Params};

/// 按 `application/x-www-form-urlencoded` 规则编码参数
///
/// 键值对顺序与参数的插入顺序一致；数组展开为 `key[]=v`，对象展开为 `key[sub]=v`，
/// `Null` 编码为空值。
pub fn encode(params: &Params) -> EngineResult<String> {
    let mut serializer = Serializer::new(String::new());

    for (key, value) in params.iter() {
        match value {
            ParamValue::Null => {
                serializer.append_pair(key, "");
            }
            ParamValue::Json(json) => append_json(&mut serializer, key, json),
            ParamValue::Part(_) => {
                return Err(EngineError::InvalidParams {
                    reason: format!("`{}` is a multipart part and cannot be url-encoded", key),
                });
            }
            scalar => {
                let text = scalar.as_text().unwrap_or_default();
                serializer.append_pair(key, &text);
            }
        }
    }

    Ok(serializer.finish())
}

fn append_json(serializer: &mut Serializer<'_, String>, key: &str, value: &serde_json::Value) {
    match value {
        serde_json::Value::Null => {
            serializer.append_pair(key, "");
        }
        serde_json::Value::Bool(flag) => {
            serializer.append_pair(key, &flag.to_string());
        }
        serde_json::Value::Number(number) => {
            serializer.append_pair(key, &number.to_string());
        }
        serde_json::Value::String(text) => {
            serializer.append_pair(key, text);
        }
        serde_json::Value::Array(items) => {
            let nested = format!("{}[]", key);
            for item in items {
                append_json(serializer, &nested, item);
            }
        }
        serde_json::Value::Object(map) => {
            for (sub_key, item) in map {
                append_json(serializer, &format!("{}[{}]", key, sub_key), item);
            }
        }
    }
}

/// 把已编码的查询串追加到 URL 上
pub fn append_query(url: &mut url::Url, query: &str) {
    if query.is_empty() {
        return;
    }
    let merged = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{}&{}", existing, query),
        _ => query.to_string(),
    };
    url.set_query(Some(&merged));
}
