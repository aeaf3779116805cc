use bytes::Bytes;

use crate::error::{EngineError, EngineResult};
use crate::types::params::{ParamValue, Params};

/// 将参数序列化为 JSON 对象，`Null` 保留为 `null` 而不是省略
pub fn encode(params: &Params) -> EngineResult<Bytes> {
    let mut object = serde_json::Map::with_capacity(params.len());

    for (key, value) in params.iter() {
        let json = match value {
            ParamValue::Null => serde_json::Value::Null,
            ParamValue::Bool(flag) => serde_json::Value::Bool(*flag),
            ParamValue::Int(number) => serde_json::Value::from(*number),
            ParamValue::Float(number) => serde_json::Number::from_f64(*number)
                .map(serde_json::Value::Number)
                .ok_or_else(|| EngineError::InvalidParams {
                    reason: format!("`{}` is not a finite number", key),
                })?,
            ParamValue::Text(text) => serde_json::Value::String(text.clone()),
            ParamValue::Json(json) => json.clone(),
            ParamValue::Part(_) => {
                return Err(EngineError::InvalidParams {
                    reason: format!("`{}` is a multipart part and cannot be encoded as json", key),
                });
            }
        };
        object.insert(key.to_string(), json);
    }

    serde_json::to_vec(&serde_json::Value::Object(object))
        .map(Bytes::from)
        .map_err(|e| EngineError::InvalidParams {
            reason: e.to_string(),
        })
}
