use anyhow::Context;
use serde::{Deserialize, Deserializer};
use tracing::{debug, error, info};

/// 反序列化数组字段，处理 null 值
pub(crate) fn deserialize_vec_or_null<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let opt = Option::<Vec<T>>::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// 集合列表响应体（服务器可能直接返回 `null`）
#[derive(Debug, Deserialize)]
#[serde(transparent, bound(deserialize = "T: Deserialize<'de>"))]
pub(crate) struct ListBody<T> {
    #[serde(deserialize_with = "deserialize_vec_or_null")]
    pub items: Vec<T>,
}

/// 读取并校验 HTTP 响应，返回原始 body 及其文本形式（用于日志）
///
/// 非 2xx 状态和读取失败都会被归一化为一个带可读信息的错误
async fn read_success_body(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<(Vec<u8>, String)> {
    let status = response.status();

    // 读取 body bytes（只能读取一次）
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes).into_owned();
    info!("[HTTP] {}响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body_str));
    }
    debug!("[HTTP] {}请求成功，HTTP状态: {}", operation_name, status);

    Ok((body_bytes.to_vec(), body_str))
}

/// 通用 HTTP 响应处理函数：校验状态码并把 body 反序列化为 `T`
/// 所有集合接口（clients / products / ordonnances）共用此方法
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<T> {
    let (body_bytes, body_str) = read_success_body(response, operation_name).await?;

    // 从 bytes 反序列化（因为 body 已经被消费了）
    serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("反序列化响应失败: {:?}", e)
    })
}

/// 只关心状态码的响应（例如 DELETE），body 忽略
pub async fn ensure_http_success(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<()> {
    read_success_body(response, operation_name).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_body_accepts_null() {
        let body: ListBody<String> = serde_json::from_str("null").unwrap();
        assert!(body.items.is_empty());

        let body: ListBody<String> = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(body.items, vec!["a".to_string(), "b".to_string()]);
    }
}
