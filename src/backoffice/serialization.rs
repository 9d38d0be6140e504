use chrono::{SecondsFormat, Utc};
use serde_json::Value;

/// 当前 UTC 时间，RFC 3339 格式（毫秒精度，`Z` 结尾）
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 当前时间戳（毫秒）
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 生成本地临时 ID：当前毫秒时间戳的字符串形式
///
/// `taken` 返回 true 表示该 ID 已存在，此时递增直到唯一
pub fn generate_local_id(taken: impl Fn(&str) -> bool) -> String {
    let mut candidate = now_millis();
    loop {
        let id = candidate.to_string();
        if !taken(&id) {
            return id;
        }
        candidate += 1;
    }
}

/// 浅合并：把 `patch` 对象的顶层字段覆盖写入 `target`
///
/// 两者都必须是 JSON 对象，否则返回 false 且不做修改
pub fn merge_json(target: &mut Value, patch: &Value) -> bool {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(target), Some(patch)) => {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overrides_top_level_keys_only() {
        let mut target = json!({"id": "2", "statut": "Actif", "name": "Martin"});
        assert!(merge_json(&mut target, &json!({"statut": "Inactif"})));
        assert_eq!(target, json!({"id": "2", "statut": "Inactif", "name": "Martin"}));

        assert!(!merge_json(&mut target, &json!(["not", "an", "object"])));
    }

    #[test]
    fn local_id_skips_taken_values() {
        let first = generate_local_id(|_| false);
        assert!(first.parse::<i64>().is_ok());

        let taken = first.clone();
        let second = generate_local_id(|id| id == taken);
        assert_ne!(second, first);
        assert!(second.parse::<i64>().unwrap() > first.parse::<i64>().unwrap());
    }

    #[test]
    fn timestamps_are_utc_millis() {
        let ts = now_rfc3339();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
