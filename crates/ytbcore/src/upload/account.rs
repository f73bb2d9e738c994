//! Bilibili account shown next to the biliup status
//!
//! Everything here is best effort: an unreadable cookies file or an
//! unreachable API leaves the fields as "unknown".

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::core::config;

pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiliAccount {
    pub username: String,
    pub space_url: String,
}

impl Default for BiliAccount {
    fn default() -> Self {
        Self {
            username: UNKNOWN.to_string(),
            space_url: UNKNOWN.to_string(),
        }
    }
}

fn space_url(mid: &Value) -> Option<String> {
    let mid = match mid {
        Value::Number(n) => n.to_string(),
        Value::String(s) if !s.is_empty() => s.clone(),
        _ => return None,
    };
    if mid == "0" {
        return None;
    }
    Some(format!("{}{}", config::upload::SPACE_URL_PREFIX, mid))
}

fn collect_named(list: &[Value], cookies: &mut BTreeMap<String, String>) {
    for item in list {
        let name = item.get("name").and_then(Value::as_str).unwrap_or_default();
        let value = item.get("value").and_then(Value::as_str).unwrap_or_default();
        if !name.is_empty() && !value.is_empty() {
            cookies.insert(name.to_string(), value.to_string());
        }
    }
}

/// Cookie name → value from any of the layouts biliup tools write.
pub fn extract_cookies(doc: &Value) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    match doc {
        Value::Array(list) => collect_named(list, &mut cookies),
        Value::Object(map) => {
            if let Some(list) = doc.pointer("/cookie_info/cookies").and_then(Value::as_array) {
                collect_named(list, &mut cookies);
            }
            if cookies.is_empty() {
                if let Some(list) = map.get("cookies").and_then(Value::as_array) {
                    collect_named(list, &mut cookies);
                }
            }
            if cookies.is_empty() {
                for (k, v) in map {
                    if let Some(v) = v.as_str() {
                        cookies.insert(k.clone(), v.to_string());
                    }
                }
            }
        }
        _ => {}
    }
    cookies
}

fn cookie_header(cookies: &BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Applies a `/x/web-interface/nav` response.
fn apply_nav(account: &mut BiliAccount, body: &Value) {
    if body.get("code").and_then(Value::as_i64) != Some(0) {
        return;
    }
    let Some(data) = body.get("data") else {
        return;
    };
    if let Some(name) = data
        .get("uname")
        .or_else(|| data.get("username"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        account.username = name.to_string();
    }
    if let Some(url) = data.get("mid").or_else(|| data.get("uid")).and_then(space_url) {
        account.space_url = url;
    }
}

async fn query_nav(cookies: &BTreeMap<String, String>) -> Option<Value> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config::upload::NAV_TIMEOUT_SECS))
        .build()
        .ok()?;
    let response = client
        .get(config::upload::NAV_URL)
        .header(reqwest::header::USER_AGENT, "Mozilla/5.0 (Windows NT 10.0; Win64; x64)")
        .header(reqwest::header::REFERER, "https://www.bilibili.com/")
        .header(reqwest::header::COOKIE, cookie_header(cookies))
        .send()
        .await
        .map_err(|e| log::debug!("nav request failed: {}", e))
        .ok()?;
    if !response.status().is_success() {
        log::debug!("nav request returned {}", response.status());
        return None;
    }
    response.json().await.ok()
}

/// Username and space URL for the biliup login in `cookies_path`.
pub async fn fetch_account(cookies_path: &Path) -> BiliAccount {
    let mut account = BiliAccount::default();
    let Some(doc) = std::fs::read_to_string(cookies_path)
        .ok()
        .and_then(|text| serde_json::from_str::<Value>(&text).ok())
    else {
        return account;
    };

    let cookies = extract_cookies(&doc);
    if cookies.is_empty() {
        return account;
    }

    if let Some(url) = doc.pointer("/token_info/mid").and_then(space_url) {
        account.space_url = url;
    }

    if let Some(body) = query_nav(&cookies).await {
        apply_nav(&mut account, &body);
    }

    if account.space_url == UNKNOWN {
        if let Some((_, uid)) = cookies
            .iter()
            .find(|(k, v)| k.eq_ignore_ascii_case("DedeUserID") && !v.is_empty())
        {
            account.space_url = format!("{}{}", config::upload::SPACE_URL_PREFIX, uid);
        }
    }
    account
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_extract_cookie_list() {
        let doc = json!([{"name": "SESSDATA", "value": "abc"}, {"name": "", "value": "x"}, "junk"]);
        let cookies = extract_cookies(&doc);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies["SESSDATA"], "abc");
    }

    #[test]
    fn test_extract_biliup_document() {
        let doc = json!({
            "cookie_info": {"cookies": [{"name": "DedeUserID", "value": "42"}]},
            "token_info": {"mid": 42}
        });
        assert_eq!(extract_cookies(&doc)["DedeUserID"], "42");
        assert_eq!(
            doc.pointer("/token_info/mid").and_then(space_url).as_deref(),
            Some("https://space.bilibili.com/42")
        );
    }

    #[test]
    fn test_extract_generic_and_flat() {
        let generic = json!({"cookies": [{"name": "a", "value": "1"}]});
        assert_eq!(extract_cookies(&generic)["a"], "1");

        let flat = json!({"SESSDATA": "s", "n": 3});
        let cookies = extract_cookies(&flat);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookie_header(&cookies), "SESSDATA=s");
    }

    #[test]
    fn test_apply_nav() {
        let mut account = BiliAccount::default();
        apply_nav(&mut account, &json!({"code": -101, "data": {"uname": "x"}}));
        assert_eq!(account, BiliAccount::default());

        apply_nav(&mut account, &json!({"code": 0, "data": {"uname": "dj", "mid": 7}}));
        assert_eq!(account.username, "dj");
        assert_eq!(account.space_url, "https://space.bilibili.com/7");
    }

    #[tokio::test]
    async fn test_fetch_account_unreadable_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(fetch_account(&dir.path().join("missing.json")).await, BiliAccount::default());

        let empty = dir.path().join("cookies.json");
        std::fs::write(&empty, "[]").unwrap();
        assert_eq!(fetch_account(&empty).await, BiliAccount::default());
    }
}
