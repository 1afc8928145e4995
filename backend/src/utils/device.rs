use axum::http::{header::USER_AGENT, HeaderMap};

use crate::models::session::DeviceMeta;

impl DeviceMeta {
    /// Builds device metadata from request headers. Location is left to callers
    /// that have a geo lookup.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let user_agent = extract_user_agent(headers);
        let device = user_agent.as_deref().map(describe_user_agent);
        Self {
            user_agent,
            ip_address: extract_ip(headers),
            device,
            location: None,
        }
    }
}

pub fn extract_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        return value
            .split(',')
            .next()
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty());
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|agent| agent.trim().to_string())
        .filter(|agent| !agent.is_empty())
}

/// Coarse "Browser on Platform" label for session lists.
pub fn describe_user_agent(user_agent: &str) -> String {
    let ua = user_agent.to_ascii_lowercase();

    let browser = if ua.contains("edg/") {
        "Edge"
    } else if ua.contains("opr/") || ua.contains("opera") {
        "Opera"
    } else if ua.contains("firefox/") {
        "Firefox"
    } else if ua.contains("chrome/") || ua.contains("crios/") {
        "Chrome"
    } else if ua.contains("safari/") {
        "Safari"
    } else if ua.contains("curl/") || ua.contains("okhttp") || ua.contains("reqwest") {
        "API client"
    } else {
        "Unknown browser"
    };

    let platform = if ua.contains("iphone") || ua.contains("ipad") {
        "iOS"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("windows") {
        "Windows"
    } else if ua.contains("mac os") || ua.contains("macintosh") {
        "macOS"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "Unknown platform"
    };

    format!("{} on {}", browser, platform)
}
