use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// HTTP Basic credentials, resolved once at start-up. Without both a
/// username and a password every request is let through.
#[derive(Clone)]
pub struct BasicAuth {
    credentials: Option<(String, String)>,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl BasicAuth {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        let credentials = match (username, password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        };
        Self { credentials }
    }

    pub fn disabled() -> Self {
        Self { credentials: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let Some((expected_user, expected_pass)) = &self.credentials else {
            return true;
        };

        let Some((user, pass)) = extract_basic(headers) else {
            return false;
        };

        // Both halves are always compared.
        let user_ok = constant_time_eq(user.as_bytes(), expected_user.as_bytes());
        let pass_ok = constant_time_eq(pass.as_bytes(), expected_pass.as_bytes());
        user_ok & pass_ok
    }
}

fn extract_basic(headers: &HeaderMap) -> Option<(String, String)> {
    let text = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = text.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Runs over the longer input regardless of where the first mismatch is.
/// Only the lengths can leak.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut diff = (a.len() ^ b.len()) as u64;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= u64::from(x ^ y);
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn basic(user: &str, pass: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let token = STANDARD.encode(format!("{}:{}", user, pass));
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Basic {}", token)).unwrap());
        headers
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret!"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_disabled_without_both_credentials() {
        assert!(!BasicAuth::new(Some("admin".into()), None).is_enabled());
        assert!(!BasicAuth::new(Some("admin".into()), Some(String::new())).is_enabled());
        assert!(BasicAuth::disabled().is_authorized(&HeaderMap::new()));
    }

    #[test]
    fn test_basic_credentials() {
        let auth = BasicAuth::new(Some("admin".into()), Some("p:ss".into()));
        assert!(auth.is_authorized(&basic("admin", "p:ss")));
        assert!(!auth.is_authorized(&basic("admin", "wrong")));
        assert!(!auth.is_authorized(&basic("Admin", "p:ss")));
        assert!(!auth.is_authorized(&HeaderMap::new()));

        let mut bearer = HeaderMap::new();
        bearer.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(!auth.is_authorized(&bearer));
    }
}
