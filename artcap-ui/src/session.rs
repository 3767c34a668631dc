//! Per-client session state
//!
//! The only session state is the "current record" pointer per object type:
//! which record subsequent add-image actions should target. Sessions are
//! identified by an opaque cookie token and live in process memory; the
//! matching engine receives the pointer as an explicit parameter and the
//! handler stores the value it returns.

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const SESSION_COOKIE: &str = "artcap_session";

/// token -> (object type -> current record id)
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, HashMap<String, i64>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_record(&self, token: &str, otype: &str) -> Option<i64> {
        let sessions = self.inner.lock().expect("session store lock poisoned");
        sessions.get(token).and_then(|m| m.get(otype)).copied()
    }

    pub fn set_current_record(&self, token: &str, otype: &str, id: i64) {
        let mut sessions = self.inner.lock().expect("session store lock poisoned");
        sessions
            .entry(token.to_string())
            .or_default()
            .insert(otype.to_string(), id);
    }
}

/// Read the session token from the Cookie header, if present
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookie_header = headers.get(COOKIE)?.to_str().ok()?;
    for pair in cookie_header.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some(SESSION_COOKIE) {
            let value = parts.next()?.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Fresh opaque session token
pub fn new_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Set-Cookie value for a newly issued session token
pub fn session_cookie(token: &str) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, token)
}
