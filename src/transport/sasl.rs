//! AUTH PLAIN / LOGIN / XOAUTH2 mechanisms. A deliberately small subset of
//! what a full SASL library offers, scoped to what SMTP login needs.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::TransportError;
use crate::options::Auth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mechanism {
    Plain,
    Login,
    XOAuth2,
}

impl Mechanism {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Mechanism::Plain => "PLAIN",
            Mechanism::Login => "LOGIN",
            Mechanism::XOAuth2 => "XOAUTH2",
        }
    }

    /// Pick the mechanism to use given the server's advertised list and the
    /// configured credentials, preferring `auth_method` if the caller set one.
    pub(crate) fn select(
        auth: &Auth,
        preferred: Option<&str>,
        server_methods: &[String],
    ) -> Result<Mechanism, TransportError> {
        let candidates: &[Mechanism] = match auth {
            Auth::XOAuth2 { .. } => &[Mechanism::XOAuth2],
            Auth::Plain { .. } => &[Mechanism::Plain, Mechanism::Login],
        };
        if let Some(preferred) = preferred {
            if let Some(m) = candidates.iter().find(|m| m.name().eq_ignore_ascii_case(preferred)) {
                return Ok(*m);
            }
        }
        candidates
            .iter()
            .copied()
            .find(|m| server_methods.iter().any(|s| s.eq_ignore_ascii_case(m.name())))
            .ok_or_else(|| TransportError::new("server does not advertise a compatible AUTH mechanism"))
    }
}

/// The initial response sent on the `AUTH <mechanism> [initial]` line, if any.
pub(crate) fn initial_response(mechanism: Mechanism, auth: &Auth) -> Option<String> {
    match (mechanism, auth) {
        (Mechanism::Plain, Auth::Plain { user, pass }) => {
            let raw = format!("\0{}\0{}", user, pass);
            Some(STANDARD.encode(raw))
        }
        (Mechanism::XOAuth2, Auth::XOAuth2 { user, token }) => {
            let raw = format!("user={}\x01auth=Bearer {}\x01\x01", user, token);
            Some(STANDARD.encode(raw))
        }
        (Mechanism::Login, _) => None,
        _ => None,
    }
}

/// Respond to a `334` continuation challenge. LOGIN alternates
/// username/password by call order; PLAIN/XOAUTH2 never get here once their
/// initial response was accepted (a further 334 means failure upstream).
pub(crate) fn respond_to_challenge(
    mechanism: Mechanism,
    auth: &Auth,
    step: usize,
) -> Result<String, TransportError> {
    match (mechanism, auth) {
        (Mechanism::Login, Auth::Plain { user, pass }) => {
            let value = if step == 0 { user } else { pass };
            Ok(STANDARD.encode(value))
        }
        _ => Err(TransportError::new("unexpected AUTH continuation")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_initial_response_is_nul_separated() {
        let auth = Auth::Plain { user: "alice".into(), pass: "s3cret".into() };
        let encoded = initial_response(Mechanism::Plain, &auth).unwrap();
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, b"\0alice\0s3cret");
    }

    #[test]
    fn login_has_no_initial_response() {
        let auth = Auth::Plain { user: "alice".into(), pass: "s3cret".into() };
        assert!(initial_response(Mechanism::Login, &auth).is_none());
    }

    #[test]
    fn select_prefers_explicit_auth_method() {
        let auth = Auth::Plain { user: "a".into(), pass: "b".into() };
        let methods = vec!["PLAIN".to_owned(), "LOGIN".to_owned()];
        let picked = Mechanism::select(&auth, Some("LOGIN"), &methods).unwrap();
        assert_eq!(picked, Mechanism::Login);
    }

    #[test]
    fn select_falls_back_to_server_support() {
        let auth = Auth::Plain { user: "a".into(), pass: "b".into() };
        let methods = vec!["LOGIN".to_owned()];
        let picked = Mechanism::select(&auth, None, &methods).unwrap();
        assert_eq!(picked, Mechanism::Login);
    }
}
