use actix_web::HttpRequest;
use actix_web::cookie::{Cookie, SameSite, time::Duration};
use actix_web::http::header;

use crate::auth::Credentials;

use super::error::ApiError;

pub const ADMIN_COOKIE: &str = "secret_key";
pub const SESSION_COOKIE: &str = "org_session";
pub const ADMIN_HEADER: &str = "x-secret-key";

const COOKIE_MAX_AGE: Duration = Duration::hours(24);

/// Everything any resolver might look at, read once per request.
pub fn credentials(req: &HttpRequest) -> Credentials {
    let admin_secret = req
        .cookie(ADMIN_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| header_value(req, ADMIN_HEADER));
    let bearer = header_value(req, header::AUTHORIZATION.as_str()).and_then(|raw| {
        raw.strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
    });
    Credentials {
        admin_secret,
        bearer,
        session_id: session_id(req),
    }
}

pub fn session_id(req: &HttpRequest) -> Option<String> {
    req.cookie(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn base_cookie(name: &'static str, value: String, same_site: SameSite, secure: bool) -> Cookie<'static> {
    Cookie::build(name, value)
        .path("/")
        .http_only(true)
        .same_site(same_site)
        .secure(secure)
        .max_age(COOKIE_MAX_AGE)
        .finish()
}

pub fn admin_cookie(secret: String, secure: bool) -> Cookie<'static> {
    base_cookie(ADMIN_COOKIE, secret, SameSite::Strict, secure)
}

/// Lax so the cookie survives the redirect back from the OAuth provider.
pub fn session_cookie(id: String, secure: bool) -> Cookie<'static> {
    base_cookie(SESSION_COOKIE, id, SameSite::Lax, secure)
}

pub fn removal_cookie(name: &'static str) -> Cookie<'static> {
    let mut cookie = Cookie::build(name, "").path("/").finish();
    cookie.make_removal();
    cookie
}

pub fn parse_id(raw: &str, message: &str) -> Result<u64, ApiError> {
    raw.parse().map_err(|_| ApiError::bad_request(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn reads_all_credential_sources() {
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer abc123"))
            .insert_header((ADMIN_HEADER, "hunter2"))
            .cookie(Cookie::new(SESSION_COOKIE, "sess"))
            .to_http_request();
        let creds = credentials(&req);
        assert_eq!(creds.bearer.as_deref(), Some("abc123"));
        assert_eq!(creds.admin_secret.as_deref(), Some("hunter2"));
        assert_eq!(creds.session_id.as_deref(), Some("sess"));
    }

    #[test]
    fn admin_cookie_wins_over_header() {
        let req = TestRequest::default()
            .insert_header((ADMIN_HEADER, "from-header"))
            .cookie(Cookie::new(ADMIN_COOKIE, "from-cookie"))
            .to_http_request();
        assert_eq!(credentials(&req).admin_secret.as_deref(), Some("from-cookie"));
    }

    #[test]
    fn non_bearer_authorization_is_ignored() {
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Basic dXNlcjpwYXNz"))
            .to_http_request();
        assert!(credentials(&req).bearer.is_none());
    }

    #[test]
    fn cookie_attributes() {
        let cookie = session_cookie("id".into(), true);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(admin_cookie("s".into(), false).same_site(), Some(SameSite::Strict));
    }

    #[test]
    fn ids_must_be_numeric() {
        assert_eq!(parse_id("42", "Invalid booking ID").unwrap(), 42);
        assert_eq!(
            parse_id("4x", "Invalid booking ID").unwrap_err().to_string(),
            "Invalid booking ID"
        );
    }
}
