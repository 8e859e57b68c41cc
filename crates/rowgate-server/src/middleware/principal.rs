use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use rowgate_core::{Principal, RoleId};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLE_IDS_HEADER: &str = "x-role-ids";
pub const PRIMARY_ROLE_HEADER: &str = "x-primary-role";

/// Axum middleware turning trusted identity headers into a [`Principal`]
/// request extension.
///
/// The headers are expected to be set by an authenticating proxy in front of
/// this service. Requests without `x-user-id` stay anonymous; malformed
/// headers are rejected with 400.
pub async fn principal_from_headers(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let principal = parse_principal(req.headers()).map_err(|reason| {
        tracing::warn!(reason = %reason, "Rejecting malformed identity headers");
        StatusCode::BAD_REQUEST
    })?;
    if let Some(principal) = principal {
        req.extensions_mut().insert(principal);
    }
    Ok(next.run(req).await)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, String> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| Some(s.trim()).filter(|s| !s.is_empty()))
            .map_err(|_| format!("{name} is not valid text")),
    }
}

fn parse_id(name: &str, raw: &str) -> Result<i64, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("{name} must be numeric, got '{raw}'"))
}

pub fn parse_principal(headers: &HeaderMap) -> Result<Option<Principal>, String> {
    let Some(user) = header(headers, USER_ID_HEADER)? else {
        return Ok(None);
    };
    let user_id = parse_id(USER_ID_HEADER, user)?;

    let roles: Vec<RoleId> = match header(headers, ROLE_IDS_HEADER)? {
        Some(raw) => raw
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_id(ROLE_IDS_HEADER, s))
            .collect::<Result<_, _>>()?,
        None => Vec::new(),
    };

    let mut principal = Principal::new(user_id, roles);
    if let Some(raw) = header(headers, PRIMARY_ROLE_HEADER)? {
        principal = principal.with_primary_role(parse_id(PRIMARY_ROLE_HEADER, raw)?);
    }
    Ok(Some(principal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_parse_full_principal() {
        let principal = parse_principal(&headers(&[
            ("x-user-id", "7"),
            ("x-role-ids", "2, 3"),
            ("x-primary-role", "3"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(principal.user_id, Some(7));
        assert_eq!(principal.role_ids, vec![2, 3]);
        assert_eq!(principal.effective_roles(), vec![3, 2]);
    }

    #[test]
    fn test_missing_user_is_anonymous() {
        assert_eq!(parse_principal(&headers(&[("x-role-ids", "1")])).unwrap(), None);
    }

    #[test]
    fn test_malformed_ids_are_rejected() {
        assert!(parse_principal(&headers(&[("x-user-id", "abc")])).is_err());
        assert!(parse_principal(&headers(&[("x-user-id", "1"), ("x-role-ids", "1,x")])).is_err());
    }
}
